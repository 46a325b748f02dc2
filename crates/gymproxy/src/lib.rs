//! Client for environments hosted behind a `gymproxyd` endpoint.
//!
//! [`RemoteEnv`] mirrors a local environment: `step`, `reset`, `render` and
//! `close` become one request/reply exchange each, tagged with the session id
//! handed out by `setup`.

use gymproxy_core::{
    CloseResult, Fields, Map, Method, ProxyError, RenderParams, RenderResult, ResetResult,
    SessionId, SessionParams, SetupParams, SetupResult, StepOutcome, StepParams, StepResult,
    Value, expand_env_refs,
};
use gymproxy_ipc::{IpcError, ProxyTransport};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure; the connection should be considered lost.
    #[error(transparent)]
    Ipc(IpcError),
    /// Error reply from the server, verbatim.
    #[error("{0}")]
    Remote(String),
    /// Reply belonged to a different session than the one this client holds.
    #[error("reply for session {actual} while holding session {expected}")]
    SessionIdentity {
        expected: SessionId,
        actual: SessionId,
    },
    /// Reply was missing fields or carried the wrong types.
    #[error("unexpected reply: {0}")]
    Protocol(String),
    /// The session was closed.
    #[error("not connected")]
    NotConnected,
}

impl From<IpcError> for ClientError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Remote(message) => ClientError::Remote(message),
            other => ClientError::Ipc(other),
        }
    }
}

impl From<ProxyError> for ClientError {
    fn from(err: ProxyError) -> Self {
        ClientError::Protocol(err.message)
    }
}

/// Environment whose state lives in a remote proxy server.
///
/// [`RemoteEnv::close`] releases the environment but keeps the connection
/// open. Dropping a `RemoteEnv` drops the connection; the server reclaims the
/// environment when it notices.
pub struct RemoteEnv {
    transport: ProxyTransport,
    url: String,
    session_id: Option<SessionId>,
    action_space: Value,
    observation_space: Value,
    reward_range: (f64, f64),
}

impl RemoteEnv {
    /// Connects to `url` and creates the environment described by `config`.
    ///
    /// `$NAME` references in `url` are replaced with environment variables
    /// first; unset names expand to nothing.
    ///
    /// No `reset` is sent on the caller's behalf. Environments that are not
    /// ready to step straight after construction need a [`RemoteEnv::reset`]
    /// before the first [`RemoteEnv::step`].
    pub async fn connect(url: &str, config: SetupParams) -> Result<Self, ClientError> {
        let url = expand_env_refs(url);
        let transport = ProxyTransport::connect(&url).await?;
        Self::with_transport(transport, config).await
    }

    /// Runs `setup` over an already connected transport.
    pub async fn with_transport(
        mut transport: ProxyTransport,
        config: SetupParams,
    ) -> Result<Self, ClientError> {
        let env_name = config.env_name.clone();
        let map = transport.call(Method::Setup, config.into_map()).await?;
        let setup = SetupResult::from_map(map)?;
        info!(
            url = transport.url(),
            %env_name,
            session_id = %setup.session_id,
            "remote env ready"
        );

        Ok(Self {
            url: transport.url().to_string(),
            transport,
            session_id: Some(setup.session_id),
            action_space: setup.action_space,
            observation_space: setup.observation_space,
            reward_range: setup.reward_range,
        })
    }

    pub fn action_space(&self) -> &Value {
        &self.action_space
    }

    pub fn observation_space(&self) -> &Value {
        &self.observation_space
    }

    pub fn reward_range(&self) -> (f64, f64) {
        self.reward_range
    }

    /// Current session token; `None` after [`RemoteEnv::close`].
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn step(&mut self, action: Value) -> Result<StepOutcome, ClientError> {
        let session_id = self.current_session()?;
        let params = StepParams {
            session_id: session_id.clone(),
            action,
        };
        let reply: StepResult = self.request(Method::Step, params.into_map()).await?;
        check_session(&session_id, reply.session_id)?;

        Ok(StepOutcome {
            obs: reply.obs,
            reward: reply.reward,
            done: reply.done,
            info: reply.info,
        })
    }

    pub async fn reset(&mut self) -> Result<Value, ClientError> {
        let session_id = self.current_session()?;
        let params = SessionParams {
            session_id: session_id.clone(),
        };
        let reply: ResetResult = self.request(Method::Reset, params.into_map()).await?;
        check_session(&session_id, reply.session_id)?;
        Ok(reply.obs)
    }

    /// Renders remotely; modes that draw out of band return `None`.
    pub async fn render(&mut self, mode: &str, close: bool) -> Result<Option<Value>, ClientError> {
        let session_id = self.current_session()?;
        let params = RenderParams {
            session_id: session_id.clone(),
            mode: mode.to_string(),
            close,
        };
        let reply: RenderResult = self.request(Method::Render, params.into_map()).await?;
        check_session(&session_id, reply.session_id)?;
        Ok(reply.img)
    }

    /// Ends the session; the connection stays open.
    ///
    /// The local session is forgotten even when the server reports an error,
    /// and every later call fails with [`ClientError::NotConnected`].
    pub async fn close(&mut self) -> Result<(), ClientError> {
        let session_id = self.current_session()?;
        let params = SessionParams {
            session_id: session_id.clone(),
        };
        let reply = self.request::<CloseResult>(Method::Close, params.into_map()).await;
        self.session_id = None;

        check_session(&session_id, reply?.session_id)?;
        debug!(url = %self.url, %session_id, "remote env closed");
        Ok(())
    }

    fn current_session(&self) -> Result<SessionId, ClientError> {
        self.session_id.clone().ok_or(ClientError::NotConnected)
    }

    async fn request<R: Fields>(&mut self, method: Method, params: Map) -> Result<R, ClientError> {
        let map = self.transport.call(method, params).await?;
        Ok(R::from_map(map)?)
    }
}

fn check_session(expected: &SessionId, actual: SessionId) -> Result<(), ClientError> {
    if *expected == actual {
        Ok(())
    } else {
        Err(ClientError::SessionIdentity {
            expected: expected.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use gymproxy_core::{Fields, Map, SessionId, StepResult};
    use gymproxy_ipc::IpcError;

    use super::{ClientError, check_session};

    #[test]
    fn remote_errors_keep_the_server_message() {
        let err = ClientError::from(IpcError::Remote("Wrong session id".to_string()));
        assert_eq!(err.to_string(), "Wrong session id");
        assert!(matches!(
            ClientError::from(IpcError::Timeout),
            ClientError::Ipc(IpcError::Timeout)
        ));
    }

    #[test]
    fn mismatched_session_is_rejected() {
        let held = SessionId::from("abc123");
        assert!(check_session(&held, SessionId::from("abc123")).is_ok());
        match check_session(&held, SessionId::from("zzz")) {
            Err(ClientError::SessionIdentity { expected, actual }) => {
                assert_eq!(expected, held);
                assert_eq!(actual.as_str(), "zzz");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn bad_reply_shape_is_a_protocol_error() {
        let err = StepResult::from_map(Map::new()).expect_err("empty map");
        assert!(matches!(ClientError::from(err), ClientError::Protocol(_)));
    }
}
