use std::sync::Arc;

use gymproxy_core::{
    CloseResult, ConnId, EnvironmentFactory, ErrorCode, Fields, Map, ProxyError, RenderParams,
    RenderResult, Request, ResetResult, SessionParams, SetupParams, SetupResult, StepParams,
    StepResult,
};
use tokio::task;
use tracing::info;

use crate::{counter::OpCounter, monitor, session::SessionState};

/// Executes typed requests against the session state.
#[derive(Clone)]
pub struct Handler {
    state: Arc<SessionState>,
    factory: Arc<dyn EnvironmentFactory>,
    ops: Arc<OpCounter>,
}

impl Handler {
    pub fn new(
        state: Arc<SessionState>,
        factory: Arc<dyn EnvironmentFactory>,
        ops: Arc<OpCounter>,
    ) -> Self {
        Self {
            state,
            factory,
            ops,
        }
    }

    /// Applies `conn`'s arrival if the lifecycle monitor has not yet.
    pub async fn admit(&self, conn: ConnId) {
        monitor::admit(&self.state, &self.ops, conn).await;
    }

    pub async fn handle(&self, conn: ConnId, request: Request) -> Result<Map, ProxyError> {
        match request {
            Request::Setup(params) => self.setup(conn, params).await.map(Fields::into_map),
            Request::Step(params) => self.step(params).await.map(Fields::into_map),
            Request::Reset(params) => self.reset(params).await.map(Fields::into_map),
            Request::Render(params) => self.render(params).await.map(Fields::into_map),
            Request::Close(params) => self.close(params).await.map(Fields::into_map),
        }
    }

    async fn setup(&self, conn: ConnId, params: SetupParams) -> Result<SetupResult, ProxyError> {
        if self.state.is_active()? {
            return Err(ProxyError::already_set_up());
        }
        if !params.extra.is_empty() {
            tracing::debug!(keys = ?params.extra.keys().collect::<Vec<_>>(), "ignoring extra setup keys");
        }

        let factory = Arc::clone(&self.factory);
        let name = params.env_name.clone();
        let env = run_blocking(move || factory.make(&name).map_err(ProxyError::from)).await?;

        let action_space = env.action_space();
        let observation_space = env.observation_space();
        let reward_range = env.reward_range();
        let session = self.state.try_activate(conn, params.env_name, env)?;
        self.ops.reset();

        info!(
            %conn,
            env_name = %session.env_name,
            session_id = %session.session_id,
            "creating env"
        );
        Ok(SetupResult {
            action_space,
            observation_space,
            reward_range,
            session_id: session.session_id,
        })
    }

    async fn step(&self, params: StepParams) -> Result<StepResult, ProxyError> {
        let session = self.state.validate(&params.session_id)?;
        let slot = Arc::clone(&session.slot);
        let action = params.action;
        let outcome =
            run_blocking(move || slot.with_env(|env| env.step(&action).map_err(Into::into)))
                .await?;

        Ok(StepResult {
            obs: outcome.obs,
            reward: outcome.reward,
            done: outcome.done,
            info: outcome.info,
            session_id: session.session_id,
        })
    }

    async fn reset(&self, params: SessionParams) -> Result<ResetResult, ProxyError> {
        let session = self.state.validate(&params.session_id)?;
        let slot = Arc::clone(&session.slot);
        let obs = run_blocking(move || slot.with_env(|env| env.reset().map_err(Into::into))).await?;

        Ok(ResetResult {
            obs,
            session_id: session.session_id,
        })
    }

    async fn render(&self, params: RenderParams) -> Result<RenderResult, ProxyError> {
        let session = self.state.validate(&params.session_id)?;
        let slot = Arc::clone(&session.slot);
        let RenderParams { mode, close, .. } = params;
        let img = run_blocking(move || {
            slot.with_env(|env| env.render(&mode, close).map_err(Into::into))
        })
        .await?;

        Ok(RenderResult {
            img,
            session_id: session.session_id,
        })
    }

    async fn close(&self, params: SessionParams) -> Result<CloseResult, ProxyError> {
        let slot = self.state.deactivate(&params.session_id)?;
        run_blocking(move || {
            slot.close();
            Ok(())
        })
        .await?;

        info!(session_id = %params.session_id, "closed env");
        Ok(CloseResult {
            session_id: params.session_id,
        })
    }
}

/// Runs an environment call on the blocking pool, turning panics into errors.
async fn run_blocking<T, F>(f: F) -> Result<T, ProxyError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProxyError> + Send + 'static,
{
    task::spawn_blocking(f).await.map_err(|err| {
        ProxyError::new(
            ErrorCode::EnvironmentFailure,
            format!("environment call panicked: {err}"),
        )
    })?
}
