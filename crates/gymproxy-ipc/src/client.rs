use std::time::Duration;

use gymproxy_core::{Endpoint, Map, Method, RpcReply, RpcRequest};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, UnixStream},
    time::timeout,
};

use crate::{
    IpcError,
    codec::{decode_reply, encode_request},
    framing::{read_message, write_message},
};

/// Byte stream a transport can run over.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProxyStream for T {}

/// Position in the strict request/reply alternation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    /// Next legal operation is a send.
    Idle,
    /// A request went out; next legal operation is a receive.
    AwaitingReply,
}

/// Client side of one proxy connection.
///
/// Enforces strict alternation: one request, then exactly one reply. A call
/// that is abandoned half way (future dropped or timed out) leaves the
/// transport waiting for a reply, so every later call fails fast instead of
/// reading a stale answer.
pub struct ProxyTransport {
    /// Connected socket stream.
    stream: Box<dyn ProxyStream>,
    /// URL used for logging.
    url: String,
    /// Alternation state.
    state: CallState,
    /// Optional per-call timeout.
    timeout: Option<Duration>,
}

impl ProxyTransport {
    /// Connects to a `tcp://` or `ipc://` endpoint.
    pub async fn connect(url: &str) -> Result<Self, IpcError> {
        let endpoint: Endpoint = url.parse()?;
        tracing::info!(url, "connecting");

        let stream: Box<dyn ProxyStream> = match &endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
            Endpoint::Ipc(path) => Box::new(UnixStream::connect(path).await?),
        };
        Ok(Self::with_stream(stream, url.to_string()))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: impl ProxyStream + 'static, url: impl Into<String>) -> Self {
        Self::with_stream(Box::new(stream), url.into())
    }

    fn with_stream(stream: Box<dyn ProxyStream>, url: String) -> Self {
        Self {
            stream,
            url,
            state: CallState::Idle,
            timeout: None,
        }
    }

    /// Bounds how long a call waits; an expired call poisons the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True while a request is outstanding.
    pub fn awaiting_reply(&self) -> bool {
        self.state == CallState::AwaitingReply
    }

    /// Sends one request and waits for its reply, returning the result fields
    /// or the server's error message as [`IpcError::Remote`].
    pub async fn call(&mut self, method: Method, params: Map) -> Result<Map, IpcError> {
        let request = RpcRequest::new(method.as_str(), params);
        let reply = match self.timeout {
            Some(limit) => timeout(limit, self.roundtrip(request))
                .await
                .map_err(|_| IpcError::Timeout)??,
            None => self.roundtrip(request).await?,
        };
        reply.into_result().map_err(IpcError::Remote)
    }

    async fn roundtrip(&mut self, request: RpcRequest) -> Result<RpcReply, IpcError> {
        self.send(request).await?;
        self.recv().await
    }

    /// Sends one request; fails if the previous reply was never received.
    pub async fn send(&mut self, request: RpcRequest) -> Result<(), IpcError> {
        if self.state == CallState::AwaitingReply {
            return Err(IpcError::ProtocolViolation(
                "send while a reply is still outstanding",
            ));
        }

        let frames = encode_request(request)?;
        tracing::debug!(url = %self.url, frame = %String::from_utf8_lossy(&frames[0]), "tx");
        self.state = CallState::AwaitingReply;
        write_message(&mut self.stream, &frames).await
    }

    /// Receives the reply to the outstanding request.
    pub async fn recv(&mut self) -> Result<RpcReply, IpcError> {
        if self.state == CallState::Idle {
            return Err(IpcError::ProtocolViolation(
                "receive without an outstanding request",
            ));
        }

        let frames = read_message(&mut self.stream).await?;
        self.state = CallState::Idle;
        tracing::debug!(url = %self.url, frame = %String::from_utf8_lossy(&frames[0]), "rx");
        decode_reply(frames)
    }
}
