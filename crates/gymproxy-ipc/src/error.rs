use gymproxy_core::{EndpointError, ErrorCode, ProxyError};
use thiserror::Error;

/// Transport and serialization failures for proxy IPC operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Underlying socket I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Envelope could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// Frames did not decode into a valid envelope.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// Frame size exceeded maximum allowed payload.
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: u64, max: u32 },
    /// Message carried more frames than allowed.
    #[error("too many frames: {count} > {max}")]
    TooManyFrames { count: u32, max: u32 },
    /// Send/receive issued out of request/reply alternation.
    #[error("transport protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// Operation exceeded configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Server answered with an error reply; the message is kept verbatim.
    #[error("{0}")]
    Remote(String),
    /// Endpoint URL could not be parsed.
    #[error(transparent)]
    InvalidEndpoint(#[from] EndpointError),
    /// Peer or request loop went away mid-exchange.
    #[error("connection closed")]
    Closed,
}

impl From<IpcError> for ProxyError {
    fn from(err: IpcError) -> Self {
        let code = match &err {
            IpcError::Malformed(_) => ErrorCode::MalformedMessage,
            IpcError::ProtocolViolation(_) => ErrorCode::TransportProtocolViolation,
            _ => ErrorCode::Internal,
        };
        ProxyError::new(code, err.to_string())
    }
}
