use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedMessage,
    SessionIdentity,
    UnknownMethod,
    InvalidParams,
    EnvironmentFailure,
    TransportProtocolViolation,
    Internal,
}

/// Error raised while serving or issuing a proxy RPC.
///
/// `Display` renders only `message`, which is the exact string carried in the
/// `error` field of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ProxyError {
    pub code: ErrorCode,
    pub message: String,
}

impl ProxyError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedMessage, message)
    }

    pub fn wrong_session() -> Self {
        Self::new(ErrorCode::SessionIdentity, "Wrong session id")
    }

    pub fn already_set_up() -> Self {
        Self::new(ErrorCode::SessionIdentity, "Already set up")
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(ErrorCode::UnknownMethod, format!("unknown method {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Failure reported by an environment implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EnvError {
    pub message: String,
}

impl EnvError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<EnvError> for ProxyError {
    fn from(err: EnvError) -> Self {
        ProxyError::new(ErrorCode::EnvironmentFailure, err.message)
    }
}
