pub mod endpoint;
pub mod env;
pub mod errors;
pub mod ids;
pub mod protocol;
pub mod value;

pub use endpoint::{Endpoint, EndpointError, default_url, expand_env_refs};
pub use env::{Environment, EnvironmentFactory, StepOutcome};
pub use errors::{EnvError, ErrorCode, ProxyError};
pub use ids::{ConnId, SessionId};
pub use protocol::{
    CloseResult, DEFAULT_URL, Fields, Method, RenderParams, RenderResult, Request, ResetResult,
    RpcReply, RpcRequest, SessionParams, SetupParams, SetupResult, StepParams, StepResult,
};
pub use value::{DType, Element, Map, Tensor, TensorError, Value};
