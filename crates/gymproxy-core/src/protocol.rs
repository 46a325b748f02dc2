use std::{fmt, str::FromStr};

use crate::{Map, ProxyError, SessionId, Value};

/// Endpoint used when neither flags nor environment name one.
pub const DEFAULT_URL: &str = "tcp://127.0.0.1:6911";

/// The fixed set of proxy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Setup,
    Step,
    Reset,
    Render,
    Close,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Setup => "setup",
            Method::Step => "step",
            Method::Reset => "reset",
            Method::Render => "render",
            Method::Close => "close",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProxyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "setup" => Ok(Method::Setup),
            "step" => Ok(Method::Step),
            "reset" => Ok(Method::Reset),
            "render" => Ok(Method::Render),
            "close" => Ok(Method::Close),
            other => Err(ProxyError::unknown_method(other)),
        }
    }
}

/// Request envelope as carried on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RpcRequest {
    /// Method name, one of the [`Method`] strings for well-formed requests.
    pub method: String,
    /// Named parameters.
    pub params: Map,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Map) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Reply envelope; exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    /// Named result fields on success.
    pub result: Option<Map>,
    /// Human-readable failure on error.
    pub error: Option<String>,
}

impl RpcReply {
    pub fn ok(result: Map) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(message.into()),
        }
    }

    /// Splits the reply into the result map or the server's error string.
    pub fn into_result(self) -> Result<Map, String> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err("reply carried neither result nor error".to_string()),
        }
    }
}

impl From<Result<Map, ProxyError>> for RpcReply {
    fn from(result: Result<Map, ProxyError>) -> Self {
        match result {
            Ok(map) => RpcReply::ok(map),
            Err(err) => RpcReply::err(err.message),
        }
    }
}

/// Conversion between a typed payload and its named fields.
pub trait Fields: Sized {
    fn into_map(self) -> Map;

    fn from_map(map: Map) -> Result<Self, ProxyError>;
}

/// Parameters of `setup`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetupParams {
    /// Registry name of the environment to construct.
    pub env_name: String,
    /// Any additional configuration keys, passed through untouched.
    pub extra: Map,
}

impl SetupParams {
    pub fn new(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            extra: Map::new(),
        }
    }
}

/// Parameters of `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepParams {
    pub session_id: SessionId,
    pub action: Value,
}

/// Parameters of `render`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub session_id: SessionId,
    pub mode: String,
    pub close: bool,
}

/// Parameters of `reset` and `close`, which only carry the session token.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub session_id: SessionId,
}

/// Typed request, one variant per operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Setup(SetupParams),
    Step(StepParams),
    Reset(SessionParams),
    Render(RenderParams),
    Close(SessionParams),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Setup(_) => Method::Setup,
            Request::Step(_) => Method::Step,
            Request::Reset(_) => Method::Reset,
            Request::Render(_) => Method::Render,
            Request::Close(_) => Method::Close,
        }
    }

    /// Session token carried by every operation except `setup`.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Request::Setup(_) => None,
            Request::Step(params) => Some(&params.session_id),
            Request::Reset(params) | Request::Close(params) => Some(&params.session_id),
            Request::Render(params) => Some(&params.session_id),
        }
    }

    pub fn into_rpc(self) -> RpcRequest {
        let method = self.method();
        let params = match self {
            Request::Setup(params) => params.into_map(),
            Request::Step(params) => params.into_map(),
            Request::Reset(params) | Request::Close(params) => params.into_map(),
            Request::Render(params) => params.into_map(),
        };
        RpcRequest::new(method.as_str(), params)
    }
}

impl TryFrom<RpcRequest> for Request {
    type Error = ProxyError;

    fn try_from(rpc: RpcRequest) -> Result<Self, Self::Error> {
        let method: Method = rpc.method.parse()?;
        let params = rpc.params;
        Ok(match method {
            Method::Setup => Request::Setup(SetupParams::from_map(params)?),
            Method::Step => Request::Step(StepParams::from_map(params)?),
            Method::Reset => Request::Reset(SessionParams::from_map(params)?),
            Method::Render => Request::Render(RenderParams::from_map(params)?),
            Method::Close => Request::Close(SessionParams::from_map(params)?),
        })
    }
}

/// Result of `setup`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupResult {
    pub action_space: Value,
    pub observation_space: Value,
    pub reward_range: (f64, f64),
    pub session_id: SessionId,
}

/// Result of `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub obs: Value,
    pub reward: f64,
    pub done: bool,
    pub info: Map,
    pub session_id: SessionId,
}

/// Result of `reset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResetResult {
    pub obs: Value,
    pub session_id: SessionId,
}

/// Result of `render`; `img` is `None` for modes that draw out of band.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    pub img: Option<Value>,
    pub session_id: SessionId,
}

/// Result of `close`.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseResult {
    pub session_id: SessionId,
}

impl Fields for SetupParams {
    fn into_map(self) -> Map {
        let mut map = self.extra;
        map.insert("env_name".to_string(), Value::Str(self.env_name));
        map
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        let env_name = take_string(&mut map, "env_name")?;
        Ok(Self {
            env_name,
            extra: map,
        })
    }
}

impl Fields for StepParams {
    fn into_map(self) -> Map {
        Map::from([
            ("action".to_string(), self.action),
            session_entry(self.session_id),
        ])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        Ok(Self {
            session_id: take_session_id(&mut map)?,
            action: take(&mut map, "action")?,
        })
    }
}

impl Fields for RenderParams {
    fn into_map(self) -> Map {
        Map::from([
            ("mode".to_string(), Value::Str(self.mode)),
            ("close".to_string(), Value::Bool(self.close)),
            session_entry(self.session_id),
        ])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        let session_id = take_session_id(&mut map)?;
        let mode = match map.remove("mode") {
            None | Some(Value::Null) => "human".to_string(),
            Some(Value::Str(mode)) => mode,
            Some(other) => return Err(wrong_type("mode", "string", &other)),
        };
        let close = match map.remove("close") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(close)) => close,
            Some(other) => return Err(wrong_type("close", "bool", &other)),
        };
        Ok(Self {
            session_id,
            mode,
            close,
        })
    }
}

impl Fields for SessionParams {
    fn into_map(self) -> Map {
        Map::from([session_entry(self.session_id)])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        Ok(Self {
            session_id: take_session_id(&mut map)?,
        })
    }
}

impl Fields for SetupResult {
    fn into_map(self) -> Map {
        let (low, high) = self.reward_range;
        Map::from([
            ("action_space".to_string(), self.action_space),
            ("observation_space".to_string(), self.observation_space),
            (
                "reward_range".to_string(),
                Value::List(vec![Value::Float(low), Value::Float(high)]),
            ),
            session_entry(self.session_id),
        ])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        let reward_range = match take(&mut map, "reward_range")? {
            Value::List(bounds) if bounds.len() == 2 => {
                (bound(&bounds[0], f64::NEG_INFINITY)?, bound(&bounds[1], f64::INFINITY)?)
            }
            other => return Err(wrong_type("reward_range", "2-element list", &other)),
        };
        Ok(Self {
            action_space: map.remove("action_space").unwrap_or_default(),
            observation_space: map.remove("observation_space").unwrap_or_default(),
            reward_range,
            session_id: take_session_id(&mut map)?,
        })
    }
}

impl Fields for StepResult {
    fn into_map(self) -> Map {
        Map::from([
            ("obs".to_string(), self.obs),
            ("reward".to_string(), Value::Float(self.reward)),
            ("done".to_string(), Value::Bool(self.done)),
            ("info".to_string(), Value::Map(self.info)),
            session_entry(self.session_id),
        ])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        let reward = match take(&mut map, "reward")? {
            value @ (Value::Int(_) | Value::Float(_)) => value.as_f64().unwrap_or_default(),
            other => return Err(wrong_type("reward", "number", &other)),
        };
        let done = match take(&mut map, "done")? {
            Value::Bool(done) => done,
            other => return Err(wrong_type("done", "bool", &other)),
        };
        let info = match map.remove("info") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Map(info)) => info,
            Some(other) => return Err(wrong_type("info", "map", &other)),
        };
        Ok(Self {
            obs: take(&mut map, "obs")?,
            reward,
            done,
            info,
            session_id: take_session_id(&mut map)?,
        })
    }
}

impl Fields for ResetResult {
    fn into_map(self) -> Map {
        Map::from([("obs".to_string(), self.obs), session_entry(self.session_id)])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        Ok(Self {
            obs: take(&mut map, "obs")?,
            session_id: take_session_id(&mut map)?,
        })
    }
}

impl Fields for RenderResult {
    fn into_map(self) -> Map {
        Map::from([
            ("img".to_string(), self.img.unwrap_or_default()),
            session_entry(self.session_id),
        ])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        let img = map.remove("img").filter(|img| !img.is_null());
        Ok(Self {
            img,
            session_id: take_session_id(&mut map)?,
        })
    }
}

impl Fields for CloseResult {
    fn into_map(self) -> Map {
        Map::from([session_entry(self.session_id)])
    }

    fn from_map(mut map: Map) -> Result<Self, ProxyError> {
        Ok(Self {
            session_id: take_session_id(&mut map)?,
        })
    }
}

fn session_entry(session_id: SessionId) -> (String, Value) {
    ("session_id".to_string(), Value::Str(session_id.0))
}

fn take(map: &mut Map, key: &str) -> Result<Value, ProxyError> {
    map.remove(key)
        .ok_or_else(|| ProxyError::invalid_params(format!("missing field {key}")))
}

fn take_string(map: &mut Map, key: &str) -> Result<String, ProxyError> {
    match take(map, key)? {
        Value::Str(value) => Ok(value),
        other => Err(wrong_type(key, "string", &other)),
    }
}

fn take_session_id(map: &mut Map) -> Result<SessionId, ProxyError> {
    take_string(map, "session_id").map(SessionId)
}

// Non-finite floats travel as null, so a null bound means unbounded.
fn bound(value: &Value, unbounded: f64) -> Result<f64, ProxyError> {
    match value {
        Value::Null => Ok(unbounded),
        other => other
            .as_f64()
            .ok_or_else(|| wrong_type("reward_range", "number", other)),
    }
}

fn wrong_type(key: &str, expected: &str, actual: &Value) -> ProxyError {
    ProxyError::invalid_params(format!(
        "field {key} must be {expected}, got {}",
        actual.kind()
    ))
}

#[cfg(test)]
mod tests {
    use super::{Fields, Method, RenderParams, Request, RpcReply, RpcRequest, SetupResult};
    use crate::{ErrorCode, Map, SessionId, Value};

    #[test]
    fn unknown_method_is_rejected() {
        let err = Request::try_from(RpcRequest::new("teleport", Map::new()))
            .expect_err("teleport is not an operation");
        assert_eq!(err.code, ErrorCode::UnknownMethod);
        assert_eq!(err.message, "unknown method teleport");
    }

    #[test]
    fn missing_session_id_is_invalid_params() {
        let err = Request::try_from(RpcRequest::new("reset", Map::new()))
            .expect_err("reset needs a session id");
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }

    #[test]
    fn render_defaults_mode_and_close() {
        let params = RenderParams::from_map(Map::from([(
            "session_id".to_string(),
            Value::from("abc"),
        )]))
        .expect("defaults apply");
        assert_eq!(params.mode, "human");
        assert!(!params.close);
    }

    #[test]
    fn null_reward_bounds_are_unbounded() {
        let map = Map::from([
            (
                "reward_range".to_string(),
                Value::List(vec![Value::Null, Value::Int(1)]),
            ),
            ("session_id".to_string(), Value::from("abc")),
        ]);
        let result = SetupResult::from_map(map).expect("setup result parses");
        assert_eq!(result.reward_range, (f64::NEG_INFINITY, 1.0));
        assert_eq!(result.session_id, SessionId::from("abc"));
        assert!(result.action_space.is_null());
    }

    #[test]
    fn reply_prefers_error() {
        let reply = RpcReply {
            result: Some(Map::new()),
            error: Some("boom".to_string()),
        };
        assert_eq!(reply.into_result(), Err("boom".to_string()));
        assert_eq!(Method::Render.to_string(), "render");
    }
}
