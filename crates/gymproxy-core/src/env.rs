use crate::{EnvError, Map, Value};

/// Outcome of advancing an environment by one action.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub obs: Value,
    pub reward: f64,
    pub done: bool,
    pub info: Map,
}

/// Capability surface of a simulator driven through the proxy.
///
/// Implementations run on a blocking worker thread, so methods may be slow.
pub trait Environment: Send {
    /// Descriptor of valid actions, passed to clients verbatim.
    fn action_space(&self) -> Value;

    /// Descriptor of observations, passed to clients verbatim.
    fn observation_space(&self) -> Value;

    fn reward_range(&self) -> (f64, f64) {
        (f64::NEG_INFINITY, f64::INFINITY)
    }

    fn reset(&mut self) -> Result<Value, EnvError>;

    fn step(&mut self, action: &Value) -> Result<StepOutcome, EnvError>;

    /// Renders the current state; `None` when the mode produces no image.
    fn render(&mut self, mode: &str, close: bool) -> Result<Option<Value>, EnvError>;

    /// Releases any resources held by the environment.
    fn close(&mut self);
}

/// Builds environments by registry name.
pub trait EnvironmentFactory: Send + Sync + 'static {
    fn make(&self, name: &str) -> Result<Box<dyn Environment>, EnvError>;
}

impl<F> EnvironmentFactory for F
where
    F: Fn(&str) -> Result<Box<dyn Environment>, EnvError> + Send + Sync + 'static,
{
    fn make(&self, name: &str) -> Result<Box<dyn Environment>, EnvError> {
        self(name)
    }
}
