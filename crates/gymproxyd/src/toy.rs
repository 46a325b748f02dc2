//! Built-in environments served when no external registry is wired in.

use gymproxy_core::{EnvError, Environment, Map, StepOutcome, Tensor, Value};

/// Half-width of the `Toy-v0` track.
const TRACK_HALF_WIDTH: i64 = 5;
/// Episode length limit for `Toy-v0`.
const MAX_EPISODE_STEPS: u64 = 200;
/// Rendered image height in pixels.
const RENDER_HEIGHT: usize = 4;

/// Looks up a built-in environment by registry name.
pub fn make_builtin(name: &str) -> Result<Box<dyn Environment>, EnvError> {
    match name {
        "Toy-v0" => Ok(Box::new(ToyEnv::new())),
        other => Err(EnvError::new(format!("unknown environment {other}"))),
    }
}

/// One-dimensional walk: action 0 moves left, 1 moves right, every step
/// survived earns 1.0, leaving the track or hitting the step limit ends the
/// episode. Starts ready to step without an explicit reset.
#[derive(Debug, Default)]
pub struct ToyEnv {
    position: i64,
    steps: u64,
    done: bool,
}

impl ToyEnv {
    pub fn new() -> Self {
        Self::default()
    }

    fn observation(&self) -> Value {
        let obs = [self.position as f32, self.steps as f32];
        Tensor::from_slice(vec![2], &obs).map_or(Value::Null, Value::Tensor)
    }

    fn track_width() -> usize {
        (2 * TRACK_HALF_WIDTH + 1) as usize
    }

    fn column(&self) -> usize {
        (self.position.clamp(-TRACK_HALF_WIDTH, TRACK_HALF_WIDTH) + TRACK_HALF_WIDTH) as usize
    }

    fn ansi(&self) -> String {
        let mut track = vec!['.'; Self::track_width()];
        track[self.column()] = 'x';
        track.into_iter().collect()
    }

    fn rgb_array(&self) -> Result<Tensor, EnvError> {
        let width = Self::track_width();
        let mut pixels = vec![0_u8; RENDER_HEIGHT * width * 3];
        for row in 0..RENDER_HEIGHT {
            let offset = (row * width + self.column()) * 3;
            pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
        }
        Tensor::from_slice(vec![RENDER_HEIGHT, width, 3], &pixels)
            .map_err(|err| EnvError::new(err.to_string()))
    }
}

impl Environment for ToyEnv {
    fn action_space(&self) -> Value {
        Value::Map(Map::from([
            ("type".to_string(), Value::from("Discrete")),
            ("n".to_string(), Value::Int(2)),
        ]))
    }

    fn observation_space(&self) -> Value {
        let bound = TRACK_HALF_WIDTH as f64;
        Value::Map(Map::from([
            ("type".to_string(), Value::from("Box")),
            (
                "low".to_string(),
                Value::List(vec![Value::Float(-bound), Value::Float(0.0)]),
            ),
            (
                "high".to_string(),
                Value::List(vec![
                    Value::Float(bound),
                    Value::Float(MAX_EPISODE_STEPS as f64),
                ]),
            ),
            ("shape".to_string(), Value::List(vec![Value::Int(2)])),
            ("dtype".to_string(), Value::from("float32")),
        ]))
    }

    fn reward_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    fn reset(&mut self) -> Result<Value, EnvError> {
        *self = Self::new();
        Ok(self.observation())
    }

    fn step(&mut self, action: &Value) -> Result<StepOutcome, EnvError> {
        if self.done {
            return Err(EnvError::new("episode is done; call reset"));
        }
        let delta = match action.as_i64() {
            Some(0) => -1,
            Some(1) => 1,
            _ => {
                return Err(EnvError::new(format!(
                    "invalid action {action:?}, expected 0 or 1"
                )));
            }
        };

        self.position += delta;
        self.steps += 1;
        self.done = self.position.abs() > TRACK_HALF_WIDTH || self.steps >= MAX_EPISODE_STEPS;

        Ok(StepOutcome {
            obs: self.observation(),
            reward: 1.0,
            done: self.done,
            info: Map::new(),
        })
    }

    fn render(&mut self, mode: &str, close: bool) -> Result<Option<Value>, EnvError> {
        if close {
            return Ok(None);
        }
        match mode {
            "rgb_array" => Ok(Some(Value::Tensor(self.rgb_array()?))),
            "ansi" => Ok(Some(Value::Str(self.ansi()))),
            "human" => {
                tracing::info!(track = %self.ansi(), "render");
                Ok(None)
            }
            other => Err(EnvError::new(format!("unsupported render mode {other}"))),
        }
    }

    fn close(&mut self) {
        tracing::debug!(steps = self.steps, "toy env closed");
    }
}
