use std::process::ExitCode;

use clap::Parser;
use gymproxy::{ClientError, RemoteEnv};
use gymproxy_core::{DType, SetupParams, Value, default_url};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Drives one environment on a proxy server for a fixed number of steps.
#[derive(Debug, Parser)]
#[command(name = "gymproxy", about = "Remote environment proxy client")]
struct Cli {
    /// Server endpoint; `$NAME` references are expanded.
    #[arg(long, default_value_t = default_url())]
    url: String,
    #[arg(long, default_value = "Toy-v0")]
    env_name: String,
    #[arg(long, default_value_t = 10)]
    steps: u32,
    /// Fixed action to send every step; alternates 0 and 1 when omitted.
    #[arg(long)]
    action: Option<i64>,
    /// Render mode to request after every step, e.g. `ansi` or `rgb_array`.
    #[arg(long)]
    render: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();
    let cli = Cli::parse();

    let mut env = RemoteEnv::connect(&cli.url, SetupParams::new(&cli.env_name)).await?;
    let (low, high) = env.reward_range();
    println!("session {}", env.session_id().map_or("-", |id| id.as_str()));
    println!("action_space {}", describe(env.action_space()));
    println!("observation_space {}", describe(env.observation_space()));
    println!("reward_range [{low}, {high}]");

    let mut total = 0.0;
    for step in 0..cli.steps {
        let action = cli.action.unwrap_or(i64::from(step % 2));
        let outcome = env.step(Value::Int(action)).await?;
        total += outcome.reward;
        println!(
            "step {step} action {action} reward {} done {} obs {}",
            outcome.reward,
            outcome.done,
            describe(&outcome.obs)
        );

        if let Some(mode) = &cli.render
            && let Some(img) = env.render(mode, false).await?
        {
            println!("{}", describe(&img));
        }

        if outcome.done {
            println!("episode finished, total reward {total}");
            total = 0.0;
            env.reset().await?;
        }
    }

    env.close().await?;
    Ok(())
}

fn describe(value: &Value) -> String {
    match value {
        Value::Str(text) => text.clone(),
        Value::Tensor(tensor) if tensor.dtype() == DType::F32 => {
            format!("{:?}", tensor.to_vec::<f32>().unwrap_or_default())
        }
        Value::Tensor(tensor) => format!("<{} tensor {:?}>", tensor.dtype().tag(), tensor.shape()),
        other => format!("{other:?}"),
    }
}
