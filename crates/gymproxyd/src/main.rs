use std::{
    fs, io,
    os::unix::fs::FileTypeExt,
    path::Path,
    process::ExitCode,
};

use clap::Parser;
use gymproxy_core::{DEFAULT_URL, Endpoint, expand_env_refs};
use gymproxy_ipc::ProxyListener;
use gymproxyd::{
    ProxyServer,
    counter::{DEFAULT_LOG_EVERY, OpCounter},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gymproxyd", about = "Remote environment proxy server")]
struct Args {
    /// Endpoint to listen on, `tcp://host:port` or `ipc:///path`.
    #[arg(long, env = "GYMPROXY_URL", default_value = DEFAULT_URL)]
    url: String,
    /// Requests between progress log lines; 0 disables them.
    #[arg(long, default_value_t = DEFAULT_LOG_EVERY)]
    log_every: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gymproxyd error: {err}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let endpoint: Endpoint = expand_env_refs(&args.url).parse()?;
    let socket = match &endpoint {
        Endpoint::Ipc(path) => {
            prepare_socket_path(path)?;
            Some(path.clone())
        }
        Endpoint::Tcp(_) => None,
    };

    let listener = ProxyListener::bind(&endpoint).await?;
    info!(
        url = %listener.local_endpoint(),
        log_every = args.log_every,
        version = env!("CARGO_PKG_VERSION"),
        "starting gymproxyd"
    );

    let server = ProxyServer::builtin(OpCounter::new(args.log_every));
    let result = tokio::select! {
        served = server.serve(listener) => served.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => {
            info!("shutting down");
            signal.map_err(Into::into)
        }
    };

    if let Some(path) = socket {
        remove_socket(&path);
    }
    result
}

fn prepare_socket_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_socket() {
                fs::remove_file(path)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn remove_socket(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove socket");
    }
}
