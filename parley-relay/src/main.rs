use std::{net::SocketAddr, process::ExitCode};

use clap::Parser;
use parley_relay::{AppState, serve};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "parley_relay=info";

#[derive(Parser, Debug)]
#[command(name = "parley-relay", about = "Local chat server for parley clients")]
struct RelayArgs {
    /// Address the chat socket listens on (`/ws`, plus `/healthz`).
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = RelayArgs::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let listener = match tokio::net::TcpListener::bind(args.bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(bind_address = %args.bind_address, "cannot bind chat socket: {err}");
            return ExitCode::FAILURE;
        }
    };

    let local = listener.local_addr().unwrap_or(args.bind_address);
    info!(bind_address = %local, "chat relay listening");
    match serve(listener, AppState::new()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("chat relay stopped: {err}");
            ExitCode::FAILURE
        }
    }
}
