//! Bossfeed Mock - local stand-in for the HP ingestion API.
//!
//! ## Configuration
//!
//! - `--port`: port to listen on (default: 8000)
//! - `RUST_LOG`: logging level (default: "info")

use bossfeed::mock_ingest::{self, AppState};
use bossfeed::shutdown::ShutdownSignal;
use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bossfeed-mock", version, about = "Mock BP Timer ingestion API")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(host = %args.host, error = %e, "Invalid listen address");
            return ExitCode::FAILURE;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = ShutdownSignal::new();

    tokio::select! {
        result = mock_ingest::serve(listener, AppState::new()) => {
            if let Err(e) = result {
                error!(error = %e, "Server error");
                return ExitCode::FAILURE;
            }
        }
        _ = shutdown.wait() => {
            info!("Mock ingestion API stopped");
        }
    }

    ExitCode::SUCCESS
}
