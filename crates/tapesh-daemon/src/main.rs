//! tapeshd — tapesh session daemon.
//!
//! Listens on a per-user Unix socket, holds the in-memory session store, and
//! answers wrapper (publisher) and control (list/query/write) connections.

mod dispatcher;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use dispatcher::Daemon;
use store::Store;

/// tapeshd — terminal session daemon
#[derive(Parser, Debug)]
#[command(name = "tapeshd", version, about = "tapesh session daemon")]
struct Cli {
    /// Unix socket path (defaults to $TAPESH_SOCKET, then the runtime dir)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Lines per session ring buffer
    #[arg(long, default_value_t = 10_000)]
    buffer_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let socket_path = cli
        .socket
        .unwrap_or_else(tapesh_core::socket_path_from_env);

    let daemon = Daemon::new(Arc::new(Store::new()), cli.buffer_size);

    let listener = match daemon.bind(&socket_path).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, path = %socket_path.display(), "failed to start daemon");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        buffer_size = cli.buffer_size,
        "tapeshd ready"
    );

    tokio::select! {
        result = daemon.serve(listener) => {
            if let Err(e) = result {
                error!(error = %e, "daemon error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    info!("tapeshd stopped");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
