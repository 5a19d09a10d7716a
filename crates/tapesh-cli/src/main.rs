//! tapesh — record a terminal session.
//!
//! Without a subcommand, wraps a shell in a PTY and streams its output to
//! the tapesh daemon. The `sessions`, `query`, and `write` subcommands talk
//! to the daemon's control surface instead.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

use tapesh_client::wrapper::{self, WrapperConfig};
use tapesh_client::ControlClient;
use tapesh_core::messages::{QuerySessionPayload, WriteSessionPayload};

/// tapesh — terminal session recorder
#[derive(Parser)]
#[command(
    name = "tapesh",
    version,
    about = "Record a shell session and expose it to assistants via the tapesh daemon"
)]
struct Cli {
    /// Unix socket path (defaults to $TAPESH_SOCKET, then the runtime dir)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session title (shown in listings and the prompt tag)
    #[arg(long, default_value = "")]
    title: String,

    /// Shell to launch (defaults to $SHELL, then /bin/sh)
    #[arg(long)]
    shell: Option<String>,

    /// Allow external input via write_session
    #[arg(long)]
    collab: bool,

    /// Lines kept in the local mirror and requested from the daemon
    /// (0 uses the defaults)
    #[arg(long, default_value_t = 0)]
    buffer_size: usize,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List tracked sessions
    Sessions,

    /// Read output from a session (tail, paginate, or search)
    Query {
        /// Session identifier: short id, full id, or title
        session: String,

        /// Substring search over retained lines
        #[arg(long)]
        search: Option<String>,

        /// Return the last N lines
        #[arg(long)]
        last_n: Option<usize>,

        /// Start reading from this sequence number
        #[arg(long)]
        cursor: Option<u64>,

        /// Lines per page in cursor mode (default 100)
        #[arg(long)]
        count: Option<usize>,

        /// Result cap in search mode (default 50)
        #[arg(long)]
        max_results: Option<usize>,
    },

    /// Send input to a collab session
    Write {
        /// Session identifier: short id, full id, or title
        session: String,

        /// Text to type into the session
        text: String,

        /// Send the text exactly as given, without a trailing newline
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(tapesh_core::socket_path_from_env);

    match cli.command {
        None => {
            let config = WrapperConfig {
                shell: cli.shell,
                title: cli.title,
                socket_path,
                collab: cli.collab,
                buffer_size: cli.buffer_size,
            };
            match wrapper::run(config).await {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    error!("{e}");
                    eprintln!("tapesh: {e}");
                    std::process::exit(1);
                }
            }
        }
        Some(command) => {
            if let Err(e) = run_control(command, &socket_path).await {
                eprintln!("tapesh: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_control(command: Command, socket_path: &std::path::Path) -> Result<()> {
    let mut client = ControlClient::connect(socket_path)
        .await
        .with_context(|| {
            format!(
                "cannot reach the daemon at {} (is tapeshd running?)",
                socket_path.display()
            )
        })?;

    match command {
        Command::Sessions => {
            let sessions = client.list_sessions().await?;
            if sessions.is_empty() {
                println!("No sessions.");
                return Ok(());
            }
            println!(
                "{:<10} {:<20} {:<9} {:<6} {:>7}  {}",
                "ID", "TITLE", "CONNECTED", "COLLAB", "LINES", "LAST COMMAND"
            );
            for s in sessions {
                let title = if s.title.is_empty() { "-" } else { &s.title };
                println!(
                    "{:<10} {:<20} {:<9} {:<6} {:>7}  {}",
                    s.id, title, s.connected, s.collab, s.line_count, s.last_command
                );
            }
        }

        Command::Query {
            session,
            search,
            last_n,
            cursor,
            count,
            max_results,
        } => {
            let payload = QuerySessionPayload {
                session,
                search: search.unwrap_or_default(),
                last_n: last_n.unwrap_or_default(),
                cursor: cursor.unwrap_or_default(),
                count: count.unwrap_or_default(),
                max_results: max_results.unwrap_or_default(),
            };
            let resp = client.query_session(&payload).await?;
            for line in &resp.lines {
                println!("{line}");
            }
            if resp.has_more {
                eprintln!(
                    "({} lines total; continue with --cursor {})",
                    resp.total_lines, resp.next_cursor
                );
            }
        }

        Command::Write { session, text, raw } => {
            let text = if raw { text } else { format!("{text}\n") };
            let resp = client
                .write_session(&WriteSessionPayload { session, text })
                .await?;
            println!("sent {} bytes to {}", resp.bytes_sent, resp.session_id);
        }
    }

    Ok(())
}
