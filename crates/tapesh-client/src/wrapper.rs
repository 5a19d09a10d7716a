//! The wrapper runtime.
//!
//! Owns the child shell and its PTY, keeps the user's terminal transparent,
//! and publishes the session to the daemon. Three data paths run
//! concurrently: stdin to the PTY (with command detection), PTY to stdout
//! plus the publisher, and (for collab sessions) daemon input back into
//! the PTY. Daemon unavailability is never fatal; the local mirror and the
//! reconnection ticker cover outages.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tapesh_core::{generate_session_id, short_id, Result, SESSION_ENV};

use crate::prompt;
use crate::pty::PtyHandle;
use crate::splitter::{CommandTracker, LineSplitter};
use crate::terminal::{self, RawModeGuard};
use crate::transport::Transport;

/// Everything the wrapper needs to start.
pub struct WrapperConfig {
    /// Shell to launch; empty falls back to `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Optional human label for the session.
    pub title: String,
    pub socket_path: PathBuf,
    /// Accept input injected through `write_session`.
    pub collab: bool,
    /// Mirror and requested daemon buffer capacity; 0 selects the defaults.
    pub buffer_size: usize,
}

/// Run a tracked shell session to completion. Returns the exit code the
/// wrapper process should use: the child's status, or 1 for a nested
/// invocation. Setup failures surface as errors and also mean exit 1.
pub async fn run(config: WrapperConfig) -> Result<i32> {
    // Refuse to nest: the child shell of another wrapper carries our marker.
    if let Some(existing) = std::env::var_os(SESSION_ENV).filter(|v| !v.is_empty()) {
        eprintln!(
            "Already in a tapesh session [{}]",
            existing.to_string_lossy()
        );
        return Ok(1);
    }

    // Self-assigned identity, stable across daemon restarts.
    let session_id = generate_session_id();
    let sid = short_id(&session_id);

    let (pty_input_tx, mut pty_input_rx) = mpsc::channel::<Vec<u8>>(64);
    let transport = Arc::new(Transport::new(
        config.socket_path,
        session_id,
        config.title.clone(),
        config.collab,
        config.buffer_size,
        pty_input_tx,
    ));

    if let Err(e) = transport.connect().await {
        warn!(error = %e, "could not connect to daemon, will retry in background");
    }
    let reconnect_stop = transport.clone().spawn_reconnect();

    // Resolve the shell and decorate its prompt.
    let shell = config
        .shell
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "/bin/sh".to_string());

    let tag = if config.title.is_empty() {
        format!("[tapesh - {sid}]")
    } else {
        format!("[tapesh - {} ({sid})]", config.title)
    };
    let prompt = prompt::setup_prompt(&shell, &tag);

    let marker = if config.title.is_empty() {
        sid.clone()
    } else {
        format!("{sid} - {}", config.title)
    };
    let mut env = prompt.env.clone();
    env.push((SESSION_ENV.to_string(), marker));

    let (cols, rows) = terminal::size();
    let pty = PtyHandle::spawn(&shell, &prompt.args, &env, cols, rows)?;

    // Propagate terminal size to the PTY: once up front, then on SIGWINCH.
    let resize_task = {
        let pty = pty.clone();
        tokio::spawn(async move {
            let mut winch = match signal(SignalKind::window_change()) {
                Ok(winch) => winch,
                Err(e) => {
                    warn!(error = %e, "cannot watch for terminal resizes");
                    return;
                }
            };
            loop {
                let (cols, rows) = terminal::size();
                if let Err(e) = pty.resize(cols, rows) {
                    debug!(error = %e, "resize propagation failed");
                }
                if winch.recv().await.is_none() {
                    return;
                }
            }
        })
    };

    let raw_guard = RawModeGuard::enter()?;

    // stdin -> PTY, verbatim, with command detection on the side. The
    // blocking read pins this closure to a dedicated thread; it ends when
    // stdin or the PTY goes away.
    let (command_tx, mut command_rx) = mpsc::channel::<String>(64);
    {
        let writer = pty.writer();
        tokio::task::spawn_blocking(move || {
            let mut tracker = CommandTracker::new();
            let mut stdin = std::io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                let n = match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                {
                    let mut writer = writer.blocking_lock();
                    if writer.write_all(&buf[..n]).and_then(|_| writer.flush()).is_err() {
                        return;
                    }
                }
                for &b in &buf[..n] {
                    if let Some(cmd) = tracker.push(b) {
                        if command_tx.blocking_send(cmd).is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
    let command_task = {
        let transport = transport.clone();
        tokio::spawn(async move {
            while let Some(cmd) = command_rx.recv().await {
                transport.publish_command(cmd).await;
            }
        })
    };

    // PTY -> stdout + publisher. A blocking pump hands read batches to the
    // async side, which echoes verbatim and splits lines for the mirror.
    let (bytes_tx, mut bytes_rx) = mpsc::channel::<Vec<u8>>(64);
    {
        let reader = pty.reader();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                let n = {
                    let mut reader = reader.blocking_lock();
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    }
                };
                if bytes_tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        });
    }
    let output_task = {
        let transport = transport.clone();
        tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            let mut splitter = LineSplitter::new();
            while let Some(chunk) = bytes_rx.recv().await {
                let _ = stdout.write_all(&chunk).await;
                let _ = stdout.flush().await;

                let batch = splitter.feed(&chunk);
                if !batch.is_empty() {
                    transport.publish_lines(batch).await;
                }
            }
            // PTY EOF: a trailing unterminated line still counts.
            if let Some(rest) = splitter.finish() {
                transport.publish_lines(vec![rest]).await;
            }
        })
    };

    // daemon -> PTY (collab): injected text goes to the master verbatim.
    let input_task = {
        let writer = pty.writer();
        tokio::spawn(async move {
            while let Some(bytes) = pty_input_rx.recv().await {
                let writer = writer.clone();
                let write = tokio::task::spawn_blocking(move || {
                    let mut writer = writer.blocking_lock();
                    writer.write_all(&bytes).and_then(|_| writer.flush())
                })
                .await;
                if !matches!(write, Ok(Ok(()))) {
                    debug!("injected input write failed");
                }
            }
        })
    };

    // The child's exit is the session terminator.
    let exit_code = pty.wait().await.unwrap_or(1);

    // Orderly teardown: stop resize propagation, close the master to
    // unblock the copiers, drain the output path, restore the terminal,
    // clean the prompt rc, then leave the daemon.
    resize_task.abort();
    pty.close_master();
    let _ = output_task.await;
    command_task.abort();
    input_task.abort();

    drop(raw_guard);
    drop(prompt);

    let _ = reconnect_stop.send(()).await;
    transport.disconnect().await;

    Ok(exit_code)
}
