//! PTY wrapper using portable-pty.
//!
//! Spawns the shell on the slave side and hands out cloneable handles to the
//! master: blocking reader/writer for the copier threads, a resize handle for
//! the SIGWINCH task, and an async `wait` for the child's exit status.
//! Closing the master is the canonical way to unblock the copiers.

use std::io::{Read, Write};
use std::sync::Arc;

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use tapesh_core::{Error, Result};

/// A spawned shell and its PTY master. All handles are `Arc`-backed clones,
/// so the struct can be shared across the wrapper's tasks.
#[derive(Clone)]
pub struct PtyHandle {
    reader: Arc<Mutex<Box<dyn Read + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    /// Kept for resize and for the explicit close that unblocks the copiers.
    /// `None` after [`PtyHandle::close_master`].
    master: Arc<std::sync::Mutex<Option<Box<dyn MasterPty + Send>>>>,
    child: Arc<Mutex<Box<dyn portable_pty::Child + Send>>>,
}

impl PtyHandle {
    /// Spawn `shell` (with `args` appended) under a fresh PTY of the given
    /// size, applying the environment overrides on top of the inherited
    /// environment.
    pub fn spawn(
        shell: &str,
        args: &[String],
        env: &[(String, String)],
        cols: u16,
        rows: u16,
    ) -> Result<Self> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system
            .openpty(size)
            .map_err(|e| Error::Other(format!("failed to open PTY: {e}")))?;

        let mut cmd = CommandBuilder::new(shell);
        for arg in args {
            cmd.arg(arg);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Other(format!("failed to start {shell}: {e}")))?;

        info!(shell = %shell, cols, rows, "shell spawned under PTY");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Other(format!("failed to clone PTY reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Other(format!("failed to take PTY writer: {e}")))?;

        Ok(Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            master: Arc::new(std::sync::Mutex::new(Some(pair.master))),
            child: Arc::new(Mutex::new(child)),
        })
    }

    /// Blocking reader handle for the PTY-to-stdout pump. Lock with
    /// `blocking_lock` from a `spawn_blocking` context.
    pub fn reader(&self) -> Arc<Mutex<Box<dyn Read + Send>>> {
        self.reader.clone()
    }

    /// Blocking writer handle for stdin and injected-input writes.
    pub fn writer(&self) -> Arc<Mutex<Box<dyn Write + Send>>> {
        self.writer.clone()
    }

    /// Propagate a new terminal size to the PTY.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self
            .master
            .lock()
            .map_err(|_| Error::Other("PTY master lock poisoned".into()))?;
        let Some(master) = master.as_ref() else {
            return Err(Error::Other("PTY master already closed".into()));
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Other(format!("PTY resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    /// Wait for the child to exit. Returns its exit code.
    pub async fn wait(&self) -> Result<i32> {
        let child = self.child.clone();
        let status = tokio::task::spawn_blocking(move || {
            let mut child = child.blocking_lock();
            child.wait()
        })
        .await
        .map_err(|e| Error::Other(format!("join error: {e}")))?
        .map_err(|e| Error::Other(format!("wait error: {e}")))?;

        let code = status.exit_code() as i32;
        info!(code, "shell exited");
        Ok(code)
    }

    /// Drop the master endpoint so blocked reads observe EOF.
    pub fn close_master(&self) {
        if let Ok(mut master) = self.master.lock() {
            master.take();
        }
    }
}
