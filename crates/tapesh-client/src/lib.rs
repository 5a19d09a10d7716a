//! tapesh-client: wrapper-side library.
//!
//! Runs a shell under a PTY while mirroring its output to the user's terminal
//! and to the tapesh daemon, survives daemon restarts through a
//! client-assigned session identity with background reconnection and replay,
//! and exposes a one-shot control client for list/query/write operations.

pub mod control;
pub mod prompt;
pub mod pty;
pub mod splitter;
pub mod terminal;
pub mod transport;
pub mod wrapper;

pub use control::ControlClient;
pub use transport::Transport;
pub use wrapper::{run, WrapperConfig};
