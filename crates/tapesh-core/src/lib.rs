//! tapesh-core: Shared protocol library for tapesh.
//!
//! Provides the newline-delimited JSON wire format, the line codec with its
//! 1 MiB record cap, ANSI stripping, the sequence-numbered ring buffer used by
//! both the daemon and the wrapper's local mirror, session-id helpers, and
//! socket path resolution.

pub mod ansi;
pub mod codec;
pub mod error;
pub mod ident;
pub mod messages;
pub mod ring_buffer;
pub mod socket;

// Re-export commonly used items at crate root.
pub use ansi::strip_ansi;
pub use codec::{encode_line, read_frame, write_envelope, MAX_LINE_BYTES};
pub use error::{Error, Result};
pub use ident::{generate_session_id, parse_session_id, short_id};
pub use messages::{Envelope, MsgType};
pub use ring_buffer::{RingBuffer, SearchResult, DEFAULT_CAPACITY};
pub use socket::{default_socket_path, socket_path_from_env, SESSION_ENV, SOCKET_ENV};
