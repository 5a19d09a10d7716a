use thiserror::Error;

/// Errors produced by the tapesh protocol and session layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("daemon already running")]
    AlreadyRunning,

    #[error("no session found matching {0:?}")]
    SessionNotFound(String),

    #[error("ambiguous identifier {0:?}: matches multiple sessions")]
    AmbiguousSession(String),

    #[error("session {0} is not collaborative (start with --collab)")]
    NotCollab(String),

    #[error("session {0} is not connected")]
    NotConnected(String),

    #[error("record exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("invalid session ID")]
    InvalidSessionId,

    #[error("{0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
