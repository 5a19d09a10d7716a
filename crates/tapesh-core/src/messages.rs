//! Wire protocol message types.
//!
//! Every record on the socket is an [`Envelope`]: a `type` tag, an optional
//! `session_id`, and an optional JSON payload. Records are newline-delimited
//! JSON; see [`crate::codec`] for framing.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Result;

/// Identifies the kind of message sent over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    /// Wrapper publishes (or resumes) a session.
    Register,
    /// Shell output lines, wrapper to daemon.
    Output,
    /// Local-mirror replay after reconnect, wrapper to daemon.
    Replay,
    /// Most recently detected command line, wrapper to daemon.
    Command,
    /// Orderly wrapper shutdown.
    Disconnect,
    /// Text to inject into the PTY, daemon to wrapper (collab sessions).
    Input,
    /// Successful reply carrying a typed payload.
    Ack,
    /// Error reply.
    Error,
    /// Control: enumerate sessions.
    ListSessions,
    /// Control: tail/paginate/search a session's buffer.
    QuerySession,
    /// Control: inject input into a collab session.
    WriteSession,
}

/// The wire format for all IPC messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MsgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Envelope {
    /// An envelope with no payload.
    pub fn new(msg_type: MsgType) -> Self {
        Self {
            msg_type,
            session_id: None,
            payload: None,
        }
    }

    /// An envelope carrying a serialized payload.
    pub fn with_payload<T: Serialize>(msg_type: MsgType, payload: &T) -> Result<Self> {
        Ok(Self {
            msg_type,
            session_id: None,
            payload: Some(serde_json::to_value(payload)?),
        })
    }

    /// Attach a session id.
    pub fn for_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Decode the payload, treating an absent payload as all-defaults the way
    /// the daemon tolerates sparse records.
    pub fn payload_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        match &self.payload {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(T::default()),
        }
    }
}

/// Sent by the wrapper to create or resume a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub buffer_size: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub collab: bool,
    /// Wrapper-chosen id; absent means the daemon generates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Sent by the daemon after a successful registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterAck {
    pub session_id: String,
    pub short_id: String,
}

/// Shell output lines from wrapper to daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputPayload {
    pub lines: Vec<String>,
}

/// One chunk of the wrapper's local mirror, pushed after reconnect.
/// Only the final chunk carries `last_command`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayPayload {
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command: Option<String>,
}

/// The last detected command line from wrapper to daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
}

/// Text from daemon to wrapper to be written to the PTY.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputPayload {
    pub text: String,
}

/// An error message from the daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// One session in `list_sessions` output. `id` is the short id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub last_command: String,
    pub line_count: usize,
    /// RFC 3339.
    pub created_at: String,
    pub connected: bool,
    pub collab: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

/// Query request. Selection rules: non-empty `search` wins, then
/// `last_n > 0`, else cursor pagination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySessionPayload {
    /// Session identifier: short id, full id, or title.
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search: String,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub last_n: usize,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub cursor: u64,
    /// Lines per page in cursor mode (default 100).
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub count: usize,
    /// Result cap in search mode (default 50).
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuerySessionResponse {
    pub session_id: String,
    pub title: String,
    pub total_lines: usize,
    pub lines: Vec<String>,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub next_cursor: u64,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteSessionPayload {
    pub session: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteSessionResponse {
    pub success: bool,
    pub session_id: String,
    pub bytes_sent: usize,
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}
