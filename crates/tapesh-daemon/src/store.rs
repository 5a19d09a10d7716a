//! Session store.
//!
//! Tracks every session the daemon has seen: the live ones holding a wrapper
//! connection and the disconnected ones retained for later queries. Sessions
//! are only removed by an explicit [`Store::remove`]; disconnecting keeps the
//! history queryable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use tapesh_core::messages::{Envelope, InputPayload, MsgType, SessionInfo};
use tapesh_core::ring_buffer::RingBuffer;
use tapesh_core::{generate_session_id, parse_session_id, short_id, strip_ansi, Error, Result};

/// Mutable per-session scalars, coarse-locked together.
#[derive(Debug)]
struct SessionState {
    title: String,
    last_command: String,
    last_activity: DateTime<Utc>,
    connected: bool,
    collab: bool,
}

/// One tracked shell session.
///
/// The wrapper connection is held as an ownership-neutral sender into that
/// connection's writer task; it is cleared on disconnect and the lock around
/// it serializes concurrent input deliveries.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub short_id: String,
    pub created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    buffer: RwLock<RingBuffer>,
    client_tx: Mutex<Option<mpsc::Sender<Envelope>>>,
}

impl Session {
    fn new(
        id: String,
        title: &str,
        capacity: usize,
        collab: bool,
        conn: Option<mpsc::Sender<Envelope>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            short_id: short_id(&id),
            id,
            created_at: now,
            state: RwLock::new(SessionState {
                title: title.to_string(),
                last_command: String::new(),
                last_activity: now,
                connected: true,
                collab,
            }),
            buffer: RwLock::new(RingBuffer::new(capacity)),
            client_tx: Mutex::new(conn),
        }
    }

    pub async fn title(&self) -> String {
        self.state.read().await.title.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    pub async fn is_collab(&self) -> bool {
        self.state.read().await.collab
    }

    /// Refresh the activity timestamp.
    pub async fn touch(&self) {
        self.state.write().await.last_activity = Utc::now();
    }

    /// Append output lines, stripping ANSI on ingest.
    pub async fn append_output(&self, lines: &[String]) {
        {
            let mut buffer = self.buffer.write().await;
            for line in lines {
                buffer.append(strip_ansi(line));
            }
        }
        self.touch().await;
    }

    /// Apply one replay chunk from a reconnecting wrapper.
    pub async fn apply_replay(&self, lines: &[String], last_command: Option<&str>) {
        {
            let mut buffer = self.buffer.write().await;
            for line in lines {
                buffer.append(strip_ansi(line));
            }
        }
        let mut state = self.state.write().await;
        if let Some(cmd) = last_command.filter(|c| !c.is_empty()) {
            state.last_command = cmd.to_string();
        }
        state.last_activity = Utc::now();
    }

    pub async fn set_last_command(&self, command: &str) {
        let mut state = self.state.write().await;
        state.last_command = command.to_string();
        state.last_activity = Utc::now();
    }

    /// Drop all buffered history. Done when a wrapper resumes the session
    /// and is about to replay its authoritative local mirror.
    pub async fn clear_buffer(&self) {
        self.buffer.write().await.clear();
    }

    /// Run a read-only closure against the buffer.
    pub async fn with_buffer<R>(&self, f: impl FnOnce(&RingBuffer) -> R) -> R {
        f(&*self.buffer.read().await)
    }

    pub async fn line_count(&self) -> usize {
        self.buffer.read().await.len()
    }

    /// Deliver text to the wrapper for injection into the PTY.
    ///
    /// Fails unless the session is collaborative and currently holds a live
    /// wrapper connection. Returns the number of bytes handed off.
    pub async fn send_input(&self, text: &str) -> Result<usize> {
        if !self.is_collab().await {
            return Err(Error::NotCollab(self.short_id.clone()));
        }

        let conn = self.client_tx.lock().await;
        if !self.is_connected().await {
            return Err(Error::NotConnected(self.short_id.clone()));
        }
        let Some(tx) = conn.as_ref() else {
            return Err(Error::NotConnected(self.short_id.clone()));
        };

        let envelope = Envelope::with_payload(
            MsgType::Input,
            &InputPayload {
                text: text.to_string(),
            },
        )?;
        tx.send(envelope)
            .await
            .map_err(|_| Error::NotConnected(self.short_id.clone()))?;
        Ok(text.len())
    }

    /// Mark the wrapper gone and release the connection handle. The session
    /// itself is retained.
    pub async fn mark_disconnected(&self) {
        {
            let mut state = self.state.write().await;
            state.connected = false;
            state.last_activity = Utc::now();
        }
        *self.client_tx.lock().await = None;
    }

    /// Re-bind a resumed session to a fresh wrapper connection.
    async fn update_registration(
        &self,
        title: &str,
        capacity: usize,
        collab: bool,
        conn: Option<mpsc::Sender<Envelope>>,
    ) {
        {
            let mut state = self.state.write().await;
            state.title = title.to_string();
            state.collab = collab;
            state.connected = true;
            state.last_activity = Utc::now();
        }
        {
            let mut buffer = self.buffer.write().await;
            if buffer.capacity() != capacity {
                *buffer = RingBuffer::new(capacity);
            }
        }
        *self.client_tx.lock().await = conn;
    }

    /// Listing snapshot; `id` is the short id.
    pub async fn info(&self) -> SessionInfo {
        let state = self.state.read().await;
        SessionInfo {
            id: self.short_id.clone(),
            title: state.title.clone(),
            last_command: state.last_command.clone(),
            line_count: self.buffer.read().await.len(),
            created_at: self.created_at.to_rfc3339(),
            connected: state.connected,
            collab: state.collab,
        }
    }

    pub async fn last_command(&self) -> String {
        self.state.read().await.last_command.clone()
    }
}

/// All sessions known to the daemon, keyed by full id.
pub struct Store {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session with a daemon-generated id.
    pub async fn create(
        &self,
        title: &str,
        capacity: usize,
        collab: bool,
        conn: Option<mpsc::Sender<Envelope>>,
    ) -> Arc<Session> {
        let id = generate_session_id();
        let session = Arc::new(Session::new(id.clone(), title, capacity, collab, conn));
        self.sessions.write().await.insert(id, session.clone());
        session
    }

    /// Create a session under a wrapper-chosen id, or resume the existing
    /// one. Resumption updates title/capacity/collab, rebinds the
    /// connection, and reports `true`; the caller then clears the buffer
    /// before accepting replay.
    pub async fn create_or_update(
        &self,
        id: &str,
        title: &str,
        capacity: usize,
        collab: bool,
        conn: Option<mpsc::Sender<Envelope>>,
    ) -> (Arc<Session>, bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(id).cloned() {
            drop(sessions);
            existing.update_registration(title, capacity, collab, conn).await;
            return (existing, true);
        }
        let session = Arc::new(Session::new(id.to_string(), title, capacity, collab, conn));
        sessions.insert(id.to_string(), session.clone());
        (session, false)
    }

    /// Look up by full id.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Find the session whose full id or short id starts with `prefix`
    /// (case-insensitive). Zero matches is an error, as are two or more,
    /// including the empty prefix against a multi-session store.
    pub async fn find_by_prefix(&self, prefix: &str) -> Result<Arc<Session>> {
        let prefix = prefix.to_lowercase();
        let sessions = self.sessions.read().await;

        let mut found: Option<Arc<Session>> = None;
        for session in sessions.values() {
            if session.id.starts_with(&prefix) || session.short_id.starts_with(&prefix) {
                if found.is_some() {
                    return Err(Error::AmbiguousSession(prefix));
                }
                found = Some(session.clone());
            }
        }
        found.ok_or(Error::SessionNotFound(prefix))
    }

    /// Exact, case-insensitive title match; first match wins. Empty queries
    /// never match, so untitled sessions cannot be reached this way.
    pub async fn find_by_title(&self, title: &str) -> Result<Arc<Session>> {
        if title.is_empty() {
            return Err(Error::SessionNotFound(title.to_string()));
        }
        let lower = title.to_lowercase();
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.title().await.to_lowercase() == lower {
                return Ok(session.clone());
            }
        }
        Err(Error::SessionNotFound(title.to_string()))
    }

    /// Resolve an identifier: full id, then id prefix, then title. The first
    /// success wins; an ambiguous prefix outranks a plain not-found so that
    /// callers learn the identifier was underspecified rather than wrong.
    pub async fn resolve(&self, identifier: &str) -> Result<Arc<Session>> {
        if let Some(id) = parse_session_id(identifier) {
            return self
                .get(&id)
                .await
                .ok_or(Error::SessionNotFound(identifier.to_string()));
        }

        let ambiguous = match self.find_by_prefix(identifier).await {
            Ok(session) => return Ok(session),
            Err(err @ Error::AmbiguousSession(_)) => Some(err),
            Err(_) => None,
        };

        if let Ok(session) = self.find_by_title(identifier).await {
            return Ok(session);
        }

        Err(ambiguous.unwrap_or(Error::SessionNotFound(identifier.to_string())))
    }

    /// Delete a session. Idempotent.
    pub async fn remove(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            info!(id = %short_id(id), "session removed");
        }
    }

    /// Snapshot of all sessions; iteration order is unspecified.
    pub async fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_list() {
        let store = Store::new();
        let session = store.create("test-session", 100, false, None).await;

        assert_eq!(session.title().await, "test-session");
        assert!(session.is_connected().await);
        assert_eq!(session.short_id.len(), 8);
        assert!(session.id.starts_with(&session.short_id));
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn get_by_full_id() {
        let store = Store::new();
        let session = store.create("get-test", 100, false, None).await;

        let found = store.get(&session.id).await.expect("session by id");
        assert_eq!(found.id, session.id);
        assert!(store.get("ffffffffffffffffffffffffffffffff").await.is_none());
    }

    #[tokio::test]
    async fn find_by_prefix_unique() {
        let store = Store::new();
        let session = store.create("prefix-test", 100, false, None).await;

        let found = store.find_by_prefix(&session.short_id[..4]).await.unwrap();
        assert_eq!(found.id, session.id);
    }

    #[tokio::test]
    async fn find_by_prefix_empty_is_ambiguous() {
        let store = Store::new();
        store.create("a", 100, false, None).await;
        store.create("b", 100, false, None).await;

        let err = store.find_by_prefix("").await.unwrap_err();
        assert!(matches!(err, Error::AmbiguousSession(_)));
    }

    #[tokio::test]
    async fn find_by_title_case_insensitive() {
        let store = Store::new();
        store.create("My Session", 100, false, None).await;

        let found = store.find_by_title("my session").await.unwrap();
        assert_eq!(found.title().await, "My Session");
        assert!(store.find_by_title("other").await.is_err());
        assert!(store.find_by_title("").await.is_err());
    }

    #[tokio::test]
    async fn resolve_tries_id_prefix_then_title() {
        let store = Store::new();
        let session = store.create("dev-server", 100, false, None).await;

        let by_id = store.resolve(&session.id).await.unwrap();
        assert_eq!(by_id.id, session.id);

        let by_prefix = store.resolve(&session.short_id[..4]).await.unwrap();
        assert_eq!(by_prefix.id, session.id);

        let by_title = store.resolve("dev-server").await.unwrap();
        assert_eq!(by_title.id, session.id);

        assert!(matches!(
            store.resolve("nonexistent").await.unwrap_err(),
            Error::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn resolve_empty_identifier_is_ambiguous_with_many_sessions() {
        let store = Store::new();
        store.create("first", 100, false, None).await;
        store.create("second", 100, false, None).await;

        assert!(matches!(
            store.resolve("").await.unwrap_err(),
            Error::AmbiguousSession(_)
        ));
    }

    #[tokio::test]
    async fn resolve_full_id_misses_without_fallback() {
        let store = Store::new();
        store.create("only", 100, false, None).await;

        // A well-formed id that is not in the store fails outright.
        let err = store
            .resolve("00000000000000000000000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn create_or_update_resumes_and_updates() {
        let store = Store::new();
        let id = generate_session_id();

        let (first, reconnected) = store.create_or_update(&id, "one", 100, false, None).await;
        assert!(!reconnected);
        first.append_output(&["old".to_string()]).await;
        first.mark_disconnected().await;

        let (second, reconnected) = store.create_or_update(&id, "two", 100, true, None).await;
        assert!(reconnected);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.title().await, "two");
        assert!(second.is_collab().await);
        assert!(second.is_connected().await);
        // Old history survives until the dispatcher clears it for replay.
        assert_eq!(second.line_count().await, 1);
        assert_eq!(store.list().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = Store::new();
        let session = store.create("to-remove", 100, false, None).await;

        store.remove(&session.id).await;
        store.remove(&session.id).await;
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn send_input_requires_collab() {
        let store = Store::new();
        let session = store.create("plain", 100, false, None).await;

        let err = session.send_input("echo hi\n").await.unwrap_err();
        assert!(matches!(err, Error::NotCollab(_)));
    }

    #[tokio::test]
    async fn send_input_requires_live_connection() {
        let store = Store::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session = store.create("collab", 100, true, Some(tx)).await;

        let sent = session.send_input("echo hi\n").await.unwrap();
        assert_eq!(sent, 8);
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.msg_type, MsgType::Input);
        let payload: InputPayload = delivered.payload_or_default().unwrap();
        assert_eq!(payload.text, "echo hi\n");

        session.mark_disconnected().await;
        let err = session.send_input("again\n").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected(_)));
    }

    #[tokio::test]
    async fn output_is_stripped_on_ingest() {
        let store = Store::new();
        let session = store.create("strip", 100, false, None).await;

        session
            .append_output(&["\u{1b}[31mred\u{1b}[0m".to_string()])
            .await;
        let lines = session.with_buffer(|b| b.last_n(1)).await;
        assert_eq!(lines, vec!["red"]);
    }
}
