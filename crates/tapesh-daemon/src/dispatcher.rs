//! Unix-socket listener and per-connection dispatch.
//!
//! Every accepted connection speaks the same newline-delimited JSON stream.
//! A connection becomes a *session connection* once it sends `register`
//! (binding it to a session id); control connections just issue
//! `list_sessions` / `query_session` / `write_session` and read one reply per
//! request. Replies and daemon-to-wrapper `input` records all flow through a
//! per-connection writer task, so each record is encoded and flushed as one
//! atomic line.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tapesh_core::codec::{decode_frame, read_frame, write_envelope, MAX_LINE_BYTES};
use tapesh_core::messages::{
    CommandPayload, Envelope, ErrorPayload, ListSessionsResponse, MsgType, OutputPayload,
    QuerySessionPayload, QuerySessionResponse, RegisterAck, RegisterPayload, ReplayPayload,
    WriteSessionPayload, WriteSessionResponse,
};
use tapesh_core::{parse_session_id, Error, Result};

use crate::store::{Session, Store};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE: usize = 64;

/// The daemon: a store plus the listener that feeds it.
#[derive(Clone)]
pub struct Daemon {
    store: Arc<Store>,
    /// Ring buffer capacity for sessions that do not request their own.
    buffer_size: usize,
}

impl Daemon {
    pub fn new(store: Arc<Store>, buffer_size: usize) -> Self {
        Self { store, buffer_size }
    }

    /// Bind the Unix socket, handling startup contention: a live acceptor on
    /// the path means another daemon owns it; a dead socket file is removed.
    /// The parent directory is created with mode 0700.
    pub async fn bind(&self, socket_path: &Path) -> Result<UnixListener> {
        if socket_path.exists() {
            match UnixStream::connect(socket_path).await {
                Ok(_) => return Err(Error::AlreadyRunning),
                Err(_) => {
                    let _ = std::fs::remove_file(socket_path);
                }
            }
        }

        if let Some(dir) = socket_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(dir)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "listening");
        Ok(listener)
    }

    /// Accept connections until the listener is torn down.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let daemon = self.clone();
                    tokio::spawn(async move {
                        daemon.handle_conn(stream).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    /// Drive one connection to completion.
    async fn handle_conn(&self, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
        let writer = tokio::spawn(async move {
            while let Some(envelope) = out_rx.recv().await {
                if let Err(e) = write_envelope(&mut write_half, &envelope).await {
                    debug!(error = %e, "connection write failed");
                    break;
                }
            }
        });

        let mut reader = BufReader::with_capacity(64 * 1024, read_half);
        let mut frame = Vec::new();
        // Set by the first register; publisher records act on this binding.
        let mut bound: Option<String> = None;

        loop {
            match read_frame(&mut reader, &mut frame, MAX_LINE_BYTES).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "unrecoverable stream error");
                    break;
                }
            }

            let envelope = match decode_frame(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!(error = %e, "bad message");
                    continue;
                }
            };

            match envelope.msg_type {
                MsgType::Register => {
                    self.on_register(&envelope, &mut bound, &out_tx).await;
                }
                MsgType::Output => {
                    let Some(session) = self.bound_session(&bound).await else {
                        continue;
                    };
                    let Ok(p) = envelope.payload_or_default::<OutputPayload>() else {
                        continue;
                    };
                    session.append_output(&p.lines).await;
                }
                MsgType::Replay => {
                    let Some(session) = self.bound_session(&bound).await else {
                        continue;
                    };
                    let Ok(p) = envelope.payload_or_default::<ReplayPayload>() else {
                        continue;
                    };
                    session.apply_replay(&p.lines, p.last_command.as_deref()).await;
                }
                MsgType::Command => {
                    let Some(session) = self.bound_session(&bound).await else {
                        continue;
                    };
                    let Ok(p) = envelope.payload_or_default::<CommandPayload>() else {
                        continue;
                    };
                    session.set_last_command(&p.command).await;
                }
                MsgType::Disconnect => {
                    if let Some(session) = self.bound_session(&bound).await {
                        session.mark_disconnected().await;
                        info!(id = %session.short_id, "session disconnected");
                    }
                    break;
                }
                MsgType::ListSessions => {
                    self.on_list_sessions(&out_tx).await;
                }
                MsgType::QuerySession => {
                    self.on_query_session(&envelope, &out_tx).await;
                }
                MsgType::WriteSession => {
                    self.on_write_session(&envelope, &out_tx).await;
                }
                other => {
                    debug!(msg_type = ?other, "ignoring unexpected message");
                }
            }
        }

        // Socket gone without an orderly disconnect: keep the session but
        // mark the wrapper as away.
        if let Some(session) = self.bound_session(&bound).await {
            session.mark_disconnected().await;
        }

        drop(out_tx);
        let _ = writer.await;
    }

    async fn bound_session(&self, bound: &Option<String>) -> Option<Arc<Session>> {
        match bound {
            Some(id) => self.store.get(id).await,
            None => None,
        }
    }

    async fn on_register(
        &self,
        envelope: &Envelope,
        bound: &mut Option<String>,
        out_tx: &mpsc::Sender<Envelope>,
    ) {
        let p: RegisterPayload = match envelope.payload_or_default() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "bad register payload");
                send_error(out_tx, "bad register payload").await;
                return;
            }
        };

        let capacity = if p.buffer_size > 0 {
            p.buffer_size
        } else {
            self.buffer_size
        };
        let conn = p.collab.then(|| out_tx.clone());

        let (session, reconnected) = match &p.session_id {
            Some(raw) => match parse_session_id(raw) {
                Some(id) => {
                    self.store
                        .create_or_update(&id, &p.title, capacity, p.collab, conn)
                        .await
                }
                None => {
                    error!(id = %raw, "invalid session ID from wrapper");
                    send_error(out_tx, "invalid session ID").await;
                    return;
                }
            },
            None => (
                self.store.create(&p.title, capacity, p.collab, conn).await,
                false,
            ),
        };

        *bound = Some(session.id.clone());

        if reconnected {
            // The wrapper replays its authoritative mirror next.
            session.clear_buffer().await;
            info!(id = %session.short_id, title = %p.title, "session reconnected");
        } else {
            info!(id = %session.short_id, title = %p.title, collab = p.collab, "session registered");
        }

        send_ack(
            out_tx,
            &RegisterAck {
                session_id: session.id.clone(),
                short_id: session.short_id.clone(),
            },
        )
        .await;
    }

    async fn on_list_sessions(&self, out_tx: &mpsc::Sender<Envelope>) {
        let sessions = self.store.list().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        send_ack(out_tx, &ListSessionsResponse { sessions: infos }).await;
    }

    async fn on_query_session(&self, envelope: &Envelope, out_tx: &mpsc::Sender<Envelope>) {
        let p: QuerySessionPayload = match envelope.payload_or_default() {
            Ok(p) => p,
            Err(e) => {
                send_error(out_tx, format!("bad query payload: {e}")).await;
                return;
            }
        };

        let session = match self.store.resolve(&p.session).await {
            Ok(session) => session,
            Err(e) => {
                send_error(out_tx, e.to_string()).await;
                return;
            }
        };

        let mut resp = QuerySessionResponse {
            session_id: session.short_id.clone(),
            title: session.title().await,
            total_lines: session.line_count().await,
            ..Default::default()
        };

        if !p.search.is_empty() {
            let max_results = if p.max_results > 0 { p.max_results } else { 50 };
            resp.lines = session
                .with_buffer(|b| b.search(&p.search, max_results))
                .await
                .into_iter()
                .map(|r| format!("[{}] {}", r.seq, r.line))
                .collect();
        } else if p.last_n > 0 {
            resp.lines = session.with_buffer(|b| b.last_n(p.last_n)).await;
        } else {
            let count = if p.count > 0 { p.count } else { 100 };
            let (lines, next_cursor, has_more) = session
                .with_buffer(|b| b.read_range(p.cursor, count))
                .await;
            resp.lines = lines;
            resp.next_cursor = next_cursor;
            resp.has_more = has_more;
        }

        send_ack(out_tx, &resp).await;
    }

    async fn on_write_session(&self, envelope: &Envelope, out_tx: &mpsc::Sender<Envelope>) {
        let p: WriteSessionPayload = match envelope.payload_or_default() {
            Ok(p) => p,
            Err(e) => {
                send_error(out_tx, format!("bad write payload: {e}")).await;
                return;
            }
        };

        let session = match self.store.resolve(&p.session).await {
            Ok(session) => session,
            Err(e) => {
                send_error(out_tx, e.to_string()).await;
                return;
            }
        };

        match session.send_input(&p.text).await {
            Ok(bytes_sent) => {
                send_ack(
                    out_tx,
                    &WriteSessionResponse {
                        success: true,
                        session_id: session.short_id.clone(),
                        bytes_sent,
                    },
                )
                .await;
            }
            Err(e) => {
                send_error(out_tx, e.to_string()).await;
            }
        }
    }
}

async fn send_ack<T: Serialize>(out_tx: &mpsc::Sender<Envelope>, payload: &T) {
    match Envelope::with_payload(MsgType::Ack, payload) {
        Ok(envelope) => {
            let _ = out_tx.send(envelope).await;
        }
        Err(e) => warn!(error = %e, "failed to encode ack"),
    }
}

async fn send_error(out_tx: &mpsc::Sender<Envelope>, message: impl Into<String>) {
    match Envelope::with_payload(
        MsgType::Error,
        &ErrorPayload {
            message: message.into(),
        },
    ) {
        Ok(envelope) => {
            let _ = out_tx.send(envelope).await;
        }
        Err(e) => warn!(error = %e, "failed to encode error reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::time::sleep;

    use tapesh_core::encode_line;
    use tapesh_core::messages::InputPayload;

    struct TestDaemon {
        _dir: tempfile::TempDir,
        path: PathBuf,
        store: Arc<Store>,
        _serve: tokio::task::JoinHandle<()>,
    }

    async fn start_daemon() -> TestDaemon {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tapesh.sock");
        let store = Arc::new(Store::new());
        let daemon = Daemon::new(store.clone(), 100);
        let listener = daemon.bind(&path).await.unwrap();
        let serve = tokio::spawn(async move {
            let _ = daemon.serve(listener).await;
        });
        TestDaemon {
            _dir: dir,
            path,
            store,
            _serve: serve,
        }
    }

    struct Conn {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        frame: Vec<u8>,
    }

    impl Conn {
        async fn open(path: &Path) -> Self {
            let stream = UnixStream::connect(path).await.unwrap();
            let (read_half, writer) = stream.into_split();
            Self {
                reader: BufReader::new(read_half),
                writer,
                frame: Vec::new(),
            }
        }

        async fn send(&mut self, envelope: &Envelope) {
            let line = encode_line(envelope).unwrap();
            self.writer.write_all(&line).await.unwrap();
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
        }

        async fn recv(&mut self) -> Envelope {
            assert!(
                read_frame(&mut self.reader, &mut self.frame, MAX_LINE_BYTES)
                    .await
                    .unwrap(),
                "connection closed while awaiting a reply"
            );
            decode_frame(&self.frame).unwrap()
        }

        async fn register(&mut self, payload: &RegisterPayload) -> RegisterAck {
            self.send(&Envelope::with_payload(MsgType::Register, payload).unwrap())
                .await;
            let reply = self.recv().await;
            assert_eq!(reply.msg_type, MsgType::Ack);
            reply.payload_or_default().unwrap()
        }
    }

    /// Poll until `f` yields true; the dispatcher applies records
    /// asynchronously to the query that follows them on another connection.
    async fn wait_for<F, Fut>(mut f: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if f().await {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn output(lines: &[&str]) -> Envelope {
        Envelope::with_payload(
            MsgType::Output,
            &OutputPayload {
                lines: lines.iter().map(|s| s.to_string()).collect(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_and_tail() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper.register(&RegisterPayload::default()).await;
        assert_eq!(ack.short_id.len(), 8);
        assert!(ack.session_id.starts_with(&ack.short_id));

        wrapper.send(&output(&["a", "b", "c"])).await;
        let store = daemon.store.clone();
        let id = ack.session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { store.get(&id).await.unwrap().line_count().await == 3 }
        })
        .await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::QuerySession,
                    &QuerySessionPayload {
                        session: ack.short_id.clone(),
                        last_n: 10,
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Ack);
        let resp: QuerySessionResponse = reply.payload_or_default().unwrap();
        assert_eq!(resp.lines, vec!["a", "b", "c"]);
        assert_eq!(resp.total_lines, 3);
        assert_eq!(resp.session_id, ack.short_id);
    }

    #[tokio::test]
    async fn reconnect_clears_then_replays() {
        let daemon = start_daemon().await;
        let session_id = tapesh_core::generate_session_id();

        let register = RegisterPayload {
            session_id: Some(session_id.clone()),
            ..Default::default()
        };

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper.register(&register).await;
        assert_eq!(ack.session_id, session_id);

        wrapper.send(&output(&["1", "2", "3", "4", "5"])).await;
        let store = daemon.store.clone();
        let id = session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { store.get(&id).await.unwrap().line_count().await == 5 }
        })
        .await;

        // Wrapper loses the daemon (socket drop, no disconnect record).
        drop(wrapper);
        let store = daemon.store.clone();
        let id = session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { !store.get(&id).await.unwrap().is_connected().await }
        })
        .await;

        // Reconnect under the same identity and replay 8 lines.
        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper.register(&register).await;
        assert_eq!(ack.session_id, session_id);

        let session = daemon.store.get(&session_id).await.unwrap();
        assert_eq!(session.line_count().await, 0, "resumption clears history");

        wrapper
            .send(
                &Envelope::with_payload(
                    MsgType::Replay,
                    &ReplayPayload {
                        lines: (1..=5).map(|i| i.to_string()).collect(),
                        last_command: None,
                    },
                )
                .unwrap(),
            )
            .await;
        wrapper
            .send(
                &Envelope::with_payload(
                    MsgType::Replay,
                    &ReplayPayload {
                        lines: (6..=8).map(|i| i.to_string()).collect(),
                        last_command: Some("echo 8".into()),
                    },
                )
                .unwrap(),
            )
            .await;

        let store = daemon.store.clone();
        let id = session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { store.get(&id).await.unwrap().line_count().await == 8 }
        })
        .await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::QuerySession,
                    &QuerySessionPayload {
                        session: session_id.clone(),
                        last_n: 100,
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let resp: QuerySessionResponse = control.recv().await.payload_or_default().unwrap();
        let want: Vec<String> = (1..=8).map(|i| i.to_string()).collect();
        assert_eq!(resp.lines, want);
        assert_eq!(session.last_command().await, "echo 8");
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn collab_write_reaches_the_wrapper() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper
            .register(&RegisterPayload {
                collab: true,
                ..Default::default()
            })
            .await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::WriteSession,
                    &WriteSessionPayload {
                        session: ack.short_id.clone(),
                        text: "echo hi\n".into(),
                    },
                )
                .unwrap(),
            )
            .await;

        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Ack);
        let resp: WriteSessionResponse = reply.payload_or_default().unwrap();
        assert!(resp.success);
        assert_eq!(resp.bytes_sent, 8);
        assert_eq!(resp.session_id, ack.short_id);

        let pushed = wrapper.recv().await;
        assert_eq!(pushed.msg_type, MsgType::Input);
        let input: InputPayload = pushed.payload_or_default().unwrap();
        assert_eq!(input.text, "echo hi\n");
    }

    #[tokio::test]
    async fn write_to_non_collab_session_fails() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper.register(&RegisterPayload::default()).await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::WriteSession,
                    &WriteSessionPayload {
                        session: ack.short_id.clone(),
                        text: "nope\n".into(),
                    },
                )
                .unwrap(),
            )
            .await;

        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Error);
        let err: ErrorPayload = reply.payload_or_default().unwrap();
        assert!(err.message.contains("not collaborative"), "{}", err.message);
    }

    #[tokio::test]
    async fn write_to_disconnected_session_fails() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper
            .register(&RegisterPayload {
                collab: true,
                ..Default::default()
            })
            .await;
        wrapper.send(&Envelope::new(MsgType::Disconnect)).await;

        let store = daemon.store.clone();
        let id = ack.session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { !store.get(&id).await.unwrap().is_connected().await }
        })
        .await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::WriteSession,
                    &WriteSessionPayload {
                        session: ack.short_id.clone(),
                        text: "late\n".into(),
                    },
                )
                .unwrap(),
            )
            .await;
        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Error);
        let err: ErrorPayload = reply.payload_or_default().unwrap();
        assert!(err.message.contains("not connected"), "{}", err.message);
    }

    #[tokio::test]
    async fn list_sessions_reports_state() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper
            .register(&RegisterPayload {
                title: "build box".into(),
                collab: true,
                ..Default::default()
            })
            .await;
        wrapper.send(&output(&["ready"])).await;
        wrapper
            .send(
                &Envelope::with_payload(
                    MsgType::Command,
                    &CommandPayload {
                        command: "make".into(),
                    },
                )
                .unwrap(),
            )
            .await;

        let store = daemon.store.clone();
        let id = ack.session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { store.get(&id).await.unwrap().last_command().await == "make" }
        })
        .await;

        let mut control = Conn::open(&daemon.path).await;
        control.send(&Envelope::new(MsgType::ListSessions)).await;
        let resp: ListSessionsResponse = control.recv().await.payload_or_default().unwrap();
        assert_eq!(resp.sessions.len(), 1);
        let info = &resp.sessions[0];
        assert_eq!(info.id, ack.short_id);
        assert_eq!(info.title, "build box");
        assert_eq!(info.last_command, "make");
        assert_eq!(info.line_count, 1);
        assert!(info.connected);
        assert!(info.collab);
        assert!(info.created_at.contains('T'), "RFC3339: {}", info.created_at);
    }

    #[tokio::test]
    async fn query_search_prefixes_sequence_numbers() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        let ack = wrapper.register(&RegisterPayload::default()).await;
        wrapper
            .send(&output(&["hello world", "foo", "Hello again", "bye", "HELLO end"]))
            .await;

        let store = daemon.store.clone();
        let id = ack.session_id.clone();
        wait_for(|| {
            let store = store.clone();
            let id = id.clone();
            async move { store.get(&id).await.unwrap().line_count().await == 5 }
        })
        .await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::QuerySession,
                    &QuerySessionPayload {
                        session: ack.short_id.clone(),
                        search: "hello".into(),
                        max_results: 10,
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let resp: QuerySessionResponse = control.recv().await.payload_or_default().unwrap();
        assert_eq!(
            resp.lines,
            vec!["[0] hello world", "[2] Hello again", "[4] HELLO end"]
        );

        // Cursor pagination on the same buffer.
        control
            .send(
                &Envelope::with_payload(
                    MsgType::QuerySession,
                    &QuerySessionPayload {
                        session: ack.short_id.clone(),
                        cursor: 1,
                        count: 2,
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let resp: QuerySessionResponse = control.recv().await.payload_or_default().unwrap();
        assert_eq!(resp.lines, vec!["foo", "Hello again"]);
        assert_eq!(resp.next_cursor, 3);
        assert!(resp.has_more);
    }

    #[tokio::test]
    async fn bad_message_is_skipped_not_fatal() {
        let daemon = start_daemon().await;

        let mut control = Conn::open(&daemon.path).await;
        control.send_raw(b"this is not json\n").await;
        control.send(&Envelope::new(MsgType::ListSessions)).await;

        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Ack);
    }

    #[tokio::test]
    async fn register_with_malformed_id_is_rejected() {
        let daemon = start_daemon().await;

        let mut wrapper = Conn::open(&daemon.path).await;
        wrapper
            .send(
                &Envelope::with_payload(
                    MsgType::Register,
                    &RegisterPayload {
                        session_id: Some("not-a-session-id".into()),
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let reply = wrapper.recv().await;
        assert_eq!(reply.msg_type, MsgType::Error);
        assert!(daemon.store.list().await.is_empty());
    }

    #[tokio::test]
    async fn query_unknown_session_is_an_error() {
        let daemon = start_daemon().await;

        let mut control = Conn::open(&daemon.path).await;
        control
            .send(
                &Envelope::with_payload(
                    MsgType::QuerySession,
                    &QuerySessionPayload {
                        session: "nonexistent".into(),
                        ..Default::default()
                    },
                )
                .unwrap(),
            )
            .await;
        let reply = control.recv().await;
        assert_eq!(reply.msg_type, MsgType::Error);
    }

    #[tokio::test]
    async fn bind_detects_running_daemon_and_stale_sockets() {
        let daemon = start_daemon().await;

        // A second daemon on the same live socket must refuse.
        let other = Daemon::new(Arc::new(Store::new()), 100);
        let err = other.bind(&daemon.path).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));

        // A dead socket file is swept and rebound.
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("tapesh.sock");
        {
            let listener = other.bind(&stale).await.unwrap();
            drop(listener);
        }
        assert!(stale.exists());
        let listener = other.bind(&stale).await.unwrap();
        drop(listener);
    }
}
