//! Resilient session transport.
//!
//! The wrapper chooses its session id before the first connect and presents
//! it on every `register`, so a restarted daemon resumes the same logical
//! session. Output always lands in the local mirror ring buffer; the daemon
//! copy is best-effort and rebuilt by replaying the mirror after each
//! reconnect. A 3-second ticker drives reconnection attempts; any send error
//! just flips the transport back to disconnected.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use tapesh_core::codec::{decode_frame, read_frame, write_envelope, MAX_LINE_BYTES};
use tapesh_core::messages::{
    CommandPayload, Envelope, ErrorPayload, InputPayload, MsgType, OutputPayload, RegisterAck,
    RegisterPayload, ReplayPayload,
};
use tapesh_core::ring_buffer::RingBuffer;
use tapesh_core::{short_id, strip_ansi, Error, Result};

/// Reconnection cadence.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Lines per `replay` record; bounds the size of a single message.
pub const REPLAY_CHUNK: usize = 500;

/// The wrapper's connection to the daemon plus the local mirror that backs
/// it across outages.
pub struct Transport {
    socket_path: PathBuf,
    session_id: String,
    short_id: String,
    title: String,
    collab: bool,
    /// Requested daemon-side buffer capacity; 0 leaves the daemon default.
    register_buffer_size: usize,
    /// Local mirror: receives every output line regardless of connectivity.
    mirror: RwLock<RingBuffer>,
    last_command: Mutex<Option<String>>,
    connected: Arc<AtomicBool>,
    /// Write half of the current connection. The lock spans encode-and-flush
    /// of one record, keeping records atomic on the wire.
    conn: Mutex<Option<OwnedWriteHalf>>,
    /// Where `input` records land; the wrapper drains this into the PTY.
    pty_input_tx: mpsc::Sender<Vec<u8>>,
}

impl Transport {
    pub fn new(
        socket_path: PathBuf,
        session_id: String,
        title: String,
        collab: bool,
        buffer_size: usize,
        pty_input_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            socket_path,
            short_id: short_id(&session_id),
            session_id,
            title,
            collab,
            register_buffer_size: buffer_size,
            mirror: RwLock::new(RingBuffer::new(buffer_size)),
            last_command: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            conn: Mutex::new(None),
            pty_input_tx,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Dial the daemon, register under the self-assigned id, and replay the
    /// local mirror. On success the transport is connected and, for collab
    /// sessions, an input-reader task is consuming daemon pushes.
    pub async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let register = Envelope::with_payload(
            MsgType::Register,
            &RegisterPayload {
                title: self.title.clone(),
                buffer_size: self.register_buffer_size,
                collab: self.collab,
                session_id: Some(self.session_id.clone()),
            },
        )?;
        write_envelope(&mut write_half, &register).await?;

        let mut reader = BufReader::new(read_half);
        let mut frame = Vec::new();
        if !read_frame(&mut reader, &mut frame, MAX_LINE_BYTES).await? {
            return Err(Error::Other(
                "daemon closed the connection during registration".into(),
            ));
        }
        let reply = decode_frame(&frame)?;
        match reply.msg_type {
            MsgType::Ack => {
                let ack: RegisterAck = reply.payload_or_default()?;
                debug!(id = %ack.short_id, "session registered");
            }
            MsgType::Error => {
                let p: ErrorPayload = reply.payload_or_default()?;
                return Err(Error::Other(p.message));
            }
            other => {
                return Err(Error::Other(format!(
                    "unexpected registration reply: {other:?}"
                )));
            }
        }

        *self.conn.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        if self.collab {
            self.spawn_input_reader(reader);
        }

        self.replay().await;
        Ok(())
    }

    /// Consume daemon-to-wrapper records for this connection's lifetime.
    /// Socket termination flips the transport back to disconnected.
    fn spawn_input_reader(&self, mut reader: BufReader<OwnedReadHalf>) {
        let pty_input_tx = self.pty_input_tx.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            let mut frame = Vec::new();
            loop {
                match read_frame(&mut reader, &mut frame, MAX_LINE_BYTES).await {
                    Ok(true) => {}
                    Ok(false) | Err(_) => break,
                }
                let envelope = match decode_frame(&frame) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(error = %e, "failed to parse incoming message");
                        continue;
                    }
                };
                if envelope.msg_type == MsgType::Input {
                    let Ok(p) = envelope.payload_or_default::<InputPayload>() else {
                        continue;
                    };
                    if !p.text.is_empty() && pty_input_tx.send(p.text.into_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });
    }

    /// Fire reconnection attempts every [`RECONNECT_INTERVAL`] while
    /// disconnected. The returned sender is the dedicated stop signal.
    pub fn spawn_reconnect(self: Arc<Self>) -> mpsc::Sender<()> {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let transport = self;
        tokio::spawn(async move {
            let mut ticker = interval(RECONNECT_INTERVAL);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => return,
                    _ = ticker.tick() => {
                        if transport.is_connected() {
                            continue;
                        }
                        // Drop any stale socket before dialing fresh.
                        *transport.conn.lock().await = None;
                        match transport.connect().await {
                            Ok(()) => {
                                info!(id = %transport.short_id, "reconnected to daemon");
                            }
                            Err(e) => {
                                debug!(error = %e, "daemon still unavailable");
                            }
                        }
                    }
                }
            }
        });
        stop_tx
    }

    /// Record output lines: always into the local mirror (ANSI-stripped),
    /// and forwarded to the daemon when connected.
    pub async fn publish_lines(&self, lines: Vec<String>) {
        {
            let mut mirror = self.mirror.write().await;
            for line in &lines {
                mirror.append(strip_ansi(line));
            }
        }

        if lines.is_empty() || !self.is_connected() {
            return;
        }
        match Envelope::with_payload(MsgType::Output, &OutputPayload { lines }) {
            Ok(envelope) => self.send(&envelope.for_session(&self.session_id)).await,
            Err(e) => warn!(error = %e, "failed to encode output record"),
        }
    }

    /// Record a detected command. Remembered locally for replay regardless
    /// of connectivity; empty flushes are dropped.
    pub async fn publish_command(&self, command: String) {
        if command.is_empty() {
            return;
        }
        *self.last_command.lock().await = Some(command.clone());

        if !self.is_connected() {
            return;
        }
        match Envelope::with_payload(MsgType::Command, &CommandPayload { command }) {
            Ok(envelope) => self.send(&envelope.for_session(&self.session_id)).await,
            Err(e) => warn!(error = %e, "failed to encode command record"),
        }
    }

    /// Push the whole local mirror to the daemon after (re)registration.
    async fn replay(&self) {
        let lines = self.mirror.read().await.all_lines();
        if lines.is_empty() {
            return;
        }
        let count = lines.len();
        let last_command = self.last_command.lock().await.clone();

        for payload in chunk_replay(lines, last_command) {
            match Envelope::with_payload(MsgType::Replay, &payload) {
                Ok(envelope) => self.send(&envelope.for_session(&self.session_id)).await,
                Err(e) => warn!(error = %e, "failed to encode replay record"),
            }
            if !self.is_connected() {
                return;
            }
        }
        debug!(lines = count, "replayed local mirror to daemon");
    }

    /// Send one record. Errors are not surfaced: the transport flips to
    /// disconnected and the reconnection ticker takes it from there.
    async fn send(&self, envelope: &Envelope) {
        let mut conn = self.conn.lock().await;
        let Some(writer) = conn.as_mut() else {
            return;
        };
        if let Err(e) = write_envelope(writer, envelope).await {
            debug!(error = %e, "send error, marking disconnected");
            self.connected.store(false, Ordering::SeqCst);
            *conn = None;
        }
    }

    /// Best-effort goodbye: tell the daemon we are leaving, then close.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut conn = self.conn.lock().await;
        if let Some(writer) = conn.as_mut() {
            let goodbye = Envelope::new(MsgType::Disconnect).for_session(&self.session_id);
            let _ = write_envelope(writer, &goodbye).await;
        }
        *conn = None;
    }
}

/// Split a mirror snapshot into bounded `replay` payloads. Only the final
/// chunk carries the last observed command.
fn chunk_replay(lines: Vec<String>, last_command: Option<String>) -> Vec<ReplayPayload> {
    let total = lines.len();
    let mut payloads = Vec::with_capacity(total.div_ceil(REPLAY_CHUNK));
    let mut lines = lines.into_iter();

    let mut emitted = 0;
    while emitted < total {
        let chunk: Vec<String> = lines.by_ref().take(REPLAY_CHUNK).collect();
        emitted += chunk.len();
        let is_last = emitted >= total;
        payloads.push(ReplayPayload {
            lines: chunk,
            last_command: if is_last {
                last_command.clone().filter(|c| !c.is_empty())
            } else {
                None
            },
        });
    }
    payloads
}
