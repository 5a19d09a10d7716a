//! Control-plane client.
//!
//! A control connection is not bound to any session: it sends one request
//! record and reads exactly one reply, either `ack` with a typed payload or
//! `error`. The connection stays open for further requests.

use std::path::Path;

use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use tapesh_core::codec::{decode_frame, read_frame, write_envelope, MAX_LINE_BYTES};
use tapesh_core::messages::{
    Envelope, ErrorPayload, ListSessionsResponse, MsgType, QuerySessionPayload,
    QuerySessionResponse, SessionInfo, WriteSessionPayload, WriteSessionResponse,
};
use tapesh_core::{Error, Result};

/// A request/response client for the daemon's control surface.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    frame: Vec<u8>,
}

impl ControlClient {
    /// Dial the daemon socket.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            frame: Vec::new(),
        })
    }

    /// Send one request and read back its single reply. `error` replies
    /// surface as the daemon's message text.
    async fn round_trip(&mut self, request: &Envelope) -> Result<Envelope> {
        write_envelope(&mut self.writer, request).await?;

        if !read_frame(&mut self.reader, &mut self.frame, MAX_LINE_BYTES).await? {
            return Err(Error::Other("daemon closed the connection".into()));
        }
        let reply = decode_frame(&self.frame)?;
        if reply.msg_type == MsgType::Error {
            let p: ErrorPayload = reply.payload_or_default()?;
            return Err(Error::Other(p.message));
        }
        Ok(reply)
    }

    /// All sessions the daemon knows about.
    pub async fn list_sessions(&mut self) -> Result<Vec<SessionInfo>> {
        let reply = self.round_trip(&Envelope::new(MsgType::ListSessions)).await?;
        let resp: ListSessionsResponse = reply.payload_or_default()?;
        Ok(resp.sessions)
    }

    /// Tail, paginate, or search one session's buffer.
    pub async fn query_session(
        &mut self,
        payload: &QuerySessionPayload,
    ) -> Result<QuerySessionResponse> {
        let request = Envelope::with_payload(MsgType::QuerySession, payload)?;
        let reply = self.round_trip(&request).await?;
        Ok(reply.payload_or_default()?)
    }

    /// Inject input into a collab session.
    pub async fn write_session(
        &mut self,
        payload: &WriteSessionPayload,
    ) -> Result<WriteSessionResponse> {
        let request = Envelope::with_payload(MsgType::WriteSession, payload)?;
        let reply = self.round_trip(&request).await?;
        Ok(reply.payload_or_default()?)
    }
}
