//! Newline-delimited JSON framing.
//!
//! Wire format: one JSON envelope per `\n`-terminated line. Encoding always
//! produces exactly one trailing newline so that a single `write_all` emits
//! one atomic record; readers must accept lines up to [`MAX_LINE_BYTES`] and
//! treat anything longer as an unrecoverable stream error.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::messages::Envelope;

/// Largest accepted record, including the terminating newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Encode an envelope as a single `\n`-terminated line.
pub fn encode_line(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

/// Encode and write one record, flushing so it hits the socket immediately.
///
/// Callers serialize access to the writer; one call emits one atomic record.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(envelope)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one `\n`-terminated record into `buf` (newline not included).
///
/// Returns `Ok(false)` on clean EOF. A non-empty trailing fragment at EOF is
/// returned as a final record. A record longer than `max` fails with
/// [`Error::LineTooLong`]; the stream position is then unknown and the
/// connection should be dropped.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            // EOF: hand back a trailing unterminated record, if any.
            return Ok(!buf.is_empty());
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > max {
                    return Err(Error::LineTooLong(max));
                }
                buf.extend_from_slice(&chunk[..pos]);
                reader.consume(pos + 1);
                return Ok(true);
            }
            None => {
                let len = chunk.len();
                if buf.len() + len > max {
                    return Err(Error::LineTooLong(max));
                }
                buf.extend_from_slice(chunk);
                reader.consume(len);
            }
        }
    }
}

/// Parse a raw frame into an envelope.
pub fn decode_frame(frame: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MsgType, OutputPayload};
    use tokio::io::BufReader;

    fn output_envelope(lines: &[&str]) -> Envelope {
        Envelope::with_payload(
            MsgType::Output,
            &OutputPayload {
                lines: lines.iter().map(|s| s.to_string()).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn encode_terminates_with_single_newline() {
        let line = encode_line(&output_envelope(&["hello"])).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[tokio::test]
    async fn round_trip_single() {
        let env = output_envelope(&["a", "b"]);
        let line = encode_line(&env).unwrap();

        let mut reader = BufReader::new(line.as_slice());
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
        let decoded = decode_frame(&buf).unwrap();
        assert_eq!(decoded.msg_type, MsgType::Output);
        let payload: OutputPayload = decoded.payload_or_default().unwrap();
        assert_eq!(payload.lines, vec!["a", "b"]);

        assert!(!read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
    }

    #[tokio::test]
    async fn multiple_records_in_one_stream() {
        let mut stream = Vec::new();
        for i in 0..3 {
            stream.extend(encode_line(&output_envelope(&[&format!("line {i}")])).unwrap());
        }

        let mut reader = BufReader::new(stream.as_slice());
        let mut buf = Vec::new();
        for i in 0..3 {
            assert!(read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
            let payload: OutputPayload = decode_frame(&buf).unwrap().payload_or_default().unwrap();
            assert_eq!(payload.lines, vec![format!("line {i}")]);
        }
        assert!(!read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
    }

    #[tokio::test]
    async fn small_reader_buffer_reassembles_records() {
        let env = output_envelope(&["a longer line that spans several internal reads"]);
        let line = encode_line(&env).unwrap();

        // Force fill_buf to hand out tiny chunks.
        let mut reader = BufReader::with_capacity(4, line.as_slice());
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
        assert!(decode_frame(&buf).is_ok());
    }

    #[tokio::test]
    async fn oversized_record_is_an_error() {
        let mut stream = vec![b'x'; 64];
        stream.push(b'\n');

        let mut reader = BufReader::new(stream.as_slice());
        let mut buf = Vec::new();
        let err = read_frame(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(matches!(err, Error::LineTooLong(16)));
    }

    #[tokio::test]
    async fn trailing_fragment_returned_at_eof() {
        let env = output_envelope(&["tail"]);
        let mut stream = encode_line(&env).unwrap();
        stream.pop(); // drop the newline

        let mut reader = BufReader::new(stream.as_slice());
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
        assert!(decode_frame(&buf).is_ok());
        assert!(!read_frame(&mut reader, &mut buf, MAX_LINE_BYTES).await.unwrap());
    }
}
