//! Container attach-stream framing and demultiplexing.
//!
//! Without a TTY the daemon multiplexes stdout and stderr onto one stream.
//! Every chunk is prefixed with an 8-byte header:
//!
//! ```text
//! [stream type: u8][0u8; 3][payload length: u32 big-endian]
//! ```
//!
//! where the stream type is 0 (stdin), 1 (stdout) or 2 (stderr).
//! [`AttachCodec`] decodes that framing; [`Demultiplexer`] routes decoded
//! frames into one channel per stream, each drained by its own task.
//!
//! `DockerRuntime` never uses the codec: bollard already decodes the attach
//! stream into `LogOutput` values. The codec serves runtimes that hand over
//! raw attach bytes, such as the in-memory runtime used by tests.

use crate::docker::FrameStream;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::StreamExt;
use std::io;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::{info, warn};

pub const HEADER_LEN: usize = 8;
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            StreamKind::Stdin => 0,
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub kind: StreamKind,
    pub payload: Bytes,
}

impl OutputFrame {
    pub fn new(kind: StreamKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AttachCodec;

impl Decoder for AttachCodec {
    type Item = OutputFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = StreamKind::from_byte(src[0]).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown stream type {}", src[0]),
            )
        })?;
        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(OutputFrame { kind, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("attach stream ended inside a frame ({} bytes left)", src.len()),
            )),
        }
    }
}

impl Encoder<OutputFrame> for AttachCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: OutputFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = u32::try_from(frame.payload.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.kind.as_byte());
        dst.put_slice(&[0, 0, 0]);
        dst.put_u32(length);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

/// Decodes a raw multiplexed byte stream into frames.
pub fn frames_from_reader<R>(reader: R) -> FrameStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    FramedRead::new(reader, AttachCodec)
        .map(|frame| frame.map_err(anyhow::Error::from))
        .boxed()
}

/// One producer routing frames, two consumers draining them.
pub struct Demultiplexer {
    producer: JoinHandle<()>,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
}

impl Demultiplexer {
    pub fn spawn(mut frames: FrameStream, function: &str) -> Self {
        let (stdout_tx, mut stdout_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (stderr_tx, mut stderr_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        let producer_function = function.to_string();
        let producer = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(function = %producer_function, error = %e, "Attach stream failed");
                        break;
                    }
                };
                let target = match frame.kind {
                    StreamKind::Stdout => &stdout_tx,
                    StreamKind::Stderr => &stderr_tx,
                    StreamKind::Stdin => continue,
                };
                if target.send(frame.payload).await.is_err() {
                    break;
                }
            }
        });

        let stdout = tokio::spawn(async move {
            let mut collected = Vec::new();
            while let Some(chunk) = stdout_rx.recv().await {
                collected.extend_from_slice(&chunk);
            }
            collected
        });

        let function = function.to_string();
        let stderr = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut pending = Vec::new();
            while let Some(chunk) = stderr_rx.recv().await {
                collected.extend_from_slice(&chunk);
                pending.extend_from_slice(&chunk);
                while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=newline).collect();
                    log_line(&function, &line);
                }
            }
            if !pending.is_empty() {
                log_line(&function, &pending);
            }
            collected
        });

        Self {
            producer,
            stdout,
            stderr,
        }
    }

    /// Waits for the stream to end and both consumers to drain.
    pub async fn collect(&mut self) -> (Vec<u8>, Vec<u8>) {
        let _ = (&mut self.producer).await;
        let stdout = (&mut self.stdout).await.unwrap_or_default();
        let stderr = (&mut self.stderr).await.unwrap_or_default();
        (stdout, stderr)
    }

    /// Closes both streams without waiting for them.
    pub fn abort(&self) {
        self.producer.abort();
        self.stdout.abort();
        self.stderr.abort();
    }
}

fn log_line(function: &str, line: &[u8]) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);
    if !text.is_empty() {
        info!(function = %function, "{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(kind: u8, len: u32) -> Vec<u8> {
        let mut bytes = vec![kind, 0, 0, 0];
        bytes.extend_from_slice(&len.to_be_bytes());
        bytes
    }

    #[test]
    fn decodes_frames_split_across_reads() {
        let mut codec = AttachCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header(1, 5));
        buf.extend_from_slice(b"he");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"llo");
        buf.extend_from_slice(&header(2, 3));
        buf.extend_from_slice(b"err");

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first, OutputFrame::new(StreamKind::Stdout, "hello"));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second, OutputFrame::new(StreamKind::Stderr, "err"));
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_stream_types() {
        let mut buf = BytesMut::from(&header(7, 0)[..]);
        assert!(AttachCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn truncated_frame_at_eof_is_an_error() {
        let mut buf = BytesMut::from(&header(1, 10)[..]);
        buf.extend_from_slice(b"abc");
        assert!(AttachCodec.decode_eof(&mut buf).is_err());
    }

    #[tokio::test]
    async fn demultiplexer_splits_streams() {
        let mut raw = BytesMut::new();
        for frame in [
            OutputFrame::new(StreamKind::Stderr, "log one\nlog "),
            OutputFrame::new(StreamKind::Stdout, "{\"statusCode\":"),
            OutputFrame::new(StreamKind::Stderr, "two\n"),
            OutputFrame::new(StreamKind::Stdout, "200}"),
        ] {
            AttachCodec.encode(frame, &mut raw).unwrap();
        }
        let frames = frames_from_reader(std::io::Cursor::new(raw.to_vec()));

        let mut demux = Demultiplexer::spawn(frames, "F");
        let (stdout, stderr) = demux.collect().await;
        assert_eq!(stdout, b"{\"statusCode\":200}");
        assert_eq!(stderr, b"log one\nlog two\n");
    }
}
