//! Container log streaming.
//!
//! Without a TTY the daemon multiplexes stdout and stderr into one byte
//! stream of framed records: an 8-byte header (1-byte stream selector,
//! 3 reserved bytes, 4-byte big-endian payload length) followed by the
//! payload. [`FrameDecoder`] reassembles frames across arbitrary chunk
//! boundaries; [`LogStreamer`] turns a session into a cancellable stream
//! of [`LogRecord`]s in daemon write order.

use crate::api;
use crate::error::{CodecError, DockerError, Result, StreamError};
use crate::transport::{Request, StreamSession, Transport};
use bytes::{Buf, BytesMut};
use crun_types::{LogOptions, LogRecord, LogStreamKind};
use futures_util::stream::{unfold, Stream};
use std::pin::Pin;
use std::sync::Arc;

const FRAME_HEADER_LEN: usize = 8;

/// Ordered sequence of log records from one container.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogRecord>> + Send>>;

/// Incremental decoder for the multiplexed log framing.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, or `None` when more input is needed.
    pub fn next_record(&mut self) -> std::result::Result<Option<LogRecord>, CodecError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let selector = self.buf[0];
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(FRAME_HEADER_LEN);
        let payload = self.buf.split_to(len);

        // 0 is stdin echoed back on attach; logs only carry 1 and 2.
        let stream = match selector {
            0 | 1 => LogStreamKind::Stdout,
            2 => LogStreamKind::Stderr,
            other => {
                return Err(CodecError::SchemaMismatch(format!(
                    "unknown stream selector {}",
                    other
                )))
            }
        };
        let message = String::from_utf8_lossy(&payload)
            .trim_end_matches('\n')
            .to_owned();
        Ok(Some(LogRecord { stream, message }))
    }

    /// Verify no partial frame is left once the stream has ended.
    pub fn finish(&self) -> std::result::Result<(), CodecError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Truncated)
        }
    }
}

#[derive(Clone)]
pub struct LogStreamer {
    transport: Arc<Transport>,
}

impl LogStreamer {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `GET /containers/{id}/logs` → record stream.
    ///
    /// Finite when `follow` is off and the container has stopped,
    /// infinite otherwise. Records are delivered in the order the daemon
    /// wrote them; a mid-stream drop fails the sequence with
    /// `StreamError::Disconnected` instead of silently resuming.
    pub async fn tail_logs(&self, container: &str, options: LogOptions) -> Result<LogStream> {
        let mut request = Request::get(&format!("/containers/{}/logs", container))
            .query("stdout", options.stdout)
            .query("stderr", options.stderr)
            .query("follow", options.follow)
            .query("timestamps", options.timestamps);
        if let Some(tail) = options.tail {
            request = request.query("tail", tail);
        }
        let session = api::open_stream(&self.transport, request).await?;
        Ok(frame_stream(session, options.follow))
    }
}

struct FrameState {
    session: StreamSession,
    decoder: FrameDecoder,
    infinite: bool,
    finished: bool,
}

fn frame_stream(session: StreamSession, infinite: bool) -> LogStream {
    let state = FrameState {
        session,
        decoder: FrameDecoder::new(),
        infinite,
        finished: false,
    };
    Box::pin(unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            match st.decoder.next_record() {
                Ok(Some(record)) => return Some((Ok(record), st)),
                Ok(None) => {}
                Err(e) => {
                    st.finished = true;
                    return Some((Err(DockerError::Codec(e)), st));
                }
            }
            match st.session.next_chunk().await {
                Ok(Some(chunk)) => st.decoder.feed(&chunk),
                Ok(None) => {
                    st.finished = true;
                    if st.infinite {
                        return Some((Err(DockerError::Stream(StreamError::Disconnected)), st));
                    }
                    if let Err(e) = st.decoder.finish() {
                        return Some((Err(DockerError::Codec(e)), st));
                    }
                    return None;
                }
                Err(_) => {
                    st.finished = true;
                    return Some((Err(DockerError::Stream(StreamError::Disconnected)), st));
                }
            }
        }
    }))
}
