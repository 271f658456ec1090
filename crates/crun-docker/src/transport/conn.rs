//! Single daemon connection: socket dialing, HTTP/1.1 head exchange and
//! response body framing.

use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use crun_types::Endpoint;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UnixStream};
use tracing::debug;

const READ_CHUNK: usize = 8 * 1024;
const MAX_HEAD_LINE: usize = 16 * 1024;

/// Socket to the daemon, Unix or TCP.
pub(crate) enum DaemonStream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl AsyncRead for DaemonStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DaemonStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            DaemonStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DaemonStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            DaemonStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            DaemonStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DaemonStream::Unix(s) => Pin::new(s).poll_flush(cx),
            DaemonStream::Tcp(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            DaemonStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            DaemonStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Parsed response status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn keep_alive(&self) -> bool {
        !self
            .header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

/// One open connection plus its read buffer.
pub(crate) struct Connection {
    stream: DaemonStream,
    buf: BytesMut,
    pub(crate) last_used: Instant,
}

impl Connection {
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let stream = match endpoint {
            Endpoint::Unix { socket_path } => UnixStream::connect(socket_path)
                .await
                .map(DaemonStream::Unix),
            Endpoint::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
                .await
                .map(DaemonStream::Tcp),
        }
        .map_err(|e| TransportError::from_io(&e))?;
        debug!("connected to {}", endpoint);
        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(READ_CHUNK),
            last_used: Instant::now(),
        })
    }

    /// True when no response bytes are sitting unconsumed; a connection
    /// with leftovers must not be reused.
    pub fn is_drained(&self) -> bool {
        self.buf.is_empty()
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::from_io(&e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::from_io(&e))
    }

    /// Read more bytes into the buffer; `false` means EOF.
    async fn fill(&mut self) -> Result<bool, TransportError> {
        let n = self
            .stream
            .read_buf(&mut self.buf)
            .await
            .map_err(|e| TransportError::from_io(&e))?;
        Ok(n > 0)
    }

    /// Read one CRLF-terminated line, excluding the terminator.
    async fn read_line(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw = self.buf.split_to(pos + 1);
                let line = &raw[..raw.len() - 1];
                let line = line.strip_suffix(b"\r").unwrap_or(line);
                return String::from_utf8(line.to_vec()).map_err(|_| {
                    TransportError::ProtocolViolation("non-utf8 header line".to_owned())
                });
            }
            if self.buf.len() > MAX_HEAD_LINE {
                return Err(TransportError::ProtocolViolation(
                    "header line too long".to_owned(),
                ));
            }
            if !self.fill().await? {
                return Err(TransportError::ConnectionReset);
            }
        }
    }

    /// Read and parse the status line and headers.
    pub async fn read_response_head(&mut self) -> Result<ResponseHead, TransportError> {
        let status_line = self.read_line().await?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") {
            return Err(TransportError::ProtocolViolation(format!(
                "bad status line: {:?}",
                status_line
            )));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| {
                TransportError::ProtocolViolation(format!("bad status line: {:?}", status_line))
            })?;

        let mut headers = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                TransportError::ProtocolViolation(format!("bad header: {:?}", line))
            })?;
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
        Ok(ResponseHead { status, headers })
    }

    /// Bytes currently buffered, up to `limit`; fills from the socket when
    /// empty. `None` on EOF.
    async fn next_buffered(&mut self, limit: usize) -> Result<Option<Bytes>, TransportError> {
        if self.buf.is_empty() && !self.fill().await? {
            return Ok(None);
        }
        let take = self.buf.len().min(limit);
        Ok(Some(self.buf.split_to(take).freeze()))
    }

    /// Consume exactly `n` bytes (chunk-terminating CRLFs).
    async fn discard(&mut self, mut n: usize) -> Result<(), TransportError> {
        while n > 0 {
            if self.buf.is_empty() && !self.fill().await? {
                return Err(TransportError::ConnectionReset);
            }
            let take = self.buf.len().min(n);
            let _ = self.buf.split_to(take);
            n -= take;
        }
        Ok(())
    }
}

/// How the response body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    Empty,
    ContentLength(u64),
    Chunked,
    UntilEof,
}

impl BodyFraming {
    pub fn for_head(head: &ResponseHead) -> Result<Self, TransportError> {
        if head.status == 204 || head.status == 304 {
            return Ok(BodyFraming::Empty);
        }
        if let Some(te) = head.header("transfer-encoding") {
            if te.eq_ignore_ascii_case("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            return Err(TransportError::ProtocolViolation(format!(
                "unsupported transfer encoding: {}",
                te
            )));
        }
        if let Some(len) = head.header("content-length") {
            let len = len.parse::<u64>().map_err(|_| {
                TransportError::ProtocolViolation(format!("bad content-length: {:?}", len))
            })?;
            return Ok(if len == 0 {
                BodyFraming::Empty
            } else {
                BodyFraming::ContentLength(len)
            });
        }
        Ok(BodyFraming::UntilEof)
    }
}

/// Incremental body reader driving a [`Connection`] according to its
/// [`BodyFraming`]. Used both to collect unary bodies and to feed
/// streaming sessions chunk by chunk.
pub(crate) struct BodyReader {
    framing: BodyFraming,
    /// Bytes left in the current chunk (chunked) or in the whole body
    /// (content-length).
    remaining: u64,
    /// A chunk-data CRLF still has to be consumed before the next size line.
    pending_crlf: bool,
    done: bool,
}

impl BodyReader {
    pub fn new(framing: BodyFraming) -> Self {
        let (remaining, done) = match framing {
            BodyFraming::Empty => (0, true),
            BodyFraming::ContentLength(n) => (n, false),
            BodyFraming::Chunked | BodyFraming::UntilEof => (0, false),
        };
        Self {
            framing,
            remaining,
            pending_crlf: false,
            done,
        }
    }

    /// Next slice of body bytes; `None` once the body has cleanly ended.
    /// A connection drop before that is `ConnectionReset` (except for
    /// `UntilEof` framing, where EOF is the clean end).
    pub async fn next(&mut self, conn: &mut Connection) -> Result<Option<Bytes>, TransportError> {
        if self.done {
            return Ok(None);
        }
        match self.framing {
            BodyFraming::Empty => Ok(None),
            BodyFraming::UntilEof => {
                match conn.next_buffered(usize::MAX).await? {
                    Some(bytes) => Ok(Some(bytes)),
                    None => {
                        self.done = true;
                        Ok(None)
                    }
                }
            }
            BodyFraming::ContentLength(_) => {
                let take = usize::try_from(self.remaining).unwrap_or(usize::MAX);
                match conn.next_buffered(take).await? {
                    Some(bytes) => {
                        self.remaining -= bytes.len() as u64;
                        if self.remaining == 0 {
                            self.done = true;
                        }
                        Ok(Some(bytes))
                    }
                    None => Err(TransportError::ConnectionReset),
                }
            }
            BodyFraming::Chunked => self.next_chunked(conn).await,
        }
    }

    async fn next_chunked(
        &mut self,
        conn: &mut Connection,
    ) -> Result<Option<Bytes>, TransportError> {
        if self.remaining == 0 {
            if self.pending_crlf {
                conn.discard(2).await?;
                self.pending_crlf = false;
            }
            let size_line = conn.read_line().await?;
            let size_field = size_line.split(';').next().unwrap_or_default().trim();
            let size = u64::from_str_radix(size_field, 16).map_err(|_| {
                TransportError::ProtocolViolation(format!("bad chunk size: {:?}", size_line))
            })?;
            if size == 0 {
                // Trailer section: consume lines through the blank one.
                loop {
                    if conn.read_line().await?.is_empty() {
                        break;
                    }
                }
                self.done = true;
                return Ok(None);
            }
            self.remaining = size;
        }
        let take = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        match conn.next_buffered(take).await? {
            Some(bytes) => {
                self.remaining -= bytes.len() as u64;
                if self.remaining == 0 {
                    self.pending_crlf = true;
                }
                Ok(Some(bytes))
            }
            None => Err(TransportError::ConnectionReset),
        }
    }

    /// Collect the whole body (unary path).
    pub async fn collect(&mut self, conn: &mut Connection) -> Result<Bytes, TransportError> {
        let mut out = BytesMut::new();
        while let Some(bytes) = self.next(conn).await? {
            out.extend_from_slice(&bytes);
        }
        Ok(out.freeze())
    }
}
