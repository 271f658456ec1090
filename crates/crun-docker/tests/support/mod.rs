//! In-process fake daemon for integration tests.
//!
//! Binds a Unix socket in a scratch directory and serves scripted HTTP
//! responses, including chunked streams, hangs and connection drops, so
//! transport and client behavior can be exercised without Docker.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug)]
pub struct ParsedRequest {
    pub method: String,
    /// Path plus query, exactly as sent.
    pub target: String,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("")
    }

    pub fn query_contains(&self, needle: &str) -> bool {
        self.target
            .split_once('?')
            .is_some_and(|(_, q)| q.contains(needle))
    }
}

/// What the daemon does with one request.
pub enum Reply {
    /// JSON body with Content-Length framing.
    Json { status: u16, body: String },
    /// Status only, empty body.
    Status(u16),
    /// Standard daemon error envelope.
    Error { status: u16, message: String },
    /// Chunked response; `clean_end` writes the terminating zero chunk,
    /// otherwise the connection drops mid-stream.
    Chunked {
        status: u16,
        chunks: Vec<Vec<u8>>,
        clean_end: bool,
    },
    /// Never answer (for timeout and cancellation tests).
    Hang,
    /// Close the socket without answering (connection reset).
    DropConnection,
}

pub type Handler = Arc<dyn Fn(&ParsedRequest) -> Reply + Send + Sync>;

pub struct FakeDaemon {
    pub socket_path: PathBuf,
    pub connections: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
}

impl FakeDaemon {
    pub async fn start(handler: Handler) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind fake daemon socket");
        let connections = Arc::new(AtomicUsize::new(0));

        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(stream, handler.clone()));
            }
        });

        Self {
            socket_path,
            connections,
            _dir: dir,
        }
    }

    pub fn socket(&self) -> &str {
        self.socket_path.to_str().expect("utf-8 socket path")
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve_connection(mut stream: UnixStream, handler: Handler) {
    loop {
        let Some(request) = read_request(&mut stream).await else {
            return;
        };
        match handler(&request) {
            Reply::Json { status, body } => {
                if write_sized(&mut stream, status, "application/json", body.as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Reply::Status(status) => {
                if write_sized(&mut stream, status, "application/json", b"")
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Reply::Error { status, message } => {
                let body = format!("{{\"message\":{}}}", serde_json::to_string(&message).unwrap());
                if write_sized(&mut stream, status, "application/json", body.as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Reply::Chunked {
                status,
                chunks,
                clean_end,
            } => {
                let head = format!(
                    "HTTP/1.1 {} {}\r\nTransfer-Encoding: chunked\r\n\r\n",
                    status,
                    reason(status)
                );
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in chunks {
                    let framed = format!("{:x}\r\n", chunk.len());
                    if stream.write_all(framed.as_bytes()).await.is_err()
                        || stream.write_all(&chunk).await.is_err()
                        || stream.write_all(b"\r\n").await.is_err()
                    {
                        return;
                    }
                    let _ = stream.flush().await;
                }
                if !clean_end {
                    return;
                }
                if stream.write_all(b"0\r\n\r\n").await.is_err() {
                    return;
                }
            }
            Reply::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                return;
            }
            Reply::DropConnection => return,
        }
    }
}

async fn write_sized(
    stream: &mut UnixStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        status,
        reason(status),
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Read one request off the socket; `None` when the client closed it.
async fn read_request(stream: &mut UnixStream) -> Option<ParsedRequest> {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let target = parts.next()?.to_owned();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => body.extend_from_slice(&tmp[..n]),
        }
    }
    body.truncate(content_length);

    Some(ParsedRequest {
        method,
        target,
        body,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Frame a multiplexed log record the way the daemon does: selector,
/// three reserved bytes, big-endian length, payload.
pub fn log_frame(selector: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![selector, 0, 0, 0];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
