//! Hand-written HTTP/1.1 transport to the daemon.
//!
//! Exposes unary request/response via [`Transport::send`] and streaming
//! (chunked or read-to-EOF) sessions via [`Transport::open`]. Bodies are
//! opaque bytes here; JSON belongs to the codec layer above.

mod conn;
mod pool;

use crate::error::TransportError;
use bytes::Bytes;
use conn::{BodyFraming, BodyReader, Connection};
use crun_types::{ClientConfig, Endpoint};
use pool::ConnectionPool;
use std::time::Duration;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

pub use conn::ResponseHead;

/// HTTP methods the engine API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

/// A fully-formed daemon request: path, query, and an opaque byte body
/// produced by the codec.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    content_type: Option<&'static str>,
    /// Overrides the transport's default unary deadline. `Some(None)`
    /// disables the deadline entirely (container wait).
    timeout: Option<Option<Duration>>,
}

impl Request {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_owned(),
            query: Vec::new(),
            body: None,
            content_type: None,
            timeout: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    pub fn json_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self.content_type = Some("application/json");
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(Some(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.timeout = Some(None);
        self
    }

    /// Request target including the encoded query string.
    fn target(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_query_component(k), encode_query_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.path, query)
    }

    /// Serialize the request head. The engine requires a Host header even
    /// over a Unix socket.
    fn head(&self, host: &str) -> String {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method.as_str(), self.target());
        head.push_str(&format!("Host: {}\r\n", host));
        head.push_str("Accept: application/json\r\n");
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {}\r\n", content_type));
        }
        let body_len = self.body.as_ref().map_or(0, Bytes::len);
        if body_len > 0 || self.method == Method::Post {
            head.push_str(&format!("Content-Length: {}\r\n", body_len));
        }
        head.push_str("\r\n");
        head
    }
}

/// Percent-encode a query component, leaving RFC 3986 unreserved bytes.
fn encode_query_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// A complete unary response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Transport to one daemon endpoint.
///
/// Cheap to share behind an `Arc`; unary calls may run concurrently over
/// distinct pooled connections.
pub struct Transport {
    endpoint: Endpoint,
    pool: ConnectionPool,
    unary_timeout: Duration,
    stream_connect_timeout: Duration,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            pool: ConnectionPool::new(config.pool.clone()),
            unary_timeout: config.unary_timeout,
            stream_connect_timeout: config.stream_connect_timeout,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Issue a unary request and collect the whole response.
    pub async fn send(&self, request: Request) -> Result<Response, TransportError> {
        match request.timeout {
            Some(None) => self.send_inner(request).await,
            Some(Some(deadline)) => self.send_deadline(request, deadline).await,
            None => self.send_deadline(request, self.unary_timeout).await,
        }
    }

    async fn send_deadline(
        &self,
        request: Request,
        deadline: Duration,
    ) -> Result<Response, TransportError> {
        tokio::time::timeout(deadline, self.send_inner(request))
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    async fn send_inner(&self, request: Request) -> Result<Response, TransportError> {
        let mut pooled = self.pool.checkout(&self.endpoint).await?;
        let head = request.head(&self.endpoint.host_header());

        let exchange = async {
            let conn = pooled.conn();
            conn.write_all(head.as_bytes()).await?;
            if let Some(body) = &request.body {
                conn.write_all(body).await?;
            }
            let response_head = conn.read_response_head().await?;
            let framing = BodyFraming::for_head(&response_head)?;
            let mut reader = BodyReader::new(framing);
            let body = reader.collect(conn).await?;
            Ok::<_, TransportError>((response_head, framing, body))
        };

        match exchange.await {
            Ok((response_head, framing, body)) => {
                debug!(
                    "{} {} -> {}",
                    request.method.as_str(),
                    request.path,
                    response_head.status
                );
                // A read-to-EOF body consumed the connection; everything
                // else left it clean for reuse.
                let reusable =
                    framing != BodyFraming::UntilEof && response_head.keep_alive();
                let response = Response {
                    status: response_head.status,
                    headers: response_head.headers,
                    body,
                };
                pooled.finish(&self.pool, reusable);
                Ok(response)
            }
            Err(e) => {
                // Errored connections are dropped, never repooled.
                drop(pooled);
                Err(e)
            }
        }
    }

    /// Open a streaming session. The session owns its connection
    /// exclusively until closed or the daemon ends the stream; it is
    /// never returned to the pool.
    pub async fn open(&self, request: Request) -> Result<StreamSession, TransportError> {
        let deadline = match request.timeout {
            Some(explicit) => explicit,
            None => Some(self.stream_connect_timeout),
        };
        let opening = self.open_inner(request);
        match deadline {
            Some(d) => tokio::time::timeout(d, opening)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => opening.await,
        }
    }

    async fn open_inner(&self, request: Request) -> Result<StreamSession, TransportError> {
        let mut pooled = self.pool.checkout(&self.endpoint).await?;
        let head = request.head(&self.endpoint.host_header());

        let conn = pooled.conn();
        conn.write_all(head.as_bytes()).await?;
        if let Some(body) = &request.body {
            conn.write_all(body).await?;
        }
        let response_head = conn.read_response_head().await?;
        let framing = BodyFraming::for_head(&response_head)?;
        debug!(
            "{} {} -> {} (stream)",
            request.method.as_str(),
            request.path,
            response_head.status
        );

        let (conn, permit) = pooled.take_parts();
        Ok(StreamSession {
            conn,
            reader: BodyReader::new(framing),
            head: response_head,
            _permit: permit,
        })
    }

}

/// An open streaming response.
///
/// Read-once-forward: body bytes are handed out in daemon write order and
/// never rewound. At most one reader exists by construction (`&mut self`).
/// Dropping the session closes the connection.
pub struct StreamSession {
    conn: Connection,
    reader: BodyReader,
    head: ResponseHead,
    _permit: OwnedSemaphorePermit,
}

impl StreamSession {
    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.head.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Next slice of body bytes, `None` once the stream ends cleanly.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.reader.next(&mut self.conn).await
    }

    /// Drain and collect the remaining body (used for error payloads on
    /// streaming endpoints).
    pub async fn read_remaining(&mut self) -> Result<Bytes, TransportError> {
        self.reader.collect(&mut self.conn).await
    }

    /// Close the session, dropping the underlying connection.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_encodes_query() {
        let req = Request::get("/containers/json")
            .query("all", "1")
            .query("filters", r#"{"name":["web-1"]}"#);
        assert_eq!(
            req.target(),
            "/containers/json?all=1&filters=%7B%22name%22%3A%5B%22web-1%22%5D%7D"
        );
    }

    #[test]
    fn request_head_includes_host_and_length() {
        let req = Request::post("/containers/create")
            .query("name", "web-1")
            .json_body(Bytes::from_static(b"{}"));
        let head = req.head("localhost");
        assert!(head.starts_with("POST /containers/create?name=web-1 HTTP/1.1\r\n"));
        assert!(head.contains("Host: localhost\r\n"));
        assert!(head.contains("Content-Type: application/json\r\n"));
        assert!(head.contains("Content-Length: 2\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn bodyless_post_sends_zero_length() {
        let head = Request::post("/containers/abc/start").head("localhost");
        assert!(head.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn query_component_encoding_keeps_unreserved() {
        assert_eq!(encode_query_component("alpine-3.19_x~y"), "alpine-3.19_x~y");
        assert_eq!(encode_query_component("a b"), "a%20b");
    }
}
