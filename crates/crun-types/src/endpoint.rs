use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default daemon socket, matching the Docker CLI.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Connection descriptor for a daemon endpoint.
///
/// Immutable once a transport is constructed from it. The Unix form is the
/// primary one; TCP is accepted for daemons exposed over the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endpoint {
    Unix { socket_path: String },
    Tcp { host: String, port: u16 },
}

#[derive(Debug, Error)]
pub enum EndpointParseError {
    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid tcp endpoint: {0}")]
    InvalidTcp(String),
}

impl Endpoint {
    /// Endpoint for the local daemon socket.
    pub fn local() -> Self {
        Endpoint::unix(DEFAULT_SOCKET_PATH)
    }

    pub fn unix(socket_path: &str) -> Self {
        Endpoint::Unix {
            socket_path: socket_path.to_owned(),
        }
    }

    pub fn tcp(host: &str, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.to_owned(),
            port,
        }
    }

    /// Parse a `unix://` or `tcp://` endpoint string. A bare path is
    /// treated as a Unix socket path.
    pub fn parse(s: &str) -> Result<Self, EndpointParseError> {
        if let Some(path) = s.strip_prefix("unix://") {
            return Ok(Endpoint::unix(path));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EndpointParseError::InvalidTcp(addr.to_owned()))?;
            let port = port
                .parse::<u16>()
                .map_err(|_| EndpointParseError::InvalidTcp(addr.to_owned()))?;
            return Ok(Endpoint::tcp(host, port));
        }
        if s.starts_with('/') {
            return Ok(Endpoint::unix(s));
        }
        let scheme = s.split("://").next().unwrap_or(s);
        Err(EndpointParseError::UnsupportedScheme(scheme.to_owned()))
    }

    /// Value for the HTTP Host header. The engine requires one even over
    /// a Unix socket; `localhost` is the conventional placeholder there.
    pub fn host_header(&self) -> String {
        match self {
            Endpoint::Unix { .. } => "localhost".to_owned(),
            Endpoint::Tcp { host, port } => format!("{}:{}", host, port),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::local()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix { socket_path } => write!(f, "unix://{}", socket_path),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
        }
    }
}
