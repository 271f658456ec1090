use crate::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    /// Deadline for a unary request/response round-trip.
    pub unary_timeout: Duration,
    /// Deadline for establishing a streaming session. Streams themselves
    /// have no deadline; they live until closed or the daemon ends them.
    pub stream_connect_timeout: Duration,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub queue: QueueConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            unary_timeout: Duration::from_secs(30),
            stream_connect_timeout: Duration::from_secs(60),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration for a local daemon over a Unix socket.
    pub fn unix(socket_path: &str) -> Self {
        Self {
            endpoint: Endpoint::unix(socket_path),
            ..Default::default()
        }
    }

    /// Configuration for a daemon exposed over TCP.
    pub fn tcp(host: &str, port: u16) -> Self {
        Self {
            endpoint: Endpoint::tcp(host, port),
            ..Default::default()
        }
    }

    pub fn with_unary_timeout(mut self, timeout: Duration) -> Self {
        self.unary_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of concurrent connections per endpoint.
    pub max_connections: usize,
    /// Maximum idle time before a pooled connection is evicted.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Retry/backoff configuration for idempotent transport failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first. 1 disables retries.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomized away, in [0.0, 1.0].
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// No retries; every transport failure surfaces immediately.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Same-handle contention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Operations allowed to wait behind an in-flight one, per handle.
    pub depth_limit: usize,
    /// Reject instead of queueing when a handle is busy.
    pub reject_when_busy: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            depth_limit: 16,
            reject_when_busy: false,
        }
    }
}
