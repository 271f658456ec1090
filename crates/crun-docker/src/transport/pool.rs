//! Connection pooling for daemon sockets.
//!
//! Pooled connections are keyed by endpoint, created lazily, bounded by a
//! semaphore and evicted once idle past the configured timeout. A
//! connection goes back into the pool only when its owner proves the
//! response was fully drained; streaming sessions keep theirs until
//! closed.

use super::conn::Connection;
use crate::error::TransportError;
use crun_types::{Endpoint, PoolConfig};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub(crate) struct ConnectionPool {
    config: PoolConfig,
    idle: DashMap<Endpoint, Vec<Connection>>,
    permits: Arc<Semaphore>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            idle: DashMap::new(),
            permits,
        }
    }

    /// Borrow a connection for `endpoint`, reusing an idle one when a
    /// fresh enough candidate exists.
    pub async fn checkout(&self, endpoint: &Endpoint) -> Result<PooledConnection, TransportError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportError::ProtocolViolation("connection pool closed".to_owned()))?;

        let reused = self.pop_idle(endpoint);
        let conn = match reused {
            Some(conn) => {
                debug!("reusing pooled connection to {}", endpoint);
                conn
            }
            None => Connection::connect(endpoint).await?,
        };

        Ok(PooledConnection {
            conn,
            endpoint: endpoint.clone(),
            permit,
        })
    }

    fn pop_idle(&self, endpoint: &Endpoint) -> Option<Connection> {
        let mut entry = self.idle.get_mut(endpoint)?;
        let now = Instant::now();
        // Evict connections idle past the deadline before picking one.
        entry.retain(|c| now.duration_since(c.last_used) <= self.config.idle_timeout);
        entry.pop()
    }

    /// Return a drained connection for reuse. Callers drop (never return)
    /// errored or mid-stream connections.
    pub fn checkin(&self, endpoint: &Endpoint, mut conn: Connection) {
        if !conn.is_drained() {
            debug!("discarding connection to {} with unread bytes", endpoint);
            return;
        }
        conn.last_used = Instant::now();
        self.idle.entry(endpoint.clone()).or_default().push(conn);
    }

}

/// A connection borrowed from the pool. Holds a pool permit for its whole
/// lifetime, so open streams count against the connection limit. Dropping
/// it discards the socket and frees the permit.
pub(crate) struct PooledConnection {
    conn: Connection,
    endpoint: Endpoint,
    permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn conn(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Dismantle for a streaming session, which owns the socket (and the
    /// permit) until it is closed.
    pub fn take_parts(self) -> (Connection, OwnedSemaphorePermit) {
        (self.conn, self.permit)
    }

    /// Finish a unary exchange, handing the connection back when safe.
    pub fn finish(self, pool: &ConnectionPool, reusable: bool) {
        if reusable {
            pool.checkin(&self.endpoint, self.conn);
        }
    }
}
