//! System endpoints: version and liveness.

use crate::api;
use crate::error::{DockerError, Result};
use crate::models::SystemVersion;
use crate::transport::{Request, Transport};
use std::sync::Arc;

#[derive(Clone)]
pub struct SystemClient {
    transport: Arc<Transport>,
}

impl SystemClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `GET /version`.
    pub async fn version(&self) -> Result<SystemVersion> {
        api::unary_json(&self.transport, Request::get("/version")).await
    }

    /// `GET /_ping`. The daemon answers a bare `OK`.
    pub async fn ping(&self) -> Result<()> {
        let response = self.transport.send(Request::get("/_ping")).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(DockerError::api(
                response.status,
                String::from_utf8_lossy(&response.body).into_owned(),
            ))
        }
    }
}
