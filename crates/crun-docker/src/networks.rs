//! Network resource client.

use crate::api;
use crate::codec;
use crate::error::Result;
use crate::models::{IdResponse, Network, NetworkCreateRequest};
use crate::transport::{Request, Transport};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct NetworkClient {
    transport: Arc<Transport>,
}

impl NetworkClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /networks/create` → network ID.
    pub async fn create(
        &self,
        name: &str,
        driver: Option<&str>,
        labels: HashMap<String, String>,
    ) -> Result<String> {
        let body = NetworkCreateRequest {
            name: name.to_owned(),
            driver: driver.map(str::to_owned),
            labels: Some(labels).filter(|l| !l.is_empty()),
        };
        let request = Request::post("/networks/create").json_body(codec::encode(&body)?);
        let response: IdResponse = api::unary_json(&self.transport, request).await?;
        Ok(response.id)
    }

    /// `GET /networks/{id}`.
    pub async fn inspect(&self, id: &str) -> Result<Network> {
        api::unary_json(&self.transport, Request::get(&format!("/networks/{}", id))).await
    }

    /// `GET /networks`.
    pub async fn list(&self) -> Result<Vec<Network>> {
        api::unary_json(&self.transport, Request::get("/networks")).await
    }

    /// `DELETE /networks/{id}`.
    pub async fn remove(&self, id: &str) -> Result<()> {
        api::unary_ok(&self.transport, Request::delete(&format!("/networks/{}", id))).await
    }
}
