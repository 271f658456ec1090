//! Volume resource client.

use crate::api;
use crate::codec;
use crate::error::Result;
use crate::models::{Volume, VolumeCreateOptions, VolumeListResponse};
use crate::transport::{Request, Transport};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct VolumeClient {
    transport: Arc<Transport>,
}

impl VolumeClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /volumes/create`.
    pub async fn create(
        &self,
        name: &str,
        driver: Option<&str>,
        labels: HashMap<String, String>,
    ) -> Result<Volume> {
        let body = VolumeCreateOptions {
            name: name.to_owned(),
            driver: driver.map(str::to_owned),
            labels: Some(labels).filter(|l| !l.is_empty()),
        };
        let request = Request::post("/volumes/create").json_body(codec::encode(&body)?);
        api::unary_json(&self.transport, request).await
    }

    /// `GET /volumes/{name}`.
    pub async fn inspect(&self, name: &str) -> Result<Volume> {
        api::unary_json(&self.transport, Request::get(&format!("/volumes/{}", name))).await
    }

    /// `GET /volumes`.
    pub async fn list(&self) -> Result<Vec<Volume>> {
        let response: VolumeListResponse =
            api::unary_json(&self.transport, Request::get("/volumes")).await?;
        Ok(response.volumes)
    }

    /// `DELETE /volumes/{name}?force=...`.
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let request =
            Request::delete(&format!("/volumes/{}", name)).query("force", force);
        api::unary_ok(&self.transport, request).await
    }
}
