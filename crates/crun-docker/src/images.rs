//! Image resource client.

use crate::api;
use crate::error::Result;
use crate::models::{CreateImageInfo, ImageSummary};
use crate::streams::ndjson_stream;
use crate::transport::{Request, Transport};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Progress lines of an image pull, in daemon order.
pub type PullProgressStream =
    Pin<Box<dyn Stream<Item = Result<CreateImageInfo>> + Send>>;

#[derive(Clone)]
pub struct ImageClient {
    transport: Arc<Transport>,
}

impl ImageClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /images/create?fromImage=...&tag=...` → progress stream.
    ///
    /// The stream is finite: it ends when the daemon finishes the pull.
    /// Per-layer errors arrive as progress lines with an `error` field.
    pub async fn pull(&self, reference: &str) -> Result<PullProgressStream> {
        let (image, tag) = split_reference(reference);
        let mut request = Request::post("/images/create").query("fromImage", image);
        if let Some(tag) = tag {
            request = request.query("tag", tag);
        }
        let session = api::open_stream(&self.transport, request).await?;
        Ok(ndjson_stream(session, false))
    }

    /// `GET /images/json`.
    pub async fn list(&self) -> Result<Vec<ImageSummary>> {
        api::unary_json(&self.transport, Request::get("/images/json")).await
    }

    /// `DELETE /images/{name}?force=...`.
    pub async fn remove(&self, reference: &str, force: bool) -> Result<()> {
        let request =
            Request::delete(&format!("/images/{}", reference)).query("force", force);
        api::unary_ok(&self.transport, request).await
    }

    /// Whether an image is present locally (`GET /images/{name}/json`).
    pub async fn exists(&self, reference: &str) -> Result<bool> {
        let request = Request::get(&format!("/images/{}/json", reference));
        match api::unary_ok(&self.transport, request).await {
            Ok(()) => Ok(true),
            Err(crate::error::DockerError::Api { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Split `name[:tag]`, leaving registry ports alone.
fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        // A slash after the colon means the colon was a registry port.
        Some((_, rest)) if rest.contains('/') => (reference, None),
        Some((image, tag)) => (image, Some(tag)),
        None => (reference, None),
    }
}
