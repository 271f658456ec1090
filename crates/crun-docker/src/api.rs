//! Shared request/response plumbing for the resource clients.
//!
//! Every client method is the same pure translation: build request →
//! transport → codec → model or `ApiError`. Non-2xx statuses become
//! `DockerError::Api` with the daemon's own message when the error body
//! decodes.

use crate::codec;
use crate::error::{DockerError, Result};
use crate::models::ErrorResponse;
use crate::transport::{Request, Response, StreamSession, Transport};
use serde::de::DeserializeOwned;

/// Issue a unary request, expecting a 2xx JSON response.
pub(crate) async fn unary_json<T: DeserializeOwned>(
    transport: &Transport,
    request: Request,
) -> Result<T> {
    let response = transport.send(request).await?;
    check_status(&response)?;
    Ok(codec::decode(&response.body)?)
}

/// Issue a unary request where success carries no body.
pub(crate) async fn unary_ok(transport: &Transport, request: Request) -> Result<()> {
    let response = transport.send(request).await?;
    check_status(&response)?;
    Ok(())
}

/// Like [`unary_ok`], but treating the listed statuses as success too
/// (Docker answers 304 for start/stop of a container already there).
pub(crate) async fn unary_ok_allowing(
    transport: &Transport,
    request: Request,
    allowed: &[u16],
) -> Result<()> {
    let response = transport.send(request).await?;
    if allowed.contains(&response.status) {
        return Ok(());
    }
    check_status(&response)?;
    Ok(())
}

/// Open a streaming session, converting a non-2xx head into `ApiError`
/// (draining the error body for the daemon's message).
pub(crate) async fn open_stream(
    transport: &Transport,
    request: Request,
) -> Result<StreamSession> {
    let mut session = transport.open(request).await?;
    if session.is_success() {
        return Ok(session);
    }
    let status = session.status();
    let body = session.read_remaining().await.unwrap_or_default();
    Err(api_error(status, &body))
}

fn check_status(response: &Response) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(api_error(response.status, &response.body))
}

/// Map a non-2xx status and body to the error the daemon reported.
pub(crate) fn api_error(status: u16, body: &[u8]) -> DockerError {
    let message = codec::decode::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_owned());
    DockerError::Api { status, message }
}
