//! Container resource client.
//!
//! Stateless façade over the transport: one method per daemon endpoint,
//! no retries, errors surfaced verbatim. Also owns the translation
//! between [`ContainerSpec`]/[`ContainerSnapshot`] values and the wire
//! models.

use crate::api;
use crate::codec;
use crate::error::{DockerError, Result};
use crate::models::{
    ContainerCreateBody, ContainerCreateResponse, ContainerInspectResponse, ContainerSummary,
    ContainerWaitResponse, HostConfig, PortBinding, RestartPolicy,
};
use crate::transport::{Request, Transport};
use crun_types::{ContainerSnapshot, ContainerSpec, ContainerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ContainerClient {
    transport: Arc<Transport>,
}

impl ContainerClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// `POST /containers/create?name=...` → container ID.
    ///
    /// A name conflict surfaces as `ApiError { status: 409 }`; resolving
    /// it to the existing container is the orchestrator's job.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let body = codec::encode(&create_body(spec))?;
        let request = Request::post("/containers/create")
            .query("name", &spec.name)
            .json_body(body);
        let response: ContainerCreateResponse =
            api::unary_json(&self.transport, request).await?;
        Ok(response.id)
    }

    /// `GET /containers/{id}/json` → state snapshot.
    pub async fn inspect(&self, id: &str) -> Result<ContainerSnapshot> {
        let request = Request::get(&format!("/containers/{}/json", id));
        let inspect: ContainerInspectResponse =
            api::unary_json(&self.transport, request).await?;
        snapshot_from_inspect(inspect)
    }

    /// `POST /containers/{id}/start`. Already-started (304) is success.
    pub async fn start(&self, id: &str) -> Result<()> {
        let request = Request::post(&format!("/containers/{}/start", id));
        api::unary_ok_allowing(&self.transport, request, &[304]).await
    }

    /// `POST /containers/{id}/stop?t=...`. Already-stopped (304) is success.
    pub async fn stop(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        let mut request = Request::post(&format!("/containers/{}/stop", id));
        if let Some(timeout) = timeout {
            request = request.query("t", timeout.as_secs());
        }
        api::unary_ok_allowing(&self.transport, request, &[304]).await
    }

    /// `POST /containers/{id}/restart?t=...`.
    pub async fn restart(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        let mut request = Request::post(&format!("/containers/{}/restart", id));
        if let Some(timeout) = timeout {
            request = request.query("t", timeout.as_secs());
        }
        api::unary_ok(&self.transport, request).await
    }

    /// `DELETE /containers/{id}?force=...&v=...`.
    pub async fn remove(&self, id: &str, force: bool, volumes: bool) -> Result<()> {
        let request = Request::delete(&format!("/containers/{}", id))
            .query("force", force)
            .query("v", volumes);
        api::unary_ok(&self.transport, request).await
    }

    /// `POST /containers/{id}/wait` → exit status. Blocks until the
    /// container exits; `deadline` of `None` waits indefinitely.
    pub async fn wait(&self, id: &str, deadline: Option<Duration>) -> Result<i64> {
        let mut request = Request::post(&format!("/containers/{}/wait", id));
        request = match deadline {
            Some(d) => request.with_timeout(d),
            None => request.no_timeout(),
        };
        let response: ContainerWaitResponse = api::unary_json(&self.transport, request).await?;
        if let Some(error) = response.error {
            if let Some(message) = error.message.filter(|m| !m.is_empty()) {
                return Err(DockerError::api(500, message));
            }
        }
        Ok(response.status_code)
    }

    /// `GET /containers/json`.
    pub async fn list(&self, all: bool, name_filter: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut request = Request::get("/containers/json").query("all", all);
        if let Some(name) = name_filter {
            let mut filters: HashMap<&str, Vec<&str>> = HashMap::new();
            filters.insert("name", vec![name]);
            let encoded = serde_json::to_string(&filters)
                .map_err(|e| DockerError::Codec(crate::error::CodecError::SchemaMismatch(e.to_string())))?;
            request = request.query("filters", encoded);
        }
        api::unary_json(&self.transport, request).await
    }

    /// Whether a container exists, by id or name.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        match self.inspect(id).await {
            Ok(_) => Ok(true),
            Err(DockerError::Api { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Translate a spec into the create body.
fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|m| {
            if m.read_only {
                format!("{}:{}:ro", m.source, m.target)
            } else {
                format!("{}:{}", m.source, m.target)
            }
        })
        .collect();

    let mut port_bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
    let mut exposed_ports: HashMap<String, serde_json::Value> = HashMap::new();
    for mapping in &spec.ports {
        let key = format!("{}/{}", mapping.container_port, mapping.protocol.as_str());
        exposed_ports.insert(key.clone(), serde_json::json!({}));
        port_bindings.entry(key).or_default().push(PortBinding {
            host_ip: mapping.host_ip.clone(),
            host_port: Some(mapping.host_port.to_string()),
        });
    }

    let restart_policy = RestartPolicy {
        name: Some(spec.restart_policy.wire_name().to_owned()),
        maximum_retry_count: match &spec.restart_policy {
            crun_types::RestartPolicy::OnFailure { max_retry_count } => {
                max_retry_count.map(i64::from)
            }
            _ => None,
        },
    };

    ContainerCreateBody {
        image: spec.image.clone(),
        cmd: spec.command.clone(),
        env: Some(spec.env_strings()).filter(|e| !e.is_empty()),
        working_dir: spec.working_dir.clone(),
        user: spec.user.clone(),
        labels: Some(spec.labels.clone()).filter(|l| !l.is_empty()),
        exposed_ports: Some(exposed_ports).filter(|p| !p.is_empty()),
        host_config: Some(HostConfig {
            binds: Some(binds).filter(|b| !b.is_empty()),
            memory: Some(spec.memory_limit).filter(|&m| m > 0),
            nano_cpus: Some(spec.nano_cpus).filter(|&n| n > 0),
            port_bindings: Some(port_bindings).filter(|p| !p.is_empty()),
            restart_policy: Some(restart_policy),
            auto_remove: None,
        }),
    }
}

/// Build a snapshot from an inspect response. The snapshot is only ever
/// produced from a successful daemon round-trip, never synthesized.
fn snapshot_from_inspect(inspect: ContainerInspectResponse) -> Result<ContainerSnapshot> {
    let id = inspect.id.ok_or_else(|| {
        DockerError::Codec(crate::error::CodecError::SchemaMismatch(
            "inspect response missing Id".to_owned(),
        ))
    })?;
    let state = inspect.state.unwrap_or_default();
    let status = parse_status(&state);

    let started_at = parse_optional_time(state.started_at.as_deref())?;
    let finished_at = parse_optional_time(state.finished_at.as_deref())?;

    Ok(ContainerSnapshot {
        id,
        // The daemon reports names with a leading slash.
        name: inspect
            .name
            .map(|n| n.trim_start_matches('/').to_owned())
            .unwrap_or_default(),
        image: inspect
            .config
            .and_then(|c| c.image)
            .or(inspect.image)
            .unwrap_or_default(),
        exit_code: state.exit_code,
        error: state.error.filter(|e| !e.is_empty()),
        status,
        started_at,
        finished_at,
    })
}

fn parse_optional_time(raw: Option<&str>) -> Result<Option<i64>> {
    match raw {
        Some(s) if !codec::is_zero_timestamp(s) => Ok(Some(codec::parse_timestamp(s)?)),
        _ => Ok(None),
    }
}

fn parse_status(state: &crate::models::ContainerState) -> ContainerStatus {
    match state.status.as_deref() {
        Some("created") => ContainerStatus::Created,
        Some("running") => ContainerStatus::Running,
        Some("paused") => ContainerStatus::Paused,
        Some("restarting") => ContainerStatus::Restarting,
        Some("removing") => ContainerStatus::Removing,
        Some("exited") => ContainerStatus::Exited(state.exit_code.unwrap_or(0)),
        Some("dead") => ContainerStatus::Dead,
        Some(other) => ContainerStatus::Unknown(other.to_owned()),
        None => ContainerStatus::Unknown("missing".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerState;

    #[test]
    fn create_body_carries_spec_fields() {
        let spec = ContainerSpec::new("web-1", "alpine:3.19")
            .with_command(vec!["echo".into(), "hi".into()])
            .with_env("TZ", "UTC")
            .with_port_mapping(8080, 80)
            .with_volume_mount("/srv", "/data");

        let body = create_body(&spec);
        assert_eq!(body.image, "alpine:3.19");
        assert_eq!(body.cmd.as_deref(), Some(&["echo".to_owned(), "hi".to_owned()][..]));
        assert_eq!(body.env.as_deref(), Some(&["TZ=UTC".to_owned()][..]));

        let host = body.host_config.unwrap();
        assert_eq!(host.binds.as_deref(), Some(&["/srv:/data".to_owned()][..]));
        let bindings = host.port_bindings.unwrap();
        assert_eq!(
            bindings["80/tcp"][0].host_port.as_deref(),
            Some("8080")
        );
    }

    #[test]
    fn empty_collections_are_omitted_from_create_body() {
        let body = create_body(&ContainerSpec::new("c", "img"));
        assert!(body.env.is_none());
        assert!(body.labels.is_none());
        assert!(body.exposed_ports.is_none());
        let host = body.host_config.unwrap();
        assert!(host.binds.is_none());
        assert!(host.memory.is_none());
    }

    #[test]
    fn snapshot_parses_exited_state() {
        let inspect = ContainerInspectResponse {
            id: Some("deadbeef".to_owned()),
            name: Some("/web-1".to_owned()),
            state: Some(ContainerState {
                status: Some("exited".to_owned()),
                exit_code: Some(3),
                started_at: Some("2024-05-01T10:00:00.5Z".to_owned()),
                finished_at: Some("0001-01-01T00:00:00Z".to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let snapshot = snapshot_from_inspect(inspect).unwrap();
        assert_eq!(snapshot.name, "web-1");
        assert_eq!(snapshot.status, ContainerStatus::Exited(3));
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at.is_none());
    }

    #[test]
    fn snapshot_requires_id() {
        let err = snapshot_from_inspect(ContainerInspectResponse::default()).unwrap_err();
        assert!(matches!(err, DockerError::Codec(_)));
    }
}
