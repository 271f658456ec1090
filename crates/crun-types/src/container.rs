use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Container specification for creation.
///
/// Immutable input value; translated into the wire-format create body by
/// the container client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub environment: HashMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortMapping>,
    pub labels: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub restart_policy: RestartPolicy,
    /// Hard memory limit in bytes, 0 for unlimited.
    pub memory_limit: i64,
    /// CPU quota in units of 1e-9 CPUs, 0 for unlimited.
    pub nano_cpus: i64,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            image: String::new(),
            command: None,
            environment: HashMap::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            labels: HashMap::new(),
            working_dir: None,
            user: None,
            restart_policy: RestartPolicy::No,
            memory_limit: 0,
            nano_cpus: 0,
        }
    }
}

impl ContainerSpec {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_owned(),
            image: image.to_owned(),
            ..Default::default()
        }
    }

    // Builder-style methods for fluent construction
    pub fn with_command(mut self, cmd: Vec<String>) -> Self {
        self.command = Some(cmd);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn with_port_mapping(mut self, host_port: u16, container_port: u16) -> Self {
        self.ports.push(PortMapping {
            host_port,
            container_port,
            protocol: Protocol::Tcp,
            host_ip: None,
        });
        self
    }

    pub fn with_volume_mount(mut self, source: &str, target: &str) -> Self {
        self.volumes.push(VolumeMount {
            source: source.to_owned(),
            target: target.to_owned(),
            read_only: false,
            mount_type: MountType::Bind,
        });
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn with_restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    /// Environment in the `KEY=value` form the wire format expects.
    pub fn env_strings(&self) -> Vec<String> {
        let mut env: Vec<String> = self
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();
        env
    }
}

/// Volume mount specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
    pub mount_type: MountType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

/// Port mapping specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_ip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Container restart policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure { max_retry_count: Option<u32> },
    UnlessStopped,
}

impl RestartPolicy {
    pub fn wire_name(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure { .. } => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Daemon-reported container status, as parsed from an inspect response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited(i64),
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    pub fn exit_code(&self) -> Option<i64> {
        match self {
            ContainerStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Removing => write!(f, "removing"),
            ContainerStatus::Exited(code) => write!(f, "exited({})", code),
            ContainerStatus::Dead => write!(f, "dead"),
            ContainerStatus::Unknown(status) => write!(f, "unknown({})", status),
        }
    }
}

/// Last-known container state, captured from a successful inspect
/// round-trip. Never synthesized client-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Epoch nanoseconds, from the daemon's RFC3339 StartedAt.
    pub started_at: Option<i64>,
    /// Epoch nanoseconds, from the daemon's RFC3339 FinishedAt.
    pub finished_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builder_collects_fields() {
        let spec = ContainerSpec::new("web-1", "nginx:latest")
            .with_command(vec!["nginx".into(), "-g".into(), "daemon off;".into()])
            .with_env("TZ", "UTC")
            .with_port_mapping(8080, 80)
            .with_volume_mount("/srv/www", "/usr/share/nginx/html")
            .with_restart_policy(RestartPolicy::UnlessStopped);

        assert_eq!(spec.name, "web-1");
        assert_eq!(spec.image, "nginx:latest");
        assert_eq!(spec.ports.len(), 1);
        assert_eq!(spec.volumes.len(), 1);
        assert_eq!(spec.env_strings(), vec!["TZ=UTC".to_owned()]);
        assert_eq!(spec.restart_policy.wire_name(), "unless-stopped");
    }

    #[test]
    fn env_strings_are_sorted() {
        let spec = ContainerSpec::new("c", "img")
            .with_env("B", "2")
            .with_env("A", "1");
        assert_eq!(spec.env_strings(), vec!["A=1".to_owned(), "B=2".to_owned()]);
    }

    #[test]
    fn spec_serde_round_trip() {
        let spec = ContainerSpec::new("web-1", "alpine:3.19")
            .with_env("TZ", "UTC")
            .with_restart_policy(RestartPolicy::OnFailure {
                max_retry_count: Some(3),
            });
        let json = serde_json::to_string(&spec).unwrap();
        let back: ContainerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, spec.name);
        assert_eq!(back.restart_policy, spec.restart_policy);
        assert_eq!(back.environment, spec.environment);
    }

    #[test]
    fn status_display_and_exit_code() {
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Exited(137).to_string(), "exited(137)");
        assert_eq!(ContainerStatus::Exited(137).exit_code(), Some(137));
        assert!(ContainerStatus::Running.exit_code().is_none());
    }
}
