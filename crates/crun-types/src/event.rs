use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Typed daemon notification delivered by the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic within a single stream; epoch nanoseconds.
    pub timestamp: i64,
    pub event_type: EventType,
    pub action: String,
    pub actor_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl Event {
    /// Container ID for container-scoped events.
    pub fn container_id(&self) -> Option<&str> {
        match self.event_type {
            EventType::Container => self.actor_id.as_deref(),
            _ => None,
        }
    }
}

/// Daemon event families, from the wire `Type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Container,
    Image,
    Network,
    Volume,
    Daemon,
    Other(String),
}

impl From<&str> for EventType {
    fn from(kind: &str) -> Self {
        match kind {
            "container" => EventType::Container,
            "image" => EventType::Image,
            "network" => EventType::Network,
            "volume" => EventType::Volume,
            "daemon" => EventType::Daemon,
            other => EventType::Other(other.to_owned()),
        }
    }
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Container => "container",
            EventType::Image => "image",
            EventType::Network => "network",
            EventType::Volume => "volume",
            EventType::Daemon => "daemon",
            EventType::Other(kind) => kind,
        }
    }
}

/// Server-side event filter, encoded into the `filters` query parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
    pub container_ids: Vec<String>,
    pub labels: HashMap<String, String>,
}

impl EventFilter {
    pub fn container_events() -> Self {
        Self {
            event_types: vec![EventType::Container],
            ..Default::default()
        }
    }

    pub fn for_container(id: &str) -> Self {
        Self {
            event_types: vec![EventType::Container],
            container_ids: vec![id.to_owned()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.event_types.is_empty() && self.container_ids.is_empty() && self.labels.is_empty()
    }

    /// The daemon's `filters` map: criterion name to accepted values.
    pub fn to_filter_map(&self) -> HashMap<String, Vec<String>> {
        let mut map = HashMap::new();
        if !self.event_types.is_empty() {
            map.insert(
                "type".to_owned(),
                self.event_types
                    .iter()
                    .map(|t| t.as_str().to_owned())
                    .collect(),
            );
        }
        if !self.container_ids.is_empty() {
            map.insert("container".to_owned(), self.container_ids.clone());
        }
        if !self.labels.is_empty() {
            map.insert(
                "label".to_owned(),
                self.labels
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            );
        }
        map
    }
}

/// A single log line from a container, demuxed from the daemon stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub stream: LogStreamKind,
    pub message: String,
}

/// Which output stream a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamKind {
    Stdout,
    Stderr,
}

/// Options for a log read.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Number of trailing lines, or all when `None`.
    pub tail: Option<usize>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
        }
    }
}

impl LogOptions {
    pub fn follow() -> Self {
        Self {
            follow: true,
            ..Default::default()
        }
    }
}
