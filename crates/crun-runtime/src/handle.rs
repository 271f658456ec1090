//! Client-side container handle: identifier plus cached last-known state.

use crate::state::LifecyclePhase;
use crun_types::ContainerSnapshot;

/// Cached view of one orchestrated container.
///
/// The snapshot is only ever replaced after a successful daemon
/// round-trip; no transition is applied speculatively. `recorded_retries`
/// counts the transport retries the most recent operation needed.
#[derive(Debug, Clone)]
pub struct HandleState {
    pub name: String,
    /// Daemon-assigned ID, once known.
    pub id: Option<String>,
    pub phase: LifecyclePhase,
    pub snapshot: Option<ContainerSnapshot>,
    pub last_error: Option<String>,
    pub recorded_retries: u32,
}

impl HandleState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            id: None,
            phase: LifecyclePhase::Requested,
            snapshot: None,
            last_error: None,
            recorded_retries: 0,
        }
    }

    /// Exit code from the last snapshot, when the container has exited.
    pub fn exit_code(&self) -> Option<i64> {
        self.snapshot.as_ref().and_then(|s| s.exit_code)
    }
}
