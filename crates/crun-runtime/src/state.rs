//! Container lifecycle state machine.
//!
//! Phases advance only on daemon-derived observations; a mutating call's
//! bare success never moves the machine. [`advance`] is pure over
//! (current phase, observation), which keeps every transition unit
//! testable without a daemon.

use crun_types::ContainerStatus;
use thiserror::Error;

/// Terminal failure classification attached to [`LifecyclePhase::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport retries exhausted; the daemon could not be reached.
    Unreachable,
    /// The daemon rejected a request (or reported a state no transition
    /// accepts); retrying without change would not help.
    Rejected,
    /// The caller's cancellation token fired mid-operation.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Unreachable => write!(f, "unreachable"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Orchestration phase of one container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Requested,
    Creating,
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Removing,
    Gone,
    Failed(FailureKind),
}

impl LifecyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Gone | LifecyclePhase::Failed(_))
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecyclePhase::Requested => write!(f, "requested"),
            LifecyclePhase::Creating => write!(f, "creating"),
            LifecyclePhase::Created => write!(f, "created"),
            LifecyclePhase::Starting => write!(f, "starting"),
            LifecyclePhase::Running => write!(f, "running"),
            LifecyclePhase::Stopping => write!(f, "stopping"),
            LifecyclePhase::Stopped => write!(f, "stopped"),
            LifecyclePhase::Removing => write!(f, "removing"),
            LifecyclePhase::Gone => write!(f, "gone"),
            LifecyclePhase::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// A daemon-derived fact a transition can react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// A confirming inspect returned this status.
    Inspected(ContainerStatus),
    /// The wait endpoint reported process exit.
    WaitExited { exit_code: i64 },
    /// A confirming inspect answered 404.
    InspectGone,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("no transition from {phase} on {observed}")]
pub struct TransitionError {
    pub phase: String,
    pub observed: String,
}

fn unexpected(phase: LifecyclePhase, observation: &Observation) -> TransitionError {
    TransitionError {
        phase: phase.to_string(),
        observed: format!("{:?}", observation),
    }
}

/// Next phase for (current phase, observation).
///
/// `Creating` accepts created, running and exited statuses because an
/// idempotent create may resolve onto an existing container in any of
/// those states. `Starting` accepts exited so a process that ran to
/// completion before the confirming inspect lands in `Stopped` with its
/// exit code, not in a failure.
pub fn advance(
    phase: LifecyclePhase,
    observation: &Observation,
) -> Result<LifecyclePhase, TransitionError> {
    use LifecyclePhase::*;

    if let Observation::WaitExited { .. } = observation {
        return match phase {
            Created | Starting | Running | Stopping | Stopped => Ok(Stopped),
            _ => Err(unexpected(phase, observation)),
        };
    }

    match (phase, observation) {
        (Creating, Observation::Inspected(status)) => match status {
            ContainerStatus::Created => Ok(Created),
            ContainerStatus::Running => Ok(Running),
            ContainerStatus::Exited(_) => Ok(Stopped),
            _ => Err(unexpected(phase, observation)),
        },
        (Starting, Observation::Inspected(status)) => match status {
            ContainerStatus::Running => Ok(Running),
            ContainerStatus::Exited(_) => Ok(Stopped),
            _ => Err(unexpected(phase, observation)),
        },
        (Stopping, Observation::Inspected(status)) => match status {
            // A created-but-never-started container is already at rest.
            ContainerStatus::Exited(_) | ContainerStatus::Created => Ok(Stopped),
            _ => Err(unexpected(phase, observation)),
        },
        // Refreshing the snapshot of a stopped container (final inspect
        // after wait) keeps it stopped.
        (Stopped, Observation::Inspected(ContainerStatus::Exited(_))) => Ok(Stopped),
        (Removing, Observation::InspectGone) => Ok(Gone),
        _ => Err(unexpected(phase, observation)),
    }
}
