//! The lifecycle orchestrator.
//!
//! Drives multi-step container operations as explicit state machines:
//! every advancing transition is confirmed by an inspect round-trip,
//! idempotent transport failures are retried with capped jittered
//! backoff, operations on one handle serialize FIFO through the arena,
//! and a fired cancellation token aborts the in-flight transport call
//! and triggers best-effort cleanup of anything already created.

use crate::arena::{HandleArena, OperationPermit};
use crate::error::{OrchestratorError, Result};
use crate::handle::HandleState;
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::state::{advance, FailureKind, LifecyclePhase, Observation};
use crun_docker::{
    ContainerClient, DockerError, EventStream, EventSubscriber, ExecClient, ExecOutput,
    ImageClient, LogStream, LogStreamer, PullProgressStream, SystemClient, Transport,
};
use crun_types::{
    ClientConfig, ContainerSnapshot, ContainerSpec, EventFilter, LogOptions,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period given to the stop half of best-effort cleanup.
const CLEANUP_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Attempts to observe a container disappearing after remove.
const REMOVAL_CONFIRM_ATTEMPTS: u32 = 10;
const REMOVAL_CONFIRM_DELAY: Duration = Duration::from_millis(100);

/// Result of an orchestrated exec session.
#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

pub struct Orchestrator {
    containers: ContainerClient,
    images: ImageClient,
    execs: ExecClient,
    logs: LogStreamer,
    events: EventSubscriber,
    system: SystemClient,
    arena: HandleArena,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(config: ClientConfig) -> Self {
        let transport = Arc::new(Transport::new(&config));
        Self {
            containers: ContainerClient::new(transport.clone()),
            images: ImageClient::new(transport.clone()),
            execs: ExecClient::new(transport.clone()),
            logs: LogStreamer::new(transport.clone()),
            events: EventSubscriber::new(transport.clone()),
            system: SystemClient::new(transport),
            arena: HandleArena::new(config.queue.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
        }
    }

    /// Cached handle state, if this orchestrator has touched the container.
    pub fn handle(&self, name: &str) -> Option<HandleState> {
        self.arena.state(name)
    }

    pub fn system(&self) -> &SystemClient {
        &self.system
    }

    /// Create a container from `spec`, resolving a name conflict to the
    /// existing container (idempotent create).
    pub async fn create(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<HandleState> {
        let permit = self.arena.acquire(&spec.name).await?;
        self.begin_op(&permit);
        self.step_create(&permit, spec, cancel).await?;
        Ok(permit.state())
    }

    /// Start a container and confirm it is running (or already exited).
    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<HandleState> {
        let permit = self.arena.acquire(name).await?;
        self.begin_op(&permit);
        self.step_start(&permit, cancel).await?;
        Ok(permit.state())
    }

    /// Stop a container and confirm it has come to rest.
    pub async fn stop(
        &self,
        name: &str,
        stop_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<HandleState> {
        let permit = self.arena.acquire(name).await?;
        self.begin_op(&permit);
        self.step_stop(&permit, stop_timeout, cancel).await?;
        Ok(permit.state())
    }

    /// Remove a container and confirm it is gone.
    pub async fn remove(
        &self,
        name: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<HandleState> {
        let permit = self.arena.acquire(name).await?;
        self.begin_op(&permit);
        self.step_remove(&permit, force, cancel).await?;
        Ok(permit.state())
    }

    /// Block until a container's process exits, returning its exit code.
    /// The handle moves to `Stopped` with the exit snapshot captured.
    pub async fn wait(&self, name: &str, cancel: &CancellationToken) -> Result<i64> {
        let permit = self.arena.acquire(name).await?;
        self.begin_op(&permit);
        self.step_wait(&permit, cancel).await
    }

    /// Refresh a handle's snapshot from the daemon.
    pub async fn inspect(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerSnapshot> {
        let permit = self.arena.acquire(name).await?;
        let key = self.resolve_key(&permit);
        let result = with_retry(&self.retry, cancel, "inspect container", || {
            let client = self.containers.clone();
            let key = key.clone();
            async move { client.inspect(&key).await }
        })
        .await;
        match result {
            Ok((snapshot, retries)) => {
                permit.with_state(|s| {
                    s.recorded_retries += retries;
                    s.id = Some(snapshot.id.clone());
                    s.snapshot = Some(snapshot.clone());
                });
                Ok(snapshot)
            }
            Err(err) => Err(classify(err).0),
        }
    }

    /// Drive `create → start → wait → remove` to completion, returning
    /// the final handle state with the exit code captured in its
    /// snapshot. On failure or cancellation, anything already created is
    /// cleaned up best-effort before the error surfaces.
    pub async fn run_to_completion(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<HandleState> {
        let permit = self.arena.acquire(&spec.name).await?;
        self.begin_op(&permit);
        match self.run_chain(&permit, spec, cancel).await {
            Ok(()) => Ok(permit.state()),
            Err(e) => {
                // Cancellation has already cleaned up; other failures
                // still owe the daemon a best-effort stop+remove, without
                // disturbing the terminal Failed phase.
                if !matches!(e, OrchestratorError::Cancelled) {
                    self.cleanup(&permit, false).await;
                }
                Err(e)
            }
        }
    }

    async fn run_chain(
        &self,
        permit: &OperationPermit,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.step_create(permit, spec, cancel).await?;
        if permit.with_state(|s| s.phase) == LifecyclePhase::Created {
            self.step_start(permit, cancel).await?;
        }
        if permit.with_state(|s| s.phase) == LifecyclePhase::Running {
            self.step_wait(permit, cancel).await?;
        }
        self.step_remove(permit, false, cancel).await?;
        Ok(())
    }

    /// Pull an image; the progress stream is surfaced to the caller.
    /// Only the open is retried: a broken progress stream is a stream
    /// error, not something to silently reopen.
    pub async fn pull_image(
        &self,
        reference: &str,
        cancel: &CancellationToken,
    ) -> Result<PullProgressStream> {
        let result = with_retry(&self.retry, cancel, "pull image", || {
            let client = self.images.clone();
            let reference = reference.to_owned();
            async move { client.pull(&reference).await }
        })
        .await;
        match result {
            Ok((stream, retries)) => {
                if retries > 0 {
                    debug!("pull of {} opened after {} retries", reference, retries);
                }
                Ok(stream)
            }
            Err(err) => Err(classify(err).0),
        }
    }

    /// Run a command inside a container and collect its output.
    pub async fn exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        let permit = self.arena.acquire(container).await?;
        self.begin_op(&permit);
        let key = self.resolve_key(&permit);

        let created = with_retry(&self.retry, cancel, "create exec", || {
            let client = self.execs.clone();
            let key = key.clone();
            let cmd = cmd.clone();
            async move { client.create(&key, cmd).await }
        })
        .await;
        let exec_id = match created {
            Ok((id, retries)) => {
                permit.with_state(|s| s.recorded_retries += retries);
                id
            }
            Err(err) => return Err(classify(err).0),
        };

        // Starting an exec is not idempotent; one attempt, raced with
        // the token.
        let mut stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            stream = self.execs.start(&exec_id) => stream?,
        };

        let mut output = ExecOutput::default();
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                item = stream.next() => item,
            };
            match item {
                Some(Ok(record)) => output.push(&record),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        let inspected = with_retry(&self.retry, cancel, "inspect exec", || {
            let client = self.execs.clone();
            let exec_id = exec_id.clone();
            async move { client.inspect(&exec_id).await }
        })
        .await;
        match inspected {
            Ok((info, retries)) => {
                permit.with_state(|s| s.recorded_retries += retries);
                Ok(ExecResult {
                    exit_code: info.exit_code.unwrap_or(-1),
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(err) => Err(classify(err).0),
        }
    }

    /// Subscribe to daemon events. The stream is infinite and
    /// restartable only by resubscribing.
    pub async fn subscribe_events(&self, filter: EventFilter) -> Result<EventStream> {
        Ok(self.events.subscribe(filter).await?)
    }

    /// Tail a container's logs.
    pub async fn tail_logs(&self, container: &str, options: LogOptions) -> Result<LogStream> {
        Ok(self.logs.tail_logs(container, options).await?)
    }

    // ----- orchestration steps (permit held) -----

    fn begin_op(&self, permit: &OperationPermit) {
        permit.with_state(|s| {
            s.recorded_retries = 0;
            s.last_error = None;
        });
    }

    fn resolve_key(&self, permit: &OperationPermit) -> String {
        permit.with_state(|s| s.id.clone().unwrap_or_else(|| s.name.clone()))
    }

    async fn step_create(
        &self,
        permit: &OperationPermit,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<ContainerSnapshot> {
        permit.with_state(|s| s.phase = LifecyclePhase::Creating);
        let created = with_retry(&self.retry, cancel, "create container", || {
            let client = self.containers.clone();
            let spec = spec.clone();
            async move { client.create(&spec).await }
        })
        .await;

        let key = match created {
            Ok((id, retries)) => {
                permit.with_state(|s| {
                    s.recorded_retries += retries;
                    s.id = Some(id.clone());
                });
                id
            }
            // Idempotent create: a name conflict resolves to the
            // existing container instead of failing.
            Err(RetryError::Fatal(DockerError::Api { status: 409, .. })) => {
                info!(
                    "container {} already exists, resolving to existing handle",
                    spec.name
                );
                spec.name.clone()
            }
            Err(err) => return Err(self.fail(permit, err).await),
        };

        self.inspect_confirm(permit, &key, LifecyclePhase::Creating, cancel)
            .await
    }

    async fn step_start(
        &self,
        permit: &OperationPermit,
        cancel: &CancellationToken,
    ) -> Result<ContainerSnapshot> {
        let key = self.resolve_key(permit);
        permit.with_state(|s| s.phase = LifecyclePhase::Starting);
        let started = with_retry(&self.retry, cancel, "start container", || {
            let client = self.containers.clone();
            let key = key.clone();
            async move { client.start(&key).await }
        })
        .await;
        match started {
            Ok(((), retries)) => permit.with_state(|s| s.recorded_retries += retries),
            Err(err) => return Err(self.fail(permit, err).await),
        }
        self.inspect_confirm(permit, &key, LifecyclePhase::Starting, cancel)
            .await
    }

    async fn step_stop(
        &self,
        permit: &OperationPermit,
        stop_timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ContainerSnapshot> {
        let key = self.resolve_key(permit);
        permit.with_state(|s| s.phase = LifecyclePhase::Stopping);
        let stopped = with_retry(&self.retry, cancel, "stop container", || {
            let client = self.containers.clone();
            let key = key.clone();
            async move { client.stop(&key, stop_timeout).await }
        })
        .await;
        match stopped {
            Ok(((), retries)) => permit.with_state(|s| s.recorded_retries += retries),
            Err(err) => return Err(self.fail(permit, err).await),
        }
        self.inspect_confirm(permit, &key, LifecyclePhase::Stopping, cancel)
            .await
    }

    async fn step_wait(
        &self,
        permit: &OperationPermit,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let key = self.resolve_key(permit);
        let waited = with_retry(&self.retry, cancel, "wait for container", || {
            let client = self.containers.clone();
            let key = key.clone();
            async move { client.wait(&key, None).await }
        })
        .await;
        let exit_code = match waited {
            Ok((code, retries)) => {
                permit.with_state(|s| s.recorded_retries += retries);
                code
            }
            Err(err) => return Err(self.fail(permit, err).await),
        };

        let phase = permit.with_state(|s| s.phase);
        match advance(phase, &Observation::WaitExited { exit_code }) {
            Ok(next) => permit.with_state(|s| s.phase = next),
            Err(t) => return Err(self.fail_transition(permit, t)),
        }
        // Final inspect captures the exit snapshot.
        self.inspect_confirm(permit, &key, LifecyclePhase::Stopped, cancel)
            .await?;
        Ok(exit_code)
    }

    async fn step_remove(
        &self,
        permit: &OperationPermit,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let key = self.resolve_key(permit);
        permit.with_state(|s| s.phase = LifecyclePhase::Removing);
        let removed = with_retry(&self.retry, cancel, "remove container", || {
            let client = self.containers.clone();
            let key = key.clone();
            async move { client.remove(&key, force, true).await }
        })
        .await;
        match removed {
            Ok(((), retries)) => permit.with_state(|s| s.recorded_retries += retries),
            // Already gone is what removal wants.
            Err(RetryError::Fatal(DockerError::Api { status: 404, .. })) => {}
            Err(err) => return Err(self.fail(permit, err).await),
        }
        self.confirm_gone(permit, &key, cancel).await
    }

    /// Confirm a phase transition with an inspect round-trip; never trust
    /// the mutating call's bare success.
    async fn inspect_confirm(
        &self,
        permit: &OperationPermit,
        key: &str,
        from: LifecyclePhase,
        cancel: &CancellationToken,
    ) -> Result<ContainerSnapshot> {
        let inspected = with_retry(&self.retry, cancel, "confirm via inspect", || {
            let client = self.containers.clone();
            let key = key.to_owned();
            async move { client.inspect(&key).await }
        })
        .await;
        let snapshot = match inspected {
            Ok((snapshot, retries)) => {
                permit.with_state(|s| s.recorded_retries += retries);
                snapshot
            }
            Err(err) => return Err(self.fail(permit, err).await),
        };
        match advance(from, &Observation::Inspected(snapshot.status.clone())) {
            Ok(next) => {
                permit.with_state(|s| {
                    s.id = Some(snapshot.id.clone());
                    s.snapshot = Some(snapshot.clone());
                    s.phase = next;
                });
                debug!("container {} confirmed {}", snapshot.name, snapshot.status);
                Ok(snapshot)
            }
            Err(t) => Err(self.fail_transition(permit, t)),
        }
    }

    /// Confirm removal: the inspect must answer 404. The daemon may
    /// report `removing` briefly, so give it a few polls.
    async fn confirm_gone(
        &self,
        permit: &OperationPermit,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for _ in 0..REMOVAL_CONFIRM_ATTEMPTS {
            let inspected = with_retry(&self.retry, cancel, "confirm removal", || {
                let client = self.containers.clone();
                let key = key.to_owned();
                async move { client.inspect(&key).await }
            })
            .await;
            match inspected {
                Err(RetryError::Fatal(DockerError::Api { status: 404, .. })) => {
                    let phase = permit.with_state(|s| s.phase);
                    match advance(phase, &Observation::InspectGone) {
                        Ok(next) => {
                            permit.with_state(|s| s.phase = next);
                            return Ok(());
                        }
                        Err(t) => return Err(self.fail_transition(permit, t)),
                    }
                }
                Ok((snapshot, retries)) => {
                    permit.with_state(|s| s.recorded_retries += retries);
                    if snapshot.status == crun_types::ContainerStatus::Removing {
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => {
                                return Err(self.fail(permit, RetryError::Cancelled).await)
                            }
                            () = tokio::time::sleep(REMOVAL_CONFIRM_DELAY) => continue,
                        }
                    }
                    return Err(self.fail_transition(
                        permit,
                        crate::state::TransitionError {
                            phase: LifecyclePhase::Removing.to_string(),
                            observed: snapshot.status.to_string(),
                        },
                    ));
                }
                Err(err) => return Err(self.fail(permit, err).await),
            }
        }
        Err(self.fail_transition(
            permit,
            crate::state::TransitionError {
                phase: LifecyclePhase::Removing.to_string(),
                observed: "still removing".to_owned(),
            },
        ))
    }

    // ----- failure handling -----

    /// Land the handle in a terminal `Failed(kind)` with the error
    /// attached; a fired token additionally triggers cleanup.
    async fn fail(&self, permit: &OperationPermit, err: RetryError) -> OrchestratorError {
        let (error, kind) = classify(err);
        permit.with_state(|s| {
            s.last_error = Some(error.to_string());
            s.phase = LifecyclePhase::Failed(kind);
        });
        if kind == FailureKind::Cancelled {
            self.cleanup(permit, true).await;
        }
        error
    }

    fn fail_transition(
        &self,
        permit: &OperationPermit,
        t: crate::state::TransitionError,
    ) -> OrchestratorError {
        permit.with_state(|s| {
            s.last_error = Some(t.to_string());
            s.phase = LifecyclePhase::Failed(FailureKind::Rejected);
        });
        OrchestratorError::Transition(t)
    }

    /// Best-effort stop+remove so failed or cancelled orchestrations do
    /// not leak daemon-side containers. Failures here are warnings; the
    /// primary error dominates. `promote_to_gone` moves the handle to
    /// `Gone` when cleanup fully succeeds (cancellation), while failure
    /// cleanup keeps the terminal `Failed` phase.
    async fn cleanup(&self, permit: &OperationPermit, promote_to_gone: bool) {
        let Some(id) = permit.with_state(|s| s.id.clone()) else {
            return;
        };
        if let Err(e) = self.containers.stop(&id, Some(CLEANUP_STOP_TIMEOUT)).await {
            if e.status_code() != Some(404) {
                warn!("cleanup stop of {} failed: {}", id, e);
            }
        }
        match self.containers.remove(&id, true, true).await {
            Ok(()) => {
                debug!("cleaned up container {}", id);
                if promote_to_gone {
                    permit.with_state(|s| s.phase = LifecyclePhase::Gone);
                }
            }
            Err(e) if e.status_code() == Some(404) => {
                if promote_to_gone {
                    permit.with_state(|s| s.phase = LifecyclePhase::Gone);
                }
            }
            Err(e) => warn!("cleanup remove of {} failed: {}", id, e),
        }
    }
}

/// Map an attempt-loop outcome to the surfaced error and the terminal
/// failure classification.
fn classify(err: RetryError) -> (OrchestratorError, FailureKind) {
    match err {
        RetryError::Exhausted(e) => (OrchestratorError::Docker(e), FailureKind::Unreachable),
        RetryError::Fatal(e) => {
            let kind = match &e {
                DockerError::Transport(_) => FailureKind::Unreachable,
                _ => FailureKind::Rejected,
            };
            (OrchestratorError::Docker(e), kind)
        }
        RetryError::Cancelled => (OrchestratorError::Cancelled, FailureKind::Cancelled),
    }
}
