//! The in-process simulation engine.
//!
//! `SimEngine` implements the three `flowdrive-core` ports. Commands
//! validate and admit synchronously (that is the acknowledgment), then
//! enqueue *reactions* -- token movement, message correlation, timer
//! firing -- onto a worker task that processes them in FIFO order.
//! Quiescence is defined by two counters: the engine is idle exactly when
//! every submitted action has been processed.
//!
//! Each test owns its engine: `SimEngine::new()` spawns the worker on the
//! current runtime, handle clones share it, and dropping the last handle
//! (or calling [`SimEngine::shutdown`]) stops it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use flowdrive_core::client::{EngineClock, EngineCommands, EngineQuery};
use flowdrive_core::settle::{SettleTimeout, poll_until};
use flowdrive_types::command::{CreateInstanceRequest, VersionSelector};
use flowdrive_types::deployment::{DeployedProcess, DeploymentResult};
use flowdrive_types::error::EngineError;
use flowdrive_types::event::EngineEvent;
use flowdrive_types::instance::{ElementVisit, InstanceHandle, InstanceStatus, VisitState};
use flowdrive_types::job::{ActivatedJob, USER_TASK_JOB_TYPE};
use flowdrive_types::variables::VariableMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::clock::VirtualClock;
use crate::expr::ConditionEvaluator;
use crate::model::{ElementKind, EventTrigger, ProcessModel, parse_model_yaml};
use crate::stream::RecordStream;

/// Interval between settlement polls.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Mutable state of one process instance.
struct InstanceState {
    process_id: String,
    model: Arc<ProcessModel>,
    status: InstanceStatus,
    variables: VariableMap,
    /// Element ids the token is currently waiting at.
    active: Vec<String>,
    /// Execution history, oldest first.
    history: Vec<ElementVisit>,
    /// Outstanding job counts for multi-instance elements.
    multi_pending: HashMap<String, u32>,
}

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Created,
    Activated,
    Completed,
    Errored,
}

#[derive(Clone)]
struct JobRecord {
    key: Uuid,
    job_type: String,
    element_id: String,
    instance: Uuid,
    state: JobState,
    /// Creation order, so activation is deterministic.
    seq: u64,
}

/// An armed timer branch of an event gateway.
struct TimerSubscription {
    instance: Uuid,
    element_id: String,
    target: String,
    due: DateTime<Utc>,
}

/// Reactive work processed by the worker task.
enum Action {
    RunToken { instance: Uuid, element: String },
    ResolveJob { job: Uuid, resolution: Resolution },
    Correlate { name: String, correlation_key: String },
    ClockTick { now: DateTime<Utc> },
}

enum Resolution {
    Complete(VariableMap),
    Error(String),
}

// ---------------------------------------------------------------------------
// SimEngine
// ---------------------------------------------------------------------------

/// Cloneable handle to an in-process simulation engine.
pub struct SimEngine {
    inner: Arc<EngineInner>,
    actions: mpsc::UnboundedSender<Action>,
}

struct EngineInner {
    definitions: DashMap<String, Vec<Arc<ProcessModel>>>,
    instances: DashMap<Uuid, InstanceState>,
    jobs: DashMap<Uuid, JobRecord>,
    timers: Mutex<Vec<TimerSubscription>>,
    clock: VirtualClock,
    evaluator: ConditionEvaluator,
    stream: RecordStream,
    /// Actions enqueued to the worker.
    submitted: AtomicU64,
    /// Actions the worker has finished.
    processed: AtomicU64,
    /// Submitted-count the most recent clock advance must reach before
    /// `wait_for_busy` succeeds; 0 when the advance triggered nothing.
    clock_watermark: AtomicU64,
    job_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl SimEngine {
    /// Create an engine and spawn its worker on the current tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let inner = Arc::new(EngineInner {
            definitions: DashMap::new(),
            instances: DashMap::new(),
            jobs: DashMap::new(),
            timers: Mutex::new(Vec::new()),
            clock: VirtualClock::starting_now(),
            evaluator: ConditionEvaluator::new(),
            stream: RecordStream::new(),
            submitted: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            clock_watermark: AtomicU64::new(0),
            job_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker.shutdown.cancelled() => break,
                    action = rx.recv() => match action {
                        Some(action) => {
                            worker.process(action);
                            worker.processed.fetch_add(1, Ordering::SeqCst);
                        }
                        None => break,
                    },
                }
            }
        });

        Self { inner, actions: tx }
    }

    /// Stop the worker and reject all further commands.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Handle on the engine's record stream.
    pub fn record_stream(&self) -> RecordStream {
        self.inner.stream.clone()
    }

    fn submit(&self, action: Action) -> Result<(), EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        self.inner.submitted.fetch_add(1, Ordering::SeqCst);
        if self.actions.send(action).is_err() {
            self.inner.processed.fetch_add(1, Ordering::SeqCst);
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SimEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            actions: self.actions.clone(),
        }
    }
}

impl std::fmt::Debug for SimEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEngine")
            .field("definitions", &self.inner.definitions.len())
            .field("instances", &self.inner.instances.len())
            .field("jobs", &self.inner.jobs.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Port implementations
// ---------------------------------------------------------------------------

impl EngineCommands for SimEngine {
    async fn deploy_resource(
        &self,
        resource_name: &str,
        source: &str,
    ) -> Result<DeploymentResult, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        let model = parse_model_yaml(source).map_err(|e| EngineError::InvalidResource {
            resource: resource_name.to_string(),
            reason: e.to_string(),
        })?;
        let process_id = model.process_id.clone();
        let version = {
            let mut versions = self
                .inner
                .definitions
                .entry(process_id.clone())
                .or_default();
            versions.push(Arc::new(model));
            versions.len() as u32
        };
        let key = Uuid::now_v7();
        self.inner.stream.publish(EngineEvent::DeploymentCreated {
            key,
            process_id: process_id.clone(),
            version,
        });
        tracing::info!(
            process = process_id.as_str(),
            version,
            resource = resource_name,
            "deployed process definition"
        );
        Ok(DeploymentResult {
            key,
            processes: vec![DeployedProcess {
                process_id,
                version,
                resource_name: resource_name.to_string(),
            }],
        })
    }

    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<InstanceHandle, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        let (model, version) = {
            let versions = self
                .inner
                .definitions
                .get(&request.process_id)
                .ok_or_else(|| EngineError::ProcessNotFound(request.process_id.clone()))?;
            match request.version {
                VersionSelector::Latest => {
                    let model = versions
                        .last()
                        .cloned()
                        .ok_or_else(|| EngineError::ProcessNotFound(request.process_id.clone()))?;
                    (model, versions.len() as u32)
                }
                VersionSelector::Exact(v) => {
                    let model = v
                        .checked_sub(1)
                        .and_then(|idx| versions.get(idx as usize))
                        .cloned()
                        .ok_or_else(|| EngineError::VersionNotFound {
                            process_id: request.process_id.clone(),
                            version: v,
                        })?;
                    (model, v)
                }
            }
        };

        let entry = match &request.start_before {
            Some(element_id) => model
                .element(element_id)
                .ok_or_else(|| EngineError::ElementNotFound {
                    process_id: request.process_id.clone(),
                    element_id: element_id.clone(),
                })?
                .id
                .clone(),
            None => model
                .start_element()
                .ok_or_else(|| EngineError::InvalidResource {
                    resource: request.process_id.clone(),
                    reason: "no start event".to_string(),
                })?
                .id
                .clone(),
        };

        let key = Uuid::now_v7();
        self.inner.instances.insert(
            key,
            InstanceState {
                process_id: request.process_id.clone(),
                model,
                status: InstanceStatus::Active,
                variables: request.variables,
                active: Vec::new(),
                history: Vec::new(),
                multi_pending: HashMap::new(),
            },
        );
        self.inner.stream.publish(EngineEvent::InstanceCreated {
            instance: key,
            process_id: request.process_id.clone(),
        });
        tracing::info!(
            instance = %key,
            process = request.process_id.as_str(),
            start_before = request.start_before.as_deref(),
            "instance created"
        );
        self.submit(Action::RunToken {
            instance: key,
            element: entry,
        })?;
        Ok(InstanceHandle {
            key,
            process_id: request.process_id,
            version,
        })
    }

    async fn activate_jobs(
        &self,
        job_type: &str,
        max_jobs: u32,
    ) -> Result<Vec<ActivatedJob>, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        let mut candidates: Vec<(u64, Uuid)> = self
            .inner
            .jobs
            .iter()
            .filter(|j| j.state == JobState::Created && j.job_type == job_type)
            .map(|j| (j.seq, j.key))
            .collect();
        candidates.sort_unstable();
        candidates.truncate(max_jobs as usize);

        let mut activated = Vec::with_capacity(candidates.len());
        for (_, key) in candidates {
            let Some(mut job) = self.inner.jobs.get_mut(&key) else {
                continue;
            };
            if job.state != JobState::Created {
                continue;
            }
            job.state = JobState::Activated;
            let variables = self
                .inner
                .instances
                .get(&job.instance)
                .map(|i| i.variables.clone())
                .unwrap_or_default();
            activated.push(ActivatedJob {
                key: job.key,
                job_type: job.job_type.clone(),
                element_id: job.element_id.clone(),
                process_instance_key: job.instance,
                variables,
            });
        }
        tracing::debug!(job_type, requested = max_jobs, activated = activated.len(), "activated jobs");
        Ok(activated)
    }

    async fn complete_job(
        &self,
        job_key: Uuid,
        variables: &VariableMap,
    ) -> Result<(), EngineError> {
        {
            let mut job = self
                .inner
                .jobs
                .get_mut(&job_key)
                .ok_or(EngineError::JobNotFound(job_key))?;
            match job.state {
                JobState::Activated => job.state = JobState::Completed,
                JobState::Created => return Err(EngineError::JobNotActivated(job_key)),
                JobState::Completed | JobState::Errored => {
                    return Err(EngineError::JobAlreadyResolved(job_key));
                }
            }
        }
        self.submit(Action::ResolveJob {
            job: job_key,
            resolution: Resolution::Complete(variables.clone()),
        })
    }

    async fn throw_error(&self, job_key: Uuid, error_code: &str) -> Result<(), EngineError> {
        let (instance, element_id) = {
            let job = self
                .inner
                .jobs
                .get(&job_key)
                .ok_or(EngineError::JobNotFound(job_key))?;
            match job.state {
                JobState::Activated => {}
                JobState::Created => return Err(EngineError::JobNotActivated(job_key)),
                JobState::Completed | JobState::Errored => {
                    return Err(EngineError::JobAlreadyResolved(job_key));
                }
            }
            (job.instance, job.element_id.clone())
        };

        let model = self
            .inner
            .instances
            .get(&instance)
            .map(|i| Arc::clone(&i.model))
            .ok_or(EngineError::InstanceNotFound(instance))?;
        let caught = matches!(
            model.element(&element_id).map(|e| &e.kind),
            Some(ElementKind::ServiceTask { error_events, .. })
                if error_events.iter().any(|e| e.code == error_code)
        );
        if !caught {
            return Err(EngineError::UnhandledError {
                element_id,
                code: error_code.to_string(),
            });
        }

        {
            let mut job = self
                .inner
                .jobs
                .get_mut(&job_key)
                .ok_or(EngineError::JobNotFound(job_key))?;
            job.state = JobState::Errored;
        }
        self.submit(Action::ResolveJob {
            job: job_key,
            resolution: Resolution::Error(error_code.to_string()),
        })
    }

    async fn publish_message(&self, name: &str, correlation_key: &str) -> Result<(), EngineError> {
        self.submit(Action::Correlate {
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
        })
    }
}

impl EngineClock for SimEngine {
    async fn increase_time(&self, by: Duration) -> Result<(), EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EngineError::Shutdown);
        }
        let now = self.inner.clock.advance(by);
        self.inner.stream.publish(EngineEvent::ClockAdvanced {
            by_ms: u64::try_from(by.as_millis()).unwrap_or(u64::MAX),
        });
        let has_due = self.inner.timers_locked().iter().any(|t| t.due <= now);
        if has_due {
            self.submit(Action::ClockTick { now })?;
            self.inner
                .clock_watermark
                .store(self.inner.submitted.load(Ordering::SeqCst), Ordering::SeqCst);
        } else {
            self.inner.clock_watermark.store(0, Ordering::SeqCst);
        }
        tracing::info!(?by, due_timers = has_due, "virtual clock advanced");
        Ok(())
    }

    async fn wait_for_busy(&self, timeout: Duration) -> Result<(), SettleTimeout> {
        let inner = Arc::clone(&self.inner);
        poll_until("engine busy", timeout, POLL_INTERVAL, move || {
            let watermark = inner.clock_watermark.load(Ordering::SeqCst);
            watermark != 0 && inner.processed.load(Ordering::SeqCst) >= watermark
        })
        .await
    }

    async fn wait_for_idle(&self, timeout: Duration) -> Result<(), SettleTimeout> {
        let inner = Arc::clone(&self.inner);
        poll_until("engine idle", timeout, POLL_INTERVAL, move || {
            inner.processed.load(Ordering::SeqCst) >= inner.submitted.load(Ordering::SeqCst)
        })
        .await
    }
}

impl EngineQuery for SimEngine {
    async fn instance_status(&self, instance: Uuid) -> Result<InstanceStatus, EngineError> {
        self.inner.with_instance(instance, |i| i.status)
    }

    async fn active_elements(&self, instance: Uuid) -> Result<Vec<String>, EngineError> {
        self.inner.with_instance(instance, |i| i.active.clone())
    }

    async fn element_history(&self, instance: Uuid) -> Result<Vec<ElementVisit>, EngineError> {
        self.inner.with_instance(instance, |i| i.history.clone())
    }

    async fn variables(&self, instance: Uuid) -> Result<VariableMap, EngineError> {
        self.inner.with_instance(instance, |i| i.variables.clone())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

impl EngineInner {
    fn with_instance<T>(
        &self,
        instance: Uuid,
        f: impl FnOnce(&InstanceState) -> T,
    ) -> Result<T, EngineError> {
        self.instances
            .get(&instance)
            .map(|i| f(&i))
            .ok_or(EngineError::InstanceNotFound(instance))
    }

    fn timers_locked(&self) -> std::sync::MutexGuard<'_, Vec<TimerSubscription>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn process(&self, action: Action) {
        match action {
            Action::RunToken { instance, element } => self.run_token(instance, element),
            Action::ResolveJob { job, resolution } => self.resolve_job(job, resolution),
            Action::Correlate {
                name,
                correlation_key,
            } => self.correlate(&name, &correlation_key),
            Action::ClockTick { now } => self.fire_due_timers(now),
        }
    }

    /// Advance one token from `entry` until it hits a wait state or ends.
    fn run_token(&self, instance: Uuid, entry: String) {
        let mut current = entry;
        loop {
            let Some(mut inst) = self.instances.get_mut(&instance) else {
                tracing::warn!(instance = %instance, "token for unknown instance dropped");
                return;
            };
            if inst.status != InstanceStatus::Active {
                return;
            }
            let model = Arc::clone(&inst.model);
            let Some(element) = model.element(&current) else {
                let reason = format!("token reached unknown element '{current}'");
                self.terminate(&mut inst, instance, &current, &reason);
                return;
            };

            match &element.kind {
                ElementKind::StartEvent { next } => {
                    self.record_completed(&mut inst, instance, &element.id);
                    current = next.clone();
                }

                ElementKind::EndEvent => {
                    self.record_completed(&mut inst, instance, &element.id);
                    if inst.active.is_empty() {
                        inst.status = InstanceStatus::Completed;
                        self.stream
                            .publish(EngineEvent::InstanceCompleted { instance });
                        tracing::info!(
                            instance = %instance,
                            process = inst.process_id.as_str(),
                            end = element.id.as_str(),
                            "instance completed"
                        );
                    } else {
                        tracing::warn!(
                            instance = %instance,
                            active = ?inst.active,
                            "end event reached while elements are still active"
                        );
                    }
                    return;
                }

                ElementKind::ServiceTask { job_type, .. } => {
                    inst.active.push(element.id.clone());
                    self.stream.publish(EngineEvent::ElementActivated {
                        instance,
                        element_id: element.id.clone(),
                    });
                    drop(inst);
                    self.create_job(instance, &element.id, job_type);
                    return;
                }

                ElementKind::UserTask {
                    multi_instance_over,
                    next,
                } => {
                    let count = match multi_instance_over {
                        Some(collection) => {
                            match inst.variables.get(collection).and_then(Value::as_array) {
                                Some(items) => items.len(),
                                None => {
                                    let reason = format!(
                                        "multi-instance collection '{collection}' is missing or not an array"
                                    );
                                    self.terminate(&mut inst, instance, &element.id, &reason);
                                    return;
                                }
                            }
                        }
                        None => 1,
                    };
                    if count == 0 {
                        // Empty collection: nothing to do, token moves on.
                        self.record_completed(&mut inst, instance, &element.id);
                        current = next.clone();
                        continue;
                    }
                    inst.active.push(element.id.clone());
                    self.stream.publish(EngineEvent::ElementActivated {
                        instance,
                        element_id: element.id.clone(),
                    });
                    if count > 1 {
                        inst.multi_pending.insert(element.id.clone(), count as u32);
                    }
                    drop(inst);
                    for _ in 0..count {
                        self.create_job(instance, &element.id, USER_TASK_JOB_TYPE);
                    }
                    return;
                }

                ElementKind::ExclusiveGateway {
                    branches,
                    default_flow,
                } => {
                    let mut taken: Option<String> = None;
                    for branch in branches {
                        match self.evaluator.evaluate(&branch.condition, &inst.variables) {
                            Ok(true) => {
                                taken = Some(branch.next.clone());
                                break;
                            }
                            Ok(false) => {}
                            Err(e) => {
                                let reason = e.to_string();
                                self.terminate(&mut inst, instance, &element.id, &reason);
                                return;
                            }
                        }
                    }
                    match taken.or_else(|| default_flow.clone()) {
                        Some(next) => {
                            self.record_completed(&mut inst, instance, &element.id);
                            current = next;
                        }
                        None => {
                            let reason =
                                "no branch condition held and no default flow".to_string();
                            self.terminate(&mut inst, instance, &element.id, &reason);
                            return;
                        }
                    }
                }

                ElementKind::EventGateway { branches } => {
                    inst.active.push(element.id.clone());
                    self.stream.publish(EngineEvent::ElementActivated {
                        instance,
                        element_id: element.id.clone(),
                    });
                    let now = self.clock.now();
                    let mut timers = self.timers_locked();
                    for branch in branches {
                        if let EventTrigger::Timer { duration_secs } = &branch.trigger {
                            let delay =
                                TimeDelta::seconds(i64::try_from(*duration_secs).unwrap_or(i64::MAX));
                            timers.push(TimerSubscription {
                                instance,
                                element_id: element.id.clone(),
                                target: branch.next.clone(),
                                due: now + delay,
                            });
                        }
                    }
                    return;
                }

                ElementKind::MessageCatch { .. } => {
                    inst.active.push(element.id.clone());
                    self.stream.publish(EngineEvent::ElementActivated {
                        instance,
                        element_id: element.id.clone(),
                    });
                    return;
                }
            }
        }
    }

    fn create_job(&self, instance: Uuid, element_id: &str, job_type: &str) {
        let key = Uuid::now_v7();
        let seq = self.job_seq.fetch_add(1, Ordering::SeqCst);
        self.jobs.insert(
            key,
            JobRecord {
                key,
                job_type: job_type.to_string(),
                element_id: element_id.to_string(),
                instance,
                state: JobState::Created,
                seq,
            },
        );
        self.stream.publish(EngineEvent::JobCreated {
            key,
            instance,
            job_type: job_type.to_string(),
            element_id: element_id.to_string(),
        });
        tracing::debug!(job = %key, job_type, element = element_id, "job created");
    }

    fn resolve_job(&self, job_key: Uuid, resolution: Resolution) {
        let Some(job) = self.jobs.get(&job_key).map(|j| j.clone()) else {
            tracing::warn!(job = %job_key, "resolution for unknown job dropped");
            return;
        };

        match resolution {
            Resolution::Complete(variables) => {
                let next = {
                    let Some(mut inst) = self.instances.get_mut(&job.instance) else {
                        return;
                    };
                    // Output variables merge into the scope; existing
                    // variables not in the payload stay visible.
                    inst.variables.extend(variables);
                    self.stream.publish(EngineEvent::JobCompleted {
                        key: job_key,
                        instance: job.instance,
                    });
                    if let Some(pending) = inst.multi_pending.get_mut(&job.element_id) {
                        *pending -= 1;
                        if *pending > 0 {
                            tracing::debug!(
                                instance = %job.instance,
                                element = job.element_id.as_str(),
                                remaining = *pending,
                                "multi-instance job resolved, siblings outstanding"
                            );
                            return;
                        }
                        inst.multi_pending.remove(&job.element_id);
                    }
                    inst.active.retain(|e| e != &job.element_id);
                    self.record_completed(&mut inst, job.instance, &job.element_id);
                    let model = Arc::clone(&inst.model);
                    match model.element(&job.element_id).map(|e| &e.kind) {
                        Some(
                            ElementKind::ServiceTask { next, .. }
                            | ElementKind::UserTask { next, .. },
                        ) => next.clone(),
                        _ => {
                            tracing::warn!(
                                instance = %job.instance,
                                element = job.element_id.as_str(),
                                "completed job's element is not a task"
                            );
                            return;
                        }
                    }
                };
                self.run_token(job.instance, next);
            }

            Resolution::Error(code) => {
                let target = {
                    let Some(mut inst) = self.instances.get_mut(&job.instance) else {
                        return;
                    };
                    self.stream.publish(EngineEvent::JobErrored {
                        key: job_key,
                        instance: job.instance,
                        error_code: code.clone(),
                    });
                    inst.active.retain(|e| e != &job.element_id);
                    self.record_terminated(&mut inst, job.instance, &job.element_id);
                    let model = Arc::clone(&inst.model);
                    match model.element(&job.element_id).map(|e| &e.kind) {
                        Some(ElementKind::ServiceTask { error_events, .. }) => error_events
                            .iter()
                            .find(|e| e.code == code)
                            .map(|e| e.next.clone()),
                        _ => None,
                    }
                };
                match target {
                    Some(target) => self.run_token(job.instance, target),
                    // Admission validated the code; reaching here means the
                    // model changed under a live instance.
                    None => tracing::error!(
                        instance = %job.instance,
                        element = job.element_id.as_str(),
                        code = code.as_str(),
                        "errored job has no matching error event"
                    ),
                }
            }
        }
    }

    fn correlate(&self, name: &str, correlation_key: &str) {
        let mut matches: Vec<(Uuid, String, String)> = Vec::new();
        for entry in self.instances.iter() {
            let inst = entry.value();
            if inst.status != InstanceStatus::Active {
                continue;
            }
            for element_id in &inst.active {
                let Some(element) = inst.model.element(element_id) else {
                    continue;
                };
                let target = match &element.kind {
                    ElementKind::MessageCatch {
                        message_name,
                        correlation_variable,
                        next,
                    } if message_name == name
                        && correlation_matches(
                            &inst.variables,
                            correlation_variable,
                            correlation_key,
                        ) =>
                    {
                        Some(next.clone())
                    }
                    ElementKind::EventGateway { branches } => {
                        branches.iter().find_map(|b| match &b.trigger {
                            EventTrigger::Message {
                                name: message_name,
                                correlation_variable,
                            } if message_name == name
                                && correlation_matches(
                                    &inst.variables,
                                    correlation_variable,
                                    correlation_key,
                                ) =>
                            {
                                Some(b.next.clone())
                            }
                            _ => None,
                        })
                    }
                    _ => None,
                };
                if let Some(target) = target {
                    matches.push((*entry.key(), element_id.clone(), target));
                    break;
                }
            }
        }

        if matches.is_empty() {
            tracing::debug!(
                message = name,
                correlation_key,
                "message matched no waiting instance"
            );
            return;
        }

        for (instance, element_id, target) in matches {
            {
                let Some(mut inst) = self.instances.get_mut(&instance) else {
                    continue;
                };
                inst.active.retain(|e| e != &element_id);
                self.record_completed(&mut inst, instance, &element_id);
            }
            // The message branch won; disarm competing timers.
            self.timers_locked()
                .retain(|t| !(t.instance == instance && t.element_id == element_id));
            self.stream.publish(EngineEvent::MessageCorrelated {
                instance,
                name: name.to_string(),
                correlation_key: correlation_key.to_string(),
            });
            tracing::info!(
                instance = %instance,
                message = name,
                correlation_key,
                "message correlated"
            );
            self.run_token(instance, target);
        }
    }

    fn fire_due_timers(&self, now: DateTime<Utc>) {
        let due: Vec<TimerSubscription> = {
            let mut timers = self.timers_locked();
            let (due, remaining): (Vec<_>, Vec<_>) =
                timers.drain(..).partition(|t| t.due <= now);
            *timers = remaining;
            due
        };

        for timer in due {
            let fired = {
                let Some(mut inst) = self.instances.get_mut(&timer.instance) else {
                    continue;
                };
                if inst.status != InstanceStatus::Active
                    || !inst.active.iter().any(|e| e == &timer.element_id)
                {
                    false
                } else {
                    inst.active.retain(|e| e != &timer.element_id);
                    self.record_completed(&mut inst, timer.instance, &timer.element_id);
                    true
                }
            };
            if fired {
                // The timer branch won; disarm siblings on the same gateway.
                self.timers_locked().retain(|t| {
                    !(t.instance == timer.instance && t.element_id == timer.element_id)
                });
                self.stream.publish(EngineEvent::TimerFired {
                    instance: timer.instance,
                    element_id: timer.element_id.clone(),
                    target: timer.target.clone(),
                });
                tracing::info!(
                    instance = %timer.instance,
                    gateway = timer.element_id.as_str(),
                    target = timer.target.as_str(),
                    "timer fired"
                );
                self.run_token(timer.instance, timer.target);
            }
        }
    }

    fn record_completed(&self, inst: &mut InstanceState, instance: Uuid, element_id: &str) {
        inst.history.push(ElementVisit {
            element_id: element_id.to_string(),
            state: VisitState::Completed,
            at: self.clock.now(),
        });
        self.stream.publish(EngineEvent::ElementCompleted {
            instance,
            element_id: element_id.to_string(),
        });
    }

    fn record_terminated(&self, inst: &mut InstanceState, instance: Uuid, element_id: &str) {
        inst.history.push(ElementVisit {
            element_id: element_id.to_string(),
            state: VisitState::Terminated,
            at: self.clock.now(),
        });
        self.stream.publish(EngineEvent::ElementTerminated {
            instance,
            element_id: element_id.to_string(),
        });
    }

    fn terminate(
        &self,
        inst: &mut InstanceState,
        instance: Uuid,
        element_id: &str,
        reason: &str,
    ) {
        tracing::error!(
            instance = %instance,
            process = inst.process_id.as_str(),
            element = element_id,
            reason,
            "terminating instance"
        );
        self.record_terminated(inst, instance, element_id);
        inst.active.clear();
        inst.status = InstanceStatus::Terminated;
        self.stream.publish(EngineEvent::InstanceTerminated {
            instance,
            reason: reason.to_string(),
        });
    }
}

/// A correlation key only matches a string variable with exactly its value.
fn correlation_matches(
    variables: &VariableMap,
    correlation_variable: &str,
    correlation_key: &str,
) -> bool {
    matches!(
        variables.get(correlation_variable),
        Some(Value::String(s)) if s == correlation_key
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
