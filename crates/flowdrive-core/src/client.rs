//! Engine client ports.
//!
//! These traits are the full surface the driver consumes from a workflow
//! engine: command submission, clock control, and read-only queries. The
//! simulation engine in `flowdrive-sim` implements all three; nothing in
//! this crate assumes anything beyond the contracts below.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use std::time::Duration;

use flowdrive_types::command::CreateInstanceRequest;
use flowdrive_types::deployment::DeploymentResult;
use flowdrive_types::error::EngineError;
use flowdrive_types::instance::{ElementVisit, InstanceHandle, InstanceStatus};
use flowdrive_types::job::ActivatedJob;
use flowdrive_types::variables::VariableMap;
use uuid::Uuid;

use crate::settle::SettleTimeout;

/// Command interface: everything that changes engine state.
///
/// Commands block until the engine acknowledges admission. Engine-side
/// reactive processing (token movement after a completion, timer firing
/// after a clock advance) may continue after acknowledgment; callers that
/// depend on settled state must go through [`EngineClock::wait_for_idle`].
pub trait EngineCommands: Send + Sync {
    /// Register a process-definition resource under its declared process id.
    fn deploy_resource(
        &self,
        resource_name: &str,
        source: &str,
    ) -> impl std::future::Future<Output = Result<DeploymentResult, EngineError>> + Send;

    /// Create a process instance. The returned handle refers to an admitted
    /// instance; token execution proceeds asynchronously.
    fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> impl std::future::Future<Output = Result<InstanceHandle, EngineError>> + Send;

    /// Activate up to `max_jobs` available jobs of `job_type`.
    ///
    /// Returns fewer than `max_jobs` when fewer are available -- never
    /// blocks waiting for jobs to appear. Activated jobs are not returned
    /// by later activations until resolved.
    fn activate_jobs(
        &self,
        job_type: &str,
        max_jobs: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ActivatedJob>, EngineError>> + Send;

    /// Complete an activated job, merging `variables` into the instance's
    /// variable scope.
    fn complete_job(
        &self,
        job_key: Uuid,
        variables: &VariableMap,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;

    /// Resolve an activated job with a named error code, routing the token
    /// through the element's matching error event.
    fn throw_error(
        &self,
        job_key: Uuid,
        error_code: &str,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;

    /// Publish a named message with a correlation key. Correlation happens
    /// asynchronously; a key matching no waiting instance is dropped.
    fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;
}

/// Virtual-clock control and settlement waits.
pub trait EngineClock: Send + Sync {
    /// Advance the engine's virtual clock by `by`.
    fn increase_time(
        &self,
        by: Duration,
    ) -> impl std::future::Future<Output = Result<(), EngineError>> + Send;

    /// Block until the engine has begun processing the work triggered by
    /// the most recent [`increase_time`](Self::increase_time). Times out if
    /// the clock advance triggered nothing -- the expected timer never
    /// became due.
    fn wait_for_busy(
        &self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), SettleTimeout>> + Send;

    /// Block until no engine-side work is pending. Assertions on instance
    /// state are only valid after this returns.
    fn wait_for_idle(
        &self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), SettleTimeout>> + Send;
}

/// Read-only queries over instance state and history. No side effects.
pub trait EngineQuery: Send + Sync {
    /// Current lifecycle status of an instance.
    fn instance_status(
        &self,
        instance: Uuid,
    ) -> impl std::future::Future<Output = Result<InstanceStatus, EngineError>> + Send;

    /// Element ids the instance is currently waiting at.
    fn active_elements(
        &self,
        instance: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<String>, EngineError>> + Send;

    /// Full execution history of the instance, oldest first.
    fn element_history(
        &self,
        instance: Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ElementVisit>, EngineError>> + Send;

    /// Current variable scope of the instance.
    fn variables(
        &self,
        instance: Uuid,
    ) -> impl std::future::Future<Output = Result<VariableMap, EngineError>> + Send;
}
