//! The workflow test driver façade.
//!
//! `TestDriver` wraps an engine client into the operations a process test
//! is written in: deploy, start (optionally mid-process), resolve work
//! items through a handler, publish messages, advance virtual time, and
//! capture assertion snapshots. Every operation that can leave reactive
//! work behind settles (idle-waits) before returning, so state observed
//! afterwards is stable.

use std::time::Duration;

use flowdrive_types::command::CreateInstanceRequest;
use flowdrive_types::deployment::DeploymentResult;
use flowdrive_types::error::EngineError;
use flowdrive_types::instance::InstanceHandle;
use flowdrive_types::job::USER_TASK_JOB_TYPE;
use flowdrive_types::variables::VariableMap;
use thiserror::Error;
use uuid::Uuid;

use crate::assert::InstanceAssert;
use crate::client::{EngineClock, EngineCommands, EngineQuery};
use crate::config::DriverConfig;
use crate::handler::{CompleteWithVariables, HandlerError, JobHandler, JobOutcome, ThrowError};
use crate::settle::SettleTimeout;

// ---------------------------------------------------------------------------
// DriverError
// ---------------------------------------------------------------------------

/// Failures surfaced by driver operations.
///
/// All of these abort the current test case; none is retried.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The engine rejected a command or query.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Fewer (or more) jobs were available than the test expected.
    #[error("no jobs found for type '{job_type}': expected {expected}, activated {actual}")]
    ActivationMismatch {
        job_type: String,
        expected: u32,
        actual: u32,
    },

    /// The engine never reported the created instance.
    #[error("process instance {key} of '{process_id}' did not start")]
    NotStarted { process_id: String, key: Uuid },

    /// A job handler failed to produce an outcome.
    #[error("job handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// A busy/idle wait exceeded its bound.
    #[error("engine did not settle: {0}")]
    Settle(#[from] SettleTimeout),
}

// ---------------------------------------------------------------------------
// TestDriver
// ---------------------------------------------------------------------------

/// High-level test operations over an engine client.
///
/// Generic over the engine so the same driver runs against the in-process
/// simulation engine or any other implementation of the ports.
pub struct TestDriver<E> {
    engine: E,
    config: DriverConfig,
}

impl<E> TestDriver<E>
where
    E: EngineCommands + EngineClock + EngineQuery,
{
    /// Wrap an engine client with default settlement bounds.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, DriverConfig::default())
    }

    /// Wrap an engine client with explicit settlement bounds.
    pub fn with_config(engine: E, config: DriverConfig) -> Self {
        Self { engine, config }
    }

    /// Direct access to the underlying engine client.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Register a process-definition resource. Rejection is a setup
    /// failure and aborts the test.
    pub async fn deploy(
        &self,
        resource_name: &str,
        source: &str,
    ) -> Result<DeploymentResult, DriverError> {
        let result = self.engine.deploy_resource(resource_name, source).await?;
        tracing::info!(
            resource = resource_name,
            processes = result.processes.len(),
            "deployed process resource"
        );
        Ok(result)
    }

    /// Create an instance at its default start event and wait for the
    /// engine to report it started.
    pub async fn start_instance(
        &self,
        process_id: &str,
        variables: VariableMap,
    ) -> Result<InstanceHandle, DriverError> {
        self.start(CreateInstanceRequest::latest(process_id, variables))
            .await
    }

    /// Create an instance with token execution beginning immediately
    /// before `element_id`, bypassing all upstream flow.
    pub async fn start_instance_before(
        &self,
        process_id: &str,
        variables: VariableMap,
        element_id: &str,
    ) -> Result<InstanceHandle, DriverError> {
        self.start(CreateInstanceRequest::latest(process_id, variables).start_before(element_id))
            .await
    }

    async fn start(&self, request: CreateInstanceRequest) -> Result<InstanceHandle, DriverError> {
        let process_id = request.process_id.clone();
        let handle = self.engine.create_instance(request).await?;
        self.settle().await?;
        match self.engine.instance_status(handle.key).await {
            Ok(status) => {
                tracing::info!(
                    instance = %handle.key,
                    process = process_id.as_str(),
                    ?status,
                    "instance started"
                );
                Ok(handle)
            }
            Err(EngineError::InstanceNotFound(key)) => {
                Err(DriverError::NotStarted { process_id, key })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Activate exactly `expected` jobs of `job_type` and resolve each
    /// through `handler`. Any availability mismatch fails fast -- a single
    /// poll, no retry. Settles before returning.
    pub async fn complete_jobs(
        &self,
        job_type: &str,
        expected: u32,
        handler: &impl JobHandler,
    ) -> Result<(), DriverError> {
        let jobs = self.engine.activate_jobs(job_type, expected).await?;
        if jobs.len() as u32 != expected {
            return Err(DriverError::ActivationMismatch {
                job_type: job_type.to_string(),
                expected,
                actual: jobs.len() as u32,
            });
        }
        for job in &jobs {
            match handler.handle(job).await? {
                JobOutcome::Complete(variables) => {
                    self.engine.complete_job(job.key, &variables).await?;
                }
                JobOutcome::Error { code } => {
                    self.engine.throw_error(job.key, &code).await?;
                }
            }
        }
        tracing::debug!(job_type, count = jobs.len(), "resolved jobs");
        self.settle().await
    }

    /// Complete `expected` jobs of `job_type` with a fixed variable map.
    pub async fn complete_job(
        &self,
        job_type: &str,
        expected: u32,
        variables: VariableMap,
    ) -> Result<(), DriverError> {
        self.complete_jobs(job_type, expected, &CompleteWithVariables(variables))
            .await
    }

    /// Resolve `expected` jobs of `job_type` with an error code, driving
    /// the workflow's error-event path.
    pub async fn complete_job_with_error(
        &self,
        job_type: &str,
        expected: u32,
        error_code: &str,
    ) -> Result<(), DriverError> {
        self.complete_jobs(job_type, expected, &ThrowError::code(error_code))
            .await
    }

    /// Complete `expected` human-task work items with a fixed variable map.
    pub async fn complete_user_task(
        &self,
        expected: u32,
        variables: VariableMap,
    ) -> Result<(), DriverError> {
        self.complete_jobs(USER_TASK_JOB_TYPE, expected, &CompleteWithVariables(variables))
            .await
    }

    /// Publish a message and settle, so a successful correlation is
    /// observable immediately afterwards.
    pub async fn publish_message(
        &self,
        name: &str,
        correlation_key: &str,
    ) -> Result<(), DriverError> {
        self.engine.publish_message(name, correlation_key).await?;
        tracing::debug!(message = name, correlation_key, "published message");
        self.settle().await
    }

    /// Advance the virtual clock, wait for the engine to start reacting,
    /// then wait for it to settle. A timeout on either wait means the
    /// expected timer-driven transition did not occur.
    pub async fn advance_time(&self, by: Duration) -> Result<(), DriverError> {
        self.engine.increase_time(by).await?;
        tracing::info!(?by, "advanced virtual clock");
        self.engine.wait_for_busy(self.config.busy_timeout).await?;
        self.settle().await
    }

    /// Capture a settled snapshot of instance state for assertions.
    pub async fn assert_that(
        &self,
        instance: &InstanceHandle,
    ) -> Result<InstanceAssert, DriverError> {
        Ok(InstanceAssert::capture(&self.engine, instance.key).await?)
    }

    async fn settle(&self) -> Result<(), DriverError> {
        self.engine
            .wait_for_idle(self.config.idle_timeout)
            .await
            .map_err(DriverError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_mismatch_display_names_type_and_counts() {
        let err = DriverError::ActivationMismatch {
            job_type: "check-availability".to_string(),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("check-availability"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("activated 1"));
    }

    #[test]
    fn settle_timeout_wraps_into_driver_error() {
        let err = DriverError::from(SettleTimeout {
            what: "engine idle",
            timeout: Duration::from_secs(1),
        });
        assert!(err.to_string().contains("did not settle"));
        assert!(err.to_string().contains("engine idle"));
    }
}
