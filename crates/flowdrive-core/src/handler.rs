//! Job handlers: the single capability behind every completion path.
//!
//! A handler turns an activated work item into an outcome -- output
//! variables or an error code. The driver owns command dispatch, so a
//! handler never talks to the engine directly; it only decides what the
//! resolution should be. Fixed-map completion, error completion, and
//! delegating handlers (invoking a mocked domain service) all implement
//! the same trait.

use flowdrive_types::job::ActivatedJob;
use flowdrive_types::variables::VariableMap;
use thiserror::Error;

/// Resolution a handler produces for one activated job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Complete the job, merging these variables into the instance scope.
    Complete(VariableMap),
    /// Resolve the job with a named error code.
    Error { code: String },
}

/// A handler failed to produce an outcome.
///
/// Distinct from [`JobOutcome::Error`]: throwing an error code is an
/// intended, test-asserted workflow path; a `HandlerError` is a defect in
/// the test's own plumbing (missing input, broken domain substitute).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The job's variable snapshot lacks an input the handler requires.
    #[error("job '{job_type}' is missing variable '{name}'")]
    MissingVariable { job_type: String, name: String },

    /// A domain-service collaborator failed.
    #[error("domain service failure: {0}")]
    Domain(String),
}

/// Capability: produce output variables or an error code for an activated
/// work item.
pub trait JobHandler: Send + Sync {
    /// Process one activated job.
    fn handle(
        &self,
        job: &ActivatedJob,
    ) -> impl std::future::Future<Output = Result<JobOutcome, HandlerError>> + Send;
}

/// Completes every job with the same fixed variable map.
#[derive(Debug, Clone, Default)]
pub struct CompleteWithVariables(pub VariableMap);

impl JobHandler for CompleteWithVariables {
    async fn handle(&self, _job: &ActivatedJob) -> Result<JobOutcome, HandlerError> {
        Ok(JobOutcome::Complete(self.0.clone()))
    }
}

/// Resolves every job with the same error code.
#[derive(Debug, Clone)]
pub struct ThrowError {
    /// Error code matched against the element's error events.
    pub code: String,
}

impl ThrowError {
    /// Handler throwing `code` for every job it sees.
    pub fn code(code: &str) -> Self {
        Self {
            code: code.to_string(),
        }
    }
}

impl JobHandler for ThrowError {
    async fn handle(&self, _job: &ActivatedJob) -> Result<JobOutcome, HandlerError> {
        Ok(JobOutcome::Error {
            code: self.code.clone(),
        })
    }
}
