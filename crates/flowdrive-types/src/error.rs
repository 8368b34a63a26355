//! Engine-facing error taxonomy.

use thiserror::Error;
use uuid::Uuid;

/// Errors returned by an engine implementation for rejected commands and
/// failed queries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A process-definition resource failed to parse or validate.
    #[error("invalid process resource '{resource}': {reason}")]
    InvalidResource { resource: String, reason: String },

    /// No deployed definition for the process id.
    #[error("process not found: '{0}'")]
    ProcessNotFound(String),

    /// The process id exists but the requested version does not.
    #[error("process '{process_id}' has no version {version}")]
    VersionNotFound { process_id: String, version: u32 },

    /// A named element does not exist in the process model.
    #[error("element '{element_id}' not found in process '{process_id}'")]
    ElementNotFound {
        process_id: String,
        element_id: String,
    },

    /// No instance with this key.
    #[error("process instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// No job with this key.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// A resolution was attempted on a job that was never activated.
    #[error("job {0} has not been activated")]
    JobNotActivated(Uuid),

    /// A second resolution was attempted on an already-resolved job.
    #[error("job {0} already resolved")]
    JobAlreadyResolved(Uuid),

    /// An error code was thrown that no error event on the element catches.
    #[error("no error event with code '{code}' on element '{element_id}'")]
    UnhandledError { element_id: String, code: String },

    /// The engine was shut down and accepts no further commands.
    #[error("engine shut down")]
    Shutdown,
}
