//! Deployment results returned by the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Confirmation returned when a process-definition resource is deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    /// Deployment key assigned by the engine.
    pub key: Uuid,
    /// The processes registered by this deployment.
    pub processes: Vec<DeployedProcess>,
}

impl DeploymentResult {
    /// Look up a deployed process by its process id.
    pub fn process(&self, process_id: &str) -> Option<&DeployedProcess> {
        self.processes.iter().find(|p| p.process_id == process_id)
    }
}

/// A single process registered by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedProcess {
    /// Declared process id (from the resource, not the file name).
    pub process_id: String,
    /// Version assigned by the engine (increments per process id).
    pub version: u32,
    /// Name of the resource the process was deployed from.
    pub resource_name: String,
}
