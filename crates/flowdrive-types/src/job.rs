//! Work items (jobs) surfaced by the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::variables::VariableMap;

/// Reserved job type under which human-task work items are published.
///
/// User-task elements emit jobs of this type; everything else about their
/// lifecycle is identical to service-task jobs.
pub const USER_TASK_JOB_TYPE: &str = "flowdrive:user-task";

/// A work item handed out by a successful activation.
///
/// An activated job is exclusively owned by the activator until it is
/// resolved: the engine will not return it from another activation, and it
/// accepts exactly one completion or error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedJob {
    /// Job key assigned by the engine.
    pub key: Uuid,
    /// Job type the activation matched.
    pub job_type: String,
    /// Element in the process model that emitted the job.
    pub element_id: String,
    /// Instance the job belongs to.
    pub process_instance_key: Uuid,
    /// Snapshot of the instance's variable scope at activation time.
    pub variables: VariableMap,
}

impl ActivatedJob {
    /// Read a variable from the activation-time snapshot.
    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::variables;
    use serde_json::json;

    #[test]
    fn variable_lookup() {
        let job = ActivatedJob {
            key: Uuid::nil(),
            job_type: "credit-deduction".to_string(),
            element_id: "Task_DeductCredit".to_string(),
            process_instance_key: Uuid::nil(),
            variables: variables([("orderTotal", json!(42.0))]),
        };
        assert_eq!(job.variable("orderTotal"), Some(&json!(42.0)));
        assert_eq!(job.variable("missing"), None);
    }
}
