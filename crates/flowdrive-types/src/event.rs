//! Engine events published on the record stream.
//!
//! The simulation engine broadcasts one event per state transition it
//! performs. Subscribers observe execution progress without polling the
//! query interface; tests use the stream to assert on ordering that the
//! point-in-time queries cannot show.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single engine record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A process-definition resource was registered.
    DeploymentCreated {
        key: Uuid,
        process_id: String,
        version: u32,
    },
    /// A process instance was admitted.
    InstanceCreated {
        instance: Uuid,
        process_id: String,
    },
    /// A token entered a wait-state element.
    ElementActivated {
        instance: Uuid,
        element_id: String,
    },
    /// An element finished and the token moved on.
    ElementCompleted {
        instance: Uuid,
        element_id: String,
    },
    /// An element was cut short by an error event or termination.
    ElementTerminated {
        instance: Uuid,
        element_id: String,
    },
    /// A work item became available for activation.
    JobCreated {
        key: Uuid,
        instance: Uuid,
        job_type: String,
        element_id: String,
    },
    /// A work item was completed with output variables.
    JobCompleted {
        key: Uuid,
        instance: Uuid,
    },
    /// A work item was resolved with an error code.
    JobErrored {
        key: Uuid,
        instance: Uuid,
        error_code: String,
    },
    /// A published message matched a waiting instance.
    MessageCorrelated {
        instance: Uuid,
        name: String,
        correlation_key: String,
    },
    /// A timer branch fired after a clock advance.
    TimerFired {
        instance: Uuid,
        element_id: String,
        target: String,
    },
    /// The virtual clock moved forward.
    ClockAdvanced {
        by_ms: u64,
    },
    /// An instance reached a terminal completed state.
    InstanceCompleted {
        instance: Uuid,
    },
    /// An instance was terminated without completing.
    InstanceTerminated {
        instance: Uuid,
        reason: String,
    },
}
