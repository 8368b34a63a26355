//! Process-instance handles, statuses, and execution history entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle to a created process instance.
///
/// The instance itself lives in the engine; this is the reference a test
/// holds to drive queries and assertions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    /// Instance key assigned by the engine (UUIDv7, time-sortable).
    pub key: Uuid,
    /// Process id the instance was created from.
    pub process_id: String,
    /// Resolved definition version.
    pub version: u32,
}

/// Lifecycle status of a process instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The instance has tokens waiting or in flight.
    Active,
    /// The instance reached an end event with no remaining work.
    Completed,
    /// The instance was torn down before completing (unresolvable state).
    Terminated,
}

/// One entry in an instance's execution history.
///
/// History records elements the token has left behind; the current waiting
/// position is a separate live query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementVisit {
    /// Element id in the process model.
    pub element_id: String,
    /// How the element ended.
    pub state: VisitState,
    /// Virtual-clock timestamp of the visit.
    pub at: DateTime<Utc>,
}

/// Terminal state of a visited element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitState {
    /// The element ran to completion and the token moved on.
    Completed,
    /// The element was cut short (error event, instance termination).
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn visit_roundtrip() {
        let visit = ElementVisit {
            element_id: "ServiceTask_SendHardware".to_string(),
            state: VisitState::Terminated,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&visit).unwrap();
        let back: ElementVisit = serde_json::from_value(json).unwrap();
        assert_eq!(back, visit);
    }
}
