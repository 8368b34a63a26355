//! Assertion layer over settled instance state.
//!
//! `InstanceAssert` is a point-in-time snapshot of one instance: status,
//! active element set, execution history, and variable scope. Assertion
//! methods are pure checks that panic with an expected-vs-actual
//! diagnostic, so they read like any other test assertion and chain:
//!
//! ```ignore
//! driver.assert_that(&instance).await?
//!     .has_passed_element("EndEvent_HardwareSent")
//!     .is_completed();
//! ```
//!
//! Snapshots are only meaningful once the engine is idle; the driver's
//! settle discipline guarantees that for snapshots obtained through it.

use flowdrive_types::deployment::DeploymentResult;
use flowdrive_types::error::EngineError;
use flowdrive_types::instance::{ElementVisit, InstanceStatus, VisitState};
use flowdrive_types::variables::VariableMap;
use serde_json::Value;
use uuid::Uuid;

use crate::client::EngineQuery;

// ---------------------------------------------------------------------------
// DeploymentAssert
// ---------------------------------------------------------------------------

/// Assertions over a deployment confirmation.
pub struct DeploymentAssert<'a> {
    result: &'a DeploymentResult,
}

/// Entry point mirroring the driver's `assert_that` for deployments.
pub fn assert_deployment(result: &DeploymentResult) -> DeploymentAssert<'_> {
    DeploymentAssert { result }
}

impl DeploymentAssert<'_> {
    /// Panic unless the deployment registered `process_id`.
    pub fn contains_process(&self, process_id: &str) -> &Self {
        if self.result.process(process_id).is_none() {
            let actual: Vec<&str> = self
                .result
                .processes
                .iter()
                .map(|p| p.process_id.as_str())
                .collect();
            panic!(
                "expected deployment to contain process '{process_id}', but it registered {actual:?}"
            );
        }
        self
    }
}

// ---------------------------------------------------------------------------
// InstanceAssert
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of one instance's observable state.
#[derive(Debug, Clone)]
pub struct InstanceAssert {
    key: Uuid,
    status: InstanceStatus,
    active: Vec<String>,
    history: Vec<ElementVisit>,
    variables: VariableMap,
}

impl InstanceAssert {
    /// Fetch a snapshot through the query port.
    pub async fn capture<Q: EngineQuery>(
        engine: &Q,
        instance: Uuid,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            key: instance,
            status: engine.instance_status(instance).await?,
            active: engine.active_elements(instance).await?,
            history: engine.element_history(instance).await?,
            variables: engine.variables(instance).await?,
        })
    }

    /// Panic unless the instance has begun executing: something in its
    /// history, a waiting element, or a terminal status.
    pub fn is_started(&self) -> &Self {
        let begun = !self.history.is_empty()
            || !self.active.is_empty()
            || self.status != InstanceStatus::Active;
        if !begun {
            panic!("expected instance {} to be started, but no element was ever reached", self.key);
        }
        self
    }

    /// Panic unless the instance reached a completed terminal state.
    pub fn is_completed(&self) -> &Self {
        if self.status != InstanceStatus::Completed {
            panic!(
                "expected instance {} to be completed, but status is {:?} (waiting at {:?})",
                self.key, self.status, self.active
            );
        }
        self
    }

    /// Panic unless the set of waiting elements equals `expected` exactly.
    pub fn is_waiting_at_elements(&self, expected: &[&str]) -> &Self {
        let mut actual = self.active.clone();
        actual.sort();
        let mut want: Vec<String> = expected.iter().map(|e| e.to_string()).collect();
        want.sort();
        if actual != want {
            panic!(
                "expected instance {} to be waiting at {want:?}, but it is waiting at {actual:?}",
                self.key
            );
        }
        self
    }

    /// Panic unless `element_id` was completed somewhere in the history,
    /// regardless of the current position.
    pub fn has_passed_element(&self, element_id: &str) -> &Self {
        if !self.passed(element_id) {
            let passed: Vec<&str> = self
                .history
                .iter()
                .filter(|v| v.state == VisitState::Completed)
                .map(|v| v.element_id.as_str())
                .collect();
            panic!(
                "expected instance {} to have passed '{element_id}', but it passed {passed:?}",
                self.key
            );
        }
        self
    }

    /// Panic if `element_id` appears as completed in the history.
    pub fn has_not_passed_element(&self, element_id: &str) -> &Self {
        if self.passed(element_id) {
            panic!(
                "expected instance {} not to have passed '{element_id}', but it did",
                self.key
            );
        }
        self
    }

    /// Panic unless variable `name` holds exactly `expected`.
    pub fn has_variable_with_value(&self, name: &str, expected: &Value) -> &Self {
        match self.variables.get(name) {
            Some(actual) if actual == expected => self,
            Some(actual) => panic!(
                "expected instance {} variable '{name}' to be {expected}, but it is {actual}",
                self.key
            ),
            None => panic!(
                "expected instance {} variable '{name}' to be {expected}, but it is unset",
                self.key
            ),
        }
    }

    fn passed(&self, element_id: &str) -> bool {
        self.history
            .iter()
            .any(|v| v.element_id == element_id && v.state == VisitState::Completed)
    }

    #[cfg(test)]
    fn from_parts(
        status: InstanceStatus,
        active: Vec<&str>,
        history: Vec<ElementVisit>,
        variables: VariableMap,
    ) -> Self {
        Self {
            key: Uuid::nil(),
            status,
            active: active.into_iter().map(str::to_string).collect(),
            history,
            variables,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowdrive_types::deployment::DeployedProcess;
    use flowdrive_types::variables::variables;
    use serde_json::json;

    fn completed(element_id: &str) -> ElementVisit {
        ElementVisit {
            element_id: element_id.to_string(),
            state: VisitState::Completed,
            at: Utc::now(),
        }
    }

    fn terminated(element_id: &str) -> ElementVisit {
        ElementVisit {
            element_id: element_id.to_string(),
            state: VisitState::Terminated,
            at: Utc::now(),
        }
    }

    #[test]
    fn waiting_set_compares_regardless_of_order() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec!["B", "A"],
            vec![],
            variables([]),
        );
        snapshot.is_waiting_at_elements(&["A", "B"]);
    }

    #[test]
    #[should_panic(expected = "waiting at")]
    fn waiting_set_mismatch_panics() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec!["A"],
            vec![],
            variables([]),
        );
        snapshot.is_waiting_at_elements(&["B"]);
    }

    #[test]
    fn passed_element_checks_history() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Completed,
            vec![],
            vec![completed("Start"), completed("End")],
            variables([]),
        );
        snapshot
            .has_passed_element("Start")
            .has_not_passed_element("Middle")
            .is_completed();
    }

    #[test]
    #[should_panic(expected = "to have passed")]
    fn terminated_visit_does_not_count_as_passed() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec![],
            vec![terminated("ServiceTask_SendHardware")],
            variables([]),
        );
        snapshot.has_passed_element("ServiceTask_SendHardware");
    }

    #[test]
    #[should_panic(expected = "to be completed")]
    fn active_instance_is_not_completed() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec!["Task"],
            vec![],
            variables([]),
        );
        snapshot.is_completed();
    }

    #[test]
    fn variable_equality_is_exact() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec![],
            vec![],
            variables([("openAmount", json!(0.0))]),
        );
        snapshot.has_variable_with_value("openAmount", &json!(0.0));
    }

    #[test]
    #[should_panic(expected = "is unset")]
    fn missing_variable_panics_with_unset() {
        let snapshot =
            InstanceAssert::from_parts(InstanceStatus::Active, vec![], vec![], variables([]));
        snapshot.has_variable_with_value("openAmount", &json!(0.0));
    }

    #[test]
    fn started_when_history_or_waiting_exists() {
        let snapshot = InstanceAssert::from_parts(
            InstanceStatus::Active,
            vec!["Task"],
            vec![],
            variables([]),
        );
        snapshot.is_started();
    }

    #[test]
    #[should_panic(expected = "to be started")]
    fn untouched_active_instance_is_not_started() {
        let snapshot =
            InstanceAssert::from_parts(InstanceStatus::Active, vec![], vec![], variables([]));
        snapshot.is_started();
    }

    #[test]
    fn deployment_assert_finds_registered_process() {
        let result = DeploymentResult {
            key: Uuid::nil(),
            processes: vec![DeployedProcess {
                process_id: "PaymentProcess".to_string(),
                version: 1,
                resource_name: "payment.yaml".to_string(),
            }],
        };
        assert_deployment(&result).contains_process("PaymentProcess");
    }

    #[test]
    #[should_panic(expected = "to contain process")]
    fn deployment_assert_panics_on_missing_process() {
        let result = DeploymentResult {
            key: Uuid::nil(),
            processes: vec![],
        };
        assert_deployment(&result).contains_process("PaymentProcess");
    }
}
