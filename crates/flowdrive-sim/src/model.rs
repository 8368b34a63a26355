//! Process-definition resources: parsing, validation, filesystem load.
//!
//! A resource is a YAML document describing one process as a graph of
//! elements. Deployment parses and validates the document; violations
//! surface as setup failures before any instance exists.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading a process-definition resource.
#[derive(Debug, Error)]
pub enum ModelError {
    /// YAML deserialization failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Process model
// ---------------------------------------------------------------------------

/// One deployable process: an id and its element graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Declared process id; instances are created against this.
    pub process_id: String,
    /// All elements of the process graph.
    pub elements: Vec<Element>,
}

impl ProcessModel {
    /// Look up an element by id.
    pub fn element(&self, element_id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == element_id)
    }

    /// The process's single start event. Guaranteed present after
    /// validation.
    pub fn start_element(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| matches!(e.kind, ElementKind::StartEvent { .. }))
    }
}

/// A node in the process graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    /// Unique element id, the name tests assert against.
    pub id: String,
    /// What the element does.
    #[serde(flatten)]
    pub kind: ElementKind,
}

/// Element behavior, tagged by `type` in the YAML document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    /// Entry point; exactly one per process.
    StartEvent { next: String },

    /// Terminal node. Reaching it with no remaining work completes the
    /// instance.
    EndEvent,

    /// Emits a job of `job_type` and waits for its resolution. Error
    /// events catch named error codes thrown against the job.
    ServiceTask {
        job_type: String,
        next: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        error_events: Vec<ErrorEvent>,
    },

    /// Emits human-task jobs and waits for their resolution. With
    /// `multi_instance_over`, one job is emitted per item of the named
    /// collection variable and all must resolve before the token moves.
    UserTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        multi_instance_over: Option<String>,
        next: String,
    },

    /// Routes the token along the first branch whose condition holds,
    /// falling back to the default flow.
    ExclusiveGateway {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        branches: Vec<GatewayBranch>,
        #[serde(default, rename = "default", skip_serializing_if = "Option::is_none")]
        default_flow: Option<String>,
    },

    /// Waits for whichever of its branches triggers first: a correlated
    /// message or a due timer.
    EventGateway { branches: Vec<EventBranch> },

    /// Waits for a single correlated message.
    MessageCatch {
        message_name: String,
        correlation_variable: String,
        next: String,
    },
}

/// Conditional outgoing flow of an exclusive gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayBranch {
    /// JEXL expression evaluated against the instance's variable scope.
    pub condition: String,
    /// Target element when the condition holds.
    pub next: String,
}

/// One branch of an event gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBranch {
    /// What arms the branch.
    pub trigger: EventTrigger,
    /// Target element when the trigger fires.
    pub next: String,
}

/// Trigger of an event-gateway branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventTrigger {
    /// A message with a matching name and correlation key.
    Message {
        name: String,
        correlation_variable: String,
    },
    /// A deadline relative to when the token arrived at the gateway.
    Timer { duration_secs: u64 },
}

/// Error catch attached to a service task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Error code matched against thrown errors.
    pub code: String,
    /// Target element when the code matches.
    pub next: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `ProcessModel`.
pub fn parse_model_yaml(yaml: &str) -> Result<ProcessModel, ModelError> {
    let model: ProcessModel =
        serde_yaml_ng::from_str(yaml).map_err(|e| ModelError::Parse(e.to_string()))?;
    validate_model(&model)?;
    Ok(model)
}

/// Load and validate a process model from a YAML file.
pub fn load_model_file(path: &Path) -> Result<ProcessModel, ModelError> {
    let yaml = std::fs::read_to_string(path)?;
    parse_model_yaml(&yaml)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a process model.
///
/// Checks:
/// - Process id is non-empty
/// - Exactly one start event exists
/// - All element ids are unique
/// - Every `next`/branch/default/error target resolves to an element
/// - Exclusive gateways have at least one branch or a default flow
/// - Event gateways have at least one branch
/// - Multi-instance collection variable names are non-empty
pub fn validate_model(model: &ProcessModel) -> Result<(), ModelError> {
    if model.process_id.is_empty() {
        return Err(ModelError::Validation(
            "process id must not be empty".to_string(),
        ));
    }

    if model.elements.is_empty() {
        return Err(ModelError::Validation(
            "process must have at least one element".to_string(),
        ));
    }

    let starts = model
        .elements
        .iter()
        .filter(|e| matches!(e.kind, ElementKind::StartEvent { .. }))
        .count();
    if starts != 1 {
        return Err(ModelError::Validation(format!(
            "process '{}' must have exactly one start event, found {starts}",
            model.process_id
        )));
    }

    let mut seen_ids = HashSet::new();
    for element in &model.elements {
        if !seen_ids.insert(element.id.as_str()) {
            return Err(ModelError::Validation(format!(
                "duplicate element id: '{}'",
                element.id
            )));
        }
    }

    for element in &model.elements {
        for target in element_targets(&element.kind) {
            if !seen_ids.contains(target.as_str()) {
                return Err(ModelError::Validation(format!(
                    "element '{}' targets unknown element '{target}'",
                    element.id
                )));
            }
        }

        match &element.kind {
            ElementKind::ExclusiveGateway {
                branches,
                default_flow,
            } if branches.is_empty() && default_flow.is_none() => {
                return Err(ModelError::Validation(format!(
                    "exclusive gateway '{}' has no branches and no default flow",
                    element.id
                )));
            }
            ElementKind::EventGateway { branches } if branches.is_empty() => {
                return Err(ModelError::Validation(format!(
                    "event gateway '{}' has no branches",
                    element.id
                )));
            }
            ElementKind::UserTask {
                multi_instance_over: Some(collection),
                ..
            } if collection.is_empty() => {
                return Err(ModelError::Validation(format!(
                    "user task '{}' names an empty multi-instance collection variable",
                    element.id
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

/// All element ids an element can route the token to.
fn element_targets(kind: &ElementKind) -> Vec<&String> {
    match kind {
        ElementKind::StartEvent { next } => vec![next],
        ElementKind::EndEvent => vec![],
        ElementKind::ServiceTask {
            next, error_events, ..
        } => std::iter::once(next)
            .chain(error_events.iter().map(|e| &e.next))
            .collect(),
        ElementKind::UserTask { next, .. } => vec![next],
        ElementKind::ExclusiveGateway {
            branches,
            default_flow,
        } => branches
            .iter()
            .map(|b| &b.next)
            .chain(default_flow.iter())
            .collect(),
        ElementKind::EventGateway { branches } => branches.iter().map(|b| &b.next).collect(),
        ElementKind::MessageCatch { next, .. } => vec![next],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LINEAR: &str = r#"
process_id: ShipmentProcess
elements:
  - id: StartEvent_Requested
    type: start_event
    next: ServiceTask_Pack
  - id: ServiceTask_Pack
    type: service_task
    job_type: pack
    next: EndEvent_Shipped
  - id: EndEvent_Shipped
    type: end_event
"#;

    #[test]
    fn parses_a_linear_process() {
        let model = parse_model_yaml(LINEAR).unwrap();
        assert_eq!(model.process_id, "ShipmentProcess");
        assert_eq!(model.elements.len(), 3);
        assert_eq!(model.start_element().unwrap().id, "StartEvent_Requested");
        match &model.element("ServiceTask_Pack").unwrap().kind {
            ElementKind::ServiceTask { job_type, next, .. } => {
                assert_eq!(job_type, "pack");
                assert_eq!(next, "EndEvent_Shipped");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parses_gateways_and_triggers() {
        let yaml = r#"
process_id: WaitProcess
elements:
  - id: Start
    type: start_event
    next: Gateway_Route
  - id: Gateway_Route
    type: exclusive_gateway
    branches:
      - condition: "urgent == true"
        next: Gateway_Wait
    default: End
  - id: Gateway_Wait
    type: event_gateway
    branches:
      - trigger: {type: message, name: arrived, correlation_variable: orderId}
        next: End
      - trigger: {type: timer, duration_secs: 60}
        next: End
  - id: End
    type: end_event
"#;
        let model = parse_model_yaml(yaml).unwrap();
        match &model.element("Gateway_Wait").unwrap().kind {
            ElementKind::EventGateway { branches } => {
                assert_eq!(branches.len(), 2);
                assert!(matches!(
                    branches[0].trigger,
                    EventTrigger::Message { .. }
                ));
                assert!(matches!(
                    branches[1].trigger,
                    EventTrigger::Timer { duration_secs: 60 }
                ));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_element_ids() {
        let yaml = r#"
process_id: BadProcess
elements:
  - id: Start
    type: start_event
    next: Start
  - id: Start
    type: end_event
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate element id"));
    }

    #[test]
    fn rejects_unknown_targets() {
        let yaml = r#"
process_id: BadProcess
elements:
  - id: Start
    type: start_event
    next: Missing
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown element 'Missing'"));
    }

    #[test]
    fn rejects_processes_without_a_single_start() {
        let yaml = r#"
process_id: BadProcess
elements:
  - id: End
    type: end_event
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one start event"));
    }

    #[test]
    fn rejects_gateway_without_outgoing_flow() {
        let yaml = r#"
process_id: BadProcess
elements:
  - id: Start
    type: start_event
    next: Gateway
  - id: Gateway
    type: exclusive_gateway
"#;
        let err = parse_model_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("no branches and no default flow"));
    }

    #[test]
    fn loads_model_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LINEAR.as_bytes()).unwrap();
        let model = load_model_file(file.path()).unwrap();
        assert_eq!(model.process_id, "ShipmentProcess");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_model_file(Path::new("/nonexistent/process.yaml")).unwrap_err();
        assert!(matches!(err, ModelError::Io(_)));
    }
}
