//! Command payloads submitted to the engine.

use serde::{Deserialize, Serialize};

use crate::variables::VariableMap;

/// Which definition version an instance is created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSelector {
    /// The highest deployed version of the process id.
    Latest,
    /// An exact version number.
    Exact(u32),
}

/// Request to create a process instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    /// Process id to instantiate.
    pub process_id: String,
    /// Version selector (tests resolve `Latest`).
    pub version: VersionSelector,
    /// Initial variable scope.
    pub variables: VariableMap,
    /// When set, token execution begins immediately before this element,
    /// bypassing all upstream flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_before: Option<String>,
}

impl CreateInstanceRequest {
    /// Request an instance of the latest version, starting at the default
    /// start event.
    pub fn latest(process_id: &str, variables: VariableMap) -> Self {
        Self {
            process_id: process_id.to_string(),
            version: VersionSelector::Latest,
            variables,
            start_before: None,
        }
    }

    /// Begin token execution immediately before the named element.
    pub fn start_before(mut self, element_id: &str) -> Self {
        self.start_before = Some(element_id.to_string());
        self
    }
}
