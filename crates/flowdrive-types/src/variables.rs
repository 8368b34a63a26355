//! Variable scopes exchanged with the engine.
//!
//! A process instance carries a mutable mapping of variable name to JSON
//! value. Job completions merge their output variables into this scope
//! (extend/overwrite); nothing is ever silently dropped.

use std::collections::HashMap;

use serde_json::Value;

/// A variable scope: variable name to JSON value.
pub type VariableMap = HashMap<String, Value>;

/// Build a [`VariableMap`] from name/value pairs.
///
/// Convenience for test fixtures:
///
/// ```
/// use flowdrive_types::variables::variables;
/// use serde_json::json;
///
/// let vars = variables([("price", json!(500)), ("orderId", json!("test"))]);
/// assert_eq!(vars["price"], json!(500));
/// ```
pub fn variables<const N: usize>(entries: [(&str, Value); N]) -> VariableMap {
    entries
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
