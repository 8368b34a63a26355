//! JEXL condition evaluation for exclusive-gateway branches.
//!
//! Conditions are evaluated against the instance's variable scope as the
//! context object -- variable values are never interpolated into the
//! expression string. Results are coerced to boolean with
//! JavaScript-like truthiness, so `available` and `available == true`
//! behave the same for a boolean variable.

use flowdrive_types::variables::VariableMap;
use serde_json::Value;
use thiserror::Error;

/// A gateway condition failed to evaluate.
#[derive(Debug, Error)]
#[error("condition '{condition}' failed to evaluate: {reason}")]
pub struct ConditionError {
    pub condition: String,
    pub reason: String,
}

/// JEXL evaluator for gateway conditions.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self {
            evaluator: jexl_eval::Evaluator::new(),
        }
    }

    /// Evaluate `condition` against `variables`, coercing to boolean.
    ///
    /// Missing variables evaluate to null (falsy), so a condition over an
    /// unset variable routes to the default flow rather than erroring.
    pub fn evaluate(
        &self,
        condition: &str,
        variables: &VariableMap,
    ) -> Result<bool, ConditionError> {
        let context = serde_json::to_value(variables).map_err(|e| ConditionError {
            condition: condition.to_string(),
            reason: e.to_string(),
        })?;
        let result = self
            .evaluator
            .eval_in_context(condition, &context)
            .map_err(|e| ConditionError {
                condition: condition.to_string(),
                reason: e.to_string(),
            })?;
        Ok(truthy(&result))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness for condition results.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowdrive_types::variables::variables;
    use serde_json::json;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new()
    }

    #[test]
    fn numeric_comparison() {
        let vars = variables([("price", json!(1500))]);
        assert!(evaluator().evaluate("price >= 1000", &vars).unwrap());
        assert!(!evaluator().evaluate("price < 1000", &vars).unwrap());
    }

    #[test]
    fn boolean_equality() {
        let vars = variables([("available", json!(true))]);
        assert!(evaluator().evaluate("available == true", &vars).unwrap());
        assert!(!evaluator().evaluate("available == false", &vars).unwrap());
    }

    #[test]
    fn missing_variable_is_falsy() {
        let vars = variables([]);
        assert!(!evaluator().evaluate("approved == true", &vars).unwrap());
        assert!(!evaluator().evaluate("approved", &vars).unwrap());
    }

    #[test]
    fn bare_boolean_variable_is_its_own_condition() {
        let vars = variables([("approved", json!(false))]);
        assert!(!evaluator().evaluate("approved", &vars).unwrap());
    }

    #[test]
    fn compound_conditions() {
        let vars = variables([("openAmount", json!(50.0)), ("verified", json!(true))]);
        assert!(evaluator()
            .evaluate("openAmount > 0 && verified == true", &vars)
            .unwrap());
    }

    #[test]
    fn malformed_expression_is_an_error() {
        let vars = variables([]);
        let err = evaluator().evaluate("price >=", &vars).unwrap_err();
        assert!(err.to_string().contains("price >="));
    }
}
