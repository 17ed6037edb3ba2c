//! The arithmetic tool set served by `abacus serve`.
//!
//! All four tools take two `number` operands `a` and `b` and return a
//! `number`. Results are f64 throughout; a result that is not finite is a
//! computation error rather than a value.

use serde_json::{Number, Value};

use crate::error::{McpError, Result};
use crate::protocol::{Arguments, ParameterSpec, ToolDefinition, ValueType};
use crate::registry::{FnHandler, ToolRegistry};

/// Binary operation on two operands.
type BinaryOp = fn(f64, f64) -> Result<f64>;

const TOOLS: &[(&str, &str, BinaryOp)] = &[
    ("add", "Add two numbers together", add),
    ("subtract", "Subtract second number from first number", subtract),
    ("multiply", "Multiply two numbers together", multiply),
    ("divide", "Divide first number by second number", divide),
];

/// `a + b`
pub fn add(a: f64, b: f64) -> Result<f64> {
    Ok(a + b)
}

/// `a - b`
pub fn subtract(a: f64, b: f64) -> Result<f64> {
    Ok(a - b)
}

/// `a * b`
pub fn multiply(a: f64, b: f64) -> Result<f64> {
    Ok(a * b)
}

/// `a / b`; fails when `b` is zero.
pub fn divide(a: f64, b: f64) -> Result<f64> {
    if b == 0.0 {
        return Err(McpError::computation("Cannot divide by zero"));
    }
    Ok(a / b)
}

/// Definition shared by the binary tools.
fn binary_definition(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition::new(name, description, ValueType::Number)
        .with_parameter(ParameterSpec::required("a", ValueType::Number).with_description("First number"))
        .with_parameter(ParameterSpec::required("b", ValueType::Number).with_description("Second number"))
}

/// Definitions of the arithmetic tools, in advertised order.
pub fn definitions() -> Vec<ToolDefinition> {
    TOOLS
        .iter()
        .map(|(name, description, _)| binary_definition(name, description))
        .collect()
}

fn operand(arguments: &Arguments, name: &str) -> Result<f64> {
    arguments
        .get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| McpError::invalid_argument(format!("parameter '{}' must be a number", name)))
}

/// Convert an f64 result to JSON, refusing NaN and infinities.
pub fn number_value(result: f64) -> Result<Value> {
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| McpError::computation(format!("result {} is not a finite number", result)))
}

/// Build a registry holding the arithmetic tools.
pub fn registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for (name, description, op) in TOOLS {
        let op = *op;
        registry.register(
            binary_definition(name, description),
            FnHandler::new(move |arguments: &Arguments| {
                let a = operand(arguments, "a")?;
                let b = operand(arguments, "b")?;
                number_value(op(a, b)?)
            }),
        )?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::executor::ToolExecutor;

    fn args(a: Value, b: Value) -> Arguments {
        let mut map = Arguments::new();
        map.insert("a".into(), a);
        map.insert("b".into(), b);
        map
    }

    #[test]
    fn test_operations() {
        assert_eq!(add(15.0, 7.0).unwrap(), 22.0);
        assert_eq!(subtract(15.0, 7.0).unwrap(), 8.0);
        assert_eq!(multiply(22.0, 3.0).unwrap(), 66.0);
        assert_eq!(divide(66.0, 2.0).unwrap(), 33.0);
        assert_eq!(divide(1.0, 4.0).unwrap(), 0.25);
    }

    #[test]
    fn test_divide_by_zero_is_computation_error() {
        assert!(matches!(divide(66.0, 0.0), Err(McpError::Computation(_))));
        assert!(matches!(divide(66.0, -0.0), Err(McpError::Computation(_))));
    }

    #[test]
    fn test_non_finite_results_rejected() {
        assert!(matches!(number_value(f64::INFINITY), Err(McpError::Computation(_))));
        assert!(matches!(number_value(f64::NAN), Err(McpError::Computation(_))));
        assert_eq!(number_value(2.5).unwrap(), json!(2.5));
    }

    #[test]
    fn test_registry_advertises_four_tools() {
        let registry = registry().unwrap();
        assert_eq!(registry.names(), vec!["add", "subtract", "multiply", "divide"]);
        for def in registry.list_tools() {
            assert_eq!(def.return_type, ValueType::Number);
            assert_eq!(def.required_parameters(), vec!["a", "b"]);
        }
        assert_eq!(definitions(), registry.list_tools());
    }

    #[tokio::test]
    async fn test_chained_calculation_through_executor() {
        let exec = ToolExecutor::new(Arc::new(registry().unwrap()));
        let sum = exec.execute("add", &args(json!(15), json!(7))).await.unwrap();
        let product = exec.execute("multiply", &args(sum, json!(3))).await.unwrap();
        let quotient = exec.execute("divide", &args(product, json!(2))).await.unwrap();
        assert_eq!(quotient.as_f64(), Some(33.0));
    }

    #[tokio::test]
    async fn test_overflow_is_reported() {
        let exec = ToolExecutor::new(Arc::new(registry().unwrap()));
        let err = exec
            .execute("multiply", &args(json!(1e308), json!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Computation(_)));
    }
}
