//! Calculator tool binding (§4.B built-ins).
//!
//! Adapted from the teacher's standalone `Calculator`: arithmetic and the common single-argument
//! math functions are evaluated with `evalexpr` rather than a bespoke parser, then wrapped behind
//! the registry's `ArgSchema`/`Invoker` contract so the agent runtime never sees a calculator-
//! specific API.

use crate::gateway::tool_registry::{
    ArgField, ArgSchema, ArgType, InvocationError, Invoker, ToolBinding, ToolOutput,
};
use async_trait::async_trait;
use evalexpr::{context_map, eval_with_context, Value as EvalValue};
use std::sync::Arc;

pub struct Calculator;

impl Calculator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, expression: &str) -> Result<f64, String> {
        let context = context_map! {
            "pi" => std::f64::consts::PI,
            "e" => std::f64::consts::E,
        }
        .map_err(|e| e.to_string())?;

        let rewritten = rewrite_functions(expression);
        let result =
            eval_with_context(&rewritten, &context).map_err(|e| format!("invalid expression: {}", e))?;
        match result {
            EvalValue::Float(f) => Ok(f),
            EvalValue::Int(i) => Ok(i as f64),
            other => Err(format!("expression did not evaluate to a number: {:?}", other)),
        }
    }
}

impl Default for Calculator {
    fn default() -> Self {
        Self::new()
    }
}

/// `evalexpr`'s builtin math functions use a `math::` namespace; rewrite the bare names this
/// tool's schema documents (`sqrt(x)`, `sin(x)`, ...) into that namespace before evaluating.
fn rewrite_functions(expression: &str) -> String {
    const NAMES: &[&str] = &[
        "sqrt", "abs", "floor", "ceil", "round", "sin", "cos", "tan", "asin", "acos", "atan",
        "sinh", "cosh", "tanh", "ln", "log2", "exp",
    ];
    let mut out = expression.to_string();
    for name in NAMES {
        out = out.replace(&format!("{}(", name), &format!("math::{}(", name));
    }
    out.replace("log(", "math::log10(")
}

#[async_trait]
impl Invoker for Calculator {
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, InvocationError> {
        let expression = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| InvocationError("missing required argument: expression".into()))?;
        let value = self
            .evaluate(expression)
            .map_err(InvocationError)?;
        Ok(ToolOutput::text(value.to_string()))
    }
}

pub fn binding() -> ToolBinding {
    ToolBinding::new(
        "calculator",
        "Evaluates a mathematical expression and returns the numeric result. Supports \
         arithmetic, the standard trigonometric/logarithmic functions, and the constants pi and e.",
        ArgSchema::new().with_field(
            ArgField::new("expression", ArgType::String)
                .required()
                .with_description("The expression to evaluate, e.g. \"sqrt(16) + 2 * pi\""),
        ),
        Arc::new(Calculator::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_basic_arithmetic() {
        let calc = Calculator::new();
        assert_eq!(calc.evaluate("2 + 2 * 3").unwrap(), 8.0);
    }

    #[test]
    fn evaluates_trig_functions_in_radians() {
        let calc = Calculator::new();
        assert!((calc.evaluate("sin(0)").unwrap()).abs() < 1e-9);
    }

    #[test]
    fn resolves_named_constants() {
        let calc = Calculator::new();
        assert!((calc.evaluate("pi").unwrap() - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_expressions() {
        let calc = Calculator::new();
        assert!(calc.evaluate("2 + * 3").is_err());
    }

    #[tokio::test]
    async fn binding_invokes_through_the_registry_contract() {
        let binding = binding();
        let out = binding
            .call(&serde_json::json!({"expression": "sqrt(16)"}))
            .await
            .unwrap();
        assert_eq!(out.content, "4");
    }

    #[tokio::test]
    async fn binding_rejects_missing_expression_argument() {
        let binding = binding();
        let err = binding.call(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            crate::gateway::tool_registry::ToolCallError::Validation(_)
        ));
    }
}
