//! Branching nodes: condition, switch, split

use super::{require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expr::{evaluate_str, truthy, Bindings};
use crate::payload::Node;
use async_trait::async_trait;
use serde_json::Value;

/// `condition` — evaluates the expression against state.
///
/// With inputs, truthy selects `inputs[0]` and falsy selects `inputs[1]`
/// (`Null` when absent); with no inputs the boolean itself is produced.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let expr = require_str(node, &node.data.condition, "condition")?;
        let inputs = ctx.input_values(&node.id).await?;

        let resolver = ctx.resolver();
        let mut scope = Bindings::over(&resolver);
        if let Some(first) = inputs.first() {
            scope = scope.bind("input", first.clone());
        }
        scope = scope.bind("inputs", Value::Array(inputs.clone()));

        let verdict = truthy(&evaluate_str(expr, &scope)?);
        if inputs.is_empty() {
            return Ok(Value::Bool(verdict));
        }
        let picked = if verdict {
            inputs.first().cloned()
        } else {
            inputs.get(1).cloned()
        };
        Ok(picked.unwrap_or(Value::Null))
    }
}

/// `switch` — first case whose `when` is truthy wins; a case without
/// `when` is the default.
pub struct SwitchExecutor;

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let cases = node.data.cases.as_ref().ok_or_else(|| {
            EngineError::missing_field(&node.id, "'cases' is required")
        })?;
        let inputs = ctx.input_values(&node.id).await?;
        let scrutinee = inputs.into_iter().next().unwrap_or(Value::Null);

        let resolver = ctx.resolver();
        let scope = Bindings::over(&resolver).bind("value", scrutinee);

        let mut default = None;
        for case in cases {
            match &case.when {
                Some(when) => {
                    if truthy(&evaluate_str(when, &scope)?) {
                        return Ok(case.value.clone());
                    }
                }
                None => default = Some(case.value.clone()),
            }
        }
        default.ok_or_else(|| EngineError::NoMatchingCase {
            node: node.id.clone(),
        })
    }
}

/// `split` — positional routing of one input across path expressions.
///
/// Produces an array of the same length as `paths`; element i is the
/// input where path i matched, `Null` where it did not.
pub struct SplitExecutor;

#[async_trait]
impl NodeExecutor for SplitExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let paths = node.data.paths.as_ref().ok_or_else(|| {
            EngineError::missing_field(&node.id, "'paths' is required")
        })?;
        let inputs = ctx.input_values(&node.id).await?;
        let input = inputs.into_iter().next().unwrap_or(Value::Null);

        let resolver = ctx.resolver();
        let scope = Bindings::over(&resolver).bind("value", input.clone());

        let mut routed = Vec::with_capacity(paths.len());
        for path in paths {
            if truthy(&evaluate_str(path, &scope)?) {
                routed.push(input.clone());
            } else {
                routed.push(Value::Null);
            }
        }
        Ok(Value::Array(routed))
    }
}
