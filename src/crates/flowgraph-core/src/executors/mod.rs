//! Node executors: one strategy per node type
//!
//! Dispatch is a strategy map `NodeType → executor`; adding a node type
//! means adding a variant here and registering it in
//! [`default_executors`]. Executors share a capability set through the
//! borrowed [`ExecutionContext`]: read predecessors, read/write state,
//! evaluate expressions, issue HTTP, sleep, run child chains, observe
//! cancellation.
//!
//! | Module | Types |
//! |---|---|
//! | `value` | number, text_input, visualization |
//! | `ops` | operation, text_operation |
//! | `network` | http |
//! | `control` | condition, switch, split |
//! | `loops` | for_each, while_loop |
//! | `stateops` | variable, extract, transform, accumulator, counter, context_variable, context_constant |
//! | `resilience` | retry, timeout, try_catch, delay |
//! | `concurrent` | parallel, join, cache |

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::payload::{Node, NodeType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

mod concurrent;
mod control;
mod loops;
mod network;
mod ops;
mod resilience;
mod stateops;
mod value;

/// One node-type strategy.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value>;
}

/// Build the full strategy map covering every [`NodeType`].
pub fn default_executors() -> HashMap<NodeType, Arc<dyn NodeExecutor>> {
    let mut map: HashMap<NodeType, Arc<dyn NodeExecutor>> = HashMap::new();
    map.insert(NodeType::Number, Arc::new(value::NumberExecutor));
    map.insert(NodeType::TextInput, Arc::new(value::TextInputExecutor));
    map.insert(
        NodeType::Visualization,
        Arc::new(value::VisualizationExecutor),
    );
    map.insert(NodeType::Operation, Arc::new(ops::OperationExecutor));
    map.insert(
        NodeType::TextOperation,
        Arc::new(ops::TextOperationExecutor),
    );
    map.insert(NodeType::Http, Arc::new(network::HttpExecutor));
    map.insert(NodeType::Condition, Arc::new(control::ConditionExecutor));
    map.insert(NodeType::Switch, Arc::new(control::SwitchExecutor));
    map.insert(NodeType::Split, Arc::new(control::SplitExecutor));
    map.insert(NodeType::ForEach, Arc::new(loops::ForEachExecutor));
    map.insert(NodeType::WhileLoop, Arc::new(loops::WhileLoopExecutor));
    map.insert(NodeType::Variable, Arc::new(stateops::VariableExecutor));
    map.insert(NodeType::Extract, Arc::new(stateops::ExtractExecutor));
    map.insert(NodeType::Transform, Arc::new(stateops::TransformExecutor));
    map.insert(
        NodeType::Accumulator,
        Arc::new(stateops::AccumulatorExecutor),
    );
    map.insert(NodeType::Counter, Arc::new(stateops::CounterExecutor));
    map.insert(
        NodeType::ContextVariable,
        Arc::new(stateops::ContextExecutor { constant: false }),
    );
    map.insert(
        NodeType::ContextConstant,
        Arc::new(stateops::ContextExecutor { constant: true }),
    );
    map.insert(NodeType::Parallel, Arc::new(concurrent::ParallelExecutor));
    map.insert(NodeType::Join, Arc::new(concurrent::JoinExecutor));
    map.insert(NodeType::Cache, Arc::new(concurrent::CacheExecutor));
    map.insert(NodeType::Retry, Arc::new(resilience::RetryExecutor));
    map.insert(NodeType::Timeout, Arc::new(resilience::TimeoutExecutor));
    map.insert(NodeType::TryCatch, Arc::new(resilience::TryCatchExecutor));
    map.insert(NodeType::Delay, Arc::new(resilience::DelayExecutor));
    map
}

/// A required string field, or `MissingField`.
pub(crate) fn require_str<'a>(
    node: &'a Node,
    field: &'a Option<String>,
    name: &str,
) -> Result<&'a str> {
    field
        .as_deref()
        .ok_or_else(|| EngineError::missing_field(&node.id, format!("'{}' is required", name)))
}

/// A numeric input value, or `StateTypeMismatch`.
pub(crate) fn number_input(node: &Node, value: &Value, ordinal: usize) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        EngineError::state_type_mismatch(
            &node.id,
            format!("input {} must be a number, got {}", ordinal, kind_of(value)),
        )
    })
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_node_type_has_an_executor() {
        let executors = default_executors();
        for name in [
            "number",
            "text_input",
            "visualization",
            "operation",
            "text_operation",
            "http",
            "condition",
            "for_each",
            "while_loop",
            "variable",
            "extract",
            "transform",
            "accumulator",
            "counter",
            "switch",
            "parallel",
            "join",
            "split",
            "delay",
            "cache",
            "retry",
            "try_catch",
            "timeout",
            "context_variable",
            "context_constant",
        ] {
            let ty = NodeType::parse(name).unwrap();
            assert!(executors.contains_key(&ty), "no executor for {}", name);
        }
        assert_eq!(executors.len(), 25);
    }
}
