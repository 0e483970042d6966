//! Payload model: nodes, edges, node data, and the execution result
//!
//! The engine consumes an already-parsed payload of the shape
//! `{ nodes: [...], edges: [...] }`. Nodes are immutable after parse; a
//! node's `type` may be omitted, in which case it is inferred from which
//! `data` fields are populated (see [`infer_type`]).
//!
//! [`NodeData`] is an optional-field record: at most a few fields are
//! populated per node, and executors pattern-match on presence. Unknown
//! payload fields are ignored.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph_core::payload::Payload;
//! use serde_json::json;
//!
//! let payload: Payload = serde_json::from_value(json!({
//!     "nodes": [
//!         {"id": "1", "data": {"value": 2}},
//!         {"id": "2", "data": {"value": 3}},
//!         {"id": "3", "data": {"op": "add"}}
//!     ],
//!     "edges": [
//!         {"id": "e1", "source": "1", "target": "3"},
//!         {"id": "e2", "source": "2", "target": "3"}
//!     ]
//! })).unwrap();
//! assert_eq!(payload.nodes.len(), 3);
//! ```

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// The 25 node types the engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Number,
    TextInput,
    Visualization,
    Operation,
    TextOperation,
    Http,
    Condition,
    ForEach,
    WhileLoop,
    Variable,
    Extract,
    Transform,
    Accumulator,
    Counter,
    Switch,
    Parallel,
    Join,
    Split,
    Delay,
    Cache,
    Retry,
    TryCatch,
    Timeout,
    ContextVariable,
    ContextConstant,
}

impl NodeType {
    /// Parse a type from its payload string form.
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name {
            "number" => Self::Number,
            "text_input" => Self::TextInput,
            "visualization" => Self::Visualization,
            "operation" => Self::Operation,
            "text_operation" => Self::TextOperation,
            "http" => Self::Http,
            "condition" => Self::Condition,
            "for_each" => Self::ForEach,
            "while_loop" => Self::WhileLoop,
            "variable" => Self::Variable,
            "extract" => Self::Extract,
            "transform" => Self::Transform,
            "accumulator" => Self::Accumulator,
            "counter" => Self::Counter,
            "switch" => Self::Switch,
            "parallel" => Self::Parallel,
            "join" => Self::Join,
            "split" => Self::Split,
            "delay" => Self::Delay,
            "cache" => Self::Cache,
            "retry" => Self::Retry,
            "try_catch" => Self::TryCatch,
            "timeout" => Self::Timeout,
            "context_variable" => Self::ContextVariable,
            "context_constant" => Self::ContextConstant,
            _ => return None,
        };
        Some(ty)
    }

    /// The snake_case name used in payloads and observer events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::TextInput => "text_input",
            Self::Visualization => "visualization",
            Self::Operation => "operation",
            Self::TextOperation => "text_operation",
            Self::Http => "http",
            Self::Condition => "condition",
            Self::ForEach => "for_each",
            Self::WhileLoop => "while_loop",
            Self::Variable => "variable",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Accumulator => "accumulator",
            Self::Counter => "counter",
            Self::Switch => "switch",
            Self::Parallel => "parallel",
            Self::Join => "join",
            Self::Split => "split",
            Self::Delay => "delay",
            Self::Cache => "cache",
            Self::Retry => "retry",
            Self::TryCatch => "try_catch",
            Self::Timeout => "timeout",
            Self::ContextVariable => "context_variable",
            Self::ContextConstant => "context_constant",
        }
    }

    /// Context nodes publish a named value into state and are skipped by
    /// template interpolation and by terminal-output selection.
    pub fn is_context(&self) -> bool {
        matches!(self, Self::ContextVariable | Self::ContextConstant)
    }

    /// Guard nodes execute their deferred predecessor chains on demand
    /// (per attempt, per iteration, per branch, or on cache miss) instead
    /// of consuming eagerly computed inputs.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Self::Retry
                | Self::Timeout
                | Self::TryCatch
                | Self::Parallel
                | Self::Join
                | Self::Cache
                | Self::ForEach
                | Self::WhileLoop
        )
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One case of a `switch` node. A case without `when` is the default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchCase {
    /// Expression evaluated with the scrutinee bound as `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Value the switch produces when this case matches
    #[serde(default)]
    pub value: Value,
}

/// The polymorphic data bag attached to every node.
///
/// All fields are optional; each executor requires its own subset and
/// ignores the rest. Unknown fields in the payload are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeData {
    // Scalars
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    // Operator tags
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    // Network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    // Control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cases: Option<Vec<SwitchCase>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_errors: Option<Vec<String>>,
    /// Bounded-concurrency flag for `for_each`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,

    // State
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub var_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accum_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accum_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// TTL in seconds; 0 = no expiry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<u64>,
    /// Write-scope selector for state nodes: global | workflow | branch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    // Context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_value: Option<Value>,

    /// Unknown payload fields land here and are ignored.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A typed unit of computation. Immutable after payload parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Raw type string; `None` or empty means "infer from data"
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_type: Option<String>,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Resolve this node's type: explicit string if present, otherwise
    /// inferred from populated data fields.
    pub fn resolved_type(&self) -> Result<NodeType> {
        match self.node_type.as_deref() {
            Some(raw) if !raw.is_empty() => {
                NodeType::parse(raw).ok_or_else(|| EngineError::UnknownNodeType {
                    node: self.id.clone(),
                    node_type: raw.to_string(),
                })
            }
            _ => infer_type(&self.data).ok_or_else(|| EngineError::UnknownNodeType {
                node: self.id.clone(),
                node_type: "<uninferable>".to_string(),
            }),
        }
    }
}

/// A value-carrying dependency between two nodes.
///
/// Multi-edges are allowed; the ordinal of an input is the index of the
/// corresponding incoming edge in edge-list insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// The parsed workflow payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// The execution result returned by the engine.
///
/// `node_results` holds a value for a node iff execution reached success
/// for that node. `final_output` is `Null` when no terminal produced one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub node_results: BTreeMap<String, Value>,
    pub final_output: Value,
    pub errors: Vec<String>,
}

/// Infer a node type from which data fields are populated.
///
/// Rules are first-match in this exact order. `for_each`, `while_loop`,
/// and `parallel` are never inferred; they require an explicit `type`.
/// Context data infers `context_variable`, never `context_constant`:
/// constants require an explicit `type`.
pub fn infer_type(data: &NodeData) -> Option<NodeType> {
    if data.value.is_some() {
        Some(NodeType::Number)
    } else if data.text.is_some() {
        Some(NodeType::TextInput)
    } else if data.mode.is_some() {
        Some(NodeType::Visualization)
    } else if data.op.is_some() {
        Some(NodeType::Operation)
    } else if data.text_op.is_some() {
        Some(NodeType::TextOperation)
    } else if data.url.is_some() {
        Some(NodeType::Http)
    } else if data.condition.is_some() {
        Some(NodeType::Condition)
    } else if data.var_name.is_some() && data.var_op.is_some() {
        Some(NodeType::Variable)
    } else if data.field.is_some() || data.fields.is_some() {
        Some(NodeType::Extract)
    } else if data.transform_type.is_some() {
        Some(NodeType::Transform)
    } else if data.accum_op.is_some() {
        Some(NodeType::Accumulator)
    } else if data.counter_op.is_some() {
        Some(NodeType::Counter)
    } else if data.cases.is_some() {
        Some(NodeType::Switch)
    } else if data.join_strategy.is_some() {
        Some(NodeType::Join)
    } else if data.paths.is_some() {
        Some(NodeType::Split)
    } else if data.duration.is_some() {
        Some(NodeType::Delay)
    } else if data.cache_op.is_some() && data.cache_key.is_some() {
        Some(NodeType::Cache)
    } else if data.context_name.is_some() && data.context_value.is_some() {
        Some(NodeType::ContextVariable)
    } else if data.max_attempts.is_some() || data.backoff_strategy.is_some() {
        Some(NodeType::Retry)
    } else if data.fallback_value.is_some() || data.continue_on_error.is_some() {
        Some(NodeType::TryCatch)
    } else if data.timeout.is_some() && data.timeout_action.is_some() {
        Some(NodeType::Timeout)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> NodeData {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_infer_scalar_types() {
        assert_eq!(infer_type(&data(json!({"value": 2}))), Some(NodeType::Number));
        assert_eq!(
            infer_type(&data(json!({"text": "hi"}))),
            Some(NodeType::TextInput)
        );
        assert_eq!(
            infer_type(&data(json!({"mode": "text"}))),
            Some(NodeType::Visualization)
        );
    }

    #[test]
    fn test_infer_respects_rule_order() {
        // `value` wins over `op` because it is checked first
        assert_eq!(
            infer_type(&data(json!({"value": 1, "op": "add"}))),
            Some(NodeType::Number)
        );
        // `var_name` alone is not enough for `variable`
        assert_eq!(infer_type(&data(json!({"var_name": "x"}))), None);
        assert_eq!(
            infer_type(&data(json!({"var_name": "x", "var_op": "set"}))),
            Some(NodeType::Variable)
        );
    }

    #[test]
    fn test_infer_context_is_variable_not_constant() {
        let inferred = infer_type(&data(json!({"context_name": "k", "context_value": 1})));
        assert_eq!(inferred, Some(NodeType::ContextVariable));
    }

    #[test]
    fn test_infer_resilience_wrappers() {
        assert_eq!(
            infer_type(&data(json!({"max_attempts": 3}))),
            Some(NodeType::Retry)
        );
        assert_eq!(
            infer_type(&data(json!({"fallback_value": null}))),
            None,
            "fallback_value: null deserializes as absent"
        );
        assert_eq!(
            infer_type(&data(json!({"fallback_value": 0}))),
            Some(NodeType::TryCatch)
        );
        assert_eq!(
            infer_type(&data(json!({"timeout": 5, "timeout_action": "fail"}))),
            Some(NodeType::Timeout)
        );
    }

    #[test]
    fn test_loops_and_parallel_require_explicit_type() {
        let node: Node = serde_json::from_value(json!({
            "id": "loop", "type": "for_each", "data": {}
        }))
        .unwrap();
        assert_eq!(node.resolved_type().unwrap(), NodeType::ForEach);
        // No data combination infers for_each
        assert_eq!(infer_type(&data(json!({"parallel": true}))), None);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let node: Node = serde_json::from_value(json!({
            "id": "x", "type": "quantum", "data": {}
        }))
        .unwrap();
        assert!(matches!(
            node.resolved_type(),
            Err(EngineError::UnknownNodeType { .. })
        ));
    }

    #[test]
    fn test_unknown_payload_fields_ignored() {
        let payload: Payload = serde_json::from_value(json!({
            "nodes": [{"id": "1", "data": {"value": 2, "color": "red"}}],
            "edges": [],
            "version": 7
        }))
        .unwrap();
        assert_eq!(payload.nodes[0].data.value, Some(2.0));
        assert!(payload.nodes[0].data.extra.contains_key("color"));
    }

    #[test]
    fn test_node_type_name_round_trip() {
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
            assert_eq!(ty.name(), name);
        }
    }
}
