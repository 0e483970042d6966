//! State-manipulating nodes: variable, extract, transform, accumulator,
//! counter, and the context publishers

use super::{kind_of, require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expr::number_value;
use crate::payload::Node;
use crate::state::{AccumKind, WriteScope};
use async_trait::async_trait;
use serde_json::Value;

/// `variable` — get/set/increment/append against the scoped state.
///
/// Writes land in the scope named by `scope` (default workflow); reads
/// walk branch → workflow → global.
pub struct VariableExecutor;

#[async_trait]
impl NodeExecutor for VariableExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let name = require_str(node, &node.data.var_name, "var_name")?;
        let op = require_str(node, &node.data.var_op, "var_op")?;
        let scope = WriteScope::parse(node.data.scope.as_deref())?;
        let branch = ctx.branch_id();
        let state = ctx.state();

        let inputs = ctx.input_values(&node.id).await?;
        let input = inputs.into_iter().next();

        match op {
            "get" => state
                .get_variable(name, branch)
                .ok_or_else(|| EngineError::StateMissingKey(name.to_string())),
            "set" => {
                let value = input.ok_or_else(|| {
                    EngineError::missing_field(&node.id, "variable set needs an input value")
                })?;
                state.set_variable(name, value.clone(), scope, branch)?;
                Ok(value)
            }
            "increment" => state.increment_variable(name, scope, branch),
            "append" => {
                let value = input.ok_or_else(|| {
                    EngineError::missing_field(&node.id, "variable append needs an input value")
                })?;
                state.append_variable(name, value, scope, branch)
            }
            other => Err(EngineError::missing_field(
                &node.id,
                format!("unknown variable operation '{}'", other),
            )),
        }
    }
}

/// `extract` — pull one dotted-path field or several fields out of an
/// object (or array) input.
///
/// A missing field fails with `MissingField` unless the node carries a
/// `fallback_value`.
pub struct ExtractExecutor;

#[async_trait]
impl NodeExecutor for ExtractExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let inputs = ctx.input_values(&node.id).await?;
        let source = inputs.into_iter().next().ok_or_else(|| {
            EngineError::missing_field(&node.id, "extract needs an input")
        })?;

        if let Some(field) = &node.data.field {
            return match extract_path(&source, field) {
                Some(value) => Ok(value),
                None => fallback_or_missing(node, field),
            };
        }
        if let Some(fields) = &node.data.fields {
            let mut out = serde_json::Map::new();
            for field in fields {
                match extract_path(&source, field) {
                    Some(value) => {
                        out.insert(field.clone(), value);
                    }
                    None => {
                        out.insert(field.clone(), fallback_or_missing(node, field)?);
                    }
                }
            }
            return Ok(Value::Object(out));
        }
        Err(EngineError::missing_field(
            &node.id,
            "'field' or 'fields' is required",
        ))
    }
}

fn fallback_or_missing(node: &Node, field: &str) -> Result<Value> {
    match &node.data.fallback_value {
        Some(fallback) => Ok(fallback.clone()),
        None => Err(EngineError::missing_field(
            &node.id,
            format!("field '{}' not present in input", field),
        )),
    }
}

/// Walk a dotted path; numeric segments index arrays.
fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        cursor = match cursor {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cursor.clone())
}

/// `transform` — structural transforms over one input.
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let kind = require_str(node, &node.data.transform_type, "transform_type")?;
        let inputs = ctx.input_values(&node.id).await?;
        let input = inputs.into_iter().next().ok_or_else(|| {
            EngineError::missing_field(&node.id, "transform needs an input")
        })?;

        let type_err = |want: &str| {
            EngineError::state_type_mismatch(
                &node.id,
                format!("transform '{}' needs {}, got {}", kind, want, kind_of(&input)),
            )
        };

        match kind {
            "reverse" => match &input {
                Value::Array(items) => {
                    Ok(Value::Array(items.iter().rev().cloned().collect()))
                }
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                _ => Err(type_err("an array or string")),
            },
            "sort" => match &input {
                Value::Array(items) => {
                    let mut sorted = items.clone();
                    sorted.sort_by(compare_values);
                    Ok(Value::Array(sorted))
                }
                _ => Err(type_err("an array")),
            },
            "unique" => match &input {
                Value::Array(items) => {
                    let mut seen = Vec::new();
                    for item in items {
                        if !seen.contains(item) {
                            seen.push(item.clone());
                        }
                    }
                    Ok(Value::Array(seen))
                }
                _ => Err(type_err("an array")),
            },
            "flatten" => match &input {
                Value::Array(items) => {
                    let mut flat = Vec::new();
                    for item in items {
                        match item {
                            Value::Array(inner) => flat.extend(inner.iter().cloned()),
                            other => flat.push(other.clone()),
                        }
                    }
                    Ok(Value::Array(flat))
                }
                _ => Err(type_err("an array")),
            },
            "first" => match &input {
                Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
                _ => Err(type_err("an array")),
            },
            "last" => match &input {
                Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
                _ => Err(type_err("an array")),
            },
            "length" => match &input {
                Value::Array(items) => Ok(number_value(items.len() as f64)),
                Value::String(s) => Ok(number_value(s.chars().count() as f64)),
                Value::Object(map) => Ok(number_value(map.len() as f64)),
                _ => Err(type_err("a collection")),
            },
            "keys" => match &input {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                _ => Err(type_err("an object")),
            },
            "values" => match &input {
                Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
                _ => Err(type_err("an object")),
            },
            "sum" => match &input {
                Value::Array(items) => {
                    let mut total = 0.0;
                    for item in items {
                        total += item.as_f64().ok_or_else(|| {
                            EngineError::state_type_mismatch(
                                &node.id,
                                format!("sum over non-numeric element {}", item),
                            )
                        })?;
                    }
                    Ok(number_value(total))
                }
                _ => Err(type_err("an array")),
            },
            "parse_json" => match &input {
                Value::String(s) => serde_json::from_str(s).map_err(|e| {
                    EngineError::state_type_mismatch(
                        &node.id,
                        format!("input is not valid JSON: {}", e),
                    )
                }),
                _ => Err(type_err("a string")),
            },
            "to_json" => Ok(Value::String(
                serde_json::to_string(&input).unwrap_or_else(|_| "null".to_string()),
            )),
            other => Err(EngineError::missing_field(
                &node.id,
                format!("unsupported transform '{}'", other),
            )),
        }
    }
}

/// Stable cross-type ordering for `sort`: nulls, booleans, numbers,
/// strings, then everything else by JSON text.
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| {
            a.to_string().cmp(&b.to_string())
        }),
    }
}

/// `accumulator` — merge inputs into a named accumulator.
pub struct AccumulatorExecutor;

#[async_trait]
impl NodeExecutor for AccumulatorExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let op = require_str(node, &node.data.accum_op, "accum_op")?;
        let name = node.data.var_name.as_deref().unwrap_or("default");
        let kind = AccumKind::parse(node.data.accum_kind.as_deref())?;
        let scope = WriteScope::parse(node.data.scope.as_deref())?;
        let branch = ctx.branch_id();
        let state = ctx.state();

        match op {
            "add" => {
                let inputs = ctx.input_values(&node.id).await?;
                let value = inputs.into_iter().next().ok_or_else(|| {
                    EngineError::missing_field(&node.id, "accumulator add needs an input")
                })?;
                state.accumulate(name, kind, value, scope, branch)
            }
            "get" => Ok(state.get_accumulator(name, branch)),
            "reset" => {
                state.reset_accumulator(name, scope, branch);
                Ok(Value::Null)
            }
            other => Err(EngineError::missing_field(
                &node.id,
                format!("unknown accumulator operation '{}'", other),
            )),
        }
    }
}

/// `counter` — integer counter stored as an exact double.
pub struct CounterExecutor;

#[async_trait]
impl NodeExecutor for CounterExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let op = require_str(node, &node.data.counter_op, "counter_op")?;
        let name = node.data.var_name.as_deref().unwrap_or("default");
        let scope = WriteScope::parse(node.data.scope.as_deref())?;
        let branch = ctx.branch_id();
        let state = ctx.state();

        let count = match op {
            "get" => state.get_counter(name, branch),
            "increment" => state.adjust_counter(name, 1.0, scope, branch),
            "decrement" => state.adjust_counter(name, -1.0, scope, branch),
            "reset" => {
                state.reset_counter(name, scope, branch);
                0.0
            }
            other => {
                return Err(EngineError::missing_field(
                    &node.id,
                    format!("unknown counter operation '{}'", other),
                ))
            }
        };
        Ok(number_value(count))
    }
}

/// `context_variable` / `context_constant` — publish a named value into
/// workflow state. Constants are immutable once registered.
///
/// These nodes are exempt from template interpolation: the literal
/// `context_value` is the intended payload.
pub struct ContextExecutor {
    pub constant: bool,
}

#[async_trait]
impl NodeExecutor for ContextExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let name = require_str(node, &node.data.context_name, "context_name")?;
        let value = node.data.context_value.clone().unwrap_or(Value::Null);
        ctx.state().register_context(name, value.clone(), self.constant)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_path() {
        let value = json!({"a": {"b": [10, 20]}});
        assert_eq!(extract_path(&value, "a.b.1"), Some(json!(20)));
        assert_eq!(extract_path(&value, "a.b"), Some(json!([10, 20])));
        assert_eq!(extract_path(&value, "a.z"), None);
        assert_eq!(extract_path(&value, "a.b.9"), None);
    }

    #[test]
    fn test_compare_values_orders_numbers_then_strings() {
        let mut items = vec![json!("b"), json!(2), json!("a"), json!(1), json!(null)];
        items.sort_by(compare_values);
        assert_eq!(items, vec![json!(null), json!(1), json!(2), json!("a"), json!("b")]);
    }
}
