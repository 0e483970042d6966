//! Source and sink value nodes: number, text_input, visualization

use super::{require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expr::number_value;
use crate::payload::Node;
use async_trait::async_trait;
use serde_json::{json, Value};

/// `number` — produces its literal numeric value.
pub struct NumberExecutor;

#[async_trait]
impl NodeExecutor for NumberExecutor {
    async fn execute(&self, node: &Node, _ctx: &ExecutionContext) -> Result<Value> {
        let n = node
            .data
            .value
            .ok_or_else(|| EngineError::missing_field(&node.id, "'value' is required"))?;
        Ok(number_value(n))
    }
}

/// `text_input` — produces its literal text.
pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    async fn execute(&self, node: &Node, _ctx: &ExecutionContext) -> Result<Value> {
        let text = require_str(node, &node.data.text, "text")?;
        Ok(Value::String(text.to_string()))
    }
}

/// `visualization` — tags its first input with a display mode.
pub struct VisualizationExecutor;

#[async_trait]
impl NodeExecutor for VisualizationExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let mode = require_str(node, &node.data.mode, "mode")?;
        let inputs = ctx.input_values(&node.id).await?;
        let value = inputs
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::missing_field(&node.id, "visualization needs an input"))?;
        Ok(json!({ "mode": mode, "value": value }))
    }
}
