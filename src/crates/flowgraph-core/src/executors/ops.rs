//! Arithmetic and text-transform nodes

use super::{number_input, require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expr::number_value;
use crate::payload::Node;
use async_trait::async_trait;
use serde_json::Value;

/// `operation` — binary arithmetic over exactly two numeric inputs.
///
/// Accepts both the long operator spellings (`subtract`) and the short
/// ones (`sub`).
pub struct OperationExecutor;

#[async_trait]
impl NodeExecutor for OperationExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let op = require_str(node, &node.data.op, "op")?;
        let inputs = ctx.input_values(&node.id).await?;
        if inputs.len() != 2 {
            return Err(EngineError::missing_field(
                &node.id,
                format!("operation needs 2 inputs, got {}", inputs.len()),
            ));
        }
        let a = number_input(node, &inputs[0], 0)?;
        let b = number_input(node, &inputs[1], 1)?;

        let result = match op {
            "add" => a + b,
            "subtract" | "sub" => a - b,
            "multiply" | "mul" => a * b,
            "divide" | "div" => {
                if b == 0.0 {
                    return Err(EngineError::ExprRuntime(format!(
                        "node '{}': division by zero",
                        node.id
                    )));
                }
                a / b
            }
            other => {
                return Err(EngineError::missing_field(
                    &node.id,
                    format!("unknown operation '{}'", other),
                ))
            }
        };
        Ok(number_value(result))
    }
}

/// `text_operation` — case transforms over exactly one string input.
pub struct TextOperationExecutor;

#[async_trait]
impl NodeExecutor for TextOperationExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let op = require_str(node, &node.data.text_op, "text_op")?;
        let inputs = ctx.input_values(&node.id).await?;
        if inputs.len() != 1 {
            return Err(EngineError::missing_field(
                &node.id,
                format!("text operation needs 1 input, got {}", inputs.len()),
            ));
        }
        let text = inputs[0].as_str().ok_or_else(|| {
            EngineError::state_type_mismatch(
                &node.id,
                format!("text operation needs a string input, got {}", super::kind_of(&inputs[0])),
            )
        })?;

        let result = match op {
            "uppercase" => text.to_uppercase(),
            "lowercase" => text.to_lowercase(),
            "titlecase" => titlecase(text),
            "camelcase" => camelcase(text),
            "inversecase" => inversecase(text),
            other => {
                return Err(EngineError::missing_field(
                    &node.id,
                    format!("unknown text operation '{}'", other),
                ))
            }
        };
        Ok(Value::String(result))
    }
}

/// Uppercase the first letter of every whitespace-separated word.
fn titlecase(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

/// Collapse words into lowerCamelCase.
fn camelcase(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, word) in text.split_whitespace().enumerate() {
        let mut chars = word.chars();
        match chars.next() {
            None => continue,
            Some(first) => {
                if i == 0 {
                    out.extend(first.to_lowercase());
                } else {
                    out.extend(first.to_uppercase());
                }
                out.extend(chars.flat_map(|c| c.to_lowercase()));
            }
        }
    }
    out
}

/// Swap the case of every letter.
fn inversecase(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            if c.is_uppercase() {
                c.to_lowercase().collect::<Vec<_>>()
            } else {
                c.to_uppercase().collect::<Vec<_>>()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titlecase() {
        assert_eq!(titlecase("hello wide world"), "Hello Wide World");
        assert_eq!(titlecase("ALREADY UP"), "Already Up");
    }

    #[test]
    fn test_camelcase() {
        assert_eq!(camelcase("hello wide world"), "helloWideWorld");
        assert_eq!(camelcase("Single"), "single");
    }

    #[test]
    fn test_inversecase() {
        assert_eq!(inversecase("AbC1"), "aBc1");
    }
}
