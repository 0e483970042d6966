//! Iteration nodes: for_each and while_loop
//!
//! Both loop bodies are deferred child chains (the second input edge).
//! Every iteration runs the body against a fresh overlay and a fresh
//! branch scope; per-iteration overlays are never absorbed because the
//! same node ids re-execute each round.

use super::NodeExecutor;
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::expr::{evaluate_str, number_value, truthy, Bindings};
use crate::payload::Node;
use crate::state::WriteScope;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

/// `for_each` — map an array through the body chain.
///
/// Bindings `item` and `index` are visible to the body as branch-scope
/// variables. Without a body the node is an identity map. `parallel:
/// true` runs iterations with bounded concurrency (order-preserving).
pub struct ForEachExecutor;

#[async_trait]
impl NodeExecutor for ForEachExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let input_ids = ctx.input_ids(&node.id);
        let source = input_ids.first().ok_or_else(|| {
            EngineError::missing_field(&node.id, "for_each needs an array input")
        })?;
        let body = input_ids.get(1).cloned();

        let items = match ctx.resolve_input(source).await? {
            Value::Array(items) => items,
            other => {
                return Err(EngineError::state_type_mismatch(
                    &node.id,
                    format!("for_each needs an array input, got {}", super::kind_of(&other)),
                ))
            }
        };

        let max = ctx.config().max_iterations;
        if items.len() as u64 > max {
            return Err(EngineError::IterationCapExceeded { max_iterations: max });
        }

        let body = match body {
            Some(body) => body,
            // No body chain: pass the items through unchanged.
            None => return Ok(Value::Array(items)),
        };

        if node.data.parallel.unwrap_or(false) {
            let width = ctx.config().effective_parallelism();
            let results: Vec<Result<Value>> = futures::stream::iter(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| run_iteration(ctx, &body, item, index)),
            )
            .buffered(width)
            .collect()
            .await;
            return results.into_iter().collect::<Result<Vec<_>>>().map(Value::Array);
        }

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            ctx.check_cancelled()?;
            results.push(run_iteration(ctx, &body, item, index).await?);
        }
        Ok(Value::Array(results))
    }
}

/// One body execution with `item` / `index` bound in a fresh branch scope.
async fn run_iteration(
    ctx: &ExecutionContext,
    body: &str,
    item: Value,
    index: usize,
) -> Result<Value> {
    let guard = ctx.state().branch_scope(ctx.branch_id());
    let branch_ctx = ctx.with_branch(guard.id());
    branch_ctx.state().set_variable(
        "item",
        item,
        WriteScope::Branch,
        Some(guard.id()),
    )?;
    branch_ctx.state().set_variable(
        "index",
        number_value(index as f64),
        WriteScope::Branch,
        Some(guard.id()),
    )?;

    let (iter_ctx, _overlay) = branch_ctx.child_overlay();
    iter_ctx.resolve_input(body).await
}

/// Evaluate the `while_loop` condition with `accum` / `iteration` bound.
///
/// Kept as a synchronous helper so the borrowed `Bindings` (not `Send`)
/// never lives across an `.await` point inside the loop.
fn condition_met(
    ctx: &ExecutionContext,
    condition: &str,
    accum: &Value,
    iteration: u64,
) -> Result<bool> {
    let resolver = ctx.resolver();
    let scope = Bindings::over(&resolver)
        .bind("accum", accum.clone())
        .bind("iteration", number_value(iteration as f64));
    Ok(truthy(&evaluate_str(condition, &scope)?))
}

/// `while_loop` — fold the body until the condition turns truthy.
///
/// The first input (optional) seeds the accumulator; each body run
/// produces the next accumulator. The condition sees `accum` and
/// `iteration` and is checked before every round, so it doubles as the
/// cancellation-observation point the concurrency contract requires.
pub struct WhileLoopExecutor;

#[async_trait]
impl NodeExecutor for WhileLoopExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let condition = node.data.condition.as_deref().ok_or_else(|| {
            EngineError::missing_field(&node.id, "'condition' is required")
        })?;
        let input_ids = ctx.input_ids(&node.id);
        let body = input_ids.get(1).cloned();

        let mut accum = match input_ids.first() {
            Some(source) => ctx.resolve_input(source).await?,
            None => Value::Null,
        };

        let max = ctx.config().max_iterations;
        let mut iteration: u64 = 0;
        loop {
            ctx.check_cancelled()?;

            if condition_met(ctx, condition, &accum, iteration)? {
                return Ok(accum);
            }

            iteration += 1;
            if iteration > max {
                return Err(EngineError::IterationCapExceeded { max_iterations: max });
            }

            match &body {
                Some(body) => {
                    let guard = ctx.state().branch_scope(ctx.branch_id());
                    let branch_ctx = ctx.with_branch(guard.id());
                    branch_ctx.state().set_variable(
                        "accum",
                        accum.clone(),
                        WriteScope::Branch,
                        Some(guard.id()),
                    )?;
                    branch_ctx.state().set_variable(
                        "iteration",
                        number_value((iteration - 1) as f64),
                        WriteScope::Branch,
                        Some(guard.id()),
                    )?;
                    let (iter_ctx, _overlay) = branch_ctx.child_overlay();
                    accum = iter_ctx.resolve_input(body).await?;
                }
                // Bodyless loops still make progress through `iteration`.
                None => {}
            }
        }
    }
}
