//! Fan-out/fan-in and caching nodes: parallel, join, cache
//!
//! Every incoming edge of a `parallel` or `join` node is one branch. A
//! deferred branch chain runs as its own cooperative task with a fresh
//! branch state scope, a fresh overlay, and a child cancellation token;
//! an already-computed predecessor contributes its cached value
//! immediately. Branch overlays are absorbed only for branches that
//! count toward the output (all successes for `all`/`collect`, the
//! winner for `any`/`race`).

use super::{require_str, NodeExecutor};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::payload::Node;
use async_trait::async_trait;
use futures::future::{join_all, select_all};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One branch prepared for concurrent execution.
struct Branch {
    ordinal: usize,
    token: CancellationToken,
    overlay: crate::context::OverlayHandle,
    guard: crate::state::BranchGuard,
    ctx: ExecutionContext,
    id: String,
}

fn prepare_branches(ctx: &ExecutionContext, node_id: &str) -> Vec<Branch> {
    ctx.input_ids(node_id)
        .into_iter()
        .enumerate()
        .map(|(ordinal, id)| {
            let token = ctx.cancel_token().child_token();
            let guard = ctx.state().branch_scope(ctx.branch_id());
            let (overlay_ctx, overlay) = ctx.child_overlay();
            let branch_ctx = overlay_ctx.with_branch(guard.id()).with_cancel(token.clone());
            Branch {
                ordinal,
                token,
                overlay,
                guard,
                ctx: branch_ctx,
                id,
            }
        })
        .collect()
}

impl Branch {
    async fn run(self) -> (usize, Result<Value>, crate::context::OverlayHandle) {
        let result = self.ctx.resolve_input(&self.id).await;
        // Tear the branch state scope down before reporting.
        drop(self.guard);
        (self.ordinal, result, self.overlay)
    }
}

/// `parallel` — run every input branch concurrently; output is the array
/// of branch results in edge order. A branch failure is fatal unless
/// `continue_on_error` is set, in which case failed branches yield Null.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let branches = prepare_branches(ctx, &node.id);
        if branches.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let continue_on_error = node.data.continue_on_error.unwrap_or(false);

        let outcomes = join_all(branches.into_iter().map(Branch::run)).await;

        let mut results = vec![Value::Null; outcomes.len()];
        let mut first_error = None;
        for (ordinal, result, overlay) in outcomes {
            match result {
                Ok(value) => {
                    ctx.absorb_overlay(&overlay);
                    results[ordinal] = value;
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    if !continue_on_error && first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(Value::Array(results)),
        }
    }
}

/// `join` — fan-in with a strategy: all | any | race | collect.
///
/// An optional `timeout` (seconds) bounds the whole wait; expiry cancels
/// every branch and fails with `Timeout`.
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let strategy = require_str(node, &node.data.join_strategy, "join_strategy")?.to_string();
        let branches = prepare_branches(ctx, &node.id);
        if branches.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        let tokens: Vec<CancellationToken> =
            branches.iter().map(|b| b.token.clone()).collect();

        let work = run_strategy(ctx, node, &strategy, branches);
        match node.data.timeout {
            None => work.await,
            Some(seconds) => {
                let deadline = Duration::from_secs_f64(seconds.max(0.0));
                let mut work = std::pin::pin!(work);
                tokio::select! {
                    result = &mut work => result,
                    _ = tokio::time::sleep(deadline) => {
                        for token in &tokens {
                            token.cancel();
                        }
                        // Drain cancelled branches so scopes unwind.
                        let _ = work.await;
                        Err(EngineError::Timeout {
                            duration_ms: deadline.as_millis() as u64,
                        })
                    }
                }
            }
        }
    }
}

async fn run_strategy(
    ctx: &ExecutionContext,
    node: &Node,
    strategy: &str,
    branches: Vec<Branch>,
) -> Result<Value> {
    match strategy {
        "all" => {
            let outcomes = join_all(branches.into_iter().map(Branch::run)).await;
            let mut results = vec![Value::Null; outcomes.len()];
            for (ordinal, result, overlay) in outcomes {
                let value = result?;
                ctx.absorb_overlay(&overlay);
                results[ordinal] = value;
            }
            Ok(Value::Array(results))
        }
        "collect" => {
            let outcomes = join_all(branches.into_iter().map(Branch::run)).await;
            let mut results = vec![Value::Null; outcomes.len()];
            for (ordinal, result, overlay) in outcomes {
                results[ordinal] = match result {
                    Ok(value) => {
                        ctx.absorb_overlay(&overlay);
                        json!({ "ok": value })
                    }
                    Err(err) => json!({ "err": err.to_string() }),
                };
            }
            Ok(Value::Array(results))
        }
        "any" => {
            let tokens: Vec<CancellationToken> =
                branches.iter().map(|b| b.token.clone()).collect();
            let mut pending: Vec<_> = branches
                .into_iter()
                .map(|b| Box::pin(b.run()))
                .collect();
            let mut last_error = None;
            while !pending.is_empty() {
                let ((_, result, overlay), _index, rest) = select_all(pending).await;
                pending = rest;
                match result {
                    Ok(value) => {
                        ctx.absorb_overlay(&overlay);
                        for token in &tokens {
                            token.cancel();
                        }
                        let _ = join_all(pending).await;
                        return Ok(value);
                    }
                    Err(err) => last_error = Some(err),
                }
            }
            Err(last_error.unwrap_or_else(|| {
                EngineError::missing_field(&node.id, "join 'any' had no branches")
            }))
        }
        "race" => {
            let tokens: Vec<CancellationToken> =
                branches.iter().map(|b| b.token.clone()).collect();
            let pending: Vec<_> = branches
                .into_iter()
                .map(|b| Box::pin(b.run()))
                .collect();
            let ((_, result, overlay), _index, rest) = select_all(pending).await;
            for token in &tokens {
                token.cancel();
            }
            let _ = join_all(rest).await;
            let value = result?;
            ctx.absorb_overlay(&overlay);
            Ok(value)
        }
        other => Err(EngineError::missing_field(
            &node.id,
            format!("unknown join strategy '{}'", other),
        )),
    }
}

/// `cache` — TTL-cached values with single-flight production.
///
/// `get` looks the key up; on a miss it runs the deferred producer chain
/// (the first input) under the key's flight lock and stores the result
/// with `cache_ttl`. `set` stores the input value explicitly; `delete`
/// and `clear` evict.
pub struct CacheExecutor;

#[async_trait]
impl NodeExecutor for CacheExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let op = require_str(node, &node.data.cache_op, "cache_op")?;
        let ttl = node.data.cache_ttl.unwrap_or(0);
        let cache = ctx.cache();

        match op {
            "get" => {
                let key = require_str(node, &node.data.cache_key, "cache_key")?;
                match ctx.input_ids(&node.id).into_iter().next() {
                    // No producer chain: a miss is simply Null.
                    None => Ok(cache.get(key).unwrap_or(Value::Null)),
                    Some(producer) => {
                        let producer_ctx = ctx;
                        cache
                            .get_or_compute(key, ttl, move || async move {
                                let (child_ctx, overlay) = producer_ctx.child_overlay();
                                let value = child_ctx.resolve_input(&producer).await?;
                                producer_ctx.absorb_overlay(&overlay);
                                Ok(value)
                            })
                            .await
                    }
                }
            }
            "set" => {
                let key = require_str(node, &node.data.cache_key, "cache_key")?;
                let inputs = ctx.input_values(&node.id).await?;
                let value = inputs.into_iter().next().ok_or_else(|| {
                    EngineError::missing_field(&node.id, "cache set needs an input value")
                })?;
                cache.set(key, value.clone(), ttl);
                Ok(value)
            }
            "delete" => {
                let key = require_str(node, &node.data.cache_key, "cache_key")?;
                Ok(Value::Bool(cache.delete(key)))
            }
            "clear" => {
                cache.clear();
                Ok(Value::Null)
            }
            other => Err(EngineError::missing_field(
                &node.id,
                format!("unknown cache operation '{}'", other),
            )),
        }
    }
}
