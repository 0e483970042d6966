//! Resilience wrappers: retry, timeout, try_catch, delay
//!
//! Each wrapper treats its first input chain as the child computation.
//! Deferred children are re-executed on demand (per retry attempt, under
//! the timeout deadline); children that already ran eagerly contribute
//! their cached value, which makes a wrapper over a plain value a no-op
//! passthrough.
//!
//! Children run against an overlay result scope that is absorbed only on
//! success, so a failed attempt leaves no partial results behind.

use super::NodeExecutor;
use crate::context::ExecutionContext;
use crate::error::{EngineError, ErrorKind, Result};
use crate::payload::Node;
use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay growth between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

impl BackoffStrategy {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None | Some("exponential") => Ok(Self::Exponential),
            Some("constant") => Ok(Self::Constant),
            Some("linear") => Ok(Self::Linear),
            Some(other) => Err(EngineError::ExprParse(format!(
                "unknown backoff strategy '{}'",
                other
            ))),
        }
    }
}

/// Backoff configuration for the retry wrapper.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    /// Base delay in seconds
    pub base: f64,
    /// Optional ceiling in seconds
    pub max_backoff: Option<f64>,
    /// Randomize delays by 0.5x–1.5x. Off by default: deterministic
    /// executions promise reproducible sleep sequences.
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(strategy: BackoffStrategy, base: f64) -> Self {
        Self {
            strategy,
            base,
            max_backoff: None,
            jitter: false,
        }
    }

    pub fn with_max_backoff(mut self, seconds: f64) -> Self {
        self.max_backoff = Some(seconds);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let n = attempt.max(1) as f64;
        let raw = match self.strategy {
            BackoffStrategy::Constant => self.base,
            BackoffStrategy::Linear => self.base * n,
            BackoffStrategy::Exponential => self.base * 2f64.powi(attempt.saturating_sub(1) as i32),
        };
        let capped = match self.max_backoff {
            Some(max) => raw.min(max),
            None => raw,
        };
        let final_delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay.max(0.0))
    }
}

/// `retry` — re-run the child chain until it succeeds or attempts run out.
///
/// `max_attempts` counts total attempts, not retries. Transport errors and
/// timeouts retry by default; `allowed_errors` widens the set by kind
/// name. Exhaustion re-raises the last error wrapped as `RetryExhausted`.
pub struct RetryExecutor;

#[async_trait]
impl NodeExecutor for RetryExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let child = ctx.input_ids(&node.id).into_iter().next().ok_or_else(|| {
            EngineError::missing_field(&node.id, "retry needs a child input")
        })?;

        let max_attempts = node.data.max_attempts.unwrap_or(3).max(1);
        let mut policy = BackoffPolicy::new(
            BackoffStrategy::parse(node.data.backoff_strategy.as_deref())?,
            node.data.duration.unwrap_or(0.5),
        );
        if let Some(max) = node.data.max_backoff {
            policy = policy.with_max_backoff(max);
        }
        let allowed = parse_allowed(node.data.allowed_errors.as_deref())?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            ctx.check_cancelled()?;

            let (child_ctx, overlay) = ctx.child_overlay();
            match child_ctx.resolve_input(&child).await {
                Ok(value) => {
                    ctx.absorb_overlay(&overlay);
                    return Ok(value);
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    // Non-retryable kinds surface unchanged; only
                    // exhaustion wraps.
                    if !is_retryable(&err, &allowed) {
                        return Err(err);
                    }
                    if attempt >= max_attempts {
                        return Err(EngineError::RetryExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = policy.delay(attempt);
                    warn!(
                        node_id = %node.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    // Back-off sleeps must observe cancellation.
                    tokio::select! {
                        biased;
                        _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn parse_allowed(raw: Option<&[String]>) -> Result<Vec<ErrorKind>> {
    let mut kinds = Vec::new();
    for name in raw.unwrap_or_default() {
        match ErrorKind::parse(name) {
            Some(kind) => kinds.push(kind),
            None => {
                return Err(EngineError::ExprParse(format!(
                    "unknown error kind '{}' in allowed_errors",
                    name
                )))
            }
        }
    }
    Ok(kinds)
}

fn is_retryable(err: &EngineError, allowed: &[ErrorKind]) -> bool {
    let kind = err.kind();
    matches!(kind, ErrorKind::TransportError | ErrorKind::Timeout) || allowed.contains(&kind)
}

/// `timeout` — bound the child chain by a deadline.
///
/// On expiry the child's cancellation token fires and the child is
/// awaited so branch scopes tear down and `node.cancelled` events are
/// emitted; then the wrapper either fails with `Timeout` or produces the
/// fallback value.
pub struct TimeoutExecutor;

#[async_trait]
impl NodeExecutor for TimeoutExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let seconds = node.data.timeout.ok_or_else(|| {
            EngineError::missing_field(&node.id, "'timeout' is required")
        })?;
        let action = node.data.timeout_action.as_deref().unwrap_or("fail");
        let child = ctx.input_ids(&node.id).into_iter().next().ok_or_else(|| {
            EngineError::missing_field(&node.id, "timeout needs a child input")
        })?;

        let deadline = Duration::from_secs_f64(seconds.max(0.0));
        let child_token = ctx.cancel_token().child_token();
        let (overlay_ctx, overlay) = ctx.child_overlay();
        let child_ctx = overlay_ctx.with_cancel(child_token.clone());

        let mut work = std::pin::pin!(child_ctx.resolve_input(&child));
        tokio::select! {
            result = &mut work => {
                return match result {
                    Ok(value) => {
                        ctx.absorb_overlay(&overlay);
                        Ok(value)
                    }
                    Err(err) => Err(err),
                };
            }
            _ = tokio::time::sleep(deadline) => {}
        }

        debug!(node_id = %node.id, timeout_secs = seconds, "deadline expired, cancelling child");
        child_token.cancel();
        // Let the child observe the signal and unwind cleanly.
        let _ = work.await;

        match action {
            "fallback" => Ok(node.data.fallback_value.clone().unwrap_or(Value::Null)),
            "fail" => Err(EngineError::Timeout {
                duration_ms: deadline.as_millis() as u64,
            }),
            other => Err(EngineError::missing_field(
                &node.id,
                format!("unknown timeout_action '{}'", other),
            )),
        }
    }
}

/// `try_catch` — absorb any child error into the fallback value, or skip
/// with `Null` when `continue_on_error` is set. Cancellation is never
/// absorbed.
pub struct TryCatchExecutor;

#[async_trait]
impl NodeExecutor for TryCatchExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let child = match ctx.input_ids(&node.id).into_iter().next() {
            Some(child) => child,
            None => return Ok(node.data.fallback_value.clone().unwrap_or(Value::Null)),
        };

        let (child_ctx, overlay) = ctx.child_overlay();
        match child_ctx.resolve_input(&child).await {
            Ok(value) => {
                ctx.absorb_overlay(&overlay);
                Ok(value)
            }
            Err(err) if err.is_cancellation() => Err(err),
            Err(err) => {
                if let Some(fallback) = &node.data.fallback_value {
                    debug!(node_id = %node.id, error = %err, "absorbed error into fallback");
                    Ok(fallback.clone())
                } else if node.data.continue_on_error.unwrap_or(false) {
                    debug!(node_id = %node.id, error = %err, "absorbed error, continuing with null");
                    Ok(Value::Null)
                } else {
                    Err(err)
                }
            }
        }
    }
}

/// `delay` — sleep, then pass the first input through unchanged.
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(&self, node: &Node, ctx: &ExecutionContext) -> Result<Value> {
        let seconds = node.data.duration.ok_or_else(|| {
            EngineError::missing_field(&node.id, "'duration' is required")
        })?;
        let inputs = ctx.input_values(&node.id).await?;

        tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))) => {}
        }

        Ok(inputs.into_iter().next().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_constant() {
        let policy = BackoffPolicy::new(BackoffStrategy::Constant, 2.0);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay(5), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn test_backoff_linear() {
        let policy = BackoffPolicy::new(BackoffStrategy::Linear, 0.5);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(0.5));
        assert_eq!(policy.delay(3), Duration::from_secs_f64(1.5));
    }

    #[test]
    fn test_backoff_exponential_with_cap() {
        let policy =
            BackoffPolicy::new(BackoffStrategy::Exponential, 1.0).with_max_backoff(4.0);
        assert_eq!(policy.delay(1), Duration::from_secs_f64(1.0));
        assert_eq!(policy.delay(2), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay(3), Duration::from_secs_f64(4.0));
        // Capped from here on.
        assert_eq!(policy.delay(4), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = BackoffPolicy::new(BackoffStrategy::Constant, 2.0).with_jitter(true);
        for _ in 0..20 {
            let d = policy.delay(1).as_secs_f64();
            assert!((1.0..=3.0).contains(&d), "jittered delay {} out of range", d);
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(is_retryable(
            &EngineError::TransportError("reset".into()),
            &[]
        ));
        assert!(is_retryable(&EngineError::Timeout { duration_ms: 5 }, &[]));
        assert!(!is_retryable(&EngineError::CycleDetected, &[]));
        assert!(is_retryable(
            &EngineError::ExprRuntime("flaky".into()),
            &[ErrorKind::ExprRuntime]
        ));
    }

    #[test]
    fn test_backoff_strategy_parse() {
        assert_eq!(
            BackoffStrategy::parse(None).unwrap(),
            BackoffStrategy::Exponential
        );
        assert_eq!(
            BackoffStrategy::parse(Some("linear")).unwrap(),
            BackoffStrategy::Linear
        );
        assert!(BackoffStrategy::parse(Some("fibonacci")).is_err());
    }
}
