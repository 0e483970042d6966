//! Execution context: the capability record executors borrow
//!
//! Executors never hold a reference back to the engine. Everything they
//! may do — read predecessor results, read/write state, evaluate
//! expressions, issue HTTP requests, sleep, run child subgraphs, observe
//! cancellation — flows through an [`ExecutionContext`] passed by borrow.
//!
//! # Result scopes
//!
//! Node results live in a base map guarded by a reader-writer lock.
//! Guard nodes (`retry`, `timeout`, `try_catch`, `parallel`, `join`,
//! `cache`, loops) run their children against an *overlay*: a scratch
//! layer stacked over the base. Reads walk overlays top-down, then the
//! base; writes land in the top layer. A guard absorbs its overlay into
//! the layer below only when the child chain succeeded, which keeps the
//! invariant that a node has a result iff it succeeded.

use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::WorkflowGraph;
use crate::http::HttpClientRegistry;
use crate::interpolate::interpolate_data;
use crate::observer::{EventType, ExecutionEvent, ExecutionObserver};
use crate::payload::{Node, NodeType};
use crate::security::SecurityGate;
use crate::state::{ScopeId, StateManager, StateResolver};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::executors::NodeExecutor;

/// Immutable engine-wide services shared by every context.
pub struct EngineCore {
    pub workflow_id: String,
    pub execution_id: String,
    pub graph: WorkflowGraph,
    pub nodes: HashMap<String, Node>,
    pub types: HashMap<String, NodeType>,
    pub deferred: HashSet<String>,
    pub results: RwLock<HashMap<String, Value>>,
    pub state: StateManager,
    pub cache: TtlCache,
    pub registry: HttpClientRegistry,
    pub gate: SecurityGate,
    pub config: EngineConfig,
    pub observer: Arc<dyn ExecutionObserver>,
    pub executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

/// Scratch result layer used by guard nodes for child executions.
pub type OverlayHandle = Arc<RwLock<HashMap<String, Value>>>;

/// Per-path view over the engine core.
///
/// Cloning is cheap; derived contexts share the core and differ only in
/// overlay stack, branch scope, and cancellation token.
#[derive(Clone)]
pub struct ExecutionContext {
    core: Arc<EngineCore>,
    overlays: Vec<OverlayHandle>,
    branch: Option<ScopeId>,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(core: Arc<EngineCore>, cancel: CancellationToken) -> Self {
        Self {
            core,
            overlays: Vec::new(),
            branch: None,
            cancel,
        }
    }

    pub fn core(&self) -> &EngineCore {
        &self.core
    }

    pub fn state(&self) -> &StateManager {
        &self.core.state
    }

    pub fn cache(&self) -> &TtlCache {
        &self.core.cache
    }

    pub fn registry(&self) -> &HttpClientRegistry {
        &self.core.registry
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.core.gate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn branch_id(&self) -> Option<ScopeId> {
        self.branch
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error out when the enclosing deadline has fired. Executors call
    /// this before every suspension point and between loop iterations.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Derive a context with a fresh overlay; returns the overlay so the
    /// guard can absorb it on success.
    pub fn child_overlay(&self) -> (Self, OverlayHandle) {
        let overlay: OverlayHandle = Arc::new(RwLock::new(HashMap::new()));
        let mut child = self.clone();
        child.overlays.push(overlay.clone());
        (child, overlay)
    }

    /// Derive a context scoped to one parallel branch.
    pub fn with_branch(&self, branch: ScopeId) -> Self {
        let mut child = self.clone();
        child.branch = Some(branch);
        child
    }

    /// Derive a context with a child cancellation token.
    pub fn with_cancel(&self, cancel: CancellationToken) -> Self {
        let mut child = self.clone();
        child.cancel = cancel;
        child
    }

    /// Absorb a child overlay into this context's top layer.
    pub fn absorb_overlay(&self, overlay: &OverlayHandle) {
        let entries: Vec<(String, Value)> = overlay
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (id, value) in entries {
            self.store_result(&id, value);
        }
    }

    /// Look a node's result up through the overlay stack, then the base.
    pub fn lookup_result(&self, id: &str) -> Option<Value> {
        for overlay in self.overlays.iter().rev() {
            if let Some(v) = overlay.read().get(id) {
                return Some(v.clone());
            }
        }
        self.core.results.read().get(id).cloned()
    }

    fn store_result(&self, id: &str, value: Value) {
        match self.overlays.last() {
            Some(overlay) => {
                overlay.write().insert(id.to_string(), value);
            }
            None => {
                self.core.results.write().insert(id.to_string(), value);
            }
        }
    }

    /// Predecessor node ids of `id`, in input-ordinal order.
    pub fn input_ids(&self, id: &str) -> Vec<String> {
        self.core
            .graph
            .predecessors(id)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Resolve one input: cached result, or demand-driven execution of a
    /// deferred node.
    pub async fn resolve_input(&self, id: &str) -> Result<Value> {
        if let Some(value) = self.lookup_result(id) {
            return Ok(value);
        }
        if !self.core.deferred.contains(id) {
            // An eager predecessor without a result means it never ran;
            // topological order makes this unreachable outside guard
            // misuse.
            return Err(EngineError::missing_field(
                id,
                "input value is not available",
            ));
        }
        self.execute_node(id).await
    }

    /// Gather every input value of `id`, in ordinal order.
    pub async fn input_values(&self, id: &str) -> Result<Vec<Value>> {
        let ids = self.input_ids(id);
        let mut values = Vec::with_capacity(ids.len());
        for input in ids {
            values.push(self.resolve_input(&input).await?);
        }
        Ok(values)
    }

    /// A name resolver over the scoped state, as seen from this branch.
    pub fn resolver(&self) -> StateResolver {
        self.core.state.resolver(self.branch)
    }

    /// Execute one node: interpolate, dispatch, record, emit events.
    ///
    /// Returns a boxed future because guards re-enter node execution for
    /// their deferred children.
    pub fn execute_node<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            self.check_cancelled()?;

            let node = self.core.nodes.get(id).ok_or_else(|| {
                EngineError::missing_field(id, "node not found in payload")
            })?;
            let node_type = *self.core.types.get(id).ok_or_else(|| {
                EngineError::UnknownNodeType {
                    node: id.to_string(),
                    node_type: "<unresolved>".to_string(),
                }
            })?;

            self.emit(
                ExecutionEvent::new(
                    EventType::NodeStarted,
                    &self.core.workflow_id,
                    &self.core.execution_id,
                )
                .with_node(id, node_type.name()),
            )
            .await;
            debug!(
                workflow_id = %self.core.workflow_id,
                execution_id = %self.core.execution_id,
                node_id = %id,
                node_type = %node_type,
                "node started"
            );

            let started = Instant::now();
            let outcome = self.dispatch(node, node_type).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    self.store_result(id, value.clone());
                    self.emit(
                        ExecutionEvent::new(
                            EventType::NodeSucceeded,
                            &self.core.workflow_id,
                            &self.core.execution_id,
                        )
                        .with_node(id, node_type.name())
                        .with_duration(duration_ms),
                    )
                    .await;
                    debug!(
                        workflow_id = %self.core.workflow_id,
                        execution_id = %self.core.execution_id,
                        node_id = %id,
                        node_type = %node_type,
                        duration_ms,
                        "node succeeded"
                    );
                    Ok(value)
                }
                Err(err) if err.is_cancellation() => {
                    self.emit(
                        ExecutionEvent::new(
                            EventType::NodeCancelled,
                            &self.core.workflow_id,
                            &self.core.execution_id,
                        )
                        .with_node(id, node_type.name())
                        .with_duration(duration_ms),
                    )
                    .await;
                    warn!(
                        workflow_id = %self.core.workflow_id,
                        execution_id = %self.core.execution_id,
                        node_id = %id,
                        node_type = %node_type,
                        "node cancelled"
                    );
                    Err(err)
                }
                Err(err) => {
                    self.emit(
                        ExecutionEvent::new(
                            EventType::NodeFailed,
                            &self.core.workflow_id,
                            &self.core.execution_id,
                        )
                        .with_node(id, node_type.name())
                        .with_duration(duration_ms)
                        .with_error(err.to_string()),
                    )
                    .await;
                    error!(
                        workflow_id = %self.core.workflow_id,
                        execution_id = %self.core.execution_id,
                        node_id = %id,
                        node_type = %node_type,
                        duration_ms,
                        error = %err,
                        "node failed"
                    );
                    Err(err)
                }
            }
        })
    }

    /// Interpolate the node's data and run its executor, catching panics
    /// at the dispatch boundary.
    async fn dispatch(&self, node: &Node, node_type: NodeType) -> Result<Value> {
        // Context nodes carry literal values; interpolation must not
        // touch them.
        let node = if node_type.is_context() {
            node.clone()
        } else {
            let data = interpolate_data(&node.data, &self.resolver())?;
            Node {
                id: node.id.clone(),
                node_type: node.node_type.clone(),
                data,
            }
        };

        let executor = self
            .core
            .executors
            .get(&node_type)
            .ok_or_else(|| EngineError::UnknownNodeType {
                node: node.id.clone(),
                node_type: node_type.name().to_string(),
            })?
            .clone();

        let fut = executor.execute(&node, self);
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(EngineError::PanicRecovered(message))
            }
        }
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        self.core.observer.on_event(event).await;
    }
}
