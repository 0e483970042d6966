//! Engine orchestration: infer → validate → sort → execute → aggregate
//!
//! One engine owns one execution. `execute(self)` consumes the engine:
//! nodes, edges, results, state, the client registry, and the observer
//! are exclusively owned for the duration, and re-execution means
//! building a new engine.
//!
//! # Execution contract
//!
//! 1. Emit `workflow.started`.
//! 2. Resolve node types (§ explicit or inferred) and validate the
//!    payload against the configured limits.
//! 3. Topologically sort; a cycle fails the workflow.
//! 4. Run every non-deferred node in order: interpolate its data
//!    templates (context nodes exempt), dispatch to its executor, record
//!    the result, emit per-node events. The first error aborts the
//!    execution path.
//! 5. Select the final output: the first-by-id non-context terminal's
//!    result, falling back to any terminal result when every terminal is
//!    a context node, `Null` when no terminal produced one.
//! 6. Emit `workflow.succeeded` or `workflow.failed`.
//!
//! An overall deadline (`max_execution_time`) arms a watchdog that fires
//! the root cancellation token; executors observe it at every suspension
//! point.

use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::context::{EngineCore, ExecutionContext};
use crate::error::{EngineError, Result};
use crate::executors::default_executors;
use crate::graph::WorkflowGraph;
use crate::http::HttpClientRegistry;
use crate::observer::{EventType, ExecutionEvent, ExecutionObserver, NoopObserver};
use crate::payload::{ExecutionResult, NodeType, Payload};
use crate::security::SecurityGate;
use crate::state::StateManager;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// One-shot workflow execution engine.
pub struct Engine {
    payload: Payload,
    config: EngineConfig,
    observer: Arc<dyn ExecutionObserver>,
    state: StateManager,
    workflow_id: String,
}

impl Engine {
    /// Build an engine for one payload. Fails when the configuration is
    /// invalid.
    pub fn new(payload: Payload, config: EngineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|message| EngineError::missing_field("<config>", message))?;
        Ok(Self {
            payload,
            config,
            observer: Arc::new(NoopObserver),
            state: StateManager::new(),
            workflow_id: Uuid::new_v4().to_string(),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    /// Engine-lifetime state; use before `execute` to seed global-scope
    /// values.
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Run the workflow to completion and aggregate the result.
    pub async fn execute(self) -> ExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let workflow_id = self.workflow_id.clone();
        let observer = self.observer.clone();

        observer
            .on_event(ExecutionEvent::new(
                EventType::WorkflowStarted,
                &workflow_id,
                &execution_id,
            ))
            .await;
        info!(workflow_id = %workflow_id, execution_id = %execution_id, "workflow started");

        let mut result = ExecutionResult::default();
        match self.run(&workflow_id, &execution_id, &mut result).await {
            Ok(()) => {}
            Err(err) => result.errors.push(err.to_string()),
        }

        if result.errors.is_empty() {
            observer
                .on_event(ExecutionEvent::new(
                    EventType::WorkflowSucceeded,
                    &workflow_id,
                    &execution_id,
                ))
                .await;
            info!(workflow_id = %workflow_id, execution_id = %execution_id, "workflow succeeded");
        } else {
            observer
                .on_event(
                    ExecutionEvent::new(EventType::WorkflowFailed, &workflow_id, &execution_id)
                        .with_error(result.errors[0].clone()),
                )
                .await;
            error!(
                workflow_id = %workflow_id,
                execution_id = %execution_id,
                error = %result.errors[0],
                "workflow failed"
            );
        }
        result
    }

    /// Validation and the node loop; any error aborts the execution path
    /// and lands in `result.errors`.
    async fn run(
        self,
        workflow_id: &str,
        execution_id: &str,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        if self.payload.nodes.len() > self.config.max_nodes {
            return Err(EngineError::TooManyNodes {
                count: self.payload.nodes.len(),
                max: self.config.max_nodes,
            });
        }

        let mut types: HashMap<String, NodeType> = HashMap::new();
        for node in &self.payload.nodes {
            types.insert(node.id.clone(), node.resolved_type()?);
        }

        let graph = WorkflowGraph::from_payload(&self.payload)?;
        let order = graph.topological_order()?;
        let deferred = graph.deferred_set(&types)?;

        let registry = HttpClientRegistry::from_config(&self.config)?;
        let gate = SecurityGate::from_config(&self.config);
        let deadline = self.config.max_execution_time.map(Duration::from_secs_f64);

        let core = Arc::new(EngineCore {
            workflow_id: workflow_id.to_string(),
            execution_id: execution_id.to_string(),
            graph,
            nodes: self
                .payload
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.clone()))
                .collect(),
            types,
            deferred,
            results: RwLock::new(HashMap::new()),
            state: self.state.clone(),
            cache: TtlCache::new(),
            registry,
            gate,
            config: self.config.clone(),
            observer: self.observer.clone(),
            executors: default_executors(),
        });

        let cancel = CancellationToken::new();
        let watchdog = deadline.map(|duration| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                token.cancel();
            })
        });

        let ctx = ExecutionContext::new(core.clone(), cancel.clone());
        let mut run_error = None;
        for id in &order {
            if core.deferred.contains(id) {
                continue;
            }
            if let Err(err) = ctx.execute_node(id).await {
                // A deadline-driven cancellation reports as Timeout.
                if err.is_cancellation() && deadline.is_some() && cancel.is_cancelled() {
                    run_error = Some(EngineError::Timeout {
                        duration_ms: deadline.unwrap_or_default().as_millis() as u64,
                    });
                } else {
                    run_error = Some(err);
                }
                break;
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        result.node_results = core
            .results
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<String, Value>>();
        result.final_output = final_output(&core, &result.node_results);

        match run_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Terminal-output selection rule.
///
/// First-by-id non-context terminal with a result wins; when every
/// terminal is a context node, any terminal result (by id) serves as the
/// fallback; no terminal result at all means `Null`.
fn final_output(core: &EngineCore, results: &BTreeMap<String, Value>) -> Value {
    let terminals = core.graph.terminals();

    for id in &terminals {
        let is_context = core.types.get(*id).map(NodeType::is_context).unwrap_or(false);
        if !is_context {
            if let Some(value) = results.get(*id) {
                return value.clone();
            }
        }
    }
    for id in &terminals {
        if let Some(value) = results.get(*id) {
            return value.clone();
        }
    }
    Value::Null
}
