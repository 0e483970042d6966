//! # flowgraph-core - Workflow DAG Execution Engine
//!
//! Interprets a user-supplied directed acyclic graph of typed nodes and
//! produces a per-node result map plus a final output. Each node is a
//! typed unit of computation — arithmetic, string transforms, HTTP calls,
//! conditional branches, loops, state mutation, resilience wrappers,
//! cache lookups — and edges carry values from producer to consumer.
//!
//! ## Overview
//!
//! The crate is the execution kernel only. Transport framing, config file
//! parsing, CLI wiring, log formatting, and workflow persistence are the
//! embedder's collaborators, reached through interfaces defined here:
//! the engine consumes a parsed [`Payload`] and a typed [`EngineConfig`],
//! and reports to an [`ExecutionObserver`] sink plus `tracing` records.
//!
//! - **Deterministic scheduling** - Kahn's algorithm with a lexicographic
//!   tie-break; identical payloads produce identical schedules
//! - **Typed node dispatch** - one executor strategy per node type over a
//!   shared capability record
//! - **Cooperative concurrency** - parallel branches, join strategies,
//!   bounded loop fan-out, cancellation tokens honoured at every
//!   suspension point
//! - **Scoped shared state** - variables, counters, accumulators across
//!   global / workflow / branch scopes; TTL cache with single-flight
//! - **Bounded expression DSL** - `${ ... }` template holes and condition
//!   expressions, pure evaluation, no user-defined functions
//! - **SSRF-safe HTTP** - scheme policy, private/metadata address
//!   rejection, domain allowlists, response size caps, re-validated
//!   redirect hops, named pre-authenticated clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowgraph_core::{Engine, EngineConfig, Payload};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let payload: Payload = serde_json::from_value(json!({
//!         "nodes": [
//!             {"id": "1", "data": {"value": 2}},
//!             {"id": "2", "data": {"value": 3}},
//!             {"id": "3", "data": {"op": "add"}}
//!         ],
//!         "edges": [
//!             {"id": "e1", "source": "1", "target": "3"},
//!             {"id": "e2", "source": "2", "target": "3"}
//!         ]
//!     })).unwrap();
//!
//!     let engine = Engine::new(payload, EngineConfig::default()).unwrap();
//!     let result = engine.execute().await;
//!     assert_eq!(result.final_output, json!(5));
//! }
//! ```
//!
//! ## Execution model
//!
//! ```text
//! payload ─→ infer types ─→ build graph ─→ topological order
//!                                               │
//!                  ┌────────────────────────────┘
//!                  ▼
//!        for each non-deferred node:
//!          interpolate(data) ─→ dispatch(type) ─→ result
//!                  │
//!                  ▼
//!        guard nodes (retry / timeout / try_catch / parallel /
//!        join / cache / loops) run their deferred predecessor
//!        chains on demand — per attempt, per iteration, per
//!        branch, or on cache miss
//!                  │
//!                  ▼
//!        first-by-id non-context terminal result = final output
//! ```
//!
//! ## See Also
//!
//! - [`Engine`] - orchestration and the execution contract
//! - [`payload`] - the node/edge data model and type inference
//! - [`expr`] - the expression sublanguage
//! - [`state`] - scoped variables, counters, accumulators
//! - [`security`] - the SSRF gate
//! - [`config`] - limits, policies, presets

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executors;
pub mod expr;
pub mod graph;
pub mod http;
pub mod interpolate;
pub mod observer;
pub mod payload;
pub mod security;
pub mod state;

pub use cache::TtlCache;
pub use config::{EngineConfig, HttpClientConfig};
pub use context::{EngineCore, ExecutionContext};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use executors::{default_executors, NodeExecutor};
pub use expr::{evaluate_str, truthy, value_to_string};
pub use graph::WorkflowGraph;
pub use http::{AuthStrategy, HttpClientRegistry, HttpRequest};
pub use interpolate::{interpolate_string, interpolate_value};
pub use observer::{
    CollectingObserver, EventType, ExecutionEvent, ExecutionObserver, NoopObserver,
};
pub use payload::{
    infer_type, Edge, ExecutionResult, Node, NodeData, NodeType, Payload, SwitchCase,
};
pub use security::SecurityGate;
pub use state::{AccumKind, ScopeId, StateManager, WriteScope};
