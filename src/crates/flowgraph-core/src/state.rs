//! Shared execution state: variables, counters, accumulators
//!
//! State is visible through three scopes:
//!
//! - **global** — engine-wide, survives the whole engine lifetime
//! - **workflow** — the current execution
//! - **branch** — one arm of a parallel node (or one loop iteration)
//!
//! Reads walk branch → workflow → global. Writes go to the scope the node
//! names (default workflow). Branch scopes form a parent chain so nested
//! parallel arms and loop bodies see their ancestors' bindings; they are
//! torn down on every exit path via the RAII [`BranchGuard`].
//!
//! All operations are thread-safe (many readers / single writer per
//! scope). Counter and accumulator mutations are atomic per key: they
//! happen in place under the owning scope's write lock.

use crate::error::{EngineError, Result};
use crate::expr::NameResolver;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifies one live branch scope.
pub type ScopeId = u64;

/// Which scope a state write lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteScope {
    Global,
    #[default]
    Workflow,
    Branch,
}

impl WriteScope {
    /// Parse a node's `scope` field; absent means workflow.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(Self::Workflow),
            Some("global") => Ok(Self::Global),
            Some("workflow") => Ok(Self::Workflow),
            Some("branch") => Ok(Self::Branch),
            Some(other) => Err(EngineError::state_type_mismatch(
                other,
                "scope must be one of global, workflow, branch",
            )),
        }
    }
}

/// Accumulator merge disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumKind {
    Sum,
    Product,
    Min,
    Max,
    List,
    String,
}

impl AccumKind {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None | Some("sum") => Ok(Self::Sum),
            Some("product") => Ok(Self::Product),
            Some("min") => Ok(Self::Min),
            Some("max") => Ok(Self::Max),
            Some("list") => Ok(Self::List),
            Some("string") => Ok(Self::String),
            Some(other) => Err(EngineError::state_type_mismatch(
                other,
                "unknown accumulator kind",
            )),
        }
    }

    fn identity(&self) -> Value {
        match self {
            Self::Sum => Value::from(0),
            Self::Product => Value::from(1),
            Self::Min | Self::Max => Value::Null,
            Self::List => Value::Array(Vec::new()),
            Self::String => Value::String(String::new()),
        }
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    kind: AccumKind,
    value: Value,
}

#[derive(Debug, Default)]
struct ScopeData {
    variables: HashMap<String, Value>,
    counters: HashMap<String, f64>,
    accumulators: HashMap<String, Accumulator>,
}

#[derive(Debug)]
struct BranchScope {
    parent: Option<ScopeId>,
    data: ScopeData,
}

/// Thread-safe, scope-aware state manager.
///
/// Cheap to clone; clones share the same underlying state.
#[derive(Clone)]
pub struct StateManager {
    inner: Arc<StateInner>,
}

struct StateInner {
    global: RwLock<ScopeData>,
    workflow: RwLock<ScopeData>,
    branches: RwLock<HashMap<ScopeId, BranchScope>>,
    /// Names registered by `context_constant` nodes; immutable thereafter.
    constants: RwLock<HashSet<String>>,
    next_scope: AtomicU64,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                global: RwLock::new(ScopeData::default()),
                workflow: RwLock::new(ScopeData::default()),
                branches: RwLock::new(HashMap::new()),
                constants: RwLock::new(HashSet::new()),
                next_scope: AtomicU64::new(1),
            }),
        }
    }

    /// Open a branch scope chained under `parent`. The returned guard
    /// tears the scope down on drop, on every exit path.
    pub fn branch_scope(&self, parent: Option<ScopeId>) -> BranchGuard {
        let id = self.inner.next_scope.fetch_add(1, Ordering::Relaxed);
        self.inner.branches.write().insert(
            id,
            BranchScope {
                parent,
                data: ScopeData::default(),
            },
        );
        BranchGuard {
            state: self.clone(),
            id,
        }
    }

    fn remove_branch(&self, id: ScopeId) {
        self.inner.branches.write().remove(&id);
    }

    /// Read a variable, walking branch → workflow → global.
    pub fn get_variable(&self, name: &str, branch: Option<ScopeId>) -> Option<Value> {
        {
            let branches = self.inner.branches.read();
            let mut cursor = branch;
            while let Some(id) = cursor {
                match branches.get(&id) {
                    Some(scope) => {
                        if let Some(v) = scope.data.variables.get(name) {
                            return Some(v.clone());
                        }
                        cursor = scope.parent;
                    }
                    None => break,
                }
            }
        }
        if let Some(v) = self.inner.workflow.read().variables.get(name) {
            return Some(v.clone());
        }
        self.inner.global.read().variables.get(name).cloned()
    }

    fn check_not_constant(&self, name: &str) -> Result<()> {
        if self.inner.constants.read().contains(name) {
            return Err(EngineError::state_type_mismatch(
                name,
                "cannot assign to a context constant",
            ));
        }
        Ok(())
    }

    /// Run `f` against the scope data a write should land in.
    fn with_write_scope<T>(
        &self,
        scope: WriteScope,
        branch: Option<ScopeId>,
        f: impl FnOnce(&mut ScopeData) -> T,
    ) -> T {
        match (scope, branch) {
            (WriteScope::Global, _) => f(&mut self.inner.global.write()),
            (WriteScope::Branch, Some(id)) => {
                let mut branches = self.inner.branches.write();
                // A missing branch entry means the guard was dropped; fall
                // back to workflow scope rather than writing into the void.
                match branches.get_mut(&id) {
                    Some(scope) => f(&mut scope.data),
                    None => {
                        drop(branches);
                        f(&mut self.inner.workflow.write())
                    }
                }
            }
            _ => f(&mut self.inner.workflow.write()),
        }
    }

    pub fn set_variable(
        &self,
        name: &str,
        value: Value,
        scope: WriteScope,
        branch: Option<ScopeId>,
    ) -> Result<()> {
        self.check_not_constant(name)?;
        self.with_write_scope(scope, branch, |data| {
            data.variables.insert(name.to_string(), value);
        });
        Ok(())
    }

    /// Numeric increment. A missing variable starts at 0.
    pub fn increment_variable(
        &self,
        name: &str,
        scope: WriteScope,
        branch: Option<ScopeId>,
    ) -> Result<Value> {
        self.check_not_constant(name)?;
        let current = self.get_variable(name, branch).unwrap_or(Value::from(0));
        let n = current.as_f64().ok_or_else(|| {
            EngineError::state_type_mismatch(name, "increment requires a numeric variable")
        })?;
        let next = crate::expr::number_value(n + 1.0);
        self.with_write_scope(scope, branch, |data| {
            data.variables.insert(name.to_string(), next.clone());
        });
        Ok(next)
    }

    /// Append to a string or array variable. A missing variable adopts
    /// the input as its initial value.
    pub fn append_variable(
        &self,
        name: &str,
        value: Value,
        scope: WriteScope,
        branch: Option<ScopeId>,
    ) -> Result<Value> {
        self.check_not_constant(name)?;
        let next = match self.get_variable(name, branch) {
            None => value,
            Some(Value::String(mut s)) => match value {
                Value::String(tail) => {
                    s.push_str(&tail);
                    Value::String(s)
                }
                other => {
                    return Err(EngineError::state_type_mismatch(
                        name,
                        format!("cannot append {} to a string", kind_of(&other)),
                    ))
                }
            },
            Some(Value::Array(mut items)) => {
                items.push(value);
                Value::Array(items)
            }
            Some(other) => {
                return Err(EngineError::state_type_mismatch(
                    name,
                    format!("cannot append to a {} variable", kind_of(&other)),
                ))
            }
        };
        self.with_write_scope(scope, branch, |data| {
            data.variables.insert(name.to_string(), next.clone());
        });
        Ok(next)
    }

    /// Read a counter, walking branch → workflow → global. Missing = 0.
    pub fn get_counter(&self, name: &str, branch: Option<ScopeId>) -> f64 {
        {
            let branches = self.inner.branches.read();
            let mut cursor = branch;
            while let Some(id) = cursor {
                match branches.get(&id) {
                    Some(scope) => {
                        if let Some(v) = scope.data.counters.get(name) {
                            return *v;
                        }
                        cursor = scope.parent;
                    }
                    None => break,
                }
            }
        }
        if let Some(v) = self.inner.workflow.read().counters.get(name) {
            return *v;
        }
        self.inner
            .global
            .read()
            .counters
            .get(name)
            .copied()
            .unwrap_or(0.0)
    }

    /// Adjust a counter by `delta` atomically within its scope.
    pub fn adjust_counter(
        &self,
        name: &str,
        delta: f64,
        scope: WriteScope,
        branch: Option<ScopeId>,
    ) -> f64 {
        self.with_write_scope(scope, branch, |data| {
            let entry = data.counters.entry(name.to_string()).or_insert(0.0);
            *entry += delta;
            *entry
        })
    }

    pub fn reset_counter(&self, name: &str, scope: WriteScope, branch: Option<ScopeId>) {
        self.with_write_scope(scope, branch, |data| {
            data.counters.insert(name.to_string(), 0.0);
        });
    }

    /// Merge `value` into the named accumulator, atomically.
    pub fn accumulate(
        &self,
        name: &str,
        kind: AccumKind,
        value: Value,
        scope: WriteScope,
        branch: Option<ScopeId>,
    ) -> Result<Value> {
        self.with_write_scope(scope, branch, |data| {
            let entry = data
                .accumulators
                .entry(name.to_string())
                .or_insert_with(|| Accumulator {
                    kind,
                    value: kind.identity(),
                });
            if entry.kind != kind {
                return Err(EngineError::state_type_mismatch(
                    name,
                    format!(
                        "accumulator already exists with kind {:?}, not {:?}",
                        entry.kind, kind
                    ),
                ));
            }
            entry.value = merge_accum(name, kind, entry.value.clone(), value)?;
            Ok(entry.value.clone())
        })
    }

    /// Read an accumulator's current value. Missing = `Null`.
    pub fn get_accumulator(&self, name: &str, branch: Option<ScopeId>) -> Value {
        {
            let branches = self.inner.branches.read();
            let mut cursor = branch;
            while let Some(id) = cursor {
                match branches.get(&id) {
                    Some(scope) => {
                        if let Some(a) = scope.data.accumulators.get(name) {
                            return a.value.clone();
                        }
                        cursor = scope.parent;
                    }
                    None => break,
                }
            }
        }
        if let Some(a) = self.inner.workflow.read().accumulators.get(name) {
            return a.value.clone();
        }
        self.inner
            .global
            .read()
            .accumulators
            .get(name)
            .map(|a| a.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn reset_accumulator(&self, name: &str, scope: WriteScope, branch: Option<ScopeId>) {
        self.with_write_scope(scope, branch, |data| {
            data.accumulators.remove(name);
        });
    }

    /// Register a context value in workflow scope. Constants become
    /// immutable: later writes to the same name fail.
    pub fn register_context(&self, name: &str, value: Value, constant: bool) -> Result<()> {
        self.check_not_constant(name)?;
        self.inner
            .workflow
            .write()
            .variables
            .insert(name.to_string(), value);
        if constant {
            self.inner.constants.write().insert(name.to_string());
        }
        Ok(())
    }

    /// A resolver view of this state for expression evaluation.
    pub fn resolver(&self, branch: Option<ScopeId>) -> StateResolver {
        StateResolver {
            state: self.clone(),
            branch,
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a branch scope; dropping tears the scope down.
pub struct BranchGuard {
    state: StateManager,
    id: ScopeId,
}

impl BranchGuard {
    pub fn id(&self) -> ScopeId {
        self.id
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        self.state.remove_branch(self.id);
    }
}

/// [`NameResolver`] over the scoped variables.
pub struct StateResolver {
    state: StateManager,
    branch: Option<ScopeId>,
}

impl NameResolver for StateResolver {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.state.get_variable(name, self.branch)
    }
}

fn merge_accum(name: &str, kind: AccumKind, current: Value, incoming: Value) -> Result<Value> {
    let numeric = |v: &Value| {
        v.as_f64().ok_or_else(|| {
            EngineError::state_type_mismatch(
                name,
                format!("accumulator expects a number, got {}", kind_of(v)),
            )
        })
    };
    match kind {
        AccumKind::Sum => Ok(crate::expr::number_value(numeric(&current)? + numeric(&incoming)?)),
        AccumKind::Product => Ok(crate::expr::number_value(
            numeric(&current)? * numeric(&incoming)?,
        )),
        AccumKind::Min => {
            let n = numeric(&incoming)?;
            Ok(match current.as_f64() {
                Some(c) => crate::expr::number_value(c.min(n)),
                None => crate::expr::number_value(n),
            })
        }
        AccumKind::Max => {
            let n = numeric(&incoming)?;
            Ok(match current.as_f64() {
                Some(c) => crate::expr::number_value(c.max(n)),
                None => crate::expr::number_value(n),
            })
        }
        AccumKind::List => match current {
            Value::Array(mut items) => {
                items.push(incoming);
                Ok(Value::Array(items))
            }
            other => Err(EngineError::state_type_mismatch(
                name,
                format!("list accumulator holds a {}", kind_of(&other)),
            )),
        },
        AccumKind::String => match (current, incoming) {
            (Value::String(mut s), Value::String(tail)) => {
                s.push_str(&tail);
                Ok(Value::String(s))
            }
            (_, other) => Err(EngineError::state_type_mismatch(
                name,
                format!("string accumulator expects a string, got {}", kind_of(&other)),
            )),
        },
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
