//! Error types and error handling for workflow execution
//!
//! This module defines all errors that can occur during payload validation,
//! graph scheduling, and node execution. All errors implement
//! `std::error::Error` via the `thiserror` crate.
//!
//! # Error Hierarchy
//!
//! ```text
//! EngineError
//! ├── Validation   - CycleDetected, UnknownNodeType, MissingField, ...
//! ├── Expression   - ExprParse, ExprUnknownName, ExprTypeMismatch, ExprRuntime
//! ├── State        - StateTypeMismatch, StateMissingKey
//! ├── Security     - SsrfBlocked, SchemeDisallowed, DomainNotAllowed, ...
//! ├── HTTP         - UnknownClient, TransportError, RedirectLoop
//! ├── Resilience   - RetryExhausted, Timeout, IterationCapExceeded, Cancelled
//! └── Internal     - PanicRecovered
//! ```
//!
//! Every variant maps to a machine-readable [`ErrorKind`] via
//! [`EngineError::kind`]. The kind is what the resilience executors consult:
//! `retry` decides retryability from it, `try_catch` absorbs any kind, and
//! the top-level result records the human-readable `Display` form.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph_core::error::{EngineError, ErrorKind};
//!
//! let err = EngineError::missing_field("op-1", "value");
//! assert_eq!(err.kind(), ErrorKind::MissingField);
//! assert!(err.to_string().contains("op-1"));
//! ```

use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Machine-readable classification of an [`EngineError`]
///
/// The kind is stable across message changes and is the unit the
/// propagation policy operates on: retry allow-lists name kinds, and
/// tests assert on kinds rather than message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Validation
    CycleDetected,
    UnknownNodeType,
    MissingField,
    TooManyNodes,
    NoMatchingCase,
    // Expression
    ExprParse,
    ExprUnknownName,
    ExprTypeMismatch,
    ExprRuntime,
    // State
    StateTypeMismatch,
    StateMissingKey,
    // Security
    SsrfBlocked,
    SchemeDisallowed,
    DomainNotAllowed,
    ResponseTooLarge,
    // HTTP
    UnknownClient,
    TransportError,
    RedirectLoop,
    // Resilience
    RetryExhausted,
    Timeout,
    IterationCapExceeded,
    Cancelled,
    // Internal
    PanicRecovered,
}

impl ErrorKind {
    /// Parse a kind from its canonical snake_case name.
    ///
    /// Used by the `retry` executor's `allowed_errors` list.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "cycle_detected" => Self::CycleDetected,
            "unknown_node_type" => Self::UnknownNodeType,
            "missing_field" => Self::MissingField,
            "too_many_nodes" => Self::TooManyNodes,
            "no_matching_case" => Self::NoMatchingCase,
            "expr_parse" => Self::ExprParse,
            "expr_unknown_name" => Self::ExprUnknownName,
            "expr_type_mismatch" => Self::ExprTypeMismatch,
            "expr_runtime" => Self::ExprRuntime,
            "state_type_mismatch" => Self::StateTypeMismatch,
            "state_missing_key" => Self::StateMissingKey,
            "ssrf_blocked" => Self::SsrfBlocked,
            "scheme_disallowed" => Self::SchemeDisallowed,
            "domain_not_allowed" => Self::DomainNotAllowed,
            "response_too_large" => Self::ResponseTooLarge,
            "unknown_client" => Self::UnknownClient,
            "transport_error" => Self::TransportError,
            "redirect_loop" => Self::RedirectLoop,
            "retry_exhausted" => Self::RetryExhausted,
            "timeout" => Self::Timeout,
            "iteration_cap_exceeded" => Self::IterationCapExceeded,
            "cancelled" => Self::Cancelled,
            "panic_recovered" => Self::PanicRecovered,
            _ => return None,
        };
        Some(kind)
    }
}

/// Comprehensive error type for all engine operations
///
/// Variants carry the context a caller needs to act on the failure: the
/// node id where it happened, the field or key involved, the attempt
/// count. Helper constructors keep call sites terse.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The edge set contains a cycle; no topological order exists
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A node carries (or inference produced) a type the engine does not know
    #[error("node '{node}' has unknown type '{node_type}'")]
    UnknownNodeType { node: String, node_type: String },

    /// A required `data` field is absent, or a node is missing required inputs
    #[error("node '{node}': {message}")]
    MissingField { node: String, message: String },

    /// The payload exceeds the configured node ceiling
    #[error("workflow has {count} nodes, exceeding the limit of {max}")]
    TooManyNodes { count: usize, max: usize },

    /// A switch node matched no case and has no default
    #[error("node '{node}': no case matched and no default case present")]
    NoMatchingCase { node: String },

    /// The expression text failed to lex or parse
    #[error("expression parse error: {0}")]
    ExprParse(String),

    /// An identifier or function name did not resolve
    #[error("unknown name in expression: {0}")]
    ExprUnknownName(String),

    /// Operand or argument types do not fit the operator or function
    #[error("expression type mismatch: {0}")]
    ExprTypeMismatch(String),

    /// Runtime evaluation failure (division by zero, index out of range)
    #[error("expression runtime error: {0}")]
    ExprRuntime(String),

    /// A state operation was applied to a value of the wrong type
    #[error("state type mismatch for '{key}': {message}")]
    StateTypeMismatch { key: String, message: String },

    /// A state read referenced a key absent from every visible scope
    #[error("state key not found: '{0}'")]
    StateMissingKey(String),

    /// The target host resolves to a blocked address range
    #[error("request to '{host}' blocked: {reason}")]
    SsrfBlocked { host: String, reason: String },

    /// URL scheme outside the allowed set
    #[error("URL scheme '{scheme}' is not allowed")]
    SchemeDisallowed { scheme: String },

    /// Host absent from a non-empty domain allowlist
    #[error("domain '{host}' is not in the allowlist")]
    DomainNotAllowed { host: String },

    /// Response body exceeded the configured size cap
    #[error("response exceeded maximum size of {max_bytes} bytes")]
    ResponseTooLarge { max_bytes: u64 },

    /// `client_name` referenced a client absent from the registry
    #[error("unknown HTTP client '{0}'")]
    UnknownClient(String),

    /// Connection, DNS, or protocol-level HTTP failure
    #[error("transport error: {0}")]
    TransportError(String),

    /// Redirect chain exceeded the hop ceiling
    #[error("redirect limit of {max_redirects} exceeded")]
    RedirectLoop { max_redirects: u32 },

    /// All retry attempts failed; wraps the last error
    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    /// A deadline elapsed before the wrapped work completed
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A loop ran past the configured iteration ceiling
    #[error("loop exceeded the iteration cap of {max_iterations}")]
    IterationCapExceeded { max_iterations: u64 },

    /// Execution was cancelled by an enclosing timeout or deadline
    #[error("execution cancelled")]
    Cancelled,

    /// An executor panicked; the panic was caught at the dispatch boundary
    #[error("executor panicked: {0}")]
    PanicRecovered(String),
}

impl EngineError {
    /// Classify this error for the propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CycleDetected => ErrorKind::CycleDetected,
            Self::UnknownNodeType { .. } => ErrorKind::UnknownNodeType,
            Self::MissingField { .. } => ErrorKind::MissingField,
            Self::TooManyNodes { .. } => ErrorKind::TooManyNodes,
            Self::NoMatchingCase { .. } => ErrorKind::NoMatchingCase,
            Self::ExprParse(_) => ErrorKind::ExprParse,
            Self::ExprUnknownName(_) => ErrorKind::ExprUnknownName,
            Self::ExprTypeMismatch(_) => ErrorKind::ExprTypeMismatch,
            Self::ExprRuntime(_) => ErrorKind::ExprRuntime,
            Self::StateTypeMismatch { .. } => ErrorKind::StateTypeMismatch,
            Self::StateMissingKey(_) => ErrorKind::StateMissingKey,
            Self::SsrfBlocked { .. } => ErrorKind::SsrfBlocked,
            Self::SchemeDisallowed { .. } => ErrorKind::SchemeDisallowed,
            Self::DomainNotAllowed { .. } => ErrorKind::DomainNotAllowed,
            Self::ResponseTooLarge { .. } => ErrorKind::ResponseTooLarge,
            Self::UnknownClient(_) => ErrorKind::UnknownClient,
            Self::TransportError(_) => ErrorKind::TransportError,
            Self::RedirectLoop { .. } => ErrorKind::RedirectLoop,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::IterationCapExceeded { .. } => ErrorKind::IterationCapExceeded,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::PanicRecovered(_) => ErrorKind::PanicRecovered,
        }
    }

    /// True when the error is cancellation rather than failure.
    ///
    /// Cancellation is reported to observers as `node.cancelled`, never
    /// `node.failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Create a missing-field error with node context
    pub fn missing_field(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MissingField {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create a state type-mismatch error
    pub fn state_type_mismatch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateTypeMismatch {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an SSRF rejection with host context
    pub fn ssrf_blocked(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SsrfBlocked {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::TransportError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(EngineError::CycleDetected.kind(), ErrorKind::CycleDetected);
        assert_eq!(
            EngineError::missing_field("n1", "value is required").kind(),
            ErrorKind::MissingField
        );
        assert_eq!(
            EngineError::TransportError("connection refused".into()).kind(),
            ErrorKind::TransportError
        );
    }

    #[test]
    fn test_retry_exhausted_wraps_source() {
        let inner = EngineError::TransportError("connection reset".into());
        let err = EngineError::RetryExhausted {
            attempts: 3,
            source: Box::new(inner),
        };
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        let message = err.to_string();
        assert!(message.contains("3 attempts"));
        assert!(message.contains("connection reset"));
    }

    #[test]
    fn test_kind_parse_round_trip() {
        assert_eq!(ErrorKind::parse("timeout"), Some(ErrorKind::Timeout));
        assert_eq!(
            ErrorKind::parse("transport_error"),
            Some(ErrorKind::TransportError)
        );
        assert_eq!(ErrorKind::parse("nonsense"), None);
    }

    #[test]
    fn test_cancellation_is_not_failure() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::CycleDetected.is_cancellation());
    }
}
