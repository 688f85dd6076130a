//! Error types for cluster graph construction and inference.

use thiserror::Error;

/// Errors that can occur while building or processing a cluster graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PgmError {
    /// Variable not found in a factor scope
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// Dimension mismatch in tensor operations
    #[error("Dimension mismatch: expected {expected:?}, got {got:?}")]
    DimensionMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Invalid probability distribution or parameterisation
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// Invalid cluster graph structure
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// The operation is not implemented between these two factor kinds
    #[error("Operation '{operation}' is not supported between {lhs} and {rhs} factors")]
    UnsupportedOperation {
        operation: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    /// A message was delivered to a cluster whose scope does not contain it
    #[error("Message scope {message_vars:?} is not a subset of cluster {cluster_id} scope {cluster_vars:?}")]
    ScopeViolation {
        cluster_id: String,
        message_vars: Vec<String>,
        cluster_vars: Vec<String>,
    },

    /// A factor reported a negative (or NaN) divergence
    #[error("Divergence of message {sender} -> {receiver} is negative or NaN: {value}")]
    NegativeDivergence {
        sender: String,
        receiver: String,
        value: f64,
    },

    /// No cluster scope is a superset of the queried variables
    #[error("No cluster contains all of the variables {0:?}")]
    NoClusterContains(Vec<String>),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed to serialize diagnostics
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PgmError {
    /// Whether the caller may continue after this error.
    ///
    /// Only a refused operation between two factor kinds is recoverable; it
    /// is used to skip subset absorption instead of aborting construction.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }
}

/// Result type for cluster graph operations.
pub type Result<T> = std::result::Result<T, PgmError>;
