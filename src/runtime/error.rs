//! Error types for the instance runtime
//!
//! Per-instance failures ([`InstanceError`]) are caught at the instance
//! boundary and recorded as that instance's outcome. [`SchedulingError`] is the
//! only error that reaches the caller of the scheduler, and it is raised before
//! any instance starts.

use thiserror::Error;

use super::instance::InstanceId;
use crate::definition::{DefinitionError, NodeId};

/// Boxed cause returned by external methods.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Expression evaluation failures
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// Name is not present in the store
    #[error("variable `{0}` is not declared")]
    UndeclaredVariable(String),

    /// Name is declared but has not been written yet
    #[error("variable `{0}` is read before it is assigned")]
    UnassignedVariable(String),

    /// Operand types do not fit the operation
    #[error("`{operation}` expects {expected}, found {found}")]
    TypeMismatch {
        /// Operation symbol or activity name
        operation: String,
        /// Accepted operand types
        expected: String,
        /// Actual operand types
        found: String,
    },

    /// A duration was built from a negative number
    #[error("duration cannot be negative ({0})")]
    NegativeDuration(i64),

    /// Checked arithmetic overflowed
    #[error("arithmetic overflow in `{0}`")]
    Overflow(String),

    /// Integer division by zero
    #[error("division by zero")]
    DivisionByZero,
}

/// External method failures
#[derive(Debug, Error)]
pub enum ExternalInvocationError {
    /// No method registered under this name
    #[error("external method `{0}` is not registered")]
    NotFound(String),

    /// The method itself returned an error
    #[error("external method `{method}` failed: {source}")]
    Failed {
        /// Method name
        method: String,
        /// Error returned by the method
        #[source]
        source: BoxError,
    },

    /// The result was meant to be bound but the method returned nothing
    #[error("external method `{0}` returned no value to bind")]
    MissingReturnValue(String),
}

/// Terminal failure of a single instance
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Expression evaluation failed inside an activity
    #[error("{activity} {node} failed: {source}")]
    Evaluation {
        /// Failing node
        node: NodeId,
        /// Activity kind
        activity: &'static str,
        /// Cause
        #[source]
        source: EvaluationError,
    },

    /// External invocation failed
    #[error("invoke {node} failed: {source}")]
    External {
        /// Failing node
        node: NodeId,
        /// Cause
        #[source]
        source: ExternalInvocationError,
    },

    /// The instance already faulted and cannot resume
    #[error("instance halted after fault: {0}")]
    Halted(String),

    /// The instance task panicked
    #[error("instance task panicked: {0}")]
    Panicked(String),
}

/// Scheduler configuration and setup errors
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// Concurrency bound must be at least one
    #[error("max concurrency must be at least 1 (got {0})")]
    InvalidConcurrency(usize),

    /// Instances were requested without any definition to bind them to
    #[error("at least one definition is required to create instances")]
    NoDefinitions,

    /// Parameters produced for an instance did not match its definition
    #[error("instance {instance}: {source}")]
    Binding {
        /// Instance whose parameters were rejected
        instance: InstanceId,
        /// Binding failure
        #[source]
        source: DefinitionError,
    },

    /// No pending instance has this id
    #[error("instance {0} is not pending")]
    UnknownInstance(InstanceId),
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulingError>;
