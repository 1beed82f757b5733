//! Workflow definitions: the immutable activity tree shared by every instance.
//!
//! A definition is produced either programmatically through [`WorkflowBuilder`]
//! or from source text through a [`DefinitionLoader`]. Both paths validate
//! variable scoping before the tree is frozen into an arena of
//! [`ActivityNode`]s addressed by [`NodeId`].

/// Raw S-expression syntax tree.
pub mod ast;
/// Programmatic builder and the validating compiler.
pub mod builder;
/// Expression trees.
pub mod expr;
/// Frozen arena representation.
pub mod ir;
/// Source loaders.
pub mod loader;
/// Reader for the S-expression format.
pub mod parser;
/// Typed values.
pub mod value;

pub use builder::{ActivitySpec, SequenceBuilder, WorkflowBuilder};
pub use expr::{BinaryOp, Expr};
pub use ir::{
    ActivityNode, NodeId, ParameterSpec, Parameters, VariableDecl, WorkflowDefinition,
};
pub use loader::{DefinitionLoader, SexprLoader};
pub use parser::parse_source;
pub use value::{Value, ValueType};

use std::path::PathBuf;
use thiserror::Error;

/// Convenience result alias for definition operations.
pub type Result<T> = std::result::Result<T, DefinitionError>;

/// Errors raised while loading, validating or binding a definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The source text could not be read as S-expressions.
    #[error("invalid workflow syntax: {0}")]
    Syntax(String),

    /// A form or expression has the wrong shape.
    #[error("malformed workflow: {0}")]
    Malformed(String),

    /// A name is read or written outside the scope that declares it.
    #[error("variable `{name}` used before declaration ({context})")]
    UndeclaredVariable {
        /// Offending name.
        name: String,
        /// Where the reference appeared.
        context: String,
    },

    /// A variable name is already visible in the enclosing scope.
    #[error("variable `{0}` is declared twice")]
    DuplicateVariable(String),

    /// A parameter is declared twice.
    #[error("parameter `{0}` is declared twice")]
    DuplicateParameter(String),

    /// A parameter declaration names a type that does not exist.
    #[error("unknown type `{0}`")]
    UnknownType(String),

    /// A declared parameter was not supplied at instantiation.
    #[error("missing parameter `{0}`")]
    MissingParameter(String),

    /// A supplied parameter is not declared by the definition.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    /// A supplied parameter has the wrong type.
    #[error("parameter `{name}` expects {expected}, got {found}")]
    ParameterType {
        /// Parameter name.
        name: String,
        /// Declared type.
        expected: ValueType,
        /// Supplied type.
        found: ValueType,
    },

    /// The definition file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}
