//! Weft – a declarative workflow runtime with isolated concurrent instances
//!
//! This crate implements:
//! - Immutable workflow definitions built programmatically or loaded from an
//!   S-expression source format, shared between instances via `Arc`
//! - A frame-stack interpreter that runs one definition against one private
//!   variable store
//! - A scheduler that runs many instances on tokio tasks under a concurrency
//!   bound, containing faults and cancellations per instance
//! - Concurrent trace recording with post-run validation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Definition model, builder and loader
pub mod definition;

/// Instance execution and scheduling
pub mod runtime;

/// Bundled workflows with known expected traces
pub mod scenarios;

// Re-export key types for convenience
pub use definition::{DefinitionError, DefinitionLoader, SexprLoader, WorkflowBuilder, WorkflowDefinition};
pub use runtime::{Scheduler, SchedulerConfig};

/// Current version of the Weft runtime
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
