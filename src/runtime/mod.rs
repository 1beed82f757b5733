//! Instance runtime
//!
//! Everything that happens after a definition is frozen: per-instance stores,
//! the interpreter, the external method registry, output sinks, result
//! recording and the scheduler that ties them together.

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub mod error;
pub mod instance;
pub mod interpreter;
pub mod registry;
pub mod results;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod summary;

pub use error::{
    BoxError, EvaluationError, ExternalInvocationError, InstanceError, SchedulingError,
};
pub use instance::{InstanceHandlers, InstanceId, InstanceOutcome, InstanceRun, InstanceStatus};
pub use interpreter::{ExecutionEnv, Interpreter, RuntimeEvent};
pub use registry::{ExternalCatalog, ExternalMethod, ExternalRegistry};
pub use results::{ResultTable, Validation, ValidationReport};
pub use scheduler::Scheduler;
pub use sink::{MemorySink, NullSink, OutputSink, StdoutSink};
pub use store::VariableStore;
pub use summary::RunSummary;

/// When a running instance notices cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancellationPolicy {
    /// Only instances that have not started can be cancelled.
    #[default]
    BeforeStart,
    /// Running instances also check between activities and during delays.
    BetweenActivities,
}

/// Order in which pending instances are queued for execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchOrder {
    /// Creation order.
    #[default]
    InOrder,
    /// Reverse creation order.
    Reverse,
    /// Seeded random permutation.
    Shuffled {
        /// RNG seed; the same seed always yields the same permutation.
        seed: u64,
    },
}

impl DispatchOrder {
    /// Reorder `items` in place.
    pub fn apply<T>(&self, items: &mut [T]) {
        match self {
            DispatchOrder::InOrder => {}
            DispatchOrder::Reverse => items.reverse(),
            DispatchOrder::Shuffled { seed } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                items.shuffle(&mut rng);
            }
        }
    }
}

impl fmt::Display for DispatchOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOrder::InOrder => f.write_str("in-order"),
            DispatchOrder::Reverse => f.write_str("reverse"),
            DispatchOrder::Shuffled { seed } => write!(f, "shuffled({})", seed),
        }
    }
}

/// Configuration for the instance scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on instances executing at once (default: available parallelism)
    pub max_concurrency: usize,

    /// Cancellation policy for running instances
    pub cancellation: CancellationPolicy,

    /// Queue order for dispatch
    pub dispatch_order: DispatchOrder,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            cancellation: CancellationPolicy::default(),
            dispatch_order: DispatchOrder::default(),
        }
    }
}

impl SchedulerConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: SchedulerConfig =
            serde_json::from_slice(&data).context("Failed to deserialize config")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let mut a: Vec<u32> = (0..32).collect();
        let mut b = a.clone();
        DispatchOrder::Shuffled { seed: 7 }.apply(&mut a);
        DispatchOrder::Shuffled { seed: 7 }.apply(&mut b);
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());

        let mut reversed = vec![1, 2, 3];
        DispatchOrder::Reverse.apply(&mut reversed);
        assert_eq!(reversed, vec![3, 2, 1]);
    }

    #[test]
    fn config_file_fills_missing_fields_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_concurrency": 3, "dispatch_order": {{"shuffled": {{"seed": 42}}}}}}"#
        )
        .unwrap();

        let config = SchedulerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.dispatch_order, DispatchOrder::Shuffled { seed: 42 });
        assert_eq!(config.cancellation, CancellationPolicy::BeforeStart);
    }

    #[test]
    fn policies_use_kebab_case_names() {
        let json = serde_json::to_string(&CancellationPolicy::BetweenActivities).unwrap();
        assert_eq!(json, "\"between-activities\"");
        let order: DispatchOrder = serde_json::from_str("\"in-order\"").unwrap();
        assert_eq!(order, DispatchOrder::InOrder);
    }
}
