//! Built-in workflows with known parameter generators and expected traces.
//!
//! `counter` runs five instances from `StartValue = id * 10` and expects
//! `[s, s+1, s+2, s+3]`. `random-delay` shares one definition across many
//! instances that each sleep a random 0–2000 ms between two increments and
//! expects `[1, 2]` from every one of them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use crate::definition::{self, DefinitionLoader, Parameters, SexprLoader, Value, WorkflowDefinition};
use crate::runtime::InstanceId;

const COUNTER_SOURCE: &str = include_str!("../workflows/counter.wf");
const RANDOM_DELAY_SOURCE: &str = include_str!("../workflows/random_delay.wf");

/// Upper bound of the random-delay scenario's per-instance pause.
pub const RANDOM_DELAY_MAX_MS: i64 = 2000;

/// Parameter generator handed to the scheduler.
pub type ParameterGenerator = Box<dyn FnMut(InstanceId) -> Parameters + Send>;

/// A bundled workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Per-instance counter seeded from the instance id.
    Counter,
    /// Two increments around a random delay.
    RandomDelay,
}

impl Scenario {
    /// Every bundled scenario.
    pub const ALL: [Scenario; 2] = [Scenario::Counter, Scenario::RandomDelay];

    /// Name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Counter => "counter",
            Scenario::RandomDelay => "random-delay",
        }
    }

    /// Look a scenario up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scenario| scenario.name() == name)
    }

    /// Workflow source text.
    pub fn source(self) -> &'static str {
        match self {
            Scenario::Counter => COUNTER_SOURCE,
            Scenario::RandomDelay => RANDOM_DELAY_SOURCE,
        }
    }

    /// Load the bundled definition.
    pub fn definition(self) -> definition::Result<WorkflowDefinition> {
        SexprLoader.load(self.source())
    }

    /// Instance count used when the caller does not choose one.
    pub fn default_instances(self) -> usize {
        match self {
            Scenario::Counter => 5,
            Scenario::RandomDelay => 10,
        }
    }

    /// Parameters for each instance. `seed` only affects `random-delay`.
    pub fn parameters(self, seed: u64) -> ParameterGenerator {
        match self {
            Scenario::Counter => Box::new(counter_parameters),
            Scenario::RandomDelay => Box::new(random_delay_parameters(seed, RANDOM_DELAY_MAX_MS)),
        }
    }

    /// Trace an instance must produce.
    pub fn expected(self, id: InstanceId) -> Vec<Value> {
        match self {
            Scenario::Counter => {
                let start = counter_start(id);
                (start..=start + 3).map(Value::Integer).collect()
            }
            Scenario::RandomDelay => vec![Value::Integer(1), Value::Integer(2)],
        }
    }

    /// Expected traces for a set of instances.
    pub fn expectations(self, ids: &[InstanceId]) -> Vec<(InstanceId, Vec<Value>)> {
        ids.iter().map(|&id| (id, self.expected(id))).collect()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn counter_start(id: InstanceId) -> i64 {
    id.0 as i64 * 10
}

/// `InstanceId = id`, `StartValue = id * 10`.
pub fn counter_parameters(id: InstanceId) -> Parameters {
    Parameters::new()
        .with("InstanceId", id)
        .with("StartValue", counter_start(id))
}

/// `InstanceId = id`, `DelayMs` uniform in `0..=max_ms`.
///
/// Each instance draws from its own generator seeded by `seed` and its id, so
/// the delay an instance gets does not depend on creation order.
pub fn random_delay_parameters(seed: u64, max_ms: i64) -> impl FnMut(InstanceId) -> Parameters + Send {
    move |id| {
        let mut rng = StdRng::seed_from_u64(seed ^ id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Parameters::new()
            .with("InstanceId", id)
            .with("DelayMs", rng.gen_range(0..=max_ms.max(0)))
    }
}
