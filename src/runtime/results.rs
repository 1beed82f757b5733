//! Result recording and validation
//!
//! [`ResultTable`] is written concurrently by every instance in a run and read
//! once all of them settle. It is a sharded map: each shard has its own lock
//! and an append holds the shard lock for the duration of the push, so no write
//! is lost and appends to one instance's trace keep their order.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

use super::instance::InstanceId;
use crate::definition::Value;

/// Concurrent instance id → trace map.
#[derive(Debug, Default)]
pub struct ResultTable {
    traces: DashMap<InstanceId, Vec<Value>>,
}

impl ResultTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to an instance's trace.
    pub fn record(&self, instance: InstanceId, value: Value) {
        self.traces.entry(instance).or_default().push(value);
    }

    /// Copy of one trace.
    pub fn trace(&self, instance: InstanceId) -> Option<Vec<Value>> {
        self.traces.get(&instance).map(|entry| entry.value().clone())
    }

    /// Number of instances with at least one recorded value.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Ordered copy of every trace.
    pub fn snapshot(&self) -> BTreeMap<InstanceId, Vec<Value>> {
        self.traces
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Compare one instance's trace with the expected sequence.
    pub fn validate(&self, instance: InstanceId, expected: &[Value]) -> Validation {
        let actual = self.trace(instance).unwrap_or_default();
        let passed = actual.as_slice() == expected;
        let diff = if passed {
            format!("trace matches ({} values)", actual.len())
        } else {
            render_diff(expected, &actual)
        };
        Validation {
            instance,
            passed,
            expected: expected.to_vec(),
            actual,
            diff,
        }
    }

    /// Validate every instance in `expected`.
    pub fn validate_all<I>(&self, expected: I) -> ValidationReport
    where
        I: IntoIterator<Item = (InstanceId, Vec<Value>)>,
    {
        let mut results: Vec<Validation> = expected
            .into_iter()
            .map(|(instance, values)| self.validate(instance, &values))
            .collect();
        results.sort_by_key(|validation| validation.instance);
        ValidationReport { results }
    }
}

fn render_diff(expected: &[Value], actual: &[Value]) -> String {
    let mut out = String::new();
    if actual.is_empty() {
        let _ = write!(out, "no values recorded, expected {}", render_values(expected));
        return out;
    }
    let _ = write!(
        out,
        "expected {} but recorded {}",
        render_values(expected),
        render_values(actual)
    );
    for index in 0..expected.len().max(actual.len()) {
        match (expected.get(index), actual.get(index)) {
            (Some(want), Some(got)) if want != got => {
                let _ = write!(out, "\n  [{}] expected {}, got {}", index, want, got);
            }
            (Some(want), None) => {
                let _ = write!(out, "\n  [{}] missing {}", index, want);
            }
            (None, Some(got)) => {
                let _ = write!(out, "\n  [{}] unexpected {}", index, got);
            }
            _ => {}
        }
    }
    out
}

fn render_values(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Outcome of validating one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    /// Instance checked.
    pub instance: InstanceId,
    /// Whether the trace matched exactly.
    pub passed: bool,
    /// Expected sequence.
    pub expected: Vec<Value>,
    /// Recorded sequence.
    pub actual: Vec<Value>,
    /// Human-readable comparison.
    pub diff: String,
}

/// Validation results for a set of instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// One entry per checked instance, ordered by id.
    pub results: Vec<Validation>,
}

impl ValidationReport {
    /// Number of passing instances.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    /// Whether every instance passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            let mark = if result.passed { "pass" } else { "FAIL" };
            writeln!(f, "instance {}: {} - {}", result.instance, mark, result.diff)?;
        }
        write!(f, "validation: {}/{} passed", self.passed(), self.results.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::Integer).collect()
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let table = Arc::new(ResultTable::new());
        let handles: Vec<_> = (1..=16u64)
            .map(|id| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for step in 0..200 {
                        table.record(InstanceId(id), Value::Integer(step));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.len(), 16);
        let expected: Vec<Value> = (0..200).map(Value::Integer).collect();
        for id in 1..=16u64 {
            assert_eq!(table.trace(InstanceId(id)).unwrap(), expected);
        }
    }

    #[test]
    fn validation_reports_differences() {
        let table = ResultTable::new();
        for value in [10, 11, 99] {
            table.record(InstanceId(1), Value::Integer(value));
        }

        let ok = table.validate(InstanceId(1), &ints(&[10, 11, 99]));
        assert!(ok.passed);

        let bad = table.validate(InstanceId(1), &ints(&[10, 11, 12, 13]));
        assert!(!bad.passed);
        assert!(bad.diff.contains("[2] expected 12, got 99"));
        assert!(bad.diff.contains("[3] missing 13"));

        let empty = table.validate(InstanceId(7), &ints(&[1]));
        assert!(!empty.passed);
        assert!(empty.diff.starts_with("no values recorded"));
    }

    #[test]
    fn report_counts_passes() {
        let table = ResultTable::new();
        table.record(InstanceId(1), Value::Integer(1));
        table.record(InstanceId(2), Value::Integer(5));
        let report = table.validate_all(vec![
            (InstanceId(2), ints(&[2])),
            (InstanceId(1), ints(&[1])),
        ]);
        assert_eq!(report.passed(), 1);
        assert!(!report.all_passed());
        assert_eq!(report.results[0].instance, InstanceId(1));
        assert!(report.to_string().ends_with("1/2 passed"));
    }
}
