//! Aggregated report for one `run_all` call.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use uuid::Uuid;

use super::instance::{InstanceId, InstanceOutcome, InstanceStatus};
use crate::definition::Value;

/// Counts and per-instance outcomes of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When dispatch began.
    pub started_at: DateTime<Utc>,
    /// When the last instance settled.
    pub finished_at: DateTime<Utc>,
    /// Instances that completed.
    pub completed: usize,
    /// Instances that were cancelled.
    pub aborted: usize,
    /// Instances that faulted.
    pub faulted: usize,
    /// One outcome per instance, ordered by id.
    pub outcomes: Vec<InstanceOutcome>,
}

impl RunSummary {
    /// Tally outcomes into a summary.
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, mut outcomes: Vec<InstanceOutcome>) -> Self {
        outcomes.sort_by_key(|outcome| outcome.id);
        let count = |status: InstanceStatus| outcomes.iter().filter(|o| o.status == status).count();
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completed: count(InstanceStatus::Completed),
            aborted: count(InstanceStatus::Aborted),
            faulted: count(InstanceStatus::Faulted),
            outcomes,
        }
    }

    /// Number of instances in the run.
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether every instance completed.
    pub fn all_completed(&self) -> bool {
        self.completed == self.outcomes.len()
    }

    /// Outcome of one instance.
    pub fn outcome(&self, id: InstanceId) -> Option<&InstanceOutcome> {
        self.outcomes
            .binary_search_by_key(&id, |outcome| outcome.id)
            .ok()
            .map(|index| &self.outcomes[index])
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// Plain-text table, one row per instance.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {}", self.run_id);
        let _ = writeln!(
            out,
            "{:>8}  {:<16}  {:<9}  {:>8}  detail",
            "instance", "workflow", "status", "ms"
        );
        for outcome in &self.outcomes {
            let elapsed = outcome
                .started_at
                .map(|start| (outcome.finished_at - start).num_milliseconds().to_string())
                .unwrap_or_else(|| "-".to_string());
            let detail = match &outcome.error {
                Some(error) => error.clone(),
                None => render_trace(&outcome.trace),
            };
            let _ = writeln!(
                out,
                "{:>8}  {:<16}  {:<9}  {:>8}  {}",
                outcome.id.to_string(),
                outcome.workflow,
                outcome.status.to_string(),
                elapsed,
                detail
            );
        }
        let _ = write!(
            out,
            "completed: {}  aborted: {}  faulted: {}  ({} ms)",
            self.completed,
            self.aborted,
            self.faulted,
            self.elapsed().num_milliseconds()
        );
        out
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn render_trace(trace: &[Value]) -> String {
    let parts: Vec<String> = trace.iter().map(Value::to_string).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: u64, status: InstanceStatus, error: Option<&str>) -> InstanceOutcome {
        let now = Utc::now();
        InstanceOutcome {
            id: InstanceId(id),
            workflow: "counter".to_string(),
            status,
            error: error.map(str::to_string),
            trace: vec![Value::Integer(id as i64)],
            started_at: Some(now),
            finished_at: now,
        }
    }

    #[test]
    fn tallies_and_orders_outcomes() {
        let summary = RunSummary::new(
            Uuid::new_v4(),
            Utc::now(),
            vec![
                outcome(3, InstanceStatus::Faulted, Some("division by zero")),
                outcome(1, InstanceStatus::Completed, None),
                outcome(2, InstanceStatus::Aborted, None),
            ],
        );
        assert_eq!((summary.completed, summary.aborted, summary.faulted), (1, 1, 1));
        assert_eq!(summary.outcomes[0].id, InstanceId(1));
        assert!(!summary.all_completed());
        assert_eq!(summary.outcome(InstanceId(2)).unwrap().status, InstanceStatus::Aborted);
        assert!(summary.outcome(InstanceId(9)).is_none());

        let table = summary.render_table();
        assert!(table.contains("division by zero"));
        assert!(table.ends_with(&format!(
            "completed: 1  aborted: 1  faulted: 1  ({} ms)",
            summary.elapsed().num_milliseconds()
        )));
    }

    #[test]
    fn empty_run_is_all_completed() {
        let summary = RunSummary::new(Uuid::new_v4(), Utc::now(), Vec::new());
        assert_eq!(summary.total(), 0);
        assert!(summary.all_completed());
        let json: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(json["completed"], 0);
        assert!(json["outcomes"].as_array().unwrap().is_empty());
    }
}
