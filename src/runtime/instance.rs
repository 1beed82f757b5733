//! Instances: one execution of a shared definition against a private store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::error::InstanceError;
use super::store::VariableStore;
use crate::definition::{Value, WorkflowDefinition};

/// 1-based instance identifier, unique within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<InstanceId> for Value {
    fn from(id: InstanceId) -> Self {
        Value::Integer(id.0 as i64)
    }
}

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Executing on its task.
    Running,
    /// Root sequence finished.
    Completed,
    /// Cancelled before natural completion.
    Aborted,
    /// Stopped by an error.
    Faulted,
}

impl InstanceStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Aborted | InstanceStatus::Faulted
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Aborted => "aborted",
            InstanceStatus::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// Mutable execution record of one instance.
///
/// Owned by the task running the instance; nothing else holds a reference to
/// the store or trace while it runs.
#[derive(Debug)]
pub struct InstanceRun {
    pub(crate) id: InstanceId,
    pub(crate) definition: Arc<WorkflowDefinition>,
    pub(crate) store: VariableStore,
    pub(crate) trace: Vec<Value>,
    status: InstanceStatus,
    error: Option<InstanceError>,
    started_at: Option<DateTime<Utc>>,
}

impl InstanceRun {
    /// Fresh run seeded with already-bound parameters.
    pub fn new(
        id: InstanceId,
        definition: Arc<WorkflowDefinition>,
        bound: Vec<(String, Value)>,
    ) -> Self {
        Self {
            id,
            definition,
            store: VariableStore::with_parameters(bound),
            trace: Vec::new(),
            status: InstanceStatus::Pending,
            error: None,
            started_at: None,
        }
    }

    /// Instance id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Shared definition this run executes.
    pub fn definition(&self) -> &Arc<WorkflowDefinition> {
        &self.definition
    }

    /// Private variable store.
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Values emitted so far.
    pub fn trace(&self) -> &[Value] {
        &self.trace
    }

    /// Current status.
    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    /// Fault detail, if the run faulted.
    pub fn error(&self) -> Option<&InstanceError> {
        self.error.as_ref()
    }

    /// Move from `Pending` to `Running`. Returns false if the run already left `Pending`.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != InstanceStatus::Pending {
            return false;
        }
        self.status = InstanceStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Enter a terminal status. The first terminal status wins.
    pub(crate) fn settle(&mut self, status: InstanceStatus, error: Option<InstanceError>) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        true
    }

    /// Summarise a settled run, discarding its store.
    pub(crate) fn into_outcome(self) -> InstanceOutcome {
        InstanceOutcome {
            id: self.id,
            workflow: self.definition.name().to_string(),
            status: self.status,
            error: self.error.map(|err| err.to_string()),
            trace: self.trace,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Terminal report for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceOutcome {
    /// Instance id.
    pub id: InstanceId,
    /// Name of the definition the instance ran.
    pub workflow: String,
    /// Terminal status.
    pub status: InstanceStatus,
    /// Rendered fault detail.
    pub error: Option<String>,
    /// Emitted values in order.
    pub trace: Vec<Value>,
    /// When execution began; `None` if it never started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance settled.
    pub finished_at: DateTime<Utc>,
}

/// Callback receiving a terminal outcome.
pub type OutcomeHandler = Box<dyn FnOnce(&InstanceOutcome) + Send + 'static>;

/// Per-instance lifecycle callbacks.
///
/// At most one handler fires, exactly once, on the instance's own task.
#[derive(Default)]
pub struct InstanceHandlers {
    on_completed: Option<OutcomeHandler>,
    on_aborted: Option<OutcomeHandler>,
    on_faulted: Option<OutcomeHandler>,
}

impl InstanceHandlers {
    /// No handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler for `Completed`.
    pub fn on_completed(mut self, handler: impl FnOnce(&InstanceOutcome) + Send + 'static) -> Self {
        self.on_completed = Some(Box::new(handler));
        self
    }

    /// Handler for `Aborted`.
    pub fn on_aborted(mut self, handler: impl FnOnce(&InstanceOutcome) + Send + 'static) -> Self {
        self.on_aborted = Some(Box::new(handler));
        self
    }

    /// Handler for `Faulted`.
    pub fn on_faulted(mut self, handler: impl FnOnce(&InstanceOutcome) + Send + 'static) -> Self {
        self.on_faulted = Some(Box::new(handler));
        self
    }

    pub(crate) fn fire(self, outcome: &InstanceOutcome) {
        let handler = match outcome.status {
            InstanceStatus::Completed => self.on_completed,
            InstanceStatus::Aborted => self.on_aborted,
            InstanceStatus::Faulted => self.on_faulted,
            InstanceStatus::Pending | InstanceStatus::Running => None,
        };
        if let Some(handler) = handler {
            handler(outcome);
        }
    }
}

impl fmt::Debug for InstanceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandlers")
            .field("on_completed", &self.on_completed.is_some())
            .field("on_aborted", &self.on_aborted.is_some())
            .field("on_faulted", &self.on_faulted.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Expr, SequenceBuilder, WorkflowBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn definition() -> Arc<WorkflowDefinition> {
        Arc::new(
            WorkflowBuilder::new("noop")
                .body(SequenceBuilder::new().emit(Expr::int(1)))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn terminal_status_is_immutable() {
        let mut run = InstanceRun::new(InstanceId(1), definition(), Vec::new());
        assert!(run.start());
        assert!(!run.start());
        assert!(run.settle(InstanceStatus::Completed, None));
        assert!(!run.settle(InstanceStatus::Aborted, None));
        assert_eq!(run.status(), InstanceStatus::Completed);

        let outcome = run.into_outcome();
        assert_eq!(outcome.workflow, "noop");
        assert!(outcome.started_at.is_some());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn only_matching_handler_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let completed = hits.clone();
        let faulted = hits.clone();
        let handlers = InstanceHandlers::new()
            .on_completed(move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .on_faulted(move |_| {
                faulted.fetch_add(100, Ordering::SeqCst);
            });

        let mut run = InstanceRun::new(InstanceId(3), definition(), Vec::new());
        run.settle(InstanceStatus::Completed, None);
        handlers.fire(&run.into_outcome());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outcome_serializes_status_in_kebab_case() {
        let mut run = InstanceRun::new(InstanceId(2), definition(), Vec::new());
        run.settle(InstanceStatus::Aborted, None);
        let json = serde_json::to_value(run.into_outcome()).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["id"], 2);
        assert!(json["started_at"].is_null());
    }
}
