//! Instance scheduler
//!
//! Creates instances bound round-robin to shared definitions and runs each one
//! on its own tokio task. Every task is spawned when the run starts; a fair
//! semaphore bounds how many execute at once, and instances beyond the bound
//! wait their turn in dispatch order. Faults, panics and
//! cancellations are caught at the instance boundary, so one instance can never
//! take down its siblings.

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use super::error::{InstanceError, Result, SchedulingError};
use super::instance::{InstanceHandlers, InstanceId, InstanceOutcome, InstanceRun, InstanceStatus};
use super::interpreter::{ExecutionEnv, Interpreter};
use super::registry::ExternalRegistry;
use super::results::ResultTable;
use super::sink::OutputSink;
use super::summary::RunSummary;
use super::{CancellationPolicy, SchedulerConfig};
use crate::definition::{Parameters, WorkflowDefinition};

/// Created instance waiting for `run_all`.
struct PendingInstance {
    run: InstanceRun,
    handlers: InstanceHandlers,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    next_id: u64,
    pending: Vec<PendingInstance>,
    live: HashMap<InstanceId, CancellationToken>,
}

/// Creates and runs workflow instances.
pub struct Scheduler {
    config: SchedulerConfig,
    env: ExecutionEnv,
    state: Arc<Mutex<State>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Build a scheduler with a fresh result table.
    pub fn new(
        config: SchedulerConfig,
        registry: ExternalRegistry,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        if config.max_concurrency == 0 {
            return Err(SchedulingError::InvalidConcurrency(0));
        }
        Ok(Self {
            config,
            env: ExecutionEnv {
                registry,
                sink,
                results: Arc::new(ResultTable::new()),
            },
            state: Arc::new(Mutex::new(State::default())),
            shutdown: CancellationToken::new(),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared trace table written by every instance.
    pub fn results(&self) -> Arc<ResultTable> {
        Arc::clone(&self.env.results)
    }

    /// Create `count` instances.
    ///
    /// Instance `id` runs `definitions[(id - 1) % definitions.len()]` with the
    /// parameters `params(id)` returns. Parameters are bound immediately; if
    /// any instance fails to bind, none of the batch is created.
    pub fn create_instances<F>(
        &self,
        definitions: &[Arc<WorkflowDefinition>],
        count: usize,
        mut params: F,
    ) -> Result<Vec<InstanceId>>
    where
        F: FnMut(InstanceId) -> Parameters,
    {
        if definitions.is_empty() {
            return Err(SchedulingError::NoDefinitions);
        }

        // Reserve the id range; `params` must run unlocked.
        let first = {
            let mut state = self.state.lock();
            let first = state.next_id + 1;
            state.next_id += count as u64;
            first
        };

        let mut batch = Vec::with_capacity(count);
        for offset in 0..count as u64 {
            let id = InstanceId(first + offset);
            let definition = &definitions[((id.0 - 1) % definitions.len() as u64) as usize];
            let bound = definition
                .bind(&params(id))
                .map_err(|source| SchedulingError::Binding { instance: id, source })?;
            batch.push(PendingInstance {
                run: InstanceRun::new(id, Arc::clone(definition), bound),
                handlers: InstanceHandlers::default(),
                cancel: self.shutdown.child_token(),
            });
        }

        let ids: Vec<InstanceId> = batch.iter().map(|p| p.run.id()).collect();
        let mut state = self.state.lock();
        for pending in batch {
            state.live.insert(pending.run.id(), pending.cancel.clone());
            state.pending.push(pending);
        }
        debug!(created = ids.len(), definitions = definitions.len(), "instances created");
        Ok(ids)
    }

    /// Attach lifecycle handlers to a pending instance.
    pub fn set_handlers(&self, id: InstanceId, handlers: InstanceHandlers) -> Result<()> {
        let mut state = self.state.lock();
        let pending = state
            .pending
            .iter_mut()
            .find(|p| p.run.id() == id)
            .ok_or(SchedulingError::UnknownInstance(id))?;
        pending.handlers = handlers;
        Ok(())
    }

    /// Request cancellation of one instance.
    ///
    /// An instance that has not started yet settles as `Aborted` without
    /// running. A running instance only observes the request under
    /// [`CancellationPolicy::BetweenActivities`].
    pub fn cancel(&self, id: InstanceId) -> Result<()> {
        let state = self.state.lock();
        let token = state
            .live
            .get(&id)
            .ok_or(SchedulingError::UnknownInstance(id))?;
        token.cancel();
        debug!(instance_id = %id, "cancellation requested");
        Ok(())
    }

    /// Request cancellation of every instance, current and future.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Number of instances waiting for `run_all`.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Run all pending instances with the configured concurrency bound.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_all(self.config.max_concurrency).await
    }

    /// Run all pending instances, at most `max_concurrency` at a time.
    ///
    /// Returns once every instance is terminal.
    pub async fn run_all(&self, max_concurrency: usize) -> Result<RunSummary> {
        if max_concurrency == 0 {
            return Err(SchedulingError::InvalidConcurrency(max_concurrency));
        }

        let mut batch = std::mem::take(&mut self.state.lock().pending);
        self.config.dispatch_order.apply(&mut batch);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("run", %run_id);
        info!(
            parent: &span,
            instances = batch.len(),
            max_concurrency,
            order = %self.config.dispatch_order,
            "run started"
        );

        let permits = max_concurrency
            .min(batch.len().max(1))
            .min(Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut dispatched = Vec::with_capacity(batch.len());
        let mut handles = Vec::with_capacity(batch.len());
        for pending in batch {
            dispatched.push((pending.run.id(), pending.run.definition().name().to_string()));
            // Polling once enqueues the waiter, so queue position follows
            // dispatch order rather than task start order.
            let mut slot = Arc::clone(&semaphore).acquire_owned().boxed();
            if let Poll::Ready(acquired) = futures::poll!(&mut slot) {
                slot = futures::future::ready(acquired).boxed();
            }
            let env = self.env.clone();
            let policy = self.config.cancellation;
            let state = Arc::clone(&self.state);
            handles.push(tokio::spawn(
                execute(pending, slot, env, policy, state).instrument(span.clone()),
            ));
        }

        let joined = futures::future::join_all(handles).await;

        let mut outcomes = Vec::with_capacity(joined.len());
        for ((id, workflow), result) in dispatched.into_iter().zip(joined) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let detail = if join_err.is_panic() {
                        panic_message(join_err.into_panic())
                    } else {
                        join_err.to_string()
                    };
                    error!(parent: &span, instance_id = %id, %detail, "instance task failed");
                    self.state.lock().live.remove(&id);
                    InstanceOutcome {
                        id,
                        workflow,
                        status: InstanceStatus::Faulted,
                        error: Some(InstanceError::Panicked(detail).to_string()),
                        trace: self.env.results.trace(id).unwrap_or_default(),
                        started_at: None,
                        finished_at: Utc::now(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let summary = RunSummary::new(run_id, started_at, outcomes);
        info!(
            parent: &span,
            completed = summary.completed,
            aborted = summary.aborted,
            faulted = summary.faulted,
            elapsed_ms = summary.elapsed().num_milliseconds(),
            "run finished"
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("env", &self.env)
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Permit acquisition queued in dispatch order.
type PermitSlot = BoxFuture<'static, std::result::Result<OwnedSemaphorePermit, AcquireError>>;

/// Body of one instance task.
///
/// A queued instance whose token fires settles as `Aborted` straight away,
/// without waiting for a slot.
async fn execute(
    pending: PendingInstance,
    slot: PermitSlot,
    env: ExecutionEnv,
    policy: CancellationPolicy,
    state: Arc<Mutex<State>>,
) -> InstanceOutcome {
    let PendingInstance {
        mut run,
        handlers,
        cancel,
    } = pending;
    let id = run.id();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        acquired = slot => match acquired {
            Ok(permit) => Some(permit),
            Err(_) => unreachable!("run semaphore is never closed"),
        },
    };

    let outcome = match permit {
        Some(_) if !cancel.is_cancelled() => {
            let workflow = run.definition().name().to_string();
            let started_at = Utc::now();
            let results = Arc::clone(&env.results);
            let driven = AssertUnwindSafe(Interpreter::new(run, env).drive(policy, cancel))
                .catch_unwind()
                .await;
            match driven {
                Ok(run) => run.into_outcome(),
                Err(payload) => {
                    let detail = panic_message(payload);
                    error!(instance_id = %id, %detail, "instance panicked");
                    InstanceOutcome {
                        id,
                        workflow,
                        status: InstanceStatus::Faulted,
                        error: Some(InstanceError::Panicked(detail).to_string()),
                        trace: results.trace(id).unwrap_or_default(),
                        started_at: Some(started_at),
                        finished_at: Utc::now(),
                    }
                }
            }
        }
        _ => {
            info!(instance_id = %id, "instance aborted before start");
            run.settle(InstanceStatus::Aborted, None);
            run.into_outcome()
        }
    };

    state.lock().live.remove(&id);
    debug!(instance_id = %id, status = %outcome.status, "instance settled");
    handlers.fire(&outcome);
    drop(permit);
    outcome
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
