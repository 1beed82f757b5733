//! Instance interpreter
//!
//! Walks a shared [`WorkflowDefinition`] against the private store of one
//! [`InstanceRun`]. Execution is a stack of sequence frames: [`Interpreter::tick`]
//! performs one activity and reports what happened, and [`Interpreter::drive`]
//! loops over ticks on the instance's task, sleeping whenever a `Delay` asks it
//! to.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::error::{EvaluationError, ExternalInvocationError, InstanceError};
use super::instance::{InstanceRun, InstanceStatus};
use super::registry::ExternalRegistry;
use super::results::ResultTable;
use super::sink::OutputSink;
use super::CancellationPolicy;
use crate::definition::{ActivityNode, Expr, NodeId, Value, ValueType, VariableDecl};

/// Collaborators shared by every instance of a run.
#[derive(Clone)]
pub struct ExecutionEnv {
    /// External methods available to `InvokeExternal`.
    pub registry: ExternalRegistry,
    /// Destination of emitted lines.
    pub sink: Arc<dyn OutputSink>,
    /// Shared trace table.
    pub results: Arc<ResultTable>,
}

impl std::fmt::Debug for ExecutionEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEnv")
            .field("registry", &self.registry)
            .field("results", &self.results.len())
            .finish()
    }
}

/// Outcome of a single `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// One activity ran (or a sequence was entered).
    Progress,
    /// A `Delay` evaluated to this duration; the caller should sleep.
    Sleeping(Duration),
    /// The root sequence finished.
    Completed,
}

/// One active sequence and the position of its next child.
#[derive(Debug, Clone, Copy)]
struct Frame {
    node: NodeId,
    index: usize,
}

/// Interpreter for one instance.
pub struct Interpreter {
    run: InstanceRun,
    env: ExecutionEnv,
    frames: Vec<Frame>,
    entered: bool,
    completed: bool,
    fault: Option<String>,
}

impl Interpreter {
    /// Prepare to execute `run` from its definition's root.
    pub fn new(run: InstanceRun, env: ExecutionEnv) -> Self {
        Self {
            run,
            env,
            frames: Vec::new(),
            entered: false,
            completed: false,
            fault: None,
        }
    }

    /// The run being executed.
    pub fn run(&self) -> &InstanceRun {
        &self.run
    }

    /// Give back the run.
    pub fn into_run(self) -> InstanceRun {
        self.run
    }

    /// Whether an earlier tick failed.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    /// Execute until one meaningful event occurs.
    ///
    /// The first error is terminal: every later call returns
    /// [`InstanceError::Halted`] without running another activity.
    pub fn tick(&mut self) -> Result<RuntimeEvent, InstanceError> {
        if let Some(fault) = &self.fault {
            return Err(InstanceError::Halted(fault.clone()));
        }
        let event = self.step();
        if let Err(err) = &event {
            self.fault = Some(err.to_string());
        }
        event
    }

    fn step(&mut self) -> Result<RuntimeEvent, InstanceError> {
        if self.completed {
            return Ok(RuntimeEvent::Completed);
        }

        let definition = Arc::clone(&self.run.definition);

        if !self.entered {
            self.entered = true;
            self.enter(definition.root(), definition.node(definition.root()))?;
            return Ok(RuntimeEvent::Progress);
        }

        loop {
            let Some(frame) = self.frames.last_mut() else {
                self.completed = true;
                return Ok(RuntimeEvent::Completed);
            };

            let children = match definition.node(frame.node) {
                ActivityNode::Sequence { children, .. } => children,
                other => unreachable!("frame on non-sequence node {}", other.kind()),
            };

            if frame.index >= children.len() {
                let finished = frame.node;
                self.frames.pop();
                self.exit(definition.node(finished));
                continue;
            }

            let child = children[frame.index];
            frame.index += 1;
            return self.execute(child, definition.node(child));
        }
    }

    fn execute(&mut self, id: NodeId, node: &ActivityNode) -> Result<RuntimeEvent, InstanceError> {
        match node {
            ActivityNode::Sequence { .. } => {
                self.enter(id, node)?;
                Ok(RuntimeEvent::Progress)
            }
            ActivityNode::Assign { target, value } => {
                let value = self.eval(id, node, value)?;
                self.run
                    .store
                    .set(target, value)
                    .map_err(|source| evaluation(id, node, source))?;
                Ok(RuntimeEvent::Progress)
            }
            ActivityNode::Emit { value, message } => {
                let value = self.eval(id, node, value)?;
                let line = match message {
                    Some(message) => self.eval(id, node, message)?.to_string(),
                    None => format!("[Instance {}] {}", self.run.id, value),
                };
                debug!(node = %id, value = %value, "emit");
                self.env.results.record(self.run.id, value.clone());
                self.run.trace.push(value);
                self.env.sink.write_line(&line);
                Ok(RuntimeEvent::Progress)
            }
            ActivityNode::Delay { duration } => match self.eval(id, node, duration)? {
                Value::Duration(duration) => Ok(RuntimeEvent::Sleeping(duration)),
                other => Err(evaluation(
                    id,
                    node,
                    EvaluationError::TypeMismatch {
                        operation: "delay".to_string(),
                        expected: ValueType::Duration.to_string(),
                        found: other.value_type().to_string(),
                    },
                )),
            },
            ActivityNode::InvokeExternal { method, args, bind } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(id, node, arg)?);
                }
                let external =
                    |source: ExternalInvocationError| InstanceError::External { node: id, source };
                let returned = self
                    .env
                    .registry
                    .invoke(method, self.run.id, &values)
                    .map_err(external)?;
                if let Some(target) = bind {
                    let value = returned
                        .ok_or_else(|| ExternalInvocationError::MissingReturnValue(method.clone()))
                        .map_err(external)?;
                    self.run
                        .store
                        .set(target, value)
                        .map_err(|source| evaluation(id, node, source))?;
                }
                Ok(RuntimeEvent::Progress)
            }
        }
    }

    /// Declare a sequence's variables in order and push its frame.
    fn enter(&mut self, id: NodeId, node: &ActivityNode) -> Result<(), InstanceError> {
        if let ActivityNode::Sequence { variables, .. } = node {
            for VariableDecl { name, init } in variables {
                let value = match init {
                    Some(init) => Some(self.eval(id, node, init)?),
                    None => None,
                };
                self.run.store.declare(name.clone(), value);
            }
        }
        self.frames.push(Frame { node: id, index: 0 });
        Ok(())
    }

    fn exit(&mut self, node: &ActivityNode) {
        if let ActivityNode::Sequence { variables, .. } = node {
            for decl in variables {
                self.run.store.release(&decl.name);
            }
        }
    }

    fn eval(&self, id: NodeId, node: &ActivityNode, expr: &Expr) -> Result<Value, InstanceError> {
        expr.eval(&self.run.store)
            .map_err(|source| evaluation(id, node, source))
    }

    /// Run to a terminal status on the current task.
    ///
    /// Cancellation is only observed here under
    /// [`CancellationPolicy::BetweenActivities`]; the before-start check belongs
    /// to the scheduler.
    #[instrument(
        name = "instance",
        skip_all,
        fields(instance_id = %self.run.id, workflow = %self.run.definition.name())
    )]
    pub async fn drive(mut self, policy: CancellationPolicy, cancel: CancellationToken) -> InstanceRun {
        self.run.start();
        let cooperative = policy == CancellationPolicy::BetweenActivities;

        loop {
            if cooperative && cancel.is_cancelled() {
                debug!("cancelled between activities");
                self.run.settle(InstanceStatus::Aborted, None);
                break;
            }

            match self.tick() {
                Ok(RuntimeEvent::Progress) => {}
                Ok(RuntimeEvent::Sleeping(duration)) => {
                    if cooperative {
                        tokio::select! {
                            _ = tokio::time::sleep(duration) => {}
                            _ = cancel.cancelled() => {
                                debug!("cancelled during delay");
                                self.run.settle(InstanceStatus::Aborted, None);
                                break;
                            }
                        }
                    } else {
                        tokio::time::sleep(duration).await;
                    }
                }
                Ok(RuntimeEvent::Completed) => {
                    self.run.settle(InstanceStatus::Completed, None);
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "instance faulted");
                    self.run.settle(InstanceStatus::Faulted, Some(err));
                    break;
                }
            }
        }

        self.run
    }
}

fn evaluation(id: NodeId, node: &ActivityNode, source: EvaluationError) -> InstanceError {
    InstanceError::Evaluation {
        node: id,
        activity: node.kind(),
        source,
    }
}
