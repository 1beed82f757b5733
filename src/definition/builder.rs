//! Programmatic construction of workflow definitions.
//!
//! Both the builder API and the text loader produce an [`ActivitySpec`] tree
//! which is validated and flattened into the arena owned by
//! [`WorkflowDefinition`].

use super::expr::Expr;
use super::ir::{ActivityNode, NodeId, ParameterSpec, VariableDecl, WorkflowDefinition};
use super::value::ValueType;
use super::{DefinitionError, Result};

/// Owned, unvalidated activity description.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivitySpec {
    /// Nested sequence.
    Sequence(SequenceBuilder),
    /// Variable assignment.
    Assign {
        /// Variable written.
        target: String,
        /// Value expression.
        value: Expr,
    },
    /// Recorded output.
    Emit {
        /// Recorded value.
        value: Expr,
        /// Optional sink line.
        message: Option<Expr>,
    },
    /// Timed suspension.
    Delay(Expr),
    /// External method call.
    InvokeExternal {
        /// Method name.
        method: String,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Variable receiving the result.
        bind: Option<String>,
    },
}

/// Builder for a `Sequence` node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceBuilder {
    variables: Vec<VariableDecl>,
    children: Vec<ActivitySpec>,
}

impl SequenceBuilder {
    /// Empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an unassigned variable.
    pub fn var(mut self, name: impl Into<String>) -> Self {
        self.variables.push(VariableDecl {
            name: name.into(),
            init: None,
        });
        self
    }

    /// Declare a variable initialised on sequence entry.
    pub fn var_init(mut self, name: impl Into<String>, init: Expr) -> Self {
        self.variables.push(VariableDecl {
            name: name.into(),
            init: Some(init),
        });
        self
    }

    /// Append an assignment.
    pub fn assign(self, target: impl Into<String>, value: Expr) -> Self {
        self.push(ActivitySpec::Assign {
            target: target.into(),
            value,
        })
    }

    /// Append an emit whose sink line is the rendered value.
    pub fn emit(self, value: Expr) -> Self {
        self.push(ActivitySpec::Emit {
            value,
            message: None,
        })
    }

    /// Append an emit with an explicit sink line.
    pub fn emit_message(self, value: Expr, message: Expr) -> Self {
        self.push(ActivitySpec::Emit {
            value,
            message: Some(message),
        })
    }

    /// Append a delay.
    pub fn delay(self, duration: Expr) -> Self {
        self.push(ActivitySpec::Delay(duration))
    }

    /// Append an external call whose result is discarded.
    pub fn invoke(self, method: impl Into<String>, args: Vec<Expr>) -> Self {
        self.push(ActivitySpec::InvokeExternal {
            method: method.into(),
            args,
            bind: None,
        })
    }

    /// Append an external call whose result is stored in `bind`.
    pub fn invoke_into(
        self,
        method: impl Into<String>,
        args: Vec<Expr>,
        bind: impl Into<String>,
    ) -> Self {
        self.push(ActivitySpec::InvokeExternal {
            method: method.into(),
            args,
            bind: Some(bind.into()),
        })
    }

    /// Append a nested sequence.
    pub fn sequence(self, nested: SequenceBuilder) -> Self {
        self.push(ActivitySpec::Sequence(nested))
    }

    /// Append any activity.
    pub fn push(mut self, activity: ActivitySpec) -> Self {
        self.children.push(activity);
        self
    }

    pub(crate) fn declare(&mut self, decl: VariableDecl) {
        self.variables.push(decl);
    }

    pub(crate) fn append(&mut self, activity: ActivitySpec) {
        self.children.push(activity);
    }
}

/// Builder for a complete [`WorkflowDefinition`].
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowBuilder {
    name: String,
    parameters: Vec<ParameterSpec>,
    body: SequenceBuilder,
}

impl WorkflowBuilder {
    /// Start a workflow with an empty body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            body: SequenceBuilder::new(),
        }
    }

    /// Declare a required parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            ty,
        });
        self
    }

    /// Set the root sequence.
    pub fn body(mut self, body: SequenceBuilder) -> Self {
        self.body = body;
        self
    }

    /// Validate and freeze the definition.
    pub fn build(self) -> Result<WorkflowDefinition> {
        let mut scope = Vec::new();
        for param in &self.parameters {
            if scope.contains(&param.name) {
                return Err(DefinitionError::DuplicateParameter(param.name.clone()));
            }
            scope.push(param.name.clone());
        }

        let mut compiler = Compiler {
            nodes: Vec::new(),
            scope,
        };
        let root = compiler.sequence(self.body)?;

        Ok(WorkflowDefinition::from_arena(
            self.name,
            self.parameters,
            compiler.nodes,
            root,
        ))
    }
}

/// Flattens specs into the arena while tracking the lexical scope.
struct Compiler {
    nodes: Vec<ActivityNode>,
    scope: Vec<String>,
}

impl Compiler {
    fn sequence(&mut self, spec: SequenceBuilder) -> Result<NodeId> {
        let mark = self.scope.len();

        for decl in &spec.variables {
            if let Some(init) = &decl.init {
                self.check_expr(init, &format!("initialiser of `{}`", decl.name))?;
            }
            if self.scope.contains(&decl.name) {
                return Err(DefinitionError::DuplicateVariable(decl.name.clone()));
            }
            self.scope.push(decl.name.clone());
        }

        let mut children = Vec::with_capacity(spec.children.len());
        for child in spec.children {
            children.push(self.activity(child)?);
        }

        self.scope.truncate(mark);
        Ok(self.alloc(ActivityNode::Sequence {
            variables: spec.variables,
            children,
        }))
    }

    fn activity(&mut self, spec: ActivitySpec) -> Result<NodeId> {
        let node = match spec {
            ActivitySpec::Sequence(nested) => return self.sequence(nested),
            ActivitySpec::Assign { target, value } => {
                let context = format!("assign to `{}`", target);
                self.check_name(&target, &context)?;
                self.check_expr(&value, &context)?;
                ActivityNode::Assign { target, value }
            }
            ActivitySpec::Emit { value, message } => {
                self.check_expr(&value, "emit")?;
                if let Some(message) = &message {
                    self.check_expr(message, "emit message")?;
                }
                ActivityNode::Emit { value, message }
            }
            ActivitySpec::Delay(duration) => {
                self.check_expr(&duration, "delay")?;
                ActivityNode::Delay { duration }
            }
            ActivitySpec::InvokeExternal { method, args, bind } => {
                if method.trim().is_empty() {
                    return Err(DefinitionError::Malformed(
                        "invoke requires a method name".to_string(),
                    ));
                }
                let context = format!("invoke `{}`", method);
                for arg in &args {
                    self.check_expr(arg, &context)?;
                }
                if let Some(target) = &bind {
                    self.check_name(target, &context)?;
                }
                ActivityNode::InvokeExternal { method, args, bind }
            }
        };
        Ok(self.alloc(node))
    }

    fn check_expr(&self, expr: &Expr, context: &str) -> Result<()> {
        let mut missing = None;
        expr.for_each_var(&mut |name| {
            if missing.is_none() && !self.scope.iter().any(|visible| visible == name) {
                missing = Some(name.to_string());
            }
        });
        match missing {
            Some(name) => Err(DefinitionError::UndeclaredVariable {
                name,
                context: context.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_name(&self, name: &str, context: &str) -> Result<()> {
        if self.scope.iter().any(|visible| visible == name) {
            Ok(())
        } else {
            Err(DefinitionError::UndeclaredVariable {
                name: name.to_string(),
                context: context.to_string(),
            })
        }
    }

    fn alloc(&mut self, node: ActivityNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
}
