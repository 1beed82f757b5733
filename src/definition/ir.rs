use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::expr::Expr;
use super::value::{Value, ValueType};
use super::{DefinitionError, Result};

/// Index of a node inside its definition's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Variable introduced by a sequence, optionally initialised on entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    /// Variable name, unique among everything in scope.
    pub name: String,
    /// Initial value; the variable is unassigned until written when `None`.
    pub init: Option<Expr>,
}

/// Primitive activities and the `Sequence` composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "activity", rename_all = "kebab-case")]
pub enum ActivityNode {
    /// Run children in order.
    Sequence {
        /// Variables scoped to this sequence.
        variables: Vec<VariableDecl>,
        /// Ordered children.
        children: Vec<NodeId>,
    },
    /// Evaluate `value` and store it under `target`.
    Assign {
        /// Variable written.
        target: String,
        /// Value expression.
        value: Expr,
    },
    /// Record a value into the trace and write a line to the output sink.
    Emit {
        /// Recorded value.
        value: Expr,
        /// Line written to the sink; defaults to the rendered value.
        message: Option<Expr>,
    },
    /// Suspend the instance for the evaluated duration.
    Delay {
        /// Duration expression.
        duration: Expr,
    },
    /// Call a method from the external registry.
    InvokeExternal {
        /// Registered method name.
        method: String,
        /// Argument expressions, evaluated in order.
        args: Vec<Expr>,
        /// Variable receiving the return value.
        bind: Option<String>,
    },
}

impl ActivityNode {
    /// Short kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActivityNode::Sequence { .. } => "sequence",
            ActivityNode::Assign { .. } => "assign",
            ActivityNode::Emit { .. } => "emit",
            ActivityNode::Delay { .. } => "delay",
            ActivityNode::InvokeExternal { .. } => "invoke",
        }
    }
}

/// Parameter that must be supplied when an instance is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Required value type.
    pub ty: ValueType,
}

/// Parameter values supplied for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters(BTreeMap<String, Value>);

impl Parameters {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Look up a value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Iterate in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// Immutable, validated workflow definition.
///
/// Nodes live in an arena owned by the definition and refer to each other by
/// [`NodeId`]. Share a definition between instances with an `Arc`; nothing in
/// it is ever written after [`WorkflowBuilder::build`](super::WorkflowBuilder::build)
/// returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    name: String,
    parameters: Vec<ParameterSpec>,
    nodes: Vec<ActivityNode>,
    root: NodeId,
}

impl WorkflowDefinition {
    pub(crate) fn from_arena(
        name: String,
        parameters: Vec<ParameterSpec>,
        nodes: Vec<ActivityNode>,
        root: NodeId,
    ) -> Self {
        Self {
            name,
            parameters,
            nodes,
            root,
        }
    }

    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters in declaration order.
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Root sequence.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Node by id.
    ///
    /// Ids handed out by this definition are always in range.
    pub fn node(&self, id: NodeId) -> &ActivityNode {
        &self.nodes[id.0]
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// BLAKE3 digest of the canonical serialized tree, hex encoded.
    pub fn fingerprint(&self) -> String {
        // Serializing plain data structures with string keys cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    /// Check supplied parameters against the declarations.
    ///
    /// Every declared parameter must be present with the declared type and no
    /// undeclared names may appear.
    pub fn bind(&self, params: &Parameters) -> Result<Vec<(String, Value)>> {
        for (name, _) in params.iter() {
            if !self.parameters.iter().any(|spec| &spec.name == name) {
                return Err(DefinitionError::UnknownParameter(name.clone()));
            }
        }

        let mut bound = Vec::with_capacity(self.parameters.len());
        for spec in &self.parameters {
            let value = params
                .get(&spec.name)
                .ok_or_else(|| DefinitionError::MissingParameter(spec.name.clone()))?;
            if value.value_type() != spec.ty {
                return Err(DefinitionError::ParameterType {
                    name: spec.name.clone(),
                    expected: spec.ty,
                    found: value.value_type(),
                });
            }
            bound.push((spec.name.clone(), value.clone()));
        }
        Ok(bound)
    }
}
