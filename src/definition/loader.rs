//! Definition loading from workflow source text.
//!
//! The loader turns the S-expression format into an [`ActivitySpec`] tree and
//! hands it to [`WorkflowBuilder`], so text and programmatic definitions go
//! through the same validation.

use std::path::Path;

use tracing::debug;

use super::ast::{Marker, SExpr};
use super::builder::{ActivitySpec, SequenceBuilder, WorkflowBuilder};
use super::expr::{BinaryOp, Expr};
use super::ir::{VariableDecl, WorkflowDefinition};
use super::parser::parse_source;
use super::value::ValueType;
use super::{DefinitionError, Result};

/// Produces validated definitions from some source representation.
pub trait DefinitionLoader {
    /// Parse and validate a definition from source text.
    fn load(&self, source: &str) -> Result<WorkflowDefinition>;

    /// Read a file and load it.
    fn load_file(&self, path: &Path) -> Result<WorkflowDefinition> {
        let source = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load(&source)
    }
}

/// Loader for the S-expression workflow format.
///
/// ```text
/// (workflow counter
///   (params (InstanceId int) (StartValue int))
///   (sequence
///     (var counter StartValue)
///     (emit counter :message (concat "[Instance " InstanceId "] " counter))
///     (assign counter (+ counter 1))
///     (delay (ms 100))))
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SexprLoader;

impl DefinitionLoader for SexprLoader {
    fn load(&self, source: &str) -> Result<WorkflowDefinition> {
        let file = parse_source(source)?;
        let mut workflows = file.forms.iter().filter(|f| f.head() == Some("workflow"));
        let form = workflows
            .next()
            .ok_or_else(|| malformed("source must contain a `(workflow …)` form"))?;
        if workflows.next().is_some() {
            return Err(malformed("source must contain exactly one `(workflow …)` form"));
        }
        if let Some(stray) = file.forms.iter().find(|f| f.head() != Some("workflow")) {
            return Err(malformed(&format!(
                "unexpected top-level {}",
                stray.describe()
            )));
        }

        let definition = lower_workflow(expect_list(form, "workflow")?)?;
        debug!(
            workflow = %definition.name(),
            nodes = definition.node_count(),
            fingerprint = %definition.fingerprint(),
            "definition loaded"
        );
        Ok(definition)
    }
}

fn lower_workflow(items: &[SExpr]) -> Result<WorkflowDefinition> {
    if items.len() < 2 {
        return Err(malformed("workflow requires a name"));
    }
    let name = expect_name(&items[1], "workflow name")?;
    let mut builder = WorkflowBuilder::new(name);
    let mut body = None;

    for clause in &items[2..] {
        match clause.head() {
            Some("params") => {
                for param in &expect_list(clause, "params")?[1..] {
                    let pair = expect_list(param, "parameter")?;
                    if pair.len() != 2 {
                        return Err(malformed("parameters must be written (Name type)"));
                    }
                    let name = expect_symbol(&pair[0], "parameter name")?;
                    let type_name = expect_symbol(&pair[1], "parameter type")?;
                    let ty = ValueType::from_name(&type_name)
                        .ok_or(DefinitionError::UnknownType(type_name))?;
                    builder = builder.param(name, ty);
                }
            }
            Some("sequence") => {
                if body.is_some() {
                    return Err(malformed("workflow must have exactly one body sequence"));
                }
                body = Some(lower_sequence(expect_list(clause, "sequence")?)?);
            }
            _ => {
                return Err(malformed(&format!(
                    "unexpected {} in workflow",
                    clause.describe()
                )));
            }
        }
    }

    let body = body.ok_or_else(|| malformed("workflow requires a `(sequence …)` body"))?;
    builder.body(body).build()
}

fn lower_sequence(items: &[SExpr]) -> Result<SequenceBuilder> {
    let mut sequence = SequenceBuilder::new();
    let mut seen_activity = false;

    for form in &items[1..] {
        if form.head() == Some("var") {
            if seen_activity {
                return Err(malformed(
                    "variable declarations must precede the activities of a sequence",
                ));
            }
            sequence.declare(lower_var(expect_list(form, "var")?)?);
        } else {
            seen_activity = true;
            sequence.append(lower_activity(form)?);
        }
    }
    Ok(sequence)
}

fn lower_var(items: &[SExpr]) -> Result<VariableDecl> {
    match items.len() {
        2 | 3 => Ok(VariableDecl {
            name: expect_symbol(&items[1], "variable name")?,
            init: items.get(2).map(lower_expr).transpose()?,
        }),
        _ => Err(malformed("var expects a name and an optional initial value")),
    }
}

fn lower_activity(form: &SExpr) -> Result<ActivitySpec> {
    let items = expect_list(form, "activity")?;
    let head = match items.first() {
        Some(SExpr::Symbol(head)) => head.as_str(),
        _ => return Err(malformed(&format!("expected an activity, found {}", form.describe()))),
    };

    match head {
        "sequence" => Ok(ActivitySpec::Sequence(lower_sequence(items)?)),
        "assign" => {
            if items.len() != 3 {
                return Err(malformed("assign expects a target and a value"));
            }
            Ok(ActivitySpec::Assign {
                target: expect_symbol(&items[1], "assign target")?,
                value: lower_expr(&items[2])?,
            })
        }
        "emit" => match items.len() {
            2 => Ok(ActivitySpec::Emit {
                value: lower_expr(&items[1])?,
                message: None,
            }),
            4 if items[2] == SExpr::Marker(Marker::Message) => Ok(ActivitySpec::Emit {
                value: lower_expr(&items[1])?,
                message: Some(lower_expr(&items[3])?),
            }),
            _ => Err(malformed("emit expects a value and an optional :message")),
        },
        "delay" => {
            if items.len() != 2 {
                return Err(malformed("delay expects a single duration"));
            }
            Ok(ActivitySpec::Delay(lower_expr(&items[1])?))
        }
        "invoke" => {
            if items.len() < 2 {
                return Err(malformed("invoke requires a method name"));
            }
            let method = expect_name(&items[1], "method name")?;
            let mut args = Vec::new();
            let mut bind = None;
            let mut idx = 2;
            while idx < items.len() {
                match &items[idx] {
                    SExpr::Marker(Marker::Into) => {
                        if idx + 2 != items.len() {
                            return Err(malformed("`:into` must be followed by one variable and end the form"));
                        }
                        bind = Some(expect_symbol(&items[idx + 1], "invoke target")?);
                        idx += 2;
                    }
                    other => {
                        args.push(lower_expr(other)?);
                        idx += 1;
                    }
                }
            }
            Ok(ActivitySpec::InvokeExternal { method, args, bind })
        }
        other => Err(malformed(&format!("unknown activity `{}`", other))),
    }
}

fn lower_expr(expr: &SExpr) -> Result<Expr> {
    match expr {
        SExpr::Integer(num) => Ok(Expr::int(*num)),
        SExpr::String(text) => Ok(Expr::string(text.clone())),
        SExpr::Symbol(name) => Ok(Expr::var(name.clone())),
        SExpr::Marker(_) => Err(malformed(&format!(
            "{} is not a valid expression",
            expr.describe()
        ))),
        SExpr::List(items) => {
            let head = match items.first() {
                Some(SExpr::Symbol(head)) => head.as_str(),
                _ => return Err(malformed("expression lists must start with an operator")),
            };
            let operands = items[1..]
                .iter()
                .map(lower_expr)
                .collect::<Result<Vec<_>>>()?;

            if let Some(op) = BinaryOp::from_symbol(head) {
                let mut iter = operands.into_iter();
                let (Some(first), Some(second)) = (iter.next(), iter.next()) else {
                    return Err(malformed(&format!("`{}` needs at least two operands", head)));
                };
                let folded = iter.fold(Expr::binary(op, first, second), |acc, next| {
                    Expr::binary(op, acc, next)
                });
                return Ok(folded);
            }

            match head {
                "concat" => Ok(Expr::concat(operands)),
                "str" | "ms" | "secs" => {
                    let [inner]: [Expr; 1] = operands.try_into().map_err(|_| {
                        malformed(&format!("`{}` takes exactly one operand", head))
                    })?;
                    Ok(match head {
                        "str" => Expr::str(inner),
                        "ms" => Expr::millis(inner),
                        _ => Expr::seconds(inner),
                    })
                }
                other => Err(malformed(&format!("unknown operator `{}`", other))),
            }
        }
    }
}

fn expect_list<'a>(expr: &'a SExpr, ctx: &str) -> Result<&'a [SExpr]> {
    match expr {
        SExpr::List(items) => Ok(items),
        other => Err(malformed(&format!(
            "expected list in {}, found {}",
            ctx,
            other.describe()
        ))),
    }
}

fn expect_symbol(expr: &SExpr, ctx: &str) -> Result<String> {
    match expr {
        SExpr::Symbol(sym) => Ok(sym.clone()),
        other => Err(malformed(&format!(
            "expected symbol for {}, found {}",
            ctx,
            other.describe()
        ))),
    }
}

fn expect_name(expr: &SExpr, ctx: &str) -> Result<String> {
    match expr {
        SExpr::Symbol(text) | SExpr::String(text) => Ok(text.clone()),
        other => Err(malformed(&format!(
            "expected name for {}, found {}",
            ctx,
            other.describe()
        ))),
    }
}

fn malformed(msg: &str) -> DefinitionError {
    DefinitionError::Malformed(msg.to_string())
}
