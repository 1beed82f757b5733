use serde::{Deserialize, Serialize};

/// Generic S-expression nodes read from workflow sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SExpr {
    /// A bare symbol.
    Symbol(String),
    /// Option marker such as `:into`.
    Marker(Marker),
    /// String literal.
    String(String),
    /// Signed integer literal.
    Integer(i64),
    /// Nested list.
    List(Vec<SExpr>),
}

impl SExpr {
    /// Head symbol of a list form, if any.
    pub fn head(&self) -> Option<&str> {
        match self {
            SExpr::List(items) => match items.first() {
                Some(SExpr::Symbol(sym)) => Some(sym),
                _ => None,
            },
            _ => None,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            SExpr::Symbol(sym) => format!("symbol `{}`", sym),
            SExpr::Marker(marker) => format!("marker `:{}`", marker.name()),
            SExpr::String(text) => format!("string \"{}\"", text),
            SExpr::Integer(num) => format!("integer {}", num),
            SExpr::List(_) => match self.head() {
                Some(head) => format!("`({} …)` form", head),
                None => "list".to_string(),
            },
        }
    }
}

/// Option markers that introduce the trailing argument of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// `:message` on `emit`
    Message,
    /// `:into` on `invoke`
    Into,
}

impl Marker {
    /// Look up a marker by its name without the colon.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "message" => Some(Marker::Message),
            "into" => Some(Marker::Into),
            _ => None,
        }
    }

    /// Name without the colon.
    pub fn name(self) -> &'static str {
        match self {
            Marker::Message => "message",
            Marker::Into => "into",
        }
    }
}

/// Parsed source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Top-level forms.
    pub forms: Vec<SExpr>,
    /// Original source text, retained for error reporting.
    pub source: String,
}
