//! Reader for workflow source text
//!
//! Source is split into tokens and assembled into [`SExpr`] trees. Only the
//! atoms the workflow format has a use for are accepted: integers, strings,
//! symbols and the `:message` / `:into` markers. Anything else is a syntax error
//! carrying the byte offset where it starts.

use std::iter::Peekable;
use std::str::CharIndices;

use super::ast::{Marker, SExpr, SourceFile};
use super::{DefinitionError, Result};

/// Read workflow source text into raw S-expressions.
pub fn parse_source(source: &str) -> Result<SourceFile> {
    let mut reader = Reader::new(source);
    let mut forms = Vec::new();
    while let Some(token) = reader.next_token()? {
        forms.push(reader.form(token)?);
    }

    Ok(SourceFile {
        forms,
        source: source.to_string(),
    })
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Str(String),
    Atom(&'a str),
}

struct Reader<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    /// Next token and the byte offset it starts at.
    fn next_token(&mut self) -> Result<Option<(usize, Token<'a>)>> {
        self.skip_trivia();
        let Some(&(at, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let token = match ch {
            '(' => {
                self.chars.next();
                Token::Open
            }
            ')' => {
                self.chars.next();
                Token::Close
            }
            '"' => {
                self.chars.next();
                Token::Str(self.string_body(at)?)
            }
            _ => Token::Atom(self.atom_text(at)),
        };
        Ok(Some((at, token)))
    }

    fn skip_trivia(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch == ';' {
                for (_, skipped) in self.chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }
    }

    fn atom_text(&mut self, start: usize) -> &'a str {
        let src = self.src;
        let mut end = start;
        while let Some(&(at, ch)) = self.chars.peek() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';') {
                break;
            }
            end = at + ch.len_utf8();
            self.chars.next();
        }
        &src[start..end]
    }

    fn string_body(&mut self, open: usize) -> Result<String> {
        let mut text = String::new();
        while let Some((at, ch)) = self.chars.next() {
            match ch {
                '"' => return Ok(text),
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        break;
                    };
                    text.push(match escaped {
                        '"' => '"',
                        '\\' => '\\',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => {
                            return Err(syntax(&format!("unknown escape `\\{}`", other), at));
                        }
                    });
                }
                other => text.push(other),
            }
        }
        Err(syntax("unterminated string literal", open))
    }

    fn form(&mut self, (at, token): (usize, Token<'a>)) -> Result<SExpr> {
        match token {
            Token::Open => {
                let mut items = Vec::new();
                loop {
                    match self.next_token()? {
                        None => return Err(syntax("unterminated list", at)),
                        Some((_, Token::Close)) => return Ok(SExpr::List(items)),
                        Some(next) => items.push(self.form(next)?),
                    }
                }
            }
            Token::Close => Err(syntax("unbalanced `)`", at)),
            Token::Str(text) => Ok(SExpr::String(text)),
            Token::Atom(text) => atom(text, at),
        }
    }
}

fn atom(text: &str, at: usize) -> Result<SExpr> {
    if let Some(name) = text.strip_prefix(':') {
        return Marker::from_name(name)
            .map(SExpr::Marker)
            .ok_or_else(|| syntax(&format!("unknown marker `{}`", text), at));
    }

    let unsigned = text.strip_prefix(&['-', '+'][..]).unwrap_or(text);
    if unsigned.starts_with(|ch: char| ch.is_ascii_digit()) {
        if unsigned.contains('.') {
            return Err(syntax(
                &format!("`{}` is not an integer; only integer literals are supported", text),
                at,
            ));
        }
        return text
            .parse::<i64>()
            .map(SExpr::Integer)
            .map_err(|_| syntax(&format!("invalid integer literal `{}`", text), at));
    }

    Ok(SExpr::Symbol(text.to_string()))
}

fn syntax(message: &str, at: usize) -> DefinitionError {
    DefinitionError::Syntax(format!("{} at byte {}", message, at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_items(source: &str) -> Vec<SExpr> {
        match parse_source(source).unwrap().forms.into_iter().next() {
            Some(SExpr::List(items)) => items,
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[test]
    fn parses_nested_forms() {
        let file = parse_source("(workflow demo (sequence (emit 1)))").unwrap();
        assert_eq!(file.forms.len(), 1);
        assert_eq!(file.forms[0].head(), Some("workflow"));
    }

    #[test]
    fn reads_workflow_atoms() {
        let items = list_items("(invoke \"te\\\"xt\" -42 + :into x) ; trailing comment");
        assert_eq!(
            items,
            vec![
                SExpr::Symbol("invoke".into()),
                SExpr::String("te\"xt".into()),
                SExpr::Integer(-42),
                SExpr::Symbol("+".into()),
                SExpr::Marker(Marker::Into),
                SExpr::Symbol("x".into()),
            ]
        );
        assert_eq!(list_items("(emit 1 :message m)")[2], SExpr::Marker(Marker::Message));
    }

    #[test]
    fn keeps_multibyte_text() {
        let items = list_items("(emit \"10 → 11\" café)");
        assert_eq!(items[1], SExpr::String("10 → 11".into()));
        assert_eq!(items[2], SExpr::Symbol("café".into()));
    }

    #[test]
    fn rejects_atoms_outside_the_format() {
        let err = parse_source("(emit 1.5)").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("byte 6")));

        let err = parse_source("(invoke f :onto x)").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("unknown marker `:onto`")));

        let err = parse_source("(emit 99999999999999999999)").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("invalid integer")));
    }

    #[test]
    fn reports_offsets_for_syntax_errors() {
        let err = parse_source("(sequence (emit 1)").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("unterminated list at byte 0")));

        let err = parse_source(")").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("byte 0")));

        let err = parse_source("(emit \"open)").unwrap_err();
        assert!(matches!(err, DefinitionError::Syntax(ref msg) if msg.contains("unterminated string literal at byte 6")));
    }
}
