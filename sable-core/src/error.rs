#![forbid(unsafe_code)]

use std::fmt;

use miette::Diagnostic;
use sable_ast::Span;
use sable_parse::ParseError;
use serde::Serialize;
use thiserror::Error;

/// A piece of an error message. `Code` fragments name program constructs
/// (identifiers, types, operators) and render quoted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Fragment {
    Text(String),
    Code(String),
}

/// An error message composed of fragments.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorText {
    fragments: Vec<Fragment>,
}

impl ErrorText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, s: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Text(s.into()));
        self
    }

    pub fn code(mut self, s: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Code(s.into()));
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}

impl From<&str> for ErrorText {
    fn from(s: &str) -> Self {
        ErrorText::new().text(s)
    }
}

impl From<String> for ErrorText {
    fn from(s: String) -> Self {
        ErrorText::new().text(s)
    }
}

impl fmt::Display for ErrorText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(s) => f.write_str(s)?,
                Fragment::Code(s) => write!(f, "'{s}'")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("declaration error: {message}")]
#[diagnostic(code(sable::decl))]
pub struct DeclarationError {
    pub message: ErrorText,
    #[label]
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("type error: {message}")]
#[diagnostic(code(sable::ty))]
pub struct TypeError {
    pub message: ErrorText,
    #[label]
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("linearity error: {message}")]
#[diagnostic(code(sable::linearity))]
pub struct LinearityError {
    pub message: ErrorText,
    #[label]
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
#[error("instance error: {message}")]
#[diagnostic(code(sable::instance))]
pub struct InstanceError {
    pub message: ErrorText,
    #[label]
    pub span: Option<Span>,
}

/// An invariant the compiler believed to hold was violated; always a bug.
#[derive(Debug, Error, Diagnostic)]
#[error("internal error: {message}")]
#[diagnostic(code(sable::internal))]
pub struct InternalError {
    pub message: ErrorText,
    #[label]
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Linearity(#[from] LinearityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Internal(#[from] InternalError),
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Parse(_) => "ParseError",
            CompileError::Declaration(_) => "DeclarationError",
            CompileError::Type(_) => "TypeError",
            CompileError::Linearity(_) => "LinearityError",
            CompileError::Instance(_) => "InstanceError",
            CompileError::Internal(_) => "InternalError",
        }
    }

    pub fn fragments(&self) -> Vec<Fragment> {
        match self {
            CompileError::Parse(e) => vec![Fragment::Text(e.message.clone())],
            CompileError::Declaration(e) => e.message.fragments().to_vec(),
            CompileError::Type(e) => e.message.fragments().to_vec(),
            CompileError::Linearity(e) => e.message.fragments().to_vec(),
            CompileError::Instance(e) => e.message.fragments().to_vec(),
            CompileError::Internal(e) => e.message.fragments().to_vec(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Parse(e) => Some(e.span),
            CompileError::Declaration(e) => e.span,
            CompileError::Type(e) => e.span,
            CompileError::Linearity(e) => e.span,
            CompileError::Instance(e) => e.span,
            CompileError::Internal(e) => e.span,
        }
    }

    /// Attach a span if the error does not already carry one. Used by the
    /// statement/expression walkers to adorn errors raised deeper down.
    pub fn adorn(mut self, span: Span) -> Self {
        match &mut self {
            CompileError::Parse(_) => {}
            CompileError::Declaration(e) => {
                e.span.get_or_insert(span);
            }
            CompileError::Type(e) => {
                e.span.get_or_insert(span);
            }
            CompileError::Linearity(e) => {
                e.span.get_or_insert(span);
            }
            CompileError::Instance(e) => {
                e.span.get_or_insert(span);
            }
            CompileError::Internal(e) => {
                e.span.get_or_insert(span);
            }
        }
        self
    }

    /// Rendered message without the kind prefix; tests match on this.
    pub fn message(&self) -> String {
        match self {
            CompileError::Parse(e) => e.message.clone(),
            CompileError::Declaration(e) => e.message.to_string(),
            CompileError::Type(e) => e.message.to_string(),
            CompileError::Linearity(e) => e.message.to_string(),
            CompileError::Instance(e) => e.message.to_string(),
            CompileError::Internal(e) => e.message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_render_with_code_quoting() {
        let msg = ErrorText::new()
            .text("value ")
            .code("r")
            .text(" used after being consumed");
        assert_eq!(msg.to_string(), "value 'r' used after being consumed");
    }

    #[test]
    fn adorn_does_not_overwrite_an_existing_span() {
        let err: CompileError = TypeError {
            message: "unknown type".into(),
            span: Some(sable_ast::span(3, 4)),
        }
        .into();
        let adorned = err.adorn(sable_ast::span(10, 2));
        assert_eq!(adorned.span(), Some(sable_ast::span(3, 4)));
    }

    #[test]
    fn adorn_fills_a_missing_span() {
        let err: CompileError = TypeError {
            message: "unknown type".into(),
            span: None,
        }
        .into();
        let adorned = err.adorn(sable_ast::span(10, 2));
        assert_eq!(adorned.span(), Some(sable_ast::span(10, 2)));
    }
}
