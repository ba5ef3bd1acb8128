#![forbid(unsafe_code)]

use miette::Diagnostic;
use sable_ast::Span;
use sable_lex::LexError;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(sable::parse))]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            span: e.span,
        }
    }
}
