#![forbid(unsafe_code)]

use logos::Logos;
use miette::Diagnostic;
use sable_ast::{span_between, Span};
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(sable::lex))]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
enum RawToken {
    #[token("module")]
    KwModule,
    #[token("body")]
    KwBody,
    #[token("is")]
    KwIs,
    #[token("end")]
    KwEnd,
    #[token("pragma")]
    KwPragma,
    #[token("import")]
    KwImport,
    #[token("as")]
    KwAs,
    #[token("constant")]
    KwConstant,
    #[token("record")]
    KwRecord,
    #[token("union")]
    KwUnion,
    #[token("case")]
    KwCase,
    #[token("of")]
    KwOf,
    #[token("when")]
    KwWhen,
    #[token("do")]
    KwDo,
    #[token("type")]
    KwType,
    #[token("function")]
    KwFunction,
    #[token("typeclass")]
    KwTypeclass,
    #[token("instance")]
    KwInstance,
    #[token("method")]
    KwMethod,
    #[token("let")]
    KwLet,
    #[token("if")]
    KwIf,
    #[token("then")]
    KwThen,
    #[token("else")]
    KwElse,
    #[token("while")]
    KwWhile,
    #[token("for")]
    KwFor,
    #[token("from")]
    KwFrom,
    #[token("to")]
    KwTo,
    #[token("borrow")]
    KwBorrow,
    #[token("in")]
    KwIn,
    #[token("return")]
    KwReturn,
    #[token("skip")]
    KwSkip,
    #[token("discard")]
    KwDiscard,
    #[token("not")]
    KwNot,
    #[token("and")]
    KwAnd,
    #[token("or")]
    KwOr,
    #[token("true")]
    KwTrue,
    #[token("false")]
    KwFalse,
    #[token("nil")]
    KwNil,

    #[token(":=")]
    Assign,
    #[token("=>")]
    FatArrow,
    #[token("->")]
    ThinArrow,
    #[token("&!")]
    AmpBang,
    #[token("&")]
    Amp,
    #[token("!")]
    Bang,
    #[token("=")]
    Eq,
    #[token("/=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*", |lex| parse_float(lex.slice()))]
    Float(Option<f64>),

    #[regex(r"0x[0-9a-fA-F_]+", |lex| parse_int_prefixed(lex.slice(), 16))]
    #[regex(r"0b[01_]+", |lex| parse_int_prefixed(lex.slice(), 2))]
    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<u64>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<u64> {
    strip_underscores(s)?.parse::<u64>().ok()
}

fn parse_int_prefixed(s: &str, radix: u32) -> Option<u64> {
    let digits = strip_underscores(s.get(2..)?)?;
    u64::from_str_radix(&digits, radix).ok()
}

fn parse_float(s: &str) -> Option<f64> {
    strip_underscores(s)?.parse::<f64>().ok()
}

fn strip_underscores(s: &str) -> Option<String> {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return None;
    }
    Some(s.replace('_', ""))
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut raw = RawToken::lexer(self.src);

        while let Some(item) = raw.next() {
            let range = raw.span();
            let span = span_between(range.start, range.end);
            let kind = match item {
                Err(()) => {
                    return Err(LexError {
                        message: format!("unrecognized input '{}'", raw.slice()),
                        span,
                    });
                }
                Ok(tok) => match tok {
                    RawToken::KwModule => TokenKind::KwModule,
                    RawToken::KwBody => TokenKind::KwBody,
                    RawToken::KwIs => TokenKind::KwIs,
                    RawToken::KwEnd => TokenKind::KwEnd,
                    RawToken::KwPragma => TokenKind::KwPragma,
                    RawToken::KwImport => TokenKind::KwImport,
                    RawToken::KwAs => TokenKind::KwAs,
                    RawToken::KwConstant => TokenKind::KwConstant,
                    RawToken::KwRecord => TokenKind::KwRecord,
                    RawToken::KwUnion => TokenKind::KwUnion,
                    RawToken::KwCase => TokenKind::KwCase,
                    RawToken::KwOf => TokenKind::KwOf,
                    RawToken::KwWhen => TokenKind::KwWhen,
                    RawToken::KwDo => TokenKind::KwDo,
                    RawToken::KwType => TokenKind::KwType,
                    RawToken::KwFunction => TokenKind::KwFunction,
                    RawToken::KwTypeclass => TokenKind::KwTypeclass,
                    RawToken::KwInstance => TokenKind::KwInstance,
                    RawToken::KwMethod => TokenKind::KwMethod,
                    RawToken::KwLet => TokenKind::KwLet,
                    RawToken::KwIf => TokenKind::KwIf,
                    RawToken::KwThen => TokenKind::KwThen,
                    RawToken::KwElse => TokenKind::KwElse,
                    RawToken::KwWhile => TokenKind::KwWhile,
                    RawToken::KwFor => TokenKind::KwFor,
                    RawToken::KwFrom => TokenKind::KwFrom,
                    RawToken::KwTo => TokenKind::KwTo,
                    RawToken::KwBorrow => TokenKind::KwBorrow,
                    RawToken::KwIn => TokenKind::KwIn,
                    RawToken::KwReturn => TokenKind::KwReturn,
                    RawToken::KwSkip => TokenKind::KwSkip,
                    RawToken::KwDiscard => TokenKind::KwDiscard,
                    RawToken::KwNot => TokenKind::KwNot,
                    RawToken::KwAnd => TokenKind::KwAnd,
                    RawToken::KwOr => TokenKind::KwOr,
                    RawToken::KwTrue => TokenKind::KwTrue,
                    RawToken::KwFalse => TokenKind::KwFalse,
                    RawToken::KwNil => TokenKind::KwNil,
                    RawToken::Assign => TokenKind::Assign,
                    RawToken::FatArrow => TokenKind::FatArrow,
                    RawToken::ThinArrow => TokenKind::ThinArrow,
                    RawToken::AmpBang => TokenKind::AmpBang,
                    RawToken::Amp => TokenKind::Amp,
                    RawToken::Bang => TokenKind::Bang,
                    RawToken::Eq => TokenKind::Eq,
                    RawToken::Ne => TokenKind::Ne,
                    RawToken::Le => TokenKind::Le,
                    RawToken::Ge => TokenKind::Ge,
                    RawToken::Lt => TokenKind::Lt,
                    RawToken::Gt => TokenKind::Gt,
                    RawToken::Plus => TokenKind::Plus,
                    RawToken::Minus => TokenKind::Minus,
                    RawToken::Star => TokenKind::Star,
                    RawToken::Slash => TokenKind::Slash,
                    RawToken::Colon => TokenKind::Colon,
                    RawToken::Semicolon => TokenKind::Semicolon,
                    RawToken::Comma => TokenKind::Comma,
                    RawToken::Dot => TokenKind::Dot,
                    RawToken::LParen => TokenKind::LParen,
                    RawToken::RParen => TokenKind::RParen,
                    RawToken::LBracket => TokenKind::LBracket,
                    RawToken::RBracket => TokenKind::RBracket,
                    RawToken::LBrace => TokenKind::LBrace,
                    RawToken::RBrace => TokenKind::RBrace,
                    RawToken::Float(Some(v)) => TokenKind::Float(v),
                    RawToken::Float(None) => {
                        return Err(LexError {
                            message: format!("malformed float literal '{}'", raw.slice()),
                            span,
                        });
                    }
                    RawToken::Int(Some(v)) => TokenKind::Int(v),
                    RawToken::Int(None) => {
                        return Err(LexError {
                            message: format!("malformed integer literal '{}'", raw.slice()),
                            span,
                        });
                    }
                    RawToken::Ident(name) => TokenKind::Ident(name),
                },
            };
            tokens.push(Token { kind, span });
        }

        let end = self.src.len();
        tokens.push(Token {
            kind: TokenKind::Eof,
            span: span_between(end, end),
        });
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).lex().expect("lex").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_and_punctuation() {
        let ks = kinds("module body Foo is end module body.");
        assert_eq!(
            ks,
            vec![
                TokenKind::KwModule,
                TokenKind::KwBody,
                TokenKind::Ident("Foo".to_string()),
                TokenKind::KwIs,
                TokenKind::KwEnd,
                TokenKind::KwModule,
                TokenKind::KwBody,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn write_borrow_token_wins_over_amp() {
        let ks = kinds("&!x & y");
        assert_eq!(
            ks,
            vec![
                TokenKind::AmpBang,
                TokenKind::Ident("x".to_string()),
                TokenKind::Amp,
                TokenKind::Ident("y".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let ks = kinds("skip; -- trailing note\nskip;");
        assert_eq!(
            ks,
            vec![
                TokenKind::KwSkip,
                TokenKind::Semicolon,
                TokenKind::KwSkip,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        let ks = kinds("42 1_000 0x2A 3.5");
        assert_eq!(
            ks,
            vec![
                TokenKind::Int(42),
                TokenKind::Int(1000),
                TokenKind::Int(42),
                TokenKind::Float(3.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn assignment_and_equality_are_distinct() {
        let ks = kinds("x := y = z /= w");
        assert_eq!(
            ks,
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Assign,
                TokenKind::Ident("y".to_string()),
                TokenKind::Eq,
                TokenKind::Ident("z".to_string()),
                TokenKind::Ne,
                TokenKind::Ident("w".to_string()),
                TokenKind::Eof,
            ]
        );
    }
}
