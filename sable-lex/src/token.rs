#![forbid(unsafe_code)]

use sable_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwModule,
    KwBody,
    KwIs,
    KwEnd,
    KwPragma,
    KwImport,
    KwAs,
    KwConstant,
    KwRecord,
    KwUnion,
    KwCase,
    KwOf,
    KwWhen,
    KwDo,
    KwType,
    KwFunction,
    KwTypeclass,
    KwInstance,
    KwMethod,
    KwLet,
    KwIf,
    KwThen,
    KwElse,
    KwWhile,
    KwFor,
    KwFrom,
    KwTo,
    KwBorrow,
    KwIn,
    KwReturn,
    KwSkip,
    KwDiscard,
    KwNot,
    KwAnd,
    KwOr,
    KwTrue,
    KwFalse,
    KwNil,

    // Operators / punctuation
    Assign,    // :=
    FatArrow,  // =>
    ThinArrow, // ->
    AmpBang,   // &!
    Amp,       // &
    Bang,      // !
    Eq,        // =
    Ne,        // /=
    Le,        // <=
    Ge,        // >=
    Lt,        // <
    Gt,        // >
    Plus,
    Minus,
    Star,
    Slash,
    Colon,
    Semicolon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Literals / identifiers
    Int(u64),
    Float(f64),
    Ident(String),

    Eof,
}

impl TokenKind {
    /// Short human label used in parse errors.
    pub fn display(&self) -> String {
        match self {
            TokenKind::KwModule => "'module'".to_string(),
            TokenKind::KwBody => "'body'".to_string(),
            TokenKind::KwIs => "'is'".to_string(),
            TokenKind::KwEnd => "'end'".to_string(),
            TokenKind::KwPragma => "'pragma'".to_string(),
            TokenKind::KwImport => "'import'".to_string(),
            TokenKind::KwAs => "'as'".to_string(),
            TokenKind::KwConstant => "'constant'".to_string(),
            TokenKind::KwRecord => "'record'".to_string(),
            TokenKind::KwUnion => "'union'".to_string(),
            TokenKind::KwCase => "'case'".to_string(),
            TokenKind::KwOf => "'of'".to_string(),
            TokenKind::KwWhen => "'when'".to_string(),
            TokenKind::KwDo => "'do'".to_string(),
            TokenKind::KwType => "'type'".to_string(),
            TokenKind::KwFunction => "'function'".to_string(),
            TokenKind::KwTypeclass => "'typeclass'".to_string(),
            TokenKind::KwInstance => "'instance'".to_string(),
            TokenKind::KwMethod => "'method'".to_string(),
            TokenKind::KwLet => "'let'".to_string(),
            TokenKind::KwIf => "'if'".to_string(),
            TokenKind::KwThen => "'then'".to_string(),
            TokenKind::KwElse => "'else'".to_string(),
            TokenKind::KwWhile => "'while'".to_string(),
            TokenKind::KwFor => "'for'".to_string(),
            TokenKind::KwFrom => "'from'".to_string(),
            TokenKind::KwTo => "'to'".to_string(),
            TokenKind::KwBorrow => "'borrow'".to_string(),
            TokenKind::KwIn => "'in'".to_string(),
            TokenKind::KwReturn => "'return'".to_string(),
            TokenKind::KwSkip => "'skip'".to_string(),
            TokenKind::KwDiscard => "'discard'".to_string(),
            TokenKind::KwNot => "'not'".to_string(),
            TokenKind::KwAnd => "'and'".to_string(),
            TokenKind::KwOr => "'or'".to_string(),
            TokenKind::KwTrue => "'true'".to_string(),
            TokenKind::KwFalse => "'false'".to_string(),
            TokenKind::KwNil => "'nil'".to_string(),
            TokenKind::Assign => "':='".to_string(),
            TokenKind::FatArrow => "'=>'".to_string(),
            TokenKind::ThinArrow => "'->'".to_string(),
            TokenKind::AmpBang => "'&!'".to_string(),
            TokenKind::Amp => "'&'".to_string(),
            TokenKind::Bang => "'!'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::Ne => "'/='".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Semicolon => "';'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Int(v) => format!("integer literal {v}"),
            TokenKind::Float(v) => format!("float literal {v}"),
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}
