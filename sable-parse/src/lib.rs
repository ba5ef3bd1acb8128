#![forbid(unsafe_code)]

mod error;
mod parser;

use sable_lex::Lexer;

pub use error::ParseError;
pub use parser::Parser;

pub fn parse_interface(src: &str) -> Result<sable_ast::ModuleInterface, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    Parser::new(&tokens).parse_interface()
}

pub fn parse_module_body(src: &str) -> Result<sable_ast::ModuleBody, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    Parser::new(&tokens).parse_body()
}

pub fn parse_expr(src: &str) -> Result<sable_ast::Expr, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

pub fn parse_type_spec(src: &str) -> Result<sable_ast::TypeSpec, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    let spec = parser.parse_type_spec()?;
    parser.expect_eof()?;
    Ok(spec)
}
