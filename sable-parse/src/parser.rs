#![forbid(unsafe_code)]

use sable_ast::{
    span_between, AssignStmt, BinOp, BorrowMode, BorrowStmt, CallArgs, CaseArm, CaseSpec,
    CaseStmt, ConstantDecl, Decl, DestructureStmt, DiscardStmt, Expr, ExprKind, ForStmt,
    FunctionDecl, Ident, IfStmt, ImportDecl, ImportedSymbol, InstanceDecl, LetStmt, MethodDecl,
    ModuleBody, ModuleInterface, ModuleName, NamedArg, NamedTypeSpec, OpaqueTypeDecl, ParamSpec,
    PathElem, Pragma, RecordDecl, RefTypeSpec, ReturnStmt, SkipStmt, SlotBinding, SlotSpec,
    Spanned, Stmt, TypeParamSpec, TypeSpec, TypeclassDecl, UnaryOp, UnionDecl, UniverseSpec,
    WhileStmt,
};
use sable_lex::{Token, TokenKind};

use crate::error::ParseError;

/// Which kind of source file is being parsed. Interface files carry
/// signatures only; body files carry definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileMode {
    Interface,
    Body,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, idx: 0 }
    }

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.idx.min(self.tokens.len() - 1)].kind
    }

    fn peek2(&self) -> &TokenKind {
        &self.tokens[(self.idx + 1).min(self.tokens.len() - 1)].kind
    }

    fn cur_span(&self) -> sable_ast::Span {
        self.tokens[self.idx.min(self.tokens.len() - 1)].span
    }

    fn start(&self) -> usize {
        self.cur_span().offset()
    }

    fn prev_end(&self) -> usize {
        if self.idx == 0 {
            return 0;
        }
        let s = self.tokens[self.idx - 1].span;
        s.offset() + s.len()
    }

    fn advance(&mut self) -> &'a Token {
        let tok = &self.tokens[self.idx.min(self.tokens.len() - 1)];
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<&'a Token, ParseError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "expected {}, found {}",
                kind.display(),
                self.peek().display()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                let span = self.cur_span();
                self.advance();
                Ok(Spanned::new(span, name))
            }
            other => Err(self.err(format!("expected an identifier, found {}", other.display()))),
        }
    }

    fn err(&self, message: String) -> ParseError {
        ParseError {
            message,
            span: self.cur_span(),
        }
    }

    pub fn expect_eof(&mut self) -> Result<(), ParseError> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.err(format!(
                "unexpected trailing input starting with {}",
                self.peek().display()
            )))
        }
    }

    // ---- module files ----

    pub fn parse_interface(&mut self) -> Result<ModuleInterface, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwModule)?;
        let name = self.parse_module_name()?;
        self.expect(&TokenKind::KwIs)?;
        let pragmas = self.parse_pragmas()?;
        let imports = self.parse_imports()?;
        let mut decls = Vec::new();
        while !self.at(&TokenKind::KwEnd) {
            decls.push(self.parse_decl(FileMode::Interface)?);
        }
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwModule)?;
        self.expect(&TokenKind::Dot)?;
        let span = span_between(start, self.prev_end());
        self.expect(&TokenKind::Eof)?;
        Ok(ModuleInterface {
            span,
            name,
            pragmas,
            imports,
            decls,
        })
    }

    pub fn parse_body(&mut self) -> Result<ModuleBody, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwModule)?;
        self.expect(&TokenKind::KwBody)?;
        let name = self.parse_module_name()?;
        self.expect(&TokenKind::KwIs)?;
        let pragmas = self.parse_pragmas()?;
        let imports = self.parse_imports()?;
        let mut decls = Vec::new();
        while !self.at(&TokenKind::KwEnd) {
            decls.push(self.parse_decl(FileMode::Body)?);
        }
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwModule)?;
        self.expect(&TokenKind::KwBody)?;
        self.expect(&TokenKind::Dot)?;
        let span = span_between(start, self.prev_end());
        self.expect(&TokenKind::Eof)?;
        Ok(ModuleBody {
            span,
            name,
            pragmas,
            imports,
            decls,
        })
    }

    fn parse_module_name(&mut self) -> Result<Spanned<ModuleName>, ParseError> {
        let start = self.start();
        let first = self.expect_ident()?;
        let mut text = first.node;
        while self.eat(&TokenKind::Dot) {
            // `end module.` terminators never follow a module-name position,
            // so a dot here always continues the name.
            let part = self.expect_ident()?;
            text.push('.');
            text.push_str(&part.node);
        }
        let span = span_between(start, self.prev_end());
        Ok(Spanned::new(span, ModuleName::new(text)))
    }

    fn parse_pragmas(&mut self) -> Result<Vec<Pragma>, ParseError> {
        let mut out = Vec::new();
        while self.at(&TokenKind::KwPragma) {
            let start = self.start();
            self.advance();
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Semicolon)?;
            out.push(Pragma {
                span: span_between(start, self.prev_end()),
                name,
            });
        }
        Ok(out)
    }

    fn parse_imports(&mut self) -> Result<Vec<ImportDecl>, ParseError> {
        let mut out = Vec::new();
        while self.at(&TokenKind::KwImport) {
            let start = self.start();
            self.advance();
            let module = self.parse_module_name()?;
            self.expect(&TokenKind::LParen)?;
            let mut names = Vec::new();
            loop {
                let sym_start = self.start();
                let name = self.expect_ident()?;
                let rename = if self.eat(&TokenKind::KwAs) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                names.push(ImportedSymbol {
                    span: span_between(sym_start, self.prev_end()),
                    name,
                    rename,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
            self.expect(&TokenKind::Semicolon)?;
            out.push(ImportDecl {
                span: span_between(start, self.prev_end()),
                module,
                names,
            });
        }
        Ok(out)
    }

    // ---- declarations ----

    fn parse_decl(&mut self, mode: FileMode) -> Result<Decl, ParseError> {
        match self.peek() {
            TokenKind::KwConstant => self.parse_constant(mode).map(Decl::Constant),
            TokenKind::KwRecord => self.parse_record().map(Decl::Record),
            TokenKind::KwUnion => self.parse_union().map(Decl::Union),
            TokenKind::KwType => {
                if mode == FileMode::Body {
                    return Err(self.err(
                        "opaque type declarations belong in the interface file; define the type \
                         as a record or union here"
                            .to_string(),
                    ));
                }
                self.parse_opaque_type().map(Decl::OpaqueType)
            }
            TokenKind::KwFunction => self.parse_function(mode).map(Decl::Function),
            TokenKind::KwTypeclass => self.parse_typeclass().map(Decl::Typeclass),
            TokenKind::KwInstance => self.parse_instance(mode).map(Decl::Instance),
            other => Err(self.err(format!(
                "expected a declaration, found {}",
                other.display()
            ))),
        }
    }

    fn parse_constant(&mut self, mode: FileMode) -> Result<ConstantDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwConstant)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.parse_type_spec()?;
        let value = match mode {
            FileMode::Interface => None,
            FileMode::Body => {
                self.expect(&TokenKind::Assign)?;
                Some(self.parse_expr()?)
            }
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(ConstantDecl {
            span: span_between(start, self.prev_end()),
            name,
            ty,
            value,
        })
    }

    fn parse_record(&mut self) -> Result<RecordDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwRecord)?;
        let name = self.expect_ident()?;
        let typarams = self.parse_typarams()?;
        self.expect(&TokenKind::Colon)?;
        let universe = self.parse_universe()?;
        self.expect(&TokenKind::KwIs)?;
        let slots = self.parse_slots()?;
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(RecordDecl {
            span: span_between(start, self.prev_end()),
            name,
            typarams,
            universe,
            slots,
        })
    }

    fn parse_union(&mut self) -> Result<UnionDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwUnion)?;
        let name = self.expect_ident()?;
        let typarams = self.parse_typarams()?;
        self.expect(&TokenKind::Colon)?;
        let universe = self.parse_universe()?;
        self.expect(&TokenKind::KwIs)?;
        let mut cases = Vec::new();
        while self.at(&TokenKind::KwCase) {
            let case_start = self.start();
            self.advance();
            let case_name = self.expect_ident()?;
            let slots = if self.eat(&TokenKind::KwIs) {
                self.parse_slots()?
            } else {
                self.expect(&TokenKind::Semicolon)?;
                Vec::new()
            };
            cases.push(CaseSpec {
                span: span_between(case_start, self.prev_end()),
                name: case_name,
                slots,
            });
        }
        if cases.is_empty() {
            return Err(self.err("a union needs at least one case".to_string()));
        }
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(UnionDecl {
            span: span_between(start, self.prev_end()),
            name,
            typarams,
            universe,
            cases,
        })
    }

    fn parse_slots(&mut self) -> Result<Vec<SlotSpec>, ParseError> {
        let mut slots = Vec::new();
        while matches!(self.peek(), TokenKind::Ident(_)) {
            let start = self.start();
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.parse_type_spec()?;
            self.expect(&TokenKind::Semicolon)?;
            slots.push(SlotSpec {
                span: span_between(start, self.prev_end()),
                name,
                ty,
            });
        }
        Ok(slots)
    }

    fn parse_opaque_type(&mut self) -> Result<OpaqueTypeDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwType)?;
        let name = self.expect_ident()?;
        let typarams = self.parse_typarams()?;
        self.expect(&TokenKind::Colon)?;
        let universe = self.parse_universe()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(OpaqueTypeDecl {
            span: span_between(start, self.prev_end()),
            name,
            typarams,
            universe,
        })
    }

    fn parse_function(&mut self, mode: FileMode) -> Result<FunctionDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwFunction)?;
        let name = self.expect_ident()?;
        let typarams = self.parse_typarams()?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::Colon)?;
        let return_type = self.parse_type_spec()?;
        let body = match mode {
            FileMode::Interface => {
                self.expect(&TokenKind::Semicolon)?;
                None
            }
            FileMode::Body => {
                self.expect(&TokenKind::KwIs)?;
                let stmts = self.parse_stmts()?;
                self.expect(&TokenKind::KwEnd)?;
                self.expect(&TokenKind::Semicolon)?;
                Some(stmts)
            }
        };
        Ok(FunctionDecl {
            span: span_between(start, self.prev_end()),
            name,
            typarams,
            params,
            return_type,
            body,
        })
    }

    fn parse_typeclass(&mut self) -> Result<TypeclassDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwTypeclass)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        loop {
            params.push(self.parse_typaram()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::KwIs)?;
        let mut methods = Vec::new();
        while self.at(&TokenKind::KwMethod) {
            methods.push(self.parse_method(FileMode::Interface)?);
        }
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(TypeclassDecl {
            span: span_between(start, self.prev_end()),
            name,
            params,
            methods,
        })
    }

    fn parse_instance(&mut self, mode: FileMode) -> Result<InstanceDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwInstance)?;
        let typeclass = self.expect_ident()?;
        let typarams = self.parse_typarams()?;
        self.expect(&TokenKind::LParen)?;
        let argument = self.parse_type_spec()?;
        self.expect(&TokenKind::RParen)?;
        let methods = match mode {
            FileMode::Interface => {
                self.expect(&TokenKind::Semicolon)?;
                Vec::new()
            }
            FileMode::Body => {
                self.expect(&TokenKind::KwIs)?;
                let mut methods = Vec::new();
                while self.at(&TokenKind::KwMethod) {
                    methods.push(self.parse_method(FileMode::Body)?);
                }
                self.expect(&TokenKind::KwEnd)?;
                self.expect(&TokenKind::Semicolon)?;
                methods
            }
        };
        Ok(InstanceDecl {
            span: span_between(start, self.prev_end()),
            typeclass,
            typarams,
            argument,
            methods,
        })
    }

    fn parse_method(&mut self, mode: FileMode) -> Result<MethodDecl, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwMethod)?;
        let name = self.expect_ident()?;
        let params = self.parse_params()?;
        self.expect(&TokenKind::Colon)?;
        let return_type = self.parse_type_spec()?;
        let body = match mode {
            FileMode::Interface => {
                self.expect(&TokenKind::Semicolon)?;
                None
            }
            FileMode::Body => {
                self.expect(&TokenKind::KwIs)?;
                let stmts = self.parse_stmts()?;
                self.expect(&TokenKind::KwEnd)?;
                self.expect(&TokenKind::Semicolon)?;
                Some(stmts)
            }
        };
        Ok(MethodDecl {
            span: span_between(start, self.prev_end()),
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<ParamSpec>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                let start = self.start();
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Colon)?;
                let ty = self.parse_type_spec()?;
                params.push(ParamSpec {
                    span: span_between(start, self.prev_end()),
                    name,
                    ty,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_typarams(&mut self) -> Result<Vec<TypeParamSpec>, ParseError> {
        if !self.at(&TokenKind::LBracket) {
            return Ok(Vec::new());
        }
        self.advance();
        let mut out = Vec::new();
        loop {
            out.push(self.parse_typaram()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(out)
    }

    fn parse_typaram(&mut self) -> Result<TypeParamSpec, ParseError> {
        let start = self.start();
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        let universe = self.parse_universe()?;
        let mut constraints = Vec::new();
        if self.eat(&TokenKind::LParen) {
            loop {
                constraints.push(self.expect_ident()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RParen)?;
        }
        Ok(TypeParamSpec {
            span: span_between(start, self.prev_end()),
            name,
            universe,
            constraints,
        })
    }

    fn parse_universe(&mut self) -> Result<Spanned<UniverseSpec>, ParseError> {
        let span = self.cur_span();
        let name = self.expect_ident()?;
        let universe = match name.node.as_str() {
            "Free" => UniverseSpec::Free,
            "Linear" => UniverseSpec::Linear,
            "Type" => UniverseSpec::Type,
            "Region" => UniverseSpec::Region,
            other => {
                return Err(ParseError {
                    message: format!(
                        "unknown universe '{other}' (expected Free, Linear, Type, or Region)"
                    ),
                    span,
                });
            }
        };
        Ok(Spanned::new(span, universe))
    }

    // ---- types ----

    pub fn parse_type_spec(&mut self) -> Result<TypeSpec, ParseError> {
        let start = self.start();
        match self.peek() {
            TokenKind::Amp => {
                self.advance();
                self.parse_ref_tail(start).map(TypeSpec::ReadRef)
            }
            TokenKind::AmpBang => {
                self.advance();
                self.parse_ref_tail(start).map(TypeSpec::WriteRef)
            }
            TokenKind::Ident(_) => {
                let name = self.expect_ident()?;
                let mut args = Vec::new();
                if self.eat(&TokenKind::LBracket) {
                    loop {
                        args.push(self.parse_type_spec()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RBracket)?;
                }
                Ok(TypeSpec::Named(NamedTypeSpec {
                    span: span_between(start, self.prev_end()),
                    name,
                    args,
                }))
            }
            other => Err(self.err(format!("expected a type, found {}", other.display()))),
        }
    }

    fn parse_ref_tail(&mut self, start: usize) -> Result<RefTypeSpec, ParseError> {
        self.expect(&TokenKind::LBracket)?;
        let referent = self.parse_type_spec()?;
        self.expect(&TokenKind::Comma)?;
        let region = self.parse_type_spec()?;
        self.expect(&TokenKind::RBracket)?;
        Ok(RefTypeSpec {
            span: span_between(start, self.prev_end()),
            referent: Box::new(referent),
            region: Box::new(region),
        })
    }

    // ---- statements ----

    fn parse_stmts(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut out = Vec::new();
        while !matches!(
            self.peek(),
            TokenKind::KwEnd | TokenKind::KwElse | TokenKind::KwWhen | TokenKind::Eof
        ) {
            out.push(self.parse_stmt()?);
        }
        Ok(out)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            TokenKind::KwLet => self.parse_let(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwCase => self.parse_case(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwBorrow => self.parse_borrow(),
            TokenKind::KwReturn => {
                let start = self.start();
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Return(ReturnStmt {
                    span: span_between(start, self.prev_end()),
                    value,
                }))
            }
            TokenKind::KwSkip => {
                let start = self.start();
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Skip(SkipStmt {
                    span: span_between(start, self.prev_end()),
                }))
            }
            TokenKind::KwDiscard => {
                let start = self.start();
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Stmt::Discard(DiscardStmt {
                    span: span_between(start, self.prev_end()),
                    value,
                }))
            }
            _ => self.parse_assign_or_expr_stmt(),
        }
    }

    fn parse_let(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwLet)?;
        if self.eat(&TokenKind::LBrace) {
            let mut bindings = Vec::new();
            loop {
                let b_start = self.start();
                let slot = self.expect_ident()?;
                let rename = if self.eat(&TokenKind::KwAs) {
                    Some(self.expect_ident()?)
                } else {
                    None
                };
                bindings.push(SlotBinding {
                    span: span_between(b_start, self.prev_end()),
                    slot,
                    rename,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::RBrace)?;
            self.expect(&TokenKind::Assign)?;
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semicolon)?;
            return Ok(Stmt::Destructure(DestructureStmt {
                span: span_between(start, self.prev_end()),
                bindings,
                value,
            }));
        }
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.parse_type_spec()?;
        self.expect(&TokenKind::Assign)?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Let(LetStmt {
            span: span_between(start, self.prev_end()),
            name,
            ty,
            value,
        }))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwIf)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::KwThen)?;
        let then_block = self.parse_stmts()?;
        let else_block = if self.eat(&TokenKind::KwElse) {
            self.parse_stmts()?
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwIf)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::If(IfStmt {
            span: span_between(start, self.prev_end()),
            cond,
            then_block,
            else_block,
        }))
    }

    fn parse_case(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwCase)?;
        let scrutinee = self.parse_expr()?;
        self.expect(&TokenKind::KwOf)?;
        let mut arms = Vec::new();
        while self.at(&TokenKind::KwWhen) {
            let arm_start = self.start();
            self.advance();
            let case_name = self.expect_ident()?;
            let mut bindings = Vec::new();
            if self.eat(&TokenKind::LParen) {
                if !self.at(&TokenKind::RParen) {
                    loop {
                        bindings.push(self.expect_ident()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen)?;
            }
            self.expect(&TokenKind::KwDo)?;
            let body = self.parse_stmts()?;
            arms.push(CaseArm {
                span: span_between(arm_start, self.prev_end()),
                case_name,
                bindings,
                body,
            });
        }
        if arms.is_empty() {
            return Err(self.err("a case statement needs at least one 'when' arm".to_string()));
        }
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwCase)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Case(CaseStmt {
            span: span_between(start, self.prev_end()),
            scrutinee,
            arms,
        }))
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwWhile)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::KwDo)?;
        let body = self.parse_stmts()?;
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwWhile)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::While(WhileStmt {
            span: span_between(start, self.prev_end()),
            cond,
            body,
        }))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwFor)?;
        let var = self.expect_ident()?;
        self.expect(&TokenKind::KwFrom)?;
        let from = self.parse_expr()?;
        self.expect(&TokenKind::KwTo)?;
        let to = self.parse_expr()?;
        self.expect(&TokenKind::KwDo)?;
        let body = self.parse_stmts()?;
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwFor)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::For(ForStmt {
            span: span_between(start, self.prev_end()),
            var,
            from,
            to,
            body,
        }))
    }

    fn parse_borrow(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        self.expect(&TokenKind::KwBorrow)?;
        let mode = if self.eat(&TokenKind::Bang) {
            BorrowMode::Write
        } else {
            BorrowMode::Read
        };
        let original = self.expect_ident()?;
        self.expect(&TokenKind::KwAs)?;
        let rename = self.expect_ident()?;
        self.expect(&TokenKind::KwIn)?;
        let region = self.expect_ident()?;
        self.expect(&TokenKind::KwDo)?;
        let body = self.parse_stmts()?;
        self.expect(&TokenKind::KwEnd)?;
        self.expect(&TokenKind::KwBorrow)?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Borrow(BorrowStmt {
            span: span_between(start, self.prev_end()),
            mode,
            original,
            rename,
            region,
            body,
        }))
    }

    fn parse_assign_or_expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let start = self.start();
        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Assign) {
            match expr.kind {
                ExprKind::Var(_) | ExprKind::Path { .. } => {}
                _ => {
                    return Err(ParseError {
                        message: "assignment target must be a variable or a path".to_string(),
                        span: expr.span,
                    });
                }
            }
            let value = self.parse_expr()?;
            self.expect(&TokenKind::Semicolon)?;
            return Ok(Stmt::Assign(AssignStmt {
                span: span_between(start, self.prev_end()),
                target: expr,
                value,
            }));
        }
        self.expect(&TokenKind::Semicolon)?;
        Ok(Stmt::Discard(DiscardStmt {
            span: span_between(start, self.prev_end()),
            value: expr,
        }))
    }

    // ---- expressions ----

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::KwOr) {
            let right = self.parse_and()?;
            left = Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Binary {
                    op: BinOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::KwAnd) {
            let right = self.parse_not()?;
            left = Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Binary {
                    op: BinOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        if self.eat(&TokenKind::KwNot) {
            let operand = self.parse_not()?;
            return Ok(Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let left = self.parse_additive()?;
        let op = match self.peek() {
            TokenKind::Eq => Some(BinOp::Eq),
            TokenKind::Ne => Some(BinOp::Ne),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Le => Some(BinOp::Le),
            TokenKind::Gt => Some(BinOp::Gt),
            TokenKind::Ge => Some(BinOp::Ge),
            _ => None,
        };
        // Comparison does not chain: `a < b < c` is a parse error on the
        // second operator rather than a silent left fold.
        if let Some(op) = op {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            });
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let mut left = self.parse_postfix()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_postfix()?;
            left = Expr {
                span: span_between(start, self.prev_end()),
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        let head = self.parse_atom()?;
        let mut elems = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    let elem_start = self.start();
                    self.advance();
                    let name = self.expect_ident()?;
                    elems.push(PathElem::Slot {
                        span: span_between(elem_start, self.prev_end()),
                        name,
                    });
                }
                TokenKind::ThinArrow => {
                    let elem_start = self.start();
                    self.advance();
                    let name = self.expect_ident()?;
                    elems.push(PathElem::PointerSlot {
                        span: span_between(elem_start, self.prev_end()),
                        name,
                    });
                }
                TokenKind::LBracket => {
                    let elem_start = self.start();
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    elems.push(PathElem::Index {
                        span: span_between(elem_start, self.prev_end()),
                        index: Box::new(index),
                    });
                }
                _ => break,
            }
        }
        if elems.is_empty() {
            return Ok(head);
        }
        Ok(Expr {
            span: span_between(start, self.prev_end()),
            kind: ExprKind::Path {
                head: Box::new(head),
                elems,
            },
        })
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let start = self.start();
        match self.peek().clone() {
            TokenKind::KwNil => {
                self.advance();
                Ok(self.lit(start, ExprKind::NilLit))
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(self.lit(start, ExprKind::BoolLit(true)))
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(self.lit(start, ExprKind::BoolLit(false)))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(self.lit(start, ExprKind::IntLit(v)))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(self.lit(start, ExprKind::FloatLit(v)))
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_postfix()?;
                Ok(Expr {
                    span: span_between(start, self.prev_end()),
                    kind: ExprKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                })
            }
            TokenKind::Amp => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(self.lit(start, ExprKind::BorrowRead(name)))
            }
            TokenKind::AmpBang => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(self.lit(start, ExprKind::BorrowWrite(name)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(_) => {
                let name = self.expect_ident()?;
                if self.at(&TokenKind::LParen) {
                    let args = self.parse_call_args()?;
                    return Ok(Expr {
                        span: span_between(start, self.prev_end()),
                        kind: ExprKind::Call { name, args },
                    });
                }
                Ok(Expr {
                    span: span_between(start, self.prev_end()),
                    kind: ExprKind::Var(name),
                })
            }
            other => Err(self.err(format!(
                "expected an expression, found {}",
                other.display()
            ))),
        }
    }

    fn lit(&self, start: usize, kind: ExprKind) -> Expr {
        Expr {
            span: span_between(start, self.prev_end()),
            kind,
        }
    }

    fn parse_call_args(&mut self) -> Result<CallArgs, ParseError> {
        self.expect(&TokenKind::LParen)?;
        if self.eat(&TokenKind::RParen) {
            return Ok(CallArgs::Positional(Vec::new()));
        }
        // `name => value` arguments are named; the first pair decides.
        let named = matches!(self.peek(), TokenKind::Ident(_))
            && matches!(self.peek2(), TokenKind::FatArrow);
        let args = if named {
            let mut out = Vec::new();
            loop {
                let arg_start = self.start();
                let name = self.expect_ident()?;
                self.expect(&TokenKind::FatArrow)?;
                let value = self.parse_expr()?;
                out.push(NamedArg {
                    span: span_between(arg_start, self.prev_end()),
                    name,
                    value,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            CallArgs::Named(out)
        } else {
            let mut out = Vec::new();
            loop {
                out.push(self.parse_expr()?);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            CallArgs::Positional(out)
        };
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }
}
