#![forbid(unsafe_code)]

use std::fmt;

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// A dotted module name, e.g. `Standard.Buffer`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(pub String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An interface file: `module M is ... end module.`
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleInterface {
    pub span: Span,
    pub name: Spanned<ModuleName>,
    pub pragmas: Vec<Pragma>,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
}

/// A body file: `module body M is ... end module body.`
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleBody {
    pub span: Span,
    pub name: Spanned<ModuleName>,
    pub pragmas: Vec<Pragma>,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pragma {
    pub span: Span,
    pub name: Ident,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportDecl {
    pub span: Span,
    pub module: Spanned<ModuleName>,
    pub names: Vec<ImportedSymbol>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportedSymbol {
    pub span: Span,
    pub name: Ident,
    pub rename: Option<Ident>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    Constant(ConstantDecl),
    Record(RecordDecl),
    Union(UnionDecl),
    /// `type T : Linear;` — interface-only opaque type declaration.
    OpaqueType(OpaqueTypeDecl),
    Function(FunctionDecl),
    Typeclass(TypeclassDecl),
    Instance(InstanceDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Constant(d) => &d.name.node,
            Decl::Record(d) => &d.name.node,
            Decl::Union(d) => &d.name.node,
            Decl::OpaqueType(d) => &d.name.node,
            Decl::Function(d) => &d.name.node,
            Decl::Typeclass(d) => &d.name.node,
            Decl::Instance(d) => &d.typeclass.node,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Constant(d) => d.span,
            Decl::Record(d) => d.span,
            Decl::Union(d) => d.span,
            Decl::OpaqueType(d) => d.span,
            Decl::Function(d) => d.span,
            Decl::Typeclass(d) => d.span,
            Decl::Instance(d) => d.span,
        }
    }

    /// Kind label used in declaration-mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Decl::Constant(_) => "constant",
            Decl::Record(_) => "record",
            Decl::Union(_) => "union",
            Decl::OpaqueType(_) => "type",
            Decl::Function(_) => "function",
            Decl::Typeclass(_) => "typeclass",
            Decl::Instance(_) => "instance",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstantDecl {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeSpec,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordDecl {
    pub span: Span,
    pub name: Ident,
    pub typarams: Vec<TypeParamSpec>,
    pub universe: Spanned<UniverseSpec>,
    pub slots: Vec<SlotSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotSpec {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionDecl {
    pub span: Span,
    pub name: Ident,
    pub typarams: Vec<TypeParamSpec>,
    pub universe: Spanned<UniverseSpec>,
    pub cases: Vec<CaseSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseSpec {
    pub span: Span,
    pub name: Ident,
    pub slots: Vec<SlotSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpaqueTypeDecl {
    pub span: Span,
    pub name: Ident,
    pub typarams: Vec<TypeParamSpec>,
    pub universe: Spanned<UniverseSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub span: Span,
    pub name: Ident,
    pub typarams: Vec<TypeParamSpec>,
    pub params: Vec<ParamSpec>,
    pub return_type: TypeSpec,
    /// `None` in interface files; `Some` in body files.
    pub body: Option<Vec<Stmt>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeSpec,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeParamSpec {
    pub span: Span,
    pub name: Ident,
    pub universe: Spanned<UniverseSpec>,
    /// Typeclass constraints, e.g. `[T: Free(Printable)]`.
    pub constraints: Vec<Ident>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniverseSpec {
    Free,
    Linear,
    Type,
    Region,
}

impl UniverseSpec {
    pub fn display(&self) -> &'static str {
        match self {
            UniverseSpec::Free => "Free",
            UniverseSpec::Linear => "Linear",
            UniverseSpec::Type => "Type",
            UniverseSpec::Region => "Region",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeclassDecl {
    pub span: Span,
    pub name: Ident,
    /// More than one parameter is rejected at combining time.
    pub params: Vec<TypeParamSpec>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDecl {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<ParamSpec>,
    pub return_type: TypeSpec,
    pub body: Option<Vec<Stmt>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceDecl {
    pub span: Span,
    pub typeclass: Ident,
    pub typarams: Vec<TypeParamSpec>,
    pub argument: TypeSpec,
    /// Empty in interface files (declaration only).
    pub methods: Vec<MethodDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeSpec {
    Named(NamedTypeSpec),
    /// `&[T, R]`
    ReadRef(RefTypeSpec),
    /// `&![T, R]`
    WriteRef(RefTypeSpec),
}

impl TypeSpec {
    pub fn span(&self) -> Span {
        match self {
            TypeSpec::Named(t) => t.span,
            TypeSpec::ReadRef(t) | TypeSpec::WriteRef(t) => t.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamedTypeSpec {
    pub span: Span,
    pub name: Ident,
    pub args: Vec<TypeSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefTypeSpec {
    pub span: Span,
    pub referent: Box<TypeSpec>,
    pub region: Box<TypeSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Let(LetStmt),
    Destructure(DestructureStmt),
    Assign(AssignStmt),
    If(IfStmt),
    Case(CaseStmt),
    While(WhileStmt),
    For(ForStmt),
    Borrow(BorrowStmt),
    Return(ReturnStmt),
    Skip(SkipStmt),
    Discard(DiscardStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let(s) => s.span,
            Stmt::Destructure(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::Case(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Borrow(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Skip(s) => s.span,
            Stmt::Discard(s) => s.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LetStmt {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeSpec,
    pub value: Expr,
}

/// `let { x, y as z } := e;`
#[derive(Clone, Debug, PartialEq)]
pub struct DestructureStmt {
    pub span: Span,
    pub bindings: Vec<SlotBinding>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotBinding {
    pub span: Span,
    pub slot: Ident,
    pub rename: Option<Ident>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub target: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub span: Span,
    pub cond: Expr,
    pub then_block: Vec<Stmt>,
    pub else_block: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseStmt {
    pub span: Span,
    pub scrutinee: Expr,
    pub arms: Vec<CaseArm>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseArm {
    pub span: Span,
    pub case_name: Ident,
    pub bindings: Vec<Ident>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub span: Span,
    pub var: Ident,
    pub from: Expr,
    pub to: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorrowMode {
    Read,
    Write,
}

/// `borrow x as xr in r do ... end;` (read) or `borrow! ...` (write).
#[derive(Clone, Debug, PartialEq)]
pub struct BorrowStmt {
    pub span: Span,
    pub mode: BorrowMode,
    pub original: Ident,
    pub rename: Ident,
    pub region: Ident,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SkipStmt {
    pub span: Span,
}

/// Both `discard e;` and a bare `e;` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscardStmt {
    pub span: Span,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    NilLit,
    BoolLit(bool),
    IntLit(u64),
    FloatLit(f64),
    Var(Ident),
    Call {
        name: Ident,
        args: CallArgs,
    },
    Path {
        head: Box<Expr>,
        elems: Vec<PathElem>,
    },
    /// `&x` — anonymous read borrow in argument position.
    BorrowRead(Ident),
    /// `&!x` — anonymous write borrow in argument position.
    BorrowWrite(Ident),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallArgs {
    Positional(Vec<Expr>),
    /// `R(x => 32)`
    Named(Vec<NamedArg>),
}

impl CallArgs {
    pub fn len(&self) -> usize {
        match self {
            CallArgs::Positional(args) => args.len(),
            CallArgs::Named(args) => args.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NamedArg {
    pub span: Span,
    pub name: Ident,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathElem {
    /// `head.slot`
    Slot { span: Span, name: Ident },
    /// `head->slot` (raw pointer access, unsafe modules only)
    PointerSlot { span: Span, name: Ident },
    /// `head[idx]`
    Index { span: Span, index: Box<Expr> },
}

impl PathElem {
    pub fn span(&self) -> Span {
        match self {
            PathElem::Slot { span, .. } => *span,
            PathElem::PointerSlot { span, .. } => *span,
            PathElem::Index { span, .. } => *span,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn display(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "=",
            BinOp::Ne => "/=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}
