#![forbid(unsafe_code)]

//! The target IR at the emission boundary: monomorphic, region-free,
//! borrow-free. Everything here maps one-to-one onto C constructs.

use std::collections::BTreeMap;

use sable_ast::Span;

pub fn span_at_origin() -> Span {
    sable_ast::span(0, 0)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Unit,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Record(String),
    Union(String),
    Pointer(Box<Type>),
    Array(Box<Type>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
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

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub records: Vec<RecordDef>,
    pub unions: Vec<UnionDef>,
    pub constants: Vec<ConstantDef>,
    pub functions: BTreeMap<String, Function>,
    pub entrypoint: Option<Entrypoint>,
}

#[derive(Clone, Debug)]
pub struct ConstantDef {
    pub name: String,
    pub ty: Type,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct Entrypoint {
    pub function: String,
    pub returns_exit_code: bool,
}

#[derive(Clone, Debug)]
pub struct RecordDef {
    pub name: String,
    pub slots: Vec<(String, Type)>,
}

#[derive(Clone, Debug)]
pub struct UnionDef {
    pub name: String,
    pub cases: Vec<CaseDef>,
}

#[derive(Clone, Debug)]
pub struct CaseDef {
    pub name: String,
    pub slots: Vec<(String, Type)>,
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub span: Span,
    pub params: Vec<Param>,
    pub ret: Type,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        name: String,
        ty: Type,
        value: Expr,
    },
    Assign {
        target: LValue,
        value: Expr,
    },
    If {
        cond: Expr,
        then_block: Vec<Stmt>,
        else_block: Vec<Stmt>,
    },
    Switch {
        scrutinee: Expr,
        union_name: String,
        arms: Vec<SwitchArm>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        ty: Type,
        from: Expr,
        to: Expr,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Return {
        value: Expr,
    },
    Discard {
        value: Expr,
    },
}

#[derive(Clone, Debug)]
pub struct SwitchArm {
    pub case: String,
    /// `(local name, slot name, slot type)` bound from the scrutinee.
    pub bindings: Vec<(String, String, Type)>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct LValue {
    pub base: String,
    pub elems: Vec<PathElem>,
}

#[derive(Clone, Debug)]
pub enum PathElem {
    Slot(String),
    PointerSlot(String),
    Index { index: Box<Expr>, elem: Type },
}

#[derive(Clone, Debug)]
pub enum Expr {
    Unit,
    Bool(bool),
    Int(u64),
    Float(f64),
    Var(String),
    ConstantRef(String),
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    RecordCtor {
        record: String,
        args: Vec<(String, Expr)>,
    },
    UnionCtor {
        union: String,
        case: String,
        args: Vec<(String, Expr)>,
    },
    Path {
        base: Box<Expr>,
        elems: Vec<PathElem>,
    },
    AddressOf {
        name: String,
    },
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
