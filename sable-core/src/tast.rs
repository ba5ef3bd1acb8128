#![forbid(unsafe_code)]

use sable_ast::{BinOp, BorrowMode, ModuleName, Span, UnaryOp};

use crate::env::{DeclId, InstanceId, MonomorphId};
use crate::types::{QualName, RegionId, Ty, TypeParams};

/// Identifies one binding within a function. Minted by the typing pass so
/// the linearity pass can compare consumption states O(1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub struct BindingInfo {
    pub name: String,
    pub ty: Ty,
    pub span: Span,
}

/// Arena of bindings for one function body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindingTable {
    infos: Vec<BindingInfo>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, info: BindingInfo) -> BindingId {
        let id = BindingId(self.infos.len() as u32);
        self.infos.push(info);
        id
    }

    pub fn get(&self, id: BindingId) -> &BindingInfo {
        &self.infos[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (BindingId, &BindingInfo)> {
        self.infos
            .iter()
            .enumerate()
            .map(|(i, info)| (BindingId(i as u32), info))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

/// Ordered typaram-to-type bindings produced by call unification.
pub type Substitution = Vec<(String, Ty)>;

#[derive(Clone, Debug, PartialEq)]
pub struct TExpr {
    pub span: Span,
    pub ty: Ty,
    pub kind: TExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TExprKind {
    NilConstant,
    BoolConstant(bool),
    IntConstant(u64),
    FloatConstant(f64),
    Variable {
        binding: BindingId,
        name: String,
    },
    ConstantRef {
        name: QualName,
    },
    RecordCtor {
        decl: QualName,
        args: Vec<(String, TExpr)>,
        substitution: Substitution,
    },
    UnionCtor {
        decl: QualName,
        case: String,
        args: Vec<(String, TExpr)>,
        substitution: Substitution,
    },
    Call {
        callee: QualName,
        args: Vec<TExpr>,
        substitution: Substitution,
    },
    MethodCall {
        typeclass: QualName,
        method: String,
        /// The type the instance was resolved against.
        dispatch: Ty,
        /// None while the dispatch type is still a type variable inside a
        /// generic body; monomorphization resolves it after substitution.
        instance: Option<InstanceId>,
        args: Vec<TExpr>,
        substitution: Substitution,
    },
    /// A generic call rewritten to its instantiation id. Only present after
    /// monomorphization.
    GenericCall {
        id: MonomorphId,
        callee: QualName,
        args: Vec<TExpr>,
    },
    /// Anonymous borrow in argument position.
    Borrow {
        binding: BindingId,
        name: String,
        mode: BorrowMode,
        region: RegionId,
    },
    Path {
        head: Box<TExpr>,
        elems: Vec<TPathElem>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TExpr>,
    },
    Binary {
        op: BinOp,
        left: Box<TExpr>,
        right: Box<TExpr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TPathElem {
    pub ty: Ty,
    pub kind: TPathElemKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TPathElemKind {
    Slot(String),
    PointerSlot(String),
    Index(Box<TExpr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TStmt {
    Let {
        span: Span,
        binding: BindingId,
        name: String,
        ty: Ty,
        value: TExpr,
    },
    Destructure {
        span: Span,
        value: TExpr,
        bindings: Vec<TSlotBinding>,
    },
    Assign {
        span: Span,
        target: TExpr,
        value: TExpr,
    },
    If {
        span: Span,
        cond: TExpr,
        then_block: Vec<TStmt>,
        else_block: Vec<TStmt>,
    },
    Case {
        span: Span,
        scrutinee: TExpr,
        arms: Vec<TCaseArm>,
    },
    While {
        span: Span,
        cond: TExpr,
        body: Vec<TStmt>,
    },
    For {
        span: Span,
        binding: BindingId,
        name: String,
        from: TExpr,
        to: TExpr,
        body: Vec<TStmt>,
    },
    Borrow {
        span: Span,
        original: BindingId,
        ref_binding: BindingId,
        region: RegionId,
        mode: BorrowMode,
        body: Vec<TStmt>,
    },
    Return {
        span: Span,
        value: TExpr,
    },
    Skip {
        span: Span,
    },
    Discard {
        span: Span,
        value: TExpr,
    },
}

impl TStmt {
    pub fn span(&self) -> Span {
        match self {
            TStmt::Let { span, .. }
            | TStmt::Destructure { span, .. }
            | TStmt::Assign { span, .. }
            | TStmt::If { span, .. }
            | TStmt::Case { span, .. }
            | TStmt::While { span, .. }
            | TStmt::For { span, .. }
            | TStmt::Borrow { span, .. }
            | TStmt::Return { span, .. }
            | TStmt::Skip { span }
            | TStmt::Discard { span, .. } => *span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TSlotBinding {
    pub binding: BindingId,
    pub slot: String,
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TCaseArm {
    pub span: Span,
    pub case_name: String,
    pub bindings: Vec<TSlotBinding>,
    pub body: Vec<TStmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TParam {
    pub binding: BindingId,
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TFunction {
    pub decl: DeclId,
    pub name: QualName,
    pub typarams: TypeParams,
    pub params: Vec<TParam>,
    pub ret: Ty,
    pub body: Vec<TStmt>,
    pub bindings: BindingTable,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TConstant {
    pub decl: DeclId,
    pub name: QualName,
    pub ty: Ty,
    pub value: TExpr,
}

/// Typed bodies of one instance's methods.
#[derive(Clone, Debug, PartialEq)]
pub struct TInstanceMethods {
    pub instance: InstanceId,
    pub methods: Vec<TFunction>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypedModule {
    pub name: ModuleName,
    pub constants: Vec<TConstant>,
    pub functions: Vec<TFunction>,
    pub instances: Vec<TInstanceMethods>,
}
