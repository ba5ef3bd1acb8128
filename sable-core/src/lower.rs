#![forbid(unsafe_code)]

use sable_ast::{BinOp, UnaryOp};
use sable_hir as hir;

use crate::env::{DeclKind, Environment, MonomorphId};
use crate::error::{CompileError, ErrorText, InternalError};
use crate::mono::{MonoFunction, MonoProgram, MonoType, MonoTypeDef};
use crate::tast::{BindingTable, TExpr, TExprKind, TPathElemKind, TStmt};
use crate::types::{strip_type_args, IntWidth, QualName, Signedness, Ty};

/// Stage H: lower the monomorphic AST to the target IR consumed by the C
/// backend. Borrows become address-of, destructures become slot reads.
pub fn lower_program(
    env: &Environment,
    mono: &MonoProgram,
    entry: Option<(QualName, bool)>,
) -> Result<hir::Program, CompileError> {
    let mut program = hir::Program::default();

    for ty in &mono.types {
        lower_type_def(env, ty, &mut program)?;
    }
    for c in &mono.constants {
        program.constants.push(hir::ConstantDef {
            name: mangle(&c.name, None),
            ty: lower_ty(env, &c.ty)?,
            value: {
                let empty = BindingTable::new();
                let mut l = Lowerer {
                    env,
                    bindings: &empty,
                    tmp: 0,
                };
                l.lower_expr(&c.value)?
            },
        });
    }
    for f in &mono.functions {
        let lowered = lower_function(env, f)?;
        program.functions.insert(lowered.name.clone(), lowered);
    }
    program.entrypoint = entry.map(|(name, returns_exit_code)| hir::Entrypoint {
        function: mangle(&name, None),
        returns_exit_code,
    });
    Ok(program)
}

fn internal(message: ErrorText) -> CompileError {
    InternalError {
        message,
        span: None,
    }
    .into()
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub fn mangle(name: &QualName, id: Option<MonomorphId>) -> String {
    let base = format!("{}__{}", sanitize(name.module.as_str()), sanitize(&name.name));
    match id {
        Some(i) => format!("{base}__m{}", i.0),
        None => base,
    }
}

fn lower_type_def(
    env: &Environment,
    ty: &MonoType,
    program: &mut hir::Program,
) -> Result<(), CompileError> {
    let name = mangle(&ty.name, ty.id);
    match &ty.def {
        MonoTypeDef::Record(slots) => {
            let mut out = Vec::new();
            for s in slots {
                out.push((s.name.clone(), lower_ty(env, &s.ty)?));
            }
            program.records.push(hir::RecordDef { name, slots: out });
        }
        MonoTypeDef::Union(cases) => {
            let mut out = Vec::new();
            for c in cases {
                let mut slots = Vec::new();
                for s in &c.slots {
                    slots.push((s.name.clone(), lower_ty(env, &s.ty)?));
                }
                out.push(hir::CaseDef {
                    name: c.name.clone(),
                    slots,
                });
            }
            program.unions.push(hir::UnionDef { name, cases: out });
        }
    }
    Ok(())
}

pub fn lower_ty(env: &Environment, ty: &Ty) -> Result<hir::Type, CompileError> {
    Ok(match ty {
        Ty::Unit => hir::Type::Unit,
        Ty::Boolean => hir::Type::Bool,
        Ty::Integer(Signedness::Signed, IntWidth::W8) => hir::Type::I8,
        Ty::Integer(Signedness::Signed, IntWidth::W16) => hir::Type::I16,
        Ty::Integer(Signedness::Signed, IntWidth::W32) => hir::Type::I32,
        Ty::Integer(Signedness::Signed, IntWidth::W64) => hir::Type::I64,
        Ty::Integer(Signedness::Unsigned, IntWidth::W8) => hir::Type::U8,
        Ty::Integer(Signedness::Unsigned, IntWidth::W16) => hir::Type::U16,
        Ty::Integer(Signedness::Unsigned, IntWidth::W32) => hir::Type::U32,
        Ty::Integer(Signedness::Unsigned, IntWidth::W64) => hir::Type::U64,
        Ty::SingleFloat => hir::Type::F32,
        Ty::DoubleFloat => hir::Type::F64,
        Ty::Array { elem, .. } => hir::Type::Array(Box::new(lower_ty(env, elem)?)),
        Ty::Named { name, args, .. } => {
            let key = strip_type_args(args)?;
            let id = if key.is_empty() {
                None
            } else {
                Some(env.mono.get(name, &key).ok_or_else(|| {
                    internal(
                        ErrorText::new()
                            .text("named type missing from the instantiation table: ")
                            .code(name.to_string()),
                    )
                })?)
            };
            let mangled = mangle(name, id);
            let decl = env.get_decl(name).ok_or_else(|| {
                internal(
                    ErrorText::new()
                        .text("unknown type at lowering: ")
                        .code(name.to_string()),
                )
            })?;
            match decl.kind {
                DeclKind::Record { .. } => hir::Type::Record(mangled),
                DeclKind::Union { .. } => hir::Type::Union(mangled),
                _ => {
                    return Err(internal(
                        ErrorText::new()
                            .text("named type is not a record or union: ")
                            .code(name.to_string()),
                    ));
                }
            }
        }
        Ty::ReadRef { referent, .. } | Ty::WriteRef { referent, .. } => {
            hir::Type::Pointer(Box::new(lower_ty(env, referent)?))
        }
        Ty::RawPointer { pointee } => hir::Type::Pointer(Box::new(lower_ty(env, pointee)?)),
        Ty::Region(_) => {
            return Err(internal(
                ErrorText::new().text("region type reached lowering"),
            ));
        }
        Ty::Var(v) => {
            return Err(internal(
                ErrorText::new()
                    .text("type variable ")
                    .code(&v.name)
                    .text(" reached lowering"),
            ));
        }
    })
}

fn lower_function(env: &Environment, f: &MonoFunction) -> Result<hir::Function, CompileError> {
    let mut params = Vec::new();
    for (name, ty) in &f.params {
        params.push(hir::Param {
            name: name.clone(),
            ty: lower_ty(env, ty)?,
        });
    }
    let mut lowerer = Lowerer {
        env,
        bindings: &f.bindings,
        tmp: 0,
    };
    let body = lowerer.lower_block(&f.body)?;
    Ok(hir::Function {
        name: mangle(&f.name, f.id),
        span: sable_ast::span(0, 0),
        params,
        ret: lower_ty(env, &f.ret)?,
        body,
    })
}

struct Lowerer<'a> {
    env: &'a Environment,
    bindings: &'a BindingTable,
    tmp: u32,
}

impl<'a> Lowerer<'a> {
    fn fresh_tmp(&mut self) -> String {
        let n = self.tmp;
        self.tmp += 1;
        format!("__t{n}")
    }

    fn lower_block(&mut self, stmts: &[TStmt]) -> Result<Vec<hir::Stmt>, CompileError> {
        let mut out = Vec::new();
        for stmt in stmts {
            self.lower_stmt(stmt, &mut out)?;
        }
        Ok(out)
    }

    fn lower_stmt(
        &mut self,
        stmt: &TStmt,
        out: &mut Vec<hir::Stmt>,
    ) -> Result<(), CompileError> {
        match stmt {
            TStmt::Let {
                name, ty, value, ..
            } => {
                out.push(hir::Stmt::Let {
                    name: name.clone(),
                    ty: lower_ty(self.env, ty)?,
                    value: self.lower_expr(value)?,
                });
            }
            TStmt::Destructure {
                value, bindings, ..
            } => {
                let tmp = self.fresh_tmp();
                let value_ty = lower_ty(self.env, &value.ty)?;
                out.push(hir::Stmt::Let {
                    name: tmp.clone(),
                    ty: value_ty,
                    value: self.lower_expr(value)?,
                });
                for b in bindings {
                    out.push(hir::Stmt::Let {
                        name: b.name.clone(),
                        ty: lower_ty(self.env, &b.ty)?,
                        value: hir::Expr::Path {
                            base: Box::new(hir::Expr::Var(tmp.clone())),
                            elems: vec![hir::PathElem::Slot(b.slot.clone())],
                        },
                    });
                }
            }
            TStmt::Assign { target, value, .. } => {
                let lvalue = self.lower_lvalue(target)?;
                out.push(hir::Stmt::Assign {
                    target: lvalue,
                    value: self.lower_expr(value)?,
                });
            }
            TStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                out.push(hir::Stmt::If {
                    cond: self.lower_expr(cond)?,
                    then_block: self.lower_block(then_block)?,
                    else_block: self.lower_block(else_block)?,
                });
            }
            TStmt::Case {
                scrutinee, arms, ..
            } => {
                let union_name = match &scrutinee.ty {
                    Ty::Named { name, args, .. } => {
                        let key = strip_type_args(args)?;
                        let id = if key.is_empty() {
                            None
                        } else {
                            self.env.mono.get(name, &key)
                        };
                        mangle(name, id)
                    }
                    other => {
                        return Err(internal(
                            ErrorText::new()
                                .text("case scrutinee is not a union at lowering: ")
                                .code(other.to_string()),
                        ));
                    }
                };
                let mut out_arms = Vec::new();
                for arm in arms {
                    let mut bindings = Vec::new();
                    for b in &arm.bindings {
                        bindings.push((
                            b.name.clone(),
                            b.slot.clone(),
                            lower_ty(self.env, &b.ty)?,
                        ));
                    }
                    out_arms.push(hir::SwitchArm {
                        case: arm.case_name.clone(),
                        bindings,
                        body: self.lower_block(&arm.body)?,
                    });
                }
                out.push(hir::Stmt::Switch {
                    scrutinee: self.lower_expr(scrutinee)?,
                    union_name,
                    arms: out_arms,
                });
            }
            TStmt::While { cond, body, .. } => {
                out.push(hir::Stmt::While {
                    cond: self.lower_expr(cond)?,
                    body: self.lower_block(body)?,
                });
            }
            TStmt::For {
                name,
                from,
                to,
                body,
                ..
            } => {
                let ty = lower_ty(self.env, &from.ty)?;
                out.push(hir::Stmt::For {
                    var: name.clone(),
                    ty,
                    from: self.lower_expr(from)?,
                    to: self.lower_expr(to)?,
                    body: self.lower_block(body)?,
                });
            }
            TStmt::Borrow {
                original,
                ref_binding,
                body,
                ..
            } => {
                let original_name = self.bindings.get(*original).name.clone();
                let ref_info = self.bindings.get(*ref_binding);
                let mut block = vec![hir::Stmt::Let {
                    name: ref_info.name.clone(),
                    ty: lower_ty(self.env, &ref_info.ty)?,
                    value: hir::Expr::AddressOf {
                        name: original_name,
                    },
                }];
                block.extend(self.lower_block(body)?);
                out.push(hir::Stmt::Block(block));
            }
            TStmt::Return { value, .. } => {
                out.push(hir::Stmt::Return {
                    value: self.lower_expr(value)?,
                });
            }
            TStmt::Skip { .. } => {}
            TStmt::Discard { value, .. } => {
                out.push(hir::Stmt::Discard {
                    value: self.lower_expr(value)?,
                });
            }
        }
        Ok(())
    }

    fn lower_lvalue(&mut self, target: &TExpr) -> Result<hir::LValue, CompileError> {
        match &target.kind {
            TExprKind::Variable { name, .. } => Ok(hir::LValue {
                base: name.clone(),
                elems: Vec::new(),
            }),
            TExprKind::Path { head, elems } => {
                let TExprKind::Variable { name, .. } = &head.kind else {
                    return Err(internal(
                        ErrorText::new().text("assignment target lost its variable root"),
                    ));
                };
                Ok(hir::LValue {
                    base: name.clone(),
                    elems: self.lower_path_elems(&head.ty, elems)?,
                })
            }
            _ => Err(internal(
                ErrorText::new().text("assignment target lost its variable root"),
            )),
        }
    }

    /// Slot access through a reference dereferences the base: the first
    /// element becomes a pointer access when the head is a pointer.
    fn lower_path_elems(
        &mut self,
        head_ty: &Ty,
        elems: &[crate::tast::TPathElem],
    ) -> Result<Vec<hir::PathElem>, CompileError> {
        let head_is_pointer = matches!(
            head_ty,
            Ty::ReadRef { .. } | Ty::WriteRef { .. } | Ty::RawPointer { .. }
        );
        let mut out = Vec::new();
        for (i, elem) in elems.iter().enumerate() {
            let e = match &elem.kind {
                TPathElemKind::Slot(name) => {
                    if i == 0 && head_is_pointer {
                        hir::PathElem::PointerSlot(name.clone())
                    } else {
                        hir::PathElem::Slot(name.clone())
                    }
                }
                TPathElemKind::PointerSlot(name) => hir::PathElem::PointerSlot(name.clone()),
                TPathElemKind::Index(idx) => hir::PathElem::Index {
                    index: Box::new(self.lower_expr(idx)?),
                    elem: lower_ty(self.env, &elem.ty)?,
                },
            };
            out.push(e);
        }
        Ok(out)
    }

    fn lower_expr(&mut self, expr: &TExpr) -> Result<hir::Expr, CompileError> {
        Ok(match &expr.kind {
            TExprKind::NilConstant => hir::Expr::Unit,
            TExprKind::BoolConstant(b) => hir::Expr::Bool(*b),
            TExprKind::IntConstant(v) => hir::Expr::Int(*v),
            TExprKind::FloatConstant(v) => hir::Expr::Float(*v),
            TExprKind::Variable { name, .. } => hir::Expr::Var(name.clone()),
            TExprKind::ConstantRef { name } => hir::Expr::ConstantRef(mangle(name, None)),
            TExprKind::RecordCtor { args, .. } => {
                let record = self.type_name_of(&expr.ty)?;
                let mut out = Vec::new();
                for (slot, e) in args {
                    out.push((slot.clone(), self.lower_expr(e)?));
                }
                hir::Expr::RecordCtor { record, args: out }
            }
            TExprKind::UnionCtor { case, args, .. } => {
                let union = self.type_name_of(&expr.ty)?;
                let mut out = Vec::new();
                for (slot, e) in args {
                    out.push((slot.clone(), self.lower_expr(e)?));
                }
                hir::Expr::UnionCtor {
                    union,
                    case: case.clone(),
                    args: out,
                }
            }
            TExprKind::Call { callee, args, .. } => hir::Expr::Call {
                callee: mangle(callee, None),
                args: args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<_, _>>()?,
            },
            TExprKind::GenericCall { id, callee, args } => hir::Expr::Call {
                callee: mangle(callee, Some(*id)),
                args: args
                    .iter()
                    .map(|a| self.lower_expr(a))
                    .collect::<Result<_, _>>()?,
            },
            TExprKind::MethodCall { method, .. } => {
                return Err(internal(
                    ErrorText::new()
                        .text("method call ")
                        .code(method)
                        .text(" survived monomorphization"),
                ));
            }
            TExprKind::Borrow { name, .. } => hir::Expr::AddressOf { name: name.clone() },
            TExprKind::Path { head, elems } => {
                let base = self.lower_expr(head)?;
                let elems = self.lower_path_elems(&head.ty, elems)?;
                hir::Expr::Path {
                    base: Box::new(base),
                    elems,
                }
            }
            TExprKind::Unary { op, operand } => hir::Expr::Unary {
                op: match op {
                    UnaryOp::Not => hir::UnaryOp::Not,
                    UnaryOp::Negate => hir::UnaryOp::Neg,
                },
                operand: Box::new(self.lower_expr(operand)?),
            },
            TExprKind::Binary { op, left, right } => hir::Expr::Binary {
                op: lower_binop(*op),
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
        })
    }

    fn type_name_of(&self, ty: &Ty) -> Result<String, CompileError> {
        match ty {
            Ty::Named { name, args, .. } => {
                let key = strip_type_args(args)?;
                let id = if key.is_empty() {
                    None
                } else {
                    self.env.mono.get(name, &key)
                };
                Ok(mangle(name, id))
            }
            other => Err(internal(
                ErrorText::new()
                    .text("constructor produced a non-named type ")
                    .code(other.to_string()),
            )),
        }
    }
}

fn lower_binop(op: BinOp) -> hir::BinOp {
    match op {
        BinOp::Add => hir::BinOp::Add,
        BinOp::Sub => hir::BinOp::Sub,
        BinOp::Mul => hir::BinOp::Mul,
        BinOp::Div => hir::BinOp::Div,
        BinOp::Eq => hir::BinOp::Eq,
        BinOp::Ne => hir::BinOp::Ne,
        BinOp::Lt => hir::BinOp::Lt,
        BinOp::Gt => hir::BinOp::Gt,
        BinOp::Le => hir::BinOp::Le,
        BinOp::Ge => hir::BinOp::Ge,
        BinOp::And => hir::BinOp::And,
        BinOp::Or => hir::BinOp::Or,
    }
}
