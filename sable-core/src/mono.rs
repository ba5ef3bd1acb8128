#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};

use crate::env::{
    DeclId, DeclKind, Environment, InstanceId, MonomorphId, MonomorphTable, Slot, UnionCase,
};
use crate::error::{CompileError, ErrorText, InternalError};
use crate::instances;
use crate::tast::{
    BindingTable, TCaseArm, TExpr, TExprKind, TFunction, TPathElem, TSlotBinding, TStmt,
    TypedModule,
};
use crate::types::{strip_ty, strip_type_args, substitute_ty, QualName, Ty, Universe};

/// Stage G output: region-erased, typaram-free declarations ready for
/// lowering. Generic calls are keyed by monomorph id.
#[derive(Debug)]
pub struct MonoProgram {
    pub constants: Vec<MonoConstant>,
    pub functions: Vec<MonoFunction>,
    pub types: Vec<MonoType>,
}

#[derive(Debug)]
pub struct MonoConstant {
    pub name: QualName,
    pub ty: Ty,
    pub value: TExpr,
}

#[derive(Debug)]
pub struct MonoFunction {
    /// Some for instantiations of generic declarations.
    pub id: Option<MonomorphId>,
    pub name: QualName,
    pub params: Vec<(String, Ty)>,
    pub ret: Ty,
    pub body: Vec<TStmt>,
    pub bindings: BindingTable,
}

#[derive(Debug)]
pub struct MonoType {
    pub id: Option<MonomorphId>,
    pub name: QualName,
    pub args: Vec<Ty>,
    pub universe: Universe,
    pub def: MonoTypeDef,
}

#[derive(Debug)]
pub enum MonoTypeDef {
    Record(Vec<Slot>),
    Union(Vec<UnionCase>),
}

enum Work {
    Function {
        decl: DeclId,
        subst: HashMap<String, Ty>,
        id: MonomorphId,
    },
    Method {
        instance: InstanceId,
        method: String,
        subst: HashMap<String, Ty>,
        id: MonomorphId,
    },
}

/// Eliminate typarams by instantiating each generic declaration with its
/// observed concrete argument tuples. The walk is bottom-up: instantiating
/// one generic may enqueue further generics.
pub fn monomorphize(
    env: &mut Environment,
    modules: &[TypedModule],
) -> Result<MonoProgram, CompileError> {
    let table = std::mem::take(&mut env.mono);
    let mut mono = Mono {
        env,
        table,
        queue: VecDeque::new(),
        used_types: HashMap::new(),
        type_order: Vec::new(),
        functions: Vec::new(),
    };

    let mut constants = Vec::new();
    for module in modules {
        for c in &module.constants {
            let empty = HashMap::new();
            constants.push(MonoConstant {
                name: c.name.clone(),
                ty: mono.mono_ty(&c.ty, &empty)?,
                value: mono.rewrite_expr(&c.value, &empty)?,
            });
        }
        for f in &module.functions {
            if f.typarams.is_empty() {
                let rewritten = mono.rewrite_function(f, &HashMap::new(), None)?;
                mono.functions.push(rewritten);
            }
        }
        for inst in &module.instances {
            let generic = !mono.env.get_instance(inst.instance).typarams.is_empty();
            if generic {
                continue;
            }
            for m in &inst.methods {
                let rewritten = mono.rewrite_function(m, &HashMap::new(), None)?;
                mono.functions.push(rewritten);
            }
        }
    }

    while let Some(work) = mono.queue.pop_front() {
        match work {
            Work::Function { decl, subst, id } => {
                let f = mono
                    .env
                    .function_body(decl)
                    .ok_or_else(|| missing_body(&mono.env.get_decl_by_id(decl).name))?
                    .clone();
                let rewritten = mono.rewrite_function(&f, &subst, Some(id))?;
                mono.functions.push(rewritten);
            }
            Work::Method {
                instance,
                method,
                subst,
                id,
            } => {
                let f = mono
                    .env
                    .method_body(instance, &method)
                    .ok_or_else(|| InternalError {
                        message: ErrorText::new()
                            .text("missing typed body for instance method ")
                            .code(&method),
                        span: None,
                    })?
                    .clone();
                let rewritten = mono.rewrite_function(&f, &subst, Some(id))?;
                mono.functions.push(rewritten);
            }
        }
    }

    let types = mono.emit_types()?;
    let Mono {
        table, functions, ..
    } = mono;
    env.mono = table;
    Ok(MonoProgram {
        constants,
        functions,
        types,
    })
}

fn missing_body(name: &QualName) -> InternalError {
    InternalError {
        message: ErrorText::new()
            .text("missing typed body for ")
            .code(name.to_string()),
        span: None,
    }
}

struct Mono<'e> {
    env: &'e Environment,
    table: MonomorphTable,
    queue: VecDeque<Work>,
    /// Every named type observed in the output, keyed by its region-free
    /// argument tuple; the value keeps the full erased argument list for
    /// layout instantiation.
    used_types: HashMap<(QualName, Vec<Ty>), (Option<MonomorphId>, Vec<Ty>)>,
    type_order: Vec<(QualName, Vec<Ty>)>,
    functions: Vec<MonoFunction>,
}

impl<'e> Mono<'e> {
    fn mono_ty(&mut self, ty: &Ty, subst: &HashMap<String, Ty>) -> Result<Ty, CompileError> {
        let applied = substitute_ty(ty, subst);
        let stripped = strip_ty(&applied)?;
        self.register_type(&stripped)?;
        Ok(stripped)
    }

    /// Record every named type reachable from an already-stripped type.
    fn register_type(&mut self, ty: &Ty) -> Result<(), CompileError> {
        match ty {
            Ty::Named { name, args, .. } => {
                let key_args = strip_type_args(args)?;
                let key = (name.clone(), key_args.clone());
                if !self.used_types.contains_key(&key) {
                    let id = if key_args.is_empty() {
                        None
                    } else {
                        let (id, _) = self.table.add_or_get(name.clone(), key_args);
                        Some(id)
                    };
                    self.used_types.insert(key.clone(), (id, args.clone()));
                    self.type_order.push(key);
                }
                for arg in args {
                    if !matches!(arg, Ty::Region(_)) {
                        self.register_type(arg)?;
                    }
                }
                Ok(())
            }
            Ty::Array { elem, .. } => self.register_type(elem),
            Ty::ReadRef { referent, .. } | Ty::WriteRef { referent, .. } => {
                self.register_type(referent)
            }
            Ty::RawPointer { pointee } => self.register_type(pointee),
            _ => Ok(()),
        }
    }

    /// Instantiate the layouts of every observed named type. Slot types can
    /// mention further named types, so the order list grows while walking.
    fn emit_types(&mut self) -> Result<Vec<MonoType>, CompileError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.type_order.len() {
            let key = self.type_order[i].clone();
            i += 1;
            let (id, full_args) = self.used_types[&key].clone();
            let (name, _) = key;
            let decl = self.env.get_decl(&name).ok_or_else(|| InternalError {
                message: ErrorText::new()
                    .text("unknown type in monomorph table ")
                    .code(name.to_string()),
                span: None,
            })?;
            match &decl.kind {
                DeclKind::Record {
                    typarams,
                    universe,
                    slots,
                    ..
                } => {
                    let subst = zip_subst(typarams.iter(), &full_args);
                    let universe = *universe;
                    let slots = slots.clone();
                    let mut mono_slots = Vec::new();
                    for slot in &slots {
                        mono_slots.push(Slot {
                            name: slot.name.clone(),
                            ty: self.mono_ty(&slot.ty, &subst)?,
                        });
                    }
                    out.push(MonoType {
                        id,
                        name: name.clone(),
                        args: full_args,
                        universe,
                        def: MonoTypeDef::Record(mono_slots),
                    });
                }
                DeclKind::Union {
                    typarams,
                    universe,
                    cases,
                    ..
                } => {
                    let subst = zip_subst(typarams.iter(), &full_args);
                    let universe = *universe;
                    let cases = cases.clone();
                    let mut mono_cases = Vec::new();
                    for case in &cases {
                        let mut mono_slots = Vec::new();
                        for slot in &case.slots {
                            mono_slots.push(Slot {
                                name: slot.name.clone(),
                                ty: self.mono_ty(&slot.ty, &subst)?,
                            });
                        }
                        mono_cases.push(UnionCase {
                            name: case.name.clone(),
                            slots: mono_slots,
                        });
                    }
                    out.push(MonoType {
                        id,
                        name: name.clone(),
                        args: full_args,
                        universe,
                        def: MonoTypeDef::Union(mono_cases),
                    });
                }
                _ => {
                    return Err(InternalError {
                        message: ErrorText::new()
                            .text("named type resolves to a non-type declaration ")
                            .code(name.to_string()),
                        span: None,
                    }
                    .into());
                }
            }
        }
        Ok(out)
    }

    fn rewrite_function(
        &mut self,
        f: &TFunction,
        subst: &HashMap<String, Ty>,
        id: Option<MonomorphId>,
    ) -> Result<MonoFunction, CompileError> {
        let mut params = Vec::new();
        for p in &f.params {
            params.push((p.name.clone(), self.mono_ty(&p.ty, subst)?));
        }
        let ret = self.mono_ty(&f.ret, subst)?;
        let mut bindings = BindingTable::new();
        for (_, info) in f.bindings.iter() {
            let ty = self.mono_ty(&info.ty, subst)?;
            bindings.fresh(crate::tast::BindingInfo {
                name: info.name.clone(),
                ty,
                span: info.span,
            });
        }
        let body = self.rewrite_block(&f.body, subst)?;
        Ok(MonoFunction {
            id,
            name: f.name.clone(),
            params,
            ret,
            body,
            bindings,
        })
    }

    fn rewrite_block(
        &mut self,
        stmts: &[TStmt],
        subst: &HashMap<String, Ty>,
    ) -> Result<Vec<TStmt>, CompileError> {
        stmts.iter().map(|s| self.rewrite_stmt(s, subst)).collect()
    }

    fn rewrite_stmt(
        &mut self,
        stmt: &TStmt,
        subst: &HashMap<String, Ty>,
    ) -> Result<TStmt, CompileError> {
        Ok(match stmt {
            TStmt::Let {
                span,
                binding,
                name,
                ty,
                value,
            } => TStmt::Let {
                span: *span,
                binding: *binding,
                name: name.clone(),
                ty: self.mono_ty(ty, subst)?,
                value: self.rewrite_expr(value, subst)?,
            },
            TStmt::Destructure {
                span,
                value,
                bindings,
            } => TStmt::Destructure {
                span: *span,
                value: self.rewrite_expr(value, subst)?,
                bindings: self.rewrite_slot_bindings(bindings, subst)?,
            },
            TStmt::Assign {
                span,
                target,
                value,
            } => TStmt::Assign {
                span: *span,
                target: self.rewrite_expr(target, subst)?,
                value: self.rewrite_expr(value, subst)?,
            },
            TStmt::If {
                span,
                cond,
                then_block,
                else_block,
            } => TStmt::If {
                span: *span,
                cond: self.rewrite_expr(cond, subst)?,
                then_block: self.rewrite_block(then_block, subst)?,
                else_block: self.rewrite_block(else_block, subst)?,
            },
            TStmt::Case {
                span,
                scrutinee,
                arms,
            } => {
                let mut out_arms = Vec::new();
                for arm in arms {
                    out_arms.push(TCaseArm {
                        span: arm.span,
                        case_name: arm.case_name.clone(),
                        bindings: self.rewrite_slot_bindings(&arm.bindings, subst)?,
                        body: self.rewrite_block(&arm.body, subst)?,
                    });
                }
                TStmt::Case {
                    span: *span,
                    scrutinee: self.rewrite_expr(scrutinee, subst)?,
                    arms: out_arms,
                }
            }
            TStmt::While { span, cond, body } => TStmt::While {
                span: *span,
                cond: self.rewrite_expr(cond, subst)?,
                body: self.rewrite_block(body, subst)?,
            },
            TStmt::For {
                span,
                binding,
                name,
                from,
                to,
                body,
            } => TStmt::For {
                span: *span,
                binding: *binding,
                name: name.clone(),
                from: self.rewrite_expr(from, subst)?,
                to: self.rewrite_expr(to, subst)?,
                body: self.rewrite_block(body, subst)?,
            },
            TStmt::Borrow {
                span,
                original,
                ref_binding,
                region,
                mode,
                body,
            } => TStmt::Borrow {
                span: *span,
                original: *original,
                ref_binding: *ref_binding,
                region: *region,
                mode: *mode,
                body: self.rewrite_block(body, subst)?,
            },
            TStmt::Return { span, value } => TStmt::Return {
                span: *span,
                value: self.rewrite_expr(value, subst)?,
            },
            TStmt::Skip { span } => TStmt::Skip { span: *span },
            TStmt::Discard { span, value } => TStmt::Discard {
                span: *span,
                value: self.rewrite_expr(value, subst)?,
            },
        })
    }

    fn rewrite_slot_bindings(
        &mut self,
        bindings: &[TSlotBinding],
        subst: &HashMap<String, Ty>,
    ) -> Result<Vec<TSlotBinding>, CompileError> {
        bindings
            .iter()
            .map(|b| {
                Ok(TSlotBinding {
                    binding: b.binding,
                    slot: b.slot.clone(),
                    name: b.name.clone(),
                    ty: self.mono_ty(&b.ty, subst)?,
                })
            })
            .collect()
    }

    fn rewrite_expr(
        &mut self,
        expr: &TExpr,
        subst: &HashMap<String, Ty>,
    ) -> Result<TExpr, CompileError> {
        let ty = self.mono_ty(&expr.ty, subst)?;
        let kind = match &expr.kind {
            TExprKind::NilConstant
            | TExprKind::BoolConstant(_)
            | TExprKind::IntConstant(_)
            | TExprKind::FloatConstant(_)
            | TExprKind::ConstantRef { .. }
            | TExprKind::Variable { .. }
            | TExprKind::Borrow { .. } => expr.kind.clone(),
            TExprKind::RecordCtor {
                decl,
                args,
                substitution,
            } => TExprKind::RecordCtor {
                decl: decl.clone(),
                args: self.rewrite_ctor_args(args, subst)?,
                substitution: self.apply_substitution(substitution, subst),
            },
            TExprKind::UnionCtor {
                decl,
                case,
                args,
                substitution,
            } => TExprKind::UnionCtor {
                decl: decl.clone(),
                case: case.clone(),
                args: self.rewrite_ctor_args(args, subst)?,
                substitution: self.apply_substitution(substitution, subst),
            },
            TExprKind::Call {
                callee,
                args,
                substitution,
            } => {
                let args = self.rewrite_exprs(args, subst)?;
                let substitution = self.apply_substitution(substitution, subst);
                if substitution.is_empty() {
                    TExprKind::Call {
                        callee: callee.clone(),
                        args,
                        substitution,
                    }
                } else {
                    let tuple: Vec<Ty> =
                        substitution.iter().map(|(_, t)| t.clone()).collect();
                    let stripped = strip_type_args(&tuple)?;
                    let (id, fresh) = self.table.add_or_get(callee.clone(), stripped);
                    if fresh {
                        let decl = self.env.get_decl(callee).ok_or_else(|| InternalError {
                            message: ErrorText::new()
                                .text("generic call to unknown function ")
                                .code(callee.to_string()),
                            span: Some(expr.span),
                        })?;
                        self.queue.push_back(Work::Function {
                            decl: decl.id,
                            subst: substitution.iter().cloned().collect(),
                            id,
                        });
                    }
                    TExprKind::GenericCall {
                        id,
                        callee: callee.clone(),
                        args,
                    }
                }
            }
            TExprKind::MethodCall {
                typeclass,
                method,
                dispatch,
                args,
                ..
            } => {
                let args = self.rewrite_exprs(args, subst)?;
                let dispatch = substitute_ty(dispatch, subst);
                let class = self.env.get_decl(typeclass).ok_or_else(|| InternalError {
                    message: ErrorText::new()
                        .text("method call through unknown typeclass ")
                        .code(typeclass.to_string()),
                    span: Some(expr.span),
                })?;
                let (instance_id, inst_subst) =
                    instances::find_instance(self.env, class.id, &dispatch).ok_or_else(
                        || InternalError {
                            message: ErrorText::new()
                                .text("no instance of ")
                                .code(typeclass.to_string())
                                .text(" for ")
                                .code(dispatch.to_string())
                                .text(" survived typing"),
                            span: Some(expr.span),
                        },
                    )?;
                let instance = self.env.get_instance(instance_id);
                let callee = QualName::new(
                    instance.module.clone(),
                    format!("{}[{}].{}", typeclass.name, instance_id.0, method),
                );
                if instance.typarams.is_empty() {
                    TExprKind::Call {
                        callee,
                        args,
                        substitution: Vec::new(),
                    }
                } else {
                    let ordered: Vec<Ty> = instance
                        .typarams
                        .iter()
                        .map(|tp| {
                            inst_subst.get(&tp.name).cloned().ok_or_else(|| {
                                CompileError::from(InternalError {
                                    message: ErrorText::new()
                                        .text("instance match did not bind ")
                                        .code(&tp.name),
                                    span: Some(expr.span),
                                })
                            })
                        })
                        .collect::<Result<_, _>>()?;
                    let stripped = strip_type_args(&ordered)?;
                    let (id, fresh) = self.table.add_or_get(callee.clone(), stripped);
                    if fresh {
                        self.queue.push_back(Work::Method {
                            instance: instance_id,
                            method: method.clone(),
                            subst: inst_subst,
                            id,
                        });
                    }
                    TExprKind::GenericCall { id, callee, args }
                }
            }
            TExprKind::GenericCall { .. } => {
                return Err(InternalError {
                    message: ErrorText::new()
                        .text("generic call id present before monomorphization"),
                    span: Some(expr.span),
                }
                .into());
            }
            TExprKind::Path { head, elems } => {
                let head = self.rewrite_expr(head, subst)?;
                let mut out = Vec::new();
                for elem in elems {
                    let kind = match &elem.kind {
                        crate::tast::TPathElemKind::Index(e) => {
                            crate::tast::TPathElemKind::Index(Box::new(
                                self.rewrite_expr(e, subst)?,
                            ))
                        }
                        other => other.clone(),
                    };
                    out.push(TPathElem {
                        ty: self.mono_ty(&elem.ty, subst)?,
                        kind,
                    });
                }
                TExprKind::Path {
                    head: Box::new(head),
                    elems: out,
                }
            }
            TExprKind::Unary { op, operand } => TExprKind::Unary {
                op: *op,
                operand: Box::new(self.rewrite_expr(operand, subst)?),
            },
            TExprKind::Binary { op, left, right } => TExprKind::Binary {
                op: *op,
                left: Box::new(self.rewrite_expr(left, subst)?),
                right: Box::new(self.rewrite_expr(right, subst)?),
            },
        };
        Ok(TExpr {
            span: expr.span,
            ty,
            kind,
        })
    }

    fn rewrite_exprs(
        &mut self,
        exprs: &[TExpr],
        subst: &HashMap<String, Ty>,
    ) -> Result<Vec<TExpr>, CompileError> {
        exprs.iter().map(|e| self.rewrite_expr(e, subst)).collect()
    }

    fn rewrite_ctor_args(
        &mut self,
        args: &[(String, TExpr)],
        subst: &HashMap<String, Ty>,
    ) -> Result<Vec<(String, TExpr)>, CompileError> {
        args.iter()
            .map(|(n, e)| Ok((n.clone(), self.rewrite_expr(e, subst)?)))
            .collect()
    }

    fn apply_substitution(
        &self,
        substitution: &[(String, Ty)],
        subst: &HashMap<String, Ty>,
    ) -> Vec<(String, Ty)> {
        substitution
            .iter()
            .map(|(n, t)| (n.clone(), substitute_ty(t, subst)))
            .collect()
    }
}

fn zip_subst<'a>(
    typarams: impl Iterator<Item = &'a crate::types::TypeParam>,
    args: &[Ty],
) -> HashMap<String, Ty> {
    typarams
        .zip(args.iter())
        .map(|(tp, arg)| (tp.name.clone(), arg.clone()))
        .collect()
}
