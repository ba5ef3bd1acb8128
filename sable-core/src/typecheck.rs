#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use sable_ast::{
    BinOp, BorrowMode, CallArgs, Expr, ExprKind, FunctionDecl, InstanceDecl, MethodDecl,
    ModuleName, PathElem, Span, Stmt, UnaryOp,
};

use crate::combine::{CombinedDecl, CombinedModule};
use crate::env::{
    DeclId, DeclKind, Environment, InstanceId, MethodSig, Param, Slot, TypeVis, UnionCase,
};
use crate::error::{CompileError, ErrorText, InstanceError, InternalError, TypeError};
use crate::extract::{ExtractedModule, ExtractedRef};
use crate::imports::ImportMap;
use crate::instances;
use crate::tast::{
    BindingId, BindingInfo, BindingTable, Substitution, TCaseArm, TConstant, TExpr, TExprKind,
    TFunction, TInstanceMethods, TParam, TPathElem, TPathElemKind, TSlotBinding, TStmt,
    TypedModule,
};
use crate::type_parse::{parse_type, RegionMap, TypeParseCtx};
use crate::types::{
    substitute_ty, IntWidth, QualName, RegionId, Signedness, Ty, TypeParams, Universe,
};

/// Stage E: resolve expressions and statements into a typed AST.
pub fn typecheck_module(
    env: &mut Environment,
    combined: &CombinedModule,
    extracted: &ExtractedModule,
) -> Result<TypedModule, CompileError> {
    let mut typed = TypedModule {
        name: combined.name.clone(),
        constants: Vec::new(),
        functions: Vec::new(),
        instances: Vec::new(),
    };

    for (idx, r) in &extracted.refs {
        match (&combined.decls[*idx], r) {
            (CombinedDecl::Function { decl, .. }, ExtractedRef::Decl(id)) => {
                let f = typecheck_function(env, extracted, *id, decl)?;
                env.attach_function_body(*id, f.clone());
                typed.functions.push(f);
            }
            (CombinedDecl::Constant { decl, .. }, ExtractedRef::Decl(id)) => {
                let record = env.get_decl_by_id(*id);
                let DeclKind::Constant { ty, .. } = &record.kind else {
                    return Err(internal("constant declaration changed kind", decl.span));
                };
                let ty = ty.clone();
                let name = record.name.clone();
                if ty.universe() != Universe::Free {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("constant ")
                            .code(&decl.name.node)
                            .text(" must be in the Free universe"),
                        span: Some(decl.span),
                    }
                    .into());
                }
                let value_expr = decl
                    .value
                    .as_ref()
                    .ok_or_else(|| internal_err("combined constant has no value", decl.span))?;
                let mut checker = Checker::new(env, extracted, TypeParams::new(), Ty::Unit);
                let value = checker.check_expr(value_expr, Some(&ty))?;
                checker.expect_ty(&ty, &value.ty, value.span)?;
                typed.constants.push(TConstant {
                    decl: *id,
                    name,
                    ty,
                    value,
                });
            }
            (CombinedDecl::Instance { decl, .. }, ExtractedRef::Instance(id)) => {
                let methods = typecheck_instance(env, extracted, *id, decl)?;
                for (m, mdecl) in methods.iter().zip(decl.methods.iter()) {
                    env.attach_method_body(*id, mdecl.name.node.clone(), m.clone());
                }
                typed.instances.push(TInstanceMethods {
                    instance: *id,
                    methods,
                });
            }
            _ => {}
        }
    }

    Ok(typed)
}

fn internal(message: &str, span: Span) -> CompileError {
    internal_err(message, span).into()
}

fn internal_err(message: &str, span: Span) -> InternalError {
    InternalError {
        message: ErrorText::new().text(message),
        span: Some(span),
    }
}

fn typecheck_function(
    env: &Environment,
    extracted: &ExtractedModule,
    decl_id: DeclId,
    decl: &FunctionDecl,
) -> Result<TFunction, CompileError> {
    let record = env.get_decl_by_id(decl_id);
    let DeclKind::Function {
        typarams,
        params,
        ret,
        ..
    } = &record.kind
    else {
        return Err(internal("function declaration changed kind", decl.span));
    };
    let name = record.name.clone();
    let typarams = typarams.clone();
    let params = params.clone();
    let ret = ret.clone();

    let body_stmts = decl
        .body
        .as_ref()
        .ok_or_else(|| internal_err("combined function has no body", decl.span))?;

    let mut checker = Checker::new(env, extracted, typarams.clone(), ret.clone());
    let tparams = checker.declare_params(&params, decl.span)?;
    let body = checker.check_block(body_stmts)?;
    if !block_returns(&body) {
        return Err(TypeError {
            message: ErrorText::new()
                .text("control may reach the end of ")
                .code(&name.name)
                .text(" without returning"),
            span: Some(decl.span),
        }
        .into());
    }

    Ok(TFunction {
        decl: decl_id,
        name,
        typarams,
        params: tparams,
        ret,
        body,
        bindings: checker.bindings,
    })
}

fn typecheck_instance(
    env: &Environment,
    extracted: &ExtractedModule,
    instance_id: InstanceId,
    decl: &InstanceDecl,
) -> Result<Vec<TFunction>, CompileError> {
    let instance = env.get_instance(instance_id);
    let class = env.get_decl_by_id(instance.typeclass);
    let DeclKind::Typeclass {
        param: class_param,
        methods: class_methods,
        ..
    } = &class.kind
    else {
        return Err(internal("instance typeclass changed kind", decl.span));
    };
    let class_name = class.name.clone();
    let instance_typarams = instance.typarams.clone();
    let argument = instance.argument.clone();

    let mut class_subst = HashMap::new();
    class_subst.insert(class_param.name.clone(), argument.clone());

    let mut out = Vec::new();
    for m in &decl.methods {
        let sig = class_methods
            .iter()
            .find(|s| s.name == m.name.node)
            .ok_or_else(|| internal_err("instance method not in class", m.span))?;
        let expected_params: Vec<Ty> = sig
            .params
            .iter()
            .map(|p| substitute_ty(&p.ty, &class_subst))
            .collect();
        let expected_ret = substitute_ty(&sig.ret, &class_subst);

        let f = typecheck_method(
            env,
            extracted,
            instance_id,
            &class_name,
            &instance_typarams,
            m,
            &expected_params,
            &expected_ret,
        )?;
        out.push(f);
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn typecheck_method(
    env: &Environment,
    extracted: &ExtractedModule,
    instance_id: InstanceId,
    class_name: &QualName,
    instance_typarams: &TypeParams,
    m: &MethodDecl,
    expected_params: &[Ty],
    expected_ret: &Ty,
) -> Result<TFunction, CompileError> {
    let regions = RegionMap::new();
    let ctx = TypeParseCtx {
        env,
        locals: &[],
        module: extracted.imports.module(),
        imports: &extracted.imports,
        is_unsafe: extracted.is_unsafe,
    };

    let mut params = Vec::new();
    for p in &m.params {
        params.push(Param {
            name: p.name.node.clone(),
            ty: parse_type(&ctx, &regions, instance_typarams, &p.ty)?,
        });
    }
    let ret = parse_type(&ctx, &regions, instance_typarams, &m.return_type)?;

    let declared: Vec<&Ty> = params.iter().map(|p| &p.ty).collect();
    let conforms = declared.len() == expected_params.len()
        && declared
            .iter()
            .zip(expected_params.iter())
            .all(|(a, b)| **a == *b)
        && ret == *expected_ret;
    if !conforms {
        return Err(TypeError {
            message: ErrorText::new()
                .text("method ")
                .code(&m.name.node)
                .text(" does not match its declaration in typeclass ")
                .code(class_name.to_string()),
            span: Some(m.span),
        }
        .into());
    }

    let body_stmts = m
        .body
        .as_ref()
        .ok_or_else(|| internal_err("instance method has no body", m.span))?;

    let name = QualName::new(
        extracted.imports.module().clone(),
        format!("{}[{}].{}", class_name.name, instance_id.0, m.name.node),
    );
    let class_decl_id = env.get_instance(instance_id).typeclass;

    let mut checker = Checker::new(env, extracted, instance_typarams.clone(), ret.clone());
    let tparams = checker.declare_params(&params, m.span)?;
    let body = checker.check_block(body_stmts)?;
    if !block_returns(&body) {
        return Err(TypeError {
            message: ErrorText::new()
                .text("control may reach the end of ")
                .code(&m.name.node)
                .text(" without returning"),
            span: Some(m.span),
        }
        .into());
    }

    Ok(TFunction {
        decl: class_decl_id,
        name,
        typarams: instance_typarams.clone(),
        params: tparams,
        ret,
        body,
        bindings: checker.bindings,
    })
}

/// True when every control path through the block ends in a return.
pub fn block_returns(stmts: &[TStmt]) -> bool {
    match stmts.last() {
        Some(TStmt::Return { .. }) => true,
        Some(TStmt::If {
            then_block,
            else_block,
            ..
        }) => block_returns(then_block) && block_returns(else_block),
        Some(TStmt::Case { arms, .. }) => arms.iter().all(|a| block_returns(&a.body)),
        _ => false,
    }
}

struct Checker<'a> {
    env: &'a Environment,
    imports: &'a ImportMap,
    module: &'a ModuleName,
    is_unsafe: bool,
    typarams: TypeParams,
    regions: RegionMap,
    scopes: Vec<HashMap<String, BindingId>>,
    bindings: BindingTable,
    ret: Ty,
    /// Regions of the borrow statements currently in scope, innermost last.
    active_regions: Vec<RegionId>,
}

impl<'a> Checker<'a> {
    fn new(
        env: &'a Environment,
        extracted: &'a ExtractedModule,
        typarams: TypeParams,
        ret: Ty,
    ) -> Self {
        Self {
            env,
            imports: &extracted.imports,
            module: extracted.imports.module(),
            is_unsafe: extracted.is_unsafe,
            typarams,
            regions: RegionMap::new(),
            scopes: vec![HashMap::new()],
            bindings: BindingTable::new(),
            ret,
            active_regions: Vec::new(),
        }
    }

    fn type_ctx(&self) -> TypeParseCtx<'a> {
        TypeParseCtx {
            env: self.env,
            locals: &[],
            module: self.module,
            imports: self.imports,
            is_unsafe: self.is_unsafe,
        }
    }

    fn declare_params(
        &mut self,
        params: &[Param],
        span: Span,
    ) -> Result<Vec<TParam>, CompileError> {
        let mut out = Vec::new();
        for p in params {
            let binding = self.declare(&p.name, p.ty.clone(), span)?;
            out.push(TParam {
                binding,
                name: p.name.clone(),
                ty: p.ty.clone(),
            });
        }
        Ok(out)
    }

    fn declare(&mut self, name: &str, ty: Ty, span: Span) -> Result<BindingId, CompileError> {
        let scope = self.scopes.last_mut().expect("checker always has a scope");
        if scope.contains_key(name) {
            return Err(TypeError {
                message: ErrorText::new()
                    .code(name)
                    .text(" is already bound in this scope"),
                span: Some(span),
            }
            .into());
        }
        let id = self.bindings.fresh(BindingInfo {
            name: name.to_string(),
            ty,
            span,
        });
        scope.insert(name.to_string(), id);
        Ok(id)
    }

    fn lookup(&self, name: &str) -> Option<BindingId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name).copied())
    }

    fn expect_ty(&self, expected: &Ty, actual: &Ty, span: Span) -> Result<(), CompileError> {
        if expected == actual {
            return Ok(());
        }
        Err(TypeError {
            message: ErrorText::new()
                .text("expected ")
                .code(expected.to_string())
                .text(" but found ")
                .code(actual.to_string()),
            span: Some(span),
        }
        .into())
    }

    // ---- statements ----

    fn check_block(&mut self, stmts: &[Stmt]) -> Result<Vec<TStmt>, CompileError> {
        let mut out = Vec::new();
        for stmt in stmts {
            out.push(self.check_stmt(stmt)?);
        }
        Ok(out)
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> Result<TStmt, CompileError> {
        self.check_stmt_inner(stmt)
            .map_err(|e| e.adorn(stmt.span()))
    }

    fn check_stmt_inner(&mut self, stmt: &Stmt) -> Result<TStmt, CompileError> {
        match stmt {
            Stmt::Let(s) => {
                let ctx = self.type_ctx();
                let ty = parse_type(&ctx, &self.regions, &self.typarams, &s.ty)?;
                let value = self.check_expr(&s.value, Some(&ty))?;
                self.expect_ty(&ty, &value.ty, value.span)?;
                let binding = self.declare(&s.name.node, ty.clone(), s.name.span)?;
                Ok(TStmt::Let {
                    span: s.span,
                    binding,
                    name: s.name.node.clone(),
                    ty,
                    value,
                })
            }
            Stmt::Destructure(s) => {
                let value = self.check_expr(&s.value, None)?;
                let Ty::Named { name, args, .. } = &value.ty else {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("cannot destructure a value of type ")
                            .code(value.ty.to_string()),
                        span: Some(s.span),
                    }
                    .into());
                };
                let (slots, subst) = self.record_slots(name, args, s.span)?;

                let mut seen = HashSet::new();
                let mut bindings = Vec::new();
                for b in &s.bindings {
                    let slot = slots
                        .iter()
                        .find(|sl| sl.name == b.slot.node)
                        .ok_or_else(|| TypeError {
                            message: ErrorText::new()
                                .text("record ")
                                .code(name.to_string())
                                .text(" has no slot ")
                                .code(&b.slot.node),
                            span: Some(b.span),
                        })?;
                    if !seen.insert(b.slot.node.clone()) {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("slot ")
                                .code(&b.slot.node)
                                .text(" is destructured more than once"),
                            span: Some(b.span),
                        }
                        .into());
                    }
                    let local = b
                        .rename
                        .as_ref()
                        .map(|r| r.node.clone())
                        .unwrap_or_else(|| b.slot.node.clone());
                    let ty = substitute_ty(&slot.ty, &subst);
                    let binding = self.declare(&local, ty.clone(), b.span)?;
                    bindings.push(TSlotBinding {
                        binding,
                        slot: b.slot.node.clone(),
                        name: local,
                        ty,
                    });
                }
                for slot in &slots {
                    if !seen.contains(&slot.name) {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("destructuring must bind every slot; ")
                                .code(&slot.name)
                                .text(" is missing"),
                            span: Some(s.span),
                        }
                        .into());
                    }
                }
                Ok(TStmt::Destructure {
                    span: s.span,
                    value,
                    bindings,
                })
            }
            Stmt::Assign(s) => {
                let target = self.check_expr(&s.target, None)?;
                let rooted = match &target.kind {
                    TExprKind::Variable { .. } => true,
                    TExprKind::Path { head, .. } => {
                        matches!(head.kind, TExprKind::Variable { .. })
                    }
                    _ => false,
                };
                if !rooted {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("assignment target must be rooted in a variable"),
                        span: Some(s.span),
                    }
                    .into());
                }
                if target.ty.universe() != Universe::Free {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("assignment target must be in the Free universe, found ")
                            .code(target.ty.to_string()),
                        span: Some(s.span),
                    }
                    .into());
                }
                let target_ty = target.ty.clone();
                let value = self.check_expr(&s.value, Some(&target_ty))?;
                self.expect_ty(&target_ty, &value.ty, value.span)?;
                Ok(TStmt::Assign {
                    span: s.span,
                    target,
                    value,
                })
            }
            Stmt::If(s) => {
                let cond = self.check_expr(&s.cond, Some(&Ty::Boolean))?;
                self.expect_ty(&Ty::Boolean, &cond.ty, cond.span)?;
                self.scopes.push(HashMap::new());
                let then_block = self.check_block(&s.then_block)?;
                self.scopes.pop();
                self.scopes.push(HashMap::new());
                let else_block = self.check_block(&s.else_block)?;
                self.scopes.pop();
                Ok(TStmt::If {
                    span: s.span,
                    cond,
                    then_block,
                    else_block,
                })
            }
            Stmt::Case(s) => self.check_case(s),
            Stmt::While(s) => {
                let cond = self.check_expr(&s.cond, Some(&Ty::Boolean))?;
                self.expect_ty(&Ty::Boolean, &cond.ty, cond.span)?;
                self.scopes.push(HashMap::new());
                let body = self.check_block(&s.body)?;
                self.scopes.pop();
                Ok(TStmt::While {
                    span: s.span,
                    cond,
                    body,
                })
            }
            Stmt::For(s) => {
                let from = self.check_expr(&s.from, None)?;
                if !from.ty.is_integer() {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("a for loop counts over an integer type, found ")
                            .code(from.ty.to_string()),
                        span: Some(from.span),
                    }
                    .into());
                }
                let from_ty = from.ty.clone();
                let to = self.check_expr(&s.to, Some(&from_ty))?;
                self.expect_ty(&from_ty, &to.ty, to.span)?;
                self.scopes.push(HashMap::new());
                let binding = self.declare(&s.var.node, from_ty, s.var.span)?;
                let body = self.check_block(&s.body)?;
                self.scopes.pop();
                Ok(TStmt::For {
                    span: s.span,
                    binding,
                    name: s.var.node.clone(),
                    from,
                    to,
                    body,
                })
            }
            Stmt::Borrow(s) => {
                let original = self.lookup(&s.original.node).ok_or_else(|| TypeError {
                    message: ErrorText::new().text("unknown name ").code(&s.original.node),
                    span: Some(s.original.span),
                })?;
                let original_ty = self.bindings.get(original).ty.clone();

                self.regions.push_scope();
                let region = self.regions.fresh(&s.region.node);
                self.active_regions.push(region);
                self.scopes.push(HashMap::new());

                let ref_ty = match s.mode {
                    BorrowMode::Read => Ty::ReadRef {
                        referent: Box::new(original_ty),
                        region: Box::new(Ty::Region(region)),
                    },
                    BorrowMode::Write => Ty::WriteRef {
                        referent: Box::new(original_ty),
                        region: Box::new(Ty::Region(region)),
                    },
                };
                let ref_binding = self.declare(&s.rename.node, ref_ty, s.rename.span)?;
                let body = self.check_block(&s.body)?;

                self.scopes.pop();
                self.active_regions.pop();
                self.regions.pop_scope();

                Ok(TStmt::Borrow {
                    span: s.span,
                    original,
                    ref_binding,
                    region,
                    mode: s.mode,
                    body,
                })
            }
            Stmt::Return(s) => {
                let ret = self.ret.clone();
                let value = self.check_expr(&s.value, Some(&ret))?;
                self.expect_ty(&ret, &value.ty, value.span)?;
                for region in &self.active_regions {
                    if value.ty.mentions_region(*region) {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("reference escapes its region: the returned value has type ")
                                .code(value.ty.to_string()),
                            span: Some(s.span),
                        }
                        .into());
                    }
                }
                Ok(TStmt::Return {
                    span: s.span,
                    value,
                })
            }
            Stmt::Skip(s) => Ok(TStmt::Skip { span: s.span }),
            Stmt::Discard(s) => {
                let value = self.check_expr(&s.value, None)?;
                if value.ty.universe() != Universe::Free {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("cannot discard a value of type ")
                            .code(value.ty.to_string())
                            .text(" in universe ")
                            .text(value.ty.universe().display()),
                        span: Some(s.span),
                    }
                    .into());
                }
                Ok(TStmt::Discard {
                    span: s.span,
                    value,
                })
            }
        }
    }

    fn check_case(&mut self, s: &sable_ast::CaseStmt) -> Result<TStmt, CompileError> {
        let scrutinee = self.check_expr(&s.scrutinee, None)?;
        let Ty::Named { name, args, .. } = &scrutinee.ty else {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("case needs a union value, found ")
                    .code(scrutinee.ty.to_string()),
                span: Some(scrutinee.span),
            }
            .into());
        };
        let decl = self.env.expect_decl(name, s.span)?;
        let DeclKind::Union {
            vis,
            typarams,
            cases,
            ..
        } = &decl.kind
        else {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("case needs a union value, found ")
                    .code(scrutinee.ty.to_string()),
                span: Some(scrutinee.span),
            }
            .into());
        };
        if *vis == TypeVis::Opaque && &name.module != self.module {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("cannot inspect opaque type ")
                    .code(name.to_string())
                    .text(" outside its module"),
                span: Some(s.span),
            }
            .into());
        }

        let mut subst = HashMap::new();
        for (tp, arg) in typarams.iter().zip(args.iter()) {
            subst.insert(tp.name.clone(), arg.clone());
        }

        let mut covered: HashSet<String> = HashSet::new();
        let mut arms = Vec::new();
        for arm in &s.arms {
            let case = cases
                .iter()
                .find(|c| c.name == arm.case_name.node)
                .ok_or_else(|| TypeError {
                    message: ErrorText::new()
                        .text("union ")
                        .code(name.to_string())
                        .text(" has no case ")
                        .code(&arm.case_name.node),
                    span: Some(arm.span),
                })?;
            if !covered.insert(case.name.clone()) {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("case ")
                        .code(&case.name)
                        .text(" appears more than once"),
                    span: Some(arm.span),
                }
                .into());
            }
            if arm.bindings.len() != case.slots.len() {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("case ")
                        .code(&case.name)
                        .text(format!(
                            " has {} slot(s) but the arm binds {}",
                            case.slots.len(),
                            arm.bindings.len()
                        )),
                    span: Some(arm.span),
                }
                .into());
            }
            self.scopes.push(HashMap::new());
            let mut bindings = Vec::new();
            for (b, slot) in arm.bindings.iter().zip(case.slots.iter()) {
                let ty = substitute_ty(&slot.ty, &subst);
                let binding = self.declare(&b.node, ty.clone(), b.span)?;
                bindings.push(TSlotBinding {
                    binding,
                    slot: slot.name.clone(),
                    name: b.node.clone(),
                    ty,
                });
            }
            let body = self.check_block(&arm.body)?;
            self.scopes.pop();
            arms.push(TCaseArm {
                span: arm.span,
                case_name: case.name.clone(),
                bindings,
                body,
            });
        }
        for case in cases {
            if !covered.contains(&case.name) {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("case ")
                        .code(&case.name)
                        .text(" is not covered"),
                    span: Some(s.span),
                }
                .into());
            }
        }
        Ok(TStmt::Case {
            span: s.span,
            scrutinee,
            arms,
        })
    }

    /// Slots of a record type with the substitution from its arguments.
    fn record_slots(
        &self,
        name: &QualName,
        args: &[Ty],
        span: Span,
    ) -> Result<(Vec<Slot>, HashMap<String, Ty>), CompileError> {
        let decl = self.env.expect_decl(name, span)?;
        let DeclKind::Record {
            vis,
            typarams,
            slots,
            ..
        } = &decl.kind
        else {
            return Err(TypeError {
                message: ErrorText::new().code(name.to_string()).text(" is not a record"),
                span: Some(span),
            }
            .into());
        };
        if *vis == TypeVis::Opaque && &name.module != self.module {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("cannot inspect opaque type ")
                    .code(name.to_string())
                    .text(" outside its module"),
                span: Some(span),
            }
            .into());
        }
        let mut subst = HashMap::new();
        for (tp, arg) in typarams.iter().zip(args.iter()) {
            subst.insert(tp.name.clone(), arg.clone());
        }
        Ok((slots.clone(), subst))
    }

    // ---- expressions ----

    fn check_expr(
        &mut self,
        expr: &Expr,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        self.check_expr_inner(expr, expected)
            .map_err(|e| e.adorn(expr.span))
    }

    fn check_expr_inner(
        &mut self,
        expr: &Expr,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        match &expr.kind {
            ExprKind::NilLit => Ok(TExpr {
                span: expr.span,
                ty: Ty::Unit,
                kind: TExprKind::NilConstant,
            }),
            ExprKind::BoolLit(b) => Ok(TExpr {
                span: expr.span,
                ty: Ty::Boolean,
                kind: TExprKind::BoolConstant(*b),
            }),
            ExprKind::IntLit(v) => {
                let ty = match expected {
                    Some(Ty::Integer(s, w)) => Ty::Integer(*s, *w),
                    _ => Ty::Integer(Signedness::Signed, IntWidth::W32),
                };
                let Ty::Integer(s, w) = &ty else { unreachable!() };
                if !int_fits(*v, *s, *w) {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text(format!("literal {v} does not fit in "))
                            .code(ty.to_string()),
                        span: Some(expr.span),
                    }
                    .into());
                }
                Ok(TExpr {
                    span: expr.span,
                    ty,
                    kind: TExprKind::IntConstant(*v),
                })
            }
            ExprKind::FloatLit(v) => {
                let ty = match expected {
                    Some(Ty::SingleFloat) => Ty::SingleFloat,
                    _ => Ty::DoubleFloat,
                };
                Ok(TExpr {
                    span: expr.span,
                    ty,
                    kind: TExprKind::FloatConstant(*v),
                })
            }
            ExprKind::Var(name) => self.check_var(name, expr.span, expected),
            ExprKind::BorrowRead(name) | ExprKind::BorrowWrite(name) => {
                let mode = match &expr.kind {
                    ExprKind::BorrowRead(_) => BorrowMode::Read,
                    _ => BorrowMode::Write,
                };
                let binding = self.lookup(&name.node).ok_or_else(|| TypeError {
                    message: ErrorText::new().text("unknown name ").code(&name.node),
                    span: Some(name.span),
                })?;
                let referent = self.bindings.get(binding).ty.clone();
                let region = self.regions.fresh_anonymous();
                let ty = match mode {
                    BorrowMode::Read => Ty::ReadRef {
                        referent: Box::new(referent),
                        region: Box::new(Ty::Region(region)),
                    },
                    BorrowMode::Write => Ty::WriteRef {
                        referent: Box::new(referent),
                        region: Box::new(Ty::Region(region)),
                    },
                };
                Ok(TExpr {
                    span: expr.span,
                    ty,
                    kind: TExprKind::Borrow {
                        binding,
                        name: name.node.clone(),
                        mode,
                        region,
                    },
                })
            }
            ExprKind::Unary { op, operand } => self.check_unary(*op, operand, expr.span),
            ExprKind::Binary { op, left, right } => {
                self.check_binary(*op, left, right, expr.span, expected)
            }
            ExprKind::Call { name, args } => self.check_call(name, args, expr.span, expected),
            ExprKind::Path { head, elems } => self.check_path(head, elems, expr.span),
        }
    }

    fn check_var(
        &mut self,
        name: &sable_ast::Ident,
        span: Span,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        if let Some(binding) = self.lookup(&name.node) {
            let ty = self.bindings.get(binding).ty.clone();
            return Ok(TExpr {
                span,
                ty,
                kind: TExprKind::Variable {
                    binding,
                    name: name.node.clone(),
                },
            });
        }
        let qual = self.imports.qualify(&name.node);
        if let Some(decl) = self.env.get_decl(&qual) {
            if let DeclKind::Constant { ty, .. } = &decl.kind {
                return Ok(TExpr {
                    span,
                    ty: ty.clone(),
                    kind: TExprKind::ConstantRef { name: qual },
                });
            }
        }
        // A bare identifier can be a nullary union constructor.
        if let Some((union_name, case)) = self.find_union_case(&name.node, span)? {
            if case.slots.is_empty() {
                return self.check_union_ctor(
                    &union_name,
                    &case,
                    &CallArgs::Positional(Vec::new()),
                    span,
                    expected,
                );
            }
        }
        Err(TypeError {
            message: ErrorText::new().text("unknown name ").code(&name.node),
            span: Some(span),
        }
        .into())
    }

    fn check_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        span: Span,
    ) -> Result<TExpr, CompileError> {
        match op {
            UnaryOp::Not => {
                let operand = self.check_expr(operand, Some(&Ty::Boolean))?;
                self.expect_ty(&Ty::Boolean, &operand.ty, operand.span)?;
                Ok(TExpr {
                    span,
                    ty: Ty::Boolean,
                    kind: TExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                })
            }
            UnaryOp::Negate => {
                let operand = self.check_expr(operand, None)?;
                let ok = matches!(
                    operand.ty,
                    Ty::Integer(Signedness::Signed, _) | Ty::SingleFloat | Ty::DoubleFloat
                );
                if !ok {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("cannot negate a value of type ")
                            .code(operand.ty.to_string()),
                        span: Some(operand.span),
                    }
                    .into());
                }
                let ty = operand.ty.clone();
                Ok(TExpr {
                    span,
                    ty,
                    kind: TExprKind::Unary {
                        op,
                        operand: Box::new(operand),
                    },
                })
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        span: Span,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let hint = expected.filter(|t| t.is_scalar());
                let left = self.check_expr(left, hint)?;
                let left_ty = left.ty.clone();
                let right = self.check_expr(right, Some(&left_ty))?;
                if !left.ty.is_scalar() {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("arithmetic needs a scalar type, found ")
                            .code(left.ty.to_string()),
                        span: Some(left.span),
                    }
                    .into());
                }
                self.expect_ty(&left_ty, &right.ty, right.span)?;
                Ok(TExpr {
                    span,
                    ty: left_ty,
                    kind: TExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
            BinOp::Eq | BinOp::Ne => {
                let left = self.check_expr(left, None)?;
                let left_ty = left.ty.clone();
                let right = self.check_expr(right, Some(&left_ty))?;
                if !(left.ty.is_scalar() || left.ty == Ty::Boolean) {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("equality is defined on scalar and boolean types, found ")
                            .code(left.ty.to_string()),
                        span: Some(left.span),
                    }
                    .into());
                }
                self.expect_ty(&left_ty, &right.ty, right.span)?;
                Ok(TExpr {
                    span,
                    ty: Ty::Boolean,
                    kind: TExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let left = self.check_expr(left, None)?;
                let left_ty = left.ty.clone();
                let right = self.check_expr(right, Some(&left_ty))?;
                if !left.ty.is_scalar() {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("comparison needs a scalar type, found ")
                            .code(left.ty.to_string()),
                        span: Some(left.span),
                    }
                    .into());
                }
                self.expect_ty(&left_ty, &right.ty, right.span)?;
                Ok(TExpr {
                    span,
                    ty: Ty::Boolean,
                    kind: TExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
            BinOp::And | BinOp::Or => {
                let left = self.check_expr(left, Some(&Ty::Boolean))?;
                self.expect_ty(&Ty::Boolean, &left.ty, left.span)?;
                let right = self.check_expr(right, Some(&Ty::Boolean))?;
                self.expect_ty(&Ty::Boolean, &right.ty, right.span)?;
                Ok(TExpr {
                    span,
                    ty: Ty::Boolean,
                    kind: TExprKind::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
        }
    }

    fn check_path(
        &mut self,
        head: &Expr,
        elems: &[PathElem],
        span: Span,
    ) -> Result<TExpr, CompileError> {
        let head = self.check_expr(head, None)?;
        let mut current = head.ty.clone();
        let mut out = Vec::new();
        for elem in elems {
            match elem {
                PathElem::Slot { span, name } => {
                    // Reading through a reference dereferences it first.
                    let record_ty = match &current {
                        Ty::ReadRef { referent, .. } | Ty::WriteRef { referent, .. } => {
                            referent.as_ref().clone()
                        }
                        other => other.clone(),
                    };
                    let Ty::Named {
                        name: rec_name,
                        args,
                        ..
                    } = &record_ty
                    else {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("slot access needs a record, found ")
                                .code(current.to_string()),
                            span: Some(*span),
                        }
                        .into());
                    };
                    let (slots, subst) = self.record_slots(rec_name, args, *span)?;
                    let slot = slots
                        .iter()
                        .find(|s| s.name == name.node)
                        .ok_or_else(|| TypeError {
                            message: ErrorText::new()
                                .text("record ")
                                .code(rec_name.to_string())
                                .text(" has no slot ")
                                .code(&name.node),
                            span: Some(*span),
                        })?;
                    let ty = substitute_ty(&slot.ty, &subst);
                    out.push(TPathElem {
                        ty: ty.clone(),
                        kind: TPathElemKind::Slot(name.node.clone()),
                    });
                    current = ty;
                }
                PathElem::PointerSlot { span, name } => {
                    if !self.is_unsafe {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("pointer slot access requires an unsafe module"),
                            span: Some(*span),
                        }
                        .into());
                    }
                    let Ty::RawPointer { pointee } = &current else {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("pointer slot access needs a raw pointer, found ")
                                .code(current.to_string()),
                            span: Some(*span),
                        }
                        .into());
                    };
                    let Ty::Named {
                        name: rec_name,
                        args,
                        ..
                    } = pointee.as_ref()
                    else {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("pointer slot access needs a pointer to a record, found ")
                                .code(current.to_string()),
                            span: Some(*span),
                        }
                        .into());
                    };
                    let (slots, subst) = self.record_slots(rec_name, args, *span)?;
                    let slot = slots
                        .iter()
                        .find(|s| s.name == name.node)
                        .ok_or_else(|| TypeError {
                            message: ErrorText::new()
                                .text("record ")
                                .code(rec_name.to_string())
                                .text(" has no slot ")
                                .code(&name.node),
                            span: Some(*span),
                        })?;
                    let ty = substitute_ty(&slot.ty, &subst);
                    out.push(TPathElem {
                        ty: ty.clone(),
                        kind: TPathElemKind::PointerSlot(name.node.clone()),
                    });
                    current = ty;
                }
                PathElem::Index { span, index } => {
                    let elem_ty = match &current {
                        Ty::Array { elem, .. } => elem.as_ref().clone(),
                        Ty::ReadRef { referent, .. } | Ty::WriteRef { referent, .. } => {
                            match referent.as_ref() {
                                Ty::Array { elem, .. } => elem.as_ref().clone(),
                                other => {
                                    return Err(TypeError {
                                        message: ErrorText::new()
                                            .text("indexing needs an array, found ")
                                            .code(other.to_string()),
                                        span: Some(*span),
                                    }
                                    .into());
                                }
                            }
                        }
                        other => {
                            return Err(TypeError {
                                message: ErrorText::new()
                                    .text("indexing needs an array, found ")
                                    .code(other.to_string()),
                                span: Some(*span),
                            }
                            .into());
                        }
                    };
                    if elem_ty.universe() != Universe::Free {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("cannot copy a linear element out of an array"),
                            span: Some(*span),
                        }
                        .into());
                    }
                    let index = self.check_expr(
                        index,
                        Some(&Ty::Integer(Signedness::Unsigned, IntWidth::W64)),
                    )?;
                    if !index.ty.is_integer() {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("array index must be an integer, found ")
                                .code(index.ty.to_string()),
                            span: Some(index.span),
                        }
                        .into());
                    }
                    out.push(TPathElem {
                        ty: elem_ty.clone(),
                        kind: TPathElemKind::Index(Box::new(index)),
                    });
                    current = elem_ty;
                }
            }
        }
        Ok(TExpr {
            span,
            ty: current,
            kind: TExprKind::Path {
                head: Box::new(head),
                elems: out,
            },
        })
    }

    // ---- calls ----

    fn check_call(
        &mut self,
        name: &sable_ast::Ident,
        args: &CallArgs,
        span: Span,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        let qual = self.imports.qualify(&name.node);
        if let Some(decl) = self.env.get_decl(&qual) {
            match &decl.kind {
                DeclKind::Function {
                    typarams,
                    params,
                    ret,
                    ..
                } => {
                    let typarams = typarams.clone();
                    let params = params.clone();
                    let ret = ret.clone();
                    return self.check_function_call(
                        &qual, &typarams, &params, &ret, args, span,
                    );
                }
                DeclKind::Record {
                    vis,
                    typarams,
                    universe,
                    slots,
                } => {
                    if *vis == TypeVis::Opaque && &qual.module != self.module {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("cannot construct opaque type ")
                                .code(qual.to_string())
                                .text(" outside its module"),
                            span: Some(span),
                        }
                        .into());
                    }
                    let typarams = typarams.clone();
                    let universe = *universe;
                    let slots = slots.clone();
                    return self.check_record_ctor(
                        &qual, &typarams, universe, &slots, args, span, expected,
                    );
                }
                _ => {}
            }
        }
        if let Some((union_name, case)) = self.find_union_case(&name.node, span)? {
            return self.check_union_ctor(&union_name, &case, args, span, expected);
        }
        if let Some(result) = self.check_method_call(name, args, span)? {
            return Ok(result);
        }
        Err(TypeError {
            message: ErrorText::new().text("unknown name ").code(&name.node),
            span: Some(span),
        }
        .into())
    }

    fn check_function_call(
        &mut self,
        callee: &QualName,
        typarams: &TypeParams,
        params: &[Param],
        ret: &Ty,
        args: &CallArgs,
        span: Span,
    ) -> Result<TExpr, CompileError> {
        let CallArgs::Positional(arg_exprs) = args else {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("function ")
                    .code(callee.to_string())
                    .text(" takes positional arguments"),
                span: Some(span),
            }
            .into());
        };
        if arg_exprs.len() != params.len() {
            return Err(TypeError {
                message: ErrorText::new()
                    .code(callee.to_string())
                    .text(format!(
                        " expects {} argument(s), found {}",
                        params.len(),
                        arg_exprs.len()
                    )),
                span: Some(span),
            }
            .into());
        }

        let mut subst: HashMap<String, Ty> = HashMap::new();
        let mut targs = Vec::new();
        for (param, arg) in params.iter().zip(arg_exprs.iter()) {
            let hint = if param.ty.contains_var() {
                let applied = substitute_ty(&param.ty, &subst);
                if applied.contains_var() {
                    None
                } else {
                    Some(applied)
                }
            } else {
                Some(param.ty.clone())
            };
            let targ = self.check_expr(arg, hint.as_ref())?;
            if !instances::match_ty(&param.ty, &targ.ty, &mut subst) {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("argument ")
                        .code(&param.name)
                        .text(" of ")
                        .code(callee.to_string())
                        .text(" expects ")
                        .code(substitute_ty(&param.ty, &subst).to_string())
                        .text(" but found ")
                        .code(targ.ty.to_string()),
                    span: Some(targ.span),
                }
                .into());
            }
            targs.push(targ);
        }

        let substitution = self.finish_substitution(typarams, &subst, callee, span)?;
        let ty = substitute_ty(ret, &subst);
        Ok(TExpr {
            span,
            ty,
            kind: TExprKind::Call {
                callee: callee.clone(),
                args: targs,
                substitution,
            },
        })
    }

    /// Substitution must be total over the callee's typarams, in declared
    /// order, with constraints satisfied.
    fn finish_substitution(
        &self,
        typarams: &TypeParams,
        subst: &HashMap<String, Ty>,
        callee: &QualName,
        span: Span,
    ) -> Result<Substitution, CompileError> {
        let mut out = Vec::new();
        for tp in typarams.iter() {
            let bound = subst.get(&tp.name).ok_or_else(|| TypeError {
                message: ErrorText::new()
                    .text("could not infer type argument ")
                    .code(&tp.name)
                    .text(" of ")
                    .code(callee.to_string()),
                span: Some(span),
            })?;
            for constraint in &tp.constraints {
                self.check_constraint(constraint, bound, span)?;
            }
            out.push((tp.name.clone(), bound.clone()));
        }
        Ok(out)
    }

    fn check_constraint(
        &self,
        typeclass: &QualName,
        bound: &Ty,
        span: Span,
    ) -> Result<(), CompileError> {
        if let Ty::Var(v) = bound {
            if instances::var_satisfies_constraint(&self.typarams, &v.name, typeclass) {
                return Ok(());
            }
            return Err(InstanceError {
                message: ErrorText::new()
                    .text("type variable ")
                    .code(&v.name)
                    .text(" has no ")
                    .code(typeclass.to_string())
                    .text(" constraint"),
                span: Some(span),
            }
            .into());
        }
        let class = self.env.get_decl(typeclass).ok_or_else(|| TypeError {
            message: ErrorText::new()
                .text("unknown typeclass ")
                .code(typeclass.to_string()),
            span: Some(span),
        })?;
        if instances::find_instance(self.env, class.id, bound).is_none() {
            return Err(InstanceError {
                message: ErrorText::new()
                    .text("no instance of ")
                    .code(typeclass.to_string())
                    .text(" for ")
                    .code(bound.to_string()),
                span: Some(span),
            }
            .into());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_record_ctor(
        &mut self,
        name: &QualName,
        typarams: &TypeParams,
        universe: Universe,
        slots: &[Slot],
        args: &CallArgs,
        span: Span,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        let mut subst = seed_from_expected(typarams, name, expected);
        let targs = self.check_ctor_args(name, slots, args, &mut subst, span)?;
        let substitution = self.finish_substitution(typarams, &subst, name, span)?;
        let ty_args: Vec<Ty> = substitution.iter().map(|(_, t)| t.clone()).collect();
        let ty = Ty::Named {
            name: name.clone(),
            universe: crate::types::effective_universe(universe, &ty_args),
            declared: universe,
            args: ty_args,
        };
        Ok(TExpr {
            span,
            ty,
            kind: TExprKind::RecordCtor {
                decl: name.clone(),
                args: targs,
                substitution,
            },
        })
    }

    fn check_union_ctor(
        &mut self,
        union_name: &QualName,
        case: &UnionCase,
        args: &CallArgs,
        span: Span,
        expected: Option<&Ty>,
    ) -> Result<TExpr, CompileError> {
        let decl = self.env.expect_decl(union_name, span)?;
        let DeclKind::Union {
            typarams, universe, ..
        } = &decl.kind
        else {
            return Err(internal("union constructor on a non-union", span));
        };
        let typarams = typarams.clone();
        let universe = *universe;

        let mut subst = seed_from_expected(&typarams, union_name, expected);
        let targs = self.check_ctor_args(union_name, &case.slots, args, &mut subst, span)?;
        let substitution = self.finish_substitution(&typarams, &subst, union_name, span)?;
        let ty_args: Vec<Ty> = substitution.iter().map(|(_, t)| t.clone()).collect();
        let ty = Ty::Named {
            name: union_name.clone(),
            args: ty_args.clone(),
            declared: universe,
            universe: crate::types::effective_universe(universe, &ty_args),
        };
        Ok(TExpr {
            span,
            ty,
            kind: TExprKind::UnionCtor {
                decl: union_name.clone(),
                case: case.name.clone(),
                args: targs,
                substitution,
            },
        })
    }

    /// Type constructor arguments against slot formals, named or
    /// positional, extending the substitution.
    fn check_ctor_args(
        &mut self,
        name: &QualName,
        slots: &[Slot],
        args: &CallArgs,
        subst: &mut HashMap<String, Ty>,
        span: Span,
    ) -> Result<Vec<(String, TExpr)>, CompileError> {
        let pairs: Vec<(&Slot, &Expr)> = match args {
            CallArgs::Positional(exprs) => {
                if exprs.len() != slots.len() {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .code(name.to_string())
                            .text(format!(
                                " expects {} argument(s), found {}",
                                slots.len(),
                                exprs.len()
                            )),
                        span: Some(span),
                    }
                    .into());
                }
                slots.iter().zip(exprs.iter()).collect()
            }
            CallArgs::Named(named) => {
                let mut pairs = Vec::new();
                let mut seen = HashSet::new();
                for arg in named {
                    let slot = slots
                        .iter()
                        .find(|s| s.name == arg.name.node)
                        .ok_or_else(|| TypeError {
                            message: ErrorText::new()
                                .code(name.to_string())
                                .text(" has no slot ")
                                .code(&arg.name.node),
                            span: Some(arg.span),
                        })?;
                    if !seen.insert(slot.name.clone()) {
                        return Err(TypeError {
                            message: ErrorText::new()
                                .text("slot ")
                                .code(&slot.name)
                                .text(" is given more than once"),
                            span: Some(arg.span),
                        }
                        .into());
                    }
                    pairs.push((slot, &arg.value));
                }
                if seen.len() != slots.len() {
                    let missing = slots
                        .iter()
                        .find(|s| !seen.contains(&s.name))
                        .expect("some slot is missing");
                    return Err(TypeError {
                        message: ErrorText::new()
                            .code(name.to_string())
                            .text(" is missing slot ")
                            .code(&missing.name),
                        span: Some(span),
                    }
                    .into());
                }
                pairs
            }
        };

        let mut out = Vec::new();
        for (slot, expr) in pairs {
            let hint = {
                let applied = substitute_ty(&slot.ty, subst);
                if applied.contains_var() {
                    None
                } else {
                    Some(applied)
                }
            };
            let targ = self.check_expr(expr, hint.as_ref())?;
            if !instances::match_ty(&slot.ty, &targ.ty, subst) {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("slot ")
                        .code(&slot.name)
                        .text(" of ")
                        .code(name.to_string())
                        .text(" expects ")
                        .code(substitute_ty(&slot.ty, subst).to_string())
                        .text(" but found ")
                        .code(targ.ty.to_string()),
                    span: Some(targ.span),
                }
                .into());
            }
            out.push((slot.name.clone(), targ));
        }
        Ok(out)
    }

    /// Search visible unions for a case with the given name.
    fn find_union_case(
        &self,
        case_name: &str,
        span: Span,
    ) -> Result<Option<(QualName, UnionCase)>, CompileError> {
        let mut found: Option<(QualName, UnionCase)> = None;
        for decl in self.env.all_decls() {
            let visible = &decl.name.module == self.module
                || self.imports.maps_target(&decl.name);
            if !visible {
                continue;
            }
            self.union_case_candidate(decl, case_name, span, &mut found)?;
        }
        Ok(found)
    }

    fn union_case_candidate(
        &self,
        decl: &crate::env::DeclRecord,
        case_name: &str,
        span: Span,
        found: &mut Option<(QualName, UnionCase)>,
    ) -> Result<(), CompileError> {
        let DeclKind::Union { vis, cases, .. } = &decl.kind else {
            return Ok(());
        };
        if *vis == TypeVis::Opaque && &decl.name.module != self.module {
            return Ok(());
        }
        if let Some(case) = cases.iter().find(|c| c.name == case_name) {
            if let Some((prev, _)) = found {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("case name ")
                        .code(case_name)
                        .text(" is ambiguous between ")
                        .code(prev.to_string())
                        .text(" and ")
                        .code(decl.name.to_string()),
                    span: Some(span),
                }
                .into());
            }
            *found = Some((decl.name.clone(), case.clone()));
        }
        Ok(())
    }

    /// Resolve a call through the typeclasses visible from this module.
    /// Returns None when no visible typeclass declares the method.
    fn check_method_call(
        &mut self,
        name: &sable_ast::Ident,
        args: &CallArgs,
        span: Span,
    ) -> Result<Option<TExpr>, CompileError> {
        let mut candidate: Option<(DeclId, QualName, MethodSig, String)> = None;
        for decl in self.env.typeclasses() {
            let visible = &decl.name.module == self.module
                || self.imports.maps_target(&decl.name);
            if !visible {
                continue;
            }
            let DeclKind::Typeclass {
                param, methods, ..
            } = &decl.kind
            else {
                continue;
            };
            if let Some(sig) = methods.iter().find(|m| m.name == name.node) {
                if let Some((_, prev_class, _, _)) = &candidate {
                    return Err(TypeError {
                        message: ErrorText::new()
                            .text("method name ")
                            .code(&name.node)
                            .text(" is ambiguous between ")
                            .code(prev_class.to_string())
                            .text(" and ")
                            .code(decl.name.to_string()),
                        span: Some(span),
                    }
                    .into());
                }
                candidate = Some((
                    decl.id,
                    decl.name.clone(),
                    sig.clone(),
                    param.name.clone(),
                ));
            }
        }
        let Some((class_id, class_name, sig, param_name)) = candidate else {
            return Ok(None);
        };

        let CallArgs::Positional(arg_exprs) = args else {
            return Err(TypeError {
                message: ErrorText::new()
                    .text("method ")
                    .code(&name.node)
                    .text(" takes positional arguments"),
                span: Some(span),
            }
            .into());
        };
        if arg_exprs.len() != sig.params.len() {
            return Err(TypeError {
                message: ErrorText::new()
                    .code(&name.node)
                    .text(format!(
                        " expects {} argument(s), found {}",
                        sig.params.len(),
                        arg_exprs.len()
                    )),
                span: Some(span),
            }
            .into());
        }

        let mut subst: HashMap<String, Ty> = HashMap::new();
        let mut targs = Vec::new();
        for (param, arg) in sig.params.iter().zip(arg_exprs.iter()) {
            let hint = {
                let applied = substitute_ty(&param.ty, &subst);
                if applied.contains_var() {
                    None
                } else {
                    Some(applied)
                }
            };
            let targ = self.check_expr(arg, hint.as_ref())?;
            if !instances::match_ty(&param.ty, &targ.ty, &mut subst) {
                return Err(TypeError {
                    message: ErrorText::new()
                        .text("argument ")
                        .code(&param.name)
                        .text(" of method ")
                        .code(&name.node)
                        .text(" expects ")
                        .code(substitute_ty(&param.ty, &subst).to_string())
                        .text(" but found ")
                        .code(targ.ty.to_string()),
                    span: Some(targ.span),
                }
                .into());
            }
            targs.push(targ);
        }

        let dispatch = subst.get(&param_name).cloned().ok_or_else(|| TypeError {
            message: ErrorText::new()
                .text("could not infer the dispatch type of method ")
                .code(&name.node),
            span: Some(span),
        })?;

        let instance = match &dispatch {
            Ty::Var(v) => {
                if !instances::var_satisfies_constraint(&self.typarams, &v.name, &class_name) {
                    return Err(InstanceError {
                        message: ErrorText::new()
                            .text("type variable ")
                            .code(&v.name)
                            .text(" has no ")
                            .code(class_name.to_string())
                            .text(" constraint"),
                        span: Some(span),
                    }
                    .into());
                }
                None
            }
            concrete => {
                let (id, _) =
                    instances::find_instance(self.env, class_id, concrete).ok_or_else(|| {
                        InstanceError {
                            message: ErrorText::new()
                                .text("no instance of ")
                                .code(class_name.to_string())
                                .text(" for ")
                                .code(concrete.to_string()),
                            span: Some(span),
                        }
                    })?;
                Some(id)
            }
        };

        let ty = substitute_ty(&sig.ret, &subst);
        let substitution = vec![(param_name, dispatch.clone())];
        Ok(Some(TExpr {
            span,
            ty,
            kind: TExprKind::MethodCall {
                typeclass: class_name,
                method: name.node.clone(),
                dispatch,
                instance,
                args: targs,
                substitution,
            },
        }))
    }
}

/// Seed a constructor substitution from the expected type, so nullary
/// generic constructors like an empty option infer their argument.
fn seed_from_expected(
    typarams: &TypeParams,
    name: &QualName,
    expected: Option<&Ty>,
) -> HashMap<String, Ty> {
    let mut subst = HashMap::new();
    if let Some(Ty::Named {
        name: exp_name,
        args,
        ..
    }) = expected
    {
        if exp_name == name {
            for (tp, arg) in typarams.iter().zip(args.iter()) {
                subst.insert(tp.name.clone(), arg.clone());
            }
        }
    }
    subst
}

fn int_fits(value: u64, signedness: Signedness, width: IntWidth) -> bool {
    let bits = width.bits();
    match signedness {
        Signedness::Signed => u128::from(value) <= (1u128 << (bits - 1)) - 1,
        Signedness::Unsigned => {
            if bits == 64 {
                true
            } else {
                u128::from(value) < (1u128 << bits)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_literal_bounds() {
        assert!(int_fits(127, Signedness::Signed, IntWidth::W8));
        assert!(!int_fits(128, Signedness::Signed, IntWidth::W8));
        assert!(int_fits(255, Signedness::Unsigned, IntWidth::W8));
        assert!(!int_fits(256, Signedness::Unsigned, IntWidth::W8));
        assert!(int_fits(u64::MAX, Signedness::Unsigned, IntWidth::W64));
        assert!(!int_fits(u64::MAX, Signedness::Signed, IntWidth::W64));
    }
}
