#![forbid(unsafe_code)]

use std::collections::HashMap;

use sable_ast::{
    CaseSpec, ConstantDecl, Decl, FunctionDecl, ImportDecl, InstanceDecl, ModuleBody,
    ModuleInterface, ModuleName, ParamSpec, RecordDecl, SlotSpec, Span, TypeParamSpec, TypeSpec,
    TypeclassDecl, UnionDecl,
};

use crate::env::{TypeVis, Vis};
use crate::error::{CompileError, DeclarationError, ErrorText};

/// Stage B output: one module with visibility assigned to every
/// declaration, signatures from the interface, bodies from the body file.
#[derive(Clone, Debug)]
pub struct CombinedModule {
    pub span: Span,
    pub name: ModuleName,
    pub is_unsafe: bool,
    pub interface_imports: Vec<ImportDecl>,
    pub body_imports: Vec<ImportDecl>,
    pub decls: Vec<CombinedDecl>,
}

#[derive(Clone, Debug)]
pub enum CombinedDecl {
    Constant { vis: Vis, decl: ConstantDecl },
    Record { vis: TypeVis, decl: RecordDecl },
    Union { vis: TypeVis, decl: UnionDecl },
    Function { vis: Vis, decl: FunctionDecl },
    Typeclass { vis: Vis, decl: TypeclassDecl },
    Instance { vis: Vis, decl: InstanceDecl },
}

impl CombinedDecl {
    pub fn name(&self) -> &str {
        match self {
            CombinedDecl::Constant { decl, .. } => &decl.name.node,
            CombinedDecl::Record { decl, .. } => &decl.name.node,
            CombinedDecl::Union { decl, .. } => &decl.name.node,
            CombinedDecl::Function { decl, .. } => &decl.name.node,
            CombinedDecl::Typeclass { decl, .. } => &decl.name.node,
            CombinedDecl::Instance { decl, .. } => &decl.typeclass.node,
        }
    }

    pub fn is_public(&self) -> bool {
        match self {
            CombinedDecl::Constant { vis, .. }
            | CombinedDecl::Function { vis, .. }
            | CombinedDecl::Typeclass { vis, .. }
            | CombinedDecl::Instance { vis, .. } => *vis == Vis::Public,
            CombinedDecl::Record { vis, .. } | CombinedDecl::Union { vis, .. } => {
                !matches!(vis, TypeVis::Private)
            }
        }
    }
}

const UNSAFE_PRAGMA: &str = "Unsafe_Module";

fn decl_err(message: ErrorText, span: Span) -> CompileError {
    DeclarationError {
        message,
        span: Some(span),
    }
    .into()
}

/// Combine an interface file with its body file.
pub fn combine(
    interface: &ModuleInterface,
    body: &ModuleBody,
) -> Result<CombinedModule, CompileError> {
    if interface.name.node != body.name.node {
        return Err(decl_err(
            ErrorText::new()
                .text("module name mismatch: interface declares ")
                .code(interface.name.node.as_str())
                .text(" but body declares ")
                .code(body.name.node.as_str()),
            body.name.span,
        ));
    }

    let body_index = index_decls(&body.decls)?;
    index_decls(&interface.decls)?;
    check_typeclass_arity(interface.decls.iter().chain(body.decls.iter()))?;

    let mut decls = Vec::new();
    let mut matched_body: Vec<bool> = vec![false; body.decls.len()];

    for idecl in &interface.decls {
        match idecl {
            Decl::Instance(ispec) => {
                // Instance declarations match on typeclass name, typarams,
                // and argument type rather than a flat name.
                let found = body.decls.iter().enumerate().find(|(_, d)| match d {
                    Decl::Instance(b) => {
                        b.typeclass.node == ispec.typeclass.node
                            && typarams_equal(&b.typarams, &ispec.typarams)
                            && type_specs_equal(&b.argument, &ispec.argument)
                    }
                    _ => false,
                });
                let Some((bi, Decl::Instance(bdecl))) = found else {
                    return Err(decl_err(
                        ErrorText::new()
                            .text("missing body for instance of ")
                            .code(&ispec.typeclass.node),
                        ispec.span,
                    ));
                };
                matched_body[bi] = true;
                decls.push(CombinedDecl::Instance {
                    vis: Vis::Public,
                    decl: bdecl.clone(),
                });
            }
            other => {
                let Some(&bi) = body_index.get(other.name()) else {
                    return Err(decl_err(
                        ErrorText::new().text("missing body for ").code(other.name()),
                        other.span(),
                    ));
                };
                matched_body[bi] = true;
                decls.push(combine_decl(other, &body.decls[bi])?);
            }
        }
    }

    for (i, bdecl) in body.decls.iter().enumerate() {
        if matched_body[i] {
            continue;
        }
        decls.push(private_decl(bdecl)?);
    }

    let is_unsafe = has_unsafe_pragma(body) || interface.pragmas.iter().any(|p| p.name.node == UNSAFE_PRAGMA);

    Ok(CombinedModule {
        span: body.span,
        name: body.name.node.clone(),
        is_unsafe,
        interface_imports: interface.imports.clone(),
        body_imports: body.imports.clone(),
        decls,
    })
}

/// Combine a module that has no interface file: everything is private.
pub fn combine_body_only(body: &ModuleBody) -> Result<CombinedModule, CompileError> {
    index_decls(&body.decls)?;
    check_typeclass_arity(body.decls.iter())?;
    let mut decls = Vec::new();
    for bdecl in &body.decls {
        decls.push(private_decl(bdecl)?);
    }
    Ok(CombinedModule {
        span: body.span,
        name: body.name.node.clone(),
        is_unsafe: has_unsafe_pragma(body),
        interface_imports: Vec::new(),
        body_imports: body.imports.clone(),
        decls,
    })
}

fn has_unsafe_pragma(body: &ModuleBody) -> bool {
    body.pragmas.iter().any(|p| p.name.node == UNSAFE_PRAGMA)
}

/// Index non-instance declarations by name, rejecting duplicates.
fn index_decls(decls: &[Decl]) -> Result<HashMap<String, usize>, CompileError> {
    let mut index = HashMap::new();
    for (i, decl) in decls.iter().enumerate() {
        if matches!(decl, Decl::Instance(_)) {
            continue;
        }
        if index.insert(decl.name().to_string(), i).is_some() {
            return Err(decl_err(
                ErrorText::new()
                    .text("duplicate declaration of ")
                    .code(decl.name()),
                decl.span(),
            ));
        }
    }
    Ok(index)
}

fn check_typeclass_arity<'a>(decls: impl Iterator<Item = &'a Decl>) -> Result<(), CompileError> {
    for decl in decls {
        if let Decl::Typeclass(tc) = decl {
            if tc.params.len() != 1 {
                return Err(decl_err(
                    ErrorText::new()
                        .text("multi-argument typeclass unsupported: ")
                        .code(&tc.name.node)
                        .text(" takes more than one parameter"),
                    tc.span,
                ));
            }
        }
    }
    Ok(())
}

fn kind_mismatch(name: &str, interface: &Decl, body: &Decl) -> CompileError {
    decl_err(
        ErrorText::new()
            .text("declaration kind mismatch for ")
            .code(name)
            .text(": interface declares a ")
            .text(interface.kind_name())
            .text(" but body defines a ")
            .text(body.kind_name()),
        body.span(),
    )
}

fn combine_decl(interface: &Decl, body: &Decl) -> Result<CombinedDecl, CompileError> {
    match (interface, body) {
        (Decl::Constant(i), Decl::Constant(b)) => {
            if !type_specs_equal(&i.ty, &b.ty) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("declaration type mismatch for constant ")
                        .code(&i.name.node),
                    b.span,
                ));
            }
            Ok(CombinedDecl::Constant {
                vis: Vis::Public,
                decl: b.clone(),
            })
        }
        (Decl::Record(i), Decl::Record(b)) => {
            check_type_decl_signature(&i.name.node, &i.typarams, &b.typarams, i.universe.node, b.universe.node, b.span)?;
            if !slots_equal(&i.slots, &b.slots) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("declaration type mismatch for record ")
                        .code(&i.name.node)
                        .text(": interface and body slots differ"),
                    b.span,
                ));
            }
            Ok(CombinedDecl::Record {
                vis: TypeVis::Public,
                decl: b.clone(),
            })
        }
        (Decl::Union(i), Decl::Union(b)) => {
            check_type_decl_signature(&i.name.node, &i.typarams, &b.typarams, i.universe.node, b.universe.node, b.span)?;
            if !cases_equal(&i.cases, &b.cases) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("declaration type mismatch for union ")
                        .code(&i.name.node)
                        .text(": interface and body cases differ"),
                    b.span,
                ));
            }
            Ok(CombinedDecl::Union {
                vis: TypeVis::Public,
                decl: b.clone(),
            })
        }
        // Opaque: the interface exposes the name, the body supplies the
        // structure as a record or union.
        (Decl::OpaqueType(i), Decl::Record(b)) => {
            check_type_decl_signature(&i.name.node, &i.typarams, &b.typarams, i.universe.node, b.universe.node, b.span)?;
            Ok(CombinedDecl::Record {
                vis: TypeVis::Opaque,
                decl: b.clone(),
            })
        }
        (Decl::OpaqueType(i), Decl::Union(b)) => {
            check_type_decl_signature(&i.name.node, &i.typarams, &b.typarams, i.universe.node, b.universe.node, b.span)?;
            Ok(CombinedDecl::Union {
                vis: TypeVis::Opaque,
                decl: b.clone(),
            })
        }
        (Decl::Function(i), Decl::Function(b)) => {
            if !typarams_equal(&i.typarams, &b.typarams) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("function type parameter mismatch for ")
                        .code(&i.name.node),
                    b.span,
                ));
            }
            if !params_equal(&i.params, &b.params) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("function parameter mismatch for ")
                        .code(&i.name.node),
                    b.span,
                ));
            }
            if !type_specs_equal(&i.return_type, &b.return_type) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("function return type mismatch for ")
                        .code(&i.name.node),
                    b.span,
                ));
            }
            Ok(CombinedDecl::Function {
                vis: Vis::Public,
                decl: b.clone(),
            })
        }
        (Decl::Typeclass(i), Decl::Typeclass(b)) => {
            if !typeclasses_equal(i, b) {
                return Err(decl_err(
                    ErrorText::new()
                        .text("declaration type mismatch for typeclass ")
                        .code(&i.name.node),
                    b.span,
                ));
            }
            Ok(CombinedDecl::Typeclass {
                vis: Vis::Public,
                decl: b.clone(),
            })
        }
        (i, b) => Err(kind_mismatch(i.name(), i, b)),
    }
}

fn check_type_decl_signature(
    name: &str,
    i_typarams: &[TypeParamSpec],
    b_typarams: &[TypeParamSpec],
    i_universe: sable_ast::UniverseSpec,
    b_universe: sable_ast::UniverseSpec,
    span: Span,
) -> Result<(), CompileError> {
    if !typarams_equal(i_typarams, b_typarams) {
        return Err(decl_err(
            ErrorText::new()
                .text("type parameter mismatch for ")
                .code(name),
            span,
        ));
    }
    if i_universe != b_universe {
        return Err(decl_err(
            ErrorText::new()
                .text("universe mismatch for ")
                .code(name)
                .text(": interface declares ")
                .text(i_universe.display())
                .text(" but body declares ")
                .text(b_universe.display()),
            span,
        ));
    }
    Ok(())
}

fn private_decl(decl: &Decl) -> Result<CombinedDecl, CompileError> {
    match decl {
        Decl::Constant(d) => {
            if d.value.is_none() {
                return Err(decl_err(
                    ErrorText::new()
                        .text("constant ")
                        .code(&d.name.node)
                        .text(" has no value"),
                    d.span,
                ));
            }
            Ok(CombinedDecl::Constant {
                vis: Vis::Private,
                decl: d.clone(),
            })
        }
        Decl::Record(d) => Ok(CombinedDecl::Record {
            vis: TypeVis::Private,
            decl: d.clone(),
        }),
        Decl::Union(d) => Ok(CombinedDecl::Union {
            vis: TypeVis::Private,
            decl: d.clone(),
        }),
        Decl::OpaqueType(d) => Err(decl_err(
            ErrorText::new()
                .text("missing body for opaque type ")
                .code(&d.name.node),
            d.span,
        )),
        Decl::Function(d) => {
            if d.body.is_none() {
                return Err(decl_err(
                    ErrorText::new()
                        .text("missing body for ")
                        .code(&d.name.node),
                    d.span,
                ));
            }
            Ok(CombinedDecl::Function {
                vis: Vis::Private,
                decl: d.clone(),
            })
        }
        Decl::Typeclass(d) => Ok(CombinedDecl::Typeclass {
            vis: Vis::Private,
            decl: d.clone(),
        }),
        Decl::Instance(d) => Ok(CombinedDecl::Instance {
            vis: Vis::Private,
            decl: d.clone(),
        }),
    }
}

// ---- structural equality over the CST, prior to qualification ----

pub fn type_specs_equal(a: &TypeSpec, b: &TypeSpec) -> bool {
    match (a, b) {
        (TypeSpec::Named(a), TypeSpec::Named(b)) => {
            a.name.node == b.name.node
                && a.args.len() == b.args.len()
                && a.args
                    .iter()
                    .zip(b.args.iter())
                    .all(|(x, y)| type_specs_equal(x, y))
        }
        (TypeSpec::ReadRef(a), TypeSpec::ReadRef(b))
        | (TypeSpec::WriteRef(a), TypeSpec::WriteRef(b)) => {
            type_specs_equal(&a.referent, &b.referent) && type_specs_equal(&a.region, &b.region)
        }
        _ => false,
    }
}

pub fn typarams_equal(a: &[TypeParamSpec], b: &[TypeParamSpec]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            x.name.node == y.name.node
                && x.universe.node == y.universe.node
                && x.constraints.len() == y.constraints.len()
                && x.constraints
                    .iter()
                    .zip(y.constraints.iter())
                    .all(|(c, d)| c.node == d.node)
        })
}

pub fn params_equal(a: &[ParamSpec], b: &[ParamSpec]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.name.node == y.name.node && type_specs_equal(&x.ty, &y.ty))
}

fn slots_equal(a: &[SlotSpec], b: &[SlotSpec]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.name.node == y.name.node && type_specs_equal(&x.ty, &y.ty))
}

fn cases_equal(a: &[CaseSpec], b: &[CaseSpec]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.name.node == y.name.node && slots_equal(&x.slots, &y.slots))
}

fn typeclasses_equal(a: &TypeclassDecl, b: &TypeclassDecl) -> bool {
    typarams_equal(&a.params, &b.params)
        && a.methods.len() == b.methods.len()
        && a.methods.iter().zip(b.methods.iter()).all(|(x, y)| {
            x.name.node == y.name.node
                && params_equal(&x.params, &y.params)
                && type_specs_equal(&x.return_type, &y.return_type)
        })
}
