#![forbid(unsafe_code)]

use std::collections::HashSet;

use sable_ast::{ImportDecl, MethodDecl, ModuleName, TypeParamSpec, UniverseSpec};

use crate::combine::{CombinedDecl, CombinedModule};
use crate::env::{
    DeclId, DeclKind, DeclRecord, Environment, InstanceId, InstanceRecord, MethodSig, Param,
    Slot, UnionCase,
};
use crate::error::{CompileError, DeclarationError, ErrorText, InstanceError};
use crate::imports::{resolve_imports, ImportMap};
use crate::instances;
use crate::type_parse::{parse_type, LocalTypeSig, RegionMap, TypeParseCtx};
use crate::types::{QualName, TypeParam, TypeParams, Universe};

/// Where a combined declaration landed in the environment.
#[derive(Clone, Copy, Debug)]
pub enum ExtractedRef {
    Decl(DeclId),
    Instance(InstanceId),
}

/// Stage C output: the module's declarations are in the environment; the
/// refs pair each combined declaration with its environment entry so the
/// typing stage can find both.
#[derive(Debug)]
pub struct ExtractedModule {
    pub name: ModuleName,
    pub is_unsafe: bool,
    pub imports: ImportMap,
    pub refs: Vec<(usize, ExtractedRef)>,
}

pub fn universe_from_spec(spec: UniverseSpec) -> Universe {
    match spec {
        UniverseSpec::Free => Universe::Free,
        UniverseSpec::Linear => Universe::Linear,
        UniverseSpec::Type => Universe::Type,
        UniverseSpec::Region => Universe::Region,
    }
}

pub fn convert_typarams(
    specs: &[TypeParamSpec],
    source: &str,
    imports: &ImportMap,
) -> Result<TypeParams, CompileError> {
    let mut out = TypeParams::new();
    for spec in specs {
        let param = TypeParam {
            name: spec.name.node.clone(),
            universe: universe_from_spec(spec.universe.node),
            source: source.to_string(),
            constraints: spec
                .constraints
                .iter()
                .map(|c| imports.qualify(&c.node))
                .collect(),
        };
        out.insert(param).map_err(|e| DeclarationError {
            message: e.message,
            span: Some(spec.span),
        })?;
    }
    Ok(out)
}

/// Interface and body files each carry their own imports; the merged map
/// serves both, with exact duplicates tolerated.
fn merge_imports(interface: &[ImportDecl], body: &[ImportDecl]) -> Vec<ImportDecl> {
    let mut seen: HashSet<(ModuleName, String, String)> = HashSet::new();
    let mut out: Vec<ImportDecl> = Vec::new();
    for import in interface.iter().chain(body.iter()) {
        let mut kept = import.clone();
        kept.names.retain(|sym| {
            let local = sym
                .rename
                .as_ref()
                .map(|r| r.node.clone())
                .unwrap_or_else(|| sym.name.node.clone());
            seen.insert((import.module.node.clone(), sym.name.node.clone(), local))
        });
        if !kept.names.is_empty() {
            out.push(kept);
        }
    }
    out
}

/// Walk a combined module and append declaration signatures to the
/// environment: types first, then typeclasses, then constants and
/// functions, then instances; public entries before private within each
/// group.
pub fn extract(
    env: &mut Environment,
    combined: &CombinedModule,
) -> Result<ExtractedModule, CompileError> {
    env.add_module(combined.name.clone(), combined.is_unsafe)?;
    let imports = resolve_imports(
        env,
        &combined.name,
        &merge_imports(&combined.interface_imports, &combined.body_imports),
    )?;

    let mut locals = Vec::new();
    for decl in &combined.decls {
        match decl {
            CombinedDecl::Record { decl, .. } => locals.push(LocalTypeSig {
                name: decl.name.node.clone(),
                typarams: convert_typarams(&decl.typarams, &decl.name.node, &imports)?,
                universe: universe_from_spec(decl.universe.node),
            }),
            CombinedDecl::Union { decl, .. } => locals.push(LocalTypeSig {
                name: decl.name.node.clone(),
                typarams: convert_typarams(&decl.typarams, &decl.name.node, &imports)?,
                universe: universe_from_spec(decl.universe.node),
            }),
            _ => {}
        }
    }

    let mut refs = Vec::new();
    let ordered = extraction_order(combined);

    for idx in ordered {
        let decl = &combined.decls[idx];
        let r = extract_decl(env, combined, &imports, &locals, decl)?;
        refs.push((idx, r));
    }

    refs.sort_by_key(|(idx, _)| *idx);
    Ok(ExtractedModule {
        name: combined.name.clone(),
        is_unsafe: combined.is_unsafe,
        imports,
        refs,
    })
}

fn extraction_order(combined: &CombinedModule) -> Vec<usize> {
    let group = |decl: &CombinedDecl| -> u8 {
        match decl {
            CombinedDecl::Record { .. } | CombinedDecl::Union { .. } => 0,
            CombinedDecl::Typeclass { .. } => 1,
            CombinedDecl::Constant { .. } | CombinedDecl::Function { .. } => 2,
            CombinedDecl::Instance { .. } => 3,
        }
    };
    let mut order: Vec<usize> = (0..combined.decls.len()).collect();
    order.sort_by_key(|&i| {
        let d = &combined.decls[i];
        (group(d), !d.is_public(), i)
    });
    order
}

fn extract_decl(
    env: &mut Environment,
    combined: &CombinedModule,
    imports: &ImportMap,
    locals: &[LocalTypeSig],
    decl: &CombinedDecl,
) -> Result<ExtractedRef, CompileError> {
    let module = &combined.name;
    let regions = RegionMap::new();

    match decl {
        CombinedDecl::Constant { vis, decl } => {
            let ctx = TypeParseCtx {
                env,
                locals,
                module,
                imports,
                is_unsafe: combined.is_unsafe,
            };
            let ty = parse_type(&ctx, &regions, &TypeParams::new(), &decl.ty)?;
            let id = env.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), decl.name.node.clone()),
                span: decl.span,
                kind: DeclKind::Constant { vis: *vis, ty },
            })?;
            Ok(ExtractedRef::Decl(id))
        }
        CombinedDecl::Record { vis, decl } => {
            let typarams = convert_typarams(&decl.typarams, &decl.name.node, imports)?;
            let mut slots = Vec::new();
            {
                let ctx = TypeParseCtx {
                    env,
                    locals,
                    module,
                    imports,
                    is_unsafe: combined.is_unsafe,
                };
                for slot in &decl.slots {
                    slots.push(Slot {
                        name: slot.name.node.clone(),
                        ty: parse_type(&ctx, &regions, &typarams, &slot.ty)?,
                    });
                }
            }
            let id = env.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), decl.name.node.clone()),
                span: decl.span,
                kind: DeclKind::Record {
                    vis: *vis,
                    typarams,
                    universe: universe_from_spec(decl.universe.node),
                    slots,
                },
            })?;
            Ok(ExtractedRef::Decl(id))
        }
        CombinedDecl::Union { vis, decl } => {
            let typarams = convert_typarams(&decl.typarams, &decl.name.node, imports)?;
            let mut cases = Vec::new();
            {
                let ctx = TypeParseCtx {
                    env,
                    locals,
                    module,
                    imports,
                    is_unsafe: combined.is_unsafe,
                };
                for case in &decl.cases {
                    let mut case_slots = Vec::new();
                    for slot in &case.slots {
                        case_slots.push(Slot {
                            name: slot.name.node.clone(),
                            ty: parse_type(&ctx, &regions, &typarams, &slot.ty)?,
                        });
                    }
                    cases.push(UnionCase {
                        name: case.name.node.clone(),
                        slots: case_slots,
                    });
                }
            }
            let id = env.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), decl.name.node.clone()),
                span: decl.span,
                kind: DeclKind::Union {
                    vis: *vis,
                    typarams,
                    universe: universe_from_spec(decl.universe.node),
                    cases,
                },
            })?;
            Ok(ExtractedRef::Decl(id))
        }
        CombinedDecl::Function { vis, decl } => {
            let typarams = convert_typarams(&decl.typarams, &decl.name.node, imports)?;
            let (params, ret) = {
                let ctx = TypeParseCtx {
                    env,
                    locals,
                    module,
                    imports,
                    is_unsafe: combined.is_unsafe,
                };
                let mut params = Vec::new();
                for p in &decl.params {
                    params.push(Param {
                        name: p.name.node.clone(),
                        ty: parse_type(&ctx, &regions, &typarams, &p.ty)?,
                    });
                }
                let ret = parse_type(&ctx, &regions, &typarams, &decl.return_type)?;
                (params, ret)
            };
            let id = env.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), decl.name.node.clone()),
                span: decl.span,
                kind: DeclKind::Function {
                    vis: *vis,
                    typarams,
                    params,
                    ret,
                },
            })?;
            Ok(ExtractedRef::Decl(id))
        }
        CombinedDecl::Typeclass { vis, decl } => {
            // Arity is checked at combining time; a single parameter is an
            // invariant here.
            let typarams = convert_typarams(&decl.params, &decl.name.node, imports)?;
            let param = typarams
                .iter()
                .next()
                .expect("combining guarantees one typeclass parameter")
                .clone();
            let methods = {
                let ctx = TypeParseCtx {
                    env,
                    locals,
                    module,
                    imports,
                    is_unsafe: combined.is_unsafe,
                };
                let mut methods = Vec::new();
                for m in &decl.methods {
                    methods.push(extract_method_sig(&ctx, &regions, &typarams, m)?);
                }
                methods
            };
            let id = env.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), decl.name.node.clone()),
                span: decl.span,
                kind: DeclKind::Typeclass {
                    vis: *vis,
                    param,
                    methods,
                },
            })?;
            Ok(ExtractedRef::Decl(id))
        }
        CombinedDecl::Instance { decl, .. } => {
            let class_qual = imports.qualify(&decl.typeclass.node);
            let class = env.expect_decl(&class_qual, decl.typeclass.span)?;
            let class_id = class.id;
            let DeclKind::Typeclass {
                param: class_param,
                methods: class_methods,
                ..
            } = class.kind.clone()
            else {
                return Err(InstanceError {
                    message: ErrorText::new()
                        .code(&decl.typeclass.node)
                        .text(" is not a typeclass"),
                    span: Some(decl.typeclass.span),
                }
                .into());
            };

            let source = format!("instance {}", decl.typeclass.node);
            let typarams = convert_typarams(&decl.typarams, &source, imports)?;
            let argument = {
                let ctx = TypeParseCtx {
                    env,
                    locals,
                    module,
                    imports,
                    is_unsafe: combined.is_unsafe,
                };
                parse_type(&ctx, &regions, &typarams, &decl.argument)?
            };

            instances::check_instance_arg_shape(&argument, &typarams, decl.span)?;
            instances::check_instance_universe(&class_param, &argument, decl.span)?;
            instances::check_overlap(env, class_id, &argument, decl.span)?;
            check_method_coverage(&class_qual, &class_methods, &decl.methods, decl.span)?;

            let id = env.add_instance(InstanceRecord {
                id: InstanceId(0),
                typeclass: class_id,
                module: module.clone(),
                typarams,
                argument,
                span: decl.span,
            });
            Ok(ExtractedRef::Instance(id))
        }
    }
}

fn extract_method_sig(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    m: &MethodDecl,
) -> Result<MethodSig, CompileError> {
    let mut params = Vec::new();
    for p in &m.params {
        params.push(Param {
            name: p.name.node.clone(),
            ty: parse_type(ctx, regions, typarams, &p.ty)?,
        });
    }
    let ret = parse_type(ctx, regions, typarams, &m.return_type)?;
    Ok(MethodSig {
        name: m.name.node.clone(),
        params,
        ret,
    })
}

/// Every class method implemented exactly once, and nothing else.
fn check_method_coverage(
    class: &QualName,
    class_methods: &[MethodSig],
    impls: &[MethodDecl],
    span: sable_ast::Span,
) -> Result<(), CompileError> {
    for sig in class_methods {
        let count = impls.iter().filter(|m| m.name.node == sig.name).count();
        if count == 0 {
            return Err(InstanceError {
                message: ErrorText::new()
                    .text("instance of ")
                    .code(class.to_string())
                    .text(" does not implement method ")
                    .code(&sig.name),
                span: Some(span),
            }
            .into());
        }
        if count > 1 {
            return Err(InstanceError {
                message: ErrorText::new()
                    .text("instance of ")
                    .code(class.to_string())
                    .text(" implements method ")
                    .code(&sig.name)
                    .text(" more than once"),
                span: Some(span),
            }
            .into());
        }
    }
    for m in impls {
        if !class_methods.iter().any(|sig| sig.name == m.name.node) {
            return Err(InstanceError {
                message: ErrorText::new()
                    .text("typeclass ")
                    .code(class.to_string())
                    .text(" has no method ")
                    .code(&m.name.node),
                span: Some(m.span),
            }
            .into());
        }
    }
    Ok(())
}
