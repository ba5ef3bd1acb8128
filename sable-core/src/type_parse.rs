#![forbid(unsafe_code)]

use std::collections::HashMap;

use sable_ast::{ModuleName, NamedTypeSpec, Span, TypeSpec};

use crate::env::{DeclKind, Environment};
use crate::error::{CompileError, ErrorText, TypeError};
use crate::imports::ImportMap;
use crate::types::{
    effective_universe, universe_compatible, QualName, RegionId, Ty, TypeParams, Universe,
};

/// Signature of a type declared in the module currently being extracted.
/// Such types may not yet be in the environment.
#[derive(Clone, Debug)]
pub struct LocalTypeSig {
    pub name: String,
    pub typarams: TypeParams,
    pub universe: Universe,
}

/// Scope-structured mapping from region names to region tokens.
#[derive(Clone, Debug)]
pub struct RegionMap {
    scopes: Vec<HashMap<String, RegionId>>,
    next: u32,
}

impl RegionMap {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
            // Id 0 is the erased region.
            next: 1,
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn fresh(&mut self, name: &str) -> RegionId {
        let id = RegionId(self.next);
        self.next += 1;
        self.scopes
            .last_mut()
            .expect("region map always has a scope")
            .insert(name.to_string(), id);
        id
    }

    /// Mint a region token with no name, for anonymous borrows.
    pub fn fresh_anonymous(&mut self) -> RegionId {
        let id = RegionId(self.next);
        self.next += 1;
        id
    }

    pub fn get(&self, name: &str) -> Option<RegionId> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }
}

impl Default for RegionMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything stage D needs besides the specifier itself.
pub struct TypeParseCtx<'a> {
    pub env: &'a Environment,
    pub locals: &'a [LocalTypeSig],
    pub module: &'a ModuleName,
    pub imports: &'a ImportMap,
    pub is_unsafe: bool,
}

impl<'a> TypeParseCtx<'a> {
    fn local_sig(&self, name: &str) -> Option<&LocalTypeSig> {
        self.locals.iter().find(|l| l.name == name)
    }
}

fn type_err(message: ErrorText, span: Span) -> CompileError {
    TypeError {
        message,
        span: Some(span),
    }
    .into()
}

/// Resolve a type specifier to a type with its universe assigned.
///
/// Resolution order for a name: in-scope typarams, builtin scalars, region
/// names, local type signatures, then the environment through the import
/// map.
pub fn parse_type(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    spec: &TypeSpec,
) -> Result<Ty, CompileError> {
    match spec {
        TypeSpec::Named(named) => parse_named(ctx, regions, typarams, named),
        TypeSpec::ReadRef(r) => {
            let referent = parse_type(ctx, regions, typarams, &r.referent)?;
            let region = parse_region_arg(ctx, regions, typarams, &r.region)?;
            Ok(Ty::ReadRef {
                referent: Box::new(referent),
                region: Box::new(region),
            })
        }
        TypeSpec::WriteRef(r) => {
            let referent = parse_type(ctx, regions, typarams, &r.referent)?;
            let region = parse_region_arg(ctx, regions, typarams, &r.region)?;
            Ok(Ty::WriteRef {
                referent: Box::new(referent),
                region: Box::new(region),
            })
        }
    }
}

fn parse_region_arg(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    spec: &TypeSpec,
) -> Result<Ty, CompileError> {
    let ty = parse_type(ctx, regions, typarams, spec)?;
    match &ty {
        Ty::Region(_) => Ok(ty),
        Ty::Var(v) if v.universe == Universe::Region => Ok(ty),
        other => Err(type_err(
            ErrorText::new()
                .text("expected a region, found ")
                .code(other.to_string()),
            spec.span(),
        )),
    }
}

fn parse_named(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    named: &NamedTypeSpec,
) -> Result<Ty, CompileError> {
    let name = named.name.node.as_str();

    if let Some(param) = typarams.get(name) {
        if !named.args.is_empty() {
            return Err(type_err(
                ErrorText::new()
                    .text("type parameter ")
                    .code(name)
                    .text(" does not take arguments"),
                named.span,
            ));
        }
        return Ok(param.to_var());
    }

    if let Some(ty) = parse_builtin(ctx, regions, typarams, named)? {
        return Ok(ty);
    }

    if named.args.is_empty() {
        if let Some(region) = regions.get(name) {
            return Ok(Ty::Region(region));
        }
    }

    if let Some(sig) = ctx.local_sig(name) {
        let qual = QualName::new(ctx.module.clone(), name);
        let (args, universe) =
            check_named_args(ctx, regions, typarams, named, &sig.typarams, sig.universe)?;
        return Ok(Ty::Named {
            name: qual,
            args,
            declared: sig.universe,
            universe,
        });
    }

    let qual = ctx.imports.qualify(name);
    if let Some(decl) = ctx.env.get_decl(&qual) {
        let (decl_typarams, declared_universe) = match &decl.kind {
            DeclKind::Record {
                typarams, universe, ..
            }
            | DeclKind::Union {
                typarams, universe, ..
            } => (typarams, *universe),
            _ => {
                return Err(type_err(
                    ErrorText::new().code(name).text(" is not a type"),
                    named.span,
                ));
            }
        };
        let (args, universe) =
            check_named_args(ctx, regions, typarams, named, decl_typarams, declared_universe)?;
        return Ok(Ty::Named {
            name: qual,
            args,
            declared: declared_universe,
            universe,
        });
    }

    Err(type_err(
        ErrorText::new().text("unknown type ").code(name),
        named.span,
    ))
}

fn check_named_args(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    named: &NamedTypeSpec,
    decl_typarams: &TypeParams,
    declared_universe: Universe,
) -> Result<(Vec<Ty>, Universe), CompileError> {
    if named.args.len() != decl_typarams.len() {
        return Err(type_err(
            ErrorText::new()
                .code(&named.name.node)
                .text(format!(
                    " expects {} type argument(s), found {}",
                    decl_typarams.len(),
                    named.args.len()
                )),
            named.span,
        ));
    }
    let mut args = Vec::with_capacity(named.args.len());
    for (spec, formal) in named.args.iter().zip(decl_typarams.iter()) {
        let arg = if formal.universe == Universe::Region {
            parse_region_arg(ctx, regions, typarams, spec)?
        } else {
            parse_type(ctx, regions, typarams, spec)?
        };
        if !universe_compatible(formal.universe, arg.universe()) {
            return Err(type_err(
                ErrorText::new()
                    .text("type argument ")
                    .code(arg.to_string())
                    .text(" is in universe ")
                    .text(arg.universe().display())
                    .text(" but parameter ")
                    .code(&formal.name)
                    .text(" requires ")
                    .text(formal.universe.display()),
                spec.span(),
            ));
        }
        args.push(arg);
    }
    let universe = effective_universe(declared_universe, &args);
    Ok((args, universe))
}

fn parse_builtin(
    ctx: &TypeParseCtx<'_>,
    regions: &RegionMap,
    typarams: &TypeParams,
    named: &NamedTypeSpec,
) -> Result<Option<Ty>, CompileError> {
    use crate::types::{IntWidth, Signedness};

    let scalar = |ty: Ty| -> Result<Option<Ty>, CompileError> {
        if !named.args.is_empty() {
            return Err(type_err(
                ErrorText::new()
                    .code(&named.name.node)
                    .text(" does not take type arguments"),
                named.span,
            ));
        }
        Ok(Some(ty))
    };

    match named.name.node.as_str() {
        "Unit" => scalar(Ty::Unit),
        "Boolean" => scalar(Ty::Boolean),
        "Integer8" => scalar(Ty::Integer(Signedness::Signed, IntWidth::W8)),
        "Integer16" => scalar(Ty::Integer(Signedness::Signed, IntWidth::W16)),
        "Integer32" => scalar(Ty::Integer(Signedness::Signed, IntWidth::W32)),
        "Integer64" => scalar(Ty::Integer(Signedness::Signed, IntWidth::W64)),
        "Natural8" => scalar(Ty::Integer(Signedness::Unsigned, IntWidth::W8)),
        "Natural16" => scalar(Ty::Integer(Signedness::Unsigned, IntWidth::W16)),
        "Natural32" => scalar(Ty::Integer(Signedness::Unsigned, IntWidth::W32)),
        "Natural64" => scalar(Ty::Integer(Signedness::Unsigned, IntWidth::W64)),
        "SingleFloat" => scalar(Ty::SingleFloat),
        "DoubleFloat" => scalar(Ty::DoubleFloat),
        "Array" => {
            if named.args.len() != 2 {
                return Err(type_err(
                    ErrorText::new().text("Array expects an element type and a region"),
                    named.span,
                ));
            }
            let elem = parse_type(ctx, regions, typarams, &named.args[0])?;
            let region = parse_region_arg(ctx, regions, typarams, &named.args[1])?;
            Ok(Some(Ty::Array {
                elem: Box::new(elem),
                region: Box::new(region),
            }))
        }
        "Pointer" => {
            if !ctx.is_unsafe {
                return Err(type_err(
                    ErrorText::new()
                        .text("raw pointers require an unsafe module (pragma ")
                        .code("Unsafe_Module")
                        .text(")"),
                    named.span,
                ));
            }
            if named.args.len() != 1 {
                return Err(type_err(
                    ErrorText::new().text("Pointer expects one type argument"),
                    named.span,
                ));
            }
            let pointee = parse_type(ctx, regions, typarams, &named.args[0])?;
            Ok(Some(Ty::RawPointer {
                pointee: Box::new(pointee),
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::resolve_imports;
    use crate::types::TypeParam;

    fn spec(src: &str) -> TypeSpec {
        sable_parse::parse_type_spec(src).expect("type spec")
    }

    fn ctx_fixture() -> (Environment, ModuleName) {
        let mut env = Environment::new();
        let m = ModuleName::new("M");
        env.add_module(m.clone(), false).expect("module");
        (env, m)
    }

    #[test]
    fn scalars_resolve_structurally() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let ctx = TypeParseCtx {
            env: &env,
            locals: &[],
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        let regions = RegionMap::new();
        let tps = TypeParams::new();
        assert_eq!(
            parse_type(&ctx, &regions, &tps, &spec("Integer32")).expect("type"),
            Ty::Integer(crate::types::Signedness::Signed, crate::types::IntWidth::W32)
        );
        assert_eq!(
            parse_type(&ctx, &regions, &tps, &spec("Boolean")).expect("type"),
            Ty::Boolean
        );
    }

    #[test]
    fn typarams_shadow_everything_and_reject_args() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let ctx = TypeParseCtx {
            env: &env,
            locals: &[],
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        let regions = RegionMap::new();
        let mut tps = TypeParams::new();
        tps.insert(TypeParam {
            name: "T".to_string(),
            universe: Universe::Type,
            source: "f".to_string(),
            constraints: Vec::new(),
        })
        .expect("insert");

        match parse_type(&ctx, &regions, &tps, &spec("T")).expect("type") {
            Ty::Var(v) => assert_eq!(v.universe, Universe::Type),
            other => panic!("expected a type variable, got {other}"),
        }
        assert!(parse_type(&ctx, &regions, &tps, &spec("T[Boolean]")).is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let ctx = TypeParseCtx {
            env: &env,
            locals: &[],
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        let err = parse_type(&ctx, &RegionMap::new(), &TypeParams::new(), &spec("Mystery"))
            .expect_err("unknown");
        assert!(err.message().contains("unknown type"));
    }

    #[test]
    fn raw_pointers_require_an_unsafe_module() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let safe = TypeParseCtx {
            env: &env,
            locals: &[],
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        assert!(
            parse_type(&safe, &RegionMap::new(), &TypeParams::new(), &spec("Pointer[Boolean]"))
                .is_err()
        );
        let unsafe_ctx = TypeParseCtx {
            is_unsafe: true,
            ..safe
        };
        assert!(parse_type(
            &unsafe_ctx,
            &RegionMap::new(),
            &TypeParams::new(),
            &spec("Pointer[Boolean]")
        )
        .is_ok());
    }

    #[test]
    fn local_signatures_resolve_before_the_environment() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let locals = vec![LocalTypeSig {
            name: "Token".to_string(),
            typarams: TypeParams::new(),
            universe: Universe::Linear,
        }];
        let ctx = TypeParseCtx {
            env: &env,
            locals: &locals,
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        let ty = parse_type(&ctx, &RegionMap::new(), &TypeParams::new(), &spec("Token"))
            .expect("type");
        assert_eq!(ty.universe(), Universe::Linear);
    }

    #[test]
    fn region_names_resolve_through_the_region_map() {
        let (env, m) = ctx_fixture();
        let imports = resolve_imports(&env, &m, &[]).expect("imports");
        let ctx = TypeParseCtx {
            env: &env,
            locals: &[],
            module: &m,
            imports: &imports,
            is_unsafe: false,
        };
        let mut regions = RegionMap::new();
        let r = regions.fresh("r");
        let ty = parse_type(&ctx, &regions, &TypeParams::new(), &spec("&[Boolean, r]"))
            .expect("type");
        assert_eq!(
            ty,
            Ty::ReadRef {
                referent: Box::new(Ty::Boolean),
                region: Box::new(Ty::Region(r)),
            }
        );
    }
}
