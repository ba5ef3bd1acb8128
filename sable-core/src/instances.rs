#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use sable_ast::Span;

use crate::env::{DeclId, Environment, InstanceId};
use crate::error::{CompileError, ErrorText, InstanceError};
use crate::types::{universe_compatible, Ty, TypeParam, TypeParams};

fn instance_err(message: ErrorText, span: Span) -> CompileError {
    InstanceError {
        message,
        span: Some(span),
    }
    .into()
}

/// An instance argument must be either a concrete non-generic type, or a
/// generic type applied to distinct type variables that together cover the
/// instance's typarams.
pub fn check_instance_arg_shape(
    argument: &Ty,
    typarams: &TypeParams,
    span: Span,
) -> Result<(), CompileError> {
    if typarams.is_empty() {
        if argument.contains_var() {
            return Err(instance_err(
                ErrorText::new()
                    .text("bad instance argument shape: ")
                    .code(argument.to_string())
                    .text(" mentions type variables but the instance declares none"),
                span,
            ));
        }
        return Ok(());
    }

    let Ty::Named { args, .. } = argument else {
        return Err(instance_err(
            ErrorText::new()
                .text("bad instance argument shape: a generic instance argument must be a \
                       named type applied to its type variables"),
            span,
        ));
    };

    let mut seen = HashSet::new();
    for arg in args {
        match arg {
            Ty::Var(v) => {
                if !seen.insert(v.name.clone()) {
                    return Err(instance_err(
                        ErrorText::new()
                            .text("bad instance argument shape: type variable ")
                            .code(&v.name)
                            .text(" appears more than once"),
                        span,
                    ));
                }
            }
            other => {
                return Err(instance_err(
                    ErrorText::new()
                        .text("bad instance argument shape: argument ")
                        .code(other.to_string())
                        .text(" is not a type variable"),
                    span,
                ));
            }
        }
    }

    for param in typarams.iter() {
        if !seen.contains(&param.name) {
            return Err(instance_err(
                ErrorText::new()
                    .text("bad instance argument shape: type parameter ")
                    .code(&param.name)
                    .text(" is not covered by the argument"),
                span,
            ));
        }
    }
    Ok(())
}

/// The instance argument's effective universe must lie in the universe the
/// typeclass accepts.
pub fn check_instance_universe(
    class_param: &TypeParam,
    argument: &Ty,
    span: Span,
) -> Result<(), CompileError> {
    if !universe_compatible(class_param.universe, argument.universe()) {
        return Err(instance_err(
            ErrorText::new()
                .text("instance argument ")
                .code(argument.to_string())
                .text(" is in universe ")
                .text(argument.universe().display())
                .text(" but the typeclass accepts ")
                .text(class_param.universe.display()),
            span,
        ));
    }
    Ok(())
}

/// Two instance arguments overlap when some substitution makes them
/// structurally equal. Type variables unify with anything on either side.
pub fn overlaps(a: &Ty, b: &Ty) -> bool {
    match (a, b) {
        (Ty::Var(_), _) | (_, Ty::Var(_)) => true,
        (Ty::Unit, Ty::Unit) | (Ty::Boolean, Ty::Boolean) => true,
        (Ty::Integer(sa, wa), Ty::Integer(sb, wb)) => sa == sb && wa == wb,
        (Ty::SingleFloat, Ty::SingleFloat) | (Ty::DoubleFloat, Ty::DoubleFloat) => true,
        (Ty::Region(_), Ty::Region(_)) => true,
        (
            Ty::Array {
                elem: ea,
                region: ra,
            },
            Ty::Array {
                elem: eb,
                region: rb,
            },
        ) => overlaps(ea, eb) && overlaps(ra, rb),
        (
            Ty::Named {
                name: na, args: aa, ..
            },
            Ty::Named {
                name: nb, args: ab, ..
            },
        ) => na == nb && aa.len() == ab.len() && aa.iter().zip(ab).all(|(x, y)| overlaps(x, y)),
        (
            Ty::ReadRef {
                referent: ta,
                region: ra,
            },
            Ty::ReadRef {
                referent: tb,
                region: rb,
            },
        )
        | (
            Ty::WriteRef {
                referent: ta,
                region: ra,
            },
            Ty::WriteRef {
                referent: tb,
                region: rb,
            },
        ) => overlaps(ta, tb) && overlaps(ra, rb),
        (Ty::RawPointer { pointee: pa }, Ty::RawPointer { pointee: pb }) => overlaps(pa, pb),
        _ => false,
    }
}

/// Reject a new instance that overlaps any existing instance of the same
/// typeclass. Run before registration so lookup stays deterministic.
pub fn check_overlap(
    env: &Environment,
    typeclass: DeclId,
    argument: &Ty,
    span: Span,
) -> Result<(), CompileError> {
    for existing in env.instances_of(typeclass) {
        if overlaps(&existing.argument, argument) {
            let class = &env.get_decl_by_id(typeclass).name;
            return Err(instance_err(
                ErrorText::new()
                    .text("overlapping instances of ")
                    .code(class.to_string())
                    .text(": ")
                    .code(argument.to_string())
                    .text(" overlaps ")
                    .code(existing.argument.to_string()),
                span,
            ));
        }
    }
    Ok(())
}

/// One-sided structural match: pattern variables bind, everything else
/// must agree exactly. Also used by call-site unification, where the
/// pattern is a formal parameter type over the callee's typarams.
pub(crate) fn match_ty(pattern: &Ty, actual: &Ty, subst: &mut HashMap<String, Ty>) -> bool {
    match (pattern, actual) {
        (Ty::Var(v), _) => {
            if !universe_compatible(v.universe, actual.universe()) {
                return false;
            }
            match subst.get(&v.name) {
                Some(bound) => bound == actual,
                None => {
                    subst.insert(v.name.clone(), actual.clone());
                    true
                }
            }
        }
        (Ty::Unit, Ty::Unit) | (Ty::Boolean, Ty::Boolean) => true,
        (Ty::Integer(sa, wa), Ty::Integer(sb, wb)) => sa == sb && wa == wb,
        (Ty::SingleFloat, Ty::SingleFloat) | (Ty::DoubleFloat, Ty::DoubleFloat) => true,
        (Ty::Region(a), Ty::Region(b)) => a == b,
        (
            Ty::Array {
                elem: ea,
                region: ra,
            },
            Ty::Array {
                elem: eb,
                region: rb,
            },
        ) => match_ty(ea, eb, subst) && match_ty(ra, rb, subst),
        (
            Ty::Named {
                name: na, args: aa, ..
            },
            Ty::Named {
                name: nb, args: ab, ..
            },
        ) => {
            na == nb
                && aa.len() == ab.len()
                && aa.iter().zip(ab).all(|(x, y)| match_ty(x, y, subst))
        }
        (
            Ty::ReadRef {
                referent: ta,
                region: ra,
            },
            Ty::ReadRef {
                referent: tb,
                region: rb,
            },
        )
        | (
            Ty::WriteRef {
                referent: ta,
                region: ra,
            },
            Ty::WriteRef {
                referent: tb,
                region: rb,
            },
        ) => match_ty(ta, tb, subst) && match_ty(ra, rb, subst),
        (Ty::RawPointer { pointee: pa }, Ty::RawPointer { pointee: pb }) => {
            match_ty(pa, pb, subst)
        }
        _ => false,
    }
}

/// Resolve the instance whose argument matches the given type. Overlap is
/// rejected at registration, so at most one instance can match.
pub fn find_instance(
    env: &Environment,
    typeclass: DeclId,
    ty: &Ty,
) -> Option<(InstanceId, HashMap<String, Ty>)> {
    for record in env.instances_of(typeclass) {
        let mut subst = HashMap::new();
        if match_ty(&record.argument, ty, &mut subst) {
            return Some((record.id, subst));
        }
    }
    None
}

/// A type variable argument inside a generic body resolves through its
/// constraints instead of the instance registry.
pub fn var_satisfies_constraint(
    typarams: &TypeParams,
    var_name: &str,
    typeclass: &crate::types::QualName,
) -> bool {
    typarams
        .get(var_name)
        .map(|p| p.constraints.iter().any(|c| c == typeclass))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QualName, TyVar, Universe};
    use sable_ast::ModuleName;

    fn var(name: &str, universe: Universe) -> Ty {
        Ty::Var(TyVar {
            name: name.to_string(),
            universe,
            source: "inst".to_string(),
        })
    }

    fn named(name: &str, args: Vec<Ty>) -> Ty {
        Ty::Named {
            name: QualName::new(ModuleName::new("M"), name),
            args,
            declared: Universe::Free,
            universe: Universe::Free,
        }
    }

    fn tps(names: &[&str]) -> TypeParams {
        let mut out = TypeParams::new();
        for n in names {
            out.insert(TypeParam {
                name: n.to_string(),
                universe: Universe::Type,
                source: "inst".to_string(),
                constraints: Vec::new(),
            })
            .expect("unique");
        }
        out
    }

    #[test]
    fn concrete_argument_shape_is_accepted() {
        check_instance_arg_shape(&Ty::Boolean, &TypeParams::new(), sable_ast::span(0, 0))
            .expect("concrete shape");
    }

    #[test]
    fn generic_argument_must_cover_all_typarams() {
        let arg = named("Pair", vec![var("A", Universe::Type)]);
        let err = check_instance_arg_shape(&arg, &tps(&["A", "B"]), sable_ast::span(0, 0))
            .expect_err("uncovered");
        assert!(err.message().contains("not covered"));
    }

    #[test]
    fn repeated_variable_is_a_bad_shape() {
        let arg = named(
            "Pair",
            vec![var("A", Universe::Type), var("A", Universe::Type)],
        );
        let err = check_instance_arg_shape(&arg, &tps(&["A"]), sable_ast::span(0, 0))
            .expect_err("repeated");
        assert!(err.message().contains("more than once"));
    }

    #[test]
    fn half_concrete_argument_is_a_bad_shape() {
        let arg = named("Pair", vec![var("A", Universe::Type), Ty::Boolean]);
        let err = check_instance_arg_shape(&arg, &tps(&["A"]), sable_ast::span(0, 0))
            .expect_err("half concrete");
        assert!(err.message().contains("bad instance argument shape"));
    }

    #[test]
    fn identical_concrete_arguments_overlap() {
        assert!(overlaps(&Ty::Boolean, &Ty::Boolean));
        assert!(!overlaps(&Ty::Boolean, &Ty::Unit));
    }

    #[test]
    fn a_variable_overlaps_anything() {
        let generic = named("List", vec![var("T", Universe::Type)]);
        let concrete = named("List", vec![Ty::Boolean]);
        assert!(overlaps(&generic, &concrete));
        assert!(overlaps(&concrete, &generic));
    }

    #[test]
    fn distinct_heads_do_not_overlap() {
        let a = named("List", vec![Ty::Boolean]);
        let b = named("Set", vec![Ty::Boolean]);
        assert!(!overlaps(&a, &b));
    }

    #[test]
    fn matching_binds_variables_consistently() {
        let pattern = named(
            "Pair",
            vec![var("T", Universe::Type), var("T", Universe::Type)],
        );
        let same = named("Pair", vec![Ty::Boolean, Ty::Boolean]);
        let differ = named("Pair", vec![Ty::Boolean, Ty::Unit]);
        let mut subst = HashMap::new();
        assert!(match_ty(&pattern, &same, &mut subst));
        let mut subst = HashMap::new();
        assert!(!match_ty(&pattern, &differ, &mut subst));
    }
}
