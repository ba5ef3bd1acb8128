#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use sable_ast::ModuleName;

use crate::error::{DeclarationError, ErrorText, InternalError};

/// A declaration's fully qualified name: the module it was declared in plus
/// its original name there.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualName {
    pub module: ModuleName,
    pub name: String,
}

impl QualName {
    pub fn new(module: ModuleName, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// A qualified identifier as seen from a referring scope. The local name
/// differs from the original only under renaming imports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualIdent {
    pub name: QualName,
    pub local: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Universe {
    Free,
    Linear,
    Type,
    Region,
}

impl Universe {
    pub fn display(&self) -> &'static str {
        match self {
            Universe::Free => "Free",
            Universe::Linear => "Linear",
            Universe::Type => "Type",
            Universe::Region => "Region",
        }
    }
}

/// `Free` subsumes `Free` only; `Linear` subsumes `Linear` only; `Type`
/// matches any universe (generic parameter binding); exact equality
/// otherwise.
pub fn universe_compatible(expected: Universe, actual: Universe) -> bool {
    match expected {
        Universe::Type => true,
        other => other == actual,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signedness {
    Signed,
    Unsigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

impl IntWidth {
    pub fn bits(&self) -> u32 {
        match self {
            IntWidth::W8 => 8,
            IntWidth::W16 => 16,
            IntWidth::W32 => 32,
            IntWidth::W64 => 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl RegionId {
    /// The region all stripped types share after erasure.
    pub const ERASED: RegionId = RegionId(0);
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TyVar {
    pub name: String,
    pub universe: Universe,
    /// Name of the declaration that introduced the parameter.
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    Unit,
    Boolean,
    Integer(Signedness, IntWidth),
    SingleFloat,
    DoubleFloat,
    Array {
        elem: Box<Ty>,
        region: Box<Ty>,
    },
    Named {
        name: QualName,
        args: Vec<Ty>,
        /// Universe the declaration was written in. `Type` means the
        /// effective universe floats with the arguments.
        declared: Universe,
        /// Effective universe per the computation rule.
        universe: Universe,
    },
    Region(RegionId),
    ReadRef {
        referent: Box<Ty>,
        region: Box<Ty>,
    },
    WriteRef {
        referent: Box<Ty>,
        region: Box<Ty>,
    },
    /// Only within unsafe modules.
    RawPointer {
        pointee: Box<Ty>,
    },
    Var(TyVar),
}

impl Ty {
    /// The effective universe. For named types the value is fixed at
    /// construction time by `effective_universe`; regions and references
    /// are always Free.
    pub fn universe(&self) -> Universe {
        match self {
            Ty::Unit
            | Ty::Boolean
            | Ty::Integer(_, _)
            | Ty::SingleFloat
            | Ty::DoubleFloat
            | Ty::Array { .. }
            | Ty::Region(_)
            | Ty::ReadRef { .. }
            | Ty::WriteRef { .. }
            | Ty::RawPointer { .. } => Universe::Free,
            Ty::Named { universe, .. } => *universe,
            Ty::Var(v) => v.universe,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Ty::Integer(_, _) | Ty::SingleFloat | Ty::DoubleFloat
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Ty::Integer(_, _))
    }

    pub fn contains_var(&self) -> bool {
        match self {
            Ty::Unit
            | Ty::Boolean
            | Ty::Integer(_, _)
            | Ty::SingleFloat
            | Ty::DoubleFloat
            | Ty::Region(_) => false,
            Ty::Array { elem, region } => elem.contains_var() || region.contains_var(),
            Ty::Named { args, .. } => args.iter().any(Ty::contains_var),
            Ty::ReadRef { referent, region } | Ty::WriteRef { referent, region } => {
                referent.contains_var() || region.contains_var()
            }
            Ty::RawPointer { pointee } => pointee.contains_var(),
            Ty::Var(_) => true,
        }
    }

    /// True when the type mentions the given region anywhere. Used by the
    /// reference-escape check at borrow scope exit.
    pub fn mentions_region(&self, region: RegionId) -> bool {
        match self {
            Ty::Unit
            | Ty::Boolean
            | Ty::Integer(_, _)
            | Ty::SingleFloat
            | Ty::DoubleFloat
            | Ty::Var(_) => false,
            Ty::Region(r) => *r == region,
            Ty::Array { elem, region: r } => {
                elem.mentions_region(region) || r.mentions_region(region)
            }
            Ty::Named { args, .. } => args.iter().any(|a| a.mentions_region(region)),
            Ty::ReadRef { referent, region: r } | Ty::WriteRef { referent, region: r } => {
                referent.mentions_region(region) || r.mentions_region(region)
            }
            Ty::RawPointer { pointee } => pointee.mentions_region(region),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => f.write_str("Unit"),
            Ty::Boolean => f.write_str("Boolean"),
            Ty::Integer(Signedness::Signed, w) => write!(f, "Integer{}", w.bits()),
            Ty::Integer(Signedness::Unsigned, w) => write!(f, "Natural{}", w.bits()),
            Ty::SingleFloat => f.write_str("SingleFloat"),
            Ty::DoubleFloat => f.write_str("DoubleFloat"),
            Ty::Array { elem, region } => write!(f, "Array[{elem}, {region}]"),
            Ty::Named { name, args, .. } => {
                write!(f, "{}", name.name)?;
                if !args.is_empty() {
                    f.write_str("[")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{a}")?;
                    }
                    f.write_str("]")?;
                }
                Ok(())
            }
            Ty::Region(r) => write!(f, "Region#{}", r.0),
            Ty::ReadRef { referent, region } => write!(f, "&[{referent}, {region}]"),
            Ty::WriteRef { referent, region } => write!(f, "&![{referent}, {region}]"),
            Ty::RawPointer { pointee } => write!(f, "Pointer[{pointee}]"),
            Ty::Var(v) => f.write_str(&v.name),
        }
    }
}

/// The effective universe of a named type: a declaration in a concrete
/// universe keeps it; a declaration in the Type universe is Linear when any
/// argument is Linear, else Free.
pub fn effective_universe(declared: Universe, args: &[Ty]) -> Universe {
    match declared {
        Universe::Type => {
            if args.iter().any(|a| a.universe() == Universe::Linear) {
                Universe::Linear
            } else {
                Universe::Free
            }
        }
        other => other,
    }
}

/// A formal type parameter of a declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeParam {
    pub name: String,
    pub universe: Universe,
    /// Name of the declaration that introduced the parameter.
    pub source: String,
    pub constraints: Vec<QualName>,
}

impl TypeParam {
    pub fn to_var(&self) -> Ty {
        Ty::Var(TyVar {
            name: self.name.clone(),
            universe: self.universe,
            source: self.source.clone(),
        })
    }
}

/// An ordered collection of type parameters with unique names. Order is
/// observable: it defines the positional correspondence between formals and
/// type arguments at use sites.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeParams {
    params: Vec<TypeParam>,
}

impl TypeParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: TypeParam) -> Result<(), DeclarationError> {
        if self.params.iter().any(|p| p.name == param.name) {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("duplicate type parameter ")
                    .code(&param.name),
                span: None,
            });
        }
        self.params.push(param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TypeParam> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeParam> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Replace type variables by name. Variables with no mapping are left in
/// place (they belong to an enclosing generic).
pub fn substitute_ty(ty: &Ty, subst: &HashMap<String, Ty>) -> Ty {
    match ty {
        Ty::Unit
        | Ty::Boolean
        | Ty::Integer(_, _)
        | Ty::SingleFloat
        | Ty::DoubleFloat
        | Ty::Region(_) => ty.clone(),
        Ty::Array { elem, region } => Ty::Array {
            elem: Box::new(substitute_ty(elem, subst)),
            region: Box::new(substitute_ty(region, subst)),
        },
        Ty::Named {
            name,
            args,
            declared,
            universe: _,
        } => {
            let args: Vec<Ty> = args.iter().map(|a| substitute_ty(a, subst)).collect();
            // A concrete declared universe is fixed; only Type-universe
            // declarations float with their arguments.
            Ty::Named {
                name: name.clone(),
                universe: effective_universe(*declared, &args),
                declared: *declared,
                args,
            }
        }
        Ty::ReadRef { referent, region } => Ty::ReadRef {
            referent: Box::new(substitute_ty(referent, subst)),
            region: Box::new(substitute_ty(region, subst)),
        },
        Ty::WriteRef { referent, region } => Ty::WriteRef {
            referent: Box::new(substitute_ty(referent, subst)),
            region: Box::new(substitute_ty(region, subst)),
        },
        Ty::RawPointer { pointee } => Ty::RawPointer {
            pointee: Box::new(substitute_ty(pointee, subst)),
        },
        Ty::Var(v) => subst.get(&v.name).cloned().unwrap_or_else(|| ty.clone()),
    }
}

/// Region erasure. Replaces every region component with the erased region
/// and rejects types that should not survive to monomorphization.
pub fn strip_ty(ty: &Ty) -> Result<Ty, InternalError> {
    match ty {
        Ty::Unit
        | Ty::Boolean
        | Ty::Integer(_, _)
        | Ty::SingleFloat
        | Ty::DoubleFloat => Ok(ty.clone()),
        Ty::Array { elem, .. } => Ok(Ty::Array {
            elem: Box::new(strip_ty(elem)?),
            region: Box::new(Ty::Region(RegionId::ERASED)),
        }),
        // Region arguments of a named type erase in place so the argument
        // list stays aligned with the declaration's typarams.
        Ty::Named {
            name,
            args,
            declared,
            universe,
        } => {
            let mut stripped = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    Ty::Region(_) => stripped.push(Ty::Region(RegionId::ERASED)),
                    Ty::Var(v) if v.universe == Universe::Region => {
                        stripped.push(Ty::Region(RegionId::ERASED))
                    }
                    other => stripped.push(strip_ty(other)?),
                }
            }
            Ok(Ty::Named {
                name: name.clone(),
                args: stripped,
                declared: *declared,
                universe: *universe,
            })
        }
        Ty::Region(_) => Err(InternalError {
            message: ErrorText::new().text("region type in a value position during stripping"),
            span: None,
        }),
        Ty::ReadRef { referent, .. } => Ok(Ty::ReadRef {
            referent: Box::new(strip_ty(referent)?),
            region: Box::new(Ty::Region(RegionId::ERASED)),
        }),
        Ty::WriteRef { referent, .. } => Ok(Ty::WriteRef {
            referent: Box::new(strip_ty(referent)?),
            region: Box::new(Ty::Region(RegionId::ERASED)),
        }),
        Ty::RawPointer { pointee } => Ok(Ty::RawPointer {
            pointee: Box::new(strip_ty(pointee)?),
        }),
        Ty::Var(v) => Err(InternalError {
            message: ErrorText::new()
                .text("type variable ")
                .code(&v.name)
                .text(" survived substitution during stripping"),
            span: None,
        }),
    }
}

/// Strip a type-argument tuple: regions are dropped entirely, everything
/// else is stripped in place.
pub fn strip_type_args(args: &[Ty]) -> Result<Vec<Ty>, InternalError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Ty::Region(_) => {}
            Ty::Var(v) if v.universe == Universe::Region => {}
            other => out.push(strip_ty(other)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, args: Vec<Ty>, universe: Universe) -> Ty {
        Ty::Named {
            name: QualName::new(ModuleName::new("Test"), name),
            args,
            declared: universe,
            universe,
        }
    }

    fn type_var(name: &str) -> Ty {
        Ty::Var(TyVar {
            name: name.to_string(),
            universe: Universe::Type,
            source: "Test".to_string(),
        })
    }

    #[test]
    fn effective_universe_of_concrete_decls_is_fixed() {
        assert_eq!(effective_universe(Universe::Linear, &[]), Universe::Linear);
        assert_eq!(
            effective_universe(Universe::Free, &[named("R", vec![], Universe::Linear)]),
            Universe::Free
        );
    }

    #[test]
    fn effective_universe_of_type_decls_floats_with_args() {
        assert_eq!(effective_universe(Universe::Type, &[Ty::Boolean]), Universe::Free);
        assert_eq!(
            effective_universe(Universe::Type, &[named("R", vec![], Universe::Linear)]),
            Universe::Linear
        );
    }

    #[test]
    fn references_and_regions_are_free() {
        let r = Ty::ReadRef {
            referent: Box::new(named("R", vec![], Universe::Linear)),
            region: Box::new(Ty::Region(RegionId(7))),
        };
        assert_eq!(r.universe(), Universe::Free);
        assert_eq!(Ty::Region(RegionId(7)).universe(), Universe::Free);
    }

    #[test]
    fn universe_compatibility() {
        assert!(universe_compatible(Universe::Free, Universe::Free));
        assert!(universe_compatible(Universe::Linear, Universe::Linear));
        assert!(!universe_compatible(Universe::Free, Universe::Linear));
        assert!(!universe_compatible(Universe::Linear, Universe::Free));
        assert!(universe_compatible(Universe::Type, Universe::Linear));
        assert!(universe_compatible(Universe::Type, Universe::Free));
    }

    #[test]
    fn duplicate_typaram_is_rejected() {
        let mut tps = TypeParams::new();
        tps.insert(TypeParam {
            name: "T".to_string(),
            universe: Universe::Type,
            source: "F".to_string(),
            constraints: Vec::new(),
        })
        .expect("first insert");
        let err = tps
            .insert(TypeParam {
                name: "T".to_string(),
                universe: Universe::Free,
                source: "F".to_string(),
                constraints: Vec::new(),
            })
            .expect_err("duplicate");
        assert!(err.message.to_string().contains("duplicate type parameter"));
    }

    #[test]
    fn substitution_keeps_concrete_declared_universes_fixed() {
        // A phantom-typed Free handle stays Free even when its argument
        // resolves to a Linear type.
        let handle = Ty::Named {
            name: QualName::new(ModuleName::new("Test"), "Handle"),
            args: vec![type_var("T")],
            declared: Universe::Free,
            universe: Universe::Free,
        };
        let mut subst = HashMap::new();
        subst.insert("T".to_string(), named("R", vec![], Universe::Linear));
        let out = substitute_ty(&handle, &subst);
        assert_eq!(out.universe(), Universe::Free);
    }

    #[test]
    fn substitution_floats_type_declared_universes() {
        let option = Ty::Named {
            name: QualName::new(ModuleName::new("Test"), "Optional"),
            args: vec![type_var("T")],
            declared: Universe::Type,
            universe: Universe::Free,
        };
        let mut subst = HashMap::new();
        subst.insert("T".to_string(), named("R", vec![], Universe::Linear));
        let out = substitute_ty(&option, &subst);
        assert_eq!(out.universe(), Universe::Linear);

        let mut subst = HashMap::new();
        subst.insert("T".to_string(), Ty::Boolean);
        let out = substitute_ty(&option, &subst);
        assert_eq!(out.universe(), Universe::Free);
    }

    #[test]
    fn stripping_is_idempotent() {
        let t = Ty::Array {
            elem: Box::new(Ty::ReadRef {
                referent: Box::new(Ty::Boolean),
                region: Box::new(Ty::Region(RegionId(3))),
            }),
            region: Box::new(Ty::Region(RegionId(4))),
        };
        let once = strip_ty(&t).expect("strip");
        let twice = strip_ty(&once).expect("strip again");
        assert_eq!(once, twice);
    }

    #[test]
    fn stripping_preserves_universe() {
        let t = named(
            "Box",
            vec![named("R", vec![], Universe::Linear), Ty::Region(RegionId(9))],
            Universe::Linear,
        );
        let stripped = strip_ty(&t).expect("strip");
        assert_eq!(stripped.universe(), t.universe());
    }

    #[test]
    fn stripping_drops_region_args() {
        let args = vec![Ty::Boolean, Ty::Region(RegionId(2))];
        let stripped = strip_type_args(&args).expect("strip");
        assert_eq!(stripped, vec![Ty::Boolean]);
    }

    #[test]
    fn stripping_rejects_surviving_type_variables() {
        let t = Ty::Var(TyVar {
            name: "T".to_string(),
            universe: Universe::Type,
            source: "F".to_string(),
        });
        assert!(strip_ty(&t).is_err());
    }
}
