#![forbid(unsafe_code)]

mod combine;
mod env;
mod error;
mod extract;
mod imports;
mod instances;
mod linearity;
mod lower;
mod mono;
mod pipeline;
mod tast;
mod type_parse;
mod typecheck;
mod types;

pub use sable_ast::{span, span_between, ModuleName, Span};

pub use combine::{combine, combine_body_only, CombinedDecl, CombinedModule};
pub use env::{
    DeclId, DeclKind, DeclRecord, Environment, InstanceId, InstanceRecord, MethodSig, ModuleId,
    MonomorphId, MonomorphTable, Param, Slot, TypeVis, UnionCase, Vis, BUILTIN_MODULE,
};
pub use error::{
    CompileError, DeclarationError, ErrorText, Fragment, InstanceError, InternalError,
    LinearityError, TypeError,
};
pub use extract::{extract, ExtractedModule, ExtractedRef};
pub use imports::{resolve_imports, ImportMap};
pub use instances::{check_instance_arg_shape, check_overlap, find_instance, overlaps};
pub use linearity::check_module_linearity;
pub use lower::{lower_program, mangle};
pub use mono::{monomorphize, MonoConstant, MonoFunction, MonoProgram, MonoType, MonoTypeDef};
pub use pipeline::{
    check_pair, check_program, check_source, compile_program, validate_entrypoint,
    CheckedProgram, CompiledProgram, EntryPoint, ModuleSource,
};
pub use tast::{
    BindingId, BindingInfo, BindingTable, Substitution, TCaseArm, TConstant, TExpr, TExprKind,
    TFunction, TInstanceMethods, TParam, TPathElem, TPathElemKind, TSlotBinding, TStmt,
    TypedModule,
};
pub use type_parse::{parse_type, LocalTypeSig, RegionMap, TypeParseCtx};
pub use typecheck::typecheck_module;
pub use types::{
    effective_universe, strip_ty, strip_type_args, substitute_ty, universe_compatible, IntWidth,
    QualName, QualIdent, RegionId, Signedness, Ty, TyVar, TypeParam, TypeParams, Universe,
};
