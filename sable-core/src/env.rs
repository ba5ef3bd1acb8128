#![forbid(unsafe_code)]

use std::collections::HashMap;

use sable_ast::{ModuleName, Span};

use crate::error::{DeclarationError, ErrorText, TypeError};
use crate::tast::TFunction;
use crate::types::{QualName, Ty, TypeParam, TypeParams, Universe};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonomorphId(pub u32);

/// Visibility of constants and functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Vis {
    Public,
    Private,
}

/// Visibility of type declarations. Opaque types expose a name but not
/// structure outside the declaring module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeVis {
    Public,
    Opaque,
    Private,
}

impl TypeVis {
    pub fn is_importable(&self) -> bool {
        matches!(self, TypeVis::Public | TypeVis::Opaque)
    }
}

#[derive(Clone, Debug)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub name: ModuleName,
    pub is_unsafe: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionCase {
    pub name: String,
    pub slots: Vec<Slot>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Ty,
}

#[derive(Clone, Debug)]
pub struct DeclRecord {
    pub id: DeclId,
    pub name: QualName,
    pub span: Span,
    pub kind: DeclKind,
}

#[derive(Clone, Debug)]
pub enum DeclKind {
    Constant {
        vis: Vis,
        ty: Ty,
    },
    Record {
        vis: TypeVis,
        typarams: TypeParams,
        universe: Universe,
        slots: Vec<Slot>,
    },
    Union {
        vis: TypeVis,
        typarams: TypeParams,
        universe: Universe,
        cases: Vec<UnionCase>,
    },
    Function {
        vis: Vis,
        typarams: TypeParams,
        params: Vec<Param>,
        ret: Ty,
    },
    Typeclass {
        vis: Vis,
        param: TypeParam,
        methods: Vec<MethodSig>,
    },
}

impl DeclKind {
    pub fn is_type(&self) -> bool {
        matches!(self, DeclKind::Record { .. } | DeclKind::Union { .. })
    }

    pub fn is_importable(&self) -> bool {
        match self {
            DeclKind::Constant { vis, .. } | DeclKind::Function { vis, .. } => {
                *vis == Vis::Public
            }
            DeclKind::Record { vis, .. } | DeclKind::Union { vis, .. } => vis.is_importable(),
            DeclKind::Typeclass { vis, .. } => *vis == Vis::Public,
        }
    }

    /// Typarams of a type or function declaration.
    pub fn typarams(&self) -> Option<&TypeParams> {
        match self {
            DeclKind::Record { typarams, .. }
            | DeclKind::Union { typarams, .. }
            | DeclKind::Function { typarams, .. } => Some(typarams),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub typeclass: DeclId,
    pub module: ModuleName,
    pub typarams: TypeParams,
    pub argument: Ty,
    pub span: Span,
}

/// Instantiation table: `(qualified name, stripped type arguments)` to a
/// monomorph id, first encounter wins.
#[derive(Clone, Debug, Default)]
pub struct MonomorphTable {
    entries: HashMap<(QualName, Vec<Ty>), MonomorphId>,
    order: Vec<(QualName, Vec<Ty>)>,
}

impl MonomorphTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for the tuple, allocating a fresh one on first
    /// encounter. The boolean is true when the entry is new.
    pub fn add_or_get(&mut self, name: QualName, args: Vec<Ty>) -> (MonomorphId, bool) {
        let key = (name, args);
        if let Some(id) = self.entries.get(&key) {
            return (*id, false);
        }
        let id = MonomorphId(self.order.len() as u32);
        self.entries.insert(key.clone(), id);
        self.order.push(key);
        (id, true)
    }

    pub fn get(&self, name: &QualName, args: &[Ty]) -> Option<MonomorphId> {
        self.entries
            .get(&(name.clone(), args.to_vec()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MonomorphId, &QualName, &[Ty])> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, (name, args))| (MonomorphId(i as u32), name, args.as_slice()))
    }
}

/// The process-wide declaration environment. Created empty, modules added
/// in topological import order, append-only afterwards except for the
/// monomorphization table.
#[derive(Debug, Default)]
pub struct Environment {
    modules: Vec<ModuleRecord>,
    module_ids: HashMap<ModuleName, ModuleId>,
    decls: Vec<DeclRecord>,
    decl_ids: HashMap<QualName, DeclId>,
    instances: Vec<InstanceRecord>,
    instances_by_class: HashMap<DeclId, Vec<InstanceId>>,
    /// Typed bodies, attached after stage E so monomorphization can
    /// instantiate generics on demand.
    function_bodies: HashMap<DeclId, TFunction>,
    method_bodies: HashMap<(InstanceId, String), TFunction>,
    pub mono: MonomorphTable,
}

pub const BUILTIN_MODULE: &str = "Sable.Builtin";

impl Environment {
    pub fn new() -> Self {
        let mut env = Self::default();
        env.install_builtins();
        env
    }

    fn install_builtins(&mut self) {
        let module = ModuleName::new(BUILTIN_MODULE);
        self.add_module(module.clone(), false)
            .expect("builtin module installs once");
        let span = sable_ast::span(0, 0);

        // The linear capability handed to Main, and the exit code Main may
        // return instead of threading it back.
        self.insert_decl(DeclRecord {
            id: DeclId(0),
            name: QualName::new(module.clone(), "RootCapability"),
            span,
            kind: DeclKind::Record {
                vis: TypeVis::Opaque,
                typarams: TypeParams::new(),
                universe: Universe::Linear,
                slots: Vec::new(),
            },
        })
        .expect("builtin RootCapability installs once");
        self.insert_decl(DeclRecord {
            id: DeclId(0),
            name: QualName::new(module.clone(), "ExitCode"),
            span,
            kind: DeclKind::Record {
                vis: TypeVis::Opaque,
                typarams: TypeParams::new(),
                universe: Universe::Free,
                // Opaque outside the builtin module; the backend reads it.
                slots: vec![Slot {
                    name: "code".to_string(),
                    ty: Ty::Integer(
                        crate::types::Signedness::Signed,
                        crate::types::IntWidth::W32,
                    ),
                }],
            },
        })
        .expect("builtin ExitCode installs once");

        let exit_code = Ty::Named {
            name: QualName::new(module.clone(), "ExitCode"),
            args: Vec::new(),
            declared: Universe::Free,
            universe: Universe::Free,
        };
        let root = Ty::Named {
            name: QualName::new(module.clone(), "RootCapability"),
            args: Vec::new(),
            declared: Universe::Linear,
            universe: Universe::Linear,
        };
        for (name, params, ret) in [
            ("ExitSuccess", Vec::new(), exit_code.clone()),
            ("ExitFailure", Vec::new(), exit_code),
            (
                "SurrenderRoot",
                vec![Param {
                    name: "root".to_string(),
                    ty: root,
                }],
                Ty::Unit,
            ),
        ] {
            self.insert_decl(DeclRecord {
                id: DeclId(0),
                name: QualName::new(module.clone(), name),
                span,
                kind: DeclKind::Function {
                    vis: Vis::Public,
                    typarams: TypeParams::new(),
                    params,
                    ret,
                },
            })
            .expect("builtin function installs once");
        }
    }

    pub fn add_module(
        &mut self,
        name: ModuleName,
        is_unsafe: bool,
    ) -> Result<ModuleId, DeclarationError> {
        if self.module_ids.contains_key(&name) {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("module ")
                    .code(name.as_str())
                    .text(" is already loaded"),
                span: None,
            });
        }
        let id = ModuleId(self.modules.len() as u32);
        self.modules.push(ModuleRecord {
            id,
            name: name.clone(),
            is_unsafe,
        });
        self.module_ids.insert(name, id);
        Ok(id)
    }

    pub fn has_module(&self, name: &ModuleName) -> bool {
        self.module_ids.contains_key(name)
    }

    pub fn module_is_unsafe(&self, name: &ModuleName) -> bool {
        self.module_ids
            .get(name)
            .map(|id| self.modules[id.0 as usize].is_unsafe)
            .unwrap_or(false)
    }

    /// Append a declaration. The record's id field is assigned here.
    pub fn insert_decl(&mut self, mut record: DeclRecord) -> Result<DeclId, DeclarationError> {
        if self.decl_ids.contains_key(&record.name) {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("duplicate declaration of ")
                    .code(&record.name.name),
                span: Some(record.span),
            });
        }
        let id = DeclId(self.decls.len() as u32);
        record.id = id;
        self.decl_ids.insert(record.name.clone(), id);
        self.decls.push(record);
        Ok(id)
    }

    pub fn get_decl(&self, name: &QualName) -> Option<&DeclRecord> {
        self.decl_ids
            .get(name)
            .map(|id| &self.decls[id.0 as usize])
    }

    pub fn get_decl_by_id(&self, id: DeclId) -> &DeclRecord {
        &self.decls[id.0 as usize]
    }

    pub fn expect_decl(&self, name: &QualName, span: Span) -> Result<&DeclRecord, TypeError> {
        self.get_decl(name).ok_or_else(|| TypeError {
            message: ErrorText::new().text("unknown name ").code(name.to_string()),
            span: Some(span),
        })
    }

    pub fn decls_in_module<'a>(
        &'a self,
        module: &'a ModuleName,
    ) -> impl Iterator<Item = &'a DeclRecord> {
        self.decls.iter().filter(move |d| &d.name.module == module)
    }

    /// All typeclass declarations, for method-call resolution.
    pub fn typeclasses(&self) -> impl Iterator<Item = &DeclRecord> {
        self.decls
            .iter()
            .filter(|d| matches!(d.kind, DeclKind::Typeclass { .. }))
    }

    pub fn all_decls(&self) -> impl Iterator<Item = &DeclRecord> {
        self.decls.iter()
    }

    pub fn add_instance(&mut self, mut record: InstanceRecord) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        record.id = id;
        self.instances_by_class
            .entry(record.typeclass)
            .or_default()
            .push(id);
        self.instances.push(record);
        id
    }

    pub fn get_instance(&self, id: InstanceId) -> &InstanceRecord {
        &self.instances[id.0 as usize]
    }

    pub fn instances_of(&self, typeclass: DeclId) -> impl Iterator<Item = &InstanceRecord> {
        self.instances_by_class
            .get(&typeclass)
            .into_iter()
            .flatten()
            .map(|id| &self.instances[id.0 as usize])
    }

    pub fn attach_function_body(&mut self, decl: DeclId, body: TFunction) {
        self.function_bodies.insert(decl, body);
    }

    pub fn function_body(&self, decl: DeclId) -> Option<&TFunction> {
        self.function_bodies.get(&decl)
    }

    pub fn attach_method_body(&mut self, instance: InstanceId, method: String, body: TFunction) {
        self.method_bodies.insert((instance, method), body);
    }

    pub fn method_body(&self, instance: InstanceId, method: &str) -> Option<&TFunction> {
        self.method_bodies.get(&(instance, method.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_preloaded() {
        let env = Environment::new();
        let root = QualName::new(ModuleName::new(BUILTIN_MODULE), "RootCapability");
        let decl = env.get_decl(&root).expect("RootCapability");
        match &decl.kind {
            DeclKind::Record { universe, .. } => assert_eq!(*universe, Universe::Linear),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn duplicate_decl_is_rejected() {
        let mut env = Environment::new();
        let m = ModuleName::new("M");
        env.add_module(m.clone(), false).expect("module");
        let record = DeclRecord {
            id: DeclId(0),
            name: QualName::new(m, "x"),
            span: sable_ast::span(0, 0),
            kind: DeclKind::Constant {
                vis: Vis::Public,
                ty: Ty::Boolean,
            },
        };
        env.insert_decl(record.clone()).expect("first insert");
        assert!(env.insert_decl(record).is_err());
    }

    #[test]
    fn monomorph_table_reuses_ids() {
        let mut table = MonomorphTable::new();
        let name = QualName::new(ModuleName::new("M"), "f");
        let (a, fresh_a) = table.add_or_get(name.clone(), vec![Ty::Boolean]);
        let (b, fresh_b) = table.add_or_get(name.clone(), vec![Ty::Boolean]);
        let (c, _) = table.add_or_get(name, vec![Ty::Unit]);
        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
