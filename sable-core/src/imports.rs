#![forbid(unsafe_code)]

use std::collections::HashMap;

use sable_ast::{ImportDecl, ModuleName};

use crate::env::{Environment, BUILTIN_MODULE};
use crate::error::{CompileError, DeclarationError, ErrorText};
use crate::types::{QualIdent, QualName};

/// Stage A output: local name to qualified identifier, for one module.
#[derive(Clone, Debug)]
pub struct ImportMap {
    module: ModuleName,
    map: HashMap<String, QualIdent>,
}

impl ImportMap {
    pub fn new(module: ModuleName) -> Self {
        Self {
            module,
            map: HashMap::new(),
        }
    }

    pub fn module(&self) -> &ModuleName {
        &self.module
    }

    pub fn add(&mut self, qi: QualIdent) -> Result<(), DeclarationError> {
        if self.map.contains_key(&qi.local) {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("name ")
                    .code(&qi.local)
                    .text(" is imported more than once"),
                span: None,
            });
        }
        self.map.insert(qi.local.clone(), qi);
        Ok(())
    }

    pub fn get(&self, local: &str) -> Option<&QualIdent> {
        self.map.get(local)
    }

    /// Resolve a referenced identifier to a qualified name: an import if one
    /// exists, the current module otherwise. Whether the result actually
    /// names a declaration is the caller's lookup to make.
    pub fn qualify(&self, local: &str) -> QualName {
        match self.map.get(local) {
            Some(qi) => qi.name.clone(),
            None => QualName::new(self.module.clone(), local),
        }
    }

    /// Whether any import resolves to the given declaration.
    pub fn maps_target(&self, name: &QualName) -> bool {
        self.map.values().any(|qi| qi.name == *name)
    }
}

/// Build the import map for a module. Every module implicitly imports the
/// builtin module's public declarations.
pub fn resolve_imports(
    env: &Environment,
    module: &ModuleName,
    imports: &[ImportDecl],
) -> Result<ImportMap, CompileError> {
    let mut map = ImportMap::new(module.clone());

    let builtin = ModuleName::new(BUILTIN_MODULE);
    for decl in env.decls_in_module(&builtin) {
        if decl.kind.is_importable() {
            map.add(QualIdent {
                name: decl.name.clone(),
                local: decl.name.name.clone(),
            })
            .expect("builtin names are distinct");
        }
    }

    for import in imports {
        let source = &import.module.node;
        if !env.has_module(source) {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("import from unknown module ")
                    .code(source.as_str()),
                span: Some(import.span),
            }
            .into());
        }
        if source == module {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("module ")
                    .code(module.as_str())
                    .text(" cannot import from itself"),
                span: Some(import.span),
            }
            .into());
        }
        for sym in &import.names {
            let qual = QualName::new(source.clone(), sym.name.node.clone());
            let decl = env.get_decl(&qual).ok_or_else(|| DeclarationError {
                message: ErrorText::new()
                    .text("module ")
                    .code(source.as_str())
                    .text(" has no public declaration ")
                    .code(&sym.name.node),
                span: Some(sym.span),
            })?;
            if !decl.kind.is_importable() {
                return Err(DeclarationError {
                    message: ErrorText::new()
                        .text("declaration ")
                        .code(&sym.name.node)
                        .text(" in module ")
                        .code(source.as_str())
                        .text(" is private"),
                    span: Some(sym.span),
                }
                .into());
            }
            let local = sym
                .rename
                .as_ref()
                .map(|r| r.node.clone())
                .unwrap_or_else(|| sym.name.node.clone());
            map.add(QualIdent { name: qual, local }).map_err(|e| {
                CompileError::Declaration(DeclarationError {
                    message: e.message,
                    span: Some(sym.span),
                })
            })?;
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{DeclKind, DeclRecord, Vis};
    use crate::types::Ty;
    use sable_ast::Spanned;

    fn import(module: &str, name: &str, rename: Option<&str>) -> ImportDecl {
        let s = sable_ast::span(0, 0);
        ImportDecl {
            span: s,
            module: Spanned::new(s, ModuleName::new(module)),
            names: vec![sable_ast::ImportedSymbol {
                span: s,
                name: Spanned::new(s, name.to_string()),
                rename: rename.map(|r| Spanned::new(s, r.to_string())),
            }],
        }
    }

    fn env_with_constant(module: &str, name: &str) -> Environment {
        let mut env = Environment::new();
        let m = ModuleName::new(module);
        env.add_module(m.clone(), false).expect("module");
        env.insert_decl(DeclRecord {
            id: crate::env::DeclId(0),
            name: QualName::new(m, name),
            span: sable_ast::span(0, 0),
            kind: DeclKind::Constant {
                vis: Vis::Public,
                ty: Ty::Boolean,
            },
        })
        .expect("decl");
        env
    }

    #[test]
    fn renaming_import_keeps_the_original_name() {
        let env = env_with_constant("A", "x");
        let here = ModuleName::new("B");
        let map =
            resolve_imports(&env, &here, &[import("A", "x", Some("y"))]).expect("imports");
        let qi = map.get("y").expect("renamed entry");
        assert_eq!(qi.name, QualName::new(ModuleName::new("A"), "x"));
        assert_eq!(qi.local, "y");
        assert!(map.get("x").is_none());
    }

    #[test]
    fn unknown_module_is_a_declaration_error() {
        let env = Environment::new();
        let here = ModuleName::new("B");
        let err = resolve_imports(&env, &here, &[import("Nope", "x", None)])
            .expect_err("unknown module");
        assert!(err.message().contains("unknown module"));
    }

    #[test]
    fn duplicate_local_name_is_rejected() {
        let mut env = env_with_constant("A", "x");
        let c = ModuleName::new("C");
        env.add_module(c.clone(), false).expect("module");
        env.insert_decl(DeclRecord {
            id: crate::env::DeclId(0),
            name: QualName::new(c, "x"),
            span: sable_ast::span(0, 0),
            kind: DeclKind::Constant {
                vis: Vis::Public,
                ty: Ty::Boolean,
            },
        })
        .expect("decl");

        let here = ModuleName::new("B");
        let err = resolve_imports(
            &env,
            &here,
            &[import("A", "x", None), import("C", "x", None)],
        )
        .expect_err("duplicate import");
        assert!(err.message().contains("imported more than once"));
    }

    #[test]
    fn unqualified_names_fall_back_to_the_current_module() {
        let env = Environment::new();
        let here = ModuleName::new("B");
        let map = resolve_imports(&env, &here, &[]).expect("imports");
        assert_eq!(map.qualify("local"), QualName::new(here, "local"));
    }
}
