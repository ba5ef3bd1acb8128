#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use sable_ast::ModuleName;

use crate::combine::{combine, combine_body_only, CombinedModule};
use crate::env::{DeclKind, Environment, BUILTIN_MODULE};
use crate::error::{CompileError, DeclarationError, ErrorText, TypeError};
use crate::extract::extract;
use crate::linearity::check_module_linearity;
use crate::lower::lower_program;
use crate::mono::monomorphize;
use crate::tast::TypedModule;
use crate::typecheck::typecheck_module;
use crate::types::{QualName, Ty, Universe};

/// Source text for one module: a body file and an optional interface file.
#[derive(Clone, Debug)]
pub struct ModuleSource {
    pub interface: Option<String>,
    pub body: String,
}

impl ModuleSource {
    pub fn body_only(body: impl Into<String>) -> Self {
        Self {
            interface: None,
            body: body.into(),
        }
    }

    pub fn pair(interface: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            body: body.into(),
        }
    }
}

#[derive(Debug)]
pub struct CheckedProgram {
    pub env: Environment,
    pub modules: Vec<TypedModule>,
}

#[derive(Debug)]
pub struct CompiledProgram {
    pub env: Environment,
    pub hir: sable_hir::Program,
}

/// `module:identifier`, referring to a function of signature
/// `(RootCapability) -> RootCapability` or `(RootCapability) -> ExitCode`.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub module: ModuleName,
    pub name: String,
}

/// Run stages A through F over every module, in dependency order. Any
/// stage aborts the whole pipeline on the first error.
pub fn check_program(sources: &[ModuleSource]) -> Result<CheckedProgram, CompileError> {
    let mut combined = Vec::new();
    for source in sources {
        let body = sable_parse::parse_module_body(&source.body)?;
        let module = match &source.interface {
            Some(text) => {
                let interface = sable_parse::parse_interface(text)?;
                combine(&interface, &body)?
            }
            None => combine_body_only(&body)?,
        };
        combined.push(module);
    }

    let order = topological_order(&combined)?;
    let mut env = Environment::new();
    let mut modules = Vec::new();
    for idx in order {
        let module = &combined[idx];
        let extracted = extract(&mut env, module)?;
        let typed = typecheck_module(&mut env, module, &extracted)?;
        check_module_linearity(&typed)?;
        modules.push(typed);
    }
    Ok(CheckedProgram { env, modules })
}

/// Run the whole pipeline down to the target IR.
pub fn compile_program(
    sources: &[ModuleSource],
    entry: Option<&EntryPoint>,
) -> Result<CompiledProgram, CompileError> {
    let CheckedProgram { mut env, modules } = check_program(sources)?;
    let entry = entry
        .map(|e| validate_entrypoint(&env, e))
        .transpose()?;
    let mono = monomorphize(&mut env, &modules)?;
    let hir = lower_program(&env, &mono, entry)?;
    Ok(CompiledProgram { env, hir })
}

pub fn check_source(body: &str) -> Result<CheckedProgram, CompileError> {
    check_program(&[ModuleSource::body_only(body)])
}

pub fn check_pair(interface: &str, body: &str) -> Result<CheckedProgram, CompileError> {
    check_program(&[ModuleSource::pair(interface, body)])
}

fn builtin_named(name: &str, universe: Universe) -> Ty {
    Ty::Named {
        name: QualName::new(ModuleName::new(BUILTIN_MODULE), name),
        args: Vec::new(),
        declared: universe,
        universe,
    }
}

/// Returns the entry function's qualified name and whether it returns an
/// exit code rather than threading the root capability back.
pub fn validate_entrypoint(
    env: &Environment,
    entry: &EntryPoint,
) -> Result<(QualName, bool), CompileError> {
    let qual = QualName::new(entry.module.clone(), entry.name.clone());
    let decl = env.get_decl(&qual).ok_or_else(|| TypeError {
        message: ErrorText::new()
            .text("entrypoint ")
            .code(qual.to_string())
            .text(" is not declared"),
        span: None,
    })?;
    let DeclKind::Function {
        typarams,
        params,
        ret,
        ..
    } = &decl.kind
    else {
        return Err(TypeError {
            message: ErrorText::new()
                .text("entrypoint ")
                .code(qual.to_string())
                .text(" is not a function"),
            span: Some(decl.span),
        }
        .into());
    };
    let root = builtin_named("RootCapability", Universe::Linear);
    let exit_code = builtin_named("ExitCode", Universe::Free);
    let shape_ok = typarams.is_empty()
        && params.len() == 1
        && params[0].ty == root
        && (*ret == root || *ret == exit_code);
    if !shape_ok {
        return Err(TypeError {
            message: ErrorText::new()
                .text("entrypoint ")
                .code(qual.to_string())
                .text(" must have signature ")
                .code("(RootCapability) -> RootCapability")
                .text(" or ")
                .code("(RootCapability) -> ExitCode"),
            span: Some(decl.span),
        }
        .into());
    }
    Ok((qual, *ret == exit_code))
}

/// Kahn's algorithm over the import graph restricted to the modules being
/// compiled; a cycle is a declaration error.
fn topological_order(modules: &[CombinedModule]) -> Result<Vec<usize>, CompileError> {
    let mut by_name: HashMap<&ModuleName, usize> = HashMap::new();
    for (i, m) in modules.iter().enumerate() {
        if by_name.insert(&m.name, i).is_some() {
            return Err(DeclarationError {
                message: ErrorText::new()
                    .text("module ")
                    .code(m.name.as_str())
                    .text(" is given more than once"),
                span: Some(m.span),
            }
            .into());
        }
    }

    let mut deps: Vec<HashSet<usize>> = vec![HashSet::new(); modules.len()];
    for (i, m) in modules.iter().enumerate() {
        for import in m.interface_imports.iter().chain(m.body_imports.iter()) {
            if let Some(&j) = by_name.get(&import.module.node) {
                if j != i {
                    deps[i].insert(j);
                }
            }
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
    let mut in_degree: Vec<usize> = vec![0; modules.len()];
    for (i, ds) in deps.iter().enumerate() {
        in_degree[i] = ds.len();
        for &j in ds {
            dependents[j].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::new();
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &k in &dependents[i] {
            in_degree[k] -= 1;
            if in_degree[k] == 0 {
                queue.push_back(k);
            }
        }
    }
    if order.len() != modules.len() {
        let stuck = (0..modules.len())
            .find(|&i| in_degree[i] > 0)
            .expect("a cycle leaves a module with unsatisfied imports");
        return Err(DeclarationError {
            message: ErrorText::new()
                .text("circular imports involving module ")
                .code(modules[stuck].name.as_str()),
            span: Some(modules[stuck].span),
        }
        .into());
    }
    Ok(order)
}
