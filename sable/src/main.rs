#![forbid(unsafe_code)]

mod linker;
mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::Diagnostic;
use thiserror::Error;

use sable_core::{CompileError, EntryPoint, ModuleSource};

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(sable::cli))]
struct CliError {
    message: String,
}

fn cli_err(message: impl Into<String>) -> CliError {
    CliError {
        message: message.into(),
    }
}

#[derive(Parser)]
#[command(
    name = "sable",
    version,
    about = "Compiler for the Sable language",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information.
    Version,
    /// Whole-program compilation.
    Compile(CompileArgs),
}

#[derive(clap::Args)]
struct CompileArgs {
    /// Source modules: a path to `M.sb`, or a base path; `M.sbi` next to
    /// the body is picked up as the interface file. The bare word `help`
    /// prints compile usage instead.
    #[arg(required = true)]
    modules: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "typecheck")]
    target: Target,

    /// Output path: the executable or the generated C file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Entry function as `Module:Name`, of signature
    /// `(RootCapability) -> RootCapability` or `(RootCapability) -> ExitCode`.
    #[arg(long)]
    entrypoint: Option<String>,

    #[arg(long, value_enum, default_value = "plain")]
    error_format: ErrorFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    /// Stop after semantic analysis.
    Typecheck,
    /// Emit C and assemble it with the host C compiler.
    Executable,
    /// Emit standalone C.
    C,
}

#[derive(Clone, Copy, ValueEnum)]
enum ErrorFormat {
    Plain,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("sable {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        Command::Compile(args) => {
            // `sable compile help` prints compile usage, the way the
            // top-level help subcommand does for the driver itself.
            if args
                .modules
                .first()
                .is_some_and(|m| m.as_path() == Path::new("help"))
            {
                return print_compile_help();
            }
            match run_compile(&args) {
                Ok(()) => ExitCode::SUCCESS,
                Err(Failure::Compile(err)) => {
                    match args.error_format {
                        ErrorFormat::Plain => eprintln!("{}", report::render_plain(&err)),
                        ErrorFormat::Json => eprintln!("{}", report::render_json(&err)),
                    }
                    ExitCode::FAILURE
                }
                Err(Failure::Cli(err)) => {
                    eprintln!("error[CliError]: {err}");
                    ExitCode::from(2)
                }
                Err(Failure::Io(msg)) => {
                    eprintln!("error: {msg}");
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn print_compile_help() -> ExitCode {
    let mut cmd = Cli::command();
    let compile = cmd
        .find_subcommand_mut("compile")
        .expect("compile subcommand is declared");
    if compile.print_help().is_err() {
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

enum Failure {
    Compile(CompileError),
    Cli(CliError),
    Io(String),
}

impl From<CompileError> for Failure {
    fn from(e: CompileError) -> Self {
        Failure::Compile(e)
    }
}

impl From<CliError> for Failure {
    fn from(e: CliError) -> Self {
        Failure::Cli(e)
    }
}

fn run_compile(args: &CompileArgs) -> Result<(), Failure> {
    let sources = load_sources(&args.modules)?;
    let entry = args
        .entrypoint
        .as_deref()
        .map(parse_entrypoint)
        .transpose()?;

    match args.target {
        Target::Typecheck => {
            let checked = sable_core::check_program(&sources)?;
            println!("ok: {} module(s) type checked", checked.modules.len());
            Ok(())
        }
        Target::C => {
            let compiled = sable_core::compile_program(&sources, entry.as_ref())?;
            let artifacts = sable_backend_c::emit_program(&compiled.hir)
                .map_err(|e| Failure::Io(e.to_string()))?;
            let out = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("out.c"));
            write_artifacts(&out, &artifacts)?;
            println!("wrote {}", out.display());
            Ok(())
        }
        Target::Executable => {
            let entry = entry.ok_or_else(|| {
                cli_err("--entrypoint=Module:Name is required for --target=executable")
            })?;
            let compiled = sable_core::compile_program(&sources, Some(&entry))?;
            let artifacts = sable_backend_c::emit_program(&compiled.hir)
                .map_err(|e| Failure::Io(e.to_string()))?;

            let out_exe = args
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from("a.out"));
            let build_dir = out_exe
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."))
                .join(".sable-build");
            fs::create_dir_all(&build_dir)
                .map_err(|e| Failure::Io(format!("create {}: {e}", build_dir.display())))?;
            let module_c = build_dir.join("module.c");
            write_artifacts(&module_c, &artifacts)?;
            linker::compile_c(&module_c, &build_dir, &out_exe)
                .map_err(|e| Failure::Io(e.to_string()))?;
            println!("wrote {}", out_exe.display());
            Ok(())
        }
    }
}

fn write_artifacts(
    module_c: &Path,
    artifacts: &sable_backend_c::CArtifacts,
) -> Result<(), Failure> {
    let dir = module_c
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Failure::Io(format!("create {}: {e}", dir.display())))?;
    fs::write(module_c, &artifacts.module_c)
        .map_err(|e| Failure::Io(format!("write {}: {e}", module_c.display())))?;
    let runtime = dir.join("sable_runtime.h");
    fs::write(&runtime, &artifacts.runtime_h)
        .map_err(|e| Failure::Io(format!("write {}: {e}", runtime.display())))?;
    Ok(())
}

/// Resolve a module argument to its body (`.sb`) and optional interface
/// (`.sbi`) files.
fn load_sources(modules: &[PathBuf]) -> Result<Vec<ModuleSource>, Failure> {
    let mut out = Vec::new();
    for arg in modules {
        let body_path = if arg.extension().is_some_and(|e| e == "sb") {
            arg.clone()
        } else {
            arg.with_extension("sb")
        };
        let interface_path = body_path.with_extension("sbi");
        let body = fs::read_to_string(&body_path)
            .map_err(|e| Failure::Io(format!("read {}: {e}", body_path.display())))?;
        let interface = if interface_path.exists() {
            Some(fs::read_to_string(&interface_path).map_err(|e| {
                Failure::Io(format!("read {}: {e}", interface_path.display()))
            })?)
        } else {
            None
        };
        out.push(ModuleSource { interface, body });
    }
    Ok(out)
}

/// `Module:Name`
fn parse_entrypoint(text: &str) -> Result<EntryPoint, CliError> {
    let Some((module, name)) = text.split_once(':') else {
        return Err(cli_err(format!(
            "malformed entrypoint '{text}': expected Module:Name"
        )));
    };
    if module.is_empty() || name.is_empty() {
        return Err(cli_err(format!(
            "malformed entrypoint '{text}': expected Module:Name"
        )));
    }
    Ok(EntryPoint {
        module: sable_core::ModuleName::new(module),
        name: name.to_string(),
    })
}
