#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("linker error: {message}")]
#[diagnostic(code(sable::linker))]
pub struct LinkerError {
    pub message: String,
}

/// Locate a host C compiler: $CC, then cc/gcc/clang on PATH.
pub fn find_cc() -> Option<PathBuf> {
    if let Some(cc) = std::env::var_os("CC") {
        let p = PathBuf::from(cc);
        if works(&p) {
            return Some(p);
        }
    }
    for candidate in ["cc", "gcc", "clang"] {
        let p = PathBuf::from(candidate);
        if works(&p) {
            return Some(p);
        }
    }
    None
}

fn works(cc: &Path) -> bool {
    Command::new(cc)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Assemble the emitted C into an executable.
pub fn compile_c(module_c: &Path, include_dir: &Path, out_exe: &Path) -> Result<(), LinkerError> {
    let cc = find_cc().ok_or_else(|| LinkerError {
        message: "could not locate a C compiler (set CC or install cc/gcc/clang)".to_string(),
    })?;

    let mut cmd = Command::new(&cc);
    cmd.arg(module_c)
        .arg(format!("-I{}", include_dir.display()))
        .arg("-std=c11")
        .arg("-O2")
        .arg("-o")
        .arg(out_exe);

    let out = cmd.output().map_err(|e| LinkerError {
        message: format!("failed to run {}: {e}", cc.display()),
    })?;

    if !out.status.success() {
        let stdout = String::from_utf8_lossy(&out.stdout);
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(LinkerError {
            message: format!(
                "C compiler failed (exit {})\nstdout:\n{}\nstderr:\n{}",
                out.status, stdout, stderr
            ),
        });
    }
    Ok(())
}
