#![forbid(unsafe_code)]

mod emit;

pub use emit::{emit_program, CArtifacts, CBackendError};
