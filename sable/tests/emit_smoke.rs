use std::fs;

use sable_core::{compile_program, EntryPoint, ModuleName, ModuleSource};

fn entry() -> EntryPoint {
    EntryPoint {
        module: ModuleName::new("App"),
        name: "Main".to_string(),
    }
}

#[test]
fn a_whole_program_lowers_and_emits_c() {
    let src = r#"
module body App is
  record R : Linear is
    x : Integer32;
  end;

  function Consume(r : R) : Integer32 is
    let { x } := r;
    return x;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    let n : Integer32 := Consume(r);
    return root;
  end;
end module body.
"#;
    let compiled =
        compile_program(&[ModuleSource::body_only(src)], Some(&entry())).expect("compiles");
    let artifacts = sable_backend_c::emit_program(&compiled.hir).expect("emits");

    assert!(artifacts.module_c.contains("struct App__R {"));
    assert!(artifacts.module_c.contains("App__Main"));
    assert!(artifacts.module_c.contains("App__Consume"));
    assert!(artifacts.module_c.contains("int main(void) {"));
    assert!(artifacts.module_c.contains("Sable_Builtin__RootCapability root = {0};"));

    // The artifacts land on disk the way the driver writes them.
    let dir = tempfile::tempdir().expect("tempdir");
    let c_path = dir.path().join("module.c");
    fs::write(&c_path, &artifacts.module_c).expect("write module.c");
    fs::write(dir.path().join("sable_runtime.h"), &artifacts.runtime_h)
        .expect("write runtime header");
    assert!(c_path.exists());
}

#[test]
fn an_exit_code_entrypoint_returns_through_the_shim() {
    let src = r#"
module body App is
  function Main(root : RootCapability) : ExitCode is
    SurrenderRoot(root);
    return ExitSuccess();
  end;
end module body.
"#;
    let compiled =
        compile_program(&[ModuleSource::body_only(src)], Some(&entry())).expect("compiles");
    let artifacts = sable_backend_c::emit_program(&compiled.hir).expect("emits");
    assert!(artifacts.module_c.contains("return App__Main(root).code;"));
    assert!(artifacts.module_c.contains("Sable_Builtin__ExitSuccess"));
}

#[test]
fn an_invalid_entrypoint_signature_is_rejected() {
    let src = r#"
module body App is
  function Main(n : Integer32) : Integer32 is
    return n;
  end;
end module body.
"#;
    let err = compile_program(&[ModuleSource::body_only(src)], Some(&entry()))
        .expect_err("wrong signature");
    assert!(
        err.message().contains("entrypoint"),
        "got: {}",
        err.message()
    );
}

#[test]
fn generic_functions_emit_one_definition_per_instantiation() {
    let src = r#"
module body App is
  function Identity[T : Type](x : T) : T is
    return x;
  end;

  function Main(root : RootCapability) : RootCapability is
    let a : Integer32 := Identity(1);
    let b : Boolean := Identity(true);
    return root;
  end;
end module body.
"#;
    let compiled =
        compile_program(&[ModuleSource::body_only(src)], Some(&entry())).expect("compiles");
    let artifacts = sable_backend_c::emit_program(&compiled.hir).expect("emits");
    let count = artifacts.module_c.matches("App__Identity__m").count();
    // Two instantiations, each appearing in prototype, definition, and
    // call site.
    assert!(count >= 4, "expected several mangled occurrences, got {count}");
}
