use sable_core::{
    check_pair, check_source, CompileError, DeclKind, ModuleName, QualName, Signedness, Ty,
    TypeVis, Universe, Vis,
};

#[test]
fn module_name_mismatch_is_rejected() {
    let interface = r#"
module Foo is
end module.
"#;
    let body = r#"
module body Bar is
end module body.
"#;
    let err = check_pair(interface, body).expect_err("names differ");
    assert!(
        matches!(err, CompileError::Declaration(_)),
        "expected DeclarationError, got {}",
        err.kind()
    );
    assert!(
        err.message().contains("module name mismatch"),
        "got: {}",
        err.message()
    );
}

#[test]
fn multi_argument_typeclass_is_rejected() {
    let src = r#"
module body Scenario is
  typeclass Both(A : Free, B : Free) is
    method First(x : A) : Unit;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("two typeclass parameters");
    assert!(
        matches!(err, CompileError::Declaration(_)),
        "expected DeclarationError, got {}",
        err.kind()
    );
    assert!(
        err.message().contains("multi-argument typeclass"),
        "got: {}",
        err.message()
    );
}

#[test]
fn declaration_kind_mismatch_is_rejected() {
    let interface = r#"
module Foo is
  record Thing : Free is
    x : Integer32;
  end;
end module.
"#;
    let body = r#"
module body Foo is
  function Thing(x : Integer32) : Integer32 is
    return x;
  end;
end module body.
"#;
    let err = check_pair(interface, body).expect_err("record vs function");
    assert!(
        err.message().contains("declaration kind mismatch"),
        "got: {}",
        err.message()
    );
}

#[test]
fn missing_body_is_rejected() {
    let interface = r#"
module Foo is
  function Missing(x : Integer32) : Integer32;
end module.
"#;
    let body = r#"
module body Foo is
end module body.
"#;
    let err = check_pair(interface, body).expect_err("no definition");
    assert!(err.message().contains("missing body"), "got: {}", err.message());
}

#[test]
fn function_parameter_mismatch_reports_the_parameter_axis() {
    let interface = r#"
module Foo is
  function F(x : Integer32) : Integer32;
end module.
"#;
    let body = r#"
module body Foo is
  function F(x : Integer64) : Integer32 is
    return 0;
  end;
end module body.
"#;
    let err = check_pair(interface, body).expect_err("parameter types differ");
    assert!(
        err.message().contains("function parameter mismatch"),
        "got: {}",
        err.message()
    );
}

#[test]
fn universe_mismatch_is_rejected() {
    let interface = r#"
module Foo is
  record Token : Linear is
    id : Integer32;
  end;
end module.
"#;
    let body = r#"
module body Foo is
  record Token : Free is
    id : Integer32;
  end;
end module body.
"#;
    let err = check_pair(interface, body).expect_err("universes differ");
    assert!(
        err.message().contains("universe mismatch"),
        "got: {}",
        err.message()
    );
}

/// Combining followed by extraction yields the interface's declared
/// signatures exactly.
#[test]
fn combining_then_extraction_round_trips_the_interface() {
    let interface = r#"
module Foo is
  constant Limit : Integer32;
  record Pair : Free is
    first : Integer32;
    second : Integer32;
  end;
  type Token : Linear;
  function Double(x : Integer32) : Integer32;
end module.
"#;
    let body = r#"
module body Foo is
  constant Limit : Integer32 := 100;
  record Pair : Free is
    first : Integer32;
    second : Integer32;
  end;
  record Token : Linear is
    id : Integer32;
  end;
  function Double(x : Integer32) : Integer32 is
    return x + x;
  end;
  function MakeToken(id : Integer32) : Token is
    return Token(id => id);
  end;
end module body.
"#;
    let checked = check_pair(interface, body).expect("combines and checks");
    let env = &checked.env;
    let module = ModuleName::new("Foo");
    let i32 = Ty::Integer(Signedness::Signed, sable_core::IntWidth::W32);

    let limit = env
        .get_decl(&QualName::new(module.clone(), "Limit"))
        .expect("Limit");
    match &limit.kind {
        DeclKind::Constant { vis, ty } => {
            assert_eq!(*vis, Vis::Public);
            assert_eq!(*ty, i32);
        }
        other => panic!("Limit has kind {other:?}"),
    }

    let pair = env
        .get_decl(&QualName::new(module.clone(), "Pair"))
        .expect("Pair");
    match &pair.kind {
        DeclKind::Record {
            vis,
            universe,
            slots,
            ..
        } => {
            assert_eq!(*vis, TypeVis::Public);
            assert_eq!(*universe, Universe::Free);
            let names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, ["first", "second"]);
        }
        other => panic!("Pair has kind {other:?}"),
    }

    let token = env
        .get_decl(&QualName::new(module.clone(), "Token"))
        .expect("Token");
    match &token.kind {
        DeclKind::Record { vis, universe, .. } => {
            assert_eq!(*vis, TypeVis::Opaque);
            assert_eq!(*universe, Universe::Linear);
        }
        other => panic!("Token has kind {other:?}"),
    }

    let double = env
        .get_decl(&QualName::new(module.clone(), "Double"))
        .expect("Double");
    match &double.kind {
        DeclKind::Function {
            vis, params, ret, ..
        } => {
            assert_eq!(*vis, Vis::Public);
            assert_eq!(params.len(), 1);
            assert_eq!(params[0].ty, i32);
            assert_eq!(*ret, i32);
        }
        other => panic!("Double has kind {other:?}"),
    }

    // Body-only definitions come out private.
    let make = env
        .get_decl(&QualName::new(module, "MakeToken"))
        .expect("MakeToken");
    match &make.kind {
        DeclKind::Function { vis, .. } => assert_eq!(*vis, Vis::Private),
        other => panic!("MakeToken has kind {other:?}"),
    }
}

#[test]
fn renaming_imports_qualify_across_modules() {
    let provider = r#"
module Util is
  function Double(x : Integer32) : Integer32;
end module.
"#;
    let provider_body = r#"
module body Util is
  function Double(x : Integer32) : Integer32 is
    return x + x;
  end;
end module body.
"#;
    let consumer = r#"
module body App is
  import Util (Double as Twice);

  function Main(root : RootCapability) : RootCapability is
    let n : Integer32 := Twice(21);
    return root;
  end;
end module body.
"#;
    sable_core::check_program(&[
        sable_core::ModuleSource::pair(provider, provider_body),
        sable_core::ModuleSource::body_only(consumer),
    ])
    .expect("renamed import resolves");
}

#[test]
fn circular_imports_are_rejected() {
    let a = r#"
module body A is
  import B (Nothing);
end module body.
"#;
    let b = r#"
module body B is
  import A (Nothing);
end module body.
"#;
    let err = sable_core::check_program(&[
        sable_core::ModuleSource::body_only(a),
        sable_core::ModuleSource::body_only(b),
    ])
    .expect_err("cycle");
    assert!(
        err.message().contains("circular imports"),
        "got: {}",
        err.message()
    );
}
