use sable_core::{check_program, check_source, CompileError, ModuleSource};

fn expect_type_error(src: &str) -> CompileError {
    let err = check_source(src).expect_err("expected a type error");
    assert!(
        matches!(err, CompileError::Type(_)),
        "expected TypeError, got {}: {}",
        err.kind(),
        err.message()
    );
    err
}

#[test]
fn unknown_types_are_reported() {
    let src = r#"
module body M is
  function F(x : Mystery) : Unit is
    return nil;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("unknown type");
    assert!(err.message().contains("unknown type"), "got: {}", err.message());
}

#[test]
fn let_annotations_are_enforced() {
    let src = r#"
module body M is
  function Main(root : RootCapability) : RootCapability is
    let b : Boolean := 1;
    return root;
  end;
end module body.
"#;
    let err = expect_type_error(src);
    assert!(err.message().contains("Boolean"), "got: {}", err.message());
}

#[test]
fn arithmetic_requires_matching_scalar_operands() {
    let src = r#"
module body M is
  function F(a : Integer32, b : Integer64) : Integer32 is
    return a + b;
  end;
end module body.
"#;
    let err = expect_type_error(src);
    assert!(
        err.message().contains("Integer32") && err.message().contains("Integer64"),
        "got: {}",
        err.message()
    );
}

#[test]
fn return_types_are_enforced() {
    let src = r#"
module body M is
  function F(x : Integer32) : Boolean is
    return x;
  end;
end module body.
"#;
    expect_type_error(src);
}

#[test]
fn every_union_case_must_be_covered() {
    let src = r#"
module body M is
  union Shade : Free is
    case Light;
    case Dark;
  end;

  function F(s : Shade) : Unit is
    case s of
      when Light do
        skip;
    end case;
    return nil;
  end;
end module body.
"#;
    let err = expect_type_error(src);
    assert!(err.message().contains("not covered"), "got: {}", err.message());
}

#[test]
fn unknown_cases_are_rejected() {
    let src = r#"
module body M is
  union Shade : Free is
    case Light;
    case Dark;
  end;

  function F(s : Shade) : Unit is
    case s of
      when Light do
        skip;
      when Midnight do
        skip;
    end case;
    return nil;
  end;
end module body.
"#;
    let err = expect_type_error(src);
    assert!(err.message().contains("no case"), "got: {}", err.message());
}

#[test]
fn missing_return_paths_are_rejected() {
    let src = r#"
module body M is
  function F(x : Integer32) : Integer32 is
    if x > 0 then
      return x;
    else
      skip;
    end if;
  end;
end module body.
"#;
    let err = expect_type_error(src);
    assert!(
        err.message().contains("without returning"),
        "got: {}",
        err.message()
    );
}

#[test]
fn opaque_types_cannot_be_constructed_outside_their_module() {
    let provider_interface = r#"
module Vault is
  type Token : Linear;
  function MakeToken(id : Integer32) : Token;
  function BurnToken(t : Token) : Unit;
end module.
"#;
    let provider_body = r#"
module body Vault is
  record Token : Linear is
    id : Integer32;
  end;

  function MakeToken(id : Integer32) : Token is
    return Token(id => id);
  end;

  function BurnToken(t : Token) : Unit is
    let { id } := t;
    return nil;
  end;
end module body.
"#;
    let consumer_ok = r#"
module body App is
  import Vault (Token, MakeToken, BurnToken);

  function Main(root : RootCapability) : RootCapability is
    let t : Token := MakeToken(7);
    BurnToken(t);
    return root;
  end;
end module body.
"#;
    check_program(&[
        ModuleSource::pair(provider_interface, provider_body),
        ModuleSource::body_only(consumer_ok),
    ])
    .expect("opaque types flow through their public operations");

    let consumer_bad = r#"
module body App is
  import Vault (Token);

  function Main(root : RootCapability) : RootCapability is
    let t : Token := Token(id => 7);
    discard t;
    return root;
  end;
end module body.
"#;
    let err = check_program(&[
        ModuleSource::pair(provider_interface, provider_body),
        ModuleSource::body_only(consumer_bad),
    ])
    .expect_err("constructing an opaque type outside its module");
    assert!(
        err.message().contains("opaque"),
        "got: {}",
        err.message()
    );
}

#[test]
fn raw_pointers_are_gated_on_the_unsafe_pragma() {
    let safe = r#"
module body M is
  function Id(p : Pointer[Integer32]) : Pointer[Integer32] is
    return p;
  end;
end module body.
"#;
    let err = check_source(safe).expect_err("pointer in a safe module");
    assert!(err.message().contains("unsafe module"), "got: {}", err.message());

    let unsafe_src = r#"
module body M is
  pragma Unsafe_Module;

  function Id(p : Pointer[Integer32]) : Pointer[Integer32] is
    return p;
  end;
end module body.
"#;
    check_source(unsafe_src).expect("pointer in an unsafe module");
}

#[test]
fn private_declarations_do_not_import() {
    let provider_interface = r#"
module Util is
  function Visible(x : Integer32) : Integer32;
end module.
"#;
    let provider_body = r#"
module body Util is
  function Visible(x : Integer32) : Integer32 is
    return Hidden(x);
  end;

  function Hidden(x : Integer32) : Integer32 is
    return x + 1;
  end;
end module body.
"#;
    let consumer = r#"
module body App is
  import Util (Hidden);

  function Main(root : RootCapability) : RootCapability is
    return root;
  end;
end module body.
"#;
    let err = check_program(&[
        ModuleSource::pair(provider_interface, provider_body),
        ModuleSource::body_only(consumer),
    ])
    .expect_err("importing a private function");
    assert!(
        matches!(err, CompileError::Declaration(_)),
        "expected DeclarationError, got {}",
        err.kind()
    );
}
