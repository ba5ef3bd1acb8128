use sable_core::{check_source, CompileError};

#[test]
fn overlapping_instances_are_rejected() {
    let src = r#"
module body Scenario is
  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable(Integer32) is
    method Print(x : Integer32) : Unit is
      return nil;
    end;
  end;

  instance Printable(Integer32) is
    method Print(x : Integer32) : Unit is
      return nil;
    end;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("duplicate instance");
    assert!(
        matches!(err, CompileError::Instance(_)),
        "expected InstanceError, got {}",
        err.kind()
    );
    assert!(
        err.message().contains("overlapping instances"),
        "got: {}",
        err.message()
    );
}

#[test]
fn generic_instance_overlapping_a_concrete_one_is_rejected() {
    let src = r#"
module body Scenario is
  record Box[T : Free] : Free is
    value : T;
  end;

  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable(Box[Integer32]) is
    method Print(x : Box[Integer32]) : Unit is
      return nil;
    end;
  end;

  instance Printable[T : Free](Box[T]) is
    method Print(x : Box[T]) : Unit is
      return nil;
    end;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("generic overlaps concrete");
    assert!(
        err.message().contains("overlapping instances"),
        "got: {}",
        err.message()
    );
}

#[test]
fn a_half_concrete_instance_argument_is_a_bad_shape() {
    let src = r#"
module body Scenario is
  record Pair[A : Free, B : Free] : Free is
    first : A;
    second : B;
  end;

  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable[A : Free](Pair[A, Integer32]) is
    method Print(x : Pair[A, Integer32]) : Unit is
      return nil;
    end;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("half-concrete argument");
    assert!(
        err.message().contains("bad instance argument shape"),
        "got: {}",
        err.message()
    );
}

#[test]
fn an_instance_argument_outside_the_class_universe_is_rejected() {
    let src = r#"
module body Scenario is
  record Token : Linear is
    id : Integer32;
  end;

  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable(Token) is
    method Print(x : Token) : Unit is
      return nil;
    end;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("linear argument to a Free class");
    assert!(
        matches!(err, CompileError::Instance(_)),
        "expected InstanceError, got {}",
        err.kind()
    );
    assert!(err.message().contains("universe"), "got: {}", err.message());
}

#[test]
fn method_calls_resolve_through_the_instance() {
    let src = r#"
module body Scenario is
  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable(Integer32) is
    method Print(x : Integer32) : Unit is
      return nil;
    end;
  end;

  function Main(root : RootCapability) : RootCapability is
    Print(42);
    return root;
  end;
end module body.
"#;
    check_source(src).expect("method resolves");
}

#[test]
fn a_method_call_with_no_instance_is_rejected() {
    let src = r#"
module body Scenario is
  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
  end;

  instance Printable(Integer32) is
    method Print(x : Integer32) : Unit is
      return nil;
    end;
  end;

  function Main(root : RootCapability) : RootCapability is
    Print(true);
    return root;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("no Boolean instance");
    assert!(
        matches!(err, CompileError::Instance(_)),
        "expected InstanceError, got {}",
        err.kind()
    );
    assert!(err.message().contains("no instance"), "got: {}", err.message());
}

#[test]
fn an_instance_missing_a_method_is_rejected() {
    let src = r#"
module body Scenario is
  typeclass Printable(T : Free) is
    method Print(x : T) : Unit;
    method Show(x : T) : Unit;
  end;

  instance Printable(Integer32) is
    method Print(x : Integer32) : Unit is
      return nil;
    end;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("Show is not implemented");
    assert!(
        err.message().contains("does not implement"),
        "got: {}",
        err.message()
    );
}
