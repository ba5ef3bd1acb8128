use sable_core::{check_source, CompileError};

fn expect_linearity_error(src: &str) -> CompileError {
    let err = check_source(src).expect_err("expected a linearity error");
    assert!(
        matches!(err, CompileError::Linearity(_)),
        "expected LinearityError, got {}: {}",
        err.kind(),
        err.message()
    );
    err
}

#[test]
fn destructuring_a_linear_record_is_accepted() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    let { x } := r;
    return root;
  end;
end module body.
"#;
    check_source(src).expect("destructure consumes the record");
}

#[test]
fn forgetting_a_linear_record_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(err.message().contains("forgotten"), "got: {}", err.message());
}

#[test]
fn consuming_in_both_branches_is_accepted() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    if true then
      let { x } := r;
    else
      let { x as y } := r;
    end if;
    return root;
  end;
end module body.
"#;
    check_source(src).expect("both branches consume");
}

#[test]
fn asymmetric_consumption_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    if true then
      let { x } := r;
    else
      skip;
    end if;
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(
        err.message().contains("asymmetric consumption across branches"),
        "got: {}",
        err.message()
    );
}

#[test]
fn consuming_twice_by_call_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Consume(r : R) : Unit is
    let { x } := r;
    return nil;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    Consume(r);
    Consume(r);
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(
        err.message().contains("used after being consumed"),
        "got: {}",
        err.message()
    );
}

#[test]
fn forgetting_a_case_binding_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  union Optional[T : Type] : Type is
    case Some is
      value : T;
    case None;
  end;

  function Main(root : RootCapability) : RootCapability is
    let o : Optional[R] := Some(R(x => 32));
    case o of
      when Some(value) do
        skip;
      when None do
        skip;
    end case;
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(err.message().contains("forgotten"), "got: {}", err.message());
}

#[test]
fn consuming_the_case_binding_is_accepted() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  union Optional[T : Type] : Type is
    case Some is
      value : T;
    case None;
  end;

  function Main(root : RootCapability) : RootCapability is
    let o : Optional[R] := Some(R(x => 32));
    case o of
      when Some(value) do
        let { x } := value;
      when None do
        skip;
    end case;
    return root;
  end;
end module body.
"#;
    check_source(src).expect("the case binding is consumed");
}

#[test]
fn borrowing_then_consuming_is_accepted() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    borrow r as rr in reg do
      let v : Integer32 := rr.x;
      skip;
    end borrow;
    let { x } := r;
    return root;
  end;
end module body.
"#;
    check_source(src).expect("borrow ends before the consume");
}

#[test]
fn consuming_while_borrowed_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Consume(r : R) : Unit is
    let { x } := r;
    return nil;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    borrow r as rr in reg do
      Consume(r);
    end borrow;
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(err.message().contains("borrowed"), "got: {}", err.message());
}

#[test]
fn consuming_an_outer_linear_value_in_a_while_loop_is_rejected() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    let r : R := R(x => 32);
    while false do
      let { x } := r;
    end while;
    return root;
  end;
end module body.
"#;
    let err = expect_linearity_error(src);
    assert!(err.message().contains("loop"), "got: {}", err.message());
}

#[test]
fn discarding_a_linear_value_is_a_type_error() {
    let src = r#"
module body Scenario is
  record R : Linear is
    x : Integer32;
  end;

  function Main(root : RootCapability) : RootCapability is
    discard R(x => 32);
    return root;
  end;
end module body.
"#;
    let err = check_source(src).expect_err("cannot discard a linear value");
    assert!(
        matches!(err, CompileError::Type(_)),
        "expected TypeError, got {}",
        err.kind()
    );
    assert!(err.message().contains("discard"), "got: {}", err.message());
}
