use sable_core::{
    check_program, monomorphize, IntWidth, ModuleName, ModuleSource, QualName, Signedness, Ty,
    Universe,
};

fn i32_ty() -> Ty {
    Ty::Integer(Signedness::Signed, IntWidth::W32)
}

#[test]
fn generic_calls_are_tabulated_once_per_argument_tuple() {
    let src = r#"
module body Gen is
  function Identity[T : Type](x : T) : T is
    return x;
  end;

  function Main(root : RootCapability) : RootCapability is
    let a : Integer32 := Identity(1);
    let b : Integer32 := Identity(2);
    let c : Boolean := Identity(true);
    return Identity(root);
  end;
end module body.
"#;
    let checked = check_program(&[ModuleSource::body_only(src)]).expect("checks");
    let mut env = checked.env;
    let mono = monomorphize(&mut env, &checked.modules).expect("monomorphizes");

    let identity = QualName::new(ModuleName::new("Gen"), "Identity");
    let int_id = env.mono.get(&identity, &[i32_ty()]).expect("Integer32 entry");
    let bool_id = env.mono.get(&identity, &[Ty::Boolean]).expect("Boolean entry");
    let root = Ty::Named {
        name: QualName::new(ModuleName::new("Sable.Builtin"), "RootCapability"),
        args: Vec::new(),
        declared: Universe::Linear,
        universe: Universe::Linear,
    };
    let root_id = env.mono.get(&identity, &[root]).expect("RootCapability entry");
    assert_ne!(int_id, bool_id);
    assert_ne!(int_id, root_id);

    // Three instantiations of Identity plus the concrete Main.
    let instantiated: Vec<_> = mono.functions.iter().filter(|f| f.id.is_some()).collect();
    assert_eq!(instantiated.len(), 3);
    for f in &instantiated {
        assert_eq!(f.name, identity);
        assert!(
            !f.params[0].1.contains_var(),
            "instantiated parameter still generic: {}",
            f.params[0].1
        );
    }
}

#[test]
fn nested_generic_calls_instantiate_transitively() {
    let src = r#"
module body Gen is
  function Identity[T : Type](x : T) : T is
    return x;
  end;

  function Twice[T : Type](x : T) : T is
    return Identity(x);
  end;

  function Main(root : RootCapability) : RootCapability is
    let a : Integer32 := Twice(7);
    return root;
  end;
end module body.
"#;
    let checked = check_program(&[ModuleSource::body_only(src)]).expect("checks");
    let mut env = checked.env;
    monomorphize(&mut env, &checked.modules).expect("monomorphizes");

    let twice = QualName::new(ModuleName::new("Gen"), "Twice");
    let identity = QualName::new(ModuleName::new("Gen"), "Identity");
    assert!(env.mono.get(&twice, &[i32_ty()]).is_some());
    assert!(
        env.mono.get(&identity, &[i32_ty()]).is_some(),
        "instantiating Twice must transitively instantiate Identity"
    );
}

#[test]
fn generic_records_instantiate_per_argument_tuple() {
    let src = r#"
module body Gen is
  record Box[T : Free] : Free is
    value : T;
  end;

  function Main(root : RootCapability) : RootCapability is
    let a : Box[Integer32] := Box(value => 3);
    let b : Box[Boolean] := Box(value => true);
    return root;
  end;
end module body.
"#;
    let checked = check_program(&[ModuleSource::body_only(src)]).expect("checks");
    let mut env = checked.env;
    let mono = monomorphize(&mut env, &checked.modules).expect("monomorphizes");

    let boxed = QualName::new(ModuleName::new("Gen"), "Box");
    assert!(env.mono.get(&boxed, &[i32_ty()]).is_some());
    assert!(env.mono.get(&boxed, &[Ty::Boolean]).is_some());
    let box_defs = mono
        .types
        .iter()
        .filter(|t| t.name == boxed)
        .count();
    assert_eq!(box_defs, 2);
}

#[test]
fn uninferable_type_arguments_are_rejected() {
    let src = r#"
module body Gen is
  union Optional[T : Type] : Type is
    case Some is
      value : T;
    case None;
  end;

  function Main(root : RootCapability) : RootCapability is
    discard None;
    return root;
  end;
end module body.
"#;
    let err = check_program(&[ModuleSource::body_only(src)]).expect_err("nothing binds T");
    assert!(
        err.message().contains("could not infer"),
        "got: {}",
        err.message()
    );
}

#[test]
fn an_annotated_nullary_constructor_infers_from_the_expected_type() {
    let src = r#"
module body Gen is
  union Optional[T : Type] : Type is
    case Some is
      value : T;
    case None;
  end;

  function Main(root : RootCapability) : RootCapability is
    let o : Optional[Integer32] := None;
    discard o;
    return root;
  end;
end module body.
"#;
    check_program(&[ModuleSource::body_only(src)]).expect("expected type seeds inference");
}
