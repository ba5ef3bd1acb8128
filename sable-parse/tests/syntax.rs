use sable_ast::{BorrowMode, CallArgs, Decl, ExprKind, Stmt, TypeSpec, UniverseSpec};
use sable_parse::{parse_interface, parse_module_body};

#[test]
fn interface_and_body_headers_parse() {
    let interface = parse_interface("module Standard.Buffer is end module.").expect("interface");
    assert_eq!(interface.name.node.as_str(), "Standard.Buffer");

    let body =
        parse_module_body("module body Standard.Buffer is end module body.").expect("body");
    assert_eq!(body.name.node.as_str(), "Standard.Buffer");
}

#[test]
fn pragmas_and_imports_parse() {
    let src = r#"
module body M is
  pragma Unsafe_Module;
  import A.B (X, Y as Z);
end module body.
"#;
    let body = parse_module_body(src).expect("body");
    assert_eq!(body.pragmas.len(), 1);
    assert_eq!(body.pragmas[0].name.node, "Unsafe_Module");
    assert_eq!(body.imports.len(), 1);
    let import = &body.imports[0];
    assert_eq!(import.module.node.as_str(), "A.B");
    assert_eq!(import.names.len(), 2);
    assert_eq!(import.names[1].name.node, "Y");
    assert_eq!(import.names[1].rename.as_ref().expect("rename").node, "Z");
}

#[test]
fn record_and_union_declarations_parse() {
    let src = r#"
module body M is
  record Pair[A : Free, B : Free] : Free is
    first : A;
    second : B;
  end;

  union Optional[T : Type] : Type is
    case Some is
      value : T;
    case None;
  end;
end module body.
"#;
    let body = parse_module_body(src).expect("body");
    assert_eq!(body.decls.len(), 2);
    let Decl::Record(pair) = &body.decls[0] else {
        panic!("expected a record");
    };
    assert_eq!(pair.typarams.len(), 2);
    assert_eq!(pair.universe.node, UniverseSpec::Free);
    assert_eq!(pair.slots.len(), 2);

    let Decl::Union(opt) = &body.decls[1] else {
        panic!("expected a union");
    };
    assert_eq!(opt.cases.len(), 2);
    assert_eq!(opt.cases[0].slots.len(), 1);
    assert!(opt.cases[1].slots.is_empty());
}

#[test]
fn opaque_types_only_appear_in_interfaces() {
    let interface = r#"
module M is
  type Token : Linear;
end module.
"#;
    let parsed = parse_interface(interface).expect("interface");
    assert!(matches!(parsed.decls[0], Decl::OpaqueType(_)));

    let body = r#"
module body M is
  type Token : Linear;
end module body.
"#;
    let err = parse_module_body(body).expect_err("opaque in body");
    assert!(err.message.contains("interface"));
}

#[test]
fn function_bodies_parse_statement_forms() {
    let src = r#"
module body M is
  function F(r : R, n : Integer32) : Integer32 is
    let x : Integer32 := n + 1;
    let { a, b as c } := r;
    x := x * 2;
    if x > 10 then
      skip;
    else
      discard F(r, x);
    end if;
    while x < 100 do
      x := x + 1;
    end while;
    for i from 0 to 9 do
      x := x + i;
    end for;
    borrow r as rr in reg do
      skip;
    end borrow;
    borrow! r as rw in reg2 do
      skip;
    end borrow;
    case o of
      when Some(value) do
        skip;
      when None do
        skip;
    end case;
    return x;
  end;
end module body.
"#;
    let body = parse_module_body(src).expect("body");
    let Decl::Function(f) = &body.decls[0] else {
        panic!("expected a function");
    };
    let stmts = f.body.as_ref().expect("body stmts");
    assert!(matches!(stmts[0], Stmt::Let(_)));
    assert!(matches!(stmts[1], Stmt::Destructure(_)));
    assert!(matches!(stmts[2], Stmt::Assign(_)));
    assert!(matches!(stmts[3], Stmt::If(_)));
    assert!(matches!(stmts[4], Stmt::While(_)));
    assert!(matches!(stmts[5], Stmt::For(_)));
    let Stmt::Borrow(read) = &stmts[6] else {
        panic!("expected a borrow");
    };
    assert_eq!(read.mode, BorrowMode::Read);
    let Stmt::Borrow(write) = &stmts[7] else {
        panic!("expected a write borrow");
    };
    assert_eq!(write.mode, BorrowMode::Write);
    assert!(matches!(stmts[8], Stmt::Case(_)));
    assert!(matches!(stmts[9], Stmt::Return(_)));
}

#[test]
fn named_and_positional_call_arguments_parse() {
    let named = sable_parse::parse_expr("R(x => 32, y => 5)").expect("named");
    let ExprKind::Call {
        args: CallArgs::Named(args),
        ..
    } = named.kind
    else {
        panic!("expected named arguments");
    };
    assert_eq!(args.len(), 2);
    assert_eq!(args[0].name.node, "x");

    let positional = sable_parse::parse_expr("F(1, 2)").expect("positional");
    let ExprKind::Call {
        args: CallArgs::Positional(args),
        ..
    } = positional.kind
    else {
        panic!("expected positional arguments");
    };
    assert_eq!(args.len(), 2);
}

#[test]
fn reference_type_specifiers_parse() {
    let read = sable_parse::parse_type_spec("&[Integer32, r]").expect("read ref");
    assert!(matches!(read, TypeSpec::ReadRef(_)));
    let write = sable_parse::parse_type_spec("&![Buffer[Integer32], r]").expect("write ref");
    let TypeSpec::WriteRef(inner) = write else {
        panic!("expected a write reference");
    };
    let TypeSpec::Named(named) = *inner.referent else {
        panic!("expected a named referent");
    };
    assert_eq!(named.name.node, "Buffer");
    assert_eq!(named.args.len(), 1);
}

#[test]
fn comparison_does_not_chain() {
    assert!(sable_parse::parse_expr("a < b").is_ok());
    assert!(sable_parse::parse_expr("a < b < c").is_err());
}

#[test]
fn paths_parse_slots_pointers_and_indexing() {
    let expr = sable_parse::parse_expr("p.first->next[3]").expect("path");
    let ExprKind::Path { elems, .. } = expr.kind else {
        panic!("expected a path");
    };
    assert_eq!(elems.len(), 3);
}

#[test]
fn precedence_groups_arithmetic_under_comparison() {
    let expr = sable_parse::parse_expr("1 + 2 * 3 = 7").expect("expr");
    let ExprKind::Binary { op, .. } = expr.kind else {
        panic!("expected a comparison at the top");
    };
    assert_eq!(op, sable_ast::BinOp::Eq);
}
