#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use sable_ast::BorrowMode;

use crate::error::{CompileError, ErrorText, LinearityError};
use crate::tast::{
    BindingId, BindingTable, TExpr, TExprKind, TFunction, TPathElemKind, TStmt, TypedModule,
};
use crate::types::{Ty, Universe};

/// Consumption state of one live binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum VarState {
    /// Must be consumed on every forward path.
    Unconsumed,
    /// Previously consumed; any further use is an error.
    Consumed,
    /// Referenced by an active read borrow.
    BorrowedRead,
    /// One active write borrow.
    BorrowedWrite,
}

/// Consumption table: binding id to state, for every tracked live binding.
/// BTreeMap keeps joins and error reporting deterministic.
type StateTable = BTreeMap<BindingId, VarState>;

/// A binding is tracked when its values obey the linear discipline: the
/// Linear universe, or a type variable whose universe is not known to be
/// Free.
fn tracked(ty: &Ty) -> bool {
    match ty.universe() {
        Universe::Linear => true,
        Universe::Type => matches!(ty, Ty::Var(_)),
        _ => false,
    }
}

/// Stage F: accept or reject a typed module. Produces no value; the typed
/// AST passes through unchanged on success.
pub fn check_module_linearity(module: &TypedModule) -> Result<(), CompileError> {
    for f in &module.functions {
        check_function(f)?;
    }
    for inst in &module.instances {
        for m in &inst.methods {
            check_function(m)?;
        }
    }
    Ok(())
}

pub fn check_function(f: &TFunction) -> Result<(), CompileError> {
    let checker = Linearity {
        bindings: &f.bindings,
    };
    let mut table = StateTable::new();
    for p in &f.params {
        if tracked(&p.ty) {
            table.insert(p.binding, VarState::Unconsumed);
        }
    }
    let terminated = checker.walk_block(&f.body, &mut table)?;
    if !terminated {
        // Typing guarantees every path ends in a return; a fall-through
        // here still gets its bindings checked.
        checker.check_all_consumed(&table)?;
    }
    Ok(())
}

struct Linearity<'a> {
    bindings: &'a BindingTable,
}

impl<'a> Linearity<'a> {
    fn name_of(&self, id: BindingId) -> &str {
        &self.bindings.get(id).name
    }

    fn err(&self, message: ErrorText, span: sable_ast::Span) -> CompileError {
        LinearityError {
            message,
            span: Some(span),
        }
        .into()
    }

    /// Walk a statement list, threading the table. Returns true when the
    /// block ends in a return on this path. On fall-through, bindings
    /// introduced by the block are closure-checked and removed.
    fn walk_block(
        &self,
        stmts: &[TStmt],
        table: &mut StateTable,
    ) -> Result<bool, CompileError> {
        let mut introduced: Vec<BindingId> = Vec::new();
        for stmt in stmts {
            let terminated = self
                .walk_stmt(stmt, table, &mut introduced)
                .map_err(|e| e.adorn(stmt.span()))?;
            if terminated {
                // Return validated the whole table; the block is done.
                return Ok(true);
            }
        }
        for id in introduced {
            match table.remove(&id) {
                Some(VarState::Consumed) | None => {}
                Some(_) => {
                    return Err(self.err(
                        ErrorText::new()
                            .text("value ")
                            .code(self.name_of(id))
                            .text(" forgotten: it is never consumed"),
                        self.bindings.get(id).span,
                    ));
                }
            }
        }
        Ok(false)
    }

    fn walk_stmt(
        &self,
        stmt: &TStmt,
        table: &mut StateTable,
        introduced: &mut Vec<BindingId>,
    ) -> Result<bool, CompileError> {
        match stmt {
            TStmt::Let {
                binding, ty, value, ..
            } => {
                self.consume_expr(value, table)?;
                if tracked(ty) {
                    table.insert(*binding, VarState::Unconsumed);
                    introduced.push(*binding);
                }
                Ok(false)
            }
            TStmt::Destructure {
                value, bindings, ..
            } => {
                self.consume_expr(value, table)?;
                for b in bindings {
                    if tracked(&b.ty) {
                        table.insert(b.binding, VarState::Unconsumed);
                        introduced.push(b.binding);
                    }
                }
                Ok(false)
            }
            TStmt::Assign { target, value, .. } => {
                self.read_expr(target, table)?;
                self.consume_expr(value, table)?;
                Ok(false)
            }
            TStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                self.consume_expr(cond, table)?;
                let mut then_table = table.clone();
                let mut else_table = table.clone();
                let then_done = self.walk_block(then_block, &mut then_table)?;
                let else_done = self.walk_block(else_block, &mut else_table)?;
                self.join(
                    table,
                    &[(then_done, then_table), (else_done, else_table)],
                    stmt.span(),
                )
            }
            TStmt::Case {
                scrutinee, arms, ..
            } => {
                self.consume_expr(scrutinee, table)?;
                let mut results = Vec::new();
                for arm in arms {
                    let mut arm_table = table.clone();
                    let mut arm_introduced = Vec::new();
                    for b in &arm.bindings {
                        if tracked(&b.ty) {
                            arm_table.insert(b.binding, VarState::Unconsumed);
                            arm_introduced.push(b.binding);
                        }
                    }
                    let done = self.walk_arm(&arm.body, &mut arm_table, arm_introduced)?;
                    results.push((done, arm_table));
                }
                self.join(table, &results, stmt.span())
            }
            TStmt::While { cond, body, .. } => {
                let snapshot = table.clone();
                self.consume_expr(cond, table)?;
                let done = self.walk_block(body, table)?;
                if done {
                    // A loop body that always returns never reaches the
                    // backedge; treat it like a straight line.
                    return Ok(false);
                }
                self.check_loop_stable(&snapshot, table, stmt.span())?;
                Ok(false)
            }
            TStmt::For { from, to, body, .. } => {
                let snapshot = table.clone();
                self.consume_expr(from, table)?;
                self.consume_expr(to, table)?;
                let done = self.walk_block(body, table)?;
                if done {
                    return Ok(false);
                }
                self.check_loop_stable(&snapshot, table, stmt.span())?;
                Ok(false)
            }
            TStmt::Borrow {
                original,
                mode,
                body,
                span,
                ..
            } => {
                let original_tracked = table.contains_key(original);
                if original_tracked {
                    match table[original] {
                        VarState::Unconsumed => {}
                        VarState::Consumed => {
                            return Err(self.err(
                                ErrorText::new()
                                    .text("value ")
                                    .code(self.name_of(*original))
                                    .text(" used after being consumed"),
                                *span,
                            ));
                        }
                        VarState::BorrowedRead | VarState::BorrowedWrite => {
                            return Err(self.err(
                                ErrorText::new()
                                    .text("cannot borrow ")
                                    .code(self.name_of(*original))
                                    .text(" while it is already borrowed"),
                                *span,
                            ));
                        }
                    }
                    let state = match mode {
                        BorrowMode::Read => VarState::BorrowedRead,
                        BorrowMode::Write => VarState::BorrowedWrite,
                    };
                    table.insert(*original, state);
                }
                let done = self.walk_block(body, table)?;
                if done {
                    // A return inside the borrow scope was already rejected
                    // by the return rule: the original is still borrowed.
                    return Ok(true);
                }
                if original_tracked {
                    table.insert(*original, VarState::Unconsumed);
                }
                Ok(false)
            }
            TStmt::Return { value, span } => {
                self.consume_expr(value, table)?;
                self.check_all_consumed_at(table, *span)?;
                Ok(true)
            }
            TStmt::Skip { .. } => Ok(false),
            TStmt::Discard { value, .. } => {
                self.consume_expr(value, table)?;
                Ok(false)
            }
        }
    }

    /// Walk a case arm body: like a block, but the arm's slot bindings are
    /// closed here so the join sees only the bindings live before the case.
    fn walk_arm(
        &self,
        stmts: &[TStmt],
        table: &mut StateTable,
        arm_introduced: Vec<BindingId>,
    ) -> Result<bool, CompileError> {
        let done = self.walk_block(stmts, table)?;
        if done {
            return Ok(true);
        }
        for id in arm_introduced {
            match table.remove(&id) {
                Some(VarState::Consumed) | None => {}
                Some(_) => {
                    return Err(self.err(
                        ErrorText::new()
                            .text("value ")
                            .code(self.name_of(id))
                            .text(" forgotten: it is never consumed"),
                        self.bindings.get(id).span,
                    ));
                }
            }
        }
        Ok(false)
    }

    /// Join the tables of the branch arms. Terminated arms exited through
    /// a return and do not constrain the fall-through state. All remaining
    /// arms must agree mapwise.
    fn join(
        &self,
        table: &mut StateTable,
        results: &[(bool, StateTable)],
        span: sable_ast::Span,
    ) -> Result<bool, CompileError> {
        let live: Vec<&StateTable> = results
            .iter()
            .filter(|(done, _)| !done)
            .map(|(_, t)| t)
            .collect();
        if live.is_empty() {
            return Ok(true);
        }
        let first = live[0];
        for other in &live[1..] {
            for (id, state) in first {
                let other_state = other.get(id).copied().unwrap_or(VarState::Consumed);
                if *state != other_state {
                    return Err(self.err(
                        ErrorText::new()
                            .text("asymmetric consumption across branches: ")
                            .code(self.name_of(*id))
                            .text(" is consumed on one branch but not the other"),
                        span,
                    ));
                }
            }
        }
        *table = first.clone();
        Ok(false)
    }

    /// A loop body must leave the table exactly as it found it: a linear
    /// binding declared outside the loop cannot be consumed inside it.
    fn check_loop_stable(
        &self,
        before: &StateTable,
        after: &StateTable,
        span: sable_ast::Span,
    ) -> Result<(), CompileError> {
        for (id, state) in before {
            let now = after.get(id).copied().unwrap_or(VarState::Consumed);
            if *state != now {
                return Err(self.err(
                    ErrorText::new()
                        .text("cannot consume ")
                        .code(self.name_of(*id))
                        .text(" inside a loop: it was declared outside the loop body"),
                    span,
                ));
            }
        }
        Ok(())
    }

    fn check_all_consumed(&self, table: &StateTable) -> Result<(), CompileError> {
        for (id, state) in table {
            if *state != VarState::Consumed {
                return Err(self.err(
                    ErrorText::new()
                        .text("value ")
                        .code(self.name_of(*id))
                        .text(" forgotten: it is never consumed"),
                    self.bindings.get(*id).span,
                ));
            }
        }
        Ok(())
    }

    /// At a return, every tracked binding still live must already be
    /// consumed; the scope is exiting.
    fn check_all_consumed_at(
        &self,
        table: &StateTable,
        span: sable_ast::Span,
    ) -> Result<(), CompileError> {
        for (id, state) in table {
            if *state != VarState::Consumed {
                return Err(self.err(
                    ErrorText::new()
                        .text("value ")
                        .code(self.name_of(*id))
                        .text(" forgotten: it is never consumed before this return"),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// Each use of a binding in value position is a consume.
    fn consume_expr(&self, expr: &TExpr, table: &mut StateTable) -> Result<(), CompileError> {
        match &expr.kind {
            TExprKind::NilConstant
            | TExprKind::BoolConstant(_)
            | TExprKind::IntConstant(_)
            | TExprKind::FloatConstant(_)
            | TExprKind::ConstantRef { .. } => Ok(()),
            TExprKind::Variable { binding, name } => {
                let Some(state) = table.get_mut(binding) else {
                    // Free-universe bindings copy without restriction.
                    return Ok(());
                };
                match state {
                    VarState::Unconsumed => {
                        *state = VarState::Consumed;
                        Ok(())
                    }
                    VarState::Consumed => Err(self.err(
                        ErrorText::new()
                            .text("value ")
                            .code(name)
                            .text(" used after being consumed"),
                        expr.span,
                    )),
                    VarState::BorrowedRead | VarState::BorrowedWrite => Err(self.err(
                        ErrorText::new()
                            .text("cannot consume ")
                            .code(name)
                            .text(" while it is borrowed"),
                        expr.span,
                    )),
                }
            }
            TExprKind::RecordCtor { args, .. } | TExprKind::UnionCtor { args, .. } => {
                for (_, arg) in args {
                    self.consume_expr(arg, table)?;
                }
                Ok(())
            }
            TExprKind::Call { args, .. }
            | TExprKind::MethodCall { args, .. }
            | TExprKind::GenericCall { args, .. } => {
                for arg in args {
                    self.consume_expr(arg, table)?;
                }
                Ok(())
            }
            TExprKind::Borrow {
                binding,
                name,
                mode,
                ..
            } => self.transient_borrow(*binding, name, *mode, table, expr.span),
            TExprKind::Path { head, elems } => {
                self.read_path_head(head, table)?;
                for elem in elems {
                    if let TPathElemKind::Index(idx) = &elem.kind {
                        self.consume_expr(idx, table)?;
                    }
                }
                Ok(())
            }
            TExprKind::Unary { operand, .. } => self.consume_expr(operand, table),
            TExprKind::Binary { left, right, .. } => {
                self.consume_expr(left, table)?;
                self.consume_expr(right, table)
            }
        }
    }

    /// An anonymous borrow lasts for the enclosing statement; it needs the
    /// binding live but does not transition it.
    fn transient_borrow(
        &self,
        binding: BindingId,
        name: &str,
        mode: BorrowMode,
        table: &StateTable,
        span: sable_ast::Span,
    ) -> Result<(), CompileError> {
        let Some(state) = table.get(&binding) else {
            return Ok(());
        };
        match (state, mode) {
            (VarState::Unconsumed, _) => Ok(()),
            (VarState::BorrowedRead, BorrowMode::Read) => Ok(()),
            (VarState::BorrowedRead, BorrowMode::Write) => Err(self.err(
                ErrorText::new()
                    .text("cannot write-borrow ")
                    .code(name)
                    .text(" while it is read-borrowed"),
                span,
            )),
            (VarState::BorrowedWrite, _) => Err(self.err(
                ErrorText::new()
                    .text("cannot use ")
                    .code(name)
                    .text(" while it is write-borrowed"),
                span,
            )),
            (VarState::Consumed, _) => Err(self.err(
                ErrorText::new()
                    .text("value ")
                    .code(name)
                    .text(" used after being consumed"),
                span,
            )),
        }
    }

    /// Reading through a path keeps the head binding live without
    /// consuming it.
    fn read_path_head(&self, head: &TExpr, table: &mut StateTable) -> Result<(), CompileError> {
        match &head.kind {
            TExprKind::Variable { binding, name } => match table.get(binding) {
                None | Some(VarState::Unconsumed) | Some(VarState::BorrowedRead) => Ok(()),
                Some(VarState::BorrowedWrite) => Err(self.err(
                    ErrorText::new()
                        .text("cannot use ")
                        .code(name)
                        .text(" while it is write-borrowed"),
                    head.span,
                )),
                Some(VarState::Consumed) => Err(self.err(
                    ErrorText::new()
                        .text("value ")
                        .code(name)
                        .text(" used after being consumed"),
                    head.span,
                )),
            },
            _ => self.consume_expr(head, table),
        }
    }

    /// Assignment targets are writes: the root binding must be live, and
    /// index expressions within the path are ordinary reads.
    fn read_expr(&self, expr: &TExpr, table: &mut StateTable) -> Result<(), CompileError> {
        match &expr.kind {
            TExprKind::Variable { .. } => self.read_path_head(expr, table),
            TExprKind::Path { head, elems } => {
                self.read_path_head(head, table)?;
                for elem in elems {
                    if let TPathElemKind::Index(idx) = &elem.kind {
                        self.consume_expr(idx, table)?;
                    }
                }
                Ok(())
            }
            _ => self.consume_expr(expr, table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::DeclId;
    use crate::tast::{BindingInfo, TFunction};
    use crate::types::{QualName, TypeParams};
    use sable_ast::ModuleName;

    fn linear_ty() -> Ty {
        Ty::Named {
            name: QualName::new(ModuleName::new("M"), "R"),
            args: Vec::new(),
            declared: Universe::Linear,
            universe: Universe::Linear,
        }
    }

    fn var(bindings: &BindingTable, id: BindingId) -> TExpr {
        TExpr {
            span: sable_ast::span(0, 0),
            ty: bindings.get(id).ty.clone(),
            kind: TExprKind::Variable {
                binding: id,
                name: bindings.get(id).name.clone(),
            },
        }
    }

    fn unit_call(name: &str, args: Vec<TExpr>) -> TExpr {
        TExpr {
            span: sable_ast::span(0, 0),
            ty: Ty::Unit,
            kind: TExprKind::Call {
                callee: QualName::new(ModuleName::new("M"), name),
                args,
                substitution: Vec::new(),
            },
        }
    }

    fn function_with(bindings: BindingTable, params: Vec<crate::tast::TParam>, body: Vec<TStmt>) -> TFunction {
        TFunction {
            decl: DeclId(0),
            name: QualName::new(ModuleName::new("M"), "f"),
            typarams: TypeParams::new(),
            params,
            ret: Ty::Unit,
            body,
            bindings,
        }
    }

    fn ret_nil(span_at: usize) -> TStmt {
        TStmt::Return {
            span: sable_ast::span(span_at, 1),
            value: TExpr {
                span: sable_ast::span(span_at, 1),
                ty: Ty::Unit,
                kind: TExprKind::NilConstant,
            },
        }
    }

    fn linear_param(bindings: &mut BindingTable) -> (BindingId, crate::tast::TParam) {
        let id = bindings.fresh(BindingInfo {
            name: "r".to_string(),
            ty: linear_ty(),
            span: sable_ast::span(0, 1),
        });
        let param = crate::tast::TParam {
            binding: id,
            name: "r".to_string(),
            ty: linear_ty(),
        };
        (id, param)
    }

    #[test]
    fn consuming_once_is_accepted() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let body = vec![
            TStmt::Discard {
                span: sable_ast::span(0, 1),
                value: unit_call("Consume", vec![var(&bindings, id)]),
            },
            ret_nil(1),
        ];
        let f = function_with(bindings, vec![param], body);
        check_function(&f).expect("single consume");
    }

    #[test]
    fn consuming_twice_is_rejected() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let body = vec![
            TStmt::Discard {
                span: sable_ast::span(0, 1),
                value: unit_call("Consume", vec![var(&bindings, id)]),
            },
            TStmt::Discard {
                span: sable_ast::span(1, 1),
                value: unit_call("Consume", vec![var(&bindings, id)]),
            },
            ret_nil(2),
        ];
        let f = function_with(bindings, vec![param], body);
        let err = check_function(&f).expect_err("double consume");
        assert!(err.message().contains("used after being consumed"));
    }

    #[test]
    fn consuming_twice_in_one_call_is_rejected() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let body = vec![
            TStmt::Discard {
                span: sable_ast::span(0, 1),
                value: unit_call("Pair", vec![var(&bindings, id), var(&bindings, id)]),
            },
            ret_nil(1),
        ];
        let f = function_with(bindings, vec![param], body);
        let err = check_function(&f).expect_err("double consume in one call");
        assert!(err.message().contains("used after being consumed"));
    }

    #[test]
    fn forgetting_is_rejected() {
        let mut bindings = BindingTable::new();
        let (_, param) = linear_param(&mut bindings);
        let body = vec![ret_nil(0)];
        let f = function_with(bindings, vec![param], body);
        let err = check_function(&f).expect_err("forgotten");
        assert!(err.message().contains("forgotten"));
    }

    #[test]
    fn asymmetric_branches_are_rejected() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let consume = TStmt::Discard {
            span: sable_ast::span(0, 1),
            value: unit_call("Consume", vec![var(&bindings, id)]),
        };
        let body = vec![
            TStmt::If {
                span: sable_ast::span(0, 1),
                cond: TExpr {
                    span: sable_ast::span(0, 1),
                    ty: Ty::Boolean,
                    kind: TExprKind::BoolConstant(true),
                },
                then_block: vec![consume],
                else_block: vec![TStmt::Skip {
                    span: sable_ast::span(0, 1),
                }],
            },
            ret_nil(1),
        ];
        let f = function_with(bindings, vec![param], body);
        let err = check_function(&f).expect_err("asymmetric");
        assert!(err
            .message()
            .contains("asymmetric consumption across branches"));
    }

    #[test]
    fn symmetric_branches_are_accepted() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let consume = |b: &BindingTable| TStmt::Discard {
            span: sable_ast::span(0, 1),
            value: unit_call("Consume", vec![var(b, id)]),
        };
        let body = vec![
            TStmt::If {
                span: sable_ast::span(0, 1),
                cond: TExpr {
                    span: sable_ast::span(0, 1),
                    ty: Ty::Boolean,
                    kind: TExprKind::BoolConstant(true),
                },
                then_block: vec![consume(&bindings)],
                else_block: vec![consume(&bindings)],
            },
            ret_nil(1),
        ];
        let f = function_with(bindings, vec![param], body);
        check_function(&f).expect("symmetric consume");
    }

    #[test]
    fn consuming_an_outer_binding_in_a_loop_is_rejected() {
        let mut bindings = BindingTable::new();
        let (id, param) = linear_param(&mut bindings);
        let body = vec![
            TStmt::While {
                span: sable_ast::span(0, 1),
                cond: TExpr {
                    span: sable_ast::span(0, 1),
                    ty: Ty::Boolean,
                    kind: TExprKind::BoolConstant(false),
                },
                body: vec![TStmt::Discard {
                    span: sable_ast::span(0, 1),
                    value: unit_call("Consume", vec![var(&bindings, id)]),
                }],
            },
            ret_nil(1),
        ];
        let f = function_with(bindings, vec![param], body);
        let err = check_function(&f).expect_err("loop consume");
        assert!(err.message().contains("inside a loop"));
    }
}
