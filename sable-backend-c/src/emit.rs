#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use miette::Diagnostic;
use sable_hir::{
    BinOp, CaseDef, Expr, Function, LValue, PathElem, Program, RecordDef, Stmt, Type, UnaryOp,
    UnionDef,
};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("C backend error: {message}")]
#[diagnostic(code(sable::backend_c))]
pub struct CBackendError {
    pub message: String,
}

pub struct CArtifacts {
    pub runtime_h: String,
    pub module_c: String,
}

pub fn emit_program(program: &Program) -> Result<CArtifacts, CBackendError> {
    let runtime_h = emit_runtime_h();
    let module_c = Emitter::new(program).emit()?;
    Ok(CArtifacts {
        runtime_h,
        module_c,
    })
}

fn emit_runtime_h() -> String {
    let mut out = String::new();
    out.push_str("#pragma once\n");
    out.push_str("#include <stdint.h>\n");
    out.push_str("#include <stdbool.h>\n");
    out.push_str("#include <stddef.h>\n\n");
    out.push_str("typedef uint8_t sable_unit;\n\n");
    out.push_str("typedef struct sable_array {\n");
    out.push_str("  void *data;\n");
    out.push_str("  size_t len;\n");
    out.push_str("} sable_array;\n");
    out
}

struct Emitter<'a> {
    program: &'a Program,
    out: String,
    indent: usize,
    tmp: u32,
}

impl<'a> Emitter<'a> {
    fn new(program: &'a Program) -> Self {
        Self {
            program,
            out: String::new(),
            indent: 0,
            tmp: 0,
        }
    }

    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn fresh_tmp(&mut self) -> String {
        let n = self.tmp;
        self.tmp += 1;
        format!("__s{n}")
    }

    fn emit(mut self) -> Result<String, CBackendError> {
        self.line("#include \"sable_runtime.h\"");
        self.line("");

        self.emit_type_defs()?;
        self.emit_builtins();
        self.emit_constants()?;
        self.emit_prototypes()?;
        for f in self.program.functions.values() {
            self.emit_function(f)?;
        }
        self.emit_main_shim();
        Ok(self.out)
    }

    // ---- types ----

    /// Forward declarations first, then definitions in value-dependency
    /// order so nested records are complete before use.
    fn emit_type_defs(&mut self) -> Result<(), CBackendError> {
        for r in &self.program.records {
            self.line(&format!("typedef struct {0} {0};", r.name));
        }
        for u in &self.program.unions {
            self.line(&format!("typedef struct {0} {0};", u.name));
        }
        if !self.program.records.is_empty() || !self.program.unions.is_empty() {
            self.line("");
        }

        enum Def<'x> {
            Record(&'x RecordDef),
            Union(&'x UnionDef),
        }
        let mut defs: HashMap<&str, Def<'_>> = HashMap::new();
        for r in &self.program.records {
            defs.insert(r.name.as_str(), Def::Record(r));
        }
        for u in &self.program.unions {
            defs.insert(u.name.as_str(), Def::Union(u));
        }

        fn value_deps(ty: &Type, out: &mut Vec<String>) {
            match ty {
                Type::Record(n) | Type::Union(n) => out.push(n.clone()),
                // Pointers and arrays hold their target indirectly.
                _ => {}
            }
        }

        let mut order: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: HashSet<String> = HashSet::new();

        fn visit(
            name: &str,
            defs: &HashMap<&str, Def<'_>>,
            visited: &mut HashSet<String>,
            visiting: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) -> Result<(), CBackendError> {
            if visited.contains(name) {
                return Ok(());
            }
            if !visiting.insert(name.to_string()) {
                return Err(CBackendError {
                    message: format!("recursive by-value type '{name}'"),
                });
            }
            let mut deps = Vec::new();
            match defs.get(name) {
                Some(Def::Record(r)) => {
                    for (_, ty) in &r.slots {
                        value_deps(ty, &mut deps);
                    }
                }
                Some(Def::Union(u)) => {
                    for c in &u.cases {
                        for (_, ty) in &c.slots {
                            value_deps(ty, &mut deps);
                        }
                    }
                }
                None => {}
            }
            for dep in deps {
                visit(&dep, defs, visited, visiting, order)?;
            }
            visiting.remove(name);
            visited.insert(name.to_string());
            if defs.contains_key(name) {
                order.push(name.to_string());
            }
            Ok(())
        }

        let names: Vec<String> = self
            .program
            .records
            .iter()
            .map(|r| r.name.clone())
            .chain(self.program.unions.iter().map(|u| u.name.clone()))
            .collect();
        for name in &names {
            visit(name, &defs, &mut visited, &mut visiting, &mut order)?;
        }

        for name in &order {
            match defs.get(name.as_str()) {
                Some(Def::Record(r)) => self.emit_record_def(r),
                Some(Def::Union(u)) => self.emit_union_def(u),
                None => {}
            }
        }
        Ok(())
    }

    fn emit_record_def(&mut self, r: &RecordDef) {
        self.line(&format!("struct {} {{", r.name));
        self.indent += 1;
        if r.slots.is_empty() {
            self.line("uint8_t __opaque;");
        }
        for (name, ty) in &r.slots {
            let decl = c_decl(ty, name);
            self.line(&format!("{decl};"));
        }
        self.indent -= 1;
        self.line("};");
        self.line("");
    }

    fn emit_union_def(&mut self, u: &UnionDef) {
        let tags: Vec<String> = u
            .cases
            .iter()
            .map(|c| format!("{}__{}", u.name, c.name))
            .collect();
        self.line(&format!("typedef enum {{ {} }} {}_Tag;", tags.join(", "), u.name));
        self.line(&format!("struct {} {{", u.name));
        self.indent += 1;
        self.line(&format!("{}_Tag tag;", u.name));
        self.line("union {");
        self.indent += 1;
        for case in &u.cases {
            self.emit_case_member(case);
        }
        self.indent -= 1;
        self.line("} data;");
        self.indent -= 1;
        self.line("};");
        self.line("");
    }

    fn emit_case_member(&mut self, case: &CaseDef) {
        self.line("struct {");
        self.indent += 1;
        if case.slots.is_empty() {
            self.line("uint8_t __opaque;");
        }
        for (name, ty) in &case.slots {
            let decl = c_decl(ty, name);
            self.line(&format!("{decl};"));
        }
        self.indent -= 1;
        self.line(&format!("}} {};", case.name));
    }

    // ---- runtime intrinsics ----

    fn emit_builtins(&mut self) {
        let exit_code = "Sable_Builtin__ExitCode";
        let root = "Sable_Builtin__RootCapability";
        let has_exit = self.program.records.iter().any(|r| r.name == exit_code);
        let has_root = self.program.records.iter().any(|r| r.name == root);
        if has_exit {
            self.line(&format!(
                "static inline {exit_code} Sable_Builtin__ExitSuccess(void) {{ return ({exit_code}){{ .code = 0 }}; }}"
            ));
            self.line(&format!(
                "static inline {exit_code} Sable_Builtin__ExitFailure(void) {{ return ({exit_code}){{ .code = 1 }}; }}"
            ));
        }
        if has_root {
            self.line(&format!(
                "static inline sable_unit Sable_Builtin__SurrenderRoot({root} root) {{ (void)root; return 0; }}"
            ));
        }
        if has_exit || has_root {
            self.line("");
        }
    }

    // ---- constants ----

    fn emit_constants(&mut self) -> Result<(), CBackendError> {
        for c in &self.program.constants {
            let value = match &c.value {
                Expr::RecordCtor { args, .. } => {
                    let fields: Vec<String> = args
                        .iter()
                        .map(|(slot, e)| Ok(format!(".{} = {}", slot, self.expr(e)?)))
                        .collect::<Result<_, CBackendError>>()?;
                    if fields.is_empty() {
                        "{0}".to_string()
                    } else {
                        format!("{{ {} }}", fields.join(", "))
                    }
                }
                other => self.expr(other)?,
            };
            let decl = c_decl(&c.ty, &c.name);
            self.line(&format!("static const {decl} = {value};"));
        }
        if !self.program.constants.is_empty() {
            self.line("");
        }
        Ok(())
    }

    // ---- functions ----

    fn signature(&self, f: &Function) -> String {
        let params = if f.params.is_empty() {
            "void".to_string()
        } else {
            f.params
                .iter()
                .map(|p| c_decl(&p.ty, &p.name))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!("{} {}({})", c_type(&f.ret), f.name, params)
    }

    fn emit_prototypes(&mut self) -> Result<(), CBackendError> {
        let protos: Vec<String> = self
            .program
            .functions
            .values()
            .map(|f| format!("{};", self.signature(f)))
            .collect();
        for p in protos {
            self.line(&p);
        }
        if !self.program.functions.is_empty() {
            self.line("");
        }
        Ok(())
    }

    fn emit_function(&mut self, f: &Function) -> Result<(), CBackendError> {
        let sig = self.signature(f);
        self.line(&format!("{sig} {{"));
        self.indent += 1;
        let body = f.body.clone();
        self.emit_stmts(&body)?;
        self.indent -= 1;
        self.line("}");
        self.line("");
        Ok(())
    }

    fn emit_stmts(&mut self, stmts: &[Stmt]) -> Result<(), CBackendError> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CBackendError> {
        match stmt {
            Stmt::Let { name, ty, value } => {
                let value = self.expr(value)?;
                let decl = c_decl(ty, name);
                self.line(&format!("{decl} = {value};"));
            }
            Stmt::Assign { target, value } => {
                let target = self.lvalue(target)?;
                let value = self.expr(value)?;
                self.line(&format!("{target} = {value};"));
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.expr(cond)?;
                self.line(&format!("if ({cond}) {{"));
                self.indent += 1;
                self.emit_stmts(then_block)?;
                self.indent -= 1;
                if else_block.is_empty() {
                    self.line("}");
                } else {
                    self.line("} else {");
                    self.indent += 1;
                    self.emit_stmts(else_block)?;
                    self.indent -= 1;
                    self.line("}");
                }
            }
            Stmt::Switch {
                scrutinee,
                union_name,
                arms,
            } => {
                let tmp = self.fresh_tmp();
                let value = self.expr(scrutinee)?;
                self.line("{");
                self.indent += 1;
                self.line(&format!("{union_name} {tmp} = {value};"));
                self.line(&format!("switch ({tmp}.tag) {{"));
                for arm in arms {
                    self.line(&format!("case {}__{}: {{", union_name, arm.case));
                    self.indent += 1;
                    for (local, slot, ty) in &arm.bindings {
                        let decl = c_decl(ty, local);
                        self.line(&format!(
                            "{decl} = {tmp}.data.{}.{};",
                            arm.case, slot
                        ));
                    }
                    self.emit_stmts(&arm.body)?;
                    self.line("break;");
                    self.indent -= 1;
                    self.line("}");
                }
                self.line("}");
                self.indent -= 1;
                self.line("}");
            }
            Stmt::While { cond, body } => {
                let cond = self.expr(cond)?;
                self.line(&format!("while ({cond}) {{"));
                self.indent += 1;
                self.emit_stmts(body)?;
                self.indent -= 1;
                self.line("}");
            }
            Stmt::For {
                var,
                ty,
                from,
                to,
                body,
            } => {
                let from = self.expr(from)?;
                let to = self.expr(to)?;
                let decl = c_decl(ty, var);
                self.line(&format!("for ({decl} = {from}; {var} <= {to}; {var}++) {{"));
                self.indent += 1;
                self.emit_stmts(body)?;
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Block(stmts) => {
                self.line("{");
                self.indent += 1;
                self.emit_stmts(stmts)?;
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Return { value } => {
                let value = self.expr(value)?;
                self.line(&format!("return {value};"));
            }
            Stmt::Discard { value } => {
                let value = self.expr(value)?;
                self.line(&format!("(void)({value});"));
            }
        }
        Ok(())
    }

    fn lvalue(&mut self, lv: &LValue) -> Result<String, CBackendError> {
        let mut out = lv.base.clone();
        for elem in &lv.elems {
            out = self.apply_path_elem(out, elem)?;
        }
        Ok(out)
    }

    fn apply_path_elem(
        &mut self,
        base: String,
        elem: &PathElem,
    ) -> Result<String, CBackendError> {
        Ok(match elem {
            PathElem::Slot(name) => format!("{base}.{name}"),
            PathElem::PointerSlot(name) => format!("{base}->{name}"),
            PathElem::Index { index, elem } => {
                let idx = self.expr(index)?;
                format!("(({}*)({base}.data))[{idx}]", c_type(elem))
            }
        })
    }

    fn expr(&mut self, expr: &Expr) -> Result<String, CBackendError> {
        Ok(match expr {
            Expr::Unit => "0".to_string(),
            Expr::Bool(true) => "true".to_string(),
            Expr::Bool(false) => "false".to_string(),
            Expr::Int(v) => format!("{v}"),
            Expr::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    format!("{v:.1}")
                } else {
                    format!("{v}")
                }
            }
            Expr::Var(name) | Expr::ConstantRef(name) => name.clone(),
            Expr::Call { callee, args } => {
                let args: Vec<String> = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<_, _>>()?;
                format!("{callee}({})", args.join(", "))
            }
            Expr::RecordCtor { record, args } => {
                if args.is_empty() {
                    format!("({record}){{0}}")
                } else {
                    let fields: Vec<String> = args
                        .iter()
                        .map(|(slot, e)| Ok(format!(".{} = {}", slot, self.expr(e)?)))
                        .collect::<Result<_, CBackendError>>()?;
                    format!("({record}){{ {} }}", fields.join(", "))
                }
            }
            Expr::UnionCtor { union, case, args } => {
                let mut fields = vec![format!(".tag = {union}__{case}")];
                for (slot, e) in args {
                    fields.push(format!(".data.{}.{} = {}", case, slot, self.expr(e)?));
                }
                format!("({union}){{ {} }}", fields.join(", "))
            }
            Expr::Path { base, elems } => {
                let mut out = format!("({})", self.expr(base)?);
                for elem in elems {
                    out = self.apply_path_elem(out, elem)?;
                }
                out
            }
            Expr::AddressOf { name } => format!("(&{name})"),
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                match op {
                    UnaryOp::Neg => format!("(-{operand})"),
                    UnaryOp::Not => format!("(!{operand})"),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                format!("({left} {} {right})", c_binop(*op))
            }
        })
    }

    fn emit_main_shim(&mut self) {
        let Some(entry) = &self.program.entrypoint else {
            return;
        };
        self.line("int main(void) {");
        self.indent += 1;
        self.line("Sable_Builtin__RootCapability root = {0};");
        if entry.returns_exit_code {
            self.line(&format!("return {}(root).code;", entry.function));
        } else {
            self.line(&format!("(void){}(root);", entry.function));
            self.line("return 0;");
        }
        self.indent -= 1;
        self.line("}");
    }
}

fn c_type(ty: &Type) -> String {
    match ty {
        Type::Unit => "sable_unit".to_string(),
        Type::Bool => "bool".to_string(),
        Type::I8 => "int8_t".to_string(),
        Type::I16 => "int16_t".to_string(),
        Type::I32 => "int32_t".to_string(),
        Type::I64 => "int64_t".to_string(),
        Type::U8 => "uint8_t".to_string(),
        Type::U16 => "uint16_t".to_string(),
        Type::U32 => "uint32_t".to_string(),
        Type::U64 => "uint64_t".to_string(),
        Type::F32 => "float".to_string(),
        Type::F64 => "double".to_string(),
        Type::Record(n) | Type::Union(n) => n.clone(),
        Type::Pointer(t) => format!("{}*", c_type(t)),
        Type::Array(_) => "sable_array".to_string(),
    }
}

/// A C declaration of `name` with the given type.
fn c_decl(ty: &Type, name: &str) -> String {
    format!("{} {}", c_type(ty), name)
}

fn c_binop(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_hir::Param;

    #[test]
    fn empty_program_emits_runtime_include() {
        let artifacts = emit_program(&Program::default()).expect("emit");
        assert!(artifacts.module_c.contains("#include \"sable_runtime.h\""));
        assert!(artifacts.runtime_h.contains("typedef uint8_t sable_unit;"));
    }

    #[test]
    fn record_definitions_are_ordered_by_value_dependency() {
        let mut program = Program::default();
        program.records.push(RecordDef {
            name: "Outer".to_string(),
            slots: vec![("inner".to_string(), Type::Record("Inner".to_string()))],
        });
        program.records.push(RecordDef {
            name: "Inner".to_string(),
            slots: vec![("x".to_string(), Type::I32)],
        });
        let artifacts = emit_program(&program).expect("emit");
        let inner_at = artifacts.module_c.find("struct Inner {").expect("inner");
        let outer_at = artifacts.module_c.find("struct Outer {").expect("outer");
        assert!(inner_at < outer_at);
    }

    #[test]
    fn simple_function_round_trips_through_text() {
        let mut program = Program::default();
        program.functions.insert(
            "M__id".to_string(),
            Function {
                name: "M__id".to_string(),
                span: sable_hir::span_at_origin(),
                params: vec![Param {
                    name: "x".to_string(),
                    ty: Type::I32,
                }],
                ret: Type::I32,
                body: vec![Stmt::Return {
                    value: Expr::Var("x".to_string()),
                }],
            },
        );
        let artifacts = emit_program(&program).expect("emit");
        assert!(artifacts.module_c.contains("int32_t M__id(int32_t x) {"));
        assert!(artifacts.module_c.contains("return x;"));
    }
}
