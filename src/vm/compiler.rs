//! AST-to-bytecode code generator.
//!
//! A post-order tree walk over the parsed program; each node kind emits a
//! fixed opcode sequence. Forward control transfers are emitted with
//! placeholder targets and overwritten with `Program::fix` once the target
//! address becomes known.

use crate::ast::{Node, NodeKind};
use crate::error::CompileError;
use crate::value::Value;

use super::opcode::OpCode;
use super::program::Program;

pub type CompileResult<T> = Result<T, CompileError>;

/// The code generator: transforms an AST into a flat word array.
pub struct Compiler {
    program: Program,
    /// Source line of the statement being generated; every emitted word
    /// carries it for run-time diagnostics.
    line: usize,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
            line: 0,
        }
    }

    /// Compile a full program. Fails only on a node the generator does not
    /// recognize, which a successful parse never produces.
    pub fn compile(root: &Node) -> CompileResult<Program> {
        let mut compiler = Compiler::new();
        compiler.gen_stmt(root)?;
        Ok(compiler.program)
    }

    // --- Emit helpers ---

    fn emit(&mut self, op: OpCode) -> usize {
        self.program.emit(op, self.line)
    }

    fn emit_value(&mut self, value: Value) -> usize {
        self.program.emit_value(value, self.line)
    }

    /// Emit an address operand as a placeholder and return its offset.
    fn emit_placeholder(&mut self) -> usize {
        self.program.emit_addr(0, self.line)
    }

    fn here(&self) -> usize {
        self.program.len()
    }

    /// Overwrite a placeholder with the current address.
    fn fix_here(&mut self, at: usize) {
        let target = self.here();
        self.program.fix(at, target);
    }

    fn emit_named(&mut self, op: OpCode, name: &str) {
        self.emit(op);
        self.emit_value(Value::str(name));
    }

    fn emit_push(&mut self, value: Value) {
        self.emit(OpCode::Push);
        self.emit_value(value);
    }

    // --- Statements ---

    fn gen_stmt(&mut self, node: &Node) -> CompileResult<()> {
        self.line = node.line;
        match node.kind {
            NodeKind::Program => {
                for stmt in &node.children {
                    self.gen_stmt(stmt)?;
                }
                Ok(())
            }
            NodeKind::Block => {
                self.emit(OpCode::Frame);
                for stmt in &node.children {
                    self.gen_stmt(stmt)?;
                }
                self.line = node.line;
                self.emit(OpCode::Unframe);
                Ok(())
            }
            NodeKind::If => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::JumpFalse);
                let to_else = self.emit_placeholder();
                self.gen_stmt(&node.children[1])?;
                if let Some(else_branch) = node.children.get(2) {
                    self.emit(OpCode::Jump);
                    let to_end = self.emit_placeholder();
                    self.fix_here(to_else);
                    self.gen_stmt(else_branch)?;
                    self.fix_here(to_end);
                } else {
                    self.fix_here(to_else);
                }
                Ok(())
            }
            NodeKind::While => {
                let top = self.here();
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::JumpFalse);
                let to_exit = self.emit_placeholder();
                self.gen_stmt(&node.children[1])?;
                self.line = node.line;
                self.emit(OpCode::Jump);
                let back = self.emit_placeholder();
                self.program.fix(back, top);
                self.fix_here(to_exit);
                Ok(())
            }
            NodeKind::Foreach => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::IterNew);
                let top = self.here();
                self.emit(OpCode::Iter);
                let to_exit = self.emit_placeholder();
                // The cursor pushes value then key; bind into the current
                // frame.
                if node.names.len() == 2 {
                    self.emit_named(OpCode::Local, &node.names[0]);
                    self.emit_named(OpCode::Local, &node.names[1]);
                } else {
                    self.emit(OpCode::Pop); // discard the key
                    self.emit_named(OpCode::Local, &node.names[0]);
                }
                self.gen_stmt(&node.children[1])?;
                self.line = node.line;
                self.emit(OpCode::Jump);
                let back = self.emit_placeholder();
                self.program.fix(back, top);
                self.fix_here(to_exit);
                Ok(())
            }
            NodeKind::VarDecl => {
                if let Some(init) = node.children.first() {
                    // One evaluation, bound to every declared name.
                    self.gen_expr(init)?;
                    let count = node.names.len();
                    for (i, name) in node.names.iter().enumerate() {
                        if i + 1 < count {
                            self.emit(OpCode::Dup);
                        }
                        self.emit_named(OpCode::Local, name);
                    }
                } else {
                    for name in &node.names {
                        self.emit_push(Value::Null);
                        self.emit_named(OpCode::Local, name);
                    }
                }
                Ok(())
            }
            NodeKind::SubDef => {
                let path: Vec<&str> = node.text().split('.').collect();
                if path.len() > 1 {
                    // Pseudo-member target: read the holder chain first so
                    // the stack holds [holder, sub] for the store.
                    self.emit_named(OpCode::Get, path[0]);
                    for segment in &path[1..path.len() - 1] {
                        self.emit_named(OpCode::Member, segment);
                    }
                    self.gen_sub(node)?;
                    self.emit_named(OpCode::SetMember, path[path.len() - 1]);
                } else {
                    self.gen_sub(node)?;
                    self.emit_named(OpCode::Set, path[0]);
                }
                self.emit(OpCode::Pop);
                Ok(())
            }
            NodeKind::Return => {
                if let Some(value) = node.children.first() {
                    self.gen_expr(value)?;
                } else {
                    self.emit_push(Value::Null);
                }
                self.emit(OpCode::Ret);
                Ok(())
            }
            NodeKind::ExprStmt => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Pop);
                Ok(())
            }
            NodeKind::NoOp => Ok(()),
            other => Err(CompileError::unknown_node(format!("{:?}", other), node.line)),
        }
    }

    /// Compile a subroutine body, leaving the executable value on the
    /// stack: push the entry placeholder, jump over the body, fix both,
    /// with the body guarded by argument binding and a frame pop.
    fn gen_sub(&mut self, node: &Node) -> CompileResult<()> {
        self.emit(OpCode::Func);
        let entry_slot = self.emit_placeholder();
        self.emit(OpCode::Jump);
        let skip_body = self.emit_placeholder();

        self.fix_here(entry_slot);
        self.emit(OpCode::Arg);
        let formals = node.names.iter().map(|n| Value::str(n.clone())).collect();
        self.emit_value(Value::array(formals));

        // The body block's statements share the frame ARG created.
        let body = &node.children[0];
        for stmt in &body.children {
            self.gen_stmt(stmt)?;
        }
        self.line = node.line;
        self.emit_push(Value::Null);
        self.emit(OpCode::Unframe);
        self.emit(OpCode::Ret);

        self.fix_here(skip_body);
        Ok(())
    }

    // --- Expressions ---

    fn gen_expr(&mut self, node: &Node) -> CompileResult<()> {
        match node.kind {
            NodeKind::Load => self.gen_read(&node.children[0]),
            NodeKind::Ident | NodeKind::Member | NodeKind::Index => self.gen_read(node),
            NodeKind::NumLit | NodeKind::StrLit => {
                self.emit_push(Value::str(node.text()));
                Ok(())
            }
            NodeKind::Null => {
                self.emit_push(Value::Null);
                Ok(())
            }
            NodeKind::This => {
                self.emit_named(OpCode::Get, "this");
                Ok(())
            }
            NodeKind::ArrayLit => {
                self.emit_push(Value::array(Vec::new()));
                for element in &node.children {
                    self.gen_expr(element)?;
                    self.emit(OpCode::Append);
                }
                Ok(())
            }
            NodeKind::HashLit => {
                self.emit_push(Value::empty_hash());
                for pair in node.children.chunks(2) {
                    self.gen_expr(&pair[0])?;
                    self.gen_expr(&pair[1])?;
                    self.emit(OpCode::Insert);
                }
                Ok(())
            }
            NodeKind::SubLit => self.gen_sub(node),
            NodeKind::Spawn => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Spawn);
                Ok(())
            }
            NodeKind::Call => {
                self.gen_expr(&node.children[0])?;
                for argument in &node.children[1..] {
                    self.gen_expr(argument)?;
                }
                self.emit(OpCode::Call);
                self.program
                    .emit_count(node.children.len() - 1, self.line);
                Ok(())
            }
            NodeKind::Not => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Not);
                Ok(())
            }
            NodeKind::Neg => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Neg);
                Ok(())
            }
            NodeKind::And => {
                // Duplicate the left operand, test it, and discard it only
                // when the right side runs.
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Dup);
                self.emit(OpCode::JumpFalse);
                let short = self.emit_placeholder();
                self.emit(OpCode::Pop);
                self.gen_expr(&node.children[1])?;
                self.fix_here(short);
                Ok(())
            }
            NodeKind::Or => {
                self.gen_expr(&node.children[0])?;
                self.emit(OpCode::Dup);
                self.emit(OpCode::JumpTrue);
                let short = self.emit_placeholder();
                self.emit(OpCode::Pop);
                self.gen_expr(&node.children[1])?;
                self.fix_here(short);
                Ok(())
            }
            NodeKind::Mul
            | NodeKind::Div
            | NodeKind::Mod
            | NodeKind::Add
            | NodeKind::Sub
            | NodeKind::Lt
            | NodeKind::Le
            | NodeKind::Gt
            | NodeKind::Ge
            | NodeKind::Eq
            | NodeKind::Ne => {
                self.gen_expr(&node.children[0])?;
                self.gen_expr(&node.children[1])?;
                self.emit(binary_op(node.kind));
                Ok(())
            }
            NodeKind::Assign => self.gen_assign(&node.children[0], &node.children[1], None),
            NodeKind::AddAssign => {
                self.gen_assign(&node.children[0], &node.children[1], Some(OpCode::Add))
            }
            NodeKind::SubAssign => {
                self.gen_assign(&node.children[0], &node.children[1], Some(OpCode::Sub))
            }
            NodeKind::MulAssign => {
                self.gen_assign(&node.children[0], &node.children[1], Some(OpCode::Mul))
            }
            NodeKind::DivAssign => {
                self.gen_assign(&node.children[0], &node.children[1], Some(OpCode::Div))
            }
            NodeKind::ModAssign => {
                self.gen_assign(&node.children[0], &node.children[1], Some(OpCode::Mod))
            }
            NodeKind::PreInc => self.gen_step(&node.children[0], OpCode::Add, false),
            NodeKind::PreDec => self.gen_step(&node.children[0], OpCode::Sub, false),
            NodeKind::PostInc => self.gen_step(&node.children[0], OpCode::Add, true),
            NodeKind::PostDec => self.gen_step(&node.children[0], OpCode::Sub, true),
            other => Err(CompileError::unknown_node(format!("{:?}", other), node.line)),
        }
    }

    /// Read the current value of an addressable expression.
    fn gen_read(&mut self, node: &Node) -> CompileResult<()> {
        match node.kind {
            NodeKind::Ident => {
                self.emit_named(OpCode::Get, node.text());
                Ok(())
            }
            NodeKind::Member => {
                self.gen_expr(&node.children[0])?;
                self.emit_named(OpCode::Member, node.text());
                Ok(())
            }
            NodeKind::Index => {
                self.gen_expr(&node.children[0])?;
                self.gen_expr(&node.children[1])?;
                self.emit(OpCode::Index);
                Ok(())
            }
            NodeKind::Load => self.gen_read(&node.children[0]),
            other => Err(CompileError::unknown_node(format!("{:?}", other), node.line)),
        }
    }

    /// Assignment and compound assignment. All forms leave the stored
    /// value on the stack; compound forms duplicate the addressing
    /// information, read the current value, apply the operator and store.
    fn gen_assign(
        &mut self,
        target: &Node,
        value: &Node,
        op: Option<OpCode>,
    ) -> CompileResult<()> {
        match (target.kind, op) {
            (NodeKind::Ident, None) => {
                self.gen_expr(value)?;
                self.emit_named(OpCode::Set, target.text());
            }
            (NodeKind::Ident, Some(op)) => {
                self.emit_named(OpCode::Get, target.text());
                self.gen_expr(value)?;
                self.emit(op);
                self.emit_named(OpCode::Set, target.text());
            }
            (NodeKind::Member, None) => {
                self.gen_expr(&target.children[0])?;
                self.gen_expr(value)?;
                self.emit_named(OpCode::SetMember, target.text());
            }
            (NodeKind::Member, Some(op)) => {
                self.gen_expr(&target.children[0])?;
                self.emit(OpCode::Dup);
                self.emit_named(OpCode::Member, target.text());
                self.gen_expr(value)?;
                self.emit(op);
                self.emit_named(OpCode::SetMember, target.text());
            }
            (NodeKind::Index, None) => {
                self.gen_expr(&target.children[0])?;
                self.gen_expr(&target.children[1])?;
                self.gen_expr(value)?;
                self.emit(OpCode::SetIndex);
            }
            (NodeKind::Index, Some(op)) => {
                self.gen_expr(&target.children[0])?;
                self.gen_expr(&target.children[1])?;
                self.emit(OpCode::Dup2);
                self.emit(OpCode::Index);
                self.gen_expr(value)?;
                self.emit(op);
                self.emit(OpCode::SetIndex);
            }
            _ => return Err(CompileError::invalid_target(target.line)),
        }
        Ok(())
    }

    /// Increment/decrement. Prefix forms leave the new value; postfix
    /// forms leave the prior value.
    fn gen_step(&mut self, target: &Node, op: OpCode, postfix: bool) -> CompileResult<()> {
        match target.kind {
            NodeKind::Ident => {
                self.emit_named(OpCode::Get, target.text());
                if postfix {
                    self.emit(OpCode::Dup);
                }
                self.emit_push(Value::str("1"));
                self.emit(op);
                self.emit_named(OpCode::Set, target.text());
                if postfix {
                    self.emit(OpCode::Pop);
                }
            }
            NodeKind::Member => {
                self.gen_expr(&target.children[0])?;
                self.emit(OpCode::Dup);
                self.emit_named(OpCode::Member, target.text());
                self.emit_push(Value::str("1"));
                self.emit(op);
                self.emit_named(OpCode::SetMember, target.text());
                if postfix {
                    self.undo_step(op);
                }
            }
            NodeKind::Index => {
                self.gen_expr(&target.children[0])?;
                self.gen_expr(&target.children[1])?;
                self.emit(OpCode::Dup2);
                self.emit(OpCode::Index);
                self.emit_push(Value::str("1"));
                self.emit(op);
                self.emit(OpCode::SetIndex);
                if postfix {
                    self.undo_step(op);
                }
            }
            _ => return Err(CompileError::invalid_target(target.line)),
        }
        Ok(())
    }

    /// Recover the prior value after a container step: the stored new
    /// value is on the stack, so apply the inverse operator.
    fn undo_step(&mut self, op: OpCode) {
        self.emit_push(Value::str("1"));
        self.emit(if op == OpCode::Add {
            OpCode::Sub
        } else {
            OpCode::Add
        });
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn binary_op(kind: NodeKind) -> OpCode {
    match kind {
        NodeKind::Mul => OpCode::Mul,
        NodeKind::Div => OpCode::Div,
        NodeKind::Mod => OpCode::Mod,
        NodeKind::Add => OpCode::Add,
        NodeKind::Sub => OpCode::Sub,
        NodeKind::Lt => OpCode::Lt,
        NodeKind::Le => OpCode::Le,
        NodeKind::Gt => OpCode::Gt,
        NodeKind::Ge => OpCode::Ge,
        NodeKind::Eq => OpCode::Eq,
        NodeKind::Ne => OpCode::Ne,
        other => unreachable!("not a binary operator: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::vm::program::Word;

    fn compile(source: &str) -> Program {
        let root = Parser::new(source).parse().expect("parse failed");
        Compiler::compile(&root).expect("compile failed")
    }

    fn ops(program: &Program) -> Vec<OpCode> {
        program
            .words
            .iter()
            .filter_map(|w| match w {
                Word::Op(op) => Some(*op),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_expression_statement_shape() {
        let program = compile("1 + 2;");
        assert_eq!(
            ops(&program),
            vec![
                OpCode::Push,
                OpCode::Push,
                OpCode::Add,
                OpCode::Pop
            ]
        );
    }

    #[test]
    fn test_if_without_else_emits_one_conditional_jump() {
        let program = compile("if (1) { }");
        let jump_count = ops(&program)
            .iter()
            .filter(|op| matches!(op, OpCode::Jump | OpCode::JumpFalse))
            .count();
        assert_eq!(jump_count, 1);
    }

    #[test]
    fn test_if_else_emits_conditional_and_unconditional_jumps() {
        let program = compile("if (1) { } else { }");
        let shapes = ops(&program);
        assert!(shapes.contains(&OpCode::JumpFalse));
        assert!(shapes.contains(&OpCode::Jump));
    }

    #[test]
    fn test_while_backpatches_exit_past_loop() {
        let program = compile("while (0) { }");
        // JMP_FALSE operand must point one past the backward jump.
        let exit = program.addr_at(3).expect("exit target");
        assert_eq!(exit, program.len());
        // The backward jump returns to the loop top.
        let back = program.addr_at(program.len() - 1).expect("loop target");
        assert_eq!(back, 0);
    }

    #[test]
    fn test_every_placeholder_is_patched() {
        let program = compile(
            "var i = 0; while (i < 3) { if (i == 1) { i = 2; } else { i++; } } \
             sub f(x) { return x; } f(1);",
        );
        for (at, word) in program.words.iter().enumerate() {
            if let Word::Addr(target) = word {
                assert!(
                    *target <= program.len(),
                    "unpatched or wild target {} at {}",
                    target,
                    at
                );
                // Placeholders start at 0; a genuine target of 0 only makes
                // sense for a loop back-jump, which this program lacks at
                // address 0.
                assert!(*target != 0, "unpatched placeholder at {}", at);
            }
        }
    }

    #[test]
    fn test_sub_definition_jumps_over_body() {
        let program = compile("sub f() { return 1; }");
        assert_eq!(program.op_at(0), Some(OpCode::Func));
        let entry = program.addr_at(1).expect("entry");
        assert_eq!(program.op_at(2), Some(OpCode::Jump));
        let after = program.addr_at(3).expect("skip target");
        // The entry lands right after the skip jump, on the ARG binding.
        assert_eq!(entry, 4);
        assert_eq!(program.op_at(entry), Some(OpCode::Arg));
        // The skip jump lands past the body, on the store of the sub.
        assert_eq!(program.op_at(after), Some(OpCode::Set));
    }

    #[test]
    fn test_short_circuit_and_shape() {
        let program = compile("1 && 2;");
        assert_eq!(
            ops(&program),
            vec![
                OpCode::Push,
                OpCode::Dup,
                OpCode::JumpFalse,
                OpCode::Pop,
                OpCode::Push,
                OpCode::Pop
            ]
        );
    }

    #[test]
    fn test_compound_assign_duplicates_addressing() {
        let program = compile("a[0] += 1;");
        let shapes = ops(&program);
        assert!(shapes.contains(&OpCode::Dup2));
        assert!(shapes.contains(&OpCode::SetIndex));
    }

    #[test]
    fn test_block_frames() {
        let program = compile("{ var a; }");
        let shapes = ops(&program);
        assert_eq!(shapes.first(), Some(&OpCode::Frame));
        assert_eq!(shapes.last(), Some(&OpCode::Unframe));
    }

    #[test]
    fn test_foreach_iterates_with_cursor() {
        let program = compile("foreach (k, v in [1]) { }");
        let shapes = ops(&program);
        assert!(shapes.contains(&OpCode::IterNew));
        assert!(shapes.contains(&OpCode::Iter));
    }

    #[test]
    fn test_dotted_sub_definition_targets_member() {
        let program = compile("var h = {}; sub h.go() { }");
        let shapes = ops(&program);
        assert!(shapes.contains(&OpCode::SetMember));
    }
}
