//! The virtual machine: a stack-based, time-sliced, resumable execution
//! engine over the flat word array.
//!
//! Symbol resolution is dynamic: a linear search from the innermost active
//! frame down to the globals, with a type-dispatch fallback when a
//! receiver is present. Run-time faults never unwind through host
//! machinery — the loop records a diagnostic in the `errors` global and
//! switches to the Error mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Fault;
use crate::value::{native, ChannelEnd, Frame, Value};

use super::opcode::OpCode;
use super::program::Program;

static NULL: Value = Value::Null;

/// The run mode of an execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Not running; a completed run also ends here.
    #[default]
    Idle,
    /// Inside the dispatch loop.
    Running,
    /// The time slice expired; the state is intact and resumable.
    Timeout,
    /// A run-time fault stopped the loop; see the `errors` global.
    Error,
}

/// A call site saved on the call-return stack.
struct ReturnSite {
    program: Arc<Program>,
    pc: usize,
    frame_depth: usize,
    /// Open iteration cursors at call time; a return from inside a
    /// foreach discards the callee's cursors.
    cursor_depth: usize,
    receiver: Option<Value>,
}

/// Iteration cursor for foreach; lives in the execution state so the
/// shared program stays read-only.
enum Cursor {
    /// Array and string iteration: the key is the element index.
    Items { items: Vec<Value>, index: usize },
    /// Hash iteration in insertion order.
    Pairs {
        pairs: Vec<(String, Value)>,
        index: usize,
    },
}

/// A virtual machine instance: one execution state plus the global frame
/// it owns. Spawned instances get a fresh one each.
pub struct Vm {
    pub stack: Vec<Value>,
    calls: Vec<ReturnSite>,
    pub frames: Vec<Frame>,
    pub pc: usize,
    pub mode: RunMode,
    /// Instructions executed across all runs of this instance.
    pub counter: u64,
    program: Option<Arc<Program>>,
    receiver: Option<Value>,
    pending_receiver: Option<Value>,
    pending_args: usize,
    cursors: Vec<Cursor>,
    last: Value,
}

impl Vm {
    pub fn new() -> Self {
        let mut globals = Frame::default();
        native::install(&mut globals);
        globals.insert("errors".to_string(), Value::str(""));
        Self {
            stack: Vec::with_capacity(64),
            calls: Vec::new(),
            frames: vec![globals],
            pc: 0,
            mode: RunMode::Idle,
            counter: 0,
            program: None,
            receiver: None,
            pending_receiver: None,
            pending_args: 0,
            cursors: Vec::new(),
            last: Value::Null,
        }
    }

    /// Define (or overwrite) a global binding.
    pub fn define_global(&mut self, name: &str, value: Value) {
        self.frames[0].insert(name.to_string(), value);
    }

    /// The contents of the `errors` global.
    pub fn error_slot(&self) -> String {
        match self.frames[0].get("errors") {
            Some(Value::Str(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Append a diagnostic to the `errors` global.
    pub fn record_error(&mut self, message: &str) {
        let mut slot = self.error_slot();
        if !slot.is_empty() {
            slot.push('\n');
        }
        slot.push_str(message);
        self.frames[0].insert("errors".to_string(), Value::Str(slot));
    }

    /// The last computed result: the value a finished run returned, or the
    /// value of the last expression statement.
    pub fn result(&self) -> Value {
        self.last.clone()
    }

    /// Compile a source value (string or open file handle). On a syntax
    /// error no executable is produced and the diagnostic is written to
    /// the error slot.
    pub fn compile_source(&mut self, input: &Value) -> Option<Value> {
        match crate::compile(input) {
            Ok(exec) => Some(exec),
            Err(err) => {
                self.record_error(&crate::syntax_diagnostic(&err));
                None
            }
        }
    }

    /// Run an executable value to completion and return its result. The
    /// optional receiver seeds the implicit `this` for dispatch lookups.
    pub fn execute(&mut self, exec: &Value, args: &[Value], receiver: Option<Value>) -> Value {
        let Value::Exec(program, entry) = exec else {
            self.mode = RunMode::Error;
            self.record_error(":0: error: execute of a non-executable value");
            return Value::Null;
        };
        let program = program.clone();
        let entry = *entry;
        self.mode = RunMode::Idle;
        self.receiver = receiver;
        self.run(&program, entry, args, None);
        self.result()
    }

    /// Drive the execution state.
    ///
    /// Starts a fresh run at `entry` unless the previous run timed out, in
    /// which case execution resumes exactly where it stopped and the
    /// entry/argument parameters are ignored. With a millisecond budget the
    /// wall clock is checked after every instruction; expiry parks the
    /// state in `RunMode::Timeout` without losing anything.
    pub fn run(
        &mut self,
        program: &Arc<Program>,
        entry: usize,
        args: &[Value],
        max_millis: Option<u64>,
    ) -> RunMode {
        if self.mode != RunMode::Timeout {
            self.stack.clear();
            self.calls.clear();
            self.cursors.clear();
            self.frames.truncate(1);
            self.pc = entry;
            self.program = Some(program.clone());
            self.pending_args = args.len();
            self.pending_receiver = None;
            self.last = Value::Null;
            for arg in args {
                self.stack.push(arg.clone());
            }
        }
        self.mode = RunMode::Running;
        let deadline = max_millis.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut prog = match &self.program {
            Some(p) => p.clone(),
            None => {
                self.mode = RunMode::Idle;
                return self.mode;
            }
        };

        while self.mode == RunMode::Running {
            if self.pc >= prog.len() {
                // Ran off the end of the program.
                self.mode = RunMode::Idle;
                break;
            }
            let op_pc = self.pc;
            let line = prog.line_at(op_pc);
            let Some(op) = prog.op_at(op_pc) else {
                self.fault(line, Fault::native("corrupt program: operand in opcode position"));
                break;
            };
            self.pc += 1;

            let step: Result<(), Fault> = match op {
                OpCode::Push => {
                    let value = self.fetch_value(&prog);
                    let value = match value {
                        Value::Array(_) | Value::Hash(_) => value.deep_clone(),
                        other => other,
                    };
                    self.stack.push(value);
                    Ok(())
                }
                OpCode::Pop => {
                    self.last = self.pop();
                    Ok(())
                }
                OpCode::Dup => {
                    let top = self.peek().clone();
                    self.stack.push(top);
                    Ok(())
                }
                OpCode::Dup2 => {
                    let len = self.stack.len();
                    if len < 2 {
                        Err(Fault::native("stack underflow"))
                    } else {
                        let a = self.stack[len - 2].clone();
                        let b = self.stack[len - 1].clone();
                        self.stack.push(a);
                        self.stack.push(b);
                        Ok(())
                    }
                }

                OpCode::Get => {
                    let name = self.fetch_value(&prog).as_key();
                    self.resolve_symbol(&name)
                }
                OpCode::Set => {
                    let name = self.fetch_value(&prog).as_key();
                    let value = self.peek().clone();
                    match self.frames.iter_mut().rev().find(|f| f.contains_key(&name)) {
                        Some(frame) => {
                            frame.insert(name, value);
                        }
                        None => {
                            self.frames
                                .last_mut()
                                .expect("frame stack is never empty")
                                .insert(name, value);
                        }
                    }
                    Ok(())
                }
                OpCode::Local => {
                    let name = self.fetch_value(&prog).as_key();
                    let value = self.pop();
                    self.frames
                        .last_mut()
                        .expect("frame stack is never empty")
                        .insert(name, value);
                    Ok(())
                }

                OpCode::Member => {
                    let name = self.fetch_value(&prog).as_key();
                    let holder = self.pop();
                    self.read_member(holder, &name)
                }
                OpCode::SetMember => {
                    let name = self.fetch_value(&prog).as_key();
                    let value = self.pop();
                    let holder = self.pop();
                    match &holder {
                        Value::Hash(mapping) => {
                            mapping.lock().unwrap().insert(name, value.clone());
                            self.stack.push(value);
                            Ok(())
                        }
                        other => Err(Fault::bad_holder("assign member of", other.type_name())),
                    }
                }
                OpCode::Index => {
                    let key = self.pop();
                    let holder = self.pop();
                    self.read_index(holder, key)
                }
                OpCode::SetIndex => {
                    let value = self.pop();
                    let key = self.pop();
                    let holder = self.pop();
                    self.write_index(holder, key, value)
                }
                OpCode::Append => {
                    let value = self.pop();
                    match self.peek() {
                        Value::Array(items) => {
                            items.lock().unwrap().push(value);
                            Ok(())
                        }
                        other => Err(Fault::bad_holder("append to", other.type_name())),
                    }
                }
                OpCode::Insert => {
                    let value = self.pop();
                    let key = self.pop().as_key();
                    match self.peek() {
                        Value::Hash(mapping) => {
                            mapping.lock().unwrap().insert(key, value);
                            Ok(())
                        }
                        other => Err(Fault::bad_holder("insert into", other.type_name())),
                    }
                }

                OpCode::Frame => {
                    self.frames.push(Frame::default());
                    Ok(())
                }
                OpCode::Unframe => {
                    if self.frames.len() > 1 {
                        self.frames.pop();
                    }
                    Ok(())
                }

                OpCode::Jump => {
                    self.pc = self.fetch_addr(&prog);
                    Ok(())
                }
                OpCode::JumpFalse => {
                    let target = self.fetch_addr(&prog);
                    if !self.pop().is_true() {
                        self.pc = target;
                    }
                    Ok(())
                }
                OpCode::JumpTrue => {
                    let target = self.fetch_addr(&prog);
                    if self.pop().is_true() {
                        self.pc = target;
                    }
                    Ok(())
                }

                OpCode::IterNew => {
                    let container = self.pop();
                    self.open_cursor(container)
                }
                OpCode::Iter => {
                    let exit = self.fetch_addr(&prog);
                    self.advance_cursor(exit);
                    Ok(())
                }

                OpCode::Call => {
                    let argc = self.fetch_count(&prog);
                    match self.call_value(argc, &prog) {
                        Ok(Some(next)) => {
                            prog = next;
                            Ok(())
                        }
                        Ok(None) => Ok(()),
                        Err(fault) => Err(fault),
                    }
                }
                OpCode::Arg => {
                    let formals = self.fetch_value(&prog);
                    self.bind_arguments(formals);
                    Ok(())
                }
                OpCode::Ret => {
                    match self.calls.pop() {
                        Some(site) => {
                            self.frames.truncate(site.frame_depth.max(1));
                            self.cursors.truncate(site.cursor_depth);
                            self.receiver = site.receiver;
                            self.pc = site.pc;
                            self.program = Some(site.program.clone());
                            prog = site.program;
                        }
                        None => {
                            // Returning past an empty call stack ends the
                            // program.
                            self.last = self.stack.last().cloned().unwrap_or(Value::Null);
                            self.mode = RunMode::Idle;
                        }
                    }
                    Ok(())
                }
                OpCode::Func => {
                    let entry = self.fetch_addr(&prog);
                    self.stack.push(Value::Exec(prog.clone(), entry));
                    Ok(())
                }
                OpCode::Spawn => {
                    let target = self.pop();
                    self.spawn_instance(target)
                }

                OpCode::Add => self.binary_number(|a, b| a + b),
                OpCode::Sub => self.binary_number(|a, b| a - b),
                OpCode::Mul => self.binary_number(|a, b| a * b),
                OpCode::Div => self.binary_number(|a, b| a / b),
                OpCode::Mod => {
                    let b = self.pop().to_int();
                    let a = self.pop().to_int();
                    if b == 0 {
                        Err(Fault::native("modulo by zero"))
                    } else {
                        self.stack.push(Value::number((a % b) as f64));
                        Ok(())
                    }
                }
                OpCode::Neg => {
                    let value = self.pop();
                    self.stack.push(Value::number(-value.to_number()));
                    Ok(())
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.stack.push(Value::bool(!value.is_true()));
                    Ok(())
                }
                OpCode::Eq => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::bool(a == b));
                    Ok(())
                }
                OpCode::Ne => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::bool(a != b));
                    Ok(())
                }
                OpCode::Lt => self.binary_compare(|a, b| a < b),
                OpCode::Le => self.binary_compare(|a, b| a <= b),
                OpCode::Gt => self.binary_compare(|a, b| a > b),
                OpCode::Ge => self.binary_compare(|a, b| a >= b),
            };

            self.counter += 1;
            if let Err(fault) = step {
                self.fault(line, fault);
                break;
            }
            if let Some(deadline) = deadline {
                if self.mode == RunMode::Running && Instant::now() >= deadline {
                    self.mode = RunMode::Timeout;
                    break;
                }
            }
        }
        self.mode
    }

    // --- Operand fetches (the word after the opcode) ---

    fn fetch_value(&mut self, prog: &Program) -> Value {
        let value = prog.value_at(self.pc).cloned().unwrap_or(Value::Null);
        self.pc += 1;
        value
    }

    fn fetch_addr(&mut self, prog: &Program) -> usize {
        let target = prog.addr_at(self.pc).unwrap_or(usize::MAX);
        self.pc += 1;
        target
    }

    fn fetch_count(&mut self, prog: &Program) -> usize {
        let count = prog.count_at(self.pc).unwrap_or(0);
        self.pc += 1;
        count
    }

    // --- Stack helpers ---

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Null)
    }

    fn peek(&self) -> &Value {
        self.stack.last().unwrap_or(&NULL)
    }

    fn binary_number(&mut self, op: fn(f64, f64) -> f64) -> Result<(), Fault> {
        let b = self.pop().to_number();
        let a = self.pop().to_number();
        self.stack.push(Value::number(op(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, op: fn(f64, f64) -> bool) -> Result<(), Fault> {
        let b = self.pop().to_number();
        let a = self.pop().to_number();
        self.stack.push(Value::bool(op(a, b)));
        Ok(())
    }

    // --- Symbol resolution ---

    /// Search the frames from the innermost down to the globals; then, with
    /// a receiver present, the type dispatch table; `this` reads the
    /// receiver itself.
    fn resolve_symbol(&mut self, name: &str) -> Result<(), Fault> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                let value = value.clone();
                self.pending_receiver = None;
                self.stack.push(value);
                return Ok(());
            }
        }
        if name == "this" {
            let value = self.receiver.clone().unwrap_or(Value::Null);
            self.pending_receiver = None;
            self.stack.push(value);
            return Ok(());
        }
        if let Some(receiver) = self.receiver.clone() {
            if let Some((label, f)) = native::dispatch_entry(receiver.type_name(), name) {
                self.pending_receiver = Some(receiver);
                self.stack.push(Value::Native(label, f));
                return Ok(());
            }
        }
        Err(Fault::UndefinedSymbol(name.to_string()))
    }

    /// Member read: a hash member when present, otherwise a dispatch-table
    /// method with the holder as pending receiver.
    fn read_member(&mut self, holder: Value, name: &str) -> Result<(), Fault> {
        if let Value::Hash(mapping) = &holder {
            let found = mapping.lock().unwrap().get(name).cloned();
            if let Some(value) = found {
                self.pending_receiver = Some(holder);
                self.stack.push(value);
                return Ok(());
            }
        }
        if let Some((label, f)) = native::dispatch_entry(holder.type_name(), name) {
            self.pending_receiver = Some(holder);
            self.stack.push(Value::Native(label, f));
            return Ok(());
        }
        match &holder {
            // A missing hash member reads as null.
            Value::Hash(_) => {
                self.pending_receiver = Some(holder);
                self.stack.push(Value::Null);
                Ok(())
            }
            other => Err(Fault::bad_holder("read member of", other.type_name())),
        }
    }

    fn read_index(&mut self, holder: Value, key: Value) -> Result<(), Fault> {
        let value = match &holder {
            Value::Array(items) => {
                let items = items.lock().unwrap();
                let index = key.to_int();
                if index >= 0 {
                    items.get(index as usize).cloned().unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            Value::Hash(mapping) => mapping
                .lock()
                .unwrap()
                .get(&key.as_key())
                .cloned()
                .unwrap_or(Value::Null),
            // Subscripting a string reads one character.
            Value::Str(s) => {
                let index = key.to_int();
                if index >= 0 {
                    s.chars()
                        .nth(index as usize)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or(Value::Null)
                } else {
                    Value::Null
                }
            }
            other => return Err(Fault::bad_holder("subscript", other.type_name())),
        };
        self.stack.push(value);
        Ok(())
    }

    fn write_index(&mut self, holder: Value, key: Value, value: Value) -> Result<(), Fault> {
        match &holder {
            Value::Array(items) => {
                let index = key.to_int();
                if index < 0 {
                    return Err(Fault::native(format!("bad array index {}", index)));
                }
                let index = index as usize;
                let mut items = items.lock().unwrap();
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items[index] = value.clone();
            }
            Value::Hash(mapping) => {
                mapping.lock().unwrap().insert(key.as_key(), value.clone());
            }
            other => return Err(Fault::bad_holder("assign into", other.type_name())),
        }
        self.stack.push(value);
        Ok(())
    }

    // --- Iteration ---

    fn open_cursor(&mut self, container: Value) -> Result<(), Fault> {
        let cursor = match &container {
            Value::Array(items) => Cursor::Items {
                items: items.lock().unwrap().clone(),
                index: 0,
            },
            Value::Hash(mapping) => Cursor::Pairs {
                pairs: mapping
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                index: 0,
            },
            Value::Str(s) => Cursor::Items {
                items: s.chars().map(|c| Value::Str(c.to_string())).collect(),
                index: 0,
            },
            other => return Err(Fault::bad_holder("iterate", other.type_name())),
        };
        self.cursors.push(cursor);
        Ok(())
    }

    /// One step of the stateful iterate instruction: push value then key,
    /// or branch out when the cursor is exhausted.
    fn advance_cursor(&mut self, exit: usize) {
        let done = match self.cursors.last_mut() {
            Some(Cursor::Items { items, index }) => {
                if *index < items.len() {
                    let value = items[*index].clone();
                    let key = Value::number(*index as f64);
                    *index += 1;
                    self.stack.push(value);
                    self.stack.push(key);
                    false
                } else {
                    true
                }
            }
            Some(Cursor::Pairs { pairs, index }) => {
                if *index < pairs.len() {
                    let (key, value) = pairs[*index].clone();
                    *index += 1;
                    self.stack.push(value);
                    self.stack.push(Value::Str(key));
                    false
                } else {
                    true
                }
            }
            None => true,
        };
        if done {
            self.cursors.pop();
            self.pc = exit;
        }
    }

    // --- Calls ---

    /// Dispatch a call. Returns the program to continue fetching from when
    /// the callee is an executable with its own program.
    fn call_value(
        &mut self,
        argc: usize,
        prog: &Arc<Program>,
    ) -> Result<Option<Arc<Program>>, Fault> {
        if self.stack.len() < argc + 1 {
            return Err(Fault::native("stack underflow in call"));
        }
        let callee_at = self.stack.len() - 1 - argc;
        let callee = self.stack.remove(callee_at);
        match callee {
            Value::Native(_, f) => {
                let args = self.stack.split_off(self.stack.len() - argc);
                let receiver = self.pending_receiver.take();
                let result = f(receiver.as_ref(), &args)?;
                self.stack.push(result);
                Ok(None)
            }
            Value::Exec(target, entry) => {
                let receiver = std::mem::replace(&mut self.receiver, self.pending_receiver.take());
                self.calls.push(ReturnSite {
                    program: prog.clone(),
                    pc: self.pc,
                    frame_depth: self.frames.len(),
                    cursor_depth: self.cursors.len(),
                    receiver,
                });
                self.pending_args = argc;
                self.pc = entry;
                self.program = Some(target.clone());
                Ok(Some(target))
            }
            other => Err(Fault::NotCallable(other.type_name())),
        }
    }

    /// Bind the pending actuals to the formal names in a fresh frame.
    /// Missing actuals bind to null; extras are dropped.
    fn bind_arguments(&mut self, formals: Value) {
        let argc = std::mem::take(&mut self.pending_args);
        let take = argc.min(self.stack.len());
        let actuals = self.stack.split_off(self.stack.len() - take);
        let names: Vec<String> = match formals {
            Value::Array(items) => items.lock().unwrap().iter().map(Value::as_key).collect(),
            _ => Vec::new(),
        };
        let mut frame = Frame::default();
        for (i, name) in names.into_iter().enumerate() {
            frame.insert(name, actuals.get(i).cloned().unwrap_or(Value::Null));
        }
        self.frames.push(frame);
    }

    // --- Spawn ---

    /// Start an independent instance on a host thread: fresh state, shared
    /// read-only program, a crossed channel pair between the two.
    fn spawn_instance(&mut self, target: Value) -> Result<(), Fault> {
        let Value::Exec(program, entry) = target else {
            return Err(Fault::NotCallable(target.type_name()));
        };
        let (parent, child) = ChannelEnd::pair();
        let child_end = Value::Channel(Arc::new(child));
        std::thread::spawn(move || {
            let mut vm = Vm::new();
            vm.run(&program, entry, &[child_end], None);
        });
        self.stack.push(Value::Channel(Arc::new(parent)));
        Ok(())
    }

    // --- Faults ---

    fn fault(&mut self, line: usize, fault: Fault) {
        self.mode = RunMode::Error;
        self.record_error(&format!(":{}: error: {}", line, fault));
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::Parser;
    use crate::vm::compiler::Compiler;
    use crate::vm::peephole;

    fn compile(source: &str) -> Arc<Program> {
        let root = Parser::new(source).parse().expect("parse failed");
        Arc::new(peephole::fold(
            Compiler::compile(&root).expect("compile failed"),
        ))
    }

    fn run(source: &str) -> (Vm, Value) {
        let program = compile(source);
        let mut vm = Vm::new();
        vm.run(&program, 0, &[], None);
        let result = vm.result();
        (vm, result)
    }

    fn eval(source: &str) -> Value {
        let (vm, result) = run(source);
        assert_eq!(vm.mode, RunMode::Idle, "errors: {}", vm.error_slot());
        result
    }

    // --- Arithmetic and precedence ---

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("2 + 3 * 4;"), Value::str("14"));
        assert_eq!(eval("(2 + 3) * 4;"), Value::str("20"));
        assert_eq!(eval("2 - 3 - 4;"), Value::str("-5"));
        assert_eq!(eval("5 / 2;"), Value::str("2.5"));
        assert_eq!(eval("-5 + 2;"), Value::str("-3"));
    }

    #[test]
    fn test_modulo_coerces_to_integer() {
        assert_eq!(eval("7 % 3;"), Value::str("1"));
        assert_eq!(eval("7.9 % 3.9;"), Value::str("1"));
    }

    #[test]
    fn test_modulo_by_zero_faults() {
        let (vm, _) = run("1 % 0;");
        assert_eq!(vm.mode, RunMode::Error);
    }

    // --- Truthiness ---

    #[test]
    fn test_truthiness_in_boolean_context() {
        assert_eq!(eval("var r; if (\"0\") { r = 1; } else { r = 2; } r;"), Value::str("2"));
        assert_eq!(eval("var r; if (\"0.0\") { r = 1; } else { r = 2; } r;"), Value::str("1"));
        assert_eq!(eval("var r; if (\"\") { r = 1; } else { r = 2; } r;"), Value::str("2"));
        assert_eq!(eval("var r; if (null) { r = 1; } else { r = 2; } r;"), Value::str("2"));
        assert_eq!(eval("var r; if ([]) { r = 1; } else { r = 2; } r;"), Value::str("1"));
    }

    // --- Short circuit ---

    #[test]
    fn test_and_skips_rhs_when_lhs_is_falsy() {
        let source = "var n = 0; sub f() { n = n + 1; return 1; } 0 && f(); n;";
        assert_eq!(eval(source), Value::str("0"));
    }

    #[test]
    fn test_or_skips_rhs_when_lhs_is_truthy() {
        let source = "var n = 0; sub f() { n = n + 1; return 1; } 1 || f(); n;";
        assert_eq!(eval(source), Value::str("0"));
    }

    #[test]
    fn test_and_evaluates_rhs_when_lhs_is_truthy() {
        let source = "var n = 0; sub f() { n = n + 1; return 1; } 1 && f(); n;";
        assert_eq!(eval(source), Value::str("1"));
    }

    #[test]
    fn test_logical_result_is_an_operand_value() {
        assert_eq!(eval("\"\" || \"x\";"), Value::str("x"));
        assert_eq!(eval("\"0\" && 5;"), Value::str("0"));
    }

    // --- Scope ---

    #[test]
    fn test_block_local_shadows_without_leaking() {
        assert_eq!(eval("var a = 1; { var a = 2; } a;"), Value::str("1"));
    }

    #[test]
    fn test_assignment_mutates_the_defining_frame() {
        assert_eq!(eval("var a = 1; { a = 2; } a;"), Value::str("2"));
    }

    #[test]
    fn test_block_local_invisible_after_exit() {
        let (vm, _) = run("{ var b = 1; } b;");
        assert_eq!(vm.mode, RunMode::Error);
        assert!(vm.error_slot().contains("undefined symbol 'b'"));
    }

    #[test]
    fn test_dynamic_scope_resolves_against_caller_frames() {
        let source = "
            sub get() { return x; }
            sub one() { var x = \"one\"; return get(); }
            sub two() { var x = \"two\"; return get(); }
            [one(), two()];
        ";
        assert_eq!(
            eval(source),
            Value::array(vec![Value::str("one"), Value::str("two")])
        );
    }

    #[test]
    fn test_recursive_frame_mutation_across_calls() {
        let source = "
            var depth = 0;
            sub descend(n) { depth = depth + 1; if (n > 1) { descend(n - 1); } }
            descend(4); depth;
        ";
        assert_eq!(eval(source), Value::str("4"));
    }

    // --- Control flow ---

    #[test]
    fn test_while_trip_count() {
        assert_eq!(eval("var a = 0; while (a < 100) { a++; } a;"), Value::str("100"));
    }

    #[test]
    fn test_if_else_runs_exactly_one_branch() {
        assert_eq!(
            eval("var a = 0; if (1) { a = 1; } else { a = 2; } a;"),
            Value::str("1")
        );
        assert_eq!(
            eval("var a = 0; if (0) { a = 1; } else { a = 2; } a;"),
            Value::str("2")
        );
    }

    #[test]
    fn test_foreach_over_array_binds_index_and_value() {
        assert_eq!(
            eval("var sum = 0; foreach (v in [1, 2, 3]) { sum += v; } sum;"),
            Value::str("6")
        );
        assert_eq!(
            eval("var last = null; foreach (k, v in [5, 6]) { last = k; } last;"),
            Value::str("1")
        );
    }

    #[test]
    fn test_foreach_over_hash_in_insertion_order() {
        assert_eq!(
            eval("var ks = []; foreach (k, v in {a: 1, b: 2}) { ks.push(k); } ks;"),
            Value::array(vec![Value::str("a"), Value::str("b")])
        );
    }

    #[test]
    fn test_foreach_over_string_characters() {
        assert_eq!(
            eval("var out = []; foreach (c in \"ab\") { out.push(c); } out;"),
            Value::array(vec![Value::str("a"), Value::str("b")])
        );
    }

    // --- Subroutines ---

    #[test]
    fn test_recursion() {
        let source = "
            sub fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
            fib(10);
        ";
        assert_eq!(eval(source), Value::str("55"));
    }

    #[test]
    fn test_missing_actuals_bind_to_null() {
        assert_eq!(
            eval("sub probe(a, b) { return b == null; } probe(1);"),
            Value::str("1")
        );
    }

    #[test]
    fn test_sub_literal_assigned_and_called() {
        assert_eq!(
            eval("var twice = sub (x) { return x * 2; }; twice(21);"),
            Value::str("42")
        );
    }

    #[test]
    fn test_implicit_return_is_null() {
        assert_eq!(eval("sub noop() { } noop() == null;"), Value::str("1"));
    }

    // --- Members, subscripts, increments ---

    #[test]
    fn test_member_and_subscript_stores() {
        assert_eq!(eval("var h = {}; h.x = 5; h.x;"), Value::str("5"));
        assert_eq!(eval("var xs = [1, 2]; xs[1] = 9; xs[1];"), Value::str("9"));
        assert_eq!(eval("\"abc\"[1];"), Value::str("b"));
    }

    #[test]
    fn test_dotted_sub_definition() {
        assert_eq!(
            eval("var api = {}; sub api.get(x) { return x; } api.get(7);"),
            Value::str("7")
        );
    }

    #[test]
    fn test_increment_forms() {
        assert_eq!(eval("var a = 5; var b = a++; [a, b];"),
            Value::array(vec![Value::str("6"), Value::str("5")]));
        assert_eq!(eval("var a = 5; var b = ++a; [a, b];"),
            Value::array(vec![Value::str("6"), Value::str("6")]));
        assert_eq!(eval("var xs = [1]; xs[0] += 41; xs[0];"), Value::str("42"));
        assert_eq!(eval("var h = {n: 1}; h.n++; h.n;"), Value::str("2"));
        assert_eq!(eval("var xs = [7]; var old = xs[0]++; [old, xs[0]];"),
            Value::array(vec![Value::str("7"), Value::str("8")]));
    }

    #[test]
    fn test_var_initializer_binds_every_name() {
        assert_eq!(
            eval("var a, b = 1; [a, b];"),
            Value::array(vec![Value::str("1"), Value::str("1")])
        );
    }

    // --- Equality ---

    #[test]
    fn test_null_equals_only_null() {
        assert_eq!(eval("null == null;"), Value::str("1"));
        assert_eq!(eval("null == 0;"), Value::str("0"));
        assert_eq!(eval("null != 1;"), Value::str("1"));
    }

    // --- Dispatch fallback ---

    #[test]
    fn test_dispatch_method_on_array_receiver() {
        assert_eq!(eval("var xs = [1, 2]; xs.push(3); len(xs);"), Value::str("3"));
    }

    #[test]
    fn test_dispatch_method_on_string_receiver() {
        assert_eq!(eval("\"abc\".len();"), Value::str("3"));
        assert_eq!(eval("\"abc\".upper();"), Value::str("ABC"));
    }

    #[test]
    fn test_dispatch_method_on_hash_receiver() {
        assert_eq!(eval("var h = {a: 1}; h.has(\"a\");"), Value::str("1"));
        assert_eq!(eval("var h = {a: 1}; h.has(\"b\");"), Value::str("0"));
    }

    #[test]
    fn test_execute_seeds_receiver_for_this() {
        let program = compile("this;");
        let exec = Value::Exec(program, 0);
        let mut vm = Vm::new();
        let result = vm.execute(&exec, &[], Some(Value::str("receiver")));
        assert_eq!(result, Value::str("receiver"));
    }

    #[test]
    fn test_execute_calls_a_compiled_sub_with_args() {
        let (mut vm, sub) = run("sub add(a, b) { return a + b; } add;");
        let result = vm.execute(&sub, &[Value::str("2"), Value::str("3")], None);
        assert_eq!(result, Value::str("5"));
    }

    // --- Faults ---

    #[test]
    fn test_undefined_symbol_sets_error_mode_and_slot() {
        let (vm, _) = run("missing;");
        assert_eq!(vm.mode, RunMode::Error);
        assert_eq!(vm.error_slot(), ":1: error: undefined symbol 'missing'");
    }

    #[test]
    fn test_bad_holder_subscript() {
        let (vm, _) = run("var n; n[0];");
        assert_eq!(vm.mode, RunMode::Error);
        assert!(vm.error_slot().contains("subscript"));
    }

    #[test]
    fn test_bad_holder_member_write() {
        let (vm, _) = run("var xs = [1]; xs.x = 1;");
        assert_eq!(vm.mode, RunMode::Error);
    }

    #[test]
    fn test_call_of_non_executable_faults() {
        let (vm, _) = run("var n = 5; n();");
        assert_eq!(vm.mode, RunMode::Error);
        assert!(vm.error_slot().contains("non-executable"));
    }

    #[test]
    fn test_fault_reports_statement_line() {
        let (vm, _) = run("var a = 1;\na = 2;\nmissing;\n");
        assert!(vm.error_slot().starts_with(":3: error:"));
    }

    #[test]
    fn test_faults_do_not_unwind_the_host() {
        // The loop stops; the state is inspectable afterwards.
        let (vm, _) = run("var a = 1; missing; a = 2;");
        assert_eq!(vm.mode, RunMode::Error);
        assert_eq!(vm.frames.len(), 1);
    }

    // --- Time slicing ---

    #[test]
    fn test_timeout_preserves_state_and_resumes_exactly() {
        let source = "var a = 0; while (a < 200) { a++; } a;";
        let program = compile(source);

        let mut uninterrupted = Vm::new();
        uninterrupted.run(&program, 0, &[], None);
        let expected = uninterrupted.result();

        let mut sliced = Vm::new();
        let mut mode = sliced.run(&program, 0, &[], Some(0));
        let mut slices = 0u32;
        while mode == RunMode::Timeout {
            slices += 1;
            assert!(slices < 1_000_000, "resumption made no progress");
            mode = sliced.run(&program, 0, &[], Some(0));
        }
        assert_eq!(mode, RunMode::Idle);
        assert_eq!(sliced.result(), expected);
        assert_eq!(sliced.result(), Value::str("200"));
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        let program = compile("var a = 0; while (a < 100000) { a++; } a;");
        let mut vm = Vm::new();
        let mode = vm.run(&program, 0, &[], Some(0));
        assert_eq!(mode, RunMode::Timeout);
        assert_eq!(vm.error_slot(), "");
        // A resumed run with no budget finishes.
        let mode = vm.run(&program, 0, &[], None);
        assert_eq!(mode, RunMode::Idle);
        assert_eq!(vm.result(), Value::str("100000"));
    }

    #[test]
    fn test_instruction_counter_advances() {
        let (vm, _) = run("1 + 1;");
        assert!(vm.counter >= 4);
    }

    // --- Spawn and channels ---

    #[test]
    fn test_spawn_communicates_over_the_channel_pair() {
        let source = "
            sub worker(ch) { send(ch, recv(ch) + 1); }
            var c = spawn worker;
            send(c, 41);
            recv(c);
        ";
        assert_eq!(eval(source), Value::str("42"));
    }

    #[test]
    fn test_spawned_instance_has_isolated_frames() {
        let source = "
            var shared = \"parent\";
            sub worker(ch) { shared = \"child\"; send(ch, 1); }
            var c = spawn worker;
            recv(c);
            shared;
        ";
        // The child wrote its own global; the parent's is untouched.
        assert_eq!(eval(source), Value::str("parent"));
    }

    #[test]
    fn test_spawn_of_non_executable_faults() {
        let (vm, _) = run("spawn 5;");
        assert_eq!(vm.mode, RunMode::Error);
    }

    #[test]
    fn test_compile_source_records_syntax_diagnostic() {
        let mut vm = Vm::new();
        assert!(vm.compile_source(&Value::str("var = 1;")).is_none());
        assert!(vm.error_slot().ends_with(": error: syntax error"));
        assert!(vm.compile_source(&Value::str("1;")).is_some());
    }

    // --- Assembled programs ---

    #[test]
    fn test_assembled_program_runs() {
        let program = Arc::new(
            crate::vm::assembler::assemble("PUSH 2\nPUSH 3\nADD\nPOP\n").expect("assemble"),
        );
        let mut vm = Vm::new();
        assert_eq!(vm.run(&program, 0, &[], None), RunMode::Idle);
        assert_eq!(vm.result(), Value::str("5"));
    }

    #[test]
    fn test_folded_literal_pushes_are_fresh_per_iteration() {
        // The prebuilt literal must be cloned on every push, or the second
        // iteration would see the first iteration's mutation.
        let source = "
            var out = [];
            var i = 0;
            while (i < 2) { var xs = [1]; xs.push(9); out.push(len(xs)); i++; }
            out;
        ";
        assert_eq!(
            eval(source),
            Value::array(vec![Value::str("2"), Value::str("2")])
        );
    }
}
