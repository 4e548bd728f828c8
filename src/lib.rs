//! Rill: a small dynamically-typed scripting language.
//!
//! Source text flows through the scanner and parser into a tagged AST, the
//! code generator flattens it into a word array with backpatched jump
//! targets, and a stack-based VM executes it against dynamically scoped
//! symbol frames. Compiled programs and compiled subroutines share one
//! representation, an executable value wrapping the program and an entry
//! offset, so scripts, subroutines and spawned instances are all driven
//! the same way.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod value;
pub mod vm;

use std::io::Read;
use std::sync::Arc;

use error::{ParseError, RillError};
use span::Span;
use value::Value;
use vm::{Compiler, Program, Vm};

/// Compile source text into an executable value with entry offset 0.
pub fn compile_str(source: &str) -> Result<Value, RillError> {
    let root = parser::Parser::new(source).parse()?;
    let program = Compiler::compile(&root)?;
    let program = vm::peephole::fold(program);
    Ok(Value::Exec(Arc::new(program), 0))
}

/// Compile from a source value: an in-memory string or an open file
/// handle, selected by the value's kind.
pub fn compile(input: &Value) -> Result<Value, RillError> {
    match input {
        Value::Str(source) => compile_str(source),
        Value::File(handle) => {
            let mut source = String::new();
            let mut handle = handle.lock().unwrap();
            match handle.reader.as_mut() {
                Some(reader) => {
                    reader.read_to_string(&mut source)?;
                }
                None => {
                    return Err(ParseError::general(
                        "cannot compile a closed file",
                        Span::new(0, 0, 0, 0),
                    )
                    .into());
                }
            }
            drop(handle);
            compile_str(&source)
        }
        other => Err(ParseError::general(
            format!("cannot compile value of type {}", other.type_name()),
            Span::new(0, 0, 0, 0),
        )
        .into()),
    }
}

/// The `<line>:<column>: error: syntax error` diagnostic for a failed
/// compile, as written to the error slot.
pub fn syntax_diagnostic(err: &RillError) -> String {
    match err {
        RillError::Parse(e) => e.diagnostic(),
        RillError::Lex(e) => {
            let span = e.span();
            format!("{}:{}: error: syntax error", span.line, span.column)
        }
        other => format!("0:0: error: {}", other),
    }
}

/// Compile and run source text on a fresh VM instance; the VM is returned
/// for mode and error-slot inspection alongside the result.
pub fn eval(source: &str) -> Result<(Vm, Value), RillError> {
    let exec = compile_str(source)?;
    let mut vm = Vm::new();
    let result = vm.execute(&exec, &[], None);
    Ok((vm, result))
}

/// Disassemble a compiled program to text.
pub fn disassemble(program: &Program) -> String {
    vm::disassembler::disassemble(program)
}

/// Assemble disassembly text back into a program.
pub fn assemble(text: &str) -> Result<Program, RillError> {
    Ok(vm::assembler::assemble(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::RunMode;

    #[test]
    fn test_compile_and_eval_roundtrip() {
        let (vm, result) = eval("2 + 3 * 4;").unwrap();
        assert_eq!(vm.mode, RunMode::Idle);
        assert_eq!(result, Value::str("14"));
    }

    #[test]
    fn test_compile_from_string_value() {
        let exec = compile(&Value::str("1;")).unwrap();
        assert!(matches!(exec, Value::Exec(_, 0)));
    }

    #[test]
    fn test_compile_rejects_non_source_kinds() {
        assert!(compile(&Value::Null).is_err());
        assert!(compile(&Value::array(vec![])).is_err());
    }

    #[test]
    fn test_syntax_diagnostic_format() {
        let err = compile_str("var = 1;").unwrap_err();
        let diagnostic = syntax_diagnostic(&err);
        assert!(
            diagnostic.starts_with("1:") && diagnostic.ends_with(": error: syntax error"),
            "got: {}",
            diagnostic
        );
    }

    #[test]
    fn test_no_partial_program_on_syntax_error() {
        assert!(compile_str("var a = ;").is_err());
    }
}
