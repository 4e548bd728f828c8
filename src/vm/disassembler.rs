//! Textual disassembly: one line per instruction — address, mnemonic, and
//! the operand when the opcode carries one. The output is accepted back by
//! the assembler.

use crate::value::{format_number, Value};

use super::opcode::OperandKind;
use super::program::Program;

/// Disassemble a program to text.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    let mut pc = 0;
    while pc < program.len() {
        let Some(op) = program.op_at(pc) else {
            // Operand word with no opcode; annotate and move on.
            out.push_str(&format!("{:04}: ???\n", pc));
            pc += 1;
            continue;
        };
        out.push_str(&format!("{:04}: {}", pc, op.mnemonic()));
        match op.operand_kind() {
            OperandKind::None => {
                pc += 1;
            }
            OperandKind::Addr => {
                out.push_str(&format!(" {}", program.addr_at(pc + 1).unwrap_or(0)));
                pc += 2;
            }
            OperandKind::Count => {
                out.push_str(&format!(" {}", program.count_at(pc + 1).unwrap_or(0)));
                pc += 2;
            }
            OperandKind::Value => {
                let rendered = match program.value_at(pc + 1) {
                    Some(value) => literal(value),
                    None => "null".to_string(),
                };
                out.push_str(&format!(" {}", rendered));
                pc += 2;
            }
        }
        out.push('\n');
    }
    out
}

/// Render a value as an assemblable literal: `null`, bare canonical
/// numbers, quoted strings, `[..]` arrays and `{..}` hashes.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Str(s) => {
            if is_canonical_number(s) {
                s.clone()
            } else {
                quote(s)
            }
        }
        Value::Array(items) => {
            let items = items.lock().unwrap();
            let rendered: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Value::Hash(mapping) => {
            let mapping = mapping.lock().unwrap();
            let rendered: Vec<String> = mapping
                .iter()
                .map(|(k, v)| format!("{}: {}", quote(k), literal(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        // Opaque kinds never appear as operands in a well-formed program;
        // show them for debugging anyway.
        other => format!("{}", other),
    }
}

fn is_canonical_number(s: &str) -> bool {
    s.parse::<f64>().map(format_number).as_deref() == Ok(s)
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::vm::compiler::Compiler;
    use crate::vm::peephole;

    fn disassembly(source: &str) -> String {
        let root = Parser::new(source).parse().expect("parse failed");
        let program = Compiler::compile(&root).expect("compile failed");
        disassemble(&peephole::fold(program))
    }

    #[test]
    fn test_one_line_per_instruction() {
        let text = disassembly("1 + 2;");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["0000: PUSH 1", "0002: PUSH 2", "0004: ADD", "0005: POP"]
        );
    }

    #[test]
    fn test_addresses_skip_operand_words() {
        let text = disassembly("a;");
        assert!(text.starts_with("0000: GET \"a\""));
        assert!(text.contains("0002: POP"));
    }

    #[test]
    fn test_jump_operands_are_absolute() {
        let text = disassembly("while (0) { }");
        assert!(text.contains("JMP_FALSE 8"), "got:\n{}", text);
        assert!(text.contains("JMP 0"), "got:\n{}", text);
    }

    #[test]
    fn test_string_literals_are_quoted_and_escaped() {
        assert_eq!(literal(&Value::str("a\tb")), "\"a\\tb\"");
        assert_eq!(literal(&Value::str("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(literal(&Value::str("42")), "42");
        // A non-canonical numeric spelling must stay quoted to survive the
        // round trip.
        assert_eq!(literal(&Value::str("4.20")), "\"4.20\"");
    }

    #[test]
    fn test_folded_container_operand_renders_as_literal() {
        let text = disassembly("[1, \"two\"];");
        assert!(text.contains("PUSH [1, \"two\"]"), "got:\n{}", text);
    }
}
