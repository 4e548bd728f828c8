//! Textual assembler: the reverse of the disassembler.
//!
//! Accepts lines of `[address:] MNEMONIC [operand]`, validates every
//! mnemonic against the opcode table, and rebuilds a program. An unknown
//! mnemonic aborts the assembly and yields no program.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::AssembleError;
use crate::value::{HashMapping, Value};

use super::opcode::{OpCode, OperandKind};
use super::program::Program;

/// Assemble a textual listing into a program.
pub fn assemble(text: &str) -> Result<Program, AssembleError> {
    let mut program = Program::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let mut line = raw.trim();
        if line.is_empty() {
            continue;
        }

        // Optional "address:" prefix.
        if let Some(colon) = line.find(':') {
            let prefix = &line[..colon];
            if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
                line = line[colon + 1..].trim_start();
            }
        }

        let (mnemonic, rest) = match line.find(char::is_whitespace) {
            Some(at) => (&line[..at], line[at..].trim()),
            None => (line, ""),
        };
        let Some(op) = OpCode::from_mnemonic(mnemonic) else {
            return Err(AssembleError::unknown_mnemonic(mnemonic, line_no));
        };

        program.emit(op, 0);
        match op.operand_kind() {
            OperandKind::None => {
                if !rest.is_empty() {
                    return Err(AssembleError::bad_operand(
                        line_no,
                        format!("'{}' takes no operand", mnemonic),
                    ));
                }
            }
            OperandKind::Addr => {
                let target = parse_offset(op, rest, line_no)?;
                program.emit_addr(target, 0);
            }
            OperandKind::Count => {
                let count = parse_offset(op, rest, line_no)?;
                program.emit_count(count, 0);
            }
            OperandKind::Value => {
                if rest.is_empty() {
                    return Err(AssembleError::missing_operand(mnemonic, line_no));
                }
                program.emit_value(parse_literal(rest, line_no)?, 0);
            }
        }
    }
    Ok(program)
}

fn parse_offset(op: OpCode, rest: &str, line_no: usize) -> Result<usize, AssembleError> {
    if rest.is_empty() {
        return Err(AssembleError::missing_operand(op.mnemonic(), line_no));
    }
    rest.parse::<usize>()
        .map_err(|_| AssembleError::bad_operand(line_no, format!("bad offset '{}'", rest)))
}

/// Parse one literal operand: `null`, a number, a quoted string, an array
/// or a hash.
pub fn parse_literal(text: &str, line_no: usize) -> Result<Value, AssembleError> {
    let mut reader = Reader {
        chars: text.chars().peekable(),
        line_no,
    };
    reader.skip_ws();
    let value = reader.read_value()?;
    reader.skip_ws();
    if reader.chars.peek().is_some() {
        return Err(AssembleError::bad_operand(
            line_no,
            format!("trailing text after literal in '{}'", text),
        ));
    }
    Ok(value)
}

struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
    line_no: usize,
}

impl Reader<'_> {
    fn bad(&self, message: impl Into<String>) -> AssembleError {
        AssembleError::bad_operand(self.line_no, message)
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, c: char) -> Result<(), AssembleError> {
        if self.chars.next() == Some(c) {
            Ok(())
        } else {
            Err(self.bad(format!("expected '{}'", c)))
        }
    }

    fn read_value(&mut self) -> Result<Value, AssembleError> {
        match self.chars.peek() {
            Some('"') => self.read_string().map(Value::Str),
            Some('[') => self.read_array(),
            Some('{') => self.read_hash(),
            Some(_) => self.read_word(),
            None => Err(self.bad("empty literal")),
        }
    }

    /// A bare word: `null` or a number.
    fn read_word(&mut self) -> Result<Value, AssembleError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, ',' | ']' | '}') {
                break;
            }
            word.push(c);
            self.chars.next();
        }
        if word == "null" {
            return Ok(Value::Null);
        }
        word.parse::<f64>()
            .map(Value::number)
            .map_err(|_| self.bad(format!("bad literal '{}'", word)))
    }

    fn read_string(&mut self) -> Result<String, AssembleError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err(self.bad("unterminated string literal")),
                Some('"') => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('e') => out.push('\x1b'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('x') => {
                        self.expect('{')?;
                        let mut digits = String::new();
                        while matches!(self.chars.peek(), Some(c) if c.is_ascii_hexdigit()) {
                            digits.push(self.chars.next().unwrap());
                        }
                        self.expect('}')?;
                        let code = u32::from_str_radix(&digits, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| self.bad("bad \\x{..} escape"))?;
                        out.push(code);
                    }
                    other => {
                        return Err(self.bad(format!("bad escape '\\{}'",
                            other.map(String::from).unwrap_or_default())));
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_array(&mut self) -> Result<Value, AssembleError> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.chars.peek() == Some(&']') {
            self.chars.next();
            return Ok(Value::array(items));
        }
        loop {
            self.skip_ws();
            items.push(self.read_value()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some(']') => return Ok(Value::array(items)),
                _ => return Err(self.bad("expected ',' or ']'")),
            }
        }
    }

    fn read_hash(&mut self) -> Result<Value, AssembleError> {
        self.expect('{')?;
        let mut entries = HashMapping::default();
        self.skip_ws();
        if self.chars.peek() == Some(&'}') {
            self.chars.next();
            return Ok(Value::hash(entries));
        }
        loop {
            self.skip_ws();
            let key = self.read_string()?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.read_value()?;
            entries.insert(key, value);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => continue,
                Some('}') => return Ok(Value::hash(entries)),
                _ => return Err(self.bad("expected ',' or '}'")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::Parser;
    use crate::vm::compiler::Compiler;
    use crate::vm::disassembler::disassemble;
    use crate::vm::peephole;

    fn compile(source: &str) -> Program {
        let root = Parser::new(source).parse().expect("parse failed");
        peephole::fold(Compiler::compile(&root).expect("compile failed"))
    }

    #[test]
    fn test_round_trip_simple_program() {
        let text = disassemble(&compile("var a = 1; while (a < 5) { a = a + 1; } a;"));
        let rebuilt = assemble(&text).expect("assemble failed");
        assert_eq!(disassemble(&rebuilt), text);
    }

    #[test]
    fn test_round_trip_with_folded_literals() {
        let text = disassemble(&compile(
            "var xs = [1, \"two\", [3]]; var h = {a: 1, \"b c\": \"\\n\"}; xs;",
        ));
        let rebuilt = assemble(&text).expect("assemble failed");
        assert_eq!(disassemble(&rebuilt), text);
    }

    #[test]
    fn test_round_trip_subroutines() {
        let text = disassemble(&compile("sub add(a, b) { return a + b; } add(1, 2);"));
        let rebuilt = assemble(&text).expect("assemble failed");
        assert_eq!(disassemble(&rebuilt), text);
    }

    #[test]
    fn test_accepts_lines_without_address_prefix() {
        let program = assemble("PUSH 1\nPUSH 2\nADD\nPOP\n").expect("assemble failed");
        assert_eq!(program.len(), 6);
        assert_eq!(program.op_at(4), Some(OpCode::Add));
    }

    #[test]
    fn test_unknown_mnemonic_aborts() {
        assert!(assemble("0000: FROB 1").is_err());
        assert!(assemble("PUSH 1\nNOPE\n").is_err());
    }

    #[test]
    fn test_operand_arity_is_validated() {
        assert!(assemble("ADD 1").is_err());
        assert!(assemble("JMP").is_err());
        assert!(assemble("PUSH").is_err());
        assert!(assemble("JMP x").is_err());
    }

    #[test]
    fn test_literal_parser_shapes() {
        assert_eq!(parse_literal("null", 1).unwrap(), Value::Null);
        assert_eq!(parse_literal("42", 1).unwrap(), Value::str("42"));
        assert_eq!(parse_literal("\"a\\tb\"", 1).unwrap(), Value::str("a\tb"));
        let items = parse_literal("[1, \"x\", []]", 1).unwrap();
        assert_eq!(
            items,
            Value::array(vec![
                Value::str("1"),
                Value::str("x"),
                Value::array(vec![])
            ])
        );
        assert!(parse_literal("[1", 1).is_err());
        assert!(parse_literal("1 2", 1).is_err());
    }
}
