//! The compiled program: a flat, append-only array of instruction words.
//!
//! Each word is either an opcode or the inline operand of the opcode
//! before it. Jump targets are absolute word offsets, written as
//! placeholders while the target is still unknown and overwritten with
//! `fix` once it is. After compilation the program is immutable and may be
//! shared read-only across concurrently running instances.

use crate::value::Value;

use super::opcode::OpCode;

/// One word of a program.
#[derive(Debug, Clone)]
pub enum Word {
    Op(OpCode),
    /// Inline literal operand: a constant, a symbol name, or a
    /// formal-name list.
    Value(Value),
    /// Absolute jump target or entry offset.
    Addr(usize),
    /// Argument count.
    Count(usize),
}

/// A compiled program: instruction words plus a parallel source-line
/// table for run-time diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub words: Vec<Word>,
    /// Source line per word, parallel to `words`.
    pub lines: Vec<usize>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn emit_word(&mut self, word: Word, line: usize) -> usize {
        let at = self.words.len();
        self.words.push(word);
        self.lines.push(line);
        at
    }

    /// Emit an opcode word and return its address.
    pub fn emit(&mut self, op: OpCode, line: usize) -> usize {
        self.emit_word(Word::Op(op), line)
    }

    /// Emit a literal operand word.
    pub fn emit_value(&mut self, value: Value, line: usize) -> usize {
        self.emit_word(Word::Value(value), line)
    }

    /// Emit a jump-target operand word, usually as a placeholder to be
    /// fixed later.
    pub fn emit_addr(&mut self, target: usize, line: usize) -> usize {
        self.emit_word(Word::Addr(target), line)
    }

    /// Emit an argument-count operand word.
    pub fn emit_count(&mut self, count: usize, line: usize) -> usize {
        self.emit_word(Word::Count(count), line)
    }

    /// Overwrite the placeholder at `at` with the now-known target.
    pub fn fix(&mut self, at: usize, target: usize) {
        match &mut self.words[at] {
            Word::Addr(slot) => *slot = target,
            _ => panic!("fix on a non-address word at offset {}", at),
        }
    }

    pub fn op_at(&self, at: usize) -> Option<OpCode> {
        match self.words.get(at) {
            Some(Word::Op(op)) => Some(*op),
            _ => None,
        }
    }

    pub fn value_at(&self, at: usize) -> Option<&Value> {
        match self.words.get(at) {
            Some(Word::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn addr_at(&self, at: usize) -> Option<usize> {
        match self.words.get(at) {
            Some(Word::Addr(a)) => Some(*a),
            _ => None,
        }
    }

    pub fn count_at(&self, at: usize) -> Option<usize> {
        match self.words.get(at) {
            Some(Word::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn line_at(&self, at: usize) -> usize {
        self.lines.get(at).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_fix() {
        let mut program = Program::new();
        program.emit(OpCode::Jump, 1);
        let at = program.emit_addr(0, 1);
        program.emit(OpCode::Pop, 2);
        let target = program.len();
        program.fix(at, target);
        assert_eq!(program.addr_at(at), Some(target));
        assert_eq!(program.op_at(0), Some(OpCode::Jump));
        assert_eq!(program.line_at(2), 2);
    }

    #[test]
    #[should_panic(expected = "non-address word")]
    fn test_fix_rejects_non_address_words() {
        let mut program = Program::new();
        program.emit(OpCode::Pop, 1);
        program.fix(0, 5);
    }
}
