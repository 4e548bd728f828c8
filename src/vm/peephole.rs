//! Peephole pass: collapse literal array/hash construction.
//!
//! The generator builds container literals as an empty-container push
//! followed by per-element push/append (or push/push/insert) runs. When a
//! run is made entirely of literal pushes it is folded into a single
//! prebuilt literal operand. Absolute jump targets are remapped; a run
//! that any jump lands inside is left alone. The pass is a pure size/speed
//! optimization and changes no observable behavior; re-running it on its
//! own output is a no-op.

use std::collections::{HashMap, HashSet};

use crate::value::{HashMapping, Value};

use super::opcode::{OpCode, OperandKind};
use super::program::{Program, Word};

/// Fold until no more runs collapse (inner literals first, then the
/// containers that hold them).
pub fn fold(mut program: Program) -> Program {
    loop {
        let (next, changed) = fold_once(program);
        program = next;
        if !changed {
            return program;
        }
    }
}

struct Run {
    end: usize,
    literal: Value,
}

fn fold_once(program: Program) -> (Program, bool) {
    let targets: HashSet<usize> = program
        .words
        .iter()
        .filter_map(|w| match w {
            Word::Addr(a) => Some(*a),
            _ => None,
        })
        .collect();

    let mut out = Program::new();
    let mut map: HashMap<usize, usize> = HashMap::new();
    let mut changed = false;
    let mut pc = 0;

    while pc < program.len() {
        map.insert(pc, out.len());

        let Some(op) = program.op_at(pc) else {
            // Operand word in opcode position; copy verbatim and move on.
            out.words.push(program.words[pc].clone());
            out.lines.push(program.line_at(pc));
            pc += 1;
            continue;
        };

        if op == OpCode::Push {
            if let Some(run) = literal_run(&program, pc, &targets) {
                out.emit(OpCode::Push, program.line_at(pc));
                out.emit_value(run.literal, program.line_at(pc));
                changed = true;
                pc = run.end;
                continue;
            }
        }

        let width = match op.operand_kind() {
            OperandKind::None => 1,
            _ => 2,
        };
        for offset in 0..width {
            out.words.push(program.words[pc + offset].clone());
            out.lines.push(program.line_at(pc + offset));
        }
        pc += width;
    }
    map.insert(program.len(), out.len());

    if changed {
        for word in &mut out.words {
            if let Word::Addr(target) = word {
                *target = map.get(target).copied().unwrap_or(*target);
            }
        }
    }
    (out, changed)
}

/// A literal push at `pc` followed by a contiguous all-literal append or
/// insert run, provided no jump lands inside it.
fn literal_run(program: &Program, pc: usize, targets: &HashSet<usize>) -> Option<Run> {
    let seed = program.value_at(pc + 1)?;
    let (end, literal) = match seed {
        Value::Array(items) if items.lock().unwrap().is_empty() => {
            let mut elements = Vec::new();
            let mut at = pc + 2;
            while program.op_at(at) == Some(OpCode::Push)
                && program.value_at(at + 1).is_some()
                && program.op_at(at + 2) == Some(OpCode::Append)
            {
                elements.push(program.value_at(at + 1).unwrap().clone());
                at += 3;
            }
            if elements.is_empty() {
                return None;
            }
            (at, Value::array(elements))
        }
        Value::Hash(mapping) if mapping.lock().unwrap().is_empty() => {
            let mut entries = HashMapping::default();
            let mut at = pc + 2;
            while program.op_at(at) == Some(OpCode::Push)
                && program.value_at(at + 1).is_some()
                && program.op_at(at + 2) == Some(OpCode::Push)
                && program.value_at(at + 3).is_some()
                && program.op_at(at + 4) == Some(OpCode::Insert)
            {
                let key = program.value_at(at + 1).unwrap().as_key();
                let value = program.value_at(at + 3).unwrap().clone();
                entries.insert(key, value);
                at += 5;
            }
            if entries.is_empty() {
                return None;
            }
            (at, Value::hash(entries))
        }
        _ => return None,
    };

    // A jump into the middle of the run pins it in place.
    if targets.iter().any(|t| *t > pc && *t < end) {
        return None;
    }
    Some(Run { end, literal })
}
