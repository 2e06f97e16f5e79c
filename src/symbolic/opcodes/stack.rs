use alloy_primitives::U256;

use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::Machine;
use crate::symbolic::value::Word;

pub fn handle_stack(machine: &mut Machine<'_>, opcode: u8) -> Exec {
    match opcode {
        // POP
        0x50 => {
            machine.stack.pop()?;
            Ok(Flow::Next(1))
        }
        // PUSH0..PUSH32: immediates past the end of code read as zero
        0x5f..=0x7f => {
            let n = (opcode - 0x5f) as usize;
            let start = machine.pc + 1;
            let mut raw = [0u8; 32];
            for i in 0..n {
                raw[32 - n + i] = machine.code.byte(start + i);
            }
            machine.stack.push(Word::concrete(U256::from_be_bytes(raw)))?;
            Ok(Flow::Next(1 + n))
        }
        // DUP1..DUP16
        0x80..=0x8f => {
            machine.stack.dup((opcode - 0x80) as usize)?;
            Ok(Flow::Next(1))
        }
        // SWAP1..SWAP16
        0x90..=0x9f => {
            machine.stack.swap((opcode - 0x90) as usize + 1)?;
            Ok(Flow::Next(1))
        }
        _ => unreachable!("non-stack opcode 0x{opcode:02x} routed to stack"),
    }
}
