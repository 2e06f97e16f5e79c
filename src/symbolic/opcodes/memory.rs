use alloy_primitives::{keccak256, U256};

use crate::symbolic::engine::{ExitStatus, Stop};
use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::{ExecEnv, Machine};
use crate::symbolic::value::Word;

pub fn handle_memory<'ctx>(machine: &mut Machine<'ctx>, env: &mut ExecEnv<'ctx>, opcode: u8) -> Exec {
    match opcode {
        // SHA3: hashing always runs on the concrete bytes
        0x20 => {
            let offset = machine.stack.pop()?;
            let len = machine.stack.pop()?;
            let len = machine.copy_len(&len)?;
            let start = machine.touch_memory(&offset, len)?;
            let bytes = machine.memory.slice(start, len);
            let digest = keccak256(bytes.concrete_bytes());
            machine.stack.push(Word::concrete(U256::from_be_bytes(digest.0)))?;
        }
        // MLOAD
        0x51 => {
            let offset = machine.stack.pop()?;
            let start = machine.touch_memory(&offset, 32)?;
            let word = machine.memory.read_word(env.ctx, start);
            machine.stack.push(word)?;
        }
        // MSTORE
        0x52 => {
            let offset = machine.stack.pop()?;
            let value = machine.stack.pop()?;
            let start = machine.touch_memory(&offset, 32)?;
            machine.memory.write_word(start, &value);
        }
        // MSTORE8
        0x53 => {
            let offset = machine.stack.pop()?;
            let value = machine.stack.pop()?;
            let start = machine.touch_memory(&offset, 1)?;
            let low = value.concrete.as_limbs()[0] as u8;
            let expr = value.symbolic.as_ref().map(|e| e.extract(7, 0));
            machine.memory.write_byte(start, low, expr);
        }
        // SLOAD
        0x54 => {
            let slot = machine.stack.pop()?;
            let word = machine.storage_word(env, &slot.concrete);
            machine.stack.push(word)?;
        }
        // SSTORE
        0x55 => {
            if env.static_flag {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            let slot = machine.stack.pop()?;
            let value = machine.stack.pop()?;
            env.ledger.sstore(machine.storage_owner, slot.concrete, value);
        }
        // MSIZE
        0x59 => {
            let size = machine.memory.len() as u64;
            machine.stack.push(Word::from_u64(size))?;
        }
        // TLOAD
        0x5c => {
            let slot = machine.stack.pop()?;
            let word = env.ledger.tload(&machine.storage_owner, &slot.concrete);
            machine.stack.push(word)?;
        }
        // TSTORE
        0x5d => {
            if env.static_flag {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            let slot = machine.stack.pop()?;
            let value = machine.stack.pop()?;
            env.ledger.tstore(machine.storage_owner, slot.concrete, value);
        }
        // MCOPY
        0x5e => {
            let dst = machine.stack.pop()?;
            let src = machine.stack.pop()?;
            let len = machine.stack.pop()?;
            let len = machine.copy_len(&len)?;
            let src_start = machine.touch_memory(&src, len)?;
            let dst_start = machine.touch_memory(&dst, len)?;
            let chunk = machine.memory.slice(src_start, len);
            machine.memory.copy_from(dst_start, &chunk, 0, len);
        }
        _ => unreachable!("non-memory opcode 0x{opcode:02x} routed to memory"),
    }
    Ok(Flow::Next(1))
}
