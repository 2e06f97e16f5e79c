#[macro_use]
pub mod op_macros;
pub mod arithmetic;
pub mod calls;
pub mod context;
pub mod control;
pub mod memory;
pub mod stack;

use crate::symbolic::engine::{EngineHooks, ExitStatus, Stop};
use crate::symbolic::state::{ExecEnv, Machine};

/// What the interpreter loop does after one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Advance the pc by this many bytes.
    Next(usize),
    Jump(usize),
    Halt(Stop),
    /// Pause for the World to service `machine.outgoing`.
    Yield,
}

/// Handler result; `Err` carries an early stop (exceptional halt or fault).
pub type Exec = std::result::Result<Flow, Stop>;

pub fn dispatch<'ctx>(
    machine: &mut Machine<'ctx>,
    env: &mut ExecEnv<'ctx>,
    hooks: &mut dyn EngineHooks<'ctx>,
    opcode: u8,
) -> crate::error::Result<Flow> {
    let res = match opcode {
        // Arithmetic: ADD, MUL, SUB, DIV, SDIV, MOD, SMOD, ADDMOD, MULMOD, EXP, SIGNEXTEND
        // Comparison: LT, GT, SLT, SGT, EQ, ISZERO
        // Bitwise: AND, OR, XOR, NOT, BYTE, SHL, SHR, SAR
        0x01..=0x0b | 0x10..=0x1d => arithmetic::handle_arithmetic(machine, env, opcode),
        // SHA3, MLOAD, MSTORE, MSTORE8, SLOAD, SSTORE, MSIZE, TLOAD, TSTORE, MCOPY
        0x20 | 0x51..=0x55 | 0x59 | 0x5c..=0x5e => memory::handle_memory(machine, env, opcode),
        // JUMPI reports symbolic conditions to the hooks
        0x57 => return control::handle_jumpi(machine, env, hooks),
        // STOP, JUMP, PC, GAS, JUMPDEST, LOG0-LOG4, RETURN, REVERT, INVALID, SELFDESTRUCT
        0x00 | 0x56 | 0x58 | 0x5a | 0x5b | 0xa0..=0xa4 | 0xf3 | 0xfd | 0xfe | 0xff => {
            control::handle_control(machine, env, opcode)
        }
        // Environment and block information, call data, return data
        0x30..=0x3f | 0x40..=0x48 => context::handle_context(machine, env, opcode),
        // CREATE, CALL, CALLCODE, DELEGATECALL, CREATE2, STATICCALL
        0xf0 | 0xf1 | 0xf2 | 0xf4 | 0xf5 | 0xfa => calls::handle_calls(machine, env, opcode),
        // POP, PUSH0-PUSH32, DUP1-DUP16, SWAP1-SWAP16
        0x50 | 0x5f..=0x9f => stack::handle_stack(machine, opcode),
        _ => Err(Stop::Exit(ExitStatus::Invalid)),
    };
    Ok(res.unwrap_or_else(Flow::Halt))
}
