use alloy_primitives::Address;

use crate::symbolic::engine::{ExitStatus, Stop};
use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::{ExecEnv, Machine};
use crate::symbolic::value::{ByteBuf, Word};
use crate::world::transaction::{OutgoingTx, TxKind};

/// Message-call opcodes only describe the call; the World performs it and
/// resumes this frame with the outcome on the stack.
pub fn handle_calls<'ctx>(machine: &mut Machine<'ctx>, env: &mut ExecEnv<'ctx>, opcode: u8) -> Exec {
    let kind = match opcode {
        0xf0 => TxKind::Create,
        0xf1 => TxKind::Call,
        0xf2 => TxKind::CallCode,
        0xf4 => TxKind::DelegateCall,
        0xf5 => TxKind::Create2,
        0xfa => TxKind::StaticCall,
        _ => unreachable!("non-call opcode 0x{opcode:02x} routed to calls"),
    };

    if kind.is_create() {
        if env.static_flag {
            return Err(Stop::Exit(ExitStatus::Invalid));
        }
        let value = machine.stack.pop()?;
        let offset = machine.stack.pop()?;
        let len = machine.stack.pop()?;
        if kind == TxKind::Create2 {
            machine.stack.pop()?; // salt
        }
        let len = machine.copy_len(&len)?;
        let start = machine.touch_memory(&offset, len)?;
        // Init code is executed, so it runs on its concrete bytes.
        let init_code = ByteBuf::from_bytes(machine.memory.slice(start, len).concrete_bytes().to_vec());
        machine.outgoing = Some(OutgoingTx {
            kind,
            sender: Word::from_address(machine.storage_owner),
            recipient: Address::ZERO,
            value,
            data: init_code,
            gas_limit: machine.gas_limit(),
            ret_offset: 0,
            ret_len: 0,
        });
        return Ok(Flow::Yield);
    }

    let gas = machine.stack.pop()?;
    let target = machine.stack.pop()?;
    let value = match kind {
        TxKind::Call | TxKind::CallCode => machine.stack.pop()?,
        _ => Word::zero(),
    };
    let args_offset = machine.stack.pop()?;
    let args_len = machine.stack.pop()?;
    let ret_offset = machine.stack.pop()?;
    let ret_len = machine.stack.pop()?;

    if kind == TxKind::Call && env.static_flag && (value.is_symbolic() || !value.is_zero()) {
        return Err(Stop::Exit(ExitStatus::Invalid));
    }

    let args_len = machine.copy_len(&args_len)?;
    let args_start = machine.touch_memory(&args_offset, args_len)?;
    let ret_len = machine.copy_len(&ret_len)?;
    let ret_start = machine.touch_memory(&ret_offset, ret_len)?;

    // DELEGATECALL keeps the current caller and value.
    let (sender, value) = match kind {
        TxKind::DelegateCall => (machine.caller(), machine.call_value()),
        _ => (Word::from_address(machine.storage_owner), value),
    };

    machine.outgoing = Some(OutgoingTx {
        kind,
        sender,
        recipient: target.to_address(),
        value,
        data: machine.memory.slice(args_start, args_len),
        gas_limit: gas.as_usize().min(machine.gas_limit() as usize) as u64,
        ret_offset: ret_start,
        ret_len,
    });
    Ok(Flow::Yield)
}
