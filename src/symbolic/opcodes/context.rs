use alloy_primitives::{keccak256, U256};

use crate::symbolic::engine::{ExitStatus, Stop};
use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::{ExecEnv, Machine, CHAIN_ID};
use crate::symbolic::value::{ByteBuf, Word};

pub fn handle_context<'ctx>(machine: &mut Machine<'ctx>, env: &mut ExecEnv<'ctx>, opcode: u8) -> Exec {
    let word = match opcode {
        // ADDRESS: the storage context, which is the caller's under DELEGATECALL
        0x30 => Word::from_address(machine.storage_owner),
        // BALANCE
        0x31 => {
            let addr = machine.stack.pop()?;
            env.ledger.balance(&addr.to_address())
        }
        // ORIGIN
        0x32 => machine
            .tx
            .as_ref()
            .map(|t| t.origin.clone())
            .unwrap_or_else(Word::zero),
        0x33 => machine.caller(),
        0x34 => machine.call_value(),
        // CALLDATALOAD
        0x35 => {
            let offset = machine.stack.pop()?;
            match &machine.tx {
                Some(tx) if offset.concrete < U256::from(tx.data.len()) => {
                    tx.data.read_word(env.ctx, offset.as_usize())
                }
                _ => Word::zero(),
            }
        }
        // CALLDATASIZE
        0x36 => Word::from_u64(machine.tx.as_ref().map(|t| t.data.len()).unwrap_or(0) as u64),
        // CALLDATACOPY
        0x37 => {
            let data = machine.tx.as_ref().map(|t| t.data.clone()).unwrap_or_default();
            copy_to_memory(machine, &data)?;
            return Ok(Flow::Next(1));
        }
        // CODESIZE
        0x38 => Word::from_u64(machine.code.len() as u64),
        // CODECOPY
        0x39 => {
            let code = ByteBuf::from_bytes(machine.code.as_slice().to_vec());
            copy_to_memory(machine, &code)?;
            return Ok(Flow::Next(1));
        }
        // GASPRICE
        0x3a => machine
            .tx
            .as_ref()
            .map(|t| t.gas_price.clone())
            .unwrap_or_else(Word::zero),
        // EXTCODESIZE
        0x3b => {
            let addr = machine.stack.pop()?.to_address();
            let size = env.ledger.code(&addr).map(|c| c.len()).unwrap_or(0);
            Word::from_u64(size as u64)
        }
        // EXTCODECOPY
        0x3c => {
            let addr = machine.stack.pop()?.to_address();
            let code = env
                .ledger
                .code(&addr)
                .map(|c| ByteBuf::from_bytes(c.as_slice().to_vec()))
                .unwrap_or_default();
            copy_to_memory(machine, &code)?;
            return Ok(Flow::Next(1));
        }
        // RETURNDATASIZE
        0x3d => Word::from_u64(machine.last_return_data().map(|d| d.len()).unwrap_or(0) as u64),
        // RETURNDATACOPY: reading past the end is an exceptional halt
        0x3e => {
            let data = machine.last_return_data().cloned().unwrap_or_default();
            let src = machine.stack.peek(1)?.concrete;
            let len = machine.stack.peek(2)?.concrete;
            let end = src.checked_add(len);
            if end.map_or(true, |end| end > U256::from(data.len())) {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            copy_to_memory(machine, &data)?;
            return Ok(Flow::Next(1));
        }
        // EXTCODEHASH
        0x3f => {
            let addr = machine.stack.pop()?.to_address();
            match env.ledger.account(&addr) {
                Some(account) => {
                    let code = account.code.as_ref().map(|c| c.as_slice()).unwrap_or(&[]);
                    Word::concrete(U256::from_be_bytes(keccak256(code).0))
                }
                None => Word::zero(),
            }
        }
        // BLOCKHASH
        0x40 => {
            machine.stack.pop()?;
            Word::zero()
        }
        0x41 => Word::from_address(env.block.coinbase),
        0x42 => env.block.timestamp.clone(),
        0x43 => env.block.number.clone(),
        // PREVRANDAO
        0x44 => Word::zero(),
        // GASLIMIT
        0x45 => Word::from_u64(machine.gas_limit()),
        0x46 => Word::from_u64(CHAIN_ID),
        // SELFBALANCE
        0x47 => env.ledger.balance(&machine.storage_owner),
        // BASEFEE
        0x48 => Word::zero(),
        _ => unreachable!("non-context opcode 0x{opcode:02x} routed to context"),
    };
    machine.stack.push(word)?;
    Ok(Flow::Next(1))
}

/// Shared tail of the *COPY opcodes: pops (dest, src, len) and copies from
/// `source`, zero padding past its end.
fn copy_to_memory<'ctx>(machine: &mut Machine<'ctx>, source: &ByteBuf<'ctx>) -> Result<(), Stop> {
    let dest = machine.stack.pop()?;
    let src = machine.stack.pop()?;
    let len = machine.stack.pop()?;
    let len = machine.copy_len(&len)?;
    let start = machine.touch_memory(&dest, len)?;
    machine.memory.copy_from(start, source, src.as_usize(), len);
    Ok(())
}
