use z3::ast::Ast;

use crate::symbolic::engine::{BranchInfo, EngineHooks, ExitStatus, HookAction, Stop};
use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::{ExecEnv, Machine};
use crate::symbolic::utils::math;
use crate::symbolic::value::Word;

pub fn handle_control<'ctx>(machine: &mut Machine<'ctx>, env: &mut ExecEnv<'ctx>, opcode: u8) -> Exec {
    match opcode {
        // STOP (0x00) - Clean halt
        0x00 => Ok(Flow::Halt(Stop::Exit(ExitStatus::Stop))),
        // JUMP: symbolic destinations run on their concrete value
        0x56 => {
            let dest = machine.stack.pop()?.as_usize();
            if !machine.code.is_jumpdest(dest) {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            Ok(Flow::Jump(dest))
        }
        // PC
        0x58 => {
            machine.stack.push(Word::from_u64(machine.pc as u64))?;
            Ok(Flow::Next(1))
        }
        // GAS: metering is not modelled, report the transaction's limit
        0x5a => {
            machine.stack.push(Word::from_u64(machine.gas_limit()))?;
            Ok(Flow::Next(1))
        }
        // JUMPDEST (0x5B) - Valid jump target marker
        0x5b => Ok(Flow::Next(1)),
        // LOG0..LOG4: consumed, not recorded
        0xa0..=0xa4 => {
            if env.static_flag {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            let topics = (opcode - 0xa0) as usize;
            let offset = machine.stack.pop()?;
            let len = machine.stack.pop()?;
            let len = machine.copy_len(&len)?;
            machine.touch_memory(&offset, len)?;
            for _ in 0..topics {
                machine.stack.pop()?;
            }
            Ok(Flow::Next(1))
        }
        // RETURN, REVERT
        0xf3 | 0xfd => {
            let offset = machine.stack.pop()?;
            let len = machine.stack.pop()?;
            let len = machine.copy_len(&len)?;
            let start = machine.touch_memory(&offset, len)?;
            machine.return_data = machine.memory.slice(start, len);
            let status = if opcode == 0xf3 {
                ExitStatus::Return
            } else {
                ExitStatus::Revert
            };
            Ok(Flow::Halt(Stop::Exit(status)))
        }
        // INVALID
        0xfe => Err(Stop::Exit(ExitStatus::Invalid)),
        // SELFDESTRUCT: hand the balance over and stop; the account itself stays
        0xff => {
            if env.static_flag {
                return Err(Stop::Exit(ExitStatus::Invalid));
            }
            let beneficiary = machine.stack.pop()?.to_address();
            let balance = env.ledger.balance(&machine.storage_owner);
            env.ledger
                .transfer(env.ctx, Some(machine.storage_owner), beneficiary, &balance);
            Ok(Flow::Halt(Stop::Exit(ExitStatus::Stop)))
        }
        _ => unreachable!("non-control opcode 0x{opcode:02x} routed to control"),
    }
}

/// JUMPI. A symbolic condition is reported to the hooks before anything is
/// popped, so a halting hook leaves the machine untouched; afterwards the
/// constraint of the side actually taken joins the path.
pub fn handle_jumpi<'ctx>(
    machine: &mut Machine<'ctx>,
    env: &mut ExecEnv<'ctx>,
    hooks: &mut dyn EngineHooks<'ctx>,
) -> crate::error::Result<Flow> {
    let pc = machine.pc;
    let (dest, cond) = match (machine.stack.peek(0), machine.stack.peek(1)) {
        (Ok(dest), Ok(cond)) => (dest.clone(), cond.clone()),
        _ => return Ok(Flow::Halt(Stop::Exit(ExitStatus::Invalid))),
    };
    let taken = !cond.is_zero();
    let target = dest.as_usize();

    if let Some(expr) = &cond.symbolic {
        let jump_cond = expr._eq(&math::zero(env.ctx)).not();
        let branch = BranchInfo {
            pc,
            taken: Some(taken),
            target,
            next: pc + 1,
            cond: jump_cond.clone(),
        };
        if hooks.before_branch(env, machine, &branch)? == HookAction::Halt {
            return Ok(Flow::Halt(Stop::Hook));
        }
        env.path.push(if taken { jump_cond } else { jump_cond.not() });
    }

    // Both operands were peeked above.
    let _ = machine.stack.pop();
    let _ = machine.stack.pop();
    if !taken {
        return Ok(Flow::Next(1));
    }
    if !machine.code.is_jumpdest(target) {
        return Ok(Flow::Halt(Stop::Exit(ExitStatus::Invalid)));
    }
    Ok(Flow::Jump(target))
}
