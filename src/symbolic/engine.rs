//! Concolic interpreter loop and the stop/branch reporting surface the World
//! consumes.

use std::fmt;

use z3::ast::Bool;

use crate::error::Result;
use crate::symbolic::opcodes::{self, Flow};
use crate::symbolic::state::{ExecEnv, Machine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Stop,
    Return,
    Revert,
    /// Exceptional halt: undefined opcode, bad jump, stack fault, static violation.
    Invalid,
}

impl ExitStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExitStatus::Stop | ExitStatus::Return)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stop {
    Exit(ExitStatus),
    /// The frame emitted a message call and paused right after the call
    /// instruction.
    OutgoingCall,
    /// A hook asked the engine to halt before the current instruction.
    Hook,
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stop::Exit(status) => write!(f, "exit ({status:?})"),
            Stop::OutgoingCall => f.write_str("outgoing call"),
            Stop::Hook => f.write_str("halted by hook"),
        }
    }
}

/// Why and where the engine last stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub stop: Stop,
    pub pc: usize,
}

/// A conditional jump whose condition depends on input variables. `cond` is
/// the condition under which the jump to `target` is taken.
#[derive(Debug, Clone)]
pub struct BranchInfo<'ctx> {
    pub pc: usize,
    pub taken: Option<bool>,
    pub target: usize,
    pub next: usize,
    pub cond: Bool<'ctx>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Halt,
}

pub trait EngineHooks<'ctx> {
    /// Whether `before_exec` should be called at all.
    fn wants_exec(&self) -> bool {
        false
    }

    fn before_exec(&mut self, _env: &ExecEnv<'ctx>, _machine: &Machine<'ctx>) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn before_branch(
        &mut self,
        _env: &ExecEnv<'ctx>,
        _machine: &Machine<'ctx>,
        _branch: &BranchInfo<'ctx>,
    ) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }
}

pub struct NoHooks;

impl<'ctx> EngineHooks<'ctx> for NoHooks {}

/// Run `machine` from its current pc until it stops. Resuming after an
/// `OutgoingCall` continues with the instruction after the call.
pub fn run<'ctx>(
    machine: &mut Machine<'ctx>,
    env: &mut ExecEnv<'ctx>,
    hooks: &mut dyn EngineHooks<'ctx>,
) -> Result<Info> {
    machine.outgoing = None;
    loop {
        let pc = machine.pc;
        if hooks.wants_exec() && hooks.before_exec(env, machine)? == HookAction::Halt {
            return Ok(machine.finish(Stop::Hook));
        }
        let opcode = machine.code.byte(pc);
        match opcodes::dispatch(machine, env, hooks, opcode)? {
            Flow::Next(width) => machine.pc = pc + width,
            Flow::Jump(dest) => machine.pc = dest,
            Flow::Halt(stop) => return Ok(machine.finish(stop)),
            Flow::Yield => {
                machine.pc = pc + 1;
                return Ok(machine.finish(Stop::OutgoingCall));
            }
        }
    }
}
