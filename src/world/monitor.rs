//! Observer interface for World execution.
//!
//! Monitors are borrowed by the World for its lifetime. Each one declares,
//! per contract, which engine events it wants; the World records those masks
//! on every Runtime it creates so unsubscribed events cost nothing.

use alloy_primitives::Address;

use crate::error::Result;
use crate::symbolic::engine::{BranchInfo, EngineHooks, HookAction};
use crate::symbolic::state::{ExecEnv, Machine};
use crate::world::transaction::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Before every instruction.
    Exec,
    /// At every conditional jump on a symbolic condition.
    Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u8);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const EXEC: EventMask = EventMask(1);
    pub const BRANCH: EventMask = EventMask(1 << 1);
    pub const ALL: EventMask = EventMask(0b11);

    fn bit(kind: EventKind) -> u8 {
        match kind {
            EventKind::Exec => Self::EXEC.0,
            EventKind::Branch => Self::BRANCH.0,
        }
    }

    pub fn contains(self, kind: EventKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    pub fn with(self, kind: EventKind) -> Self {
        EventMask(self.0 | Self::bit(kind))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Handed to a monitor when it is attached.
pub struct AttachArgs<'a, 'ctx> {
    /// The contract under test.
    pub contract: Address,
    /// The transactions about to be replayed, in dispatch order.
    pub transactions: &'a [Transaction<'ctx>],
}

/// Read-only view of the frame that raised an event.
pub struct EventView<'a, 'ctx> {
    pub contract: Address,
    pub initialized: bool,
    /// Transaction counter, including nested calls.
    pub tx_num: usize,
    /// Call-stack depth, 1 for a top-level transaction.
    pub depth: usize,
    pub env: &'a ExecEnv<'ctx>,
    pub machine: &'a Machine<'ctx>,
}

pub trait WorldMonitor<'ctx> {
    fn subscriptions(&self, _contract: Address) -> EventMask {
        EventMask::NONE
    }

    fn on_attach(&mut self, _args: &AttachArgs<'_, 'ctx>) -> Result<()> {
        Ok(())
    }

    /// A queued transaction was dispatched and its frame pushed.
    fn on_transaction(&mut self, _tx: &Transaction<'ctx>, _tx_num: usize) -> Result<()> {
        Ok(())
    }

    fn on_new_runtime(&mut self, _contract: Address, _depth: usize) -> Result<()> {
        Ok(())
    }

    fn on_exec(&mut self, _view: &EventView<'_, 'ctx>) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_branch(&mut self, _view: &EventView<'_, 'ctx>, _branch: &BranchInfo<'ctx>) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }
}

/// Fans engine hooks out to the monitors subscribed for the running frame.
pub(crate) struct MonitorHooks<'a, 'm, 'ctx> {
    pub monitors: &'a mut [&'m mut dyn WorldMonitor<'ctx>],
    pub masks: &'a [EventMask],
    pub contract: Address,
    pub initialized: bool,
    pub tx_num: usize,
    pub depth: usize,
}

impl<'ctx> MonitorHooks<'_, '_, 'ctx> {
    fn subscribed(&self, idx: usize, kind: EventKind) -> bool {
        self.masks.get(idx).is_some_and(|mask| mask.contains(kind))
    }

    fn view<'v>(&self, env: &'v ExecEnv<'ctx>, machine: &'v Machine<'ctx>) -> EventView<'v, 'ctx> {
        EventView {
            contract: self.contract,
            initialized: self.initialized,
            tx_num: self.tx_num,
            depth: self.depth,
            env,
            machine,
        }
    }
}

impl<'ctx> EngineHooks<'ctx> for MonitorHooks<'_, '_, 'ctx> {
    fn wants_exec(&self) -> bool {
        self.masks.iter().any(|mask| mask.contains(EventKind::Exec))
    }

    fn before_exec(&mut self, env: &ExecEnv<'ctx>, machine: &Machine<'ctx>) -> Result<HookAction> {
        let view = self.view(env, machine);
        let mut action = HookAction::Continue;
        for idx in 0..self.monitors.len() {
            if !self.subscribed(idx, EventKind::Exec) {
                continue;
            }
            if self.monitors[idx].on_exec(&view)? == HookAction::Halt {
                action = HookAction::Halt;
            }
        }
        Ok(action)
    }

    fn before_branch(
        &mut self,
        env: &ExecEnv<'ctx>,
        machine: &Machine<'ctx>,
        branch: &BranchInfo<'ctx>,
    ) -> Result<HookAction> {
        let view = self.view(env, machine);
        let mut action = HookAction::Continue;
        for idx in 0..self.monitors.len() {
            if !self.subscribed(idx, EventKind::Branch) {
                continue;
            }
            if self.monitors[idx].on_branch(&view, branch)? == HookAction::Halt {
                action = HookAction::Halt;
            }
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_bits() {
        let mask = EventMask::NONE.with(EventKind::Branch);
        assert!(mask.contains(EventKind::Branch));
        assert!(!mask.contains(EventKind::Exec));
        assert!(EventMask::ALL.contains(EventKind::Exec));
        assert!(EventMask::NONE.is_empty());
        assert_eq!(mask.with(EventKind::Exec), EventMask::ALL);
    }
}
