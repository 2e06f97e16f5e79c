use std::rc::Rc;

use alloy_primitives::Address;

use crate::error::Result;
use crate::symbolic::engine::{self, EngineHooks, Info};
use crate::symbolic::state::{Bytecode, ExecEnv, Ledger, Machine};
use crate::world::monitor::EventMask;
use crate::world::transaction::Transaction;

struct Snapshot<'ctx> {
    machine: Machine<'ctx>,
    ledger: Ledger<'ctx>,
}

/// One transaction executing inside one contract instance.
///
/// The snapshot is taken when the Runtime is created, before the frame or the
/// World mutate anything, and survives `revert` so it can be applied again.
pub struct Runtime<'ctx> {
    machine: Machine<'ctx>,
    snapshot: Snapshot<'ctx>,
    events: Vec<EventMask>,
}

impl<'ctx> Runtime<'ctx> {
    pub fn new(
        env: &mut ExecEnv<'ctx>,
        code: Rc<Bytecode>,
        address: Address,
        storage_owner: Address,
        tx: Option<Transaction<'ctx>>,
    ) -> Self {
        if let Some(tx) = &tx {
            env.vars.merge(&tx.vars);
        }
        let machine = Machine::new(code, address, storage_owner, tx);
        let snapshot = Snapshot {
            machine: machine.clone(),
            ledger: env.ledger.clone(),
        };
        Self {
            machine,
            snapshot,
            events: Vec::new(),
        }
    }

    /// Drive the engine to its next stop. Never reverts on its own.
    pub fn run(&mut self, env: &mut ExecEnv<'ctx>, hooks: &mut dyn EngineHooks<'ctx>) -> Result<Info> {
        engine::run(&mut self.machine, env, hooks)
    }

    /// Restore the frame and the ledger to the snapshot. `info()` is reset.
    pub fn revert(&mut self, env: &mut ExecEnv<'ctx>) {
        self.machine = self.snapshot.machine.clone();
        env.ledger = self.snapshot.ledger.clone();
    }

    pub fn info(&self) -> Option<&Info> {
        self.machine.info.as_ref()
    }

    pub fn machine(&self) -> &Machine<'ctx> {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine<'ctx> {
        &mut self.machine
    }

    pub fn events(&self) -> &[EventMask] {
        &self.events
    }

    pub fn set_events(&mut self, events: Vec<EventMask>) {
        self.events = events;
    }

    pub fn push_event_mask(&mut self, mask: EventMask) {
        self.events.push(mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::engine::{ExitStatus, NoHooks, Stop};
    use crate::symbolic::value::{ByteBuf, Word};
    use alloy_primitives::U256;
    use z3::{Config, Context};

    #[test]
    fn test_revert_restores_storage_and_keeps_snapshot() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut env = ExecEnv::new(&ctx);
        let addr = Address::repeat_byte(0xc0);
        env.ledger.sstore(addr, U256::from(1), Word::from_u64(9));

        // PUSH1 0x2a PUSH1 0x01 SSTORE PUSH1 0 PUSH1 0 REVERT
        let code = Rc::new(Bytecode::new(vec![
            0x60, 0x2a, 0x60, 0x01, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd,
        ]));
        let tx = Transaction::new(Address::repeat_byte(1), Some(addr), ByteBuf::new());
        let mut rt = Runtime::new(&mut env, code, addr, addr, Some(tx));

        for _ in 0..2 {
            let info = rt.run(&mut env, &mut NoHooks).unwrap();
            assert_eq!(info.stop, Stop::Exit(ExitStatus::Revert));
            assert_eq!(env.ledger.sload(&addr, &U256::from(1)).concrete, U256::from(0x2a));
            rt.revert(&mut env);
            assert_eq!(env.ledger.sload(&addr, &U256::from(1)).concrete, U256::from(9));
            assert!(rt.info().is_none());
            assert_eq!(rt.machine().pc, 0);
        }
    }
}
