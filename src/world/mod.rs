//! Multi-contract execution environment.
//!
//! The World owns the contracts, the ledger and the queue of pending
//! transactions. Frames run on the concolic engine until they exit or emit a
//! message call; the World then performs the call, or hands the result back
//! to the caller, and resumes whatever is now on top of the call stack.

pub mod contract;
pub mod monitor;
pub mod runtime;
pub mod transaction;

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use alloy_primitives::{Address, U256};
use tracing::{debug, trace};
use z3::ast::BV;
use z3::Context;

use crate::error::{Result, WorldError};
use crate::symbolic::engine::{ExitStatus, Info, Stop};
use crate::symbolic::state::{Account, Bytecode, ExecEnv};
use crate::symbolic::value::{ByteBuf, Word};
use crate::world::contract::ContractRunner;
use crate::world::monitor::{AttachArgs, EventMask, MonitorHooks, WorldMonitor};
use crate::world::transaction::{CallResult, OutgoingTx, Transaction, TxKind};

pub const MAX_CALL_DEPTH: usize = 1024;
/// Upper bound on a symbolic block-number increment.
pub const MAX_BLOCK_NUMBER_INC: u64 = 60_480;
/// Upper bound on a symbolic timestamp increment (one week).
pub const MAX_TIMESTAMP_INC: u64 = 604_800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployMode {
    /// `code` is init code; run it with `args` appended and keep what it returns.
    Constructor { args: Vec<u8> },
    /// `code` is already the runtime code.
    Runtime,
    /// `code` is init code that runs later, when a frame is pushed on it.
    Pending,
}

pub struct World<'m, 'ctx> {
    env: ExecEnv<'ctx>,
    contracts: HashMap<Address, ContractRunner<'ctx>>,
    call_stack: Vec<Address>,
    static_flag_stack: Vec<bool>,
    queue: VecDeque<Transaction<'ctx>>,
    monitors: Vec<&'m mut dyn WorldMonitor<'ctx>>,
    current_tx_num: usize,
    dispatched: usize,
    last_exit: ExitStatus,
    max_call_depth: usize,
}

impl<'m, 'ctx> World<'m, 'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            env: ExecEnv::new(ctx),
            contracts: HashMap::new(),
            call_stack: Vec::new(),
            static_flag_stack: Vec::new(),
            queue: VecDeque::new(),
            monitors: Vec::new(),
            current_tx_num: 0,
            dispatched: 0,
            last_exit: ExitStatus::Stop,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth.max(1);
        self
    }

    pub fn ctx(&self) -> &'ctx Context {
        self.env.ctx
    }

    pub fn env(&self) -> &ExecEnv<'ctx> {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut ExecEnv<'ctx> {
        &mut self.env
    }

    pub fn call_stack(&self) -> &[Address] {
        &self.call_stack
    }

    pub fn is_idle(&self) -> bool {
        self.call_stack.is_empty() && self.queue.is_empty()
    }

    pub fn contract(&self, address: &Address) -> Option<&ContractRunner<'ctx>> {
        self.contracts.get(address)
    }

    pub fn contract_addresses(&self) -> impl Iterator<Item = &Address> {
        self.contracts.keys()
    }

    pub fn storage_at(&self, address: &Address, slot: U256) -> U256 {
        self.env.ledger.sload(address, &slot).concrete
    }

    pub fn balance_of(&self, address: &Address) -> U256 {
        self.env.ledger.balance(address).concrete
    }

    pub fn current_tx_num(&self) -> usize {
        self.current_tx_num
    }

    /// Top-level transactions taken off the queue so far.
    pub fn dispatched_transactions(&self) -> usize {
        self.dispatched
    }

    pub fn pending_transactions(&self) -> usize {
        self.queue.len()
    }

    /// Register an externally owned account. Re-registering an EOA only
    /// updates its balance.
    pub fn create_account(&mut self, address: Address, balance: U256) -> Result<()> {
        if self.contracts.contains_key(&address) {
            return Err(WorldError::ContractAddressInUse(address).into());
        }
        self.env.ledger.ensure(address).balance = Word::concrete(balance);
        debug!("[WORLD] account {address} balance {balance}");
        Ok(())
    }

    pub fn deploy(&mut self, code: Vec<u8>, address: Address, deployer: Address, mode: DeployMode) -> Result<Address> {
        if self.contracts.contains_key(&address) {
            return Err(WorldError::ContractAddressInUse(address).into());
        }
        if self.env.ledger.contains(&address) {
            return Err(WorldError::AccountAddressInUse(address).into());
        }
        if matches!(mode, DeployMode::Constructor { .. }) && !self.call_stack.is_empty() {
            return Err(WorldError::NotIdle.into());
        }

        let code = match &mode {
            DeployMode::Constructor { args } => {
                let mut init = code;
                init.extend_from_slice(args);
                init
            }
            DeployMode::Runtime | DeployMode::Pending => code,
        };
        let code = Rc::new(Bytecode::new(code));
        self.env.ledger.insert(
            address,
            Account {
                balance: Word::zero(),
                storage: Default::default(),
                code: Some(Rc::clone(&code)),
            },
        );
        let initialized = mode == DeployMode::Runtime;
        self.contracts
            .insert(address, ContractRunner::new(address, deployer, code, initialized));
        debug!("[WORLD] deployed {address} by {deployer} ({mode:?})");

        if let DeployMode::Constructor { .. } = mode {
            let tx = Transaction::new(deployer, Some(address), ByteBuf::new());
            self.push_frame(address, tx, None)?;
            let stop = self.run_until(0, false)?;
            if !matches!(stop, Stop::Exit(_)) {
                return Err(WorldError::UnexpectedStop {
                    input: format!("constructor of {address}"),
                    stop,
                }
                .into());
            }
            if !self.contracts.get(&address).is_some_and(|c| c.initialized) {
                return Err(WorldError::ConstructorFailed(address).into());
            }
        }
        Ok(address)
    }

    pub fn push_transaction(&mut self, tx: Transaction<'ctx>) {
        self.queue.push_back(tx);
    }

    pub fn push_transactions(&mut self, txs: impl IntoIterator<Item = Transaction<'ctx>>) {
        self.queue.extend(txs);
    }

    /// Attach a monitor. Live Runtimes pick up its subscriptions immediately.
    pub fn attach_monitor(&mut self, monitor: &'m mut dyn WorldMonitor<'ctx>, args: AttachArgs<'_, 'ctx>) -> Result<()> {
        monitor.on_attach(&args)?;
        for (address, runner) in self.contracts.iter_mut() {
            let mask = monitor.subscriptions(*address);
            for runtime in runner.runtimes_mut() {
                runtime.push_event_mask(mask);
            }
        }
        self.monitors.push(monitor);
        Ok(())
    }

    /// Run until the queue and the call stack are both empty, or until a
    /// frame stops for a reason the World cannot handle (a hook halt).
    /// Returns that stop, or the exit of the last finished frame.
    pub fn run(&mut self) -> Result<Stop> {
        self.run_until(0, true)
    }

    fn run_until(&mut self, floor: usize, dispatch: bool) -> Result<Stop> {
        loop {
            if self.call_stack.len() <= floor {
                if !dispatch {
                    return Ok(Stop::Exit(self.last_exit));
                }
                match self.queue.pop_front() {
                    Some(tx) => {
                        self.dispatch(tx)?;
                        continue;
                    }
                    None => return Ok(Stop::Exit(self.last_exit)),
                }
            }

            let info = self.run_top()?;
            match info.stop {
                Stop::Exit(status) => self.handle_exit(status)?,
                Stop::OutgoingCall => self.handle_outgoing()?,
                other => {
                    debug!("[WORLD] frame stopped at pc {}: {other}", info.pc);
                    return Ok(other);
                }
            }
        }
    }

    fn dispatch(&mut self, tx: Transaction<'ctx>) -> Result<()> {
        self.current_tx_num += 1;
        self.dispatched += 1;
        self.env.vars.merge(&tx.vars);
        self.env.ledger.clear_transient();
        self.advance_block(&tx);

        let Some(recipient) = tx.recipient else {
            trace!("[WORLD] tx {} is a placeholder", self.current_tx_num);
            return Ok(());
        };
        if !self.contracts.contains_key(&recipient) {
            return Err(WorldError::NoContract(recipient).into());
        }
        debug!(
            "[WORLD] tx {} from {} to {recipient}",
            self.current_tx_num,
            tx.sender_address()
        );

        let from = tx.sender_address();
        let value = tx.value.clone();
        self.push_frame(recipient, tx, None)?;
        if let Some(runner) = self.contracts.get(&recipient) {
            if let Some(tx) = runner.current_runtime().machine().tx.as_ref() {
                for monitor in self.monitors.iter_mut() {
                    monitor.on_transaction(tx, self.current_tx_num)?;
                }
            }
        }
        self.env.ledger.transfer(self.env.ctx, Some(from), recipient, &value);
        Ok(())
    }

    fn advance_block(&mut self, tx: &Transaction<'ctx>) {
        let ctx = self.env.ctx;
        for (inc, bound) in [
            (&tx.block_num_inc, MAX_BLOCK_NUMBER_INC),
            (&tx.block_timestamp_inc, MAX_TIMESTAMP_INC),
        ] {
            if let Some(expr) = &inc.symbolic {
                self.env.path.push(expr.bvule(&BV::from_u64(ctx, bound, 256)));
            }
        }
        self.env
            .block
            .advance(ctx, &tx.block_num_inc, &tx.block_timestamp_inc);
    }

    fn push_frame(&mut self, address: Address, tx: Transaction<'ctx>, share_storage: Option<Address>) -> Result<()> {
        let runner = self
            .contracts
            .get_mut(&address)
            .ok_or(WorldError::NoContract(address))?;
        let masks: Vec<EventMask> = self.monitors.iter().map(|m| m.subscriptions(address)).collect();
        runner
            .push_runtime(&mut self.env, Some(tx), share_storage)
            .set_events(masks);
        self.call_stack.push(address);
        let depth = self.call_stack.len();
        for monitor in self.monitors.iter_mut() {
            monitor.on_new_runtime(address, depth)?;
        }
        Ok(())
    }

    fn run_top(&mut self) -> Result<Info> {
        let top = *self.call_stack.last().ok_or(WorldError::NoActiveCallStack)?;
        let runner = self.contracts.get_mut(&top).ok_or(WorldError::NoContract(top))?;
        let initialized = runner.initialized;
        let runtime = runner.current_runtime_mut();
        let masks = runtime.events().to_vec();
        let mut hooks = MonitorHooks {
            monitors: &mut self.monitors,
            masks: &masks,
            contract: top,
            initialized,
            tx_num: self.current_tx_num,
            depth: self.call_stack.len(),
        };
        runtime.run(&mut self.env, &mut hooks)
    }

    fn handle_exit(&mut self, status: ExitStatus) -> Result<()> {
        let callee = *self.call_stack.last().ok_or(WorldError::NoActiveCallStack)?;
        let runner = self
            .contracts
            .get_mut(&callee)
            .ok_or(WorldError::NoContract(callee))?;
        let success = status.is_success();
        let creation = !runner.initialized;
        let return_data = runner.current_runtime().machine().return_data.clone();

        if !success {
            runner.current_runtime_mut().revert(&mut self.env);
        } else if creation {
            let code = Rc::new(Bytecode::new(return_data.concrete_bytes().to_vec()));
            runner.initialized = true;
            runner.set_code(Rc::clone(&code));
            self.env.ledger.set_code(callee, code);
        }
        runner.pop_runtime();
        self.call_stack.pop();
        self.last_exit = status;
        debug!("[WORLD] {callee} exited with {status:?}");

        if creation && !success {
            self.contracts.remove(&callee);
            self.env.ledger.remove(&callee);
        }

        let Some(&caller) = self.call_stack.last() else {
            return Ok(());
        };
        self.env.static_flag = self.static_flag_stack.pop().unwrap_or(false);
        let machine = self
            .contracts
            .get_mut(&caller)
            .ok_or(WorldError::NoContract(caller))?
            .current_runtime_mut()
            .machine_mut();
        let outgoing = machine
            .outgoing
            .take()
            .ok_or(WorldError::MissingOutgoingCall(caller))?;

        let pushed = if outgoing.kind.is_create() {
            if success {
                Word::from_address(callee)
            } else {
                Word::zero()
            }
        } else {
            // A failed call keeps its revert data for RETURNDATACOPY but
            // leaves the caller's return area untouched.
            let n = outgoing.ret_len.min(return_data.len());
            if success && n > 0 {
                machine.memory.copy_from(outgoing.ret_offset, &return_data, 0, n);
            }
            Word::from_u64(u64::from(success))
        };
        // Creations only expose return data when they fail.
        let return_data = if outgoing.kind.is_create() && success {
            ByteBuf::new()
        } else {
            return_data
        };
        machine.result_from_last_call = Some(CallResult { success, return_data });
        machine
            .stack
            .push(pushed)
            .map_err(|_| WorldError::MissingOutgoingCall(caller))?;
        Ok(())
    }

    fn handle_outgoing(&mut self) -> Result<()> {
        self.current_tx_num += 1;
        let caller = *self.call_stack.last().ok_or(WorldError::NoActiveCallStack)?;
        let (outgoing, origin, storage_owner) = {
            let machine = self
                .contracts
                .get(&caller)
                .ok_or(WorldError::NoContract(caller))?
                .current_runtime()
                .machine();
            let outgoing = machine
                .outgoing
                .clone()
                .ok_or(WorldError::MissingOutgoingCall(caller))?;
            let origin = machine
                .tx
                .as_ref()
                .map(|tx| tx.origin.clone())
                .unwrap_or_else(Word::zero);
            (outgoing, origin, machine.storage_owner)
        };
        trace!("[WORLD] {caller} emits {:?} to {}", outgoing.kind, outgoing.recipient);

        match outgoing.kind {
            TxKind::CallCode | TxKind::Create2 => {
                return Err(WorldError::UnsupportedTransaction(outgoing.kind).into());
            }
            _ if self.call_stack.len() >= self.max_call_depth => {
                debug!("[WORLD] call depth {} reached, failing call", self.max_call_depth);
                return self.complete_locally(caller, false);
            }
            TxKind::Create => {
                // Under DELEGATECALL the creator is the account whose storage
                // the frame runs against, so its nonce is the one consumed.
                let address = self
                    .contracts
                    .get_mut(&storage_owner)
                    .ok_or(WorldError::NoContract(storage_owner))?
                    .next_create_address();
                self.deploy(
                    outgoing.data.concrete_bytes().to_vec(),
                    address,
                    storage_owner,
                    DeployMode::Pending,
                )?;
                let tx = outgoing.to_transaction(origin, address);
                self.enter_frame(address, tx, None, &outgoing)?;
            }
            TxKind::Call | TxKind::StaticCall | TxKind::DelegateCall => {
                let target = outgoing.recipient;
                if !self.contracts.contains_key(&target) {
                    if outgoing.kind != TxKind::DelegateCall {
                        let ctx = self.env.ctx;
                        self.env
                            .ledger
                            .transfer(ctx, Some(storage_owner), target, &outgoing.value);
                    }
                    return self.complete_locally(caller, true);
                }
                let share = (outgoing.kind == TxKind::DelegateCall).then_some(storage_owner);
                let tx = outgoing.to_transaction(origin, target);
                self.enter_frame(target, tx, share, &outgoing)?;
            }
        }
        Ok(())
    }

    fn enter_frame(
        &mut self,
        address: Address,
        tx: Transaction<'ctx>,
        share_storage: Option<Address>,
        outgoing: &OutgoingTx<'ctx>,
    ) -> Result<()> {
        self.static_flag_stack.push(self.env.static_flag);
        if outgoing.kind == TxKind::StaticCall {
            self.env.static_flag = true;
        }
        let from = tx.sender_address();
        self.push_frame(address, tx, share_storage)?;
        if outgoing.kind != TxKind::DelegateCall {
            let ctx = self.env.ctx;
            self.env.ledger.transfer(ctx, Some(from), address, &outgoing.value);
        }
        Ok(())
    }

    /// Finish the caller's pending call without running a callee frame.
    fn complete_locally(&mut self, caller: Address, success: bool) -> Result<()> {
        let machine = self
            .contracts
            .get_mut(&caller)
            .ok_or(WorldError::NoContract(caller))?
            .current_runtime_mut()
            .machine_mut();
        machine.outgoing = None;
        machine.result_from_last_call = Some(CallResult {
            success,
            return_data: ByteBuf::new(),
        });
        machine
            .stack
            .push(Word::from_u64(u64::from(success)))
            .map_err(|_| WorldError::MissingOutgoingCall(caller))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Config;

    // PUSH1 1 PUSH1 0 SSTORE STOP
    const STORE_ONE: [u8; 6] = [0x60, 0x01, 0x60, 0x00, 0x55, 0x00];

    #[test]
    fn test_dispatches_every_queued_transaction() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut world = World::new(&ctx);
        let target = Address::repeat_byte(0xaa);
        world
            .deploy(STORE_ONE.to_vec(), target, Address::ZERO, DeployMode::Runtime)
            .unwrap();
        for _ in 0..3 {
            world.push_transaction(Transaction::new(Address::repeat_byte(1), Some(target), ByteBuf::new()));
        }
        world.push_transaction(Transaction::new(Address::repeat_byte(1), None, ByteBuf::new()));

        let stop = world.run().unwrap();
        assert_eq!(stop, Stop::Exit(ExitStatus::Stop));
        assert_eq!(world.dispatched_transactions(), 4);
        assert!(world.is_idle());
        assert_eq!(world.storage_at(&target, U256::ZERO), U256::from(1));
    }

    #[test]
    fn test_deploy_rejects_taken_addresses() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut world = World::new(&ctx);
        let eoa = Address::repeat_byte(0x01);
        let contract = Address::repeat_byte(0x02);
        world.create_account(eoa, U256::from(5)).unwrap();
        world
            .deploy(vec![0x00], contract, eoa, DeployMode::Runtime)
            .unwrap();

        assert!(matches!(
            world.deploy(vec![0x00], eoa, eoa, DeployMode::Runtime),
            Err(crate::error::Error::World(WorldError::AccountAddressInUse(_)))
        ));
        assert!(matches!(
            world.deploy(vec![0x00], contract, eoa, DeployMode::Runtime),
            Err(crate::error::Error::World(WorldError::ContractAddressInUse(_)))
        ));
        assert!(matches!(
            world.create_account(contract, U256::ZERO),
            Err(crate::error::Error::World(WorldError::ContractAddressInUse(_)))
        ));
    }

    #[test]
    fn test_unknown_recipient_is_an_error() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut world = World::new(&ctx);
        world.push_transaction(Transaction::new(
            Address::repeat_byte(1),
            Some(Address::repeat_byte(9)),
            ByteBuf::new(),
        ));
        assert!(matches!(
            world.run(),
            Err(crate::error::Error::World(WorldError::NoContract(_)))
        ));
    }
}
