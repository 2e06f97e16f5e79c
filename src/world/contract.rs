use std::rc::Rc;

use alloy_primitives::Address;

use crate::symbolic::state::{Bytecode, ExecEnv};
use crate::world::runtime::Runtime;
use crate::world::transaction::Transaction;

/// A deployed contract and its stack of live Runtimes, one per re-entrant
/// call into it.
pub struct ContractRunner<'ctx> {
    pub address: Address,
    pub deployer: Address,
    /// Next CREATE nonce; starts at 1 (EIP-161).
    pub nonce: u64,
    /// False while the constructor is running.
    pub initialized: bool,
    code: Rc<Bytecode>,
    runtimes: Vec<Runtime<'ctx>>,
}

impl<'ctx> ContractRunner<'ctx> {
    pub fn new(address: Address, deployer: Address, code: Rc<Bytecode>, initialized: bool) -> Self {
        Self {
            address,
            deployer,
            nonce: 1,
            initialized,
            code,
            runtimes: Vec::new(),
        }
    }

    pub fn code(&self) -> &Rc<Bytecode> {
        &self.code
    }

    pub fn set_code(&mut self, code: Rc<Bytecode>) {
        self.code = code;
    }

    /// New frame over this contract's code. With `share_storage` the frame
    /// runs against that account's storage instead (DELEGATECALL).
    pub fn push_runtime(
        &mut self,
        env: &mut ExecEnv<'ctx>,
        tx: Option<Transaction<'ctx>>,
        share_storage: Option<Address>,
    ) -> &mut Runtime<'ctx> {
        let storage_owner = share_storage.unwrap_or(self.address);
        let runtime = Runtime::new(env, Rc::clone(&self.code), self.address, storage_owner, tx);
        self.runtimes.push(runtime);
        let top = self.runtimes.len() - 1;
        &mut self.runtimes[top]
    }

    pub fn pop_runtime(&mut self) -> Option<Runtime<'ctx>> {
        self.runtimes.pop()
    }

    /// # Panics
    /// If no Runtime is live; callers only reach this with the contract on
    /// the call stack.
    pub fn current_runtime(&self) -> &Runtime<'ctx> {
        match self.runtimes.last() {
            Some(rt) => rt,
            None => panic!("contract {} has no live runtime", self.address),
        }
    }

    /// # Panics
    /// Same contract as [`Self::current_runtime`].
    pub fn current_runtime_mut(&mut self) -> &mut Runtime<'ctx> {
        let address = self.address;
        match self.runtimes.last_mut() {
            Some(rt) => rt,
            None => panic!("contract {address} has no live runtime"),
        }
    }

    pub fn runtime_depth(&self) -> usize {
        self.runtimes.len()
    }

    pub fn runtimes(&self) -> impl Iterator<Item = &Runtime<'ctx>> {
        self.runtimes.iter()
    }

    pub fn runtimes_mut(&mut self) -> impl Iterator<Item = &mut Runtime<'ctx>> {
        self.runtimes.iter_mut()
    }

    /// Address of the next contract this one creates; consumes the nonce.
    pub fn next_create_address(&mut self) -> Address {
        let addr = self.address.create(self.nonce);
        self.nonce += 1;
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::{Config, Context};

    #[test]
    fn test_create_addresses_follow_nonce() {
        let deployer = Address::repeat_byte(0x11);
        let mut runner = ContractRunner::new(deployer, Address::ZERO, Rc::new(Bytecode::new(vec![])), true);
        let first = runner.next_create_address();
        let second = runner.next_create_address();
        assert_eq!(first, deployer.create(1));
        assert_eq!(second, deployer.create(2));
        assert_eq!(runner.nonce, 3);
    }

    #[test]
    fn test_runtime_stack_and_delegate_storage() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut env = ExecEnv::new(&ctx);
        let me = Address::repeat_byte(0xaa);
        let caller = Address::repeat_byte(0xbb);
        let mut runner = ContractRunner::new(me, Address::ZERO, Rc::new(Bytecode::new(vec![0x00])), true);

        runner.push_runtime(&mut env, None, None);
        let rt = runner.push_runtime(&mut env, None, Some(caller));
        assert_eq!(rt.machine().storage_owner, caller);
        assert_eq!(rt.machine().address, me);
        assert_eq!(runner.runtime_depth(), 2);
        assert!(Rc::ptr_eq(&runner.current_runtime().machine().code, runner.code()));

        runner.pop_runtime();
        assert_eq!(runner.current_runtime().machine().storage_owner, me);
    }

    #[test]
    #[should_panic(expected = "no live runtime")]
    fn test_current_runtime_on_empty_stack_panics() {
        let runner: ContractRunner<'_> =
            ContractRunner::new(Address::ZERO, Address::ZERO, Rc::new(Bytecode::new(vec![])), true);
        let _ = runner.current_runtime();
    }
}
