use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use alloy_primitives::{Address, U256};
use z3::Context;

use crate::symbolic::constraints::PathConstraints;
use crate::symbolic::engine::{ExitStatus, Info, Stop};
use crate::symbolic::value::{ByteBuf, VarContext, Word};
use crate::world::transaction::{CallResult, OutgoingTx, Transaction};

pub const STACK_LIMIT: usize = 1024;
pub const MEMORY_LIMIT: usize = 1 << 24;
pub const CHAIN_ID: u64 = 1;

/// Contract code plus its JUMPDEST map (PUSH immediates excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytecode {
    code: Vec<u8>,
    jumpdests: Vec<bool>,
}

impl Bytecode {
    pub fn new(code: Vec<u8>) -> Self {
        let mut jumpdests = vec![false; code.len()];
        let mut pc = 0;
        while pc < code.len() {
            let op = code[pc];
            if op == 0x5b {
                jumpdests[pc] = true;
            }
            pc += match op {
                0x60..=0x7f => (op - 0x5f) as usize + 1,
                _ => 1,
            };
        }
        Self { code, jumpdests }
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Opcode at `pc`; running off the end reads as STOP.
    pub fn byte(&self, pc: usize) -> u8 {
        self.code.get(pc).copied().unwrap_or(0x00)
    }

    pub fn is_jumpdest(&self, pc: usize) -> bool {
        self.jumpdests.get(pc).copied().unwrap_or(false)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.code
    }
}

#[derive(Debug, Clone, Default)]
pub struct Stack<'ctx> {
    items: Vec<Word<'ctx>>,
}

impl<'ctx> Stack<'ctx> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, word: Word<'ctx>) -> Result<(), Stop> {
        if self.items.len() >= STACK_LIMIT {
            return Err(Stop::Exit(ExitStatus::Invalid));
        }
        self.items.push(word);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Word<'ctx>, Stop> {
        self.items.pop().ok_or(Stop::Exit(ExitStatus::Invalid))
    }

    /// `depth` 0 is the top of the stack.
    pub fn peek(&self, depth: usize) -> Result<&Word<'ctx>, Stop> {
        if depth >= self.items.len() {
            return Err(Stop::Exit(ExitStatus::Invalid));
        }
        Ok(&self.items[self.items.len() - 1 - depth])
    }

    pub fn dup(&mut self, depth: usize) -> Result<(), Stop> {
        let word = self.peek(depth)?.clone();
        self.push(word)
    }

    pub fn swap(&mut self, depth: usize) -> Result<(), Stop> {
        let len = self.items.len();
        if depth >= len {
            return Err(Stop::Exit(ExitStatus::Invalid));
        }
        self.items.swap(len - 1, len - 1 - depth);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn top(&self) -> Option<&Word<'ctx>> {
        self.items.last()
    }
}

#[derive(Debug, Clone)]
pub struct Account<'ctx> {
    pub balance: Word<'ctx>,
    pub storage: BTreeMap<U256, Word<'ctx>>,
    pub code: Option<Rc<Bytecode>>,
}

impl<'ctx> Account<'ctx> {
    pub fn with_balance(balance: Word<'ctx>) -> Self {
        Self {
            balance,
            storage: BTreeMap::new(),
            code: None,
        }
    }
}

/// Every account the World knows about, externally owned or not, plus the
/// transient storage (TLOAD/TSTORE) of the transaction in flight.
#[derive(Debug, Clone, Default)]
pub struct Ledger<'ctx> {
    accounts: BTreeMap<Address, Account<'ctx>>,
    transient: BTreeMap<(Address, U256), Word<'ctx>>,
}

impl<'ctx> Ledger<'ctx> {
    pub fn new() -> Self {
        Self {
            accounts: BTreeMap::new(),
            transient: BTreeMap::new(),
        }
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.accounts.contains_key(addr)
    }

    pub fn account(&self, addr: &Address) -> Option<&Account<'ctx>> {
        self.accounts.get(addr)
    }

    pub fn insert(&mut self, addr: Address, account: Account<'ctx>) {
        self.accounts.insert(addr, account);
    }

    pub fn remove(&mut self, addr: &Address) -> Option<Account<'ctx>> {
        self.accounts.remove(addr)
    }

    /// Account at `addr`, created empty if unseen.
    pub fn ensure(&mut self, addr: Address) -> &mut Account<'ctx> {
        self.accounts
            .entry(addr)
            .or_insert_with(|| Account::with_balance(Word::zero()))
    }

    pub fn balance(&self, addr: &Address) -> Word<'ctx> {
        self.accounts
            .get(addr)
            .map(|a| a.balance.clone())
            .unwrap_or_else(Word::zero)
    }

    pub fn code(&self, addr: &Address) -> Option<Rc<Bytecode>> {
        self.accounts.get(addr).and_then(|a| a.code.clone())
    }

    pub fn set_code(&mut self, addr: Address, code: Rc<Bytecode>) {
        self.ensure(addr).code = Some(code);
    }

    pub fn sload(&self, addr: &Address, slot: &U256) -> Word<'ctx> {
        self.accounts
            .get(addr)
            .and_then(|a| a.storage.get(slot).cloned())
            .unwrap_or_else(Word::zero)
    }

    pub fn sstore(&mut self, addr: Address, slot: U256, value: Word<'ctx>) {
        let account = self.ensure(addr);
        if value.is_zero() && !value.is_symbolic() {
            account.storage.remove(&slot);
        } else {
            account.storage.insert(slot, value);
        }
    }

    pub fn tload(&self, addr: &Address, slot: &U256) -> Word<'ctx> {
        self.transient
            .get(&(*addr, *slot))
            .cloned()
            .unwrap_or_else(Word::zero)
    }

    pub fn tstore(&mut self, addr: Address, slot: U256, value: Word<'ctx>) {
        if value.is_zero() && !value.is_symbolic() {
            self.transient.remove(&(addr, slot));
        } else {
            self.transient.insert((addr, slot), value);
        }
    }

    /// Transient storage lives for one top-level transaction.
    pub fn clear_transient(&mut self) {
        self.transient.clear();
    }

    /// Slots of `addr` holding a non-zero or symbolic value.
    pub fn storage_fingerprint(&self, addr: &Address) -> BTreeSet<U256> {
        self.accounts
            .get(addr)
            .map(|a| {
                a.storage
                    .iter()
                    .filter(|(_, v)| v.is_symbolic() || !v.is_zero())
                    .map(|(k, _)| *k)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move `value` from `from` to `to`. Balances wrap like the EVM's 256-bit
    /// arithmetic; insufficient funds are not modelled.
    pub fn transfer(&mut self, ctx: &'ctx Context, from: Option<Address>, to: Address, value: &Word<'ctx>) {
        if value.is_zero() && !value.is_symbolic() {
            return;
        }
        if let Some(from) = from {
            let account = self.ensure(from);
            account.balance = concolic_sub(ctx, &account.balance, value);
        }
        let account = self.ensure(to);
        account.balance = concolic_add(ctx, &account.balance, value);
    }
}

fn concolic_add<'ctx>(ctx: &'ctx Context, a: &Word<'ctx>, b: &Word<'ctx>) -> Word<'ctx> {
    let concrete = a.concrete.wrapping_add(b.concrete);
    if a.is_symbolic() || b.is_symbolic() {
        Word::symbolic(concrete, a.as_bv(ctx).bvadd(&b.as_bv(ctx)))
    } else {
        Word::concrete(concrete)
    }
}

fn concolic_sub<'ctx>(ctx: &'ctx Context, a: &Word<'ctx>, b: &Word<'ctx>) -> Word<'ctx> {
    let concrete = a.concrete.wrapping_sub(b.concrete);
    if a.is_symbolic() || b.is_symbolic() {
        Word::symbolic(concrete, a.as_bv(ctx).bvsub(&b.as_bv(ctx)))
    } else {
        Word::concrete(concrete)
    }
}

#[derive(Debug, Clone)]
pub struct BlockEnv<'ctx> {
    pub number: Word<'ctx>,
    pub timestamp: Word<'ctx>,
    pub coinbase: Address,
}

impl Default for BlockEnv<'_> {
    fn default() -> Self {
        Self {
            number: Word::zero(),
            timestamp: Word::zero(),
            coinbase: Address::ZERO,
        }
    }
}

impl<'ctx> BlockEnv<'ctx> {
    pub fn advance(&mut self, ctx: &'ctx Context, blocks: &Word<'ctx>, seconds: &Word<'ctx>) {
        self.number = concolic_add(ctx, &self.number, blocks);
        self.timestamp = concolic_add(ctx, &self.timestamp, seconds);
    }
}

/// State shared by every execution context of one World.
pub struct ExecEnv<'ctx> {
    pub ctx: &'ctx Context,
    pub vars: VarContext<'ctx>,
    pub path: PathConstraints<'ctx>,
    pub ledger: Ledger<'ctx>,
    pub block: BlockEnv<'ctx>,
    pub static_flag: bool,
}

impl<'ctx> ExecEnv<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            vars: VarContext::new(),
            path: PathConstraints::new(),
            ledger: Ledger::new(),
            block: BlockEnv::default(),
            static_flag: false,
        }
    }
}

/// One execution context: a call frame running `code` on behalf of
/// `storage_owner` (which differs from `address` only under DELEGATECALL).
#[derive(Debug, Clone)]
pub struct Machine<'ctx> {
    pub address: Address,
    pub storage_owner: Address,
    pub code: Rc<Bytecode>,
    pub pc: usize,
    pub stack: Stack<'ctx>,
    pub memory: ByteBuf<'ctx>,
    pub tx: Option<Transaction<'ctx>>,
    pub outgoing: Option<OutgoingTx<'ctx>>,
    pub result_from_last_call: Option<CallResult<'ctx>>,
    pub return_data: ByteBuf<'ctx>,
    pub info: Option<Info>,
}

impl<'ctx> Machine<'ctx> {
    pub fn new(
        code: Rc<Bytecode>,
        address: Address,
        storage_owner: Address,
        tx: Option<Transaction<'ctx>>,
    ) -> Self {
        Self {
            address,
            storage_owner,
            code,
            pc: 0,
            stack: Stack::new(),
            memory: ByteBuf::new(),
            tx,
            outgoing: None,
            result_from_last_call: None,
            return_data: ByteBuf::new(),
            info: None,
        }
    }

    /// Expand memory to cover `[offset, offset + len)` rounded up to a word.
    /// Returns the host offset. Growth past the memory cap is an exceptional
    /// halt, like running out of gas for the expansion.
    pub fn touch_memory(&mut self, offset: &Word<'ctx>, len: usize) -> Result<usize, Stop> {
        if len == 0 {
            return Ok(0);
        }
        let start = offset.as_usize();
        let end = start
            .checked_add(len)
            .filter(|end| *end <= MEMORY_LIMIT)
            .ok_or(Stop::Exit(ExitStatus::Invalid))?;
        let rounded = end.div_ceil(32) * 32;
        self.memory.ensure_len(rounded);
        Ok(start)
    }

    /// Length operand of a copy, bounded by the memory cap.
    pub fn copy_len(&self, len: &Word<'ctx>) -> Result<usize, Stop> {
        let n = len.as_usize();
        if n > MEMORY_LIMIT {
            return Err(Stop::Exit(ExitStatus::Invalid));
        }
        Ok(n)
    }

    pub fn caller(&self) -> Word<'ctx> {
        self.tx.as_ref().map(|t| t.sender.clone()).unwrap_or_else(Word::zero)
    }

    pub fn call_value(&self) -> Word<'ctx> {
        self.tx.as_ref().map(|t| t.value.clone()).unwrap_or_else(Word::zero)
    }

    pub fn gas_limit(&self) -> u64 {
        self.tx.as_ref().map(|t| t.gas_limit).unwrap_or(0)
    }

    pub fn storage_word(&self, env: &ExecEnv<'ctx>, slot: &U256) -> Word<'ctx> {
        env.ledger.sload(&self.storage_owner, slot)
    }

    pub fn last_return_data(&self) -> Option<&ByteBuf<'ctx>> {
        self.result_from_last_call.as_ref().map(|r| &r.return_data)
    }

    pub(crate) fn finish(&mut self, stop: Stop) -> Info {
        if matches!(stop, Stop::Exit(ExitStatus::Stop | ExitStatus::Invalid)) {
            self.return_data = ByteBuf::new();
        }
        let info = Info {
            stop,
            pc: self.pc,
        };
        self.info = Some(info.clone());
        info
    }
}
