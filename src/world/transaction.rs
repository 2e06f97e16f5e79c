use alloy_primitives::Address;

use crate::symbolic::value::{ByteBuf, VarContext, Word};

pub const DEFAULT_GAS_LIMIT: u64 = 12_500_000;

/// One transaction to execute inside a contract. Fields that come from an
/// input (sender, value, call data, block increments) may be symbolic; the
/// variables they mention are bound through `vars`.
#[derive(Debug, Clone)]
pub struct Transaction<'ctx> {
    pub origin: Word<'ctx>,
    pub sender: Word<'ctx>,
    /// `None` marks a placeholder that only advances the block environment.
    pub recipient: Option<Address>,
    pub value: Word<'ctx>,
    pub data: ByteBuf<'ctx>,
    pub gas_price: Word<'ctx>,
    pub gas_limit: u64,
    pub block_num_inc: Word<'ctx>,
    pub block_timestamp_inc: Word<'ctx>,
    pub vars: VarContext<'ctx>,
}

impl<'ctx> Transaction<'ctx> {
    pub fn new(sender: Address, recipient: Option<Address>, data: ByteBuf<'ctx>) -> Self {
        let sender = Word::from_address(sender);
        Self {
            origin: sender.clone(),
            sender,
            recipient,
            value: Word::zero(),
            data,
            gas_price: Word::zero(),
            gas_limit: DEFAULT_GAS_LIMIT,
            block_num_inc: Word::zero(),
            block_timestamp_inc: Word::zero(),
            vars: VarContext::new(),
        }
    }

    /// Sender as a (possibly symbolic) word; origin follows it.
    pub fn with_sender(mut self, sender: Word<'ctx>) -> Self {
        self.origin = sender.clone();
        self.sender = sender;
        self
    }

    pub fn with_value(mut self, value: Word<'ctx>) -> Self {
        self.value = value;
        self
    }

    pub fn with_gas_price(mut self, gas_price: Word<'ctx>) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_block_increments(mut self, blocks: Word<'ctx>, seconds: Word<'ctx>) -> Self {
        self.block_num_inc = blocks;
        self.block_timestamp_inc = seconds;
        self
    }

    pub fn with_vars(mut self, vars: VarContext<'ctx>) -> Self {
        self.vars = vars;
        self
    }

    pub fn sender_address(&self) -> Address {
        self.sender.to_address()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

impl TxKind {
    pub fn is_create(self) -> bool {
        matches!(self, TxKind::Create | TxKind::Create2)
    }
}

/// A message call emitted by a running frame, waiting for the World.
#[derive(Debug, Clone)]
pub struct OutgoingTx<'ctx> {
    pub kind: TxKind,
    pub sender: Word<'ctx>,
    /// Code address for calls, zero for creations.
    pub recipient: Address,
    pub value: Word<'ctx>,
    pub data: ByteBuf<'ctx>,
    pub gas_limit: u64,
    pub ret_offset: usize,
    pub ret_len: usize,
}

impl<'ctx> OutgoingTx<'ctx> {
    /// The transaction the callee frame runs with.
    pub fn to_transaction(&self, origin: Word<'ctx>, recipient: Address) -> Transaction<'ctx> {
        Transaction {
            origin,
            sender: self.sender.clone(),
            recipient: Some(recipient),
            value: self.value.clone(),
            data: self.data.clone(),
            gas_price: Word::zero(),
            gas_limit: self.gas_limit,
            block_num_inc: Word::zero(),
            block_timestamp_inc: Word::zero(),
            vars: VarContext::new(),
        }
    }
}

/// What the caller frame sees of its last message call.
#[derive(Debug, Clone)]
pub struct CallResult<'ctx> {
    pub success: bool,
    pub return_data: ByteBuf<'ctx>,
}
