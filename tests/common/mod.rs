#![allow(dead_code)]

use alloy_primitives::{Address, U256};
use evm_concolic::abi::{function_call, AbiType};
use evm_concolic::symbolic::value::{ByteBuf, VarContext};
use evm_concolic::world::transaction::Transaction;
use z3::Context;

pub const TARGET: Address = Address::repeat_byte(0xaa);
pub const SENDER: Address = Address::repeat_byte(0x01);

pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const GT: u8 = 0x11;
pub const ADDRESS: u8 = 0x30;
pub const CALLDATALOAD: u8 = 0x35;
pub const CALLDATASIZE: u8 = 0x36;
pub const POP: u8 = 0x50;
pub const MLOAD: u8 = 0x51;
pub const MSTORE: u8 = 0x52;
pub const MSTORE8: u8 = 0x53;
pub const SLOAD: u8 = 0x54;
pub const SSTORE: u8 = 0x55;
pub const JUMPI: u8 = 0x57;
pub const JUMPDEST: u8 = 0x5b;
pub const TLOAD: u8 = 0x5c;
pub const TSTORE: u8 = 0x5d;
pub const RETURNDATASIZE: u8 = 0x3d;
pub const CREATE: u8 = 0xf0;
pub const CALL: u8 = 0xf1;
pub const CALLCODE: u8 = 0xf2;
pub const RETURN: u8 = 0xf3;
pub const DELEGATECALL: u8 = 0xf4;
pub const CREATE2: u8 = 0xf5;
pub const STATICCALL: u8 = 0xfa;
pub const REVERT: u8 = 0xfd;

/// Minimal bytecode builder. Jump targets are plain offsets; use `pc()` to
/// read them off while assembling.
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn op(mut self, op: u8) -> Self {
        self.code.push(op);
        self
    }

    pub fn push1(mut self, v: u8) -> Self {
        self.code.extend([0x60, v]);
        self
    }

    pub fn push2(mut self, v: u16) -> Self {
        self.code.push(0x61);
        self.code.extend(v.to_be_bytes());
        self
    }

    pub fn push20(mut self, addr: Address) -> Self {
        self.code.push(0x73);
        self.code.extend(addr.as_slice());
        self
    }

    /// CALL `to` with no value, `arg_len` bytes of memory from offset 0 as
    /// call data and no return buffer. Leaves the success flag on the stack.
    pub fn call(self, to: Option<Address>, arg_len: u8) -> Self {
        let asm = self.push1(0).push1(0).push1(arg_len).push1(0).push1(0);
        let asm = match to {
            Some(addr) => asm.push20(addr),
            None => asm.op(ADDRESS),
        };
        asm.push2(0xffff).op(CALL)
    }

    /// Message call `op` (CALL, CALLCODE, DELEGATECALL or STATICCALL) to
    /// `to` without value, call data `memory[0..arg_len]` and return area
    /// `memory[ret_offset..ret_offset + ret_len]`. Leaves the success flag on
    /// the stack.
    pub fn call_with(self, op: u8, to: Address, arg_len: u8, ret_offset: u8, ret_len: u8) -> Self {
        let asm = self.push1(ret_len).push1(ret_offset).push1(arg_len).push1(0);
        let asm = if matches!(op, CALL | CALLCODE) { asm.push1(0) } else { asm };
        asm.push20(to).push2(0xffff).op(op)
    }

    /// `MSTORE(offset, value)`
    pub fn mstore(self, offset: u8, value: u8) -> Self {
        self.push1(value).push1(offset).op(MSTORE)
    }

    /// RETURN or REVERT with `memory[offset..offset + len]`.
    pub fn halt_with(self, op: u8, offset: u8, len: u8) -> Self {
        self.push1(len).push1(offset).op(op)
    }

    /// `SSTORE(slot, <top of stack>)`
    pub fn store_top(self, slot: u8) -> Self {
        self.push1(slot).op(SSTORE)
    }

    pub fn build(self) -> Vec<u8> {
        self.code
    }
}

/// `f(uint256 x)`: stores 1 at slot 0 when `x > 10`, otherwise stops.
/// The JUMPI sits at pc 8 and jumps to pc 10.
pub fn threshold_contract() -> Vec<u8> {
    let code = Asm::new()
        .push1(10)
        .push1(4)
        .op(CALLDATALOAD)
        .op(GT)
        .push1(10)
        .op(JUMPI)
        .op(STOP)
        .op(JUMPDEST)
        .push1(1)
        .store_top(0)
        .op(STOP)
        .build();
    debug_assert_eq!(code[8], JUMPI);
    debug_assert_eq!(code[10], JUMPDEST);
    code
}

pub const THRESHOLD_JUMPI: usize = 8;
pub const THRESHOLD_TARGET: usize = 10;

/// A transaction calling `f(uint256)` at `to` with argument `x`, bound to
/// variable `arg_{tx}_0`.
pub fn uint_call<'ctx>(ctx: &'ctx Context, tx: usize, to: Address, x: U256) -> Transaction<'ctx> {
    let mut vars = VarContext::new();
    let data = function_call(ctx, &mut vars, tx, "f", &[AbiType::Uint(256)], &[x]).unwrap();
    Transaction::new(SENDER, Some(to), data).with_vars(vars)
}

/// Concrete call data: a zero selector followed by one word.
pub fn word_data<'ctx>(word: U256) -> ByteBuf<'ctx> {
    let mut bytes = vec![0u8; 4];
    bytes.extend(word.to_be_bytes::<32>());
    ByteBuf::from_bytes(bytes)
}

/// One-transaction corpus file calling `f(uint256)` at `TARGET`.
pub fn uint_corpus(x: u64) -> String {
    format!(
        r#"[{{"call":{{"tag":"SolCall","contents":["f",[{{"tag":"AbiUInt","contents":[256,"{x}"]}}]]}},"src":"0x10000","dst":"{TARGET:#x}","gas":12500000,"gasprice":"0x0","value":"0x0","delay":["0x0","0x0"]}}]"#
    )
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("evm-concolic-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
