//! Concolic values: a concrete payload that always drives execution, shadowed
//! by an optional z3 expression over the input variables.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use z3::ast::{Ast, BV};
use z3::Context;

use crate::symbolic::z3_ext::bv_from_u256;
use crate::utils::hex::address_from_u256;

#[derive(Debug, Clone)]
pub struct Word<'ctx> {
    pub concrete: U256,
    pub symbolic: Option<BV<'ctx>>,
}

impl<'ctx> Word<'ctx> {
    pub fn concrete(value: U256) -> Self {
        Self {
            concrete: value,
            symbolic: None,
        }
    }

    pub fn from_u64(value: u64) -> Self {
        Self::concrete(U256::from(value))
    }

    pub fn zero() -> Self {
        Self::concrete(U256::ZERO)
    }

    pub fn from_address(addr: Address) -> Self {
        Self::concrete(U256::from_be_slice(addr.as_slice()))
    }

    /// `expr` must be 256 bits wide.
    pub fn symbolic(value: U256, expr: BV<'ctx>) -> Self {
        debug_assert_eq!(expr.get_size(), 256);
        Self {
            concrete: value,
            symbolic: Some(expr),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        self.symbolic.is_some()
    }

    pub fn as_bv(&self, ctx: &'ctx Context) -> BV<'ctx> {
        match &self.symbolic {
            Some(bv) => bv.clone(),
            None => bv_from_u256(ctx, self.concrete),
        }
    }

    pub fn to_address(&self) -> Address {
        address_from_u256(self.concrete)
    }

    /// Concrete value as a host index, saturating at `usize::MAX`.
    pub fn as_usize(&self) -> usize {
        usize::try_from(self.concrete).unwrap_or(usize::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.concrete.is_zero()
    }
}

impl PartialEq for Word<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.concrete == other.concrete
            && match (&self.symbolic, &other.symbolic) {
                (None, None) => true,
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
    }
}

/// A symbolic input variable together with the concrete value it held in the
/// replayed input.
#[derive(Debug, Clone)]
pub struct SymVar<'ctx> {
    pub bits: u32,
    pub value: U256,
    pub expr: BV<'ctx>,
}

/// Name -> variable bindings for one input. Merging two contexts keeps the
/// first binding of a name.
#[derive(Debug, Clone, Default)]
pub struct VarContext<'ctx> {
    vars: BTreeMap<String, SymVar<'ctx>>,
}

impl<'ctx> VarContext<'ctx> {
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
        }
    }

    /// Declare `name` as a `bits`-wide variable holding `value` and return it
    /// zero-extended to a 256-bit word.
    pub fn declare(&mut self, ctx: &'ctx Context, name: &str, bits: u32, value: U256) -> Word<'ctx> {
        let expr = BV::new_const(ctx, name, bits);
        let masked = if bits >= 256 {
            value
        } else {
            value & ((U256::from(1) << bits) - U256::from(1))
        };
        self.vars.insert(
            name.to_string(),
            SymVar {
                bits,
                value: masked,
                expr: expr.clone(),
            },
        );
        let wide = if bits < 256 { expr.zero_ext(256 - bits) } else { expr };
        Word::symbolic(masked, wide)
    }

    pub fn get(&self, name: &str) -> Option<&SymVar<'ctx>> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SymVar<'ctx>)> {
        self.vars.iter()
    }

    pub fn merge(&mut self, other: &VarContext<'ctx>) {
        for (name, var) in &other.vars {
            self.vars.entry(name.clone()).or_insert_with(|| var.clone());
        }
    }
}

/// Byte-addressed concolic buffer (memory, call data, return data). Only
/// symbolic positions pay for an expression.
#[derive(Debug, Clone, Default)]
pub struct ByteBuf<'ctx> {
    bytes: Vec<u8>,
    symbolic: BTreeMap<usize, BV<'ctx>>,
}

impl<'ctx> ByteBuf<'ctx> {
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            symbolic: BTreeMap::new(),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            symbolic: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn concrete_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn has_symbolic(&self) -> bool {
        !self.symbolic.is_empty()
    }

    pub fn is_symbolic_at(&self, offset: usize) -> bool {
        self.symbolic.contains_key(&offset)
    }

    /// Grow (never shrink) to `len` bytes, zero filled.
    pub fn ensure_len(&mut self, len: usize) {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
    }

    pub fn push_word(&mut self, word: &Word<'ctx>) {
        let offset = self.bytes.len();
        self.write_word(offset, word);
    }

    pub fn extend(&mut self, other: &ByteBuf<'ctx>) {
        let base = self.bytes.len();
        self.bytes.extend_from_slice(&other.bytes);
        for (idx, e) in &other.symbolic {
            self.symbolic.insert(base + idx, e.clone());
        }
    }

    /// Byte at `offset`, zero past the end.
    pub fn byte(&self, offset: usize) -> (u8, Option<&BV<'ctx>>) {
        let value = self.bytes.get(offset).copied().unwrap_or(0);
        (value, self.symbolic.get(&offset))
    }

    pub fn byte_bv(&self, ctx: &'ctx Context, offset: usize) -> BV<'ctx> {
        match self.byte(offset) {
            (_, Some(e)) => e.clone(),
            (v, None) => BV::from_u64(ctx, u64::from(v), 8),
        }
    }

    pub fn write_byte(&mut self, offset: usize, value: u8, expr: Option<BV<'ctx>>) {
        self.ensure_len(offset + 1);
        self.bytes[offset] = value;
        match expr {
            Some(e) => {
                self.symbolic.insert(offset, e);
            }
            None => {
                self.symbolic.remove(&offset);
            }
        }
    }

    /// Big-endian 32-byte read; bytes past the end read as zero.
    pub fn read_word(&self, ctx: &'ctx Context, offset: usize) -> Word<'ctx> {
        let mut raw = [0u8; 32];
        for (i, slot) in raw.iter_mut().enumerate() {
            *slot = self.bytes.get(offset.saturating_add(i)).copied().unwrap_or(0);
        }
        let concrete = U256::from_be_bytes(raw);
        let end = offset.saturating_add(32);
        if self.symbolic.range(offset..end).next().is_none() {
            return Word::concrete(concrete);
        }
        let mut expr = self.byte_bv(ctx, offset);
        for i in 1..32 {
            expr = expr.concat(&self.byte_bv(ctx, offset + i));
        }
        Word::symbolic(concrete, expr)
    }

    pub fn write_word(&mut self, offset: usize, word: &Word<'ctx>) {
        self.ensure_len(offset + 32);
        let raw = word.concrete.to_be_bytes::<32>();
        self.bytes[offset..offset + 32].copy_from_slice(&raw);
        match &word.symbolic {
            Some(e) => {
                for i in 0..32u32 {
                    let hi = 255 - 8 * i;
                    self.symbolic
                        .insert(offset + i as usize, e.extract(hi, hi - 7).simplify());
                }
            }
            None => {
                let keys: Vec<usize> = self
                    .symbolic
                    .range(offset..offset + 32)
                    .map(|(k, _)| *k)
                    .collect();
                for k in keys {
                    self.symbolic.remove(&k);
                }
            }
        }
    }

    /// `len` bytes starting at `offset`, zero padded past the end.
    pub fn slice(&self, offset: usize, len: usize) -> ByteBuf<'ctx> {
        let mut out = ByteBuf::new();
        out.bytes = (0..len)
            .map(|i| self.bytes.get(offset.saturating_add(i)).copied().unwrap_or(0))
            .collect();
        for (idx, e) in self.symbolic.range(offset..offset.saturating_add(len)) {
            out.symbolic.insert(idx - offset, e.clone());
        }
        out
    }

    /// Copy `len` bytes of `src` (from `src_offset`, zero padded) to `dst_offset`.
    pub fn copy_from(&mut self, dst_offset: usize, src: &ByteBuf<'ctx>, src_offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let chunk = src.slice(src_offset, len);
        self.ensure_len(dst_offset + len);
        self.bytes[dst_offset..dst_offset + len].copy_from_slice(&chunk.bytes);
        let stale: Vec<usize> = self
            .symbolic
            .range(dst_offset..dst_offset + len)
            .map(|(k, _)| *k)
            .collect();
        for k in stale {
            self.symbolic.remove(&k);
        }
        for (idx, e) in chunk.symbolic {
            self.symbolic.insert(dst_offset + idx, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::z3_ext::u256_from_bv;
    use z3::Config;

    #[test]
    fn test_word_roundtrip_through_buffer_keeps_symbolic_bytes() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut vars = VarContext::new();
        let x = vars.declare(&ctx, "x", 256, U256::from(0x1234));

        let mut buf = ByteBuf::new();
        buf.write_word(4, &x);
        assert_eq!(buf.len(), 36);
        assert!(buf.is_symbolic_at(4));
        assert!(!buf.is_symbolic_at(3));

        let back = buf.read_word(&ctx, 4);
        assert_eq!(back.concrete, U256::from(0x1234));
        assert!(back.is_symbolic());

        // Overwriting with a concrete word clears the shadow.
        buf.write_word(4, &Word::from_u64(7));
        assert!(!buf.has_symbolic());
        assert_eq!(buf.read_word(&ctx, 4).concrete, U256::from(7));
    }

    #[test]
    fn test_read_past_end_is_zero_padded() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let buf = ByteBuf::from_bytes(vec![0xaa, 0xbb]);
        let w = buf.read_word(&ctx, 1);
        assert_eq!(w.concrete, U256::from(0xbb) << 248);
        assert_eq!(buf.slice(1, 3).concrete_bytes(), &[0xbb, 0, 0]);
    }

    #[test]
    fn test_declare_masks_narrow_values() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut vars = VarContext::new();
        let w = vars.declare(&ctx, "b", 8, U256::from(0x1ff));
        assert_eq!(w.concrete, U256::from(0xff));
        assert_eq!(vars.get("b").map(|v| v.bits), Some(8));
        let expr = w.symbolic.unwrap();
        assert_eq!(expr.get_size(), 256);
        assert!(u256_from_bv(&expr).is_none());
    }

    #[test]
    fn test_merge_keeps_first_binding() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut a = VarContext::new();
        a.declare(&ctx, "v", 256, U256::from(1));
        let mut b = VarContext::new();
        b.declare(&ctx, "v", 256, U256::from(2));
        b.declare(&ctx, "w", 256, U256::from(3));
        a.merge(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("v").map(|v| v.value), Some(U256::from(1)));
    }
}
