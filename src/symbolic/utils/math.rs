//! Bit-vector helpers shared by the arithmetic opcodes. Every helper works
//! on 256-bit words unless it says otherwise.

use alloy_primitives::U256;
use z3::ast::{Ast, Bool, BV};

/// `quotient` unless `divisor` is zero, in which case zero (EVM semantics).
/// Width follows `divisor`, so 512-bit intermediates work too.
fn unless_zero_divisor<'ctx>(divisor: &BV<'ctx>, quotient: BV<'ctx>) -> BV<'ctx> {
    let zero = BV::from_u64(divisor.get_ctx(), 0, divisor.get_size());
    divisor._eq(&zero).ite(&zero, &quotient)
}

pub fn safe_div<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
    unless_zero_divisor(b, a.bvudiv(b))
}

pub fn safe_rem<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
    unless_zero_divisor(b, a.bvurem(b))
}

/// MIN / -1 wraps to MIN in both z3 and the EVM.
pub fn safe_sdiv<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
    unless_zero_divisor(b, a.bvsdiv(b))
}

/// Sign of the result follows the dividend (`bvsrem`, not `bvsmod`).
pub fn safe_srem<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
    unless_zero_divisor(b, a.bvsrem(b))
}

pub fn zero<'ctx>(ctx: &'ctx z3::Context) -> BV<'ctx> {
    word(ctx, 0)
}

pub fn one<'ctx>(ctx: &'ctx z3::Context) -> BV<'ctx> {
    word(ctx, 1)
}

pub fn word<'ctx>(ctx: &'ctx z3::Context, v: u64) -> BV<'ctx> {
    BV::from_u64(ctx, v, 256)
}

/// 1 when `cond` holds, else 0.
pub fn bool_to_word<'ctx>(ctx: &'ctx z3::Context, cond: &Bool<'ctx>) -> BV<'ctx> {
    cond.ite(&one(ctx), &zero(ctx))
}

/// ADDMOD / MULMOD. The sum or product is formed over 512 bits.
pub fn symbolic_modop<'ctx>(a: &BV<'ctx>, b: &BV<'ctx>, m: &BV<'ctx>, multiply: bool) -> BV<'ctx> {
    let (a, b, m) = (a.zero_ext(256), b.zero_ext(256), m.zero_ext(256));
    let wide = if multiply { a.bvmul(&b) } else { a.bvadd(&b) };
    safe_rem(&wide, &m).extract(255, 0)
}

/// EXP by square-and-multiply. With a known exponent only its set bits
/// contribute a multiplication; otherwise every bit selects through an ite.
pub fn symbolic_exp<'ctx>(
    ctx: &'ctx z3::Context,
    base: &BV<'ctx>,
    exponent: &BV<'ctx>,
    concrete_exponent: Option<U256>,
) -> BV<'ctx> {
    let mut acc = one(ctx);
    let mut square = base.clone();
    match concrete_exponent {
        Some(exp) => {
            let bits = exp.bit_len();
            for i in 0..bits {
                if exp.bit(i) {
                    acc = acc.bvmul(&square);
                }
                if i + 1 < bits {
                    square = square.bvmul(&square);
                }
            }
        }
        None => {
            let set = BV::from_u64(ctx, 1, 1);
            for i in 0..256u32 {
                acc = exponent.extract(i, i)._eq(&set).ite(&acc.bvmul(&square), &acc);
                if i < 255 {
                    square = square.bvmul(&square);
                }
            }
        }
    }
    acc
}

/// SIGNEXTEND(b, x): extend from byte `b`; `b >= 31` leaves `x` unchanged.
pub fn symbolic_signextend<'ctx>(ctx: &'ctx z3::Context, b: &BV<'ctx>, x: &BV<'ctx>) -> BV<'ctx> {
    (0..31u32).fold(x.clone(), |acc, k| {
        let low = 8 * (k + 1);
        let extended = x.extract(low - 1, 0).sign_ext(256 - low);
        b._eq(&word(ctx, u64::from(k))).ite(&extended, &acc)
    })
}

/// BYTE(i, x): the i-th most significant byte, zero for `i >= 32`.
pub fn symbolic_byte<'ctx>(ctx: &'ctx z3::Context, i: &BV<'ctx>, x: &BV<'ctx>) -> BV<'ctx> {
    let shift = word(ctx, 31).bvsub(i).bvmul(&word(ctx, 8));
    let picked = x.bvlshr(&shift).bvand(&word(ctx, 0xff));
    i.bvuge(&word(ctx, 32)).ite(&zero(ctx), &picked)
}
