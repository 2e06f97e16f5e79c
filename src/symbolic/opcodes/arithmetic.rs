use alloy_primitives::U256;
use z3::ast::{Ast, BV};

use crate::symbolic::opcodes::{Exec, Flow};
use crate::symbolic::state::{ExecEnv, Machine};
use crate::symbolic::utils::math;
use crate::symbolic::value::Word;

pub fn handle_arithmetic<'ctx>(machine: &mut Machine<'ctx>, env: &ExecEnv<'ctx>, opcode: u8) -> Exec {
    match opcode {
        0x01 => binary_op!(machine, env, U256::wrapping_add, BV::bvadd),
        0x02 => binary_op!(machine, env, U256::wrapping_mul, BV::bvmul),
        0x03 => binary_op!(machine, env, U256::wrapping_sub, BV::bvsub),
        0x04 => binary_op!(machine, env, evm_div, math::safe_div),
        0x05 => binary_op!(machine, env, evm_sdiv, math::safe_sdiv),
        0x06 => binary_op!(machine, env, evm_mod, math::safe_rem),
        0x07 => binary_op!(machine, env, evm_smod, math::safe_srem),
        // ADDMOD, MULMOD
        0x08 | 0x09 => {
            let a = machine.stack.pop()?;
            let b = machine.stack.pop()?;
            let m = machine.stack.pop()?;
            let multiply = opcode == 0x09;
            let concrete = if multiply {
                a.concrete.mul_mod(b.concrete, m.concrete)
            } else {
                a.concrete.add_mod(b.concrete, m.concrete)
            };
            let word = if a.is_symbolic() || b.is_symbolic() || m.is_symbolic() {
                let expr = math::symbolic_modop(
                    &a.as_bv(env.ctx),
                    &b.as_bv(env.ctx),
                    &m.as_bv(env.ctx),
                    multiply,
                );
                Word::symbolic(concrete, expr)
            } else {
                Word::concrete(concrete)
            };
            machine.stack.push(word)?;
        }
        // EXP
        0x0a => {
            let base = machine.stack.pop()?;
            let exponent = machine.stack.pop()?;
            let concrete = base.concrete.wrapping_pow(exponent.concrete);
            let word = if base.is_symbolic() || exponent.is_symbolic() {
                let known = (!exponent.is_symbolic()).then_some(exponent.concrete);
                let expr = math::symbolic_exp(
                    env.ctx,
                    &base.as_bv(env.ctx),
                    &exponent.as_bv(env.ctx),
                    known,
                );
                Word::symbolic(concrete, expr)
            } else {
                Word::concrete(concrete)
            };
            machine.stack.push(word)?;
        }
        // SIGNEXTEND
        0x0b => {
            let b = machine.stack.pop()?;
            let x = machine.stack.pop()?;
            let concrete = evm_signextend(b.concrete, x.concrete);
            let word = if b.is_symbolic() || x.is_symbolic() {
                let expr = math::symbolic_signextend(env.ctx, &b.as_bv(env.ctx), &x.as_bv(env.ctx));
                Word::symbolic(concrete, expr)
            } else {
                Word::concrete(concrete)
            };
            machine.stack.push(word)?;
        }
        0x10 => comparison_op!(machine, env, |a: &U256, b: &U256| a < b, bvult),
        0x11 => comparison_op!(machine, env, |a: &U256, b: &U256| a > b, bvugt),
        0x12 => comparison_op!(machine, env, evm_slt, bvslt),
        0x13 => comparison_op!(machine, env, |a: &U256, b: &U256| evm_slt(b, a), bvsgt),
        0x14 => comparison_op!(machine, env, |a: &U256, b: &U256| a == b, _eq),
        // ISZERO
        0x15 => {
            let a = machine.stack.pop()?;
            let concrete = U256::from(a.concrete.is_zero() as u8);
            let word = match &a.symbolic {
                Some(sa) => {
                    let cond = sa._eq(&math::zero(env.ctx));
                    Word::symbolic(concrete, math::bool_to_word(env.ctx, &cond))
                }
                None => Word::concrete(concrete),
            };
            machine.stack.push(word)?;
        }
        0x16 => binary_op!(machine, env, |a: U256, b: U256| a & b, BV::bvand),
        0x17 => binary_op!(machine, env, |a: U256, b: U256| a | b, BV::bvor),
        0x18 => binary_op!(machine, env, |a: U256, b: U256| a ^ b, BV::bvxor),
        0x19 => unary_op!(machine, env, |a: U256| !a, BV::bvnot),
        // BYTE
        0x1a => {
            let i = machine.stack.pop()?;
            let x = machine.stack.pop()?;
            let concrete = evm_byte(i.concrete, x.concrete);
            let word = if i.is_symbolic() || x.is_symbolic() {
                Word::symbolic(concrete, math::symbolic_byte(env.ctx, &i.as_bv(env.ctx), &x.as_bv(env.ctx)))
            } else {
                Word::concrete(concrete)
            };
            machine.stack.push(word)?;
        }
        // SHL, SHR, SAR: shift amount on top, value below
        0x1b => binary_op!(machine, env, evm_shl, |s: &BV<'ctx>, v: &BV<'ctx>| v.bvshl(s)),
        0x1c => binary_op!(machine, env, evm_shr, |s: &BV<'ctx>, v: &BV<'ctx>| v.bvlshr(s)),
        0x1d => binary_op!(machine, env, evm_sar, |s: &BV<'ctx>, v: &BV<'ctx>| v.bvashr(s)),
        _ => unreachable!("non-arithmetic opcode 0x{opcode:02x} routed to arithmetic"),
    }
    Ok(Flow::Next(1))
}

fn is_negative(x: &U256) -> bool {
    x.bit(255)
}

fn twos_abs(x: U256) -> U256 {
    if is_negative(&x) {
        (!x).wrapping_add(U256::from(1))
    } else {
        x
    }
}

fn negate(x: U256) -> U256 {
    (!x).wrapping_add(U256::from(1))
}

pub fn evm_div(a: U256, b: U256) -> U256 {
    a.checked_div(b).unwrap_or(U256::ZERO)
}

pub fn evm_mod(a: U256, b: U256) -> U256 {
    a.checked_rem(b).unwrap_or(U256::ZERO)
}

/// Signed division on magnitudes; MIN / -1 wraps back to MIN.
pub fn evm_sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let q = twos_abs(a) / twos_abs(b);
    if is_negative(&a) != is_negative(&b) {
        negate(q)
    } else {
        q
    }
}

/// Signed remainder; the result takes the dividend's sign.
pub fn evm_smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let r = twos_abs(a) % twos_abs(b);
    if is_negative(&a) {
        negate(r)
    } else {
        r
    }
}

pub fn evm_slt(a: &U256, b: &U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

pub fn evm_signextend(b: U256, x: U256) -> U256 {
    if b >= U256::from(31) {
        return x;
    }
    let bit = b.as_limbs()[0] as usize * 8 + 7;
    let mask = (U256::from(1) << (bit + 1)) - U256::from(1);
    if x.bit(bit) {
        x | !mask
    } else {
        x & mask
    }
}

pub fn evm_byte(i: U256, x: U256) -> U256 {
    if i >= U256::from(32) {
        return U256::ZERO;
    }
    let shift = 8 * (31 - i.as_limbs()[0] as usize);
    (x >> shift) & U256::from(0xff)
}

pub fn evm_shl(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256) {
        return U256::ZERO;
    }
    value << shift.as_limbs()[0] as usize
}

pub fn evm_shr(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256) {
        return U256::ZERO;
    }
    value >> shift.as_limbs()[0] as usize
}

pub fn evm_sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(&value);
    if shift >= U256::from(256) {
        return if negative { U256::MAX } else { U256::ZERO };
    }
    let s = shift.as_limbs()[0] as usize;
    if negative {
        !((!value) >> s)
    } else {
        value >> s
    }
}
