use std::collections::{BTreeMap, BTreeSet, HashSet};

use alloy_primitives::U256;
use z3::{
    ast::{Ast, Dynamic, BV},
    AstKind, Context, DeclKind, Params, SatResult, Solver,
};

pub fn u256_from_bv(bv: &BV) -> Option<U256> {
    // Let Z3 do the constant folding
    let simplified = bv.simplify();

    if let Some(val) = simplified.as_u64() {
        return Some(U256::from(val));
    }

    let s = simplified.to_string();
    crate::utils::hex::to_u256(&s)
}

pub fn bv_from_u256<'ctx>(ctx: &'ctx Context, val: U256) -> BV<'ctx> {
    // Avoid BV::from_str: pack the four big-endian limbs instead.
    let bytes = val.to_be_bytes::<32>();
    let limb = |i: usize| {
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
        BV::from_u64(ctx, u64::from_be_bytes(word), 64)
    };
    limb(0).concat(&limb(1)).concat(&limb(2)).concat(&limb(3))
}

/// Narrow constant of `bits` width (bits <= 256).
pub fn bv_from_u256_sized<'ctx>(ctx: &'ctx Context, val: U256, bits: u32) -> BV<'ctx> {
    if bits <= 64 {
        return BV::from_u64(ctx, val.as_limbs()[0], bits);
    }
    bv_from_u256(ctx, val).extract(bits - 1, 0)
}

/// Solver parameters used for every input-synthesis query.
pub fn configure_solver(ctx: &Context, solver: &Solver, timeout_ms: Option<u32>) {
    let mut params = Params::new(ctx);
    if let Some(ms) = timeout_ms {
        params.set_u32("timeout", ms);
    }
    params.set_bool("model.completion", true);
    params.set_u32("random_seed", 42); // Deterministic by default
    solver.set_params(&params);
}

/// True when an `Unknown` answer came from the configured time bound.
pub fn timed_out(solver: &Solver, result: SatResult) -> bool {
    if result != SatResult::Unknown {
        return false;
    }
    solver
        .get_reason_unknown()
        .map(|reason| {
            let reason = reason.to_ascii_lowercase();
            reason.contains("timeout") || reason.contains("canceled")
        })
        .unwrap_or(false)
}

/// Names of the free (uninterpreted, nullary) symbols in `expr`.
pub fn collect_vars<'ctx>(expr: &Dynamic<'ctx>) -> BTreeSet<String> {
    collect_var_terms(expr).into_keys().collect()
}

/// Free symbols of `expr` keyed by name, as terms a model can evaluate.
pub fn collect_var_terms<'ctx>(expr: &Dynamic<'ctx>) -> BTreeMap<String, Dynamic<'ctx>> {
    let mut terms = BTreeMap::new();
    let mut seen: HashSet<Dynamic<'ctx>> = HashSet::new();
    let mut stack = vec![expr.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        if node.kind() != AstKind::App {
            continue;
        }
        if node.is_const() {
            let decl = node.decl();
            if decl.kind() == DeclKind::UNINTERPRETED {
                terms.insert(decl.name(), node);
            }
            continue;
        }
        stack.extend(node.children());
    }
    terms
}
