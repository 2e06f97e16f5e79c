/// Pop two words, push `conc(a, b)` shadowed by `sym(a, b)` when either
/// operand is symbolic. `a` is the top of the stack.
#[macro_export]
macro_rules! binary_op {
    ($machine:expr, $env:expr, $conc:expr, $sym:expr) => {{
        let a = $machine.stack.pop()?;
        let b = $machine.stack.pop()?;
        let concrete = $conc(a.concrete, b.concrete);
        let word = if a.is_symbolic() || b.is_symbolic() {
            let (sa, sb) = (a.as_bv($env.ctx), b.as_bv($env.ctx));
            $crate::symbolic::value::Word::symbolic(concrete, $sym(&sa, &sb))
        } else {
            $crate::symbolic::value::Word::concrete(concrete)
        };
        $machine.stack.push(word)?;
    }};
}

#[macro_export]
macro_rules! unary_op {
    ($machine:expr, $env:expr, $conc:expr, $sym:expr) => {{
        let a = $machine.stack.pop()?;
        let concrete = $conc(a.concrete);
        let word = match &a.symbolic {
            Some(sa) => $crate::symbolic::value::Word::symbolic(concrete, $sym(sa)),
            None => $crate::symbolic::value::Word::concrete(concrete),
        };
        $machine.stack.push(word)?;
    }};
}

/// Comparisons produce a 0/1 word; `$op` is the BV method yielding the Bool.
#[macro_export]
macro_rules! comparison_op {
    ($machine:expr, $env:expr, $conc:expr, $op:ident) => {{
        let a = $machine.stack.pop()?;
        let b = $machine.stack.pop()?;
        let holds: bool = $conc(&a.concrete, &b.concrete);
        let concrete = if holds {
            alloy_primitives::U256::from(1)
        } else {
            alloy_primitives::U256::ZERO
        };
        let word = if a.is_symbolic() || b.is_symbolic() {
            let (sa, sb) = (a.as_bv($env.ctx), b.as_bv($env.ctx));
            let cond = sa.$op(&sb);
            $crate::symbolic::value::Word::symbolic(
                concrete,
                $crate::symbolic::utils::math::bool_to_word($env.ctx, &cond),
            )
        } else {
            $crate::symbolic::value::Word::concrete(concrete)
        };
        $machine.stack.push(word)?;
    }};
}
