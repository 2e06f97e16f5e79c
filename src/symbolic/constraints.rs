//! Path constraints accumulated while executing one input.

use std::collections::BTreeSet;

use z3::ast::{Ast, Bool, Dynamic};

use crate::symbolic::z3_ext::collect_vars;

#[derive(Debug, Clone)]
pub struct PathConstraint<'ctx> {
    pub cond: Bool<'ctx>,
    pub vars: BTreeSet<String>,
}

impl<'ctx> PathConstraint<'ctx> {
    pub fn new(cond: Bool<'ctx>) -> Self {
        let vars = collect_vars(&Dynamic::from_ast(&cond));
        Self { cond, vars }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathConstraints<'ctx> {
    items: Vec<PathConstraint<'ctx>>,
}

impl<'ctx> PathConstraints<'ctx> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, cond: Bool<'ctx>) {
        // Constant-true constraints carry no information.
        if cond.simplify().as_bool() == Some(true) {
            return;
        }
        self.items.push(PathConstraint::new(cond));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn constraints(&self) -> &[PathConstraint<'ctx>] {
        &self.items
    }

    /// Constraints transitively sharing a variable with `target`, in path
    /// order.
    pub fn related_to(&self, target: &Bool<'ctx>) -> Vec<PathConstraint<'ctx>> {
        let mut frontier = collect_vars(&Dynamic::from_ast(target));
        let mut picked = vec![false; self.items.len()];
        loop {
            let mut grew = false;
            for (idx, item) in self.items.iter().enumerate() {
                if picked[idx] || item.vars.is_disjoint(&frontier) {
                    continue;
                }
                picked[idx] = true;
                frontier.extend(item.vars.iter().cloned());
                grew = true;
            }
            if !grew {
                break;
            }
        }
        self.items
            .iter()
            .zip(picked)
            .filter(|(_, keep)| *keep)
            .map(|(item, _)| item.clone())
            .collect()
    }
}
