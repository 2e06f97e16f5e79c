use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use z3::ast::{Bool, Dynamic};

use crate::coverage::state::CoverageState;
use crate::symbolic::constraints::PathConstraint;
use crate::symbolic::z3_ext::collect_vars;

/// A branch point whose other side has not been covered yet.
#[derive(Debug, Clone)]
pub struct Bifurcation<'ctx> {
    pub pc: usize,
    pub taken_target: usize,
    pub alt_target: usize,
    /// Constraints that led to the branch, in path order.
    pub path_constraints: Vec<PathConstraint<'ctx>>,
    /// Satisfying this forces the branch to `alt_target`.
    pub alt_constraint: Bool<'ctx>,
    /// The input (corpus file) that produced this record.
    pub input_uid: String,
    pub alt_state: CoverageState,
}

impl<'ctx> Bifurcation<'ctx> {
    /// Every variable a solver model must assign.
    pub fn vars(&self) -> BTreeSet<String> {
        let mut vars = collect_vars(&Dynamic::from_ast(&self.alt_constraint));
        for c in &self.path_constraints {
            vars.extend(c.vars.iter().cloned());
        }
        vars
    }

    pub fn opportunity(&self) -> Opportunity<'_, 'ctx> {
        Opportunity(self)
    }
}

/// A bifurcation viewed as a solving opportunity.
///
/// Equality and hashing look at `alt_state` only: two bifurcations leading
/// to the same coverage state are the same opportunity whatever their
/// constraints, targets or originating input.
#[derive(Debug, Clone, Copy)]
pub struct Opportunity<'b, 'ctx>(pub &'b Bifurcation<'ctx>);

impl PartialEq for Opportunity<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.alt_state == other.0.alt_state
    }
}

impl Eq for Opportunity<'_, '_> {}

impl Hash for Opportunity<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.alt_state.hash(state);
    }
}
