//! Coverage monitors: record which coverage states an input reaches and the
//! branch points ("bifurcations") that could lead to states not yet seen.

pub mod bifurcation;
pub mod path;
pub mod state;

use std::collections::{HashMap, HashSet};

use alloy_primitives::Address;
use tracing::trace;

use crate::coverage::bifurcation::Bifurcation;
use crate::coverage::path::{relaxed_paths, PathTree};
use crate::coverage::state::{CoverageMode, CoverageState, StateKey, StateSelector};
use crate::error::{CoverageError, Result};
use crate::symbolic::engine::{BranchInfo, HookAction};
use crate::world::monitor::{AttachArgs, EventKind, EventMask, EventView, WorldMonitor};

pub struct Coverage<'ctx> {
    selector: StateSelector,
    contract: Option<Address>,
    covered: HashMap<CoverageState, usize>,
    paths: PathTree,
    current_path: Vec<usize>,
    bifurcations: Vec<Bifurcation<'ctx>>,
    current_input: String,
}

impl<'ctx> Coverage<'ctx> {
    pub fn new(mode: CoverageMode) -> Self {
        Self {
            selector: StateSelector::new(mode),
            contract: None,
            covered: HashMap::new(),
            paths: PathTree::new(),
            current_path: Vec::new(),
            bifurcations: Vec::new(),
            current_input: "<unspecified>".to_string(),
        }
    }

    pub fn mode(&self) -> CoverageMode {
        self.selector.mode()
    }

    /// Name the input about to run. Path modes start a fresh path.
    pub fn set_input_uid(&mut self, uid: impl Into<String>) {
        self.current_input = uid.into();
        self.current_path.clear();
    }

    pub fn current_input(&self) -> &str {
        &self.current_input
    }

    pub fn bifurcations(&self) -> &[Bifurcation<'ctx>] {
        &self.bifurcations
    }

    pub fn clear_bifurcations(&mut self) {
        self.bifurcations.clear();
    }

    /// Drop bifurcations recorded after the first `len`.
    pub fn truncate_bifurcations(&mut self, len: usize) {
        self.bifurcations.truncate(len);
    }

    /// How many times `state` has been reached.
    pub fn visits(&self, state: &CoverageState) -> usize {
        match &state.key {
            StateKey::Path { path } => self.paths.get(path),
            _ => self.covered.get(state).copied().unwrap_or(0),
        }
    }

    /// Number of distinct states counted by instruction-sensitive modes.
    pub fn covered_states(&self) -> usize {
        self.covered.len()
    }

    pub fn record_branch(&mut self, view: &EventView<'_, 'ctx>, branch: &BranchInfo<'ctx>) -> Result<()> {
        let taken = branch
            .taken
            .ok_or(CoverageError::MissingTakenFlag { pc: branch.pc })?;
        let (taken_target, alt_target, alt_constraint) = if taken {
            (branch.target, branch.next, branch.cond.not())
        } else {
            (branch.next, branch.target, branch.cond.clone())
        };

        let alt_state = self.selector.get_state(alt_target, view, &self.current_path);
        if self.visits(&alt_state) == 0 {
            let path_constraints = if self.mode().is_path() {
                view.env.path.constraints().to_vec()
            } else {
                view.env.path.related_to(&alt_constraint)
            };
            trace!(
                "bifurcation at pc {} -> {alt_target} ({} constraints)",
                branch.pc,
                path_constraints.len()
            );
            self.bifurcations.push(Bifurcation {
                pc: branch.pc,
                taken_target,
                alt_target,
                path_constraints,
                alt_constraint,
                input_uid: self.current_input.clone(),
                alt_state,
            });
        }

        match self.mode() {
            CoverageMode::Path => {
                self.current_path.push(taken_target);
                self.paths.add(&self.current_path);
            }
            CoverageMode::PathRelaxed => {
                self.current_path.push(taken_target);
                for p in relaxed_paths(&self.current_path) {
                    self.paths.add(&p);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn record_exec(&mut self, view: &EventView<'_, 'ctx>) {
        let state = self.selector.get_state(view.machine.pc, view, &self.current_path);
        *self.covered.entry(state).or_insert(0) += 1;
    }

    /// Keep bifurcations whose alternate state was reached at most `visit_max` times.
    pub fn filter_bifurcations(&mut self, visit_max: usize) {
        let bifurcations = std::mem::take(&mut self.bifurcations);
        self.bifurcations = bifurcations
            .into_iter()
            .filter(|b| self.visits(&b.alt_state) <= visit_max)
            .collect();
    }

    /// Fewest path constraints first. Stable, so ties keep recording order.
    pub fn sort_bifurcations(&mut self) {
        self.bifurcations.sort_by_key(|b| b.path_constraints.len());
    }

    /// First bifurcation of every distinct opportunity, in current order.
    pub fn unique_opportunities(&self) -> Vec<&Bifurcation<'ctx>> {
        let mut seen = HashSet::new();
        self.bifurcations
            .iter()
            .filter(|b| seen.insert(b.opportunity()))
            .collect()
    }
}

impl<'ctx> WorldMonitor<'ctx> for Coverage<'ctx> {
    fn subscriptions(&self, contract: Address) -> EventMask {
        if self.mode().is_path() {
            if self.contract == Some(contract) {
                EventMask::BRANCH
            } else {
                EventMask::NONE
            }
        } else {
            EventMask::BRANCH.with(EventKind::Exec)
        }
    }

    fn on_attach(&mut self, args: &AttachArgs<'_, 'ctx>) -> Result<()> {
        self.contract = Some(args.contract);
        self.selector.capture_sequence(args.transactions);
        Ok(())
    }

    fn on_exec(&mut self, view: &EventView<'_, 'ctx>) -> Result<HookAction> {
        self.record_exec(view);
        Ok(HookAction::Continue)
    }

    fn on_branch(&mut self, view: &EventView<'_, 'ctx>, branch: &BranchInfo<'ctx>) -> Result<HookAction> {
        self.record_branch(view, branch)?;
        Ok(HookAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolic::constraints::PathConstraint;
    use z3::ast::BV;
    use z3::{Config, Context};

    fn inst_state(pc: usize) -> CoverageState {
        CoverageState {
            contract: Address::ZERO,
            initialized: true,
            key: StateKey::Inst { pc },
        }
    }

    fn bif(ctx: &Context, alt_target: usize, constraints: usize) -> Bifurcation<'_> {
        let x = BV::new_const(ctx, "arg_0_0", 256);
        let cond = x.bvugt(&BV::from_u64(ctx, alt_target as u64, 256));
        Bifurcation {
            pc: 0,
            taken_target: 1,
            alt_target,
            path_constraints: vec![PathConstraint::new(cond.clone()); constraints],
            alt_constraint: cond.not(),
            input_uid: format!("input-{alt_target}"),
            alt_state: inst_state(alt_target),
        }
    }

    fn alts(cov: &Coverage<'_>) -> Vec<usize> {
        cov.bifurcations().iter().map(|b| b.alt_target).collect()
    }

    #[test]
    fn test_filter_keeps_alternatives_visited_at_most_visit_max_times() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut cov = Coverage::new(CoverageMode::Inst);
        cov.covered.insert(inst_state(20), 1);
        cov.covered.insert(inst_state(30), 2);
        cov.bifurcations = vec![bif(&ctx, 10, 0), bif(&ctx, 20, 0), bif(&ctx, 30, 0)];

        cov.filter_bifurcations(2);
        assert_eq!(alts(&cov), vec![10, 20, 30]);
        cov.filter_bifurcations(1);
        assert_eq!(alts(&cov), vec![10, 20]);
        cov.filter_bifurcations(0);
        assert_eq!(alts(&cov), vec![10]);
    }

    #[test]
    fn test_sort_is_stable_on_constraint_count() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut cov = Coverage::new(CoverageMode::Inst);
        cov.bifurcations = vec![
            bif(&ctx, 1, 2),
            bif(&ctx, 2, 0),
            bif(&ctx, 3, 2),
            bif(&ctx, 4, 1),
            bif(&ctx, 5, 0),
        ];
        cov.sort_bifurcations();
        assert_eq!(alts(&cov), vec![2, 5, 4, 1, 3]);
    }

    #[test]
    fn test_unique_opportunities_keep_the_first_after_sorting() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut cov = Coverage::new(CoverageMode::Inst);
        let mut costly = bif(&ctx, 7, 3);
        costly.input_uid = "costly".to_string();
        let mut cheap = bif(&ctx, 7, 1);
        cheap.input_uid = "cheap".to_string();
        cov.bifurcations = vec![costly, bif(&ctx, 8, 2), cheap];

        cov.sort_bifurcations();
        let unique: Vec<&str> = cov
            .unique_opportunities()
            .into_iter()
            .map(|b| b.input_uid.as_str())
            .collect();
        assert_eq!(unique, vec!["cheap", "input-8"]);
    }
}
