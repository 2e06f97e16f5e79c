use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use alloy_primitives::{Address, U256};
use z3::ast::{Ast, Dynamic};
use z3::{Context, SatResult, Solver};

use crate::coverage::bifurcation::Bifurcation;
use crate::coverage::Coverage;
use crate::error::Result;
use crate::fuzzer::corpus::{read_corpus_file, sender_var, store_new_tx_sequence};
use crate::symbolic::z3_ext::{collect_var_terms, configure_solver, timed_out, u256_from_bv};
use crate::utils::hex::address_from_u256;

#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisOptions {
    /// Solve bifurcations whose alternate state was visited at most this often.
    pub visit_max: usize,
    pub timeout_ms: Option<u32>,
    /// Keep solving an opportunity after one of its bifurcations succeeded.
    pub solve_duplicates: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    Sat(BTreeMap<String, U256>),
    Unsat,
    Timeout,
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct SolveRecord {
    pub input_uid: String,
    pub pc: usize,
    pub alt_target: usize,
    pub elapsed_ms: u128,
    pub status: SolveStatus,
}

#[derive(Debug, Default)]
pub struct SolveReport {
    pub successes: usize,
    pub timeouts: usize,
    pub new_inputs: Vec<PathBuf>,
    /// Sender addresses solved for, not yet in the fuzzer's pool.
    pub new_senders: Vec<Address>,
    pub records: Vec<SolveRecord>,
    /// Models that could not be written back, with the reason.
    pub failures: Vec<(String, String)>,
}

/// Fresh solver query: the bifurcation's path plus the alternate-branch constraint.
pub fn solve_bifurcation<'ctx>(ctx: &'ctx Context, bif: &Bifurcation<'ctx>, timeout_ms: Option<u32>) -> SolveStatus {
    let solver = Solver::new(ctx);
    configure_solver(ctx, &solver, timeout_ms);
    let mut terms = collect_var_terms(&Dynamic::from_ast(&bif.alt_constraint));
    for c in &bif.path_constraints {
        solver.assert(&c.cond);
        terms.extend(collect_var_terms(&Dynamic::from_ast(&c.cond)));
    }
    solver.assert(&bif.alt_constraint);

    match solver.check() {
        SatResult::Sat => {
            let Some(model) = solver.get_model() else {
                return SolveStatus::Unknown("sat without a model".into());
            };
            let assignment = terms
                .iter()
                .filter_map(|(name, term)| {
                    let value = model.eval(term, true)?.as_bv()?;
                    Some((name.clone(), u256_from_bv(&value)?))
                })
                .collect();
            SolveStatus::Sat(assignment)
        }
        SatResult::Unsat => SolveStatus::Unsat,
        SatResult::Unknown if timed_out(&solver, SatResult::Unknown) => SolveStatus::Timeout,
        SatResult::Unknown => SolveStatus::Unknown(solver.get_reason_unknown().unwrap_or_default()),
    }
}

/// Filter, sort and solve the recorded bifurcations, writing every model as a
/// new corpus file in `corpus_dir`.
pub fn generate_new_inputs<'ctx>(
    ctx: &'ctx Context,
    cov: &mut Coverage<'ctx>,
    corpus_dir: &Path,
    known_senders: &[Address],
    options: &SynthesisOptions,
) -> SolveReport {
    cov.filter_bifurcations(options.visit_max);
    cov.sort_bifurcations();

    let total = cov.bifurcations().len();
    let candidates: Vec<&Bifurcation<'ctx>> = if options.solve_duplicates {
        cov.bifurcations().iter().collect()
    } else {
        cov.unique_opportunities()
    };
    tracing::info!(
        "[SOLVE] solving potential new paths ({} total, {} to solve)",
        total,
        candidates.len()
    );

    let mut report = SolveReport::default();
    let mut solved = HashSet::new();
    let mut senders: HashSet<Address> = known_senders.iter().copied().collect();

    for (i, bif) in candidates.iter().enumerate() {
        if !options.solve_duplicates && solved.contains(&bif.opportunity()) {
            continue;
        }
        tracing::debug!(
            "[SOLVE] {}/{}: pc {} -> {} ({} constraints)",
            i + 1,
            candidates.len(),
            bif.pc,
            bif.alt_target,
            bif.path_constraints.len()
        );
        let started = Instant::now();
        let status = solve_bifurcation(ctx, bif, options.timeout_ms);

        match &status {
            SolveStatus::Sat(model) => {
                solved.insert(bif.opportunity());
                report.successes += 1;
                match write_model(corpus_dir, &bif.input_uid, model) {
                    Ok(path) => report.new_inputs.push(path),
                    Err(e) => {
                        tracing::warn!("[SOLVE] cannot serialize model for input {}: {e}", bif.input_uid);
                        report.failures.push((bif.input_uid.clone(), e.to_string()));
                    }
                }
                for sender in harvest_senders(model) {
                    if senders.insert(sender) {
                        report.new_senders.push(sender);
                    }
                }
            }
            SolveStatus::Timeout => report.timeouts += 1,
            SolveStatus::Unsat => {}
            SolveStatus::Unknown(reason) => tracing::debug!("[SOLVE] unknown: {reason}"),
        }
        report.records.push(SolveRecord {
            input_uid: bif.input_uid.clone(),
            pc: bif.pc,
            alt_target: bif.alt_target,
            elapsed_ms: started.elapsed().as_millis(),
            status,
        });
    }

    if report.timeouts > 0 {
        tracing::warn!("[SOLVE] timed out on {} cases", report.timeouts);
    }
    tracing::info!(
        "[SOLVE] generated {} new inputs, {} new senders",
        report.new_inputs.len(),
        report.new_senders.len()
    );
    report
}

fn write_model(corpus_dir: &Path, input_uid: &str, model: &BTreeMap<String, U256>) -> Result<PathBuf> {
    let template = read_corpus_file(Path::new(input_uid))?;
    store_new_tx_sequence(corpus_dir, &template, model)
}

/// Sender addresses assigned by `model`, in transaction order.
pub fn harvest_senders(model: &BTreeMap<String, U256>) -> Vec<Address> {
    let mut found: Vec<(usize, Address)> = model
        .iter()
        .filter_map(|(name, value)| {
            let index = name.strip_prefix("sender_")?.parse::<usize>().ok()?;
            (sender_var(index) == *name).then(|| (index, address_from_u256(*value)))
        })
        .collect();
    found.sort_by_key(|(i, _)| *i);
    found.into_iter().map(|(_, a)| a).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::state::{CoverageState, StateKey};
    use crate::symbolic::constraints::PathConstraint;
    use z3::ast::BV;
    use z3::Config;

    fn bifurcation<'ctx>(ctx: &'ctx Context, alt: z3::ast::Bool<'ctx>, path: Vec<z3::ast::Bool<'ctx>>) -> Bifurcation<'ctx> {
        Bifurcation {
            pc: 10,
            taken_target: 11,
            alt_target: 20,
            path_constraints: path.into_iter().map(PathConstraint::new).collect(),
            alt_constraint: alt,
            input_uid: "mem".into(),
            alt_state: CoverageState {
                contract: Address::ZERO,
                initialized: true,
                key: StateKey::Inst { pc: 20 },
            },
        }
    }

    #[test]
    fn test_sat_model_respects_all_constraints() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let x = BV::new_const(&ctx, "arg_0_0", 256);
        let alt = x.bvugt(&BV::from_u64(&ctx, 10, 256));
        let path = vec![x.bvult(&BV::from_u64(&ctx, 12, 256))];
        match solve_bifurcation(&ctx, &bifurcation(&ctx, alt, path), Some(5_000)) {
            SolveStatus::Sat(model) => assert_eq!(model.get("arg_0_0"), Some(&U256::from(11))),
            other => panic!("expected sat, got {other:?}"),
        };
    }

    #[test]
    fn test_unsat_query() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let x = BV::new_const(&ctx, "arg_0_0", 8);
        let alt = x._eq(&BV::from_u64(&ctx, 1, 8));
        let path = vec![x._eq(&BV::from_u64(&ctx, 2, 8))];
        assert_eq!(solve_bifurcation(&ctx, &bifurcation(&ctx, alt, path), None), SolveStatus::Unsat);
    }

    #[test]
    fn test_harvest_senders_orders_by_tx() {
        let model = BTreeMap::from([
            ("sender_10".to_string(), U256::from(0x30000)),
            ("sender_2".to_string(), U256::from(0x10000)),
            ("arg_2_0".to_string(), U256::from(1)),
        ]);
        let senders = harvest_senders(&model);
        assert_eq!(senders, vec![address_from_u256(U256::from(0x10000)), address_from_u256(U256::from(0x30000))]);
    }
}
