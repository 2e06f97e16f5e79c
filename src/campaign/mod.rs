//! The hybrid loop: fuzz, replay the fuzzer's new inputs concolically, solve
//! for inputs the fuzzer could not reach, hand them back, repeat.
//!
//! All bookkeeping lives in a [`CampaignContext`] owned by the caller.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use alloy_primitives::Address;
use anyhow::Context as _;
use z3::{Config, Context};

use crate::coverage::Coverage;
use crate::fuzzer::corpus::{is_generated, pull_new_corpus_files};
use crate::fuzzer::init::load_init_file;
use crate::fuzzer::process::{coverage_dir, load_runtime_bytecode, run_fuzzer};
use crate::solver::replay::{replay_inputs, ReplaySetup};
use crate::solver::synthesis::{generate_new_inputs, SynthesisOptions};
use crate::utils::config::CampaignConfig;

/// Counters and state carried across iterations of one campaign.
#[derive(Debug, Clone, Default)]
pub struct CampaignContext {
    pub iterations: usize,
    pub fuzzer_inputs: usize,
    pub generated_inputs: usize,
    pub replayed: usize,
    pub replay_failures: usize,
    pub solver_successes: usize,
    pub solver_timeouts: usize,
    pub fuzz_time_ms: u128,
    pub solve_time_ms: u128,
    /// Sender pool handed to the fuzzer; grows with solved senders.
    pub senders: Vec<Address>,
    pub seen_files: HashSet<PathBuf>,
}

impl CampaignContext {
    pub fn new(senders: Vec<Address>) -> Self {
        Self {
            senders,
            ..Self::default()
        }
    }
}

/// Outcome of one replay+solve round.
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    pub replayed: usize,
    pub aborted: usize,
    pub new_inputs: Vec<PathBuf>,
    pub new_senders: Vec<Address>,
    pub successes: usize,
    pub timeouts: usize,
}

/// Replay `files` into `cov` and solve what they left open. Bifurcations from
/// earlier rounds are discarded first.
pub fn run_round<'ctx>(
    ctx: &'ctx Context,
    cov: &mut Coverage<'ctx>,
    setup: &ReplaySetup<'_>,
    files: &[PathBuf],
    corpus_dir: &Path,
    senders: &[Address],
    options: &SynthesisOptions,
) -> RoundSummary {
    cov.clear_bifurcations();
    let replay = replay_inputs(ctx, setup, cov, files);
    let solve = generate_new_inputs(ctx, cov, corpus_dir, senders, options);
    RoundSummary {
        replayed: replay.replayed,
        aborted: replay.failures.len(),
        new_inputs: solve.new_inputs,
        new_senders: solve.new_senders,
        successes: solve.successes,
        timeouts: solve.timeouts,
    }
}

pub async fn run_hybrid_campaign(config: &CampaignConfig) -> anyhow::Result<CampaignContext> {
    let z3_cfg = Config::new();
    let z3_ctx = Context::new(&z3_cfg);
    let mut cov = Coverage::new(config.cov_mode);
    let mut campaign = CampaignContext::new(config.senders.clone());
    let corpus = coverage_dir(&config.corpus_dir);
    let options = SynthesisOptions {
        visit_max: config.visit_max,
        timeout_ms: config.solver_timeout_ms,
        solve_duplicates: config.solve_duplicates,
    };
    let init_events = match &config.init_file {
        Some(path) => load_init_file(path).with_context(|| format!("loading init file {}", path.display()))?,
        None => Vec::new(),
    };
    let mut bytecode: Option<Vec<u8>> = None;

    tracing::info!(
        "[CAMPAIGN] {} on {} with {} coverage",
        config.contract,
        config.contract_addr,
        config.cov_mode.name()
    );

    while config.max_iters.map_or(true, |max| campaign.iterations < max) {
        campaign.iterations += 1;
        tracing::info!("[CAMPAIGN] running fuzzer campaign #{}", campaign.iterations);
        let started = Instant::now();
        let run = run_fuzzer(config, &campaign.senders)
            .await
            .with_context(|| format!("fuzzer campaign #{}", campaign.iterations))?;
        campaign.fuzz_time_ms += started.elapsed().as_millis();
        tracing::debug!("[CAMPAIGN] fuzzer stdout:\n{}", run.stdout);

        if bytecode.is_none() {
            let code = load_runtime_bytecode(&config.crytic_export, &config.contract)
                .with_context(|| format!("extracting bytecode of {}", config.contract))?;
            bytecode = Some(code);
        }
        let Some(code) = bytecode.as_deref() else {
            break;
        };

        let new_files = pull_new_corpus_files(&corpus, &mut campaign.seen_files)
            .with_context(|| format!("polling {}", corpus.display()))?;
        if new_files.is_empty() {
            tracing::info!("[CAMPAIGN] fuzzer found no new inputs");
            break;
        }
        campaign.fuzzer_inputs += new_files.iter().filter(|f| !is_generated(f)).count();
        tracing::info!("[CAMPAIGN] replaying {} new inputs symbolically", new_files.len());

        let setup = ReplaySetup {
            contract_code: code,
            contract_addr: config.contract_addr,
            deployer: config.deployer,
            init_events: &init_events,
        };
        let started = Instant::now();
        let round = run_round(&z3_ctx, &mut cov, &setup, &new_files, &corpus, &campaign.senders, &options);
        campaign.solve_time_ms += started.elapsed().as_millis();

        campaign.replayed += round.replayed;
        campaign.replay_failures += round.aborted;
        campaign.solver_successes += round.successes;
        campaign.solver_timeouts += round.timeouts;
        campaign.generated_inputs += round.new_inputs.len();
        campaign.senders.extend(round.new_senders);

        if round.new_inputs.is_empty() {
            tracing::info!("[CAMPAIGN] couldn't generate more inputs");
            break;
        }
        tracing::info!("[CAMPAIGN] generated {} new inputs", round.new_inputs.len());
    }

    tracing::info!(
        "[CAMPAIGN] done after {} iterations: {} fuzzer inputs, {} generated, corpus in {}",
        campaign.iterations,
        campaign.fuzzer_inputs,
        campaign.generated_inputs,
        config.corpus_dir.display()
    );
    Ok(campaign)
}
