use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use z3::Context;

use crate::coverage::Coverage;
use crate::error::{Result, WorldError};
use crate::fuzzer::corpus::load_tx_sequence;
use crate::fuzzer::init::{apply_init_events, InitEvent};
use crate::symbolic::engine::Stop;
use crate::world::monitor::AttachArgs;
use crate::world::{DeployMode, World};

/// What every replayed input starts from.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySetup<'a> {
    /// Runtime code of the contract under test.
    pub contract_code: &'a [u8],
    pub contract_addr: Address,
    pub deployer: Address,
    pub init_events: &'a [InitEvent],
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Aborted inputs and why.
    pub failures: Vec<(PathBuf, String)>,
}

/// Replay one corpus file on a fresh World with `cov` attached.
pub fn replay_input<'ctx>(
    ctx: &'ctx Context,
    setup: &ReplaySetup<'_>,
    cov: &mut Coverage<'ctx>,
    file: &Path,
) -> Result<()> {
    let uid = file.display().to_string();
    let (_, txs) = load_tx_sequence(ctx, file)?;

    let mut world = World::new(ctx);
    apply_init_events(&mut world, setup.init_events)?;
    if world.contract(&setup.contract_addr).is_none() {
        world.deploy(
            setup.contract_code.to_vec(),
            setup.contract_addr,
            setup.deployer,
            DeployMode::Runtime,
        )?;
    }

    cov.set_input_uid(uid.clone());
    world.attach_monitor(
        cov,
        AttachArgs {
            contract: setup.contract_addr,
            transactions: &txs,
        },
    )?;
    world.push_transactions(txs);

    match world.run()? {
        Stop::Exit(_) => Ok(()),
        stop => Err(WorldError::UnexpectedStop { input: uid, stop }.into()),
    }
}

/// Replay `files` in order. A failing input is logged with its UID and
/// contributes no bifurcations; the others still run.
pub fn replay_inputs<'ctx>(
    ctx: &'ctx Context,
    setup: &ReplaySetup<'_>,
    cov: &mut Coverage<'ctx>,
    files: &[PathBuf],
) -> ReplayReport {
    let mut report = ReplayReport::default();
    for file in files {
        tracing::debug!("[REPLAY] {}", file.display());
        let recorded = cov.bifurcations().len();
        match replay_input(ctx, setup, cov, file) {
            Ok(()) => report.replayed += 1,
            Err(e) => {
                tracing::warn!("[REPLAY] aborted input {}: {e}", file.display());
                cov.truncate_bifurcations(recorded);
                report.failures.push((file.clone(), e.to_string()));
            }
        }
    }
    tracing::info!(
        "[REPLAY] replayed {} inputs ({} aborted), {} bifurcations",
        report.replayed,
        report.failures.len(),
        cov.bifurcations().len()
    );
    report
}
