mod common;

use alloy_primitives::{Address, U256};
use common::*;
use evm_concolic::coverage::state::CoverageMode;
use evm_concolic::coverage::Coverage;
use evm_concolic::error::Result;
use evm_concolic::solver::synthesis::{solve_bifurcation, SolveStatus};
use evm_concolic::symbolic::engine::{ExitStatus, HookAction, Stop};
use evm_concolic::world::monitor::{AttachArgs, EventMask, EventView, WorldMonitor};
use evm_concolic::symbolic::value::ByteBuf;
use evm_concolic::world::transaction::Transaction;
use evm_concolic::world::{DeployMode, World};
use z3::{Config, Context};

const CALLEE: Address = Address::repeat_byte(0xbb);

fn replay_with_coverage<'ctx>(
    ctx: &'ctx Context,
    cov: &mut Coverage<'ctx>,
    code: &[u8],
    uid: &str,
    txs: Vec<Transaction<'ctx>>,
) -> Stop {
    let mut world = World::new(ctx);
    world
        .deploy(code.to_vec(), TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    cov.set_input_uid(uid);
    world
        .attach_monitor(
            cov,
            AttachArgs {
                contract: TARGET,
                transactions: &txs,
            },
        )
        .unwrap();
    world.push_transactions(txs);
    world.run().unwrap()
}

#[test]
fn test_untaken_branch_is_solved_and_reached() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let code = threshold_contract();
    let mut cov = Coverage::new(CoverageMode::Inst);

    let txs = vec![uint_call(&ctx, 0, TARGET, U256::from(5))];
    replay_with_coverage(&ctx, &mut cov, &code, "seed", txs);

    let bifurcations = cov.bifurcations();
    assert_eq!(bifurcations.len(), 1);
    let bif = &bifurcations[0];
    assert_eq!(bif.pc, THRESHOLD_JUMPI);
    assert_eq!(bif.alt_target, THRESHOLD_TARGET);
    assert_eq!(bif.input_uid, "seed");

    let x = match solve_bifurcation(&ctx, bif, Some(10_000)) {
        SolveStatus::Sat(model) => model["arg_0_0"],
        other => panic!("expected sat, got {other:?}"),
    };
    assert!(x > U256::from(10));

    // The solved argument takes the other side of the branch.
    let mut world = World::new(&ctx);
    world
        .deploy(code, TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    world.push_transaction(uint_call(&ctx, 0, TARGET, x));
    world.run().unwrap();
    assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::from(1));
}

#[test]
fn test_visited_alternative_records_no_bifurcation() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let code = threshold_contract();
    let mut cov = Coverage::new(CoverageMode::Inst);

    replay_with_coverage(&ctx, &mut cov, &code, "big", vec![uint_call(&ctx, 0, TARGET, U256::from(50))]);
    replay_with_coverage(&ctx, &mut cov, &code, "small", vec![uint_call(&ctx, 0, TARGET, U256::from(5))]);
    cov.clear_bifurcations();

    replay_with_coverage(&ctx, &mut cov, &code, "again", vec![uint_call(&ctx, 0, TARGET, U256::from(7))]);
    assert!(cov.bifurcations().is_empty());
}

fn caller_of(callee: Address) -> Vec<u8> {
    Asm::new()
        .push1(7)
        .store_top(1)
        .call(Some(callee), 0)
        .store_top(0)
        .op(STOP)
        .build()
}

#[test]
fn test_reverting_callee_pushes_zero_and_keeps_caller_state() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let reverting = Asm::new()
        .push1(1)
        .store_top(0)
        .push1(0)
        .push1(0)
        .op(REVERT)
        .build();

    let mut world = World::new(&ctx);
    world
        .deploy(caller_of(CALLEE), TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    world
        .deploy(reverting, CALLEE, SENDER, DeployMode::Runtime)
        .unwrap();
    world.push_transaction(Transaction::new(SENDER, Some(TARGET), word_data(U256::ZERO)));

    assert_eq!(world.run().unwrap(), Stop::Exit(ExitStatus::Stop));
    assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::ZERO);
    assert_eq!(world.storage_at(&TARGET, U256::from(1)), U256::from(7));
    assert_eq!(world.storage_at(&CALLEE, U256::ZERO), U256::ZERO);
    assert!(world.call_stack().is_empty());
}

#[test]
fn test_successful_callee_pushes_one() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let storing = Asm::new().push1(1).store_top(0).op(STOP).build();

    let mut world = World::new(&ctx);
    world
        .deploy(caller_of(CALLEE), TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    world
        .deploy(storing, CALLEE, SENDER, DeployMode::Runtime)
        .unwrap();
    world.push_transaction(Transaction::new(SENDER, Some(TARGET), word_data(U256::ZERO)));

    world.run().unwrap();
    assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::from(1));
    assert_eq!(world.storage_at(&CALLEE, U256::ZERO), U256::from(1));
}

#[test]
fn test_call_to_account_without_code_succeeds() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut world = World::new(&ctx);
    world
        .deploy(caller_of(Address::repeat_byte(0xee)), TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    world.push_transaction(Transaction::new(SENDER, Some(TARGET), word_data(U256::ZERO)));

    world.run().unwrap();
    assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::from(1));
}

/// Records every frame the World opens and the deepest frame that executed.
#[derive(Default)]
struct FrameLog {
    frames: Vec<(Address, usize)>,
    max_depth: usize,
}

impl<'ctx> WorldMonitor<'ctx> for FrameLog {
    fn subscriptions(&self, _contract: Address) -> EventMask {
        EventMask::EXEC
    }

    fn on_new_runtime(&mut self, contract: Address, depth: usize) -> Result<()> {
        self.frames.push((contract, depth));
        Ok(())
    }

    fn on_exec(&mut self, view: &EventView<'_, 'ctx>) -> Result<HookAction> {
        self.max_depth = self.max_depth.max(view.depth);
        Ok(HookAction::Continue)
    }
}

#[test]
fn test_reentrant_call_stacks_two_runtimes_of_one_contract() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    // Without call data: call self with one byte. With call data: SSTORE(0, 1).
    let reentrant = Asm::new()
        .op(CALLDATASIZE)
        .push1(21)
        .op(JUMPI)
        .call(None, 1)
        .op(POP)
        .op(STOP)
        .op(JUMPDEST)
        .push1(1)
        .store_top(0)
        .op(STOP)
        .build();
    assert_eq!(reentrant[21], JUMPDEST);

    let mut log = FrameLog::default();
    {
        let mut world = World::new(&ctx);
        world
            .deploy(reentrant, TARGET, SENDER, DeployMode::Runtime)
            .unwrap();
        world
            .attach_monitor(
                &mut log,
                AttachArgs {
                    contract: TARGET,
                    transactions: &[],
                },
            )
            .unwrap();
        world.push_transaction(Transaction::new(SENDER, Some(TARGET), ByteBuf::new()));
        assert_eq!(world.run().unwrap(), Stop::Exit(ExitStatus::Stop));
        assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::from(1));
        assert!(world.call_stack().is_empty());
        assert_eq!(world.contract(&TARGET).unwrap().runtime_depth(), 0);
    }
    assert_eq!(log.frames, vec![(TARGET, 1), (TARGET, 2)]);
    assert_eq!(log.max_depth, 2);
}

#[test]
fn test_storage_sensitive_mode_splits_states_by_written_slots() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    // SSTORE(calldata[4..36], 1)
    let code = Asm::new()
        .push1(1)
        .push1(4)
        .op(CALLDATALOAD)
        .op(0x55)
        .op(STOP)
        .build();

    let mut covered = Vec::new();
    for mode in [CoverageMode::Inst, CoverageMode::InstSg] {
        let mut cov = Coverage::new(mode);
        for slot in [1u64, 2] {
            let tx = Transaction::new(SENDER, Some(TARGET), word_data(U256::from(slot)));
            replay_with_coverage(&ctx, &mut cov, &code, "slot", vec![tx]);
        }
        covered.push(cov.covered_states());
    }
    // Five instructions; the final STOP is seen with two different storages.
    assert_eq!(covered, vec![5, 6]);
}

#[test]
fn test_call_beyond_depth_limit_fails_without_a_frame() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let storing = Asm::new().push1(1).store_top(0).op(STOP).build();

    let mut world = World::new(&ctx).with_max_call_depth(1);
    world
        .deploy(caller_of(CALLEE), TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    world
        .deploy(storing, CALLEE, SENDER, DeployMode::Runtime)
        .unwrap();
    world.push_transaction(Transaction::new(SENDER, Some(TARGET), word_data(U256::ZERO)));

    assert_eq!(world.run().unwrap(), Stop::Exit(ExitStatus::Stop));
    assert_eq!(world.storage_at(&TARGET, U256::ZERO), U256::ZERO);
    assert_eq!(world.storage_at(&TARGET, U256::from(1)), U256::from(7));
    assert_eq!(world.storage_at(&CALLEE, U256::ZERO), U256::ZERO);
}

#[test]
fn test_storage_sensitive_mode_keeps_bifurcations_of_both_inputs() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    // SSTORE(x, 1); if x > 10 jump to 16
    let code = Asm::new()
        .push1(1)
        .push1(4)
        .op(CALLDATALOAD)
        .op(SSTORE)
        .push1(10)
        .push1(4)
        .op(CALLDATALOAD)
        .op(GT)
        .push1(16)
        .op(JUMPI)
        .op(STOP)
        .op(JUMPDEST)
        .op(STOP)
        .build();
    assert_eq!(code[16], JUMPDEST);

    let mut unique = Vec::new();
    for mode in [CoverageMode::Inst, CoverageMode::InstSg] {
        let mut cov = Coverage::new(mode);
        for (tx, slot) in [(0, 1u64), (1, 2)] {
            let txs = vec![uint_call(&ctx, tx, TARGET, U256::from(slot))];
            replay_with_coverage(&ctx, &mut cov, &code, &format!("slot-{slot}"), txs);
        }
        let bifurcations = cov.bifurcations();
        assert_eq!(bifurcations.len(), 2);
        assert!(bifurcations.iter().all(|b| b.alt_target == 16));
        assert_eq!(bifurcations[0].input_uid, "slot-1");
        assert_eq!(bifurcations[1].input_uid, "slot-2");
        unique.push(cov.unique_opportunities().len());
    }
    // Only the storage-sensitive mode tells the two alternatives apart.
    assert_eq!(unique, vec![1, 2]);
}

/// Branch targets of `threshold_contract` as recorded in a path.
const NOT_TAKEN: usize = THRESHOLD_JUMPI + 1;

#[test]
fn test_path_modes_track_branch_sequences_across_transactions() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let code = threshold_contract();

    let mut recorded = Vec::new();
    for mode in [CoverageMode::Path, CoverageMode::PathRelaxed] {
        let mut cov = Coverage::new(mode);
        // Taken, then not taken: the path is [10, 9].
        let txs = vec![
            uint_call(&ctx, 0, TARGET, U256::from(50)),
            uint_call(&ctx, 1, TARGET, U256::from(5)),
        ];
        replay_with_coverage(&ctx, &mut cov, &code, "two", txs);
        assert_eq!(cov.covered_states(), 0);
        cov.clear_bifurcations();

        // A fresh input starts a fresh path; its alternative is the path [9].
        replay_with_coverage(&ctx, &mut cov, &code, "one", vec![uint_call(&ctx, 0, TARGET, U256::from(50))]);
        let alts: Vec<_> = cov.bifurcations().iter().map(|b| (b.pc, b.alt_target)).collect();
        recorded.push(alts);
    }
    // Strict paths never saw [9] on its own; relaxed coverage counted it as a
    // sub-path of [10, 9].
    assert_eq!(recorded[0], vec![(THRESHOLD_JUMPI, NOT_TAKEN)]);
    assert!(recorded[1].is_empty());
}

#[test]
fn test_path_mode_ignores_branches_in_other_contracts() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut cov = Coverage::new(CoverageMode::Path);
    let mut world = World::new(&ctx);
    world
        .deploy(threshold_contract(), CALLEE, SENDER, DeployMode::Runtime)
        .unwrap();
    world
        .deploy(vec![STOP], TARGET, SENDER, DeployMode::Runtime)
        .unwrap();
    let txs = vec![uint_call(&ctx, 0, CALLEE, U256::from(5))];
    world
        .attach_monitor(
            &mut cov,
            AttachArgs {
                contract: TARGET,
                transactions: &txs,
            },
        )
        .unwrap();
    world.push_transactions(txs);
    world.run().unwrap();
    drop(world);
    assert!(cov.bifurcations().is_empty());
}
