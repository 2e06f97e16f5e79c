//! `hybrid-fuzz`: alternate an external fuzzer with concolic replay and
//! input synthesis. Configured through `HYBRID_*` environment variables.

use anyhow::Context;
use evm_concolic::campaign::run_hybrid_campaign;
use evm_concolic::utils::config::CampaignConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Default to `info` when `RUST_LOG` is unset or invalid.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = CampaignConfig::from_env().context("reading HYBRID_* configuration")?;
    let campaign = run_hybrid_campaign(&config).await?;

    tracing::info!(
        "[CAMPAIGN] replayed {} inputs ({} aborted), solver: {} successes, {} timeouts, fuzz {} ms, solve {} ms",
        campaign.replayed,
        campaign.replay_failures,
        campaign.solver_successes,
        campaign.solver_timeouts,
        campaign.fuzz_time_ms,
        campaign.solve_time_ms
    );
    Ok(())
}
