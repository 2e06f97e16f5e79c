//! Environment-driven campaign configuration.
//!
//! Every knob is read through a key lookup so that the binary can use the
//! process environment while tests pass a plain map.

use std::path::PathBuf;

use alloy_primitives::Address;

use crate::coverage::state::CoverageMode;
use crate::error::ConfigError;
use crate::utils::hex::to_address;

pub const DEFAULT_CONTRACT_ADDR: &str = "0x00a329c0648769a73afac7f9381e08fb43dbea72";
pub const DEFAULT_DEPLOYER: &str = "0x30000";
pub const DEFAULT_SENDERS: &str = "0x10000,0x20000,0x30000";
pub const DEFAULT_SEQ_LEN: usize = 10;
pub const DEFAULT_TEST_LIMIT: u64 = 50_000;
pub const DEFAULT_INCREMENTAL_THRESHOLD: usize = 5;

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub files: Vec<PathBuf>,
    pub contract: String,
    pub corpus_dir: PathBuf,
    pub fuzzer_bin: String,
    pub test_mode: String,
    pub seq_len: usize,
    pub test_limit: u64,
    pub contract_addr: Address,
    pub deployer: Address,
    pub senders: Vec<Address>,
    pub seed: Option<u64>,
    pub fuzzer_config: Option<PathBuf>,
    pub max_iters: Option<usize>,
    pub cov_mode: CoverageMode,
    pub solver_timeout_ms: Option<u32>,
    pub visit_max: usize,
    pub solve_duplicates: bool,
    pub init_file: Option<PathBuf>,
    pub crytic_export: PathBuf,
}

impl CampaignConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let files: Vec<PathBuf> = get("HYBRID_FILES")
            .ok_or_else(|| ConfigError::Missing("HYBRID_FILES".into()))?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if files.is_empty() {
            return Err(invalid("HYBRID_FILES", "no source file listed"));
        }
        let contract =
            get("HYBRID_CONTRACT").ok_or_else(|| ConfigError::Missing("HYBRID_CONTRACT".into()))?;

        let threshold = parse_or("HYBRID_INCREMENTAL_THRESHOLD", get("HYBRID_INCREMENTAL_THRESHOLD"), DEFAULT_INCREMENTAL_THRESHOLD)?;
        let cov_mode = match get("HYBRID_COV_MODE") {
            Some(raw) => CoverageMode::parse(&raw, threshold)
                .ok_or_else(|| invalid("HYBRID_COV_MODE", &format!("unknown mode `{raw}`")))?,
            None => CoverageMode::InstTxSeq { threshold },
        };

        let senders = get("HYBRID_SENDERS")
            .unwrap_or_else(|| DEFAULT_SENDERS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                to_address(s).ok_or_else(|| invalid("HYBRID_SENDERS", &format!("bad address `{s}`")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            files,
            contract,
            corpus_dir: PathBuf::from(get("HYBRID_CORPUS_DIR").unwrap_or_else(|| "./hybrid-corpus".into())),
            fuzzer_bin: get("HYBRID_FUZZER_BIN").unwrap_or_else(|| "echidna".into()),
            test_mode: get("HYBRID_TEST_MODE").unwrap_or_else(|| "assertion".into()),
            seq_len: parse_or("HYBRID_SEQ_LEN", get("HYBRID_SEQ_LEN"), DEFAULT_SEQ_LEN)?,
            test_limit: parse_or("HYBRID_TEST_LIMIT", get("HYBRID_TEST_LIMIT"), DEFAULT_TEST_LIMIT)?,
            contract_addr: parse_address("HYBRID_CONTRACT_ADDR", get("HYBRID_CONTRACT_ADDR"), DEFAULT_CONTRACT_ADDR)?,
            deployer: parse_address("HYBRID_DEPLOYER", get("HYBRID_DEPLOYER"), DEFAULT_DEPLOYER)?,
            senders,
            seed: parse_opt("HYBRID_SEED", get("HYBRID_SEED"))?,
            fuzzer_config: get("HYBRID_FUZZER_CONFIG").map(PathBuf::from),
            max_iters: parse_opt("HYBRID_MAX_ITERS", get("HYBRID_MAX_ITERS"))?,
            cov_mode,
            solver_timeout_ms: parse_opt("HYBRID_SOLVER_TIMEOUT_MS", get("HYBRID_SOLVER_TIMEOUT_MS"))?,
            visit_max: parse_or("HYBRID_VISIT_MAX", get("HYBRID_VISIT_MAX"), 0)?,
            solve_duplicates: match get("HYBRID_SOLVE_DUPLICATES") {
                Some(raw) => parse_bool_flag(&raw)
                    .ok_or_else(|| invalid("HYBRID_SOLVE_DUPLICATES", &format!("expected a boolean, got `{raw}`")))?,
                None => false,
            },
            init_file: get("HYBRID_INIT_FILE").map(PathBuf::from),
            crytic_export: PathBuf::from(get("HYBRID_CRYTIC_EXPORT").unwrap_or_else(|| "./crytic-export".into())),
        })
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(key, raw)?.unwrap_or(default))
}

fn parse_opt<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.map(|v| v.parse::<T>().map_err(|e| invalid(key, &format!("`{v}`: {e}"))))
        .transpose()
}

fn parse_address(key: &str, raw: Option<String>, default: &str) -> Result<Address, ConfigError> {
    let raw = raw.unwrap_or_else(|| default.to_string());
    to_address(&raw).ok_or_else(|| invalid(key, &format!("bad address `{raw}`")))
}

pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
