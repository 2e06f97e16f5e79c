//! The external fuzzer as a subprocess, and the compiled artifacts it leaves
//! behind.

use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{FuzzerError, Result};
use crate::utils::config::CampaignConfig;
use crate::utils::hex::decode_bytes;

/// Where the fuzzer keeps replayable inputs inside its corpus directory.
pub fn coverage_dir(corpus_dir: &Path) -> PathBuf {
    corpus_dir.join("coverage")
}

/// Command-line arguments for one fuzzing campaign.
pub fn fuzzer_args(config: &CampaignConfig, senders: &[Address]) -> Vec<String> {
    let mut args: Vec<String> = config.files.iter().map(|f| f.display().to_string()).collect();
    let mut flag = |name: &str, value: String| {
        args.push(format!("--{name}"));
        args.push(value);
    };
    flag("contract", config.contract.clone());
    flag("corpus-dir", config.corpus_dir.display().to_string());
    flag("test-mode", config.test_mode.clone());
    flag("seq-len", config.seq_len.to_string());
    flag("test-limit", config.test_limit.to_string());
    flag("contract-addr", format!("{:#x}", config.contract_addr));
    flag("deployer", format!("{:#x}", config.deployer));
    for sender in senders {
        flag("sender", format!("{sender:#x}"));
    }
    if let Some(seed) = config.seed {
        flag("seed", seed.to_string());
    }
    if let Some(path) = &config.fuzzer_config {
        flag("config", path.display().to_string());
    }
    args
}

#[derive(Debug, Clone)]
pub struct FuzzerRun {
    pub stdout: String,
    pub exit_code: Option<i32>,
}

/// Run one campaign to completion. The exit code is not a reliable failure
/// signal for the fuzzer, so any stderr output counts as failure.
pub async fn run_fuzzer(config: &CampaignConfig, senders: &[Address]) -> Result<FuzzerRun> {
    let mut cmd = tokio::process::Command::new(&config.fuzzer_bin);
    cmd.args(fuzzer_args(config, senders));
    debug!("[FUZZER] invoking {:?}", cmd.as_std());

    let output = cmd.output().await?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        error!("[FUZZER] exited with {:?}: {stderr}", output.status.code());
        return Err(FuzzerError::CampaignFailed(stderr.into_owned()).into());
    }
    Ok(FuzzerRun {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        exit_code: output.status.code(),
    })
}

/// Runtime bytecode of `contract` from the compiler output the fuzzer
/// exported (`combined_solc.json`).
pub fn load_runtime_bytecode(crytic_export: &Path, contract: &str) -> Result<Vec<u8>> {
    let text = fs::read_to_string(crytic_export.join("combined_solc.json"))?;
    runtime_bytecode_from_json(&text, contract)
}

pub fn runtime_bytecode_from_json(text: &str, contract: &str) -> Result<Vec<u8>> {
    let root: Value = serde_json::from_str(text)?;
    let missing = || FuzzerError::MissingBytecode(contract.to_string());
    let contracts = root.get("contracts").and_then(Value::as_object).ok_or_else(missing)?;
    let suffix = format!(":{contract}");
    let entry = contracts
        .iter()
        .find(|(key, _)| key.as_str() == contract || key.ends_with(&suffix))
        .map(|(_, v)| v)
        .ok_or_else(missing)?;
    let hex = entry.get("bin-runtime").and_then(Value::as_str).ok_or_else(missing)?;
    let code = decode_bytes(hex).ok_or_else(missing)?;
    if code.is_empty() {
        return Err(missing().into());
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::CampaignConfig;

    #[test]
    fn test_runtime_bytecode_lookup() {
        let json = r#"{"contracts":{
            "src/A.sol:Other":{"bin-runtime":"00"},
            "src/A.sol:Target":{"bin-runtime":"6001600055"},
            "src/A.sol:Abstract":{"bin-runtime":""}
        }}"#;
        assert_eq!(runtime_bytecode_from_json(json, "Target").unwrap(), vec![0x60, 0x01, 0x60, 0x00, 0x55]);
        assert!(runtime_bytecode_from_json(json, "Abstract").is_err());
        assert!(matches!(
            runtime_bytecode_from_json(json, "Nope"),
            Err(crate::error::Error::Fuzzer(FuzzerError::MissingBytecode(_)))
        ));
    }

    #[test]
    fn test_fuzzer_args() {
        let config = CampaignConfig::from_lookup(|key| match key {
            "HYBRID_FILES" => Some("a.sol".into()),
            "HYBRID_CONTRACT" => Some("A".into()),
            "HYBRID_SEED" => Some("7".into()),
            _ => None,
        })
        .unwrap();
        let args = fuzzer_args(&config, &config.senders);
        assert_eq!(args[0], "a.sol");
        assert_eq!(args.iter().filter(|a| *a == "--sender").count(), 3);
        let seed = args.iter().position(|a| a == "--seed").unwrap();
        assert_eq!(args[seed + 1], "7");
        assert!(!args.contains(&"--config".to_string()));
        assert!(args.contains(&"0x00a329c0648769a73afac7f9381e08fb43dbea72".to_string()));
    }
}
