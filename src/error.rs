use alloy_primitives::Address;
use thiserror::Error;

use crate::symbolic::engine::Stop;
use crate::world::transaction::TxKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error("coverage error: {0}")]
    Coverage(#[from] CoverageError),
    #[error("fuzzer error: {0}")]
    Fuzzer(#[from] FuzzerError),
    #[error("abi error: {0}")]
    Abi(#[from] AbiError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("address {0} already holds a deployed contract")]
    ContractAddressInUse(Address),
    #[error("address {0} is already an externally owned account")]
    AccountAddressInUse(Address),
    #[error("no contract deployed at {0}")]
    NoContract(Address),
    #[error("unsupported outgoing transaction type: {0:?}")]
    UnsupportedTransaction(TxKind),
    #[error("operation requires an active call stack")]
    NoActiveCallStack,
    #[error("constructor of contract {0} failed")]
    ConstructorFailed(Address),
    #[error("constructors can only run while no transaction is in flight")]
    NotIdle,
    #[error("frame of {0} stopped for a call it never emitted")]
    MissingOutgoingCall(Address),
    #[error("replay of `{input}` stopped unexpectedly: {stop}")]
    UnexpectedStop { input: String, stop: Stop },
}

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("branch at pc {pc} carries no 'taken' flag")]
    MissingTakenFlag { pc: usize },
}

/// Errors raised while talking to the external fuzzer: corpus files,
/// exported initialization traces and the fuzzer process itself.
#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error("malformed init event #{index}: {reason}")]
    MalformedInitEvent { index: usize, reason: String },
    #[error("unsupported call tag `{0}`")]
    UnsupportedCall(String),
    #[error("unsupported argument `{0}`")]
    UnsupportedArgument(String),
    #[error("malformed transaction #{index} in `{file}`: {reason}")]
    MalformedTransaction {
        file: String,
        index: usize,
        reason: String,
    },
    #[error("fuzzer campaign failed: {0}")]
    CampaignFailed(String),
    #[error("no runtime bytecode for contract `{0}`")]
    MissingBytecode(String),
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("unsupported ABI type `{0}`")]
    UnsupportedType(String),
    #[error("argument count mismatch: signature has {expected}, got {got}")]
    ArgumentCount { expected: usize, got: usize },
    #[error("value for `{ty}` does not fit: {value}")]
    ValueOutOfRange { ty: String, value: String },
    #[error("malformed signature `{0}`")]
    MalformedSignature(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
