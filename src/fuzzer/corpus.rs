//! Fuzzer corpus files: JSON arrays of transactions with typed call
//! arguments.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use alloy_primitives::{keccak256, U256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;
use z3::Context;

use crate::abi::{self, AbiType};
use crate::error::{FuzzerError, Result};
use crate::symbolic::value::{ByteBuf, VarContext, Word};
use crate::utils::hex::{address_from_u256, address_to_u256, to_address, to_u256, u256_to_hex};
use crate::world::transaction::{Transaction, DEFAULT_GAS_LIMIT};

/// File-name prefix of inputs this crate writes into the corpus.
pub const GENERATED_PREFIX: &str = "hybrid-";

/// One transaction of a corpus file. Fields this crate does not interpret
/// are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusTx {
    #[serde(alias = "_call")]
    pub call: Value,
    #[serde(alias = "_src")]
    pub src: String,
    #[serde(alias = "_dst")]
    pub dst: String,
    #[serde(alias = "_gas'", default = "default_gas")]
    pub gas: u64,
    #[serde(alias = "_gasprice'", default = "zero_hex")]
    pub gasprice: String,
    #[serde(alias = "_value", default = "zero_hex")]
    pub value: String,
    /// `[timestamp increment, block increment]`.
    #[serde(alias = "_delay", default = "zero_delay")]
    pub delay: (String, String),
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_gas() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn zero_hex() -> String {
    "0x0".to_string()
}

fn zero_delay() -> (String, String) {
    (zero_hex(), zero_hex())
}

/// A parsed call description.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSpec {
    Solidity {
        name: String,
        types: Vec<AbiType>,
        args: Vec<U256>,
    },
    NoCall,
}

impl CorpusTx {
    pub fn call_spec(&self) -> Result<CallSpec> {
        let tag = self.call.get("tag").and_then(Value::as_str).unwrap_or_default();
        match tag {
            "NoCall" => Ok(CallSpec::NoCall),
            "SolCall" => {
                let contents = self.call.get("contents").and_then(Value::as_array);
                let name = contents
                    .and_then(|c| c.first())
                    .and_then(Value::as_str)
                    .ok_or_else(|| FuzzerError::UnsupportedCall("SolCall without a function name".into()))?;
                let raw_args = contents
                    .and_then(|c| c.get(1))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut types = Vec::with_capacity(raw_args.len());
                let mut args = Vec::with_capacity(raw_args.len());
                for arg in &raw_args {
                    let (ty, value) = translate_argument(arg)?;
                    types.push(ty);
                    args.push(value);
                }
                Ok(CallSpec::Solidity {
                    name: name.to_string(),
                    types,
                    args,
                })
            }
            other => Err(FuzzerError::UnsupportedCall(other.to_string()).into()),
        }
    }
}

/// Typed argument -> (type, raw bit pattern).
pub fn translate_argument(arg: &Value) -> Result<(AbiType, U256)> {
    let tag = arg.get("tag").and_then(Value::as_str).unwrap_or_default();
    let contents = arg.get("contents");
    let unsupported = || FuzzerError::UnsupportedArgument(arg.to_string());
    let sized = || -> Result<(u32, String)> {
        let pair = contents.and_then(Value::as_array).ok_or_else(unsupported)?;
        let bits = pair
            .first()
            .and_then(Value::as_u64)
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(unsupported)?;
        let value = match pair.get(1) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(unsupported().into()),
        };
        Ok((bits, value))
    };

    match tag {
        "AbiUInt" => {
            let (bits, raw) = sized()?;
            let ty = AbiType::parse(&format!("uint{bits}"))?;
            let value = to_u256(&raw).ok_or_else(unsupported)?;
            Ok((ty, value))
        }
        "AbiInt" => {
            let (bits, raw) = sized()?;
            let ty = AbiType::parse(&format!("int{bits}"))?;
            Ok((ty, abi::encode_signed(&raw, bits)?))
        }
        "AbiBool" => {
            let flag = contents.and_then(Value::as_bool).ok_or_else(unsupported)?;
            Ok((AbiType::Bool, U256::from(u8::from(flag))))
        }
        "AbiAddress" => {
            let raw = contents.and_then(Value::as_str).ok_or_else(unsupported)?;
            let addr = to_address(raw).ok_or_else(unsupported)?;
            Ok((AbiType::Address, address_to_u256(addr)))
        }
        // `[N, base64 payload]` for bytesN
        "AbiBytes" => {
            let (len, raw) = sized()?;
            let ty = AbiType::parse(&format!("bytes{len}"))?;
            let bytes = BASE64.decode(raw.as_bytes()).map_err(|_| unsupported())?;
            if bytes.len() != len as usize {
                return Err(unsupported().into());
            }
            Ok((ty, abi::fixed_bytes_value(&bytes)))
        }
        _ => Err(unsupported().into()),
    }
}

pub fn sender_var(tx: usize) -> String {
    format!("sender_{tx}")
}

pub fn value_var(tx: usize) -> String {
    format!("value_{tx}")
}

pub fn block_num_inc_var(tx: usize) -> String {
    format!("block_num_inc_{tx}")
}

pub fn block_timestamp_inc_var(tx: usize) -> String {
    format!("block_timestamp_inc_{tx}")
}

pub fn parse_corpus(text: &str) -> Result<Vec<CorpusTx>> {
    Ok(serde_json::from_str(text)?)
}

pub fn read_corpus_file(path: &Path) -> Result<Vec<CorpusTx>> {
    parse_corpus(&fs::read_to_string(path)?)
}

/// Turn corpus entry `index` into a concolic transaction binding its
/// sender, value, block increments and call arguments to fresh variables.
pub fn to_transaction<'ctx>(ctx: &'ctx Context, index: usize, tx: &CorpusTx, file: &str) -> Result<Transaction<'ctx>> {
    let malformed = |reason: String| FuzzerError::MalformedTransaction {
        file: file.to_string(),
        index,
        reason,
    };
    let number = |field: &str, raw: &str| to_u256(raw).ok_or_else(|| malformed(format!("bad {field} `{raw}`")));

    let mut vars = VarContext::new();
    let sender = to_address(&tx.src).ok_or_else(|| malformed(format!("bad src `{}`", tx.src)))?;
    let sender = vars.declare(ctx, &sender_var(index), 160, address_to_u256(sender));
    let value = vars.declare(ctx, &value_var(index), 256, number("value", &tx.value)?);
    let blocks = vars.declare(ctx, &block_num_inc_var(index), 256, number("delay", &tx.delay.1)?);
    let seconds = vars.declare(ctx, &block_timestamp_inc_var(index), 256, number("delay", &tx.delay.0)?);
    let gas_price = number("gasprice", &tx.gasprice)?;

    let (recipient, data) = match tx.call_spec()? {
        CallSpec::NoCall => (None, ByteBuf::new()),
        CallSpec::Solidity { name, types, args } => {
            let dst = to_address(&tx.dst).ok_or_else(|| malformed(format!("bad dst `{}`", tx.dst)))?;
            let data = abi::function_call(ctx, &mut vars, index, &name, &types, &args)?;
            (Some(dst), data)
        }
    };

    Ok(Transaction::new(address_from_u256(sender.concrete), recipient, data)
        .with_sender(sender)
        .with_value(value)
        .with_gas_price(Word::concrete(gas_price))
        .with_gas_limit(tx.gas)
        .with_block_increments(blocks, seconds)
        .with_vars(vars))
}

pub fn load_tx_sequence<'ctx>(ctx: &'ctx Context, path: &Path) -> Result<(Vec<CorpusTx>, Vec<Transaction<'ctx>>)> {
    let raw = read_corpus_file(path)?;
    let file = path.display().to_string();
    let txs = raw
        .iter()
        .enumerate()
        .map(|(i, tx)| to_transaction(ctx, i, tx, &file))
        .collect::<Result<Vec<_>>>()?;
    Ok((raw, txs))
}

/// Rewrite `template` with the values `model` assigns to its variables.
/// Variables the model leaves out keep their original values.
pub fn apply_model(template: &[CorpusTx], model: &BTreeMap<String, U256>) -> Result<Vec<CorpusTx>> {
    let mut out = template.to_vec();
    for (i, tx) in out.iter_mut().enumerate() {
        if let Some(v) = model.get(&sender_var(i)) {
            tx.src = u256_to_hex(*v);
        }
        if let Some(v) = model.get(&value_var(i)) {
            tx.value = u256_to_hex(*v);
        }
        if let Some(v) = model.get(&block_timestamp_inc_var(i)) {
            tx.delay.0 = u256_to_hex(*v);
        }
        if let Some(v) = model.get(&block_num_inc_var(i)) {
            tx.delay.1 = u256_to_hex(*v);
        }

        let CallSpec::Solidity { types, args: values, .. } = tx.call_spec()? else {
            continue;
        };
        let Some(args) = tx
            .call
            .get_mut("contents")
            .and_then(|c| c.get_mut(1))
            .and_then(Value::as_array_mut)
        else {
            continue;
        };
        for (j, (ty, arg)) in types.iter().zip(args.iter_mut()).enumerate() {
            if let Some(contents) = solved_argument(*ty, values[j], model, i, j) {
                arg["contents"] = contents;
            }
        }
    }
    Ok(out)
}

/// New `contents` of argument `j` of transaction `i`, or `None` when the
/// model assigns none of its variables. Unassigned bytes of a `bytesN`
/// keep their original value.
fn solved_argument(ty: AbiType, original: U256, model: &BTreeMap<String, U256>, i: usize, j: usize) -> Option<Value> {
    let word = || model.get(&abi::arg_var_name(i, j));
    match ty {
        AbiType::Uint(bits) => word().map(|v| json!([bits, v.to_string()])),
        AbiType::Int(bits) => word().map(|v| json!([bits, abi::decode_signed(*v, bits)])),
        AbiType::Bool => word().map(|v| json!(!v.is_zero())),
        AbiType::Address => word().map(|v| json!(format!("0x{}", hex::encode(address_from_u256(*v))))),
        AbiType::FixedBytes(len) => {
            let mut bytes = abi::fixed_bytes(original, len as usize);
            let mut assigned = false;
            for (k, byte) in bytes.iter_mut().enumerate() {
                if let Some(v) = model.get(&abi::byte_var_name(i, j, k)) {
                    *byte = v.byte(0);
                    assigned = true;
                }
            }
            assigned.then(|| json!([len, BASE64.encode(&bytes)]))
        }
    }
}

/// Write `txs` as a new corpus file named after its content hash.
pub fn store_tx_sequence(corpus_dir: &Path, txs: &[CorpusTx]) -> Result<PathBuf> {
    let text = serde_json::to_string(txs)?;
    let digest = keccak256(text.as_bytes());
    let path = corpus_dir.join(format!("{GENERATED_PREFIX}{}.txt", hex::encode(&digest[..16])));
    fs::create_dir_all(corpus_dir)?;
    fs::write(&path, text)?;
    debug!("[FUZZER] wrote {}", path.display());
    Ok(path)
}

pub fn store_new_tx_sequence(
    corpus_dir: &Path,
    template: &[CorpusTx],
    model: &BTreeMap<String, U256>,
) -> Result<PathBuf> {
    store_tx_sequence(corpus_dir, &apply_model(template, model)?)
}

/// `.txt` files in `dir` not yet in `seen`, sorted; they are added to `seen`.
/// A missing directory has no files.
pub fn pull_new_corpus_files(dir: &Path, seen: &mut HashSet<PathBuf>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut fresh = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        if seen.insert(path.clone()) {
            fresh.push(path);
        }
    }
    fresh.sort();
    Ok(fresh)
}

pub fn is_generated(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(GENERATED_PREFIX))
}
