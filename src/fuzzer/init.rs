//! Initialization traces exported by the fuzzer: the accounts, deployments
//! and calls that set the chain up before the contract under test runs.

use std::fs;
use std::path::Path;

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{FuzzerError, Result, WorldError};
use crate::symbolic::engine::Stop;
use crate::symbolic::value::{ByteBuf, Word};
use crate::utils::hex::{decode_bytes, to_address, to_u256};
use crate::world::transaction::Transaction;
use crate::world::{DeployMode, World};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitEvent {
    AccountCreated {
        address: Address,
        balance: U256,
    },
    ContractCreated {
        from: Address,
        address: Address,
        init_code: Vec<u8>,
        value: U256,
    },
    FunctionCall {
        from: Address,
        to: Address,
        data: Vec<u8>,
        value: U256,
    },
    BlockMined {
        number_increment: U256,
        timestamp_increment: U256,
    },
}

/// Numbers show up both as JSON numbers and as hex/decimal strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

impl Quantity {
    fn to_u256(&self) -> Option<U256> {
        match self {
            Quantity::Number(n) => Some(U256::from(*n)),
            Quantity::Text(s) => to_u256(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
enum RawEvent {
    AccountCreated {
        address: String,
        #[serde(default)]
        balance: Option<Quantity>,
    },
    ContractCreated {
        from: String,
        contract_address: String,
        data: String,
        #[serde(default)]
        value: Option<Quantity>,
    },
    FunctionCall {
        from: String,
        to: String,
        #[serde(default)]
        data: String,
        #[serde(default)]
        value: Option<Quantity>,
    },
    BlockMined {
        number_increment: Quantity,
        timestamp_increment: Quantity,
    },
}

pub fn parse_init_events(text: &str) -> Result<Vec<InitEvent>> {
    let raw: Vec<Value> = serde_json::from_str(text)?;
    raw.into_iter()
        .enumerate()
        .map(|(index, value)| convert_event(index, value))
        .collect()
}

pub fn load_init_file(path: &Path) -> Result<Vec<InitEvent>> {
    let events = parse_init_events(&fs::read_to_string(path)?)?;
    info!("[FUZZER] loaded {} init events from {}", events.len(), path.display());
    Ok(events)
}

fn convert_event(index: usize, value: Value) -> Result<InitEvent> {
    let malformed = |reason: String| FuzzerError::MalformedInitEvent { index, reason };
    let raw: RawEvent = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
    let address = |field: &str, raw: &str| to_address(raw).ok_or_else(|| malformed(format!("bad {field} `{raw}`")));
    let quantity = |field: &str, raw: Option<&Quantity>| match raw {
        None => Ok(U256::ZERO),
        Some(q) => q.to_u256().ok_or_else(|| malformed(format!("bad {field} {q:?}"))),
    };
    let bytes = |field: &str, raw: &str| decode_bytes(raw).ok_or_else(|| malformed(format!("bad {field} hex")));

    let event = match raw {
        RawEvent::AccountCreated { address: a, balance } => InitEvent::AccountCreated {
            address: address("address", &a)?,
            balance: quantity("balance", balance.as_ref())?,
        },
        RawEvent::ContractCreated {
            from,
            contract_address,
            data,
            value,
        } => InitEvent::ContractCreated {
            from: address("from", &from)?,
            address: address("contract_address", &contract_address)?,
            init_code: bytes("data", &data)?,
            value: quantity("value", value.as_ref())?,
        },
        RawEvent::FunctionCall { from, to, data, value } => InitEvent::FunctionCall {
            from: address("from", &from)?,
            to: address("to", &to)?,
            data: bytes("data", &data)?,
            value: quantity("value", value.as_ref())?,
        },
        RawEvent::BlockMined {
            number_increment,
            timestamp_increment,
        } => InitEvent::BlockMined {
            number_increment: quantity("number_increment", Some(&number_increment))?,
            timestamp_increment: quantity("timestamp_increment", Some(&timestamp_increment))?,
        },
    };
    Ok(event)
}

/// Replay `events` on an idle World.
pub fn apply_init_events(world: &mut World<'_, '_>, events: &[InitEvent]) -> Result<()> {
    for (index, event) in events.iter().enumerate() {
        debug!("[FUZZER] init event #{index}: {event:?}");
        match event {
            InitEvent::AccountCreated { address, balance } => {
                world.create_account(*address, *balance)?;
            }
            InitEvent::ContractCreated {
                from,
                address,
                init_code,
                value,
            } => {
                world.deploy(init_code.clone(), *address, *from, DeployMode::Constructor { args: Vec::new() })?;
                credit(world, *from, *address, *value);
            }
            InitEvent::FunctionCall { from, to, data, value } => {
                if world.contract(to).is_none() {
                    credit(world, *from, *to, *value);
                    continue;
                }
                let tx = Transaction::new(*from, Some(*to), ByteBuf::from_bytes(data.clone()))
                    .with_value(Word::concrete(*value));
                run_setup(world, tx, index)?;
            }
            InitEvent::BlockMined {
                number_increment,
                timestamp_increment,
            } => {
                let tx = Transaction::new(Address::ZERO, None, ByteBuf::new())
                    .with_block_increments(Word::concrete(*number_increment), Word::concrete(*timestamp_increment));
                run_setup(world, tx, index)?;
            }
        }
    }
    Ok(())
}

fn credit(world: &mut World<'_, '_>, from: Address, to: Address, value: U256) {
    let env = world.env_mut();
    let ctx = env.ctx;
    env.ledger.transfer(ctx, Some(from), to, &Word::concrete(value));
}

fn run_setup<'ctx>(world: &mut World<'_, 'ctx>, tx: Transaction<'ctx>, index: usize) -> Result<()> {
    world.push_transaction(tx);
    let stop = world.run()?;
    if matches!(stop, Stop::Exit(_)) {
        return Ok(());
    }
    Err(WorldError::UnexpectedStop {
        input: format!("init event #{index}"),
        stop,
    }
    .into())
}
