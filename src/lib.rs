//! Coverage-guided concolic testing for EVM smart contracts.
//!
//! The crate replays a fuzzer's corpus through a concolic EVM, records the
//! branches whose other side no input has reached yet, and asks z3 for
//! inputs that take them.
//!
//! Layers, leaf first: [`symbolic`] (the concolic interpreter), [`world`]
//! (multi-contract execution and monitors), [`coverage`], [`solver`]
//! (replay and input synthesis), [`campaign`] (the loop around an external
//! fuzzer).

pub mod abi;
pub mod campaign;
pub mod coverage;
pub mod error;
pub mod fuzzer;
pub mod solver;
pub mod symbolic;
pub mod utils;
pub mod world;
