//! Concolic EVM interpreter backed by z3.
//!
//! Every value carries its concrete payload, which alone drives control flow,
//! and an optional bit-vector expression over the input variables. Message
//! calls are not executed here: a frame stops with `Stop::OutgoingCall` and the
//! World decides what runs next.

pub mod constraints;
pub mod engine;
pub mod opcodes;
pub mod state;
pub mod utils;
pub mod value;
pub mod z3_ext;
