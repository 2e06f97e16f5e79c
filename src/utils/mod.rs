pub mod config;
pub mod hex;
