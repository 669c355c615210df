//! eth-loadtest - JSON-RPC load generation for Ethereum-compatible nodes
//!
//! The binary drives [`scenario::ScenarioRunner`]; the client, contract,
//! wallet and poller surfaces are exposed here for custom load scripts.

pub mod chain;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod scenario;
pub mod tx;
pub mod wallet;

pub use client::Client;
pub use contract::{Contract, TxnOpts};
pub use error::{LoadResult, LoadTestError};
