//! Core library for pool-sync.
//!
//! Keeps a local view of leveraged pools consistent with on-chain state and
//! committer events, tracks the connected account's pending commits and
//! drives the mint/burn form. The binary (`main.rs`) wires these pieces to a
//! websocket node.

pub mod chain;
pub mod commits;
pub mod config;
pub mod engine;
pub mod errors;
pub mod markets;
pub mod models;
pub mod notices;
pub mod pool;
pub mod registry;
pub mod swap;
pub mod sync;
pub mod transactions;
pub mod utils;
