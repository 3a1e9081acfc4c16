//! EVM triggers - ERC20 transfer gamification connector
//!
//! This library scans EVM chains for ERC20 `Transfer` events of the contracts
//! that gamification rules watch, persists them in a RocksDB store, and turns
//! the transfers that satisfy a rule into trigger events for a rewards engine.

pub mod cli;
pub mod keys;
pub mod records;
pub mod store;

// Chain access
pub mod chain;
pub mod error;
pub mod rpc;
pub mod types;

// Scanning pipeline
pub mod cache;
pub mod config;
pub mod connector;
pub mod decoder;
pub mod dispatch;
pub mod emitter;
pub mod ingest;
pub mod matcher;
pub mod rules;
pub mod scanner;

#[cfg(test)]
mod testing;

// Re-export the main types for convenience
pub use chain::{ChainClient, ChainRegistry};
pub use error::ConnectorError;
pub use records::{DispatchStatus, OutboundEvent, TransactionRecord, Trigger, TriggerKind};
pub use rules::{Rule, RuleConfig, RuleSource};
pub use store::{ConnectorStore, RocksConnectorStore};
