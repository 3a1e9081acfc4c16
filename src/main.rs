//! triggerctl - EVM trigger connector state CLI tool
//!
//! A developer-friendly command-line interface for inspecting and repairing
//! the connector's persistent RocksDB store.

use evm_triggers::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
