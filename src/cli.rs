//! CLI implementation for triggerctl
//!
//! Operator interface over the connector's durable state: checkpoints,
//! watermarks, ingested transactions and their dispatch status, plus a token
//! metadata lookup against a node. All commands output pretty JSON.

use crate::records::TransactionRecord;
use crate::rpc::RpcClient;
use crate::store::{ConnectorStore, RocksConnectorStore};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Connector state CLI tool
#[derive(Parser)]
#[command(name = "triggerctl")]
#[command(about = "Inspect and repair EVM trigger connector state")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./connector_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get the last scanned block of a contract
    GetCheckpoint {
        /// Token contract address (hex, with or without 0x prefix)
        contract: String,
        /// Network (chain) id
        network_id: u64,
    },
    /// Set the last scanned block of a contract
    SetCheckpoint {
        /// Token contract address (hex, with or without 0x prefix)
        contract: String,
        /// Network (chain) id
        network_id: u64,
        /// Block number
        block: u64,
    },
    /// Get the watermark of a rule
    GetWatermark {
        /// Rule id
        rule_id: u64,
    },
    /// Overwrite the watermark of a rule (may move it backwards)
    SetWatermark {
        /// Rule id
        rule_id: u64,
        /// Last evaluated transaction id
        transaction_id: u64,
    },
    /// List ingested transactions of a contract
    Transactions {
        /// Token contract address (hex, with or without 0x prefix)
        contract: String,
        /// Network (chain) id
        network_id: u64,
        /// Only list transactions with a greater id
        #[arg(long, default_value_t = 0)]
        after: u64,
        /// Maximum number of transactions
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a transaction and its dispatch status
    Status {
        /// Token contract address (hex, with or without 0x prefix)
        contract: String,
        /// Network (chain) id
        network_id: u64,
        /// Transaction id
        id: u64,
    },
    /// Query ERC20 metadata of a contract from a node
    TokenInfo {
        /// Token contract address (hex, with or without 0x prefix)
        contract: String,
        /// RPC endpoint URL
        #[arg(short, long, default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

/// Parse a hex string into a 20-byte address.
fn parse_address(s: &str) -> Result<Address> {
    Address::from_str(s.trim()).with_context(|| format!("Invalid hex address: {}", s))
}

fn record_json(record: &TransactionRecord) -> Value {
    let status: Map<String, Value> = record
        .status
        .iter()
        .map(|(kind, status)| (kind.as_str().to_string(), json!(status)))
        .collect();
    json!({
        "id": record.id,
        "transaction_hash": format!("0x{:x}", record.transaction_hash),
        "log_index": record.log_index,
        "block_number": record.block_number,
        "from": format!("0x{:x}", record.from),
        "to": format!("0x{:x}", record.to),
        "contract": format!("0x{:x}", record.contract),
        "network_id": record.network_id,
        "amount": record.amount.to_string(),
        "sent_date": record.sent_date,
        "status": status,
    })
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let result = execute(cli)?;

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn open_store(db_path: &Path) -> Result<RocksConnectorStore> {
    RocksConnectorStore::open(db_path)
        .with_context(|| format!("Failed to open database at {:?}", db_path))
}

/// Execute a parsed command and return its JSON output.
pub fn execute(cli: Cli) -> Result<Value> {
    let result = match cli.command {
        Commands::GetCheckpoint { contract, network_id } => {
            let addr = parse_address(&contract)?;
            let store = open_store(&cli.db_path)?;
            json!({
                "contract": format!("0x{:x}", addr),
                "network_id": network_id,
                "last_scanned_block": store.get_checkpoint(addr, network_id)?,
            })
        }
        Commands::SetCheckpoint {
            contract,
            network_id,
            block,
        } => {
            let addr = parse_address(&contract)?;
            open_store(&cli.db_path)?.set_checkpoint(block, addr, network_id)?;
            json!({
                "status": "ok",
                "contract": format!("0x{:x}", addr),
                "network_id": network_id,
                "last_scanned_block": block,
            })
        }
        Commands::GetWatermark { rule_id } => json!({
            "rule_id": rule_id,
            "watermark": open_store(&cli.db_path)?.get_watermark(rule_id)?,
        }),
        Commands::SetWatermark {
            rule_id,
            transaction_id,
        } => {
            open_store(&cli.db_path)?.put_watermark(rule_id, transaction_id)?;
            json!({
                "status": "ok",
                "rule_id": rule_id,
                "watermark": transaction_id,
            })
        }
        Commands::Transactions {
            contract,
            network_id,
            after,
            limit,
        } => {
            let addr = parse_address(&contract)?;
            let store = open_store(&cli.db_path)?;
            let records = store.transactions_after(addr, network_id, after, limit)?;
            json!({
                "contract": format!("0x{:x}", addr),
                "network_id": network_id,
                "max_id": store.max_transaction_id(addr, network_id)?,
                "transactions": records.iter().map(record_json).collect::<Vec<_>>(),
            })
        }
        Commands::Status {
            contract,
            network_id,
            id,
        } => {
            let addr = parse_address(&contract)?;
            match open_store(&cli.db_path)?.get_transaction(addr, network_id, id)? {
                Some(record) => json!({ "transaction": record_json(&record) }),
                None => json!({ "transaction": null }),
            }
        }
        Commands::TokenInfo {
            contract,
            rpc_url,
            timeout_secs,
        } => {
            let token = parse_address(&contract)?;
            let rpc = RpcClient::new(rpc_url, Duration::from_secs(timeout_secs))?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            let metadata = runtime.block_on(rpc.token_metadata(token))?;
            json!({
                "contract": format!("0x{:x}", token),
                "token": metadata,
            })
        }
    };

    Ok(result)
}
