//! Connector tick loop
//!
//! Orchestrates one polling tick: load rules, ingest every (contract, network)
//! partition the rules watch, then evaluate each rule against its partition.
//! Failures are contained per partition and per rule; a tick-level failure
//! (rules unavailable) is logged and the tick ends cleanly.

use crate::chain::ChainRegistry;
use crate::dispatch::DispatchHandle;
use crate::emitter::TriggerEmitter;
use crate::error::ConnectorError;
use crate::ingest::{IngestOutcome, Ingestor};
use crate::rules::{compile_rules, Rule, RuleSource, EVM_EVENT_TYPE};
use crate::store::ConnectorStore;
use alloy_primitives::Address;
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Counters of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub rules: usize,
    pub partitions: usize,
    pub failed_partitions: usize,
    pub failed_rules: usize,
    pub new_transactions: usize,
    pub triggers: usize,
}

pub struct Connector {
    store: Arc<dyn ConnectorStore>,
    chains: ChainRegistry,
    rules: Box<dyn RuleSource>,
    dispatch: DispatchHandle,
    max_block_range: u64,
    /// Held for the duration of a tick
    running: Mutex<()>,
}

impl Connector {
    pub fn new(
        store: Arc<dyn ConnectorStore>,
        chains: ChainRegistry,
        rules: Box<dyn RuleSource>,
        dispatch: DispatchHandle,
        max_block_range: u64,
    ) -> Self {
        Self {
            store,
            chains,
            rules,
            dispatch,
            max_block_range,
            running: Mutex::new(()),
        }
    }

    /// Run one tick. Returns `None` without doing anything when the previous
    /// tick is still running.
    pub async fn tick(&self) -> Option<TickReport> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous tick still running, skipping");
            return None;
        };

        match self.run_tick(now_ms()).await {
            Ok(report) => {
                info!(
                    "Tick done: {} rule(s), {} partition(s) ({} failed), {} new transaction(s), {} trigger(s), {} rule failure(s)",
                    report.rules,
                    report.partitions,
                    report.failed_partitions,
                    report.new_transactions,
                    report.triggers,
                    report.failed_rules
                );
                Some(report)
            }
            Err(e) => {
                error!("Tick failed: {:#}", e);
                Some(TickReport::default())
            }
        }
    }

    /// Tick on a fixed interval until the future is dropped.
    ///
    /// The first tick fires immediately. Ticks that would have fired while a
    /// slow tick was running are skipped, not bunched up.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn run_tick(&self, now_ms: u64) -> Result<TickReport> {
        let configs = self.rules.active_rules(EVM_EVENT_TYPE)?;
        let rules = compile_rules(&configs);
        let mut report = TickReport {
            rules: rules.len(),
            ..TickReport::default()
        };

        let partitions: BTreeSet<(u64, Address)> =
            rules.iter().map(|r| (r.network_id, r.contract)).collect();
        report.partitions = partitions.len();

        for (network_id, contract) in partitions {
            match self.ingest_partition(contract, network_id).await {
                Ok(inserted) => report.new_transactions += inserted,
                Err(e) => {
                    warn!(%contract, network_id, "Ingestion failed: {}", e);
                    report.failed_partitions += 1;
                }
            }
        }

        for rule in &rules {
            match self.evaluate_rule(rule, now_ms).await {
                Ok(matched) => report.triggers += matched,
                Err(e) => {
                    warn!(
                        rule_id = rule.id,
                        retryable = e.is_retryable(),
                        "Rule evaluation failed: {}",
                        e
                    );
                    report.failed_rules += 1;
                }
            }
        }

        Ok(report)
    }

    async fn ingest_partition(&self, contract: Address, network_id: u64) -> Result<usize, ConnectorError> {
        let client = self.chains.get(network_id)?;
        let outcome = Ingestor::new(self.store.as_ref(), client.as_ref(), self.max_block_range)
            .ingest(contract, network_id)
            .await?;
        Ok(match outcome {
            IngestOutcome::Scanned { inserted, .. } => inserted,
            IngestOutcome::Initialized { .. } | IngestOutcome::UpToDate { .. } => 0,
        })
    }

    async fn evaluate_rule(&self, rule: &Rule, now_ms: u64) -> Result<usize, ConnectorError> {
        let client = self.chains.get(rule.network_id)?;
        let report = TriggerEmitter::new(self.store.as_ref(), client.as_ref(), &self.dispatch)
            .process_rule(rule, now_ms)
            .await?;
        Ok(report.matched)
    }
}

/// Current time in Unix epoch milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
