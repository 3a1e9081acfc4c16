//! Per-rule trigger emission
//!
//! Each rule owns a watermark: the id of the last transaction of its
//! (contract, network) partition that was evaluated against it. A rule seen
//! for the first time starts at the current highest id and emits nothing, so
//! pre-existing history never floods the rewards engine. After that every
//! tick evaluates the transactions above the watermark in ascending id order,
//! queues the matches for dispatch and moves the watermark forward.
//!
//! The watermark only moves over transactions that were fully evaluated:
//! - a hold whose period has not elapsed stops the batch, to be looked at
//!   again on a later tick;
//! - a chain failure while checking a balance stops the batch and is
//!   returned after the watermark has been advanced over what came before.

use crate::chain::ChainClient;
use crate::dispatch::DispatchHandle;
use crate::error::ConnectorError;
use crate::matcher::{build_trigger, evaluate, still_held, Verdict};
use crate::records::{OutboundEvent, TransactionRecord};
use crate::rules::Rule;
use crate::store::ConnectorStore;
use alloy_primitives::U256;
use tracing::{debug, info};

/// Transactions read from the store per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Dedup state of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleState {
    /// The rule has never been evaluated.
    Uninitialized,
    /// Transactions up to `watermark` have been evaluated.
    CaughtUp { watermark: u64 },
}

/// Summary of one rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EmitReport {
    /// The rule was initialized this tick (no evaluation happened).
    pub initialized: bool,
    pub considered: usize,
    pub matched: usize,
    /// Watermark after the tick.
    pub watermark: u64,
}

pub struct TriggerEmitter<'a> {
    store: &'a dyn ConnectorStore,
    client: &'a dyn ChainClient,
    dispatch: &'a DispatchHandle,
    batch_size: usize,
}

impl<'a> TriggerEmitter<'a> {
    pub fn new(store: &'a dyn ConnectorStore, client: &'a dyn ChainClient, dispatch: &'a DispatchHandle) -> Self {
        Self {
            store,
            client,
            dispatch,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn rule_state(&self, rule_id: u64) -> Result<RuleState, ConnectorError> {
        Ok(match self.store.get_watermark(rule_id)? {
            Some(watermark) => RuleState::CaughtUp { watermark },
            None => RuleState::Uninitialized,
        })
    }

    /// Evaluate the pending transactions of a rule at time `now_ms`.
    pub async fn process_rule(&self, rule: &Rule, now_ms: u64) -> Result<EmitReport, ConnectorError> {
        let watermark = match self.rule_state(rule.id)? {
            RuleState::Uninitialized => {
                let max_id = self.store.max_transaction_id(rule.contract, rule.network_id)?;
                let watermark = self.store.advance_watermark(rule.id, max_id)?;
                info!(rule_id = rule.id, "New rule, watermark set to {}", watermark);
                self.notify(rule.id, watermark).await;
                return Ok(EmitReport {
                    initialized: true,
                    watermark,
                    ..EmitReport::default()
                });
            }
            RuleState::CaughtUp { watermark } => watermark,
        };

        let mut report = EmitReport {
            watermark,
            ..EmitReport::default()
        };
        let outcome = self.evaluate_pending(rule, now_ms, &mut report).await;

        if report.watermark > watermark {
            report.watermark = self.store.advance_watermark(rule.id, report.watermark)?;
            self.notify(rule.id, report.watermark).await;
        }
        outcome?;

        if report.considered > 0 {
            info!(
                rule_id = rule.id,
                "Evaluated {} transaction(s), {} match(es), watermark {}",
                report.considered,
                report.matched,
                report.watermark
            );
        }
        Ok(report)
    }

    /// Walk the transactions above `report.watermark`, moving it over every
    /// transaction that was fully evaluated.
    async fn evaluate_pending(
        &self,
        rule: &Rule,
        now_ms: u64,
        report: &mut EmitReport,
    ) -> Result<(), ConnectorError> {
        loop {
            let batch = self.store.transactions_after(
                rule.contract,
                rule.network_id,
                report.watermark,
                self.batch_size,
            )?;
            let exhausted = batch.len() < self.batch_size;

            for tx in &batch {
                let verdict = evaluate(rule, tx, now_ms);
                if let Verdict::HoldPending { ready_at_ms } = verdict {
                    debug!(
                        rule_id = rule.id,
                        transaction_id = tx.id,
                        "Hold period runs until {}, stopping here",
                        ready_at_ms
                    );
                    return Ok(());
                }

                if let Some(balance) = self.resolve(rule, tx, verdict).await? {
                    self.emit(rule, tx, balance).await;
                    report.matched += 1;
                }
                report.considered += 1;
                report.watermark = tx.id;
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    /// Turn a verdict into "emit" (`Some(token_balance)`) or "skip" (`None`).
    async fn resolve(
        &self,
        rule: &Rule,
        tx: &TransactionRecord,
        verdict: Verdict,
    ) -> Result<Option<Option<U256>>, ConnectorError> {
        match verdict {
            Verdict::Match(_) => Ok(Some(None)),
            Verdict::Skip | Verdict::HoldPending { .. } => Ok(None),
            Verdict::CheckBalance { holder, required } => {
                // Nothing ever left the holder's wallet: still held
                if !self
                    .store
                    .has_outgoing_transfers(rule.contract, rule.network_id, holder, tx.id)?
                {
                    return Ok(Some(None));
                }
                let balance = self.client.erc20_balance_of(rule.contract, holder).await?;
                if still_held(balance, required) {
                    Ok(Some(Some(balance)))
                } else {
                    debug!(
                        rule_id = rule.id,
                        transaction_id = tx.id,
                        "Holder balance {} below {}, no hold",
                        balance,
                        required
                    );
                    Ok(None)
                }
            }
        }
    }

    async fn emit(&self, rule: &Rule, tx: &TransactionRecord, token_balance: Option<U256>) {
        let trigger = build_trigger(rule, tx, token_balance);
        debug!(
            rule_id = rule.id,
            transaction_id = tx.id,
            tx_hash = %tx.transaction_hash,
            "Rule matched as {}",
            trigger.trigger_kind
        );
        self.dispatch.submit(OutboundEvent::Trigger(trigger)).await;
    }

    async fn notify(&self, rule_id: u64, transaction_id: u64) {
        self.dispatch
            .submit(OutboundEvent::WatermarkAdvanced {
                rule_id,
                transaction_id,
            })
            .await;
    }
}
