//! Rule matching
//!
//! Pure decision of whether a persisted transaction satisfies a rule. The only
//! input that needs the chain (a hold rule's current balance) is returned as a
//! [`Verdict::CheckBalance`] request for the caller to resolve.

use crate::records::{TransactionRecord, Trigger, TriggerKind};
use crate::rules::Rule;
use alloy_primitives::{Address, U256};

/// Outcome of evaluating one transaction against one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The transaction triggers the rule.
    Match(TriggerKind),
    /// The transaction does not trigger the rule.
    Skip,
    /// Hold rule whose holding period has not elapsed yet.
    HoldPending { ready_at_ms: u64 },
    /// Hold rule past its holding period: matches if `holder` still holds at
    /// least `required` tokens.
    CheckBalance { holder: Address, required: U256 },
}

/// (wallet, counterparty) of a transaction from the point of view of a
/// trigger kind.
pub fn parties(kind: TriggerKind, tx: &TransactionRecord) -> (Address, Address) {
    match kind {
        TriggerKind::Send => (tx.from, tx.to),
        TriggerKind::Receive | TriggerKind::Hold => (tx.to, tx.from),
    }
}

/// Evaluate a transaction against a rule at time `now_ms`.
pub fn evaluate(rule: &Rule, tx: &TransactionRecord, now_ms: u64) -> Verdict {
    if tx.contract != rule.contract || tx.network_id != rule.network_id {
        return Verdict::Skip;
    }

    let (wallet, counterparty) = parties(rule.kind, tx);

    // Mints have no sender wallet, burns no receiver
    if wallet == Address::ZERO {
        return Verdict::Skip;
    }

    if let Some(min_amount) = rule.min_amount {
        if tx.amount < min_amount {
            return Verdict::Skip;
        }
    }

    if let Some(target) = rule.target {
        if counterparty != target {
            return Verdict::Skip;
        }
    }

    match rule.kind {
        TriggerKind::Send | TriggerKind::Receive => Verdict::Match(rule.kind),
        TriggerKind::Hold => {
            let ready_at_ms = tx.sent_date.saturating_add(rule.hold_duration_ms);
            if now_ms < ready_at_ms {
                Verdict::HoldPending { ready_at_ms }
            } else {
                Verdict::CheckBalance {
                    holder: wallet,
                    required: tx.amount,
                }
            }
        }
    }
}

/// Whether a hold is still in place given the holder's current balance.
pub fn still_held(balance: U256, required: U256) -> bool {
    balance >= required
}

/// Build the outbound trigger of a matched transaction.
///
/// Send and receive triggers name the counterparty as their target. A hold
/// rewards the holder alone, so hold triggers carry no target.
pub fn build_trigger(rule: &Rule, tx: &TransactionRecord, token_balance: Option<U256>) -> Trigger {
    let (wallet, counterparty) = parties(rule.kind, tx);
    let target_address = match rule.kind {
        TriggerKind::Send | TriggerKind::Receive => Some(counterparty),
        TriggerKind::Hold => None,
    };
    Trigger {
        rule_id: rule.id,
        transaction_id: tx.id,
        trigger_kind: rule.kind,
        wallet_address: wallet,
        target_address,
        contract_address: tx.contract,
        network_id: tx.network_id,
        amount: tx.amount,
        sent_date: tx.sent_date,
        transaction_hash: tx.transaction_hash,
        token_balance,
    }
}
