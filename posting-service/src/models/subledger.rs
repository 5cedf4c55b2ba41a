//! Supplier and customer sub-ledger entries.
//!
//! `remaining_amount` only ever goes down. Every change is mirrored by an
//! append-only row in the ledger's `_transactions` table, so the stored
//! balance can always be re-derived as a fold over that history.

use crate::models::account::PartnerKind;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

impl PartnerKind {
    /// Table holding this side's sub-ledger entries.
    pub fn ledger_table(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier_ledger",
            Self::Customer => "customer_ledger",
        }
    }

    /// Append-only history table for this side.
    pub fn transactions_table(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier_ledger_transactions",
            Self::Customer => "customer_ledger_transactions",
        }
    }
}

/// `open -> partially_paid -> paid` or `open -> paid`. Never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubLedgerStatus {
    Open,
    PartiallyPaid,
    Paid,
}

impl SubLedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
        }
    }

    /// Status implied by a remaining balance.
    pub fn for_remaining(original: Decimal, remaining: Decimal) -> Self {
        if remaining <= Decimal::ZERO {
            Self::Paid
        } else if remaining < original {
            Self::PartiallyPaid
        } else {
            Self::Open
        }
    }
}

impl FromStr for SubLedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "paid" => Ok(Self::Paid),
            other => Err(format!("unknown sub-ledger status '{}'", other)),
        }
    }
}

impl TryFrom<String> for SubLedgerStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An open (or settled) item in the supplier or customer sub-ledger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubLedgerEntry {
    pub entry_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub ledger: PartnerKind,
    pub partner_id: Option<Uuid>,
    /// Partner master-data name, or the name printed on the source document.
    pub partner_name: Option<String>,
    pub voucher_id: Uuid,
    pub invoice_reference: String,
    pub reference_code: Option<String>,
    pub currency: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub original_amount: Decimal,
    pub remaining_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: SubLedgerStatus,
    /// Set when this entry reinstates an amount released by an unmatch.
    pub reinstates_entry_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReductionError {
    #[error("reduction amount must be positive, got {amount}")]
    NonPositive { amount: Decimal },

    #[error("reduction of {amount} exceeds remaining amount {remaining}")]
    ExceedsRemaining { amount: Decimal, remaining: Decimal },

    #[error("entry is already paid")]
    AlreadyPaid,
}

/// Outcome of applying a reduction to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    pub amount: Decimal,
    pub new_remaining: Decimal,
    pub new_status: SubLedgerStatus,
}

impl SubLedgerEntry {
    /// Compute the effect of reducing this entry by `amount`.
    pub fn reduce(&self, amount: Decimal) -> Result<Reduction, ReductionError> {
        reduce_remaining(self.original_amount, self.remaining_amount, self.status, amount)
    }

    pub fn is_open(&self) -> bool {
        self.status != SubLedgerStatus::Paid
    }

    /// Due date when known, otherwise the invoice date.
    pub fn reference_date(&self) -> NaiveDate {
        self.due_date.unwrap_or(self.invoice_date)
    }
}

/// Pure reduction rule shared by payments and reversals.
pub fn reduce_remaining(
    original: Decimal,
    remaining: Decimal,
    status: SubLedgerStatus,
    amount: Decimal,
) -> Result<Reduction, ReductionError> {
    if status == SubLedgerStatus::Paid {
        return Err(ReductionError::AlreadyPaid);
    }
    if amount <= Decimal::ZERO {
        return Err(ReductionError::NonPositive { amount });
    }
    if amount > remaining {
        return Err(ReductionError::ExceedsRemaining { amount, remaining });
    }
    let new_remaining = remaining - amount;
    Ok(Reduction {
        amount,
        new_remaining,
        new_status: SubLedgerStatus::for_remaining(original, new_remaining),
    })
}

/// Kind of balance-affecting event recorded against an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubLedgerTransactionKind {
    Invoice,
    Payment,
    Adjustment,
    Reversal,
}

impl SubLedgerTransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Payment => "payment",
            Self::Adjustment => "adjustment",
            Self::Reversal => "reversal",
        }
    }
}

impl FromStr for SubLedgerTransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(Self::Invoice),
            "payment" => Ok(Self::Payment),
            "adjustment" => Ok(Self::Adjustment),
            "reversal" => Ok(Self::Reversal),
            other => Err(format!("unknown sub-ledger transaction kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for SubLedgerTransactionKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Append-only history row. Invoice amounts are positive, reductions negative.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubLedgerTransaction {
    pub transaction_id: Uuid,
    pub entry_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: SubLedgerTransactionKind,
    pub amount: Decimal,
    pub voucher_id: Option<Uuid>,
    pub bank_transaction_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// Replay an entry's history in order. Returns the folded remaining amount,
/// or a description of the first violation found.
pub fn fold_history(history: &[SubLedgerTransaction]) -> Result<Decimal, String> {
    let mut iter = history.iter();
    let opening = match iter.next() {
        Some(t) if t.kind == SubLedgerTransactionKind::Invoice && t.amount > Decimal::ZERO => {
            t.amount
        }
        Some(t) => {
            return Err(format!(
                "history must open with a positive invoice row, found {} of {}",
                t.kind.as_str(),
                t.amount
            ))
        }
        None => return Err("entry has no history".to_string()),
    };

    let mut running = opening;
    for t in iter {
        if t.kind == SubLedgerTransactionKind::Invoice || t.amount >= Decimal::ZERO {
            return Err(format!(
                "transaction {} would not reduce the balance ({} of {})",
                t.transaction_id,
                t.kind.as_str(),
                t.amount
            ));
        }
        running += t.amount;
        if running < Decimal::ZERO {
            return Err(format!(
                "transaction {} drives the balance below zero",
                t.transaction_id
            ));
        }
    }
    Ok(running)
}

/// Entry whose stored balance disagrees with its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyIssue {
    pub ledger: PartnerKind,
    pub entry_id: Uuid,
    pub stored_remaining: Decimal,
    pub folded_remaining: Option<Decimal>,
    pub detail: String,
}
