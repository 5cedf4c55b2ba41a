//! Bank transactions and reconciliation matches.

use crate::models::account::PartnerKind;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BankTransactionStatus {
    Unmatched,
    Matched,
}

impl BankTransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::Matched => "matched",
        }
    }
}

impl FromStr for BankTransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unmatched" => Ok(Self::Unmatched),
            "matched" => Ok(Self::Matched),
            other => Err(format!("unknown bank transaction status '{}'", other)),
        }
    }
}

impl TryFrom<String> for BankTransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Imported bank line. `amount` is signed: incoming payments are positive.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BankTransaction {
    pub transaction_id: Uuid,
    pub tenant_id: Uuid,
    /// Stable key supplied by the bank feed; unique per tenant.
    pub external_id: String,
    pub bank_account: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub counterparty: Option<String>,
    pub reference: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: BankTransactionStatus,
    pub matched_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl BankTransaction {
    /// Incoming money settles customer items, outgoing money supplier items.
    pub fn ledger(&self) -> PartnerKind {
        if self.amount >= Decimal::ZERO {
            PartnerKind::Customer
        } else {
            PartnerKind::Supplier
        }
    }

    pub fn abs_amount(&self) -> Decimal {
        self.amount.abs()
    }
}

/// Bank line as delivered by the bank-feed collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBankTransaction {
    pub external_id: String,
    pub bank_account: String,
    pub transaction_date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    pub counterparty: Option<String>,
    pub reference: Option<String>,
}

/// Per-term contribution to a match score, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub amount: f64,
    pub date: f64,
    pub reference: f64,
    pub name: f64,
}

/// Portion of a bank transaction applied to one sub-ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub ledger: PartnerKind,
    pub entry_id: Uuid,
    pub amount: Decimal,
}

/// A scored pairing of one bank transaction with one or more open entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub transaction_id: Uuid,
    pub allocations: Vec<Allocation>,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

impl MatchCandidate {
    pub fn entry_ids(&self) -> Vec<Uuid> {
        self.allocations.iter().map(|a| a.entry_id).collect()
    }

    pub fn allocated(&self) -> Decimal {
        self.allocations.iter().map(|a| a.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Auto,
    Manual,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown match method '{}'", other)),
        }
    }
}

impl TryFrom<String> for MatchMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Row of `reconciliation_matches`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: Uuid,
    pub tenant_id: Uuid,
    pub bank_transaction_id: Uuid,
    #[sqlx(try_from = "String")]
    pub ledger: PartnerKind,
    pub entry_id: Uuid,
    pub amount: Decimal,
    pub score: Option<f64>,
    #[sqlx(try_from = "String")]
    pub method: MatchMethod,
    pub matched_by: String,
    pub matched_utc: DateTime<Utc>,
    pub unmatch_id: Option<Uuid>,
}

/// Row of `reconciliation_unmatches`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UnmatchRecord {
    pub unmatch_id: Uuid,
    pub tenant_id: Uuid,
    pub bank_transaction_id: Uuid,
    pub reason: String,
    pub unmatched_by: String,
    pub created_utc: DateTime<Utc>,
}

/// Result of a bank import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub auto_matched: u32,
    pub queued: u32,
    /// Transactions skipped because their external id was already imported.
    pub duplicates: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn txn(amount: Decimal) -> BankTransaction {
        BankTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            external_id: "ext-1".to_string(),
            bank_account: "1234.56.78901".to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2026, 1, 20).unwrap(),
            amount,
            currency: "NOK".to_string(),
            counterparty: None,
            reference: None,
            status: BankTransactionStatus::Unmatched,
            matched_utc: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_direction_selects_ledger() {
        assert_eq!(txn(dec!(100)).ledger(), PartnerKind::Customer);
        assert_eq!(txn(dec!(-100)).ledger(), PartnerKind::Supplier);
        assert_eq!(txn(dec!(-100)).abs_amount(), dec!(100));
    }

    #[test]
    fn test_candidate_allocated_total() {
        let candidate = MatchCandidate {
            transaction_id: Uuid::nil(),
            allocations: vec![
                Allocation {
                    ledger: PartnerKind::Customer,
                    entry_id: Uuid::new_v4(),
                    amount: dec!(300),
                },
                Allocation {
                    ledger: PartnerKind::Customer,
                    entry_id: Uuid::new_v4(),
                    amount: dec!(200),
                },
            ],
            score: 0.8,
            breakdown: ScoreBreakdown::default(),
        };
        assert_eq!(candidate.allocated(), dec!(500));
        assert_eq!(candidate.entry_ids().len(), 2);
    }
}
