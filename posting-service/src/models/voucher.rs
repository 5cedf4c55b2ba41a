//! Voucher (journal entry) model for double-entry accounting.

use crate::models::amount::DebitCredit;
use crate::models::candidate::{SourceKind, SourceRef};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Voucher lifecycle: `draft -> posted` or `draft -> rejected`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherStatus {
    Draft,
    Posted,
    Rejected,
}

impl VoucherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Posted => "posted",
            Self::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(&self, next: VoucherStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Posted) | (Self::Draft, Self::Rejected)
        )
    }
}

impl FromStr for VoucherStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "posted" => Ok(Self::Posted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown voucher status '{}'", other)),
        }
    }
}

impl TryFrom<String> for VoucherStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One line of a voucher. Exactly one of `debit` / `credit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct VoucherLine {
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
    /// Set on the single automatic rounding line, if one was added.
    pub is_rounding: bool,
}

impl VoucherLine {
    /// Net effect on the account: debit minus credit.
    pub fn signed_amount(&self) -> Decimal {
        self.debit - self.credit
    }
}

impl DebitCredit for VoucherLine {
    fn debit(&self) -> Decimal {
        self.debit
    }
    fn credit(&self) -> Decimal {
        self.credit
    }
}

/// A voucher as built in memory, before and after posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voucher {
    pub voucher_id: Uuid,
    pub tenant_id: Uuid,
    pub accounting_date: NaiveDate,
    pub description: String,
    pub currency: String,
    pub source: SourceRef,
    pub lines: Vec<VoucherLine>,
    pub status: VoucherStatus,
}

impl Voucher {
    /// Sum of all debit lines.
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(|l| l.debit).sum()
    }

    /// Lines posted against `account_code`.
    pub fn lines_on<'a>(&'a self, account_code: &'a str) -> impl Iterator<Item = &'a VoucherLine> {
        self.lines.iter().filter(move |l| l.account_code == account_code)
    }

    /// Build the reversing voucher for a posted one: same accounts, sides swapped.
    pub fn reversal(&self, accounting_date: NaiveDate, description: String) -> Voucher {
        Voucher {
            voucher_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            accounting_date,
            description,
            currency: self.currency.clone(),
            source: SourceRef::Reversal {
                original_voucher_id: self.voucher_id,
            },
            lines: self
                .lines
                .iter()
                .map(|l| VoucherLine {
                    account_code: l.account_code.clone(),
                    debit: l.credit,
                    credit: l.debit,
                    description: l.description.clone(),
                    is_rounding: l.is_rounding,
                })
                .collect(),
            status: VoucherStatus::Draft,
        }
    }
}

/// Header row of a posted voucher (`vouchers`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VoucherRow {
    pub voucher_id: Uuid,
    pub tenant_id: Uuid,
    pub sequence_number: i64,
    pub accounting_date: NaiveDate,
    pub description: String,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub source_type: SourceKind,
    pub source_id: Option<Uuid>,
    #[sqlx(json)]
    pub source: SourceRef,
    #[sqlx(try_from = "String")]
    pub status: VoucherStatus,
    pub posted_utc: DateTime<Utc>,
}

impl VoucherRow {
    pub fn into_voucher(self, lines: Vec<VoucherLine>) -> Voucher {
        Voucher {
            voucher_id: self.voucher_id,
            tenant_id: self.tenant_id,
            accounting_date: self.accounting_date,
            description: self.description,
            currency: self.currency,
            source: self.source,
            lines,
            status: self.status,
        }
    }
}

/// Result of a successful post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedVoucher {
    pub voucher_id: Uuid,
    pub tenant_id: Uuid,
    pub sequence_number: i64,
    pub posted_utc: DateTime<Utc>,
    /// Sub-ledger entries created by the fan-out.
    pub created_entries: Vec<Uuid>,
    /// Sub-ledger entries reduced by a reversal.
    pub reduced_entries: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(code: &str, debit: Decimal, credit: Decimal) -> VoucherLine {
        VoucherLine {
            account_code: code.to_string(),
            debit,
            credit,
            description: None,
            is_rounding: false,
        }
    }

    fn voucher() -> Voucher {
        Voucher {
            voucher_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            accounting_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            description: "Office rent".to_string(),
            currency: "NOK".to_string(),
            source: SourceRef::Manual,
            lines: vec![
                line("6300", dec!(10000), Decimal::ZERO),
                line("2740", dec!(2500), Decimal::ZERO),
                line("2400", Decimal::ZERO, dec!(12500)),
            ],
            status: VoucherStatus::Posted,
        }
    }

    #[test]
    fn test_status_transitions_are_terminal() {
        assert!(VoucherStatus::Draft.can_transition_to(VoucherStatus::Posted));
        assert!(VoucherStatus::Draft.can_transition_to(VoucherStatus::Rejected));
        assert!(!VoucherStatus::Posted.can_transition_to(VoucherStatus::Draft));
        assert!(!VoucherStatus::Posted.can_transition_to(VoucherStatus::Rejected));
        assert!(!VoucherStatus::Rejected.can_transition_to(VoucherStatus::Posted));
    }

    #[test]
    fn test_reversal_swaps_sides_and_references_original() {
        let original = voucher();
        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let reversal = original.reversal(date, "Reversal".to_string());

        assert_eq!(reversal.status, VoucherStatus::Draft);
        assert_eq!(
            reversal.source,
            SourceRef::Reversal {
                original_voucher_id: original.voucher_id
            }
        );
        assert_eq!(reversal.lines[0].credit, dec!(10000));
        assert_eq!(reversal.lines[2].debit, dec!(12500));
        assert_eq!(reversal.total(), original.total());
    }

    #[test]
    fn test_lines_on_control_account() {
        let v = voucher();
        let control: Vec<_> = v.lines_on("2400").collect();
        assert_eq!(control.len(), 1);
        assert_eq!(control[0].signed_amount(), dec!(-12500));
    }
}
