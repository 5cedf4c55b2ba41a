//! Property tests for the balance invariant and sub-ledger reductions.

use chrono::{NaiveDate, Utc};
use posting_service::error::ValidationError;
use posting_service::models::{
    fold_history, reduce_remaining, AccountType, CandidateLine, ChartAccount, ChartOfAccounts,
    PostingCandidate, SourceRef, SubLedgerStatus, SubLedgerTransaction,
    SubLedgerTransactionKind, TenantSettings, VatBreakdown, VoucherLine,
};
use posting_service::models::amount::is_balanced;
use posting_service::services::{validate_lines, VoucherBuilder};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn chart() -> ChartOfAccounts {
    let account = |code: &str, account_type| ChartAccount {
        tenant_id: Uuid::nil(),
        account_code: code.to_string(),
        name: code.to_string(),
        account_type,
        is_active: true,
    };
    ChartOfAccounts::new(vec![
        account("6300", AccountType::Expense),
        account("2740", AccountType::Liability),
        account("2400", AccountType::Liability),
        account("7790", AccountType::Expense),
    ])
}

fn minor(units: i64) -> Decimal {
    Decimal::new(units, 2)
}

fn voucher_lines(debits: &[i64], credit: i64) -> Vec<VoucherLine> {
    let mut lines: Vec<VoucherLine> = debits
        .iter()
        .map(|d| VoucherLine {
            account_code: "6300".to_string(),
            debit: minor(*d),
            credit: Decimal::ZERO,
            description: None,
            is_rounding: false,
        })
        .collect();
    lines.push(VoucherLine {
        account_code: "2400".to_string(),
        debit: Decimal::ZERO,
        credit: minor(credit),
        description: None,
        is_rounding: false,
    });
    lines
}

fn candidate(debits: &[i64], credit: i64) -> PostingCandidate {
    let mut lines: Vec<CandidateLine> = debits
        .iter()
        .map(|d| CandidateLine::debit("6300", minor(*d)))
        .collect();
    lines.push(CandidateLine::credit("2400", minor(credit)));

    PostingCandidate {
        tenant_id: Uuid::nil(),
        source: SourceRef::Manual,
        accounting_date: NaiveDate::from_ymd_opt(2026, 1, 15),
        description: "generated".to_string(),
        currency: "NOK".to_string(),
        lines,
        vat: VatBreakdown::default(),
        extractor_confidence: None,
    }
}

fn history_row(kind: SubLedgerTransactionKind, amount: Decimal) -> SubLedgerTransaction {
    SubLedgerTransaction {
        transaction_id: Uuid::new_v4(),
        entry_id: Uuid::nil(),
        tenant_id: Uuid::nil(),
        kind,
        amount,
        voucher_id: None,
        bank_transaction_id: None,
        created_utc: Utc::now(),
    }
}

proptest! {
    #[test]
    fn balanced_line_sets_are_accepted(debits in prop::collection::vec(1i64..10_000_000, 1..6)) {
        let total: i64 = debits.iter().sum();
        let lines = voucher_lines(&debits, total);
        prop_assert!(validate_lines(&lines, &chart()).is_ok());
    }

    #[test]
    fn unbalanced_line_sets_are_rejected(
        debits in prop::collection::vec(1i64..10_000_000, 1..6),
        delta in prop_oneof![-1_000_000i64..0, 1i64..1_000_000],
    ) {
        let total: i64 = debits.iter().sum();
        prop_assume!(total + delta > 0);

        let lines = voucher_lines(&debits, total + delta);
        match validate_lines(&lines, &chart()) {
            Err(ValidationError::Unbalanced { difference, .. }) => {
                prop_assert_eq!(difference, minor(delta.abs()));
            }
            other => prop_assert!(false, "expected Unbalanced, got {:?}", other),
        }
    }

    #[test]
    fn builder_never_emits_an_unbalanced_voucher(
        debits in prop::collection::vec(1i64..10_000_000, 1..6),
        delta in -100i64..100,
    ) {
        let total: i64 = debits.iter().sum();
        let settings = TenantSettings::defaults(Uuid::nil());
        let result = VoucherBuilder::new(&settings).build(&candidate(&debits, total + delta), &chart());

        // Rounding tolerance is 0.05, i.e. five minor units.
        if delta.abs() <= 5 {
            let voucher = result.expect("residual within tolerance is absorbed");
            prop_assert!(is_balanced(&voucher.lines));
            let rounding = voucher.lines.iter().filter(|l| l.is_rounding).count();
            prop_assert_eq!(rounding, usize::from(delta != 0));
        } else {
            let is_unbalanced = matches!(result, Err(ValidationError::Unbalanced { .. }));
            prop_assert!(is_unbalanced);
        }
    }

    #[test]
    fn remaining_amount_never_increases(
        original in 1i64..100_000_000,
        reductions in prop::collection::vec(1i64..50_000_000, 0..12),
    ) {
        let original = minor(original);
        let mut remaining = original;
        let mut status = SubLedgerStatus::Open;
        let mut history = vec![history_row(SubLedgerTransactionKind::Invoice, original)];

        for amount in reductions.into_iter().map(minor) {
            match reduce_remaining(original, remaining, status, amount) {
                Ok(reduction) => {
                    prop_assert!(reduction.new_remaining <= remaining);
                    prop_assert!(reduction.new_remaining >= Decimal::ZERO);
                    remaining = reduction.new_remaining;
                    status = reduction.new_status;
                    history.push(history_row(SubLedgerTransactionKind::Payment, -amount));
                }
                Err(_) => {
                    // Refused reductions leave the entry untouched.
                    prop_assert!(amount > remaining || status == SubLedgerStatus::Paid);
                }
            }
            prop_assert_eq!(fold_history(&history), Ok(remaining));
        }

        prop_assert_eq!(status, SubLedgerStatus::for_remaining(original, remaining));
    }
}
