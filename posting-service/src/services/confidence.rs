//! Confidence scoring for posting candidates.
//!
//! The score combines the opaque classifier signal with deterministic rule
//! checks. Rule checks are pure functions of the candidate and the chart of
//! accounts, so the same input always produces the same score.

use crate::models::amount::{minor_unit, within_tolerance};
use crate::models::{AccountType, ChartOfAccounts, PostingCandidate, Priority, SourceRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scores below this are reviewed at high priority.
pub const MEDIUM_PRIORITY_FLOOR: i16 = 70;

/// Base used when the classifier gave no signal.
const NEUTRAL_BASE: f64 = 50.0;

const PASS_WEIGHT: i32 = 2;
const ARITHMETIC_FAIL_WEIGHT: i32 = -30;
const COMPLETENESS_FAIL_WEIGHT: i32 = -40;
const PLAUSIBILITY_FAIL_WEIGHT: i32 = -25;

/// Source of the classifier's confidence. Replaceable without touching the
/// rule-based checks.
pub trait ExtractionSignal: Send + Sync {
    /// Confidence on a 0-100 scale, or `None` when the classifier has no opinion.
    fn confidence(&self, candidate: &PostingCandidate) -> Option<f64>;
}

/// Reads the confidence the upstream extractor attached to the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractorConfidence;

impl ExtractionSignal for ExtractorConfidence {
    fn confidence(&self, candidate: &PostingCandidate) -> Option<f64> {
        candidate
            .extractor_confidence
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(0.0, 100.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Arithmetic,
    Completeness,
    Plausibility,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub passed: bool,
    pub weight: i32,
    pub detail: String,
}

impl CheckResult {
    fn pass(kind: CheckKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            passed: true,
            weight: PASS_WEIGHT,
            detail: detail.into(),
        }
    }

    fn fail(kind: CheckKind, weight: i32, detail: impl Into<String>) -> Self {
        Self {
            kind,
            passed: false,
            weight,
            detail: detail.into(),
        }
    }
}

/// Aggregate confidence in [0, 100] with the checks that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: i16,
    pub base: f64,
    pub checks: Vec<CheckResult>,
}

/// Routing decision for a scored candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triage {
    AutoPost,
    Review(Priority),
}

impl Triage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoPost => "auto_post",
            Self::Review(Priority::High) => "review_high",
            Self::Review(Priority::Medium) => "review_medium",
            Self::Review(Priority::Low) => "review_low",
        }
    }
}

impl Score {
    pub fn triage(&self, threshold: i16) -> Triage {
        if self.value >= threshold {
            Triage::AutoPost
        } else if self.value >= MEDIUM_PRIORITY_FLOOR {
            Triage::Review(Priority::Medium)
        } else {
            Triage::Review(Priority::High)
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }

    pub fn checks_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.checks).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Clone)]
pub struct ConfidenceEvaluator {
    signal: Arc<dyn ExtractionSignal>,
}

impl Default for ConfidenceEvaluator {
    fn default() -> Self {
        Self::new(Arc::new(ExtractorConfidence))
    }
}

impl ConfidenceEvaluator {
    pub fn new(signal: Arc<dyn ExtractionSignal>) -> Self {
        Self { signal }
    }

    /// Score `candidate`. Never mutates anything.
    pub fn evaluate(
        &self,
        candidate: &PostingCandidate,
        chart: &ChartOfAccounts,
        minor_units: u32,
    ) -> Score {
        let base = self.signal.confidence(candidate).unwrap_or(NEUTRAL_BASE);
        let checks = vec![
            arithmetic_check(candidate, minor_unit(minor_units)),
            completeness_check(candidate),
            plausibility_check(candidate, chart),
        ];

        let adjustment: i32 = checks.iter().map(|c| c.weight).sum();
        let value = (base + f64::from(adjustment)).round().clamp(0.0, 100.0) as i16;

        Score {
            value,
            base,
            checks,
        }
    }
}

/// Document totals must add up: excl + VAT == total within one minor unit.
/// Without VAT the check degrades to excl == total.
fn arithmetic_check(candidate: &PostingCandidate, tolerance: Decimal) -> CheckResult {
    let vat = &candidate.vat;
    let vat_amount = vat.vat_amount.filter(|v| !v.is_zero());

    match (vat.amount_excl_vat, vat_amount, vat.total) {
        (Some(excl), Some(vat_amount), Some(total)) => {
            if within_tolerance(excl + vat_amount, total, tolerance) {
                CheckResult::pass(CheckKind::Arithmetic, "excl + vat matches total")
            } else {
                CheckResult::fail(
                    CheckKind::Arithmetic,
                    ARITHMETIC_FAIL_WEIGHT,
                    format!(
                        "excl {} + vat {} = {} does not match total {}",
                        excl,
                        vat_amount,
                        excl + vat_amount,
                        total
                    ),
                )
            }
        }
        (_, Some(_), _) => CheckResult::fail(
            CheckKind::Arithmetic,
            ARITHMETIC_FAIL_WEIGHT,
            "vat amount given without both excl and total",
        ),
        (Some(excl), None, Some(total)) => {
            if within_tolerance(excl, total, tolerance) {
                CheckResult::pass(CheckKind::Arithmetic, "zero-rated: excl matches total")
            } else {
                CheckResult::fail(
                    CheckKind::Arithmetic,
                    ARITHMETIC_FAIL_WEIGHT,
                    format!("zero-rated: excl {} does not match total {}", excl, total),
                )
            }
        }
        _ => CheckResult::pass(CheckKind::Arithmetic, "no document totals to compare"),
    }
}

fn completeness_check(candidate: &PostingCandidate) -> CheckResult {
    let mut missing = Vec::new();

    if candidate.accounting_date.is_none() {
        missing.push("accounting_date".to_string());
    }
    if candidate.lines.is_empty() {
        missing.push("lines".to_string());
    }
    for (index, line) in candidate.lines.iter().enumerate() {
        if line
            .account_code
            .as_deref()
            .map_or(true, |code| code.trim().is_empty())
        {
            missing.push(format!("lines[{}].account_code", index));
        }
        if line.debit.is_zero() && line.credit.is_zero() {
            missing.push(format!("lines[{}].amount", index));
        }
    }

    if missing.is_empty() {
        CheckResult::pass(CheckKind::Completeness, "all mandatory fields present")
    } else {
        CheckResult::fail(
            CheckKind::Completeness,
            COMPLETENESS_FAIL_WEIGHT,
            format!("missing {}", missing.join(", ")),
        )
    }
}

/// Every account must exist and suit the side it is posted on. Lines without
/// an account code are left to the completeness check.
fn plausibility_check(candidate: &PostingCandidate, chart: &ChartOfAccounts) -> CheckResult {
    let mut problems = Vec::new();

    for line in &candidate.lines {
        let Some(code) = line.account_code.as_deref() else {
            continue;
        };
        match chart.resolve(code) {
            None => problems.push(format!("account {} is not in the chart", code.trim())),
            Some(account) => {
                let is_debit = !line.debit.is_zero();
                if !direction_compatible(&candidate.source, account.account_type, is_debit) {
                    problems.push(format!(
                        "{} account {} on the {} side",
                        account.account_type,
                        account.account_code,
                        if is_debit { "debit" } else { "credit" }
                    ));
                }
            }
        }
    }

    if problems.is_empty() {
        CheckResult::pass(CheckKind::Plausibility, "accounts exist and fit direction")
    } else {
        CheckResult::fail(
            CheckKind::Plausibility,
            PLAUSIBILITY_FAIL_WEIGHT,
            problems.join("; "),
        )
    }
}

fn direction_compatible(source: &SourceRef, account_type: AccountType, is_debit: bool) -> bool {
    match source {
        // Purchases debit cost or asset accounts and credit payables.
        SourceRef::SupplierInvoice { .. } => match (account_type, is_debit) {
            (AccountType::Revenue, true) => false,
            (AccountType::Expense, false) => false,
            _ => true,
        },
        // Sales debit receivables and credit revenue and output VAT.
        SourceRef::CustomerInvoice { .. } => account_type != AccountType::Expense,
        SourceRef::Reversal { .. } | SourceRef::Manual => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateLine, ChartAccount, VatBreakdown};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
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
            account("3000", AccountType::Revenue),
            account("1500", AccountType::Asset),
        ])
    }

    fn supplier_candidate(confidence: Option<f64>) -> PostingCandidate {
        PostingCandidate {
            tenant_id: Uuid::nil(),
            source: SourceRef::SupplierInvoice {
                document_id: Uuid::nil(),
                invoice_number: "INV-1".to_string(),
                vendor_ref: None,
                vendor_name: None,
                payment_reference: None,
                due_date: None,
            },
            accounting_date: NaiveDate::from_ymd_opt(2026, 1, 15),
            description: "Office rent".to_string(),
            currency: "NOK".to_string(),
            lines: vec![
                CandidateLine::debit("6300", dec!(10000)),
                CandidateLine::debit("2740", dec!(2500)),
                CandidateLine::credit("2400", dec!(12500)),
            ],
            vat: VatBreakdown {
                amount_excl_vat: Some(dec!(10000)),
                vat_amount: Some(dec!(2500)),
                total: Some(dec!(12500)),
            },
            extractor_confidence: confidence,
        }
    }

    #[test]
    fn test_clean_candidate_auto_posts() {
        let score =
            ConfidenceEvaluator::default().evaluate(&supplier_candidate(Some(92.0)), &chart(), 2);
        assert_eq!(score.failed().count(), 0);
        assert!(score.value >= 92);
        assert_eq!(score.triage(85), Triage::AutoPost);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let evaluator = ConfidenceEvaluator::default();
        let candidate = supplier_candidate(Some(81.5));
        assert_eq!(
            evaluator.evaluate(&candidate, &chart(), 2),
            evaluator.evaluate(&candidate, &chart(), 2)
        );
    }

    #[test]
    fn test_vat_mismatch_fails_arithmetic() {
        let mut candidate = supplier_candidate(Some(92.0));
        candidate.vat.total = Some(dec!(2500));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        let failed: Vec<_> = score.failed().map(|c| c.kind).collect();
        assert_eq!(failed, vec![CheckKind::Arithmetic]);
        assert_eq!(score.triage(85), Triage::Review(Priority::High));
    }

    #[test]
    fn test_one_minor_unit_rounding_is_tolerated() {
        let mut candidate = supplier_candidate(Some(92.0));
        candidate.vat.total = Some(dec!(12500.01));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.failed().count(), 0);
    }

    #[test]
    fn test_zero_rated_compares_excl_to_total() {
        let mut candidate = supplier_candidate(Some(92.0));
        candidate.lines = vec![
            CandidateLine::debit("6300", dec!(10000)),
            CandidateLine::credit("2400", dec!(10000)),
        ];
        candidate.vat = VatBreakdown {
            amount_excl_vat: Some(dec!(10000)),
            vat_amount: Some(Decimal::ZERO),
            total: Some(dec!(10000)),
        };
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.failed().count(), 0);

        candidate.vat.total = Some(dec!(12500));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.failed().count(), 1);
    }

    #[test]
    fn test_missing_account_fails_completeness() {
        let mut candidate = supplier_candidate(Some(95.0));
        candidate.lines[0].account_code = None;
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        let failed: Vec<_> = score.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind, CheckKind::Completeness);
        assert!(failed[0].detail.contains("lines[0].account_code"));
    }

    #[test]
    fn test_unknown_or_misdirected_account_fails_plausibility() {
        let mut candidate = supplier_candidate(Some(90.0));
        candidate.lines[0] = CandidateLine::debit("9999", dec!(10000));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.failed().next().map(|c| c.kind), Some(CheckKind::Plausibility));

        let mut candidate = supplier_candidate(Some(95.0));
        candidate.lines[0] = CandidateLine::debit("3000", dec!(10000));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.failed().next().map(|c| c.kind), Some(CheckKind::Plausibility));
        assert_eq!(score.triage(85), Triage::Review(Priority::Medium));
    }

    #[test]
    fn test_missing_signal_uses_neutral_base_and_clamps() {
        let score =
            ConfidenceEvaluator::default().evaluate(&supplier_candidate(None), &chart(), 2);
        assert_eq!(score.base, NEUTRAL_BASE);

        let mut candidate = supplier_candidate(Some(5.0));
        candidate.accounting_date = None;
        candidate.lines[0] = CandidateLine::debit("9999", dec!(1));
        let score = ConfidenceEvaluator::default().evaluate(&candidate, &chart(), 2);
        assert_eq!(score.value, 0);
    }

    struct FixedSignal(f64);

    impl ExtractionSignal for FixedSignal {
        fn confidence(&self, _candidate: &PostingCandidate) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn test_signal_is_replaceable() {
        let evaluator = ConfidenceEvaluator::new(Arc::new(FixedSignal(68.0)));
        let score = evaluator.evaluate(&supplier_candidate(Some(99.0)), &chart(), 2);
        assert_eq!(score.base, 68.0);
        assert_eq!(score.triage(85), Triage::Review(Priority::Medium));
    }
}
