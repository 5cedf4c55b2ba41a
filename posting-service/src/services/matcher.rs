//! Scoring of bank transactions against open sub-ledger entries.
//!
//! Pure: callers load the open entries and persist whatever is confirmed.

use crate::models::reference::references_match;
use crate::models::{Allocation, BankTransaction, MatchCandidate, ScoreBreakdown, SubLedgerEntry};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use strsim::jaro_winkler;

pub const REFERENCE_WEIGHT: f64 = 0.40;
pub const AMOUNT_WEIGHT: f64 = 0.35;
pub const NAME_WEIGHT: f64 = 0.15;
pub const DATE_WEIGHT: f64 = 0.10;

/// Lowest score of an exact reference on an exact amount, whatever the date
/// and name say. Clears the default auto-match threshold of 0.90.
pub const EXACT_REFERENCE_FLOOR: f64 = 0.95;

/// Amount term for a reference-matched payment that covers only part of the entry.
const PARTIAL_PAYMENT_AMOUNT_TERM: f64 = 0.5;

/// Bounds on the many-to-one search.
const MAX_SUBSET_POOL: usize = 16;
const MAX_SUBSET_CANDIDATES: usize = 20;

const COMPANY_SUFFIXES: &[&str] = &["as", "asa", "ab", "aps", "ltd", "inc", "gmbh", "llc", "oy"];

#[derive(Debug, Clone, PartialEq)]
pub enum MatchDecision {
    AutoConfirm(MatchCandidate),
    /// Ranked candidates for a reviewer; empty when nothing qualified.
    Review(Vec<MatchCandidate>),
}

#[derive(Debug, Clone)]
pub struct Matcher {
    pub amount_tolerance: Decimal,
    pub date_window_days: i64,
    pub date_cutoff_days: i64,
    pub ambiguity_margin: f64,
    pub max_subset_size: usize,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::ONE,
            date_window_days: 3,
            date_cutoff_days: 45,
            ambiguity_margin: 0.05,
            max_subset_size: 4,
        }
    }
}

impl Matcher {
    /// Score every way `txn` can settle `entries`, best first.
    pub fn rank(&self, txn: &BankTransaction, entries: &[SubLedgerEntry]) -> Vec<MatchCandidate> {
        let ledger = txn.ledger();
        let eligible: Vec<&SubLedgerEntry> = entries
            .iter()
            .filter(|e| {
                e.ledger == ledger && e.is_open() && e.currency.eq_ignore_ascii_case(&txn.currency)
            })
            .collect();

        let mut ranked: Vec<MatchCandidate> = eligible
            .iter()
            .filter_map(|entry| self.score_single(txn, entry))
            .collect();
        ranked.extend(self.score_subsets(txn, &eligible));

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.allocations.len().cmp(&b.allocations.len()))
                .then_with(|| a.entry_ids().cmp(&b.entry_ids()))
        });
        ranked
    }

    /// Auto-confirm only a clear winner: at or above `threshold` and more than
    /// the ambiguity margin ahead of the runner-up.
    pub fn decide(&self, ranked: &[MatchCandidate], threshold: f64) -> MatchDecision {
        let Some(best) = ranked.first() else {
            return MatchDecision::Review(Vec::new());
        };
        let clear = match ranked.get(1) {
            Some(second) => best.score - second.score > self.ambiguity_margin,
            None => true,
        };
        if best.score >= threshold && clear {
            MatchDecision::AutoConfirm(best.clone())
        } else {
            MatchDecision::Review(ranked.to_vec())
        }
    }

    fn score_single(&self, txn: &BankTransaction, entry: &SubLedgerEntry) -> Option<MatchCandidate> {
        let paid = txn.abs_amount();
        let remaining = entry.remaining_amount;
        let reference = reference_term(txn, entry);

        let (amount, allocated) = match self.amount_term((remaining - paid).abs()) {
            Some(term) => (term, paid.min(remaining)),
            None if reference > 0.0 && paid < remaining => (PARTIAL_PAYMENT_AMOUNT_TERM, paid),
            None => return None,
        };

        let name = name_term(txn.counterparty.as_deref(), entry.partner_name.as_deref());
        let breakdown = ScoreBreakdown {
            amount,
            date: self.date_term(txn.transaction_date, entry.reference_date()),
            reference,
            name: name.unwrap_or(0.0),
        };

        Some(MatchCandidate {
            transaction_id: txn.transaction_id,
            allocations: vec![Allocation {
                ledger: entry.ledger,
                entry_id: entry.entry_id,
                amount: allocated,
            }],
            score: combine(&breakdown, name.is_some()),
            breakdown,
        })
    }

    /// Two or more entries whose remaining amounts add up to the payment.
    fn score_subsets(&self, txn: &BankTransaction, eligible: &[&SubLedgerEntry]) -> Vec<MatchCandidate> {
        if self.max_subset_size < 2 {
            return Vec::new();
        }
        let paid = txn.abs_amount();

        let mut pool: Vec<&SubLedgerEntry> = eligible
            .iter()
            .copied()
            .filter(|e| e.remaining_amount < paid)
            .collect();
        if pool.len() < 2 {
            return Vec::new();
        }
        if pool.len() > MAX_SUBSET_POOL {
            let affinity = |e: &SubLedgerEntry| {
                name_term(txn.counterparty.as_deref(), e.partner_name.as_deref()).unwrap_or(0.0)
                    + self.date_term(txn.transaction_date, e.reference_date())
            };
            pool.sort_by(|a, b| affinity(*b).total_cmp(&affinity(*a)));
            pool.truncate(MAX_SUBSET_POOL);
        }
        pool.sort_by(|a, b| {
            a.remaining_amount
                .cmp(&b.remaining_amount)
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });

        let mut subsets = Vec::new();
        let mut picked = Vec::new();
        self.search(&pool, 0, &mut picked, Decimal::ZERO, paid, &mut subsets);

        subsets
            .into_iter()
            .filter_map(|indices| {
                let members: Vec<&SubLedgerEntry> = indices.iter().map(|&i| pool[i]).collect();
                self.score_subset(txn, &members)
            })
            .collect()
    }

    fn search(
        &self,
        pool: &[&SubLedgerEntry],
        start: usize,
        picked: &mut Vec<usize>,
        sum: Decimal,
        target: Decimal,
        out: &mut Vec<Vec<usize>>,
    ) {
        if picked.len() >= 2 && (sum - target).abs() <= self.amount_tolerance {
            out.push(picked.clone());
        }
        if picked.len() == self.max_subset_size {
            return;
        }
        for i in start..pool.len() {
            if out.len() >= MAX_SUBSET_CANDIDATES {
                return;
            }
            let next = sum + pool[i].remaining_amount;
            // Pool is sorted ascending, so every later entry overshoots too.
            if next > target + self.amount_tolerance {
                break;
            }
            picked.push(i);
            self.search(pool, i + 1, picked, next, target, out);
            picked.pop();
        }
    }

    fn score_subset(&self, txn: &BankTransaction, members: &[&SubLedgerEntry]) -> Option<MatchCandidate> {
        let paid = txn.abs_amount();
        let total: Decimal = members.iter().map(|e| e.remaining_amount).sum();
        let amount = self.amount_term((total - paid).abs())?;

        // An overpayment within tolerance is trimmed from the last allocation.
        let mut left = paid;
        let mut allocations = Vec::with_capacity(members.len());
        for entry in members {
            let take = entry.remaining_amount.min(left);
            if take <= Decimal::ZERO {
                return None;
            }
            allocations.push(Allocation {
                ledger: entry.ledger,
                entry_id: entry.entry_id,
                amount: take,
            });
            left -= take;
        }

        let count = members.len() as f64;
        let names: Vec<f64> = members
            .iter()
            .filter_map(|e| name_term(txn.counterparty.as_deref(), e.partner_name.as_deref()))
            .collect();
        let name = (!names.is_empty()).then(|| names.iter().sum::<f64>() / names.len() as f64);

        let breakdown = ScoreBreakdown {
            amount,
            date: members
                .iter()
                .map(|e| self.date_term(txn.transaction_date, e.reference_date()))
                .sum::<f64>()
                / count,
            reference: members.iter().map(|e| reference_term(txn, e)).sum::<f64>() / count,
            name: name.unwrap_or(0.0),
        };

        Some(MatchCandidate {
            transaction_id: txn.transaction_id,
            allocations,
            score: combine(&breakdown, name.is_some()),
            breakdown,
        })
    }

    /// 1.0 for an exact amount, falling linearly to 0 at the tolerance.
    /// `None` beyond it.
    fn amount_term(&self, difference: Decimal) -> Option<f64> {
        if difference > self.amount_tolerance {
            return None;
        }
        if self.amount_tolerance.is_zero() {
            return Some(1.0);
        }
        let ratio = (difference / self.amount_tolerance).to_f64().unwrap_or(1.0);
        Some((1.0 - ratio).clamp(0.0, 1.0))
    }

    fn date_term(&self, paid_on: NaiveDate, reference_date: NaiveDate) -> f64 {
        let days = (paid_on - reference_date).num_days().abs();
        if days <= self.date_window_days {
            1.0
        } else if days >= self.date_cutoff_days || self.date_cutoff_days <= self.date_window_days {
            0.0
        } else {
            (self.date_cutoff_days - days) as f64
                / (self.date_cutoff_days - self.date_window_days) as f64
        }
    }
}

fn reference_term(txn: &BankTransaction, entry: &SubLedgerEntry) -> f64 {
    match (txn.reference.as_deref(), entry.reference_code.as_deref()) {
        (Some(paid), Some(expected)) if references_match(paid, expected) => 1.0,
        _ => 0.0,
    }
}

/// Fuzzy similarity of counterparty and partner name. `None` when either is
/// unknown, so a missing name neither helps nor hurts.
fn name_term(counterparty: Option<&str>, partner_name: Option<&str>) -> Option<f64> {
    let a = normalize_name(counterparty?);
    let b = normalize_name(partner_name?);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    Some(jaro_winkler(&a, &b))
}

fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .filter(|word| !COMPANY_SUFFIXES.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Weighted sum, renormalised over the terms that are known.
fn combine(b: &ScoreBreakdown, has_name: bool) -> f64 {
    let mut weighted =
        REFERENCE_WEIGHT * b.reference + AMOUNT_WEIGHT * b.amount + DATE_WEIGHT * b.date;
    let mut total_weight = REFERENCE_WEIGHT + AMOUNT_WEIGHT + DATE_WEIGHT;
    if has_name {
        weighted += NAME_WEIGHT * b.name;
        total_weight += NAME_WEIGHT;
    }
    let score = (weighted / total_weight).clamp(0.0, 1.0);
    if b.reference >= 1.0 && b.amount >= 1.0 {
        score.max(EXACT_REFERENCE_FLOOR)
    } else {
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BankTransactionStatus, PartnerKind, SubLedgerStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const KID: &str = "79927398713";

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn txn(amount: Decimal, reference: Option<&str>, counterparty: Option<&str>) -> BankTransaction {
        BankTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            external_id: "ext".to_string(),
            bank_account: "1234.56.78901".to_string(),
            transaction_date: date(20),
            amount,
            currency: "NOK".to_string(),
            counterparty: counterparty.map(str::to_string),
            reference: reference.map(str::to_string),
            status: BankTransactionStatus::Unmatched,
            matched_utc: None,
            created_utc: Utc::now(),
        }
    }

    fn entry(remaining: Decimal, reference: Option<&str>, name: Option<&str>) -> SubLedgerEntry {
        SubLedgerEntry {
            entry_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            ledger: PartnerKind::Customer,
            partner_id: None,
            partner_name: name.map(str::to_string),
            voucher_id: Uuid::new_v4(),
            invoice_reference: "INV-1".to_string(),
            reference_code: reference.map(str::to_string),
            currency: "NOK".to_string(),
            invoice_date: date(1),
            due_date: Some(date(20)),
            original_amount: remaining,
            remaining_amount: remaining,
            status: SubLedgerStatus::Open,
            reinstates_entry_id: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn test_exact_kid_and_amount_auto_confirms() {
        let matcher = Matcher::default();
        let t = txn(dec!(12500), Some(KID), None);
        let target = entry(dec!(12500), Some(KID), Some("Nordic Supplies AS"));
        let other = entry(dec!(12400), None, Some("Someone Else"));

        let ranked = matcher.rank(&t, &[other, target.clone()]);
        assert_eq!(ranked[0].entry_ids(), vec![target.entry_id]);
        assert!(ranked[0].score > 0.99);
        assert_eq!(ranked[0].breakdown.reference, 1.0);

        match matcher.decide(&ranked, 0.90) {
            MatchDecision::AutoConfirm(c) => assert_eq!(c.allocated(), dec!(12500)),
            other => panic!("expected auto-confirm, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_kid_and_amount_auto_confirms_late_and_unnamed() {
        let matcher = Matcher::default();
        let target = entry(dec!(12500), Some(KID), Some("Nordic Supplies AS"));

        // Sixty days past due, no counterparty text.
        let mut late = txn(dec!(12500), Some(KID), None);
        late.transaction_date = NaiveDate::from_ymd_opt(2026, 3, 21).unwrap();
        let ranked = matcher.rank(&late, &[target.clone()]);
        assert_eq!(ranked[0].breakdown.date, 0.0);
        assert!(ranked[0].score >= EXACT_REFERENCE_FLOOR);
        assert!(matches!(
            matcher.decide(&ranked, 0.90),
            MatchDecision::AutoConfirm(ref c) if c.entry_ids() == vec![target.entry_id]
        ));

        // Same payment with bank text that looks nothing like the partner.
        let mut opaque = txn(dec!(12500), Some(KID), Some("VIPPS*NORDIC"));
        opaque.transaction_date = late.transaction_date;
        let ranked = matcher.rank(&opaque, &[target]);
        assert!(ranked[0].breakdown.name < 1.0);
        assert!(matches!(matcher.decide(&ranked, 0.90), MatchDecision::AutoConfirm(_)));
    }

    #[test]
    fn test_reference_without_exact_amount_gets_no_floor() {
        let matcher = Matcher::default();
        let mut t = txn(dec!(12499.50), Some(KID), None);
        t.transaction_date = NaiveDate::from_ymd_opt(2026, 3, 21).unwrap();
        let ranked = matcher.rank(&t, &[entry(dec!(12500), Some(KID), None)]);
        assert!(ranked[0].breakdown.amount < 1.0);
        assert!(ranked[0].score < 0.90);
    }

    #[test]
    fn test_close_runner_up_goes_to_review() {
        let matcher = Matcher::default();
        let t = txn(dec!(800), None, Some("Fjord Consulting"));
        let a = entry(dec!(800), None, Some("Fjord Consulting AS"));
        let b = entry(dec!(800), None, Some("Fjord Consulting AS"));

        let ranked = matcher.rank(&t, &[a, b]);
        assert_eq!(ranked.len(), 2);
        assert!(matches!(matcher.decide(&ranked, 0.5), MatchDecision::Review(r) if r.len() == 2));
    }

    #[test]
    fn test_nothing_to_match_is_empty_review() {
        let matcher = Matcher::default();
        let t = txn(dec!(500), None, None);
        let ranked = matcher.rank(&t, &[entry(dec!(9000), None, None)]);
        assert!(ranked.is_empty());
        assert_eq!(matcher.decide(&ranked, 0.9), MatchDecision::Review(Vec::new()));
    }

    #[test]
    fn test_reference_matched_partial_payment() {
        let matcher = Matcher::default();
        let t = txn(dec!(5000), Some(KID), None);
        let e = entry(dec!(12500), Some(KID), None);

        let ranked = matcher.rank(&t, &[e]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].breakdown.amount, 0.5);
        assert_eq!(ranked[0].allocated(), dec!(5000));
    }

    #[test]
    fn test_overpayment_within_tolerance_allocates_remaining() {
        let matcher = Matcher::default();
        let t = txn(dec!(100.50), None, None);
        let ranked = matcher.rank(&t, &[entry(dec!(100), None, None)]);
        assert_eq!(ranked[0].allocated(), dec!(100));
        assert!((ranked[0].breakdown.amount - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_many_to_one_subset() {
        let matcher = Matcher::default();
        let t = txn(dec!(500), None, Some("Fjord Consulting"));
        let small = entry(dec!(200), None, Some("Fjord Consulting"));
        let medium = entry(dec!(300), None, Some("Fjord Consulting"));
        let unrelated = entry(dec!(999), None, None);

        let ranked = matcher.rank(&t, &[small.clone(), medium.clone(), unrelated]);
        let subset = ranked
            .iter()
            .find(|c| c.allocations.len() == 2)
            .expect("subset candidate");
        assert_eq!(subset.allocated(), dec!(500));
        let mut ids = subset.entry_ids();
        ids.sort();
        let mut expected = vec![small.entry_id, medium.entry_id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_outgoing_payment_ignores_customer_ledger_and_other_currency() {
        let matcher = Matcher::default();
        let outgoing = txn(dec!(-100), None, None);
        assert!(matcher.rank(&outgoing, &[entry(dec!(100), None, None)]).is_empty());

        let mut eur = entry(dec!(100), None, None);
        eur.currency = "EUR".to_string();
        assert!(matcher.rank(&txn(dec!(100), None, None), &[eur]).is_empty());
    }

    #[test]
    fn test_date_term_decays_to_cutoff() {
        let matcher = Matcher::default();
        assert_eq!(matcher.date_term(date(20), date(17)), 1.0);
        assert_eq!(matcher.date_term(date(25), date(1)), 0.5);
        assert_eq!(
            matcher.date_term(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(), date(1)),
            0.0
        );
    }

    #[test]
    fn test_name_normalization_drops_company_suffix() {
        assert_eq!(normalize_name("Nordic Supplies A/S"), "nordic supplies");
        assert_eq!(name_term(Some("NORDIC SUPPLIES AS"), Some("Nordic Supplies")), Some(1.0));
        assert_eq!(name_term(None, Some("Nordic Supplies")), None);
    }
}
