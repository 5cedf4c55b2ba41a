//! Bank import, match confirmation and open-item reads.

use crate::error::{ConcurrencyError, PostingError, PostingResult, ValidationError};
use crate::models::reference::normalize_reference;
use crate::models::{
    Allocation, BankTransaction, BankTransactionStatus, ConsistencyIssue, ImportSummary,
    MatchCandidate, MatchMethod, MatchRecord, NewBankTransaction, NewReviewTask, PartnerKind,
    Priority, SubLedgerEntry, SubLedgerTransactionKind, TaskKind, UnmatchRecord,
};
use crate::services::database::Database;
use crate::services::matcher::{MatchDecision, Matcher};
use crate::services::metrics::{BANK_IMPORTS_TOTAL, DB_QUERY_DURATION, MATCHES_TOTAL};
use crate::services::queue::enqueue_in;
use crate::services::subledger::{self, select_entries, NewEntry};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Who confirms matches that clear the auto-match threshold.
pub const AUTO_MATCHER: &str = "auto-matcher";

/// Upper bound on open entries considered for one bank line.
const MAX_MATCH_POOL: i64 = 500;

const TRANSACTION_COLUMNS: &str = "transaction_id, tenant_id, external_id, bank_account, \
     transaction_date, amount, currency, counterparty, reference, status, matched_utc, created_utc";

const MATCH_COLUMNS: &str = "match_id, tenant_id, bank_transaction_id, ledger, entry_id, amount, \
     score, method, matched_by, matched_utc, unmatch_id";

#[derive(Clone)]
pub struct ReconciliationStore {
    db: Database,
    matcher: Matcher,
}

impl ReconciliationStore {
    pub fn new(db: Database, matcher: Matcher) -> Self {
        Self { db, matcher }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    // -------------------------------------------------------------------------
    // Import
    // -------------------------------------------------------------------------

    /// Import bank lines, auto-confirming clear matches and queueing the rest.
    ///
    /// Each line is its own unit of work. A line whose external id was already
    /// imported is skipped, so re-importing a batch leaves the ledger as it was.
    #[instrument(skip(self, transactions), fields(tenant_id = %tenant_id, count = transactions.len()))]
    pub async fn import_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: &[NewBankTransaction],
    ) -> PostingResult<ImportSummary> {
        let settings = self.db.load_settings(tenant_id).await?;
        let mut summary = ImportSummary::default();

        for line in transactions {
            let mut tx = self
                .db
                .pool()
                .begin()
                .await
                .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

            match self
                .import_one(&mut tx, tenant_id, line, settings.auto_match_threshold)
                .await
            {
                Ok(result) => {
                    tx.commit()
                        .await
                        .map_err(|e| PostingError::db("Failed to commit bank import", e))?;
                    BANK_IMPORTS_TOTAL
                        .with_label_values(&[result.as_str()])
                        .inc();
                    match result {
                        ImportResult::AutoMatched => summary.auto_matched += 1,
                        ImportResult::Queued => summary.queued += 1,
                        ImportResult::Duplicate => summary.duplicates += 1,
                    }
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    BANK_IMPORTS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(external_id = %line.external_id, error = %e, "Bank line import failed");
                    return Err(e);
                }
            }
        }

        info!(
            auto_matched = summary.auto_matched,
            queued = summary.queued,
            duplicates = summary.duplicates,
            "Bank import completed"
        );
        Ok(summary)
    }

    async fn import_one(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
        line: &NewBankTransaction,
        threshold: f64,
    ) -> PostingResult<ImportResult> {
        let Some(txn) = insert_transaction(conn, tenant_id, line).await? else {
            debug!(external_id = %line.external_id, "Bank line already imported");
            return Ok(ImportResult::Duplicate);
        };

        let entries = open_entries_for(conn, &txn, self.matcher.amount_tolerance).await?;
        let ranked = self.matcher.rank(&txn, &entries);

        match self.matcher.decide(&ranked, threshold) {
            MatchDecision::AutoConfirm(candidate) => {
                self.confirm_match_in(
                    conn,
                    tenant_id,
                    txn.transaction_id,
                    &candidate.allocations,
                    MatchMethod::Auto,
                    Some(candidate.score),
                    AUTO_MATCHER,
                )
                .await?;
                Ok(ImportResult::AutoMatched)
            }
            MatchDecision::Review(candidates) => {
                let priority = if candidates.is_empty() {
                    Priority::High
                } else {
                    Priority::Medium
                };
                let task = enqueue_in(
                    conn,
                    &NewReviewTask {
                        tenant_id,
                        kind: TaskKind::MatchReview,
                        payload_id: txn.transaction_id,
                        priority,
                        detail: serde_json::json!({ "candidates": candidates }),
                    },
                )
                .await?;
                info!(
                    transaction_id = %txn.transaction_id,
                    task_id = %task.task_id,
                    candidates = candidates.len(),
                    "Bank line queued for match review"
                );
                Ok(ImportResult::Queued)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Matching
    // -------------------------------------------------------------------------

    /// Ranked candidates for an imported transaction.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn find_matches(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> PostingResult<Vec<MatchCandidate>> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| PostingError::db("Failed to acquire connection", e))?;

        let txn = get_transaction(&mut conn, tenant_id, transaction_id).await?;
        let entries = open_entries_for(&mut conn, &txn, self.matcher.amount_tolerance).await?;
        Ok(self.matcher.rank(&txn, &entries))
    }

    /// Apply `allocations` of a bank transaction to sub-ledger entries inside
    /// the caller's transaction. Returns the created match ids.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, conn, allocations), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn confirm_match_in(
        &self,
        conn: &mut PgConnection,
        tenant_id: Uuid,
        transaction_id: Uuid,
        allocations: &[Allocation],
        method: MatchMethod,
        score: Option<f64>,
        matched_by: &str,
    ) -> PostingResult<Vec<Uuid>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["confirm_match"])
            .start_timer();

        let txn = lock_transaction(conn, tenant_id, transaction_id).await?;
        if txn.status == BankTransactionStatus::Matched {
            return Err(ConcurrencyError::AlreadyMatched { transaction_id }.into());
        }
        check_allocations(&txn, allocations, self.matcher.amount_tolerance)?;

        let ledger = txn.ledger();
        let ids: Vec<Uuid> = allocations.iter().map(|a| a.entry_id).collect();
        let entries = subledger::lock_entries(conn, ledger, tenant_id, &ids).await?;

        let mut match_ids = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            let entry = entries
                .iter()
                .find(|e| e.entry_id == allocation.entry_id)
                .ok_or(PostingError::NotFound {
                    entity: "sub-ledger entry",
                    id: allocation.entry_id,
                })?;
            if !entry.is_open() || allocation.amount > entry.remaining_amount {
                return Err(ValidationError::InvalidAllocation {
                    reason: format!(
                        "entry {} has {} remaining, cannot take {}",
                        entry.entry_id, entry.remaining_amount, allocation.amount
                    ),
                }
                .into());
            }

            let reduction = subledger::apply_reduction(
                conn,
                entry,
                allocation.amount,
                SubLedgerTransactionKind::Payment,
                None,
                Some(transaction_id),
            )
            .await?;

            let match_id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO reconciliation_matches (match_id, tenant_id, bank_transaction_id,
                                                    ledger, entry_id, amount, score, method,
                                                    matched_by)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(match_id)
            .bind(tenant_id)
            .bind(transaction_id)
            .bind(ledger.as_str())
            .bind(entry.entry_id)
            .bind(allocation.amount)
            .bind(score)
            .bind(method.as_str())
            .bind(matched_by)
            .execute(&mut *conn)
            .await
            .map_err(|e| PostingError::db("Failed to record match", e))?;

            info!(
                entry_id = %entry.entry_id,
                amount = %allocation.amount,
                remaining = %reduction.new_remaining,
                status = %reduction.new_status.as_str(),
                "Sub-ledger entry settled by bank transaction"
            );
            match_ids.push(match_id);
        }

        sqlx::query(
            r#"
            UPDATE bank_transactions
            SET status = 'matched', matched_utc = NOW()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to mark transaction matched", e))?;

        timer.observe_duration();

        MATCHES_TOTAL
            .with_label_values(&[method.as_str(), "confirmed"])
            .inc();
        info!(
            method = %method.as_str(),
            score = ?score,
            allocations = match_ids.len(),
            "Bank transaction matched"
        );
        Ok(match_ids)
    }

    /// Undo a confirmed match. Sub-ledger balances never go back up, so the
    /// released amounts are reinstated as new open entries that point at the
    /// entries they came from.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn unmatch(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
        reason: &str,
        unmatched_by: &str,
    ) -> PostingResult<UnmatchRecord> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

        match unmatch_in(&mut tx, tenant_id, transaction_id, reason, unmatched_by).await {
            Ok(record) => {
                tx.commit()
                    .await
                    .map_err(|e| PostingError::db("Failed to commit unmatch", e))?;
                Ok(record)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Unpaid entries of both ledgers, optionally for one partner, by due date.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn get_open_items(
        &self,
        tenant_id: Uuid,
        partner_id: Option<Uuid>,
    ) -> PostingResult<Vec<SubLedgerEntry>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_open_items"])
            .start_timer();

        let mut items = Vec::new();
        for ledger in [PartnerKind::Supplier, PartnerKind::Customer] {
            let sql = format!(
                "{} WHERE tenant_id = $1 AND status <> 'paid' AND ($2::uuid IS NULL OR partner_id = $2)",
                select_entries(ledger)
            );
            let entries = sqlx::query_as::<_, SubLedgerEntry>(&sql)
                .bind(tenant_id)
                .bind(partner_id)
                .fetch_all(self.db.pool())
                .await
                .map_err(|e| PostingError::db("Failed to load open items", e))?;
            items.extend(entries);
        }
        items.sort_by(|a, b| {
            a.reference_date()
                .cmp(&b.reference_date())
                .then_with(|| a.created_utc.cmp(&b.created_utc))
        });

        timer.observe_duration();
        Ok(items)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn get_matches(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> PostingResult<Vec<MatchRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM reconciliation_matches
            WHERE tenant_id = $1 AND bank_transaction_id = $2
            ORDER BY matched_utc, match_id
            "#,
            MATCH_COLUMNS
        );
        sqlx::query_as::<_, MatchRecord>(&sql)
            .bind(tenant_id)
            .bind(transaction_id)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| PostingError::db("Failed to load matches", e))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, transaction_id = %transaction_id))]
    pub async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: Uuid,
    ) -> PostingResult<BankTransaction> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| PostingError::db("Failed to acquire connection", e))?;
        get_transaction(&mut conn, tenant_id, transaction_id).await
    }

    /// Replay every sub-ledger history and report entries whose stored
    /// balance disagrees with it.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn verify_consistency(&self, tenant_id: Uuid) -> PostingResult<Vec<ConsistencyIssue>> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| PostingError::db("Failed to acquire connection", e))?;

        let mut issues = Vec::new();
        for ledger in [PartnerKind::Supplier, PartnerKind::Customer] {
            let sql = format!("{} WHERE tenant_id = $1", select_entries(ledger));
            let entries = sqlx::query_as::<_, SubLedgerEntry>(&sql)
                .bind(tenant_id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| PostingError::db("Failed to load sub-ledger entries", e))?;
            let history = subledger::histories(&mut conn, ledger, tenant_id).await?;
            issues.extend(subledger::check_entries(&entries, &history));
        }

        if issues.is_empty() {
            info!("Sub-ledgers consistent with their history");
        } else {
            warn!(issues = issues.len(), "Sub-ledger consistency issues found");
        }
        Ok(issues)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportResult {
    AutoMatched,
    Queued,
    Duplicate,
}

impl ImportResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::AutoMatched => "auto_matched",
            Self::Queued => "queued",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Allocations must target the transaction's ledger, name each entry once,
/// be positive, and add up to the paid amount within tolerance.
fn check_allocations(
    txn: &BankTransaction,
    allocations: &[Allocation],
    tolerance: Decimal,
) -> Result<(), ValidationError> {
    if allocations.is_empty() {
        return Err(ValidationError::InvalidAllocation {
            reason: "no allocations given".to_string(),
        });
    }

    let ledger = txn.ledger();
    let mut seen = HashSet::new();
    for allocation in allocations {
        if allocation.ledger != ledger {
            return Err(ValidationError::InvalidAllocation {
                reason: format!(
                    "entry {} is in the {} ledger, transaction settles {} items",
                    allocation.entry_id,
                    allocation.ledger.as_str(),
                    ledger.as_str()
                ),
            });
        }
        if allocation.amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAllocation {
                reason: format!("amount for entry {} must be positive", allocation.entry_id),
            });
        }
        if !seen.insert(allocation.entry_id) {
            return Err(ValidationError::InvalidAllocation {
                reason: format!("entry {} allocated twice", allocation.entry_id),
            });
        }
    }

    let allocated: Decimal = allocations.iter().map(|a| a.amount).sum();
    let paid = txn.abs_amount();
    if (allocated - paid).abs() > tolerance {
        return Err(ValidationError::InvalidAllocation {
            reason: format!("allocations total {} but the transaction is {}", allocated, paid),
        });
    }
    Ok(())
}

async fn insert_transaction(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    line: &NewBankTransaction,
) -> PostingResult<Option<BankTransaction>> {
    let sql = format!(
        r#"
        INSERT INTO bank_transactions (transaction_id, tenant_id, external_id, bank_account,
                                       transaction_date, amount, currency, counterparty,
                                       reference, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'unmatched')
        ON CONFLICT (tenant_id, external_id) DO NOTHING
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    );
    sqlx::query_as::<_, BankTransaction>(&sql)
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(line.external_id.trim())
        .bind(&line.bank_account)
        .bind(line.transaction_date)
        .bind(line.amount)
        .bind(line.currency.to_uppercase())
        .bind(&line.counterparty)
        .bind(line.reference.as_deref().map(normalize_reference))
        .fetch_optional(conn)
        .await
        .map_err(|e| PostingError::db("Failed to insert bank transaction", e))
}

async fn get_transaction(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    transaction_id: Uuid,
) -> PostingResult<BankTransaction> {
    let sql = format!(
        "SELECT {} FROM bank_transactions WHERE tenant_id = $1 AND transaction_id = $2",
        TRANSACTION_COLUMNS
    );
    sqlx::query_as::<_, BankTransaction>(&sql)
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PostingError::db("Failed to load bank transaction", e))?
        .ok_or(PostingError::NotFound {
            entity: "bank transaction",
            id: transaction_id,
        })
}

async fn lock_transaction(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    transaction_id: Uuid,
) -> PostingResult<BankTransaction> {
    let sql = format!(
        "SELECT {} FROM bank_transactions WHERE tenant_id = $1 AND transaction_id = $2 FOR UPDATE",
        TRANSACTION_COLUMNS
    );
    sqlx::query_as::<_, BankTransaction>(&sql)
        .bind(tenant_id)
        .bind(transaction_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PostingError::db("Failed to lock bank transaction", e))?
        .ok_or(PostingError::NotFound {
            entity: "bank transaction",
            id: transaction_id,
        })
}

/// Open entries that could settle `txn`: anything no larger than the paid
/// amount plus tolerance, and any entry carrying the same reference code.
async fn open_entries_for(
    conn: &mut PgConnection,
    txn: &BankTransaction,
    tolerance: Decimal,
) -> PostingResult<Vec<SubLedgerEntry>> {
    let sql = format!(
        r#"
        {}
        WHERE tenant_id = $1
          AND status <> 'paid'
          AND currency = $2
          AND (remaining_amount <= $3 + $4 OR ($5::text IS NOT NULL AND reference_code = $5))
        ORDER BY abs(remaining_amount - $3), entry_id
        LIMIT $6
        "#,
        select_entries(txn.ledger())
    );
    sqlx::query_as::<_, SubLedgerEntry>(&sql)
        .bind(txn.tenant_id)
        .bind(txn.currency.to_uppercase())
        .bind(txn.abs_amount())
        .bind(tolerance)
        .bind(txn.reference.as_deref().map(normalize_reference))
        .bind(MAX_MATCH_POOL)
        .fetch_all(conn)
        .await
        .map_err(|e| PostingError::db("Failed to load open entries", e))
}

async fn unmatch_in(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    transaction_id: Uuid,
    reason: &str,
    unmatched_by: &str,
) -> PostingResult<UnmatchRecord> {
    let txn = lock_transaction(conn, tenant_id, transaction_id).await?;
    if txn.status != BankTransactionStatus::Matched {
        return Err(ValidationError::InvalidAllocation {
            reason: format!("transaction {} is not matched", transaction_id),
        }
        .into());
    }

    let sql = format!(
        r#"
        SELECT {}
        FROM reconciliation_matches
        WHERE bank_transaction_id = $1 AND unmatch_id IS NULL
        ORDER BY matched_utc, match_id
        FOR UPDATE
        "#,
        MATCH_COLUMNS
    );
    let matches = sqlx::query_as::<_, MatchRecord>(&sql)
        .bind(transaction_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to load matches", e))?;

    let record = sqlx::query_as::<_, UnmatchRecord>(
        r#"
        INSERT INTO reconciliation_unmatches (unmatch_id, tenant_id, bank_transaction_id, reason,
                                              unmatched_by)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING unmatch_id, tenant_id, bank_transaction_id, reason, unmatched_by, created_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant_id)
    .bind(transaction_id)
    .bind(reason)
    .bind(unmatched_by)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| PostingError::db("Failed to record unmatch", e))?;

    sqlx::query(
        "UPDATE reconciliation_matches SET unmatch_id = $1 WHERE bank_transaction_id = $2 AND unmatch_id IS NULL",
    )
    .bind(record.unmatch_id)
    .bind(transaction_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| PostingError::db("Failed to mark matches reversed", e))?;

    for m in &matches {
        let originals = subledger::lock_entries(conn, m.ledger, tenant_id, &[m.entry_id]).await?;
        let original = originals.first().ok_or(PostingError::NotFound {
            entity: "sub-ledger entry",
            id: m.entry_id,
        })?;

        let reinstated = subledger::insert_entry(
            conn,
            m.ledger,
            &NewEntry {
                tenant_id,
                partner_id: original.partner_id,
                partner_name: original.partner_name.clone(),
                voucher_id: original.voucher_id,
                invoice_reference: original.invoice_reference.clone(),
                reference_code: original.reference_code.clone(),
                currency: original.currency.clone(),
                invoice_date: original.invoice_date,
                due_date: original.due_date,
                amount: m.amount,
                reinstates_entry_id: Some(original.entry_id),
            },
        )
        .await?;

        MATCHES_TOTAL
            .with_label_values(&[m.method.as_str(), "reversed"])
            .inc();
        info!(
            match_id = %m.match_id,
            entry_id = %original.entry_id,
            reinstated_entry_id = %reinstated.entry_id,
            amount = %m.amount,
            "Match reversed, amount reinstated"
        );
    }

    sqlx::query(
        "UPDATE bank_transactions SET status = 'unmatched', matched_utc = NULL WHERE transaction_id = $1",
    )
    .bind(transaction_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| PostingError::db("Failed to reopen bank transaction", e))?;

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn txn(amount: Decimal) -> BankTransaction {
        BankTransaction {
            transaction_id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
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

    fn alloc(ledger: PartnerKind, amount: Decimal) -> Allocation {
        Allocation {
            ledger,
            entry_id: Uuid::new_v4(),
            amount,
        }
    }

    #[test]
    fn test_allocations_must_cover_payment() {
        let t = txn(dec!(500));
        let ok = vec![
            alloc(PartnerKind::Customer, dec!(300)),
            alloc(PartnerKind::Customer, dec!(200)),
        ];
        assert!(check_allocations(&t, &ok, dec!(1)).is_ok());

        let short = vec![alloc(PartnerKind::Customer, dec!(300))];
        assert!(matches!(
            check_allocations(&t, &short, dec!(1)),
            Err(ValidationError::InvalidAllocation { .. })
        ));
    }

    #[test]
    fn test_allocations_reject_wrong_ledger_and_duplicates() {
        let t = txn(dec!(-500));
        assert!(check_allocations(&t, &[alloc(PartnerKind::Customer, dec!(500))], dec!(1)).is_err());
        assert!(check_allocations(&t, &[alloc(PartnerKind::Supplier, dec!(500))], dec!(1)).is_ok());

        let twice = alloc(PartnerKind::Supplier, dec!(250));
        assert!(check_allocations(&t, &[twice.clone(), twice], dec!(1)).is_err());
        assert!(check_allocations(&t, &[], dec!(1)).is_err());
    }
}
