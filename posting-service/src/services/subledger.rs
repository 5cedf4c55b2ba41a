//! Sub-ledger persistence shared by the poster and reconciliation.
//!
//! Every function runs on the caller's connection so it joins the caller's
//! unit of work. Balance changes always write the entry and its history row
//! together.

use crate::error::{PostingError, PostingResult};
use crate::models::{
    fold_history, ConsistencyIssue, PartnerKind, Reduction, SubLedgerEntry, SubLedgerStatus,
    SubLedgerTransaction, SubLedgerTransactionKind,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use tracing::warn;
use uuid::Uuid;

/// Fields of a new open entry.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub tenant_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub partner_name: Option<String>,
    pub voucher_id: Uuid,
    pub invoice_reference: String,
    pub reference_code: Option<String>,
    pub currency: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub amount: Decimal,
    pub reinstates_entry_id: Option<Uuid>,
}

pub(crate) fn select_entries(ledger: PartnerKind) -> String {
    format!(
        r#"
        SELECT entry_id, tenant_id, '{ledger}'::text AS ledger, partner_id, partner_name,
               voucher_id, invoice_reference, reference_code, currency, invoice_date, due_date,
               original_amount, remaining_amount, status, reinstates_entry_id,
               created_utc, updated_utc
        FROM {table}
        "#,
        ledger = ledger.as_str(),
        table = ledger.ledger_table()
    )
}

/// Insert an open entry together with its opening invoice history row.
pub async fn insert_entry(
    conn: &mut PgConnection,
    ledger: PartnerKind,
    entry: &NewEntry,
) -> PostingResult<SubLedgerEntry> {
    let sql = format!(
        r#"
        INSERT INTO {table} (
            entry_id, tenant_id, partner_id, partner_name, voucher_id, invoice_reference,
            reference_code, currency, invoice_date, due_date, original_amount,
            remaining_amount, status, reinstates_entry_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, $12, $13)
        RETURNING entry_id, tenant_id, '{ledger}'::text AS ledger, partner_id, partner_name,
                  voucher_id, invoice_reference, reference_code, currency, invoice_date,
                  due_date, original_amount, remaining_amount, status, reinstates_entry_id,
                  created_utc, updated_utc
        "#,
        table = ledger.ledger_table(),
        ledger = ledger.as_str()
    );

    let created = sqlx::query_as::<_, SubLedgerEntry>(&sql)
        .bind(Uuid::new_v4())
        .bind(entry.tenant_id)
        .bind(entry.partner_id)
        .bind(&entry.partner_name)
        .bind(entry.voucher_id)
        .bind(&entry.invoice_reference)
        .bind(&entry.reference_code)
        .bind(&entry.currency)
        .bind(entry.invoice_date)
        .bind(entry.due_date)
        .bind(entry.amount)
        .bind(SubLedgerStatus::Open.as_str())
        .bind(entry.reinstates_entry_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to create sub-ledger entry", e))?;

    append_history(
        conn,
        ledger,
        &created,
        SubLedgerTransactionKind::Invoice,
        entry.amount,
        Some(entry.voucher_id),
        None,
    )
    .await?;

    Ok(created)
}

/// Lock entries in id order so concurrent reducers never deadlock.
pub async fn lock_entries(
    conn: &mut PgConnection,
    ledger: PartnerKind,
    tenant_id: Uuid,
    entry_ids: &[Uuid],
) -> PostingResult<Vec<SubLedgerEntry>> {
    let sql = format!(
        "{} WHERE tenant_id = $1 AND entry_id = ANY($2) ORDER BY entry_id FOR UPDATE",
        select_entries(ledger)
    );
    sqlx::query_as::<_, SubLedgerEntry>(&sql)
        .bind(tenant_id)
        .bind(entry_ids)
        .fetch_all(conn)
        .await
        .map_err(|e| PostingError::db("Failed to lock sub-ledger entries", e))
}

/// Entries created by `voucher_id`, oldest first, locked for update.
pub async fn lock_entries_for_voucher(
    conn: &mut PgConnection,
    ledger: PartnerKind,
    tenant_id: Uuid,
    voucher_id: Uuid,
) -> PostingResult<Vec<SubLedgerEntry>> {
    let sql = format!(
        "{} WHERE tenant_id = $1 AND voucher_id = $2 ORDER BY created_utc, entry_id FOR UPDATE",
        select_entries(ledger)
    );
    sqlx::query_as::<_, SubLedgerEntry>(&sql)
        .bind(tenant_id)
        .bind(voucher_id)
        .fetch_all(conn)
        .await
        .map_err(|e| PostingError::db("Failed to load sub-ledger entries for voucher", e))
}

/// Reduce a locked entry and record the reduction in its history.
pub async fn apply_reduction(
    conn: &mut PgConnection,
    entry: &SubLedgerEntry,
    amount: Decimal,
    kind: SubLedgerTransactionKind,
    voucher_id: Option<Uuid>,
    bank_transaction_id: Option<Uuid>,
) -> PostingResult<Reduction> {
    let reduction = entry.reduce(amount).map_err(|e| {
        PostingError::Integrity(format!(
            "cannot reduce {} entry {}: {}",
            entry.ledger.as_str(),
            entry.entry_id,
            e
        ))
    })?;

    let sql = format!(
        r#"
        UPDATE {table}
        SET remaining_amount = $2, status = $3, updated_utc = NOW()
        WHERE entry_id = $1
        "#,
        table = entry.ledger.ledger_table()
    );
    sqlx::query(&sql)
        .bind(entry.entry_id)
        .bind(reduction.new_remaining)
        .bind(reduction.new_status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to reduce sub-ledger entry", e))?;

    append_history(
        conn,
        entry.ledger,
        entry,
        kind,
        -reduction.amount,
        voucher_id,
        bank_transaction_id,
    )
    .await?;

    Ok(reduction)
}

async fn append_history(
    conn: &mut PgConnection,
    ledger: PartnerKind,
    entry: &SubLedgerEntry,
    kind: SubLedgerTransactionKind,
    signed_amount: Decimal,
    voucher_id: Option<Uuid>,
    bank_transaction_id: Option<Uuid>,
) -> PostingResult<()> {
    let sql = format!(
        r#"
        INSERT INTO {table} (transaction_id, entry_id, tenant_id, kind, amount, voucher_id, bank_transaction_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
        table = ledger.transactions_table()
    );
    sqlx::query(&sql)
        .bind(Uuid::new_v4())
        .bind(entry.entry_id)
        .bind(entry.tenant_id)
        .bind(kind.as_str())
        .bind(signed_amount)
        .bind(voucher_id)
        .bind(bank_transaction_id)
        .execute(conn)
        .await
        .map_err(|e| PostingError::db("Failed to append sub-ledger history", e))?;
    Ok(())
}

/// Full history of one ledger for a tenant, grouped by entry in append order.
pub async fn histories(
    conn: &mut PgConnection,
    ledger: PartnerKind,
    tenant_id: Uuid,
) -> PostingResult<Vec<SubLedgerTransaction>> {
    let sql = format!(
        r#"
        SELECT transaction_id, entry_id, tenant_id, kind, amount, voucher_id,
               bank_transaction_id, created_utc
        FROM {table}
        WHERE tenant_id = $1
        ORDER BY entry_id, position
        "#,
        table = ledger.transactions_table()
    );
    sqlx::query_as::<_, SubLedgerTransaction>(&sql)
        .bind(tenant_id)
        .fetch_all(conn)
        .await
        .map_err(|e| PostingError::db("Failed to load sub-ledger history", e))
}

/// Compare each stored balance with the fold of its history.
pub fn check_entries(
    entries: &[SubLedgerEntry],
    history: &[SubLedgerTransaction],
) -> Vec<ConsistencyIssue> {
    entries
        .iter()
        .filter_map(|entry| {
            let own: Vec<SubLedgerTransaction> = history
                .iter()
                .filter(|t| t.entry_id == entry.entry_id)
                .cloned()
                .collect();

            let issue = |folded: Option<Decimal>, detail: String| ConsistencyIssue {
                ledger: entry.ledger,
                entry_id: entry.entry_id,
                stored_remaining: entry.remaining_amount,
                folded_remaining: folded,
                detail,
            };

            match fold_history(&own) {
                Ok(folded) if folded != entry.remaining_amount => Some(issue(
                    Some(folded),
                    format!(
                        "stored remaining {} differs from history {}",
                        entry.remaining_amount, folded
                    ),
                )),
                Ok(_) => {
                    let opening = own.first().map(|t| t.amount);
                    if opening != Some(entry.original_amount) {
                        Some(issue(
                            opening,
                            format!(
                                "original amount {} differs from opening history row",
                                entry.original_amount
                            ),
                        ))
                    } else if SubLedgerStatus::for_remaining(
                        entry.original_amount,
                        entry.remaining_amount,
                    ) != entry.status
                    {
                        Some(issue(
                            Some(entry.remaining_amount),
                            format!("status {} does not fit balance", entry.status.as_str()),
                        ))
                    } else {
                        None
                    }
                }
                Err(detail) => {
                    warn!(entry_id = %entry.entry_id, detail = %detail, "Sub-ledger history invalid");
                    Some(issue(None, detail))
                }
            }
        })
        .collect()
}
