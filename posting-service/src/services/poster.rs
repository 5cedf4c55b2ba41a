//! Ledger poster: commits vouchers and fans out to the sub-ledgers.
//!
//! A post is one database transaction. The voucher, its lines, the sequence
//! number and every sub-ledger row either all commit or none do.

use crate::error::{PostingError, PostingResult};
use crate::models::reference::{is_valid_kid, normalize_reference};
use crate::models::{
    ChartOfAccounts, PartnerKind, PostedVoucher, SourceRef, SubLedgerTransactionKind,
    TenantSettings, Voucher, VoucherLine, VoucherRow, VoucherStatus,
};
use crate::services::database::{find_partner, Database};
use crate::services::metrics::{DB_QUERY_DURATION, SUBLEDGER_FANOUT_TOTAL, VOUCHERS_POSTED_TOTAL};
use crate::services::subledger::{self, NewEntry};
use crate::services::voucher_builder::validate_lines;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Invoice fields the fan-out needs, whichever side the invoice is on.
struct InvoiceSource<'a> {
    kind: PartnerKind,
    invoice_number: &'a str,
    partner_ref: Option<&'a str>,
    partner_name: Option<&'a str>,
    payment_reference: Option<&'a str>,
    due_date: Option<NaiveDate>,
}

#[derive(Clone)]
pub struct LedgerPoster {
    db: Database,
    commit_timeout: Duration,
    lock_timeout: Duration,
}

impl LedgerPoster {
    pub fn new(db: Database, commit_timeout: Duration, lock_timeout: Duration) -> Self {
        Self {
            db,
            commit_timeout,
            lock_timeout,
        }
    }

    pub fn commit_timeout(&self) -> Duration {
        self.commit_timeout
    }

    /// Post a validated draft in its own transaction.
    #[instrument(skip(self, voucher, settings, chart), fields(tenant_id = %voucher.tenant_id, voucher_id = %voucher.voucher_id))]
    pub async fn post(
        &self,
        voucher: &Voucher,
        settings: &TenantSettings,
        chart: &ChartOfAccounts,
    ) -> PostingResult<PostedVoucher> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

        let result = tokio::time::timeout(
            self.commit_timeout,
            self.post_in(&mut *tx, voucher, settings, chart),
        )
        .await
        .unwrap_or(Err(PostingError::Timeout {
            operation: "post voucher",
        }));

        let posted = match result {
            Ok(posted) => posted,
            Err(e) => {
                tx.rollback().await.ok();
                if matches!(e, PostingError::Integrity(_)) {
                    error!(error = %e, "Voucher post rolled back");
                }
                VOUCHERS_POSTED_TOTAL
                    .with_label_values(&[voucher.source.kind().as_str(), "error"])
                    .inc();
                return Err(e);
            }
        };

        // Once commit starts it runs to completion or full rollback.
        tx.commit()
            .await
            .map_err(|e| PostingError::db("Failed to commit voucher", e))?;

        VOUCHERS_POSTED_TOTAL
            .with_label_values(&[voucher.source.kind().as_str(), "ok"])
            .inc();
        info!(
            sequence_number = posted.sequence_number,
            created_entries = posted.created_entries.len(),
            reduced_entries = posted.reduced_entries.len(),
            "Voucher posted"
        );

        Ok(posted)
    }

    /// Post inside the caller's transaction. The caller commits.
    #[instrument(skip(self, conn, voucher, settings, chart), fields(tenant_id = %voucher.tenant_id, voucher_id = %voucher.voucher_id))]
    pub async fn post_in(
        &self,
        conn: &mut PgConnection,
        voucher: &Voucher,
        settings: &TenantSettings,
        chart: &ChartOfAccounts,
    ) -> PostingResult<PostedVoucher> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["post_voucher"])
            .start_timer();

        if !voucher.status.can_transition_to(VoucherStatus::Posted) {
            return Err(PostingError::Integrity(format!(
                "voucher {} is {}, only drafts can be posted",
                voucher.voucher_id,
                voucher.status.as_str()
            )));
        }
        validate_lines(&voucher.lines, chart)?;

        self.set_local_timeouts(conn).await?;

        let sequence_number = next_sequence(conn, voucher.tenant_id).await?;
        let posted_utc = insert_voucher(conn, voucher, sequence_number).await?;
        insert_lines(conn, voucher).await?;

        let (created_entries, reduced_entries) = fan_out(conn, voucher, settings)
            .await
            .map_err(|e| fan_out_failure(voucher.voucher_id, e))?;

        timer.observe_duration();

        Ok(PostedVoucher {
            voucher_id: voucher.voucher_id,
            tenant_id: voucher.tenant_id,
            sequence_number,
            posted_utc,
            created_entries,
            reduced_entries,
        })
    }

    /// Build and post the reversing voucher for a posted one.
    #[instrument(skip(self, description), fields(tenant_id = %tenant_id, voucher_id = %voucher_id))]
    pub async fn reverse(
        &self,
        tenant_id: Uuid,
        voucher_id: Uuid,
        accounting_date: NaiveDate,
        description: String,
    ) -> PostingResult<PostedVoucher> {
        let original = self
            .get_voucher(tenant_id, voucher_id)
            .await?
            .ok_or(PostingError::NotFound {
                entity: "voucher",
                id: voucher_id,
            })?;

        let settings = self.db.load_settings(tenant_id).await?;
        let chart = self.db.load_chart(tenant_id).await?;
        let reversal = original.reversal(accounting_date, description);

        info!(reversal_id = %reversal.voucher_id, "Posting reversal");
        self.post(&reversal, &settings, &chart).await
    }

    /// A posted voucher with its lines, in line order.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, voucher_id = %voucher_id))]
    pub async fn get_voucher(
        &self,
        tenant_id: Uuid,
        voucher_id: Uuid,
    ) -> PostingResult<Option<Voucher>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_voucher"])
            .start_timer();

        let row = sqlx::query_as::<_, VoucherRow>(
            r#"
            SELECT voucher_id, tenant_id, sequence_number, accounting_date, description, currency,
                   source_type, source_id, source, status, posted_utc
            FROM vouchers
            WHERE tenant_id = $1 AND voucher_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(voucher_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PostingError::db("Failed to get voucher", e))?;

        let Some(row) = row else {
            timer.observe_duration();
            return Ok(None);
        };

        let lines = sqlx::query_as::<_, VoucherLine>(
            r#"
            SELECT account_code, debit, credit, description, is_rounding
            FROM voucher_lines
            WHERE voucher_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(voucher_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PostingError::db("Failed to get voucher lines", e))?;

        timer.observe_duration();

        Ok(Some(row.into_voucher(lines)))
    }

    /// Bound lock waits and statement time for the rest of the transaction.
    async fn set_local_timeouts(&self, conn: &mut PgConnection) -> PostingResult<()> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .bind(format!("{}ms", self.commit_timeout.as_millis()))
            .execute(conn)
            .await
            .map_err(|e| PostingError::db("Failed to set transaction timeouts", e))?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Voucher rows
// -----------------------------------------------------------------------------

/// Next per-tenant sequence number. The row lock is held until commit, so
/// numbers are handed out in commit order.
async fn next_sequence(conn: &mut PgConnection, tenant_id: Uuid) -> PostingResult<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO voucher_sequences (tenant_id, last_value)
        VALUES ($1, 1)
        ON CONFLICT (tenant_id) DO UPDATE SET last_value = voucher_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(tenant_id)
    .fetch_one(conn)
    .await
    .map_err(|e| PostingError::db("Failed to allocate voucher sequence", e))
}

async fn insert_voucher(
    conn: &mut PgConnection,
    voucher: &Voucher,
    sequence_number: i64,
) -> PostingResult<DateTime<Utc>> {
    let source = serde_json::to_value(&voucher.source)
        .map_err(|e| PostingError::Integrity(format!("unserializable source: {}", e)))?;

    sqlx::query_scalar::<_, DateTime<Utc>>(
        r#"
        INSERT INTO vouchers (voucher_id, tenant_id, sequence_number, accounting_date, description,
                              currency, source_type, source_id, source, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING posted_utc
        "#,
    )
    .bind(voucher.voucher_id)
    .bind(voucher.tenant_id)
    .bind(sequence_number)
    .bind(voucher.accounting_date)
    .bind(&voucher.description)
    .bind(&voucher.currency)
    .bind(voucher.source.kind().as_str())
    .bind(voucher.source.source_id())
    .bind(source)
    .bind(VoucherStatus::Posted.as_str())
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            PostingError::Integrity(format!(
                "voucher {} or its reversal target was already posted",
                voucher.voucher_id
            ))
        }
        _ => PostingError::db("Failed to insert voucher", e),
    })
}

async fn insert_lines(conn: &mut PgConnection, voucher: &Voucher) -> PostingResult<()> {
    for (index, line) in voucher.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO voucher_lines (voucher_id, line_number, tenant_id, account_code, debit,
                                       credit, description, is_rounding)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(voucher.voucher_id)
        .bind(index as i32 + 1)
        .bind(voucher.tenant_id)
        .bind(&line.account_code)
        .bind(line.debit)
        .bind(line.credit)
        .bind(&line.description)
        .bind(line.is_rounding)
        .execute(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to insert voucher line", e))?;
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Sub-ledger fan-out
// -----------------------------------------------------------------------------

/// Sub-ledger side of a post: created entries and reduced entries.
async fn fan_out(
    conn: &mut PgConnection,
    voucher: &Voucher,
    settings: &TenantSettings,
) -> PostingResult<(Vec<Uuid>, Vec<Uuid>)> {
    let fanned = match &voucher.source {
        SourceRef::SupplierInvoice {
            invoice_number,
            vendor_ref,
            vendor_name,
            payment_reference,
            due_date,
            ..
        } => {
            let source = InvoiceSource {
                kind: PartnerKind::Supplier,
                invoice_number,
                partner_ref: vendor_ref.as_deref(),
                partner_name: vendor_name.as_deref(),
                payment_reference: payment_reference.as_deref(),
                due_date: *due_date,
            };
            (create_entries(conn, voucher, settings, &source).await?, Vec::new())
        }
        SourceRef::CustomerInvoice {
            invoice_number,
            customer_ref,
            customer_name,
            payment_reference,
            due_date,
            ..
        } => {
            let source = InvoiceSource {
                kind: PartnerKind::Customer,
                invoice_number,
                partner_ref: customer_ref.as_deref(),
                partner_name: customer_name.as_deref(),
                payment_reference: payment_reference.as_deref(),
                due_date: *due_date,
            };
            (create_entries(conn, voucher, settings, &source).await?, Vec::new())
        }
        SourceRef::Reversal {
            original_voucher_id,
        } => (
            Vec::new(),
            reduce_for_reversal(conn, voucher, *original_voucher_id, settings).await?,
        ),
        SourceRef::Manual => (Vec::new(), Vec::new()),
    };
    Ok(fanned)
}

/// Anything failing after the voucher rows are written is an integrity failure
/// of the whole post. Timeouts keep their class so callers may retry.
fn fan_out_failure(voucher_id: Uuid, err: PostingError) -> PostingError {
    match err {
        PostingError::Integrity(_) | PostingError::Timeout { .. } => err,
        other => PostingError::Integrity(format!(
            "sub-ledger fan-out for voucher {} failed: {}",
            voucher_id, other
        )),
    }
}

/// One open entry per control-account line. Payables are credited on a
/// supplier invoice and receivables debited on a customer invoice; the other
/// side would need a negative open item, which the sub-ledger cannot hold.
async fn create_entries(
    conn: &mut PgConnection,
    voucher: &Voucher,
    settings: &TenantSettings,
    source: &InvoiceSource<'_>,
) -> PostingResult<Vec<Uuid>> {
    let control = settings.control_account(source.kind);

    let amounts = voucher
        .lines_on(control)
        .map(|line| control_amount(source.kind, line))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|line| {
            error!(
                voucher_id = %voucher.voucher_id,
                account_code = %line.account_code,
                "Control line on the wrong side for an invoice"
            );
            PostingError::Integrity(format!(
                "{} invoice {} posts {} on control account {} on the wrong side",
                source.kind.as_str(),
                source.invoice_number,
                line.signed_amount().abs(),
                control
            ))
        })?;

    if amounts.is_empty() {
        debug!(control_account = %control, "Invoice voucher does not touch the control account");
        return Ok(Vec::new());
    }

    let partner = match source.partner_ref.filter(|r| !r.trim().is_empty()) {
        Some(reference) => find_partner(conn, voucher.tenant_id, source.kind, reference).await?,
        None => None,
    };
    if partner.is_none() {
        debug!(partner_ref = ?source.partner_ref, "No partner match, creating unlinked entry");
    }

    let reference_code = source.payment_reference.and_then(|r| {
        let normalized = normalize_reference(r);
        if is_valid_kid(&normalized) {
            Some(normalized)
        } else {
            warn!(payment_reference = %r, "Payment reference fails checksum, not stored");
            None
        }
    });

    let mut created = Vec::with_capacity(amounts.len());
    for amount in amounts {
        let entry = subledger::insert_entry(
            conn,
            source.kind,
            &NewEntry {
                tenant_id: voucher.tenant_id,
                partner_id: partner.as_ref().map(|p| p.partner_id),
                partner_name: partner
                    .as_ref()
                    .map(|p| p.name.clone())
                    .or_else(|| source.partner_name.map(str::to_string)),
                voucher_id: voucher.voucher_id,
                invoice_reference: source.invoice_number.to_string(),
                reference_code: reference_code.clone(),
                currency: voucher.currency.clone(),
                invoice_date: voucher.accounting_date,
                due_date: source.due_date,
                amount,
                reinstates_entry_id: None,
            },
        )
        .await?;

        SUBLEDGER_FANOUT_TOTAL
            .with_label_values(&[source.kind.as_str(), "created"])
            .inc();
        info!(
            entry_id = %entry.entry_id,
            ledger = %source.kind.as_str(),
            amount = %amount,
            "Sub-ledger entry created"
        );
        created.push(entry.entry_id);
    }

    Ok(created)
}

/// Open-item amount carried by a control line, or the line itself when it
/// sits on the wrong side.
fn control_amount(kind: PartnerKind, line: &VoucherLine) -> Result<Decimal, &VoucherLine> {
    match kind {
        PartnerKind::Supplier if line.credit > Decimal::ZERO => Ok(line.credit),
        PartnerKind::Customer if line.debit > Decimal::ZERO => Ok(line.debit),
        _ => Err(line),
    }
}

/// Reduce the original voucher's open entries by what the reversal posts on
/// the control account, oldest entry first.
async fn reduce_for_reversal(
    conn: &mut PgConnection,
    voucher: &Voucher,
    original_voucher_id: Uuid,
    settings: &TenantSettings,
) -> PostingResult<Vec<Uuid>> {
    let original_source = sqlx::query_scalar::<_, sqlx::types::Json<SourceRef>>(
        "SELECT source FROM vouchers WHERE tenant_id = $1 AND voucher_id = $2",
    )
    .bind(voucher.tenant_id)
    .bind(original_voucher_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| PostingError::db("Failed to load reversed voucher", e))?
    .ok_or(PostingError::NotFound {
        entity: "voucher",
        id: original_voucher_id,
    })?;

    let Some(kind) = original_source.0.partner_kind() else {
        debug!("Reversed voucher has no sub-ledger side");
        return Ok(Vec::new());
    };

    let control = settings.control_account(kind);
    // The reversal mirrors the invoice, so the control lines sit on the opposite side.
    let mut to_reduce: Decimal = voucher
        .lines_on(control)
        .map(|line| match kind {
            PartnerKind::Supplier => line.debit - line.credit,
            PartnerKind::Customer => line.credit - line.debit,
        })
        .sum();
    if to_reduce <= Decimal::ZERO {
        return Ok(Vec::new());
    }

    let entries =
        subledger::lock_entries_for_voucher(conn, kind, voucher.tenant_id, original_voucher_id)
            .await?;

    let mut reduced = Vec::new();
    for entry in entries.iter().filter(|e| e.is_open()) {
        if to_reduce.is_zero() {
            break;
        }
        let take = to_reduce.min(entry.remaining_amount);
        let reduction = subledger::apply_reduction(
            conn,
            entry,
            take,
            SubLedgerTransactionKind::Reversal,
            Some(voucher.voucher_id),
            None,
        )
        .await?;

        SUBLEDGER_FANOUT_TOTAL
            .with_label_values(&[kind.as_str(), "reduced"])
            .inc();
        info!(
            entry_id = %entry.entry_id,
            amount = %reduction.amount,
            remaining = %reduction.new_remaining,
            "Sub-ledger entry reduced by reversal"
        );
        to_reduce -= take;
        reduced.push(entry.entry_id);
    }

    if to_reduce > Decimal::ZERO {
        error!(
            original_voucher_id = %original_voucher_id,
            unapplied = %to_reduce,
            "Reversal exceeds the open amount of the original entries"
        );
        return Err(PostingError::Integrity(format!(
            "reversal of voucher {} leaves {} without an open entry to reduce",
            original_voucher_id, to_reduce
        )));
    }

    Ok(reduced)
}
