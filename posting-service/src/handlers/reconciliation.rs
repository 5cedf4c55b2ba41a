//! Bank feed import, open items and match management.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    models::{
        ConsistencyIssue, ImportSummary, MatchCandidate, MatchRecord, NewBankTransaction,
        SubLedgerEntry, UnmatchRecord,
    },
    startup::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub transactions: Vec<NewBankTransaction>,
}

/// Import a batch of bank lines. Lines seen before are counted as duplicates.
pub async fn import_transactions(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, AppError> {
    tracing::info!(
        tenant_id = %tenant_id,
        count = payload.transactions.len(),
        "Importing bank transactions"
    );

    let summary = state
        .engine
        .import_bank_transactions(tenant_id, &payload.transactions)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct OpenItemsQuery {
    pub partner_id: Option<Uuid>,
}

pub async fn open_items(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<OpenItemsQuery>,
) -> Result<Json<Vec<SubLedgerEntry>>, AppError> {
    let items = state
        .engine
        .get_open_items(tenant_id, query.partner_id)
        .await?;
    Ok(Json(items))
}

pub async fn find_matches(
    State(state): State<AppState>,
    Path((tenant_id, transaction_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<MatchCandidate>>, AppError> {
    let candidates = state
        .engine
        .reconciliation()
        .find_matches(tenant_id, transaction_id)
        .await?;
    Ok(Json(candidates))
}

pub async fn get_matches(
    State(state): State<AppState>,
    Path((tenant_id, transaction_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<MatchRecord>>, AppError> {
    let matches = state
        .engine
        .reconciliation()
        .get_matches(tenant_id, transaction_id)
        .await?;
    Ok(Json(matches))
}

#[derive(Debug, Deserialize)]
pub struct UnmatchRequest {
    pub reason: String,
    pub unmatched_by: String,
}

/// Undo the active match of a bank transaction and reinstate its entries.
pub async fn unmatch(
    State(state): State<AppState>,
    Path((tenant_id, transaction_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UnmatchRequest>,
) -> Result<Json<UnmatchRecord>, AppError> {
    let record = state
        .engine
        .reconciliation()
        .unmatch(
            tenant_id,
            transaction_id,
            &payload.reason,
            &payload.unmatched_by,
        )
        .await?;
    Ok(Json(record))
}

pub async fn consistency(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<ConsistencyIssue>>, AppError> {
    let issues = state
        .engine
        .reconciliation()
        .verify_consistency(tenant_id)
        .await?;
    if !issues.is_empty() {
        tracing::error!(
            tenant_id = %tenant_id,
            count = issues.len(),
            "Sub-ledger consistency check found discrepancies"
        );
    }
    Ok(Json(issues))
}
