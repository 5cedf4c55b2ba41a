//! Candidate intake, voucher lookup and reversal.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    error::PostingError,
    models::{PostedVoucher, PostingCandidate, StoredCandidate, Voucher},
    services::SubmitOutcome,
    startup::AppState,
};

/// Score a candidate and post it or queue it for review.
pub async fn submit_candidate(
    State(state): State<AppState>,
    Json(candidate): Json<PostingCandidate>,
) -> Result<(StatusCode, Json<SubmitOutcome>), AppError> {
    let outcome = state.engine.submit_posting_candidate(candidate).await?;
    let status = match outcome {
        SubmitOutcome::AutoPosted { .. } => StatusCode::CREATED,
        SubmitOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

pub async fn get_candidate(
    State(state): State<AppState>,
    Path((tenant_id, candidate_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<StoredCandidate>, AppError> {
    state
        .engine
        .get_candidate(tenant_id, candidate_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            PostingError::NotFound {
                entity: "candidate",
                id: candidate_id,
            }
            .into()
        })
}

pub async fn get_voucher(
    State(state): State<AppState>,
    Path((tenant_id, voucher_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Voucher>, AppError> {
    state
        .engine
        .poster()
        .get_voucher(tenant_id, voucher_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            PostingError::NotFound {
                entity: "voucher",
                id: voucher_id,
            }
            .into()
        })
}

#[derive(Debug, Deserialize)]
pub struct ReverseRequest {
    pub accounting_date: NaiveDate,
    pub description: String,
}

/// Post the reversing voucher of a posted voucher.
pub async fn reverse_voucher(
    State(state): State<AppState>,
    Path((tenant_id, voucher_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<ReverseRequest>,
) -> Result<(StatusCode, Json<PostedVoucher>), AppError> {
    tracing::info!(
        tenant_id = %tenant_id,
        voucher_id = %voucher_id,
        "Reversing voucher"
    );

    let posted = state
        .engine
        .poster()
        .reverse(
            tenant_id,
            voucher_id,
            payload.accounting_date,
            payload.description,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(posted)))
}
