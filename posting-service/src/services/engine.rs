//! Entry points used by the intake, review and bank-feed collaborators.

use crate::error::{PostingError, PostingResult, ValidationError};
use crate::models::{
    Allocation, CandidateLine, CandidateStatus, ChartOfAccounts, ImportSummary, MatchMethod,
    NewBankTransaction, NewReviewTask, PostingCandidate, ResolveAction, ReviewTask,
    StoredCandidate, SubLedgerEntry, TaskKind, TaskOutcome, TenantSettings,
};
use crate::services::confidence::{ConfidenceEvaluator, Score, Triage};
use crate::services::database::Database;
use crate::services::metrics::{record_error, TRIAGE_DECISIONS_TOTAL};
use crate::services::poster::LedgerPoster;
use crate::services::queue::{self, enqueue_in, TaskQueue};
use crate::services::reconciliation::ReconciliationStore;
use crate::services::voucher_builder::VoucherBuilder;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnection;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of submitting a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitOutcome {
    AutoPosted {
        candidate_id: Uuid,
        voucher_id: Uuid,
        sequence_number: i64,
    },
    Queued {
        candidate_id: Uuid,
        task_id: Uuid,
        score: i16,
    },
}

/// A reviewer's decision. The first two settle posting reviews, the last two
/// match reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve { lines: Vec<CandidateLine> },
    Reject { reason: String },
    ConfirmMatch { allocations: Vec<Allocation> },
    Dismiss { reason: String },
}

impl ReviewDecision {
    fn task_kind(&self) -> TaskKind {
        match self {
            Self::Approve { .. } | Self::Reject { .. } => TaskKind::PostingReview,
            Self::ConfirmMatch { .. } | Self::Dismiss { .. } => TaskKind::MatchReview,
        }
    }

    /// Outcome compared against an earlier resolution. Ids are filled in once
    /// the decision has been applied.
    fn provisional_outcome(&self) -> TaskOutcome {
        match self {
            Self::Approve { .. } => TaskOutcome::Approved {
                voucher_id: Uuid::nil(),
            },
            Self::Reject { reason } => TaskOutcome::Rejected {
                reason: reason.clone(),
            },
            Self::ConfirmMatch { .. } => TaskOutcome::Matched {
                match_ids: Vec::new(),
            },
            Self::Dismiss { reason } => TaskOutcome::Dismissed {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Clone)]
pub struct PostingEngine {
    db: Database,
    evaluator: ConfidenceEvaluator,
    poster: LedgerPoster,
    queue: TaskQueue,
    reconciliation: ReconciliationStore,
}

impl PostingEngine {
    pub fn new(
        db: Database,
        evaluator: ConfidenceEvaluator,
        poster: LedgerPoster,
        queue: TaskQueue,
        reconciliation: ReconciliationStore,
    ) -> Self {
        Self {
            db,
            evaluator,
            poster,
            queue,
            reconciliation,
        }
    }

    pub fn poster(&self) -> &LedgerPoster {
        &self.poster
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn reconciliation(&self) -> &ReconciliationStore {
        &self.reconciliation
    }

    // -------------------------------------------------------------------------
    // Posting candidates
    // -------------------------------------------------------------------------

    /// Score a candidate and either post it straight away or queue it for review.
    ///
    /// A candidate that qualifies for auto-post but fails validation is stored
    /// as rejected and the validation error is returned.
    #[instrument(skip(self, candidate), fields(tenant_id = %candidate.tenant_id, source_type = %candidate.source.kind().as_str()))]
    pub async fn submit_posting_candidate(
        &self,
        candidate: PostingCandidate,
    ) -> PostingResult<SubmitOutcome> {
        let settings = self.db.load_settings(candidate.tenant_id).await?;
        let chart = self.db.load_chart(candidate.tenant_id).await?;

        let score = self
            .evaluator
            .evaluate(&candidate, &chart, settings.minor_units());
        let triage = score.triage(settings.auto_post_threshold);
        let candidate_id = Uuid::new_v4();

        info!(
            candidate_id = %candidate_id,
            score = score.value,
            failed_checks = score.failed().count(),
            decision = %triage.as_str(),
            "Candidate scored"
        );

        let result = match triage {
            Triage::AutoPost => {
                self.auto_post(candidate_id, &candidate, &score, &settings, &chart)
                    .await
            }
            Triage::Review(priority) => {
                let mut tx = self
                    .db
                    .pool()
                    .begin()
                    .await
                    .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

                let queued = async {
                    insert_candidate(
                        &mut tx,
                        candidate_id,
                        &candidate,
                        &score,
                        CandidateStatus::Queued,
                        None,
                        None,
                    )
                    .await?;
                    enqueue_in(
                        &mut tx,
                        &NewReviewTask {
                            tenant_id: candidate.tenant_id,
                            kind: TaskKind::PostingReview,
                            payload_id: candidate_id,
                            priority,
                            detail: serde_json::json!({
                                "score": score.value,
                                "checks": score.checks_json(),
                            }),
                        },
                    )
                    .await
                }
                .await;

                match queued {
                    Ok(task) => {
                        tx.commit()
                            .await
                            .map_err(|e| PostingError::db("Failed to commit queued candidate", e))?;
                        Ok(SubmitOutcome::Queued {
                            candidate_id,
                            task_id: task.task_id,
                            score: score.value,
                        })
                    }
                    Err(e) => {
                        tx.rollback().await.ok();
                        Err(e)
                    }
                }
            }
        };

        match &result {
            Ok(_) => TRIAGE_DECISIONS_TOTAL
                .with_label_values(&[triage.as_str()])
                .inc(),
            Err(PostingError::Validation(_)) => TRIAGE_DECISIONS_TOTAL
                .with_label_values(&["rejected"])
                .inc(),
            Err(e) => record_error(e.reason()),
        }
        result
    }

    async fn auto_post(
        &self,
        candidate_id: Uuid,
        candidate: &PostingCandidate,
        score: &Score,
        settings: &TenantSettings,
        chart: &ChartOfAccounts,
    ) -> PostingResult<SubmitOutcome> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

        let voucher = match VoucherBuilder::new(settings).build(candidate, chart) {
            Ok(voucher) => voucher,
            Err(rejection) => {
                warn!(candidate_id = %candidate_id, reason = %rejection, "Candidate rejected");
                let stored = insert_candidate(
                    &mut tx,
                    candidate_id,
                    candidate,
                    score,
                    CandidateStatus::Rejected,
                    Some(&rejection.to_string()),
                    None,
                )
                .await;
                match stored {
                    Ok(()) => {
                        tx.commit()
                            .await
                            .map_err(|e| PostingError::db("Failed to commit rejection", e))?;
                    }
                    Err(e) => {
                        tx.rollback().await.ok();
                        return Err(e);
                    }
                }
                record_error("validation");
                return Err(rejection.into());
            }
        };

        let posted = tokio::time::timeout(self.poster.commit_timeout(), async {
            let posted = self.poster.post_in(&mut tx, &voucher, settings, chart).await?;
            insert_candidate(
                &mut tx,
                candidate_id,
                candidate,
                score,
                CandidateStatus::Posted,
                None,
                Some(voucher.voucher_id),
            )
            .await?;
            Ok::<_, PostingError>(posted)
        })
        .await
        .unwrap_or(Err(PostingError::Timeout {
            operation: "auto-post",
        }));

        let posted = match posted {
            Ok(posted) => posted,
            Err(e) => {
                tx.rollback().await.ok();
                if matches!(e, PostingError::Integrity(_)) {
                    error!(candidate_id = %candidate_id, error = %e, "Auto-post rolled back");
                } else {
                    warn!(candidate_id = %candidate_id, error = %e, "Auto-post rolled back");
                }
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| PostingError::db("Failed to commit voucher", e))?;

        info!(
            candidate_id = %candidate_id,
            voucher_id = %posted.voucher_id,
            sequence_number = posted.sequence_number,
            "Candidate auto-posted"
        );
        Ok(SubmitOutcome::AutoPosted {
            candidate_id,
            voucher_id: posted.voucher_id,
            sequence_number: posted.sequence_number,
        })
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, candidate_id = %candidate_id))]
    pub async fn get_candidate(
        &self,
        tenant_id: Uuid,
        candidate_id: Uuid,
    ) -> PostingResult<Option<StoredCandidate>> {
        sqlx::query_as::<_, StoredCandidate>(
            r#"
            SELECT candidate_id, tenant_id, payload, score, checks, status, rejection_reason,
                   voucher_id, created_utc, updated_utc
            FROM posting_candidates
            WHERE tenant_id = $1 AND candidate_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| PostingError::db("Failed to load candidate", e))
    }

    // -------------------------------------------------------------------------
    // Review resolution
    // -------------------------------------------------------------------------

    /// Apply a reviewer's decision to a claimed task. Returns the voucher id
    /// when an approval posted one.
    ///
    /// The decision and the task resolution commit together. Repeating a
    /// resolution with the same decision returns the earlier result.
    #[instrument(skip(self, decision), fields(task_id = %task_id, worker_id = %worker_id))]
    pub async fn resolve_review(
        &self,
        task_id: Uuid,
        worker_id: &str,
        decision: ReviewDecision,
    ) -> PostingResult<Option<Uuid>> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

        let result = tokio::time::timeout(
            self.poster.commit_timeout(),
            self.resolve_in(&mut tx, task_id, worker_id, &decision),
        )
        .await
        .unwrap_or(Err(PostingError::Timeout {
            operation: "resolve review",
        }));

        match result {
            Ok(voucher_id) => {
                tx.commit()
                    .await
                    .map_err(|e| PostingError::db("Failed to commit review", e))?;
                Ok(voucher_id)
            }
            Err(e) => {
                tx.rollback().await.ok();
                record_error(e.reason());
                warn!(error = %e, "Review resolution rolled back");
                Err(e)
            }
        }
    }

    async fn resolve_in(
        &self,
        conn: &mut PgConnection,
        task_id: Uuid,
        worker_id: &str,
        decision: &ReviewDecision,
    ) -> PostingResult<Option<Uuid>> {
        let task = queue::lock_task(conn, task_id).await?;
        if task.kind != decision.task_kind() {
            return Err(PostingError::WrongTaskKind {
                task_id,
                actual: task.kind.as_str(),
            });
        }

        let now = queue::db_now(conn).await?;
        if task.check_resolution(worker_id, &decision.provisional_outcome(), now)?
            == ResolveAction::AlreadyApplied
        {
            info!("Task already resolved with this decision");
            return Ok(task.result_voucher_id);
        }

        let (outcome, voucher_id) = match decision {
            ReviewDecision::Approve { lines } => {
                let voucher_id = self.approve(conn, &task, lines).await?;
                (TaskOutcome::Approved { voucher_id }, Some(voucher_id))
            }
            ReviewDecision::Reject { reason } => {
                set_candidate_status(
                    conn,
                    task.payload_id,
                    CandidateStatus::Rejected,
                    Some(reason),
                    None,
                )
                .await?;
                info!(candidate_id = %task.payload_id, reason = %reason, "Candidate rejected by reviewer");
                (
                    TaskOutcome::Rejected {
                        reason: reason.clone(),
                    },
                    None,
                )
            }
            ReviewDecision::ConfirmMatch { allocations } => {
                let match_ids = self
                    .reconciliation
                    .confirm_match_in(
                        conn,
                        task.tenant_id,
                        task.payload_id,
                        allocations,
                        MatchMethod::Manual,
                        None,
                        worker_id,
                    )
                    .await?;
                (TaskOutcome::Matched { match_ids }, None)
            }
            ReviewDecision::Dismiss { reason } => {
                info!(transaction_id = %task.payload_id, reason = %reason, "Match review dismissed");
                (
                    TaskOutcome::Dismissed {
                        reason: reason.clone(),
                    },
                    None,
                )
            }
        };

        queue::mark_resolved(conn, &task, &outcome, voucher_id).await?;
        Ok(voucher_id)
    }

    /// Post the stored candidate with the reviewer's lines.
    async fn approve(
        &self,
        conn: &mut PgConnection,
        task: &ReviewTask,
        lines: &[CandidateLine],
    ) -> PostingResult<Uuid> {
        let stored = lock_candidate(conn, task.payload_id).await?;
        if stored.status != CandidateStatus::Queued {
            return Err(PostingError::Integrity(format!(
                "candidate {} is {}, only queued candidates can be approved",
                stored.candidate_id,
                stored.status.as_str()
            )));
        }

        let settings = self.db.load_settings(stored.tenant_id).await?;
        let chart = self.db.load_chart(stored.tenant_id).await?;

        let mut candidate = stored.payload;
        if !lines.is_empty() {
            candidate.lines = lines.to_vec();
        }

        let voucher = VoucherBuilder::new(&settings)
            .build(&candidate, &chart)
            .map_err(|e: ValidationError| {
                warn!(candidate_id = %stored.candidate_id, reason = %e, "Approved lines rejected");
                PostingError::from(e)
            })?;
        let posted = self.poster.post_in(conn, &voucher, &settings, &chart).await?;

        set_candidate_status(
            conn,
            stored.candidate_id,
            CandidateStatus::Posted,
            None,
            Some(posted.voucher_id),
        )
        .await?;

        info!(
            candidate_id = %stored.candidate_id,
            voucher_id = %posted.voucher_id,
            sequence_number = posted.sequence_number,
            "Candidate posted after review"
        );
        Ok(posted.voucher_id)
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    pub async fn import_bank_transactions(
        &self,
        tenant_id: Uuid,
        transactions: &[NewBankTransaction],
    ) -> PostingResult<ImportSummary> {
        self.reconciliation
            .import_bank_transactions(tenant_id, transactions)
            .await
    }

    pub async fn get_open_items(
        &self,
        tenant_id: Uuid,
        partner_id: Option<Uuid>,
    ) -> PostingResult<Vec<SubLedgerEntry>> {
        self.reconciliation.get_open_items(tenant_id, partner_id).await
    }
}

async fn insert_candidate(
    conn: &mut PgConnection,
    candidate_id: Uuid,
    candidate: &PostingCandidate,
    score: &Score,
    status: CandidateStatus,
    rejection_reason: Option<&str>,
    voucher_id: Option<Uuid>,
) -> PostingResult<()> {
    let payload = serde_json::to_value(candidate)
        .map_err(|e| PostingError::Integrity(format!("unserializable candidate: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO posting_candidates (candidate_id, tenant_id, payload, score, checks, status,
                                        rejection_reason, voucher_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(candidate_id)
    .bind(candidate.tenant_id)
    .bind(payload)
    .bind(score.value)
    .bind(score.checks_json())
    .bind(status.as_str())
    .bind(rejection_reason)
    .bind(voucher_id)
    .execute(conn)
    .await
    .map_err(|e| PostingError::db("Failed to store candidate", e))?;
    Ok(())
}

async fn lock_candidate(conn: &mut PgConnection, candidate_id: Uuid) -> PostingResult<StoredCandidate> {
    sqlx::query_as::<_, StoredCandidate>(
        r#"
        SELECT candidate_id, tenant_id, payload, score, checks, status, rejection_reason,
               voucher_id, created_utc, updated_utc
        FROM posting_candidates
        WHERE candidate_id = $1
        FOR UPDATE
        "#,
    )
    .bind(candidate_id)
    .fetch_optional(conn)
    .await
    .map_err(|e| PostingError::db("Failed to lock candidate", e))?
    .ok_or(PostingError::NotFound {
        entity: "candidate",
        id: candidate_id,
    })
}

async fn set_candidate_status(
    conn: &mut PgConnection,
    candidate_id: Uuid,
    status: CandidateStatus,
    rejection_reason: Option<&str>,
    voucher_id: Option<Uuid>,
) -> PostingResult<()> {
    sqlx::query(
        r#"
        UPDATE posting_candidates
        SET status = $2, rejection_reason = $3, voucher_id = $4, updated_utc = NOW()
        WHERE candidate_id = $1
        "#,
    )
    .bind(candidate_id)
    .bind(status.as_str())
    .bind(rejection_reason)
    .bind(voucher_id)
    .execute(conn)
    .await
    .map_err(|e| PostingError::db("Failed to update candidate", e))?;
    Ok(())
}
