//! Durable review queue backed by `review_tasks`.
//!
//! Claims select with `FOR UPDATE SKIP LOCKED`, so concurrent workers never
//! wait on each other's candidate rows and never claim the same task. A claim
//! is a lease: once it expires the sweeper puts the task back.

use crate::error::{ConcurrencyError, PostingError, PostingResult};
use crate::models::{
    NewReviewTask, ResolveAction, ReviewTask, SweepReport, TaskKind, TaskOutcome, TaskStatus,
};
use crate::services::database::Database;
use crate::services::metrics::{DB_QUERY_DURATION, QUEUE_CLAIMS_TOTAL, QUEUE_SWEEP_TOTAL};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgConnection;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const TASK_COLUMNS: &str = "task_id, tenant_id, kind, payload_id, priority, status, claimed_by, \
     claimed_utc, lease_expires_utc, attempts, detail, outcome, result_voucher_id, last_error, \
     created_utc, updated_utc, resolved_utc";

#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    lease: Duration,
    claim_timeout: Duration,
}

impl TaskQueue {
    pub fn new(db: Database, lease: Duration, claim_timeout: Duration) -> Self {
        Self {
            db,
            lease,
            claim_timeout,
        }
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    // -------------------------------------------------------------------------
    // Enqueue
    // -------------------------------------------------------------------------

    #[instrument(skip(self, task), fields(tenant_id = %task.tenant_id, kind = %task.kind.as_str()))]
    pub async fn enqueue(&self, task: &NewReviewTask) -> PostingResult<ReviewTask> {
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| PostingError::db("Failed to acquire connection", e))?;
        enqueue_in(&mut conn, task).await
    }

    // -------------------------------------------------------------------------
    // Claim
    // -------------------------------------------------------------------------

    /// Claim the highest-priority, oldest pending task of one of `kinds`.
    /// Returns `None` when nothing is claimable.
    #[instrument(skip(self, kinds), fields(worker_id = %worker_id))]
    pub async fn claim_next(
        &self,
        worker_id: &str,
        kinds: &[TaskKind],
    ) -> PostingResult<Option<ReviewTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_next"])
            .start_timer();

        let kinds: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        let sql = format!(
            r#"
            WITH next AS (
                SELECT task_id
                FROM review_tasks
                WHERE status = 'pending' AND kind = ANY($1)
                ORDER BY priority DESC, created_utc, task_id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE review_tasks
            SET status = 'claimed',
                claimed_by = $2,
                claimed_utc = NOW(),
                lease_expires_utc = NOW() + make_interval(secs => $3),
                updated_utc = NOW()
            FROM next
            WHERE review_tasks.task_id = next.task_id
            RETURNING {}
            "#,
            qualified_columns("review_tasks")
        );

        let claim = sqlx::query_as::<_, ReviewTask>(&sql)
            .bind(&kinds)
            .bind(worker_id)
            .bind(self.lease.as_secs_f64())
            .fetch_optional(self.db.pool());

        let result = match tokio::time::timeout(self.claim_timeout, claim).await {
            Ok(result) => result.map_err(|e| PostingError::db("Failed to claim task", e)),
            Err(_) => {
                QUEUE_CLAIMS_TOTAL.with_label_values(&["timeout"]).inc();
                return Err(PostingError::Timeout {
                    operation: "claim task",
                });
            }
        };

        timer.observe_duration();

        match result? {
            Some(task) => {
                QUEUE_CLAIMS_TOTAL.with_label_values(&["claimed"]).inc();
                info!(
                    task_id = %task.task_id,
                    tenant_id = %task.tenant_id,
                    kind = %task.kind.as_str(),
                    lease_expires_utc = ?task.lease_expires_utc,
                    "Task claimed"
                );
                Ok(Some(task))
            }
            None => {
                QUEUE_CLAIMS_TOTAL.with_label_values(&["empty"]).inc();
                debug!("No claimable task");
                Ok(None)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Resolve / release
    // -------------------------------------------------------------------------

    /// Resolve a claimed task in its own transaction.
    #[instrument(skip(self, outcome), fields(task_id = %task_id, worker_id = %worker_id))]
    pub async fn resolve(
        &self,
        task_id: Uuid,
        worker_id: &str,
        outcome: TaskOutcome,
    ) -> PostingResult<ResolveAction> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| PostingError::db("Failed to begin transaction", e))?;

        match resolve_in(&mut tx, task_id, worker_id, &outcome, None).await {
            Ok(action) => {
                tx.commit()
                    .await
                    .map_err(|e| PostingError::db("Failed to commit resolution", e))?;
                Ok(action)
            }
            Err(e) => {
                tx.rollback().await.ok();
                Err(e)
            }
        }
    }

    /// Give a claim back without resolving. The task returns to `pending`.
    #[instrument(skip(self), fields(task_id = %task_id, worker_id = %worker_id))]
    pub async fn release(&self, task_id: Uuid, worker_id: &str) -> PostingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE review_tasks
            SET status = 'pending',
                claimed_by = NULL,
                claimed_utc = NULL,
                lease_expires_utc = NULL,
                updated_utc = NOW()
            WHERE task_id = $1
              AND status = 'claimed'
              AND claimed_by = $2
              AND lease_expires_utc > NOW()
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| PostingError::db("Failed to release task", e))?;

        if result.rows_affected() == 0 {
            return Err(ConcurrencyError::StaleClaim { task_id }.into());
        }

        info!("Task released");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sweep
    // -------------------------------------------------------------------------

    /// Return expired claims to `pending`, or to `failed` once a task has used
    /// `max_attempts` leases.
    #[instrument(skip(self))]
    pub async fn requeue_expired(&self, max_attempts: i32) -> PostingResult<SweepReport> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["requeue_expired"])
            .start_timer();

        let swept = sqlx::query_as::<_, (Uuid, Uuid, String, i32)>(
            r#"
            WITH expired AS (
                SELECT task_id
                FROM review_tasks
                WHERE status = 'claimed' AND lease_expires_utc <= NOW()
                FOR UPDATE SKIP LOCKED
            )
            UPDATE review_tasks
            SET attempts = review_tasks.attempts + 1,
                status = CASE WHEN review_tasks.attempts + 1 >= $1 THEN 'failed' ELSE 'pending' END,
                last_error = 'lease held by ' || COALESCE(review_tasks.claimed_by, 'unknown')
                             || ' expired',
                claimed_by = NULL,
                claimed_utc = NULL,
                lease_expires_utc = NULL,
                updated_utc = NOW()
            FROM expired
            WHERE review_tasks.task_id = expired.task_id
            RETURNING review_tasks.task_id, review_tasks.tenant_id, review_tasks.status,
                      review_tasks.attempts
            "#,
        )
        .bind(max_attempts)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| PostingError::db("Failed to requeue expired tasks", e))?;

        timer.observe_duration();

        let mut report = SweepReport::default();
        for (task_id, tenant_id, status, attempts) in swept {
            if status == TaskStatus::Failed.as_str() {
                report.failed += 1;
                QUEUE_SWEEP_TOTAL.with_label_values(&["failed"]).inc();
                warn!(
                    task_id = %task_id,
                    tenant_id = %tenant_id,
                    attempts = attempts,
                    "Task failed after exhausting its attempts, needs manual intervention"
                );
            } else {
                report.requeued += 1;
                QUEUE_SWEEP_TOTAL.with_label_values(&["requeued"]).inc();
                warn!(
                    task_id = %task_id,
                    tenant_id = %tenant_id,
                    attempts = attempts,
                    "Expired lease, task requeued"
                );
            }
        }

        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id, task_id = %task_id))]
    pub async fn get_task(&self, tenant_id: Uuid, task_id: Uuid) -> PostingResult<Option<ReviewTask>> {
        let sql = format!(
            "SELECT {} FROM review_tasks WHERE tenant_id = $1 AND task_id = $2",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, ReviewTask>(&sql)
            .bind(tenant_id)
            .bind(task_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| PostingError::db("Failed to get task", e))
    }

    /// Tasks of a tenant in claim order, optionally filtered by status.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn list_tasks(
        &self,
        tenant_id: Uuid,
        status: Option<TaskStatus>,
        limit: i64,
    ) -> PostingResult<Vec<ReviewTask>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tasks"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {}
            FROM review_tasks
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY priority DESC, created_utc, task_id
            LIMIT $3
            "#,
            TASK_COLUMNS
        );
        let tasks = sqlx::query_as::<_, ReviewTask>(&sql)
            .bind(tenant_id)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| PostingError::db("Failed to list tasks", e))?;

        timer.observe_duration();
        Ok(tasks)
    }
}

fn qualified_columns(table: &str) -> String {
    TASK_COLUMNS
        .split(',')
        .map(|c| format!("{}.{}", table, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Insert a pending task. If the payload already has an open task, that task
/// is returned instead of a second one.
pub async fn enqueue_in(conn: &mut PgConnection, task: &NewReviewTask) -> PostingResult<ReviewTask> {
    let sql = format!(
        r#"
        INSERT INTO review_tasks (task_id, tenant_id, kind, payload_id, priority, status, detail)
        VALUES ($1, $2, $3, $4, $5, 'pending', $6)
        ON CONFLICT (tenant_id, kind, payload_id) WHERE status IN ('pending', 'claimed')
        DO NOTHING
        RETURNING {}
        "#,
        TASK_COLUMNS
    );

    let inserted = sqlx::query_as::<_, ReviewTask>(&sql)
        .bind(Uuid::new_v4())
        .bind(task.tenant_id)
        .bind(task.kind.as_str())
        .bind(task.payload_id)
        .bind(task.priority.as_i16())
        .bind(&task.detail)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| PostingError::db("Failed to enqueue task", e))?;

    if let Some(created) = inserted {
        info!(
            task_id = %created.task_id,
            tenant_id = %created.tenant_id,
            kind = %created.kind.as_str(),
            priority = %created.priority.as_str(),
            "Review task enqueued"
        );
        return Ok(created);
    }

    let sql = format!(
        r#"
        SELECT {}
        FROM review_tasks
        WHERE tenant_id = $1 AND kind = $2 AND payload_id = $3
          AND status IN ('pending', 'claimed')
        "#,
        TASK_COLUMNS
    );
    let existing = sqlx::query_as::<_, ReviewTask>(&sql)
        .bind(task.tenant_id)
        .bind(task.kind.as_str())
        .bind(task.payload_id)
        .fetch_one(conn)
        .await
        .map_err(|e| PostingError::db("Failed to load open task", e))?;

    debug!(task_id = %existing.task_id, "Payload already has an open task");
    Ok(existing)
}

/// Lock a task row for the rest of the caller's transaction.
pub async fn lock_task(conn: &mut PgConnection, task_id: Uuid) -> PostingResult<ReviewTask> {
    let sql = format!(
        "SELECT {} FROM review_tasks WHERE task_id = $1 FOR UPDATE",
        TASK_COLUMNS
    );
    sqlx::query_as::<_, ReviewTask>(&sql)
        .bind(task_id)
        .fetch_optional(conn)
        .await
        .map_err(|e| PostingError::db("Failed to lock task", e))?
        .ok_or(PostingError::NotFound {
            entity: "task",
            id: task_id,
        })
}

/// Database clock, so lease checks compare against the same clock that set
/// the lease.
pub async fn db_now(conn: &mut PgConnection) -> PostingResult<DateTime<Utc>> {
    sqlx::query_scalar::<_, DateTime<Utc>>("SELECT clock_timestamp()")
        .fetch_one(conn)
        .await
        .map_err(|e| PostingError::db("Failed to read database clock", e))
}

/// Lock, check and resolve a task inside the caller's transaction.
pub async fn resolve_in(
    conn: &mut PgConnection,
    task_id: Uuid,
    worker_id: &str,
    outcome: &TaskOutcome,
    result_voucher_id: Option<Uuid>,
) -> PostingResult<ResolveAction> {
    let task = lock_task(conn, task_id).await?;
    let now = db_now(conn).await?;

    let action = task.check_resolution(worker_id, outcome, now)?;
    if action == ResolveAction::Apply {
        mark_resolved(conn, &task, outcome, result_voucher_id).await?;
    } else {
        debug!(task_id = %task_id, "Task already resolved with the same outcome");
    }
    Ok(action)
}

/// Write the terminal state of a task the caller has locked and checked.
pub async fn mark_resolved(
    conn: &mut PgConnection,
    task: &ReviewTask,
    outcome: &TaskOutcome,
    result_voucher_id: Option<Uuid>,
) -> PostingResult<()> {
    let outcome_json = serde_json::to_value(outcome)
        .map_err(|e| PostingError::Integrity(format!("unserializable outcome: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE review_tasks
        SET status = 'resolved',
            outcome = $2,
            result_voucher_id = $3,
            lease_expires_utc = NULL,
            resolved_utc = NOW(),
            updated_utc = NOW()
        WHERE task_id = $1
        "#,
    )
    .bind(task.task_id)
    .bind(outcome_json)
    .bind(result_voucher_id)
    .execute(conn)
    .await
    .map_err(|e| PostingError::db("Failed to resolve task", e))?;

    info!(
        task_id = %task.task_id,
        tenant_id = %task.tenant_id,
        result_voucher_id = ?result_voucher_id,
        "Task resolved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_columns_prefix_every_column() {
        let cols = qualified_columns("t");
        assert!(cols.starts_with("t.task_id, t.tenant_id"));
        assert!(cols.ends_with("t.resolved_utc"));
        assert_eq!(cols.matches("t.").count(), TASK_COLUMNS.split(',').count());
    }
}
