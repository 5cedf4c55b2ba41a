//! Review tasks distributed to workers through the durable queue.

use crate::error::ConcurrencyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    PostingReview,
    MatchReview,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostingReview => "posting_review",
            Self::MatchReview => "match_review",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posting_review" => Ok(Self::PostingReview),
            "match_review" => Ok(Self::MatchReview),
            other => Err(format!("unknown task kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for TaskKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// `pending -> claimed -> resolved`, `claimed -> pending` on release or lease
/// expiry, and `claimed -> failed` once the attempt budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Resolved,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "resolved" => Ok(Self::Resolved),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Queue priority. Higher values are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            i16::MIN..=0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl From<i16> for Priority {
    fn from(value: i16) -> Self {
        Self::from_i16(value)
    }
}

/// What a worker decided when resolving a task. Stored with the task so a
/// repeated resolve with the same outcome can be recognised as a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Approved { voucher_id: Uuid },
    Rejected { reason: String },
    Matched { match_ids: Vec<Uuid> },
    Dismissed { reason: String },
}

impl TaskOutcome {
    /// Same decision, ignoring ids generated while applying it.
    pub fn same_decision(&self, other: &TaskOutcome) -> bool {
        match (self, other) {
            (Self::Approved { .. }, Self::Approved { .. }) => true,
            (Self::Matched { .. }, Self::Matched { .. }) => true,
            (Self::Rejected { reason: a }, Self::Rejected { reason: b }) => a == b,
            (Self::Dismissed { reason: a }, Self::Dismissed { reason: b }) => a == b,
            _ => false,
        }
    }
}

/// Row of the `review_tasks` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReviewTask {
    pub task_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: TaskKind,
    /// Candidate id for posting reviews, bank transaction id for match reviews.
    pub payload_id: Uuid,
    #[sqlx(try_from = "i16")]
    pub priority: Priority,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    pub claimed_by: Option<String>,
    pub claimed_utc: Option<DateTime<Utc>>,
    pub lease_expires_utc: Option<DateTime<Utc>>,
    pub attempts: i32,
    /// Score checks or ranked match candidates shown to the reviewer.
    pub detail: serde_json::Value,
    #[sqlx(json(nullable))]
    pub outcome: Option<TaskOutcome>,
    pub result_voucher_id: Option<Uuid>,
    pub last_error: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

/// What `resolve` should do with a task in its current state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveAction {
    /// Claim is live and held by the caller.
    Apply,
    /// Already resolved with the same decision.
    AlreadyApplied,
}

impl ReviewTask {
    /// True when `worker_id` holds an unexpired claim at `now`.
    pub fn is_claimed_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Claimed
            && self.claimed_by.as_deref() == Some(worker_id)
            && self.lease_expires_utc.is_some_and(|expiry| expiry > now)
    }

    /// Decide whether `worker_id` may resolve this task with `outcome`.
    pub fn check_resolution(
        &self,
        worker_id: &str,
        outcome: &TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<ResolveAction, ConcurrencyError> {
        match self.status {
            TaskStatus::Resolved => match &self.outcome {
                Some(existing) if existing.same_decision(outcome) => {
                    Ok(ResolveAction::AlreadyApplied)
                }
                _ => Err(ConcurrencyError::TaskAlreadyResolved {
                    task_id: self.task_id,
                }),
            },
            TaskStatus::Claimed if self.is_claimed_by(worker_id, now) => Ok(ResolveAction::Apply),
            TaskStatus::Claimed | TaskStatus::Pending | TaskStatus::Failed => {
                Err(ConcurrencyError::StaleClaim {
                    task_id: self.task_id,
                })
            }
        }
    }
}

/// Input for enqueuing a task.
#[derive(Debug, Clone)]
pub struct NewReviewTask {
    pub tenant_id: Uuid,
    pub kind: TaskKind,
    pub payload_id: Uuid,
    pub priority: Priority,
    pub detail: serde_json::Value,
}

/// Counts from one pass of the lease sweeper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub requeued: u64,
    pub failed: u64,
}
