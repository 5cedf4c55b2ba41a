//! Review Queue Integration Tests
//!
//! Claims are global across tenants, so every test here runs serially on a
//! quiesced queue.

mod common;

use common::{quiesce_queue, setup, setup_with_lease};
use posting_service::error::{ConcurrencyError, PostingError};
use posting_service::models::{
    NewReviewTask, Priority, ResolveAction, TaskKind, TaskOutcome, TaskStatus,
};
use serial_test::serial;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

fn review_task(tenant_id: Uuid, priority: Priority) -> NewReviewTask {
    NewReviewTask {
        tenant_id,
        kind: TaskKind::MatchReview,
        payload_id: Uuid::new_v4(),
        priority,
        detail: serde_json::json!({ "candidates": [] }),
    }
}

fn dismissed() -> TaskOutcome {
    TaskOutcome::Dismissed {
        reason: "handled".to_string(),
    }
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn concurrent_claimers_never_share_a_task() {
    let ctx = setup().await;
    quiesce_queue(&ctx.db).await;

    let mut expected = HashSet::new();
    for _ in 0..20 {
        let task = ctx
            .engine
            .queue()
            .enqueue(&review_task(ctx.tenant_id, Priority::Medium))
            .await
            .unwrap();
        expected.insert(task.task_id);
    }

    let mut workers = Vec::new();
    for n in 0..5 {
        let queue = ctx.engine.queue().clone();
        workers.push(tokio::spawn(async move {
            let worker_id = format!("worker-{}", n);
            let mut claimed = Vec::new();
            while let Some(task) = queue
                .claim_next(&worker_id, &[TaskKind::MatchReview])
                .await
                .unwrap()
            {
                assert_eq!(task.claimed_by.as_deref(), Some(worker_id.as_str()));
                let action = queue
                    .resolve(task.task_id, &worker_id, dismissed())
                    .await
                    .unwrap();
                assert_eq!(action, ResolveAction::Apply);
                claimed.push(task.task_id);
            }
            claimed
        }));
    }

    let mut seen = Vec::new();
    for worker in workers {
        seen.extend(worker.await.unwrap());
    }

    let unique: HashSet<Uuid> = seen.iter().copied().collect();
    assert_eq!(seen.len(), unique.len(), "a task was claimed twice");
    assert_eq!(unique, expected);
}

#[tokio::test]
#[ignore]
#[serial]
async fn higher_priority_is_claimed_first() {
    let ctx = setup().await;
    quiesce_queue(&ctx.db).await;

    let queue = ctx.engine.queue();
    let low = queue
        .enqueue(&review_task(ctx.tenant_id, Priority::Low))
        .await
        .unwrap();
    let high = queue
        .enqueue(&review_task(ctx.tenant_id, Priority::High))
        .await
        .unwrap();

    let first = queue
        .claim_next("worker-a", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();
    let second = queue
        .claim_next("worker-a", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.task_id, high.task_id);
    assert_eq!(second.task_id, low.task_id);

    // Kinds filter: nothing of the other kind is pending.
    assert!(queue
        .claim_next("worker-a", &[TaskKind::PostingReview])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore]
#[serial]
async fn enqueue_is_idempotent_per_open_payload() {
    let ctx = setup().await;
    quiesce_queue(&ctx.db).await;

    let task = review_task(ctx.tenant_id, Priority::Medium);
    let first = ctx.engine.queue().enqueue(&task).await.unwrap();
    let second = ctx.engine.queue().enqueue(&task).await.unwrap();
    assert_eq!(first.task_id, second.task_id);

    let open = ctx
        .engine
        .queue()
        .list_tasks(ctx.tenant_id, Some(TaskStatus::Pending), 10)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn expired_lease_is_requeued_then_failed() {
    let ctx = setup_with_lease(Duration::from_secs(1)).await;
    quiesce_queue(&ctx.db).await;

    let queue = ctx.engine.queue();
    let task = queue
        .enqueue(&review_task(ctx.tenant_id, Priority::Medium))
        .await
        .unwrap();

    queue
        .claim_next("slow-worker", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // The lease is gone, so the late resolve is refused.
    let err = queue
        .resolve(task.task_id, "slow-worker", dismissed())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PostingError::Concurrency(ConcurrencyError::StaleClaim { .. })
    ));

    let report = queue.requeue_expired(2).await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 0);

    let requeued = queue
        .get_task(ctx.tenant_id, task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert_eq!(requeued.attempts, 1);
    assert!(requeued.claimed_by.is_none());
    assert!(requeued.last_error.is_some());

    queue
        .claim_next("slow-worker-2", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let report = queue.requeue_expired(2).await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = queue
        .get_task(ctx.tenant_id, task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.attempts, 2);

    assert!(queue
        .claim_next("worker-c", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore]
#[serial]
async fn release_requires_the_owning_worker() {
    let ctx = setup().await;
    quiesce_queue(&ctx.db).await;

    let queue = ctx.engine.queue();
    let task = queue
        .enqueue(&review_task(ctx.tenant_id, Priority::Medium))
        .await
        .unwrap();
    queue
        .claim_next("owner", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();

    let err = queue.release(task.task_id, "intruder").await.unwrap_err();
    assert!(matches!(
        err,
        PostingError::Concurrency(ConcurrencyError::StaleClaim { .. })
    ));

    queue.release(task.task_id, "owner").await.unwrap();

    let released = queue
        .get_task(ctx.tenant_id, task.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(released.status, TaskStatus::Pending);
    assert_eq!(released.attempts, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn repeated_resolve_is_idempotent_and_conflicts_are_refused() {
    let ctx = setup().await;
    quiesce_queue(&ctx.db).await;

    let queue = ctx.engine.queue();
    let task = queue
        .enqueue(&review_task(ctx.tenant_id, Priority::Medium))
        .await
        .unwrap();
    queue
        .claim_next("worker-d", &[TaskKind::MatchReview])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        queue
            .resolve(task.task_id, "worker-d", dismissed())
            .await
            .unwrap(),
        ResolveAction::Apply
    );
    assert_eq!(
        queue
            .resolve(task.task_id, "worker-d", dismissed())
            .await
            .unwrap(),
        ResolveAction::AlreadyApplied
    );

    let err = queue
        .resolve(
            task.task_id,
            "worker-d",
            TaskOutcome::Dismissed {
                reason: "something else".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PostingError::Concurrency(ConcurrencyError::TaskAlreadyResolved { .. })
    ));
}
