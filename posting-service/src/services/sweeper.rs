//! Background lease sweeper for the review queue.

use crate::error::PostingError;
use crate::models::SweepReport;
use crate::services::metrics::record_error;
use crate::services::queue::TaskQueue;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub max_attempts: i32,
    /// Upper bound on retrying one sweep after transient failures.
    pub max_retry: Duration,
}

pub struct LeaseSweeper {
    queue: TaskQueue,
    config: SweeperConfig,
    shutdown_token: CancellationToken,
}

impl LeaseSweeper {
    pub fn new(queue: TaskQueue, config: SweeperConfig) -> Self {
        Self {
            queue,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            max_attempts = self.config.max_attempts,
            "Lease sweeper started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Lease sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if report.requeued + report.failed > 0 => {
                            tracing::info!(
                                requeued = report.requeued,
                                failed = report.failed,
                                "Lease sweep completed"
                            );
                        }
                        Ok(_) => tracing::debug!("Lease sweep found nothing to do"),
                        Err(e) => {
                            record_error(e.reason());
                            tracing::error!(error = %e, "Lease sweep failed");
                        }
                    }
                }
            }
        }
    }

    /// One sweep, retried with exponential backoff while the failure is transient.
    pub async fn sweep_once(&self) -> Result<SweepReport, PostingError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_retry),
            ..Default::default()
        };

        retry(backoff, || async {
            self.queue
                .requeue_expired(self.config.max_attempts)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        tracing::warn!(error = %e, "Transient sweep failure, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        })
        .await
    }
}
