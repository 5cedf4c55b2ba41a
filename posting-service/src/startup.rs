//! Application startup and lifecycle management.

use crate::config::PostingConfig;
use crate::handlers::{self, candidates, reconciliation, tasks};
use crate::services::{
    init_metrics, ConfidenceEvaluator, Database, LeaseSweeper, LedgerPoster, PostingEngine,
    ReconciliationStore, SweeperConfig, TaskQueue,
};
use axum::{
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: PostingConfig,
    pub db: Arc<Database>,
    pub engine: Arc<PostingEngine>,
}

/// Wire the posting engine and its collaborators onto one pool.
pub fn build_engine(db: &Database, config: &PostingConfig) -> PostingEngine {
    let poster = LedgerPoster::new(db.clone(), config.timeouts.commit, config.timeouts.lock);
    let queue = TaskQueue::new(db.clone(), config.queue.lease, config.queue.claim_timeout);
    let reconciliation = ReconciliationStore::new(db.clone(), config.matching.matcher());

    PostingEngine::new(
        db.clone(),
        ConfidenceEvaluator::default(),
        poster,
        queue,
        reconciliation,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: PostingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: PostingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: PostingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let engine = build_engine(&db, &config);

        let state = AppState {
            config: config.clone(),
            db: Arc::new(db),
            engine: Arc::new(engine),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Posting service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    pub fn engine(&self) -> Arc<PostingEngine> {
        self.state.engine.clone()
    }

    /// Cancelling this token stops the lease sweeper.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run the HTTP server and the lease sweeper until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let queue_config = &self.state.config.queue;
        let sweeper = LeaseSweeper::new(
            self.state.engine.queue().clone(),
            SweeperConfig {
                interval: queue_config.sweep_interval,
                max_attempts: queue_config.max_attempts,
                max_retry: queue_config.sweep_interval,
            },
        );
        let sweeper_token = sweeper.shutdown_token();
        let sweeper_handle = tokio::spawn(sweeper.run());

        let shutdown = self.shutdown_token.clone();
        tokio::spawn({
            let sweeper_token = sweeper_token.clone();
            async move {
                shutdown.cancelled().await;
                sweeper_token.cancel();
            }
        });

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_handler))
            .route("/api/v1/candidates", post(candidates::submit_candidate))
            .route(
                "/api/v1/tenants/:tenant_id/candidates/:candidate_id",
                get(candidates::get_candidate),
            )
            .route(
                "/api/v1/tenants/:tenant_id/vouchers/:voucher_id",
                get(candidates::get_voucher),
            )
            .route(
                "/api/v1/tenants/:tenant_id/vouchers/:voucher_id/reverse",
                post(candidates::reverse_voucher),
            )
            .route("/api/v1/tasks/claim", post(tasks::claim_task))
            .route("/api/v1/tasks/:task_id/resolve", post(tasks::resolve_task))
            .route("/api/v1/tasks/:task_id/release", post(tasks::release_task))
            .route("/api/v1/tenants/:tenant_id/tasks", get(tasks::list_tasks))
            .route(
                "/api/v1/tenants/:tenant_id/tasks/:task_id",
                get(tasks::get_task),
            )
            .route(
                "/api/v1/tenants/:tenant_id/bank-transactions",
                post(reconciliation::import_transactions),
            )
            .route(
                "/api/v1/tenants/:tenant_id/bank-transactions/:transaction_id/candidates",
                get(reconciliation::find_matches),
            )
            .route(
                "/api/v1/tenants/:tenant_id/bank-transactions/:transaction_id/matches",
                get(reconciliation::get_matches),
            )
            .route(
                "/api/v1/tenants/:tenant_id/bank-transactions/:transaction_id/unmatch",
                post(reconciliation::unmatch),
            )
            .route(
                "/api/v1/tenants/:tenant_id/open-items",
                get(reconciliation::open_items),
            )
            .route(
                "/api/v1/tenants/:tenant_id/consistency",
                get(reconciliation::consistency),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        tracing::info!(
            service = "posting-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.http_listener, router).await;

        sweeper_token.cancel();
        sweeper_handle.await.ok();

        if let Err(e) = result {
            tracing::error!(error = %e, "HTTP server error");
            return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
        }
        Ok(())
    }
}
