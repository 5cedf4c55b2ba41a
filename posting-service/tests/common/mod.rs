//! Common test utilities for posting-service integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use posting_service::config::{
    DatabaseConfig, MatchConfig, PostingConfig, PostingTimeouts, QueueConfig,
};
use posting_service::models::{
    AccountType, CandidateLine, ChartAccount, PostingCandidate, SourceRef, VatBreakdown,
};
use posting_service::services::{init_metrics, Database, PostingEngine};
use posting_service::startup::build_engine;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing and metrics for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,posting_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
        init_metrics();
    });
}

pub fn test_config(lease: Duration) -> PostingConfig {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run integration tests");

    PostingConfig {
        common: CommonConfig { port: 0 },
        service_name: "posting-service-test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 10,
            min_connections: 1,
        },
        queue: QueueConfig {
            lease,
            max_attempts: 2,
            sweep_interval: Duration::from_secs(1),
            claim_timeout: Duration::from_secs(5),
        },
        timeouts: PostingTimeouts {
            commit: Duration::from_secs(10),
            lock: Duration::from_secs(2),
        },
        matching: MatchConfig {
            amount_tolerance: Decimal::ONE,
            date_window_days: 3,
            date_cutoff_days: 45,
            ambiguity_margin: 0.05,
            max_subset_size: 4,
        },
    }
}

/// Database, engine and a fresh tenant with a seeded chart of accounts.
pub struct TestContext {
    pub db: Database,
    pub engine: PostingEngine,
    pub tenant_id: Uuid,
}

pub async fn setup() -> TestContext {
    setup_with_lease(Duration::from_secs(300)).await
}

pub async fn setup_with_lease(lease: Duration) -> TestContext {
    init_tracing();

    let config = test_config(lease);
    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    let tenant_id = Uuid::new_v4();
    seed_chart(&db, tenant_id).await;

    let engine = build_engine(&db, &config);
    TestContext {
        db,
        engine,
        tenant_id,
    }
}

async fn seed_chart(db: &Database, tenant_id: Uuid) {
    let accounts = [
        ("1500", "Kundefordringer", AccountType::Asset),
        ("1920", "Bankinnskudd", AccountType::Asset),
        ("2400", "Leverandørgjeld", AccountType::Liability),
        ("2740", "Oppgjørskonto merverdiavgift", AccountType::Liability),
        ("3000", "Salgsinntekt", AccountType::Revenue),
        ("6300", "Leie lokaler", AccountType::Expense),
        ("7790", "Øreavrunding", AccountType::Expense),
    ];
    for (code, name, account_type) in accounts {
        db.upsert_account(&ChartAccount {
            tenant_id,
            account_code: code.to_string(),
            name: name.to_string(),
            account_type,
            is_active: true,
        })
        .await
        .expect("Failed to seed account");
    }
}

/// Retire every open task so claim tests only see their own.
pub async fn quiesce_queue(db: &Database) {
    sqlx::query(
        "UPDATE review_tasks SET status = 'failed', claimed_by = NULL, lease_expires_utc = NULL \
         WHERE status IN ('pending', 'claimed')",
    )
    .execute(db.pool())
    .await
    .expect("Failed to quiesce review queue");
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, day).expect("valid test date")
}

pub fn supplier_source(kid: Option<&str>) -> SourceRef {
    SourceRef::SupplierInvoice {
        document_id: Uuid::new_v4(),
        invoice_number: format!("INV-{}", &Uuid::new_v4().simple().to_string()[..8]),
        vendor_ref: None,
        vendor_name: Some("Kontorbygg AS".to_string()),
        payment_reference: kid.map(str::to_string),
        due_date: Some(date(30)),
    }
}

/// Office rent with input VAT: 10000 + 2500 against 12500 payable.
pub fn rent_candidate(
    tenant_id: Uuid,
    payable: Decimal,
    confidence: f64,
    kid: Option<&str>,
) -> PostingCandidate {
    PostingCandidate {
        tenant_id,
        source: supplier_source(kid),
        accounting_date: Some(date(15)),
        description: "Office rent January".to_string(),
        currency: "NOK".to_string(),
        lines: vec![
            CandidateLine::debit("6300", Decimal::new(10000, 0)),
            CandidateLine::debit("2740", Decimal::new(2500, 0)),
            CandidateLine::credit("2400", payable),
        ],
        vat: VatBreakdown::default(),
        extractor_confidence: Some(confidence),
    }
}
