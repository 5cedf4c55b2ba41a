//! Database service for posting-service: pool handling and tenant reference data.

use crate::error::{PostingError, PostingResult};
use crate::models::{ChartAccount, ChartOfAccounts, Partner, PartnerKind, TenantSettings};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "posting-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests that manage their own pool).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tenant Settings
    // -------------------------------------------------------------------------

    /// Accounting policy for a tenant, falling back to defaults when no row exists.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn load_settings(&self, tenant_id: Uuid) -> PostingResult<TenantSettings> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_settings"])
            .start_timer();

        let settings = sqlx::query_as::<_, TenantSettings>(
            r#"
            SELECT tenant_id, currency, minor_units, auto_post_threshold, auto_match_threshold,
                   payable_control_account, receivable_control_account, rounding_account,
                   rounding_tolerance
            FROM tenant_settings
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PostingError::db("Failed to load tenant settings", e))?;

        timer.observe_duration();

        Ok(settings.unwrap_or_else(|| {
            debug!("No tenant settings row, using defaults");
            TenantSettings::defaults(tenant_id)
        }))
    }

    #[instrument(skip(self, settings), fields(tenant_id = %settings.tenant_id))]
    pub async fn upsert_settings(&self, settings: &TenantSettings) -> PostingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (
                tenant_id, currency, minor_units, auto_post_threshold, auto_match_threshold,
                payable_control_account, receivable_control_account, rounding_account,
                rounding_tolerance
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tenant_id) DO UPDATE SET
                currency = EXCLUDED.currency,
                minor_units = EXCLUDED.minor_units,
                auto_post_threshold = EXCLUDED.auto_post_threshold,
                auto_match_threshold = EXCLUDED.auto_match_threshold,
                payable_control_account = EXCLUDED.payable_control_account,
                receivable_control_account = EXCLUDED.receivable_control_account,
                rounding_account = EXCLUDED.rounding_account,
                rounding_tolerance = EXCLUDED.rounding_tolerance,
                updated_utc = NOW()
            "#,
        )
        .bind(settings.tenant_id)
        .bind(&settings.currency)
        .bind(settings.minor_units)
        .bind(settings.auto_post_threshold)
        .bind(settings.auto_match_threshold)
        .bind(&settings.payable_control_account)
        .bind(&settings.receivable_control_account)
        .bind(&settings.rounding_account)
        .bind(settings.rounding_tolerance)
        .execute(&self.pool)
        .await
        .map_err(|e| PostingError::db("Failed to save tenant settings", e))?;

        info!("Tenant settings saved");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Chart of Accounts
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn load_chart(&self, tenant_id: Uuid) -> PostingResult<ChartOfAccounts> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_chart"])
            .start_timer();

        let accounts = sqlx::query_as::<_, ChartAccount>(
            r#"
            SELECT tenant_id, account_code, name, account_type, is_active
            FROM chart_of_accounts
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PostingError::db("Failed to load chart of accounts", e))?;

        timer.observe_duration();

        Ok(ChartOfAccounts::new(accounts))
    }

    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id, account_code = %account.account_code))]
    pub async fn upsert_account(&self, account: &ChartAccount) -> PostingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chart_of_accounts (tenant_id, account_code, name, account_type, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, account_code) DO UPDATE SET
                name = EXCLUDED.name,
                account_type = EXCLUDED.account_type,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(account.tenant_id)
        .bind(account.account_code.trim())
        .bind(&account.name)
        .bind(account.account_type.as_str())
        .bind(account.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| PostingError::db("Failed to save account", e))?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Partners
    // -------------------------------------------------------------------------

    #[instrument(skip(self, name, org_number, external_ref), fields(tenant_id = %tenant_id, kind = %kind.as_str()))]
    pub async fn create_partner(
        &self,
        tenant_id: Uuid,
        kind: PartnerKind,
        name: &str,
        org_number: Option<&str>,
        external_ref: Option<&str>,
    ) -> PostingResult<Partner> {
        let partner = sqlx::query_as::<_, Partner>(
            r#"
            INSERT INTO partners (partner_id, tenant_id, kind, name, org_number, external_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING partner_id, tenant_id, kind, name, org_number, external_ref, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(kind.as_str())
        .bind(name)
        .bind(org_number)
        .bind(external_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PostingError::db("Failed to create partner", e))?;

        info!(partner_id = %partner.partner_id, "Partner created");
        Ok(partner)
    }
}

/// Resolve a partner by organisation number or external id. Runs on the
/// caller's connection so it sees the same snapshot as the posting work.
pub async fn find_partner(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    kind: PartnerKind,
    reference: &str,
) -> PostingResult<Option<Partner>> {
    sqlx::query_as::<_, Partner>(
        r#"
        SELECT partner_id, tenant_id, kind, name, org_number, external_ref, created_utc
        FROM partners
        WHERE tenant_id = $1 AND kind = $2 AND (org_number = $3 OR external_ref = $3)
        ORDER BY (org_number IS NOT DISTINCT FROM $3) DESC, created_utc
        LIMIT 1
        "#,
    )
    .bind(tenant_id)
    .bind(kind.as_str())
    .bind(reference.trim())
    .fetch_optional(conn)
    .await
    .map_err(|e| PostingError::db("Failed to resolve partner", e))
}
