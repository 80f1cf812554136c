//! PostgreSQL relationship store.
//!
//! Reads permission rows from a table populated by an external import step.
//! Ignore lists are applied in SQL, threshold exclusions are computed once
//! at construction with the same two-pass policy as the in-memory filter,
//! and duplicate rows are merged in Rust with the shared dedup routine.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 4)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `TRUSTEE_WEB_TABLE`: Relationship table name (default: `mailbox_trustee`)

use async_trait::async_trait;
use regex_lite::Regex;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use crate::policy::{ConfigError, WebPolicy};
use crate::table::{dedup_rows, SchemaError};
use crate::threshold::ThresholdExclusions;
use crate::types::{Edge, Identity, PermissionRow, PermissionType};
use super::{RelationshipStore, StoreStats};

/// Default relationship table name.
pub const DEFAULT_TABLE: &str = "mailbox_trustee";

/// Columns the relationship table must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "mailbox_identity",
    "mailbox_type",
    "permission_type",
    "access_rights",
    "trustee_identity",
    "trustee_type",
];

const SELECT_COLUMNS: &str =
    "mailbox_identity, mailbox_type, permission_type, access_rights, trustee_identity, trustee_type";

// $1 ignored mailboxes, $2 ignored trustees, $3 ignored permission keys.
const IGNORE_FILTER: &str = "NOT (lower(mailbox_identity) = ANY($1)) \
     AND NOT (lower(trustee_identity) = ANY($2)) \
     AND NOT (lower(replace(replace(replace(permission_type, ' ', ''), '_', ''), '-', '')) = ANY($3))";

// $4 permissive mailboxes, $5 power trustees.
const EXCLUSION_FILTER: &str = "NOT (lower(mailbox_identity) = ANY($4)) \
     AND NOT (lower(trustee_identity) = ANY($5))";

fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*\.)?[A-Za-z_][A-Za-z0-9_]*$").expect("table pattern is valid")
    })
}

/// Validate a possibly schema-qualified SQL identifier.
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    if table_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTable(name.to_string()))
    }
}

/// Configuration for the PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 4).
    pub max_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Relationship table name (default: `mailbox_trustee`).
    pub table: String,
}

impl PostgresConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/exchange_permissions".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            table: std::env::var("TRUSTEE_WEB_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
        }
    }

    /// Override the connection URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Table does not carry the expected columns.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A stored row holds an unusable value.
    #[error("Invalid row in {table}: {message}")]
    InvalidRow {
        /// Table name.
        table: String,
        /// What was wrong.
        message: String,
    },
}

/// Bind values shared by every filtered query.
#[derive(Debug, Clone, Default)]
struct FilterBinds {
    ignore_mailbox: Vec<String>,
    ignore_trustee: Vec<String>,
    ignore_permission: Vec<String>,
    permissive_mailboxes: Vec<String>,
    power_trustees: Vec<String>,
}

impl FilterBinds {
    fn from_policy(policy: &WebPolicy) -> Self {
        Self {
            ignore_mailbox: policy.ignore_mailbox.iter().map(|i| i.as_str().to_string()).collect(),
            ignore_trustee: policy.ignore_trustee.iter().map(|i| i.as_str().to_string()).collect(),
            ignore_permission: policy
                .ignore_permission
                .iter()
                .flat_map(|p| p.keys().iter().map(|k| k.to_string()))
                .collect(),
            permissive_mailboxes: Vec::new(),
            power_trustees: Vec::new(),
        }
    }
}

/// PostgreSQL-backed relationship store.
pub struct PostgresRelationshipStore {
    pool: PgPool,
    table: String,
    binds: FilterBinds,
    exclusions: ThresholdExclusions,
}

impl PostgresRelationshipStore {
    /// Connect, verify the table schema and compute threshold exclusions.
    pub async fn new(config: PostgresConfig, policy: &WebPolicy) -> Result<Self, PostgresError> {
        validate_table_name(&config.table)?;
        policy.validate()?;

        tracing::info!(
            max_connections = config.max_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            table = %config.table,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await?;

        Self::with_pool(pool, config.table, policy).await
    }

    /// Build a store over an existing pool.
    pub async fn with_pool(pool: PgPool, table: String, policy: &WebPolicy) -> Result<Self, PostgresError> {
        validate_table_name(&table)?;
        verify_columns(&pool, &table).await?;

        let mut store = Self {
            pool,
            table,
            binds: FilterBinds::from_policy(policy),
            exclusions: ThresholdExclusions::default(),
        };
        store
            .compute_exclusions(policy.permissive_mailbox_threshold, policy.power_trustee_threshold)
            .await?;
        Ok(store)
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Identities removed by the threshold filter.
    pub fn exclusions(&self) -> &ThresholdExclusions {
        &self.exclusions
    }

    async fn compute_exclusions(&mut self, max_mailbox: usize, max_trustee: usize) -> Result<(), PostgresError> {
        let mailbox_sql = format!(
            "SELECT lower(mailbox_identity) AS identity FROM {table} \
             WHERE {IGNORE_FILTER} \
             GROUP BY lower(mailbox_identity) \
             HAVING COUNT(DISTINCT lower(trustee_identity)) > $4 \
             ORDER BY 1",
            table = self.table,
        );
        let permissive: Vec<String> = sqlx::query(&mailbox_sql)
            .bind(&self.binds.ignore_mailbox)
            .bind(&self.binds.ignore_trustee)
            .bind(&self.binds.ignore_permission)
            .bind(max_mailbox as i64)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>("identity"))
            .collect::<Result<_, _>>()?;

        // Trustee counts only see edges that survived the mailbox pass.
        let trustee_sql = format!(
            "SELECT lower(trustee_identity) AS identity FROM {table} \
             WHERE {IGNORE_FILTER} AND NOT (lower(mailbox_identity) = ANY($4)) \
             GROUP BY lower(trustee_identity) \
             HAVING COUNT(DISTINCT lower(mailbox_identity)) > $5 \
             ORDER BY 1",
            table = self.table,
        );
        let power: Vec<String> = sqlx::query(&trustee_sql)
            .bind(&self.binds.ignore_mailbox)
            .bind(&self.binds.ignore_trustee)
            .bind(&self.binds.ignore_permission)
            .bind(&permissive)
            .bind(max_trustee as i64)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<String, _>("identity"))
            .collect::<Result<_, _>>()?;

        self.exclusions = ThresholdExclusions {
            permissive_mailboxes: self.parse_identities(&permissive)?,
            power_trustees: self.parse_identities(&power)?,
        };
        self.binds.permissive_mailboxes = permissive;
        self.binds.power_trustees = power;

        tracing::info!(
            permissive_mailboxes = self.exclusions.permissive_mailboxes.len(),
            power_trustees = self.exclusions.power_trustees.len(),
            "Threshold exclusions computed"
        );
        Ok(())
    }

    fn parse_identities(&self, values: &[String]) -> Result<BTreeSet<Identity>, PostgresError> {
        values
            .iter()
            .map(|v| Identity::parse(v).map_err(|e| self.invalid(format!("{e}"))))
            .collect()
    }

    fn invalid(&self, message: String) -> PostgresError {
        PostgresError::InvalidRow { table: self.table.clone(), message }
    }

    fn parse_row(&self, row: &PgRow) -> Result<PermissionRow, PostgresError> {
        let mailbox: String = row.try_get("mailbox_identity")?;
        let trustee: String = row.try_get("trustee_identity")?;
        let permission: String = row.try_get("permission_type")?;
        let mailbox_type: Option<String> = row.try_get("mailbox_type")?;
        let trustee_type: Option<String> = row.try_get("trustee_type")?;
        let access_rights: Option<String> = row.try_get("access_rights")?;

        Ok(PermissionRow {
            mailbox: Identity::parse(&mailbox).map_err(|e| self.invalid(format!("mailbox_identity: {e}")))?,
            mailbox_type: mailbox_type.unwrap_or_default(),
            trustee: Identity::parse(&trustee).map_err(|e| self.invalid(format!("trustee_identity: {e}")))?,
            trustee_type: trustee_type.unwrap_or_default(),
            permission_type: PermissionType::from_str(&permission)
                .ok_or_else(|| self.invalid(format!("unknown permission_type {permission:?}")))?,
            access_rights: access_rights.unwrap_or_default(),
        })
    }

    async fn lookup(&self, key_column: &str, order_column: &str, key: &Identity) -> Result<Vec<Edge>, PostgresError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {table} \
             WHERE lower({key_column}) = $6 AND {IGNORE_FILTER} AND {EXCLUSION_FILTER} \
             ORDER BY lower({order_column}), permission_type, access_rights",
            table = self.table,
        );
        let rows = sqlx::query(&sql)
            .bind(&self.binds.ignore_mailbox)
            .bind(&self.binds.ignore_trustee)
            .bind(&self.binds.ignore_permission)
            .bind(&self.binds.permissive_mailboxes)
            .bind(&self.binds.power_trustees)
            .bind(key.as_str())
            .fetch_all(&self.pool)
            .await?;

        let parsed = rows
            .iter()
            .map(|r| self.parse_row(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dedup_rows(parsed))
    }
}

async fn verify_columns(pool: &PgPool, table: &str) -> Result<(), PostgresError> {
    let (schema, name) = match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    };
    let rows = sqlx::query(
        r#"
        SELECT lower(column_name) AS column_name
        FROM information_schema.columns
        WHERE table_name = $1 AND ($2::text IS NULL OR table_schema = $2)
        "#,
    )
    .bind(name)
    .bind(schema)
    .fetch_all(pool)
    .await?;

    let present: BTreeSet<String> = rows
        .iter()
        .map(|r| r.try_get::<String, _>("column_name"))
        .collect::<Result<_, _>>()?;
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|c| !present.contains(**c))
        .map(|c| c.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::MissingColumns { input: table.to_string(), missing }.into())
    }
}

#[async_trait]
impl RelationshipStore for PostgresRelationshipStore {
    type Error = PostgresError;

    async fn lookup_by_mailbox(&self, mailbox: &Identity) -> Result<Vec<Edge>, Self::Error> {
        self.lookup("mailbox_identity", "trustee_identity", mailbox).await
    }

    async fn lookup_by_trustee(&self, trustee: &Identity) -> Result<Vec<Edge>, Self::Error> {
        self.lookup("trustee_identity", "mailbox_identity", trustee).await
    }

    async fn stats(&self) -> Result<StoreStats, Self::Error> {
        let sql = format!(
            "SELECT COUNT(*) AS edge_count FROM ( \
                 SELECT DISTINCT lower(mailbox_identity), lower(trustee_identity) FROM {table} \
                 WHERE {IGNORE_FILTER} AND {EXCLUSION_FILTER} \
             ) pairs",
            table = self.table,
        );
        let row = sqlx::query(&sql)
            .bind(&self.binds.ignore_mailbox)
            .bind(&self.binds.ignore_trustee)
            .bind(&self.binds.ignore_permission)
            .bind(&self.binds.permissive_mailboxes)
            .bind(&self.binds.power_trustees)
            .fetch_one(&self.pool)
            .await?;
        let edge_count: i64 = row.try_get("edge_count")?;

        Ok(StoreStats {
            edge_count: usize::try_from(edge_count).unwrap_or_default(),
            excluded_mailboxes: self.exclusions.permissive_mailboxes.len(),
            excluded_trustees: self.exclusions.power_trustees.len(),
            load: None,
        })
    }
}
