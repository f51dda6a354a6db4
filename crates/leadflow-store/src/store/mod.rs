//! SQLite-backed lead lifecycle store.
//!
//! Split into focused submodules:
//! - `leads`: lead registration, lookup, stage transitions, opt-out
//! - `history`: stage history ledger
//! - `templates`: follow-up and reminder template catalog
//! - `followups`: follow-up scheduler, due query, send/fail/cancel
//! - `responses`: inbound response handling
//! - `reminders`: appointments and their reminders
//! - `projections`: read-only dashboard queries

mod followups;
mod guarded;
mod history;
mod leads;
mod projections;
mod reminders;
mod responses;
mod rows;
mod templates;

pub use followups::{FollowUpPolicy, SendCompletion};
pub use reminders::BookingOutcome;
pub use responses::ResponseOutcome;

use chrono::{DateTime, Utc};
use leadflow_core::{
    config::{shellexpand, StoreConfig},
    error::LeadflowError,
    timefmt::format_ts,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub(crate) type Tx = Transaction<'static, Sqlite>;

/// Persistent lead store backed by SQLite.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new store, running migrations on first use.
    pub async fn new(config: &StoreConfig) -> Result<Self, LeadflowError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LeadflowError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| LeadflowError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| LeadflowError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("Lead store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Open a private in-memory store (single connection), fully migrated.
    pub async fn in_memory() -> Result<Self, LeadflowError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LeadflowError::Store(format!("invalid db path: {e}")))?
            .foreign_keys(true);
        // The database lives only as long as its one connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| LeadflowError::Store(format!("failed to open in-memory db: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin(&self) -> Result<Tx, LeadflowError> {
        self.pool
            .begin()
            .await
            .map_err(|e| LeadflowError::Store(format!("begin transaction failed: {e}")))
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), LeadflowError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[
            ("001_init", include_str!("../../migrations/001_init.sql")),
            (
                "002_appointments",
                include_str!("../../migrations/002_appointments.sql"),
            ),
            (
                "003_delivery_log",
                include_str!("../../migrations/003_delivery_log.sql"),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        LeadflowError::Store(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| LeadflowError::Store(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    LeadflowError::Store(format!("failed to record migration {name}: {e}"))
                })?;

            info!("applied migration {name}");
        }
        Ok(())
    }
}

/// Take the lead's write lock as the first statement of a transaction.
///
/// Everything after this in the same transaction sees a stable view of the
/// lead and its rows; concurrent writers for any lead wait on the busy timeout.
/// Returns `false` when the lead does not exist.
pub(crate) async fn lock_lead(
    conn: &mut SqliteConnection,
    phone: &str,
    now: DateTime<Utc>,
) -> Result<bool, LeadflowError> {
    let result = sqlx::query("UPDATE customer_leads SET updated_at = ? WHERE phone_number = ?")
        .bind(format_ts(now))
        .bind(phone)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("lock lead failed: {e}")))?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn commit(tx: Tx) -> Result<(), LeadflowError> {
    tx.commit()
        .await
        .map_err(|e| LeadflowError::Store(format!("commit failed: {e}")))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
