//! Unified persistence layer: SQLite/Postgres parity behind one pool handle.
//!
//! Repository functions take `&mut Tx<'_>` and branch once per query on the
//! backend to pick `$N` vs `?` bind-parameter syntax; both backends support
//! `RETURNING`, so the same logical statement shape is kept on both sides.

use crate::config::{Config, DbKind};
use crate::errors::KmsError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{postgres::PgPoolOptions, PgPool, Sqlite, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open pool for either backend, selected by `config.database_kind`.
#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

/// Active transaction, matching the `DbPool` variant it was opened from.
pub enum Tx<'a> {
    Sqlite(sqlx::Transaction<'a, Sqlite>),
    Postgres(sqlx::Transaction<'a, sqlx::Postgres>),
}

impl DbPool {
    pub fn kind(&self) -> DbKind {
        match self {
            DbPool::Sqlite(_) => DbKind::Sqlite,
            DbPool::Postgres(_) => DbKind::Postgres,
        }
    }

    /// Opens a connection pool and applies pending migrations.
    ///
    /// For SQLite: single-writer serialization (`WAL`, `busy_timeout`,
    /// `foreign_keys=ON`, `synchronous=NORMAL`) — deliberate, since SQLite
    /// serializes writers regardless, a single writer connection avoids
    /// `SQLITE_BUSY` storms under load. For Postgres: pool limits tuned to
    /// backend capacity.
    pub async fn open(config: &Config) -> Result<Self, KmsError> {
        match config.database_kind {
            DbKind::Sqlite => {
                let opts = SqliteConnectOptions::from_str(&config.database_url)
                    .map_err(|e| KmsError::Internal.log_source("sqlite connect options", &e))?
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                    .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                    .foreign_keys(true)
                    .busy_timeout(Duration::from_millis(5000));

                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect_with(opts)
                    .await
                    .map_err(KmsError::from)?;

                sqlx::migrate!("../../migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| KmsError::Internal.log_source("sqlite migrate", &e))?;

                info!("sqlite pool opened and migrated");
                Ok(DbPool::Sqlite(pool))
            }
            DbKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(config.max_open_conns)
                    .min_connections(2)
                    .acquire_timeout(Duration::from_secs(5))
                    .idle_timeout(Duration::from_secs(600))
                    .max_lifetime(Duration::from_secs(1800))
                    .connect(&config.database_url)
                    .await
                    .map_err(KmsError::from)?;

                sqlx::migrate!("../../migrations")
                    .run(&pool)
                    .await
                    .map_err(|e| KmsError::Internal.log_source("postgres migrate", &e))?;

                info!("postgres pool opened and migrated");
                Ok(DbPool::Postgres(pool))
            }
        }
    }

    pub async fn begin(&self) -> Result<Tx<'_>, KmsError> {
        match self {
            DbPool::Sqlite(pool) => Ok(Tx::Sqlite(pool.begin().await.map_err(KmsError::from)?)),
            DbPool::Postgres(pool) => {
                Ok(Tx::Postgres(pool.begin().await.map_err(KmsError::from)?))
            }
        }
    }
}

impl Tx<'_> {
    pub async fn commit(self) -> Result<(), KmsError> {
        match self {
            Tx::Sqlite(tx) => tx.commit().await.map_err(KmsError::from),
            Tx::Postgres(tx) => tx.commit().await.map_err(KmsError::from),
        }
    }

    pub async fn rollback(self) -> Result<(), KmsError> {
        match self {
            Tx::Sqlite(tx) => tx.rollback().await.map_err(KmsError::from),
            Tx::Postgres(tx) => tx.rollback().await.map_err(KmsError::from),
        }
    }

    pub fn kind(&self) -> DbKind {
        match self {
            Tx::Sqlite(_) => DbKind::Sqlite,
            Tx::Postgres(_) => DbKind::Postgres,
        }
    }
}

/// Runs `WithTransaction`-style scoped work: begins, runs `f`, commits on
/// `Ok`, rolls back on `Err`.
pub async fn with_transaction<'p, F, Fut, T>(pool: &'p DbPool, f: F) -> Result<T, KmsError>
where
    F: FnOnce(&mut Tx<'p>) -> Fut,
    Fut: std::future::Future<Output = Result<T, KmsError>>,
{
    let mut tx = pool.begin().await?;
    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            // Best-effort: the connection drop also rolls back if this fails.
            let _ = tx.rollback().await;
            Err(e)
        }
    }
}

/// Builds a comma-separated bind-parameter list in the dialect of `kind`,
/// starting at parameter index 1: `placeholders(Postgres, 3)` → `"$1, $2,
/// $3"`; `placeholders(Sqlite, 3)` → `"?, ?, ?"` (SQLite accepts unnumbered
/// positional `?`).
pub fn placeholders(kind: DbKind, n: usize) -> String {
    match kind {
        DbKind::Postgres => (1..=n)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", "),
        DbKind::Sqlite => vec!["?"; n].join(", "),
    }
}

impl KmsError {
    /// Logs `source` at error level with `context`, then returns `self`
    /// unchanged. Used for errors that shouldn't carry the underlying cause
    /// in their `Display` (the opaque-`Internal` policy) but should still be
    /// diagnosable from logs.
    fn log_source(self, context: &str, source: &dyn std::fmt::Display) -> Self {
        tracing::error!(context, %source, "internal error");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_postgres_is_dollar_numbered() {
        assert_eq!(placeholders(DbKind::Postgres, 3), "$1, $2, $3");
    }

    #[test]
    fn placeholders_sqlite_is_unnumbered() {
        assert_eq!(placeholders(DbKind::Sqlite, 3), "?, ?, ?");
    }

    #[test]
    fn placeholders_handles_single_param() {
        assert_eq!(placeholders(DbKind::Postgres, 1), "$1");
        assert_eq!(placeholders(DbKind::Sqlite, 1), "?");
    }
}
