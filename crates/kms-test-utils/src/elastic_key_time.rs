//! Direct-SQL timestamp manipulation for testing the elastic-key janitor
//! sweep: `elastic::run_janitor_sweep` reaps `started_delete`
//! rows whose `updated_at` is older than its grace period, so tests need to
//! backdate a row's `updated_at` without waiting for real time to pass.

use chrono::{DateTime, Utc};
use kms_core::db::DbPool;
use uuid::Uuid;

/// Sets `elastic_keys.updated_at` for the given `ekid` directly, bypassing
/// the service layer. Branches on backend like the repository functions do,
/// since `DbPool` has no generic "run this SQL" escape hatch.
pub async fn set_elastic_key_updated_at(db: &DbPool, ekid: Uuid, updated_at: DateTime<Utc>) -> Result<(), sqlx::Error> {
    match db {
        DbPool::Sqlite(pool) => {
            sqlx::query("UPDATE elastic_keys SET updated_at = ? WHERE ekid = ?")
                .bind(updated_at)
                .bind(ekid)
                .execute(pool)
                .await?;
        }
        DbPool::Postgres(pool) => {
            sqlx::query("UPDATE elastic_keys SET updated_at = $1 WHERE ekid = $2")
                .bind(updated_at)
                .bind(ekid)
                .execute(pool)
                .await?;
        }
    }
    Ok(())
}

/// Backdates a `started_delete` row past a janitor's grace period, making it
/// eligible for the next sweep.
pub async fn make_elastic_key_janitor_eligible(db: &DbPool, ekid: Uuid, grace_seconds: i64) -> Result<(), sqlx::Error> {
    let backdated = Utc::now() - chrono::Duration::seconds(grace_seconds + 60);
    set_elastic_key_updated_at(db, ekid, backdated).await
}
