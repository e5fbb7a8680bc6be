//! Repository for the durable elastic-key state machine.
//!
//! The single-active-generating invariant (§8 property 3) is enforced here,
//! not in the service layer: `insert_generate` is the only way a `generate`
//! row is created, and it checks-then-inserts inside the caller's
//! transaction. On Postgres this is additionally safe under concurrent
//! transactions because of the unique partial index on
//! `(pool_name) WHERE status = 'generate'` (see migrations); on SQLite the
//! single-writer connection makes the check-then-insert atomic by
//! construction.

use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::ElasticKey;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

pub async fn count_by_status(
    tx: &mut Tx<'_>,
    pool_name: &str,
    status: &str,
) -> Result<i64, KmsError> {
    let start = Instant::now();
    let result: Result<(i64,), sqlx::Error> = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as(
                "SELECT count(*) FROM elastic_keys WHERE pool_name = $1 AND status = $2",
            )
            .bind(pool_name)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as(
                "SELECT count(*) FROM elastic_keys WHERE pool_name = ? AND status = ?",
            )
            .bind(pool_name)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "elastic_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    Ok(result.map_err(KmsError::from)?.0)
}

/// Inserts a new `generate` row for `pool_name`, but only if none already
/// exists — the single-active-generating invariant. Returns `Ok(None)` (not
/// an error) if one already exists, so callers can treat "someone else is
/// already generating" as a no-op rather than a failure.
pub async fn insert_generate(
    tx: &mut Tx<'_>,
    ekid: Uuid,
    pool_name: &str,
) -> Result<Option<ElasticKey>, KmsError> {
    let existing = count_by_status(tx, pool_name, "generate").await?;
    if existing > 0 {
        return Ok(None);
    }

    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ElasticKey>(
                "INSERT INTO elastic_keys (ekid, pool_name, status) VALUES ($1, $2, 'generate') \
                 ON CONFLICT DO NOTHING \
                 RETURNING ekid, pool_name, status, material, created_at, updated_at",
            )
            .bind(ekid)
            .bind(pool_name)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ElasticKey>(
                "INSERT INTO elastic_keys (ekid, pool_name, status) VALUES (?, ?, 'generate') \
                 RETURNING ekid, pool_name, status, material, created_at, updated_at",
            )
            .bind(ekid)
            .bind(pool_name)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "elastic_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// Transitions a `generate` row to `active`, recording the produced
/// material (opaque KID reference or generated value).
pub async fn mark_active(tx: &mut Tx<'_>, ekid: Uuid, material: &str) -> Result<(), KmsError> {
    set_status_with_material(tx, ekid, "active", Some(material)).await
}

/// Inserts a row directly as `active`, bypassing the `generate` state. Used
/// by `ClaimOne`'s synchronous-generation fallback on a pool miss — the
/// caller generates the value inline so there is no `generate` window to
/// track.
pub async fn insert_active(
    tx: &mut Tx<'_>,
    ekid: Uuid,
    pool_name: &str,
    material: &str,
) -> Result<ElasticKey, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ElasticKey>(
                "INSERT INTO elastic_keys (ekid, pool_name, status, material) \
                 VALUES ($1, $2, 'active', $3) \
                 RETURNING ekid, pool_name, status, material, created_at, updated_at",
            )
            .bind(ekid)
            .bind(pool_name)
            .bind(material)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ElasticKey>(
                "INSERT INTO elastic_keys (ekid, pool_name, status, material) \
                 VALUES (?, ?, 'active', ?) \
                 RETURNING ekid, pool_name, status, material, created_at, updated_at",
            )
            .bind(ekid)
            .bind(pool_name)
            .bind(material)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "elastic_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// Transitions a `generate` row to `pending_delete_was_generate_failed` so
/// operators can inspect and prune (backfill failure semantics).
pub async fn mark_generate_failed(tx: &mut Tx<'_>, ekid: Uuid) -> Result<(), KmsError> {
    set_status_with_material(tx, ekid, "pending_delete_was_generate_failed", None).await
}

async fn set_status_with_material(
    tx: &mut Tx<'_>,
    ekid: Uuid,
    status: &str,
    material: Option<&str>,
) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query(
                "UPDATE elastic_keys SET status = $1, material = coalesce($2, material), \
                 updated_at = now() WHERE ekid = $3",
            )
            .bind(status)
            .bind(material)
            .bind(ekid)
            .execute(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query(
                "UPDATE elastic_keys SET status = ?, material = coalesce(?, material), \
                 updated_at = CURRENT_TIMESTAMP WHERE ekid = ?",
            )
            .bind(status)
            .bind(material)
            .bind(ekid)
            .execute(&mut **sq)
            .await
        }
    };
    record_db_query(
        "update",
        "elastic_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}

/// `ClaimOne(poolName)`: picks one `active` row and transitions it to
/// `started_delete` — the state transition IS the claim.
/// `SKIP LOCKED` lets concurrent claimants on Postgres avoid contending for
/// rows already claimed-in-flight by another transaction; SQLite relies on
/// single-writer serialization instead, so the lock hint is dropped there.
pub async fn claim_one(tx: &mut Tx<'_>, pool_name: &str) -> Result<Option<ElasticKey>, KmsError> {
    let start = Instant::now();
    let row: Result<Option<ElasticKey>, sqlx::Error> = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ElasticKey>(
                "SELECT ekid, pool_name, status, material, created_at, updated_at \
                 FROM elastic_keys WHERE pool_name = $1 AND status = 'active' \
                 LIMIT 1 FOR UPDATE SKIP LOCKED",
            )
            .bind(pool_name)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ElasticKey>(
                "SELECT ekid, pool_name, status, material, created_at, updated_at \
                 FROM elastic_keys WHERE pool_name = ? AND status = 'active' LIMIT 1",
            )
            .bind(pool_name)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "elastic_keys",
        if row.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    let Some(row) = row.map_err(KmsError::from)? else {
        return Ok(None);
    };

    set_status_with_material(tx, row.ekid, "started_delete", None).await?;
    Ok(Some(row))
}

/// Janitor sweep target: `started_delete` rows older than `grace` are
/// presumed abandoned by a crashed consumer (failure semantics).
pub async fn list_abandoned_started_delete(
    tx: &mut Tx<'_>,
    grace_seconds: i64,
) -> Result<Vec<ElasticKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ElasticKey>(
                "SELECT ekid, pool_name, status, material, created_at, updated_at \
                 FROM elastic_keys WHERE status = 'started_delete' \
                 AND updated_at < now() - make_interval(secs => $1)",
            )
            .bind(grace_seconds as f64)
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ElasticKey>(
                "SELECT ekid, pool_name, status, material, created_at, updated_at \
                 FROM elastic_keys WHERE status = 'started_delete' \
                 AND updated_at < datetime('now', '-' || ? || ' seconds')",
            )
            .bind(grace_seconds)
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "elastic_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn mark_deleted(tx: &mut Tx<'_>, ekid: Uuid) -> Result<(), KmsError> {
    set_status_with_material(tx, ekid, "deleted", None).await
}
