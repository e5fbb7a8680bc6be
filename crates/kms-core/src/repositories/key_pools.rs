use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::KeyPool;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

#[expect(clippy::too_many_arguments)]
pub async fn create(
    tx: &mut Tx<'_>,
    pool_id: Uuid,
    tenant_id: Uuid,
    name: &str,
    description: Option<&str>,
    algorithm: &str,
    key_use: &str,
    key_ops: &str,
    import_allowed: bool,
    versioning_allowed: bool,
    export_allowed: bool,
    status: &str,
) -> Result<KeyPool, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, KeyPool>(
                r#"
                INSERT INTO key_pools (
                    pool_id, tenant_id, name, description, algorithm, key_use, key_ops,
                    import_allowed, versioning_allowed, export_allowed, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING pool_id, tenant_id, name, description, algorithm, key_use, key_ops,
                    import_allowed, versioning_allowed, export_allowed, status,
                    current_key_id, created_at, updated_at
                "#,
            )
            .bind(pool_id)
            .bind(tenant_id)
            .bind(name)
            .bind(description)
            .bind(algorithm)
            .bind(key_use)
            .bind(key_ops)
            .bind(import_allowed)
            .bind(versioning_allowed)
            .bind(export_allowed)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, KeyPool>(
                r#"
                INSERT INTO key_pools (
                    pool_id, tenant_id, name, description, algorithm, key_use, key_ops,
                    import_allowed, versioning_allowed, export_allowed, status
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING pool_id, tenant_id, name, description, algorithm, key_use, key_ops,
                    import_allowed, versioning_allowed, export_allowed, status,
                    current_key_id, created_at, updated_at
                "#,
            )
            .bind(pool_id)
            .bind(tenant_id)
            .bind(name)
            .bind(description)
            .bind(algorithm)
            .bind(key_use)
            .bind(key_ops)
            .bind(import_allowed)
            .bind(versioning_allowed)
            .bind(export_allowed)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };

    record_db_query(
        "insert",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_id(tx: &mut Tx<'_>, pool_id: Uuid) -> Result<Option<KeyPool>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools WHERE pool_id = $1",
            )
            .bind(pool_id)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools WHERE pool_id = ?",
            )
            .bind(pool_id)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_name(
    tx: &mut Tx<'_>,
    tenant_id: Uuid,
    name: &str,
) -> Result<Option<KeyPool>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools WHERE tenant_id = $1 AND name = $2",
            )
            .bind(tenant_id)
            .bind(name)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools WHERE tenant_id = ? AND name = ?",
            )
            .bind(tenant_id)
            .bind(name)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// `List(filter, paging, sort)` restricted to one tenant; paging is
/// keyset-by-`pool_id` (UUIDv7, time-sortable) with an `after` cursor.
pub async fn list_for_tenant(
    tx: &mut Tx<'_>,
    tenant_id: Uuid,
    after: Option<Uuid>,
    limit: i64,
) -> Result<Vec<KeyPool>, KmsError> {
    let start = Instant::now();
    let after = after.unwrap_or(Uuid::nil());
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools \
                 WHERE tenant_id = $1 AND pool_id > $2 AND status != 'deleted' \
                 ORDER BY pool_id ASC LIMIT $3",
            )
            .bind(tenant_id)
            .bind(after)
            .bind(limit)
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, KeyPool>(
                "SELECT pool_id, tenant_id, name, description, algorithm, key_use, key_ops, \
                 import_allowed, versioning_allowed, export_allowed, status, current_key_id, \
                 created_at, updated_at FROM key_pools \
                 WHERE tenant_id = ? AND pool_id > ? AND status != 'deleted' \
                 ORDER BY pool_id ASC LIMIT ?",
            )
            .bind(tenant_id)
            .bind(after)
            .bind(limit)
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn set_status(tx: &mut Tx<'_>, pool_id: Uuid, status: &str) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query("UPDATE key_pools SET status = $1, updated_at = now() WHERE pool_id = $2")
                .bind(status)
                .bind(pool_id)
                .execute(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => sqlx::query(
            "UPDATE key_pools SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE pool_id = ?",
        )
        .bind(status)
        .bind(pool_id)
        .execute(&mut **sq)
        .await,
    };
    record_db_query(
        "update",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}

pub async fn set_current_key(
    tx: &mut Tx<'_>,
    pool_id: Uuid,
    key_id: Uuid,
) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => sqlx::query(
            "UPDATE key_pools SET current_key_id = $1, updated_at = now() WHERE pool_id = $2",
        )
        .bind(key_id)
        .bind(pool_id)
        .execute(&mut **pg)
        .await,
        Tx::Sqlite(sq) => sqlx::query(
            "UPDATE key_pools SET current_key_id = ?, updated_at = CURRENT_TIMESTAMP WHERE pool_id = ?",
        )
        .bind(key_id)
        .bind(pool_id)
        .execute(&mut **sq)
        .await,
    };
    record_db_query(
        "update",
        "key_pools",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}
