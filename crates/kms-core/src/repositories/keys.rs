use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::Key;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

#[expect(clippy::too_many_arguments)]
pub async fn create(
    tx: &mut Tx<'_>,
    key_id: Uuid,
    pool_id: Uuid,
    version: i64,
    material: &str,
    public_material: Option<&str>,
    status: &str,
) -> Result<Key, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, Key>(
                r#"
                INSERT INTO keys (key_id, pool_id, version, material, public_material, status, generate_date)
                VALUES ($1, $2, $3, $4, $5, $6, now())
                RETURNING key_id, pool_id, version, material, public_material, status,
                    generate_date, activate_date, expire_date
                "#,
            )
            .bind(key_id)
            .bind(pool_id)
            .bind(version)
            .bind(material)
            .bind(public_material)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, Key>(
                r#"
                INSERT INTO keys (key_id, pool_id, version, material, public_material, status, generate_date)
                VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
                RETURNING key_id, pool_id, version, material, public_material, status,
                    generate_date, activate_date, expire_date
                "#,
            )
            .bind(key_id)
            .bind(pool_id)
            .bind(version)
            .bind(material)
            .bind(public_material)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_id(tx: &mut Tx<'_>, key_id: Uuid) -> Result<Option<Key>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys WHERE key_id = $1",
            )
            .bind(key_id)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys WHERE key_id = ?",
            )
            .bind(key_id)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// At most one `Key` per pool with `status = active` (invariant,
/// §8 property 2).
pub async fn get_active_for_pool(
    tx: &mut Tx<'_>,
    pool_id: Uuid,
) -> Result<Option<Key>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys \
                 WHERE pool_id = $1 AND status = 'active'",
            )
            .bind(pool_id)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys \
                 WHERE pool_id = ? AND status = 'active'",
            )
            .bind(pool_id)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn list_for_pool(tx: &mut Tx<'_>, pool_id: Uuid) -> Result<Vec<Key>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys \
                 WHERE pool_id = $1 ORDER BY version DESC",
            )
            .bind(pool_id)
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, Key>(
                "SELECT key_id, pool_id, version, material, public_material, status, \
                 generate_date, activate_date, expire_date FROM keys \
                 WHERE pool_id = ? ORDER BY version DESC",
            )
            .bind(pool_id)
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn max_version(tx: &mut Tx<'_>, pool_id: Uuid) -> Result<i64, KmsError> {
    let start = Instant::now();
    let result: Result<Option<(Option<i64>,)>, sqlx::Error> = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as("SELECT max(version) FROM keys WHERE pool_id = $1")
                .bind(pool_id)
                .fetch_optional(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as("SELECT max(version) FROM keys WHERE pool_id = ?")
                .bind(pool_id)
                .fetch_optional(&mut **sq)
                .await
        }
    };
    record_db_query(
        "select",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    Ok(result.map_err(KmsError::from)?.and_then(|row| row.0).unwrap_or(0))
}

/// Demotes the current active key (if any) to `inactive` and activates
/// `new_key_id` — the write half of `Rotate(pool)`.
pub async fn rotate(tx: &mut Tx<'_>, pool_id: Uuid, new_key_id: Uuid) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query(
                "UPDATE keys SET status = 'inactive' WHERE pool_id = $1 AND status = 'active'",
            )
            .bind(pool_id)
            .execute(&mut **pg)
            .await
            .and(
                sqlx::query(
                    "UPDATE keys SET status = 'active', activate_date = now() WHERE key_id = $1",
                )
                .bind(new_key_id)
                .execute(&mut **pg)
                .await,
            )
        }
        Tx::Sqlite(sq) => {
            sqlx::query("UPDATE keys SET status = 'inactive' WHERE pool_id = ? AND status = 'active'")
                .bind(pool_id)
                .execute(&mut **sq)
                .await
                .and(
                    sqlx::query(
                        "UPDATE keys SET status = 'active', activate_date = CURRENT_TIMESTAMP WHERE key_id = ?",
                    )
                    .bind(new_key_id)
                    .execute(&mut **sq)
                    .await,
                )
        }
    };
    record_db_query(
        "update",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}

pub async fn set_status(tx: &mut Tx<'_>, key_id: Uuid, status: &str) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => sqlx::query("UPDATE keys SET status = $1 WHERE key_id = $2")
            .bind(status)
            .bind(key_id)
            .execute(&mut **pg)
            .await,
        Tx::Sqlite(sq) => sqlx::query("UPDATE keys SET status = ? WHERE key_id = ?")
            .bind(status)
            .bind(key_id)
            .execute(&mut **sq)
            .await,
    };
    record_db_query(
        "update",
        "keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}
