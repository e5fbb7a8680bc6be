use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::ContentKey;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

pub async fn create(
    tx: &mut Tx<'_>,
    kid: Uuid,
    intermediate_kid: Uuid,
    encrypted_material: &str,
    status: &str,
) -> Result<ContentKey, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ContentKey>(
                "INSERT INTO content_keys (kid, intermediate_kid, encrypted_material, status) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING kid, intermediate_kid, encrypted_material, created_at, status",
            )
            .bind(kid)
            .bind(intermediate_kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ContentKey>(
                "INSERT INTO content_keys (kid, intermediate_kid, encrypted_material, status) \
                 VALUES (?, ?, ?, ?) \
                 RETURNING kid, intermediate_kid, encrypted_material, created_at, status",
            )
            .bind(kid)
            .bind(intermediate_kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "content_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_active(tx: &mut Tx<'_>) -> Result<Option<ContentKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ContentKey>(
                "SELECT kid, intermediate_kid, encrypted_material, created_at, status \
                 FROM content_keys WHERE status = 'active' ORDER BY created_at DESC LIMIT 1",
            )
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ContentKey>(
                "SELECT kid, intermediate_kid, encrypted_material, created_at, status \
                 FROM content_keys WHERE status = 'active' ORDER BY created_at DESC LIMIT 1",
            )
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "content_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_kid(tx: &mut Tx<'_>, kid: Uuid) -> Result<Option<ContentKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, ContentKey>(
                "SELECT kid, intermediate_kid, encrypted_material, created_at, status \
                 FROM content_keys WHERE kid = $1",
            )
            .bind(kid)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, ContentKey>(
                "SELECT kid, intermediate_kid, encrypted_material, created_at, status \
                 FROM content_keys WHERE kid = ?",
            )
            .bind(kid)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "content_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// Many content keys may exist at once; rotation simply marks the prior
/// active one retired without deleting it — still needed by any `Key`
/// whose outer JWE header still names it.
pub async fn retire_active(tx: &mut Tx<'_>) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query("UPDATE content_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query("UPDATE content_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **sq)
                .await
        }
    };
    record_db_query(
        "update",
        "content_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}
