use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::RootKey;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

pub async fn create(
    tx: &mut Tx<'_>,
    kid: Uuid,
    encrypted_material: &str,
    status: &str,
) -> Result<RootKey, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, RootKey>(
                "INSERT INTO root_keys (kid, encrypted_material, status) VALUES ($1, $2, $3) \
                 RETURNING kid, encrypted_material, created_at, expire_at, status",
            )
            .bind(kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, RootKey>(
                "INSERT INTO root_keys (kid, encrypted_material, status) VALUES (?, ?, ?) \
                 RETURNING kid, encrypted_material, created_at, expire_at, status",
            )
            .bind(kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "root_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// Exactly one `RootKey` with `status=active` at any time (invariant).
pub async fn get_active(tx: &mut Tx<'_>) -> Result<Option<RootKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys WHERE status = 'active'",
            )
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys WHERE status = 'active'",
            )
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "root_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn list_all(tx: &mut Tx<'_>) -> Result<Vec<RootKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys ORDER BY created_at ASC",
            )
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys ORDER BY created_at ASC",
            )
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "root_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_kid(tx: &mut Tx<'_>, kid: Uuid) -> Result<Option<RootKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys WHERE kid = $1",
            )
            .bind(kid)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, RootKey>(
                "SELECT kid, encrypted_material, created_at, expire_at, status \
                 FROM root_keys WHERE kid = ?",
            )
            .bind(kid)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "root_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

/// Rotation: demotes the active root key to `retired`, leaves the new one
/// already inserted via `create` as `active`. Never deletes — retired keys
/// are kept as long as any intermediate key they sealed is reachable.
pub async fn retire_active(tx: &mut Tx<'_>) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query("UPDATE root_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query("UPDATE root_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **sq)
                .await
        }
    };
    record_db_query(
        "update",
        "root_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}

/// Admin-only proof that no `IntermediateKey` still references `kid`,
/// required before a manual `purge_root_key`.
pub async fn prove_no_dependents(tx: &mut Tx<'_>, kid: Uuid) -> Result<bool, KmsError> {
    let start = Instant::now();
    let result: Result<(i64,), sqlx::Error> = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as("SELECT count(*) FROM intermediate_keys WHERE root_kid = $1")
                .bind(kid)
                .fetch_one(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as("SELECT count(*) FROM intermediate_keys WHERE root_kid = ?")
                .bind(kid)
                .fetch_one(&mut **sq)
                .await
        }
    };
    record_db_query(
        "select",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    Ok(result.map_err(KmsError::from)?.0 == 0)
}
