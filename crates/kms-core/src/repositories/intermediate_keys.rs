use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::IntermediateKey;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

pub async fn create(
    tx: &mut Tx<'_>,
    kid: Uuid,
    root_kid: Uuid,
    encrypted_material: &str,
    status: &str,
) -> Result<IntermediateKey, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, IntermediateKey>(
                "INSERT INTO intermediate_keys (kid, root_kid, encrypted_material, status) \
                 VALUES ($1, $2, $3, $4) \
                 RETURNING kid, root_kid, encrypted_material, created_at, expire_at, status",
            )
            .bind(kid)
            .bind(root_kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, IntermediateKey>(
                "INSERT INTO intermediate_keys (kid, root_kid, encrypted_material, status) \
                 VALUES (?, ?, ?, ?) \
                 RETURNING kid, root_kid, encrypted_material, created_at, expire_at, status",
            )
            .bind(kid)
            .bind(root_kid)
            .bind(encrypted_material)
            .bind(status)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_active(tx: &mut Tx<'_>) -> Result<Option<IntermediateKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE status = 'active'",
            )
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE status = 'active'",
            )
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn get_by_kid(tx: &mut Tx<'_>, kid: Uuid) -> Result<Option<IntermediateKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE kid = $1",
            )
            .bind(kid)
            .fetch_optional(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE kid = ?",
            )
            .bind(kid)
            .fetch_optional(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn retire_active(tx: &mut Tx<'_>) -> Result<(), KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query("UPDATE intermediate_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **pg)
                .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query("UPDATE intermediate_keys SET status = 'retired' WHERE status = 'active'")
                .execute(&mut **sq)
                .await
        }
    };
    record_db_query(
        "update",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)?;
    Ok(())
}

/// Every intermediate key wrapped under `root_kid` (used for
/// `prove_no_dependents` and lazy rewrap bookkeeping).
pub async fn list_for_root(
    tx: &mut Tx<'_>,
    root_kid: Uuid,
) -> Result<Vec<IntermediateKey>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE root_kid = $1",
            )
            .bind(root_kid)
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, IntermediateKey>(
                "SELECT kid, root_kid, encrypted_material, created_at, expire_at, status \
                 FROM intermediate_keys WHERE root_kid = ?",
            )
            .bind(root_kid)
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "intermediate_keys",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}
