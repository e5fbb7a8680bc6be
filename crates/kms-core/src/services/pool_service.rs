//! KeyPool / Key lifecycle business logic.
//!
//! `create_pool` persists the pool in `pending_generate`/`pending_import`
//! and, when generation (not import) is required, spawns a one-shot
//! background task that claims material from the shared elastic-key pool
//! named after the algorithm and activates the pool's first Key — the same
//! "fire a supervised background task from the call site" idiom used by
//! `crate::elastic`, scaled down from a long-lived loop to a single run.

use crate::barrier::Barrier;
use crate::db::DbPool;
use crate::elastic::ElasticKeyService;
use crate::errors::KmsError;
use crate::models::{Algorithm, AuditEventType, Key, KeyPool, KeyUse, PoolStatus};
use crate::pools::generators::Generated;
use crate::pools::Pool as GeneratorPool;
use crate::repositories::{audit_events, key_pools, keys};
use crate::services::crypto_service;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

/// Generator pools keyed by the logical `PoolName` an `Algorithm` maps to
/// (`Algorithm::pool_name`), shared across every business `KeyPool` of that
/// algorithm.
pub type GeneratorPools = HashMap<&'static str, Arc<GeneratorPool<Generated>>>;

#[allow(clippy::too_many_arguments)]
#[instrument(skip(db, barrier, elastic, generators))]
pub async fn create_pool(
    db: DbPool,
    barrier: Arc<Barrier>,
    elastic: Arc<ElasticKeyService>,
    generators: Arc<GeneratorPools>,
    tenant_id: Uuid,
    name: &str,
    description: Option<&str>,
    algorithm: Algorithm,
    key_use: KeyUse,
    key_ops: &str,
    import_allowed: bool,
    versioning_allowed: bool,
    export_allowed: bool,
) -> Result<KeyPool, KmsError> {
    let pool_id = Uuid::now_v7();
    let status = if import_allowed {
        PoolStatus::PendingImport
    } else {
        PoolStatus::PendingGenerate
    };

    let mut tx = db.begin().await?;
    let pool = key_pools::create(
        &mut tx,
        pool_id,
        tenant_id,
        name,
        description,
        algorithm.as_str(),
        key_use.as_str(),
        key_ops,
        import_allowed,
        versioning_allowed,
        export_allowed,
        status.as_str(),
    )
    .await?;
    audit_events::record(
        &mut tx,
        Uuid::now_v7(),
        AuditEventType::PoolCreated.as_str(),
        Some(tenant_id),
        &pool_id.to_string(),
        true,
        &serde_json::json!({"algorithm": algorithm.as_str(), "key_use": key_use.as_str()}),
    )
    .await?;
    tx.commit().await?;

    if !import_allowed {
        spawn_initial_generation(db, barrier, elastic, generators, pool_id, algorithm);
    }

    Ok(pool)
}

fn spawn_initial_generation(
    db: DbPool,
    barrier: Arc<Barrier>,
    elastic: Arc<ElasticKeyService>,
    generators: Arc<GeneratorPools>,
    pool_id: Uuid,
    algorithm: Algorithm,
) {
    tokio::spawn(async move {
        if let Err(e) = generate_initial_key(&db, &barrier, &elastic, &generators, pool_id, algorithm).await {
            error!(pool_id = %pool_id, error = %e, "initial key generation failed");
            if let Ok(mut tx) = db.begin().await {
                let _ = key_pools::set_status(
                    &mut tx,
                    pool_id,
                    PoolStatus::PendingDeleteWasGenerateFailed.as_str(),
                )
                .await;
                let _ = tx.commit().await;
            }
        }
    });
}

async fn generate_initial_key(
    db: &DbPool,
    barrier: &Barrier,
    elastic: &ElasticKeyService,
    generators: &GeneratorPools,
    pool_id: Uuid,
    algorithm: Algorithm,
) -> Result<(), KmsError> {
    let pool_name = algorithm.pool_name();
    let generator = generators
        .get(pool_name)
        .ok_or_else(|| KmsError::Internal)?;
    let material = elastic.claim_one(pool_name, generator).await?;

    let mut tx = db.begin().await?;
    let public_material = if algorithm.is_asymmetric() {
        let raw = barrier.decrypt_key_material(&mut tx, &material).await?;
        Some(crypto_service::public_jwk_from_pkcs8(algorithm, &raw)?)
    } else {
        None
    };

    let key_id = Uuid::now_v7();
    keys::create(
        &mut tx,
        key_id,
        pool_id,
        1,
        &material,
        public_material.as_deref(),
        crate::models::KeyStatus::Active.as_str(),
    )
    .await?;
    key_pools::set_current_key(&mut tx, pool_id, key_id).await?;
    key_pools::set_status(&mut tx, pool_id, PoolStatus::Active.as_str()).await?;
    audit_events::record(
        &mut tx,
        Uuid::now_v7(),
        AuditEventType::KeyImported.as_str(),
        None,
        &key_id.to_string(),
        true,
        &serde_json::json!({"pool_id": pool_id.to_string(), "version": 1}),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

/// `ListPools(filter, paging, sort) -> page of Pools`, scoped to
/// one tenant with keyset paging by `pool_id`.
pub async fn list_pools(
    db: &DbPool,
    tenant_id: Uuid,
    after: Option<Uuid>,
    limit: i64,
) -> Result<Vec<KeyPool>, KmsError> {
    let mut tx = db.begin().await?;
    let pools = key_pools::list_for_tenant(&mut tx, tenant_id, after, limit).await?;
    tx.commit().await?;
    Ok(pools)
}

/// `ImportKey(pool, jwk) -> stores as Version=next`. The caller
/// is responsible for having verified `jwk` decodes to a key consistent
/// with `pool`'s Algorithm/KeyUse before calling this.
pub async fn import_key(
    db: &DbPool,
    barrier: &Barrier,
    pool: &KeyPool,
    private_material_der: &[u8],
    public_jwk: Option<&str>,
) -> Result<Key, KmsError> {
    if pool.status() != Some(PoolStatus::PendingImport) && pool.status() != Some(PoolStatus::Active) {
        return Err(KmsError::InvalidState(format!(
            "pool {} is not accepting imports in status {}",
            pool.pool_id, pool.status
        )));
    }

    let mut tx = db.begin().await?;
    let next_version = keys::max_version(&mut tx, pool.pool_id).await? + 1;
    let wrapped = barrier.encrypt_key_material(&mut tx, private_material_der).await?;
    let key_id = Uuid::now_v7();
    let key = keys::create(
        &mut tx,
        key_id,
        pool.pool_id,
        next_version,
        &wrapped,
        public_jwk,
        crate::models::KeyStatus::Active.as_str(),
    )
    .await?;

    if next_version > 1 {
        keys::rotate(&mut tx, pool.pool_id, key_id).await?;
    }
    key_pools::set_current_key(&mut tx, pool.pool_id, key_id).await?;
    if pool.status() == Some(PoolStatus::PendingImport) {
        key_pools::set_status(&mut tx, pool.pool_id, PoolStatus::Active.as_str()).await?;
    }
    audit_events::record(
        &mut tx,
        Uuid::now_v7(),
        AuditEventType::KeyImported.as_str(),
        Some(pool.tenant_id),
        &key_id.to_string(),
        true,
        &serde_json::json!({"pool_id": pool.pool_id.to_string(), "version": next_version}),
    )
    .await?;
    tx.commit().await?;
    Ok(key)
}

/// `Rotate(pool)`: creates Version=max+1, activates it, demotes the
/// previous active Key to inactive. Rejected on pools that
/// disallow versioning or that aren't
/// currently `active` (a disabled or not-yet-generated pool has no business
/// minting a new version until it's re-enabled or finishes bootstrapping).
pub async fn rotate(
    db: &DbPool,
    elastic: &ElasticKeyService,
    generator: &GeneratorPool<Generated>,
    barrier: &Barrier,
    pool: &KeyPool,
) -> Result<Key, KmsError> {
    if pool.status() != Some(PoolStatus::Active) {
        return Err(KmsError::InvalidState(format!(
            "pool {} is not active (status={})",
            pool.pool_id, pool.status
        )));
    }
    if !pool.versioning_allowed {
        return Err(KmsError::InvalidState(
            "pool does not permit rotation (versioning_allowed=false)".to_string(),
        ));
    }
    let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;
    let pool_name = algorithm.pool_name();
    let material = elastic.claim_one(pool_name, generator).await?;

    let mut tx = db.begin().await?;
    let public_material = if algorithm.is_asymmetric() {
        let raw = barrier.decrypt_key_material(&mut tx, &material).await?;
        Some(crypto_service::public_jwk_from_pkcs8(algorithm, &raw)?)
    } else {
        None
    };

    let next_version = keys::max_version(&mut tx, pool.pool_id).await? + 1;
    let key_id = Uuid::now_v7();
    let key = keys::create(
        &mut tx,
        key_id,
        pool.pool_id,
        next_version,
        &material,
        public_material.as_deref(),
        crate::models::KeyStatus::Active.as_str(),
    )
    .await?;
    keys::rotate(&mut tx, pool.pool_id, key_id).await?;
    key_pools::set_current_key(&mut tx, pool.pool_id, key_id).await?;
    audit_events::record(
        &mut tx,
        Uuid::now_v7(),
        AuditEventType::KeyRotated.as_str(),
        Some(pool.tenant_id),
        &key_id.to_string(),
        true,
        &serde_json::json!({"pool_id": pool.pool_id.to_string(), "version": next_version}),
    )
    .await?;
    tx.commit().await?;
    Ok(key)
}

/// Validated `disable`/`enable`/`delete` transitions of the KeyPool FSM.
/// Illegal transitions return `InvalidState`.
pub async fn set_pool_status(
    db: &DbPool,
    pool: &KeyPool,
    target: PoolStatus,
) -> Result<(), KmsError> {
    let current = pool.status().ok_or(KmsError::Internal)?;
    let allowed = matches!(
        (current, target),
        (PoolStatus::Active, PoolStatus::Disabled)
            | (PoolStatus::Disabled, PoolStatus::Active)
            | (PoolStatus::Active, PoolStatus::PendingDeleteWasActive)
            | (PoolStatus::Disabled, PoolStatus::PendingDeleteWasDisabled)
    );
    if !allowed {
        return Err(KmsError::InvalidState(format!(
            "cannot transition pool from {} to {}",
            current.as_str(),
            target.as_str()
        )));
    }

    let mut tx = db.begin().await?;
    key_pools::set_status(&mut tx, pool.pool_id, target.as_str()).await?;
    audit_events::record(
        &mut tx,
        Uuid::now_v7(),
        AuditEventType::PoolStatusChanged.as_str(),
        Some(pool.tenant_id),
        &pool.pool_id.to_string(),
        true,
        &serde_json::json!({"from": current.as_str(), "to": target.as_str()}),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_to_disable_is_allowed_but_delete_from_pending_is_not() {
        let pairs = [
            (PoolStatus::Active, PoolStatus::Disabled, true),
            (PoolStatus::Disabled, PoolStatus::Active, true),
            (PoolStatus::PendingGenerate, PoolStatus::Active, false),
        ];
        for (from, to, expected) in pairs {
            let allowed = matches!(
                (from, to),
                (PoolStatus::Active, PoolStatus::Disabled)
                    | (PoolStatus::Disabled, PoolStatus::Active)
                    | (PoolStatus::Active, PoolStatus::PendingDeleteWasActive)
                    | (PoolStatus::Disabled, PoolStatus::PendingDeleteWasDisabled)
            );
            assert_eq!(allowed, expected, "{from:?} -> {to:?}");
        }
    }
}
