//! Tagged-enum operation dispatch: every request is a variant of `Operation`
//! carrying its own typed fields, matched to a typed `OperationResult`
//! variant, rather than dynamic dispatch over a trait object.
//!
//! `Orchestrator` is also the explicit construction record assembled at
//! startup (Persistence → Pools → Barrier → ElasticKey → Orchestrator);
//! there are no ambient singletons.
//! It owns every collaborator the business-logic layer needs and is itself
//! owned by `AppState`, built once in `main`.

use crate::barrier::Barrier;
use crate::db::DbPool;
use crate::elastic::ElasticKeyService;
use crate::errors::KmsError;
use crate::models::{Algorithm, AuditEventType, Key, KeyPool, KeyUse, PoolStatus};
use crate::observability::metrics::record_error;
use crate::pools::generators::Generated;
use crate::pools::Pool as GeneratorPool;
use crate::repositories::{audit_events, key_pools, keys};
use crate::services::{crypto_service, pool_service};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One request/response pair per business operation the public contract
/// exposes. Each variant is self-contained: everything an
/// operation needs to run is carried in its own fields, not threaded
/// through shared mutable state.
pub enum Operation {
    CreatePool {
        tenant_id: Uuid,
        name: String,
        description: Option<String>,
        algorithm: Algorithm,
        key_use: KeyUse,
        key_ops: String,
        import_allowed: bool,
        versioning_allowed: bool,
        export_allowed: bool,
    },
    ListPools {
        tenant_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    },
    ImportKey {
        pool_id: Uuid,
        private_material_der: Vec<u8>,
        public_jwk: Option<String>,
    },
    Encrypt {
        pool_id: Uuid,
        plaintext_b64: String,
    },
    Decrypt {
        jwe_compact: String,
    },
    Sign {
        pool_id: Uuid,
        payload_b64: String,
    },
    Verify {
        jws_compact: String,
    },
    GenerateDataKey {
        pool_id: Uuid,
        plaintext_len: usize,
    },
    Rotate {
        pool_id: Uuid,
    },
    SetPoolStatus {
        pool_id: Uuid,
        target: PoolStatus,
    },
    ListKeys {
        pool_id: Uuid,
    },
    /// Administrative rotation of the two wrapping tiers below the unseal
    /// tier ("admin unseal-rotate" CLI surface). Rotating the
    /// unseal tier itself requires a new secret set and only happens at
    /// process start via `Barrier::unseal`, so this advances
    /// Root and Intermediate instead — the content tier rotates lazily the
    /// next time a Key is written.
    RotateBarrierTiers,
}

/// Output of a dispatched `Operation`. Each variant pairs 1:1 with the
/// `Operation` that produced it.
pub enum OperationResult {
    Pool(KeyPool),
    Pools(Vec<KeyPool>),
    Key(Key),
    Keys(Vec<Key>),
    Ciphertext(String),
    Plaintext(String),
    Signature(String),
    VerifiedPayload(String),
    DataKey { plaintext_b64: String, wrapped: String },
    BarrierRotated { root_kid: Uuid, intermediate_kid: Uuid },
    Unit,
}

pub struct Orchestrator {
    db: DbPool,
    barrier: Arc<Barrier>,
    elastic: Arc<ElasticKeyService>,
    generators: Arc<HashMap<&'static str, Arc<GeneratorPool<Generated>>>>,
}

impl Orchestrator {
    pub fn new(
        db: DbPool,
        barrier: Arc<Barrier>,
        elastic: Arc<ElasticKeyService>,
        generators: Arc<HashMap<&'static str, Arc<GeneratorPool<Generated>>>>,
    ) -> Self {
        Self {
            db,
            barrier,
            elastic,
            generators,
        }
    }

    /// Resolves `pool_id` to its `KeyPool` and current active `Key` — the
    /// lookup every per-Key operation needs before it can do anything else.
    async fn load_pool_and_active_key(&self, pool_id: Uuid) -> Result<(KeyPool, Key), KmsError> {
        let mut tx = self.db.begin().await?;
        let pool = key_pools::get_by_id(&mut tx, pool_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("pool {pool_id} not found")))?;
        let key = keys::get_active_for_pool(&mut tx, pool_id)
            .await?
            .ok_or_else(|| KmsError::InvalidState(format!("pool {pool_id} has no active key")))?;
        tx.commit().await?;
        Ok((pool, key))
    }

    /// Resolves a JWE/JWS compact value's `kid` to its owning pool and Key,
    /// without needing the caller to name the pool (`Decrypt`/
    /// `Verify`: "reads kid from header; locates Key by KID").
    async fn load_by_kid(&self, kid: Uuid) -> Result<(KeyPool, Key), KmsError> {
        let mut tx = self.db.begin().await?;
        let key = keys::get_by_id(&mut tx, kid)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("key {kid} not found")))?;
        let pool = key_pools::get_by_id(&mut tx, key.pool_id)
            .await?
            .ok_or(KmsError::Internal)?;
        tx.commit().await?;
        Ok((pool, key))
    }

    pub async fn dispatch(&self, operation: Operation) -> Result<OperationResult, KmsError> {
        let result = self.dispatch_inner(operation).await;
        if let Err(e) = &result {
            record_error("orchestrator", e.kind());
        }
        result
    }

    async fn dispatch_inner(&self, operation: Operation) -> Result<OperationResult, KmsError> {
        match operation {
            Operation::CreatePool {
                tenant_id,
                name,
                description,
                algorithm,
                key_use,
                key_ops,
                import_allowed,
                versioning_allowed,
                export_allowed,
            } => {
                let pool = pool_service::create_pool(
                    self.db.clone(),
                    Arc::clone(&self.barrier),
                    Arc::clone(&self.elastic),
                    Arc::clone(&self.generators),
                    tenant_id,
                    &name,
                    description.as_deref(),
                    algorithm,
                    key_use,
                    &key_ops,
                    import_allowed,
                    versioning_allowed,
                    export_allowed,
                )
                .await?;
                Ok(OperationResult::Pool(pool))
            }
            Operation::ListPools { tenant_id, after, limit } => {
                let pools = pool_service::list_pools(&self.db, tenant_id, after, limit).await?;
                Ok(OperationResult::Pools(pools))
            }
            Operation::ImportKey {
                pool_id,
                private_material_der,
                public_jwk,
            } => {
                let pool = self.get_pool(pool_id).await?;
                let key = pool_service::import_key(
                    &self.db,
                    &self.barrier,
                    &pool,
                    &private_material_der,
                    public_jwk.as_deref(),
                )
                .await?;
                Ok(OperationResult::Key(key))
            }
            Operation::Encrypt { pool_id, plaintext_b64 } => {
                let (pool, key) = self.load_pool_and_active_key(pool_id).await?;
                let mut tx = self.db.begin().await?;
                let ciphertext = crypto_service::encrypt(&mut tx, &self.barrier, &pool, &key, &plaintext_b64).await?;
                tx.commit().await?;
                Ok(OperationResult::Ciphertext(ciphertext))
            }
            Operation::Decrypt { jwe_compact } => {
                let kid = crate::barrier::envelope::peek_kid(&jwe_compact)
                    .and_then(|s| Uuid::parse_str(&s).ok())
                    .ok_or_else(|| KmsError::InvalidInput("jwe missing a valid kid".to_string()))?;
                let (pool, key) = self.load_by_kid(kid).await?;
                let mut tx = self.db.begin().await?;
                let plaintext = crypto_service::decrypt(&mut tx, &self.barrier, &pool, &key, &jwe_compact).await?;
                tx.commit().await?;
                Ok(OperationResult::Plaintext(plaintext))
            }
            Operation::Sign { pool_id, payload_b64 } => {
                let (pool, key) = self.load_pool_and_active_key(pool_id).await?;
                let mut tx = self.db.begin().await?;
                let jws = crypto_service::sign(&mut tx, &self.barrier, &pool, &key, &payload_b64).await?;
                tx.commit().await?;
                Ok(OperationResult::Signature(jws))
            }
            Operation::Verify { jws_compact } => {
                let kid = crate::barrier::envelope::peek_kid(&jws_compact)
                    .and_then(|s| Uuid::parse_str(&s).ok())
                    .ok_or_else(|| KmsError::InvalidInput("jws missing a valid kid".to_string()))?;
                let (pool, key) = self.load_by_kid(kid).await?;
                let mut tx = self.db.begin().await?;
                let payload = crypto_service::verify(&mut tx, &self.barrier, &pool, &key, &jws_compact).await?;
                tx.commit().await?;
                Ok(OperationResult::VerifiedPayload(payload))
            }
            Operation::GenerateDataKey { pool_id, plaintext_len } => {
                let (pool, key) = self.load_pool_and_active_key(pool_id).await?;
                let mut tx = self.db.begin().await?;
                let (plaintext_b64, wrapped) =
                    crypto_service::generate_data_key(&mut tx, &self.barrier, &pool, &key, plaintext_len).await?;
                tx.commit().await?;
                Ok(OperationResult::DataKey { plaintext_b64, wrapped })
            }
            Operation::Rotate { pool_id } => {
                let pool = self.get_pool(pool_id).await?;
                let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;
                let generator = self
                    .generators
                    .get(algorithm.pool_name())
                    .ok_or(KmsError::Internal)?;
                let key = pool_service::rotate(&self.db, &self.elastic, generator, &self.barrier, &pool).await?;
                Ok(OperationResult::Key(key))
            }
            Operation::SetPoolStatus { pool_id, target } => {
                let pool = self.get_pool(pool_id).await?;
                pool_service::set_pool_status(&self.db, &pool, target).await?;
                Ok(OperationResult::Unit)
            }
            Operation::ListKeys { pool_id } => {
                // Confirms the pool exists before listing so an unknown
                // pool_id reports NotFound instead of an empty list.
                self.get_pool(pool_id).await?;
                let mut tx = self.db.begin().await?;
                let keys = keys::list_for_pool(&mut tx, pool_id).await?;
                tx.commit().await?;
                Ok(OperationResult::Keys(keys))
            }
            Operation::RotateBarrierTiers => {
                let mut tx = self.db.begin().await?;
                let root_kid = self.barrier.rotate_root(&mut tx).await?;
                let intermediate_kid = self.barrier.rotate_intermediate(&mut tx).await?;
                audit_events::record(
                    &mut tx,
                    Uuid::now_v7(),
                    AuditEventType::RootRotated.as_str(),
                    None,
                    &root_kid.to_string(),
                    true,
                    &serde_json::json!({}),
                )
                .await?;
                audit_events::record(
                    &mut tx,
                    Uuid::now_v7(),
                    AuditEventType::IntermediateRotated.as_str(),
                    None,
                    &intermediate_kid.to_string(),
                    true,
                    &serde_json::json!({"root_kid": root_kid.to_string()}),
                )
                .await?;
                tx.commit().await?;
                Ok(OperationResult::BarrierRotated { root_kid, intermediate_kid })
            }
        }
    }

    async fn get_pool(&self, pool_id: Uuid) -> Result<KeyPool, KmsError> {
        let mut tx = self.db.begin().await?;
        let pool = key_pools::get_by_id(&mut tx, pool_id)
            .await?
            .ok_or_else(|| KmsError::NotFound(format!("pool {pool_id} not found")))?;
        tx.commit().await?;
        Ok(pool)
    }
}
