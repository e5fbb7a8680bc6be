//! Durable, multi-pool, state-machine-driven generator of identified key
//! materials tied to logical pool names.
//!
//! `ElasticKeyService` sits between the in-memory `pools::Pool<Generated>`
//! (which only ever knows how to produce fresh values) and the durable
//! `elastic_keys` table (which tracks which of those values are claimable
//! after a restart). Backfill and janitor are long-lived `tokio::spawn`
//! tasks driven by `tokio::time::interval` + `CancellationToken`; each
//! backfill task is wrapped in a restart-on-panic supervisor.

use crate::barrier::Barrier;
use crate::db::DbPool;
use crate::errors::KmsError;
use crate::observability::metrics::{
    record_elastic_backfill, record_elastic_claim, record_elastic_janitor_reaped, set_elastic_ready_count,
};
use crate::pools::generators::Generated;
use crate::pools::Pool as GeneratorPool;
use crate::repositories::elastic_keys;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Per-pool backfill tuning. Defaults mirror a conservative always-a-few-
/// ready posture; operators size `low_watermark`/`target` per pool cost.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub low_watermark: i64,
    pub target: i64,
    pub check_interval: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            low_watermark: 2,
            target: 8,
            check_interval: Duration::from_secs(5),
        }
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Encodes a freshly generated value into the opaque string stored in
/// `elastic_keys.material`. Asymmetric and symmetric key bytes are genuinely
/// secret and go through the Barrier before touching the database; UUIDs and
/// nonces are not secret and are stored as plain text/base64.
async fn materialize(
    tx: &mut crate::db::Tx<'_>,
    barrier: &Barrier,
    generated: Generated,
) -> Result<String, KmsError> {
    match generated {
        Generated::Uuid(id) => Ok(id.to_string()),
        Generated::Bytes(bytes) => Ok(BASE64.encode(bytes)),
        Generated::Pkcs8(der) => barrier.encrypt_key_material(tx, &der).await,
        Generated::SecretBytes(bytes) => barrier.encrypt_key_material(tx, &bytes).await,
    }
}

/// Owns the durable side of one or more elastic pools. One service handles
/// every pool name; callers pass the in-memory `GeneratorPool` for whichever
/// pool a given call concerns.
pub struct ElasticKeyService {
    db: DbPool,
    barrier: Arc<Barrier>,
}

impl ElasticKeyService {
    pub fn new(db: DbPool, barrier: Arc<Barrier>) -> Self {
        Self { db, barrier }
    }

    /// `ClaimOne(poolName)`: claims an existing `active` row; on miss, falls
    /// back to synchronous generation and inserts directly as
    /// `active`+immediate claim.
    #[instrument(skip(self, generator), fields(pool = pool_name))]
    pub async fn claim_one(&self, pool_name: &str, generator: &GeneratorPool<Generated>) -> Result<String, KmsError> {
        let mut tx = self.db.begin().await?;
        if let Some(row) = elastic_keys::claim_one(&mut tx, pool_name).await? {
            tx.commit().await?;
            record_elastic_claim(pool_name, "hit");
            return row.material.ok_or(KmsError::Internal);
        }
        tx.commit().await?;

        warn!(pool = pool_name, "elastic pool empty, falling back to synchronous generation");
        let generated = generator.get().await.map_err(|e| match e {
            crate::pools::PoolError::Closed => KmsError::Transient("generator pool closed".to_string()),
            crate::pools::PoolError::Generate(msg) => KmsError::Transient(format!("generator failed: {msg}")),
        })?;

        let mut tx = self.db.begin().await?;
        let material = materialize(&mut tx, &self.barrier, generated).await?;
        let ekid = Uuid::now_v7();
        elastic_keys::insert_active(&mut tx, ekid, pool_name, &material).await?;
        let claimed = elastic_keys::claim_one(&mut tx, pool_name).await?;
        tx.commit().await?;

        record_elastic_claim(pool_name, "synchronous");
        claimed.and_then(|row| row.material).ok_or(KmsError::Internal)
    }

    /// Spawns the supervised backfill task for one pool: restarts on panic
    /// with exponential backoff capped at 30s, disables the pool's backfill
    /// after 10 consecutive failures.
    pub fn spawn_backfill(
        self: Arc<Self>,
        pool_name: impl Into<Arc<str>>,
        generator: Arc<GeneratorPool<Generated>>,
        config: BackfillConfig,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = self;
        let pool_name: Arc<str> = pool_name.into();

        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let child = cancel.child_token();
                let handle = tokio::spawn(run_backfill_loop(
                    Arc::clone(&service),
                    Arc::clone(&pool_name),
                    Arc::clone(&generator),
                    config.clone(),
                    child,
                ));

                match handle.await {
                    Ok(()) => break,
                    Err(join_err) => {
                        consecutive_failures += 1;
                        error!(
                            pool = %pool_name,
                            consecutive_failures,
                            panicked = join_err.is_panic(),
                            "backfill task exited unexpectedly"
                        );
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            error!(pool = %pool_name, "disabling backfill after repeated failures");
                            break;
                        }
                        let backoff = Duration::from_secs(2u64.saturating_pow(consecutive_failures)).min(MAX_BACKOFF);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        })
    }

    /// Spawns the janitor sweep: reaps `started_delete` rows abandoned by a
    /// crashed consumer past `grace`.
    pub fn spawn_janitor(
        self: Arc<Self>,
        check_interval: Duration,
        grace_seconds: i64,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let service = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        run_janitor_sweep(&service, grace_seconds).await;
                    }
                    _ = cancel.cancelled() => {
                        info!("janitor task received shutdown signal, exiting");
                        break;
                    }
                }
            }
        })
    }
}

async fn run_backfill_loop(
    service: Arc<ElasticKeyService>,
    pool_name: Arc<str>,
    generator: Arc<GeneratorPool<Generated>>,
    config: BackfillConfig,
    cancel: CancellationToken,
) {
    info!(pool = %pool_name, low_watermark = config.low_watermark, target = config.target, "backfill task started");
    let mut interval = tokio::time::interval(config.check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_backfill_tick(&service, &pool_name, &generator, &config).await;
            }
            _ = cancel.cancelled() => {
                info!(pool = %pool_name, "backfill task received shutdown signal, exiting");
                break;
            }
        }
    }
}

async fn run_backfill_tick(
    service: &ElasticKeyService,
    pool_name: &str,
    generator: &GeneratorPool<Generated>,
    config: &BackfillConfig,
) {
    let start = Instant::now();

    let active_count = {
        let mut tx = match service.db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(pool = pool_name, error = %e, "backfill failed to begin transaction");
                record_elastic_backfill(pool_name, "error", start.elapsed());
                return;
            }
        };
        let count = elastic_keys::count_by_status(&mut tx, pool_name, "active").await;
        let _ = tx.commit().await;
        match count {
            Ok(count) => count,
            Err(e) => {
                error!(pool = pool_name, error = %e, "backfill failed to count active rows");
                record_elastic_backfill(pool_name, "error", start.elapsed());
                return;
            }
        }
    };

    set_elastic_ready_count(pool_name, active_count.max(0) as u64);
    if active_count >= config.low_watermark {
        record_elastic_backfill(pool_name, "skipped", start.elapsed());
        return;
    }

    let to_generate = config.target - active_count;
    for _ in 0..to_generate.max(0) {
        let mut tx = match service.db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(pool = pool_name, error = %e, "backfill failed to begin generate transaction");
                break;
            }
        };

        let ekid = Uuid::now_v7();
        let reserved = match elastic_keys::insert_generate(&mut tx, ekid, pool_name).await {
            Ok(reserved) => reserved,
            Err(e) => {
                error!(pool = pool_name, error = %e, "backfill failed to reserve generate slot");
                let _ = tx.rollback().await;
                break;
            }
        };
        if tx.commit().await.is_err() {
            break;
        }

        // Someone else is already generating for this pool; nothing to do.
        let Some(reserved) = reserved else {
            break;
        };

        let generated = generator.get().await;
        let mut tx = match service.db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(pool = pool_name, error = %e, "backfill failed to begin finalize transaction");
                break;
            }
        };

        match generated {
            Ok(generated) => match materialize(&mut tx, &service.barrier, generated).await {
                Ok(material) => {
                    if let Err(e) = elastic_keys::mark_active(&mut tx, reserved.ekid, &material).await {
                        error!(pool = pool_name, error = %e, "backfill failed to mark row active");
                    }
                }
                Err(e) => {
                    warn!(pool = pool_name, error = %e, "backfill generator materialize failed");
                    let _ = elastic_keys::mark_generate_failed(&mut tx, reserved.ekid).await;
                }
            },
            Err(e) => {
                warn!(pool = pool_name, error = %e, "backfill generator unavailable");
                let _ = elastic_keys::mark_generate_failed(&mut tx, reserved.ekid).await;
            }
        }
        let _ = tx.commit().await;
    }

    record_elastic_backfill(pool_name, "success", start.elapsed());
}

async fn run_janitor_sweep(service: &ElasticKeyService, grace_seconds: i64) {
    let mut tx = match service.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!(error = %e, "janitor failed to begin transaction");
            return;
        }
    };

    let abandoned = match elastic_keys::list_abandoned_started_delete(&mut tx, grace_seconds).await {
        Ok(rows) => rows,
        Err(e) => {
            error!(error = %e, "janitor failed to list abandoned rows");
            let _ = tx.rollback().await;
            return;
        }
    };

    let mut reaped_by_pool: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    for row in &abandoned {
        if elastic_keys::mark_deleted(&mut tx, row.ekid).await.is_ok() {
            *reaped_by_pool.entry(row.pool_name.clone()).or_insert(0) += 1;
        }
    }

    if tx.commit().await.is_err() {
        error!("janitor failed to commit sweep");
        return;
    }

    for (pool_name, count) in reaped_by_pool {
        record_elastic_janitor_reaped(&pool_name, count);
        info!(pool = pool_name, count, "janitor reaped abandoned started_delete rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backfill_config_has_sane_watermarks() {
        let config = BackfillConfig::default();
        assert!(config.target > config.low_watermark);
    }

    #[test]
    fn backoff_is_capped_at_thirty_seconds() {
        for failures in 1..20u32 {
            let backoff = Duration::from_secs(2u64.saturating_pow(failures)).min(MAX_BACKOFF);
            assert!(backoff <= MAX_BACKOFF);
        }
    }
}
