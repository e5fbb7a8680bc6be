//! Test server harness: spawns a real, in-process `kms-core` HTTP server
//! backed by an isolated SQLite database, so integration tests can drive the
//! full request -> orchestrator -> barrier/elastic/db stack over HTTP
//! exactly the way a production client would.

use crate::crypto_fixtures::test_unseal_secrets;
use common::secret::ExposeSecret;
use kms_core::barrier::Barrier;
use kms_core::config::Config;
use kms_core::db::DbPool;
use kms_core::elastic::ElasticKeyService;
use kms_core::pools::generators::{self, Generated};
use kms_core::pools::Pool as GeneratorPool;
use kms_core::routes::{self, AppState};
use kms_core::services::Orchestrator;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Test harness for spawning a KMS core server instance.
///
/// # Example
/// ```rust,ignore
/// let server = TestKmsServer::spawn().await?;
/// let client = reqwest::Client::new();
/// let body = client.get(format!("{}/health", server.url())).send().await?;
/// ```
pub struct TestKmsServer {
    addr: SocketAddr,
    db: DbPool,
    _handle: JoinHandle<()>,
}

impl TestKmsServer {
    /// Spawns a new server backed by an isolated in-memory SQLite database,
    /// unsealed with deterministic test secrets, with small generator pools
    /// sized for fast test startup rather than production throughput.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::new();
        vars.insert("KMS_DATABASE_URL".to_string(), "sqlite::memory:".to_string());
        vars.insert("KMS_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string());
        vars.insert("KMS_UNSEAL_FILES".to_string(), write_temp_unseal_files()?);

        let config = Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("failed to build test config: {e}"))?;

        let db = DbPool::open(&config).await.map_err(|e| anyhow::anyhow!("failed to open test db: {e}"))?;

        let unseal_secrets: Vec<Vec<u8>> = config.unseal_secrets.iter().map(|s| s.expose_secret().clone()).collect();
        let barrier = Arc::new(
            Barrier::unseal(&unseal_secrets, &config, &db)
                .await
                .map_err(|e| anyhow::anyhow!("failed to unseal test barrier: {e}"))?,
        );

        let mut tx = db.begin().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        barrier
            .ensure_bootstrapped(&mut tx)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bootstrap test barrier: {e}"))?;
        tx.commit().await.map_err(|e| anyhow::anyhow!("{e}"))?;

        let elastic = Arc::new(ElasticKeyService::new(db.clone(), Arc::clone(&barrier)));
        let generators = Arc::new(test_generator_pools());

        let orchestrator = Arc::new(Orchestrator::new(db.clone(), Arc::clone(&barrier), Arc::clone(&elastic), generators));

        let bind_address = config.bind_address.clone();
        let state = Arc::new(AppState { config, orchestrator });

        let metrics_handle = routes::init_metrics_recorder()
            .map_err(|e| anyhow::anyhow!("failed to init test metrics recorder: {e}"))?;
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind(&bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind test server: {e}"))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("failed to read local address: {e}"))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("test server error: {e}");
            }
        });

        Ok(Self { addr, db, _handle: handle })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Exposes the underlying database pool so tests can reach into
    /// repository-level state the HTTP surface doesn't expose directly (e.g.
    /// `elastic_key_time::set_elastic_key_updated_at`).
    pub fn db(&self) -> &DbPool {
        &self.db
    }
}

impl Drop for TestKmsServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

/// Small fixed-size generator pools, enough concurrency for tests without
/// production's deeper buffers (sizes these for steady-state
/// throughput, which tests don't need).
fn test_generator_pools() -> HashMap<&'static str, Arc<GeneratorPool<Generated>>> {
    let mut pools: HashMap<&'static str, Arc<GeneratorPool<Generated>>> = HashMap::new();
    pools.insert("uuidv7", Arc::new(GeneratorPool::new("uuidv7", 1, 4, generators::uuidv7)));
    pools.insert("rsa-2048", Arc::new(GeneratorPool::new("rsa-2048", 1, 1, generators::rsa_keypair(2048))));
    pools.insert(
        "p-256",
        Arc::new(GeneratorPool::new(
            "p-256",
            1,
            2,
            generators::ec_keypair(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING),
        )),
    );
    pools.insert("ed25519", Arc::new(GeneratorPool::new("ed25519", 1, 2, generators::ed25519_keypair)));
    pools.insert("aes-256", Arc::new(GeneratorPool::new("aes-256", 1, 4, generators::symmetric_bytes(32))));
    pools.insert("oct-512", Arc::new(GeneratorPool::new("oct-512", 1, 4, generators::symmetric_bytes(64))));
    for size in [12usize, 16, 24, 32] {
        let name: &'static str = match size {
            12 => "nonce-12",
            16 => "nonce-16",
            24 => "nonce-24",
            _ => "nonce-32",
        };
        pools.insert(name, Arc::new(GeneratorPool::new(name, 1, 4, generators::nonce(size))));
    }
    pools
}

/// Writes the fixed `test_unseal_secrets()` fixture out to temp files and
/// returns the colon-joined `KMS_UNSEAL_FILES` value `Config::from_vars`
/// expects, reusing the real config-loading path rather than special-casing
/// test construction.
fn write_temp_unseal_files() -> Result<String, anyhow::Error> {
    let run_id = Uuid::new_v4();
    let mut paths = Vec::new();
    for (i, secret) in test_unseal_secrets().into_iter().enumerate() {
        let path = std::env::temp_dir().join(format!("kms-test-unseal-{run_id}-{i}"));
        std::fs::write(&path, &secret)?;
        paths.push(path.to_string_lossy().to_string());
    }
    Ok(paths.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_starts_a_reachable_server() {
        let server = TestKmsServer::spawn().await.expect("server should spawn");
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{}/health", server.url()))
            .send()
            .await
            .expect("health check should succeed");
        assert!(resp.status().is_success());
    }
}
