mod barrier;
mod config;
mod db;
mod elastic;
mod errors;
mod models;
mod observability;
mod pools;
mod repositories;
mod routes;
mod services;

use barrier::Barrier;
use common::secret::ExposeSecret;
use config::{Config, DbKind, PoolSizing};
use db::DbPool;
use elastic::{BackfillConfig, ElasticKeyService};
use pools::generators::{self, Generated};
use pools::Pool as GeneratorPool;
use routes::AppState;
use services::Orchestrator;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kms_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting kms core service");

    // Must run before any metrics::counter!/histogram! call.
    let metrics_handle = routes::init_metrics_recorder().map_err(|e| {
        error!("failed to initialize metrics recorder: {e}");
        e
    })?;
    info!("prometheus metrics recorder initialized");

    let mut config = Config::from_env().map_err(|e| {
        error!("failed to load configuration: {e}");
        e
    })?;
    if config.database_kind == DbKind::Postgres {
        config.database_url = add_query_timeout(&config.database_url, 5);
    }
    info!("configuration loaded");

    info!("opening database pool and applying migrations...");
    let db_pool = DbPool::open(&config).await.map_err(|e| {
        error!("failed to open database pool: {e}");
        e
    })?;
    info!("database pool ready");

    info!("unsealing barrier...");
    let unseal_secrets: Vec<Vec<u8>> = config
        .unseal_secrets
        .iter()
        .map(|s| s.expose_secret().clone())
        .collect();
    let barrier = Arc::new(Barrier::unseal(&unseal_secrets, &config, &db_pool).await.map_err(|e| {
        error!("failed to unseal barrier: {e}");
        e
    })?);

    let mut bootstrap_tx = db_pool.begin().await?;
    barrier.ensure_bootstrapped(&mut bootstrap_tx).await.map_err(|e| {
        error!("failed to bootstrap root/intermediate keys: {e}");
        e
    })?;
    bootstrap_tx.commit().await?;
    info!("barrier unsealed and bootstrapped");

    let elastic = Arc::new(ElasticKeyService::new(db_pool.clone(), Arc::clone(&barrier)));
    let generators = Arc::new(build_generator_pools(&config.pool_sizing));

    let shutdown = CancellationToken::new();
    spawn_elastic_background_tasks(Arc::clone(&elastic), &generators, &config, shutdown.child_token());

    let orchestrator = Arc::new(Orchestrator::new(
        db_pool,
        Arc::clone(&barrier),
        Arc::clone(&elastic),
        Arc::clone(&generators),
    ));

    let bind_address = config.bind_address.clone();
    let state = Arc::new(AppState { config, orchestrator });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("invalid bind address: {e}");
        e
    })?;

    info!("kms core listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    barrier.seal_shutdown().await;
    info!("kms core shutdown complete");

    Ok(())
}

/// Builds one generator pool per logical pool name in the default sizing
/// policy table. Sizing comes from `config.pool_sizing`; a name with no explicit
/// entry (e.g. `oct-512`, which shares the `aes-256` symmetric length policy
/// but is keyed separately) falls back to a conservative default.
fn build_generator_pools(sizing: &HashMap<String, PoolSizing>) -> HashMap<&'static str, Arc<GeneratorPool<Generated>>> {
    const DEFAULT_SIZING: PoolSizing = PoolSizing { workers: 1, buffer: 16 };

    let size_of = |name: &str| sizing.get(name).copied().unwrap_or(DEFAULT_SIZING);

    let mut pools: HashMap<&'static str, Arc<GeneratorPool<Generated>>> = HashMap::new();

    let s = size_of("uuidv7");
    pools.insert("uuidv7", Arc::new(GeneratorPool::new("uuidv7", s.workers, s.buffer, generators::uuidv7)));

    let s = size_of("rsa-2048");
    pools.insert(
        "rsa-2048",
        Arc::new(GeneratorPool::new("rsa-2048", s.workers, s.buffer, generators::rsa_keypair(2048))),
    );
    let s = size_of("rsa-3072");
    pools.insert(
        "rsa-3072",
        Arc::new(GeneratorPool::new("rsa-3072", s.workers, s.buffer, generators::rsa_keypair(3072))),
    );
    let s = size_of("rsa-4096");
    pools.insert(
        "rsa-4096",
        Arc::new(GeneratorPool::new("rsa-4096", s.workers, s.buffer, generators::rsa_keypair(4096))),
    );

    let s = size_of("p-256");
    pools.insert(
        "p-256",
        Arc::new(GeneratorPool::new(
            "p-256",
            s.workers,
            s.buffer,
            generators::ec_keypair(&ring::signature::ECDSA_P256_SHA256_FIXED_SIGNING),
        )),
    );
    let s = size_of("p-384");
    pools.insert(
        "p-384",
        Arc::new(GeneratorPool::new(
            "p-384",
            s.workers,
            s.buffer,
            generators::ec_keypair(&ring::signature::ECDSA_P384_SHA384_FIXED_SIGNING),
        )),
    );
    let s = size_of("p-521");
    pools.insert(
        "p-521",
        Arc::new(GeneratorPool::new("p-521", s.workers, s.buffer, generators::ec_p521_keypair)),
    );

    let s = size_of("ed25519");
    pools.insert(
        "ed25519",
        Arc::new(GeneratorPool::new("ed25519", s.workers, s.buffer, generators::ed25519_keypair)),
    );

    let s = size_of("aes-256");
    pools.insert(
        "aes-256",
        Arc::new(GeneratorPool::new("aes-256", s.workers, s.buffer, generators::symmetric_bytes(32))),
    );
    let s = size_of("oct-512");
    pools.insert(
        "oct-512",
        Arc::new(GeneratorPool::new("oct-512", s.workers, s.buffer, generators::symmetric_bytes(64))),
    );

    for size in [12usize, 16, 24, 32] {
        let name: &'static str = match size {
            12 => "nonce-12",
            16 => "nonce-16",
            24 => "nonce-24",
            _ => "nonce-32",
        };
        let s = size_of(name);
        pools.insert(name, Arc::new(GeneratorPool::new(name, s.workers, s.buffer, generators::nonce(size))));
    }

    pools
}

/// Spawns the backfill + janitor tasks for every pool that has an explicit
/// elastic-key threshold configured — pools without one (e.g.
/// `uuidv7`, `nonce-*`) are generated synchronously on demand via
/// `ElasticKeyService::claim_one`'s fallback path and need no backfill.
fn spawn_elastic_background_tasks(
    elastic: Arc<ElasticKeyService>,
    generators: &HashMap<&'static str, Arc<GeneratorPool<Generated>>>,
    config: &Config,
    cancel: CancellationToken,
) {
    for (pool_name, thresholds) in &config.elastic_thresholds {
        let Some(generator) = generators.get(pool_name.as_str()) else {
            warn!(pool = pool_name, "elastic threshold configured for unknown generator pool, skipping");
            continue;
        };
        let backfill_config = BackfillConfig {
            low_watermark: thresholds.low_watermark as i64,
            target: thresholds.high_watermark as i64,
            check_interval: Duration::from_secs(5),
        };
        Arc::clone(&elastic).spawn_backfill(
            pool_name.clone(),
            Arc::clone(generator),
            backfill_config,
            cancel.child_token(),
        );
    }
    elastic.spawn_janitor(Duration::from_secs(30), 300, cancel);
}

/// Listens for SIGINT/SIGTERM, then drains for `KMS_DRAIN_SECONDS` (default
/// 30; set to 0 for local development) before returning, letting in-flight
/// requests finish while the readiness probe fails.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("failed to listen for SIGINT: {e}"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("KMS_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("draining connections for {drain_secs} seconds...");
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("drain period complete");
    } else {
        info!("skipping drain period (KMS_DRAIN_SECONDS=0)");
    }
}

/// Appends a Postgres `statement_timeout` option to the connection URL so
/// queries fail fast instead of hanging a pool connection indefinitely.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
