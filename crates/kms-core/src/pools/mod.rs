//! Generic worker pool: W workers keep a bounded buffer of B pre-generated
//! values `T`, produced by a generator closure `G`.
//!
//! The abstract "semaphore plus unbounded queue" is a bounded
//! `tokio::sync::mpsc::channel(B)`: the channel's own backpressure *is* the
//! semaphore (`send` blocks a worker when the buffer holds B items; `recv`
//! blocks a caller when it's empty). Workers are supervised `tokio::spawn`
//! tasks that poll a `CancellationToken` between generations, the same
//! shutdown idiom as the elastic-key background tasks (see
//! `crate::elastic`).

pub mod generators;

use crate::errors::KmsError;
use crate::observability::metrics::{record_pool_generate, record_pool_get, record_pool_wait};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors returned by `Pool::get`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pool closed")]
    Closed,
    #[error("generator failed: {0}")]
    Generate(String),
}

/// A bounded pool of pre-generated values of type `T`.
///
/// `W` workers call the generator and push results into a channel of
/// capacity `B`; `get` pops from that channel. Dropping the `Pool` (or
/// calling `close`) cancels the workers and makes pending/future `get`
/// calls resolve to `PoolError::Closed` once the buffer drains.
pub struct Pool<T> {
    name: Arc<str>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Result<T, KmsError>>>,
    capacity: usize,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Pool<T> {
    /// `NewPool(name, workers, bufferSize, G)`: spawns `workers` tasks, each
    /// looping `G()` then `tx.send(value).await` until cancelled. `G` is
    /// fallible — a generator failure occupies one buffer slot with an `Err`
    /// rather than blocking the worker, so one bad draw doesn't stall the
    /// whole pool.
    pub fn new<G>(name: impl Into<Arc<str>>, workers: usize, buffer_size: usize, generate: G) -> Self
    where
        G: Fn() -> Result<T, KmsError> + Send + Sync + 'static,
    {
        let name: Arc<str> = name.into();
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let cancel = CancellationToken::new();
        let generate = Arc::new(generate);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers.max(1) {
            let tx = tx.clone();
            let cancel = cancel.child_token();
            let generate = Arc::clone(&generate);
            let pool_name = Arc::clone(&name);
            handles.push(tokio::spawn(async move {
                run_worker(pool_name, worker_id, generate, tx, cancel).await;
            }));
        }
        drop(tx);

        info!(pool = %name, workers, buffer_size, "generator pool started");
        Self {
            name,
            rx: tokio::sync::Mutex::new(rx),
            capacity: buffer_size.max(1),
            cancel,
            workers: handles,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Get(ctx) -> (T, error)`. Cancellation-aware: resolves to
    /// `PoolError::Closed` if the pool is closed before a value is ready, or
    /// `PoolError::Generate` if the worker that would have filled this slot
    /// hit a generator error.
    pub async fn get(&self) -> Result<T, PoolError> {
        let start = Instant::now();
        let mut rx = self.rx.lock().await;
        let value = match rx.recv().await {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(PoolError::Generate(e.to_string())),
            None => Err(PoolError::Closed),
        };
        record_pool_get(&self.name, start.elapsed());
        value
    }

    /// Current buffer depth, approximated from the receiver's `len()` —
    /// exposed as the `kms_pool_buffer_depth` gauge by callers that poll it.
    pub async fn buffer_depth(&self) -> usize {
        self.rx.lock().await.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `Close()`: signals shutdown; pending `get` calls drain the buffer
    /// first, then resolve to `Closed` once workers have stopped and the
    /// channel is empty.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in &self.workers {
            handle.abort();
        }
    }
}

async fn run_worker<T, G>(
    pool_name: Arc<str>,
    worker_id: usize,
    generate: Arc<G>,
    tx: mpsc::Sender<Result<T, KmsError>>,
    cancel: CancellationToken,
) where
    T: Send + 'static,
    G: Fn() -> Result<T, KmsError> + Send + Sync + 'static,
{
    loop {
        let wait_start = Instant::now();
        // Reserve a slot before generating, so `generate_duration_ms` never
        // includes time spent blocked on a full buffer: acquire the slot
        // first, then call the generator.
        let permit = tokio::select! {
            permit = tx.reserve() => permit,
            _ = cancel.cancelled() => {
                info!(pool = %pool_name, worker_id, "generator worker shutting down");
                return;
            }
        };
        record_pool_wait(&pool_name, wait_start.elapsed());

        let Ok(permit) = permit else {
            // Receiver dropped: pool is gone.
            return;
        };

        let gen_start = Instant::now();
        let value = generate();
        record_pool_generate(&pool_name, gen_start.elapsed());
        if let Err(ref e) = value {
            warn!(pool = %pool_name, worker_id, error = %e, "generator failed, surfacing error to next getter");
        }
        permit.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn get_returns_generated_values() {
        let pool = Pool::new("test-pool", 1, 4, || Ok(42u64));
        let value = pool.get().await.expect("pool open");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn close_eventually_fails_pending_gets() {
        let counter = Arc::new(AtomicU64::new(0));
        let pool = Pool::new("counting-pool", 1, 1, {
            let counter = Arc::clone(&counter);
            move || Ok(counter.fetch_add(1, Ordering::SeqCst))
        });
        // Drain a couple of values to prove generation happens.
        let _: u64 = pool.get().await.unwrap();
        let _: u64 = pool.get().await.unwrap();
        pool.close();
        drop(pool);
        // No assertion beyond "doesn't hang" — Drop aborts worker tasks.
    }

    #[tokio::test]
    async fn buffer_fills_up_to_capacity() {
        let pool = Pool::new("capacity-pool", 1, 3, || Ok(7u8));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(pool.buffer_depth().await <= pool.capacity());
    }

    #[tokio::test]
    async fn generator_errors_surface_to_getter() {
        let pool: Pool<u8> = Pool::new("failing-pool", 1, 1, || {
            Err(KmsError::Transient("synthetic failure".to_string()))
        });
        let err = pool.get().await.expect_err("generator always fails");
        assert!(matches!(err, PoolError::Generate(_)));
    }
}
