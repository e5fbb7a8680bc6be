//! Metric definitions for the KMS core service plane.
//!
//! All metrics follow Prometheus naming conventions:
//! - `kms_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded: `pool` is bounded by the small, operator-configured
//! set of generator pools; `status` is `success`/`error`; `kind` is the
//! closed `KmsError` kind set.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Generator pool metrics
// ============================================================================

/// Latency of a `Get` call against a generator pool, from send to recv.
///
/// Metric: `kms_pool_get_duration_seconds`
/// Labels: `pool`
pub fn record_pool_get(pool: &str, duration: Duration) {
    histogram!("kms_pool_get_duration_seconds", "pool" => pool.to_string())
        .record(duration.as_secs_f64());
}

/// Time a `Get` call spent waiting for channel capacity before being served.
///
/// Metric: `kms_pool_wait_duration_seconds`
/// Labels: `pool`
pub fn record_pool_wait(pool: &str, duration: Duration) {
    histogram!("kms_pool_wait_duration_seconds", "pool" => pool.to_string())
        .record(duration.as_secs_f64());
}

/// A single generator worker producing one value.
///
/// Metric: `kms_pool_generate_duration_seconds`, `kms_pool_values_generated_total`
/// Labels: `pool`
pub fn record_pool_generate(pool: &str, duration: Duration) {
    histogram!("kms_pool_generate_duration_seconds", "pool" => pool.to_string())
        .record(duration.as_secs_f64());
    counter!("kms_pool_values_generated_total", "pool" => pool.to_string()).increment(1);
}

/// Current depth of a pool's output buffer (channel capacity - available permits).
///
/// Metric: `kms_pool_buffer_depth`
/// Labels: `pool`
pub fn set_pool_buffer_depth(pool: &str, depth: u64) {
    gauge!("kms_pool_buffer_depth", "pool" => pool.to_string()).set(depth as f64);
}

// ============================================================================
// Barrier metrics
// ============================================================================

/// Record an unseal attempt.
///
/// Metric: `kms_barrier_unseal_total`
/// Labels: `status` (success, error)
pub fn record_barrier_unseal(status: &str) {
    counter!("kms_barrier_unseal_total", "status" => status.to_string()).increment(1);
}

/// Record a barrier cache lookup for an intermediate or content key.
///
/// Metric: `kms_barrier_cache_requests_total`
/// Labels: `tier` (intermediate, content), `outcome` (hit, miss)
pub fn record_barrier_cache(tier: &str, outcome: &str) {
    counter!("kms_barrier_cache_requests_total", "tier" => tier.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record a root or unseal key rotation.
///
/// Metric: `kms_barrier_rotation_total`
/// Labels: `tier` (unseal, root), `status`
pub fn record_barrier_rotation(tier: &str, status: &str) {
    counter!("kms_barrier_rotation_total", "tier" => tier.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// Elastic key service metrics
// ============================================================================

/// Record a claim attempt against a durable key pool.
///
/// Metric: `kms_elastic_claim_total`
/// Labels: `pool`, `status` (success, empty, error)
pub fn record_elastic_claim(pool: &str, status: &str) {
    counter!("kms_elastic_claim_total", "pool" => pool.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Current count of `Ready` elastic keys available to claim.
///
/// Metric: `kms_elastic_ready_count`
/// Labels: `pool`
pub fn set_elastic_ready_count(pool: &str, count: u64) {
    gauge!("kms_elastic_ready_count", "pool" => pool.to_string()).set(count as f64);
}

/// A backfill sweep's outcome.
///
/// Metric: `kms_elastic_backfill_total`, `kms_elastic_backfill_duration_seconds`
/// Labels: `pool`, `status`
pub fn record_elastic_backfill(pool: &str, status: &str, duration: Duration) {
    histogram!("kms_elastic_backfill_duration_seconds", "pool" => pool.to_string())
        .record(duration.as_secs_f64());
    counter!("kms_elastic_backfill_total", "pool" => pool.to_string(), "status" => status.to_string())
        .increment(1);
}

/// A janitor sweep reaping abandoned `Generating` rows.
///
/// Metric: `kms_elastic_janitor_reaped_total`
/// Labels: `pool`
pub fn record_elastic_janitor_reaped(pool: &str, count: u64) {
    counter!("kms_elastic_janitor_reaped_total", "pool" => pool.to_string()).increment(count);
}

// ============================================================================
// Database metrics
// ============================================================================

/// Record database query execution.
///
/// Metric: `kms_db_query_duration_seconds`, `kms_db_queries_total`
/// Labels: `operation`, `table`, `status`
pub fn record_db_query(operation: &str, table: &str, status: &str, duration: Duration) {
    histogram!("kms_db_query_duration_seconds", "operation" => operation.to_string(), "table" => table.to_string())
        .record(duration.as_secs_f64());

    counter!("kms_db_queries_total", "operation" => operation.to_string(), "table" => table.to_string(), "status" => status.to_string())
        .increment(1);
}

// ============================================================================
// HTTP / error metrics
// ============================================================================

/// Record an inbound HTTP request outcome.
///
/// Metric: `kms_http_requests_total`, `kms_http_request_duration_seconds`
/// Labels: `method`, `route`, `status_code`
pub fn record_http_request(method: &str, route: &str, status_code: u16, duration: Duration) {
    histogram!("kms_http_request_duration_seconds", "method" => method.to_string(), "route" => route.to_string())
        .record(duration.as_secs_f64());

    counter!("kms_http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Record an error by its closed `KmsError` kind.
///
/// Metric: `kms_errors_total`
/// Labels: `operation`, `kind`
pub fn record_error(operation: &str, kind: &str) {
    counter!("kms_errors_total", "operation" => operation.to_string(), "kind" => kind.to_string())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pool_get_compiles() {
        let _ = || {
            record_pool_get("rsa-2048", Duration::from_millis(5));
        };
    }

    #[test]
    fn test_record_elastic_claim_compiles() {
        let _ = || {
            record_elastic_claim("rsa-2048", "success");
        };
    }

    #[test]
    fn test_record_db_query_compiles() {
        let _ = || {
            record_db_query("select", "elastic_keys", "success", Duration::from_millis(5));
        };
    }

    #[test]
    fn test_record_barrier_cache_compiles() {
        let _ = || {
            record_barrier_cache("intermediate", "hit");
        };
    }
}
