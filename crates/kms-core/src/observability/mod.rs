//! Observability for the KMS core service plane.
//!
//! # Privacy by default
//!
//! Tracing spans never carry raw key material, unseal secrets, or plaintext
//! payloads — only identifiers (pool names, key IDs, tenant IDs) and the
//! closed `KmsError` kind. Integrity failures in particular must never log
//! *why* verification failed (scenario S5); they are opaque at
//! every layer, not just at the HTTP boundary.

pub mod metrics;

pub use metrics::{record_barrier_cache, record_elastic_claim, record_http_request};
