//! # KMS Test Utilities
//!
//! Shared test utilities for the core cryptographic service plane.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed unseal secrets, signing keys for reproducible tests)
//! - Test data builders (TestPoolRequestBuilder, etc.)
//! - Server test harness (TestKmsServer for E2E tests)
//! - Fixed test IDs (UUIDs, constants)
//! - Custom assertions (CompactAssertions trait for JWE/JWS values)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kms_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let server = TestKmsServer::spawn().await?;
//!
//!     let body = TestPoolRequestBuilder::new(TEST_TENANT_ACME, "signing-pool")
//!         .algorithm("ed25519")
//!         .build();
//!
//!     // ... POST body to server.url(), then assert on the response JWS:
//!     jws.assert_is_jws_compact();
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod elastic_key_time;
pub mod request_builders;
pub mod server_harness;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use elastic_key_time::*;
pub use request_builders::*;
pub use server_harness::*;
pub use test_ids::*;
