//! Fixed test IDs for deterministic tests
//!
//! All test IDs are deterministic to ensure reproducible test results.
//! Using fixed UUIDs prevents flaky tests caused by random data.

use uuid::Uuid;

// Tenant IDs (1-99)
pub const TEST_TENANT_ACME: Uuid = Uuid::from_u128(1);
pub const TEST_TENANT_GLOBEX: Uuid = Uuid::from_u128(2);

// Pool IDs (100-199) -- only meaningful once a pool has actually been
// created through the orchestrator; useful as "this pool does not exist"
// fixtures in NotFound tests.
pub const TEST_POOL_ID_1: Uuid = Uuid::from_u128(100);
pub const TEST_POOL_ID_2: Uuid = Uuid::from_u128(101);

// Pool names
pub const TEST_POOL_NAME_SIGNING: &str = "test-signing-pool";
pub const TEST_POOL_NAME_ENCRYPTION: &str = "test-encryption-pool";

// Tier kids (1000-1099) -- never collide with a `Uuid::now_v7()`-generated
// value since v7 always carries a non-zero timestamp in its high bits.
pub const TEST_ROOT_KID: Uuid = Uuid::from_u128(1000);
pub const TEST_INTERMEDIATE_KID: Uuid = Uuid::from_u128(1001);
pub const TEST_CONTENT_KID: Uuid = Uuid::from_u128(1002);
