//! Entity models for the KMS core service plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Algorithm a KeyPool generates/imports keys for.
///
/// Immutable once a pool is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EcP256,
    EcP384,
    EcP521,
    Ed25519,
    Oct128,
    Oct192,
    Oct256,
    Oct384,
    Oct512,
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl Algorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Algorithm::Rsa2048 => "RSA-2048",
            Algorithm::Rsa3072 => "RSA-3072",
            Algorithm::Rsa4096 => "RSA-4096",
            Algorithm::EcP256 => "EC-P256",
            Algorithm::EcP384 => "EC-P384",
            Algorithm::EcP521 => "EC-P521",
            Algorithm::Ed25519 => "Ed25519",
            Algorithm::Oct128 => "Oct-128",
            Algorithm::Oct192 => "Oct-192",
            Algorithm::Oct256 => "Oct-256",
            Algorithm::Oct384 => "Oct-384",
            Algorithm::Oct512 => "Oct-512",
            Algorithm::Aes128Gcm => "AES-128-GCM",
            Algorithm::Aes192Gcm => "AES-192-GCM",
            Algorithm::Aes256Gcm => "AES-256-GCM",
            Algorithm::Aes128Cbc => "AES-128-CBC",
            Algorithm::Aes192Cbc => "AES-192-CBC",
            Algorithm::Aes256Cbc => "AES-256-CBC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "RSA-2048" => Algorithm::Rsa2048,
            "RSA-3072" => Algorithm::Rsa3072,
            "RSA-4096" => Algorithm::Rsa4096,
            "EC-P256" => Algorithm::EcP256,
            "EC-P384" => Algorithm::EcP384,
            "EC-P521" => Algorithm::EcP521,
            "Ed25519" => Algorithm::Ed25519,
            "Oct-128" => Algorithm::Oct128,
            "Oct-192" => Algorithm::Oct192,
            "Oct-256" => Algorithm::Oct256,
            "Oct-384" => Algorithm::Oct384,
            "Oct-512" => Algorithm::Oct512,
            "AES-128-GCM" => Algorithm::Aes128Gcm,
            "AES-192-GCM" => Algorithm::Aes192Gcm,
            "AES-256-GCM" => Algorithm::Aes256Gcm,
            "AES-128-CBC" => Algorithm::Aes128Cbc,
            "AES-192-CBC" => Algorithm::Aes192Cbc,
            "AES-256-CBC" => Algorithm::Aes256Cbc,
            _ => return None,
        })
    }

    /// Name of the generator pool that produces material for this algorithm
    /// (policy table).
    pub const fn pool_name(self) -> &'static str {
        match self {
            Algorithm::Rsa2048 => "rsa-2048",
            Algorithm::Rsa3072 => "rsa-3072",
            Algorithm::Rsa4096 => "rsa-4096",
            Algorithm::EcP256 => "p-256",
            Algorithm::EcP384 => "p-384",
            Algorithm::EcP521 => "p-521",
            Algorithm::Ed25519 => "ed25519",
            Algorithm::Oct384 | Algorithm::Oct512 => "oct-512",
            Algorithm::Oct128
            | Algorithm::Oct192
            | Algorithm::Oct256
            | Algorithm::Aes128Gcm
            | Algorithm::Aes192Gcm
            | Algorithm::Aes256Gcm
            | Algorithm::Aes128Cbc
            | Algorithm::Aes192Cbc
            | Algorithm::Aes256Cbc => "aes-256",
        }
    }

    /// Byte length of this algorithm's symmetric key material. Asymmetric
    /// algorithms generate their own PKCS8 document and ignore this; the
    /// symmetric variants share one 256-bit generator pool (`"aes-256"`)
    /// and truncate its output to the length their bit-size needs — taking
    /// a prefix of independently random CSPRNG output is itself uniformly
    /// random, so this is safe and avoids a generator pool per bit length.
    pub const fn symmetric_key_len(self) -> usize {
        match self {
            Algorithm::Oct128 | Algorithm::Aes128Gcm | Algorithm::Aes128Cbc => 16,
            Algorithm::Oct192 | Algorithm::Aes192Gcm | Algorithm::Aes192Cbc => 24,
            Algorithm::Oct256 | Algorithm::Aes256Gcm | Algorithm::Aes256Cbc => 32,
            Algorithm::Oct384 => 48,
            Algorithm::Oct512 => 64,
            _ => 32,
        }
    }

    pub const fn is_asymmetric(self) -> bool {
        !matches!(
            self,
            Algorithm::Oct128
                | Algorithm::Oct192
                | Algorithm::Oct256
                | Algorithm::Oct384
                | Algorithm::Oct512
                | Algorithm::Aes128Gcm
                | Algorithm::Aes192Gcm
                | Algorithm::Aes256Gcm
                | Algorithm::Aes128Cbc
                | Algorithm::Aes192Cbc
                | Algorithm::Aes256Cbc
        )
    }
}

/// Semantic role a key plays; pairs with `Algorithm` to form the operation
/// allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
    Enc,
    Mac,
    Wrap,
}

impl KeyUse {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
            KeyUse::Enc => "enc",
            KeyUse::Mac => "mac",
            KeyUse::Wrap => "wrap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sig" => KeyUse::Sig,
            "enc" => KeyUse::Enc,
            "mac" => KeyUse::Mac,
            "wrap" => KeyUse::Wrap,
            _ => return None,
        })
    }
}

/// Lifecycle status of a `KeyPool` (FSM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    PendingGenerate,
    PendingImport,
    Active,
    Disabled,
    PendingDeleteWasActive,
    PendingDeleteWasDisabled,
    PendingDeleteWasImportFailed,
    PendingDeleteWasGenerateFailed,
    Deleted,
}

impl PoolStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            PoolStatus::PendingGenerate => "pending_generate",
            PoolStatus::PendingImport => "pending_import",
            PoolStatus::Active => "active",
            PoolStatus::Disabled => "disabled",
            PoolStatus::PendingDeleteWasActive => "pending_delete_was_active",
            PoolStatus::PendingDeleteWasDisabled => "pending_delete_was_disabled",
            PoolStatus::PendingDeleteWasImportFailed => "pending_delete_was_import_failed",
            PoolStatus::PendingDeleteWasGenerateFailed => "pending_delete_was_generate_failed",
            PoolStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending_generate" => PoolStatus::PendingGenerate,
            "pending_import" => PoolStatus::PendingImport,
            "active" => PoolStatus::Active,
            "disabled" => PoolStatus::Disabled,
            "pending_delete_was_active" => PoolStatus::PendingDeleteWasActive,
            "pending_delete_was_disabled" => PoolStatus::PendingDeleteWasDisabled,
            "pending_delete_was_import_failed" => PoolStatus::PendingDeleteWasImportFailed,
            "pending_delete_was_generate_failed" => PoolStatus::PendingDeleteWasGenerateFailed,
            "deleted" => PoolStatus::Deleted,
            _ => return None,
        })
    }
}

/// Status of a versioned `Key` within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Inactive,
    Compromised,
    Revoked,
}

impl KeyStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Inactive => "inactive",
            KeyStatus::Compromised => "compromised",
            KeyStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => KeyStatus::Active,
            "inactive" => KeyStatus::Inactive,
            "compromised" => KeyStatus::Compromised,
            "revoked" => KeyStatus::Revoked,
            _ => return None,
        })
    }
}

/// Status of a `RootKey` / `IntermediateKey` / `ContentKey` in the barrier
/// chain (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierStatus {
    Active,
    Rotating,
    Retired,
}

impl TierStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TierStatus::Active => "active",
            TierStatus::Rotating => "rotating",
            TierStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => TierStatus::Active,
            "rotating" => TierStatus::Rotating,
            "retired" => TierStatus::Retired,
            _ => return None,
        })
    }
}

/// Status of a durable `ElasticKey` pool-state row (FSM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElasticStatus {
    Generate,
    Import,
    Active,
    Disabled,
    PendingDeleteWasActive,
    PendingDeleteWasDisabled,
    PendingDeleteWasImportFailed,
    PendingDeleteWasGenerateFailed,
    StartedDelete,
    Deleted,
}

impl ElasticStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ElasticStatus::Generate => "generate",
            ElasticStatus::Import => "import",
            ElasticStatus::Active => "active",
            ElasticStatus::Disabled => "disabled",
            ElasticStatus::PendingDeleteWasActive => "pending_delete_was_active",
            ElasticStatus::PendingDeleteWasDisabled => "pending_delete_was_disabled",
            ElasticStatus::PendingDeleteWasImportFailed => "pending_delete_was_import_failed",
            ElasticStatus::PendingDeleteWasGenerateFailed => "pending_delete_was_generate_failed",
            ElasticStatus::StartedDelete => "started_delete",
            ElasticStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "generate" => ElasticStatus::Generate,
            "import" => ElasticStatus::Import,
            "active" => ElasticStatus::Active,
            "disabled" => ElasticStatus::Disabled,
            "pending_delete_was_active" => ElasticStatus::PendingDeleteWasActive,
            "pending_delete_was_disabled" => ElasticStatus::PendingDeleteWasDisabled,
            "pending_delete_was_import_failed" => ElasticStatus::PendingDeleteWasImportFailed,
            "pending_delete_was_generate_failed" => ElasticStatus::PendingDeleteWasGenerateFailed,
            "started_delete" => ElasticStatus::StartedDelete,
            "deleted" => ElasticStatus::Deleted,
            _ => return None,
        })
    }
}

/// Tenant-owned logical container for a sequence of related keys of one
/// algorithm.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KeyPool {
    pub pool_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub algorithm: String,
    pub key_use: String,
    pub key_ops: String,
    pub import_allowed: bool,
    pub versioning_allowed: bool,
    pub export_allowed: bool,
    pub status: String,
    pub current_key_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KeyPool {
    pub fn algorithm(&self) -> Option<Algorithm> {
        Algorithm::parse(&self.algorithm)
    }

    pub fn key_use(&self) -> Option<KeyUse> {
        KeyUse::parse(&self.key_use)
    }

    pub fn status(&self) -> Option<PoolStatus> {
        PoolStatus::parse(&self.status)
    }
}

/// One versioned key within a `KeyPool`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Key {
    pub key_id: Uuid,
    pub pool_id: Uuid,
    pub version: i64,
    /// Always the Barrier-encrypted JWE compact serialization of the raw JWK.
    pub material: String,
    /// Unencrypted JWK public half; null for symmetric keys.
    pub public_material: Option<String>,
    pub status: String,
    pub generate_date: DateTime<Utc>,
    pub activate_date: Option<DateTime<Utc>>,
    pub expire_date: Option<DateTime<Utc>>,
}

impl Key {
    pub fn status(&self) -> Option<KeyStatus> {
        KeyStatus::parse(&self.status)
    }
}

/// Persisted, long-lived symmetric KEK for the intermediate tier.
#[derive(Debug, Clone, FromRow)]
pub struct RootKey {
    pub kid: Uuid,
    /// JWE-wrapped under one of the active UnsealKeys; header `kid` records
    /// which UnsealKey wrapped it.
    pub encrypted_material: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl RootKey {
    pub fn status(&self) -> Option<TierStatus> {
        TierStatus::parse(&self.status)
    }
}

/// Persisted, medium-lived symmetric KEK wrapping content keys.
#[derive(Debug, Clone, FromRow)]
pub struct IntermediateKey {
    pub kid: Uuid,
    pub root_kid: Uuid,
    pub encrypted_material: String,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub status: String,
}

impl IntermediateKey {
    pub fn status(&self) -> Option<TierStatus> {
        TierStatus::parse(&self.status)
    }
}

/// Persisted, short-lived symmetric key directly wrapping user Key Material
///.
#[derive(Debug, Clone, FromRow)]
pub struct ContentKey {
    pub kid: Uuid,
    pub intermediate_kid: Uuid,
    pub encrypted_material: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

impl ContentKey {
    pub fn status(&self) -> Option<TierStatus> {
        TierStatus::parse(&self.status)
    }
}

/// Durable tracking row for background pool generation work (§4.4).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ElasticKey {
    pub ekid: Uuid,
    pub pool_name: String,
    pub status: String,
    /// Opaque generated value or KID reference once produced.
    pub material: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ElasticKey {
    pub fn status(&self) -> Option<ElasticStatus> {
        ElasticStatus::parse(&self.status)
    }
}

/// Append-only audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PoolCreated,
    PoolStatusChanged,
    KeyImported,
    KeyRotated,
    KeyRevoked,
    RootRotated,
    IntermediateRotated,
    ContentRotated,
    ElasticClaimed,
    ElasticGenerateFailed,
    UnsealSucceeded,
    UnsealFailed,
}

impl AuditEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuditEventType::PoolCreated => "pool_created",
            AuditEventType::PoolStatusChanged => "pool_status_changed",
            AuditEventType::KeyImported => "key_imported",
            AuditEventType::KeyRotated => "key_rotated",
            AuditEventType::KeyRevoked => "key_revoked",
            AuditEventType::RootRotated => "root_rotated",
            AuditEventType::IntermediateRotated => "intermediate_rotated",
            AuditEventType::ContentRotated => "content_rotated",
            AuditEventType::ElasticClaimed => "elastic_claimed",
            AuditEventType::ElasticGenerateFailed => "elastic_generate_failed",
            AuditEventType::UnsealSucceeded => "unseal_succeeded",
            AuditEventType::UnsealFailed => "unseal_failed",
        }
    }
}

/// Append-only record of a barrier rotation, pool lifecycle transition, or
/// claim/import/delete operation. Never stores plaintext key material.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub tenant_id: Option<Uuid>,
    pub subject: String,
    pub success: bool,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Parses `detail` back into structured JSON. Stored as text so the
    /// column is portable across backends; malformed stored JSON would be a
    /// bug in `record`, not a caller error, so this returns `KmsError::Internal`.
    pub fn detail_json(&self) -> Result<serde_json::Value, crate::errors::KmsError> {
        serde_json::from_str(&self.detail).map_err(|_| crate::errors::KmsError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_round_trips_through_str() {
        for alg in [
            Algorithm::Rsa2048,
            Algorithm::EcP256,
            Algorithm::Ed25519,
            Algorithm::Aes256Gcm,
        ] {
            assert_eq!(Algorithm::parse(alg.as_str()), Some(alg));
        }
    }

    #[test]
    fn symmetric_algorithms_report_not_asymmetric() {
        assert!(!Algorithm::Aes256Gcm.is_asymmetric());
        assert!(!Algorithm::Oct256.is_asymmetric());
        assert!(Algorithm::Rsa2048.is_asymmetric());
        assert!(Algorithm::Ed25519.is_asymmetric());
    }

    #[test]
    fn pool_status_round_trips() {
        for status in [
            PoolStatus::PendingGenerate,
            PoolStatus::Active,
            PoolStatus::PendingDeleteWasGenerateFailed,
        ] {
            assert_eq!(PoolStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn elastic_status_round_trips() {
        for status in [
            ElasticStatus::Generate,
            ElasticStatus::Active,
            ElasticStatus::StartedDelete,
            ElasticStatus::Deleted,
        ] {
            assert_eq!(ElasticStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_algorithm_string_is_rejected() {
        assert_eq!(Algorithm::parse("not-an-algorithm"), None);
    }
}
