//! Three-tier envelope encryption: Unseal -> Root -> Intermediate -> Content
//!. Every lower tier is persisted JWE-wrapped under the tier
//! above; only the Unseal tier lives exclusively in memory.
//!
//! JWE construction goes through `josekit` (RFC 7516). Content encryption is
//! always `A256GCM`; key wrapping is `A256GCMKW` (AES key wrap is itself
//! AEAD, so no non-AEAD code path exists to reject).

pub mod envelope;

use crate::config::Config;
use crate::db::{DbPool, Tx};
use crate::errors::KmsError;
use crate::models::TierStatus;
use crate::observability::metrics::{record_barrier_cache, record_barrier_rotation, record_barrier_unseal};
use crate::repositories::{content_keys, intermediate_keys, root_keys};
use common::secret::{ExposeSecret, SecretBox};
use std::collections::HashMap;
use std::num::NonZeroU32;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// A key derived from one operator-supplied secret. Exists only in memory;
/// `kid` is the deterministic SHA-256 of the derived key bytes.
struct UnsealKey {
    kid: String,
    key: SecretBox<[u8; 32]>,
}

struct BarrierState {
    unseal_keys: Vec<UnsealKey>,
    root_cache: HashMap<Uuid, SecretBox<[u8; 32]>>,
    intermediate_cache: HashMap<Uuid, SecretBox<[u8; 32]>>,
    content_cache: HashMap<Uuid, SecretBox<[u8; 32]>>,
}

/// Handle to the unsealed barrier, shared via `Arc` in `AppState`. All
/// operations that touch persisted tiers take the caller's transaction, so
/// a barrier operation and its surrounding business-logic writes commit or
/// roll back together.
pub struct Barrier {
    state: RwLock<BarrierState>,
}

impl Barrier {
    /// `Unseal(secrets[])`: derives UnsealKeys, then tries to unwrap every
    /// persisted active RootKey. Fails closed if the DB holds at least one
    /// RootKey and none can be unwrapped by any derived UnsealKey — an
    /// empty DB (first boot) is not itself a failure; bootstrapping the
    /// first Root/Intermediate pair is a separate step (`ensure_bootstrapped`).
    pub async fn unseal(secrets: &[Vec<u8>], config: &Config, pool: &DbPool) -> Result<Self, KmsError> {
        if secrets.is_empty() {
            return Err(KmsError::InvalidInput("no unseal secrets configured".to_string()));
        }

        let unseal_keys: Vec<UnsealKey> = secrets
            .iter()
            .map(|secret| derive_unseal_key(secret, config.pbkdf2_iterations))
            .collect();

        let mut tx = pool.begin().await?;
        let roots = root_keys::list_all(&mut tx).await?;
        tx.commit().await?;

        let mut root_cache = HashMap::new();
        let mut any_unwrapped = roots.is_empty();
        for root in &roots {
            if root.status() != Some(TierStatus::Active) {
                continue;
            }
            let mut unwrapped = false;
            for uk in &unseal_keys {
                if let Ok(plain) = envelope::unwrap(&root.encrypted_material, uk.key.expose_secret().as_slice()) {
                    if let Some(bytes) = to_key_bytes(&plain) {
                        root_cache.insert(root.kid, SecretBox::new(Box::new(bytes)));
                        unwrapped = true;
                        any_unwrapped = true;
                        break;
                    }
                }
            }
            if !unwrapped {
                warn!(root_kid = %root.kid, "active root key could not be unwrapped by any unseal secret");
            }
        }

        if !any_unwrapped {
            record_barrier_unseal("error");
            return Err(KmsError::Sealed);
        }

        record_barrier_unseal("success");
        info!(unseal_keys = unseal_keys.len(), roots_unwrapped = root_cache.len(), "barrier unsealed");
        Ok(Self {
            state: RwLock::new(BarrierState {
                unseal_keys,
                root_cache,
                intermediate_cache: HashMap::new(),
                content_cache: HashMap::new(),
            }),
        })
    }

    /// Creates the first RootKey/IntermediateKey pair if none are persisted
    /// yet (scenario S1: cold start). No-op if any RootKey exists.
    pub async fn ensure_bootstrapped(&self, tx: &mut Tx<'_>) -> Result<(), KmsError> {
        if root_keys::list_all(tx).await?.into_iter().any(|r| r.status() == Some(TierStatus::Active)) {
            return Ok(());
        }
        self.rotate_root(tx).await?;
        self.rotate_intermediate(tx).await?;
        Ok(())
    }

    /// `EncryptKeyMaterial(plain) -> ciphertext`: wraps `plain` under the
    /// active ContentKey, creating one first if none exists.
    pub async fn encrypt_key_material(&self, tx: &mut Tx<'_>, plain: &[u8]) -> Result<String, KmsError> {
        let content = match content_keys::get_active(tx).await? {
            Some(content) => content,
            None => {
                self.rotate_content(tx).await?;
                content_keys::get_active(tx).await?.ok_or(KmsError::Internal)?
            }
        };
        let key_bytes = self.unwrap_content(tx, &content).await?;
        envelope::wrap(plain, key_bytes.expose_secret().as_slice(), &content.kid.to_string())
    }

    /// `DecryptKeyMaterial(ciphertext) -> plain`: reads the unverified JWE
    /// header `kid` to find which ContentKey wrapped this value, then
    /// unwraps Content -> Intermediate -> Root -> Unseal. Every failure
    /// collapses to `KmsError::Integrity`; the caller never learns which
    /// tier failed (scenario S5).
    pub async fn decrypt_key_material(&self, tx: &mut Tx<'_>, ciphertext: &str) -> Result<Vec<u8>, KmsError> {
        let kid = envelope::peek_kid(ciphertext)
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or(KmsError::Integrity)?;
        let content = content_keys::get_by_kid(tx, kid).await?.ok_or(KmsError::Integrity)?;
        let key_bytes = self.unwrap_content(tx, &content).await.map_err(|_| KmsError::Integrity)?;
        envelope::unwrap(ciphertext, key_bytes.expose_secret().as_slice()).map_err(|_| KmsError::Integrity)
    }

    /// `RotateRoot()`: generates a new RootKey wrapped under the first
    /// available UnsealKey, activates it, retires the previous active one.
    /// Never rewraps existing IntermediateKeys (lazy rewrap on next write).
    pub async fn rotate_root(&self, tx: &mut Tx<'_>) -> Result<Uuid, KmsError> {
        let key_bytes = random_key_bytes()?;
        let wrapping = {
            let state = self.state.read().await;
            let uk = state.unseal_keys.first().ok_or(KmsError::Sealed)?;
            (uk.kid.clone(), uk.key.expose_secret().to_vec())
        };
        let kid = Uuid::now_v7();
        let wrapped = envelope::wrap(&key_bytes, &wrapping.1, &wrapping.0)?;

        root_keys::retire_active(tx).await?;
        let row = root_keys::create(tx, kid, &wrapped, TierStatus::Active.as_str()).await;
        let row = row.inspect_err(|_| record_barrier_rotation("root", "error"))?;

        let mut state = self.state.write().await;
        state.root_cache.insert(row.kid, SecretBox::new(Box::new(key_bytes)));
        drop(state);
        record_barrier_rotation("root", "success");
        Ok(row.kid)
    }

    /// `RotateIntermediate()`: wraps a fresh IntermediateKey under the
    /// currently active RootKey.
    pub async fn rotate_intermediate(&self, tx: &mut Tx<'_>) -> Result<Uuid, KmsError> {
        let root = root_keys::get_active(tx).await?.ok_or(KmsError::Sealed)?;
        let root_bytes = self.unwrap_root(tx, &root).await?;

        let key_bytes = random_key_bytes()?;
        let kid = Uuid::now_v7();
        let wrapped = envelope::wrap(&key_bytes, root_bytes.expose_secret().as_slice(), &root.kid.to_string())?;

        intermediate_keys::retire_active(tx).await?;
        let row = intermediate_keys::create(tx, kid, root.kid, &wrapped, TierStatus::Active.as_str()).await;
        let row = row.inspect_err(|_| record_barrier_rotation("intermediate", "error"))?;

        let mut state = self.state.write().await;
        state.intermediate_cache.insert(row.kid, SecretBox::new(Box::new(key_bytes)));
        drop(state);
        record_barrier_rotation("intermediate", "success");
        Ok(row.kid)
    }

    /// `RotateContent()`: wraps a fresh ContentKey under the currently
    /// active IntermediateKey.
    pub async fn rotate_content(&self, tx: &mut Tx<'_>) -> Result<Uuid, KmsError> {
        let intermediate = intermediate_keys::get_active(tx).await?.ok_or(KmsError::Sealed)?;
        let intermediate_bytes = self.unwrap_intermediate(tx, &intermediate).await?;

        let key_bytes = random_key_bytes()?;
        let kid = Uuid::now_v7();
        let wrapped = envelope::wrap(
            &key_bytes,
            intermediate_bytes.expose_secret().as_slice(),
            &intermediate.kid.to_string(),
        )?;

        content_keys::retire_active(tx).await?;
        let row = content_keys::create(tx, kid, intermediate.kid, &wrapped, TierStatus::Active.as_str()).await;
        let row = row.inspect_err(|_| record_barrier_rotation("content", "error"))?;

        let mut state = self.state.write().await;
        state.content_cache.insert(row.kid, SecretBox::new(Box::new(key_bytes)));
        drop(state);
        record_barrier_rotation("content", "success");
        Ok(row.kid)
    }

    /// `SealShutdown()`: drops every unwrapped key in memory. `SecretBox`
    /// zeroizes its contents on drop, so clearing the maps and the unseal
    /// key vector is sufficient.
    pub async fn seal_shutdown(&self) {
        let mut state = self.state.write().await;
        state.unseal_keys.clear();
        state.root_cache.clear();
        state.intermediate_cache.clear();
        state.content_cache.clear();
        info!("barrier sealed, unseal key material zeroized");
    }

    async fn unwrap_root(&self, _tx: &mut Tx<'_>, root: &crate::models::RootKey) -> Result<SecretBox<[u8; 32]>, KmsError> {
        if let Some(bytes) = self.cached(root.kid, CacheTier::Root).await {
            record_barrier_cache("root", "hit");
            return Ok(bytes);
        }
        record_barrier_cache("root", "miss");

        // Scoped so the read guard drops before `cache_insert` takes the
        // write lock below — holding both at once would deadlock.
        let found = {
            let state = self.state.read().await;
            let mut found = None;
            for uk in &state.unseal_keys {
                if let Ok(plain) = envelope::unwrap(&root.encrypted_material, uk.key.expose_secret().as_slice()) {
                    if let Some(bytes) = to_key_bytes(&plain) {
                        found = Some(bytes);
                        break;
                    }
                }
            }
            found
        };

        let bytes = found.ok_or(KmsError::Integrity)?;
        self.cache_insert(root.kid, CacheTier::Root, bytes).await;
        Ok(SecretBox::new(Box::new(bytes)))
    }

    async fn unwrap_intermediate(
        &self,
        tx: &mut Tx<'_>,
        intermediate: &crate::models::IntermediateKey,
    ) -> Result<SecretBox<[u8; 32]>, KmsError> {
        if let Some(bytes) = self.cached(intermediate.kid, CacheTier::Intermediate).await {
            record_barrier_cache("intermediate", "hit");
            return Ok(bytes);
        }
        record_barrier_cache("intermediate", "miss");
        let root = root_keys::get_by_kid(tx, intermediate.root_kid).await?.ok_or(KmsError::Integrity)?;
        let root_bytes = self.unwrap_root(tx, &root).await?;
        let plain = envelope::unwrap(&intermediate.encrypted_material, root_bytes.expose_secret().as_slice())
            .map_err(|_| KmsError::Integrity)?;
        let bytes = to_key_bytes(&plain).ok_or(KmsError::Integrity)?;
        self.cache_insert(intermediate.kid, CacheTier::Intermediate, bytes).await;
        Ok(SecretBox::new(Box::new(bytes)))
    }

    async fn unwrap_content(
        &self,
        tx: &mut Tx<'_>,
        content: &crate::models::ContentKey,
    ) -> Result<SecretBox<[u8; 32]>, KmsError> {
        if let Some(bytes) = self.cached(content.kid, CacheTier::Content).await {
            record_barrier_cache("content", "hit");
            return Ok(bytes);
        }
        record_barrier_cache("content", "miss");
        let intermediate = intermediate_keys::get_by_kid(tx, content.intermediate_kid)
            .await?
            .ok_or(KmsError::Integrity)?;
        let intermediate_bytes = self.unwrap_intermediate(tx, &intermediate).await?;
        let plain = envelope::unwrap(&content.encrypted_material, intermediate_bytes.expose_secret().as_slice())
            .map_err(|_| KmsError::Integrity)?;
        let bytes = to_key_bytes(&plain).ok_or(KmsError::Integrity)?;
        self.cache_insert(content.kid, CacheTier::Content, bytes).await;
        Ok(SecretBox::new(Box::new(bytes)))
    }

    async fn cached(&self, kid: Uuid, tier: CacheTier) -> Option<SecretBox<[u8; 32]>> {
        let state = self.state.read().await;
        let bytes = *match tier {
            CacheTier::Root => state.root_cache.get(&kid)?.expose_secret(),
            CacheTier::Intermediate => state.intermediate_cache.get(&kid)?.expose_secret(),
            CacheTier::Content => state.content_cache.get(&kid)?.expose_secret(),
        };
        Some(SecretBox::new(Box::new(bytes)))
    }

    async fn cache_insert(&self, kid: Uuid, tier: CacheTier, bytes: [u8; 32]) {
        let mut state = self.state.write().await;
        let cache = match tier {
            CacheTier::Root => &mut state.root_cache,
            CacheTier::Intermediate => &mut state.intermediate_cache,
            CacheTier::Content => &mut state.content_cache,
        };
        cache.insert(kid, SecretBox::new(Box::new(bytes)));
    }
}

#[derive(Clone, Copy)]
enum CacheTier {
    Root,
    Intermediate,
    Content,
}

fn derive_unseal_key(secret: &[u8], iterations: u32) -> UnsealKey {
    let salt_digest = ring::digest::digest(&ring::digest::SHA256, secret);
    let salt = &salt_digest.as_ref()[..16];
    let iterations_nz = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);

    let mut key_bytes = [0u8; 32];
    ring::pbkdf2::derive(ring::pbkdf2::PBKDF2_HMAC_SHA256, iterations_nz, salt, secret, &mut key_bytes);

    let kid = hex::encode(ring::digest::digest(&ring::digest::SHA256, &key_bytes));
    UnsealKey {
        kid,
        key: SecretBox::new(Box::new(key_bytes)),
    }
}

fn random_key_bytes() -> Result<[u8; 32], KmsError> {
    use ring::rand::SecureRandom;
    let rng = ring::rand::SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| {
        error!("system RNG failed to fill key material buffer");
        KmsError::Transient("system RNG unavailable".to_string())
    })?;
    Ok(bytes)
}

fn to_key_bytes(plain: &[u8]) -> Option<[u8; 32]> {
    if plain.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(plain);
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_unseal_key_is_deterministic() {
        let a = derive_unseal_key(b"alpha-secret-32bytes-of-entropy!", 100_000);
        let b = derive_unseal_key(b"alpha-secret-32bytes-of-entropy!", 100_000);
        assert_eq!(a.kid, b.kid);
        assert_eq!(a.key.expose_secret(), b.key.expose_secret());
    }

    #[test]
    fn different_secrets_derive_different_keys() {
        let a = derive_unseal_key(b"alpha-secret-32bytes-of-entropy!", 100_000);
        let b = derive_unseal_key(b"beta-secret-also-32b-of-entropy!!", 100_000);
        assert_ne!(a.kid, b.kid);
    }

    #[test]
    fn wrap_unwrap_round_trips() {
        let key = random_key_bytes().expect("system RNG");
        let plaintext = b"super secret key material";
        let wrapped = envelope::wrap(plaintext, &key, "test-kid").expect("wrap");
        let unwrapped = envelope::unwrap(&wrapped, &key).expect("unwrap");
        assert_eq!(unwrapped, plaintext);
    }

    #[test]
    fn unwrap_with_wrong_key_fails() {
        let key = random_key_bytes().expect("system RNG");
        let wrong_key = random_key_bytes().expect("system RNG");
        let wrapped = envelope::wrap(b"data", &key, "kid").expect("wrap");
        assert!(envelope::unwrap(&wrapped, &wrong_key).is_err());
    }

    #[test]
    fn peek_kid_reads_header_without_decrypting() {
        let key = random_key_bytes().expect("system RNG");
        let wrapped = envelope::wrap(b"data", &key, "some-kid-123").expect("wrap");
        assert_eq!(envelope::peek_kid(&wrapped), Some("some-kid-123".to_string()));
    }

    #[test]
    fn random_key_bytes_produces_distinct_values() {
        let a = random_key_bytes().expect("system RNG");
        let b = random_key_bytes().expect("system RNG");
        assert_ne!(a, b);
    }
}
