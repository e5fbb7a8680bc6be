//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible unseal secrets and Ed25519 keypairs/test vectors.
//! All fixtures are deterministic based on seed values or fixed constants.

use base64::engine::general_purpose;
use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Generate a deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same keypair, ensuring test reproducibility.
///
/// # Arguments
/// * `seed` - Seed value for deterministic key generation (0-255)
///
/// # Returns
/// * `Ok((public_key_pem, private_key_pkcs8))` - Public key in PEM format, private key in PKCS#8 DER
pub fn test_signing_key(seed: u8) -> Result<(String, Vec<u8>), FixtureError> {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {e:?}")))?;

    let public_key_bytes = key_pair.public_key().as_ref();
    let public_key_b64 = general_purpose::STANDARD.encode(public_key_bytes);
    let public_key_pem = format!("-----BEGIN PUBLIC KEY-----\n{public_key_b64}\n-----END PUBLIC KEY-----");

    let pkcs8_bytes = build_pkcs8_from_seed(&seed_bytes);

    Ok((public_key_pem, pkcs8_bytes))
}

/// Build PKCS#8 v1 document from Ed25519 seed (RFC 5208). Test-only; production
/// code generates keys through `ring::signature::Ed25519KeyPair::generate_pkcs8`.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::new();

    pkcs8.push(0x30);
    pkcs8.push(0x2e);

    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);

    pkcs8.push(0x30);
    pkcs8.push(0x05);
    pkcs8.extend_from_slice(&[0x06, 0x03, 0x2b, 0x65, 0x70]);

    pkcs8.push(0x04);
    pkcs8.push(0x22);
    pkcs8.push(0x04);
    pkcs8.push(0x20);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// Deterministic 32-byte unseal secrets for constructing a test `Barrier`.
///
/// `Config::load_unseal_secrets` rejects any secret under the 256-bit
/// entropy floor, so each fixture is a full 32 bytes; three are provided to
/// match the recommended operator quorum.
pub fn test_unseal_secrets() -> Vec<Vec<u8>> {
    vec![
        (0u8..32).collect(),
        (32u8..64).collect(),
        (64u8..96).collect(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_is_deterministic() {
        let (pub1, priv1) = test_signing_key(1).unwrap();
        let (pub2, priv2) = test_signing_key(1).unwrap();

        assert_eq!(pub1, pub2, "Public keys should be identical for same seed");
        assert_eq!(priv1, priv2, "Private keys should be identical for same seed");
    }

    #[test]
    fn test_different_seeds_produce_different_keys() {
        let (pub1, _) = test_signing_key(1).unwrap();
        let (pub2, _) = test_signing_key(2).unwrap();

        assert_ne!(pub1, pub2, "Different seeds should produce different keys");
    }

    #[test]
    fn unseal_secrets_are_distinct_and_meet_entropy_floor() {
        let secrets = test_unseal_secrets();
        assert_eq!(secrets.len(), 3);
        for s in &secrets {
            assert_eq!(s.len(), 32);
        }
        assert_ne!(secrets[0], secrets[1]);
    }
}
