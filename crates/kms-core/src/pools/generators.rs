//! Generator closures for each pool type (policy table).
//!
//! RNG and keygen failures are rare — a broken host CSPRNG or an
//! out-of-entropy condition — but still propagate as `Err` rather than
//! panicking, so a single bad draw degrades the owning `Pool` instead of
//! taking down the process.

use crate::errors::KmsError;
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;

/// One freshly generated value, still wrapped in the algorithm's native
/// encoding (PKCS8 DER for asymmetric keys, raw bytes for symmetric keys and
/// nonces). The barrier/elastic layers are responsible for wrapping this in
/// a JWE before it is persisted.
///
/// `Bytes` and `SecretBytes` are both raw byte buffers but carry different
/// sensitivity: `Bytes` is for non-secret pool material (nonces, and other
/// values whose whole purpose is to be handed back unwrapped) while
/// `SecretBytes` is symmetric key material and must go through the Barrier
/// like `Pkcs8` before it is persisted.
pub enum Generated {
    Uuid(uuid::Uuid),
    Pkcs8(Vec<u8>),
    Bytes(Vec<u8>),
    SecretBytes(Vec<u8>),
}

/// UUIDv7 generator — cheap, W=1 B=64 per policy.
pub fn uuidv7() -> Result<Generated, KmsError> {
    Ok(Generated::Uuid(uuid::Uuid::now_v7()))
}

/// RSA keypair generator for the given modulus bit length, PKCS8-DER encoded.
pub fn rsa_keypair(bits: usize) -> impl Fn() -> Result<Generated, KmsError> {
    move || {
        let mut rng = rand::thread_rng();
        let key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| KmsError::Transient(format!("rsa keygen failed: {e}")))?;
        let der = key
            .to_pkcs8_der()
            .map_err(|e| KmsError::Transient(format!("rsa pkcs8 encoding failed: {e}")))?;
        Ok(Generated::Pkcs8(der.as_bytes().to_vec()))
    }
}

/// EC (P-256/P-384/P-521) keypair generator via `ring`, PKCS8-DER encoded.
pub fn ec_keypair(curve: &'static ring::signature::EcdsaSigningAlgorithm) -> impl Fn() -> Result<Generated, KmsError> {
    move || {
        let rng = ring::rand::SystemRandom::new();
        let doc = ring::signature::EcdsaKeyPair::generate_pkcs8(curve, &rng)
            .map_err(|e| KmsError::Transient(format!("ec keygen failed: {e}")))?;
        Ok(Generated::Pkcs8(doc.as_ref().to_vec()))
    }
}

/// P-521 keypair generator via `josekit` — `ring`'s ECDSA keygen only
/// covers P-256/P-384, so the one curve it lacks is generated through the
/// same JOSE library that already handles P-521 signing/encryption
/// (`crate::services::crypto_service`).
pub fn ec_p521_keypair() -> Result<Generated, KmsError> {
    let keypair = josekit::jwk::alg::ec::EcKeyPair::generate(josekit::jwk::alg::ec::EcCurve::P521)
        .map_err(|e| KmsError::Transient(format!("p-521 keygen failed: {e}")))?;
    Ok(Generated::Pkcs8(keypair.to_der_private_key()))
}

/// Ed25519 keypair generator via `ring`, PKCS8-DER encoded.
pub fn ed25519_keypair() -> Result<Generated, KmsError> {
    let rng = ring::rand::SystemRandom::new();
    let doc = ring::signature::Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| KmsError::Transient(format!("ed25519 keygen failed: {e}")))?;
    Ok(Generated::Pkcs8(doc.as_ref().to_vec()))
}

/// Symmetric key-material generator (AES/Oct, any bit length) — raw random
/// bytes, secret.
pub fn symmetric_bytes(len: usize) -> impl Fn() -> Result<Generated, KmsError> {
    move || {
        use ring::rand::SecureRandom;
        let rng = ring::rand::SystemRandom::new();
        let mut buf = vec![0u8; len];
        rng.fill(&mut buf)
            .map_err(|e| KmsError::Transient(format!("system RNG failed: {e}")))?;
        Ok(Generated::SecretBytes(buf))
    }
}

/// Nonce generator for the given size (one of 12, 16, 24, 32 bytes).
/// Nonces are not secret — only required to be unique per encryption — so
/// unlike `symmetric_bytes` they are not routed through the Barrier.
pub fn nonce(size: usize) -> impl Fn() -> Result<Generated, KmsError> {
    move || {
        use ring::rand::SecureRandom;
        let rng = ring::rand::SystemRandom::new();
        let mut buf = vec![0u8; size];
        rng.fill(&mut buf)
            .map_err(|e| KmsError::Transient(format!("system RNG failed: {e}")))?;
        Ok(Generated::Bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuidv7_produces_version_7() {
        let Generated::Uuid(id) = uuidv7().expect("uuidv7 generation") else {
            panic!("expected uuid variant");
        };
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn symmetric_bytes_has_requested_length() {
        let gen = symmetric_bytes(32);
        let Generated::SecretBytes(bytes) = gen().expect("symmetric bytes generation") else {
            panic!("expected secret bytes variant");
        };
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn nonce_has_requested_length() {
        let gen = nonce(12);
        let Generated::Bytes(bytes) = gen().expect("nonce generation") else {
            panic!("expected bytes variant");
        };
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn ed25519_keypair_produces_pkcs8_document() {
        let Generated::Pkcs8(der) = ed25519_keypair().expect("ed25519 keypair generation") else {
            panic!("expected pkcs8 variant");
        };
        assert!(!der.is_empty());
    }
}
