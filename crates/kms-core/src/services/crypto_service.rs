//! Cryptographic operations over pool-owned Keys: `Encrypt`, `Decrypt`,
//! `Sign`, `Verify`, `GenerateDataKey`.
//!
//! JOSE is treated as a black box here, same as the Barrier's `envelope`
//! module: algorithm selection is a pure function of `(Algorithm, KeyUse)`,
//! and the actual signing/encryption is delegated to `josekit`. The
//! algorithm-confusion defense in `verify` (spec scenario S5) falls out of
//! `josekit::jws::deserialize_compact` itself: a verifier built for one
//! algorithm refuses to process a JWS whose header names a different one.

use crate::barrier::Barrier;
use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::{Algorithm, Key, KeyPool, KeyUse};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use josekit::jwe::{JweDecrypter, JweEncrypter, JweHeader};
use josekit::jwk::alg::ec::{EcCurve, EcKeyPair};
use josekit::jwk::alg::ed::EdKeyPair;
use josekit::jwk::alg::rsa::RsaKeyPair;
use josekit::jwk::Jwk;
use josekit::jws::{JwsHeader, JwsSigner, JwsVerifier};

/// Derives the unencrypted public JWK for an asymmetric algorithm's freshly
/// generated PKCS8 document. Symmetric algorithms have no public half.
pub fn public_jwk_from_pkcs8(algorithm: Algorithm, der: &[u8]) -> Result<String, KmsError> {
    let jwk = match algorithm {
        Algorithm::Rsa2048 | Algorithm::Rsa3072 | Algorithm::Rsa4096 => {
            RsaKeyPair::from_der(der, None)
                .map_err(|_| KmsError::Internal)?
                .to_jwk_public_key()
        }
        Algorithm::EcP256 => ec_key_pair(der, EcCurve::P256)?.to_jwk_public_key(),
        Algorithm::EcP384 => ec_key_pair(der, EcCurve::P384)?.to_jwk_public_key(),
        Algorithm::EcP521 => ec_key_pair(der, EcCurve::P521)?.to_jwk_public_key(),
        Algorithm::Ed25519 => EdKeyPair::from_der(der, None)
            .map_err(|_| KmsError::Internal)?
            .to_jwk_public_key(),
        _ => return Err(KmsError::Internal),
    };
    Ok(jwk.to_string())
}

fn ec_key_pair(der: &[u8], curve: EcCurve) -> Result<EcKeyPair, KmsError> {
    EcKeyPair::from_der(der, Some(curve)).map_err(|_| KmsError::Internal)
}

/// Content-encryption identifier used for the JWE wrapping a payload under a
/// pool's Key. AEAD content encryption defaults to A256GCM.
fn content_encryption(algorithm: Algorithm) -> &'static str {
    match algorithm.symmetric_key_len() {
        16 => "A128GCM",
        24 => "A192GCM",
        _ => "A256GCM",
    }
}

fn jwk_from_public_material(public_material: Option<&str>) -> Result<Jwk, KmsError> {
    let public_material = public_material.ok_or(KmsError::Internal)?;
    Jwk::from_bytes(public_material.as_bytes()).map_err(|_| KmsError::Internal)
}

/// Resolves the JWE encrypter for `Encrypt`/`GenerateDataKey`: asymmetric
/// pools encrypt under the public key; symmetric pools encrypt directly
/// under the shared secret (`dir`).
fn resolve_encrypter(
    algorithm: Algorithm,
    public_material: Option<&str>,
    symmetric_material: Option<&[u8]>,
) -> Result<Box<dyn JweEncrypter>, KmsError> {
    use josekit::jwe::{DIRECT, ECDH_ES, RSA_OAEP_256};

    match algorithm {
        Algorithm::Rsa2048 | Algorithm::Rsa3072 | Algorithm::Rsa4096 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                RSA_OAEP_256.encrypter_from_jwk(&jwk).map_err(|_| KmsError::Internal)?,
            ))
        }
        Algorithm::EcP256 | Algorithm::EcP384 | Algorithm::EcP521 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                ECDH_ES.encrypter_from_jwk(&jwk).map_err(|_| KmsError::Internal)?,
            ))
        }
        Algorithm::Oct128
        | Algorithm::Oct192
        | Algorithm::Oct256
        | Algorithm::Oct384
        | Algorithm::Oct512
        | Algorithm::Aes128Gcm
        | Algorithm::Aes192Gcm
        | Algorithm::Aes256Gcm => {
            let material = symmetric_material.ok_or(KmsError::Internal)?;
            Ok(Box::new(
                DIRECT.encrypter_from_bytes(material).map_err(|_| KmsError::Internal)?,
            ))
        }
        Algorithm::Aes128Cbc | Algorithm::Aes192Cbc | Algorithm::Aes256Cbc => Err(
            KmsError::InvalidInput("non-AEAD algorithms are not permitted for Encrypt".to_string()),
        ),
        Algorithm::Ed25519 => Err(KmsError::InvalidInput(
            "Ed25519 pools do not support Encrypt".to_string(),
        )),
    }
}

fn resolve_decrypter(
    algorithm: Algorithm,
    private_der: Option<&[u8]>,
    symmetric_material: Option<&[u8]>,
) -> Result<Box<dyn JweDecrypter>, KmsError> {
    use josekit::jwe::{DIRECT, ECDH_ES, RSA_OAEP_256};

    match algorithm {
        Algorithm::Rsa2048 | Algorithm::Rsa3072 | Algorithm::Rsa4096 => {
            let der = private_der.ok_or(KmsError::Integrity)?;
            Ok(Box::new(
                RSA_OAEP_256.decrypter_from_der(der).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::EcP256 | Algorithm::EcP384 | Algorithm::EcP521 => {
            let der = private_der.ok_or(KmsError::Integrity)?;
            Ok(Box::new(
                ECDH_ES.decrypter_from_der(der).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::Oct128
        | Algorithm::Oct192
        | Algorithm::Oct256
        | Algorithm::Oct384
        | Algorithm::Oct512
        | Algorithm::Aes128Gcm
        | Algorithm::Aes192Gcm
        | Algorithm::Aes256Gcm => {
            let material = symmetric_material.ok_or(KmsError::Integrity)?;
            Ok(Box::new(
                DIRECT.decrypter_from_bytes(material).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::Aes128Cbc | Algorithm::Aes192Cbc | Algorithm::Aes256Cbc | Algorithm::Ed25519 => {
            Err(KmsError::Integrity)
        }
    }
}

fn resolve_signer(algorithm: Algorithm, material: &[u8]) -> Result<Box<dyn JwsSigner>, KmsError> {
    use josekit::jws::{EdDSA, ES256, ES384, ES512, HS256, RS256};

    match algorithm {
        Algorithm::Rsa2048 | Algorithm::Rsa3072 | Algorithm::Rsa4096 => Ok(Box::new(
            RS256.signer_from_der(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::EcP256 => Ok(Box::new(
            ES256.signer_from_der(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::EcP384 => Ok(Box::new(
            ES384.signer_from_der(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::EcP521 => Ok(Box::new(
            ES512.signer_from_der(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::Ed25519 => Ok(Box::new(
            EdDSA.signer_from_der(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::Oct128
        | Algorithm::Oct192
        | Algorithm::Oct256
        | Algorithm::Oct384
        | Algorithm::Oct512 => Ok(Box::new(
            HS256.signer_from_bytes(material).map_err(|_| KmsError::Integrity)?,
        )),
        Algorithm::Aes128Gcm
        | Algorithm::Aes192Gcm
        | Algorithm::Aes256Gcm
        | Algorithm::Aes128Cbc
        | Algorithm::Aes192Cbc
        | Algorithm::Aes256Cbc => Err(KmsError::InvalidInput(
            "AES pools do not support Sign".to_string(),
        )),
    }
}

fn resolve_verifier(
    algorithm: Algorithm,
    public_material: Option<&str>,
    symmetric_material: Option<&[u8]>,
) -> Result<Box<dyn JwsVerifier>, KmsError> {
    use josekit::jws::{EdDSA, ES256, ES384, ES512, HS256, RS256};

    match algorithm {
        Algorithm::Rsa2048 | Algorithm::Rsa3072 | Algorithm::Rsa4096 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                RS256.verifier_from_jwk(&jwk).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::EcP256 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                ES256.verifier_from_jwk(&jwk).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::EcP384 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                ES384.verifier_from_jwk(&jwk).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::EcP521 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                ES512.verifier_from_jwk(&jwk).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::Ed25519 => {
            let jwk = jwk_from_public_material(public_material)?;
            Ok(Box::new(
                EdDSA.verifier_from_jwk(&jwk).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::Oct128
        | Algorithm::Oct192
        | Algorithm::Oct256
        | Algorithm::Oct384
        | Algorithm::Oct512 => {
            let material = symmetric_material.ok_or(KmsError::Integrity)?;
            Ok(Box::new(
                HS256.verifier_from_bytes(material).map_err(|_| KmsError::Integrity)?,
            ))
        }
        Algorithm::Aes128Gcm
        | Algorithm::Aes192Gcm
        | Algorithm::Aes256Gcm
        | Algorithm::Aes128Cbc
        | Algorithm::Aes192Cbc
        | Algorithm::Aes256Cbc => Err(KmsError::Integrity),
    }
}

/// Rejects the operation outright when `pool.KeyUse` doesn't include the
/// capability the caller asked for ("Algorithm policy").
fn require_key_use(pool: &KeyPool, required: KeyUse) -> Result<(), KmsError> {
    let actual = pool.key_use().ok_or(KmsError::Internal)?;
    if actual != required && !(required == KeyUse::Enc && actual == KeyUse::Wrap) {
        return Err(KmsError::InvalidInput(format!(
            "pool key_use {} does not permit this operation",
            actual.as_str()
        )));
    }
    Ok(())
}

/// `Encrypt(pool, plaintext, aad?) -> jwe_compact`.
pub async fn encrypt(
    tx: &mut Tx<'_>,
    barrier: &Barrier,
    pool: &KeyPool,
    key: &Key,
    plaintext_b64: &str,
) -> Result<String, KmsError> {
    require_key_use(pool, KeyUse::Enc)?;
    let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;
    let plaintext = BASE64
        .decode(plaintext_b64)
        .map_err(|_| KmsError::InvalidInput("plaintext must be base64".to_string()))?;

    let raw = barrier.decrypt_key_material(tx, &key.material).await?;
    let encrypter = if algorithm.is_asymmetric() {
        resolve_encrypter(algorithm, key.public_material.as_deref(), None)?
    } else {
        resolve_encrypter(algorithm, None, Some(&raw))?
    };

    let mut header = JweHeader::new();
    header.set_content_encryption(content_encryption(algorithm));
    header.set_key_id(key.key_id.to_string());
    josekit::jwe::serialize_compact(&plaintext, &header, encrypter.as_ref()).map_err(|_| KmsError::Internal)
}

/// `Decrypt(jwe) -> plaintext`, resolving the Key by the JWE header's `kid`
///. Caller is responsible for the pool/tenant ownership check
/// once the Key has been looked up by `kid`.
pub async fn decrypt(
    tx: &mut Tx<'_>,
    barrier: &Barrier,
    pool: &KeyPool,
    key: &Key,
    jwe_compact: &str,
) -> Result<String, KmsError> {
    require_key_use(pool, KeyUse::Enc)?;
    let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;
    let raw = barrier.decrypt_key_material(tx, &key.material).await?;

    let decrypter = if algorithm.is_asymmetric() {
        resolve_decrypter(algorithm, Some(&raw), None)?
    } else {
        resolve_decrypter(algorithm, None, Some(&raw))?
    };

    let (payload, _header) =
        josekit::jwe::deserialize_compact(jwe_compact, decrypter.as_ref()).map_err(|_| KmsError::Integrity)?;
    Ok(BASE64.encode(payload))
}

/// `Sign(pool, payload) -> jws_compact`.
pub async fn sign(
    tx: &mut Tx<'_>,
    barrier: &Barrier,
    pool: &KeyPool,
    key: &Key,
    payload_b64: &str,
) -> Result<String, KmsError> {
    require_key_use(pool, KeyUse::Sig)?;
    let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;
    let payload = BASE64
        .decode(payload_b64)
        .map_err(|_| KmsError::InvalidInput("payload must be base64".to_string()))?;

    let raw = barrier.decrypt_key_material(tx, &key.material).await?;
    let signer = resolve_signer(algorithm, &raw)?;

    let mut header = JwsHeader::new();
    header.set_key_id(key.key_id.to_string());
    josekit::jws::serialize_compact(&payload, &header, signer.as_ref()).map_err(|_| KmsError::Internal)
}

/// `Verify(jws) -> payload`, algorithm cross-checked against the pool's
/// Algorithm (scenario S5).
pub async fn verify(
    tx: &mut Tx<'_>,
    barrier: &Barrier,
    pool: &KeyPool,
    key: &Key,
    jws_compact: &str,
) -> Result<String, KmsError> {
    require_key_use(pool, KeyUse::Sig)?;
    let algorithm = pool.algorithm().ok_or(KmsError::Internal)?;

    let verifier = if algorithm.is_asymmetric() {
        resolve_verifier(algorithm, key.public_material.as_deref(), None)?
    } else {
        let raw = barrier.decrypt_key_material(tx, &key.material).await?;
        resolve_verifier(algorithm, None, Some(&raw))?
    };

    let (payload, _header) =
        josekit::jws::deserialize_compact(jws_compact, verifier.as_ref()).map_err(|_| KmsError::Integrity)?;
    Ok(BASE64.encode(payload))
}

/// `GenerateDataKey(pool, requestedAlg) -> {plaintext, wrapped}` — a fresh
/// random plaintext data key plus its ciphertext wrapped under the pool's
/// active Key, for client-side envelope encryption.
pub async fn generate_data_key(
    tx: &mut Tx<'_>,
    barrier: &Barrier,
    pool: &KeyPool,
    key: &Key,
    plaintext_len: usize,
) -> Result<(String, String), KmsError> {
    require_key_use(pool, KeyUse::Enc)?;
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut data_key = vec![0u8; plaintext_len];
    rng.fill(&mut data_key).map_err(|_| KmsError::Internal)?;

    let plaintext_b64 = BASE64.encode(&data_key);
    let wrapped = encrypt(tx, barrier, pool, key, &plaintext_b64).await?;
    Ok((plaintext_b64, wrapped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_encryption_matches_key_length() {
        assert_eq!(content_encryption(Algorithm::Aes128Gcm), "A128GCM");
        assert_eq!(content_encryption(Algorithm::Aes192Gcm), "A192GCM");
        assert_eq!(content_encryption(Algorithm::Aes256Gcm), "A256GCM");
        assert_eq!(content_encryption(Algorithm::Rsa2048), "A256GCM");
    }

    #[test]
    fn cbc_pools_are_rejected_for_encrypt() {
        let result = resolve_encrypter(Algorithm::Aes256Cbc, None, Some(&[0u8; 32]));
        assert!(matches!(result, Err(KmsError::InvalidInput(_))));
    }

    #[test]
    fn ed25519_pools_are_rejected_for_encrypt() {
        let result = resolve_encrypter(Algorithm::Ed25519, Some("{}"), None);
        assert!(matches!(result, Err(KmsError::InvalidInput(_))));
    }

    #[test]
    fn aes_pools_are_rejected_for_sign() {
        let result = resolve_signer(Algorithm::Aes256Gcm, &[0u8; 32]);
        assert!(matches!(result, Err(KmsError::InvalidInput(_))));
    }
}
