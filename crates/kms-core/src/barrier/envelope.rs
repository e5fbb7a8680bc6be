//! JWE compact serialization for one tier's wrapped key material.
//!
//! Every tier uses the same construction: `A256GCMKW` key-wrap over a
//! 256-bit tier key, `A256GCM` content encryption of the wrapped material,
//! with the wrapping key's `kid` carried in the (plaintext) protected
//! header. JOSE/JWE itself is treated as a black box here; only the
//! `kid`-lookup convention is our own.

use crate::errors::KmsError;
use josekit::jwe::{JweHeader, A256GCMKW};

pub fn wrap(plain: &[u8], key: &[u8], kid: &str) -> Result<String, KmsError> {
    let mut header = JweHeader::new();
    header.set_content_encryption("A256GCM");
    header.set_key_id(kid);

    let encrypter = A256GCMKW
        .encrypter_from_bytes(key)
        .map_err(|_| KmsError::Internal)?;

    josekit::jwe::serialize_compact(plain, &header, &encrypter).map_err(|_| KmsError::Internal)
}

/// Opaque on failure by design: a wrong key and a corrupted ciphertext are
/// indistinguishable to the caller (scenario S5).
pub fn unwrap(compact: &str, key: &[u8]) -> Result<Vec<u8>, KmsError> {
    let decrypter = A256GCMKW
        .decrypter_from_bytes(key)
        .map_err(|_| KmsError::Integrity)?;

    let (payload, _header) =
        josekit::jwe::deserialize_compact(compact, &decrypter).map_err(|_| KmsError::Integrity)?;
    Ok(payload)
}

/// Reads the `kid` claim from a compact value's protected header without
/// needing the unwrapping/verification key — the header segment is
/// plaintext base64url-encoded JSON in both forms this is called against:
/// a 5-segment JWE (`Decrypt`) or a 3-segment JWS (`Verify`), the same
/// leading-segment convention a plain-JWT `kid` extractor would use.
pub fn peek_kid(compact: &str) -> Option<String> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    let parts: Vec<&str> = compact.split('.').collect();
    if parts.len() != 5 && parts.len() != 3 {
        return None;
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(parts.first()?).ok()?;
    let header: serde_json::Value = serde_json::from_slice(&header_bytes).ok()?;
    header.get("kid")?.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn wrap_then_unwrap_round_trips() {
        let key = test_key();
        let wrapped = wrap(b"content key bytes go here", &key, "tier-kid-1").expect("wrap");
        let unwrapped = unwrap(&wrapped, &key).expect("unwrap");
        assert_eq!(unwrapped, b"content key bytes go here");
    }

    #[test]
    fn peek_kid_reads_plaintext_header() {
        let key = test_key();
        let wrapped = wrap(b"payload", &key, "tier-kid-2").expect("wrap");
        assert_eq!(peek_kid(&wrapped), Some("tier-kid-2".to_string()));
    }

    #[test]
    fn peek_kid_rejects_malformed_compact_value() {
        assert_eq!(peek_kid("not-a-jwe"), None);
    }

    #[test]
    fn unwrap_fails_closed_on_tampered_ciphertext() {
        let key = test_key();
        let mut wrapped = wrap(b"payload", &key, "tier-kid-3").expect("wrap");
        wrapped.push('x');
        assert!(unwrap(&wrapped, &key).is_err());
    }
}
