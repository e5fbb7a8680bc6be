//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for JWE/JWS compact-serialization
//! responses, mirroring the shape `barrier::envelope` itself produces and
//! consumes (5 dot-separated segments for a JWE, 3 for a JWS) without
//! depending on the route-layer response DTOs.

/// Assertions for a compact JOSE value (a `{jwe}`/`{jws}` string pulled out
/// of a route response body).
///
/// # Example
/// ```rust,ignore
/// jwe.assert_is_jwe_compact().assert_has_kid("some-content-kid");
/// ```
pub trait CompactAssertions {
    /// Assert the value has the 5-segment shape of a JWE compact
    /// serialization.
    fn assert_is_jwe_compact(&self) -> &Self;

    /// Assert the value has the 3-segment shape of a JWS compact
    /// serialization.
    fn assert_is_jws_compact(&self) -> &Self;

    /// Assert the plaintext protected header carries the given `kid`.
    fn assert_has_kid(&self, kid: &str) -> &Self;
}

impl CompactAssertions for str {
    fn assert_is_jwe_compact(&self) -> &Self {
        let segments = self.split('.').count();
        assert_eq!(segments, 5, "expected a 5-segment JWE compact value, got {segments} segments");
        self
    }

    fn assert_is_jws_compact(&self) -> &Self {
        let segments = self.split('.').count();
        assert_eq!(segments, 3, "expected a 3-segment JWS compact value, got {segments} segments");
        self
    }

    fn assert_has_kid(&self, kid: &str) -> &Self {
        let actual = kms_core::barrier::envelope::peek_kid(self);
        assert_eq!(actual.as_deref(), Some(kid), "compact value's header kid did not match");
        self
    }
}

impl CompactAssertions for String {
    fn assert_is_jwe_compact(&self) -> &Self {
        self.as_str().assert_is_jwe_compact();
        self
    }

    fn assert_is_jws_compact(&self) -> &Self {
        self.as_str().assert_is_jws_compact();
        self
    }

    fn assert_has_kid(&self, kid: &str) -> &Self {
        self.as_str().assert_has_kid(kid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwe_compact_is_recognized_by_segment_count() {
        "a.b.c.d.e".assert_is_jwe_compact();
    }

    #[test]
    fn jws_compact_is_recognized_by_segment_count() {
        "a.b.c".assert_is_jws_compact();
    }

    #[test]
    #[should_panic(expected = "5-segment")]
    fn jws_value_fails_jwe_assertion() {
        "a.b.c".assert_is_jwe_compact();
    }
}
