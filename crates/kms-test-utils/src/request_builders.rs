//! Test data builders for KMS HTTP request bodies.
//!
//! A fluent builder targeting `POST /pools`'s JSON body.

use serde_json::{json, Value};
use uuid::Uuid;

/// Builder for a `POST /pools` request body.
///
/// # Example
/// ```rust,ignore
/// let body = TestPoolRequestBuilder::new(tenant_id, "signing-pool")
///     .algorithm("ed25519")
///     .key_use("sig")
///     .build();
/// ```
pub struct TestPoolRequestBuilder {
    tenant_id: Uuid,
    name: String,
    description: Option<String>,
    algorithm: String,
    key_use: String,
    key_ops: String,
    import_allowed: bool,
    versioning_allowed: bool,
    export_allowed: bool,
}

impl TestPoolRequestBuilder {
    pub fn new(tenant_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            name: name.into(),
            description: None,
            algorithm: "ed25519".to_string(),
            key_use: "sig".to_string(),
            key_ops: String::new(),
            import_allowed: false,
            versioning_allowed: false,
            export_allowed: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Algorithm in the wire form `Algorithm`'s derived kebab-case
    /// `Serialize` impl produces: digits don't get their own word boundary,
    /// so this is `"rsa2048"`, `"ec-p256"`, `"aes256-gcm"` (not
    /// `"rsa-2048"`/`"aes-256-gcm"` — `Algorithm::as_str()` uses that form
    /// for the DB column, but this field goes through `serde` directly).
    pub fn algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn key_use(mut self, key_use: impl Into<String>) -> Self {
        self.key_use = key_use.into();
        self
    }

    pub fn key_ops(mut self, key_ops: impl Into<String>) -> Self {
        self.key_ops = key_ops.into();
        self
    }

    pub fn import_allowed(mut self, allowed: bool) -> Self {
        self.import_allowed = allowed;
        self
    }

    pub fn versioning_allowed(mut self, allowed: bool) -> Self {
        self.versioning_allowed = allowed;
        self
    }

    pub fn export_allowed(mut self, allowed: bool) -> Self {
        self.export_allowed = allowed;
        self
    }

    pub fn build(self) -> Value {
        json!({
            "tenant_id": self.tenant_id,
            "name": self.name,
            "description": self.description,
            "algorithm": self.algorithm,
            "key_use": self.key_use,
            "key_ops": self.key_ops,
            "import_allowed": self.import_allowed,
            "versioning_allowed": self.versioning_allowed,
            "export_allowed": self.export_allowed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_ed25519_signing_pool() {
        let body = TestPoolRequestBuilder::new(Uuid::nil(), "pool").build();
        assert_eq!(body["algorithm"], "ed25519");
        assert_eq!(body["key_use"], "sig");
        assert_eq!(body["import_allowed"], false);
    }

    #[test]
    fn builder_overrides_apply() {
        let body = TestPoolRequestBuilder::new(Uuid::nil(), "pool")
            .algorithm("rsa2048")
            .key_use("enc")
            .import_allowed(true)
            .build();
        assert_eq!(body["algorithm"], "rsa2048");
        assert_eq!(body["key_use"], "enc");
        assert_eq!(body["import_allowed"], true);
    }
}
