//! Service configuration.
//!
//! Loaded once at startup from environment variables. The `from_env` /
//! `from_vars` split lets tests construct a `Config` without touching
//! process-global environment state.

use common::secret::{ExposeSecret, SecretBox};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Default PBKDF2 iteration count for unseal-key derivation.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Floor below which PBKDF2 iteration counts are rejected as insecure.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Default request deadline propagated from the HTTP handler.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Backend a `database.url` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

impl DbKind {
    fn from_url(url: &str) -> Result<Self, ConfigError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DbKind::Postgres)
        } else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
            Ok(DbKind::Sqlite)
        } else {
            Err(ConfigError::InvalidDatabaseUrl(format!(
                "unrecognized scheme in '{url}' (expected postgres:// or sqlite:)"
            )))
        }
    }
}

/// Per-pool worker/buffer sizing (policy table).
#[derive(Debug, Clone, Copy)]
pub struct PoolSizing {
    pub workers: usize,
    pub buffer: usize,
}

/// Per-pool backfill thresholds for the durable elastic-key service.
#[derive(Debug, Clone, Copy)]
pub struct ElasticThresholds {
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub max_buffer: usize,
}

/// TLS material paths; presence is mandatory once configured.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_ca: Option<PathBuf>,
}

/// Application configuration with secure handling of sensitive fields.
///
/// `database_url` and any unseal secrets are never exposed through `Debug`.
pub struct Config {
    pub database_url: String,
    pub database_kind: DbKind,
    pub max_open_conns: u32,
    pub bind_address: String,
    /// Raw operator secrets read from `barrier.unseal_files`. Wrapped so
    /// accidental logging/Debug can't leak them; zeroized on drop.
    pub unseal_secrets: Vec<SecretBox<Vec<u8>>>,
    pub pbkdf2_iterations: u32,
    pub pool_sizing: HashMap<String, PoolSizing>,
    pub elastic_thresholds: HashMap<String, ElasticThresholds>,
    pub tls: Option<TlsConfig>,
    pub request_timeout_seconds: u64,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            database_url: self.database_url.clone(),
            database_kind: self.database_kind,
            max_open_conns: self.max_open_conns,
            bind_address: self.bind_address.clone(),
            unseal_secrets: self
                .unseal_secrets
                .iter()
                .map(|s| SecretBox::new(Box::new(s.expose_secret().clone())))
                .collect(),
            pbkdf2_iterations: self.pbkdf2_iterations,
            pool_sizing: self.pool_sizing.clone(),
            elastic_thresholds: self.elastic_thresholds.clone(),
            tls: self.tls.clone(),
            request_timeout_seconds: self.request_timeout_seconds,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("database_kind", &self.database_kind)
            .field("max_open_conns", &self.max_open_conns)
            .field("bind_address", &self.bind_address)
            .field("unseal_secrets", &format!("[{} REDACTED]", self.unseal_secrets.len()))
            .field("pbkdf2_iterations", &self.pbkdf2_iterations)
            .field("tls", &self.tls.is_some())
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl fmt::Debug for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbKind::Sqlite => write!(f, "Sqlite"),
            DbKind::Postgres => write!(f, "Postgres"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid database URL: {0}")]
    InvalidDatabaseUrl(String),

    #[error("invalid unseal configuration: {0}")]
    InvalidUnsealConfig(String),

    #[error("failed to read unseal file {path}: {source}")]
    UnsealFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PBKDF2 iteration count: {0}")]
    InvalidPbkdf2Iterations(String),

    #[error("invalid pool sizing for '{0}': {1}")]
    InvalidPoolSizing(String, String),
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map (used by tests, and
    /// by `from_env`).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("KMS_DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("KMS_DATABASE_URL".to_string()))?
            .clone();
        let database_kind = DbKind::from_url(&database_url)?;

        let max_open_conns = vars
            .get("KMS_DATABASE_MAX_OPEN_CONNS")
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| ConfigError::InvalidDatabaseUrl(format!("max_open_conns: {e}")))?
            .unwrap_or(25);

        let bind_address = vars
            .get("KMS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8443".to_string());

        let unseal_file_paths = vars
            .get("KMS_UNSEAL_FILES")
            .ok_or_else(|| ConfigError::MissingEnvVar("KMS_UNSEAL_FILES".to_string()))?;
        let unseal_secrets = Self::load_unseal_secrets(unseal_file_paths)?;

        let pbkdf2_iterations = match vars.get("KMS_PBKDF2_ITERATIONS") {
            Some(value_str) => {
                let value: u32 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidPbkdf2Iterations(format!(
                        "must be a valid integer, got '{value_str}': {e}"
                    ))
                })?;
                if value < MIN_PBKDF2_ITERATIONS {
                    return Err(ConfigError::InvalidPbkdf2Iterations(format!(
                        "must be at least {MIN_PBKDF2_ITERATIONS}, got {value}"
                    )));
                }
                if value < DEFAULT_PBKDF2_ITERATIONS {
                    warn!(
                        pbkdf2_iterations = value,
                        default = DEFAULT_PBKDF2_ITERATIONS,
                        "KMS_PBKDF2_ITERATIONS below recommended default"
                    );
                }
                value
            }
            None => DEFAULT_PBKDF2_ITERATIONS,
        };

        let pool_sizing = Self::default_pool_sizing();
        let elastic_thresholds = Self::default_elastic_thresholds();

        let tls = Self::load_tls(vars)?;

        let request_timeout_seconds = vars
            .get("KMS_REQUEST_TIMEOUT_SECONDS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidDatabaseUrl(format!("request_timeout: {e}")))?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS);

        Ok(Config {
            database_url,
            database_kind,
            max_open_conns,
            bind_address,
            unseal_secrets,
            pbkdf2_iterations,
            pool_sizing,
            elastic_thresholds,
            tls,
            request_timeout_seconds,
        })
    }

    /// Reads every path in `KMS_UNSEAL_FILES` (colon-separated). Each file's
    /// entire contents (trimmed of a single trailing newline) is one
    /// operator secret; at least one is required, three or more recommended.
    fn load_unseal_secrets(paths: &str) -> Result<Vec<SecretBox<Vec<u8>>>, ConfigError> {
        let mut secrets = Vec::new();
        for path in paths.split(':').filter(|p| !p.is_empty()) {
            let mut bytes = std::fs::read(path).map_err(|source| ConfigError::UnsealFileRead {
                path: path.to_string(),
                source,
            })?;
            if bytes.last() == Some(&b'\n') {
                bytes.pop();
            }
            if bytes.len() * 8 < 256 {
                return Err(ConfigError::InvalidUnsealConfig(format!(
                    "unseal secret at {path} is below the 256-bit entropy floor"
                )));
            }
            secrets.push(SecretBox::new(Box::new(bytes)));
        }
        if secrets.is_empty() {
            return Err(ConfigError::InvalidUnsealConfig(
                "KMS_UNSEAL_FILES must name at least one file".to_string(),
            ));
        }
        if secrets.len() < 3 {
            warn!(
                count = secrets.len(),
                "fewer than the recommended 3 unseal secrets configured"
            );
        }
        Ok(secrets)
    }

    fn load_tls(vars: &HashMap<String, String>) -> Result<Option<TlsConfig>, ConfigError> {
        let cert = vars.get("KMS_TLS_SERVER_CERT");
        let key = vars.get("KMS_TLS_SERVER_KEY");
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(TlsConfig {
                server_cert: PathBuf::from(cert),
                server_key: PathBuf::from(key),
                client_ca: vars.get("KMS_TLS_CLIENT_CA").map(PathBuf::from),
            })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidUnsealConfig(
                "KMS_TLS_SERVER_CERT and KMS_TLS_SERVER_KEY must both be set, or neither"
                    .to_string(),
            )),
        }
    }

    /// Default sizing policy: cheap generators get small pools, RSA gets a
    /// deeper buffer to hide its latency.
    fn default_pool_sizing() -> HashMap<String, PoolSizing> {
        HashMap::from([
            ("uuidv7".to_string(), PoolSizing { workers: 1, buffer: 64 }),
            ("aes-256".to_string(), PoolSizing { workers: 2, buffer: 32 }),
            ("rsa-2048".to_string(), PoolSizing { workers: 4, buffer: 8 }),
            ("rsa-3072".to_string(), PoolSizing { workers: 4, buffer: 8 }),
            ("rsa-4096".to_string(), PoolSizing { workers: 2, buffer: 4 }),
            ("p-256".to_string(), PoolSizing { workers: 2, buffer: 16 }),
            ("p-384".to_string(), PoolSizing { workers: 2, buffer: 16 }),
            ("p-521".to_string(), PoolSizing { workers: 2, buffer: 16 }),
            ("ed25519".to_string(), PoolSizing { workers: 1, buffer: 32 }),
            ("nonce-12".to_string(), PoolSizing { workers: 1, buffer: 64 }),
            ("nonce-16".to_string(), PoolSizing { workers: 1, buffer: 64 }),
            ("nonce-24".to_string(), PoolSizing { workers: 1, buffer: 64 }),
            ("nonce-32".to_string(), PoolSizing { workers: 1, buffer: 64 }),
        ])
    }

    fn default_elastic_thresholds() -> HashMap<String, ElasticThresholds> {
        HashMap::from([
            (
                "rsa-2048".to_string(),
                ElasticThresholds { low_watermark: 2, high_watermark: 8, max_buffer: 4 },
            ),
            (
                "ed25519".to_string(),
                ElasticThresholds { low_watermark: 4, high_watermark: 16, max_buffer: 8 },
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_secret(dir: &tempfile_path::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    mod tempfile_path {
        // Minimal stand-in so the test module doesn't need a `tempfile` dev-dependency
        // for this single helper; kms-test-utils provides the richer fixtures used
        // elsewhere.
        pub struct TempDir(std::path::PathBuf);
        impl TempDir {
            pub fn new() -> std::io::Result<Self> {
                let dir = std::env::temp_dir().join(format!(
                    "kms-core-config-test-{}",
                    uuid::Uuid::new_v4()
                ));
                std::fs::create_dir_all(&dir)?;
                Ok(Self(dir))
            }
            pub fn path(&self) -> &std::path::Path {
                &self.0
            }
        }
        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.0);
            }
        }
    }

    #[test]
    fn from_vars_requires_database_url() {
        let vars = HashMap::new();
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref v) if v == "KMS_DATABASE_URL"));
    }

    #[test]
    fn from_vars_loads_sqlite_and_unseal_secrets() {
        let dir = tempfile_path::TempDir::new().unwrap();
        let p1 = write_secret(&dir, "u1", "alpha-secret-32bytes-of-entropy!");
        let p2 = write_secret(&dir, "u2", "beta-secret-also-32b-of-entropy!!");

        let vars = HashMap::from([
            ("KMS_DATABASE_URL".to_string(), "sqlite://kms.db".to_string()),
            ("KMS_UNSEAL_FILES".to_string(), format!("{p1}:{p2}")),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.database_kind, DbKind::Sqlite);
        assert_eq!(config.unseal_secrets.len(), 2);
        assert_eq!(config.pbkdf2_iterations, DEFAULT_PBKDF2_ITERATIONS);
    }

    #[test]
    fn rejects_low_entropy_unseal_secret() {
        let dir = tempfile_path::TempDir::new().unwrap();
        let p1 = write_secret(&dir, "u1", "short");

        let vars = HashMap::from([
            ("KMS_DATABASE_URL".to_string(), "sqlite://kms.db".to_string()),
            ("KMS_UNSEAL_FILES".to_string(), p1),
        ]);

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUnsealConfig(_)));
    }

    #[test]
    fn rejects_pbkdf2_below_floor() {
        let dir = tempfile_path::TempDir::new().unwrap();
        let p1 = write_secret(&dir, "u1", "alpha-secret-32bytes-of-entropy!");

        let vars = HashMap::from([
            ("KMS_DATABASE_URL".to_string(), "sqlite://kms.db".to_string()),
            ("KMS_UNSEAL_FILES".to_string(), p1),
            ("KMS_PBKDF2_ITERATIONS".to_string(), "1000".to_string()),
        ]);

        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPbkdf2Iterations(_)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let dir = tempfile_path::TempDir::new().unwrap();
        let p1 = write_secret(&dir, "u1", "alpha-secret-32bytes-of-entropy!");

        let vars = HashMap::from([
            ("KMS_DATABASE_URL".to_string(), "sqlite://kms.db".to_string()),
            ("KMS_UNSEAL_FILES".to_string(), p1),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("alpha-secret"));
    }
}
