//! Core cryptographic service plane library.
//!
//! # Modules
//!
//! - `barrier` - Three-tier envelope encryption (Unseal/Root/Intermediate/Content)
//! - `config` - Service configuration
//! - `db` - Unified SQLite/PostgreSQL persistence layer
//! - `elastic` - Durable, multi-pool key-material state machine
//! - `errors` - Error taxonomy
//! - `models` - Data models
//! - `observability` - Structured logging and metrics
//! - `pools` - Generic in-memory pre-generation worker pools
//! - `repositories` - Database access layer
//! - `routes` - Axum HTTP frontend over the orchestrator
//! - `services` - Business logic layer (orchestrator, pool/crypto services)

pub mod barrier;
pub mod config;
pub mod db;
pub mod elastic;
pub mod errors;
pub mod models;
pub mod observability;
pub mod pools;
pub mod repositories;
pub mod routes;
pub mod services;
