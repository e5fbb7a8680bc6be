//! Business-logic layer over the Persistence, Pools, Barrier, and
//! Elastic-Key-Service layers (§9).

pub mod crypto_service;
pub mod orchestrator;
pub mod pool_service;

pub use orchestrator::{Operation, OperationResult, Orchestrator};
