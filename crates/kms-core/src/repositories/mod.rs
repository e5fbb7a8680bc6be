//! Typed repository methods per entity: `Add`, `Get`, `Update`,
//! `Delete`, `List(filter, paging, sort)`, all scoped to the active
//! transaction.

pub mod audit_events;
pub mod content_keys;
pub mod elastic_keys;
pub mod intermediate_keys;
pub mod key_pools;
pub mod keys;
pub mod root_keys;
