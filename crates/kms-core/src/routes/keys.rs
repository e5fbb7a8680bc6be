use super::AppState;
use crate::errors::KmsError;
use crate::services::{Operation, OperationResult};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListKeysQuery {
    pub pool: Uuid,
}

/// Mirrors `Key` but drops `material` — the barrier-wrapped ciphertext never
/// belongs in an HTTP response (`ListKeys`, scenario S2).
#[derive(Debug, Serialize)]
pub struct KeyListItem {
    pub key_id: Uuid,
    pub pool_id: Uuid,
    pub version: i64,
    pub public_material: Option<String>,
    pub status: String,
    pub generate_date: DateTime<Utc>,
    pub activate_date: Option<DateTime<Utc>>,
    pub expire_date: Option<DateTime<Utc>>,
}

/// `GET /keys?pool=P1` -> `ListKeys(pool) -> [Key]` (scenario S2).
#[instrument(name = "kms.keys.list", skip_all, fields(pool_id = %query.pool, status))]
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListKeysQuery>,
) -> Result<Json<Vec<KeyListItem>>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::ListKeys { pool_id: query.pool })
        .await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });

    match result? {
        OperationResult::Keys(keys) => Ok(Json(
            keys.into_iter()
                .map(|key| KeyListItem {
                    key_id: key.key_id,
                    pool_id: key.pool_id,
                    version: key.version,
                    public_material: key.public_material,
                    status: key.status,
                    generate_date: key.generate_date,
                    activate_date: key.activate_date,
                    expire_date: key.expire_date,
                })
                .collect(),
        )),
        _ => Err(KmsError::Internal),
    }
}
