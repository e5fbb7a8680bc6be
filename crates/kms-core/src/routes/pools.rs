use super::AppState;
use crate::errors::KmsError;
use crate::models::{Algorithm, KeyPool, KeyUse, PoolStatus};
use crate::services::{Operation, OperationResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePoolRequest {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub algorithm: Algorithm,
    pub key_use: KeyUse,
    #[serde(default)]
    pub key_ops: String,
    #[serde(default)]
    pub import_allowed: bool,
    #[serde(default)]
    pub versioning_allowed: bool,
    #[serde(default)]
    pub export_allowed: bool,
}

/// `POST /pools` -> `CreatePool`.
#[instrument(name = "kms.pools.create", skip_all, fields(algorithm, status))]
pub async fn create_pool(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePoolRequest>,
) -> Result<Json<KeyPool>, KmsError> {
    tracing::Span::current().record("algorithm", payload.algorithm.as_str());

    let result = state
        .orchestrator
        .dispatch(Operation::CreatePool {
            tenant_id: payload.tenant_id,
            name: payload.name,
            description: payload.description,
            algorithm: payload.algorithm,
            key_use: payload.key_use,
            key_ops: payload.key_ops,
            import_allowed: payload.import_allowed,
            versioning_allowed: payload.versioning_allowed,
            export_allowed: payload.export_allowed,
        })
        .await;

    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);

    match result? {
        OperationResult::Pool(pool) => Ok(Json(pool)),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPoolsQuery {
    pub tenant_id: Uuid,
    pub after: Option<Uuid>,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

const fn default_page_size() -> i64 {
    50
}

/// `GET /pools` -> `ListPools`.
#[instrument(name = "kms.pools.list", skip_all, fields(status))]
pub async fn list_pools(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPoolsQuery>,
) -> Result<Json<Vec<KeyPool>>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::ListPools {
            tenant_id: query.tenant_id,
            after: query.after,
            limit: query.limit,
        })
        .await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });

    match result? {
        OperationResult::Pools(pools) => Ok(Json(pools)),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportKeyRequest {
    /// Base64-encoded PKCS8 (asymmetric) or raw key bytes (symmetric).
    pub private_material_b64: String,
    pub public_jwk: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub key_id: Uuid,
    pub pool_id: Uuid,
    pub version: i64,
    pub status: String,
}

/// `POST /pools/:id/import` -> `ImportKey`.
#[instrument(name = "kms.pools.import_key", skip_all, fields(pool_id = %pool_id, status))]
pub async fn import_key(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
    Json(payload): Json<ImportKeyRequest>,
) -> Result<Json<KeyResponse>, KmsError> {
    let private_material_der = BASE64
        .decode(&payload.private_material_b64)
        .map_err(|_| KmsError::InvalidInput("private_material_b64 must be base64".to_string()))?;

    let result = state
        .orchestrator
        .dispatch(Operation::ImportKey {
            pool_id,
            private_material_der,
            public_jwk: payload.public_jwk,
        })
        .await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });

    match result? {
        OperationResult::Key(key) => Ok(Json(KeyResponse {
            key_id: key.key_id,
            pool_id: key.pool_id,
            version: key.version,
            status: key.status,
        })),
        _ => Err(KmsError::Internal),
    }
}

/// `POST /pools/:id/rotate` -> `Rotate(pool)`.
#[instrument(name = "kms.pools.rotate", skip_all, fields(pool_id = %pool_id, status))]
pub async fn rotate(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
) -> Result<Json<KeyResponse>, KmsError> {
    let result = state.orchestrator.dispatch(Operation::Rotate { pool_id }).await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });

    match result? {
        OperationResult::Key(key) => Ok(Json(KeyResponse {
            key_id: key.key_id,
            pool_id: key.pool_id,
            version: key.version,
            status: key.status,
        })),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: PoolStatus,
}

/// `POST /pools/:id/status` -> disable/enable/delete transitions of the
/// KeyPool FSM.
#[instrument(name = "kms.pools.set_status", skip_all, fields(pool_id = %pool_id, status))]
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<Json<serde_json::Value>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::SetPoolStatus {
            pool_id,
            target: payload.status,
        })
        .await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });
    result?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
