use super::AppState;
use crate::errors::KmsError;
use crate::services::{Operation, OperationResult};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    pub plaintext: String,
}

#[derive(Debug, Serialize)]
pub struct JweResponse {
    pub jwe: String,
}

/// `POST /pools/:id/encrypt` -> `Encrypt(pool, plaintext, aad?)`.
#[instrument(name = "kms.crypto.encrypt", skip_all, fields(pool_id = %pool_id, status))]
pub async fn encrypt(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
    Json(payload): Json<EncryptRequest>,
) -> Result<Json<JweResponse>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::Encrypt {
            pool_id,
            plaintext_b64: payload.plaintext,
        })
        .await;

    record_status_and_errors("encrypt", &result);

    match result? {
        OperationResult::Ciphertext(jwe) => Ok(Json(JweResponse { jwe })),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct DecryptRequest {
    pub jwe: String,
}

#[derive(Debug, Serialize)]
pub struct PlaintextResponse {
    pub plaintext: String,
}

/// `POST /decrypt` -> `Decrypt(jwe)`, Key resolved by the JWE header's `kid`
///.
#[instrument(name = "kms.crypto.decrypt", skip_all, fields(status))]
pub async fn decrypt(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DecryptRequest>,
) -> Result<Json<PlaintextResponse>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::Decrypt { jwe_compact: payload.jwe })
        .await;

    record_status_and_errors("decrypt", &result);

    match result? {
        OperationResult::Plaintext(plaintext) => Ok(Json(PlaintextResponse { plaintext })),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct JwsResponse {
    pub jws: String,
}

/// `POST /pools/:id/sign` -> `Sign(pool, payload)`.
#[instrument(name = "kms.crypto.sign", skip_all, fields(pool_id = %pool_id, status))]
pub async fn sign(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
    Json(payload): Json<SignRequest>,
) -> Result<Json<JwsResponse>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::Sign {
            pool_id,
            payload_b64: payload.payload,
        })
        .await;

    record_status_and_errors("sign", &result);

    match result? {
        OperationResult::Signature(jws) => Ok(Json(JwsResponse { jws })),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub jws: String,
}

/// `POST /verify` -> `Verify(jws)`, algorithm cross-checked against the
/// pool's Algorithm (scenario S5: no log entry reveals which
/// check — alg, kid, signature — failed first).
#[instrument(name = "kms.crypto.verify", skip_all, fields(status))]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<PlaintextResponse>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::Verify { jws_compact: payload.jws })
        .await;

    record_status_and_errors("verify", &result);

    match result? {
        OperationResult::VerifiedPayload(payload) => Ok(Json(PlaintextResponse { plaintext: payload })),
        _ => Err(KmsError::Internal),
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateDataKeyRequest {
    #[serde(default = "default_data_key_len")]
    pub plaintext_len: usize,
}

const fn default_data_key_len() -> usize {
    32
}

#[derive(Debug, Serialize)]
pub struct DataKeyResponse {
    pub plaintext: String,
    pub wrapped: String,
}

/// `POST /pools/:id/data-key` -> `GenerateDataKey(pool, requestedAlg)`
///, for client-side envelope encryption.
#[instrument(name = "kms.crypto.generate_data_key", skip_all, fields(pool_id = %pool_id, status))]
pub async fn generate_data_key(
    State(state): State<Arc<AppState>>,
    Path(pool_id): Path<Uuid>,
    Json(payload): Json<GenerateDataKeyRequest>,
) -> Result<Json<DataKeyResponse>, KmsError> {
    let result = state
        .orchestrator
        .dispatch(Operation::GenerateDataKey {
            pool_id,
            plaintext_len: payload.plaintext_len,
        })
        .await;

    record_status_and_errors("generate_data_key", &result);

    match result? {
        OperationResult::DataKey { plaintext_b64, wrapped } => Ok(Json(DataKeyResponse {
            plaintext: plaintext_b64,
            wrapped,
        })),
        _ => Err(KmsError::Internal),
    }
}

/// Orchestrator::dispatch already records the `kms_orchestrator_errors_total`
/// counter on every failed dispatch; this only flips the tracing span's
/// `status` field so request logs don't need a second join to find failures.
fn record_status_and_errors(_operation: &str, result: &Result<OperationResult, KmsError>) {
    let status = if result.is_ok() { "success" } else { "error" };
    tracing::Span::current().record("status", status);
}
