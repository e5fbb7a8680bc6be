use super::AppState;
use crate::errors::KmsError;
use crate::services::{Operation, OperationResult};
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct BarrierRotatedResponse {
    pub root_kid: Uuid,
    pub intermediate_kid: Uuid,
}

/// `POST /admin/unseal-rotate` (CLI surface): rotates the Root and
/// Intermediate wrapping tiers. Rotating the UnsealKey tier itself needs a
/// new secret set and only happens at process start, via `Barrier::unseal`
/// with the new secrets supplied on restart — there is no HTTP-triggerable
/// equivalent.
#[instrument(name = "kms.admin.unseal_rotate", skip_all, fields(status))]
pub async fn unseal_rotate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BarrierRotatedResponse>, KmsError> {
    let result = state.orchestrator.dispatch(Operation::RotateBarrierTiers).await;

    tracing::Span::current().record("status", if result.is_ok() { "success" } else { "error" });

    match result? {
        OperationResult::BarrierRotated { root_kid, intermediate_kid } => {
            Ok(Json(BarrierRotatedResponse { root_kid, intermediate_kid }))
        }
        _ => Err(KmsError::Internal),
    }
}
