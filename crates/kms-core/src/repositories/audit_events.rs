use crate::db::Tx;
use crate::errors::KmsError;
use crate::models::AuditEvent;
use crate::observability::metrics::record_db_query;
use std::time::Instant;
use uuid::Uuid;

/// Appends one audit record. Never pass plaintext key material as `detail`
/// — only identifiers, counts, and outcome metadata belong here.
pub async fn record(
    tx: &mut Tx<'_>,
    event_id: Uuid,
    event_type: &str,
    tenant_id: Option<Uuid>,
    subject: &str,
    success: bool,
    detail: &serde_json::Value,
) -> Result<AuditEvent, KmsError> {
    let detail = serde_json::to_string(detail).map_err(|_| KmsError::Internal)?;
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, AuditEvent>(
                "INSERT INTO audit_events (event_id, event_type, tenant_id, subject, success, detail) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING event_id, event_type, tenant_id, subject, success, detail, created_at",
            )
            .bind(event_id)
            .bind(event_type)
            .bind(tenant_id)
            .bind(subject)
            .bind(success)
            .bind(&detail)
            .fetch_one(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, AuditEvent>(
                "INSERT INTO audit_events (event_id, event_type, tenant_id, subject, success, detail) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 RETURNING event_id, event_type, tenant_id, subject, success, detail, created_at",
            )
            .bind(event_id)
            .bind(event_type)
            .bind(tenant_id)
            .bind(subject)
            .bind(success)
            .bind(&detail)
            .fetch_one(&mut **sq)
            .await
        }
    };
    record_db_query(
        "insert",
        "audit_events",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}

pub async fn list_recent(tx: &mut Tx<'_>, limit: i64) -> Result<Vec<AuditEvent>, KmsError> {
    let start = Instant::now();
    let result = match tx {
        Tx::Postgres(pg) => {
            sqlx::query_as::<_, AuditEvent>(
                "SELECT event_id, event_type, tenant_id, subject, success, detail, created_at \
                 FROM audit_events ORDER BY created_at DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(&mut **pg)
            .await
        }
        Tx::Sqlite(sq) => {
            sqlx::query_as::<_, AuditEvent>(
                "SELECT event_id, event_type, tenant_id, subject, success, detail, created_at \
                 FROM audit_events ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&mut **sq)
            .await
        }
    };
    record_db_query(
        "select",
        "audit_events",
        if result.is_ok() { "success" } else { "error" },
        start.elapsed(),
    );
    result.map_err(KmsError::from)
}
