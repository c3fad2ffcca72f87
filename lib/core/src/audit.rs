//! Audit recorder seam.
//!
//! Every successful mutation appends one event to an [`AuditRecorder`].
//! Persistence of the audit trail is an external collaborator's job;
//! the core only calls into this trait. Append is fire-and-forget:
//! implementations swallow their own failures and log them — an audit
//! failure never rolls back or blocks the business transition.

use serde::{Deserialize, Serialize};

use crate::types::{new_id, now_rfc3339};

/// A single append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,

    /// Entity kind, e.g. `"order"`, `"batch"`, `"paymentRequest"`.
    pub entity: String,

    pub entity_id: String,

    /// Action performed, e.g. `"transition"`, `"release"`, `"confirm"`.
    pub action: String,

    /// Acting identity.
    pub actor: String,

    /// Free-form detail, e.g. `"QC_PENDING -> RELEASED"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// RFC 3339 timestamp.
    pub at: String,
}

impl AuditEvent {
    pub fn new(entity: &str, entity_id: &str, action: &str, actor: &str) -> Self {
        Self {
            id: new_id(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            actor: actor.to_string(),
            detail: None,
            at: now_rfc3339(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Append-only audit sink.
pub trait AuditRecorder: Send + Sync + 'static {
    /// Record one event. Must not panic and must not propagate errors.
    fn append(&self, event: &AuditEvent);
}

/// Writes audit events to the tracing log. The default sink when no
/// external audit store is wired in.
pub struct LogRecorder;

impl AuditRecorder for LogRecorder {
    fn append(&self, event: &AuditEvent) {
        tracing::info!(
            target: "audit",
            entity = %event.entity,
            entity_id = %event.entity_id,
            action = %event.action,
            actor = %event.actor,
            detail = event.detail.as_deref().unwrap_or(""),
            at = %event.at,
            "audit"
        );
    }
}

/// Discards everything. Used for testing.
pub struct NullRecorder;

impl AuditRecorder for NullRecorder {
    fn append(&self, _event: &AuditEvent) {}
}
