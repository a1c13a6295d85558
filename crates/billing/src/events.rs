//! Refund audit trail.
//!
//! Append-only event log for refund request transitions. The event log, not
//! the refund request row, is the historical record: the request row is a
//! "current state" projection, and every transition appends exactly one
//! event here with actor attribution. Rows are never updated or deleted.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Types of refund audit events, one per lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundEventType {
    Requested,
    Approved,
    Rejected,
    Canceled,
    ExecutionStarted,
    Refunded,
    ExecutionFailed,
}

impl std::fmt::Display for RefundEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefundEventType::Requested => "REQUESTED",
            RefundEventType::Approved => "APPROVED",
            RefundEventType::Rejected => "REJECTED",
            RefundEventType::Canceled => "CANCELED",
            RefundEventType::ExecutionStarted => "EXECUTION_STARTED",
            RefundEventType::Refunded => "REFUNDED",
            RefundEventType::ExecutionFailed => "EXECUTION_FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Who triggered the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorType {
    /// Tenant user (requester).
    User,
    /// Platform administrator (decider).
    PlatformAdmin,
    /// System automation (execution confirmation, sweeps).
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::PlatformAdmin => write!(f, "platform_admin"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// A refund audit event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundEvent {
    pub id: Uuid,
    pub refund_request_id: Uuid,
    pub event_type: String,
    pub actor_type: String,
    pub actor_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: OffsetDateTime,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for RefundEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            refund_request_id: row.try_get("refund_request_id")?,
            event_type: row.try_get("event_type")?,
            actor_type: row.try_get("actor_type")?,
            actor_id: row.try_get("actor_id")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Builder for audit events.
pub struct RefundEventBuilder {
    refund_request_id: Uuid,
    event_type: RefundEventType,
    actor_type: ActorType,
    actor_id: Option<Uuid>,
    metadata: serde_json::Value,
}

impl RefundEventBuilder {
    pub fn new(refund_request_id: Uuid, event_type: RefundEventType) -> Self {
        Self {
            refund_request_id,
            event_type,
            actor_type: ActorType::System,
            actor_id: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn actor(mut self, actor_id: Uuid, actor_type: ActorType) -> Self {
        self.actor_id = Some(actor_id);
        self.actor_type = actor_type;
        self
    }

    pub fn actor_type(mut self, actor_type: ActorType) -> Self {
        self.actor_type = actor_type;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Service for appending and querying refund audit events.
#[derive(Clone)]
pub struct RefundEventLogger {
    pool: PgPool,
}

impl RefundEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one audit event.
    pub async fn log_event(&self, builder: RefundEventBuilder) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO refund_events (
                refund_request_id,
                event_type,
                actor_type,
                actor_id,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(builder.refund_request_id)
        .bind(builder.event_type.to_string())
        .bind(builder.actor_type.to_string())
        .bind(builder.actor_id)
        .bind(&builder.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(event_id.0)
    }

    /// Append one audit event inside an existing transaction, so the audit
    /// row commits or rolls back with the state transition it records.
    pub async fn log_event_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        builder: RefundEventBuilder,
    ) -> BillingResult<Uuid> {
        let event_id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO refund_events (
                refund_request_id,
                event_type,
                actor_type,
                actor_id,
                metadata
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(builder.refund_request_id)
        .bind(builder.event_type.to_string())
        .bind(builder.actor_type.to_string())
        .bind(builder.actor_id)
        .bind(&builder.metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(event_id.0)
    }

    /// Full transition history for a refund request, oldest first.
    pub async fn get_events_for_request(
        &self,
        refund_request_id: Uuid,
    ) -> BillingResult<Vec<RefundEvent>> {
        let events: Vec<RefundEvent> = sqlx::query_as(
            r#"
            SELECT
                id,
                refund_request_id,
                event_type,
                actor_type,
                actor_id,
                metadata,
                created_at
            FROM refund_events
            WHERE refund_request_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(refund_request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_display() {
        assert_eq!(RefundEventType::Requested.to_string(), "REQUESTED");
        assert_eq!(
            RefundEventType::ExecutionStarted.to_string(),
            "EXECUTION_STARTED"
        );
        assert_eq!(RefundEventType::Refunded.to_string(), "REFUNDED");
    }

    #[test]
    fn test_actor_type_display() {
        assert_eq!(ActorType::User.to_string(), "user");
        assert_eq!(ActorType::PlatformAdmin.to_string(), "platform_admin");
        assert_eq!(ActorType::System.to_string(), "system");
    }

    #[test]
    fn test_event_builder_defaults() {
        let request_id = Uuid::new_v4();
        let builder = RefundEventBuilder::new(request_id, RefundEventType::Requested);
        assert_eq!(builder.refund_request_id, request_id);
        assert_eq!(builder.actor_type, ActorType::System);
        assert!(builder.actor_id.is_none());
    }

    #[test]
    fn test_event_builder_actor() {
        let request_id = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let builder = RefundEventBuilder::new(request_id, RefundEventType::Approved)
            .actor(actor, ActorType::PlatformAdmin)
            .metadata(serde_json::json!({"approved_amount_cents": 500}));
        assert_eq!(builder.actor_id, Some(actor));
        assert_eq!(builder.actor_type, ActorType::PlatformAdmin);
        assert_eq!(builder.metadata["approved_amount_cents"], 500);
    }
}
