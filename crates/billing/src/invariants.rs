//! Billing invariant checks.
//!
//! Runnable consistency checks over the billing tables. The worker runs
//! the full set daily; they can also be run after a webhook replay or a
//! reconciliation pass. Checks only read, never write, and each violation
//! carries enough context to debug from the log line alone.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single invariant violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money may have moved incorrectly
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    /// Minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of one full check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RefundOverCapRow {
    purchase_id: Uuid,
    org_id: Uuid,
    amount_paid_cents: i64,
    total_refunded_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct DuplicateRequestRow {
    purchase_id: Uuid,
    org_id: Uuid,
    request_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct OrphanEventRow {
    event_id: Uuid,
    external_id: String,
}

#[derive(Debug, sqlx::FromRow)]
struct OverApprovedRow {
    request_id: Uuid,
    org_id: Uuid,
    approved_amount_cents: i64,
    calculated_max_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeCounterRow {
    org_id: Uuid,
    org_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct UnsettledRefundRow {
    request_id: Uuid,
    org_id: Uuid,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_refund_total_within_paid().await?);
        violations.extend(self.check_single_request_per_purchase().await?);
        violations.extend(self.check_processed_success_has_purchase().await?);
        violations.extend(self.check_approved_within_calculated_max().await?);
        violations.extend(self.check_counters_non_negative().await?);
        violations.extend(self.check_refunded_has_succeeded_transaction().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Total refunded never exceeds amount paid
    ///
    /// The confirmation guard enforces this at write time; a violation here
    /// means money moved through a path that bypassed it.
    async fn check_refund_total_within_paid(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<RefundOverCapRow> = sqlx::query_as(
            r#"
            SELECT
                p.id as purchase_id,
                p.organization_id as org_id,
                p.amount_paid_cents,
                p.total_refunded_cents
            FROM billing_purchases p
            WHERE p.total_refunded_cents > p.amount_paid_cents
               OR p.total_refunded_cents < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "refund_total_within_paid".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Purchase has refunded {} of {} cents paid",
                    row.total_refunded_cents, row.amount_paid_cents
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "amount_paid_cents": row.amount_paid_cents,
                    "total_refunded_cents": row.total_refunded_cents,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: At most one refund request per purchase
    async fn check_single_request_per_purchase(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateRequestRow> = sqlx::query_as(
            r#"
            SELECT
                r.purchase_id,
                MIN(r.organization_id) as org_id,
                COUNT(*) as request_count
            FROM refund_requests r
            GROUP BY r.purchase_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_request_per_purchase".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Purchase has {} refund requests (expected at most 1)",
                    row.request_count
                ),
                context: serde_json::json!({
                    "purchase_id": row.purchase_id,
                    "request_count": row.request_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Every processed payment.succeeded event has a purchase
    ///
    /// The purchase insert and the processed marker commit in the same
    /// transaction; an orphan here means a partial apply leaked through.
    async fn check_processed_success_has_purchase(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanEventRow> = sqlx::query_as(
            r#"
            SELECT e.id as event_id, e.external_id
            FROM billing_events e
            WHERE e.event_type = 'payment.succeeded'
              AND e.status = 'processed'
              AND NOT EXISTS (
                  SELECT 1 FROM billing_purchases p
                  WHERE p.billing_event_id = e.id
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "processed_success_has_purchase".to_string(),
                org_ids: vec![],
                description: format!(
                    "Processed payment.succeeded event '{}' has no purchase record",
                    row.external_id
                ),
                context: serde_json::json!({
                    "event_id": row.event_id,
                    "external_id": row.external_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Approved amounts stay within the snapshotted maximum
    async fn check_approved_within_calculated_max(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OverApprovedRow> = sqlx::query_as(
            r#"
            SELECT
                r.id as request_id,
                r.organization_id as org_id,
                r.approved_amount_cents,
                r.calculated_max_cents
            FROM refund_requests r
            WHERE r.approved_amount_cents IS NOT NULL
              AND r.approved_amount_cents > r.calculated_max_cents
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "approved_within_calculated_max".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Refund approved for {} cents against a maximum of {}",
                    row.approved_amount_cents, row.calculated_max_cents
                ),
                context: serde_json::json!({
                    "request_id": row.request_id,
                    "approved_amount_cents": row.approved_amount_cents,
                    "calculated_max_cents": row.calculated_max_cents,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Usage counters are non-negative
    ///
    /// The GREATEST floor on increments should make this unreachable.
    async fn check_counters_non_negative(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeCounterRow> = sqlx::query_as(
            r#"
            SELECT o.id as org_id, o.name as org_name
            FROM organization_usage u
            JOIN organizations o ON o.id = u.organization_id
            WHERE u.projects_count < 0
               OR u.clients_count < 0
               OR u.proposals_count < 0
               OR u.users_count < 0
               OR u.storage_bytes_used < 0
               OR u.ai_credits_used < 0
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "counters_non_negative".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization '{}' has a negative usage counter",
                    row.org_name
                ),
                context: serde_json::json!({ "org_name": row.org_name }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 6: Refunded requests have a succeeded transaction
    async fn check_refunded_has_succeeded_transaction(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnsettledRefundRow> = sqlx::query_as(
            r#"
            SELECT r.id as request_id, r.organization_id as org_id
            FROM refund_requests r
            WHERE r.status = 'refunded'
              AND NOT EXISTS (
                  SELECT 1 FROM refund_transactions t
                  WHERE t.refund_request_id = r.id
                    AND t.status = 'succeeded'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "refunded_has_succeeded_transaction".to_string(),
                org_ids: vec![row.org_id],
                description: "Refund marked refunded with no succeeded transaction".to_string(),
                context: serde_json::json!({ "request_id": row.request_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_summary_serializes() {
        let summary = InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run: 6,
            checks_passed: 5,
            checks_failed: 1,
            violations: vec![InvariantViolation {
                invariant: "refund_total_within_paid".to_string(),
                org_ids: vec![Uuid::new_v4()],
                description: "over-refunded".to_string(),
                context: serde_json::json!({"total_refunded_cents": 12_000}),
                severity: ViolationSeverity::Critical,
            }],
            healthy: false,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["checks_run"], 6);
        assert_eq!(json["healthy"], false);
        assert_eq!(
            json["violations"][0]["invariant"],
            "refund_total_within_paid"
        );
    }
}
