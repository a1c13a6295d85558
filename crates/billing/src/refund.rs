//! Refund request lifecycle.
//!
//! A refund request moves requested -> approved -> processing -> refunded,
//! with rejected/canceled as alternate exits. Eligibility and the maximum
//! refundable amount are snapshotted onto the request row at creation, so
//! the decision is made against the numbers the requester saw. Money moves
//! in two phases: the provider call happens outside any transaction, and
//! the purchase's running refund total only advances when the execution is
//! confirmed, under a guard that can never push it past the amount paid.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use callsheet_shared::money::{self, Cents};

use crate::client::PaymentProviderClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{ActorType, RefundEventBuilder, RefundEventLogger, RefundEventType};
use crate::proration::{
    check_eligibility, max_refundable, prorated_consumed_value, PurchaseSnapshot,
};

/// Lifecycle states of a refund request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundStatus {
    Requested,
    Approved,
    Rejected,
    Canceled,
    Processing,
    Refunded,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Requested => "requested",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Canceled => "canceled",
            RefundStatus::Processing => "processing",
            RefundStatus::Refunded => "refunded",
            RefundStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(RefundStatus::Requested),
            "approved" => Some(RefundStatus::Approved),
            "rejected" => Some(RefundStatus::Rejected),
            "canceled" => Some(RefundStatus::Canceled),
            "processing" => Some(RefundStatus::Processing),
            "refunded" => Some(RefundStatus::Refunded),
            "failed" => Some(RefundStatus::Failed),
            _ => None,
        }
    }

    /// Legal transitions. Rejected, canceled and refunded are terminal;
    /// failed executions may be retried. `failed -> refunded` covers late
    /// settlement: the execution was reported failed, then the provider's
    /// proof of the refund arrives anyway.
    pub fn can_transition_to(&self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Requested, Approved)
                | (Requested, Rejected)
                | (Requested, Canceled)
                | (Approved, Processing)
                | (Processing, Refunded)
                | (Processing, Failed)
                | (Failed, Processing)
                | (Failed, Refunded)
        )
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A paid purchase, the object refunds are issued against.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingPurchase {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub provider: String,
    pub external_charge_id: Option<String>,
    pub plan_name: String,
    pub amount_paid_cents: Cents,
    pub total_refunded_cents: Cents,
    pub paid_at: OffsetDateTime,
}

impl BillingPurchase {
    fn snapshot(&self) -> PurchaseSnapshot {
        PurchaseSnapshot {
            plan_name: self.plan_name.clone(),
            amount_paid_cents: self.amount_paid_cents,
            total_refunded_cents: self.total_refunded_cents,
            paid_at: self.paid_at,
        }
    }
}

/// Current-state projection of a refund request.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefundRequest {
    pub id: Uuid,
    pub purchase_id: Uuid,
    pub organization_id: Uuid,
    pub requested_by: Uuid,
    pub status: String,
    pub consumed_value_cents: Cents,
    pub calculated_max_cents: Cents,
    pub approved_amount_cents: Option<Cents>,
    pub eligible_until: OffsetDateTime,
    pub decision_reason: Option<String>,
    pub decided_by: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

impl RefundRequest {
    pub fn refund_status(&self) -> BillingResult<RefundStatus> {
        RefundStatus::parse(&self.status).ok_or_else(|| {
            BillingError::Internal(format!("unknown refund status '{}'", self.status))
        })
    }
}

/// One provider execution attempt for an approved refund.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefundTransaction {
    pub id: Uuid,
    pub refund_request_id: Uuid,
    pub amount_cents: Cents,
    pub status: String,
    pub provider_refund_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

/// Amount a settlement applies to the purchase total, given the pending
/// transaction's amount and what the provider reports as executed.
///
/// Partial executions are legitimate and settle at the provider-reported
/// amount; an execution exceeding the pending amount means the proof
/// belongs to some other refund and must abort.
pub fn settled_amount(pending_cents: Cents, executed_cents: Cents) -> BillingResult<Cents> {
    if executed_cents <= 0 {
        return Err(BillingError::Validation(format!(
            "executed refund amount must be positive, got {}",
            executed_cents
        )));
    }
    if executed_cents > pending_cents {
        return Err(BillingError::InvariantViolation(format!(
            "executed refund amount {} exceeds the pending transaction amount {}",
            executed_cents, pending_cents
        )));
    }
    Ok(executed_cents)
}

/// Service driving the refund lifecycle.
pub struct RefundService {
    pool: PgPool,
    events: RefundEventLogger,
}

impl RefundService {
    pub fn new(pool: PgPool) -> Self {
        let events = RefundEventLogger::new(pool.clone());
        Self { pool, events }
    }

    pub async fn get_purchase(&self, purchase_id: Uuid) -> BillingResult<BillingPurchase> {
        let purchase: Option<BillingPurchase> = sqlx::query_as(
            r#"
            SELECT id, organization_id, provider, external_charge_id, plan_name,
                   amount_paid_cents, total_refunded_cents, paid_at
            FROM billing_purchases
            WHERE id = $1
            "#,
        )
        .bind(purchase_id)
        .fetch_optional(&self.pool)
        .await?;

        purchase.ok_or_else(|| BillingError::NotFound(format!("purchase {}", purchase_id)))
    }

    pub async fn get_request(&self, request_id: Uuid) -> BillingResult<RefundRequest> {
        let request: Option<RefundRequest> = sqlx::query_as(
            r#"
            SELECT id, purchase_id, organization_id, requested_by, status,
                   consumed_value_cents, calculated_max_cents, approved_amount_cents,
                   eligible_until, decision_reason, decided_by, created_at
            FROM refund_requests
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        request.ok_or_else(|| BillingError::NotFound(format!("refund request {}", request_id)))
    }

    /// Execution attempts for a request, oldest first.
    pub async fn get_transactions_for_request(
        &self,
        request_id: Uuid,
    ) -> BillingResult<Vec<RefundTransaction>> {
        let transactions: Vec<RefundTransaction> = sqlx::query_as(
            r#"
            SELECT id, refund_request_id, amount_cents, status, provider_refund_id,
                   created_at, completed_at
            FROM refund_transactions
            WHERE refund_request_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    /// Create a refund request for a purchase.
    ///
    /// Eligibility (7-day window, not fully refunded) is checked first and
    /// the proration numbers are snapshotted onto the row. At most one
    /// request ever exists per purchase; the partial unique index turns a
    /// concurrent double-submit into a conflict, not a second request.
    pub async fn request_refund(
        &self,
        purchase_id: Uuid,
        requested_by: Uuid,
    ) -> BillingResult<RefundRequest> {
        let purchase = self.get_purchase(purchase_id).await?;
        let snapshot = purchase.snapshot();
        let now = OffsetDateTime::now_utc();

        let decision = check_eligibility(&snapshot, now);
        if !decision.eligible {
            let reason = decision
                .reason
                .map(|r| r.as_str())
                .unwrap_or("ineligible");
            return Err(BillingError::Validation(format!(
                "purchase {} is not refundable: {}",
                purchase_id, reason
            )));
        }

        let consumed = prorated_consumed_value(&snapshot, now);
        let calculated_max = max_refundable(&snapshot, consumed);

        let mut tx = self.pool.begin().await?;

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO refund_requests (
                purchase_id,
                organization_id,
                requested_by,
                status,
                consumed_value_cents,
                calculated_max_cents,
                eligible_until
            )
            VALUES ($1, $2, $3, 'requested', $4, $5, $6)
            ON CONFLICT (purchase_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(purchase_id)
        .bind(purchase.organization_id)
        .bind(requested_by)
        .bind(consumed)
        .bind(calculated_max)
        .bind(decision.eligible_until)
        .fetch_optional(&mut *tx)
        .await?;

        let request_id = match inserted {
            Some((id,)) => id,
            None => {
                return Err(BillingError::Conflict(format!(
                    "a refund request already exists for purchase {}",
                    purchase_id
                )));
            }
        };

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::Requested)
                    .actor(requested_by, ActorType::User)
                    .metadata(serde_json::json!({
                        "purchase_id": purchase_id,
                        "consumed_value_cents": consumed,
                        "calculated_max_cents": calculated_max,
                    })),
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            request_id = %request_id,
            purchase_id = %purchase_id,
            calculated_max_cents = calculated_max,
            "Refund requested"
        );

        self.get_request(request_id).await
    }

    /// Approve a pending request for `amount_cents`, at most the snapshotted
    /// maximum.
    pub async fn approve(
        &self,
        request_id: Uuid,
        admin_id: Uuid,
        amount_cents: Cents,
    ) -> BillingResult<()> {
        if amount_cents <= 0 {
            return Err(BillingError::Validation(
                "approved amount must be positive".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let (current, calculated_max) = self.lock_request(&mut tx, request_id).await?;
        self.require_transition(request_id, current, RefundStatus::Approved)?;

        if amount_cents > calculated_max {
            return Err(BillingError::Validation(format!(
                "approved amount {} exceeds refundable maximum {}",
                amount_cents, calculated_max
            )));
        }

        sqlx::query(
            r#"
            UPDATE refund_requests
            SET status = 'approved',
                approved_amount_cents = $2,
                decided_by = $3,
                decided_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .bind(amount_cents)
        .bind(admin_id)
        .execute(&mut *tx)
        .await?;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::Approved)
                    .actor(admin_id, ActorType::PlatformAdmin)
                    .metadata(serde_json::json!({ "approved_amount_cents": amount_cents })),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(request_id = %request_id, amount_cents, "Refund approved");
        Ok(())
    }

    /// Reject a pending request. A reason is mandatory.
    pub async fn reject(
        &self,
        request_id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> BillingResult<()> {
        if reason.trim().is_empty() {
            return Err(BillingError::Validation(
                "a rejection reason is required".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let (current, _) = self.lock_request(&mut tx, request_id).await?;
        self.require_transition(request_id, current, RefundStatus::Rejected)?;

        sqlx::query(
            r#"
            UPDATE refund_requests
            SET status = 'rejected',
                decision_reason = $2,
                decided_by = $3,
                decided_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .bind(reason)
        .bind(admin_id)
        .execute(&mut *tx)
        .await?;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::Rejected)
                    .actor(admin_id, ActorType::PlatformAdmin)
                    .metadata(serde_json::json!({ "reason": reason })),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(request_id = %request_id, reason, "Refund rejected");
        Ok(())
    }

    /// Requester withdraws their own pending request.
    pub async fn cancel(&self, request_id: Uuid, user_id: Uuid) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;
        let (current, _) = self.lock_request(&mut tx, request_id).await?;
        self.require_transition(request_id, current, RefundStatus::Canceled)?;

        sqlx::query(
            r#"
            UPDATE refund_requests
            SET status = 'canceled', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::Canceled)
                    .actor(user_id, ActorType::User),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(request_id = %request_id, "Refund request canceled by requester");
        Ok(())
    }

    /// Execute an approved refund against the provider.
    ///
    /// Phase one (transactional): move the request to processing and record
    /// a pending refund transaction. Phase two (no transaction held): call
    /// the provider. The provider result only updates the transaction row;
    /// the purchase total moves in `confirm_execution`, so a crash between
    /// the call and the confirmation leaves a pending transaction that
    /// reconciliation or redelivery can settle, never double-applied money.
    pub async fn execute(
        &self,
        request_id: Uuid,
        provider: &dyn PaymentProviderClient,
    ) -> BillingResult<Uuid> {
        let mut tx = self.pool.begin().await?;
        let (current, _) = self.lock_request(&mut tx, request_id).await?;
        self.require_transition(request_id, current, RefundStatus::Processing)?;

        let request = self.get_request(request_id).await?;
        let amount = request.approved_amount_cents.ok_or_else(|| {
            BillingError::InvariantViolation(format!(
                "refund request {} has no approved amount",
                request_id
            ))
        })?;
        let purchase = self.get_purchase(request.purchase_id).await?;
        let charge_id = purchase.external_charge_id.clone().ok_or_else(|| {
            BillingError::InvariantViolation(format!(
                "purchase {} has no provider charge id",
                purchase.id
            ))
        })?;

        sqlx::query(
            "UPDATE refund_requests SET status = 'processing', updated_at = NOW() WHERE id = $1",
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        let transaction: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO refund_transactions (refund_request_id, amount_cents, status)
            VALUES ($1, $2, 'pending')
            RETURNING id
            "#,
        )
        .bind(request_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;
        let transaction_id = transaction.0;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::ExecutionStarted).metadata(
                    serde_json::json!({
                        "transaction_id": transaction_id,
                        "amount_cents": amount,
                    }),
                ),
            )
            .await?;

        tx.commit().await?;

        // Provider call outside the transaction. The transaction id doubles
        // as the provider idempotency key so a retried call cannot issue a
        // second refund.
        match provider
            .create_refund(&charge_id, amount, &transaction_id.to_string())
            .await
        {
            Ok(refund) => {
                // The provider's reported amount, not the approved amount,
                // is what settles; partial executions are legitimate.
                self.confirm_execution(
                    transaction_id,
                    &refund.provider_refund_id,
                    refund.amount_cents,
                )
                .await?;
                Ok(transaction_id)
            }
            Err(e) => {
                self.mark_execution_failed(request_id, transaction_id, &e)
                    .await?;
                Err(e)
            }
        }
    }

    /// Confirm that the provider executed a refund, identified by the
    /// provider's refund id as proof.
    ///
    /// `executed_amount_cents` is the amount the provider reports as moved,
    /// which may be less than the approved amount (partial execution); the
    /// purchase total advances by exactly that amount. Idempotent:
    /// confirming a transaction already settled with the same proof id is a
    /// no-op, so provider webhook redelivery after a crash-then-settle is
    /// safe. The purchase total advances under a guard that refuses to
    /// exceed the amount paid.
    pub async fn confirm_execution(
        &self,
        transaction_id: Uuid,
        provider_refund_id: &str,
        executed_amount_cents: Cents,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, Cents, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT refund_request_id, amount_cents, status, provider_refund_id
            FROM refund_transactions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (request_id, pending_amount, tx_status, existing_proof) = row.ok_or_else(|| {
            BillingError::NotFound(format!("refund transaction {}", transaction_id))
        })?;

        if tx_status == "succeeded" {
            if existing_proof.as_deref() == Some(provider_refund_id) {
                return Ok(());
            }
            return Err(BillingError::Conflict(format!(
                "refund transaction {} already settled with a different proof",
                transaction_id
            )));
        }

        let amount = settled_amount(pending_amount, executed_amount_cents)?;

        let request = self.get_request(request_id).await?;

        let totals: Option<(Cents, Cents)> = sqlx::query_as(
            r#"
            SELECT amount_paid_cents, total_refunded_cents
            FROM billing_purchases
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request.purchase_id)
        .fetch_optional(&mut *tx)
        .await?;
        let (amount_paid, total_refunded) = totals.ok_or_else(|| {
            BillingError::NotFound(format!("purchase {}", request.purchase_id))
        })?;

        if money::checked_refund_total(total_refunded, amount, amount_paid).is_none() {
            return Err(BillingError::InvariantViolation(format!(
                "confirming transaction {} would push purchase {} past its amount paid",
                transaction_id, request.purchase_id
            )));
        }

        // The only statement that moves money. The WHERE clause restates the
        // invariant at the point of write: total refunded never exceeds the
        // amount paid.
        let updated = sqlx::query(
            r#"
            UPDATE billing_purchases
            SET total_refunded_cents = total_refunded_cents + $2,
                updated_at = NOW()
            WHERE id = $1
              AND total_refunded_cents + $2 <= amount_paid_cents
            "#,
        )
        .bind(request.purchase_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(BillingError::InvariantViolation(format!(
                "confirming transaction {} would push purchase {} past its amount paid",
                transaction_id, request.purchase_id
            )));
        }

        // The row's amount becomes the settled amount, so the audit trail
        // and reconciliation see what actually moved.
        sqlx::query(
            r#"
            UPDATE refund_transactions
            SET status = 'succeeded',
                provider_refund_id = $2,
                amount_cents = $3,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(transaction_id)
        .bind(provider_refund_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE refund_requests SET status = 'refunded', updated_at = NOW() WHERE id = $1",
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::Refunded).metadata(
                    serde_json::json!({
                        "transaction_id": transaction_id,
                        "provider_refund_id": provider_refund_id,
                        "amount_cents": amount,
                    }),
                ),
            )
            .await?;

        tx.commit().await?;
        tracing::info!(
            request_id = %request_id,
            transaction_id = %transaction_id,
            amount_cents = amount,
            "Refund executed and confirmed"
        );
        Ok(())
    }

    async fn mark_execution_failed(
        &self,
        request_id: Uuid,
        transaction_id: Uuid,
        error: &BillingError,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE refund_transactions SET status = 'failed' WHERE id = $1")
            .bind(transaction_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE refund_requests SET status = 'failed', updated_at = NOW() WHERE id = $1",
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        self.events
            .log_event_in_tx(
                &mut tx,
                RefundEventBuilder::new(request_id, RefundEventType::ExecutionFailed).metadata(
                    serde_json::json!({
                        "transaction_id": transaction_id,
                        "error": error.to_string(),
                    }),
                ),
            )
            .await?;

        tx.commit().await?;
        tracing::warn!(
            request_id = %request_id,
            transaction_id = %transaction_id,
            error = %error,
            "Refund execution failed"
        );
        Ok(())
    }

    /// Lock a request row and return its current status and snapshotted
    /// maximum.
    async fn lock_request(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        request_id: Uuid,
    ) -> BillingResult<(RefundStatus, Cents)> {
        let row: Option<(String, Cents)> = sqlx::query_as(
            "SELECT status, calculated_max_cents FROM refund_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (raw, calculated_max) =
            row.ok_or_else(|| BillingError::NotFound(format!("refund request {}", request_id)))?;
        let status = RefundStatus::parse(&raw).ok_or_else(|| {
            BillingError::Internal(format!("unknown refund status '{}'", raw))
        })?;
        Ok((status, calculated_max))
    }

    fn require_transition(
        &self,
        request_id: Uuid,
        current: RefundStatus,
        next: RefundStatus,
    ) -> BillingResult<()> {
        if !current.can_transition_to(next) {
            return Err(BillingError::Conflict(format!(
                "refund request {} cannot move from {} to {}",
                request_id, current, next
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            RefundStatus::Requested,
            RefundStatus::Approved,
            RefundStatus::Rejected,
            RefundStatus::Canceled,
            RefundStatus::Processing,
            RefundStatus::Refunded,
            RefundStatus::Failed,
        ] {
            assert_eq!(RefundStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RefundStatus::parse("bogus"), None);
    }

    #[test]
    fn test_requested_exits() {
        use RefundStatus::*;
        assert!(Requested.can_transition_to(Approved));
        assert!(Requested.can_transition_to(Rejected));
        assert!(Requested.can_transition_to(Canceled));
        assert!(!Requested.can_transition_to(Processing));
        assert!(!Requested.can_transition_to(Refunded));
    }

    #[test]
    fn test_execution_path() {
        use RefundStatus::*;
        assert!(Approved.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Refunded));
        assert!(Processing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_late_settlement_from_failed() {
        // Execution reported failed, provider proof arrives afterwards.
        use RefundStatus::*;
        assert!(Failed.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Approved));
    }

    #[test]
    fn test_partial_execution_settles_at_reported_amount() {
        // Provider refunds 800 of an approved 1,000; the purchase total
        // moves by 800, not 1,000.
        assert_eq!(settled_amount(1_000, 800).unwrap(), 800);
        assert_eq!(settled_amount(1_000, 1_000).unwrap(), 1_000);
    }

    #[test]
    fn test_over_execution_aborts() {
        assert!(matches!(
            settled_amount(1_000, 1_200),
            Err(BillingError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_non_positive_execution_rejected() {
        assert!(matches!(
            settled_amount(1_000, 0),
            Err(BillingError::Validation(_))
        ));
        assert!(matches!(
            settled_amount(1_000, -50),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        use RefundStatus::*;
        for terminal in [Rejected, Canceled, Refunded] {
            for next in [Requested, Approved, Processing, Refunded, Failed] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be illegal",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_cancel_only_before_decision() {
        use RefundStatus::*;
        assert!(!Approved.can_transition_to(Canceled));
        assert!(!Processing.can_transition_to(Canceled));
    }
}
