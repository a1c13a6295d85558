//! Payment-provider webhook handling.
//!
//! Providers deliver events at-least-once and possibly out of order. Side
//! effects must be applied exactly once per distinct `external_id`, so
//! idempotency is enforced by a uniqueness constraint at the point of
//! insert: the `INSERT ... ON CONFLICT ... RETURNING` either claims the
//! event or tells us someone else already has. There is no check-then-act
//! window for two concurrent deliveries to race through.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use callsheet_shared::money::Cents;
use callsheet_shared::types::{BillingStatus, PlanInterval};

use crate::error::{BillingError, BillingResult};
use crate::subscriptions::{next_status_on_payment_failure, next_status_on_payment_success};

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance in seconds.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook signing configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub signing_secret: String,
}

impl WebhookConfig {
    pub fn from_env() -> BillingResult<Self> {
        let signing_secret = std::env::var("WEBHOOK_SIGNING_SECRET")
            .map_err(|_| BillingError::Internal("WEBHOOK_SIGNING_SECRET must be set".into()))?;
        Ok(Self { signing_secret })
    }
}

/// Payment fact delivered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

/// Raw wire shape of a provider event.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    organization_id: Uuid,
    #[serde(default)]
    plan_code: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    charge_id: Option<String>,
    #[serde(default)]
    amount_cents: Option<Cents>,
    #[serde(default)]
    occurred_at: Option<i64>,
}

/// Validated provider event.
#[derive(Debug, Clone)]
pub struct PaymentEventEnvelope {
    /// Provider's globally-unique event id; the idempotency key.
    pub external_id: String,
    pub event_type: String,
    pub organization_id: Uuid,
    pub plan_code: Option<String>,
    pub provider: String,
    pub charge_id: Option<String>,
    pub amount_cents: Cents,
    pub occurred_at: OffsetDateTime,
    /// `None` for event types this subsystem does not handle.
    pub outcome: Option<PaymentOutcome>,
}

/// Parse and validate a provider payload.
pub fn parse_envelope(payload: &str) -> BillingResult<PaymentEventEnvelope> {
    let raw: RawEnvelope =
        serde_json::from_str(payload).map_err(|e| BillingError::MalformedPayload(e.to_string()))?;

    if raw.id.is_empty() {
        return Err(BillingError::MalformedPayload(
            "missing external event id".into(),
        ));
    }

    let outcome = match raw.event_type.as_str() {
        "payment.succeeded" => Some(PaymentOutcome::Succeeded),
        "payment.failed" => Some(PaymentOutcome::Failed),
        _ => None,
    };

    let amount_cents = raw.amount_cents.unwrap_or(0);
    if outcome == Some(PaymentOutcome::Succeeded) && amount_cents < 0 {
        return Err(BillingError::MalformedPayload(
            "negative amount on successful payment".into(),
        ));
    }

    let occurred_at = raw
        .occurred_at
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or_else(OffsetDateTime::now_utc);

    Ok(PaymentEventEnvelope {
        external_id: raw.id,
        event_type: raw.event_type,
        organization_id: raw.organization_id,
        plan_code: raw.plan_code,
        provider: raw.provider.unwrap_or_else(|| "unknown".to_string()),
        charge_id: raw.charge_id,
        amount_cents,
        occurred_at,
        outcome,
    })
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// First delivery; side effects were applied.
    Applied { purchase_id: Option<Uuid> },
    /// Duplicate delivery; the original already-applied state stands.
    AlreadyProcessed,
    /// Event type has no handler; recorded and ignored.
    Ignored,
}

/// Webhook processor for provider payment events.
pub struct WebhookProcessor {
    pool: PgPool,
    config: WebhookConfig,
}

impl WebhookProcessor {
    pub fn new(pool: PgPool, config: WebhookConfig) -> Self {
        Self { pool, config }
    }

    /// Verify the `t=<ts>,v1=<hex hmac>` signature header against the raw
    /// payload. Rejects signatures older than the tolerance window.
    pub fn verify_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook signature timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.config.signing_secret.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Verify, parse and handle one raw delivery.
    pub async fn handle(&self, payload: &str, signature: &str) -> BillingResult<ProcessingOutcome> {
        self.verify_signature(payload, signature)?;
        let envelope = parse_envelope(payload)?;
        self.handle_envelope(envelope).await
    }

    /// Handle a validated envelope.
    ///
    /// All side effects commit in the same transaction as the billing-event
    /// insert, so a crash mid-processing leaves no claim behind a partially
    /// applied event. Events previously marked `failed` may be re-claimed by
    /// a redelivery; events marked `processed` never are.
    pub async fn handle_envelope(
        &self,
        envelope: PaymentEventEnvelope,
    ) -> BillingResult<ProcessingOutcome> {
        let mut tx = self.pool.begin().await?;

        // Atomic idempotency claim. The uniqueness constraint on external_id
        // is the synchronization primitive; the conflict branch only fires
        // for events stuck in `failed`, which redelivery is meant to retry.
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO billing_events (external_id, event_type, status, received_at)
            VALUES ($1, $2, 'received', NOW())
            ON CONFLICT (external_id) DO UPDATE SET
                status = 'received',
                received_at = NOW()
            WHERE billing_events.status = 'failed'
            RETURNING id
            "#,
        )
        .bind(&envelope.external_id)
        .bind(&envelope.event_type)
        .fetch_optional(&mut *tx)
        .await?;

        let event_id = match claimed {
            Some((id,)) => id,
            None => {
                tracing::info!(
                    external_id = %envelope.external_id,
                    event_type = %envelope.event_type,
                    "Duplicate webhook delivery, side effects already applied"
                );
                return Ok(ProcessingOutcome::AlreadyProcessed);
            }
        };

        let outcome = match envelope.outcome {
            Some(o) => o,
            None => {
                // No handler for this event type. Record it so redeliveries
                // short-circuit, but apply nothing.
                tracing::info!(
                    external_id = %envelope.external_id,
                    event_type = %envelope.event_type,
                    "Unhandled provider event type"
                );
                self.mark_processed(&mut tx, event_id).await?;
                tx.commit().await?;
                return Ok(ProcessingOutcome::Ignored);
            }
        };

        // Resolve the tenant. A lookup failure is retryable: mark the event
        // failed and commit so the provider's redelivery can re-claim it.
        let org: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, billing_status FROM organizations WHERE id = $1 FOR UPDATE")
                .bind(envelope.organization_id)
                .fetch_optional(&mut *tx)
                .await?;

        let (org_id, status_raw) = match org {
            Some(row) => row,
            None => {
                sqlx::query("UPDATE billing_events SET status = 'failed' WHERE id = $1")
                    .bind(event_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                tracing::warn!(
                    external_id = %envelope.external_id,
                    organization_id = %envelope.organization_id,
                    "Organization not found for webhook event; marked failed for redelivery"
                );
                return Err(BillingError::Retryable(format!(
                    "organization {} not found",
                    envelope.organization_id
                )));
            }
        };

        let current = BillingStatus::parse(&status_raw).ok_or_else(|| {
            BillingError::Internal(format!("unknown billing_status '{}'", status_raw))
        })?;

        let result = match outcome {
            PaymentOutcome::Succeeded => {
                let purchase_id = self
                    .apply_payment_succeeded(&mut tx, event_id, org_id, current, &envelope)
                    .await?;
                ProcessingOutcome::Applied {
                    purchase_id: Some(purchase_id),
                }
            }
            PaymentOutcome::Failed => {
                self.apply_payment_failed(&mut tx, org_id, current).await?;
                ProcessingOutcome::Applied { purchase_id: None }
            }
        };

        self.mark_processed(&mut tx, event_id).await?;
        tx.commit().await?;

        tracing::info!(
            external_id = %envelope.external_id,
            org_id = %org_id,
            outcome = ?outcome,
            "Webhook event processed"
        );

        Ok(result)
    }

    /// Side effects of a first-seen successful payment: one purchase row,
    /// organization activated, access deadline set from the plan interval,
    /// per-period usage reset.
    async fn apply_payment_succeeded(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: Uuid,
        org_id: Uuid,
        current: BillingStatus,
        envelope: &PaymentEventEnvelope,
    ) -> BillingResult<Uuid> {
        // Resolve the plan for the purchase snapshot and access deadline.
        // Unknown plan codes fall back to monthly rather than failing the
        // payment.
        let (plan_name, interval) = match &envelope.plan_code {
            Some(code) => {
                let plan: Option<(String, String)> =
                    sqlx::query_as("SELECT name, billing_interval FROM plans WHERE code = $1")
                        .bind(code)
                        .fetch_optional(&mut **tx)
                        .await?;
                match plan {
                    Some((name, raw)) => {
                        (name, PlanInterval::parse(&raw).unwrap_or(PlanInterval::Monthly))
                    }
                    None => {
                        tracing::warn!(
                            org_id = %org_id,
                            plan_code = %code,
                            "Unknown plan code on payment event, assuming monthly"
                        );
                        (code.clone(), PlanInterval::Monthly)
                    }
                }
            }
            None => ("unknown".to_string(), PlanInterval::Monthly),
        };

        let purchase: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO billing_purchases (
                organization_id,
                billing_event_id,
                provider,
                external_charge_id,
                plan_name,
                amount_paid_cents,
                total_refunded_cents,
                paid_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
            RETURNING id
            "#,
        )
        .bind(org_id)
        .bind(event_id)
        .bind(&envelope.provider)
        .bind(envelope.charge_id.as_deref())
        .bind(&plan_name)
        .bind(envelope.amount_cents)
        .bind(envelope.occurred_at)
        .fetch_one(&mut **tx)
        .await?;

        let access_ends_at = interval
            .access_duration_days()
            .map(|days| envelope.occurred_at + time::Duration::days(days));

        let next = next_status_on_payment_success(current);
        sqlx::query(
            r#"
            UPDATE organizations
            SET billing_status = $2,
                subscription_status = 'active',
                access_ends_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .bind(next.unwrap_or(current).as_str())
        .bind(access_ends_at)
        .execute(&mut **tx)
        .await?;

        if next.is_none() && current != BillingStatus::Active {
            tracing::warn!(
                org_id = %org_id,
                current = %current,
                "Payment succeeded for organization in a state that cannot activate"
            );
        }

        // New paid period: metered credits start over.
        sqlx::query(
            "UPDATE organization_usage SET ai_credits_used = 0, updated_at = NOW() WHERE organization_id = $1",
        )
        .bind(org_id)
        .execute(&mut **tx)
        .await?;

        Ok(purchase.0)
    }

    /// Side effects of a first-seen failed payment.
    async fn apply_payment_failed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        org_id: Uuid,
        current: BillingStatus,
    ) -> BillingResult<()> {
        match next_status_on_payment_failure(current) {
            Some(next) => {
                sqlx::query(
                    r#"
                    UPDATE organizations
                    SET billing_status = $2,
                        subscription_status = 'past_due',
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(org_id)
                .bind(next.as_str())
                .execute(&mut **tx)
                .await?;
            }
            None => {
                tracing::info!(
                    org_id = %org_id,
                    current = %current,
                    "Payment failure event for organization not in an active state; no transition"
                );
            }
        }
        Ok(())
    }

    async fn mark_processed(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event_id: Uuid,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE billing_events SET status = 'processed', processed_at = NOW() WHERE id = $1",
        )
        .bind(event_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
