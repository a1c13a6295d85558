//! Organization billing state.
//!
//! The organization row carries a derived `billing_status` driven by two
//! writers only: the webhook processor (payment facts) and the trial/expiry
//! sweep (wall-clock deadlines). Every write goes through the pure
//! transition helpers here so an illegal transition can never reach the
//! database.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use callsheet_shared::types::{BillingStatus, PlanInterval};

use crate::error::{BillingError, BillingResult};

/// An organization's billing columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrganizationBilling {
    pub id: Uuid,
    pub name: String,
    pub plan: String,
    pub billing_status: String,
    pub subscription_status: Option<String>,
    pub access_ends_at: Option<OffsetDateTime>,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub plan_id: Option<Uuid>,
}

impl OrganizationBilling {
    pub fn status(&self) -> BillingResult<BillingStatus> {
        BillingStatus::parse(&self.billing_status).ok_or_else(|| {
            BillingError::Internal(format!("unknown billing_status '{}'", self.billing_status))
        })
    }
}

/// Immutable plan reference data.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub billing_interval: String,
    pub external_price_id: Option<String>,
    pub is_custom: bool,
}

impl Plan {
    pub fn interval(&self) -> PlanInterval {
        PlanInterval::parse(&self.billing_interval).unwrap_or(PlanInterval::None)
    }
}

/// Status after a successful payment, or `None` when the current state
/// cannot activate (canceled is terminal).
pub fn next_status_on_payment_success(current: BillingStatus) -> Option<BillingStatus> {
    if current == BillingStatus::Active {
        // Renewal; no transition but the access deadline still moves.
        return Some(BillingStatus::Active);
    }
    current
        .can_transition_to(BillingStatus::Active)
        .then_some(BillingStatus::Active)
}

/// Status after a failed payment. Only active organizations fall to
/// past_due; everything else is left untouched.
pub fn next_status_on_payment_failure(current: BillingStatus) -> Option<BillingStatus> {
    current
        .can_transition_to(BillingStatus::PastDue)
        .then_some(BillingStatus::PastDue)
}

/// Status once the access deadline has passed. The only path that removes
/// access without an explicit cancellation event; active orgs whose
/// deadline lapsed without a renewal are blocked directly (forced expiry).
pub fn next_status_on_expiry(current: BillingStatus) -> Option<BillingStatus> {
    current
        .can_transition_to(BillingStatus::Blocked)
        .then_some(BillingStatus::Blocked)
}

/// Status once the trial deadline has passed without a payment.
pub fn next_status_on_trial_end(current: BillingStatus) -> Option<BillingStatus> {
    current
        .can_transition_to(BillingStatus::TrialEnded)
        .then_some(BillingStatus::TrialEnded)
}

/// Service for reading and transitioning organization billing state.
pub struct SubscriptionService {
    pool: PgPool,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_organization(&self, org_id: Uuid) -> BillingResult<OrganizationBilling> {
        let org: Option<OrganizationBilling> = sqlx::query_as(
            r#"
            SELECT id, name, plan, billing_status, subscription_status,
                   access_ends_at, trial_ends_at, plan_id
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        org.ok_or_else(|| BillingError::NotFound(format!("organization {}", org_id)))
    }

    pub async fn get_plan_by_code(&self, code: &str) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, code, name, billing_interval, external_price_id, is_custom
            FROM plans
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan '{}'", code)))
    }

    /// Explicit cancellation. Terminal; allowed from any non-canceled state.
    pub async fn cancel(&self, org_id: Uuid) -> BillingResult<()> {
        let org = self.get_organization(org_id).await?;
        let current = org.status()?;

        if !current.can_transition_to(BillingStatus::Canceled) {
            return Err(BillingError::Conflict(format!(
                "organization {} is already canceled",
                org_id
            )));
        }

        sqlx::query(
            r#"
            UPDATE organizations
            SET billing_status = 'canceled',
                subscription_status = 'canceled',
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(org_id = %org_id, previous = %current, "Organization canceled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BillingStatus::*;

    #[test]
    fn test_payment_success_activates() {
        assert_eq!(next_status_on_payment_success(TrialActive), Some(Active));
        assert_eq!(next_status_on_payment_success(TrialEnded), Some(Active));
        assert_eq!(next_status_on_payment_success(PastDue), Some(Active));
        assert_eq!(next_status_on_payment_success(Blocked), Some(Active));
    }

    #[test]
    fn test_payment_success_renewal_stays_active() {
        assert_eq!(next_status_on_payment_success(Active), Some(Active));
    }

    #[test]
    fn test_payment_success_never_resurrects_canceled() {
        assert_eq!(next_status_on_payment_success(Canceled), None);
    }

    #[test]
    fn test_payment_failure_only_from_active() {
        assert_eq!(next_status_on_payment_failure(Active), Some(PastDue));
        assert_eq!(next_status_on_payment_failure(TrialActive), None);
        assert_eq!(next_status_on_payment_failure(Blocked), None);
        assert_eq!(next_status_on_payment_failure(Canceled), None);
    }

    #[test]
    fn test_expiry_blocks_lapsed_states() {
        assert_eq!(next_status_on_expiry(PastDue), Some(Blocked));
        assert_eq!(next_status_on_expiry(TrialEnded), Some(Blocked));
        assert_eq!(next_status_on_expiry(Active), Some(Blocked));
        assert_eq!(next_status_on_expiry(Canceled), None);
        assert_eq!(next_status_on_expiry(Blocked), None);
    }

    #[test]
    fn test_trial_end_transition() {
        assert_eq!(next_status_on_trial_end(TrialActive), Some(TrialEnded));
        assert_eq!(next_status_on_trial_end(Active), None);
        assert_eq!(next_status_on_trial_end(Canceled), None);
    }

    #[test]
    fn test_plan_interval_fallback() {
        let plan = Plan {
            id: Uuid::new_v4(),
            code: "studio_custom".into(),
            name: "Studio Custom".into(),
            billing_interval: "bogus".into(),
            external_price_id: None,
            is_custom: true,
        };
        assert_eq!(plan.interval(), PlanInterval::None);
    }
}
