//! Trial and access-expiry sweep.
//!
//! Runs on a schedule from the worker. Two jobs per pass: warn
//! organizations whose paid access ends in exactly 5, 1 or 0 whole days,
//! and block the ones whose deadline has passed. Day counts truncate, so
//! an organization is warned at most once per offset; the last-notified
//! offset is recorded to keep an hourly schedule from repeating the same
//! notice all day.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use callsheet_shared::types::BillingStatus;

use crate::error::{BillingError, BillingResult};
use crate::notify::{BillingNotifier, ExpiryNotice};
use crate::subscriptions::{next_status_on_expiry, next_status_on_trial_end};

/// Whole-day offsets before expiry at which a notice goes out.
pub const NOTICE_OFFSETS_DAYS: [i64; 3] = [5, 1, 0];

/// The notice offset that applies right now, if any.
///
/// Returns `Some(days)` only when the truncated whole-day count until
/// `access_ends_at` is exactly one of the notice offsets. Past deadlines
/// return `None`; expiry handles those.
pub fn notice_offset_for(access_ends_at: OffsetDateTime, now: OffsetDateTime) -> Option<i64> {
    if access_ends_at < now {
        return None;
    }
    let days_remaining = (access_ends_at - now).whole_days();
    NOTICE_OFFSETS_DAYS.contains(&days_remaining).then_some(days_remaining)
}

/// Summary of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub notices_sent: u64,
    pub organizations_blocked: u64,
    pub trials_ended: u64,
}

/// Scheduled billing sweep.
pub struct ExpirySweep {
    pool: PgPool,
}

impl ExpirySweep {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run one full pass.
    pub async fn run(&self, notifier: &dyn BillingNotifier) -> BillingResult<SweepReport> {
        let notices_sent = self.send_expiry_notices(notifier).await?;
        let trials_ended = self.end_expired_trials().await?;
        let organizations_blocked = self.block_expired().await?;
        let report = SweepReport {
            notices_sent,
            organizations_blocked,
            trials_ended,
        };

        tracing::info!(
            notices_sent = report.notices_sent,
            trials_ended = report.trials_ended,
            organizations_blocked = report.organizations_blocked,
            "Billing sweep completed"
        );
        Ok(report)
    }

    /// Warn organizations whose access ends at one of the notice offsets.
    async fn send_expiry_notices(&self, notifier: &dyn BillingNotifier) -> BillingResult<u64> {
        let now = OffsetDateTime::now_utc();
        let candidates: Vec<(Uuid, String, OffsetDateTime, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT id, name, access_ends_at, last_expiry_notice_days
            FROM organizations
            WHERE billing_status IN ('active', 'past_due')
              AND access_ends_at IS NOT NULL
              AND access_ends_at >= NOW()
              AND access_ends_at <= NOW() + INTERVAL '6 days'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sent = 0u64;
        for (org_id, name, access_ends_at, last_notice) in candidates {
            let offset = match notice_offset_for(access_ends_at, now) {
                Some(offset) => offset,
                None => continue,
            };
            if last_notice == Some(offset) {
                continue;
            }

            let notice = ExpiryNotice {
                organization_id: org_id,
                organization_name: name,
                days_remaining: offset,
            };
            match notifier.send_expiry_notice(&notice).await {
                Ok(()) => {
                    // Marker advances only on delivery; a failed send is
                    // retried on the next pass.
                    sqlx::query(
                        "UPDATE organizations SET last_expiry_notice_days = $2 WHERE id = $1",
                    )
                    .bind(org_id)
                    .bind(offset)
                    .execute(&self.pool)
                    .await?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!(org_id = %org_id, error = %e, "Expiry notice delivery failed");
                }
            }
        }
        Ok(sent)
    }

    /// Move trial organizations past their trial deadline to trial_ended.
    async fn end_expired_trials(&self) -> BillingResult<u64> {
        let expired: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, billing_status
            FROM organizations
            WHERE billing_status = 'trial_active'
              AND trial_ends_at IS NOT NULL
              AND trial_ends_at < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ended = 0u64;
        for (org_id, raw) in expired {
            let current = self.parse_status(&raw)?;
            if let Some(next) = next_status_on_trial_end(current) {
                sqlx::query(
                    "UPDATE organizations SET billing_status = $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(org_id)
                .bind(next.as_str())
                .execute(&self.pool)
                .await?;
                tracing::info!(org_id = %org_id, "Trial ended");
                ended += 1;
            }
        }
        Ok(ended)
    }

    /// Block organizations whose paid access deadline has passed.
    async fn block_expired(&self) -> BillingResult<u64> {
        let expired: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, billing_status
            FROM organizations
            WHERE billing_status IN ('active', 'past_due', 'trial_ended')
              AND access_ends_at IS NOT NULL
              AND access_ends_at < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut blocked = 0u64;
        for (org_id, raw) in expired {
            let current = self.parse_status(&raw)?;
            if let Some(next) = next_status_on_expiry(current) {
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
                .execute(&self.pool)
                .await?;
                tracing::warn!(org_id = %org_id, previous = %current, "Organization blocked on expiry");
                blocked += 1;
            }
        }
        Ok(blocked)
    }

    fn parse_status(&self, raw: &str) -> BillingResult<BillingStatus> {
        BillingStatus::parse(raw)
            .ok_or_else(|| BillingError::Internal(format!("unknown billing_status '{}'", raw)))
    }
}
