//! Refund eligibility and proration engine.
//!
//! Pure computation over a purchase snapshot; no I/O and no floating point.
//! The refund lifecycle calls these at request time and snapshots the
//! results onto the refund request row, so the numbers a platform admin
//! approves against are exactly the numbers the requester saw.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use callsheet_shared::money::{self, Cents};

/// Days after payment during which a refund may be requested.
pub const REFUND_WINDOW_DAYS: i64 = 7;

/// Minimal purchase fields the engine needs.
#[derive(Debug, Clone)]
pub struct PurchaseSnapshot {
    pub plan_name: String,
    pub amount_paid_cents: Cents,
    pub total_refunded_cents: Cents,
    pub paid_at: OffsetDateTime,
}

/// Plan duration used for consumption proration.
///
/// Annual plans prorate over 365 days, everything else over 30. Day counts
/// truncate, so day `duration` of a `duration`-day plan is fully consumed.
pub fn plan_duration_days(plan_name: &str) -> i64 {
    if plan_name.to_ascii_lowercase().contains("annual") {
        365
    } else {
        30
    }
}

/// Value of the purchase consumed by elapsed calendar days, in cents.
pub fn prorated_consumed_value(purchase: &PurchaseSnapshot, now: OffsetDateTime) -> Cents {
    let duration = plan_duration_days(&purchase.plan_name);
    let days_used = (now - purchase.paid_at).whole_days().max(0);
    money::prorate(purchase.amount_paid_cents, days_used, duration)
}

/// Maximum refundable amount given already-refunded and consumed value.
///
/// Never exceeds what remains of the original payment and never goes
/// negative.
pub fn max_refundable(purchase: &PurchaseSnapshot, consumed_usage_cents: Cents) -> Cents {
    let remaining_cap =
        money::non_negative(purchase.amount_paid_cents - purchase.total_refunded_cents);
    let raw = purchase.amount_paid_cents
        - purchase.total_refunded_cents
        - money::non_negative(consumed_usage_cents);
    money::clamp_to_cap(raw, remaining_cap)
}

/// Why a purchase is not eligible for a refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IneligibleReason {
    OutsideWindow,
    AlreadyFullyRefunded,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IneligibleReason::OutsideWindow => "outside_7_day_window",
            IneligibleReason::AlreadyFullyRefunded => "already_fully_refunded",
        }
    }
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityDecision {
    pub eligible: bool,
    pub reason: Option<IneligibleReason>,
    /// Deadline snapshot; stored on the refund request at creation.
    pub eligible_until: OffsetDateTime,
}

/// Check whether a purchase can be refunded at `now`.
pub fn check_eligibility(purchase: &PurchaseSnapshot, now: OffsetDateTime) -> EligibilityDecision {
    let eligible_until = purchase.paid_at + Duration::days(REFUND_WINDOW_DAYS);

    if now > eligible_until {
        return EligibilityDecision {
            eligible: false,
            reason: Some(IneligibleReason::OutsideWindow),
            eligible_until,
        };
    }

    if purchase.total_refunded_cents >= purchase.amount_paid_cents {
        return EligibilityDecision {
            eligible: false,
            reason: Some(IneligibleReason::AlreadyFullyRefunded),
            eligible_until,
        };
    }

    EligibilityDecision {
        eligible: true,
        reason: None,
        eligible_until,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn purchase(plan: &str, paid: Cents, refunded: Cents, paid_days_ago: i64) -> PurchaseSnapshot {
        PurchaseSnapshot {
            plan_name: plan.to_string(),
            amount_paid_cents: paid,
            total_refunded_cents: refunded,
            paid_at: OffsetDateTime::now_utc() - Duration::days(paid_days_ago),
        }
    }

    #[test]
    fn test_plan_duration() {
        assert_eq!(plan_duration_days("studio_annual"), 365);
        assert_eq!(plan_duration_days("Annual Pro"), 365);
        assert_eq!(plan_duration_days("studio_monthly"), 30);
        assert_eq!(plan_duration_days("custom"), 30);
    }

    #[test]
    fn test_consumed_value_day_zero() {
        let p = purchase("studio_monthly", 10_000, 0, 0);
        assert_eq!(prorated_consumed_value(&p, OffsetDateTime::now_utc()), 0);
    }

    #[test]
    fn test_consumed_value_fully_elapsed() {
        let p = purchase("studio_monthly", 10_000, 0, 30);
        assert_eq!(
            prorated_consumed_value(&p, OffsetDateTime::now_utc()),
            10_000
        );
        let p = purchase("studio_monthly", 10_000, 0, 90);
        assert_eq!(
            prorated_consumed_value(&p, OffsetDateTime::now_utc()),
            10_000
        );
    }

    #[test]
    fn test_annual_purchase_30_days_in() {
        // 36,500 cents over 365 days, 30 days used -> 3,000 exactly
        let p = purchase("studio_annual", 36_500, 0, 30);
        let consumed = prorated_consumed_value(&p, OffsetDateTime::now_utc());
        assert!(
            (2_500..=3_500).contains(&consumed),
            "expected ~3000, got {}",
            consumed
        );
    }

    #[test]
    fn test_max_refundable_consumption_reduces() {
        let p = purchase("studio_monthly", 10_000, 0, 0);
        assert_eq!(max_refundable(&p, 1_500), 8_500);
    }

    #[test]
    fn test_max_refundable_prior_refund_reduces() {
        let p = purchase("studio_monthly", 10_000, 1_000, 0);
        assert_eq!(max_refundable(&p, 1_500), 7_500);
    }

    #[test]
    fn test_max_refundable_never_negative() {
        let p = purchase("studio_monthly", 10_000, 9_000, 0);
        assert_eq!(max_refundable(&p, 5_000), 0);
    }

    #[test]
    fn test_max_refundable_negative_consumed_treated_as_zero() {
        let p = purchase("studio_monthly", 10_000, 0, 0);
        assert_eq!(max_refundable(&p, -500), 10_000);
    }

    #[test]
    fn test_eligibility_inside_window() {
        let p = purchase("studio_monthly", 10_000, 0, 3);
        let d = check_eligibility(&p, OffsetDateTime::now_utc());
        assert!(d.eligible);
        assert_eq!(d.reason, None);
        assert_eq!(d.eligible_until, p.paid_at + Duration::days(7));
    }

    #[test]
    fn test_eligibility_eight_days_out() {
        let p = purchase("studio_monthly", 10_000, 0, 8);
        let d = check_eligibility(&p, OffsetDateTime::now_utc());
        assert!(!d.eligible);
        assert_eq!(d.reason, Some(IneligibleReason::OutsideWindow));
        assert_eq!(d.eligible_until, p.paid_at + Duration::days(7));
    }

    #[test]
    fn test_eligibility_fully_refunded() {
        let p = purchase("studio_monthly", 10_000, 10_000, 2);
        let d = check_eligibility(&p, OffsetDateTime::now_utc());
        assert!(!d.eligible);
        assert_eq!(d.reason, Some(IneligibleReason::AlreadyFullyRefunded));
    }

    #[test]
    fn test_ineligible_reason_strings() {
        assert_eq!(
            IneligibleReason::OutsideWindow.to_string(),
            "outside_7_day_window"
        );
        assert_eq!(
            IneligibleReason::AlreadyFullyRefunded.to_string(),
            "already_fully_refunded"
        );
    }

    proptest! {
        // Eligibility is decided solely by the 7-day deadline (absent the
        // fully-refunded condition), for any offset in hours.
        #[test]
        fn prop_eligibility_window(offset_hours in 0i64..24 * 60) {
            let paid_at = OffsetDateTime::now_utc() - Duration::hours(offset_hours);
            let p = PurchaseSnapshot {
                plan_name: "studio_monthly".to_string(),
                amount_paid_cents: 10_000,
                total_refunded_cents: 0,
                paid_at,
            };
            let now = OffsetDateTime::now_utc();
            let d = check_eligibility(&p, now);
            prop_assert_eq!(d.eligible, now <= paid_at + Duration::days(7));
        }

        // Consumed value is monotonically non-decreasing in elapsed days and
        // bounded by the amount paid.
        #[test]
        fn prop_consumed_value_monotonic(
            amount in 1i64..1_000_000,
            days in 0i64..400,
        ) {
            let now = OffsetDateTime::now_utc();
            let earlier = PurchaseSnapshot {
                plan_name: "studio_annual".to_string(),
                amount_paid_cents: amount,
                total_refunded_cents: 0,
                paid_at: now - Duration::days(days),
            };
            let later = PurchaseSnapshot {
                paid_at: now - Duration::days(days + 1),
                ..earlier.clone()
            };
            let v_earlier = prorated_consumed_value(&earlier, now);
            let v_later = prorated_consumed_value(&later, now);
            prop_assert!(v_earlier <= v_later);
            prop_assert!(v_earlier >= 0);
            prop_assert!(v_later <= amount);
        }

        // The refundable amount never exceeds what remains of the payment.
        #[test]
        fn prop_max_refundable_bounded(
            paid in 0i64..1_000_000,
            refunded_frac in 0i64..=100,
            consumed in -1_000i64..1_000_000,
        ) {
            let refunded = paid * refunded_frac / 100;
            let p = PurchaseSnapshot {
                plan_name: "studio_monthly".to_string(),
                amount_paid_cents: paid,
                total_refunded_cents: refunded,
                paid_at: OffsetDateTime::now_utc(),
            };
            let cap = max_refundable(&p, consumed);
            prop_assert!(cap >= 0);
            prop_assert!(cap <= paid - refunded);
        }
    }
}
