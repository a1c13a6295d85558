// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Subsystem
//!
//! Tests critical boundary conditions in:
//! - Webhook envelope parsing (PAY-W01 to PAY-W05)
//! - Proration and refund eligibility (PAY-P01 to PAY-P09)
//! - Billing state machine (PAY-S01 to PAY-S06)
//! - Refund lifecycle transitions (PAY-R01 to PAY-R04)
//! - Entitlement caps (PAY-E01 to PAY-E03)

#[cfg(test)]
mod webhook_edge_tests {
    use crate::webhooks::*;

    // =========================================================================
    // PAY-W01: Zero-amount successful payment is accepted (full-discount plan)
    // =========================================================================
    #[test]
    fn test_zero_amount_success_accepted() {
        let payload = r#"{"id": "evt_free", "type": "payment.succeeded",
                          "organization_id": "7f0b1c6a-1111-4a2b-9c3d-222233334444",
                          "amount_cents": 0}"#;
        let env = parse_envelope(payload).unwrap();
        assert_eq!(env.amount_cents, 0);
        assert_eq!(env.outcome, Some(PaymentOutcome::Succeeded));
    }

    // =========================================================================
    // PAY-W02: Failure events carry no amount and still parse
    // =========================================================================
    #[test]
    fn test_failure_without_amount() {
        let payload = r#"{"id": "evt_f", "type": "payment.failed",
                          "organization_id": "7f0b1c6a-1111-4a2b-9c3d-222233334444"}"#;
        let env = parse_envelope(payload).unwrap();
        assert_eq!(env.outcome, Some(PaymentOutcome::Failed));
        assert_eq!(env.amount_cents, 0);
    }

    // =========================================================================
    // PAY-W03: Negative amount on a failure event is tolerated (some
    // providers report the reversal as negative); only successes are strict
    // =========================================================================
    #[test]
    fn test_negative_amount_on_failure_tolerated() {
        let payload = r#"{"id": "evt_f2", "type": "payment.failed",
                          "organization_id": "7f0b1c6a-1111-4a2b-9c3d-222233334444",
                          "amount_cents": -500}"#;
        assert!(parse_envelope(payload).is_ok());
    }

    // =========================================================================
    // PAY-W04: Unknown fields in the payload are ignored, not rejected
    // =========================================================================
    #[test]
    fn test_unknown_fields_ignored() {
        let payload = r#"{"id": "evt_x", "type": "payment.succeeded",
                          "organization_id": "7f0b1c6a-1111-4a2b-9c3d-222233334444",
                          "amount_cents": 100, "api_version": "2024-01-01",
                          "livemode": true}"#;
        assert!(parse_envelope(payload).is_ok());
    }

    // =========================================================================
    // PAY-W05: Invalid occurred_at timestamp falls back to now
    // =========================================================================
    #[test]
    fn test_out_of_range_timestamp_falls_back() {
        let payload = r#"{"id": "evt_t", "type": "payment.succeeded",
                          "organization_id": "7f0b1c6a-1111-4a2b-9c3d-222233334444",
                          "amount_cents": 100, "occurred_at": 999999999999999}"#;
        let env = parse_envelope(payload).unwrap();
        let now = time::OffsetDateTime::now_utc();
        assert!((now - env.occurred_at).whole_seconds().abs() < 5);
    }
}

#[cfg(test)]
mod proration_edge_tests {
    use crate::proration::*;
    use time::{Duration, OffsetDateTime};

    fn purchase(plan: &str, paid: i64, refunded: i64, age: Duration) -> PurchaseSnapshot {
        PurchaseSnapshot {
            plan_name: plan.to_string(),
            amount_paid_cents: paid,
            total_refunded_cents: refunded,
            paid_at: OffsetDateTime::now_utc() - age,
        }
    }

    // =========================================================================
    // PAY-P01: Refund requested at exactly 7 days is still eligible
    // =========================================================================
    #[test]
    fn test_window_boundary_exactly_seven_days() {
        let p = purchase("studio_monthly", 10_000, 0, Duration::days(7));
        let d = check_eligibility(&p, p.paid_at + Duration::days(7));
        assert!(d.eligible);
    }

    // =========================================================================
    // PAY-P02: One second past the deadline is ineligible
    // =========================================================================
    #[test]
    fn test_window_boundary_one_second_late() {
        let p = purchase("studio_monthly", 10_000, 0, Duration::days(7));
        let d = check_eligibility(&p, p.paid_at + Duration::days(7) + Duration::seconds(1));
        assert!(!d.eligible);
        assert_eq!(d.reason, Some(IneligibleReason::OutsideWindow));
    }

    // =========================================================================
    // PAY-P03: 23 hours of use is day zero; nothing consumed
    // =========================================================================
    #[test]
    fn test_partial_first_day_consumes_nothing() {
        let p = purchase("studio_monthly", 10_000, 0, Duration::hours(23));
        assert_eq!(prorated_consumed_value(&p, OffsetDateTime::now_utc()), 0);
    }

    // =========================================================================
    // PAY-P04: Day 30 of a 30-day plan is fully consumed
    // =========================================================================
    #[test]
    fn test_day_thirty_fully_consumed() {
        let p = purchase("studio_monthly", 10_000, 0, Duration::days(30));
        assert_eq!(
            prorated_consumed_value(&p, OffsetDateTime::now_utc()),
            10_000
        );
    }

    // =========================================================================
    // PAY-P05: Day 29 of a 30-day plan leaves one day's value
    // =========================================================================
    #[test]
    fn test_day_twenty_nine_leaves_remainder() {
        let p = purchase("studio_monthly", 30_000, 0, Duration::days(29));
        let consumed = prorated_consumed_value(&p, OffsetDateTime::now_utc());
        assert_eq!(consumed, 29_000);
        assert_eq!(max_refundable(&p, consumed), 1_000);
    }

    // =========================================================================
    // PAY-P06: Truncating division never rounds consumption up
    // =========================================================================
    #[test]
    fn test_truncation_favors_the_customer() {
        // 9999 cents over 30 days, 1 day used: 9999/30 = 333.3 -> 333
        let p = purchase("studio_monthly", 9_999, 0, Duration::days(1));
        assert_eq!(prorated_consumed_value(&p, OffsetDateTime::now_utc()), 333);
    }

    // =========================================================================
    // PAY-P07: Zero-amount purchase is immediately "fully refunded"
    // =========================================================================
    #[test]
    fn test_zero_amount_purchase_ineligible() {
        let p = purchase("studio_monthly", 0, 0, Duration::days(1));
        let d = check_eligibility(&p, OffsetDateTime::now_utc());
        assert!(!d.eligible);
        assert_eq!(d.reason, Some(IneligibleReason::AlreadyFullyRefunded));
    }

    // =========================================================================
    // PAY-P08: Prior partial refund plus consumption can zero the maximum
    // =========================================================================
    #[test]
    fn test_refund_and_consumption_exhaust_maximum() {
        let p = purchase("studio_monthly", 10_000, 6_000, Duration::days(15));
        let consumed = prorated_consumed_value(&p, OffsetDateTime::now_utc());
        assert_eq!(consumed, 5_000);
        // 10000 - 6000 - 5000 < 0, clamped to 0
        assert_eq!(max_refundable(&p, consumed), 0);
    }

    // =========================================================================
    // PAY-P09: Annual plan uses the 365-day denominator
    // =========================================================================
    #[test]
    fn test_annual_denominator() {
        let p = purchase("studio_annual", 73_000, 0, Duration::days(100));
        // 73000 * 100 / 365 = 20000
        assert_eq!(
            prorated_consumed_value(&p, OffsetDateTime::now_utc()),
            20_000
        );
    }
}

#[cfg(test)]
mod state_machine_edge_tests {
    use callsheet_shared::types::BillingStatus::{self, *};

    use crate::subscriptions::*;

    // =========================================================================
    // PAY-S01: Canceled is terminal against every input
    // =========================================================================
    #[test]
    fn test_canceled_is_terminal() {
        assert_eq!(next_status_on_payment_success(Canceled), None);
        assert_eq!(next_status_on_payment_failure(Canceled), None);
        assert_eq!(next_status_on_expiry(Canceled), None);
        assert_eq!(next_status_on_trial_end(Canceled), None);
        for target in [TrialActive, TrialEnded, Active, PastDue, Blocked] {
            assert!(!Canceled.can_transition_to(target));
        }
    }

    // =========================================================================
    // PAY-S02: Payment failure during trial does not touch the trial
    // =========================================================================
    #[test]
    fn test_failure_during_trial_ignored() {
        assert_eq!(next_status_on_payment_failure(TrialActive), None);
        assert_eq!(next_status_on_payment_failure(TrialEnded), None);
    }

    // =========================================================================
    // PAY-S03: A blocked organization recovers through payment
    // =========================================================================
    #[test]
    fn test_blocked_recovers_on_payment() {
        assert_eq!(next_status_on_payment_success(Blocked), Some(Active));
    }

    // =========================================================================
    // PAY-S04: Access flags follow the status
    // =========================================================================
    #[test]
    fn test_access_by_status() {
        assert!(TrialActive.has_access());
        assert!(Active.has_access());
        assert!(PastDue.has_access());
        assert!(!TrialEnded.has_access());
        assert!(!Blocked.has_access());
        assert!(!Canceled.has_access());
    }

    // =========================================================================
    // PAY-S05: Every status string round-trips through parse
    // =========================================================================
    #[test]
    fn test_status_round_trip() {
        for status in [TrialActive, TrialEnded, Active, PastDue, Blocked, Canceled] {
            assert_eq!(BillingStatus::parse(status.as_str()), Some(status));
        }
    }

    // =========================================================================
    // PAY-S06: Out-of-order delivery: failure after recovery does not block
    // =========================================================================
    #[test]
    fn test_stale_failure_after_recovery() {
        // Org recovered to active; a late failure event legitimately moves it
        // to past_due again, but a late failure while blocked does nothing.
        assert_eq!(next_status_on_payment_failure(Active), Some(PastDue));
        assert_eq!(next_status_on_payment_failure(Blocked), None);
    }
}

#[cfg(test)]
mod refund_lifecycle_edge_tests {
    use crate::refund::RefundStatus::{self, *};

    // =========================================================================
    // PAY-R01: No transition skips the processing state
    // =========================================================================
    #[test]
    fn test_no_shortcut_to_refunded() {
        assert!(!Requested.can_transition_to(Refunded));
        assert!(!Approved.can_transition_to(Refunded));
    }

    // =========================================================================
    // PAY-R02: A decided request cannot be re-decided
    // =========================================================================
    #[test]
    fn test_no_redecision() {
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Approved));
    }

    // =========================================================================
    // PAY-R03: Failed executions retry through processing, or settle late
    // when the provider's proof arrives after the failure was recorded
    // =========================================================================
    #[test]
    fn test_failed_retries_or_settles_late() {
        assert!(Failed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Refunded));
        assert!(!Failed.can_transition_to(Approved));
        assert!(!Failed.can_transition_to(Requested));
    }

    // =========================================================================
    // PAY-R04: Self-transitions are all illegal
    // =========================================================================
    #[test]
    fn test_no_self_transitions() {
        for s in [
            Requested, Approved, Rejected, Canceled, Processing, Refunded, Failed,
        ] {
            assert!(!s.can_transition_to(s), "{} -> {} should be illegal", s, s);
        }
    }

    #[test]
    fn test_unknown_status_string() {
        assert_eq!(RefundStatus::parse("REFUNDED"), None);
    }
}

#[cfg(test)]
mod entitlement_edge_tests {
    use crate::entitlement::within_cap;

    // =========================================================================
    // PAY-E01: A cap of zero admits nothing
    // =========================================================================
    #[test]
    fn test_zero_cap() {
        assert!(!within_cap(0, 1, Some(0)));
        assert!(within_cap(0, 0, Some(0)));
    }

    // =========================================================================
    // PAY-E02: Over-cap usage (after a downgrade) blocks further use but
    // does not panic
    // =========================================================================
    #[test]
    fn test_usage_above_cap_after_downgrade() {
        assert!(!within_cap(50, 1, Some(10)));
        assert!(!within_cap(50, 0, Some(10)));
    }

    // =========================================================================
    // PAY-E03: Negative delta always fits (releasing usage)
    // =========================================================================
    #[test]
    fn test_negative_request_fits() {
        assert!(within_cap(10, -1, Some(10)));
    }
}
