//! Money arithmetic in integer minor units ("cents").
//!
//! All amounts in the system are `i64` cents in a single currency per
//! organization. Divisions truncate toward zero; intermediate and final
//! amounts are non-negative. No floating point is used for money.

use crate::types::{PaymentStatus, TransactionKind};

/// Integer minor-unit amount.
pub type Cents = i64;

/// Clamp a possibly-negative amount to zero.
pub fn non_negative(amount: Cents) -> Cents {
    amount.max(0)
}

/// Clamp `amount` into `[0, cap]`.
pub fn clamp_to_cap(amount: Cents, cap: Cents) -> Cents {
    amount.clamp(0, cap.max(0))
}

/// Prorate `amount` across `duration_days`, truncating.
///
/// Returns 0 when no days have elapsed and the full `amount` once
/// `days_used >= duration_days`. Uses i128 for the intermediate product so
/// large amounts cannot overflow.
pub fn prorate(amount: Cents, days_used: i64, duration_days: i64) -> Cents {
    let amount = non_negative(amount);
    if duration_days <= 0 {
        return amount;
    }
    let days_used = days_used.max(0);
    if days_used >= duration_days {
        return amount;
    }
    ((amount as i128 * days_used as i128) / duration_days as i128) as Cents
}

/// Signed contribution of a ledger transaction to its bank account balance.
///
/// Only transactions in an applied payment status (approved or paid) count;
/// income adds, expense subtracts.
pub fn signed_contribution(kind: TransactionKind, status: PaymentStatus, amount: Cents) -> Cents {
    if !status.is_applied() {
        return 0;
    }
    match kind {
        TransactionKind::Income => non_negative(amount),
        TransactionKind::Expense => -non_negative(amount),
    }
}

/// Add an executed refund amount to a running refund total.
///
/// Returns `None` when the increment would push the total past the amount
/// originally paid. Callers must treat that as an invariant violation and
/// abort rather than persist.
pub fn checked_refund_total(
    total_refunded: Cents,
    executed: Cents,
    amount_paid: Cents,
) -> Option<Cents> {
    if executed < 0 || total_refunded < 0 {
        return None;
    }
    let new_total = total_refunded.checked_add(executed)?;
    if new_total > amount_paid {
        return None;
    }
    Some(new_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prorate_zero_days() {
        assert_eq!(prorate(10_000, 0, 30), 0);
    }

    #[test]
    fn test_prorate_full_duration() {
        assert_eq!(prorate(10_000, 30, 30), 10_000);
        assert_eq!(prorate(10_000, 45, 30), 10_000);
    }

    #[test]
    fn test_prorate_truncates() {
        // 10000 * 7 / 30 = 2333.33.. -> 2333
        assert_eq!(prorate(10_000, 7, 30), 2_333);
    }

    #[test]
    fn test_prorate_negative_days_clamped() {
        assert_eq!(prorate(10_000, -3, 30), 0);
    }

    #[test]
    fn test_prorate_large_amount_no_overflow() {
        let amount = i64::MAX / 2;
        let result = prorate(amount, 15, 30);
        assert_eq!(result, amount / 2);
    }

    #[test]
    fn test_signed_contribution_applied_income() {
        assert_eq!(
            signed_contribution(TransactionKind::Income, PaymentStatus::Paid, 500),
            500
        );
        assert_eq!(
            signed_contribution(TransactionKind::Income, PaymentStatus::Approved, 500),
            500
        );
    }

    #[test]
    fn test_signed_contribution_applied_expense() {
        assert_eq!(
            signed_contribution(TransactionKind::Expense, PaymentStatus::Approved, 500),
            -500
        );
    }

    #[test]
    fn test_signed_contribution_pending_is_zero() {
        assert_eq!(
            signed_contribution(TransactionKind::Income, PaymentStatus::Pending, 500),
            0
        );
        assert_eq!(
            signed_contribution(TransactionKind::Expense, PaymentStatus::Rejected, 500),
            0
        );
    }

    #[test]
    fn test_checked_refund_total_within_cap() {
        assert_eq!(checked_refund_total(1_000, 500, 10_000), Some(1_500));
        assert_eq!(checked_refund_total(9_500, 500, 10_000), Some(10_000));
    }

    #[test]
    fn test_checked_refund_total_exceeds_cap() {
        assert_eq!(checked_refund_total(9_501, 500, 10_000), None);
    }

    #[test]
    fn test_checked_refund_total_rejects_negative() {
        assert_eq!(checked_refund_total(-1, 500, 10_000), None);
        assert_eq!(checked_refund_total(0, -500, 10_000), None);
    }

    #[test]
    fn test_clamp_to_cap() {
        assert_eq!(clamp_to_cap(-5, 100), 0);
        assert_eq!(clamp_to_cap(50, 100), 50);
        assert_eq!(clamp_to_cap(150, 100), 100);
        assert_eq!(clamp_to_cap(150, -10), 0);
    }
}
