// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // BillingError carries descriptive context strings
#![allow(clippy::too_many_arguments)] // Webhook apply paths thread several identifiers
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Callsheet Billing Module
//!
//! Payment-provider integration, subscription state and the refund
//! lifecycle for production companies.
//!
//! ## Features
//!
//! - **Webhook Processing**: Exactly-once handling of provider payment events
//! - **Subscription State**: Trial, activation, dunning and blocking transitions
//! - **Entitlements**: Per-plan resource caps and usage counters
//! - **Proration**: Consumption-based refund maximums, integer cents only
//! - **Refund Lifecycle**: Request, decide, execute, confirm, with audit trail
//! - **Expiry Sweep**: Scheduled notices and access revocation
//! - **Invariants**: Runnable consistency checks over the billing tables

pub mod client;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod notify;
pub mod proration;
pub mod refund;
pub mod subscriptions;
pub mod sweep;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Client
pub use client::{HttpProviderClient, PaymentProviderClient, ProviderConfig, ProviderRefund};

// Entitlement
pub use entitlement::{EntitlementCaps, EntitlementService, UsageCounters};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{ActorType, RefundEvent, RefundEventBuilder, RefundEventLogger, RefundEventType};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Notify
pub use notify::{BillingNotifier, ExpiryNotice, HttpNotifier, NoopNotifier};

// Proration
pub use proration::{
    check_eligibility, max_refundable, prorated_consumed_value, EligibilityDecision,
    IneligibleReason, PurchaseSnapshot, REFUND_WINDOW_DAYS,
};

// Refund
pub use refund::{
    settled_amount, BillingPurchase, RefundRequest, RefundService, RefundStatus, RefundTransaction,
};

// Subscriptions
pub use subscriptions::{OrganizationBilling, Plan, SubscriptionService};

// Sweep
pub use sweep::{ExpirySweep, SweepReport, NOTICE_OFFSETS_DAYS};

// Webhooks
pub use webhooks::{
    parse_envelope, PaymentEventEnvelope, PaymentOutcome, ProcessingOutcome, WebhookConfig,
    WebhookProcessor,
};
