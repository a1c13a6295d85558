//! Common billing and finance enums.
//!
//! Statuses are persisted as snake_case text columns; row structs hold the
//! raw `String` and services convert through `as_str`/`parse` at the edges.

use serde::{Deserialize, Serialize};

/// Derived subscription/access state of an organization.
///
/// Legal transitions:
/// `trial_active -> {trial_ended, active}`; `active <-> past_due`;
/// `{active, past_due, trial_ended} -> blocked`; any non-canceled state
/// `-> canceled` (terminal). Expiry (the sweep) is the only path to
/// `blocked` that does not go through an explicit cancellation or payment
/// failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingStatus {
    TrialActive,
    TrialEnded,
    Active,
    PastDue,
    Blocked,
    Canceled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::TrialActive => "trial_active",
            BillingStatus::TrialEnded => "trial_ended",
            BillingStatus::Active => "active",
            BillingStatus::PastDue => "past_due",
            BillingStatus::Blocked => "blocked",
            BillingStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trial_active" => Some(BillingStatus::TrialActive),
            "trial_ended" => Some(BillingStatus::TrialEnded),
            "active" => Some(BillingStatus::Active),
            "past_due" => Some(BillingStatus::PastDue),
            "blocked" => Some(BillingStatus::Blocked),
            "canceled" => Some(BillingStatus::Canceled),
            _ => None,
        }
    }

    /// Whether the state machine permits moving to `next`.
    pub fn can_transition_to(&self, next: BillingStatus) -> bool {
        use BillingStatus::*;
        if *self == next {
            return false;
        }
        match (*self, next) {
            // Terminal state
            (Canceled, _) => false,
            // Any non-canceled state may cancel
            (_, Canceled) => true,
            (TrialActive, TrialEnded) | (TrialActive, Active) => true,
            (Active, PastDue) | (PastDue, Active) => true,
            (PastDue, Blocked) | (TrialEnded, Blocked) => true,
            // Forced expiry: the sweep blocks an active org whose access
            // deadline lapsed without a renewal
            (Active, Blocked) => true,
            // Recovery from blocked requires a successful payment
            (Blocked, Active) => true,
            (TrialEnded, Active) => true,
            _ => false,
        }
    }

    /// Whether the organization currently has access to the product.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            BillingStatus::TrialActive | BillingStatus::Active | BillingStatus::PastDue
        )
    }
}

impl std::fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing interval of a plan. Immutable reference data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanInterval {
    Monthly,
    Annual,
    /// Custom/manual billing; no automatic access deadline.
    None,
}

impl PlanInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Monthly => "monthly",
            PlanInterval::Annual => "annual",
            PlanInterval::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(PlanInterval::Monthly),
            "annual" => Some(PlanInterval::Annual),
            "none" => Some(PlanInterval::None),
            _ => None,
        }
    }

    /// Days of access a successful payment grants. `None` means no deadline.
    pub fn access_duration_days(&self) -> Option<i64> {
        match self {
            PlanInterval::Monthly => Some(30),
            PlanInterval::Annual => Some(365),
            PlanInterval::None => None,
        }
    }
}

impl std::fmt::Display for PlanInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource types with per-plan entitlement caps and usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Projects,
    Clients,
    Proposals,
    Users,
    StorageBytes,
    AiCredits,
}

impl ResourceKind {
    /// Column holding the live counter in `organization_usage`.
    pub fn counter_column(&self) -> &'static str {
        match self {
            ResourceKind::Projects => "projects_count",
            ResourceKind::Clients => "clients_count",
            ResourceKind::Proposals => "proposals_count",
            ResourceKind::Users => "users_count",
            ResourceKind::StorageBytes => "storage_bytes_used",
            ResourceKind::AiCredits => "ai_credits_used",
        }
    }

    /// Column holding the cap in `entitlements` (NULL = unlimited).
    pub fn cap_column(&self) -> &'static str {
        match self {
            ResourceKind::Projects => "max_projects",
            ResourceKind::Clients => "max_clients",
            ResourceKind::Proposals => "max_proposals",
            ResourceKind::Users => "max_users",
            ResourceKind::StorageBytes => "max_storage_bytes",
            ResourceKind::AiCredits => "ai_credits",
        }
    }

    pub fn all() -> [ResourceKind; 6] {
        [
            ResourceKind::Projects,
            ResourceKind::Clients,
            ResourceKind::Proposals,
            ResourceKind::Users,
            ResourceKind::StorageBytes,
            ResourceKind::AiCredits,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.counter_column())
    }
}

/// Ledger transaction direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "approved" => Some(PaymentStatus::Approved),
            "paid" => Some(PaymentStatus::Paid),
            "rejected" => Some(PaymentStatus::Rejected),
            _ => None,
        }
    }

    /// Whether the transaction counts toward its bank account balance.
    pub fn is_applied(&self) -> bool {
        matches!(self, PaymentStatus::Approved | PaymentStatus::Paid)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
