#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Callsheet Shared Types
//!
//! Leaf crate with no I/O. Holds the money arithmetic every other crate
//! depends on and the common billing/finance enums.

pub mod money;
pub mod types;

pub use money::Cents;
pub use types::{BillingStatus, PaymentStatus, PlanInterval, ResourceKind, TransactionKind};
