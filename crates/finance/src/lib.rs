// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Callsheet Finance Module
//!
//! Project budgets and the bank-account ledger.
//!
//! ## Features
//!
//! - **Budget Matching**: Attach expense transactions to project budget lines
//! - **Auto-Approval**: Approve expenses that fit the remaining approved budget
//! - **Balance Reconciliation**: Recompute cached balances from the ledger

pub mod budget;
pub mod error;
pub mod reconcile;

// Budget
pub use budget::{
    fits_remaining, match_budget_line, remaining_budget, BudgetLine, BudgetService,
    ExpenseProcessing,
};

// Error
pub use error::{FinanceError, FinanceResult};

// Reconcile
pub use reconcile::{
    compute_balance, repair_for, BalanceMismatch, BalanceReconciler, LedgerEntry,
    ReconciliationReport,
};
