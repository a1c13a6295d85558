//! Bank account balance reconciliation.
//!
//! `balance_cents` on a bank account is a cache of the signed sum of its
//! applied transactions. Feature code keeps it current incrementally, but
//! externally-sourced payment records can bypass that path. This pass
//! recomputes each balance from the transaction set, reports drift, and in
//! non-dry-run mode repairs it. The repair is guarded against concurrent
//! writes: it only lands if the stored value is still the one that was
//! read, otherwise the account is reported for a retry.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use callsheet_shared::money::{signed_contribution, Cents};
use callsheet_shared::types::{PaymentStatus, TransactionKind};

use crate::error::FinanceResult;

/// One ledger row, as much of it as the balance needs.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry {
    pub kind: TransactionKind,
    pub status: PaymentStatus,
    pub amount_cents: Cents,
}

/// Authoritative balance for a set of ledger entries. Income adds, expense
/// subtracts, and only applied (approved or paid) entries count.
pub fn compute_balance(entries: &[LedgerEntry]) -> Cents {
    entries
        .iter()
        .map(|e| signed_contribution(e.kind, e.status, e.amount_cents))
        .sum()
}

/// The value to write for a stored balance, or `None` when it already
/// matches the computed one and the account is skipped.
pub fn repair_for(stored: Cents, computed: Cents) -> Option<Cents> {
    (stored != computed).then_some(computed)
}

/// A stored balance that disagrees with its transaction set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub account_id: Uuid,
    pub organization_id: Uuid,
    pub stored_balance_cents: Cents,
    pub computed_balance_cents: Cents,
    pub drift_cents: Cents,
    pub repaired: bool,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub ran_at: OffsetDateTime,
    pub dry_run: bool,
    pub accounts_checked: u64,
    pub mismatches: Vec<BalanceMismatch>,
    /// Accounts whose repair lost a race with a concurrent write; re-run.
    pub contended: Vec<Uuid>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.contended.is_empty()
    }
}

/// Batch balance reconciler.
pub struct BalanceReconciler {
    pool: PgPool,
}

impl BalanceReconciler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reconcile every account, or just one organization's.
    ///
    /// Idempotent: a second pass over an unchanged ledger finds nothing to
    /// do. In dry-run mode nothing is written.
    pub async fn run(
        &self,
        organization_id: Option<Uuid>,
        dry_run: bool,
    ) -> FinanceResult<ReconciliationReport> {
        let accounts: Vec<(Uuid, Uuid, Cents)> = match organization_id {
            Some(org_id) => {
                sqlx::query_as(
                    "SELECT id, organization_id, balance_cents FROM bank_accounts WHERE organization_id = $1",
                )
                .bind(org_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT id, organization_id, balance_cents FROM bank_accounts")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut report = ReconciliationReport {
            ran_at: OffsetDateTime::now_utc(),
            dry_run,
            accounts_checked: 0,
            mismatches: Vec::new(),
            contended: Vec::new(),
        };

        for (account_id, org_id, stored) in accounts {
            report.accounts_checked += 1;

            let computed = self.compute_account_balance(account_id).await?;
            let Some(computed) = repair_for(stored, computed) else {
                continue;
            };

            let mut repaired = false;
            if !dry_run {
                // Optimistic guard: only repair if nothing moved the stored
                // value since we read it.
                let updated = sqlx::query(
                    r#"
                    UPDATE bank_accounts
                    SET balance_cents = $2, updated_at = NOW()
                    WHERE id = $1 AND balance_cents = $3
                    "#,
                )
                .bind(account_id)
                .bind(computed)
                .bind(stored)
                .execute(&self.pool)
                .await?;

                if updated.rows_affected() == 1 {
                    repaired = true;
                } else {
                    report.contended.push(account_id);
                    tracing::warn!(
                        account_id = %account_id,
                        "Balance repair lost a race with a concurrent write"
                    );
                    continue;
                }
            }

            tracing::warn!(
                account_id = %account_id,
                org_id = %org_id,
                stored_cents = stored,
                computed_cents = computed,
                drift_cents = computed - stored,
                repaired,
                "Bank account balance drift"
            );
            report.mismatches.push(BalanceMismatch {
                account_id,
                organization_id: org_id,
                stored_balance_cents: stored,
                computed_balance_cents: computed,
                drift_cents: computed - stored,
                repaired,
            });
        }

        tracing::info!(
            accounts_checked = report.accounts_checked,
            mismatches = report.mismatches.len(),
            contended = report.contended.len(),
            dry_run,
            "Balance reconciliation pass completed"
        );
        Ok(report)
    }

    async fn compute_account_balance(&self, account_id: Uuid) -> FinanceResult<Cents> {
        let rows: Vec<(String, String, Cents)> = sqlx::query_as(
            r#"
            SELECT kind, payment_status, amount_cents
            FROM transactions
            WHERE bank_account_id = $1
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        // Unknown kind/status strings contribute nothing rather than
        // corrupting the sum; the invariant checks surface them separately.
        let entries: Vec<LedgerEntry> = rows
            .iter()
            .filter_map(|(kind, status, amount)| {
                Some(LedgerEntry {
                    kind: TransactionKind::parse(kind)?,
                    status: PaymentStatus::parse(status)?,
                    amount_cents: *amount,
                })
            })
            .collect();

        Ok(compute_balance(&entries))
    }
}
