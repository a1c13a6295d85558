//! Budget line matching and expense auto-approval.
//!
//! New expense transactions with a project get attached to the project's
//! budget line for their category, and expenses that fit inside the
//! remaining approved budget are approved without manual review. The
//! remaining-budget computation is read-then-decide: two expenses created
//! concurrently can both pass the same headroom check. That gap is
//! accepted; the nightly reconciliation and manual review of the ledger
//! are the backstop.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use callsheet_shared::money::Cents;

use crate::error::{FinanceError, FinanceResult};

/// A planned spending bucket for a project.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BudgetLine {
    pub id: Uuid,
    pub project_id: Uuid,
    pub category: String,
    pub estimated_amount_cents: Cents,
    pub sort_order: i32,
}

/// Pick the budget line matching a transaction category. Ties resolve by
/// the producer's ordering of the budget sheet.
pub fn match_budget_line<'a>(category: &str, lines: &'a [BudgetLine]) -> Option<&'a BudgetLine> {
    lines
        .iter()
        .filter(|line| line.category.eq_ignore_ascii_case(category))
        .min_by_key(|line| line.sort_order)
}

/// Headroom left in a budget scope.
pub fn remaining_budget(scope_total_cents: Cents, approved_spend_cents: Cents) -> Cents {
    scope_total_cents - approved_spend_cents
}

/// Whether an expense fits inside the remaining budget. Zero or negative
/// amounts never auto-approve; they are malformed and stay pending for a
/// human.
pub fn fits_remaining(amount_cents: Cents, remaining_cents: Cents) -> bool {
    amount_cents > 0 && amount_cents <= remaining_cents
}

/// Outcome of processing one new expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseProcessing {
    pub transaction_id: Uuid,
    pub matched_budget_line_id: Option<Uuid>,
    pub auto_approved: bool,
    pub remaining_budget_cents: Option<Cents>,
}

/// Service attaching expenses to budget lines and auto-approving in-budget
/// spend.
pub struct BudgetService {
    pool: PgPool,
}

impl BudgetService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Process a newly created expense transaction.
    ///
    /// Attaches a budget line when the transaction has none and the
    /// project's budget has a matching category. Auto-approves when the
    /// project budget is approved and the amount fits the remaining
    /// headroom; anything else stays pending.
    pub async fn process_new_expense(
        &self,
        transaction_id: Uuid,
    ) -> FinanceResult<ExpenseProcessing> {
        let row: Option<(Uuid, Option<Uuid>, Option<Uuid>, String, String, Cents, String)> =
            sqlx::query_as(
                r#"
                SELECT id, project_id, budget_line_id, kind, category, amount_cents, payment_status
                FROM transactions
                WHERE id = $1
                "#,
            )
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        let (id, project_id, existing_line, kind, category, amount_cents, payment_status) = row
            .ok_or_else(|| FinanceError::NotFound(format!("transaction {}", transaction_id)))?;

        let mut outcome = ExpenseProcessing {
            transaction_id: id,
            matched_budget_line_id: existing_line,
            auto_approved: false,
            remaining_budget_cents: None,
        };

        if kind != "expense" || payment_status != "pending" {
            return Ok(outcome);
        }
        let project_id = match project_id {
            Some(p) => p,
            None => return Ok(outcome),
        };

        // Attach the matching budget line when the producer didn't pick one.
        let line_id = match existing_line {
            Some(line) => Some(line),
            None => {
                let lines: Vec<BudgetLine> = sqlx::query_as(
                    r#"
                    SELECT id, project_id, category, estimated_amount_cents, sort_order
                    FROM project_budget_lines
                    WHERE project_id = $1
                    "#,
                )
                .bind(project_id)
                .fetch_all(&self.pool)
                .await?;

                let matched = match_budget_line(&category, &lines).map(|l| l.id);
                if let Some(line_id) = matched {
                    sqlx::query(
                        "UPDATE transactions SET budget_line_id = $2, updated_at = NOW() WHERE id = $1",
                    )
                    .bind(id)
                    .bind(line_id)
                    .execute(&self.pool)
                    .await?;
                    tracing::debug!(
                        transaction_id = %id,
                        budget_line_id = %line_id,
                        category = %category,
                        "Expense attached to budget line"
                    );
                }
                matched
            }
        };
        outcome.matched_budget_line_id = line_id;

        // Auto-approval only applies once the producer's budget is approved.
        let project: Option<(String, Option<Cents>)> = sqlx::query_as(
            "SELECT budget_status, total_budget_cents FROM projects WHERE id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        let (budget_status, total_budget) =
            project.ok_or_else(|| FinanceError::NotFound(format!("project {}", project_id)))?;
        if budget_status != "approved" {
            return Ok(outcome);
        }

        let scope_total = match line_id {
            Some(line_id) => {
                let line: Option<(Cents,)> = sqlx::query_as(
                    "SELECT estimated_amount_cents FROM project_budget_lines WHERE id = $1",
                )
                .bind(line_id)
                .fetch_optional(&self.pool)
                .await?;
                line.map(|(v,)| v)
            }
            None => total_budget,
        };
        let scope_total = match scope_total {
            Some(v) => v,
            None => return Ok(outcome),
        };

        // Read-then-decide; see the module doc for the accepted race.
        let approved_spend: (Option<Cents>,) = match line_id {
            Some(line_id) => {
                sqlx::query_as(
                    r#"
                    SELECT SUM(amount_cents)
                    FROM transactions
                    WHERE budget_line_id = $1
                      AND kind = 'expense'
                      AND payment_status IN ('approved', 'paid')
                    "#,
                )
                .bind(line_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT SUM(amount_cents)
                    FROM transactions
                    WHERE project_id = $1
                      AND kind = 'expense'
                      AND payment_status IN ('approved', 'paid')
                    "#,
                )
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?
            }
        };

        let remaining = remaining_budget(scope_total, approved_spend.0.unwrap_or(0));
        outcome.remaining_budget_cents = Some(remaining);

        if fits_remaining(amount_cents, remaining) {
            sqlx::query(
                r#"
                UPDATE transactions
                SET payment_status = 'approved',
                    approved_at = NOW(),
                    updated_at = NOW()
                WHERE id = $1
                  AND payment_status = 'pending'
                "#,
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            outcome.auto_approved = true;
            tracing::info!(
                transaction_id = %id,
                amount_cents,
                remaining_cents = remaining,
                "Expense auto-approved within budget"
            );
        } else {
            tracing::info!(
                transaction_id = %id,
                amount_cents,
                remaining_cents = remaining,
                "Expense left pending for manual review"
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(category: &str, sort_order: i32) -> BudgetLine {
        BudgetLine {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            category: category.to_string(),
            estimated_amount_cents: 50_000,
            sort_order,
        }
    }

    #[test]
    fn test_match_by_category() {
        let lines = vec![line("camera", 0), line("catering", 1), line("travel", 2)];
        let matched = match_budget_line("catering", &lines).unwrap();
        assert_eq!(matched.category, "catering");
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let lines = vec![line("Camera", 0)];
        assert!(match_budget_line("camera", &lines).is_some());
    }

    #[test]
    fn test_match_prefers_lowest_sort_order() {
        let lines = vec![line("camera", 3), line("camera", 1)];
        let matched = match_budget_line("camera", &lines).unwrap();
        assert_eq!(matched.sort_order, 1);
    }

    #[test]
    fn test_no_match() {
        let lines = vec![line("camera", 0)];
        assert!(match_budget_line("stunts", &lines).is_none());
    }

    #[test]
    fn test_expense_within_remaining_budget_fits() {
        // 50,000 allocated, 2,500 already approved -> 47,500 remaining
        let remaining = remaining_budget(50_000, 2_500);
        assert_eq!(remaining, 47_500);
        assert!(fits_remaining(2_500, remaining));
    }

    #[test]
    fn test_expense_exactly_at_remaining_fits() {
        assert!(fits_remaining(47_500, 47_500));
    }

    #[test]
    fn test_expense_over_remaining_stays_pending() {
        assert!(!fits_remaining(47_501, 47_500));
    }

    #[test]
    fn test_overspent_budget_rejects_everything() {
        let remaining = remaining_budget(50_000, 60_000);
        assert_eq!(remaining, -10_000);
        assert!(!fits_remaining(1, remaining));
    }

    #[test]
    fn test_non_positive_amounts_never_auto_approve() {
        assert!(!fits_remaining(0, 47_500));
        assert!(!fits_remaining(-100, 47_500));
    }
}
