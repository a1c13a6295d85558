//! Entitlement caps and usage counters.
//!
//! Caps live on the plan's entitlement row; a NULL cap means unlimited.
//! Counters live in `organization_usage`, one row per organization, and
//! are a cache: the feature that creates or deletes a resource adjusts
//! them, and the nightly recount is the correctness backstop. Drift is
//! tolerated and corrected, not treated as an error.

use sqlx::PgPool;
use uuid::Uuid;

use callsheet_shared::types::ResourceKind;

use crate::error::{BillingError, BillingResult};

/// Per-plan resource caps. `None` means unlimited.
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct EntitlementCaps {
    pub max_projects: Option<i64>,
    pub max_clients: Option<i64>,
    pub max_proposals: Option<i64>,
    pub max_users: Option<i64>,
    pub max_storage_bytes: Option<i64>,
    pub ai_credits: Option<i64>,
}

impl EntitlementCaps {
    pub fn cap_for(&self, resource: ResourceKind) -> Option<i64> {
        match resource {
            ResourceKind::Projects => self.max_projects,
            ResourceKind::Clients => self.max_clients,
            ResourceKind::Proposals => self.max_proposals,
            ResourceKind::Users => self.max_users,
            ResourceKind::StorageBytes => self.max_storage_bytes,
            ResourceKind::AiCredits => self.ai_credits,
        }
    }
}

/// Whether `current + requested` fits under `cap`. A NULL cap always fits.
pub fn within_cap(current: i64, requested: i64, cap: Option<i64>) -> bool {
    match cap {
        None => true,
        Some(cap) => current.saturating_add(requested) <= cap,
    }
}

/// Usage counters for one organization.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UsageCounters {
    pub projects_count: i64,
    pub clients_count: i64,
    pub proposals_count: i64,
    pub users_count: i64,
    pub storage_bytes_used: i64,
    pub ai_credits_used: i64,
}

impl UsageCounters {
    pub fn usage_for(&self, resource: ResourceKind) -> i64 {
        match resource {
            ResourceKind::Projects => self.projects_count,
            ResourceKind::Clients => self.clients_count,
            ResourceKind::Proposals => self.proposals_count,
            ResourceKind::Users => self.users_count,
            ResourceKind::StorageBytes => self.storage_bytes_used,
            ResourceKind::AiCredits => self.ai_credits_used,
        }
    }
}

/// Service for entitlement checks and counter maintenance.
pub struct EntitlementService {
    pool: PgPool,
}

impl EntitlementService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_counters(&self, org_id: Uuid) -> BillingResult<UsageCounters> {
        let counters: Option<UsageCounters> = sqlx::query_as(
            r#"
            SELECT projects_count, clients_count, proposals_count, users_count,
                   storage_bytes_used, ai_credits_used
            FROM organization_usage
            WHERE organization_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        counters.ok_or_else(|| BillingError::NotFound(format!("usage row for org {}", org_id)))
    }

    async fn load_caps(&self, org_id: Uuid) -> BillingResult<EntitlementCaps> {
        // An organization without a plan (or a plan without an entitlement
        // row) has no caps.
        let caps: Option<EntitlementCaps> = sqlx::query_as(
            r#"
            SELECT e.max_projects, e.max_clients, e.max_proposals, e.max_users,
                   e.max_storage_bytes, e.ai_credits
            FROM organizations o
            JOIN entitlements e ON e.plan_id = o.plan_id
            WHERE o.id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(caps.unwrap_or_default())
    }

    /// Whether the organization may consume `requested` more of `resource`.
    pub async fn check_within_entitlement(
        &self,
        org_id: Uuid,
        resource: ResourceKind,
        requested: i64,
    ) -> BillingResult<bool> {
        let counters = self.load_counters(org_id).await?;
        let caps = self.load_caps(org_id).await?;
        Ok(within_cap(
            counters.usage_for(resource),
            requested,
            caps.cap_for(resource),
        ))
    }

    /// Adjust a usage counter by `delta` (may be negative). The GREATEST
    /// floor keeps a counter from going negative when decrements race a
    /// recount.
    pub async fn increment_usage(
        &self,
        org_id: Uuid,
        resource: ResourceKind,
        delta: i64,
    ) -> BillingResult<()> {
        let column = resource.counter_column();
        // Column name comes from the ResourceKind enum, never user input.
        let sql = format!(
            "UPDATE organization_usage SET {col} = GREATEST(0, {col} + $1), updated_at = NOW() WHERE organization_id = $2",
            col = column
        );

        let result = sqlx::query(&sql)
            .bind(delta)
            .bind(org_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!(
                "usage row for org {}",
                org_id
            )));
        }

        tracing::debug!(
            org_id = %org_id,
            resource = %resource,
            delta,
            "Usage counter adjusted"
        );
        Ok(())
    }

    /// Recompute the counters from the source tables. Run periodically; the
    /// counters are a cache of these counts.
    pub async fn recount_usage(&self, org_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organization_usage u
            SET projects_count = (SELECT COUNT(*) FROM projects p WHERE p.organization_id = u.organization_id AND p.deleted_at IS NULL),
                clients_count = (SELECT COUNT(*) FROM clients c WHERE c.organization_id = u.organization_id AND c.deleted_at IS NULL),
                proposals_count = (SELECT COUNT(*) FROM proposals pr WHERE pr.organization_id = u.organization_id AND pr.deleted_at IS NULL),
                users_count = (SELECT COUNT(*) FROM organization_members m WHERE m.organization_id = u.organization_id AND m.removed_at IS NULL),
                storage_bytes_used = COALESCE((SELECT SUM(f.size_bytes) FROM files f WHERE f.organization_id = u.organization_id AND f.deleted_at IS NULL), 0),
                updated_at = NOW()
            WHERE u.organization_id = $1
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(org_id = %org_id, "Usage counters recounted");
        Ok(())
    }

    /// Recount every non-canceled organization.
    pub async fn recount_all(&self) -> BillingResult<u64> {
        let org_ids: Vec<(Uuid,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE billing_status != 'canceled'")
                .fetch_all(&self.pool)
                .await?;

        let mut recounted = 0u64;
        for (org_id,) in org_ids {
            match self.recount_usage(org_id).await {
                Ok(()) => recounted += 1,
                Err(e) => {
                    tracing::warn!(org_id = %org_id, error = %e, "Usage recount failed");
                }
            }
        }
        Ok(recounted)
    }
}
