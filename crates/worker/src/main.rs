//! Callsheet Background Worker
//!
//! Handles scheduled jobs including:
//! - Trial/expiry sweep: notices and access revocation (hourly)
//! - Usage counter recount (daily at 3:00 AM UTC)
//! - Balance reconciliation across bank accounts (daily at 3:30 AM UTC)
//! - Billing invariant checks (daily at 4:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use callsheet_billing::{
    BillingNotifier, EntitlementService, ExpirySweep, HttpNotifier, InvariantChecker, NoopNotifier,
    ViolationSeverity,
};
use callsheet_finance::BalanceReconciler;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Callsheet Worker");

    let pool = create_db_pool().await?;

    let notifier: Arc<dyn BillingNotifier> = match HttpNotifier::from_env() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            warn!(error = %e, "Notification endpoint not configured; expiry notices will only be logged");
            Arc::new(NoopNotifier)
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Trial/expiry sweep (hourly)
    // Day-count comparisons truncate, so repeated runs within the same day
    // do not repeat notices.
    let sweep_pool = pool.clone();
    let sweep_notifier = notifier.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let sweep = ExpirySweep::new(sweep_pool.clone());
            let notifier = sweep_notifier.clone();
            Box::pin(async move {
                info!("Running trial/expiry sweep");
                match sweep.run(notifier.as_ref()).await {
                    Ok(report) => {
                        info!(
                            notices_sent = report.notices_sent,
                            trials_ended = report.trials_ended,
                            organizations_blocked = report.organizations_blocked,
                            "Trial/expiry sweep complete"
                        );
                    }
                    Err(e) => error!(error = %e, "Trial/expiry sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Trial/expiry sweep (hourly)");

    // Job 2: Usage counter recount (daily at 3:00 AM UTC)
    let recount_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let entitlements = EntitlementService::new(recount_pool.clone());
            Box::pin(async move {
                info!("Running usage counter recount");
                match entitlements.recount_all().await {
                    Ok(recounted) => {
                        info!(organizations = recounted, "Usage recount complete");
                    }
                    Err(e) => error!(error = %e, "Usage recount failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Usage counter recount (daily 3:00 UTC)");

    // Job 3: Balance reconciliation (daily at 3:30 AM UTC)
    let reconcile_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let reconciler = BalanceReconciler::new(reconcile_pool.clone());
            Box::pin(async move {
                info!("Running balance reconciliation");
                match reconciler.run(None, false).await {
                    Ok(report) => {
                        if report.is_clean() {
                            info!(
                                accounts_checked = report.accounts_checked,
                                "Balance reconciliation complete, no drift"
                            );
                        } else {
                            warn!(
                                accounts_checked = report.accounts_checked,
                                mismatches = report.mismatches.len(),
                                contended = report.contended.len(),
                                "Balance reconciliation repaired drift"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Balance reconciliation failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Balance reconciliation (daily 3:30 UTC)");

    // Job 4: Billing invariant checks (daily at 4:00 AM UTC)
    let invariant_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let checker = InvariantChecker::new(invariant_pool.clone());
            Box::pin(async move {
                info!("Running billing invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "All billing invariants hold"
                        );
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            let line = serde_json::to_string(&violation.context)
                                .unwrap_or_else(|_| "{}".to_string());
                            match violation.severity {
                                ViolationSeverity::Critical | ViolationSeverity::High => {
                                    error!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        context = %line,
                                        "{}", violation.description
                                    );
                                }
                                _ => {
                                    warn!(
                                        invariant = %violation.invariant,
                                        severity = %violation.severity,
                                        context = %line,
                                        "{}", violation.description
                                    );
                                }
                            }
                        }
                        error!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Billing invariant violations found"
                        );
                    }
                    Err(e) => error!(error = %e, "Invariant check run failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant checks (daily 4:00 UTC)");

    // Job 5: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    // Park the main task; the scheduler runs in the background.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
