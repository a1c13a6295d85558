//! Expiry notifications.
//!
//! The sweep tells organizations their access is about to lapse. Delivery
//! is fire-and-forget from the sweep's perspective; a missed notification
//! is re-attempted on the next pass because the sent-marker only advances
//! on success.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A notice that access ends in `days_remaining` days (0 = today).
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryNotice {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub days_remaining: i64,
}

/// Outbound notification delivery.
#[async_trait]
pub trait BillingNotifier: Send + Sync {
    async fn send_expiry_notice(&self, notice: &ExpiryNotice) -> BillingResult<()>;
}

/// Posts notices to an internal notification endpoint.
pub struct HttpNotifier {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpNotifier {
    pub fn from_env() -> BillingResult<Self> {
        let endpoint = std::env::var("BILLING_NOTIFY_ENDPOINT")
            .map_err(|_| BillingError::Internal("BILLING_NOTIFY_ENDPOINT not set".into()))?;
        Ok(Self {
            endpoint,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl BillingNotifier for HttpNotifier {
    async fn send_expiry_notice(&self, notice: &ExpiryNotice) -> BillingResult<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(notice)
            .send()
            .await
            .map_err(|e| BillingError::Retryable(format!("notification send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BillingError::Retryable(format!(
                "notification endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs instead of sending. Used when no endpoint is configured.
pub struct NoopNotifier;

#[async_trait]
impl BillingNotifier for NoopNotifier {
    async fn send_expiry_notice(&self, notice: &ExpiryNotice) -> BillingResult<()> {
        tracing::info!(
            org_id = %notice.organization_id,
            days_remaining = notice.days_remaining,
            "Expiry notice (notifications disabled)"
        );
        Ok(())
    }
}
