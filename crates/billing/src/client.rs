//! Payment provider API client.
//!
//! Refund execution is the one place this subsystem calls out to the
//! provider. The call happens outside any database transaction; the refund
//! transaction row records the attempt and the provider's webhook (or the
//! confirmation endpoint) closes the loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use callsheet_shared::money::Cents;

use crate::error::{BillingError, BillingResult};

/// Provider-side result of issuing a refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRefund {
    /// Provider-assigned refund id, stored as execution proof.
    pub provider_refund_id: String,
    pub amount_cents: Cents,
    pub status: String,
}

/// Outbound calls to the payment provider.
#[async_trait]
pub trait PaymentProviderClient: Send + Sync {
    /// Issue a refund against a provider charge. Not idempotent on the
    /// provider side per se; callers pass the refund transaction id as the
    /// idempotency key.
    async fn create_refund(
        &self,
        provider_charge_id: &str,
        amount_cents: Cents,
        idempotency_key: &str,
    ) -> BillingResult<ProviderRefund>;
}

/// Configuration for the HTTP provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_base: String,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn from_env() -> BillingResult<Self> {
        let api_base = std::env::var("PAYMENT_PROVIDER_API_BASE")
            .unwrap_or_else(|_| "https://api.payments.example.com".to_string());
        let api_key = std::env::var("PAYMENT_PROVIDER_API_KEY")
            .map_err(|_| BillingError::Internal("PAYMENT_PROVIDER_API_KEY not set".to_string()))?;
        Ok(Self { api_base, api_key })
    }
}

/// reqwest-backed provider client.
pub struct HttpProviderClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl HttpProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct CreateRefundBody<'a> {
    charge_id: &'a str,
    amount_cents: Cents,
}

#[async_trait]
impl PaymentProviderClient for HttpProviderClient {
    async fn create_refund(
        &self,
        provider_charge_id: &str,
        amount_cents: Cents,
        idempotency_key: &str,
    ) -> BillingResult<ProviderRefund> {
        let url = format!("{}/v1/refunds", self.config.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(&CreateRefundBody {
                charge_id: provider_charge_id,
                amount_cents,
            })
            .send()
            .await
            .map_err(|e| BillingError::Provider(format!("refund request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BillingError::Provider(format!(
                "refund rejected ({}): {}",
                status, body
            )));
        }

        response
            .json::<ProviderRefund>()
            .await
            .map_err(|e| BillingError::Provider(format!("malformed refund response: {}", e)))
    }
}
