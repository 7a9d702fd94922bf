//! BTCPay Server adapter (Greenfield API v1).

use crate::domain::payment::{
    BtcpayConfig, CreateInvoiceRequest, Invoice, InvoiceStatus, PaymentProvider, ProviderConfig,
};
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

pub struct BtcpayProvider {
    client: reqwest::Client,
}

impl BtcpayProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for BtcpayProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BtcpayInvoiceResponse {
    id: String,
    amount: Decimal,
    currency: String,
    checkout_link: String,
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    created_time: i64,
    expiration_time: i64,
}

/// BTCPay's status vocabulary is already the closed set; anything
/// unrecognized maps to New.
fn parse_status(raw: &str) -> InvoiceStatus {
    match raw {
        "Processing" => InvoiceStatus::Processing,
        "Expired" => InvoiceStatus::Expired,
        "Invalid" => InvoiceStatus::Invalid,
        "Settled" => InvoiceStatus::Settled,
        "Paid" => InvoiceStatus::Paid,
        _ => InvoiceStatus::New,
    }
}

impl From<BtcpayInvoiceResponse> for Invoice {
    fn from(response: BtcpayInvoiceResponse) -> Self {
        Self {
            id: response.id,
            amount: response.amount,
            currency: response.currency,
            checkout_link: response.checkout_link,
            status: parse_status(&response.status),
            metadata: response.metadata,
            created_at: response.created_time,
            expires_at: response.expiration_time,
        }
    }
}

fn own_config(config: &ProviderConfig) -> Result<&BtcpayConfig> {
    match config {
        ProviderConfig::Btcpay(cfg) => Ok(cfg),
        other => Err(LoyaltyError::Integration(format!(
            "btcpay adapter received {} configuration",
            other.provider_id()
        ))),
    }
}

#[async_trait]
impl PaymentProvider for BtcpayProvider {
    fn id(&self) -> &'static str {
        "btcpay"
    }

    fn name(&self) -> &'static str {
        "BTCPay Server"
    }

    async fn verify_config(&self, config: &ProviderConfig) -> bool {
        let Ok(cfg) = own_config(config) else {
            return false;
        };
        let url = format!("{}/api/v1/stores/{}", cfg.server_url, cfg.store_id);
        match self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", cfg.api_key))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(%error, "btcpay config verification failed");
                false
            }
        }
    }

    async fn create_invoice(
        &self,
        config: &ProviderConfig,
        request: CreateInvoiceRequest,
    ) -> Result<Invoice> {
        let cfg = own_config(config)?;
        let url = format!("{}/api/v1/stores/{}/invoices", cfg.server_url, cfg.store_id);

        let body = json!({
            "amount": request.amount_sats.to_string(),
            "currency": request.currency,
            "metadata": request.metadata,
            "checkout": {
                "expirationMinutes": request.expiration_minutes,
                "monitoringMinutes": request.expiration_minutes,
            },
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("token {}", cfg.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("BTCPay request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LoyaltyError::Integration(format!(
                "BTCPay API error: {status} {text}"
            )));
        }

        let invoice: BtcpayInvoiceResponse = response
            .json()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("BTCPay response invalid: {e}")))?;
        Ok(invoice.into())
    }

    async fn get_invoice(&self, config: &ProviderConfig, invoice_id: &str) -> Result<Invoice> {
        let cfg = own_config(config)?;
        let url = format!(
            "{}/api/v1/stores/{}/invoices/{}",
            cfg.server_url, cfg.store_id, invoice_id
        );

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("token {}", cfg.api_key))
            .send()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("BTCPay request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LoyaltyError::Integration(format!(
                "BTCPay API error: {status} {text}"
            )));
        }

        let invoice: BtcpayInvoiceResponse = response
            .json()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("BTCPay response invalid: {e}")))?;
        Ok(invoice.into())
    }
}
