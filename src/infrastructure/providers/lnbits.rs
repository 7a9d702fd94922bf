//! LNbits adapter.
//!
//! LNbits quotes amounts in millisats and has its own status
//! vocabulary; both are normalized here.

use crate::domain::payment::{
    CreateInvoiceRequest, Invoice, InvoiceStatus, LnbitsConfig, PaymentProvider, ProviderConfig,
};
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_EXPIRY_SECS: i64 = 600;

pub struct LnbitsProvider {
    client: reqwest::Client,
}

impl LnbitsProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for LnbitsProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Covers both the invoice-creation response and the payment-lookup
/// response; the two shapes share most fields.
#[derive(Debug, Deserialize)]
struct LnbitsPaymentResponse {
    #[serde(default)]
    payment_hash: Option<String>,
    #[serde(default)]
    checking_id: Option<String>,
    #[serde(default)]
    payment_request: Option<String>,
    #[serde(default)]
    bolt11: Option<String>,
    /// Millisats.
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    time: Option<i64>,
    /// Seconds.
    #[serde(default)]
    expiry: Option<i64>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    pending: Option<bool>,
}

fn parse_status(raw: &str) -> InvoiceStatus {
    match raw {
        "complete" => InvoiceStatus::Paid,
        "pending" => InvoiceStatus::Processing,
        "failed" | "expired" => InvoiceStatus::Expired,
        _ => InvoiceStatus::New,
    }
}

/// Millisats to whole sats, flooring.
fn msat_to_sat(msat: i64) -> Decimal {
    Decimal::from(msat / 1000)
}

fn map_response(response: LnbitsPaymentResponse, now: i64) -> Invoice {
    let id = response
        .payment_hash
        .clone()
        .or(response.checking_id.clone())
        .unwrap_or_default();
    let checkout_link = response
        .payment_request
        .clone()
        .or(response.bolt11.clone())
        .unwrap_or_default();
    let status = match (&response.payment_status, response.pending) {
        (Some(raw), _) => parse_status(raw),
        (None, Some(true)) => InvoiceStatus::Processing,
        (None, Some(false)) => InvoiceStatus::Paid,
        (None, None) => InvoiceStatus::New,
    };
    let created_at = response.time.map(|t| t * 1000).unwrap_or(now);
    let expiry = response.expiry.unwrap_or(DEFAULT_EXPIRY_SECS);

    Invoice {
        id,
        amount: msat_to_sat(response.amount),
        currency: "SATS".to_string(),
        checkout_link,
        status,
        metadata: HashMap::new(),
        created_at,
        expires_at: created_at + expiry * 1000,
    }
}

fn own_config(config: &ProviderConfig) -> Result<&LnbitsConfig> {
    match config {
        ProviderConfig::Lnbits(cfg) => Ok(cfg),
        other => Err(LoyaltyError::Integration(format!(
            "lnbits adapter received {} configuration",
            other.provider_id()
        ))),
    }
}

#[async_trait]
impl PaymentProvider for LnbitsProvider {
    fn id(&self) -> &'static str {
        "lnbits"
    }

    fn name(&self) -> &'static str {
        "LNbits"
    }

    async fn verify_config(&self, config: &ProviderConfig) -> bool {
        let Ok(cfg) = own_config(config) else {
            return false;
        };
        let url = match &cfg.wallet_id {
            Some(wallet) => format!("{}/api/v1/wallet/{}", cfg.server_url, wallet),
            None => format!("{}/api/v1/wallet", cfg.server_url),
        };
        match self
            .client
            .get(&url)
            .header("X-Api-Key", &cfg.api_key)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(error) => {
                debug!(%error, "lnbits config verification failed");
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
        let url = format!("{}/api/v1/payments", cfg.server_url);

        let memo = request
            .metadata
            .get("cardTitle")
            .cloned()
            .unwrap_or_else(|| {
                format!(
                    "Loyalty purchase {}",
                    request.metadata.get("purchaseNonce").cloned().unwrap_or_default()
                )
            });

        let mut body = json!({
            "out": false,
            "amount": request.amount_sats * 1000,
            "memo": memo,
            "expiry": u64::from(request.expiration_minutes) * 60,
            "extra": request.metadata,
        });
        if let Some(wallet) = &cfg.wallet_id {
            body["wallet"] = json!(wallet);
        }

        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("LNbits request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LoyaltyError::Integration(format!(
                "LNbits API error: {status} {text}"
            )));
        }

        let payment: LnbitsPaymentResponse = response
            .json()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("LNbits response invalid: {e}")))?;
        Ok(map_response(payment, crate::domain::now_ms()))
    }

    async fn get_invoice(&self, config: &ProviderConfig, invoice_id: &str) -> Result<Invoice> {
        let cfg = own_config(config)?;
        let url = format!("{}/api/v1/payments/{}", cfg.server_url, invoice_id);

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &cfg.api_key)
            .send()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("LNbits request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LoyaltyError::Integration(format!(
                "LNbits API error: {status} {text}"
            )));
        }

        let payment: LnbitsPaymentResponse = response
            .json()
            .await
            .map_err(|e| LoyaltyError::Integration(format!("LNbits response invalid: {e}")))?;
        Ok(map_response(payment, crate::domain::now_ms()))
    }
}
