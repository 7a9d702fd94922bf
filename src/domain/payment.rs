//! Payment provider contract.
//!
//! All providers follow the no-custody principle: invoices are created
//! in the merchant's own infrastructure and this crate only reads
//! payment status.

use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Closed invoice status vocabulary. Adapters translate provider-native
/// statuses into this set; unknown native statuses map to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceStatus {
    New,
    Processing,
    Expired,
    Invalid,
    Settled,
    Paid,
}

impl InvoiceStatus {
    /// Paid and Settled both mean the invoice cleared.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled | Self::Paid)
    }
}

/// An external invoice, normalized across providers. The amount is in
/// satoshis, decimal to keep the provider's string precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
    pub checkout_link: String,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceRequest {
    pub amount_sats: u64,
    pub currency: String,
    pub metadata: HashMap<String, String>,
    pub expiration_minutes: u32,
}

/// Active provider configuration. A tagged union over the provider id;
/// each adapter accepts only its own variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Btcpay(BtcpayConfig),
    Lnbits(LnbitsConfig),
}

impl ProviderConfig {
    pub fn provider_id(&self) -> &'static str {
        match self {
            Self::Btcpay(_) => "btcpay",
            Self::Lnbits(_) => "lnbits",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcpayConfig {
    pub server_url: String,
    pub api_key: String,
    pub store_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LnbitsConfig {
    pub server_url: String,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider identifier, matching the config tag.
    fn id(&self) -> &'static str;

    /// Human-readable provider name.
    fn name(&self) -> &'static str;

    /// Best-effort reachability/credential check. Never errors;
    /// failures collapse to false.
    async fn verify_config(&self, config: &ProviderConfig) -> bool;

    async fn create_invoice(
        &self,
        config: &ProviderConfig,
        request: CreateInvoiceRequest,
    ) -> Result<Invoice>;

    async fn get_invoice(&self, config: &ProviderConfig, invoice_id: &str) -> Result<Invoice>;
}

/// Providers registered by id. The persisted [`ProviderConfig`] selects
/// which one is active.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<dyn PaymentProvider>> {
        self.providers.values().cloned().collect()
    }
}
