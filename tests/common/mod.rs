use async_trait::async_trait;
use punchcard::application::merchant::MerchantEngine;
use punchcard::domain::card::CardInput;
use punchcard::domain::payment::{
    BtcpayConfig, CreateInvoiceRequest, Invoice, InvoiceStatus, PaymentProvider, ProviderConfig,
    ProviderRegistry,
};
use punchcard::error::{LoyaltyError, Result};
use punchcard::infrastructure::broadcast::BroadcastBus;
use punchcard::infrastructure::in_memory::InMemoryMerchantStore;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::Mutex;

/// In-process payment provider double. Registered under the btcpay id
/// so a plain BTCPay config selects it; invoice statuses and amounts
/// are mutated by the test to drive the reconciliation loop.
#[derive(Default)]
pub struct MockProvider {
    invoices: Mutex<HashMap<String, Invoice>>,
    counter: AtomicU32,
    fail_create: AtomicBool,
}

impl MockProvider {
    pub fn fail_next_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub async fn set_status(&self, invoice_id: &str, status: InvoiceStatus) {
        if let Some(invoice) = self.invoices.lock().await.get_mut(invoice_id) {
            invoice.status = status;
        }
    }

    pub async fn set_amount(&self, invoice_id: &str, amount: Decimal) {
        if let Some(invoice) = self.invoices.lock().await.get_mut(invoice_id) {
            invoice.amount = amount;
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn id(&self) -> &'static str {
        "btcpay"
    }

    fn name(&self) -> &'static str {
        "Mock BTCPay"
    }

    async fn verify_config(&self, config: &ProviderConfig) -> bool {
        matches!(config, ProviderConfig::Btcpay(_))
    }

    async fn create_invoice(
        &self,
        _config: &ProviderConfig,
        request: CreateInvoiceRequest,
    ) -> Result<Invoice> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(LoyaltyError::Integration("mock invoice failure".to_string()));
        }
        let id = format!("inv-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let invoice = Invoice {
            id: id.clone(),
            amount: Decimal::from(request.amount_sats),
            currency: request.currency,
            checkout_link: format!("https://pay.test/i/{id}"),
            status: InvoiceStatus::New,
            metadata: request.metadata,
            created_at: 0,
            expires_at: 600_000,
        };
        self.invoices.lock().await.insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, _config: &ProviderConfig, invoice_id: &str) -> Result<Invoice> {
        self.invoices
            .lock()
            .await
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| LoyaltyError::Integration(format!("unknown invoice {invoice_id}")))
    }
}

pub fn mock_config() -> ProviderConfig {
    ProviderConfig::Btcpay(BtcpayConfig {
        server_url: "https://btcpay.test".to_string(),
        api_key: "test-key".to_string(),
        store_id: "test-store".to_string(),
    })
}

/// A merchant engine with an in-memory store and the mock provider
/// registered.
pub fn merchant_with_mock() -> (MerchantEngine, Arc<MockProvider>, BroadcastBus) {
    let bus = BroadcastBus::default();
    let provider = Arc::new(MockProvider::default());
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());
    let engine = MerchantEngine::new(
        Box::new(InMemoryMerchantStore::new()),
        registry,
        bus.clone(),
    );
    (engine, provider, bus)
}

pub fn coffee_card() -> CardInput {
    CardInput {
        title: "Coffee".to_string(),
        punches_required: 5,
        min_sats: 1000,
    }
}
