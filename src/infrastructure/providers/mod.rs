pub mod btcpay;
pub mod lnbits;

use crate::domain::payment::ProviderRegistry;
use std::sync::Arc;

/// Registry with both shipped adapters registered.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(btcpay::BtcpayProvider::new()));
    registry.register(Arc::new(lnbits::LnbitsProvider::new()));
    registry
}
