//! Best-effort broadcast transport.
//!
//! Two independent topics: the merchant topic carries merchant →
//! customer traffic, the customer topic carries customer → merchant
//! traffic. Delivery is local-origin-only, at-most-once per send, with
//! no retry and no ordering guarantee across topics. A send with no
//! subscriber attached is silently dropped; that is expected under
//! normal single-role operation and is logged at debug level only.

use crate::domain::message::{CustomerMessage, MerchantMessage};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct BroadcastBus {
    merchant_tx: broadcast::Sender<MerchantMessage>,
    customer_tx: broadcast::Sender<CustomerMessage>,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (merchant_tx, _) = broadcast::channel(capacity);
        let (customer_tx, _) = broadcast::channel(capacity);
        Self {
            merchant_tx,
            customer_tx,
        }
    }

    /// Fire-and-forget publish on the merchant topic.
    pub fn publish_merchant(&self, message: MerchantMessage) {
        if self.merchant_tx.send(message).is_err() {
            debug!("merchant topic has no listener, message dropped");
        }
    }

    /// Fire-and-forget publish on the customer topic.
    pub fn publish_customer(&self, message: CustomerMessage) {
        if self.customer_tx.send(message).is_err() {
            debug!("customer topic has no listener, message dropped");
        }
    }

    /// Subscribe to merchant → customer traffic.
    pub fn subscribe_merchant(&self) -> broadcast::Receiver<MerchantMessage> {
        self.merchant_tx.subscribe()
    }

    /// Subscribe to customer → merchant traffic.
    pub fn subscribe_customer(&self) -> broadcast::Receiver<CustomerMessage> {
        self.customer_tx.subscribe()
    }
}
