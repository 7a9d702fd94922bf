use super::card::{LoyaltyCard, Sats};
use super::payment::InvoiceStatus;
use super::session::Session;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed purchase-ticket lifetime.
pub const PURCHASE_TTL_MS: i64 = 10 * 60 * 1000;

/// External invoice attached to a purchase when a payment provider is
/// configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttachment {
    pub provider: String,
    pub invoice_id: String,
    pub checkout_link: String,
    pub status: InvoiceStatus,
}

/// Single-use unguessable token identifying one purchase event.
///
/// Claimable by exactly one customer; once redeemed or expired it can
/// never be claimed or paid again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseNonce {
    pub nonce: String,
    pub session_id: String,
    pub card_id: String,
    /// Threshold captured at issuance; not re-read from the card later.
    pub min_sats: Sats,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentAttachment>,
}

impl PurchaseNonce {
    pub fn issue(session: &Session, card: &LoyaltyCard, now: i64) -> Self {
        Self {
            nonce: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            card_id: card.id.clone(),
            min_sats: card.min_sats,
            created_at: now,
            expires_at: now + PURCHASE_TTL_MS,
            customer_id: None,
            claimed_at: None,
            redeemed_at: None,
            payment: None,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }

    pub fn is_redeemed(&self) -> bool {
        self.redeemed_at.is_some()
    }

    /// Pending means still awaiting settlement: neither redeemed nor
    /// expired.
    pub fn is_pending(&self, now: i64) -> bool {
        !self.is_redeemed() && !self.is_expired(now)
    }
}
