use super::purchase::PurchaseNonce;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of loyalty progress, recorded for one redeemed purchase.
///
/// The ledger is append-only: punch counts are always recomputed by
/// counting entries, never read from a stored counter. Each nonce may
/// produce at most one entry, guarded by the nonce's redemption mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunchLedgerEntry {
    pub id: String,
    pub session_id: String,
    pub card_id: String,
    pub customer_id: String,
    pub purchase_nonce: String,
    pub awarded_at: i64,
}

impl PunchLedgerEntry {
    pub fn award(purchase: &PurchaseNonce, customer_id: &str, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: purchase.session_id.clone(),
            card_id: purchase.card_id.clone(),
            customer_id: customer_id.to_string(),
            purchase_nonce: purchase.nonce.clone(),
            awarded_at: now,
        }
    }
}

/// A customer's request to redeem a completed card. Terminal state is
/// fulfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    pub id: String,
    pub session_id: String,
    pub card_id: String,
    pub customer_id: String,
    pub requested_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfilled_at: Option<i64>,
}

impl RedemptionRequest {
    pub fn new(session_id: &str, card_id: &str, customer_id: &str, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            card_id: card_id.to_string(),
            customer_id: customer_id.to_string(),
            requested_at: now,
            fulfilled_at: None,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled_at.is_some()
    }
}
