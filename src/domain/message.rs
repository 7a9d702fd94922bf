//! Broadcast message envelopes.
//!
//! Wire format for the two same-origin broadcast topics. Tags and
//! payload field names match the JSON the roles exchange; everything a
//! receiver learns here is advisory and must be re-derivable from the
//! merchant's durable store.

use super::card::LoyaltyCard;
use super::session::Session;
use serde::{Deserialize, Serialize};

/// Messages sent on the merchant topic (merchant → customers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum MerchantMessage {
    #[serde(rename = "merchant:session-update")]
    SessionUpdate { session: Session, card: LoyaltyCard },

    #[serde(rename = "merchant:punch-awarded", rename_all = "camelCase")]
    PunchAwarded {
        session_id: String,
        card_id: String,
        customer_id: String,
        punches_earned: u32,
        punches_required: u32,
    },

    #[serde(rename = "merchant:redemption-update", rename_all = "camelCase")]
    RedemptionUpdate {
        session_id: String,
        card_id: String,
        customer_id: String,
        status: RedemptionStatus,
    },

    #[serde(rename = "merchant:session-ended", rename_all = "camelCase")]
    SessionEnded { session_id: String },

    #[serde(rename = "merchant:punch-sync", rename_all = "camelCase")]
    PunchSync {
        session_id: String,
        customer_id: String,
        punches_earned: u32,
        punches_required: u32,
    },
}

/// Messages sent on the customer topic (customer → merchant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CustomerMessage {
    #[serde(rename = "customer:purchase-claimed", rename_all = "camelCase")]
    PurchaseClaimed {
        session_id: String,
        card_id: String,
        customer_id: String,
        purchase_nonce: String,
    },

    #[serde(rename = "customer:join-request", rename_all = "camelCase")]
    JoinRequest {
        session_id: String,
        card_id: String,
        customer_id: String,
        join_code: String,
    },

    #[serde(rename = "customer:redeem-request", rename_all = "camelCase")]
    RedeemRequest {
        session_id: String,
        card_id: String,
        customer_id: String,
    },

    #[serde(rename = "customer:leave", rename_all = "camelCase")]
    Leave {
        session_id: String,
        customer_id: String,
    },

    #[serde(rename = "customer:sync-request", rename_all = "camelCase")]
    SyncRequest {
        session_id: String,
        customer_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Requested,
    Fulfilled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merchant_message_wire_tags() {
        let msg = MerchantMessage::PunchAwarded {
            session_id: "s1".to_string(),
            card_id: "c1".to_string(),
            customer_id: "u1".to_string(),
            punches_earned: 3,
            punches_required: 5,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "merchant:punch-awarded");
        assert_eq!(json["payload"]["punchesEarned"], 3);
        assert_eq!(json["payload"]["customerId"], "u1");

        let back: MerchantMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_customer_message_wire_tags() {
        let msg = CustomerMessage::PurchaseClaimed {
            session_id: "s1".to_string(),
            card_id: "c1".to_string(),
            customer_id: "u1".to_string(),
            purchase_nonce: "n1".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "customer:purchase-claimed");
        assert_eq!(json["payload"]["purchaseNonce"], "n1");

        let back: CustomerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_redemption_status_lowercase() {
        assert_eq!(
            serde_json::to_value(RedemptionStatus::Fulfilled).unwrap(),
            serde_json::json!("fulfilled")
        );
    }
}
