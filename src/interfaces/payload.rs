//! Scan payload codec.
//!
//! Classifies an already-decoded value (QR scan, manual entry) into one
//! of the closed payload kinds. QR capture itself is out of scope; this
//! module receives a raw string or a parsed JSON value and hands back a
//! typed payload, falling through to `Text`/`Unknown` rather than
//! erroring. Any numeric field that is not a positive integer fails the
//! schema and falls through.

use crate::domain::card::{LoyaltyCard, Sats};
use crate::domain::now_ms;
use crate::domain::purchase::PurchaseNonce;
use crate::domain::session::SessionSnapshot;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCard {
    pub id: String,
    pub title: String,
    pub punches_required: u32,
    pub min_sats: u64,
}

/// Invitation to join a session, shared by the merchant as QR or code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionPayload {
    pub session_id: String,
    pub join_code: String,
    pub card: PayloadCard,
    #[serde(default = "default_demo_mode")]
    pub demo_mode: bool,
}

fn default_demo_mode() -> bool {
    true
}

/// A purchase ticket: everything the customer needs to claim one
/// purchase nonce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseTicket {
    pub session_id: String,
    pub card_id: String,
    pub card_title: String,
    pub punches_required: u32,
    pub min_sats: u64,
    pub purchase_nonce: String,
    pub expires_at: i64,
}

/// The two payload shapes this codec both produces (for QR display)
/// and accepts, tagged on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QrPayload {
    #[serde(rename = "join-session")]
    JoinSession(JoinSessionPayload),
    #[serde(rename = "purchase-ticket")]
    PurchaseTicket(PurchaseTicket),
}

/// Classification result for a scanned payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanPayload {
    JoinSession(JoinSessionPayload),
    PurchaseTicket(PurchaseTicket),
    /// Not parseable as JSON at all.
    Text { value: String },
    /// Valid JSON that matches neither schema.
    Unknown { raw: Value },
}

/// Classify a raw scanned string.
pub fn parse_payload(raw: &str) -> ScanPayload {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => parse_value(value),
        Err(_) => ScanPayload::Text {
            value: raw.to_string(),
        },
    }
}

/// Classify an already-decoded JSON value.
pub fn parse_value(value: Value) -> ScanPayload {
    match serde_json::from_value::<QrPayload>(value.clone()) {
        Ok(QrPayload::JoinSession(payload))
            if payload.card.punches_required > 0 && payload.card.min_sats > 0 =>
        {
            ScanPayload::JoinSession(payload)
        }
        Ok(QrPayload::PurchaseTicket(ticket))
            if ticket.punches_required > 0 && ticket.min_sats > 0 =>
        {
            ScanPayload::PurchaseTicket(ticket)
        }
        _ => ScanPayload::Unknown { raw: value },
    }
}

impl QrPayload {
    /// Build the join payload a merchant displays for a session.
    pub fn join_session(snapshot: &SessionSnapshot, card: &LoyaltyCard) -> Self {
        Self::JoinSession(JoinSessionPayload {
            session_id: snapshot.session_id.clone(),
            join_code: snapshot.join_code.clone(),
            card: PayloadCard {
                id: card.id.clone(),
                title: card.title.clone(),
                punches_required: card.punches_required,
                min_sats: card.min_sats.value(),
            },
            demo_mode: snapshot.demo_mode,
        })
    }

    /// Build the ticket a merchant displays for a freshly issued nonce.
    pub fn purchase_ticket(purchase: &PurchaseNonce, card: &LoyaltyCard) -> Self {
        Self::PurchaseTicket(PurchaseTicket {
            session_id: purchase.session_id.clone(),
            card_id: purchase.card_id.clone(),
            card_title: card.title.clone(),
            punches_required: card.punches_required,
            min_sats: purchase.min_sats.value(),
            purchase_nonce: purchase.nonce.clone(),
            expires_at: purchase.expires_at,
        })
    }
}

impl JoinSessionPayload {
    /// Convert a scanned invitation into the snapshot the customer
    /// engine joins with. Payloads produced by [`parse_value`] always
    /// convert; a hand-built payload with a zero amount does not.
    pub fn into_snapshot(self) -> Result<SessionSnapshot> {
        Ok(SessionSnapshot {
            session_id: self.session_id,
            card_id: self.card.id,
            card_title: self.card.title,
            punches_required: self.card.punches_required,
            min_sats: Sats::new(self.card.min_sats)?,
            demo_mode: self.demo_mode,
            join_code: self.join_code,
            issued_at: now_ms(),
        })
    }
}
