use super::card::{LoyaltyCard, Sats};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const JOIN_CODE_LEN: usize = 4;
const JOIN_CODE_CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// An active merchant session. At most one exists at a time; starting a
/// new one tears the previous one down first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub card_id: String,
    pub active: bool,
    pub join_code: String,
    pub demo_mode: bool,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn start(card: &LoyaltyCard, demo_mode: bool, now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            card_id: card.id.clone(),
            active: true,
            join_code: generate_join_code(),
            demo_mode,
            created_at: now,
            expires_at: None,
        }
    }
}

/// Short human-typable code identifying a session. Canonical form is
/// uppercase; comparisons elsewhere are case-insensitive.
pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_CHARSET[rng.gen_range(0..JOIN_CODE_CHARSET.len())] as char)
        .collect()
}

/// Denormalized projection of a session and its card, shared with
/// customers via QR/manual code and cached keyed by join code so a
/// device can re-join without re-scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub card_id: String,
    pub card_title: String,
    pub punches_required: u32,
    pub min_sats: Sats,
    pub demo_mode: bool,
    pub join_code: String,
    pub issued_at: i64,
}

impl SessionSnapshot {
    pub fn project(session: &Session, card: &LoyaltyCard, now: i64) -> Self {
        Self {
            session_id: session.id.clone(),
            card_id: card.id.clone(),
            card_title: card.title.clone(),
            punches_required: card.punches_required,
            min_sats: card.min_sats,
            demo_mode: session.demo_mode,
            join_code: session.join_code.clone(),
            issued_at: now,
        }
    }
}

/// Small persisted merchant dashboard cache, refreshed on state change
/// and cleared when the session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCache {
    pub session_id: String,
    pub punches_awarded: u32,
    pub pending_redemptions: u32,
}
