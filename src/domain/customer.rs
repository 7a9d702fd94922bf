use super::card::Sats;
use super::session::SessionSnapshot;
use serde::{Deserialize, Serialize};

/// Customer-held session state: the snapshot fields plus identity and
/// locally cached progress.
///
/// `punches_earned` is authoritative only until the next sync from the
/// merchant; `purchase_nonces` records every claim attempt for
/// de-duplication and periodic re-emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSessionState {
    pub session_id: String,
    pub card_id: String,
    pub card_title: String,
    pub punches_required: u32,
    pub min_sats: Sats,
    pub demo_mode: bool,
    pub join_code: String,
    pub issued_at: i64,
    pub customer_id: String,
    pub punches_earned: u32,
    pub purchase_nonces: Vec<String>,
    pub last_updated_at: i64,
}

impl CustomerSessionState {
    pub fn join(snapshot: SessionSnapshot, customer_id: &str, now: i64) -> Self {
        Self {
            session_id: snapshot.session_id,
            card_id: snapshot.card_id,
            card_title: snapshot.card_title,
            punches_required: snapshot.punches_required,
            min_sats: snapshot.min_sats,
            demo_mode: snapshot.demo_mode,
            join_code: snapshot.join_code,
            issued_at: snapshot.issued_at,
            customer_id: customer_id.to_string(),
            punches_earned: 0,
            purchase_nonces: Vec::new(),
            last_updated_at: now,
        }
    }

    /// Re-project the snapshot shape for the join-code cache.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            card_id: self.card_id.clone(),
            card_title: self.card_title.clone(),
            punches_required: self.punches_required,
            min_sats: self.min_sats,
            demo_mode: self.demo_mode,
            join_code: self.join_code.clone(),
            issued_at: self.issued_at,
        }
    }
}

/// Persisted pointer to the customer's current session, used to resume
/// across restarts without re-scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPointer {
    pub session_id: String,
    pub join_code: String,
}
