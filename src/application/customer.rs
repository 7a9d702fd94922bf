use crate::domain::customer::{CustomerSessionState, ProgressPointer};
use crate::domain::message::{CustomerMessage, MerchantMessage, RedemptionStatus};
use crate::domain::now_ms;
use crate::domain::ports::{CustomerStore, CustomerStoreBox};
use crate::domain::session::SessionSnapshot;
use crate::error::{LoyaltyError, Precondition, Result};
use crate::infrastructure::broadcast::BroadcastBus;
use crate::interfaces::payload::PurchaseTicket;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// How often a joined customer re-syncs and re-emits unconfirmed
/// claims.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// Outcome of a purchase scan that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The claim was recorded locally and emitted to the merchant.
    Claimed,
    /// The nonce was already recorded; informational no-op.
    AlreadyScanned,
}

/// The customer session engine.
///
/// Owns the customer's durable store and drives joining, purchase
/// claiming, redemption requests, and the application of inbound
/// merchant state. Local punch counts are a cache; the merchant's
/// ledger is authoritative and the periodic sync pulls it back in.
pub struct CustomerEngine {
    store: CustomerStoreBox,
    bus: BroadcastBus,
}

impl CustomerEngine {
    pub fn new(store: CustomerStoreBox, bus: BroadcastBus) -> Self {
        Self { store, bus }
    }

    /// The durable local customer identity, generated on first use.
    pub async fn ensure_customer_id(&self) -> Result<String> {
        if let Some(id) = self.store.customer_id().await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.store.set_customer_id(&id).await?;
        Ok(id)
    }

    pub async fn state(&self) -> Result<Option<CustomerSessionState>> {
        self.store.session_state().await
    }

    /// Joins a session from a scanned or cached snapshot: persists a
    /// fresh state with zero punches, caches the snapshot under its
    /// join code, records the resume pointer, and emits a join request.
    pub async fn join_session_via_snapshot(
        &self,
        snapshot: SessionSnapshot,
    ) -> Result<CustomerSessionState> {
        let customer_id = self.ensure_customer_id().await?;
        let state = CustomerSessionState::join(snapshot, &customer_id, now_ms());

        self.persist_state(&state).await?;
        self.bus.publish_customer(CustomerMessage::JoinRequest {
            session_id: state.session_id.clone(),
            card_id: state.card_id.clone(),
            customer_id,
            join_code: state.join_code.clone(),
        });
        info!(card = %state.card_title, "joined session");
        Ok(state)
    }

    /// Rejoins after a restart by following the resume pointer to the
    /// cached snapshot. No-op when already joined or nothing is cached.
    pub async fn resume(&self) -> Result<Option<CustomerSessionState>> {
        if let Some(current) = self.store.session_state().await? {
            return Ok(Some(current));
        }
        let Some(pointer) = self.store.progress().await? else {
            return Ok(None);
        };
        let Some(snapshot) = self.store.snapshot(&pointer.join_code).await? else {
            return Ok(None);
        };
        Ok(Some(self.join_session_via_snapshot(snapshot).await?))
    }

    /// Handles a scanned purchase ticket. The local claim record is
    /// kept regardless of whether the merchant ever receives the
    /// emitted message; the periodic sync re-sends it.
    pub async fn handle_purchase_scan(&self, ticket: &PurchaseTicket) -> Result<ScanOutcome> {
        let mut state = self
            .store
            .session_state()
            .await?
            .ok_or(Precondition::WrongSession)?;
        if state.session_id != ticket.session_id {
            return Err(Precondition::WrongSession.into());
        }
        if ticket.expires_at < now_ms() {
            return Err(Precondition::Expired.into());
        }
        if state.purchase_nonces.contains(&ticket.purchase_nonce) {
            info!(nonce = %ticket.purchase_nonce, "purchase already scanned");
            return Ok(ScanOutcome::AlreadyScanned);
        }

        state.purchase_nonces.push(ticket.purchase_nonce.clone());
        state.last_updated_at = now_ms();
        self.persist_state(&state).await?;

        self.bus.publish_customer(CustomerMessage::PurchaseClaimed {
            session_id: state.session_id.clone(),
            card_id: state.card_id.clone(),
            customer_id: state.customer_id.clone(),
            purchase_nonce: ticket.purchase_nonce.clone(),
        });
        info!(nonce = %ticket.purchase_nonce, "claim sent, waiting for merchant");
        Ok(ScanOutcome::Claimed)
    }

    /// Asks the merchant for the reward once the card is complete.
    pub async fn request_redemption(&self) -> Result<()> {
        let state = self
            .store
            .session_state()
            .await?
            .ok_or(Precondition::NoSession)?;
        if state.punches_earned < state.punches_required {
            return Err(LoyaltyError::Validation(format!(
                "need {} punches, have {}",
                state.punches_required, state.punches_earned
            )));
        }
        self.bus.publish_customer(CustomerMessage::RedeemRequest {
            session_id: state.session_id,
            card_id: state.card_id,
            customer_id: state.customer_id,
        });
        info!("reward requested");
        Ok(())
    }

    /// Leaves the session: a best-effort notification, then all local
    /// session state is cleared.
    pub async fn leave_session(&self) -> Result<()> {
        if let Some(state) = self.store.session_state().await? {
            self.bus.publish_customer(CustomerMessage::Leave {
                session_id: state.session_id.clone(),
                customer_id: state.customer_id.clone(),
            });
            self.clear_state(&state).await?;
        }
        info!("session cleared");
        Ok(())
    }

    /// One sync tick: re-request the punch total and re-emit every
    /// locally recorded claim. Compensates for dropped messages and for
    /// cross-device scenarios where the claiming and confirming devices
    /// differ. Inactive when not joined.
    pub async fn sync_tick(&self) -> Result<()> {
        let Some(state) = self.store.session_state().await? else {
            return Ok(());
        };
        self.bus.publish_customer(CustomerMessage::SyncRequest {
            session_id: state.session_id.clone(),
            customer_id: state.customer_id.clone(),
        });
        for nonce in &state.purchase_nonces {
            self.bus.publish_customer(CustomerMessage::PurchaseClaimed {
                session_id: state.session_id.clone(),
                card_id: state.card_id.clone(),
                customer_id: state.customer_id.clone(),
                purchase_nonce: nonce.clone(),
            });
        }
        Ok(())
    }

    // Inbound messages -------------------------------------------------

    pub async fn handle_merchant_message(&self, message: MerchantMessage) -> Result<()> {
        match message {
            MerchantMessage::SessionUpdate { session, card } => {
                let Some(mut state) = self.store.session_state().await? else {
                    return Ok(());
                };
                if state.session_id != session.id {
                    debug!("session update for a different session, ignored");
                    return Ok(());
                }
                // The merchant is authoritative: card data always wins
                // over whatever was cached at join time.
                state.card_id = card.id;
                state.card_title = card.title;
                state.punches_required = card.punches_required;
                state.min_sats = card.min_sats;
                state.demo_mode = session.demo_mode;
                state.join_code = session.join_code;
                state.last_updated_at = now_ms();
                self.persist_state(&state).await?;
                Ok(())
            }
            // Award and sync carry the same authority and are applied
            // identically; sync is the idempotent periodic twin.
            MerchantMessage::PunchAwarded {
                session_id,
                customer_id,
                punches_earned,
                punches_required,
                ..
            }
            | MerchantMessage::PunchSync {
                session_id,
                customer_id,
                punches_earned,
                punches_required,
            } => {
                self.apply_progress(&session_id, &customer_id, punches_earned, punches_required)
                    .await
            }
            MerchantMessage::RedemptionUpdate {
                session_id, status, ..
            } => {
                let Some(mut state) = self.store.session_state().await? else {
                    return Ok(());
                };
                if state.session_id != session_id {
                    return Ok(());
                }
                if status == RedemptionStatus::Fulfilled {
                    info!("reward fulfilled");
                    state.punches_earned = 0;
                    state.last_updated_at = now_ms();
                    self.persist_state(&state).await?;
                }
                Ok(())
            }
            MerchantMessage::SessionEnded { .. } => {
                info!("session ended by merchant");
                if let Some(state) = self.store.session_state().await? {
                    self.clear_state(&state).await?;
                }
                Ok(())
            }
        }
    }

    async fn apply_progress(
        &self,
        session_id: &str,
        customer_id: &str,
        punches_earned: u32,
        punches_required: u32,
    ) -> Result<()> {
        let Some(mut state) = self.store.session_state().await? else {
            return Ok(());
        };
        if state.session_id != session_id || state.customer_id != customer_id {
            debug!("progress update for another session or customer, ignored");
            return Ok(());
        }
        state.punches_earned = punches_earned;
        state.punches_required = punches_required;
        state.last_updated_at = now_ms();
        self.persist_state(&state).await?;
        debug!(punches_earned, "progress applied");
        Ok(())
    }

    async fn persist_state(&self, state: &CustomerSessionState) -> Result<()> {
        self.store.put_session_state(state.clone()).await?;
        self.store.put_snapshot(state.snapshot()).await?;
        self.store
            .set_progress(ProgressPointer {
                session_id: state.session_id.clone(),
                join_code: state.join_code.clone(),
            })
            .await
    }

    async fn clear_state(&self, state: &CustomerSessionState) -> Result<()> {
        self.store.clear_session_state().await?;
        self.store.delete_snapshot(&state.join_code).await?;
        self.store.clear_progress().await
    }

    // Reactor ----------------------------------------------------------

    /// The customer reactor: inbound merchant messages and the sync
    /// timer, handled one at a time.
    pub async fn run(&self) {
        let mut inbound = self.bus.subscribe_merchant();
        let mut sync = tokio::time::interval(SYNC_INTERVAL);
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Ok(message) => {
                        if let Err(err) = self.handle_merchant_message(message).await {
                            if err.is_benign() {
                                warn!(%err, "merchant message rejected");
                            } else {
                                error!(%err, "merchant message handler failed");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "inbound merchant messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = sync.tick() => {
                    if let Err(err) = self.sync_tick().await {
                        warn!(%err, "sync tick failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::card::{CardInput, LoyaltyCard};
    use crate::domain::session::Session;
    use crate::infrastructure::in_memory::InMemoryCustomerStore;

    fn engine() -> (CustomerEngine, BroadcastBus) {
        let bus = BroadcastBus::default();
        let engine = CustomerEngine::new(Box::new(InMemoryCustomerStore::new()), bus.clone());
        (engine, bus)
    }

    fn snapshot() -> (SessionSnapshot, Session, LoyaltyCard) {
        let card = LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            1,
        )
        .unwrap();
        let session = Session::start(&card, true, 1);
        let snapshot = SessionSnapshot::project(&session, &card, 1);
        (snapshot, session, card)
    }

    fn ticket(session: &Session, card: &LoyaltyCard, nonce: &str, expires_at: i64) -> PurchaseTicket {
        PurchaseTicket {
            session_id: session.id.clone(),
            card_id: card.id.clone(),
            card_title: card.title.clone(),
            punches_required: card.punches_required,
            min_sats: card.min_sats.value(),
            purchase_nonce: nonce.to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_customer_id_is_stable() {
        let (engine, _bus) = engine();
        let first = engine.ensure_customer_id().await.unwrap();
        let second = engine.ensure_customer_id().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_join_emits_request_and_persists() {
        let (engine, bus) = engine();
        let mut rx = bus.subscribe_customer();
        let (snapshot, session, _card) = snapshot();

        let state = engine.join_session_via_snapshot(snapshot).await.unwrap();
        assert_eq!(state.punches_earned, 0);
        assert!(state.purchase_nonces.is_empty());

        match rx.try_recv().unwrap() {
            CustomerMessage::JoinRequest { session_id, join_code, .. } => {
                assert_eq!(session_id, session.id);
                assert_eq!(join_code, session.join_code);
            }
            other => panic!("expected join-request, got {other:?}"),
        }

        // Both the pointer and the snapshot cache back the resume path.
        assert!(engine.store.progress().await.unwrap().is_some());
        assert!(
            engine
                .store
                .snapshot(&session.join_code)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_double_scan_claims_once() {
        let (engine, bus) = engine();
        let (snapshot, session, card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        let mut rx = bus.subscribe_customer();
        let ticket = ticket(&session, &card, "n1", now_ms() + 60_000);

        let first = engine.handle_purchase_scan(&ticket).await.unwrap();
        assert_eq!(first, ScanOutcome::Claimed);
        let second = engine.handle_purchase_scan(&ticket).await.unwrap();
        assert_eq!(second, ScanOutcome::AlreadyScanned);

        let mut claims = 0;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, CustomerMessage::PurchaseClaimed { .. }) {
                claims += 1;
            }
        }
        assert_eq!(claims, 1);

        let state = engine.state().await.unwrap().unwrap();
        assert_eq!(state.purchase_nonces, vec!["n1".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_rejects_wrong_session_and_expired() {
        let (engine, _bus) = engine();
        let (snapshot, session, card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        let mut foreign = ticket(&session, &card, "n1", now_ms() + 60_000);
        foreign.session_id = "some-other-session".to_string();
        assert!(matches!(
            engine.handle_purchase_scan(&foreign).await,
            Err(LoyaltyError::Precondition(Precondition::WrongSession))
        ));

        let stale = ticket(&session, &card, "n2", now_ms() - 1);
        assert!(matches!(
            engine.handle_purchase_scan(&stale).await,
            Err(LoyaltyError::Precondition(Precondition::Expired))
        ));

        let state = engine.state().await.unwrap().unwrap();
        assert!(state.purchase_nonces.is_empty());
    }

    #[tokio::test]
    async fn test_redemption_needs_full_card() {
        let (engine, bus) = engine();
        let (snapshot, ..) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        assert!(matches!(
            engine.request_redemption().await,
            Err(LoyaltyError::Validation(_))
        ));

        let mut state = engine.state().await.unwrap().unwrap();
        state.punches_earned = state.punches_required;
        engine.store.put_session_state(state).await.unwrap();

        let mut rx = bus.subscribe_customer();
        engine.request_redemption().await.unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            CustomerMessage::RedeemRequest { .. }
        ));
    }

    #[tokio::test]
    async fn test_award_and_sync_apply_identically() {
        let (engine, _bus) = engine();
        let (snapshot, session, _card) = snapshot();
        let state = engine.join_session_via_snapshot(snapshot).await.unwrap();

        engine
            .handle_merchant_message(MerchantMessage::PunchAwarded {
                session_id: session.id.clone(),
                card_id: state.card_id.clone(),
                customer_id: state.customer_id.clone(),
                punches_earned: 2,
                punches_required: 6,
            })
            .await
            .unwrap();
        let after_award = engine.state().await.unwrap().unwrap();
        assert_eq!(after_award.punches_earned, 2);
        assert_eq!(after_award.punches_required, 6);

        engine
            .handle_merchant_message(MerchantMessage::PunchSync {
                session_id: session.id.clone(),
                customer_id: state.customer_id.clone(),
                punches_earned: 3,
                punches_required: 6,
            })
            .await
            .unwrap();
        let after_sync = engine.state().await.unwrap().unwrap();
        assert_eq!(after_sync.punches_earned, 3);

        // Replaying the same sync is harmless.
        engine
            .handle_merchant_message(MerchantMessage::PunchSync {
                session_id: session.id.clone(),
                customer_id: state.customer_id.clone(),
                punches_earned: 3,
                punches_required: 6,
            })
            .await
            .unwrap();
        assert_eq!(engine.state().await.unwrap().unwrap().punches_earned, 3);

        // A different customer's award does not apply.
        engine
            .handle_merchant_message(MerchantMessage::PunchAwarded {
                session_id: session.id,
                card_id: state.card_id,
                customer_id: "someone-else".to_string(),
                punches_earned: 9,
                punches_required: 6,
            })
            .await
            .unwrap();
        assert_eq!(engine.state().await.unwrap().unwrap().punches_earned, 3);
    }

    #[tokio::test]
    async fn test_session_update_card_data_wins() {
        let (engine, _bus) = engine();
        let (snapshot, mut session, mut card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        card.punches_required = 10;
        card.title = "Espresso".to_string();
        session.demo_mode = false;
        engine
            .handle_merchant_message(MerchantMessage::SessionUpdate { session, card })
            .await
            .unwrap();

        let state = engine.state().await.unwrap().unwrap();
        assert_eq!(state.punches_required, 10);
        assert_eq!(state.card_title, "Espresso");
        assert!(!state.demo_mode);
    }

    #[tokio::test]
    async fn test_fulfilled_redemption_resets_progress() {
        let (engine, _bus) = engine();
        let (snapshot, session, _card) = snapshot();
        let joined = engine.join_session_via_snapshot(snapshot).await.unwrap();

        engine
            .handle_merchant_message(MerchantMessage::PunchSync {
                session_id: session.id.clone(),
                customer_id: joined.customer_id.clone(),
                punches_earned: 5,
                punches_required: 5,
            })
            .await
            .unwrap();
        engine
            .handle_merchant_message(MerchantMessage::RedemptionUpdate {
                session_id: session.id,
                card_id: joined.card_id,
                customer_id: joined.customer_id,
                status: RedemptionStatus::Fulfilled,
            })
            .await
            .unwrap();
        assert_eq!(engine.state().await.unwrap().unwrap().punches_earned, 0);
    }

    #[tokio::test]
    async fn test_session_ended_clears_everything() {
        let (engine, _bus) = engine();
        let (snapshot, session, _card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        engine
            .handle_merchant_message(MerchantMessage::SessionEnded {
                session_id: session.id,
            })
            .await
            .unwrap();
        assert!(engine.state().await.unwrap().is_none());
        assert!(engine.store.progress().await.unwrap().is_none());
        assert!(
            engine
                .store
                .snapshot(&session.join_code)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_resume_follows_pointer() {
        let bus = BroadcastBus::default();
        let store = InMemoryCustomerStore::new();
        let engine = CustomerEngine::new(Box::new(store.clone()), bus.clone());
        let (snapshot, session, _card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();

        // Simulate a restart: the session state is gone, but the
        // pointer and the snapshot cache survive.
        store.clear_session_state().await.unwrap();
        let resumed = engine.resume().await.unwrap().unwrap();
        assert_eq!(resumed.session_id, session.id);
        assert_eq!(resumed.punches_earned, 0);
    }

    #[tokio::test]
    async fn test_sync_tick_resends_claims() {
        let (engine, bus) = engine();
        let (snapshot, session, card) = snapshot();
        engine.join_session_via_snapshot(snapshot).await.unwrap();
        engine
            .handle_purchase_scan(&ticket(&session, &card, "n1", now_ms() + 60_000))
            .await
            .unwrap();

        let mut rx = bus.subscribe_customer();
        engine.sync_tick().await.unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            CustomerMessage::SyncRequest { .. }
        ));
        match rx.try_recv().unwrap() {
            CustomerMessage::PurchaseClaimed { purchase_nonce, .. } => {
                assert_eq!(purchase_nonce, "n1");
            }
            other => panic!("expected purchase-claimed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_tick_inactive_when_not_joined() {
        let (engine, bus) = engine();
        let mut rx = bus.subscribe_customer();
        engine.sync_tick().await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
