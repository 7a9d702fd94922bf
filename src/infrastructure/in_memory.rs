use crate::domain::card::LoyaltyCard;
use crate::domain::customer::{CustomerSessionState, ProgressPointer};
use crate::domain::ledger::{PunchLedgerEntry, RedemptionRequest};
use crate::domain::payment::ProviderConfig;
use crate::domain::ports::{CustomerStore, MerchantStore};
use crate::domain::purchase::PurchaseNonce;
use crate::domain::session::{Session, SessionSnapshot, StatusCache};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory merchant store.
///
/// Uses `Arc<RwLock<...>>` per collection to allow shared concurrent
/// access. Ideal for testing and the demo binary, where persistence is
/// not required.
#[derive(Default, Clone)]
pub struct InMemoryMerchantStore {
    card: Arc<RwLock<Option<LoyaltyCard>>>,
    session: Arc<RwLock<Option<Session>>>,
    purchases: Arc<RwLock<HashMap<String, PurchaseNonce>>>,
    ledger: Arc<RwLock<Vec<PunchLedgerEntry>>>,
    redemptions: Arc<RwLock<HashMap<String, RedemptionRequest>>>,
    snapshots: Arc<RwLock<HashMap<String, SessionSnapshot>>>,
    status: Arc<RwLock<Option<StatusCache>>>,
    payment_config: Arc<RwLock<Option<ProviderConfig>>>,
}

impl InMemoryMerchantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MerchantStore for InMemoryMerchantStore {
    async fn put_card(&self, card: LoyaltyCard) -> Result<()> {
        *self.card.write().await = Some(card);
        Ok(())
    }

    async fn card(&self) -> Result<Option<LoyaltyCard>> {
        Ok(self.card.read().await.clone())
    }

    async fn delete_card(&self, id: &str) -> Result<()> {
        let mut card = self.card.write().await;
        if card.as_ref().is_some_and(|c| c.id == id) {
            *card = None;
        }
        Ok(())
    }

    async fn put_session(&self, session: Session) -> Result<()> {
        *self.session.write().await = Some(session);
        Ok(())
    }

    async fn session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        let mut session = self.session.write().await;
        if session.as_ref().is_some_and(|s| s.id == id) {
            *session = None;
        }
        Ok(())
    }

    async fn put_purchase(&self, purchase: PurchaseNonce) -> Result<()> {
        let mut purchases = self.purchases.write().await;
        purchases.insert(purchase.nonce.clone(), purchase);
        Ok(())
    }

    async fn purchase(&self, nonce: &str) -> Result<Option<PurchaseNonce>> {
        Ok(self.purchases.read().await.get(nonce).cloned())
    }

    async fn purchases(&self) -> Result<Vec<PurchaseNonce>> {
        let mut all: Vec<_> = self.purchases.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.created_at);
        Ok(all)
    }

    async fn delete_purchases_by_session(&self, session_id: &str) -> Result<()> {
        self.purchases
            .write()
            .await
            .retain(|_, p| p.session_id != session_id);
        Ok(())
    }

    async fn append_ledger_entry(&self, entry: PunchLedgerEntry) -> Result<()> {
        self.ledger.write().await.push(entry);
        Ok(())
    }

    async fn ledger_entries(&self) -> Result<Vec<PunchLedgerEntry>> {
        Ok(self.ledger.read().await.clone())
    }

    async fn delete_ledger_by_session(&self, session_id: &str) -> Result<()> {
        self.ledger
            .write()
            .await
            .retain(|e| e.session_id != session_id);
        Ok(())
    }

    async fn put_redemption(&self, request: RedemptionRequest) -> Result<()> {
        let mut redemptions = self.redemptions.write().await;
        redemptions.insert(request.id.clone(), request);
        Ok(())
    }

    async fn redemption(&self, id: &str) -> Result<Option<RedemptionRequest>> {
        Ok(self.redemptions.read().await.get(id).cloned())
    }

    async fn redemptions(&self) -> Result<Vec<RedemptionRequest>> {
        let mut all: Vec<_> = self.redemptions.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.requested_at);
        Ok(all)
    }

    async fn delete_redemptions_by_session(&self, session_id: &str) -> Result<()> {
        self.redemptions
            .write()
            .await
            .retain(|_, r| r.session_id != session_id);
        Ok(())
    }

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.join_code.clone(), snapshot);
        Ok(())
    }

    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.read().await.get(join_code).cloned())
    }

    async fn delete_snapshot(&self, join_code: &str) -> Result<()> {
        self.snapshots.write().await.remove(join_code);
        Ok(())
    }

    async fn put_status_cache(&self, status: StatusCache) -> Result<()> {
        *self.status.write().await = Some(status);
        Ok(())
    }

    async fn status_cache(&self) -> Result<Option<StatusCache>> {
        Ok(self.status.read().await.clone())
    }

    async fn clear_status_cache(&self) -> Result<()> {
        *self.status.write().await = None;
        Ok(())
    }

    async fn put_payment_config(&self, config: ProviderConfig) -> Result<()> {
        *self.payment_config.write().await = Some(config);
        Ok(())
    }

    async fn payment_config(&self) -> Result<Option<ProviderConfig>> {
        Ok(self.payment_config.read().await.clone())
    }

    async fn clear_payment_config(&self) -> Result<()> {
        *self.payment_config.write().await = None;
        Ok(())
    }
}

/// In-memory customer store.
#[derive(Default, Clone)]
pub struct InMemoryCustomerStore {
    customer_id: Arc<RwLock<Option<String>>>,
    session: Arc<RwLock<Option<CustomerSessionState>>>,
    snapshots: Arc<RwLock<HashMap<String, SessionSnapshot>>>,
    progress: Arc<RwLock<Option<ProgressPointer>>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn customer_id(&self) -> Result<Option<String>> {
        Ok(self.customer_id.read().await.clone())
    }

    async fn set_customer_id(&self, id: &str) -> Result<()> {
        *self.customer_id.write().await = Some(id.to_string());
        Ok(())
    }

    async fn session_state(&self) -> Result<Option<CustomerSessionState>> {
        Ok(self.session.read().await.clone())
    }

    async fn put_session_state(&self, state: CustomerSessionState) -> Result<()> {
        *self.session.write().await = Some(state);
        Ok(())
    }

    async fn clear_session_state(&self) -> Result<()> {
        *self.session.write().await = None;
        Ok(())
    }

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.join_code.clone(), snapshot);
        Ok(())
    }

    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.read().await.get(join_code).cloned())
    }

    async fn delete_snapshot(&self, join_code: &str) -> Result<()> {
        self.snapshots.write().await.remove(join_code);
        Ok(())
    }

    async fn progress(&self) -> Result<Option<ProgressPointer>> {
        Ok(self.progress.read().await.clone())
    }

    async fn set_progress(&self, pointer: ProgressPointer) -> Result<()> {
        *self.progress.write().await = Some(pointer);
        Ok(())
    }

    async fn clear_progress(&self) -> Result<()> {
        *self.progress.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::card::CardInput;

    fn card() -> LoyaltyCard {
        LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            1,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_card_store_roundtrip() {
        let store = InMemoryMerchantStore::new();
        let card = card();

        store.put_card(card.clone()).await.unwrap();
        assert_eq!(store.card().await.unwrap().unwrap(), card);

        store.delete_card("other-id").await.unwrap();
        assert!(store.card().await.unwrap().is_some());

        store.delete_card(&card.id).await.unwrap();
        assert!(store.card().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_by_session_removes_only_that_session() {
        let store = InMemoryMerchantStore::new();
        let card = card();
        let session_a = Session::start(&card, true, 1);
        let session_b = Session::start(&card, true, 2);

        let p_a = PurchaseNonce::issue(&session_a, &card, 1);
        let p_b = PurchaseNonce::issue(&session_b, &card, 2);
        store.put_purchase(p_a.clone()).await.unwrap();
        store.put_purchase(p_b.clone()).await.unwrap();

        store
            .append_ledger_entry(PunchLedgerEntry::award(&p_a, "u1", 3))
            .await
            .unwrap();
        store
            .append_ledger_entry(PunchLedgerEntry::award(&p_b, "u1", 4))
            .await
            .unwrap();

        store
            .put_redemption(RedemptionRequest::new(&session_a.id, &card.id, "u1", 5))
            .await
            .unwrap();

        store.delete_purchases_by_session(&session_a.id).await.unwrap();
        store.delete_ledger_by_session(&session_a.id).await.unwrap();
        store
            .delete_redemptions_by_session(&session_a.id)
            .await
            .unwrap();

        let purchases = store.purchases().await.unwrap();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].session_id, session_b.id);
        assert_eq!(store.ledger_entries().await.unwrap().len(), 1);
        assert!(store.redemptions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_cache_is_independent_of_card_edits() {
        let store = InMemoryMerchantStore::new();
        let mut card = card();
        let session = Session::start(&card, false, 1);
        let snapshot = SessionSnapshot::project(&session, &card, 1);
        store.put_snapshot(snapshot.clone()).await.unwrap();

        // Edit the card after caching; the cached snapshot must not move.
        card.apply(
            crate::domain::card::CardUpdate {
                punches_required: Some(9),
                ..Default::default()
            },
            2,
        )
        .unwrap();
        store.put_card(card).await.unwrap();

        let cached = store.snapshot(&session.join_code).await.unwrap().unwrap();
        assert_eq!(cached.punches_required, 5);
        assert_eq!(cached.card_title, "Coffee");
        assert_eq!(cached.min_sats.value(), 1000);
    }

    #[tokio::test]
    async fn test_customer_store_roundtrip() {
        let store = InMemoryCustomerStore::new();
        assert!(store.customer_id().await.unwrap().is_none());
        store.set_customer_id("u1").await.unwrap();
        assert_eq!(store.customer_id().await.unwrap().unwrap(), "u1");

        store
            .set_progress(ProgressPointer {
                session_id: "s1".to_string(),
                join_code: "AB12".to_string(),
            })
            .await
            .unwrap();
        assert!(store.progress().await.unwrap().is_some());
        store.clear_progress().await.unwrap();
        assert!(store.progress().await.unwrap().is_none());
    }
}
