use crate::domain::card::LoyaltyCard;
use crate::domain::customer::{CustomerSessionState, ProgressPointer};
use crate::domain::ledger::{PunchLedgerEntry, RedemptionRequest};
use crate::domain::payment::ProviderConfig;
use crate::domain::ports::{CustomerStore, MerchantStore};
use crate::domain::purchase::PurchaseNonce;
use crate::domain::session::{Session, SessionSnapshot, StatusCache};
use crate::error::{LoyaltyError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column family per record collection, mirroring the per-entity
/// object stores of the durable-store contract.
pub const CF_CARDS: &str = "cards";
pub const CF_SESSIONS: &str = "sessions";
pub const CF_PURCHASES: &str = "purchases";
pub const CF_LEDGER: &str = "ledger";
pub const CF_REDEMPTIONS: &str = "redemptions";
pub const CF_SNAPSHOTS: &str = "snapshots";
pub const CF_META: &str = "meta";

const META_STATUS_CACHE: &str = "status-cache";
const META_PAYMENT_CONFIG: &str = "payment-config";
const META_CUSTOMER_ID: &str = "customer-id";
const META_SESSION_STATE: &str = "session-state";
const META_PROGRESS: &str = "progress";

/// A persistent store backed by RocksDB.
///
/// One instance serves a single role (the roles are storage-isolated,
/// so a merchant and a customer never share a database path). Values
/// are stored as JSON; `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB instance at the given path, ensuring
    /// all required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [
            CF_CARDS,
            CF_SESSIONS,
            CF_PURCHASES,
            CF_LEDGER,
            CF_REDEMPTIONS,
            CF_SNAPSHOTS,
            CF_META,
        ]
        .into_iter()
        .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
        .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            LoyaltyError::Io(std::io::Error::other(format!(
                "column family {name} not found"
            )))
        })
    }

    fn put<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf)?;
        self.db.put_cf(&cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf)?;
        match self.db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, cf: &str, key: &str) -> Result<()> {
        let cf = self.cf(cf)?;
        self.db.delete_cf(&cf, key.as_bytes())?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    /// Delete every record in the column family matched by the
    /// predicate. The durable store has no secondary indexes, so
    /// per-session purges walk the collection.
    fn purge<T, F>(&self, cf: &str, keep: F) -> Result<()>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let cf = self.cf(cf)?;
        let mut doomed = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item?;
            let record: T = serde_json::from_slice(&value)?;
            if !keep(&record) {
                doomed.push(key);
            }
        }
        for key in doomed {
            self.db.delete_cf(&cf, key)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MerchantStore for RocksDbStore {
    async fn put_card(&self, card: LoyaltyCard) -> Result<()> {
        self.put(CF_CARDS, &card.id, &card)
    }

    async fn card(&self) -> Result<Option<LoyaltyCard>> {
        Ok(self.scan::<LoyaltyCard>(CF_CARDS)?.into_iter().next())
    }

    async fn delete_card(&self, id: &str) -> Result<()> {
        self.delete(CF_CARDS, id)
    }

    async fn put_session(&self, session: Session) -> Result<()> {
        self.put(CF_SESSIONS, &session.id, &session)
    }

    async fn session(&self) -> Result<Option<Session>> {
        Ok(self.scan::<Session>(CF_SESSIONS)?.into_iter().next())
    }

    async fn delete_session(&self, id: &str) -> Result<()> {
        self.delete(CF_SESSIONS, id)
    }

    async fn put_purchase(&self, purchase: PurchaseNonce) -> Result<()> {
        self.put(CF_PURCHASES, &purchase.nonce, &purchase)
    }

    async fn purchase(&self, nonce: &str) -> Result<Option<PurchaseNonce>> {
        self.get(CF_PURCHASES, nonce)
    }

    async fn purchases(&self) -> Result<Vec<PurchaseNonce>> {
        let mut all = self.scan::<PurchaseNonce>(CF_PURCHASES)?;
        all.sort_by_key(|p| p.created_at);
        Ok(all)
    }

    async fn delete_purchases_by_session(&self, session_id: &str) -> Result<()> {
        self.purge::<PurchaseNonce, _>(CF_PURCHASES, |p| p.session_id != session_id)
    }

    async fn append_ledger_entry(&self, entry: PunchLedgerEntry) -> Result<()> {
        self.put(CF_LEDGER, &entry.id, &entry)
    }

    async fn ledger_entries(&self) -> Result<Vec<PunchLedgerEntry>> {
        let mut all = self.scan::<PunchLedgerEntry>(CF_LEDGER)?;
        all.sort_by_key(|e| e.awarded_at);
        Ok(all)
    }

    async fn delete_ledger_by_session(&self, session_id: &str) -> Result<()> {
        self.purge::<PunchLedgerEntry, _>(CF_LEDGER, |e| e.session_id != session_id)
    }

    async fn put_redemption(&self, request: RedemptionRequest) -> Result<()> {
        self.put(CF_REDEMPTIONS, &request.id, &request)
    }

    async fn redemption(&self, id: &str) -> Result<Option<RedemptionRequest>> {
        self.get(CF_REDEMPTIONS, id)
    }

    async fn redemptions(&self) -> Result<Vec<RedemptionRequest>> {
        let mut all = self.scan::<RedemptionRequest>(CF_REDEMPTIONS)?;
        all.sort_by_key(|r| r.requested_at);
        Ok(all)
    }

    async fn delete_redemptions_by_session(&self, session_id: &str) -> Result<()> {
        self.purge::<RedemptionRequest, _>(CF_REDEMPTIONS, |r| r.session_id != session_id)
    }

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()> {
        self.put(CF_SNAPSHOTS, &snapshot.join_code, &snapshot)
    }

    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>> {
        self.get(CF_SNAPSHOTS, join_code)
    }

    async fn delete_snapshot(&self, join_code: &str) -> Result<()> {
        self.delete(CF_SNAPSHOTS, join_code)
    }

    async fn put_status_cache(&self, status: StatusCache) -> Result<()> {
        self.put(CF_META, META_STATUS_CACHE, &status)
    }

    async fn status_cache(&self) -> Result<Option<StatusCache>> {
        self.get(CF_META, META_STATUS_CACHE)
    }

    async fn clear_status_cache(&self) -> Result<()> {
        self.delete(CF_META, META_STATUS_CACHE)
    }

    async fn put_payment_config(&self, config: ProviderConfig) -> Result<()> {
        self.put(CF_META, META_PAYMENT_CONFIG, &config)
    }

    async fn payment_config(&self) -> Result<Option<ProviderConfig>> {
        self.get(CF_META, META_PAYMENT_CONFIG)
    }

    async fn clear_payment_config(&self) -> Result<()> {
        self.delete(CF_META, META_PAYMENT_CONFIG)
    }
}

#[async_trait]
impl CustomerStore for RocksDbStore {
    async fn customer_id(&self) -> Result<Option<String>> {
        self.get(CF_META, META_CUSTOMER_ID)
    }

    async fn set_customer_id(&self, id: &str) -> Result<()> {
        self.put(CF_META, META_CUSTOMER_ID, &id.to_string())
    }

    async fn session_state(&self) -> Result<Option<CustomerSessionState>> {
        self.get(CF_META, META_SESSION_STATE)
    }

    async fn put_session_state(&self, state: CustomerSessionState) -> Result<()> {
        self.put(CF_META, META_SESSION_STATE, &state)
    }

    async fn clear_session_state(&self) -> Result<()> {
        self.delete(CF_META, META_SESSION_STATE)
    }

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()> {
        self.put(CF_SNAPSHOTS, &snapshot.join_code, &snapshot)
    }

    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>> {
        self.get(CF_SNAPSHOTS, join_code)
    }

    async fn delete_snapshot(&self, join_code: &str) -> Result<()> {
        self.delete(CF_SNAPSHOTS, join_code)
    }

    async fn progress(&self) -> Result<Option<ProgressPointer>> {
        self.get(CF_META, META_PROGRESS)
    }

    async fn set_progress(&self, pointer: ProgressPointer) -> Result<()> {
        self.put(CF_META, META_PROGRESS, &pointer)
    }

    async fn clear_progress(&self) -> Result<()> {
        self.delete(CF_META, META_PROGRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::card::CardInput;
    use tempfile::tempdir;

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
    async fn test_open_creates_column_families() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).expect("failed to open RocksDB");
        for name in [
            CF_CARDS,
            CF_SESSIONS,
            CF_PURCHASES,
            CF_LEDGER,
            CF_REDEMPTIONS,
            CF_SNAPSHOTS,
            CF_META,
        ] {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_card_and_session_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

        let card = card();
        store.put_card(card.clone()).await.unwrap();
        assert_eq!(MerchantStore::card(&store).await.unwrap().unwrap(), card);

        let session = Session::start(&card, true, 2);
        store.put_session(session.clone()).await.unwrap();
        assert_eq!(store.session().await.unwrap().unwrap(), session);

        store.delete_session(&session.id).await.unwrap();
        assert!(store.session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_purge() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        let card = card();
        let session = Session::start(&card, true, 1);
        let other = Session::start(&card, true, 1);

        let mine = PurchaseNonce::issue(&session, &card, 1);
        let theirs = PurchaseNonce::issue(&other, &card, 1);
        store.put_purchase(mine).await.unwrap();
        store.put_purchase(theirs.clone()).await.unwrap();

        store.delete_purchases_by_session(&session.id).await.unwrap();
        let left = store.purchases().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].nonce, theirs.nonce);
    }

    #[tokio::test]
    async fn test_customer_meta_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();

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
        let pointer = store.progress().await.unwrap().unwrap();
        assert_eq!(pointer.join_code, "AB12");
    }
}
