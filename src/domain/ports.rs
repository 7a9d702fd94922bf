use super::card::LoyaltyCard;
use super::customer::{CustomerSessionState, ProgressPointer};
use super::ledger::{PunchLedgerEntry, RedemptionRequest};
use super::payment::ProviderConfig;
use super::purchase::PurchaseNonce;
use super::session::{Session, SessionSnapshot, StatusCache};
use crate::error::Result;
use async_trait::async_trait;

/// The merchant role's durable store: one collection per record type,
/// each keyed by its natural identifier, plus the join-code-keyed
/// snapshot cache and two small singleton caches. This store is the
/// only authoritative ledger in the system.
#[async_trait]
pub trait MerchantStore: Send + Sync {
    async fn put_card(&self, card: LoyaltyCard) -> Result<()>;
    async fn card(&self) -> Result<Option<LoyaltyCard>>;
    async fn delete_card(&self, id: &str) -> Result<()>;

    async fn put_session(&self, session: Session) -> Result<()>;
    async fn session(&self) -> Result<Option<Session>>;
    async fn delete_session(&self, id: &str) -> Result<()>;

    async fn put_purchase(&self, purchase: PurchaseNonce) -> Result<()>;
    async fn purchase(&self, nonce: &str) -> Result<Option<PurchaseNonce>>;
    async fn purchases(&self) -> Result<Vec<PurchaseNonce>>;
    async fn delete_purchases_by_session(&self, session_id: &str) -> Result<()>;

    async fn append_ledger_entry(&self, entry: PunchLedgerEntry) -> Result<()>;
    async fn ledger_entries(&self) -> Result<Vec<PunchLedgerEntry>>;
    async fn delete_ledger_by_session(&self, session_id: &str) -> Result<()>;

    async fn put_redemption(&self, request: RedemptionRequest) -> Result<()>;
    async fn redemption(&self, id: &str) -> Result<Option<RedemptionRequest>>;
    async fn redemptions(&self) -> Result<Vec<RedemptionRequest>>;
    async fn delete_redemptions_by_session(&self, session_id: &str) -> Result<()>;

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()>;
    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>>;
    async fn delete_snapshot(&self, join_code: &str) -> Result<()>;

    async fn put_status_cache(&self, status: StatusCache) -> Result<()>;
    async fn status_cache(&self) -> Result<Option<StatusCache>>;
    async fn clear_status_cache(&self) -> Result<()>;

    async fn put_payment_config(&self, config: ProviderConfig) -> Result<()>;
    async fn payment_config(&self) -> Result<Option<ProviderConfig>>;
    async fn clear_payment_config(&self) -> Result<()>;
}

/// The customer role's durable store: identity, the current session
/// state, the join-code-keyed snapshot cache, and the resume pointer.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn customer_id(&self) -> Result<Option<String>>;
    async fn set_customer_id(&self, id: &str) -> Result<()>;

    async fn session_state(&self) -> Result<Option<CustomerSessionState>>;
    async fn put_session_state(&self, state: CustomerSessionState) -> Result<()>;
    async fn clear_session_state(&self) -> Result<()>;

    async fn put_snapshot(&self, snapshot: SessionSnapshot) -> Result<()>;
    async fn snapshot(&self, join_code: &str) -> Result<Option<SessionSnapshot>>;
    async fn delete_snapshot(&self, join_code: &str) -> Result<()>;

    async fn progress(&self) -> Result<Option<ProgressPointer>>;
    async fn set_progress(&self, pointer: ProgressPointer) -> Result<()>;
    async fn clear_progress(&self) -> Result<()>;
}

pub type MerchantStoreBox = Box<dyn MerchantStore>;
pub type CustomerStoreBox = Box<dyn CustomerStore>;
