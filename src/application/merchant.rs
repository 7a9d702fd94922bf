use crate::domain::card::{CardInput, CardUpdate, LoyaltyCard};
use crate::domain::ledger::{PunchLedgerEntry, RedemptionRequest};
use crate::domain::message::{CustomerMessage, MerchantMessage, RedemptionStatus};
use crate::domain::now_ms;
use crate::domain::payment::{CreateInvoiceRequest, ProviderConfig, ProviderRegistry};
use crate::domain::ports::{MerchantStore, MerchantStoreBox};
use crate::domain::purchase::{PURCHASE_TTL_MS, PaymentAttachment, PurchaseNonce};
use crate::domain::session::{Session, SessionSnapshot, StatusCache};
use crate::error::{LoyaltyError, Precondition, Result};
use crate::infrastructure::broadcast::BroadcastBus;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// How often pending invoices are polled while a non-demo session with
/// a payment config exists.
pub const INVOICE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The merchant session engine.
///
/// Owns the merchant's durable store and drives session lifecycle,
/// purchase-nonce issuance, claim reconciliation, punch awarding,
/// redemption fulfillment, and payment-provider reconciliation. The
/// engine runs as a single-threaded reactor: handlers never run
/// concurrently, and every handler re-reads the records it mutates.
pub struct MerchantEngine {
    store: MerchantStoreBox,
    providers: ProviderRegistry,
    bus: BroadcastBus,
}

impl MerchantEngine {
    pub fn new(store: MerchantStoreBox, providers: ProviderRegistry, bus: BroadcastBus) -> Self {
        Self {
            store,
            providers,
            bus,
        }
    }

    // Card management --------------------------------------------------

    pub async fn create_card(&self, input: CardInput) -> Result<LoyaltyCard> {
        let card = LoyaltyCard::create(input, now_ms())?;
        self.store.put_card(card.clone()).await?;
        info!(card = %card.title, "loyalty card saved");
        Ok(card)
    }

    /// Applies a partial card update. When a session is active the
    /// cached snapshot is refreshed and the new card data is
    /// rebroadcast, so joined customers see the edit live.
    pub async fn update_card(&self, update: CardUpdate) -> Result<LoyaltyCard> {
        let mut card = self.store.card().await?.ok_or(Precondition::NoCard)?;
        card.apply(update, now_ms())?;
        self.store.put_card(card.clone()).await?;

        if let Some(session) = self.store.session().await? {
            self.store
                .put_snapshot(SessionSnapshot::project(&session, &card, now_ms()))
                .await?;
            self.bus.publish_merchant(MerchantMessage::SessionUpdate {
                session,
                card: card.clone(),
            });
        }
        Ok(card)
    }

    pub async fn delete_card(&self) -> Result<()> {
        if let Some(card) = self.store.card().await? {
            self.store.delete_card(&card.id).await?;
        }
        Ok(())
    }

    pub async fn card(&self) -> Result<Option<LoyaltyCard>> {
        self.store.card().await
    }

    // Session lifecycle ------------------------------------------------

    /// Starts a fresh session. Any prior session's dependent records
    /// are purged unconditionally before the new session is persisted.
    pub async fn start_session(&self, demo_mode: bool) -> Result<Session> {
        let card = self.store.card().await?.ok_or(Precondition::NoCard)?;
        if let Some(existing) = self.store.session().await? {
            self.purge_session(&existing).await?;
        }

        let now = now_ms();
        let session = Session::start(&card, demo_mode, now);
        self.store.put_session(session.clone()).await?;
        self.store
            .put_snapshot(SessionSnapshot::project(&session, &card, now))
            .await?;
        self.bus.publish_merchant(MerchantMessage::SessionUpdate {
            session: session.clone(),
            card,
        });
        self.refresh_status_cache().await?;
        info!(join_code = %session.join_code, demo = session.demo_mode, "session started");
        Ok(session)
    }

    /// Ends the current session and purges everything scoped to it.
    /// No-op when no session exists.
    pub async fn end_session(&self) -> Result<()> {
        let Some(session) = self.store.session().await? else {
            return Ok(());
        };
        self.purge_session(&session).await?;
        self.bus.publish_merchant(MerchantMessage::SessionEnded {
            session_id: session.id.clone(),
        });
        info!(session = %session.id, "session ended");
        Ok(())
    }

    async fn purge_session(&self, session: &Session) -> Result<()> {
        self.store.delete_purchases_by_session(&session.id).await?;
        self.store.delete_ledger_by_session(&session.id).await?;
        self.store
            .delete_redemptions_by_session(&session.id)
            .await?;
        self.store.delete_snapshot(&session.join_code).await?;
        self.store.clear_status_cache().await?;
        self.store.delete_session(&session.id).await?;
        Ok(())
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        self.store.session().await
    }

    /// Flips the demo flag and rebroadcasts. The invoice-integration
    /// path plays no part here and can never block the toggle.
    pub async fn toggle_demo_mode(&self) -> Result<Session> {
        let mut session = self.store.session().await?.ok_or(Precondition::NoSession)?;
        let card = self.store.card().await?.ok_or(Precondition::NoCard)?;
        session.demo_mode = !session.demo_mode;
        self.store.put_session(session.clone()).await?;
        self.store
            .put_snapshot(SessionSnapshot::project(&session, &card, now_ms()))
            .await?;
        self.bus.publish_merchant(MerchantMessage::SessionUpdate {
            session: session.clone(),
            card,
        });
        info!(demo = session.demo_mode, "demo mode toggled");
        Ok(session)
    }

    // Purchases --------------------------------------------------------

    /// Issues a purchase nonce with a fixed 10-minute expiry. When a
    /// payment config is persisted and the session is not in demo mode,
    /// an external invoice is attached; invoice failure never blocks
    /// issuing the ticket.
    pub async fn generate_purchase_nonce(&self) -> Result<PurchaseNonce> {
        let session = self.store.session().await?.ok_or(Precondition::NoSession)?;
        let card = self.store.card().await?.ok_or(Precondition::NoCard)?;
        let mut purchase = PurchaseNonce::issue(&session, &card, now_ms());

        if !session.demo_mode
            && let Some(config) = self.store.payment_config().await?
            && let Some(provider) = self.providers.get(config.provider_id())
        {
            let request = CreateInvoiceRequest {
                amount_sats: card.min_sats.value(),
                currency: "SATS".to_string(),
                metadata: HashMap::from([
                    ("purchaseNonce".to_string(), purchase.nonce.clone()),
                    ("cardId".to_string(), card.id.clone()),
                    ("sessionId".to_string(), session.id.clone()),
                    ("cardTitle".to_string(), card.title.clone()),
                ]),
                expiration_minutes: (PURCHASE_TTL_MS / 60_000) as u32,
            };
            match provider.create_invoice(&config, request).await {
                Ok(invoice) => {
                    info!(provider = provider.name(), invoice = %invoice.id, "invoice created");
                    purchase.payment = Some(PaymentAttachment {
                        provider: config.provider_id().to_string(),
                        invoice_id: invoice.id,
                        checkout_link: invoice.checkout_link,
                        status: invoice.status,
                    });
                }
                Err(error) => {
                    warn!(%error, "invoice creation failed, issuing ticket without payment attachment");
                }
            }
        }

        self.store.put_purchase(purchase.clone()).await?;
        Ok(purchase)
    }

    /// Purchases still awaiting settlement for the current session.
    pub async fn pending_purchases(&self) -> Result<Vec<PurchaseNonce>> {
        let now = now_ms();
        let session = self.store.session().await?;
        Ok(self
            .store
            .purchases()
            .await?
            .into_iter()
            .filter(|p| {
                p.is_pending(now)
                    && session.as_ref().is_none_or(|s| s.id == p.session_id)
            })
            .collect())
    }

    /// Confirms a purchase as paid: writes exactly one ledger entry,
    /// marks the nonce redeemed, and broadcasts the recomputed punch
    /// total. The broadcast goes out before any local cache refresh so
    /// the customer side observes it promptly.
    pub async fn mark_paid(
        &self,
        nonce: &str,
        customer_id: Option<&str>,
    ) -> Result<PunchLedgerEntry> {
        let now = now_ms();
        let purchase = self
            .store
            .purchase(nonce)
            .await?
            .ok_or_else(|| LoyaltyError::Validation(format!("purchase {nonce} not found")))?;
        if purchase.is_redeemed() {
            return Err(Precondition::AlreadyRedeemed.into());
        }
        if purchase.is_expired(now) {
            return Err(Precondition::Expired.into());
        }
        let card = self.store.card().await?.ok_or(Precondition::NoCard)?;

        // The awarding customer is the caller's choice or whoever
        // claimed the nonce; an unclaimed purchase cannot be awarded.
        let award_customer = customer_id
            .map(str::to_string)
            .or_else(|| purchase.customer_id.clone())
            .ok_or(Precondition::NotClaimed)?;

        let entry = PunchLedgerEntry::award(&purchase, &award_customer, now);
        self.store.append_ledger_entry(entry.clone()).await?;

        let mut redeemed = purchase;
        redeemed.redeemed_at = Some(now);
        redeemed.customer_id = Some(award_customer.clone());
        self.store.put_purchase(redeemed).await?;

        let punches = self.punch_count(&entry.session_id, &award_customer).await?;
        self.bus.publish_merchant(MerchantMessage::PunchAwarded {
            session_id: entry.session_id.clone(),
            card_id: entry.card_id.clone(),
            customer_id: award_customer.clone(),
            punches_earned: punches,
            punches_required: card.punches_required,
        });
        info!(customer = %award_customer, punches, "punch awarded");

        self.refresh_status_cache().await?;
        Ok(entry)
    }

    /// A customer's punch total, recomputed from the ledger. The count
    /// is never read from a stored counter.
    pub async fn punch_count(&self, session_id: &str, customer_id: &str) -> Result<u32> {
        Ok(self
            .store
            .ledger_entries()
            .await?
            .iter()
            .filter(|e| e.session_id == session_id && e.customer_id == customer_id)
            .count() as u32)
    }

    // Redemptions ------------------------------------------------------

    pub async fn fulfill_redemption(&self, request_id: &str) -> Result<()> {
        let mut request = self
            .store
            .redemption(request_id)
            .await?
            .ok_or_else(|| {
                LoyaltyError::Validation(format!("redemption request {request_id} not found"))
            })?;
        request.fulfilled_at = Some(now_ms());
        self.store.put_redemption(request.clone()).await?;
        self.bus.publish_merchant(MerchantMessage::RedemptionUpdate {
            session_id: request.session_id,
            card_id: request.card_id,
            customer_id: request.customer_id,
            status: RedemptionStatus::Fulfilled,
        });
        info!("reward redeemed");
        self.refresh_status_cache().await?;
        Ok(())
    }

    pub async fn redemption_requests(&self) -> Result<Vec<RedemptionRequest>> {
        self.store.redemptions().await
    }

    // Payment configuration --------------------------------------------

    /// Persists a payment provider configuration after verifying it, or
    /// clears the active one. Unverifiable configs are never persisted.
    pub async fn set_payment_config(&self, config: Option<ProviderConfig>) -> Result<()> {
        match config {
            Some(config) => {
                let provider = self.providers.get(config.provider_id()).ok_or_else(|| {
                    LoyaltyError::Validation(format!(
                        "unknown payment provider: {}",
                        config.provider_id()
                    ))
                })?;
                if !provider.verify_config(&config).await {
                    return Err(LoyaltyError::Validation(format!(
                        "invalid {} configuration",
                        provider.name()
                    )));
                }
                self.store.put_payment_config(config).await?;
                info!(provider = provider.name(), "payment provider configured");
            }
            None => {
                self.store.clear_payment_config().await?;
                info!("payment provider configuration cleared");
            }
        }
        Ok(())
    }

    pub async fn verify_payment_connection(&self) -> Result<bool> {
        let Some(config) = self.store.payment_config().await? else {
            return Ok(false);
        };
        let Some(provider) = self.providers.get(config.provider_id()) else {
            return Ok(false);
        };
        Ok(provider.verify_config(&config).await)
    }

    // Invoice reconciliation -------------------------------------------

    /// One reconciliation pass: polls every pending purchase that
    /// carries an invoice and settles the ones whose invoice cleared.
    /// Inactive unless a non-demo session and a payment config exist.
    pub async fn poll_payment_invoices(&self) -> Result<()> {
        let Some(config) = self.store.payment_config().await? else {
            return Ok(());
        };
        let Some(session) = self.store.session().await? else {
            return Ok(());
        };
        if session.demo_mode {
            return Ok(());
        }
        let Some(provider) = self.providers.get(config.provider_id()) else {
            return Ok(());
        };

        let with_invoices: Vec<PurchaseNonce> = self
            .store
            .purchases()
            .await?
            .into_iter()
            .filter(|p| !p.is_redeemed() && p.payment.is_some())
            .collect();

        for purchase in with_invoices {
            let Some(attachment) = purchase.payment.clone() else {
                continue;
            };
            let invoice = match provider.get_invoice(&config, &attachment.invoice_id).await {
                Ok(invoice) => invoice,
                Err(error) => {
                    warn!(%error, invoice = %attachment.invoice_id, "invoice poll failed");
                    continue;
                }
            };

            if invoice.status != attachment.status
                || invoice.checkout_link != attachment.checkout_link
            {
                // Re-read before mutating; a claim may have landed
                // while the poll was in flight.
                if let Some(mut current) = self.store.purchase(&purchase.nonce).await? {
                    current.payment = Some(PaymentAttachment {
                        provider: config.provider_id().to_string(),
                        invoice_id: attachment.invoice_id.clone(),
                        checkout_link: invoice.checkout_link.clone(),
                        status: invoice.status,
                    });
                    self.store.put_purchase(current).await?;
                }
            }

            if invoice.status.is_settled() {
                let Some(card) = self.store.card().await? else {
                    continue;
                };
                if invoice.amount >= Decimal::from(card.min_sats.value()) {
                    match self
                        .mark_paid(&purchase.nonce, purchase.customer_id.as_deref())
                        .await
                    {
                        Ok(_) => {
                            info!(invoice = %invoice.id, "invoice settled, punch awarded automatically");
                        }
                        Err(err) => {
                            warn!(%err, invoice = %invoice.id, "settled invoice could not be awarded");
                        }
                    }
                } else {
                    error!(
                        amount = %invoice.amount,
                        minimum = %card.min_sats,
                        "invoice amount below card minimum, purchase left pending"
                    );
                }
            }
        }
        Ok(())
    }

    // Inbound messages -------------------------------------------------

    pub async fn handle_customer_message(&self, message: CustomerMessage) -> Result<()> {
        match message {
            CustomerMessage::PurchaseClaimed {
                customer_id,
                purchase_nonce,
                ..
            } => self.handle_purchase_claimed(&customer_id, &purchase_nonce).await,
            CustomerMessage::RedeemRequest {
                session_id,
                card_id,
                customer_id,
            } => {
                self.handle_redeem_request(&session_id, &card_id, &customer_id)
                    .await
            }
            CustomerMessage::JoinRequest {
                customer_id,
                join_code,
                ..
            } => self.handle_join_request(&customer_id, &join_code).await,
            CustomerMessage::Leave { customer_id, .. } => {
                info!(customer = %customer_id, "customer left session");
                Ok(())
            }
            CustomerMessage::SyncRequest {
                session_id,
                customer_id,
            } => self.handle_sync_request(&session_id, &customer_id).await,
        }
    }

    async fn handle_purchase_claimed(&self, customer_id: &str, entered: &str) -> Result<()> {
        let now = now_ms();
        let purchase = match self.store.purchase(entered).await? {
            Some(purchase) => Some(purchase),
            // Manual nonce entry is error-prone; try to reconcile the
            // typed code against the pending purchases.
            None => self.reconcile_claimed_nonce(entered, now).await?,
        };
        let Some(mut purchase) = purchase else {
            return Ok(());
        };

        if purchase.is_redeemed() {
            return Err(Precondition::AlreadyRedeemed.into());
        }
        if purchase.is_expired(now) {
            return Err(Precondition::Expired.into());
        }
        if let Some(existing) = &purchase.customer_id
            && existing.as_str() != customer_id
        {
            warn!(nonce = %purchase.nonce, "purchase already claimed by another customer");
            return Ok(());
        }

        purchase.customer_id = Some(customer_id.to_string());
        purchase.claimed_at = Some(now);
        self.store.put_purchase(purchase).await?;
        info!(customer = %customer_id, "customer claimed purchase, awaiting confirmation");
        Ok(())
    }

    async fn reconcile_claimed_nonce(
        &self,
        entered: &str,
        now: i64,
    ) -> Result<Option<PurchaseNonce>> {
        let Some(session) = self.store.session().await? else {
            return Ok(None);
        };
        let pending: Vec<PurchaseNonce> = self
            .store
            .purchases()
            .await?
            .into_iter()
            .filter(|p| p.session_id == session.id && p.is_pending(now))
            .collect();

        if pending.is_empty() {
            warn!(entered, "claim for unknown nonce and no purchases pending");
            return Ok(None);
        }
        match match_pending(entered, &pending) {
            Some(found) => {
                info!(entered, nonce = %found.nonce, "reconciled mistyped purchase code");
                Ok(Some(found.clone()))
            }
            None => {
                if pending.len() == 1 {
                    warn!(
                        entered,
                        correct = %pending[0].nonce,
                        "customer used wrong code"
                    );
                } else {
                    warn!(entered, pending = pending.len(), "claim matched no pending purchase");
                }
                Ok(None)
            }
        }
    }

    async fn handle_redeem_request(
        &self,
        session_id: &str,
        card_id: &str,
        customer_id: &str,
    ) -> Result<()> {
        let Some(session) = self.store.session().await? else {
            return Ok(());
        };
        if session.id != session_id {
            debug!("redeem request for a different session, ignored");
            return Ok(());
        }
        let request = RedemptionRequest::new(session_id, card_id, customer_id, now_ms());
        self.store.put_redemption(request).await?;
        info!(customer = %customer_id, "customer requested a reward");
        self.refresh_status_cache().await?;
        Ok(())
    }

    async fn handle_join_request(&self, customer_id: &str, join_code: &str) -> Result<()> {
        let Some(session) = self.store.session().await? else {
            return Ok(());
        };
        let Some(card) = self.store.card().await? else {
            return Ok(());
        };
        if !session.join_code.eq_ignore_ascii_case(join_code) {
            debug!(join_code, "join request with stale join code, ignored");
            return Ok(());
        }

        self.bus.publish_merchant(MerchantMessage::SessionUpdate {
            session: session.clone(),
            card: card.clone(),
        });

        // A rejoining customer recovers true progress from the ledger.
        let punches = self.punch_count(&session.id, customer_id).await?;
        if punches > 0 {
            self.bus.publish_merchant(MerchantMessage::PunchAwarded {
                session_id: session.id,
                card_id: card.id,
                customer_id: customer_id.to_string(),
                punches_earned: punches,
                punches_required: card.punches_required,
            });
        }
        Ok(())
    }

    async fn handle_sync_request(&self, session_id: &str, customer_id: &str) -> Result<()> {
        let Some(session) = self.store.session().await? else {
            return Ok(());
        };
        let Some(card) = self.store.card().await? else {
            return Ok(());
        };
        if session.id != session_id {
            debug!("sync request for a different session, ignored");
            return Ok(());
        }

        // Always respond, even when the value did not change: the
        // receiving side cannot tell a stale value from a current one.
        let punches = self.punch_count(&session.id, customer_id).await?;
        self.bus.publish_merchant(MerchantMessage::PunchSync {
            session_id: session.id,
            customer_id: customer_id.to_string(),
            punches_earned: punches,
            punches_required: card.punches_required,
        });
        Ok(())
    }

    async fn refresh_status_cache(&self) -> Result<()> {
        match self.store.session().await? {
            Some(session) => {
                let punches_awarded = self.store.ledger_entries().await?.len() as u32;
                let pending_redemptions = self
                    .store
                    .redemptions()
                    .await?
                    .iter()
                    .filter(|r| !r.is_fulfilled())
                    .count() as u32;
                self.store
                    .put_status_cache(StatusCache {
                        session_id: session.id,
                        punches_awarded,
                        pending_redemptions,
                    })
                    .await
            }
            None => self.store.clear_status_cache().await,
        }
    }

    pub async fn status_cache(&self) -> Result<Option<StatusCache>> {
        self.store.status_cache().await
    }

    // Reactor ----------------------------------------------------------

    /// The merchant reactor: inbound customer messages and the invoice
    /// poll timer, handled one at a time.
    pub async fn run(&self) {
        let mut inbound = self.bus.subscribe_customer();
        let mut poll = tokio::time::interval(INVOICE_POLL_INTERVAL);
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Ok(message) => {
                        if let Err(err) = self.handle_customer_message(message).await {
                            if err.is_benign() {
                                warn!(%err, "customer message rejected");
                            } else {
                                error!(%err, "customer message handler failed");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "inbound customer messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = poll.tick() => {
                    if let Err(err) = self.poll_payment_invoices().await {
                        warn!(%err, "invoice reconciliation tick failed");
                    }
                }
            }
        }
    }
}

fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Best-effort match of a manually entered code against the pending
/// purchases: exact, then case-insensitive, then alphanumeric-
/// normalized, then 10-character-prefix partial. With several pending
/// purchases the prefix stage can mismatch; the single-pending case is
/// the only one where ambiguity is fully suppressed.
fn match_pending<'a>(entered: &str, pending: &'a [PurchaseNonce]) -> Option<&'a PurchaseNonce> {
    let cleaned: String = entered.split_whitespace().collect();
    let normalized = normalize(&cleaned);

    pending
        .iter()
        .find(|p| p.nonce == cleaned)
        .or_else(|| pending.iter().find(|p| p.nonce.eq_ignore_ascii_case(&cleaned)))
        .or_else(|| pending.iter().find(|p| normalize(&p.nonce) == normalized))
        .or_else(|| {
            pending.iter().find(|p| {
                let actual = normalize(&p.nonce);
                normalized.len() >= 10
                    && actual.len() >= 10
                    && (normalized[..10] == actual[..10]
                        || normalized.contains(&actual[..10])
                        || actual.contains(&normalized[..10]))
            })
        })
}
