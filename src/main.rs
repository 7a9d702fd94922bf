use clap::Parser;
use miette::{IntoDiagnostic, Result};
use punchcard::application::customer::CustomerEngine;
use punchcard::application::merchant::MerchantEngine;
use punchcard::domain::card::CardInput;
use punchcard::domain::message::{CustomerMessage, MerchantMessage};
use punchcard::domain::ports::MerchantStoreBox;
use punchcard::infrastructure::broadcast::BroadcastBus;
use punchcard::infrastructure::in_memory::{InMemoryCustomerStore, InMemoryMerchantStore};
use punchcard::infrastructure::providers::default_registry;
use punchcard::interfaces::payload::{QrPayload, ScanPayload, parse_payload};
use std::path::PathBuf;
use tokio::sync::broadcast::Receiver;

/// Drives a merchant and a customer through a full loyalty session in
/// one process, exchanging messages over the broadcast bus.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a persistent merchant database (optional). If provided,
    /// uses RocksDB; requires the storage-rocksdb feature.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Punches required to complete the demo card.
    #[arg(long, default_value_t = 3)]
    punches: u32,
}

fn build_merchant_store(db_path: Option<&PathBuf>) -> Result<MerchantStoreBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store =
                punchcard::infrastructure::rocksdb::RocksDbStore::open(path).into_diagnostic()?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => Err(miette::miette!(
            "this binary was built without the storage-rocksdb feature"
        )),
        None => Ok(Box::new(InMemoryMerchantStore::new())),
    }
}

/// Deliver everything the customer has broadcast so far.
async fn deliver_to_merchant(
    rx: &mut Receiver<CustomerMessage>,
    merchant: &MerchantEngine,
) -> Result<()> {
    while let Ok(message) = rx.try_recv() {
        merchant
            .handle_customer_message(message)
            .await
            .into_diagnostic()?;
    }
    Ok(())
}

/// Deliver everything the merchant has broadcast so far.
async fn deliver_to_customer(
    rx: &mut Receiver<MerchantMessage>,
    customer: &CustomerEngine,
) -> Result<()> {
    while let Ok(message) = rx.try_recv() {
        customer
            .handle_merchant_message(message)
            .await
            .into_diagnostic()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("punchcard=info")),
        )
        .init();

    let cli = Cli::parse();
    let bus = BroadcastBus::default();

    let merchant = MerchantEngine::new(
        build_merchant_store(cli.db_path.as_ref())?,
        default_registry(),
        bus.clone(),
    );
    let customer = CustomerEngine::new(Box::new(InMemoryCustomerStore::new()), bus.clone());

    let mut to_merchant = bus.subscribe_customer();
    let mut to_customer = bus.subscribe_merchant();

    // Merchant sets up a card and opens a demo session.
    let card = merchant
        .create_card(CardInput {
            title: "Demo Coffee Card".to_string(),
            punches_required: cli.punches,
            min_sats: 1000,
        })
        .await
        .into_diagnostic()?;
    let session = merchant.start_session(true).await.into_diagnostic()?;
    println!("session started, join code {}", session.join_code);

    // The join QR travels through the payload codec, like a real scan.
    let snapshot = punchcard::domain::session::SessionSnapshot::project(
        &session,
        &card,
        punchcard::domain::now_ms(),
    );
    let join_qr = serde_json::to_string(&QrPayload::join_session(&snapshot, &card))
        .into_diagnostic()?;
    match parse_payload(&join_qr) {
        ScanPayload::JoinSession(payload) => {
            let snapshot = payload.into_snapshot().into_diagnostic()?;
            customer
                .join_session_via_snapshot(snapshot)
                .await
                .into_diagnostic()?;
        }
        other => return Err(miette::miette!("unexpected join payload: {other:?}")),
    }
    deliver_to_merchant(&mut to_merchant, &merchant).await?;
    deliver_to_customer(&mut to_customer, &customer).await?;

    // One purchase per required punch: issue, scan, claim, confirm.
    for round in 1..=cli.punches {
        let purchase = merchant.generate_purchase_nonce().await.into_diagnostic()?;
        let ticket_qr = serde_json::to_string(&QrPayload::purchase_ticket(&purchase, &card))
            .into_diagnostic()?;
        match parse_payload(&ticket_qr) {
            ScanPayload::PurchaseTicket(ticket) => {
                customer
                    .handle_purchase_scan(&ticket)
                    .await
                    .into_diagnostic()?;
            }
            other => return Err(miette::miette!("unexpected ticket payload: {other:?}")),
        }
        deliver_to_merchant(&mut to_merchant, &merchant).await?;
        merchant
            .mark_paid(&purchase.nonce, None)
            .await
            .into_diagnostic()?;
        deliver_to_customer(&mut to_customer, &customer).await?;

        let state = customer
            .state()
            .await
            .into_diagnostic()?
            .ok_or_else(|| miette::miette!("customer lost its session state"))?;
        println!(
            "round {round}: punches earned {}/{}",
            state.punches_earned, state.punches_required
        );
    }

    // The card is complete; the customer redeems it.
    customer.request_redemption().await.into_diagnostic()?;
    deliver_to_merchant(&mut to_merchant, &merchant).await?;
    let request = merchant
        .redemption_requests()
        .await
        .into_diagnostic()?
        .into_iter()
        .next()
        .ok_or_else(|| miette::miette!("redeem request never arrived"))?;
    merchant
        .fulfill_redemption(&request.id)
        .await
        .into_diagnostic()?;
    deliver_to_customer(&mut to_customer, &customer).await?;
    println!("reward fulfilled");

    merchant.end_session().await.into_diagnostic()?;
    deliver_to_customer(&mut to_customer, &customer).await?;
    if customer.state().await.into_diagnostic()?.is_some() {
        return Err(miette::miette!("customer state survived session end"));
    }
    println!("session ended");

    Ok(())
}
