pub mod card;
pub mod customer;
pub mod ledger;
pub mod message;
pub mod payment;
pub mod ports;
pub mod purchase;
pub mod session;

/// Current wall-clock time as epoch milliseconds, the timestamp unit
/// used by every record and wire payload.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
