use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoyaltyError>;

/// A failed precondition on an engine operation. Reported to the acting
/// user; the operation makes no state change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    #[error("no active session")]
    NoSession,
    #[error("no loyalty card configured")]
    NoCard,
    #[error("purchase not claimed by a customer yet")]
    NotClaimed,
    #[error("purchase already redeemed")]
    AlreadyRedeemed,
    #[error("purchase expired")]
    Expired,
    #[error("wrong session")]
    WrongSession,
    #[error("purchase already scanned")]
    AlreadyScanned,
}

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    Precondition(#[from] Precondition),
    #[error("payment provider error: {0}")]
    Integration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
}

impl LoyaltyError {
    /// Whether this error is one of the expected, no-state-change kinds
    /// that a reactor loop reports without treating as a fault.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Precondition(_))
    }
}
