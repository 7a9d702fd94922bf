use crate::error::{LoyaltyError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A positive satoshi amount.
///
/// Wrapper around `u64` enforcing the domain rule that purchase
/// thresholds are never zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sats(u64);

impl Sats {
    pub fn new(value: u64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(LoyaltyError::Validation(
                "amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Sats {
    type Error = LoyaltyError;

    fn try_from(value: u64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Sats> for Decimal {
    fn from(sats: Sats) -> Self {
        Decimal::from(sats.0)
    }
}

impl fmt::Display for Sats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sats", self.0)
    }
}

/// The merchant's loyalty card. At most one exists at a time; creating
/// another overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyCard {
    pub id: String,
    pub title: String,
    pub punches_required: u32,
    pub min_sats: Sats,
    pub created_at: i64,
    pub last_updated_at: i64,
}

/// Input for creating a card.
#[derive(Debug, Clone)]
pub struct CardInput {
    pub title: String,
    pub punches_required: u32,
    pub min_sats: u64,
}

/// Partial update applied to the existing card.
#[derive(Debug, Clone, Default)]
pub struct CardUpdate {
    pub title: Option<String>,
    pub punches_required: Option<u32>,
    pub min_sats: Option<u64>,
}

impl LoyaltyCard {
    pub fn create(input: CardInput, now: i64) -> Result<Self> {
        if input.title.trim().is_empty() {
            return Err(LoyaltyError::Validation("card title is required".to_string()));
        }
        if input.punches_required == 0 {
            return Err(LoyaltyError::Validation(
                "punches required must be positive".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            punches_required: input.punches_required,
            min_sats: Sats::new(input.min_sats)?,
            created_at: now,
            last_updated_at: now,
        })
    }

    pub fn apply(&mut self, update: CardUpdate, now: i64) -> Result<()> {
        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(LoyaltyError::Validation("card title is required".to_string()));
            }
            self.title = title;
        }
        if let Some(punches) = update.punches_required {
            if punches == 0 {
                return Err(LoyaltyError::Validation(
                    "punches required must be positive".to_string(),
                ));
            }
            self.punches_required = punches;
        }
        if let Some(min_sats) = update.min_sats {
            self.min_sats = Sats::new(min_sats)?;
        }
        self.last_updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_validation() {
        assert!(Sats::new(1).is_ok());
        assert!(matches!(Sats::new(0), Err(LoyaltyError::Validation(_))));
    }

    #[test]
    fn test_card_create() {
        let card = LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            42,
        )
        .unwrap();
        assert_eq!(card.punches_required, 5);
        assert_eq!(card.min_sats.value(), 1000);
        assert_eq!(card.created_at, 42);
        assert_eq!(card.last_updated_at, 42);
    }

    #[test]
    fn test_card_create_rejects_invalid() {
        let zero_punches = LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 0,
                min_sats: 1000,
            },
            0,
        );
        assert!(matches!(zero_punches, Err(LoyaltyError::Validation(_))));

        let empty_title = LoyaltyCard::create(
            CardInput {
                title: "  ".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            0,
        );
        assert!(matches!(empty_title, Err(LoyaltyError::Validation(_))));
    }

    #[test]
    fn test_card_apply_update() {
        let mut card = LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            1,
        )
        .unwrap();

        card.apply(
            CardUpdate {
                punches_required: Some(8),
                ..Default::default()
            },
            2,
        )
        .unwrap();
        assert_eq!(card.punches_required, 8);
        assert_eq!(card.title, "Coffee");
        assert_eq!(card.last_updated_at, 2);

        let bad = card.apply(
            CardUpdate {
                min_sats: Some(0),
                ..Default::default()
            },
            3,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_card_serializes_camel_case() {
        let card = LoyaltyCard::create(
            CardInput {
                title: "Coffee".to_string(),
                punches_required: 5,
                min_sats: 1000,
            },
            1,
        )
        .unwrap();
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["punchesRequired"], 5);
        assert_eq!(json["minSats"], 1000);
        assert!(json["lastUpdatedAt"].is_i64());
    }
}
