// Error taxonomy shared by the matching, reservation and ledger components

use crate::preferences::FilterDimension;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid preference for {dimension}: {reason}")]
    InvalidPreference {
        dimension: FilterDimension,
        reason: String,
    },

    #[error("Insufficient inventory on offer {offer_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        offer_id: String,
        requested: usize,
        available: usize,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {waited_ms}ms waiting for offer {offer_id}")]
    LockTimeout { offer_id: String, waited_ms: u64 },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(usize),

    #[error("Invalid offer: {0}")]
    InvalidOffer(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Supplier feed error: {0}")]
    Feed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn invalid_preference(dimension: FilterDimension, reason: impl Into<String>) -> Self {
        EngineError::InvalidPreference {
            dimension,
            reason: reason.into(),
        }
    }

    // Only contention is worth retrying; everything else needs a different request
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
