// Preference matching and inventory reservation engine for flights and hotel stays

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod model;
pub mod preferences;
pub mod reservation;
pub mod search;
pub mod service;
pub mod stats;
pub mod supplier;

// Re-export key types for convenience
pub use catalog::{Catalog, CatalogProvider};
pub use config::{EngineConfig, RetryConfig};
pub use error::{EngineError, Result};
pub use filter::matches;
pub use ledger::{BookingLedger, BookingStatus, InMemoryLedgerStore, LedgerEntry, LedgerStore};
pub use model::{
    InventoryUnit, Offer, OfferCategory, OfferKind, Place, Reservation, ReservationId, UnitClass,
};
pub use preferences::{
    merge, FilterDimension, InMemoryPreferenceStore, PreferenceSet, PreferenceStore,
    PreferenceValue,
};
pub use reservation::ReservationManager;
pub use search::SearchEngine;
pub use service::BookingService;
pub use stats::EngineStatsReport;
pub use supplier::{parse_feed, JsonCatalogProvider};
