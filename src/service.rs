// Booking service: the public surface of the engine
// Search with layered preferences, reserve, release/cancel and booking history for many concurrent sessions.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ledger::{BookingLedger, InMemoryLedgerStore, LedgerEntry, LedgerStore};
use crate::model::{Offer, OfferCategory, Reservation, ReservationId};
use crate::preferences::{
    FilterDimension, InMemoryPreferenceStore, PreferenceSet, PreferenceStore, PreferenceValue,
};
use crate::reservation::ReservationManager;
use crate::search::SearchEngine;
use crate::stats::{EngineStats, EngineStatsReport};

pub struct BookingService {
    config: EngineConfig,
    catalog: Arc<Catalog>,
    search_engine: SearchEngine,
    manager: Arc<ReservationManager>,
    ledger: BookingLedger,
    preferences: Arc<dyn PreferenceStore>,
    stats: EngineStats,
}

impl BookingService {
    pub fn new(
        config: EngineConfig,
        catalog: Arc<Catalog>,
        preferences: Arc<dyn PreferenceStore>,
        ledger_store: Arc<dyn LedgerStore>,
    ) -> Self {
        let manager = Arc::new(ReservationManager::new(Arc::clone(&catalog), &config));
        Self {
            search_engine: SearchEngine::new(&config),
            ledger: BookingLedger::new(Arc::clone(&manager), ledger_store),
            manager,
            catalog,
            preferences,
            stats: EngineStats::default(),
            config,
        }
    }

    // Everything in memory; handy for tests and single-process deployments
    pub fn in_memory(config: EngineConfig, catalog: Arc<Catalog>) -> Self {
        Self::new(
            config,
            catalog,
            Arc::new(InMemoryPreferenceStore::new()),
            Arc::new(InMemoryLedgerStore::new()),
        )
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn stats(&self) -> EngineStatsReport {
        self.stats.report()
    }

    pub async fn save_default(
        &self,
        user_id: &str,
        dimension: FilterDimension,
        value: Option<PreferenceValue>,
    ) -> Result<()> {
        if let Some(value) = &value {
            // Type check only; the set is thrown away
            PreferenceSet::new().set(dimension, value.clone())?;
        }
        self.preferences
            .set_saved_default(user_id, dimension, value)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn effective_preferences(
        &self,
        user_id: &str,
        session: &PreferenceSet,
    ) -> Result<PreferenceSet> {
        let saved = PreferenceSet::load_saved(self.preferences.as_ref(), user_id).await?;
        let effective = PreferenceSet::layered(session, &saved);
        effective.validate()?;
        Ok(effective)
    }

    pub async fn search(
        &self,
        user_id: &str,
        session: &PreferenceSet,
        limit: Option<usize>,
    ) -> Result<Vec<Arc<Offer>>> {
        let prefs = self.effective_preferences(user_id, session).await?;
        let started = Instant::now();
        let results = self.search_engine.search(&self.catalog, &prefs, limit);
        self.stats.record_search(started, results.len());
        Ok(results)
    }

    pub async fn search_category(
        &self,
        user_id: &str,
        category: OfferCategory,
        session: &PreferenceSet,
        limit: Option<usize>,
    ) -> Result<Vec<Arc<Offer>>> {
        let prefs = self.effective_preferences(user_id, session).await?;
        let started = Instant::now();
        let results = self
            .search_engine
            .search_category(&self.catalog, category, &prefs, limit);
        self.stats.record_search(started, results.len());
        Ok(results)
    }

    // Claims the units and records the booking; a failed record gives the units back
    pub async fn reserve(
        &self,
        user_id: &str,
        offer_id: &str,
        quantity: usize,
    ) -> Result<Reservation> {
        let reservation = self
            .manager
            .reserve(offer_id, user_id, quantity)
            .inspect_err(|e| self.stats.record_failure(e))?;

        if let Err(e) = self.ledger.record(user_id, reservation.clone()).await {
            warn!(reservation_id = %reservation.id, error = %e, "could not record booking, rolling back");
            self.roll_back(&reservation).await;
            return Err(e);
        }

        self.stats.record_reservation(reservation.unit_ids.len());
        Ok(reservation)
    }

    // Gives back units of a reservation nobody will ever see. Lock timeouts are retried
    // with backoff until the release goes through; the units would be lost otherwise.
    async fn roll_back(&self, reservation: &Reservation) {
        let mut attempt = 0;
        loop {
            match self.manager.release(reservation) {
                Ok(released) => {
                    debug!(reservation_id = %reservation.id, released, attempt, "rolled back reservation");
                    return;
                }
                Err(e) if e.is_retryable() => {
                    let backoff = self.config.retry.backoff(attempt);
                    debug!(reservation_id = %reservation.id, attempt, backoff_ms = backoff.as_millis() as u64, "rollback waiting for offer lock");
                    tokio::time::sleep(backoff).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    // Only an offer missing from the catalog gets here
                    warn!(reservation_id = %reservation.id, error = %e, "rollback failed");
                    return;
                }
            }
        }
    }

    // Retries lock timeouts with backoff; any other outcome is returned as is
    pub async fn reserve_with_retry(
        &self,
        user_id: &str,
        offer_id: &str,
        quantity: usize,
    ) -> Result<Reservation> {
        let mut attempt = 0;
        loop {
            match self.reserve(user_id, offer_id, quantity).await {
                Err(e) if e.is_retryable() && attempt < self.config.retry.max_retries => {
                    let backoff = self.config.retry.backoff(attempt);
                    debug!(offer_id, attempt, backoff_ms = backoff.as_millis() as u64, "retrying reservation");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    pub async fn release(&self, reservation: &Reservation) -> Result<usize> {
        let released = self
            .ledger
            .release(reservation)
            .await
            .inspect_err(|e| self.stats.record_failure(e))?;
        self.stats.record_release(released, released > 0);
        Ok(released)
    }

    pub async fn cancel(&self, user_id: &str, reservation_id: ReservationId) -> Result<LedgerEntry> {
        let entry = self
            .ledger
            .cancel(user_id, reservation_id)
            .await
            .inspect_err(|e| self.stats.record_failure(e))?;
        self.stats
            .record_release(entry.reservation.unit_ids.len(), true);
        Ok(entry)
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.ledger.history(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BookingStatus;
    use crate::model::fixtures::flight;
    use crate::supplier::{parse_feed, SAMPLE_FEED};
    use async_trait::async_trait;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn sample_service(config: EngineConfig) -> BookingService {
        let catalog = Catalog::from_offers(parse_feed(SAMPLE_FEED).unwrap()).unwrap();
        BookingService::in_memory(config, Arc::new(catalog))
    }

    fn ids(offers: &[Arc<Offer>]) -> Vec<&str> {
        offers.iter().map(|offer| offer.id.as_str()).collect()
    }

    struct ReadOnlyLedgerStore;

    #[async_trait]
    impl LedgerStore for ReadOnlyLedgerStore {
        async fn save(&self, _entry: &LedgerEntry) -> anyhow::Result<()> {
            anyhow::bail!("ledger is read-only")
        }

        async fn load(&self, _user_id: &str) -> anyhow::Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_search_reserve_cancel_flow() {
        let service = sample_service(EngineConfig::default());

        let session = PreferenceSet::from_raw([
            (FilterDimension::RouteFrom, "atlanta"),
            (FilterDimension::RouteTo, "LAX"),
        ])
        .unwrap();
        let flights = service
            .search_category("alice", OfferCategory::Flight, &session, None)
            .await
            .unwrap();
        assert_eq!(ids(&flights), vec!["UA-1187", "DL-402"]);

        let chosen = &flights[1];
        let reservation = service.reserve("alice", &chosen.id, 2).await.unwrap();
        assert_eq!(reservation.total_price, 240.0 + 720.0);
        assert_eq!(chosen.available_count(), 0);

        // Sold out, so it drops out of the results
        let flights = service
            .search_category("alice", OfferCategory::Flight, &session, None)
            .await
            .unwrap();
        assert_eq!(ids(&flights), vec!["UA-1187"]);

        let entry = service.cancel("alice", reservation.id).await.unwrap();
        assert_eq!(entry.status, BookingStatus::Cancelled);
        assert_eq!(chosen.available_count(), 2);

        let history = service.history("alice").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(!history[0].is_active());

        let stats = service.stats();
        assert_eq!(stats.searches, 2);
        assert_eq!(stats.reservations_confirmed, 1);
        assert_eq!(stats.units_claimed, 2);
        assert_eq!(stats.cancellations, 1);
        assert_eq!(stats.units_released, 2);
    }

    #[tokio::test]
    async fn test_saved_defaults_apply_under_session_input() {
        let service = sample_service(EngineConfig::default());
        service
            .save_default("alice", FilterDimension::Company, Some(PreferenceValue::text("Delta")))
            .await
            .unwrap();

        let results = service
            .search("alice", &PreferenceSet::new(), None)
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["DL-402"]);

        // Session input overrides the saved company
        let session = PreferenceSet::from_raw([(FilterDimension::Company, "Hilton")]).unwrap();
        let results = service.search("alice", &session, None).await.unwrap();
        assert_eq!(ids(&results), vec!["HX-LAX-01"]);

        // Other users are unaffected
        let results = service.search("bob", &PreferenceSet::new(), None).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_preferences_are_reported() {
        let service = sample_service(EngineConfig::default());

        let mistyped = service
            .save_default("alice", FilterDimension::TimeLatest, Some(PreferenceValue::Flag(true)))
            .await;
        assert!(matches!(mistyped, Err(EngineError::InvalidPreference { .. })));

        let inverted = PreferenceSet::from_raw([
            (FilterDimension::DateStart, "2025-06-20"),
            (FilterDimension::DateEnd, "2025-06-10"),
        ])
        .unwrap();
        let result = service.search("alice", &inverted, None).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidPreference {
                dimension: FilterDimension::DateEnd,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_failed_record_rolls_back_claim() {
        let catalog = Arc::new(Catalog::from_offers([flight("FL-1", "Delta", 100.0, 1)]).unwrap());
        let service = BookingService::new(
            EngineConfig::default(),
            Arc::clone(&catalog),
            Arc::new(InMemoryPreferenceStore::new()),
            Arc::new(ReadOnlyLedgerStore),
        );

        let result = service.reserve("alice", "FL-1", 2).await;
        assert!(matches!(result, Err(EngineError::Storage(_))));
        assert_eq!(catalog.get("FL-1").unwrap().available_count(), 2);
        assert_eq!(service.stats().reservations_confirmed, 0);
    }

    // Fails every save, but only after another thread has grabbed the offer's lock
    struct ContendedLedgerStore {
        offer: Arc<Offer>,
        hold_for: Duration,
        holder: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
    }

    #[async_trait]
    impl LedgerStore for ContendedLedgerStore {
        async fn save(&self, _entry: &LedgerEntry) -> anyhow::Result<()> {
            let offer = Arc::clone(&self.offer);
            let hold_for = self.hold_for;
            let (locked_tx, locked_rx) = mpsc::channel();
            let handle = thread::spawn(move || {
                let _guard = offer.lock_units(Duration::from_secs(1)).unwrap();
                locked_tx.send(()).unwrap();
                thread::sleep(hold_for);
            });
            locked_rx.recv().unwrap();
            *self.holder.lock().unwrap() = Some(handle);
            anyhow::bail!("disk full")
        }

        async fn load(&self, _user_id: &str) -> anyhow::Result<Vec<LedgerEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rollback_waits_out_a_contended_lock() {
        let catalog = Arc::new(Catalog::from_offers([flight("FL-1", "Delta", 100.0, 1)]).unwrap());
        let store = Arc::new(ContendedLedgerStore {
            offer: catalog.get("FL-1").unwrap(),
            hold_for: Duration::from_millis(200),
            holder: std::sync::Mutex::new(None),
        });
        let mut config = EngineConfig {
            lock_timeout_ms: 20,
            ..EngineConfig::default()
        };
        config.retry.max_backoff_ms = 50;
        let service = BookingService::new(
            config,
            Arc::clone(&catalog),
            Arc::new(InMemoryPreferenceStore::new()),
            Arc::clone(&store) as Arc<dyn LedgerStore>,
        );

        let result = service.reserve("alice", "FL-1", 2).await;
        assert!(matches!(result, Err(EngineError::Storage(_))));

        // The rollback outlived the 200ms hold, far past the 20ms lock timeout
        let offer = catalog.get("FL-1").unwrap();
        assert_eq!(offer.available_count(), 2);
        assert!(offer
            .units(Duration::from_secs(1))
            .unwrap()
            .iter()
            .all(|unit| !unit.is_booked()));
        assert!(service.history("alice").await.unwrap().is_empty());

        let holder = store.holder.lock().unwrap().take();
        holder.unwrap().join().unwrap();
    }

    #[tokio::test]
    async fn test_release_twice_is_a_noop() {
        let service = sample_service(EngineConfig::default());
        let reservation = service.reserve("alice", "HX-LAX-01", 1).await.unwrap();

        assert_eq!(service.release(&reservation).await.unwrap(), 1);
        assert_eq!(service.release(&reservation).await.unwrap(), 0);
        assert_eq!(service.catalog().get("HX-LAX-01").unwrap().available_count(), 2);

        // Already cancelled through release, so cancel has nothing to act on
        let result = service.cancel("alice", reservation.id).await;
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_share_one_catalog() {
        let service = Arc::new(sample_service(EngineConfig {
            lock_timeout_ms: 5_000,
            ..EngineConfig::default()
        }));

        // DL-402 has two sellable seats; twelve sessions race for them
        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.reserve(&format!("user{}", i), "DL-402", 1).await })
            })
            .collect();
        let outcomes = futures::future::join_all(tasks).await;

        let mut confirmed = 0;
        let mut rejected = 0;
        for outcome in outcomes {
            match outcome.unwrap() {
                Ok(_) => confirmed += 1,
                Err(EngineError::InsufficientInventory { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(confirmed, 2);
        assert_eq!(rejected, 10);
        assert_eq!(service.stats().reservations_rejected, 10);
        assert_eq!(service.catalog().get("DL-402").unwrap().available_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reserve_with_retry_outlasts_short_contention() {
        let mut config = EngineConfig {
            lock_timeout_ms: 10,
            ..EngineConfig::default()
        };
        config.retry.max_retries = 10;
        config.retry.initial_backoff_ms = 20;
        let service = sample_service(config);

        let offer = service.catalog().get("UA-1187").unwrap();
        let (locked_tx, locked_rx) = mpsc::channel();
        let holder = thread::spawn(move || {
            let _guard = offer.lock_units(Duration::from_secs(1)).unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(60));
        });
        locked_rx.recv().unwrap();

        let reservation = service
            .reserve_with_retry("alice", "UA-1187", 1)
            .await
            .unwrap();
        assert_eq!(reservation.unit_ids.len(), 1);
        assert!(service.stats().lock_timeouts >= 1);
        holder.join().unwrap();
    }

    #[tokio::test]
    async fn test_reserve_with_retry_does_not_retry_sold_out() {
        let service = sample_service(EngineConfig::default());
        let result = service.reserve_with_retry("alice", "UA-1187", 5).await;
        assert!(matches!(result, Err(EngineError::InsufficientInventory { .. })));
        assert_eq!(service.stats().reservations_rejected, 1);
    }

    #[test]
    fn test_history_from_sync_context() {
        let service = sample_service(EngineConfig::default());
        let history = tokio_test::block_on(async {
            service.reserve("carol", "DL-402", 1).await.unwrap();
            service.history("carol").await.unwrap()
        });
        assert_eq!(history.len(), 1);
        assert!(history[0].is_active());
    }
}
