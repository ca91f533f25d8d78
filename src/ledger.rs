// Booking ledger
// Per-user record of confirmed reservations; cancellation goes back through the reservation manager.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{Reservation, ReservationId};
use crate::reservation::ReservationManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub reservation: Reservation,
    pub status: BookingStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    fn active(reservation: Reservation) -> Self {
        Self {
            reservation,
            status: BookingStatus::Active,
            cancelled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }
}

// Persistence collaborator; the storage format is its business
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    // Insert or replace the entry for entry.reservation.id
    async fn save(&self, entry: &LedgerEntry) -> anyhow::Result<()>;

    // All entries of a user in insertion order
    async fn load(&self, user_id: &str) -> anyhow::Result<Vec<LedgerEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: DashMap<String, Vec<LedgerEntry>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn save(&self, entry: &LedgerEntry) -> anyhow::Result<()> {
        let mut user_entries = self
            .entries
            .entry(entry.reservation.user_id.clone())
            .or_default();
        match user_entries
            .iter_mut()
            .find(|existing| existing.reservation.id == entry.reservation.id)
        {
            Some(existing) => *existing = entry.clone(),
            None => user_entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn load(&self, user_id: &str) -> anyhow::Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .get(user_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }
}

pub struct BookingLedger {
    manager: Arc<ReservationManager>,
    store: Arc<dyn LedgerStore>,
    // Hydrated from the store on first touch of a user
    entries: DashMap<String, Vec<LedgerEntry>>,
}

impl BookingLedger {
    pub fn new(manager: Arc<ReservationManager>, store: Arc<dyn LedgerStore>) -> Self {
        Self {
            manager,
            store,
            entries: DashMap::new(),
        }
    }

    pub fn manager(&self) -> &Arc<ReservationManager> {
        &self.manager
    }

    async fn hydrate(&self, user_id: &str) -> Result<()> {
        if self.entries.contains_key(user_id) {
            return Ok(());
        }
        let loaded = self
            .store
            .load(user_id)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        self.entries.entry(user_id.to_string()).or_insert(loaded);
        Ok(())
    }

    async fn persist(&self, entry: &LedgerEntry) -> Result<()> {
        self.store
            .save(entry)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn record(&self, user_id: &str, reservation: Reservation) -> Result<LedgerEntry> {
        if reservation.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "reservation {} for user {}",
                reservation.id, user_id
            )));
        }
        self.hydrate(user_id).await?;

        // Recording is keyed by reservation id, same as the store
        if let Some(existing) = self.find(user_id, reservation.id) {
            debug!(user_id, reservation_id = %reservation.id, "booking already recorded");
            return Ok(existing);
        }

        let entry = LedgerEntry::active(reservation);
        self.persist(&entry).await?;
        {
            let mut user_entries = self.entries.entry(user_id.to_string()).or_default();
            if !user_entries
                .iter()
                .any(|existing| existing.reservation.id == entry.reservation.id)
            {
                user_entries.push(entry.clone());
            }
        }

        info!(user_id, reservation_id = %entry.reservation.id, "booking recorded");
        Ok(entry)
    }

    // The Cancelled status is stored before any unit is freed, so a failure at either step
    // leaves the booking Active with its units still held, and the cancel can be retried.
    pub async fn cancel(&self, user_id: &str, reservation_id: ReservationId) -> Result<LedgerEntry> {
        self.hydrate(user_id).await?;

        // Claim the Active -> Cancelled transition first so concurrent cancels cannot both proceed
        let cancelled = {
            let mut user_entries = self.entries.entry(user_id.to_string()).or_default();
            let entry = user_entries
                .iter_mut()
                .find(|entry| entry.reservation.id == reservation_id && entry.is_active())
                .ok_or_else(|| {
                    EngineError::NotFound(format!(
                        "active reservation {} for user {}",
                        reservation_id, user_id
                    ))
                })?;
            entry.status = BookingStatus::Cancelled;
            entry.cancelled_at = Some(Utc::now());
            entry.clone()
        };

        if let Err(e) = self.persist(&cancelled).await {
            self.set_status(user_id, reservation_id, BookingStatus::Active);
            return Err(e);
        }

        if let Err(e) = self.manager.release(&cancelled.reservation) {
            warn!(user_id, %reservation_id, error = %e, "release failed, restoring booking");
            if let Some(restored) = self.set_status(user_id, reservation_id, BookingStatus::Active) {
                if let Err(persist_err) = self.persist(&restored).await {
                    warn!(user_id, %reservation_id, error = %persist_err, "could not store restored booking");
                }
            }
            return Err(e);
        }

        info!(user_id, %reservation_id, "booking cancelled");
        Ok(cancelled)
    }

    // Idempotent: releasing twice frees nothing the second time and never fails on status
    pub async fn release(&self, reservation: &Reservation) -> Result<usize> {
        let released = self.manager.release(reservation)?;

        self.hydrate(&reservation.user_id).await?;
        let changed = {
            let mut user_entries = self
                .entries
                .entry(reservation.user_id.clone())
                .or_default();
            user_entries
                .iter_mut()
                .find(|entry| entry.reservation.id == reservation.id && entry.is_active())
                .map(|entry| {
                    entry.status = BookingStatus::Cancelled;
                    entry.cancelled_at = Some(Utc::now());
                    entry.clone()
                })
        };
        if let Some(entry) = changed {
            // Stays Active until stored, so a retried release finishes the job
            if let Err(e) = self.persist(&entry).await {
                self.set_status(&reservation.user_id, reservation.id, BookingStatus::Active);
                return Err(e);
            }
        }

        Ok(released)
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<LedgerEntry>> {
        self.hydrate(user_id).await?;
        Ok(self
            .entries
            .get(user_id)
            .map(|entries| entries.value().clone())
            .unwrap_or_default())
    }

    fn find(&self, user_id: &str, reservation_id: ReservationId) -> Option<LedgerEntry> {
        self.entries.get(user_id).and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.reservation.id == reservation_id)
                .cloned()
        })
    }

    fn set_status(
        &self,
        user_id: &str,
        reservation_id: ReservationId,
        status: BookingStatus,
    ) -> Option<LedgerEntry> {
        if let Some(mut entries) = self.entries.get_mut(user_id) {
            if let Some(entry) = entries
                .iter_mut()
                .find(|entry| entry.reservation.id == reservation_id)
            {
                entry.status = status;
                if status == BookingStatus::Active {
                    entry.cancelled_at = None;
                }
                return Some(entry.clone());
            }
        }
        warn!(user_id, %reservation_id, "ledger entry vanished while reverting status");
        None
    }
}
