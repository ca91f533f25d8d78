// Engine counters, updated lock-free from every request handler

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::EngineError;

#[derive(Debug, Default)]
pub struct EngineStats {
    pub searches: AtomicUsize,
    pub offers_returned: AtomicUsize,
    pub reservations_confirmed: AtomicUsize,
    pub reservations_rejected: AtomicUsize,
    pub lock_timeouts: AtomicUsize,
    pub units_claimed: AtomicUsize,
    pub units_released: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub average_search_time_ns: AtomicU64,
}

// Point-in-time copy of EngineStats
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineStatsReport {
    pub searches: usize,
    pub offers_returned: usize,
    pub reservations_confirmed: usize,
    pub reservations_rejected: usize,
    pub lock_timeouts: usize,
    pub units_claimed: usize,
    pub units_released: usize,
    pub cancellations: usize,
    pub average_search_time_ns: u64,
}

impl EngineStats {
    pub fn record_search(&self, started: Instant, returned: usize) {
        let duration_ns = started.elapsed().as_nanos() as u64;
        let searches = self.searches.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.offers_returned.fetch_add(returned, Ordering::SeqCst);

        // Running mean; concurrent updates may interleave, which is fine for a gauge
        let current_avg = self.average_search_time_ns.load(Ordering::SeqCst);
        let new_avg = if searches == 1 {
            duration_ns
        } else {
            (current_avg * (searches - 1) + duration_ns) / searches
        };
        self.average_search_time_ns.store(new_avg, Ordering::SeqCst);
    }

    pub fn record_reservation(&self, units: usize) {
        self.reservations_confirmed.fetch_add(1, Ordering::SeqCst);
        self.units_claimed.fetch_add(units, Ordering::SeqCst);
    }

    pub fn record_failure(&self, error: &EngineError) {
        match error {
            EngineError::InsufficientInventory { .. } => {
                self.reservations_rejected.fetch_add(1, Ordering::SeqCst);
            }
            EngineError::LockTimeout { .. } => {
                self.lock_timeouts.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    pub fn record_release(&self, units: usize, cancelled: bool) {
        self.units_released.fetch_add(units, Ordering::SeqCst);
        if cancelled {
            self.cancellations.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn report(&self) -> EngineStatsReport {
        EngineStatsReport {
            searches: self.searches.load(Ordering::SeqCst),
            offers_returned: self.offers_returned.load(Ordering::SeqCst),
            reservations_confirmed: self.reservations_confirmed.load(Ordering::SeqCst),
            reservations_rejected: self.reservations_rejected.load(Ordering::SeqCst),
            lock_timeouts: self.lock_timeouts.load(Ordering::SeqCst),
            units_claimed: self.units_claimed.load(Ordering::SeqCst),
            units_released: self.units_released.load(Ordering::SeqCst),
            cancellations: self.cancellations.load(Ordering::SeqCst),
            average_search_time_ns: self.average_search_time_ns.load(Ordering::SeqCst),
        }
    }
}
