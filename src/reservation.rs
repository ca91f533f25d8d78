// Reservation manager
// Claims seats/rooms all-or-nothing under the offer's own lock and releases them on cancellation.
//
// Unit state machine: AVAILABLE -> BOOKED (claim) -> AVAILABLE (release by the holding reservation).
// The availability check, unit selection and flag flips all happen under one lock acquisition,
// so two callers can never both see the same free unit.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{InventoryUnit, Offer, Reservation};

pub struct ReservationManager {
    catalog: Arc<Catalog>,
    lock_timeout: Duration,
}

impl ReservationManager {
    pub fn new(catalog: Arc<Catalog>, config: &EngineConfig) -> Self {
        Self {
            catalog,
            lock_timeout: config.lock_timeout(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    // Current units of an offer, waiting no longer than a reservation would
    pub fn units(&self, offer_id: &str) -> Result<Vec<InventoryUnit>> {
        self.catalog.get(offer_id)?.units(self.lock_timeout)
    }

    pub fn reserve(&self, offer_id: &str, user_id: &str, quantity: usize) -> Result<Reservation> {
        let offer = self.catalog.get(offer_id)?;
        self.reserve_offer(&offer, user_id, quantity)
    }

    pub fn reserve_offer(
        &self,
        offer: &Offer,
        user_id: &str,
        quantity: usize,
    ) -> Result<Reservation> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let mut units = offer.lock_units(self.lock_timeout).inspect_err(|_| {
            warn!(offer_id = %offer.id, user_id, "timed out waiting for offer lock");
        })?;

        let mut free: Vec<usize> = units
            .iter()
            .enumerate()
            .filter(|(_, unit)| !unit.is_booked())
            .map(|(pos, _)| pos)
            .collect();

        if free.len() < quantity {
            debug!(
                offer_id = %offer.id,
                requested = quantity,
                available = free.len(),
                "reservation rejected"
            );
            return Err(EngineError::InsufficientInventory {
                offer_id: offer.id.clone(),
                requested: quantity,
                available: free.len(),
            });
        }

        // Cheapest units first, ties by unit id
        free.sort_by(|&a, &b| {
            units[a]
                .price
                .total_cmp(&units[b].price)
                .then_with(|| units[a].id.cmp(&units[b].id))
        });

        let reservation_id = Uuid::new_v4();
        let mut unit_ids = BTreeSet::new();
        let mut total_price = 0.0;
        for &pos in free.iter().take(quantity) {
            let unit = &mut units[pos];
            let claimed = unit.claim(reservation_id);
            debug_assert!(claimed, "unit {} was free under the lock", unit.id);
            unit_ids.insert(unit.id.clone());
            total_price += unit.price;
        }
        offer.publish_availability(&units);
        drop(units);

        info!(
            offer_id = %offer.id,
            user_id,
            %reservation_id,
            quantity,
            total_price,
            "units reserved"
        );

        Ok(Reservation {
            id: reservation_id,
            offer_id: offer.id.clone(),
            unit_ids,
            user_id: user_id.to_string(),
            quantity,
            total_price,
            created_at: Utc::now(),
        })
    }

    // Frees the units this reservation still holds; returns how many. Repeating it frees nothing.
    pub fn release(&self, reservation: &Reservation) -> Result<usize> {
        let offer = self.catalog.get(&reservation.offer_id)?;
        let mut units = offer.lock_units(self.lock_timeout).inspect_err(|_| {
            warn!(offer_id = %offer.id, reservation_id = %reservation.id, "timed out waiting for offer lock");
        })?;

        let released = units
            .iter_mut()
            .filter(|unit| reservation.unit_ids.contains(&unit.id))
            .map(|unit| unit.free(reservation.id))
            .filter(|freed| *freed)
            .count();

        if released > 0 {
            offer.publish_availability(&units);
            info!(offer_id = %offer.id, reservation_id = %reservation.id, released, "units released");
        } else {
            debug!(reservation_id = %reservation.id, "release was a no-op");
        }

        Ok(released)
    }
}
