// Bookable inventory: offers (flights and hotel stays) and the seats/rooms they are made of

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::error::{EngineError, Result};

pub type ReservationId = Uuid;

// Seat classes for flights, room tiers for hotels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
    Standard,
    Deluxe,
    Suite,
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitClass::Economy => "Economy",
            UnitClass::PremiumEconomy => "Premium Economy",
            UnitClass::Business => "Business",
            UnitClass::First => "First",
            UnitClass::Standard => "Standard",
            UnitClass::Deluxe => "Deluxe",
            UnitClass::Suite => "Suite",
        };
        f.write_str(name)
    }
}

// A single seat or room
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryUnit {
    pub id: String,
    pub class: UnitClass,
    pub price: f64,
    held_by: Option<ReservationId>,
}

impl InventoryUnit {
    pub fn new(id: impl Into<String>, class: UnitClass, price: f64) -> Self {
        Self {
            id: id.into(),
            class,
            price,
            held_by: None,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.held_by.is_some()
    }

    pub fn held_by(&self) -> Option<ReservationId> {
        self.held_by
    }

    // AVAILABLE -> BOOKED. Refuses a unit that is already booked.
    pub(crate) fn claim(&mut self, reservation_id: ReservationId) -> bool {
        if self.held_by.is_some() {
            return false;
        }
        self.held_by = Some(reservation_id);
        true
    }

    // BOOKED -> AVAILABLE, only for the reservation that holds the unit
    pub(crate) fn free(&mut self, reservation_id: ReservationId) -> bool {
        if self.held_by == Some(reservation_id) {
            self.held_by = None;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub code: String,
    pub city: String,
    // Map position (x, y) when the supplier provides one
    #[serde(default)]
    pub coords: Option<(f64, f64)>,
}

impl Place {
    pub fn new(code: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            city: city.into(),
            coords: None,
        }
    }

    pub fn with_coords(mut self, x: f64, y: f64) -> Self {
        self.coords = Some((x, y));
        self
    }

    // Straight-line distance on the supplier's map grid
    pub fn distance_to(&self, other: &Place) -> Option<f64> {
        let (x1, y1) = self.coords?;
        let (x2, y2) = other.coords?;
        Some((x1 - x2).hypot(y1 - y2))
    }

    // Either the airport code or the city name identifies the place
    pub fn matches(&self, wanted: &str) -> bool {
        self.code.eq_ignore_ascii_case(wanted) || self.city.to_lowercase() == wanted.to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OfferKind {
    Flight {
        origin: Place,
        destination: Place,
        legs: u32,
    },
    Hotel {
        name: String,
        location: String,
    },
}

impl OfferKind {
    pub fn flight(origin: Place, destination: Place, legs: u32) -> Self {
        OfferKind::Flight {
            origin,
            destination,
            legs,
        }
    }

    pub fn hotel(name: impl Into<String>, location: impl Into<String>) -> Self {
        OfferKind::Hotel {
            name: name.into(),
            location: location.into(),
        }
    }

    pub fn category(&self) -> OfferCategory {
        match self {
            OfferKind::Flight { .. } => OfferCategory::Flight,
            OfferKind::Hotel { .. } => OfferCategory::Hotel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferCategory {
    Flight,
    Hotel,
}

// A bookable travel product. Everything but the units' booked state is immutable.
#[derive(Debug)]
pub struct Offer {
    pub id: String,
    pub kind: OfferKind,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub company: String,
    pub pets_allowed: bool,
    pub base_price: f64,
    // Unit ids, classes and prices never change after build, so these are computed once
    total_units: usize,
    class_prices: BTreeMap<UnitClass, f64>,
    units: Mutex<Vec<InventoryUnit>>,
    // Written under the units lock, read lock-free by search
    available: AtomicUsize,
}

impl Offer {
    pub fn builder(id: impl Into<String>, kind: OfferKind) -> OfferBuilder {
        OfferBuilder {
            id: id.into(),
            kind,
            start: None,
            end: None,
            company: String::new(),
            pets_allowed: false,
            base_price: None,
            units: Vec::new(),
        }
    }

    pub fn category(&self) -> OfferCategory {
        self.kind.category()
    }

    pub fn available_count(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    // Number of flight legs; hotel stays count as a single leg
    pub fn legs(&self) -> u32 {
        match &self.kind {
            OfferKind::Flight { legs, .. } => *legs,
            OfferKind::Hotel { .. } => 1,
        }
    }

    pub fn travel_time(&self) -> Duration {
        self.end - self.start
    }

    // Distance from this flight's origin to the other flight's destination
    pub fn distance_to_destination(&self, other: &Offer) -> Option<f64> {
        match (&self.kind, &other.kind) {
            (OfferKind::Flight { origin, .. }, OfferKind::Flight { destination, .. }) => {
                origin.distance_to(destination)
            }
            _ => None,
        }
    }

    // Point-in-time copy of the units, taken under the same bounded lock as reservations
    pub fn units(&self, timeout: std::time::Duration) -> Result<Vec<InventoryUnit>> {
        Ok(self.lock_units(timeout)?.clone())
    }

    pub fn available_units(&self, timeout: std::time::Duration) -> Result<Vec<InventoryUnit>> {
        Ok(self
            .lock_units(timeout)?
            .iter()
            .filter(|unit| !unit.is_booked())
            .cloned()
            .collect())
    }

    // Cheapest unit of the given class, booked or not
    pub fn price_for_class(&self, class: UnitClass) -> Option<f64> {
        self.class_prices.get(&class).copied()
    }

    pub(crate) fn lock_units(
        &self,
        timeout: std::time::Duration,
    ) -> Result<MutexGuard<'_, Vec<InventoryUnit>>> {
        self.units
            .try_lock_for(timeout)
            .ok_or_else(|| EngineError::LockTimeout {
                offer_id: self.id.clone(),
                waited_ms: timeout.as_millis() as u64,
            })
    }

    // Must be called with the guard returned by lock_units still held
    pub(crate) fn publish_availability(&self, units: &[InventoryUnit]) {
        let available = units.iter().filter(|unit| !unit.is_booked()).count();
        self.available.store(available, Ordering::Release);
    }
}

pub struct OfferBuilder {
    id: String,
    kind: OfferKind,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    company: String,
    pets_allowed: bool,
    base_price: Option<f64>,
    units: Vec<InventoryUnit>,
}

impl OfferBuilder {
    pub fn schedule(mut self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn company(mut self, company: impl Into<String>) -> Self {
        self.company = company.into();
        self
    }

    pub fn pets_allowed(mut self, pets_allowed: bool) -> Self {
        self.pets_allowed = pets_allowed;
        self
    }

    // Defaults to the cheapest unit when not set
    pub fn base_price(mut self, base_price: f64) -> Self {
        self.base_price = Some(base_price);
        self
    }

    pub fn unit(mut self, unit: InventoryUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn units(mut self, units: impl IntoIterator<Item = InventoryUnit>) -> Self {
        self.units.extend(units);
        self
    }

    pub fn build(self) -> Result<Offer> {
        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(EngineError::InvalidOffer(format!(
                    "offer {} has no schedule",
                    self.id
                )))
            }
        };
        if end < start {
            return Err(EngineError::InvalidOffer(format!(
                "offer {} ends before it starts",
                self.id
            )));
        }
        if self.units.is_empty() {
            return Err(EngineError::InvalidOffer(format!(
                "offer {} has no units",
                self.id
            )));
        }
        if let OfferKind::Flight { legs: 0, .. } = self.kind {
            return Err(EngineError::InvalidOffer(format!(
                "flight {} has no legs",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if !unit.price.is_finite() || unit.price < 0.0 {
                return Err(EngineError::InvalidOffer(format!(
                    "unit {} on offer {} has invalid price {}",
                    unit.id, self.id, unit.price
                )));
            }
            if !seen.insert(unit.id.as_str()) {
                return Err(EngineError::InvalidOffer(format!(
                    "duplicate unit {} on offer {}",
                    unit.id, self.id
                )));
            }
        }

        let base_price = match self.base_price {
            Some(price) if price.is_finite() && price >= 0.0 => price,
            Some(price) => {
                return Err(EngineError::InvalidOffer(format!(
                    "offer {} has invalid base price {}",
                    self.id, price
                )))
            }
            None => self
                .units
                .iter()
                .map(|unit| unit.price)
                .min_by(f64::total_cmp)
                .unwrap_or_default(),
        };

        let available = self.units.iter().filter(|unit| !unit.is_booked()).count();
        let mut class_prices: BTreeMap<UnitClass, f64> = BTreeMap::new();
        for unit in &self.units {
            class_prices
                .entry(unit.class)
                .and_modify(|price| *price = price.min(unit.price))
                .or_insert(unit.price);
        }

        Ok(Offer {
            id: self.id,
            kind: self.kind,
            start,
            end,
            company: self.company,
            pets_allowed: self.pets_allowed,
            base_price,
            total_units: self.units.len(),
            class_prices,
            units: Mutex::new(self.units),
            available: AtomicUsize::new(available),
        })
    }
}

// Confirmation of a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub offer_id: String,
    pub unit_ids: BTreeSet<String>,
    pub user_id: String,
    pub quantity: usize,
    pub total_price: f64,
    pub created_at: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn mixed_cabin() -> Offer {
        Offer::builder(
            "FL-7",
            OfferKind::flight(Place::new("ATL", "Atlanta"), Place::new("SEA", "Seattle"), 2),
        )
        .schedule(at(3, 6, 15), at(3, 13, 45))
        .company("Delta")
        .unit(InventoryUnit::new("12C", UnitClass::Economy, 180.0))
        .unit(InventoryUnit::new("2A", UnitClass::Business, 640.0))
        .unit(InventoryUnit::new("2B", UnitClass::Business, 610.0))
        .unit(InventoryUnit::new("12D", UnitClass::Economy, 150.0))
        .build()
        .unwrap()
    }

    #[test]
    fn test_builder_derives_base_price_and_availability() {
        let offer = mixed_cabin();
        assert_eq!(offer.base_price, 150.0);
        assert_eq!(offer.available_count(), 4);
        assert_eq!(offer.total_units(), 4);
        assert_eq!(offer.legs(), 2);
        assert_eq!(offer.category(), OfferCategory::Flight);
        assert_eq!(offer.travel_time(), Duration::minutes(450));
    }

    #[test]
    fn test_price_for_class() {
        let offer = mixed_cabin();
        assert_eq!(offer.price_for_class(UnitClass::Business), Some(610.0));
        assert_eq!(offer.price_for_class(UnitClass::Economy), Some(150.0));
        // No first class cabin: no price, and no out-of-range scan
        assert_eq!(offer.price_for_class(UnitClass::First), None);
    }

    #[test]
    fn test_builder_rejects_invalid_offers() {
        let kind = OfferKind::hotel("Inn", "Fargo");

        let no_units = Offer::builder("H-1", kind.clone())
            .schedule(at(1, 15, 0), at(2, 11, 0))
            .build();
        assert!(matches!(no_units, Err(EngineError::InvalidOffer(_))));

        let no_schedule = Offer::builder("H-2", kind.clone())
            .unit(InventoryUnit::new("1", UnitClass::Standard, 90.0))
            .build();
        assert!(matches!(no_schedule, Err(EngineError::InvalidOffer(_))));

        let backwards = Offer::builder("H-3", kind.clone())
            .schedule(at(2, 11, 0), at(1, 15, 0))
            .unit(InventoryUnit::new("1", UnitClass::Standard, 90.0))
            .build();
        assert!(matches!(backwards, Err(EngineError::InvalidOffer(_))));

        let duplicate = Offer::builder("H-4", kind.clone())
            .schedule(at(1, 15, 0), at(2, 11, 0))
            .unit(InventoryUnit::new("1", UnitClass::Standard, 90.0))
            .unit(InventoryUnit::new("1", UnitClass::Deluxe, 120.0))
            .build();
        assert!(matches!(duplicate, Err(EngineError::InvalidOffer(_))));

        let negative = Offer::builder("H-5", kind)
            .schedule(at(1, 15, 0), at(2, 11, 0))
            .unit(InventoryUnit::new("1", UnitClass::Standard, -5.0))
            .build();
        assert!(matches!(negative, Err(EngineError::InvalidOffer(_))));
    }

    #[test]
    fn test_unit_claim_and_free() {
        let mut unit = InventoryUnit::new("3F", UnitClass::Economy, 99.0);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(unit.claim(first));
        assert!(unit.is_booked());
        // BOOKED never goes to BOOKED again
        assert!(!unit.claim(second));
        assert_eq!(unit.held_by(), Some(first));

        // Only the holder can free it
        assert!(!unit.free(second));
        assert!(unit.free(first));
        assert!(!unit.is_booked());
        assert!(!unit.free(first));
    }

    #[test]
    fn test_place_matching_is_case_insensitive() {
        let place = Place::new("LHR", "London");
        assert!(place.matches("lhr"));
        assert!(place.matches("LONDON"));
        assert!(!place.matches("LGW"));
        assert!(!place.matches("Lond"));
    }

    #[test]
    fn test_place_distance() {
        let jfk = Place::new("JFK", "New York").with_coords(1.0, 2.0);
        let lhr = Place::new("LHR", "London").with_coords(4.0, 6.0);
        assert_eq!(jfk.distance_to(&lhr), Some(5.0));
        assert_eq!(lhr.distance_to(&jfk), Some(5.0));
        assert_eq!(jfk.distance_to(&Place::new("CDG", "Paris")), None);
    }

    #[test]
    fn test_distance_to_destination() {
        let outbound = Offer::builder(
            "FL-1",
            OfferKind::flight(
                Place::new("JFK", "New York").with_coords(0.0, 0.0),
                Place::new("LHR", "London").with_coords(30.0, 40.0),
                1,
            ),
        )
        .schedule(at(1, 9, 0), at(1, 21, 0))
        .unit(InventoryUnit::new("1A", UnitClass::Economy, 300.0))
        .build()
        .unwrap();
        let onward = Offer::builder(
            "FL-2",
            OfferKind::flight(
                Place::new("LHR", "London").with_coords(30.0, 40.0),
                Place::new("CDG", "Paris").with_coords(6.0, 8.0),
                1,
            ),
        )
        .schedule(at(2, 9, 0), at(2, 11, 0))
        .unit(InventoryUnit::new("1A", UnitClass::Economy, 90.0))
        .build()
        .unwrap();

        // JFK (0, 0) to CDG (6, 8)
        assert_eq!(outbound.distance_to_destination(&onward), Some(10.0));
        assert_eq!(outbound.distance_to_destination(&hotel("H-1", "Hilton", 90.0, 1)), None);
        // Fixture flights carry no coordinates
        assert_eq!(flight("FL-3", "Delta", 100.0, 1).distance_to_destination(&onward), None);
    }

    #[test]
    fn test_snapshots_are_bounded_by_the_lock_timeout() {
        let offer = mixed_cabin();
        let timeout = std::time::Duration::from_millis(10);
        assert_eq!(offer.units(timeout).unwrap().len(), 4);

        let _held = offer.lock_units(timeout).unwrap();
        assert!(matches!(offer.units(timeout), Err(EngineError::LockTimeout { .. })));
        assert!(matches!(
            offer.available_units(timeout),
            Err(EngineError::LockTimeout { .. })
        ));
        // Lock-free while the units are held
        assert_eq!(offer.total_units(), 4);
        assert_eq!(offer.price_for_class(UnitClass::Business), Some(610.0));
    }

    #[test]
    fn test_lock_units_times_out_while_held() {
        let offer = flight("FL-1", "Delta", 100.0, 1);
        let _held = offer.lock_units(std::time::Duration::from_millis(10)).unwrap();

        let result = offer.lock_units(std::time::Duration::from_millis(10));
        assert!(matches!(
            result,
            Err(EngineError::LockTimeout { waited_ms: 10, .. })
        ));
    }
}
