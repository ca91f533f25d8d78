// Supplier feed: JSON inventory records from airlines and hotel chains, turned into catalog offers

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::CatalogProvider;
use crate::error::{EngineError, Result};
use crate::model::{InventoryUnit, Offer, OfferKind, Place, UnitClass};

// Holder recorded for units the supplier reports as already sold elsewhere
pub const EXTERNAL_HOLD: Uuid = Uuid::nil();

// Data structures for the supplier JSON feed
#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierFeed {
    pub feed_id: String,
    pub currency: String,
    pub timestamp: String,
    #[serde(default)]
    pub flights: Vec<SupplierFlight>,
    #[serde(default)]
    pub hotels: Vec<SupplierHotel>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierFlight {
    pub flight_id: String,
    pub airline: String,
    pub airport_code_from: String,
    pub airport_code_to: String,
    pub city_from: String,
    pub city_to: String,
    #[serde(default)]
    pub from_x: Option<f64>,
    #[serde(default)]
    pub from_y: Option<f64>,
    #[serde(default)]
    pub to_x: Option<f64>,
    #[serde(default)]
    pub to_y: Option<f64>,
    pub departure: NaiveDateTime,
    pub arrival: NaiveDateTime,
    #[serde(default = "single_leg")]
    pub legs: u32,
    #[serde(default)]
    pub pets_allowed: bool,
    pub base_price: Option<f64>,
    pub seats: Vec<SupplierSeat>,
}

fn single_leg() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierSeat {
    pub row: u32,
    pub column: String,
    pub which_class: UnitClass,
    pub price: f64,
    #[serde(default)]
    pub is_booked: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierHotel {
    pub hotel_id: String,
    pub name: String,
    pub chain: String,
    pub location: String,
    pub check_in: NaiveDateTime,
    pub check_out: NaiveDateTime,
    #[serde(default)]
    pub pets_allowed: bool,
    pub base_price: Option<f64>,
    pub rooms: Vec<SupplierRoom>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SupplierRoom {
    pub room_id: String,
    pub tier: UnitClass,
    pub price: f64,
    #[serde(default)]
    pub is_booked: bool,
}

fn place(code: String, city: String, x: Option<f64>, y: Option<f64>) -> Place {
    let place = Place::new(code, city);
    match (x, y) {
        (Some(x), Some(y)) => place.with_coords(x, y),
        _ => place,
    }
}

fn unit(id: String, class: UnitClass, price: f64, is_booked: bool) -> InventoryUnit {
    let mut unit = InventoryUnit::new(id, class, price);
    if is_booked {
        unit.claim(EXTERNAL_HOLD);
    }
    unit
}

impl TryFrom<SupplierFlight> for Offer {
    type Error = EngineError;

    fn try_from(item: SupplierFlight) -> Result<Self> {
        let units = item.seats.into_iter().map(|seat| {
            unit(
                format!("{}{}", seat.row, seat.column),
                seat.which_class,
                seat.price,
                seat.is_booked,
            )
        });

        let mut builder = Offer::builder(
            item.flight_id,
            OfferKind::flight(
                place(item.airport_code_from, item.city_from, item.from_x, item.from_y),
                place(item.airport_code_to, item.city_to, item.to_x, item.to_y),
                item.legs,
            ),
        )
        .schedule(item.departure, item.arrival)
        .company(item.airline)
        .pets_allowed(item.pets_allowed)
        .units(units);
        if let Some(price) = item.base_price {
            builder = builder.base_price(price);
        }
        builder.build()
    }
}

impl TryFrom<SupplierHotel> for Offer {
    type Error = EngineError;

    fn try_from(item: SupplierHotel) -> Result<Self> {
        let units = item
            .rooms
            .into_iter()
            .map(|room| unit(room.room_id, room.tier, room.price, room.is_booked));

        let mut builder = Offer::builder(item.hotel_id, OfferKind::hotel(item.name, item.location))
            .schedule(item.check_in, item.check_out)
            .company(item.chain)
            .pets_allowed(item.pets_allowed)
            .units(units);
        if let Some(price) = item.base_price {
            builder = builder.base_price(price);
        }
        builder.build()
    }
}

pub fn parse_feed(json_str: &str) -> Result<Vec<Offer>> {
    let feed: SupplierFeed =
        serde_json::from_str(json_str).map_err(|e| EngineError::Feed(e.to_string()))?;
    debug!(
        feed_id = %feed.feed_id,
        flights = feed.flights.len(),
        hotels = feed.hotels.len(),
        "parsing supplier feed"
    );

    let mut offers = Vec::with_capacity(feed.flights.len() + feed.hotels.len());
    for flight in feed.flights {
        offers.push(Offer::try_from(flight)?);
    }
    for hotel in feed.hotels {
        offers.push(Offer::try_from(hotel)?);
    }
    Ok(offers)
}

#[derive(Debug, Clone)]
pub enum FeedSource {
    Inline(String),
    File(PathBuf),
}

pub struct JsonCatalogProvider {
    source: FeedSource,
}

impl JsonCatalogProvider {
    pub fn new(source: FeedSource) -> Self {
        Self { source }
    }

    pub fn inline(json: impl Into<String>) -> Self {
        Self::new(FeedSource::Inline(json.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(FeedSource::File(path.into()))
    }
}

#[async_trait]
impl CatalogProvider for JsonCatalogProvider {
    async fn load_offers(&self) -> anyhow::Result<Vec<Offer>> {
        let offers = match &self.source {
            FeedSource::Inline(json) => parse_feed(json)?,
            FeedSource::File(path) => {
                let json = tokio::fs::read_to_string(path).await?;
                parse_feed(&json)?
            }
        };
        Ok(offers)
    }
}

// A small sample for inline testing
pub const SAMPLE_FEED: &str = r#"{
    "feed_id": "FEED-20250601",
    "currency": "USD",
    "timestamp": "2025-06-01T06:00:00Z",
    "flights": [
        {
            "flight_id": "DL-402",
            "airline": "Delta",
            "airport_code_from": "ATL",
            "airport_code_to": "LAX",
            "city_from": "Atlanta",
            "city_to": "Los Angeles",
            "from_x": 33.64, "from_y": -84.43,
            "to_x": 33.94, "to_y": -118.41,
            "departure": "2025-06-12T08:05:00",
            "arrival": "2025-06-12T10:20:00",
            "seats": [
                { "row": 3, "column": "A", "which_class": "business", "price": 720.0 },
                { "row": 21, "column": "C", "which_class": "economy", "price": 240.0 },
                { "row": 21, "column": "D", "which_class": "economy", "price": 240.0, "is_booked": true }
            ]
        },
        {
            "flight_id": "UA-1187",
            "airline": "United",
            "airport_code_from": "ATL",
            "airport_code_to": "LAX",
            "city_from": "Atlanta",
            "city_to": "Los Angeles",
            "departure": "2025-06-12T06:30:00",
            "arrival": "2025-06-12T11:45:00",
            "legs": 2,
            "pets_allowed": true,
            "base_price": 199.0,
            "seats": [
                { "row": 30, "column": "F", "which_class": "economy", "price": 199.0 }
            ]
        }
    ],
    "hotels": [
        {
            "hotel_id": "HX-LAX-01",
            "name": "Hampton Inn LAX",
            "chain": "Hilton",
            "location": "Los Angeles",
            "check_in": "2025-06-12T15:00:00",
            "check_out": "2025-06-14T11:00:00",
            "pets_allowed": true,
            "rooms": [
                { "room_id": "204", "tier": "standard", "price": 139.0 },
                { "room_id": "410", "tier": "suite", "price": 289.0 }
            ]
        }
    ]
}"#;
