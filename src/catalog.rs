// Catalog of bookable offers
// Shared by every request handler; each offer carries its own lock, the catalog only guards membership.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::model::{Offer, OfferCategory};

// Catalog provider collaborator
#[async_trait]
pub trait CatalogProvider: Send + Sync + 'static {
    async fn load_offers(&self) -> anyhow::Result<Vec<Offer>>;
}

#[derive(Debug, Default)]
pub struct Catalog {
    // Insertion order, used as the final ranking tie-breaker
    offers: RwLock<Vec<Arc<Offer>>>,
    index: DashMap<String, Arc<Offer>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_offers(offers: impl IntoIterator<Item = Offer>) -> Result<Self> {
        let catalog = Self::new();
        for offer in offers {
            catalog.insert(offer)?;
        }
        Ok(catalog)
    }

    pub async fn from_provider(provider: &dyn CatalogProvider) -> Result<Self> {
        let offers = provider
            .load_offers()
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        let catalog = Self::from_offers(offers)?;
        info!(offers = catalog.len(), "catalog loaded");
        Ok(catalog)
    }

    pub fn insert(&self, offer: Offer) -> Result<Arc<Offer>> {
        match self.index.entry(offer.id.clone()) {
            Entry::Occupied(_) => Err(EngineError::InvalidOffer(format!(
                "duplicate offer {}",
                offer.id
            ))),
            Entry::Vacant(slot) => {
                let offer = Arc::new(offer);
                slot.insert(Arc::clone(&offer));
                self.offers.write().push(Arc::clone(&offer));
                debug!(offer_id = %offer.id, units = offer.total_units(), "offer added to catalog");
                Ok(offer)
            }
        }
    }

    pub fn get(&self, offer_id: &str) -> Result<Arc<Offer>> {
        self.index
            .get(offer_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::NotFound(format!("offer {}", offer_id)))
    }

    pub fn snapshot(&self) -> Vec<Arc<Offer>> {
        self.offers.read().clone()
    }

    pub fn by_category(&self, category: OfferCategory) -> Vec<Arc<Offer>> {
        self.offers
            .read()
            .iter()
            .filter(|offer| offer.category() == category)
            .cloned()
            .collect()
    }

    pub fn flights(&self) -> Vec<Arc<Offer>> {
        self.by_category(OfferCategory::Flight)
    }

    pub fn hotels(&self) -> Vec<Arc<Offer>> {
        self.by_category(OfferCategory::Hotel)
    }

    pub fn len(&self) -> usize {
        self.offers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.read().is_empty()
    }
}
