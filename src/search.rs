// Search: filter the catalog, rank survivors, keep the best few
// Reads availability snapshots only, so it never waits on a reservation in progress.

use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::filter::matches;
use crate::model::{Offer, OfferCategory};
use crate::preferences::PreferenceSet;

#[derive(Debug, Clone)]
pub struct SearchEngine {
    default_limit: usize,
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl SearchEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_limit: config.default_search_limit,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    pub fn search(
        &self,
        catalog: &Catalog,
        prefs: &PreferenceSet,
        limit: Option<usize>,
    ) -> Vec<Arc<Offer>> {
        self.rank(catalog.snapshot(), prefs, limit)
    }

    pub fn search_category(
        &self,
        catalog: &Catalog,
        category: OfferCategory,
        prefs: &PreferenceSet,
        limit: Option<usize>,
    ) -> Vec<Arc<Offer>> {
        self.rank(catalog.by_category(category), prefs, limit)
    }

    // Cheapest first, then earliest start, then catalog order
    fn rank(
        &self,
        offers: Vec<Arc<Offer>>,
        prefs: &PreferenceSet,
        limit: Option<usize>,
    ) -> Vec<Arc<Offer>> {
        let limit = limit.unwrap_or(self.default_limit);
        let scanned = offers.len();

        let mut candidates: Vec<(usize, Arc<Offer>)> = offers
            .into_iter()
            .enumerate()
            .filter(|(_, offer)| matches(offer, prefs))
            .collect();
        let matched = candidates.len();

        candidates.sort_by(|(pos_a, a), (pos_b, b)| compare_offers(a, b).then(pos_a.cmp(pos_b)));
        candidates.truncate(limit);

        debug!(scanned, matched, returned = candidates.len(), "search completed");

        candidates.into_iter().map(|(_, offer)| offer).collect()
    }
}

fn compare_offers(a: &Offer, b: &Offer) -> Ordering {
    a.base_price
        .total_cmp(&b.base_price)
        .then_with(|| a.start.cmp(&b.start))
}
