// Filter evaluation: does one offer satisfy every set preference?
// Dimensions that do not apply to an offer's kind are skipped for that offer.

use crate::model::{Offer, OfferKind};
use crate::preferences::{FilterDimension, PreferenceSet};

pub fn matches(offer: &Offer, prefs: &PreferenceSet) -> bool {
    if offer.available_count() == 0 {
        return false;
    }

    match &offer.kind {
        OfferKind::Flight {
            origin,
            destination,
            legs,
        } => {
            if !prefs
                .text(FilterDimension::RouteFrom)
                .map_or(true, |wanted| origin.matches(wanted))
            {
                return false;
            }

            if !prefs
                .text(FilterDimension::RouteTo)
                .map_or(true, |wanted| destination.matches(wanted))
            {
                return false;
            }

            // Single-leg flights pass whatever the traveler thinks of layovers
            if prefs.flag(FilterDimension::LayoversAllowed) == Some(false) && *legs > 1 {
                return false;
            }
        }
        OfferKind::Hotel { location, .. } => {
            if !prefs
                .text(FilterDimension::Location)
                .map_or(true, |wanted| location.to_lowercase() == wanted.to_lowercase())
            {
                return false;
            }
        }
    }

    let start_date = offer.start.date();
    if !prefs
        .date(FilterDimension::DateStart)
        .map_or(true, |earliest| start_date >= earliest)
    {
        return false;
    }

    if !prefs
        .date(FilterDimension::DateEnd)
        .map_or(true, |latest| start_date <= latest)
    {
        return false;
    }

    if !prefs
        .time(FilterDimension::TimeEarliest)
        .map_or(true, |earliest| offer.start.time() >= earliest)
    {
        return false;
    }

    if !prefs
        .time(FilterDimension::TimeLatest)
        .map_or(true, |latest| offer.end.time() <= latest)
    {
        return false;
    }

    if !prefs
        .text(FilterDimension::Company)
        .map_or(true, |company| offer.company.to_lowercase() == company.to_lowercase())
    {
        return false;
    }

    if !prefs
        .flag(FilterDimension::PetsAllowed)
        .map_or(true, |pets| offer.pets_allowed == pets)
    {
        return false;
    }

    true
}
