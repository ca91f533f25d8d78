// Traveler preferences
// A sparse, typed set of filter values layered from session input over saved user defaults

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDimension {
    RouteFrom,
    RouteTo,
    DateStart,
    DateEnd,
    TimeEarliest,
    TimeLatest,
    Company,
    PetsAllowed,
    LayoversAllowed,
    Location,
}

impl FilterDimension {
    pub const ALL: [FilterDimension; 10] = [
        FilterDimension::RouteFrom,
        FilterDimension::RouteTo,
        FilterDimension::DateStart,
        FilterDimension::DateEnd,
        FilterDimension::TimeEarliest,
        FilterDimension::TimeLatest,
        FilterDimension::Company,
        FilterDimension::PetsAllowed,
        FilterDimension::LayoversAllowed,
        FilterDimension::Location,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterDimension::RouteFrom => "route_from",
            FilterDimension::RouteTo => "route_to",
            FilterDimension::DateStart => "date_start",
            FilterDimension::DateEnd => "date_end",
            FilterDimension::TimeEarliest => "time_earliest",
            FilterDimension::TimeLatest => "time_latest",
            FilterDimension::Company => "company",
            FilterDimension::PetsAllowed => "pets_allowed",
            FilterDimension::LayoversAllowed => "layovers_allowed",
            FilterDimension::Location => "location",
        }
    }

    fn value_kind(&self) -> ValueKind {
        match self {
            FilterDimension::RouteFrom
            | FilterDimension::RouteTo
            | FilterDimension::Company
            | FilterDimension::Location => ValueKind::Text,
            FilterDimension::DateStart | FilterDimension::DateEnd => ValueKind::Date,
            FilterDimension::TimeEarliest | FilterDimension::TimeLatest => ValueKind::Time,
            FilterDimension::PetsAllowed | FilterDimension::LayoversAllowed => ValueKind::Flag,
        }
    }
}

impl fmt::Display for FilterDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterDimension {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        FilterDimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == wanted)
            .ok_or_else(|| EngineError::NotFound(format!("filter dimension {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Text,
    Flag,
    Date,
    Time,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PreferenceValue {
    Text(String),
    Flag(bool),
    Date(NaiveDate),
    Time(NaiveTime),
}

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

impl PreferenceValue {
    pub fn text(value: impl Into<String>) -> Self {
        PreferenceValue::Text(value.into())
    }

    // Raw collaborator input -> typed value for the given dimension
    pub fn parse(dimension: FilterDimension, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        match dimension.value_kind() {
            ValueKind::Text => {
                if raw.is_empty() {
                    return Err(EngineError::invalid_preference(dimension, "value is blank"));
                }
                Ok(PreferenceValue::Text(raw.to_string()))
            }
            ValueKind::Flag => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" | "1" => Ok(PreferenceValue::Flag(true)),
                "false" | "no" | "n" | "0" => Ok(PreferenceValue::Flag(false)),
                _ => Err(EngineError::invalid_preference(
                    dimension,
                    format!("'{}' is not a yes/no value", raw),
                )),
            },
            ValueKind::Date => DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .map(PreferenceValue::Date)
                .ok_or_else(|| {
                    EngineError::invalid_preference(dimension, format!("'{}' is not a date", raw))
                }),
            ValueKind::Time => TIME_FORMATS
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(raw, format).ok())
                .map(PreferenceValue::Time)
                .ok_or_else(|| {
                    EngineError::invalid_preference(dimension, format!("'{}' is not a time", raw))
                }),
        }
    }

    fn kind(&self) -> ValueKind {
        match self {
            PreferenceValue::Text(_) => ValueKind::Text,
            PreferenceValue::Flag(_) => ValueKind::Flag,
            PreferenceValue::Date(_) => ValueKind::Date,
            PreferenceValue::Time(_) => ValueKind::Time,
        }
    }
}

// Session value wins, then the saved default, otherwise unset
pub fn merge<T>(session: Option<T>, saved: Option<T>) -> Option<T> {
    session.or(saved)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferenceSet {
    values: BTreeMap<FilterDimension, PreferenceValue>,
}

impl PreferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dimension: FilterDimension, value: PreferenceValue) -> Result<()> {
        if value.kind() != dimension.value_kind() {
            return Err(EngineError::invalid_preference(
                dimension,
                format!("{:?} does not fit this dimension", value),
            ));
        }
        if let PreferenceValue::Text(text) = &value {
            if text.trim().is_empty() {
                return Err(EngineError::invalid_preference(dimension, "value is blank"));
            }
        }
        self.values.insert(dimension, value);
        Ok(())
    }

    pub fn with(mut self, dimension: FilterDimension, value: PreferenceValue) -> Result<Self> {
        self.set(dimension, value)?;
        Ok(self)
    }

    pub fn set_raw(&mut self, dimension: FilterDimension, raw: &str) -> Result<()> {
        let value = PreferenceValue::parse(dimension, raw)?;
        self.set(dimension, value)
    }

    pub fn from_raw<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (FilterDimension, &'a str)>,
    {
        let mut prefs = Self::new();
        for (dimension, raw) in entries {
            prefs.set_raw(dimension, raw)?;
        }
        Ok(prefs)
    }

    pub fn clear(&mut self, dimension: FilterDimension) -> Option<PreferenceValue> {
        self.values.remove(&dimension)
    }

    pub fn get(&self, dimension: FilterDimension) -> Option<&PreferenceValue> {
        self.values.get(&dimension)
    }

    pub fn is_unset(&self, dimension: FilterDimension) -> bool {
        !self.values.contains_key(&dimension)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FilterDimension, &PreferenceValue)> {
        self.values.iter().map(|(dimension, value)| (*dimension, value))
    }

    pub fn text(&self, dimension: FilterDimension) -> Option<&str> {
        match self.values.get(&dimension) {
            Some(PreferenceValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, dimension: FilterDimension) -> Option<bool> {
        match self.values.get(&dimension) {
            Some(PreferenceValue::Flag(flag)) => Some(*flag),
            _ => None,
        }
    }

    pub fn date(&self, dimension: FilterDimension) -> Option<NaiveDate> {
        match self.values.get(&dimension) {
            Some(PreferenceValue::Date(date)) => Some(*date),
            _ => None,
        }
    }

    pub fn time(&self, dimension: FilterDimension) -> Option<NaiveTime> {
        match self.values.get(&dimension) {
            Some(PreferenceValue::Time(time)) => Some(*time),
            _ => None,
        }
    }

    // Effective preferences for one search request
    pub fn layered(session: &PreferenceSet, saved: &PreferenceSet) -> PreferenceSet {
        let values = FilterDimension::ALL
            .into_iter()
            .filter_map(|dimension| {
                merge(session.get(dimension), saved.get(dimension))
                    .map(|value| (dimension, value.clone()))
            })
            .collect();
        PreferenceSet { values }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (
            self.date(FilterDimension::DateStart),
            self.date(FilterDimension::DateEnd),
        ) {
            if start > end {
                return Err(EngineError::invalid_preference(
                    FilterDimension::DateEnd,
                    format!("{} is before {}", end, start),
                ));
            }
        }
        if let (Some(earliest), Some(latest)) = (
            self.time(FilterDimension::TimeEarliest),
            self.time(FilterDimension::TimeLatest),
        ) {
            if earliest > latest {
                return Err(EngineError::invalid_preference(
                    FilterDimension::TimeLatest,
                    format!("{} is before {}", latest, earliest),
                ));
            }
        }
        Ok(())
    }

    // Saved defaults for every dimension, fetched concurrently
    pub async fn load_saved(store: &dyn PreferenceStore, user_id: &str) -> Result<Self> {
        let lookups = FilterDimension::ALL
            .into_iter()
            .map(|dimension| async move {
                store
                    .saved_default(user_id, dimension)
                    .await
                    .map(|value| (dimension, value))
            });
        let found = try_join_all(lookups)
            .await
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        let mut prefs = Self::new();
        for (dimension, value) in found {
            if let Some(value) = value {
                prefs.set(dimension, value)?;
            }
        }
        Ok(prefs)
    }
}

// User-preference store collaborator
#[async_trait]
pub trait PreferenceStore: Send + Sync + 'static {
    async fn saved_default(
        &self,
        user_id: &str,
        dimension: FilterDimension,
    ) -> anyhow::Result<Option<PreferenceValue>>;

    // None clears the saved default
    async fn set_saved_default(
        &self,
        user_id: &str,
        dimension: FilterDimension,
        value: Option<PreferenceValue>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    defaults: DashMap<(String, FilterDimension), PreferenceValue>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn saved_default(
        &self,
        user_id: &str,
        dimension: FilterDimension,
    ) -> anyhow::Result<Option<PreferenceValue>> {
        Ok(self
            .defaults
            .get(&(user_id.to_string(), dimension))
            .map(|entry| entry.value().clone()))
    }

    async fn set_saved_default(
        &self,
        user_id: &str,
        dimension: FilterDimension,
        value: Option<PreferenceValue>,
    ) -> anyhow::Result<()> {
        let key = (user_id.to_string(), dimension);
        match value {
            Some(value) => {
                self.defaults.insert(key, value);
            }
            None => {
                self.defaults.remove(&key);
            }
        }
        Ok(())
    }
}
