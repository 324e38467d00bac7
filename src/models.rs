//! Core data models that flow through the pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Opaque JSON document returned by the weather API for one (date, city).
///
/// Only `location` and `forecast.forecastday[0]` are ever looked at.
pub type WeatherDocument = serde_json::Value;

/// Parameters of one run. Immutable for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParams {
    pub date: NaiveDate,
    pub city: String,
}

impl RunParams {
    pub fn new(date: NaiveDate, city: impl Into<String>) -> Self {
        Self {
            date,
            city: city.into(),
        }
    }

    /// Parse an ISO `YYYY-MM-DD` date.
    pub fn parse(date: &str, city: impl Into<String>) -> Result<Self, chrono::ParseError> {
        Ok(Self::new(
            NaiveDate::parse_from_str(date, "%Y-%m-%d")?,
            city,
        ))
    }

    /// The date as it appears in object keys and API queries.
    pub fn date_str(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Column names of a [`FlattenedRow`], in header order.
pub const COLUMNS: [&str; 10] = [
    "location_name",
    "location_region",
    "location_country",
    "location_lat",
    "location_lon",
    "location_tz_id",
    "location_localtime_epoch",
    "location_localtime",
    "forecastday_date",
    "params",
];

/// Single-row tabular projection of a [`WeatherDocument`].
///
/// Field order is the CSV header order and the destination column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlattenedRow {
    pub location_name: Option<String>,
    pub location_region: Option<String>,
    pub location_country: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lon: Option<f64>,
    pub location_tz_id: Option<String>,
    pub location_localtime_epoch: Option<i64>,
    pub location_localtime: Option<String>,
    pub forecastday_date: Option<String>,
    /// JSON copy of `forecast.forecastday[0]` without its `date` field.
    pub params: Option<String>,
}
