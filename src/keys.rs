//! Object keys for staged artifacts.
//!
//! Keys are a function of the run date only. Two runs for the same date and
//! different cities resolve to the same keys and overwrite each other's
//! artifacts; every step recomputes them rather than receiving them from the
//! previous step.

use chrono::NaiveDate;

pub const RAW_PREFIX: &str = "weather/raw";
pub const PROCESSED_PREFIX: &str = "weather/processed";

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// `weather/raw/weather_{date}.json`
pub fn raw_key(date: NaiveDate) -> String {
    format!("{}/weather_{}.json", RAW_PREFIX, date.format("%Y-%m-%d"))
}

/// `weather/processed/weather_{date}.csv`
pub fn processed_key(date: NaiveDate) -> String {
    format!("{}/weather_{}.csv", PROCESSED_PREFIX, date.format("%Y-%m-%d"))
}
