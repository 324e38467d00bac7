//! Record flattening: one weather document in, exactly one row out.
//!
//! Missing or mistyped fields degrade to `None`; flattening never fails.
//! Only the first forecast day is kept, later days are discarded.

use serde_json::{Map, Value};

use crate::models::{FlattenedRow, WeatherDocument};

pub fn flatten(doc: &WeatherDocument) -> FlattenedRow {
    let empty = Map::new();
    let location = doc
        .get("location")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let forecastday = first_forecast_day(doc);

    FlattenedRow {
        location_name: text(location.get("name")),
        location_region: text(location.get("region")),
        location_country: text(location.get("country")),
        location_lat: location.get("lat").and_then(Value::as_f64),
        location_lon: location.get("lon").and_then(Value::as_f64),
        location_tz_id: text(location.get("tz_id")),
        location_localtime_epoch: location.get("localtime_epoch").and_then(Value::as_i64),
        location_localtime: text(location.get("localtime")),
        forecastday_date: forecastday.and_then(|day| text(day.get("date"))),
        params: forecastday.and_then(params_json),
    }
}

/// `forecast.forecastday[0]`, if it is a non-empty object.
fn first_forecast_day(doc: &WeatherDocument) -> Option<&Map<String, Value>> {
    doc.get("forecast")?
        .get("forecastday")?
        .as_array()?
        .first()?
        .as_object()
        .filter(|day| !day.is_empty())
}

fn params_json(day: &Map<String, Value>) -> Option<String> {
    let params: Map<String, Value> = day
        .iter()
        .filter(|(k, _)| k.as_str() != "date")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::to_string(&params).ok()
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
