//! Storage-aware tabular writer and reader for processed artifacts.
//!
//! Rows are written as CSV straight into the object stage and read back from
//! it. Dialect: `,` delimiter, header row, every field quoted, `\` as the
//! escape character (for both `"` and `\` itself), no compression. Null
//! fields are empty cells.

use crate::error::{PipelineError, Result};
use crate::keys::CSV_CONTENT_TYPE;
use crate::models::{FlattenedRow, COLUMNS};
use crate::stage::ObjectStage;

const ESCAPE: u8 = b'\\';

pub fn encode_csv(key: &str, rows: &[FlattenedRow]) -> Result<Vec<u8>> {
    let csv_err = |source| PipelineError::Csv {
        key: key.to_string(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .double_quote(false)
        .escape(ESCAPE)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS).map_err(csv_err)?;
    for row in rows {
        writer.write_record(record(row)).map_err(csv_err)?;
    }
    writer
        .into_inner()
        .map_err(|e| csv_err(csv::Error::from(e.into_error())))
}

pub fn decode_csv(key: &str, bytes: &[u8]) -> Result<Vec<FlattenedRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .escape(Some(ESCAPE))
        .from_reader(bytes);
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<FlattenedRow>, _>>()
        .map_err(|source| PipelineError::Csv {
            key: key.to_string(),
            source,
        })
}

/// Cells of one row in [`COLUMNS`] order. The writer only escapes quotes,
/// so backslashes are escaped here.
fn record(row: &FlattenedRow) -> [String; 10] {
    fn text(value: &Option<String>) -> String {
        value
            .as_deref()
            .map(|s| s.replace('\\', "\\\\"))
            .unwrap_or_default()
    }
    fn number<T: ToString>(value: &Option<T>) -> String {
        value.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    [
        text(&row.location_name),
        text(&row.location_region),
        text(&row.location_country),
        number(&row.location_lat),
        number(&row.location_lon),
        text(&row.location_tz_id),
        number(&row.location_localtime_epoch),
        text(&row.location_localtime),
        text(&row.forecastday_date),
        text(&row.params),
    ]
}

/// Encode `rows` as CSV and upload them under `key`.
pub async fn write_rows(stage: &ObjectStage, key: &str, rows: &[FlattenedRow]) -> Result<()> {
    let body = encode_csv(key, rows)?;
    stage.put(key, body, CSV_CONTENT_TYPE).await?;
    Ok(())
}

/// Download the CSV object at `key` and decode its rows.
pub async fn read_rows(stage: &ObjectStage, key: &str) -> Result<Vec<FlattenedRow>> {
    let bytes = stage.get(key).await?;
    decode_csv(key, &bytes)
}

/// Column names from the header of a CSV artifact.
pub fn header(key: &str, bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .escape(Some(ESCAPE))
        .from_reader(bytes);
    let headers = reader.headers().map_err(|source| PipelineError::Csv {
        key: key.to_string(),
        source,
    })?;
    Ok(headers.iter().map(String::from).collect())
}
