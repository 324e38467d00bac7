//! Pipeline orchestration.
//!
//! One run is strictly linear:
//!
//! ```text
//! start → extract → transform → load → cleanup → end
//! ```
//!
//! Each step takes the run's [`RunParams`] explicitly and logs inside its own
//! span carrying `date` and `city`. A failure in extract, transform or load
//! aborts the run immediately: cleanup and end do not run, so staged objects
//! from a failed run stay in the bucket. Cleanup itself never fails.
//!
//! Transform, load and cleanup address the staged objects by keys recomputed
//! from the date (see [`crate::keys`]), not by what the previous step
//! returned. Two cities on the same date therefore share keys.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use tracing::{error, info, instrument, warn, Instrument};

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::fetcher::SourceFetcher;
use crate::flatten::flatten;
use crate::keys::{processed_key, raw_key, JSON_CONTENT_TYPE};
use crate::models::{RunParams, WeatherDocument};
use crate::sink::RelationalSink;
use crate::stage::ObjectStage;
use crate::tabular;

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub raw_key: String,
    pub processed_key: String,
    pub rows_loaded: u64,
    pub objects_deleted: usize,
}

pub struct Pipeline {
    stage: Arc<ObjectStage>,
    fetcher: SourceFetcher,
    sink: RelationalSink,
    table: String,
}

impl Pipeline {
    pub fn new(
        stage: Arc<ObjectStage>,
        fetcher: SourceFetcher,
        sink: RelationalSink,
        table: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            fetcher,
            sink,
            table: table.into(),
        }
    }

    /// Wire an S3-backed pipeline from configuration.
    pub fn from_config(config: &Config) -> AnyResult<Self> {
        Ok(Self::new(
            Arc::new(ObjectStage::s3(config.s3.clone())),
            SourceFetcher::from_config(&config.api)?,
            RelationalSink::from_config(&config.db),
            config.pipeline.table.clone(),
        ))
    }

    pub fn stage(&self) -> &Arc<ObjectStage> {
        &self.stage
    }

    /// Run all steps once for `params`.
    pub async fn run(&self, params: &RunParams) -> Result<RunSummary> {
        let span = tracing::info_span!("weather_etl", date = %params.date, city = %params.city);
        async {
            let result = self.run_steps(params).await;
            if let Err(e) = &result {
                error!(
                    "Pipeline failed for {} on {}: {}",
                    params.city,
                    params.date_str(),
                    e
                );
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run the pipeline, re-running it up to `retries` more times on failure.
    ///
    /// Within the fetch cache window a retried run reuses the upstream
    /// document instead of requesting it again.
    pub async fn run_with_retries(
        &self,
        params: &RunParams,
        retries: u32,
        delay: Duration,
    ) -> Result<RunSummary> {
        let mut attempt = 0;
        loop {
            match self.run(params).await {
                Ok(summary) => return Ok(summary),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Retrying run for {} on {} ({}/{}) after error: {}",
                        params.city,
                        params.date_str(),
                        attempt,
                        retries,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_steps(&self, params: &RunParams) -> Result<RunSummary> {
        self.start(params)?;
        let raw_key = self.extract(params).await?;
        let processed_key = self.transform(params).await?;
        let rows_loaded = self.load(params).await?;
        let objects_deleted = self.cleanup(params).await;
        self.end(params);

        Ok(RunSummary {
            raw_key,
            processed_key,
            rows_loaded,
            objects_deleted,
        })
    }

    #[instrument(name = "start", skip_all, fields(date = %params.date, city = %params.city))]
    pub fn start(&self, params: &RunParams) -> Result<()> {
        self.stage.initialize()?;
        info!("Pipeline started");
        Ok(())
    }

    /// Fetch the document and stage it as the raw artifact. Returns its key.
    #[instrument(name = "extract", skip_all, fields(date = %params.date, city = %params.city))]
    pub async fn extract(&self, params: &RunParams) -> Result<String> {
        let doc = self.fetcher.fetch(params).await?;

        let object_name = raw_key(params.date);
        let body = raw_artifact_bytes(&doc)?;

        self.stage
            .put(&object_name, body, JSON_CONTENT_TYPE)
            .await
            .inspect_err(|e| error!("Failed to save weather data to {}: {}", object_name, e))?;

        info!("Weather data saved to {}", object_name);
        Ok(object_name)
    }

    /// Read the date's raw artifact, flatten it and stage the processed CSV.
    /// Returns the processed key.
    #[instrument(name = "transform", skip_all, fields(date = %params.date, city = %params.city))]
    pub async fn transform(&self, params: &RunParams) -> Result<String> {
        let object_name = raw_key(params.date);
        let csv_object_name = processed_key(params.date);

        let bytes = self
            .stage
            .get(&object_name)
            .await
            .inspect_err(|e| error!("Failed to read {}: {}", object_name, e))?;

        let doc: WeatherDocument = serde_json::from_slice(&bytes).map_err(|source| {
            error!("Object {} is not valid JSON: {}", object_name, source);
            PipelineError::Decode {
                key: object_name.clone(),
                source,
            }
        })?;

        let row = flatten(&doc);
        tabular::write_rows(&self.stage, &csv_object_name, &[row])
            .await
            .inspect_err(|e| error!("Failed to write {}: {}", csv_object_name, e))?;

        info!("Data transformed and saved to {}", csv_object_name);
        Ok(csv_object_name)
    }

    /// Append the processed rows for the date to the destination table.
    #[instrument(name = "load", skip_all, fields(date = %params.date, city = %params.city))]
    pub async fn load(&self, params: &RunParams) -> Result<u64> {
        let csv_object_name = processed_key(params.date);

        let rows = tabular::read_rows(&self.stage, &csv_object_name)
            .await
            .inspect_err(|e| error!("Failed to read {}: {}", csv_object_name, e))?;

        let written = self
            .sink
            .append(&self.table, &rows)
            .await
            .inspect_err(|e| error!("Failed to load {} into {}: {}", csv_object_name, self.table, e))?;

        info!("Data loaded to {} from {}", self.table, csv_object_name);
        Ok(written)
    }

    /// Delete both staged objects for the date. Each delete is independent
    /// and failures are only logged. Returns how many objects were deleted.
    #[instrument(name = "cleanup", skip_all, fields(date = %params.date, city = %params.city))]
    pub async fn cleanup(&self, params: &RunParams) -> usize {
        let objects_to_delete = [raw_key(params.date), processed_key(params.date)];
        let mut deleted = 0;
        for object_name in &objects_to_delete {
            if self.stage.delete(object_name).await {
                deleted += 1;
            }
        }
        deleted
    }

    #[instrument(name = "end", skip_all, fields(date = %params.date, city = %params.city))]
    pub fn end(&self, params: &RunParams) {
        self.stage.release();
        info!("Pipeline ended");
    }
}

/// Raw artifact body: pretty-printed UTF-8 JSON, non-ASCII left unescaped.
pub fn raw_artifact_bytes(doc: &WeatherDocument) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(doc).map_err(PipelineError::Encode)
}
