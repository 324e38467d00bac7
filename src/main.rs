//! # Weather ETL CLI (`weather-etl`)
//!
//! ## Usage
//!
//! ```bash
//! weather-etl --config ./config/weather-etl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `weather-etl init` | Create the destination table and the staging bucket |
//! | `weather-etl run` | Fetch, stage, transform and load one (date, city) |
//! | `weather-etl keys --date <date>` | Print the staged object keys for a date |
//! | `weather-etl flatten <path>` | Flatten a local weather document to CSV |
//! | `weather-etl status` | Print the row count of the destination table |
//!
//! ## Examples
//!
//! ```bash
//! weather-etl init
//! weather-etl run --date 2024-01-01 --city Minsk
//! weather-etl run --retries 3
//! weather-etl flatten ./history.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use weather_etl::config;
use weather_etl::flatten::flatten;
use weather_etl::keys::{processed_key, raw_key};
use weather_etl::logging;
use weather_etl::migrate;
use weather_etl::models::{RunParams, WeatherDocument};
use weather_etl::pipeline::Pipeline;
use weather_etl::sink::RelationalSink;
use weather_etl::stage::s3::S3Backend;
use weather_etl::tabular;

/// Daily weather ETL: API → object stage → SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/weather-etl.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "weather-etl",
    about = "Fetch historical weather, stage it in S3 and load it into a table",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/weather-etl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination table and the staging bucket. Idempotent.
    Init {
        /// Only create the destination table; leave the bucket alone.
        #[arg(long)]
        skip_bucket: bool,
    },

    /// Run the pipeline once for one date and city.
    Run {
        /// Date to fetch (YYYY-MM-DD). Defaults to today.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// City to fetch. Defaults to `pipeline.default_city`.
        #[arg(long)]
        city: Option<String>,

        /// Extra whole-run attempts on failure. Defaults to `pipeline.retries`.
        #[arg(long)]
        retries: Option<u32>,
    },

    /// Print the raw and processed object keys for a date.
    Keys {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },

    /// Flatten a local weather document and print the processed CSV.
    Flatten {
        /// Path to a JSON document as returned by the weather API.
        path: PathBuf,
    },

    /// Print the number of rows in the destination table.
    Status,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}' (expected YYYY-MM-DD): {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Keys { date } => {
            println!("{}", raw_key(*date));
            println!("{}", processed_key(*date));
            return Ok(());
        }
        Commands::Flatten { path } => {
            return print_flattened(path);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { skip_bucket } => {
            migrate::run_migrations(&cfg).await?;
            println!(
                "Database initialized successfully ({} in {}).",
                cfg.pipeline.table,
                cfg.db.path.display()
            );

            if !skip_bucket {
                let created = S3Backend::from_config(&cfg.s3)?
                    .ensure_bucket()
                    .await
                    .with_context(|| format!("Failed to prepare bucket '{}'", cfg.s3.bucket))?;
                let state = if created { "created" } else { "already exists" };
                println!("Bucket {} {}.", cfg.s3.bucket, state);
            }
        }
        Commands::Run {
            date,
            city,
            retries,
        } => {
            let params = RunParams::new(
                date.unwrap_or_else(|| chrono::Local::now().date_naive()),
                city.unwrap_or_else(|| cfg.pipeline.default_city.clone()),
            );
            let retries = retries.unwrap_or(cfg.pipeline.retries);

            let pipeline = Pipeline::from_config(&cfg)?;
            let summary = pipeline
                .run_with_retries(&params, retries, cfg.pipeline.retry_delay())
                .await
                .with_context(|| {
                    format!(
                        "weather ETL failed for {} on {}",
                        params.city,
                        params.date_str()
                    )
                })?;

            println!(
                "Loaded {} row(s) into {} for {} on {} ({} staged object(s) removed).",
                summary.rows_loaded,
                cfg.pipeline.table,
                params.city,
                params.date_str(),
                summary.objects_deleted
            );
        }
        Commands::Status => {
            let sink = RelationalSink::from_config(&cfg.db);
            let rows = sink.count_rows(&cfg.pipeline.table).await?;
            println!("{}: {} row(s)", cfg.pipeline.table, rows);
        }
        Commands::Keys { .. } | Commands::Flatten { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn print_flattened(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let doc: WeatherDocument = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let label = path.display().to_string();
    let csv = tabular::encode_csv(&label, &[flatten(&doc)])?;
    print!("{}", String::from_utf8_lossy(&csv));
    Ok(())
}
