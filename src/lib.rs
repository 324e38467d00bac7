//! # Weather ETL
//!
//! Daily batch pipeline that pulls one day of historical weather for a city,
//! stages the raw document and a flattened CSV in an S3-compatible bucket,
//! and appends the flattened row to a relational table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Weather API │──▶│ weather/raw  │──▶│ weather/     │──▶│  SQLite  │
//! │  (fetcher)  │   │  *.json      │   │ processed/   │   │ weather_ │
//! └─────────────┘   └──────────────┘   │  *.csv       │   │   raw    │
//!                                      └──────────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! weather-etl init                          # create the table and the bucket
//! weather-etl run --date 2024-01-01         # one run for the default city
//! weather-etl keys --date 2024-01-01        # show the staged object keys
//! weather-etl status                        # rows loaded so far
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors per pipeline boundary |
//! | [`models`] | Run parameters and the flattened row |
//! | [`keys`] | Staged object keys |
//! | [`cache`] | TTL cache for upstream documents |
//! | [`fetcher`] | Weather API client |
//! | [`flatten`] | Document → row |
//! | [`tabular`] | CSV artifacts in the object stage |
//! | [`stage`] | Lazily connected object storage |
//! | [`sink`] | Bulk append into the destination table |
//! | [`pipeline`] | Step orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema setup |
//! | [`logging`] | Tracing subscriber setup |

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod flatten;
pub mod keys;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod sink;
pub mod stage;
pub mod tabular;
