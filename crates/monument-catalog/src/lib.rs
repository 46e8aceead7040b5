//! Geodetic Monument Catalog
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Builds a catalog of physical survey monuments from GNSS observation files
//! (RINEX) and enriches it with classification metadata from KML exports.
//!
//! # Overview
//!
//! - **RINEX**: bounded header parsing and epoch parsing
//! - **Geodesy**: ECEF to WGS84 transform, quantization, planar distance
//! - **Files**: content-addressed upload records and byte storage
//! - **Catalog**: spatial matching, merging and the observation ledger
//! - **Ingest**: per-group transactional batch ingestion with a report
//! - **KML**: enrichment of matched points with register metadata
//!
//! # Concurrency
//!
//! Every mutation runs in a transaction scoped to one upload group.
//! Overlapping ingestions serialize on PostgreSQL advisory locks keyed by
//! grid cell, point id and content digest; lost races are retried.
//!
//! # Example
//!
//! ```no_run
//! use monument_catalog::{config::Config, db, geodesy::Wgs84Transform, ingest, storage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = storage::open_store(&config.storage).await?;
//!     let ingestor = ingest::Ingestor::new(pool, store, Arc::new(Wgs84Transform), config.ingest);
//!
//!     let file = ingest::IncomingFile::from_path("STA10690.25o").await?;
//!     let report = ingestor.ingest_batch(vec![file]).await;
//!     println!("{}", serde_json::to_string_pretty(&report)?);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod geodesy;
pub mod ingest;
pub mod kml;
pub mod models;
pub mod rinex;
pub mod storage;

// Re-export commonly used types
pub use error::{CatalogError, CatalogResult};
