//! feedmirror ingest library
//!
//! Keeps a local document store in sync with the published Podcast Index
//! feed dump and derives a duplicate GUID analysis from it.
//!
//! # Pipeline
//!
//! Each cycle runs these stages in order, every one skipping itself when its
//! output is already in place:
//!
//! 1. **Freshness check** - HEAD with `If-None-Match` against the last entity tag
//! 2. **Fetch** - streamed download of the `.tgz` archive
//! 3. **Extract** - the SQLite dataset member out of the archive
//! 4. **Load** - dataset rows into the record collection, 1000 per batch
//! 5. **Index** - lookup indexes on the record collection
//! 6. **Detect** - duplicate GUID groups
//! 7. **Enrich** - distinct domains and ids per duplicate group
//!
//! # Example
//!
//! ```no_run
//! use feedmirror_ingest::config::SyncConfig;
//! use feedmirror_ingest::store::PgStore;
//! use feedmirror_ingest::sync::SyncPipeline;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::from_env()?;
//!     let store = Arc::new(PgStore::connect_lazy(&config.database)?);
//!     let pipeline = SyncPipeline::new(config, store)?;
//!     let report = pipeline.run_once().await;
//!     println!("success: {}", report.is_success());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod duplicates;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod indexes;
pub mod loader;
pub mod source;
pub mod store;
pub mod sync;
pub mod tracker;

pub use error::{Result, StageOutcome, SyncError};
