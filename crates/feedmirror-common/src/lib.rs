//! feedmirror Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the feedmirror workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CommonError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: the documents the sync pipeline writes and the lookup side reads
//!
//! # Example
//!
//! ```no_run
//! use feedmirror_common::types::RemoteFileSnapshot;
//!
//! fn describe(snapshot: &RemoteFileSnapshot) -> feedmirror_common::Result<()> {
//!     if let Some(modified) = snapshot.last_modified_time()? {
//!         tracing::info!(%modified, "remote archive last modified");
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{
    DuplicateEntry, DuplicateGroup, FeedRecord, GroupEnrichment, RemoteFileSnapshot,
};
