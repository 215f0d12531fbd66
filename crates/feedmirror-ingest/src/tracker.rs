//! Remote file metadata tracking
//!
//! Every download leaves a snapshot of the GET response's transfer headers.
//! The newest snapshot's entity tag drives the next freshness check.

use crate::store::{FeedStore, StoreResult};
use feedmirror_common::RemoteFileSnapshot;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct MetadataTracker {
    store: Arc<dyn FeedStore>,
}

impl MetadataTracker {
    pub fn new(store: Arc<dyn FeedStore>) -> Self {
        Self { store }
    }

    /// Build a snapshot from response headers. Missing or unreadable headers
    /// become absent fields.
    pub fn snapshot_from_headers(headers: &HeaderMap) -> RemoteFileSnapshot {
        let text = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_length = text(CONTENT_LENGTH).and_then(|v| v.trim().parse::<i64>().ok());
        RemoteFileSnapshot::new(content_length, text(LAST_MODIFIED), text(ETAG))
    }

    /// Persist a snapshot of `headers`.
    ///
    /// A store failure is logged and swallowed; losing one snapshot only
    /// costs an extra download on the next cycle.
    pub async fn record(&self, headers: &HeaderMap) -> RemoteFileSnapshot {
        let snapshot = Self::snapshot_from_headers(headers);
        match self.store.insert_snapshot(&snapshot).await {
            Ok(()) => debug!(
                entity_tag = ?snapshot.entity_tag,
                content_length = ?snapshot.content_length,
                "Recorded remote file snapshot"
            ),
            Err(e) => warn!(error = %e, "Failed to record remote file snapshot"),
        }
        snapshot
    }

    pub async fn latest(&self) -> StoreResult<Option<RemoteFileSnapshot>> {
        self.store.latest_snapshot().await
    }

    /// Snapshot history, newest first
    pub async fn history(&self, limit: usize) -> StoreResult<Vec<RemoteFileSnapshot>> {
        self.store.snapshot_history(limit).await
    }
}
