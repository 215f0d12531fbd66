//! Duplicate GUID analysis
//!
//! [`detect_duplicates`] materializes one group per GUID shared by more than
//! one feed. [`enrich_duplicates`] then annotates every group with the
//! distinct URL authorities and directory ids behind it.

use crate::error::{Result, StageOutcome, SyncError};
use crate::store::FeedStore;
use feedmirror_common::types::url_authority;
use feedmirror_common::{DuplicateGroup, GroupEnrichment};
use tracing::{debug, info, warn};

/// Build the duplicate collection unless it already exists
pub async fn detect_duplicates(store: &dyn FeedStore) -> Result<StageOutcome> {
    let exists = store
        .duplicates_exist()
        .await
        .map_err(|e| e.into_sync(SyncError::Aggregation))?;
    if exists {
        info!("Duplicate groups already materialized");
        return Ok(StageOutcome::skipped("duplicate groups exist"));
    }

    let groups = store
        .materialize_duplicates()
        .await
        .map_err(|e| e.into_sync(SyncError::Aggregation))?;
    info!(groups, "Materialized duplicate groups");
    Ok(StageOutcome::Completed)
}

/// Distinct authorities and ids of one group. Unparseable URLs are logged
/// and left out of the domain set.
pub fn enrich_group(group: &DuplicateGroup) -> GroupEnrichment {
    let mut enrichment = GroupEnrichment::default();
    for entry in &group.duplicates {
        match url_authority(&entry.url) {
            Ok(authority) => {
                enrichment.unique_domains.insert(authority);
            },
            Err(e) => warn!(
                podcast_guid = %group.podcast_guid,
                podcast_index_id = entry.podcast_index_id,
                error = %e,
                "Skipping malformed feed URL"
            ),
        }
        enrichment.podcast_index_ids.insert(entry.podcast_index_id);
    }
    enrichment
}

/// Write enrichment fields onto every duplicate group, one page at a time
pub async fn enrich_duplicates(store: &dyn FeedStore, page_size: usize) -> Result<StageOutcome> {
    let page_size = page_size.max(1);
    let mut after: Option<String> = None;
    let mut enriched = 0u64;

    loop {
        let page = store
            .duplicate_page(after.as_deref(), page_size)
            .await
            .map_err(|e| e.into_sync(SyncError::Aggregation))?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.podcast_guid.clone());

        for group in &page {
            let enrichment = enrich_group(group);
            let saved = store
                .save_enrichment(&group.podcast_guid, &enrichment)
                .await
                .map_err(|e| e.into_sync(SyncError::Aggregation))?;
            if saved {
                enriched += 1;
            }
        }
        debug!(enriched, "Enriched page of duplicate groups");

        if page.len() < page_size {
            break;
        }
    }

    info!(groups = enriched, "Enriched duplicate groups");
    Ok(StageOutcome::Completed)
}
