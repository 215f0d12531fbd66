//! Secondary indexes on the record collection

use crate::error::{Result, StageOutcome, SyncError};
use crate::store::{FeedStore, RecordField};
use tracing::{debug, info};

/// Create any missing lookup index. Existing indexes are left untouched.
pub async fn ensure_indexes(store: &dyn FeedStore) -> Result<StageOutcome> {
    let mut created = Vec::new();
    for field in RecordField::ALL {
        let new = store
            .ensure_index(field)
            .await
            .map_err(|e| e.into_sync(SyncError::Store))?;
        if new {
            created.push(field.name());
        } else {
            debug!(index = field.name(), "Index already present");
        }
    }

    if created.is_empty() {
        return Ok(StageOutcome::skipped("all indexes present"));
    }
    info!(indexes = ?created, "Created indexes");
    Ok(StageOutcome::Completed)
}
