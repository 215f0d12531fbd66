//! Bulk load of dataset rows into the record collection
//!
//! The load is all-or-nothing from the point of view of the next cycle: the
//! collection either holds exactly as many records as the dataset has rows,
//! or it is dropped and rebuilt from scratch.

use crate::config::PipelineConfig;
use crate::error::{Result, StageOutcome, SyncError};
use crate::source::SourceDataset;
use crate::store::FeedStore;
use chrono::{DateTime, Utc};
use feedmirror_common::FeedRecord;
use futures::StreamExt;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of one loader run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Rows in the source dataset
    pub rows: u64,
    pub inserted: u64,
    pub batches: u64,
    /// True when the collection already matched the dataset
    pub skipped: bool,
    /// Shared timestamp of every inserted record
    pub imported_at: Option<DateTime<Utc>>,
}

impl LoadReport {
    pub fn outcome(&self) -> StageOutcome {
        if self.skipped {
            StageOutcome::skipped(format!("{} records already loaded", self.rows))
        } else {
            StageOutcome::Completed
        }
    }
}

pub struct RecordLoader {
    store: Arc<dyn FeedStore>,
    batch_size: usize,
    invalidate_duplicates: bool,
}

impl RecordLoader {
    pub fn new(store: Arc<dyn FeedStore>, pipeline: &PipelineConfig) -> Self {
        Self {
            store,
            batch_size: pipeline.load_batch_size.max(1),
            invalidate_duplicates: pipeline.invalidate_duplicates_on_reload,
        }
    }

    /// Load the dataset at `dataset_path` unless the collection already
    /// holds one record per row.
    pub async fn load(&self, dataset_path: &Path) -> Result<LoadReport> {
        let source = SourceDataset::open(dataset_path).await?;
        let rows = source.row_count().await?;
        let existing = self
            .store
            .count_records()
            .await
            .map_err(|e| e.into_sync(SyncError::Load))?;

        if existing == rows {
            info!(rows, "Record collection already matches dataset");
            source.close().await;
            return Ok(LoadReport {
                rows,
                inserted: 0,
                batches: 0,
                skipped: true,
                imported_at: None,
            });
        }

        info!(rows, existing, "Reloading record collection");
        self.store
            .reset_records()
            .await
            .map_err(|e| e.into_sync(SyncError::Load))?;
        if self.invalidate_duplicates {
            let dropped = self
                .store
                .drop_duplicates()
                .await
                .map_err(|e| e.into_sync(SyncError::Load))?;
            if dropped {
                info!("Dropped duplicate groups derived from previous load");
            }
        }

        let imported_at = Utc::now();
        let mut report = LoadReport {
            rows,
            inserted: 0,
            batches: 0,
            skipped: false,
            imported_at: Some(imported_at),
        };

        let mut batch: Vec<FeedRecord> = Vec::with_capacity(self.batch_size);
        {
            let mut records = source.records(imported_at);
            while let Some(record) = records.next().await {
                batch.push(record?);
                if batch.len() == self.batch_size {
                    self.flush(&mut batch, &mut report).await?;
                }
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut report).await?;
        }
        source.close().await;

        info!(
            inserted = report.inserted,
            batches = report.batches,
            "Loaded record collection"
        );
        Ok(report)
    }

    async fn flush(&self, batch: &mut Vec<FeedRecord>, report: &mut LoadReport) -> Result<()> {
        let written = self
            .store
            .insert_records(batch)
            .await
            .map_err(|e| e.into_sync(SyncError::Load))?;
        report.inserted += written;
        report.batches += 1;
        debug!(batch = report.batches, total = report.inserted, "Inserted batch");
        batch.clear();
        Ok(())
    }
}
