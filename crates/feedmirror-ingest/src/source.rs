//! Read-only access to the extracted SQLite dataset

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use feedmirror_common::FeedRecord;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

const COUNT_SQL: &str = "SELECT COUNT(*) FROM podcasts";
const ROWS_SQL: &str =
    "SELECT podcastGuid, url, originalUrl, id AS podcastIndexId, itunesId FROM podcasts";

/// One `podcasts` row as stored in the dump; any column may be NULL
#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    #[sqlx(rename = "podcastGuid")]
    podcast_guid: Option<String>,
    url: Option<String>,
    #[sqlx(rename = "originalUrl")]
    original_url: Option<String>,
    #[sqlx(rename = "podcastIndexId")]
    podcast_index_id: i64,
    #[sqlx(rename = "itunesId")]
    itunes_id: Option<i64>,
}

impl SourceRow {
    fn into_record(self, imported_at: DateTime<Utc>) -> FeedRecord {
        FeedRecord {
            podcast_guid: self.podcast_guid.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            original_url: self.original_url.unwrap_or_default(),
            podcast_index_id: self.podcast_index_id,
            itunes_id: self.itunes_id,
            imported_at,
        }
    }
}

pub struct SourceDataset {
    pool: SqlitePool,
}

impl SourceDataset {
    /// Open the dataset read-only. The file must already exist and must not
    /// change while open.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .immutable(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                SyncError::Load(format!("cannot open dataset {}: {}", path.display(), e))
            })?;
        Ok(Self { pool })
    }

    pub async fn row_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(COUNT_SQL)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| SyncError::Load(format!("cannot count dataset rows: {}", e)))?;
        Ok(count.max(0) as u64)
    }

    /// Forward-only cursor over every row, stamped with `imported_at`
    pub fn records(&self, imported_at: DateTime<Utc>) -> BoxStream<'_, Result<FeedRecord>> {
        sqlx::query_as::<_, SourceRow>(ROWS_SQL)
            .fetch(&self.pool)
            .map(move |row| {
                row.map(|r| r.into_record(imported_at))
                    .map_err(|e| SyncError::Load(format!("cannot read dataset row: {}", e)))
            })
            .boxed()
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
