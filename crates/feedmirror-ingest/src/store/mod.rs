//! Document store interface
//!
//! The pipeline writes three collections:
//!
//! - feed records, one document per dataset row
//! - remote file snapshots, append-only transfer metadata
//! - duplicate groups, derived from the feed records
//!
//! [`FeedStore`] is the seam between pipeline stages and the backing store.
//! [`PgStore`] is the production implementation; [`MemoryStore`] keeps
//! everything in process for tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use feedmirror_common::{DuplicateGroup, FeedRecord, GroupEnrichment, RemoteFileSnapshot};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const RECORDS_COLLECTION: &str = "feed_records";
pub const SNAPSHOTS_COLLECTION: &str = "remote_file_snapshots";
pub const DUPLICATES_COLLECTION: &str = "duplicate_groups";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached at all
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reached but refused or failed the operation
    #[error("store rejected operation: {0}")]
    Rejected(String),

    #[error("malformed document: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Malformed(err.to_string())
            },
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

/// Lookup fields of the record collection, each backed by a secondary index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordField {
    PodcastGuid,
    Url,
    PodcastIndexId,
    ItunesId,
}

impl RecordField {
    pub const ALL: [RecordField; 4] = [
        RecordField::PodcastGuid,
        RecordField::Url,
        RecordField::PodcastIndexId,
        RecordField::ItunesId,
    ];

    /// Document field name, also used as the index name
    pub fn name(self) -> &'static str {
        match self {
            RecordField::PodcastGuid => "podcastGuid",
            RecordField::Url => "url",
            RecordField::PodcastIndexId => "podcastIndexId",
            RecordField::ItunesId => "itunesId",
        }
    }

    pub(crate) fn column(self) -> &'static str {
        match self {
            RecordField::PodcastGuid => "podcast_guid",
            RecordField::Url => "url",
            RecordField::PodcastIndexId => "podcast_index_id",
            RecordField::ItunesId => "itunes_id",
        }
    }
}

/// Point query served to the lookup side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordQuery {
    ByGuid(String),
    ByUrl(String),
    ByItunesId(i64),
    ByPodcastIndexId(i64),
}

impl RecordQuery {
    pub fn field(&self) -> RecordField {
        match self {
            RecordQuery::ByGuid(_) => RecordField::PodcastGuid,
            RecordQuery::ByUrl(_) => RecordField::Url,
            RecordQuery::ByItunesId(_) => RecordField::ItunesId,
            RecordQuery::ByPodcastIndexId(_) => RecordField::PodcastIndexId,
        }
    }

    pub(crate) fn matches(&self, record: &FeedRecord) -> bool {
        match self {
            RecordQuery::ByGuid(guid) => record.podcast_guid == *guid,
            RecordQuery::ByUrl(url) => record.url == *url,
            RecordQuery::ByItunesId(id) => record.itunes_id == Some(*id),
            RecordQuery::ByPodcastIndexId(id) => record.podcast_index_id == *id,
        }
    }
}

/// Storage operations used by the sync pipeline and the lookup side.
///
/// Each call is atomic on its own; nothing here spans calls. Readers may
/// observe an empty or partially loaded record collection while a reload is
/// in progress.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Cheap round trip to confirm the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    // ---- remote file snapshots ------------------------------------------

    async fn insert_snapshot(&self, snapshot: &RemoteFileSnapshot) -> StoreResult<()>;

    /// Most recent snapshot by `observed_at`
    async fn latest_snapshot(&self) -> StoreResult<Option<RemoteFileSnapshot>>;

    /// Newest first
    async fn snapshot_history(&self, limit: usize) -> StoreResult<Vec<RemoteFileSnapshot>>;

    // ---- feed records ---------------------------------------------------

    async fn count_records(&self) -> StoreResult<u64>;

    /// Drop the record collection and recreate it empty (indexes included)
    async fn reset_records(&self) -> StoreResult<()>;

    /// Insert one batch in a single bulk write; returns rows written
    async fn insert_records(&self, batch: &[FeedRecord]) -> StoreResult<u64>;

    /// Create the ascending index for `field` unless it already exists.
    /// Returns true when the index was created by this call.
    async fn ensure_index(&self, field: RecordField) -> StoreResult<bool>;

    async fn list_indexes(&self) -> StoreResult<Vec<String>>;

    // ---- duplicate groups -----------------------------------------------

    async fn duplicates_exist(&self) -> StoreResult<bool>;

    /// Group records by GUID, keep groups with more than one member and
    /// store them as the duplicate collection. Returns the group count.
    async fn materialize_duplicates(&self) -> StoreResult<u64>;

    /// Number of groups; zero when the collection does not exist
    async fn count_duplicates(&self) -> StoreResult<u64>;

    /// Returns true if a collection was dropped
    async fn drop_duplicates(&self) -> StoreResult<bool>;

    /// Groups ordered by key, starting after `after`
    async fn duplicate_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DuplicateGroup>>;

    /// Returns false when no group has that key
    async fn save_enrichment(
        &self,
        podcast_guid: &str,
        enrichment: &GroupEnrichment,
    ) -> StoreResult<bool>;

    // ---- lookup ---------------------------------------------------------

    async fn find_records(&self, query: &RecordQuery) -> StoreResult<Vec<FeedRecord>>;

    async fn find_by_guid(&self, podcast_guid: &str) -> StoreResult<Vec<FeedRecord>> {
        self.find_records(&RecordQuery::ByGuid(podcast_guid.to_string())).await
    }

    async fn find_by_url(&self, url: &str) -> StoreResult<Vec<FeedRecord>> {
        self.find_records(&RecordQuery::ByUrl(url.to_string())).await
    }

    async fn find_by_itunes_id(&self, itunes_id: i64) -> StoreResult<Vec<FeedRecord>> {
        self.find_records(&RecordQuery::ByItunesId(itunes_id)).await
    }

    async fn find_by_podcast_index_id(&self, id: i64) -> StoreResult<Vec<FeedRecord>> {
        self.find_records(&RecordQuery::ByPodcastIndexId(id)).await
    }

    /// Largest groups first; `None` returns every group
    async fn find_duplicates(&self, podcast_guid: Option<&str>)
        -> StoreResult<Vec<DuplicateGroup>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_names_match_document_fields() {
        let names: Vec<_> = RecordField::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["podcastGuid", "url", "podcastIndexId", "itunesId"]);
    }

    #[test]
    fn test_query_field() {
        assert_eq!(RecordQuery::ByItunesId(7).field(), RecordField::ItunesId);
        assert_eq!(RecordQuery::ByUrl("u".into()).field(), RecordField::Url);
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Rejected(_)
        ));
    }
}
