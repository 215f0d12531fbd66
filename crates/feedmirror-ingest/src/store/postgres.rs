//! PostgreSQL-backed document store
//!
//! Collections map onto tables. Duplicate group members and the enrichment
//! sets are kept as JSONB so a group reads back as one document.

use super::{
    FeedStore, RecordField, RecordQuery, StoreError, StoreResult, DUPLICATES_COLLECTION,
    RECORDS_COLLECTION,
};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feedmirror_common::{
    DuplicateEntry, DuplicateGroup, FeedRecord, GroupEnrichment, RemoteFileSnapshot,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const SNAPSHOTS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS remote_file_snapshots (
    id BIGSERIAL PRIMARY KEY,
    content_length BIGINT,
    last_modified TEXT,
    entity_tag TEXT,
    observed_at TIMESTAMPTZ NOT NULL
)
"#;

const SNAPSHOTS_INDEX_DDL: &str = r#"
CREATE INDEX IF NOT EXISTS remote_file_snapshots_observed_at
    ON remote_file_snapshots (observed_at DESC)
"#;

const RECORDS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS feed_records (
    id BIGSERIAL PRIMARY KEY,
    podcast_guid TEXT NOT NULL,
    url TEXT NOT NULL,
    original_url TEXT NOT NULL,
    podcast_index_id BIGINT NOT NULL,
    itunes_id BIGINT,
    imported_at TIMESTAMPTZ NOT NULL
)
"#;

// Group keys keep first-inserted member order; the table is created in one
// statement so readers never see a half-built collection.
const MATERIALIZE_DUPLICATES_SQL: &str = r#"
CREATE TABLE duplicate_groups AS
SELECT
    podcast_guid,
    COUNT(*)::BIGINT AS count,
    jsonb_agg(
        jsonb_build_object('url', url, 'podcastIndexId', podcast_index_id)
        ORDER BY id
    ) AS duplicates,
    NULL::BIGINT AS unique_domain_count,
    NULL::JSONB AS unique_domains,
    NULL::JSONB AS podcast_index_ids
FROM feed_records
GROUP BY podcast_guid
HAVING COUNT(*) > 1
ORDER BY 2 DESC
"#;

const GROUP_COLUMNS: &str =
    "podcast_guid, count, duplicates, unique_domain_count, unique_domains, podcast_index_ids";

const RECORD_COLUMNS: &str =
    "podcast_guid, url, original_url, podcast_index_id, itunes_id, imported_at";

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    content_length: Option<i64>,
    last_modified: Option<String>,
    entity_tag: Option<String>,
    observed_at: DateTime<Utc>,
}

impl From<SnapshotRow> for RemoteFileSnapshot {
    fn from(row: SnapshotRow) -> Self {
        RemoteFileSnapshot {
            content_length: row.content_length,
            last_modified: row.last_modified,
            entity_tag: row.entity_tag,
            observed_at: row.observed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    podcast_guid: String,
    url: String,
    original_url: String,
    podcast_index_id: i64,
    itunes_id: Option<i64>,
    imported_at: DateTime<Utc>,
}

impl From<RecordRow> for FeedRecord {
    fn from(row: RecordRow) -> Self {
        FeedRecord {
            podcast_guid: row.podcast_guid,
            url: row.url,
            original_url: row.original_url,
            podcast_index_id: row.podcast_index_id,
            itunes_id: row.itunes_id,
            imported_at: row.imported_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    podcast_guid: String,
    count: i64,
    duplicates: Json<Vec<DuplicateEntry>>,
    unique_domain_count: Option<i64>,
    unique_domains: Option<Json<BTreeSet<String>>>,
    podcast_index_ids: Option<Json<BTreeSet<i64>>>,
}

impl From<GroupRow> for DuplicateGroup {
    fn from(row: GroupRow) -> Self {
        DuplicateGroup {
            podcast_guid: row.podcast_guid,
            count: row.count,
            duplicates: row.duplicates.0,
            unique_domain_count: row.unique_domain_count,
            unique_domains: row.unique_domains.map(|j| j.0),
            podcast_index_ids: row.podcast_index_ids.map(|j| j.0),
        }
    }
}

/// Document store on PostgreSQL
pub struct PgStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgStore {
    /// Build a lazily connecting pool.
    ///
    /// No connection is attempted here, so an unreachable database does not
    /// prevent startup; the first operation reports it instead.
    pub fn connect_lazy(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_lazy(&config.url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database URL: {}", e)))?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    /// Create the snapshot and record tables on first use
    async fn schema(&self) -> StoreResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(SNAPSHOTS_DDL).execute(&self.pool).await?;
                sqlx::query(SNAPSHOTS_INDEX_DDL).execute(&self.pool).await?;
                sqlx::query(RECORDS_DDL).execute(&self.pool).await?;
                debug!("Document store schema ready");
                Ok::<(), StoreError>(())
            })
            .await
            .map(|_| ())
    }

    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl FeedStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_snapshot(&self, snapshot: &RemoteFileSnapshot) -> StoreResult<()> {
        self.schema().await?;
        sqlx::query(
            r#"
            INSERT INTO remote_file_snapshots (content_length, last_modified, entity_tag, observed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(snapshot.content_length)
        .bind(snapshot.last_modified.as_deref())
        .bind(snapshot.entity_tag.as_deref())
        .bind(snapshot.observed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<RemoteFileSnapshot>> {
        Ok(self.snapshot_history(1).await?.into_iter().next())
    }

    async fn snapshot_history(&self, limit: usize) -> StoreResult<Vec<RemoteFileSnapshot>> {
        self.schema().await?;
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT content_length, last_modified, entity_tag, observed_at
            FROM remote_file_snapshots
            ORDER BY observed_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn count_records(&self) -> StoreResult<u64> {
        self.schema().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feed_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn reset_records(&self) -> StoreResult<()> {
        self.schema().await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS feed_records")
            .execute(&mut *tx)
            .await?;
        sqlx::query(RECORDS_DDL).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(collection = RECORDS_COLLECTION, "Dropped and recreated record collection");
        Ok(())
    }

    async fn insert_records(&self, batch: &[FeedRecord]) -> StoreResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO feed_records (podcast_guid, url, original_url, podcast_index_id, itunes_id, imported_at) ",
        );
        builder.push_values(batch, |mut row, record| {
            row.push_bind(&record.podcast_guid)
                .push_bind(&record.url)
                .push_bind(&record.original_url)
                .push_bind(record.podcast_index_id)
                .push_bind(record.itunes_id)
                .push_bind(record.imported_at);
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn ensure_index(&self, field: RecordField) -> StoreResult<bool> {
        self.schema().await?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2
            )
            "#,
        )
        .bind(RECORDS_COLLECTION)
        .bind(field.name())
        .fetch_one(&self.pool)
        .await?;

        if exists {
            return Ok(false);
        }

        // Identifiers come from a closed set, never from input.
        let ddl = format!(
            r#"CREATE INDEX IF NOT EXISTS "{}" ON feed_records ({} ASC)"#,
            field.name(),
            field.column()
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(true)
    }

    async fn list_indexes(&self) -> StoreResult<Vec<String>> {
        self.schema().await?;
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT indexname FROM pg_indexes
            WHERE schemaname = current_schema() AND tablename = $1
            ORDER BY indexname
            "#,
        )
        .bind(RECORDS_COLLECTION)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn duplicates_exist(&self) -> StoreResult<bool> {
        self.table_exists(DUPLICATES_COLLECTION).await
    }

    async fn materialize_duplicates(&self) -> StoreResult<u64> {
        self.schema().await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(MATERIALIZE_DUPLICATES_SQL)
            .execute(&mut *tx)
            .await?;
        sqlx::query("ALTER TABLE duplicate_groups ADD PRIMARY KEY (podcast_guid)")
            .execute(&mut *tx)
            .await?;
        let groups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_groups")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(groups as u64)
    }

    async fn count_duplicates(&self) -> StoreResult<u64> {
        if !self.duplicates_exist().await? {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_groups")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn drop_duplicates(&self) -> StoreResult<bool> {
        let existed = self.duplicates_exist().await?;
        if existed {
            sqlx::query("DROP TABLE IF EXISTS duplicate_groups")
                .execute(&self.pool)
                .await?;
        }
        Ok(existed)
    }

    async fn duplicate_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DuplicateGroup>> {
        let sql = format!(
            "SELECT {} FROM duplicate_groups \
             WHERE ($1::TEXT IS NULL OR podcast_guid > $1) \
             ORDER BY podcast_guid LIMIT $2",
            GROUP_COLUMNS
        );
        let rows: Vec<GroupRow> = sqlx::query_as(&sql)
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_enrichment(
        &self,
        podcast_guid: &str,
        enrichment: &GroupEnrichment,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE duplicate_groups
            SET unique_domain_count = $2, unique_domains = $3, podcast_index_ids = $4
            WHERE podcast_guid = $1
            "#,
        )
        .bind(podcast_guid)
        .bind(enrichment.unique_domain_count())
        .bind(Json(&enrichment.unique_domains))
        .bind(Json(&enrichment.podcast_index_ids))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_records(&self, query: &RecordQuery) -> StoreResult<Vec<FeedRecord>> {
        self.schema().await?;
        let sql = format!(
            "SELECT {} FROM feed_records WHERE {} = $1 ORDER BY id",
            RECORD_COLUMNS,
            query.field().column()
        );
        let statement = sqlx::query_as::<_, RecordRow>(&sql);
        let statement = match query {
            RecordQuery::ByGuid(value) | RecordQuery::ByUrl(value) => statement.bind(value),
            RecordQuery::ByItunesId(value) | RecordQuery::ByPodcastIndexId(value) => {
                statement.bind(*value)
            },
        };
        let rows = statement.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_duplicates(
        &self,
        podcast_guid: Option<&str>,
    ) -> StoreResult<Vec<DuplicateGroup>> {
        if !self.duplicates_exist().await? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM duplicate_groups \
             WHERE ($1::TEXT IS NULL OR podcast_guid = $1) \
             ORDER BY count DESC, podcast_guid",
            GROUP_COLUMNS
        );
        let rows: Vec<GroupRow> = sqlx::query_as(&sql)
            .bind(podcast_guid)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
