//! Fixture builders shared by the integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use feedmirror_ingest::config::SyncConfig;
use flate2::write::GzEncoder;
use flate2::Compression;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Connection;
use std::path::Path;

/// One row of the `podcasts` table in a fixture dataset
#[derive(Debug, Clone)]
pub struct FeedRow {
    pub id: i64,
    pub podcast_guid: Option<String>,
    pub url: Option<String>,
    pub original_url: Option<String>,
    pub itunes_id: Option<i64>,
}

impl FeedRow {
    pub fn new(id: i64, guid: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id,
            podcast_guid: Some(guid.into()),
            original_url: Some(url.clone()),
            url: Some(url),
            itunes_id: None,
        }
    }

    pub fn with_itunes_id(mut self, itunes_id: i64) -> Self {
        self.itunes_id = Some(itunes_id);
        self
    }
}

/// `count` rows, each with its own GUID and host
pub fn unique_rows(count: i64) -> Vec<FeedRow> {
    (1..=count)
        .map(|id| FeedRow::new(id, format!("guid-{}", id), format!("https://host{}.example/feed.xml", id)))
        .collect()
}

/// Write a SQLite file shaped like the published dump
pub async fn write_dataset(path: &Path, rows: &[FeedRow]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("Failed to create fixture dataset");

    sqlx::query(
        r#"
        CREATE TABLE podcasts (
            id INTEGER PRIMARY KEY,
            url TEXT,
            title TEXT,
            podcastGuid TEXT,
            originalUrl TEXT,
            itunesId INTEGER
        )
        "#,
    )
    .execute(&mut conn)
    .await
    .expect("Failed to create podcasts table");

    let mut tx = conn.begin().await.expect("Failed to begin transaction");
    for row in rows {
        sqlx::query(
            "INSERT INTO podcasts (id, url, title, podcastGuid, originalUrl, itunesId) \
             VALUES (?, ?, 'title', ?, ?, ?)",
        )
        .bind(row.id)
        .bind(&row.url)
        .bind(&row.podcast_guid)
        .bind(&row.original_url)
        .bind(row.itunes_id)
        .execute(&mut *tx)
        .await
        .expect("Failed to insert fixture row");
    }
    tx.commit().await.expect("Failed to commit fixture rows");
    conn.close().await.expect("Failed to close fixture dataset");
}

/// Gzipped tar holding the given members
pub fn tar_gz(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, *data)
            .expect("Failed to append archive member");
    }
    builder
        .into_inner()
        .expect("Failed to finish tar stream")
        .finish()
        .expect("Failed to finish gzip stream")
}

/// Archive bytes wrapping a freshly written dataset, as the publisher ships it
pub async fn dataset_archive(scratch: &Path, rows: &[FeedRow]) -> Vec<u8> {
    let dataset = scratch.join("fixture.db");
    write_dataset(&dataset, rows).await;
    let bytes = std::fs::read(&dataset).unwrap();
    std::fs::remove_file(&dataset).unwrap();
    tar_gz(&[("./podcastindex_feeds.db", &bytes)])
}

/// Configuration rooted in `work_dir` and pointed at `source_url`
pub fn test_config(work_dir: &Path, source_url: &str) -> SyncConfig {
    let mut config = SyncConfig::default();
    config.source.url = source_url.to_string();
    config.paths.work_dir = work_dir.to_path_buf();
    config.pipeline.show_progress = false;
    config
}
