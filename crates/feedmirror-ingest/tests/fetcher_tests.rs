//! Freshness check and download against a mock archive server

mod common;

use chrono::{TimeZone, Utc};
use common::{tar_gz, test_config};
use feedmirror_common::types::format_http_date;
use feedmirror_common::RemoteFileSnapshot;
use feedmirror_ingest::fetcher::Fetcher;
use feedmirror_ingest::store::{FeedStore, MemoryStore};
use feedmirror_ingest::tracker::MetadataTracker;
use feedmirror_ingest::{StageOutcome, SyncError};
use std::sync::Arc;
use std::time::SystemTime;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE_PATH: &str = "/podcastindex_feeds.db.tgz";

struct Harness {
    server: MockServer,
    store: Arc<MemoryStore>,
    fetcher: Fetcher,
    dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), &format!("{}{}", server.uri(), ARCHIVE_PATH));
        let store = Arc::new(MemoryStore::new());
        let fetcher = Fetcher::new(&config, MetadataTracker::new(store.clone())).unwrap();
        Self {
            server,
            store,
            fetcher,
            dir,
        }
    }

    fn archive(&self) -> std::path::PathBuf {
        self.fetcher.archive_path().to_path_buf()
    }

    async fn seed_entity_tag(&self, tag: &str) {
        let snapshot = RemoteFileSnapshot::new(Some(10), None, Some(tag.to_string()));
        self.store.insert_snapshot(&snapshot).await.unwrap();
    }
}

#[tokio::test]
async fn matching_entity_tag_skips_download() {
    let h = Harness::new().await;
    std::fs::write(h.archive(), b"old archive").unwrap();
    h.seed_entity_tag("\"v1\"").await;

    Mock::given(method("HEAD"))
        .and(path(ARCHIVE_PATH))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(!h.fetcher.needs_fetch(&h.archive()).await.unwrap());
}

#[tokio::test]
async fn changed_entity_tag_requires_fetch() {
    let h = Harness::new().await;
    std::fs::write(h.archive(), b"old archive").unwrap();
    h.seed_entity_tag("\"v1\"").await;

    Mock::given(method("HEAD"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"v2\""))
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(h.fetcher.needs_fetch(&h.archive()).await.unwrap());
}

#[tokio::test]
async fn missing_local_archive_requires_fetch_without_request() {
    let h = Harness::new().await;
    h.seed_entity_tag("\"v1\"").await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(304))
        .expect(0)
        .mount(&h.server)
        .await;

    assert!(h.fetcher.needs_fetch(&h.archive()).await.unwrap());
}

#[tokio::test]
async fn without_entity_tag_matching_timestamp_is_current() {
    let h = Harness::new().await;
    let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
    let file = std::fs::File::create(h.archive()).unwrap();
    file.set_modified(SystemTime::from(modified)).unwrap();
    drop(file);

    Mock::given(method("HEAD"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Last-Modified", format_http_date(modified).as_str()),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    assert!(!h.fetcher.needs_fetch(&h.archive()).await.unwrap());
}

#[tokio::test]
async fn fetch_streams_archive_and_records_snapshot() {
    let h = Harness::new().await;
    let payload = tar_gz(&[("./podcastindex_feeds.db", b"not really sqlite".as_slice())]);
    let modified = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
    let stale_dataset = h.dir.path().join("podcastindex_feeds.db");
    std::fs::write(&stale_dataset, b"extracted from previous archive").unwrap();

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload.clone())
                .insert_header("ETag", "\"v2\"")
                .insert_header("Last-Modified", format_http_date(modified).as_str()),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let outcome = h.fetcher.fetch().await.unwrap();
    assert_eq!(outcome, StageOutcome::Completed);

    assert_eq!(std::fs::read(h.archive()).unwrap(), payload);
    assert!(!h.dir.path().join("podcastindex_feeds.db.tgz.part").exists());
    assert!(!stale_dataset.exists());

    let mtime: chrono::DateTime<Utc> = std::fs::metadata(h.archive()).unwrap().modified().unwrap().into();
    assert_eq!(mtime.timestamp(), modified.timestamp());

    let snapshot = h.store.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(snapshot.entity_tag.as_deref(), Some("\"v2\""));
    assert_eq!(snapshot.content_length, Some(payload.len() as i64));
    assert_eq!(snapshot.last_modified_time().unwrap(), Some(modified));
}

#[tokio::test]
async fn fetch_error_status_leaves_no_archive() {
    let h = Harness::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.server)
        .await;

    let err = h.fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, SyncError::HttpStatus { status: 503, .. }));
    assert!(!h.archive().exists());
    assert!(h.store.latest_snapshot().await.unwrap().is_none());
}

#[tokio::test]
async fn interrupted_fetch_leaves_archive_stale() {
    let h = Harness::new().await;
    std::fs::write(h.archive(), b"archive from v1").unwrap();
    let dataset = h.dir.path().join("podcastindex_feeds.db");
    std::fs::write(&dataset, b"extracted from v1").unwrap();
    h.seed_entity_tag("\"v1\"").await;

    // The body cannot be written once the headers are in.
    std::fs::create_dir(h.dir.path().join("podcastindex_feeds.db.tgz.part")).unwrap();

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"archive from v2".to_vec())
                .insert_header("ETag", "\"v2\""),
        )
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(ARCHIVE_PATH))
        .and(header("If-None-Match", "\"v2\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&h.server)
        .await;

    let err = h.fetcher.fetch().await.unwrap_err();
    assert!(matches!(err, SyncError::Io(_)), "got {err:?}");

    let latest = h.store.latest_snapshot().await.unwrap().unwrap();
    assert_eq!(latest.entity_tag.as_deref(), Some("\"v2\""));
    assert!(!h.archive().exists());
    assert!(!dataset.exists());

    assert!(h.fetcher.needs_fetch(&h.archive()).await.unwrap());
}
