//! Loader and duplicate analysis against PostgreSQL

mod common;

use common::{test_config, unique_rows, write_dataset, FeedRow};
use feedmirror_common::DuplicateGroup;
use feedmirror_ingest::duplicates::{detect_duplicates, enrich_duplicates};
use feedmirror_ingest::indexes::ensure_indexes;
use feedmirror_ingest::loader::RecordLoader;
use feedmirror_ingest::store::{FeedStore, PgStore};
use feedmirror_ingest::StageOutcome;
use sqlx::PgPool;
use std::sync::Arc;

#[sqlx::test]
async fn repeat_load_writes_nothing(pool: PgPool) -> sqlx::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("feeds.db");
    write_dataset(&dataset, &unique_rows(2500)).await;

    let store = Arc::new(PgStore::from_pool(pool));
    let config = test_config(dir.path(), "http://unused");
    let loader = RecordLoader::new(store.clone(), &config.pipeline);

    let report = loader.load(&dataset).await.unwrap();
    assert_eq!(report.inserted, 2500);
    assert_eq!(report.batches, 3);
    assert_eq!(store.count_records().await.unwrap(), 2500);

    let again = loader.load(&dataset).await.unwrap();
    assert!(again.skipped);
    assert_eq!(again.inserted, 0);
    assert_eq!(again.batches, 0);
    assert_eq!(store.count_records().await.unwrap(), 2500);

    assert_eq!(ensure_indexes(&*store).await.unwrap(), StageOutcome::Completed);
    assert!(ensure_indexes(&*store).await.unwrap().is_skipped());
    Ok(())
}

#[sqlx::test]
async fn duplicate_groups_match_shared_guids(pool: PgPool) -> sqlx::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("feeds.db");
    let mut rows = vec![
        FeedRow::new(1, "G1", "http://a.com/feed"),
        FeedRow::new(2, "G1", "http://b.com/feed"),
        FeedRow::new(3, "G2", "http://a.com/x"),
        FeedRow::new(4, "G2", "http://a.com/y"),
    ];
    rows.extend((100..120).map(|id| FeedRow::new(id, format!("solo-{}", id), "http://s.com/")));
    write_dataset(&dataset, &rows).await;

    let store = Arc::new(PgStore::from_pool(pool));
    let config = test_config(dir.path(), "http://unused");
    RecordLoader::new(store.clone(), &config.pipeline)
        .load(&dataset)
        .await
        .unwrap();

    assert_eq!(detect_duplicates(&*store).await.unwrap(), StageOutcome::Completed);
    assert!(detect_duplicates(&*store).await.unwrap().is_skipped());
    enrich_duplicates(&*store, 1).await.unwrap();

    let groups = store.find_duplicates(None).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(DuplicateGroup::is_consistent));
    assert!(groups.iter().all(DuplicateGroup::is_enriched));

    let g1 = &store.find_duplicates(Some("G1")).await.unwrap()[0];
    assert_eq!(g1.count, 2);
    assert_eq!(g1.unique_domain_count, Some(2));

    let g2 = &store.find_duplicates(Some("G2")).await.unwrap()[0];
    assert_eq!(g2.count, 2);
    assert_eq!(g2.unique_domain_count, Some(1));
    Ok(())
}
