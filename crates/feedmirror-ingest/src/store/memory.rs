//! In-process document store
//!
//! Mirrors the observable behaviour of [`super::PgStore`] closely enough to
//! drive the whole pipeline in tests. It can also simulate an unreachable
//! store and bulk inserts that fail part-way through.

use super::{FeedStore, RecordField, RecordQuery, StoreError, StoreResult};
use async_trait::async_trait;
use feedmirror_common::{
    DuplicateEntry, DuplicateGroup, FeedRecord, GroupEnrichment, RemoteFileSnapshot,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    snapshots: Vec<RemoteFileSnapshot>,
    records: Vec<FeedRecord>,
    indexes: BTreeSet<RecordField>,
    duplicates: Option<Vec<DuplicateGroup>>,
    unavailable: bool,
    /// Total rows the store accepts before inserts start failing
    insert_limit: Option<u64>,
    insert_calls: u64,
    resets: u64,
}

impl MemoryState {
    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store marked unreachable".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every operation fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Accept at most `rows` more records, then fail the insert that would
    /// exceed it after writing the rows that still fit.
    pub fn fail_inserts_after(&self, rows: u64) {
        let mut state = self.state();
        state.insert_limit = Some(state.records.len() as u64 + rows);
    }

    pub fn clear_insert_failure(&self) {
        self.state().insert_limit = None;
    }

    /// Number of bulk insert calls that wrote at least one row
    pub fn insert_calls(&self) -> u64 {
        self.state().insert_calls
    }

    /// Number of times the record collection was dropped and recreated
    pub fn resets(&self) -> u64 {
        self.state().resets
    }

    pub fn records(&self) -> Vec<FeedRecord> {
        self.state().records.clone()
    }

    /// Replace the record collection wholesale, bypassing the loader
    pub fn seed_records(&self, records: Vec<FeedRecord>) {
        self.state().records = records;
    }
}

/// Group records by GUID in first-seen order, keep multi-member groups,
/// largest first
pub(crate) fn group_duplicates(records: &[FeedRecord]) -> Vec<DuplicateGroup> {
    let mut order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<DuplicateEntry>> = HashMap::new();

    for record in records {
        let entry = DuplicateEntry {
            url: record.url.clone(),
            podcast_index_id: record.podcast_index_id,
        };
        members
            .entry(record.podcast_guid.as_str())
            .or_insert_with(|| {
                order.push(record.podcast_guid.as_str());
                Vec::new()
            })
            .push(entry);
    }

    let mut groups: Vec<DuplicateGroup> = order
        .into_iter()
        .filter_map(|guid| {
            let entries = members.remove(guid)?;
            (entries.len() > 1).then(|| DuplicateGroup::new(guid, entries))
        })
        .collect();

    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.podcast_guid.cmp(&b.podcast_guid)));
    groups
}

#[async_trait]
impl FeedStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.state().check_available()
    }

    async fn insert_snapshot(&self, snapshot: &RemoteFileSnapshot) -> StoreResult<()> {
        let mut state = self.state();
        state.check_available()?;
        state.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self) -> StoreResult<Option<RemoteFileSnapshot>> {
        Ok(self.snapshot_history(1).await?.into_iter().next())
    }

    async fn snapshot_history(&self, limit: usize) -> StoreResult<Vec<RemoteFileSnapshot>> {
        let state = self.state();
        state.check_available()?;
        // Later inserts win ties, as with the serial id in PostgreSQL.
        let mut history: Vec<_> = state.snapshots.iter().enumerate().collect();
        history.sort_by(|(ia, a), (ib, b)| b.observed_at.cmp(&a.observed_at).then(ib.cmp(ia)));
        Ok(history.into_iter().take(limit).map(|(_, s)| s.clone()).collect())
    }

    async fn count_records(&self) -> StoreResult<u64> {
        let state = self.state();
        state.check_available()?;
        Ok(state.records.len() as u64)
    }

    async fn reset_records(&self) -> StoreResult<()> {
        let mut state = self.state();
        state.check_available()?;
        state.records.clear();
        state.indexes.clear();
        state.resets += 1;
        Ok(())
    }

    async fn insert_records(&self, batch: &[FeedRecord]) -> StoreResult<u64> {
        let mut state = self.state();
        state.check_available()?;
        if batch.is_empty() {
            return Ok(0);
        }

        let room = match state.insert_limit {
            Some(limit) => limit.saturating_sub(state.records.len() as u64) as usize,
            None => batch.len(),
        };
        let accepted = room.min(batch.len());
        if accepted > 0 {
            state.records.extend_from_slice(&batch[..accepted]);
            state.insert_calls += 1;
        }

        if accepted < batch.len() {
            return Err(StoreError::Rejected(format!(
                "bulk insert failed after {} of {} rows",
                accepted,
                batch.len()
            )));
        }
        Ok(accepted as u64)
    }

    async fn ensure_index(&self, field: RecordField) -> StoreResult<bool> {
        let mut state = self.state();
        state.check_available()?;
        Ok(state.indexes.insert(field))
    }

    async fn list_indexes(&self) -> StoreResult<Vec<String>> {
        let state = self.state();
        state.check_available()?;
        let mut names: Vec<String> = state.indexes.iter().map(|f| f.name().to_string()).collect();
        names.sort();
        Ok(names)
    }

    async fn duplicates_exist(&self) -> StoreResult<bool> {
        let state = self.state();
        state.check_available()?;
        Ok(state.duplicates.is_some())
    }

    async fn count_duplicates(&self) -> StoreResult<u64> {
        let state = self.state();
        state.check_available()?;
        Ok(state.duplicates.as_ref().map_or(0, |groups| groups.len() as u64))
    }

    async fn materialize_duplicates(&self) -> StoreResult<u64> {
        let mut state = self.state();
        state.check_available()?;
        if state.duplicates.is_some() {
            return Err(StoreError::Rejected(
                "duplicate collection already exists".to_string(),
            ));
        }
        let groups = group_duplicates(&state.records);
        let count = groups.len() as u64;
        state.duplicates = Some(groups);
        Ok(count)
    }

    async fn drop_duplicates(&self) -> StoreResult<bool> {
        let mut state = self.state();
        state.check_available()?;
        Ok(state.duplicates.take().is_some())
    }

    async fn duplicate_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<DuplicateGroup>> {
        let state = self.state();
        state.check_available()?;
        let Some(groups) = state.duplicates.as_ref() else {
            return Err(StoreError::Rejected("duplicate collection does not exist".to_string()));
        };
        let mut page: Vec<DuplicateGroup> = groups
            .iter()
            .filter(|g| after.map_or(true, |key| g.podcast_guid.as_str() > key))
            .cloned()
            .collect();
        page.sort_by(|a, b| a.podcast_guid.cmp(&b.podcast_guid));
        page.truncate(limit);
        Ok(page)
    }

    async fn save_enrichment(
        &self,
        podcast_guid: &str,
        enrichment: &GroupEnrichment,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        state.check_available()?;
        let Some(group) = state
            .duplicates
            .as_mut()
            .and_then(|groups| groups.iter_mut().find(|g| g.podcast_guid == podcast_guid))
        else {
            return Ok(false);
        };
        group.unique_domain_count = Some(enrichment.unique_domain_count());
        group.unique_domains = Some(enrichment.unique_domains.clone());
        group.podcast_index_ids = Some(enrichment.podcast_index_ids.clone());
        Ok(true)
    }

    async fn find_records(&self, query: &RecordQuery) -> StoreResult<Vec<FeedRecord>> {
        let state = self.state();
        state.check_available()?;
        Ok(state.records.iter().filter(|r| query.matches(r)).cloned().collect())
    }

    async fn find_duplicates(
        &self,
        podcast_guid: Option<&str>,
    ) -> StoreResult<Vec<DuplicateGroup>> {
        let state = self.state();
        state.check_available()?;
        Ok(state
            .duplicates
            .iter()
            .flatten()
            .filter(|g| podcast_guid.map_or(true, |guid| g.podcast_guid == guid))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn record(guid: &str, url: &str, id: i64) -> FeedRecord {
        FeedRecord {
            podcast_guid: guid.to_string(),
            url: url.to_string(),
            original_url: url.to_string(),
            podcast_index_id: id,
            itunes_id: None,
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_duplicates_filters_and_sorts() {
        let records = vec![
            record("A", "http://a.com/1", 1),
            record("B", "http://b.com/1", 2),
            record("C", "http://c.com/1", 3),
            record("A", "http://a.com/2", 4),
            record("C", "http://c.com/2", 5),
            record("C", "http://c.com/3", 6),
        ];
        let groups = group_duplicates(&records);
        let keys: Vec<_> = groups.iter().map(|g| g.podcast_guid.as_str()).collect();
        assert_eq!(keys, ["C", "A"]);
        assert!(groups.iter().all(DuplicateGroup::is_consistent));
        assert_eq!(groups[1].duplicates[1].podcast_index_id, 4);
    }

    #[tokio::test]
    async fn test_partial_insert_failure_keeps_accepted_rows() {
        let store = MemoryStore::new();
        store.fail_inserts_after(3);
        let batch: Vec<_> = (0..5).map(|i| record("G", "http://x.com", i)).collect();

        let err = store.insert_records(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.count_records().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_latest_snapshot_is_newest_by_observed_at() {
        let store = MemoryStore::new();
        let mut old = RemoteFileSnapshot::new(Some(1), None, Some("old".into()));
        old.observed_at = Utc::now() - Duration::hours(2);
        let new = RemoteFileSnapshot::new(Some(2), None, Some("new".into()));

        store.insert_snapshot(&new).await.unwrap();
        store.insert_snapshot(&old).await.unwrap();

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.entity_tag.as_deref(), Some("new"));
        assert_eq!(store.snapshot_history(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.count_records().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_duplicate_pages_walk_keys_in_order() {
        let store = MemoryStore::new();
        store.seed_records(vec![
            record("b", "http://1.com", 1),
            record("b", "http://2.com", 2),
            record("a", "http://1.com", 3),
            record("a", "http://2.com", 4),
            record("c", "http://1.com", 5),
            record("c", "http://2.com", 6),
        ]);
        store.materialize_duplicates().await.unwrap();

        let first = store.duplicate_page(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|g| g.podcast_guid.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        let rest = store.duplicate_page(Some("b"), 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].podcast_guid, "c");
    }

    #[tokio::test]
    async fn test_count_duplicates_tracks_collection() {
        let store = MemoryStore::new();
        assert_eq!(store.count_duplicates().await.unwrap(), 0);

        store.seed_records(vec![
            record("a", "http://1.com", 1),
            record("a", "http://2.com", 2),
            record("b", "http://1.com", 3),
            record("b", "http://2.com", 4),
            record("c", "http://1.com", 5),
        ]);
        store.materialize_duplicates().await.unwrap();
        assert_eq!(store.count_duplicates().await.unwrap(), 2);

        store.drop_duplicates().await.unwrap();
        assert_eq!(store.count_duplicates().await.unwrap(), 0);
    }
}
