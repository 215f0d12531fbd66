//! Documents written by the sync pipeline and read by the lookup side

use crate::error::{CommonError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Format string for IMF-fixdate, the form servers use in `Last-Modified`
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ============================================================================
// Remote File Metadata
// ============================================================================

/// Transfer metadata observed for the remote archive at one point in time.
///
/// Snapshots are append-only; the one with the latest `observed_at` is the
/// reference for freshness decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_tag: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl RemoteFileSnapshot {
    /// Snapshot stamped with the current time
    pub fn new(
        content_length: Option<i64>,
        last_modified: Option<String>,
        entity_tag: Option<String>,
    ) -> Self {
        Self {
            content_length,
            last_modified,
            entity_tag,
            observed_at: Utc::now(),
        }
    }

    /// Parsed `Last-Modified` value, if the server sent one
    pub fn last_modified_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.last_modified.as_deref().map(parse_http_date).transpose()
    }
}

/// Parse an HTTP date header value (`Wed, 21 Oct 2015 07:28:00 GMT`)
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CommonError::InvalidHttpDate {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Render a timestamp in the HTTP date format
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE_FORMAT).to_string()
}

// ============================================================================
// Feed Records
// ============================================================================

/// One row of the directory dataset as stored in the record collection.
///
/// `podcast_guid` is not unique: a GUID shared by several feeds is what the
/// duplicate analysis looks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    pub podcast_guid: String,
    pub url: String,
    pub original_url: String,
    pub podcast_index_id: i64,
    pub itunes_id: Option<i64>,
    pub imported_at: DateTime<Utc>,
}

// ============================================================================
// Duplicate Groups
// ============================================================================

/// A member of a duplicate group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateEntry {
    pub url: String,
    pub podcast_index_id: i64,
}

/// All feed records sharing one GUID, materialized when there is more than one.
///
/// The enrichment fields stay `None` until the enricher has visited the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub podcast_guid: String,
    pub count: i64,
    pub duplicates: Vec<DuplicateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_domain_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_domains: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_index_ids: Option<BTreeSet<i64>>,
}

impl DuplicateGroup {
    /// Build an unenriched group; `count` always mirrors `duplicates.len()`
    pub fn new(podcast_guid: impl Into<String>, duplicates: Vec<DuplicateEntry>) -> Self {
        Self {
            podcast_guid: podcast_guid.into(),
            count: duplicates.len() as i64,
            duplicates,
            unique_domain_count: None,
            unique_domains: None,
            podcast_index_ids: None,
        }
    }

    /// True when the group satisfies `count == len(duplicates)` and `count > 1`
    pub fn is_consistent(&self) -> bool {
        self.count == self.duplicates.len() as i64 && self.count > 1
    }

    pub fn is_enriched(&self) -> bool {
        self.unique_domain_count.is_some()
    }
}

/// Values the enricher writes back onto a duplicate group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupEnrichment {
    pub unique_domains: BTreeSet<String>,
    pub podcast_index_ids: BTreeSet<i64>,
}

impl GroupEnrichment {
    pub fn unique_domain_count(&self) -> i64 {
        self.unique_domains.len() as i64
    }
}

/// Network authority (`host[:port]`) of a feed URL.
///
/// Default ports are dropped by the URL parser, so `http://a.com:80/x` and
/// `http://a.com/x` share an authority.
pub fn url_authority(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw).map_err(|e| CommonError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let host = parsed.host_str().ok_or_else(|| CommonError::InvalidUrl {
        url: raw.to_string(),
        reason: "URL has no host".to_string(),
    })?;

    Ok(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
