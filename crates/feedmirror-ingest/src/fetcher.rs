//! Remote archive freshness check and streamed download

use crate::config::SyncConfig;
use crate::error::{Result, StageOutcome, SyncError};
use crate::tracker::MetadataTracker;
use chrono::{DateTime, Utc};
use feedmirror_common::types::parse_http_date;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Downloads the published archive when the remote copy has changed
pub struct Fetcher {
    client: Client,
    url: String,
    archive_path: PathBuf,
    dataset_path: PathBuf,
    chunk_size: usize,
    show_progress: bool,
    tracker: MetadataTracker,
}

impl Fetcher {
    pub fn new(config: &SyncConfig, tracker: MetadataTracker) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.source.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.source.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config.source.url.clone(),
            archive_path: config.archive_path(),
            dataset_path: config.dataset_path(),
            chunk_size: config.source.download_chunk_size,
            show_progress: config.pipeline.show_progress,
            tracker,
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Decide whether `local_archive` is stale without downloading the payload.
    ///
    /// A HEAD request carries `If-None-Match` with the last recorded entity
    /// tag; 304 means the local copy is current. Without a recorded tag the
    /// response's `Last-Modified` is compared with the local file's mtime.
    pub async fn needs_fetch(&self, local_archive: &Path) -> Result<bool> {
        if !tokio::fs::try_exists(local_archive).await? {
            info!(path = %local_archive.display(), "No local archive, fetch required");
            return Ok(true);
        }

        let entity_tag = match self.tracker.latest().await {
            Ok(snapshot) => snapshot.and_then(|s| s.entity_tag),
            Err(e) => {
                warn!(error = %e, "Could not read latest snapshot, checking without entity tag");
                None
            },
        };

        let mut request = self.client.head(&self.url);
        if let Some(tag) = &entity_tag {
            request = request.header(IF_NONE_MATCH, tag.as_str());
        }
        let response = request.send().await?;
        let status = response.status();
        debug!(%status, entity_tag = ?entity_tag, "Freshness check response");

        if status == StatusCode::NOT_MODIFIED {
            info!("Remote archive unchanged");
            return Ok(false);
        }

        if entity_tag.is_none() && status.is_success() {
            let remote = response
                .headers()
                .get(LAST_MODIFIED)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_http_date(v).ok());
            if let Some(remote) = remote {
                let local: DateTime<Utc> = tokio::fs::metadata(local_archive).await?.modified()?.into();
                if local.timestamp() == remote.timestamp() {
                    info!(last_modified = %remote, "Local archive matches remote timestamp");
                    return Ok(false);
                }
            }
        }

        info!(%status, "Remote archive changed, fetch required");
        Ok(true)
    }

    /// Stream the archive to `<archive>.part` and move it into place.
    ///
    /// The snapshot is recorded from the GET headers before the body is read.
    /// Once it is, the previous archive and its extracted dataset no longer
    /// match the recorded entity tag and are removed before streaming, so a
    /// failed transfer leaves no archive and the next freshness check asks
    /// for a fetch. The partial file stays behind under its `.part` name.
    pub async fn fetch(&self) -> Result<StageOutcome> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let snapshot = self.tracker.record(response.headers()).await;
        let total_size = response.content_length().unwrap_or(0);

        if let Some(parent) = self.archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        remove_stale(&self.archive_path, "archive").await?;
        remove_stale(&self.dataset_path, "dataset").await?;

        let part_path = part_path(&self.archive_path);
        let file = tokio::fs::File::create(&part_path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let pb = self.progress_bar(total_size);
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            pb.set_position(downloaded);
        }
        writer.flush().await?;
        pb.finish_and_clear();

        let file = writer.into_inner().into_std().await;
        match snapshot.last_modified_time() {
            Ok(Some(modified)) => file.set_modified(SystemTime::from(modified))?,
            Ok(None) => debug!("No Last-Modified header, keeping local mtime"),
            Err(e) => warn!(error = %e, "Ignoring unparseable Last-Modified header"),
        }
        drop(file);

        tokio::fs::rename(&part_path, &self.archive_path).await?;

        info!(
            bytes = downloaded,
            path = %self.archive_path.display(),
            "Downloaded remote archive"
        );
        Ok(StageOutcome::Completed)
    }

    fn progress_bar(&self, total_size: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total_size);
        let style = ProgressStyle::default_bar()
            .template(
                "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(format!("Downloading {}", self.url));
        pb
    }
}

async fn remove_stale(path: &Path, what: &str) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale {}", what);
            Ok(())
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Sibling path with `.part` appended to the file name
pub(crate) fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/w/podcastindex_feeds.db.tgz")),
            PathBuf::from("/tmp/w/podcastindex_feeds.db.tgz.part")
        );
    }
}
