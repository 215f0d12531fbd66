//! Archive member extraction
//!
//! Pulls a single named member out of a gzip-compressed tar archive. The
//! archive is read as a stream, so memory use is bounded by the copy buffer
//! regardless of member size.

use crate::error::{Result, StageOutcome, SyncError};
use crate::fetcher::part_path;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Extract `member` from `archive` into `destination`.
///
/// Does nothing if `destination` already exists. The member is written to
/// `<destination>.part` and renamed once every declared byte has been copied.
pub async fn extract(
    archive: &Path,
    member: &str,
    destination: &Path,
    chunk_size: usize,
) -> Result<StageOutcome> {
    if tokio::fs::try_exists(destination).await? {
        info!(path = %destination.display(), "Dataset already extracted");
        return Ok(StageOutcome::skipped("already extracted"));
    }

    let archive = archive.to_path_buf();
    let member = member.to_string();
    let destination = destination.to_path_buf();

    let copied = tokio::task::spawn_blocking(move || {
        extract_blocking(&archive, &member, &destination, chunk_size)
    })
    .await
    .map_err(|e| SyncError::Extraction(format!("extraction task failed: {}", e)))??;

    info!(bytes = copied, "Extracted dataset");
    Ok(StageOutcome::Completed)
}

fn extract_blocking(
    archive: &Path,
    member: &str,
    destination: &Path,
    chunk_size: usize,
) -> Result<u64> {
    let file = File::open(archive).map_err(|e| {
        SyncError::Extraction(format!("cannot open archive {}: {}", archive.display(), e))
    })?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let wanted = normalize(Path::new(member));

    debug!(archive = %archive.display(), member, "Examining archive");
    let entries = tar
        .entries()
        .map_err(|e| SyncError::Extraction(format!("failed to read archive entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| SyncError::Extraction(format!("failed to read archive entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| SyncError::Extraction(format!("invalid entry path: {}", e)))?;
        if normalize(&path) != wanted {
            continue;
        }

        let declared = entry
            .header()
            .size()
            .map_err(|e| SyncError::Extraction(format!("invalid entry size: {}", e)))?;
        info!(member, declared_bytes = declared, "Extracting archive member");

        let part = part_path(destination);
        let copied = copy_member(&mut entry, &part, chunk_size)?;
        if copied != declared {
            std::fs::remove_file(&part)?;
            return Err(SyncError::Extraction(format!(
                "member {} truncated: copied {} of {} bytes",
                member, copied, declared
            )));
        }

        std::fs::rename(&part, destination)?;
        return Ok(copied);
    }

    Err(SyncError::Extraction(format!(
        "member {} not found in {}",
        member,
        archive.display()
    )))
}

fn copy_member(source: &mut impl Read, part: &Path, chunk_size: usize) -> Result<u64> {
    let mut out = BufWriter::with_capacity(chunk_size, File::create(part)?);
    let mut buf = vec![0u8; chunk_size];
    let mut copied = 0u64;

    loop {
        let n = source
            .read(&mut buf)
            .map_err(|e| SyncError::Extraction(format!("failed to read archive data: {}", e)))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }
    out.flush()?;
    Ok(copied)
}

/// Member path with `.` components removed, so `./a.db` matches `a.db`
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ignores_leading_dot() {
        assert_eq!(normalize(Path::new("./podcastindex_feeds.db")), PathBuf::from("podcastindex_feeds.db"));
        assert_eq!(normalize(Path::new("dir/./f.db")), PathBuf::from("dir/f.db"));
    }

    #[tokio::test]
    async fn test_unreadable_archive_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tgz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extract(&archive, "a.db", &dir.path().join("a.db"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
        assert!(!dir.path().join("a.db").exists());
    }

    #[tokio::test]
    async fn test_missing_archive_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract(&dir.path().join("nope.tgz"), "a.db", &dir.path().join("a.db"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Extraction(_)));
    }
}
