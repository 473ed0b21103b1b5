//! Temporary directory cleanup
//!
//! Media materialized for upload or preview lands in a scratch directory.
//! Each daemon wake-up deletes files there older than the retention window.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Deletes regular files in `dir` last modified more than `older_than_days`
/// days ago and returns how many were removed
///
/// A missing directory is not an error. Subdirectories are left alone.
pub async fn clean_temporary_directory(dir: &Path, older_than_days: u32) -> std::io::Result<usize> {
    let retention = Duration::from_secs(u64::from(older_than_days) * SECONDS_PER_DAY);
    let cutoff = SystemTime::now()
        .checked_sub(retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Temporary directory does not exist");
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified >= cutoff {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "Cleaned temporary directory");
    }
    Ok(removed)
}
