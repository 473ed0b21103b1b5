//! Directory-backed asset source (driven adapter)
//!
//! Implements [`IAssetSource`] over a local folder so the engine can run on
//! a desktop without a platform media library.
//!
//! - Files are found recursively; hidden entries are skipped.
//! - Creation time is the file's modification time.
//! - The stable id is the SHA-256 hex digest of the content, so a renamed
//!   or copied photo dedups against the server.
//! - Only images and videos are reported.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use hoisync_core::domain::{AssetDescriptor, AuthorizationStatus, MediaKind, StableId};
use hoisync_core::ports::IAssetSource;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct HashedFile {
    modified: SystemTime,
    len: u64,
    stable_id: StableId,
}

/// Asset source scanning a directory tree
#[derive(Debug)]
pub struct DirectoryAssetSource {
    root: PathBuf,
    /// Digests keyed by path, reused while size and mtime are unchanged
    hashes: Mutex<HashMap<PathBuf, HashedFile>>,
    /// Stable id to path, filled by `fetch_since`
    index: Mutex<HashMap<StableId, PathBuf>>,
}

impl DirectoryAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hashes: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_hashes(&self) -> MutexGuard<'_, HashMap<PathBuf, HashedFile>> {
        self.hashes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_index(&self) -> MutexGuard<'_, HashMap<StableId, PathBuf>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every non-hidden regular file under the root with its metadata
    async fn walk(&self) -> anyhow::Result<Vec<(PathBuf, std::fs::Metadata)>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if dir != self.root => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let path = entry.path();
                let metadata = match tokio::fs::metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Skipping entry");
                        continue;
                    }
                };
                if metadata.is_dir() {
                    pending.push(path);
                } else if metadata.is_file() {
                    files.push((path, metadata));
                }
            }
        }

        Ok(files)
    }

    async fn stable_id_for(
        &self,
        path: &Path,
        modified: SystemTime,
        len: u64,
    ) -> std::io::Result<StableId> {
        if let Some(cached) = self.lock_hashes().get(path) {
            if cached.modified == modified && cached.len == len {
                return Ok(cached.stable_id.clone());
            }
        }

        let digest = hash_file(path).await?;
        let stable_id = StableId::new(digest)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
        self.lock_hashes().insert(
            path.to_path_buf(),
            HashedFile {
                modified,
                len,
                stable_id: stable_id.clone(),
            },
        );
        Ok(stable_id)
    }
}

#[async_trait::async_trait]
impl IAssetSource for DirectoryAssetSource {
    async fn request_authorization(&self) -> AuthorizationStatus {
        match tokio::fs::read_dir(&self.root).await {
            Ok(_) => AuthorizationStatus::Granted,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Media directory not readable");
                AuthorizationStatus::Denied
            }
        }
    }

    async fn fetch_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<AssetDescriptor>> {
        let mut candidates: Vec<_> = self
            .walk()
            .await?
            .into_iter()
            .filter_map(|(path, metadata)| {
                let filename = path.file_name()?.to_string_lossy().into_owned();
                let media_kind = MediaKind::from_filename(&filename);
                if !media_kind.is_syncable() {
                    return None;
                }
                let modified = metadata.modified().ok()?;
                let created_at = DateTime::<Utc>::from(modified);
                (created_at > since).then_some((created_at, path, filename, media_kind, modified, metadata.len()))
            })
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        // `since` is exclusive, so a timestamp group is never split
        let mut end = limit.min(candidates.len());
        if end > 0 {
            let boundary = candidates[end - 1].0;
            while candidates.get(end).is_some_and(|next| next.0 == boundary) {
                end += 1;
            }
        }
        candidates.truncate(end);

        let mut assets = Vec::with_capacity(candidates.len());
        for (created_at, path, filename, media_kind, modified, len) in candidates {
            let stable_id = match self.stable_id_for(&path, modified, len).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot hash file, skipping");
                    continue;
                }
            };
            self.lock_index().insert(stable_id.clone(), path);
            assets.push(AssetDescriptor {
                stable_id,
                created_at,
                media_kind,
                filename: Some(filename),
            });
        }

        debug!(since = %since, found = assets.len(), "Scanned media directory");
        Ok(assets)
    }

    async fn resolve_url(&self, stable_id: &StableId) -> Option<PathBuf> {
        let path = self.lock_index().get(stable_id).cloned()?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => {
                self.lock_index().remove(stable_id);
                None
            }
        }
    }
}

/// Lower-case hex SHA-256 digest of a file's content
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
