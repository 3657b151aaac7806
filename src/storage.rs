use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::cmp::Ordering;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::pin::pin;
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs::{self, File};
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::policy::{ExtensionRule, is_allowed};

const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No selected file")]
    EmptyName,
    #[error("Invalid filename")]
    InvalidName,
    #[error("File type not allowed")]
    ExtensionNotAllowed,
    #[error("File exceeds the upload limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("File not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One regular file in the vault directory.
#[derive(Clone, Debug)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl StoredFile {
    fn from_metadata(name: String, metadata: &std::fs::Metadata) -> Self {
        Self {
            name,
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    pub fn modified_display(&self) -> Option<String> {
        self.modified.map(|ts| {
            let datetime: DateTime<Utc> = ts.into();
            datetime.format("%Y-%m-%d %H:%M:%S").to_string()
        })
    }
}

/// Flat directory store. Names are always sanitized basenames.
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    extension_rule: Option<ExtensionRule>,
    max_upload_size: u64,
}

impl Storage {
    pub fn new(root: PathBuf, extension_rule: Option<ExtensionRule>, max_upload_size: u64) -> Self {
        Self {
            root,
            extension_rule,
            max_upload_size,
        }
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Regular files whose names `retrieve` accepts. Subdirectories, symlinks,
    /// dot-files and names that are not in sanitized form are skipped, as are
    /// entries removed while the directory is being read.
    pub async fn list(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_sanitized(&name) {
                continue;
            }
            let Some(file_type) = skip_vanished(entry.file_type().await)? else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }
            let Some(metadata) = skip_vanished(entry.metadata().await)? else {
                continue;
            };
            files.push(StoredFile::from_metadata(name, &metadata));
        }

        files.sort_by(|a, b| match a.name.to_lowercase().cmp(&b.name.to_lowercase()) {
            Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        });
        debug!(count = files.len(), "listed storage");
        Ok(files)
    }

    /// Streams `content` into the vault under the sanitized form of `raw_name`.
    pub async fn save<S, E>(&self, raw_name: &str, content: S) -> Result<StoredFile, StorageError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Into<StorageError>,
    {
        if raw_name.is_empty() {
            return Err(StorageError::EmptyName);
        }
        let name = sanitize_filename(raw_name).ok_or(StorageError::InvalidName)?;
        if !is_allowed(&name, self.extension_rule.as_ref()) {
            return Err(StorageError::ExtensionNotAllowed);
        }

        let target = self.resolve(&name)?;
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => return Err(StorageError::InvalidName),
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let mut atomic = AtomicFile::create(&target).await?;
        let mut content = pin!(content);
        let written: Result<u64, StorageError> = async {
            let mut total: u64 = 0;
            while let Some(chunk) = content.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => return Err(err.into()),
                };
                total += chunk.len() as u64;
                if total > self.max_upload_size {
                    return Err(StorageError::PayloadTooLarge {
                        limit: self.max_upload_size,
                    });
                }
                atomic.write_chunk(&chunk).await?;
            }
            Ok(total)
        }
        .await;
        let size = match written {
            Ok(size) => size,
            Err(err) => {
                atomic.discard().await;
                return Err(err);
            }
        };
        atomic.commit().await?;

        if raw_name != name {
            debug!(raw_name, name = %name, "sanitized upload name");
        }
        info!(name = %name, size, "stored file");
        let metadata = fs::metadata(&target).await?;
        Ok(StoredFile::from_metadata(name, &metadata))
    }

    /// Opens a stored file. Anything that is not a sanitized name of a regular
    /// file directly inside the root is reported as `NotFound`.
    pub async fn retrieve(&self, name: &str) -> Result<(File, StoredFile), StorageError> {
        if !is_sanitized(name) {
            return Err(StorageError::NotFound);
        }
        let target = self.resolve(name).map_err(|_| StorageError::NotFound)?;
        self.ensure_contained(&target).await?;

        let metadata = match fs::symlink_metadata(&target).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.file_type().is_file() {
            return Err(StorageError::NotFound);
        }

        let file = File::open(&target).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound,
            _ => StorageError::Io(err),
        })?;
        Ok((file, StoredFile::from_metadata(name.to_string(), &metadata)))
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) => Ok(self.root.join(segment)),
            _ => Err(StorageError::InvalidName),
        }
    }

    /// The parent of `target` must be the storage root itself once symlinks
    /// in the root path are resolved.
    async fn ensure_contained(&self, target: &Path) -> Result<(), StorageError> {
        let root = skip_vanished(fs::canonicalize(&self.root).await)?;
        let parent = target.parent().ok_or(StorageError::NotFound)?;
        let parent = skip_vanished(fs::canonicalize(parent).await)?;
        if root.is_some() && parent == root {
            Ok(())
        } else {
            Err(StorageError::NotFound)
        }
    }
}

fn is_sanitized(name: &str) -> bool {
    sanitize_filename(name).as_deref() == Some(name)
}

/// `Ok(None)` when the entry no longer exists.
fn skip_vanished<T>(result: io::Result<T>) -> Result<Option<T>, StorageError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Reduces an arbitrary client-supplied name to a safe basename.
///
/// Keeps only the last path component, turns whitespace runs into `_`, drops
/// everything outside `[A-Za-z0-9._-]` and trims leading/trailing `.` and
/// `_`. Reserved device names get a `_` prefix. Returns `None` when nothing
/// usable is left. Applying it twice gives the same result as applying it
/// once.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = filtered.trim_matches(['.', '_']);
    if trimmed.is_empty() {
        return None;
    }

    let stem = trimmed.split('.').next().unwrap_or_default();
    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return Some(format!("_{trimmed}"));
    }
    Some(trimmed.to_string())
}
