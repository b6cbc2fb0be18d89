use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::fs::{self, File};
use tracing::{debug, warn};

use crate::SendError;

/// 9999-12-31T23:59:59Z, the latest instant an HTTP date can express.
pub(crate) const MAX_HTTP_DATE_SECS: u64 = 253_402_300_799;

/// What the sender needs to know about a resource before reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Base name, also used verbatim as the `ETag`.
    pub name: String,
    pub byte_size: u64,
    /// Seconds since the Unix epoch.
    pub last_modified: u64,
    pub content_type: String,
}

impl ResourceInfo {
    pub fn etag(&self) -> &str {
        &self.name
    }

    pub fn last_modified_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.last_modified.min(MAX_HTTP_DATE_SECS))
    }

    pub fn last_modified_millis(&self) -> u64 {
        self.last_modified.saturating_mul(1000)
    }
}

/// A file on disk with its metadata resolved. The file itself is only opened
/// by [`FileResource::open`], once the request is known to need its bytes.
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
    info: ResourceInfo,
}

impl FileResource {
    /// Calls [`tokio::fs::metadata`] to determine size and modification time.
    /// The content type is guessed from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<FileResource, SendError> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let metadata = match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Err(SendError::NotFound(shown)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %shown, "file doesn't exist");
                return Err(SendError::NotFound(shown));
            }
            Err(e) => return Err(unavailable(shown, e)),
        };

        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| SendError::MetadataUnavailable {
                path: shown.clone(),
                reason: "no usable file name".to_string(),
            })?
            .to_string();

        let modified = metadata.modified().map_err(|e| unavailable(shown.clone(), e))?;
        let last_modified = clamp_mtime(modified);

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(FileResource {
            path: path.to_path_buf(),
            info: ResourceInfo {
                name,
                byte_size: metadata.len(),
                last_modified,
                content_type,
            },
        })
    }

    /// Resolve `identifier` as a plain file name inside `root`. Anything that
    /// could address a file outside of `root` is reported as not found.
    pub async fn resolve(root: impl AsRef<Path>, identifier: &str) -> Result<FileResource, SendError> {
        let root = root.as_ref();
        let not_found = || SendError::NotFound(identifier.to_string());

        let mut components = Path::new(identifier).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !identifier.contains(['/', '\\']) => {}
            _ => {
                warn!(%identifier, "rejecting file identifier");
                return Err(not_found());
            }
        }

        let root_canonical = fs::canonicalize(root).await.map_err(|e| {
            warn!(root = %root.display(), error = %e, "file root not accessible");
            not_found()
        })?;
        let path = fs::canonicalize(root.join(identifier)).await.map_err(|_| not_found())?;
        if !path.starts_with(&root_canonical) {
            warn!(%identifier, resolved = %path.display(), "path escapes file root");
            return Err(not_found());
        }

        Self::from_path(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    /// Open the file for one read pass, positioned at offset 0.
    pub async fn open(&self) -> Result<File, SendError> {
        File::open(&self.path).await.map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "file vanished before transfer");
            SendError::NotFound(self.path.display().to_string())
        })
    }
}

/// Whole seconds since the epoch, kept within what `Last-Modified` can carry.
fn clamp_mtime(modified: SystemTime) -> u64 {
    modified
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
        .min(MAX_HTTP_DATE_SECS)
}

fn unavailable(path: String, error: io::Error) -> SendError {
    SendError::MetadataUnavailable { path, reason: error.to_string() }
}
