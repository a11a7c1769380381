use crate::feed::{Feed, FeedError, write_feed};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Mode of a newly published file; an existing file keeps its own.
#[cfg(unix)]
const PUBLISHED_MODE: u32 = 0o644;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Serialize(#[from] FeedError),
    #[error("cannot write {path}: {message}")]
    Io { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct Published {
    pub path: PathBuf,
    pub bytes: usize,
}

/// Serialises `feed` and atomically replaces `path`.
///
/// The document is written to a temporary file in the same directory and
/// renamed over the target, so readers see either the old or the new file.
pub async fn publish(feed: &Feed, path: &Path) -> Result<Published, PublishError> {
    let bytes = write_feed(feed)?;
    let path = path.to_path_buf();
    let size = bytes.len();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|err| PublishError::Io {
            path: path.clone(),
            message: err.to_string(),
        })??;
    Ok(Published { path, bytes: size })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PublishError> {
    let io_err = |err: std::io::Error| PublishError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    #[cfg(unix)]
    {
        // NamedTempFile is created 0600
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o777)
            .unwrap_or(PUBLISHED_MODE);
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}
