//! Guarded file operations on the container drop directories
//!
//! Everything under an IPC directory is written by an untrusted container.
//! Reads never follow symlinks, never read more than [`IPC_MAX_FILE_SIZE`]
//! bytes, and never block on special files.

use super::error::{IngressError, QuarantineError};
use super::types::ERRORS_DIR;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Largest command file that will be read (1 MiB)
pub const IPC_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Read and parse one command file, or `None` if it must not be trusted
///
/// Every rejection is logged with the source group. The caller is expected to
/// quarantine the file when this returns `None`.
pub async fn read_ipc_json_file(path: &Path, source_group: &str) -> Option<Value> {
    match try_read_ipc_json_file(path).await {
        Ok(value) => Some(value),
        Err(IngressError::NotRegularFile(_)) => {
            warn!(path = %path.display(), source_group, "IPC: not a regular file, skipping");
            None
        }
        Err(IngressError::TooLarge { size, .. }) => {
            warn!(path = %path.display(), size, source_group, "IPC: file too large, skipping");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), source_group, error = %err, "IPC: failed to read file safely");
            None
        }
    }
}

/// Read and parse one command file, reporting why it was rejected
pub async fn try_read_ipc_json_file(path: &Path) -> Result<Value, IngressError> {
    let metadata = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|source| IngressError::Metadata {
            path: path.to_path_buf(),
            source,
        })?;

    if !metadata.file_type().is_file() {
        return Err(IngressError::NotRegularFile(path.to_path_buf()));
    }

    let size = metadata.len();
    if size > IPC_MAX_FILE_SIZE {
        return Err(IngressError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit: IPC_MAX_FILE_SIZE,
        });
    }

    let file = open_no_follow(path)
        .await
        .map_err(|source| IngressError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    // The entry may have been replaced between the stat and the open
    let opened = file.metadata().await.map_err(|source| IngressError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    if !opened.file_type().is_file() {
        return Err(IngressError::NotRegularFile(path.to_path_buf()));
    }

    let mut bytes = Vec::with_capacity(size as usize);
    file.take(size)
        .read_to_end(&mut bytes)
        .await
        .map_err(|source| IngressError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if (bytes.len() as u64) < size {
        return Err(IngressError::Truncated {
            path: path.to_path_buf(),
            expected: size,
            actual: bytes.len() as u64,
        });
    }

    let text = String::from_utf8(bytes).map_err(|source| IngressError::Utf8 {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| IngressError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn open_no_follow(path: &Path) -> std::io::Result<tokio::fs::File> {
    #[cfg(unix)]
    {
        // O_NONBLOCK keeps a FIFO swapped in after the stat from hanging the open
        tokio::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK)
            .open(path)
            .await
    }

    #[cfg(not(unix))]
    {
        tokio::fs::File::open(path).await
    }
}

/// Names of the regular `.json` files directly inside `dir`, sorted
///
/// Entry types come from the directory listing itself, so symlinks,
/// directories and special files are skipped without being followed. A
/// missing or unreadable directory yields an empty list.
pub async fn list_ipc_json_files(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            debug!(dir = %dir.display(), "IPC directory not readable: {}", err);
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                debug!(dir = %dir.display(), "Stopped listing IPC directory: {}", err);
                break;
            }
        };

        let is_file = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        if let Ok(name) = entry.file_name().into_string() {
            if name.ends_with(".json") {
                names.push(name);
            }
        }
    }

    names.sort();
    names
}

/// Move a rejected file to `<base_dir>/errors/<source_group>-<file_name>`
///
/// Returns the new location. An existing file at the destination is replaced.
pub fn quarantine_file(
    path: &Path,
    source_group: &str,
    file_name: &str,
    base_dir: &Path,
) -> Result<PathBuf, QuarantineError> {
    let error_dir = base_dir.join(ERRORS_DIR);
    std::fs::create_dir_all(&error_dir).map_err(|source| QuarantineError::CreateDir {
        path: error_dir.clone(),
        source,
    })?;

    let destination = error_dir.join(format!("{source_group}-{file_name}"));
    std::fs::rename(path, &destination).map_err(|source| QuarantineError::Rename {
        from: path.to_path_buf(),
        to: destination.clone(),
        source,
    })?;

    warn!(
        from = %path.display(),
        to = %destination.display(),
        source_group,
        "IPC: file quarantined"
    );
    Ok(destination)
}

/// Remove a command file once its command has been handled
pub fn consume_file(path: &Path) -> Result<(), QuarantineError> {
    std::fs::remove_file(path).map_err(|source| QuarantineError::Remove {
        path: path.to_path_buf(),
        source,
    })
}
