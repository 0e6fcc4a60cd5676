//! Local filesystem access for snapshot archives.
//!
//! All snapshot I/O goes through this module so that path resolution,
//! error classification and the atomic write protocol live in one place:
//!
//! - Paths are always given relative to a [`StorageLocation`] root.
//! - Missing files are reported as [`StorageError::NotFound`]; every other
//!   failure is [`StorageError::OtherIo`] with the offending path attached.
//! - [`write_atomic`] writes to a sibling temporary file, syncs it, and
//!   renames it into place, removing the temporary file on any error.
//!
//! Only a local filesystem backend exists today; the enum-based location
//! keeps room for other backends without changing callers.

mod error;

use snafu::{Backtrace, prelude::*};
use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

pub use error::{BackendError, StorageError};
use error::OtherIoSnafu;

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root under which snapshot files are stored.
#[derive(Clone, Debug)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
}

impl StorageLocation {
    /// Creates a new `StorageLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Resolve `rel` against this location.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        match self {
            StorageLocation::Local(root) => root.join(rel),
        }
    }
}

fn classify(err: io::Error, path: &Path) -> StorageError {
    let path = path.display().to_string();
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound {
            path,
            source: BackendError::Local(err),
            backtrace: Backtrace::capture(),
        }
    } else {
        StorageError::OtherIo {
            path,
            source: BackendError::Local(err),
            backtrace: Backtrace::capture(),
        }
    }
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; the caller is already returning an error.
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn tmp_sibling(abs: &Path) -> PathBuf {
    let mut name = abs
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(".tmp");
    abs.with_file_name(name)
}

/// Write `contents` to `rel_path` inside `location` using write-then-rename.
///
/// The payload goes to `<file>.tmp` next to the target, is synced, and is
/// then renamed over the target. Parent directories are created as needed.
///
/// # Errors
///
/// Returns `StorageError::OtherIo` when any filesystem step fails.
pub fn write_atomic(location: &StorageLocation, rel_path: &Path, contents: &[u8]) -> StorageResult<()> {
    let abs = location.resolve(rel_path);
    create_parent_dir(&abs)?;

    let tmp_path = tmp_sibling(&abs);
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.write_all(contents)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;

        file.sync_all()
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: tmp_path.display().to_string(),
            })?;
    }

    fs::rename(&tmp_path, &abs)
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();
    Ok(())
}

/// Read the full contents of the file at `rel_path`.
///
/// # Errors
///
/// `StorageError::NotFound` when the file does not exist, otherwise
/// `StorageError::OtherIo`.
pub fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = location.resolve(rel_path);
    fs::read(&abs).map_err(|e| classify(e, &abs))
}

/// Size in bytes of the regular file at `rel_path`, or `None` when there is
/// no such file.
pub fn file_len(location: &StorageLocation, rel_path: &Path) -> StorageResult<Option<u64>> {
    let abs = location.resolve(rel_path);
    match fs::metadata(&abs) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(classify(e, &abs)),
    }
}

/// Names of the regular files directly inside the directory `rel_dir`,
/// sorted. A missing directory yields an empty list.
pub fn list_files(location: &StorageLocation, rel_dir: &Path) -> StorageResult<Vec<String>> {
    let abs = location.resolve(rel_dir);
    let entries = match fs::read_dir(&abs) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(classify(e, &abs)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| classify(e, &abs))?;
        let is_file = entry
            .file_type()
            .map_err(|e| classify(e, &entry.path()))?
            .is_file();
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
