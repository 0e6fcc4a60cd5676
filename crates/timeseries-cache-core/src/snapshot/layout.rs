//! Where snapshot files live relative to the storage root.

use std::path::{Path, PathBuf};

use snafu::prelude::*;

use super::{
    codec::{Codec, strip_snapshot_suffixes},
    error::{InvalidRequestSnafu, SnapshotError},
};

/// Relative path for a snapshot called `name` written with `codec`.
///
/// Existing snapshot or compression suffixes on `name` are dropped before the
/// codec's own extension is added. Names already starting with `subdir/` are
/// kept as given; anything else is placed under `subdir`.
pub fn snapshot_path(subdir: &str, name: &str, codec: Codec) -> Result<PathBuf, SnapshotError> {
    let stem = strip_snapshot_suffixes(name.trim());
    ensure!(
        !stem.is_empty() && !stem.ends_with('/'),
        InvalidRequestSnafu {
            message: format!("snapshot name {name:?} is empty"),
        }
    );

    let file = format!("{stem}{}", codec.extension());
    let prefix = format!("{subdir}/");
    if subdir.is_empty() || file.starts_with(&prefix) {
        Ok(PathBuf::from(file))
    } else {
        Ok(Path::new(subdir).join(file))
    }
}

/// Relative path for loading `name`: like [`snapshot_path`] but keeps the
/// extension the caller gave, which decides the codec.
pub fn existing_snapshot_path(subdir: &str, name: &str) -> Result<PathBuf, SnapshotError> {
    let name = name.trim();
    ensure!(
        !strip_snapshot_suffixes(name).is_empty(),
        InvalidRequestSnafu {
            message: format!("snapshot name {name:?} is empty"),
        }
    );
    let prefix = format!("{subdir}/");
    if subdir.is_empty() || name.starts_with(&prefix) {
        Ok(PathBuf::from(name))
    } else {
        Ok(Path::new(subdir).join(name))
    }
}
