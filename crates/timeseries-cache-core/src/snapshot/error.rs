//! Error types and SNAFU context selectors for `snapshot`.
//!
//! Only whole-call failures live here. Problems confined to a single key
//! (fetch errors, structural mismatches, malformed entries) are logged and
//! listed in the save/load reports instead.

use snafu::prelude::*;

use crate::storage::StorageError;

use super::codec::CodecError;

/// Errors from snapshot save, load and listing.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SnapshotError {
    /// The call was malformed (no keys, empty name, windows without a fetcher).
    #[snafu(display("Invalid snapshot request: {message}"))]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// The file name carries no recognised snapshot extension.
    #[snafu(display("Unrecognised snapshot format for {path}"))]
    UnknownFormat {
        /// Offending path.
        path: String,
    },

    /// Reading, writing or listing snapshot files failed.
    #[snafu(display("Snapshot storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// Compressing or decompressing the payload failed.
    #[snafu(display("Snapshot compression error for {path}: {source}"))]
    Codec {
        /// Snapshot path being processed.
        path: String,
        /// Underlying codec error.
        source: CodecError,
    },

    /// The record could not be serialized.
    #[snafu(display("Failed to encode snapshot record: {source}"))]
    Encode {
        /// Underlying bincode error.
        source: bincode::Error,
    },

    /// The payload is not a valid snapshot record.
    #[snafu(display("Failed to decode snapshot {path}: {source}"))]
    Decode {
        /// Snapshot path being decoded.
        path: String,
        /// Underlying bincode error.
        source: bincode::Error,
    },

    /// The record was written with a layout this build does not read.
    #[snafu(display("Snapshot format version {found} is not supported (expected {supported})"))]
    UnsupportedVersion {
        /// Version stored in the file.
        found: u32,
        /// Version this build understands.
        supported: u32,
    },

    /// None of the requested keys produced any data to persist.
    #[snafu(display("No data available for any requested key; nothing was written"))]
    NothingToSave,

    /// The file was not present after the write returned.
    #[snafu(display("Snapshot file missing after write: {path}"))]
    VerifyFailed {
        /// Path that should exist.
        path: String,
    },
}
