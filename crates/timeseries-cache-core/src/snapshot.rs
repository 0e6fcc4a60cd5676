//! Snapshot persistence for the instance store.
//!
//! A [`SnapshotManager`] writes a selection of store keys into a single
//! compressed archive and reads such archives back into a store.
//!
//! Saving can optionally pre-populate keys through an external [`Fetcher`]
//! (one call per requested window, strictly in order), trim the result to a
//! time filter, and split each key at data gaps so long quiet periods do not
//! inflate the archive. Loading reassembles split keys, places every key into
//! the store (merge, or the restore ladder of [`InstanceStore::restore`]) and
//! reconciles the [`RangeTracker`].
//!
//! Failures confined to one key are logged and reported; they never abort
//! the rest of the call.

pub mod codec;
pub mod error;
pub mod layout;
pub mod record;

use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    config::CacheSettings,
    consistency::ensure_consistent,
    instance::DataInstance,
    merge::concat_all,
    segment::split_into_segments,
    storage::{self, StorageLocation},
    store::{InstanceStore, RestoreOutcome},
    time_range::TimeRange,
    tracker::RangeTracker,
};

use codec::{Codec, CompressionLevel};
use error::{
    CodecSnafu, DecodeSnafu, EncodeSnafu, InvalidRequestSnafu, NothingToSaveSnafu, StorageSnafu,
    UnknownFormatSnafu, UnsupportedVersionSnafu, VerifyFailedSnafu,
};
use record::{
    EntryKey, FORMAT_VERSION, SegmentsMeta, SnapshotEntry, SnapshotRecord, entry_matches_key,
    is_reserved_key, segment_entry_name, segments_meta_entry_name,
};

pub use error::SnapshotError;

/// Error type returned by [`Fetcher`] implementations.
pub type FetchError = Box<dyn Error + Send + Sync>;

/// Source of data for a key over a time window, used to populate the store
/// before a save.
pub trait Fetcher {
    /// Fetch the data for `key` within `window`.
    fn fetch(&mut self, key: &str, window: &TimeRange) -> Result<DataInstance, FetchError>;
}

impl<F> Fetcher for F
where
    F: FnMut(&str, &TimeRange) -> Result<DataInstance, FetchError>,
{
    fn fetch(&mut self, key: &str, window: &TimeRange) -> Result<DataInstance, FetchError> {
        self(key, window)
    }
}

/// Parameters of [`SnapshotManager::save`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Snapshot name; snapshot or compression suffixes are replaced.
    pub name: String,
    /// Store keys to persist.
    pub keys: Vec<String>,
    /// Windows to fetch for every key before saving, in call order.
    pub fetch_windows: Vec<TimeRange>,
    /// Keep only rows inside this window.
    pub time_filter: Option<TimeRange>,
    /// Split keys at data gaps.
    pub auto_split: bool,
    /// Compression; the settings' default when `None`.
    pub compression: Option<CompressionLevel>,
}

impl SaveOptions {
    /// Save `keys` under `name` with no fetching, filtering or splitting.
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            fetch_windows: Vec::new(),
            time_filter: None,
            auto_split: false,
            compression: None,
        }
    }

    /// Fetch each of `windows` for every key before saving.
    pub fn with_fetch_windows(mut self, windows: Vec<TimeRange>) -> Self {
        self.fetch_windows = windows;
        self
    }

    /// Keep only rows inside `window`.
    pub fn with_time_filter(mut self, window: TimeRange) -> Self {
        self.time_filter = Some(window);
        self
    }

    /// Enable or disable gap-based splitting.
    pub fn with_auto_split(mut self, auto_split: bool) -> Self {
        self.auto_split = auto_split;
        self
    }

    /// Use `level` instead of the default compression.
    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = Some(level);
        self
    }
}

/// Parameters of [`SnapshotManager::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Snapshot name, with or without its extension.
    pub name: String,
    /// Restrict loading to these keys (and their segments).
    pub keys: Option<Vec<String>>,
    /// Merge into existing store data instead of restoring over it.
    pub merge: bool,
}

impl LoadOptions {
    /// Load every key of `name`, restoring over existing data.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: None,
            merge: false,
        }
    }

    /// Only load `keys`.
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Merge loaded data into the store.
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }
}

/// A key that was left out of a save or load, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedKey {
    /// Store key or entry name.
    pub key: String,
    /// Human-readable cause.
    pub reason: String,
}

/// A fetch that failed during save. The key is still saved with whatever
/// data the store holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    /// Key being fetched.
    pub key: String,
    /// Requested window.
    pub window: TimeRange,
    /// Fetcher or merge error message.
    pub reason: String,
}

/// One key written by a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedKey {
    /// Store key.
    pub key: String,
    /// Rows written across all segments.
    pub points: usize,
    /// Number of segments, 0 when saved whole.
    pub segments: usize,
}

/// Outcome of [`SnapshotManager::save`].
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Path of the written file, relative to the storage root.
    pub path: PathBuf,
    /// Codec used.
    pub codec: Codec,
    /// Size of the written file.
    pub bytes_written: u64,
    /// Keys written.
    pub saved: Vec<SavedKey>,
    /// Keys not written.
    pub skipped: Vec<SkippedKey>,
    /// Fetches that failed.
    pub fetch_failures: Vec<FetchFailure>,
}

/// How a loaded key entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Merged with existing data.
    Merged,
    /// Restored over existing data.
    Restored(RestoreOutcome),
}

/// One key placed into the store by a load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKey {
    /// Store key.
    pub key: String,
    /// Rows held by the store for the key after placement.
    pub points: usize,
    /// Segments reassembled, 0 for whole entries.
    pub segments: usize,
    /// How the key was placed.
    pub outcome: LoadOutcome,
}

/// Outcome of [`SnapshotManager::load`].
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Path that was read, relative to the storage root.
    pub path: PathBuf,
    /// Timestamp recorded at save time.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Keys placed into the store.
    pub restored: Vec<LoadedKey>,
    /// Keys or entries that could not be placed.
    pub skipped: Vec<SkippedKey>,
}

/// Reads and writes snapshot archives under a storage root.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    location: StorageLocation,
    settings: CacheSettings,
}

impl SnapshotManager {
    /// A manager rooted at `location`.
    pub fn new(location: StorageLocation, settings: CacheSettings) -> Self {
        Self { location, settings }
    }

    /// Storage root.
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Active settings.
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Persist the requested keys of `store` to a single archive.
    ///
    /// With fetch windows, each key is first populated by calling `fetcher`
    /// once per window and merging the result; successful windows are
    /// recorded in `tracker`. Each key is then repaired, optionally trimmed
    /// to the time filter and optionally split at data gaps.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::InvalidRequest`] for an empty key list, an empty
    ///   name, or fetch windows without a fetcher. Nothing is fetched or
    ///   written in that case.
    /// - [`SnapshotError::NothingToSave`] when no key has data.
    /// - Encoding, compression and storage failures, and
    ///   [`SnapshotError::VerifyFailed`] when the file is missing afterwards.
    pub fn save(
        &self,
        store: &mut InstanceStore,
        tracker: &mut RangeTracker,
        mut fetcher: Option<&mut dyn Fetcher>,
        opts: &SaveOptions,
    ) -> Result<SaveReport, SnapshotError> {
        ensure!(
            !opts.keys.is_empty(),
            InvalidRequestSnafu {
                message: "no keys requested",
            }
        );
        ensure!(
            opts.fetch_windows.is_empty() || fetcher.is_some(),
            InvalidRequestSnafu {
                message: "fetch windows were given without a fetcher",
            }
        );
        let codec = opts
            .compression
            .unwrap_or(self.settings.default_compression)
            .codec();
        let path = layout::snapshot_path(&self.settings.snapshot_subdir, &opts.name, codec)?;

        let mut fetch_failures = Vec::new();
        if let Some(fetcher) = fetcher.as_deref_mut() {
            for key in opts.keys.iter().filter(|k| !is_reserved_key(k)) {
                for window in &opts.fetch_windows {
                    debug!("Fetching {key} for {window}");
                    let failure = match fetcher.fetch(key, window) {
                        Ok(data) => match store.merge_into(key, data) {
                            Ok(_) => {
                                tracker.update_range(key, *window);
                                None
                            }
                            Err(e) => Some(e.to_string()),
                        },
                        Err(e) => Some(e.to_string()),
                    };
                    if let Some(reason) = failure {
                        warn!("Fetch of {key} for {window} failed: {reason}");
                        fetch_failures.push(FetchFailure {
                            key: key.clone(),
                            window: *window,
                            reason,
                        });
                    }
                }
            }
        }

        let policy = self.settings.segment_policy();
        let mut snapshot = SnapshotRecord::new();
        let mut saved = Vec::new();
        let mut skipped = Vec::new();

        for key in &opts.keys {
            if is_reserved_key(key) {
                warn!("Skipping {key}: name collides with segment entry naming");
                skipped.push(SkippedKey {
                    key: key.clone(),
                    reason: "name collides with segment entry naming".to_string(),
                });
                continue;
            }
            let Some(instance) = store.get_mut(key) else {
                warn!("Skipping {key}: not present in the store");
                skipped.push(SkippedKey {
                    key: key.clone(),
                    reason: "not present in the store".to_string(),
                });
                continue;
            };
            ensure_consistent(key, instance);

            let data = match &opts.time_filter {
                Some(window) => instance.filter_time(window),
                None => instance.clone(),
            };
            if data.is_empty() {
                warn!("Skipping {key}: no data to save");
                skipped.push(SkippedKey {
                    key: key.clone(),
                    reason: "no data to save".to_string(),
                });
                continue;
            }

            let segments = if opts.auto_split {
                split_into_segments(&data, None, &policy)
            } else {
                Vec::new()
            };

            if segments.is_empty() {
                saved.push(SavedKey {
                    key: key.clone(),
                    points: data.len(),
                    segments: 0,
                });
                snapshot
                    .entries
                    .insert(key.clone(), SnapshotEntry::Instance(data));
                continue;
            }

            let meta = SegmentsMeta {
                original_key: key.clone(),
                segment_count: segments.len(),
                ranges: segments.iter().filter_map(DataInstance::span).collect(),
            };
            saved.push(SavedKey {
                key: key.clone(),
                points: segments.iter().map(DataInstance::len).sum(),
                segments: segments.len(),
            });
            for (i, segment) in segments.into_iter().enumerate() {
                snapshot.entries.insert(
                    segment_entry_name(key, i + 1),
                    SnapshotEntry::Instance(segment),
                );
            }
            snapshot
                .entries
                .insert(segments_meta_entry_name(key), SnapshotEntry::SegmentsMeta(meta));
        }

        ensure!(!saved.is_empty(), NothingToSaveSnafu);

        let path_str = path.display().to_string();
        let encoded = bincode::serialize(&snapshot).context(EncodeSnafu)?;
        let payload = codec
            .compress(&encoded)
            .context(CodecSnafu { path: &path_str })?;
        storage::write_atomic(&self.location, &path, &payload).context(StorageSnafu)?;

        let bytes_written = storage::file_len(&self.location, &path)
            .context(StorageSnafu)?
            .context(VerifyFailedSnafu { path: &path_str })?;

        info!(
            "Saved {} key(s) to {path_str} ({bytes_written} bytes, {} skipped, {} failed fetches)",
            saved.len(),
            skipped.len(),
            fetch_failures.len()
        );

        Ok(SaveReport {
            path,
            codec,
            bytes_written,
            saved,
            skipped,
            fetch_failures,
        })
    }

    /// Read an archive and place its keys into `store`.
    ///
    /// Split keys are reassembled in segment order before placement. With
    /// `merge` set, data is merged into the store; otherwise it goes through
    /// [`InstanceStore::restore`]. Afterwards `tracker` is seeded from each
    /// key's observed span when it knows nothing about the key; a tracked
    /// range that disagrees with the data is kept and logged.
    ///
    /// # Errors
    ///
    /// Invalid names, unknown formats, storage, decompression and decode
    /// failures, and unsupported format versions.
    pub fn load(
        &self,
        store: &mut InstanceStore,
        tracker: &mut RangeTracker,
        opts: &LoadOptions,
    ) -> Result<LoadReport, SnapshotError> {
        let (path, codec) = self.resolve_existing(&opts.name)?;
        let path_str = path.display().to_string();

        let bytes = storage::read_all_bytes(&self.location, &path).context(StorageSnafu)?;
        let decoded = codec
            .decompress(&bytes)
            .context(CodecSnafu { path: &path_str })?;
        let snapshot: SnapshotRecord =
            bincode::deserialize(&decoded).context(DecodeSnafu { path: &path_str })?;
        ensure!(
            snapshot.format_version == FORMAT_VERSION,
            UnsupportedVersionSnafu {
                found: snapshot.format_version,
                supported: FORMAT_VERSION,
            }
        );

        let created_at = snapshot.created_at;
        let mut skipped = Vec::new();
        let (whole, segmented) = partition_entries(snapshot, opts.keys.as_deref(), &mut skipped);

        let mut pending: Vec<(String, DataInstance, usize)> = whole
            .into_iter()
            .map(|(key, instance)| (key, instance, 0))
            .collect();

        for (key, group) in segmented {
            match reassemble(group) {
                Ok((instance, count)) => pending.push((key, instance, count)),
                Err(reason) => {
                    warn!("Skipping {key}: {reason}");
                    skipped.push(SkippedKey { key, reason });
                }
            }
        }

        let mut restored = Vec::new();
        for (key, mut instance, segments) in pending {
            instance.rebuild_stacked();
            let outcome = if opts.merge {
                match store.merge_into(&key, instance) {
                    Ok(_) => LoadOutcome::Merged,
                    Err(e) => {
                        warn!("Skipping {key}: {e}");
                        skipped.push(SkippedKey {
                            key,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                }
            } else {
                LoadOutcome::Restored(store.restore(&key, instance))
            };

            let (points, span) = store
                .get(&key)
                .map(|i| (i.len(), i.span()))
                .unwrap_or((0, None));
            reconcile_tracker(tracker, &key, span);
            restored.push(LoadedKey {
                key,
                points,
                segments,
                outcome,
            });
        }

        info!(
            "Loaded {} key(s) from {path_str} ({} skipped)",
            restored.len(),
            skipped.len()
        );

        Ok(LoadReport {
            path,
            created_at,
            restored,
            skipped,
        })
    }

    /// Snapshot files in the snapshot directory, relative to the storage
    /// root and sorted by name. Files without a snapshot extension are
    /// ignored.
    pub fn list_snapshots(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        let dir = Path::new(&self.settings.snapshot_subdir);
        let names = storage::list_files(&self.location, dir).context(StorageSnafu)?;
        Ok(names
            .into_iter()
            .filter(|name| Codec::from_file_name(name).is_some())
            .map(|name| dir.join(name))
            .collect())
    }

    /// Locate the file for `name` and its codec. A name without a snapshot
    /// extension is probed with each known extension in turn.
    fn resolve_existing(&self, name: &str) -> Result<(PathBuf, Codec), SnapshotError> {
        let subdir = &self.settings.snapshot_subdir;
        let path = layout::existing_snapshot_path(subdir, name)?;
        let path_str = path.display().to_string();
        if let Some(codec) = Codec::from_file_name(&path_str) {
            return Ok((path, codec));
        }

        for level in [
            CompressionLevel::Medium,
            CompressionLevel::High,
            CompressionLevel::None,
        ] {
            let codec = level.codec();
            let candidate = layout::snapshot_path(subdir, name, codec)?;
            if storage::file_len(&self.location, &candidate)
                .context(StorageSnafu)?
                .is_some()
            {
                return Ok((candidate, codec));
            }
        }
        UnknownFormatSnafu { path: path_str }.fail()
    }
}

type SegmentGroup = (Vec<(usize, DataInstance)>, Option<SegmentsMeta>);

/// Split decoded entries into whole keys and per-key segment groups, keeping
/// only entries that belong to `requested` when given.
fn partition_entries(
    snapshot: SnapshotRecord,
    requested: Option<&[String]>,
    skipped: &mut Vec<SkippedKey>,
) -> (BTreeMap<String, DataInstance>, BTreeMap<String, SegmentGroup>) {
    let mut whole = BTreeMap::new();
    let mut segmented: BTreeMap<String, SegmentGroup> = BTreeMap::new();

    for (name, entry) in snapshot.entries {
        if let Some(keys) = requested {
            if !keys.iter().any(|k| entry_matches_key(&name, k)) {
                continue;
            }
        }

        // Owned classification so `name` can be moved below.
        let owner = match EntryKey::parse(&name) {
            EntryKey::Segment { base, index } => Some((base.to_string(), Some(index))),
            EntryKey::SegmentsMeta { base } => Some((base.to_string(), None)),
            EntryKey::Plain(_) => None,
        };

        match (owner, entry) {
            (Some((base, Some(index))), SnapshotEntry::Instance(instance)) => {
                segmented.entry(base).or_default().0.push((index, instance));
            }
            (Some((base, None)), SnapshotEntry::SegmentsMeta(meta)) => {
                segmented.entry(base).or_default().1 = Some(meta);
            }
            (_, SnapshotEntry::Instance(instance)) => {
                whole.insert(name, instance);
            }
            (_, SnapshotEntry::SegmentsMeta(_)) => {
                warn!("Skipping entry {name}: segment metadata under a non-metadata name");
                skipped.push(SkippedKey {
                    key: name,
                    reason: "segment metadata under a non-metadata name".to_string(),
                });
            }
        }
    }
    (whole, segmented)
}

/// Concatenate a key's segments in index order. A count that disagrees with
/// the key's segment metadata rejects the whole key.
fn reassemble(group: SegmentGroup) -> Result<(DataInstance, usize), String> {
    let (mut segments, meta) = group;
    if segments.is_empty() {
        return Err("segment metadata present but no segments".to_string());
    }
    segments.sort_by_key(|(index, _)| *index);

    if let Some(meta) = &meta {
        if meta.segment_count != segments.len() {
            return Err(format!(
                "segment count mismatch: metadata lists {}, found {}",
                meta.segment_count,
                segments.len()
            ));
        }
    }

    let count = segments.len();
    let parts: Vec<DataInstance> = segments.into_iter().map(|(_, s)| s).collect();
    let instance = concat_all(&parts).map_err(|e| e.to_string())?;
    Ok((instance, count))
}

fn reconcile_tracker(tracker: &mut RangeTracker, key: &str, span: Option<TimeRange>) {
    let Some(span) = span else {
        return;
    };
    match tracker.get_calculated_range(key) {
        None => tracker.update_range(key, span),
        Some(tracked) if !tracked.approx_eq(&span, tracker.tolerance()) => {
            warn!("Tracked range {tracked} for {key} disagrees with loaded data span {span}; keeping the tracked range");
        }
        Some(_) => {}
    }
}
