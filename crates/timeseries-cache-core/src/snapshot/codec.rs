//! Compression codecs and their file extensions.
//!
//! Snapshot archives are `bincode` payloads, optionally wrapped in a
//! compression frame. The codec is chosen at save time from a symbolic
//! [`CompressionLevel`] and recovered at load time from the file extension:
//!
//! | Level    | Codec          | Extension     |
//! |----------|----------------|---------------|
//! | `none`   | raw            | `.tsnap`      |
//! | `low`    | zstd level 1   | `.tsnap.zst`  |
//! | `medium` | zstd level 3   | `.tsnap.zst`  |
//! | `high`   | xz level 9     | `.tsnap.xz`   |

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use xz2::{read::XzDecoder, write::XzEncoder};

const ZSTD_LOW_LEVEL: i32 = 1;
const ZSTD_MEDIUM_LEVEL: i32 = 3;
const XZ_HIGH_LEVEL: u32 = 9;

/// Symbolic compression effort requested by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Store the payload uncompressed.
    None,
    /// Fast compression.
    Low,
    /// Balanced compression.
    #[default]
    Medium,
    /// Strongest compression.
    High,
}

impl CompressionLevel {
    /// Concrete codec for this level.
    pub fn codec(self) -> Codec {
        match self {
            CompressionLevel::None => Codec::Raw,
            CompressionLevel::Low => Codec::Zstd {
                level: ZSTD_LOW_LEVEL,
            },
            CompressionLevel::Medium => Codec::Zstd {
                level: ZSTD_MEDIUM_LEVEL,
            },
            CompressionLevel::High => Codec::Xz {
                level: XZ_HIGH_LEVEL,
            },
        }
    }
}

/// Concrete compression family and effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// No compression.
    Raw,
    /// zstd frame. The level only matters when encoding.
    Zstd {
        /// zstd compression level.
        level: i32,
    },
    /// xz (LZMA2) stream. The level only matters when encoding.
    Xz {
        /// xz preset, 0 to 9.
        level: u32,
    },
}

/// Errors raised while compressing or decompressing a payload.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    /// zstd failed to compress the payload.
    #[snafu(display("zstd compression failed: {source}"))]
    ZstdCompress {
        /// Underlying zstd error.
        source: io::Error,
    },

    /// zstd failed to decompress the payload.
    #[snafu(display("zstd decompression failed: {source}"))]
    ZstdDecompress {
        /// Underlying zstd error.
        source: io::Error,
    },

    /// xz failed to compress the payload.
    #[snafu(display("xz compression failed: {source}"))]
    XzCompress {
        /// Underlying xz error.
        source: io::Error,
    },

    /// The xz payload is corrupt or truncated.
    #[snafu(display("xz decompression failed: {source}"))]
    XzDecompress {
        /// Underlying xz error.
        source: io::Error,
    },
}

impl Codec {
    /// Full file suffix, including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Raw => ".tsnap",
            Codec::Zstd { .. } => ".tsnap.zst",
            Codec::Xz { .. } => ".tsnap.xz",
        }
    }

    /// Detect the codec from a file name. Returns `None` for names that do
    /// not carry a snapshot extension.
    pub fn from_file_name(name: &str) -> Option<Codec> {
        if name.ends_with(".tsnap.zst") {
            Some(Codec::Zstd {
                level: ZSTD_MEDIUM_LEVEL,
            })
        } else if name.ends_with(".tsnap.xz") {
            Some(Codec::Xz {
                level: XZ_HIGH_LEVEL,
            })
        } else if name.ends_with(".tsnap") {
            Some(Codec::Raw)
        } else {
            None
        }
    }

    /// Whether `self` and `other` read and write the same format, ignoring
    /// effort.
    pub fn same_family(&self, other: &Codec) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Compress `bytes`.
    pub fn compress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Raw => Ok(bytes.to_vec()),
            Codec::Zstd { level } => zstd::encode_all(bytes, *level).context(ZstdCompressSnafu),
            Codec::Xz { level } => {
                let mut encoder = XzEncoder::new(Vec::new(), *level);
                encoder.write_all(bytes).context(XzCompressSnafu)?;
                encoder.finish().context(XzCompressSnafu)
            }
        }
    }

    /// Reverse [`Codec::compress`].
    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        match self {
            Codec::Raw => Ok(bytes.to_vec()),
            Codec::Zstd { .. } => zstd::decode_all(bytes).context(ZstdDecompressSnafu),
            Codec::Xz { .. } => {
                let mut out = Vec::new();
                XzDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .context(XzDecompressSnafu)?;
                Ok(out)
            }
        }
    }
}

/// Remove every trailing snapshot or compression suffix from `name`.
///
/// `"run.tsnap.zst.tsnap"` becomes `"run"`.
pub fn strip_snapshot_suffixes(name: &str) -> &str {
    const SUFFIXES: [&str; 3] = [".zst", ".xz", ".tsnap"];
    let mut out = name;
    while let Some(stripped) = SUFFIXES.iter().find_map(|s| out.strip_suffix(s)) {
        out = stripped;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Vec<u8> {
        (0..4096u32).flat_map(|i| (i % 17).to_le_bytes()).collect()
    }

    #[test]
    fn every_level_round_trips_through_its_extension() {
        for level in [
            CompressionLevel::None,
            CompressionLevel::Low,
            CompressionLevel::Medium,
            CompressionLevel::High,
        ] {
            let codec = level.codec();
            let packed = codec.compress(&payload()).unwrap();
            let detected = Codec::from_file_name(&format!("x{}", codec.extension())).unwrap();
            assert!(detected.same_family(&codec), "{level:?}");
            assert_eq!(detected.decompress(&packed).unwrap(), payload(), "{level:?}");
        }
    }

    #[test]
    fn low_and_medium_share_a_family_and_high_differs() {
        let low = CompressionLevel::Low.codec();
        let medium = CompressionLevel::Medium.codec();
        let high = CompressionLevel::High.codec();

        assert!(low.same_family(&medium));
        assert_ne!(low, medium);
        assert!(!high.same_family(&medium));
        assert_ne!(high.extension(), medium.extension());
    }

    #[test]
    fn compressed_levels_shrink_repetitive_data() {
        let raw = payload();
        for level in [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High] {
            assert!(level.codec().compress(&raw).unwrap().len() < raw.len());
        }
    }

    #[test]
    fn corrupt_payloads_are_reported() {
        let err = Codec::Xz { level: 9 }.decompress(b"not xz at all").unwrap_err();
        assert!(matches!(err, CodecError::XzDecompress { .. }));

        let err = Codec::Zstd { level: 3 }.decompress(b"not zstd").unwrap_err();
        assert!(matches!(err, CodecError::ZstdDecompress { .. }));
    }

    #[test]
    fn unknown_extension_is_not_detected() {
        assert_eq!(Codec::from_file_name("snapshot.pkl.gz"), None);
        assert_eq!(Codec::from_file_name("snapshot.tsnap.lz4"), None);
        assert_eq!(Codec::from_file_name("snapshot.tsnap"), Some(Codec::Raw));
        assert!(matches!(
            Codec::from_file_name("snapshot.tsnap.xz"),
            Some(Codec::Xz { .. })
        ));
    }

    #[test]
    fn suffixes_are_stripped_repeatedly() {
        assert_eq!(strip_snapshot_suffixes("run.tsnap.zst"), "run");
        assert_eq!(strip_snapshot_suffixes("run.tsnap.zst.tsnap.xz"), "run");
        assert_eq!(strip_snapshot_suffixes("run.v2"), "run.v2");
    }
}
