//! Per-entry payload compression for shard DATA sections.

use serde::{Deserialize, Serialize};

use crate::error::{ShardError, ShardResult};

/// Extensions whose payloads are already compressed and not worth recoding.
pub const DEFAULT_SKIP_EXTENSIONS: [&str; 8] =
    [".jpg", ".jpeg", ".png", ".gif", ".gz", ".zip", ".bz2", ".xz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionCodec {
    None,
    Zstd,
    Lz4,
}

impl CompressionCodec {
    /// Codec byte as written into index records.
    pub fn as_byte(self) -> u8 {
        match self {
            CompressionCodec::None => 0,
            CompressionCodec::Zstd => 1,
            CompressionCodec::Lz4 => 2,
        }
    }

    pub fn from_byte(value: u8) -> ShardResult<Self> {
        match value {
            0 => Ok(CompressionCodec::None),
            1 => Ok(CompressionCodec::Zstd),
            2 => Ok(CompressionCodec::Lz4),
            other => Err(ShardError::CorruptShard(format!("unknown codec byte {other}"))),
        }
    }
}

/// High-level compression profiles used by packers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionProfile {
    Aggressive,
    Balanced,
    Speed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    pub level: Option<i32>,
    pub profile: CompressionProfile,
    pub skip_extensions: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig::balanced_zstd()
    }
}

impl CompressionConfig {
    fn with_profile(codec: CompressionCodec, level: Option<i32>, profile: CompressionProfile) -> Self {
        CompressionConfig {
            codec,
            level,
            profile,
            skip_extensions: DEFAULT_SKIP_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Store payloads verbatim.
    pub fn none() -> Self {
        Self::with_profile(CompressionCodec::None, None, CompressionProfile::Speed)
    }

    pub fn aggressive_zstd() -> Self {
        Self::with_profile(CompressionCodec::Zstd, Some(9), CompressionProfile::Aggressive)
    }

    pub fn balanced_zstd() -> Self {
        Self::with_profile(CompressionCodec::Zstd, Some(5), CompressionProfile::Balanced)
    }

    pub fn speed_lz4() -> Self {
        Self::with_profile(CompressionCodec::Lz4, None, CompressionProfile::Speed)
    }

    /// Whether the payload behind `logical_name` should be compressed.
    pub fn should_compress(&self, logical_name: &str) -> bool {
        if let Some(dot) = logical_name.rfind('.') {
            let suffix = logical_name[dot..].to_ascii_lowercase();
            if suffix.len() > 1 && self.skip_extensions.iter().any(|s| s == &suffix) {
                return false;
            }
        }
        self.codec != CompressionCodec::None
    }
}

pub fn compress_payload(codec: CompressionCodec, level: Option<i32>, data: &[u8]) -> ShardResult<Vec<u8>> {
    match codec {
        CompressionCodec::None => Ok(data.to_vec()),
        CompressionCodec::Zstd => Ok(zstd::encode_all(data, level.unwrap_or(3))?),
        CompressionCodec::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
    }
}

/// Decompress a payload and verify the expected uncompressed length.
pub fn decompress_payload(
    codec: CompressionCodec,
    data: &[u8],
    uncompressed_size: Option<u64>,
) -> ShardResult<Vec<u8>> {
    let out = match codec {
        CompressionCodec::None => data.to_vec(),
        CompressionCodec::Zstd => zstd::decode_all(data)
            .map_err(|e| ShardError::CorruptShard(format!("zstd decode failed: {e}")))?,
        CompressionCodec::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| ShardError::CorruptShard(format!("lz4 decode failed: {e}")))?,
    };
    if let Some(expected) = uncompressed_size {
        if out.len() as u64 != expected {
            return Err(ShardError::CorruptShard(format!(
                "decompressed size mismatch: expected {expected}, got {}",
                out.len()
            )));
        }
    }
    Ok(out)
}
