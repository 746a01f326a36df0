//! Append-only shard writer.
//!
//! The writer tracks its own absolute offset so any `Write` sink works
//! (file, in-memory buffer, network pipe). The header goes out lazily on
//! the first `add_file`; `finish` emits the index and footer and hands the
//! sink back.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map as JsonMap, Value as JsonValue};
use sha2::{Digest, Sha256};

use crate::bigfiles::resolve_bigfiles_dir;
use crate::compression::{compress_payload, CompressionCodec, CompressionConfig};
use crate::config::ContainerConfig;
use crate::error::{ShardError, ShardResult};
use crate::format::{encode_footer, encode_header, HEADER_SIZE};
use crate::index::{encode_index, ShardEntry, ShardIndex};

pub struct ShardWriter<W: Write> {
    sink: W,
    compression: CompressionConfig,
    config: ContainerConfig,
    bigfiles_dir: Option<PathBuf>,
    index: ShardIndex,
    bytes_written: u64,
    header_written: bool,
}

impl ShardWriter<BufWriter<File>> {
    /// Create a shard file at `path`; BigFiles go to a sibling directory
    /// named by the configured prefix.
    pub fn create(
        path: &Path,
        compression: CompressionConfig,
        config: ContainerConfig,
    ) -> ShardResult<Self> {
        let bigfiles_dir = path
            .parent()
            .map(|parent| resolve_bigfiles_dir(parent, &config.bigfiles_prefix));
        let file = File::create(path)?;
        Ok(ShardWriter::new(BufWriter::new(file), compression, config, bigfiles_dir))
    }
}

impl<W: Write> ShardWriter<W> {
    pub fn new(
        sink: W,
        compression: CompressionConfig,
        config: ContainerConfig,
        bigfiles_dir: Option<PathBuf>,
    ) -> Self {
        ShardWriter {
            sink,
            compression,
            config,
            bigfiles_dir,
            index: ShardIndex::new(),
            bytes_written: 0,
            header_written: false,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Bytes emitted to the sink so far (header + data).
    pub fn current_offset(&self) -> u64 {
        self.bytes_written
    }

    fn write_header(&mut self) -> ShardResult<()> {
        if self.header_written {
            return Ok(());
        }
        self.sink.write_all(&encode_header())?;
        self.bytes_written = HEADER_SIZE as u64;
        self.header_written = true;
        Ok(())
    }

    /// Append a file payload and return its index entry.
    ///
    /// Payloads over the BigFile threshold are spilled to a content-
    /// addressed side file and leave no bytes in the DATA section.
    pub fn add_file(
        &mut self,
        uid: &str,
        data: &[u8],
        properties: Option<JsonMap<String, JsonValue>>,
    ) -> ShardResult<ShardEntry> {
        if self.index.contains(uid) {
            return Err(ShardError::DuplicateUid(uid.to_string()));
        }
        self.write_header()?;

        let props = properties.unwrap_or_default();
        let entry = if data.len() as u64 > self.config.big_file_threshold_bytes {
            self.write_bigfile(uid, data, props)?
        } else {
            self.write_inline(uid, data, props)?
        };

        self.index.insert(entry.clone())?;
        Ok(entry)
    }

    fn write_inline(
        &mut self,
        uid: &str,
        data: &[u8],
        properties: JsonMap<String, JsonValue>,
    ) -> ShardResult<ShardEntry> {
        let codec = if self.compression.should_compress(uid) {
            self.compression.codec
        } else {
            CompressionCodec::None
        };
        let payload = compress_payload(codec, self.compression.level, data)?;

        let offset = self.bytes_written;
        self.sink.write_all(&payload)?;
        self.bytes_written += payload.len() as u64;

        Ok(ShardEntry::inline(
            uid.to_string(),
            offset,
            payload.len() as u64,
            codec,
            payload.len() as u64,
            data.len() as u64,
            properties,
        ))
    }

    fn write_bigfile(
        &mut self,
        uid: &str,
        data: &[u8],
        properties: JsonMap<String, JsonValue>,
    ) -> ShardResult<ShardEntry> {
        let dir = self.bigfiles_dir.clone().ok_or_else(|| {
            ShardError::InvalidState(
                "bigfiles dir must be provided when writing to a pathless sink".to_string(),
            )
        })?;
        fs::create_dir_all(&dir)?;

        let hash = hex::encode(Sha256::digest(data));
        let target = dir.join(&hash);
        // Content-addressed: an existing file with this hash already holds
        // these exact bytes, so rewriting is skipped.
        if !target.exists() {
            fs::write(&target, data)?;
        }

        Ok(ShardEntry::bigfile(uid.to_string(), hash, data.len() as u64, properties))
    }

    /// Write the index and footer, flush, and return the sink.
    ///
    /// Consuming `self` makes appending after finalization a compile-time
    /// error rather than a runtime one.
    pub fn finish(mut self) -> ShardResult<W> {
        self.write_header()?;
        let index_bytes = encode_index(&self.index)?;
        self.sink.write_all(&index_bytes)?;
        self.sink.write_all(&encode_footer(index_bytes.len() as u64))?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_threshold() -> ContainerConfig {
        ContainerConfig {
            big_file_threshold_bytes: 8,
            ..ContainerConfig::default()
        }
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let mut writer =
            ShardWriter::new(Vec::new(), CompressionConfig::none(), ContainerConfig::default(), None);
        writer.add_file("u", b"one", None).unwrap();
        let err = writer.add_file("u", b"two", None).unwrap_err();
        assert!(matches!(err, ShardError::DuplicateUid(_)));
    }

    #[test]
    fn first_inline_entry_starts_after_header() {
        let mut writer =
            ShardWriter::new(Vec::new(), CompressionConfig::none(), ContainerConfig::default(), None);
        let entry = writer.add_file("u", b"abc", None).unwrap();
        assert_eq!(entry.offset, Some(HEADER_SIZE as u64));
        assert_eq!(entry.length, Some(3));
        assert_eq!(entry.uncompressed_size, Some(3));
    }

    #[test]
    fn bigfile_requires_a_directory() {
        let mut writer =
            ShardWriter::new(Vec::new(), CompressionConfig::none(), small_threshold(), None);
        let err = writer.add_file("u", &[0u8; 64], None).unwrap_err();
        assert!(matches!(err, ShardError::InvalidState(_)));
    }

    #[test]
    fn bigfile_dedups_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(
            Vec::new(),
            CompressionConfig::none(),
            small_threshold(),
            Some(dir.path().to_path_buf()),
        );
        let a = writer.add_file("uidA", &[b'X'; 64], None).unwrap();
        let b = writer.add_file("uidB", &[b'X'; 64], None).unwrap();
        assert_eq!(a.bigfile_hash, b.bigfile_hash);
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn empty_shard_is_still_framed() {
        let writer =
            ShardWriter::new(Vec::new(), CompressionConfig::none(), ContainerConfig::default(), None);
        let bytes = writer.finish().unwrap();
        // header + u32 count + footer
        assert_eq!(bytes.len(), HEADER_SIZE + 4 + 12);
    }
}
