//! Shard reader over any `Read + Seek` source.
//!
//! A shard is parseable from its own bytes alone: the header sits at
//! offset 0 and the footer locates the index, so no catalog is needed.

use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::bigfiles::resolve_bigfiles_dir;
use crate::compression::decompress_payload;
use crate::config::ContainerConfig;
use crate::error::{ShardError, ShardResult};
use crate::format::{parse_footer, parse_header, FOOTER_SIZE, HEADER_SIZE, HeaderInfo};
use crate::index::{parse_index, ShardEntry, ShardIndex};

#[derive(Debug)]
pub struct ShardReader<R: Read + Seek> {
    source: R,
    config: ContainerConfig,
    base_dir: Option<PathBuf>,
    pub header: HeaderInfo,
    pub index: ShardIndex,
}

impl ShardReader<File> {
    /// Open a shard file; BigFiles resolve relative to its directory.
    pub fn from_path(path: &Path, config: ContainerConfig) -> ShardResult<Self> {
        let base_dir = path.parent().map(|p| p.to_path_buf());
        let file = File::open(path)?;
        ShardReader::new(file, config, base_dir)
    }
}

impl ShardReader<Cursor<Vec<u8>>> {
    /// Read a shard held fully in memory.
    pub fn from_bytes(data: Vec<u8>, config: ContainerConfig, base_dir: Option<PathBuf>) -> ShardResult<Self> {
        ShardReader::new(Cursor::new(data), config, base_dir)
    }
}

impl<R: Read + Seek> ShardReader<R> {
    pub fn new(mut source: R, config: ContainerConfig, base_dir: Option<PathBuf>) -> ShardResult<Self> {
        let header = Self::read_header(&mut source)?;
        let index = Self::read_index(&mut source, header.version)?;
        Ok(ShardReader { source, config, base_dir, header, index })
    }

    fn read_header(source: &mut R) -> ShardResult<HeaderInfo> {
        source.seek(SeekFrom::Start(0))?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        source
            .read_exact(&mut header_bytes)
            .map_err(|_| ShardError::CorruptShard("file too small to be a valid shard".to_string()))?;
        parse_header(&header_bytes)
    }

    fn read_index(source: &mut R, version: u8) -> ShardResult<ShardIndex> {
        let file_size = source.seek(SeekFrom::End(0))?;
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(ShardError::CorruptShard("file too small to be a valid shard".to_string()));
        }

        source.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
        let mut footer_bytes = [0u8; FOOTER_SIZE];
        source.read_exact(&mut footer_bytes)?;
        let footer = parse_footer(&footer_bytes, file_size)?;

        source.seek(SeekFrom::Start(footer.index_offset))?;
        let mut index_bytes = vec![0u8; footer.index_size as usize];
        source
            .read_exact(&mut index_bytes)
            .map_err(|_| ShardError::CorruptShard("failed to read full index section".to_string()))?;

        parse_index(&index_bytes, footer.index_offset, version)
    }

    pub fn has_uid(&self, uid: &str) -> bool {
        self.index.contains(uid)
    }

    pub fn list_uids(&self) -> Vec<String> {
        self.index.uids().map(|u| u.to_string()).collect()
    }

    /// Read and decompress the payload for `uid`.
    pub fn read_file(&mut self, uid: &str) -> ShardResult<Vec<u8>> {
        let entry = self
            .index
            .get(uid)
            .cloned()
            .ok_or_else(|| ShardError::UidNotFound(uid.to_string()))?;

        if entry.is_bigfile {
            return self.read_bigfile(&entry);
        }

        let (offset, length) = match (entry.offset, entry.length) {
            (Some(o), Some(l)) => (o, l),
            _ => {
                return Err(ShardError::CorruptShard(format!(
                    "inline entry missing offsets for UID {uid:?}"
                )))
            }
        };

        self.source.seek(SeekFrom::Start(offset))?;
        let mut payload = vec![0u8; length as usize];
        self.source
            .read_exact(&mut payload)
            .map_err(|_| ShardError::CorruptShard(format!("unexpected end of file reading UID {uid:?}")))?;

        let codec = entry
            .codec
            .ok_or_else(|| ShardError::CorruptShard(format!("inline entry missing codec for UID {uid:?}")))?;
        decompress_payload(codec, &payload, entry.uncompressed_size)
    }

    fn read_bigfile(&self, entry: &ShardEntry) -> ShardResult<Vec<u8>> {
        let hash = entry
            .bigfile_hash
            .as_deref()
            .ok_or_else(|| ShardError::CorruptShard("bigfile entry missing hash".to_string()))?;
        let base_dir = self
            .base_dir
            .as_deref()
            .ok_or_else(|| ShardError::InvalidState("bigfile root unknown for this shard reader".to_string()))?;
        let path = resolve_bigfiles_dir(base_dir, &self.config.bigfiles_prefix).join(hash);
        let data = fs::read(&path)?;
        if let Some(expected) = entry.bigfile_size {
            if data.len() as u64 != expected {
                return Err(ShardError::CorruptShard(format!(
                    "bigfile size mismatch for UID {:?}",
                    entry.uid
                )));
            }
        }
        Ok(data)
    }
}
