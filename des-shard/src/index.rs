//! Index section: per-UID records describing inline or BigFile payloads.
//!
//! Layout (little-endian), after a u32 entry count:
//!
//! v1 records: u16 name_len + name + u64 offset + u64 length + u8 codec +
//! u64 compressed_size + u64 uncompressed_size.
//!
//! v2 records: u16 name_len + name + u8 flags, then either a BigFile body
//! (u16 hash_len + hash + u64 bigfile_size + u32 meta_len + meta) or an
//! inline body (u64 offset + u64 length + u8 codec + u64 compressed_size +
//! u64 uncompressed_size + u32 meta_len + meta). `meta` is UTF-8 JSON and
//! may be empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::compression::CompressionCodec;
use crate::error::{ShardError, ShardResult};
use crate::format::{LEGACY_VERSION, VERSION};

pub const BIGFILE_FLAG: u8 = 0x01;
const MAX_UID_BYTES: usize = 0xFFFF;

/// A single file record inside a shard index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub uid: String,
    pub offset: Option<u64>,
    pub length: Option<u64>,
    pub codec: Option<CompressionCodec>,
    pub compressed_size: Option<u64>,
    pub uncompressed_size: Option<u64>,
    #[serde(default)]
    pub is_bigfile: bool,
    pub bigfile_hash: Option<String>,
    pub bigfile_size: Option<u64>,
    #[serde(rename = "meta", default)]
    pub properties: JsonMap<String, JsonValue>,
}

impl ShardEntry {
    pub fn inline(
        uid: String,
        offset: u64,
        length: u64,
        codec: CompressionCodec,
        compressed_size: u64,
        uncompressed_size: u64,
        properties: JsonMap<String, JsonValue>,
    ) -> Self {
        ShardEntry {
            uid,
            offset: Some(offset),
            length: Some(length),
            codec: Some(codec),
            compressed_size: Some(compressed_size),
            uncompressed_size: Some(uncompressed_size),
            is_bigfile: false,
            bigfile_hash: None,
            bigfile_size: None,
            properties,
        }
    }

    pub fn bigfile(
        uid: String,
        hash: String,
        size: u64,
        properties: JsonMap<String, JsonValue>,
    ) -> Self {
        ShardEntry {
            uid,
            offset: None,
            length: None,
            codec: None,
            compressed_size: None,
            uncompressed_size: Some(size),
            is_bigfile: true,
            bigfile_hash: Some(hash),
            bigfile_size: Some(size),
            properties,
        }
    }
}

/// In-memory index preserving insertion order with O(1) UID lookup.
#[derive(Debug, Clone, Default)]
pub struct ShardIndex {
    entries: Vec<ShardEntry>,
    positions: HashMap<String, usize>,
}

impl ShardIndex {
    pub fn new() -> Self {
        ShardIndex::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.positions.contains_key(uid)
    }

    pub fn get(&self, uid: &str) -> Option<&ShardEntry> {
        self.positions.get(uid).map(|idx| &self.entries[*idx])
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.uid.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ShardEntry> {
        self.entries.iter()
    }

    /// Insert an entry, rejecting duplicate UIDs.
    pub fn insert(&mut self, entry: ShardEntry) -> ShardResult<()> {
        if self.positions.contains_key(&entry.uid) {
            return Err(ShardError::DuplicateUid(entry.uid.clone()));
        }
        self.positions.insert(entry.uid.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }
}

struct IndexCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> IndexCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        IndexCursor { data, pos: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> ShardResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| ShardError::CorruptShard(format!("truncated index while reading {what}")))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self, what: &str) -> ShardResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn read_u16(&mut self, what: &str) -> ShardResult<u16> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self, what: &str) -> ShardResult<u32> {
        let bytes = self.take(4, what)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self, what: &str) -> ShardResult<u64> {
        let bytes = self.take(8, what)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_string(&mut self, len: usize, what: &str) -> ShardResult<String> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ShardError::CorruptShard(format!("{what} is not valid UTF-8")))
    }
}

fn parse_properties(cursor: &mut IndexCursor<'_>) -> ShardResult<JsonMap<String, JsonValue>> {
    let meta_len = cursor.read_u32("meta length")? as usize;
    if meta_len == 0 {
        return Ok(JsonMap::new());
    }
    let raw = cursor.take(meta_len, "entry metadata")?;
    match serde_json::from_slice::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(ShardError::CorruptShard("entry metadata must be a JSON object".to_string())),
        Err(e) => Err(ShardError::CorruptShard(format!("invalid entry metadata: {e}"))),
    }
}

fn encode_properties(properties: &JsonMap<String, JsonValue>) -> ShardResult<Vec<u8>> {
    if properties.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::to_vec(properties)
        .map_err(|e| ShardError::CorruptMetadata(format!("unencodable entry metadata: {e}")))
}

fn parse_inline_body(
    cursor: &mut IndexCursor<'_>,
    uid: String,
    data_section_end: u64,
    with_meta: bool,
) -> ShardResult<ShardEntry> {
    let offset = cursor.read_u64("entry offset")?;
    let length = cursor.read_u64("entry length")?;
    let codec = CompressionCodec::from_byte(cursor.read_u8("entry codec")?)?;
    let compressed_size = cursor.read_u64("compressed size")?;
    let uncompressed_size = cursor.read_u64("uncompressed size")?;
    let properties = if with_meta { parse_properties(cursor)? } else { JsonMap::new() };

    let end = offset
        .checked_add(length)
        .ok_or_else(|| ShardError::CorruptShard("entry extent overflows".to_string()))?;
    if end > data_section_end {
        return Err(ShardError::CorruptShard(format!(
            "indexed file for {uid:?} extends beyond data section"
        )));
    }

    Ok(ShardEntry::inline(uid, offset, length, codec, compressed_size, uncompressed_size, properties))
}

fn parse_bigfile_body(cursor: &mut IndexCursor<'_>, uid: String) -> ShardResult<ShardEntry> {
    let hash_len = cursor.read_u16("hash length")? as usize;
    let hash = cursor.read_string(hash_len, "bigfile hash")?;
    let size = cursor.read_u64("bigfile size")?;
    let properties = parse_properties(cursor)?;
    Ok(ShardEntry::bigfile(uid, hash, size, properties))
}

/// Parse a complete index section.
///
/// `data_section_end` is the absolute offset where DATA ends (= the index
/// offset); inline extents are validated against it. `version` selects the
/// record layout.
pub fn parse_index(data: &[u8], data_section_end: u64, version: u8) -> ShardResult<ShardIndex> {
    let mut cursor = IndexCursor::new(data);
    let entry_count = cursor.read_u32("entry count")?;
    let mut index = ShardIndex::new();

    for _ in 0..entry_count {
        let name_len = cursor.read_u16("name length")? as usize;
        let uid = cursor.read_string(name_len, "UID")?;

        let entry = match version {
            LEGACY_VERSION => parse_inline_body(&mut cursor, uid, data_section_end, false)?,
            VERSION => {
                let flags = cursor.read_u8("entry flags")?;
                if flags & BIGFILE_FLAG != 0 {
                    parse_bigfile_body(&mut cursor, uid)?
                } else {
                    parse_inline_body(&mut cursor, uid, data_section_end, true)?
                }
            }
            other => {
                return Err(ShardError::CorruptShard(format!("unsupported shard version {other}")))
            }
        };
        index
            .insert(entry)
            .map_err(|e| ShardError::CorruptShard(format!("index contains duplicate entry: {e}")))?;
    }

    Ok(index)
}

/// Encode entries as a v2 index section, insertion order preserved.
pub fn encode_index(index: &ShardIndex) -> ShardResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(index.len() as u32).to_le_bytes());

    for entry in index.entries() {
        let name_bytes = entry.uid.as_bytes();
        if name_bytes.len() > MAX_UID_BYTES {
            return Err(ShardError::InvalidArgument(format!(
                "UID too long to encode: {} bytes",
                name_bytes.len()
            )));
        }
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);

        let meta_bytes = encode_properties(&entry.properties)?;
        if entry.is_bigfile {
            let hash = entry.bigfile_hash.as_deref().unwrap_or_default();
            buf.push(BIGFILE_FLAG);
            buf.extend_from_slice(&(hash.len() as u16).to_le_bytes());
            buf.extend_from_slice(hash.as_bytes());
            buf.extend_from_slice(&entry.bigfile_size.unwrap_or(0).to_le_bytes());
        } else {
            let (offset, length, codec) = match (entry.offset, entry.length, entry.codec) {
                (Some(o), Some(l), Some(c)) => (o, l, c),
                _ => {
                    return Err(ShardError::InvalidState(format!(
                        "inline entry missing required fields for UID {:?}",
                        entry.uid
                    )))
                }
            };
            buf.push(0);
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&length.to_le_bytes());
            buf.push(codec.as_byte());
            buf.extend_from_slice(&entry.compressed_size.unwrap_or(0).to_le_bytes());
            buf.extend_from_slice(&entry.uncompressed_size.unwrap_or(0).to_le_bytes());
        }
        buf.extend_from_slice(&(meta_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&meta_bytes);
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, JsonValue)]) -> JsonMap<String, JsonValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn v2_round_trip_inline_and_bigfile() {
        let mut index = ShardIndex::new();
        index
            .insert(ShardEntry::inline(
                "100".into(),
                8,
                5,
                CompressionCodec::Zstd,
                5,
                20,
                props(&[("created_at", json!("2024-01-01T00:00:00Z"))]),
            ))
            .unwrap();
        index
            .insert(ShardEntry::bigfile("big".into(), "ab12".into(), 4096, JsonMap::new()))
            .unwrap();

        let encoded = encode_index(&index).unwrap();
        let parsed = parse_index(&encoded, 100, VERSION).unwrap();

        assert_eq!(parsed.len(), 2);
        let inline = parsed.get("100").unwrap();
        assert_eq!(inline.offset, Some(8));
        assert_eq!(inline.codec, Some(CompressionCodec::Zstd));
        assert_eq!(inline.properties["created_at"], json!("2024-01-01T00:00:00Z"));
        let big = parsed.get("big").unwrap();
        assert!(big.is_bigfile);
        assert_eq!(big.bigfile_hash.as_deref(), Some("ab12"));
        assert_eq!(big.bigfile_size, Some(4096));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut index = ShardIndex::new();
        for uid in ["c", "a", "b"] {
            index
                .insert(ShardEntry::inline(uid.into(), 8, 0, CompressionCodec::None, 0, 0, JsonMap::new()))
                .unwrap();
        }
        let encoded = encode_index(&index).unwrap();
        let parsed = parse_index(&encoded, 100, VERSION).unwrap();
        assert_eq!(parsed.uids().collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }

    #[test]
    fn duplicate_uid_rejected_on_insert() {
        let mut index = ShardIndex::new();
        let entry = ShardEntry::inline("u".into(), 8, 1, CompressionCodec::None, 1, 1, JsonMap::new());
        index.insert(entry.clone()).unwrap();
        assert!(matches!(index.insert(entry), Err(ShardError::DuplicateUid(_))));
    }

    #[test]
    fn entry_beyond_data_section_is_corrupt() {
        let mut index = ShardIndex::new();
        index
            .insert(ShardEntry::inline("u".into(), 90, 20, CompressionCodec::None, 20, 20, JsonMap::new()))
            .unwrap();
        let encoded = encode_index(&index).unwrap();
        assert!(matches!(parse_index(&encoded, 100, VERSION), Err(ShardError::CorruptShard(_))));
    }

    #[test]
    fn truncated_index_is_corrupt() {
        let mut index = ShardIndex::new();
        index
            .insert(ShardEntry::inline("uid".into(), 8, 4, CompressionCodec::None, 4, 4, JsonMap::new()))
            .unwrap();
        let encoded = encode_index(&index).unwrap();
        for cut in [3, 7, encoded.len() - 1] {
            assert!(parse_index(&encoded[..cut], 100, VERSION).is_err());
        }
    }

    #[test]
    fn legacy_entries_have_no_flags_or_meta() {
        // Hand-build a v1 record: count + name_len + name + offsets + codec + sizes.
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&3u16.to_le_bytes());
        raw.extend_from_slice(b"old");
        raw.extend_from_slice(&8u64.to_le_bytes());
        raw.extend_from_slice(&16u64.to_le_bytes());
        raw.push(0);
        raw.extend_from_slice(&16u64.to_le_bytes());
        raw.extend_from_slice(&16u64.to_le_bytes());

        let parsed = parse_index(&raw, 100, LEGACY_VERSION).unwrap();
        let entry = parsed.get("old").unwrap();
        assert!(!entry.is_bigfile);
        assert_eq!(entry.offset, Some(8));
        assert!(entry.properties.is_empty());
    }

    #[test]
    fn unknown_codec_byte_is_corrupt() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&1u16.to_le_bytes());
        raw.extend_from_slice(b"u");
        raw.push(0); // flags: inline
        raw.extend_from_slice(&8u64.to_le_bytes());
        raw.extend_from_slice(&1u64.to_le_bytes());
        raw.push(9); // bogus codec
        raw.extend_from_slice(&1u64.to_le_bytes());
        raw.extend_from_slice(&1u64.to_le_bytes());
        raw.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(parse_index(&raw, 100, VERSION), Err(ShardError::CorruptShard(_))));
    }
}
