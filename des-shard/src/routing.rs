//! Deterministic routing from `(uid, created_at)` to shard coordinates.
//!
//! No database or external state is consulted; two processes computing a
//! location for the same inputs always agree.

use chrono::{DateTime, Utc};
use des_common::time::format_date_dir;

use crate::error::{ShardError, ShardResult};

pub const MIN_SHARD_BITS: u8 = 4;
pub const MAX_SHARD_BITS: u8 = 16;

/// Resolved shard coordinates for a single UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardLocation {
    pub uid: String,
    pub date_dir: String,
    pub shard_index: u32,
    pub shard_hex: String,
    pub object_key: String,
}

fn validate_n_bits(n_bits: u8) -> ShardResult<u8> {
    if !(MIN_SHARD_BITS..=MAX_SHARD_BITS).contains(&n_bits) {
        return Err(ShardError::InvalidArgument(format!(
            "n_bits must be between {MIN_SHARD_BITS} and {MAX_SHARD_BITS}, got {n_bits}"
        )));
    }
    Ok(n_bits)
}

/// Return a UID in its canonical string form without altering its value.
pub fn normalize_uid(uid: impl ToString) -> String {
    uid.to_string()
}

/// Compute the shard index for a UID within a `2^n_bits` space.
///
/// All-digit UIDs shard by decimal value modulo the space; any other
/// string uses CRC32 over its UTF-8 bytes masked to `n_bits`.
pub fn compute_shard_index(uid: &str, n_bits: u8) -> ShardResult<u32> {
    let bits = validate_n_bits(n_bits)?;
    let space = 1u32 << bits;

    if !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()) {
        // Fold digits mod the space so arbitrarily long decimal UIDs
        // shard exactly as their integer value would.
        let index = uid
            .bytes()
            .fold(0u32, |acc, b| (acc * 10 + u32::from(b - b'0')) % space);
        return Ok(index);
    }

    Ok(crc32fast::hash(uid.as_bytes()) & (space - 1))
}

/// Convert a shard index to zero-padded uppercase hex.
pub fn shard_index_to_hex(shard_index: u32, n_bits: u8) -> ShardResult<String> {
    let bits = validate_n_bits(n_bits)?;
    let max_value = (1u32 << bits) - 1;
    if shard_index > max_value {
        return Err(ShardError::InvalidArgument(format!(
            "shard_index {shard_index} outside range 0..{max_value}"
        )));
    }
    let width = usize::from(bits / 4).max(1);
    Ok(format!("{shard_index:0width$X}"))
}

/// Build the canonical shard object key as `YYYYMMDD/HEX.des`.
pub fn build_object_key(date_dir: &str, shard_hex: &str) -> String {
    format!("{date_dir}/{shard_hex}.des")
}

/// Resolve the full shard location for a UID and creation timestamp.
pub fn locate_shard(uid: &str, created_at: &DateTime<Utc>, n_bits: u8) -> ShardResult<ShardLocation> {
    let date_dir = format_date_dir(created_at);
    let shard_index = compute_shard_index(uid, n_bits)?;
    let shard_hex = shard_index_to_hex(shard_index, n_bits)?;
    let object_key = build_object_key(&date_dir, &shard_hex);
    Ok(ShardLocation {
        uid: uid.to_string(),
        date_dir,
        shard_index,
        shard_hex,
        object_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn numeric_uid_shards_by_modulo() {
        assert_eq!(compute_shard_index("12345", 8).unwrap(), 57);
    }

    #[test]
    fn string_uid_shards_by_crc32() {
        assert_eq!(compute_shard_index("abc123", 8).unwrap(), 92);
    }

    #[test]
    fn long_numeric_uid_matches_integer_modulo() {
        // 10^30 mod 2^8: 10^30 = 2^30 * 5^30, divisible by 256.
        assert_eq!(compute_shard_index("1000000000000000000000000000000", 8).unwrap(), 0);
        assert_eq!(compute_shard_index("1000000000000000000000000000057", 8).unwrap(), 57);
    }

    #[test]
    fn rejects_out_of_range_bits() {
        assert!(compute_shard_index("1", 3).is_err());
        assert!(compute_shard_index("1", 17).is_err());
        assert!(compute_shard_index("1", 4).is_ok());
        assert!(compute_shard_index("1", 16).is_ok());
    }

    #[test]
    fn hex_is_zero_padded_per_bits() {
        assert_eq!(shard_index_to_hex(0x5, 8).unwrap(), "05");
        assert_eq!(shard_index_to_hex(0x5, 4).unwrap(), "5");
        assert_eq!(shard_index_to_hex(0x5, 16).unwrap(), "0005");
        assert_eq!(shard_index_to_hex(255, 8).unwrap(), "FF");
    }

    #[test]
    fn hex_rejects_index_outside_space() {
        assert!(shard_index_to_hex(256, 8).is_err());
    }

    #[test]
    fn locate_is_deterministic() {
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = locate_shard("12345", &created_at, 8).unwrap();
        let b = locate_shard("12345", &created_at, 8).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.date_dir, "20240101");
        assert_eq!(a.shard_index, 57);
        assert_eq!(a.shard_hex, "39");
        assert_eq!(a.object_key, "20240101/39.des");
    }

    #[test]
    fn normalize_uid_accepts_integers_and_strings() {
        assert_eq!(normalize_uid(612u64), "612");
        assert_eq!(normalize_uid("abc123"), "abc123");
    }
}
