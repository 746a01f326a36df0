use std::path::{Path, PathBuf};

/// Build the object key for a BigFile stored next to `shard_key`.
///
/// The key is `dirname(shard_key)/{prefix}/{hash}`, collapsing empty
/// components when the shard key has no directory part.
pub fn build_bigfile_key(shard_key: &str, bigfiles_prefix: &str, bigfile_hash: &str) -> String {
    let prefix_clean = bigfiles_prefix.trim_matches('/');
    let parent = match shard_key.rfind('/') {
        Some(idx) => &shard_key[..idx],
        None => "",
    };
    [parent, prefix_clean, bigfile_hash]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory under `base_path` where BigFiles for local shards live.
pub fn resolve_bigfiles_dir(base_path: &Path, bigfiles_prefix: &str) -> PathBuf {
    base_path.join(bigfiles_prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sits_next_to_shard() {
        assert_eq!(
            build_bigfile_key("archive/20240101_39_0000.des", "_bigFiles", "abc"),
            "archive/_bigFiles/abc"
        );
    }

    #[test]
    fn key_without_directory_part() {
        assert_eq!(build_bigfile_key("20240101_39_0000.des", "_bigFiles", "abc"), "_bigFiles/abc");
    }

    #[test]
    fn prefix_slashes_are_trimmed() {
        assert_eq!(
            build_bigfile_key("a/b.des", "/_bigFiles/", "abc"),
            "a/_bigFiles/abc"
        );
    }
}
