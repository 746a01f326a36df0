use des_common::env::{env_str, env_u64};

pub const DEFAULT_BIG_FILE_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_BIGFILES_PREFIX: &str = "_bigFiles";

/// Container-level knobs shared by writers and readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Payloads strictly larger than this spill into BigFile side objects.
    pub big_file_threshold_bytes: u64,
    /// Directory / key prefix under which BigFiles live next to a shard.
    pub bigfiles_prefix: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            big_file_threshold_bytes: DEFAULT_BIG_FILE_THRESHOLD_BYTES,
            bigfiles_prefix: DEFAULT_BIGFILES_PREFIX.to_string(),
        }
    }
}

impl ContainerConfig {
    /// Build the config, honoring `DES_BIG_FILE_THRESHOLD_BYTES` and
    /// `DES_BIGFILES_PREFIX` environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = ContainerConfig::default();
        if let Some(threshold) = env_u64("DES_BIG_FILE_THRESHOLD_BYTES") {
            if threshold > 0 {
                cfg.big_file_threshold_bytes = threshold;
            }
        }
        if let Some(prefix) = env_str("DES_BIGFILES_PREFIX") {
            if !prefix.is_empty() {
                cfg.bigfiles_prefix = prefix;
            }
        }
        cfg
    }
}
