//! Environment lookups backing the `DES_*` configuration surface.
//!
//! Unset, empty, and unparseable values all read as `None`; callers
//! supply their own defaults (or fail fast) per key.

use std::env;
use std::str::FromStr;

/// Read an environment variable, treating the empty string as unset.
pub fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Read and parse an environment variable into any `FromStr` type.
pub fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    env_str(name)?.parse().ok()
}

pub fn env_int(name: &str) -> Option<usize> {
    env_parsed(name)
}

pub fn env_u64(name: &str) -> Option<u64> {
    env_parsed(name)
}

/// Read a boolean flag; accepts `true`/`false`, `1`/`0`, `yes`/`no` in
/// any case.
pub fn env_bool(name: &str) -> Option<bool> {
    match env_str(name)?.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a unique variable name; the process environment is
    // shared across the test binary.

    #[test]
    fn empty_value_reads_as_unset() {
        env::set_var("DES_TEST_EMPTY", "");
        assert_eq!(env_str("DES_TEST_EMPTY"), None);
        env::set_var("DES_TEST_EMPTY", "value");
        assert_eq!(env_str("DES_TEST_EMPTY").as_deref(), Some("value"));
    }

    #[test]
    fn parsed_values_and_garbage() {
        env::set_var("DES_TEST_INT", "42");
        assert_eq!(env_int("DES_TEST_INT"), Some(42));
        assert_eq!(env_u64("DES_TEST_INT"), Some(42));
        env::set_var("DES_TEST_INT", "not-a-number");
        assert_eq!(env_int("DES_TEST_INT"), None);
    }

    #[test]
    fn bool_flags_accept_common_spellings() {
        for (raw, expected) in [
            ("true", Some(true)),
            ("TRUE", Some(true)),
            ("1", Some(true)),
            ("yes", Some(true)),
            ("false", Some(false)),
            ("0", Some(false)),
            ("no", Some(false)),
            ("maybe", None),
        ] {
            env::set_var("DES_TEST_BOOL", raw);
            assert_eq!(env_bool("DES_TEST_BOOL"), expected, "raw={raw}");
        }
    }

    #[test]
    fn missing_variable_is_none() {
        assert_eq!(env_str("DES_TEST_NEVER_SET"), None);
        assert_eq!(env_bool("DES_TEST_NEVER_SET"), None);
    }
}
