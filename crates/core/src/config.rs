//! Environment-driven configuration helpers.

use std::str::FromStr;

/// Parse an environment variable, `None` when unset or unparsable.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Parse an environment variable or fall back to `default`.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env_parse(key).unwrap_or(default)
}
