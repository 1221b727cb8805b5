//! Environment variable helpers for configuration overrides.
//!
//! ```ignore
//! use kcrypto_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let depth: usize = env_get("KCRYPTO_RETURN_QUEUE_MAX", 256);
//! let allow_soft = env_get_bool("KCRYPTO_ALLOW_SOFT", true);
//! let interval = env_get_ms("KCRYPTO_DISPATCH_INTERVAL_MS", 10);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Boolean switch. "1", "true", "yes", "on" (any case) are true; "0",
/// "false", "no", "off" are false; anything else is the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Millisecond duration.
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}
