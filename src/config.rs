//! Tunables for the sender and the bundled router.
//!
//! Both structs deserialize with per-field defaults, and both can be read
//! from `BYTESERVE_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

/// Bytes per second allowed for one transfer.
pub const DEFAULT_RATE_LIMIT: u64 = 5_000_000;
/// Chunk size for reads and writes.
pub const DEFAULT_BUFFER_SIZE: usize = 20_480;
/// Seven days.
pub const DEFAULT_EXPIRY_SECS: u64 = 604_800;
/// One hundred years. Longer windows are cut down to this.
pub const MAX_EXPIRY_SECS: u64 = 3_153_600_000;

pub const DEFAULT_ROOT: &str = "/tmp/";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Throughput ceiling per transfer, in bytes per second.
    pub rate_limit: u64,
    /// Read/write chunk size in bytes.
    pub buffer_size: usize,
    /// How far in the future `Expires` is set, in seconds.
    pub expiry_secs: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            rate_limit: DEFAULT_RATE_LIMIT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            expiry_secs: DEFAULT_EXPIRY_SECS,
        }
    }
}

impl SenderConfig {
    /// Reads `BYTESERVE_RATE_LIMIT`, `BYTESERVE_BUFFER_SIZE` and `BYTESERVE_EXPIRY_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = SenderConfig::default();
        SenderConfig {
            rate_limit: positive(&lookup, "BYTESERVE_RATE_LIMIT", defaults.rate_limit),
            buffer_size: positive(&lookup, "BYTESERVE_BUFFER_SIZE", defaults.buffer_size),
            expiry_secs: capped(parsed(&lookup, "BYTESERVE_EXPIRY_SECS", defaults.expiry_secs)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Directory files are served from.
    pub root: PathBuf,
    /// Socket address the demo server binds to.
    pub listen: String,
    pub sender: SenderConfig,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            root: PathBuf::from(DEFAULT_ROOT),
            listen: DEFAULT_LISTEN.to_string(),
            sender: SenderConfig::default(),
        }
    }
}

impl ServeConfig {
    /// [`SenderConfig::from_env`] plus `BYTESERVE_ROOT` and `BYTESERVE_LISTEN`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ServeConfig::default();
        ServeConfig {
            root: lookup("BYTESERVE_ROOT").map(PathBuf::from).unwrap_or(defaults.root),
            listen: lookup("BYTESERVE_LISTEN").unwrap_or(defaults.listen),
            sender: SenderConfig::from_lookup(lookup),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(%key, %raw, "ignoring unparseable setting");
            default
        }),
    }
}

fn capped(expiry_secs: u64) -> u64 {
    if expiry_secs > MAX_EXPIRY_SECS {
        warn!(expiry_secs, max = MAX_EXPIRY_SECS, "expiry window too long, capping");
        return MAX_EXPIRY_SECS;
    }
    expiry_secs
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + PartialEq + Default + Copy,
{
    let value = parsed(lookup, key, default);
    if value == T::default() {
        warn!(%key, "zero is not allowed, using default");
        return default;
    }
    value
}
