//! Codec configuration and the per-operation context.
//!
//! All tunables live in a plain [`Config`] value; the save/load entry points
//! take a [`SnapshotContext`] that bundles the config with the few ambient
//! facts the codec needs (replica role, wall clock). There is no process-wide
//! state: two contexts can coexist in one process with different settings.

use std::time::{SystemTime, UNIX_EPOCH};

/// Tunables for the snapshot codec.
///
/// The `*_max_packed_*` thresholds drive the load-time choice between the
/// packed and expanded in-memory forms of each collection kind; they are
/// consulted by the loader, never by the writer (the writer serializes
/// whatever encoding the value already has).
#[derive(Debug, Clone)]
pub struct Config {
    /// Try LZF on strings longer than 20 bytes.
    pub compression: bool,
    /// Maintain and verify the trailing CRC-64. When off, the writer emits
    /// eight zero bytes and the loader skips verification.
    pub checksum: bool,
    pub list_max_packed_entries: usize,
    pub list_max_packed_value: usize,
    pub set_max_packed_entries: usize,
    pub zset_max_packed_entries: usize,
    pub zset_max_packed_value: usize,
    pub hash_max_packed_entries: usize,
    pub hash_max_packed_value: usize,
    /// Number of logical databases the host is configured with; a dump
    /// selecting a database at or beyond this index does not load.
    pub database_count: u32,
    /// Bytes of dump input between progress callbacks during load.
    /// 0 disables the callback entirely.
    pub load_progress_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compression: true,
            checksum: true,
            list_max_packed_entries: 128,
            list_max_packed_value: 64,
            set_max_packed_entries: 512,
            zset_max_packed_entries: 128,
            zset_max_packed_value: 64,
            hash_max_packed_entries: 128,
            hash_max_packed_value: 64,
            database_count: 16,
            load_progress_interval: 2 * 1024 * 1024,
        }
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn system_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Everything a save or load operation needs from its surroundings.
///
/// Passed explicitly to the stream writer, reader, and both child
/// orchestrators. The clock is a plain function pointer so tests can pin
/// "now" when exercising expiry behavior.
#[derive(Debug, Clone)]
pub struct SnapshotContext {
    pub config: Config,
    /// Replica hosts keep already-expired pairs at load time so the
    /// upstream's authoritative view survives the transfer; a primary
    /// drops them.
    pub is_replica: bool,
    pub clock_ms: fn() -> i64,
}

impl Default for SnapshotContext {
    fn default() -> Self {
        SnapshotContext {
            config: Config::default(),
            is_replica: false,
            clock_ms: system_clock_ms,
        }
    }
}

impl SnapshotContext {
    pub fn new(config: Config) -> Self {
        SnapshotContext {
            config,
            ..Default::default()
        }
    }

    /// Current time according to the context's clock.
    #[inline]
    pub fn now_ms(&self) -> i64 {
        (self.clock_ms)()
    }
}
