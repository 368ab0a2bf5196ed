//! Dump stream reader.
//!
//! One pass over the byte stream: validate the magic and version, then
//! dispatch opcode by opcode until `EOF`, reconstructing values into the
//! keyspace as they appear. Expiry opcodes prefix the record they apply to;
//! the legacy seconds form is converted to milliseconds on sight. For dumps
//! of version 5 and later the trailing eight bytes are compared against the
//! running checksum (a zero trailer means the producer had checksums off).
//!
//! Loading can take a while, so the reader invokes a host callback every
//! `load_progress_interval` input bytes — the single point where a long load
//! cooperates with the outside world (clock refresh, keepalives, deferred
//! events). The callback must not re-enter the loader.
//!
//! Any short read is fatal: a partial keyspace is worse than none, and the
//! host is expected to treat the error as unrecoverable.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{error, info, warn};

use crate::channel::Source;
use crate::codec::{
    load_len, load_millisecond_time, load_raw_string, load_seconds_time, FIRST_CHECKSUM_VERSION,
    FORMAT_VERSION, MAGIC, MIN_FORMAT_VERSION, OPCODE_EOF, OPCODE_EXPIRETIME,
    OPCODE_EXPIRETIME_MS, OPCODE_SELECTDB,
};
use crate::config::SnapshotContext;
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::object::{is_value_type, load_value};

/// Host callback invoked between records as input bytes accumulate.
/// Arguments: bytes consumed so far, total bytes when known.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, Option<u64>);

/// What a completed load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    /// Format version of the dump.
    pub version: u32,
    /// Records inserted into the keyspace.
    pub keys_loaded: u64,
    /// Records dropped because their expiry had already passed.
    pub keys_expired: u64,
    /// Input bytes consumed.
    pub bytes: u64,
}

/// Load a dump from an arbitrary source into `keyspace`.
///
/// `total_bytes` is forwarded to the progress callback when the source size
/// is known up front (file loads pass the file length).
pub fn load_from_source<R: Read>(
    src: &mut Source<R>,
    ctx: &SnapshotContext,
    keyspace: &mut Keyspace,
    total_bytes: Option<u64>,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<LoadSummary> {
    let version = read_header(src)?;
    let now = ctx.now_ms();

    let mut current_db = 0u32;
    let mut keys_loaded = 0u64;
    let mut keys_expired = 0u64;
    let interval = ctx.config.load_progress_interval;
    let mut next_progress = interval;

    loop {
        // Progress fires between records, on interval boundaries.
        if interval > 0 && src.bytes_processed() >= next_progress {
            if let Some(cb) = progress.as_mut() {
                cb(src.bytes_processed(), total_bytes);
            }
            next_progress = (src.bytes_processed() / interval + 1) * interval;
        }

        let mut expiry_ms: Option<i64> = None;
        let mut type_byte = src.read_u8()?;

        if type_byte == OPCODE_EXPIRETIME {
            // Seconds-resolution expiry from very old producers.
            expiry_ms = Some(load_seconds_time(src)? * 1000);
            type_byte = src.read_u8()?;
        } else if type_byte == OPCODE_EXPIRETIME_MS {
            expiry_ms = Some(load_millisecond_time(src)?);
            type_byte = src.read_u8()?;
        }

        if type_byte == OPCODE_EOF {
            break;
        }

        if type_byte == OPCODE_SELECTDB {
            let index = load_len(src)? as u64;
            if index >= ctx.config.database_count as u64
                || index >= keyspace.database_count() as u64
            {
                error!(
                    "dump selects database {} but this host is configured for {}",
                    index, ctx.config.database_count
                );
                return Err(Error::DatabaseIndexOutOfRange {
                    index,
                    limit: ctx.config.database_count,
                });
            }
            current_db = index as u32;
            continue;
        }

        if !is_value_type(type_byte) {
            return Err(Error::UnknownOpcode(type_byte));
        }

        let key = load_raw_string(src)?;
        let value = load_value(src, type_byte, &ctx.config)?;

        // A primary drops pairs that died while the dump sat on disk; a
        // replica keeps them so the upstream's view is preserved.
        if let Some(at_ms) = expiry_ms {
            if !ctx.is_replica && at_ms < now {
                keys_expired += 1;
                continue;
            }
        }

        let db = keyspace
            .database_mut(current_db)
            .ok_or(Error::DatabaseIndexOutOfRange {
                index: current_db as u64,
                limit: ctx.config.database_count,
            })?;
        db.insert(key.clone(), value);
        if let Some(at_ms) = expiry_ms {
            db.set_expiry(&key, at_ms);
        }
        keys_loaded += 1;
    }

    if version >= FIRST_CHECKSUM_VERSION && ctx.config.checksum {
        let computed = src.checksum();
        let mut trailer = [0u8; 8];
        src.read_exact(&mut trailer)?;
        let stored = u64::from_le_bytes(trailer);
        if stored == 0 {
            warn!("dump was saved with checksum disabled: no check performed");
        } else if stored != computed {
            error!("wrong dump checksum, aborting load");
            return Err(Error::ChecksumMismatch { stored, computed });
        }
    }

    Ok(LoadSummary {
        version,
        keys_loaded,
        keys_expired,
        bytes: src.bytes_processed(),
    })
}

/// Load a dump file into `keyspace`.
pub fn load_file(
    path: &Path,
    ctx: &SnapshotContext,
    keyspace: &mut Keyspace,
    progress: Option<ProgressFn<'_>>,
) -> Result<LoadSummary> {
    let file = File::open(path)?;
    let total = file.metadata().ok().map(|m| m.len());
    let mut src = Source::new(BufReader::new(file), ctx.config.checksum);

    let summary = load_from_source(&mut src, ctx, keyspace, total, progress)?;
    info!(
        "dump loaded: version {}, {} keys ({} expired dropped), {} bytes",
        summary.version, summary.keys_loaded, summary.keys_expired, summary.bytes
    );
    Ok(summary)
}

/// Validate the magic and parse the four-digit ASCII version.
fn read_header<R: Read>(src: &mut Source<R>) -> Result<u32> {
    let mut header = [0u8; 9];
    src.read_exact(&mut header)?;
    if &header[..5] != MAGIC {
        return Err(Error::WrongSignature);
    }
    let mut version = 0u32;
    for &digit in &header[5..9] {
        if !digit.is_ascii_digit() {
            return Err(Error::WrongSignature);
        }
        version = version * 10 + (digit - b'0') as u32;
    }
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(version)
}
