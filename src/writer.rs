//! Dump stream writer.
//!
//! A dump is written in one sequential pass: the magic and four-digit ASCII
//! version, then one section per non-empty database (a `SELECTDB` opcode and
//! its index, followed by that database's records), the `EOF` opcode, and the
//! running checksum as eight little-endian bytes. A record is the optional
//! millisecond-expiry opcode, the value's type byte, the key, and the value
//! payload. Keys already past their expiry are skipped entirely.
//!
//! The file-backed entry point writes to a `temp-<pid>` sibling first and
//! only renames onto the target after flush + fsync succeed, so the target
//! path never holds a partial dump. The EOF-marked variant wraps the same
//! stream in the `$EOF:<40 hex>\r\n` … `<40 hex>` framing used for socket
//! transfers, where the receiver cannot seek and must detect the end without
//! parsing the payload.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::Rng;

use crate::channel::Sink;
use crate::codec::{
    save_len, save_millisecond_time, save_raw_string, FORMAT_VERSION, MAGIC, OPCODE_EOF,
    OPCODE_EXPIRETIME_MS, OPCODE_SELECTDB,
};
use crate::config::SnapshotContext;
use crate::error::{Error, Result};
use crate::keyspace::{Database, Keyspace};
use crate::object::{save_value, wire_type};
use crate::value::Value;

/// Length of the random hex end-marker used by socket transfers.
pub const EOF_MARK_LEN: usize = 40;

// ─────────────────────────────────────────────────────────────────────────────
// Stream writer
// ─────────────────────────────────────────────────────────────────────────────

/// Write a complete dump of `keyspace` to `sink`.
pub fn save_to_sink<W: Write>(
    sink: &mut Sink<W>,
    ctx: &SnapshotContext,
    keyspace: &Keyspace,
) -> Result<()> {
    let now = ctx.now_ms();

    sink.write_all(MAGIC)?;
    sink.write_all(format!("{:04}", FORMAT_VERSION).as_bytes())?;

    for (index, db) in keyspace.databases() {
        if db.is_empty() {
            continue;
        }
        sink.write_u8(OPCODE_SELECTDB)?;
        save_len(sink, index)?;

        for (key, value) in db.iter() {
            save_record(sink, ctx, db, key, value, now)?;
        }
    }

    sink.write_u8(OPCODE_EOF)?;

    // Captured before the write so the trailing eight bytes stay outside
    // their own coverage. Zero when checksums are disabled.
    let checksum = sink.checksum();
    sink.write_all(&checksum.to_le_bytes())?;
    Ok(())
}

/// Write one record. Returns `false` when the key was already expired and
/// therefore skipped.
fn save_record<W: Write>(
    sink: &mut Sink<W>,
    ctx: &SnapshotContext,
    db: &Database,
    key: &[u8],
    value: &Value,
    now: i64,
) -> Result<bool> {
    if let Some(at_ms) = db.expiry_ms(key) {
        if at_ms < now {
            return Ok(false);
        }
        sink.write_u8(OPCODE_EXPIRETIME_MS)?;
        save_millisecond_time(sink, at_ms)?;
    }

    sink.write_u8(wire_type(value))?;
    save_raw_string(sink, key, ctx.config.compression)?;
    save_value(sink, value, ctx.config.compression)?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// EOF-marked variant
// ─────────────────────────────────────────────────────────────────────────────

/// Fresh 40-hex-character end marker.
pub fn random_eof_mark() -> String {
    let bytes: [u8; EOF_MARK_LEN / 2] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Write the dump framed for receivers that cannot parse it: a
/// `$EOF:<mark>\r\n` prefix announces a 40-byte hex mark, and the same mark
/// closes the stream. Returns the mark that was used.
pub fn save_with_eof_mark<W: Write>(
    sink: &mut Sink<W>,
    ctx: &SnapshotContext,
    keyspace: &Keyspace,
) -> Result<String> {
    let mark = random_eof_mark();
    sink.write_all(b"$EOF:")?;
    sink.write_all(mark.as_bytes())?;
    sink.write_all(b"\r\n")?;
    save_to_sink(sink, ctx, keyspace)?;
    sink.write_all(mark.as_bytes())?;
    Ok(mark)
}

// ─────────────────────────────────────────────────────────────────────────────
// File sink with atomic rename
// ─────────────────────────────────────────────────────────────────────────────

/// Temp-file sibling for a save producing `target`, unique per process id.
pub fn temp_path_for(target: &Path, pid: u32) -> PathBuf {
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
    dir.unwrap_or_else(|| Path::new("."))
        .join(format!("temp-{}.rdb", pid))
}

/// Save the keyspace to `target`, atomically.
///
/// The dump goes to a `temp-<pid>.rdb` sibling; after a successful flush and
/// fsync the temp file is renamed over the target. On any failure the temp
/// file is unlinked and the target keeps its previous contents.
pub fn save(ctx: &SnapshotContext, keyspace: &Keyspace, target: &Path) -> Result<()> {
    let tmp = temp_path_for(target, std::process::id());

    let result = write_dump_file(ctx, keyspace, &tmp, target);
    if let Err(e) = &result {
        warn!("write error saving dump on disk: {}", e);
        let _ = fs::remove_file(&tmp);
    } else {
        info!("dump saved on disk: {}", target.display());
    }
    result
}

fn write_dump_file(
    ctx: &SnapshotContext,
    keyspace: &Keyspace,
    tmp: &Path,
    target: &Path,
) -> Result<()> {
    let file = File::create(tmp)?;
    let mut sink = Sink::new(BufWriter::new(file), ctx.config.checksum);
    save_to_sink(&mut sink, ctx, keyspace)?;
    sink.flush()?;

    // Data must reach the device before the rename publishes it.
    let file = sink
        .into_inner()
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, target)?;
    Ok(())
}
