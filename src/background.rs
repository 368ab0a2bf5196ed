//! Background-save orchestration.
//!
//! A save must not block the live datastore, so it runs in a forked child
//! against the copy-on-write snapshot the fork provides. The parent records
//! the child in a [`ChildRegistry`] — at most one save or transfer child may
//! exist at a time — disables keyspace dictionary resizing to bound
//! copy-on-write page traffic, and polls for completion from its event loop
//! via [`check_child`].
//!
//! Exit protocol: the child exits 0 on success and 1 on write failure.
//! A child killed by [`CANCEL_SIGNAL`] was aborted on purpose and does not
//! mark the save failed; any other signal does. The child's temp file is
//! removed whenever a disk child dies by signal.
//!
//! The parent is also where save bookkeeping lives: the dirty counter delta,
//! the last successful save timestamp, and the last outcome, all in
//! [`SaveStats`].

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::config::SnapshotContext;
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::writer;

/// Signal that aborts a save child without recording a failure.
pub const CANCEL_SIGNAL: Signal = Signal::SIGUSR1;

/// What kind of work the active child is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// Writing a dump file.
    Disk,
    /// Streaming a dump to replica sockets.
    Socket,
}

/// How a completed child came out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveResult {
    Success,
    Failed,
    /// Killed with [`CANCEL_SIGNAL`]; not an error.
    Cancelled,
}

/// A reaped child, as reported by [`check_child`]. Replicas that were
/// waiting on this dump must be notified by the host in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedSave {
    pub pid: Pid,
    pub kind: ChildKind,
    pub result: SaveResult,
}

/// Save bookkeeping the host reads back.
#[derive(Debug, Clone)]
pub struct SaveStats {
    /// Mutations since the last successful save; maintained by the host,
    /// reduced here when a save lands.
    pub dirty: u64,
    /// `dirty` as it was when the running save started.
    pub dirty_before_save: u64,
    /// Wall-clock ms of the last successful save.
    pub last_save_ms: Option<i64>,
    /// Outcome of the most recent save attempt.
    pub last_status_ok: bool,
}

impl Default for SaveStats {
    fn default() -> Self {
        SaveStats {
            dirty: 0,
            dirty_before_save: 0,
            last_save_ms: None,
            last_status_ok: true,
        }
    }
}

#[derive(Debug)]
struct ActiveChild {
    pid: Pid,
    kind: ChildKind,
    started_ms: i64,
    /// Dump target; `None` for socket transfers (no temp file to clean).
    target: Option<PathBuf>,
}

/// Tracks the single permitted background child and the save statistics.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    active: Option<ActiveChild>,
    pub stats: SaveStats,
    /// Duration of the most recent fork, in microseconds.
    pub last_fork_micros: Option<u64>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        ChildRegistry::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_pid(&self) -> Option<Pid> {
        self.active.as_ref().map(|c| c.pid)
    }

    pub fn active_kind(&self) -> Option<ChildKind> {
        self.active.as_ref().map(|c| c.kind)
    }

    /// When the running save started, wall-clock ms.
    pub fn active_since_ms(&self) -> Option<i64> {
        self.active.as_ref().map(|c| c.started_ms)
    }

    /// Abort the running child without marking the save failed.
    pub fn kill_child(&self) -> Result<()> {
        match &self.active {
            Some(child) => {
                kill(child.pid, CANCEL_SIGNAL).map_err(|e| Error::Io(e.into()))?;
                Ok(())
            }
            None => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no active save child",
            ))),
        }
    }

    pub(crate) fn register(
        &mut self,
        pid: Pid,
        kind: ChildKind,
        started_ms: i64,
        target: Option<PathBuf>,
    ) {
        self.active = Some(ActiveChild {
            pid,
            kind,
            started_ms,
            target,
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synchronous save (the SAVE front door)
// ─────────────────────────────────────────────────────────────────────────────

/// Run the dump writer in this process. Refused while any child is active.
pub fn synchronous_save(
    ctx: &SnapshotContext,
    keyspace: &Keyspace,
    target: &Path,
    registry: &mut ChildRegistry,
) -> Result<()> {
    if registry.is_active() {
        return Err(Error::SaveAlreadyInProgress);
    }
    match writer::save(ctx, keyspace, target) {
        Ok(()) => {
            registry.stats.dirty = 0;
            registry.stats.last_save_ms = Some(ctx.now_ms());
            registry.stats.last_status_ok = true;
            Ok(())
        }
        Err(e) => {
            registry.stats.last_status_ok = false;
            Err(e)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background save (the BGSAVE front door)
// ─────────────────────────────────────────────────────────────────────────────

/// Fork a child that writes the dump to `target` while the parent keeps
/// serving. `child_prelude` runs first thing in the child, before any dump
/// work — the place to close inherited listening sockets.
pub fn background_save(
    ctx: &SnapshotContext,
    keyspace: &mut Keyspace,
    target: &Path,
    registry: &mut ChildRegistry,
    child_prelude: impl FnOnce(),
) -> Result<Pid> {
    if registry.is_active() {
        return Err(Error::SaveAlreadyInProgress);
    }
    registry.stats.dirty_before_save = registry.stats.dirty;

    let fork_start = Instant::now();
    // SAFETY: the child only runs the dump writer and `_exit`s; it never
    // returns into the parent's call stack.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            child_prelude();
            let ok = writer::save(ctx, keyspace, target).is_ok();
            if ok {
                log_copy_on_write_usage();
            }
            // Skip atexit handlers and buffered-stdio flushing; this address
            // space is a snapshot of the parent's.
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        Ok(ForkResult::Parent { child }) => {
            registry.last_fork_micros = Some(fork_start.elapsed().as_micros() as u64);
            info!("background saving started by pid {}", child);
            registry.register(child, ChildKind::Disk, ctx.now_ms(), Some(target.to_path_buf()));
            keyspace.set_resize_enabled(false);
            Ok(child)
        }
        Err(e) => {
            registry.stats.last_status_ok = false;
            warn!("can't save in background: fork: {}", e);
            Err(Error::Io(e.into()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion
// ─────────────────────────────────────────────────────────────────────────────

/// Poll the active child without blocking. Returns `Ok(Some(_))` exactly
/// once per child, after it has been reaped; the registry and the keyspace
/// resize gate are reset at that point.
pub fn check_child(
    keyspace: &mut Keyspace,
    registry: &mut ChildRegistry,
    now_ms: i64,
) -> Result<Option<CompletedSave>> {
    let pid = match &registry.active {
        Some(child) => child.pid,
        None => return Ok(None),
    };

    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(WaitStatus::Exited(pid, code)) => {
            Ok(Some(finish_child(keyspace, registry, pid, Some(code), None, now_ms)))
        }
        Ok(WaitStatus::Signaled(pid, signal, _)) => {
            Ok(Some(finish_child(keyspace, registry, pid, None, Some(signal), now_ms)))
        }
        // Stops and traces are not exits; keep waiting.
        Ok(_) => Ok(None),
        Err(e) => Err(Error::Io(e.into())),
    }
}

fn finish_child(
    keyspace: &mut Keyspace,
    registry: &mut ChildRegistry,
    pid: Pid,
    exit_code: Option<i32>,
    signal: Option<Signal>,
    now_ms: i64,
) -> CompletedSave {
    let child = match registry.active.take() {
        Some(c) => c,
        None => unreachable!("finish_child runs only with an active child"),
    };
    keyspace.set_resize_enabled(true);

    let result = match (exit_code, signal) {
        (Some(0), _) => SaveResult::Success,
        (Some(_), _) => SaveResult::Failed,
        (None, Some(sig)) => {
            // A signal death leaves the temp file behind.
            if let Some(target) = &child.target {
                remove_temp_file(target, pid);
            }
            if sig == CANCEL_SIGNAL {
                SaveResult::Cancelled
            } else {
                SaveResult::Failed
            }
        }
        (None, None) => SaveResult::Failed,
    };

    if child.kind == ChildKind::Disk {
        apply_disk_outcome(&mut registry.stats, result, now_ms);
    }

    match result {
        SaveResult::Success => info!("background saving terminated with success"),
        SaveResult::Failed => warn!("background saving error"),
        SaveResult::Cancelled => info!("background saving cancelled by request"),
    }

    CompletedSave {
        pid,
        kind: child.kind,
        result,
    }
}

/// Stats transition for a finished disk save.
fn apply_disk_outcome(stats: &mut SaveStats, result: SaveResult, now_ms: i64) {
    match result {
        SaveResult::Success => {
            stats.dirty = stats.dirty.saturating_sub(stats.dirty_before_save);
            stats.last_save_ms = Some(now_ms);
            stats.last_status_ok = true;
        }
        SaveResult::Failed => stats.last_status_ok = false,
        SaveResult::Cancelled => {}
    }
}

/// Unlink the temp file a child with the given pid would have been writing.
pub fn remove_temp_file(target: &Path, pid: Pid) {
    let tmp = writer::temp_path_for(target, pid.as_raw() as u32);
    let _ = std::fs::remove_file(tmp);
}

// ─────────────────────────────────────────────────────────────────────────────
// Copy-on-write accounting
// ─────────────────────────────────────────────────────────────────────────────

/// Log how much private-dirty memory this process has touched — in a forked
/// save child this approximates the copy-on-write working set.
pub(crate) fn log_copy_on_write_usage() {
    if let Some(bytes) = private_dirty_bytes() {
        if bytes > 0 {
            info!(
                "copy-on-write used {} MB of memory",
                bytes / (1024 * 1024)
            );
        }
    }
}

#[cfg(target_os = "linux")]
fn private_dirty_bytes() -> Option<u64> {
    let smaps = std::fs::read_to_string("/proc/self/smaps").ok()?;
    let mut total_kb = 0u64;
    for line in smaps.lines() {
        if let Some(rest) = line.strip_prefix("Private_Dirty:") {
            let amount = rest.trim().trim_end_matches("kB").trim();
            if let Ok(kb) = amount.parse::<u64>() {
                total_kb += kb;
            }
        }
    }
    Some(total_kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn private_dirty_bytes() -> Option<u64> {
    None
}
