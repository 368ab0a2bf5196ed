//! Diskless replica transfer.
//!
//! Instead of landing on disk, the same dump stream fans out directly to the
//! sockets of replicas waiting for their initial sync. The payload is framed
//! with the `$EOF:` mark so receivers can find the end without parsing dump
//! bytes, and the whole thing runs in a forked child so the live datastore
//! keeps serving.
//!
//! Before the fork, the parent creates a pipe. After streaming, the child
//! reports per-peer outcomes through it: a little-endian `u64` count,
//! followed by `count` pairs of `u64`s — the peer id and an errno-style code
//! (0 = the peer received everything). The parent reads the report once the
//! child is reaped; a child that died abnormally yields an empty report,
//! which classifies every peer as failed.
//!
//! Peer sockets stay owned by the caller. They are switched to a bounded
//! write timeout before the fork (the child inherits the socket state); a
//! peer that times out is marked errored while the broadcast continues.

use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{info, warn};
use nix::unistd::{fork, ForkResult, Pid};

use crate::background::{log_copy_on_write_usage, ChildKind, ChildRegistry};
use crate::channel::{FanoutSink, Sink};
use crate::config::SnapshotContext;
use crate::error::{Error, Result};
use crate::keyspace::Keyspace;
use crate::writer::save_with_eof_mark;

/// One replica waiting for a dump. `id` is the host's client identifier for
/// this peer; it comes back in the transfer report.
#[derive(Debug)]
pub struct ReplicaPeer {
    pub id: u64,
    pub stream: TcpStream,
}

/// Parent-side handle on a running transfer child.
#[derive(Debug)]
pub struct TransferHandle {
    pub pid: Pid,
    report: File,
}

/// Per-peer outcome of a finished transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferReport {
    /// `(peer id, errno-style code)`; 0 means the peer got the full stream.
    pub entries: Vec<(u64, u64)>,
}

impl TransferReport {
    /// Ids of peers that received the complete payload.
    pub fn surviving_ids(&self) -> Vec<u64> {
        self.entries
            .iter()
            .filter(|(_, code)| *code == 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fork a child that streams the EOF-marked dump to every peer.
///
/// Fails up front when another child is active or no peers are pending.
/// On success the registry holds the child and the keyspace resize gate is
/// closed, exactly as for a disk save; reap with
/// [`crate::background::check_child`], then collect the report with
/// [`read_transfer_report`].
pub fn save_to_replica_sockets(
    ctx: &SnapshotContext,
    keyspace: &mut Keyspace,
    peers: &[ReplicaPeer],
    registry: &mut ChildRegistry,
    write_timeout: Duration,
) -> Result<TransferHandle> {
    if registry.is_active() {
        return Err(Error::SaveAlreadyInProgress);
    }
    if peers.is_empty() {
        return Err(Error::NoReplicasPending);
    }

    // The pipe must exist before the fork so both ends are inherited.
    let (report_rx, report_tx) = nix::unistd::pipe().map_err(|e| Error::Io(e.into()))?;

    // Bound each peer write; the socket state is shared with the child.
    for peer in peers {
        peer.stream.set_write_timeout(Some(write_timeout))?;
    }

    // SAFETY: the child streams the dump, writes its report, and `_exit`s;
    // it never unwinds back into the parent's stack.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(File::from(report_rx));
            let mut report_pipe = File::from(report_tx);

            let fan = FanoutSink::new(peers.iter().map(|p| (p.id, &p.stream)).collect());
            let mut sink = Sink::new(fan, ctx.config.checksum);

            let streamed = save_with_eof_mark(&mut sink, ctx, keyspace)
                .and_then(|_| sink.flush().map_err(Error::Io));
            let codes = sink.into_inner().error_codes();

            let ok = match streamed {
                Ok(()) => {
                    log_copy_on_write_usage();
                    write_report(&mut report_pipe, &codes).is_ok()
                }
                Err(_) => false,
            };
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        Ok(ForkResult::Parent { child }) => {
            drop(File::from(report_tx));
            info!("background dump transfer started by pid {}", child);
            registry.register(child, ChildKind::Socket, ctx.now_ms(), None);
            keyspace.set_resize_enabled(false);
            Ok(TransferHandle {
                pid: child,
                report: File::from(report_rx),
            })
        }
        Err(e) => {
            warn!("can't start dump transfer: fork: {}", e);
            Err(Error::Io(e.into()))
        }
    }
}

/// Collect the child's report. `child_ok` is whether the child exited
/// cleanly; an abnormal child contributes an empty report, so the caller
/// treats every peer as failed.
pub fn read_transfer_report(handle: &mut TransferHandle, child_ok: bool) -> TransferReport {
    if !child_ok {
        return TransferReport::default();
    }

    let mut count_buf = [0u8; 8];
    if handle.report.read_exact(&mut count_buf).is_err() {
        // The child exited 0 but never produced a report; treat as empty.
        return TransferReport::default();
    }
    let count = u64::from_le_bytes(count_buf);

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut pair = [0u8; 16];
        if handle.report.read_exact(&mut pair).is_err() {
            // Truncated report: trust nothing from it.
            return TransferReport::default();
        }
        let id = u64::from_le_bytes(pair[..8].try_into().unwrap());
        let code = u64::from_le_bytes(pair[8..].try_into().unwrap());
        entries.push((id, code));
    }
    TransferReport { entries }
}

/// Clear the bounded write timeout set up for the transfer, returning the
/// peer sockets to their normal mode.
pub fn restore_peer_sockets(peers: &[ReplicaPeer]) -> std::io::Result<()> {
    for peer in peers {
        peer.stream.set_write_timeout(None)?;
    }
    Ok(())
}

fn write_report(pipe: &mut File, codes: &[(u64, u64)]) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(8 + codes.len() * 16);
    buf.extend_from_slice(&(codes.len() as u64).to_le_bytes());
    for (id, code) in codes {
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&code.to_le_bytes());
    }
    pipe.write_all(&buf)?;
    pipe.flush()
}
