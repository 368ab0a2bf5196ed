//! Byte channels the codec writes to and reads from.
//!
//! Everything above this module speaks in whole records; everything below is
//! a plain `Write` or `Read`. [`Sink`] and [`Source`] sit in between: they
//! move bytes, feed every byte through the optional running CRC-64, and keep
//! a processed-byte counter the reader uses for progress reporting.
//!
//! Two special backings round out the set:
//! - [`ByteCounter`], a `Write` that discards bytes and counts them, used to
//!   probe a value's on-disk size without producing output;
//! - [`FanoutSink`], a `Write` that broadcasts to a set of peer sockets and
//!   records a sticky per-peer error instead of aborting the broadcast.

use std::io::{self, Read, Write};

use log::warn;

use crate::crc64::Crc64;

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Checksumming byte sink over any `W: Write`.
pub struct Sink<W: Write> {
    inner: W,
    crc: Option<Crc64>,
    written: u64,
}

impl<W: Write> Sink<W> {
    /// Wrap a writer. When `checksum` is false the running CRC stays at zero,
    /// which is also the on-disk marker for "checksum disabled".
    pub fn new(inner: W, checksum: bool) -> Self {
        Sink {
            inner,
            crc: checksum.then(Crc64::new),
            written: 0,
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(crc) = &mut self.crc {
            crc.update(buf);
        }
        self.inner.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    /// Current checksum value; zero when checksums are disabled.
    pub fn checksum(&self) -> u64 {
        self.crc.map(|c| c.value()).unwrap_or(0)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Source
// ─────────────────────────────────────────────────────────────────────────────

/// Checksumming byte source over any `R: Read`.
pub struct Source<R: Read> {
    inner: R,
    crc: Option<Crc64>,
    processed: u64,
}

impl<R: Read> Source<R> {
    pub fn new(inner: R, checksum: bool) -> Self {
        Source {
            inner,
            crc: checksum.then(Crc64::new),
            processed: 0,
        }
    }

    /// Fill `buf` completely or fail; a short stream surfaces as
    /// [`io::ErrorKind::UnexpectedEof`].
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        if let Some(crc) = &mut self.crc {
            crc.update(buf);
        }
        self.processed += buf.len() as u64;
        Ok(())
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    /// Current checksum value; zero when checksums are disabled.
    pub fn checksum(&self) -> u64 {
        self.crc.map(|c| c.value()).unwrap_or(0)
    }

    /// Total bytes consumed so far; drives the load progress callback.
    pub fn bytes_processed(&self) -> u64 {
        self.processed
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ByteCounter
// ─────────────────────────────────────────────────────────────────────────────

/// Null sink that counts bytes. Backs the serialized-size probe.
#[derive(Debug, Default)]
pub struct ByteCounter {
    count: u64,
}

impl ByteCounter {
    pub fn new() -> Self {
        ByteCounter::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FanoutSink
// ─────────────────────────────────────────────────────────────────────────────

/// One broadcast target. `id` is the host's identifier for the peer (a
/// replica client id); it travels through the child's result report.
struct Peer<W> {
    id: u64,
    stream: W,
    error: Option<io::Error>,
}

/// Broadcasting sink over a set of peers.
///
/// A failed write marks that peer errored and the broadcast continues for the
/// rest; the write call itself only fails once every peer is gone, since at
/// that point no byte can reach anyone. Per-peer outcomes are read back with
/// [`FanoutSink::error_codes`] after the stream ends.
pub struct FanoutSink<W: Write> {
    peers: Vec<Peer<W>>,
}

impl<W: Write> FanoutSink<W> {
    pub fn new(peers: Vec<(u64, W)>) -> Self {
        FanoutSink {
            peers: peers
                .into_iter()
                .map(|(id, stream)| Peer {
                    id,
                    stream,
                    error: None,
                })
                .collect(),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of peers that have not failed.
    pub fn live_count(&self) -> usize {
        self.peers.iter().filter(|p| p.error.is_none()).count()
    }

    /// `(peer id, errno-style code)` per peer, 0 meaning success.
    pub fn error_codes(&self) -> Vec<(u64, u64)> {
        self.peers
            .iter()
            .map(|p| {
                let code = p
                    .error
                    .as_ref()
                    .map(|e| e.raw_os_error().unwrap_or(libc::EIO) as u64)
                    .unwrap_or(0);
                (p.id, code)
            })
            .collect()
    }

    fn for_each_live(&mut self, mut op: impl FnMut(&mut W) -> io::Result<()>) -> io::Result<()> {
        for peer in &mut self.peers {
            if peer.error.is_some() {
                continue;
            }
            if let Err(e) = op(&mut peer.stream) {
                warn!("replica transfer: peer {} dropped: {}", peer.id, e);
                peer.error = Some(e);
            }
        }
        if self.live_count() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "all transfer peers failed",
            ));
        }
        Ok(())
    }
}

impl<W: Write> Write for FanoutSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.for_each_live(|s| s.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.for_each_live(|s| s.flush())
    }
}
