//! Error type shared by the dump writer, reader, and child orchestration.
//!
//! Failures follow a simple taxonomy: stream-level I/O problems (including
//! short reads, which are fatal on the load path), structural problems in the
//! dump itself, and orchestration problems (a save child already running).
//! Nothing in this crate retries; errors propagate to the host, which decides
//! whether a partial load is survivable (it almost never is).

use std::fmt;
use std::io;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while writing or reading a dump, or while managing the
/// background-save child.
#[derive(Debug)]
pub enum Error {
    /// Underlying I/O failure. A short read surfaces here with
    /// [`io::ErrorKind::UnexpectedEof`]; partial dump state is unsafe, so
    /// loaders treat this as fatal.
    Io(io::Error),
    /// The stream does not begin with the dump magic.
    WrongSignature,
    /// The dump version is outside the range this reader supports.
    UnsupportedVersion(u32),
    /// An opcode or value-kind byte this reader does not know. Either the
    /// dump was produced by a newer writer, or it is corrupt.
    UnknownOpcode(u8),
    /// The trailing CRC-64 did not match the running checksum.
    ChecksumMismatch { stored: u64, computed: u64 },
    /// An encoded-value length slot appeared where a plain length is required,
    /// or an unknown encoding sub-type was found.
    BadLengthEncoding,
    /// Structural corruption inside a payload (compressed chunk, legacy
    /// field map, double representation).
    Corrupt(&'static str),
    /// A `SELECTDB` index beyond the configured database count.
    DatabaseIndexOutOfRange { index: u64, limit: u32 },
    /// A save or transfer child is already active; only one may run at a time.
    SaveAlreadyInProgress,
    /// A replica transfer was requested with no pending peers.
    NoReplicasPending,
}

impl Error {
    /// True when this error is a truncated-stream condition.
    pub fn is_short_read(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "dump I/O error: {}", e),
            Error::WrongSignature => write!(f, "wrong signature: not a dump file"),
            Error::UnsupportedVersion(v) => {
                write!(f, "can't handle dump format version {}", v)
            }
            Error::UnknownOpcode(b) => write!(f, "unknown opcode or value kind {:#04x}", b),
            Error::ChecksumMismatch { stored, computed } => write!(
                f,
                "checksum mismatch: stored {:016x}, computed {:016x}",
                stored, computed
            ),
            Error::BadLengthEncoding => write!(f, "invalid length encoding"),
            Error::Corrupt(what) => write!(f, "corrupt payload: {}", what),
            Error::DatabaseIndexOutOfRange { index, limit } => write!(
                f,
                "database index {} out of range (configured for {} databases)",
                index, limit
            ),
            Error::SaveAlreadyInProgress => write!(f, "background save already in progress"),
            Error::NoReplicasPending => write!(f, "no replicas waiting for a transfer"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
