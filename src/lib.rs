//! Snapshot codec for an in-memory key-value datastore.
//!
//! Serializes the complete contents of a set of logical databases into one
//! compact, self-describing, checksummed binary dump, and reconstructs that
//! state on load — streaming in both directions, with no whole-database
//! buffering. Around the core codec sit the two process-level wrappers a
//! live datastore needs: a forked background save with copy-on-write
//! isolation and temp-file atomicity, and a diskless transfer that streams
//! the same dump straight to replica sockets with per-peer result reporting.
//!
//! Layering, bottom up:
//!
//! - [`channel`] — checksumming byte sinks/sources; counting and fan-out backings
//! - [`codec`] — length prefixes, integer/string/double/time primitives
//! - [`object`] — per-kind value payloads and load-time re-encoding
//! - [`writer`] / [`reader`] — the dump stream itself
//! - [`background`] / [`transfer`] — child-process orchestration

pub mod background;
pub mod channel;
pub mod codec;
pub mod config;
pub mod crc64;
pub mod error;
pub mod keyspace;
pub mod lzf;
pub mod object;
pub mod reader;
pub mod transfer;
pub mod value;
pub mod writer;

pub use config::{Config, SnapshotContext};
pub use error::{Error, Result};
pub use keyspace::{Database, Keyspace};
pub use reader::{load_file, LoadSummary};
pub use value::Value;
pub use writer::save;

/// Format version written by [`writer::save`] and the newest the reader accepts.
pub use codec::FORMAT_VERSION;
