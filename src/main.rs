//! `rdb-check` — verify a datastore dump file.
//!
//! Loads the dump into a scratch keyspace with full structural and checksum
//! validation, then prints what it found. Exits non-zero when the dump does
//! not load, which makes it usable as a pre-flight gate before pointing a
//! server at a file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use rdbsnap::config::{Config, SnapshotContext};
use rdbsnap::keyspace::Keyspace;
use rdbsnap::reader;

#[derive(Parser)]
#[command(name = "rdb-check", version, about = "Verify a datastore dump file")]
struct Args {
    /// Dump file to verify.
    file: PathBuf,

    /// Skip checksum verification (still validates structure).
    #[arg(long)]
    no_checksum: bool,

    /// Number of logical databases to accept.
    #[arg(long, default_value_t = 16)]
    databases: u32,

    /// Print per-database key counts.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        checksum: !args.no_checksum,
        database_count: args.databases,
        ..Config::default()
    };
    let mut ctx = SnapshotContext::new(config);
    // Keep records whose expiry has passed: a checker reports on the file,
    // it does not apply host expiry policy.
    ctx.is_replica = true;

    let mut keyspace = Keyspace::new(args.databases);
    let summary = reader::load_file(&args.file, &ctx, &mut keyspace, None)
        .with_context(|| format!("{} does not load", args.file.display()))?;

    println!(
        "{}: ok (version {}, {} keys, {} bytes)",
        args.file.display(),
        summary.version,
        summary.keys_loaded,
        summary.bytes
    );

    if args.verbose {
        for (index, db) in keyspace.databases() {
            if db.is_empty() {
                continue;
            }
            println!(
                "  db{}: {} keys, {} with expiry",
                index,
                db.len(),
                db.expires_len()
            );
        }
    }
    Ok(())
}
