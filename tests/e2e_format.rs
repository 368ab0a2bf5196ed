//! E2E: byte-level conformance of the dump format.
//!
//! Exercises exact encodings against hand-computed byte sequences, and
//! parses hand-built dumps to pin the reader to the format rather than to
//! whatever the writer happens to produce.

use rdbsnap::channel::{Sink, Source};
use rdbsnap::codec::{
    OPCODE_EOF, OPCODE_EXPIRETIME_MS, OPCODE_SELECTDB, TYPE_HASH_ZIPMAP, TYPE_STRING,
    TYPE_ZSET,
};
use rdbsnap::config::SnapshotContext;
use rdbsnap::crc64::crc64;
use rdbsnap::keyspace::Keyspace;
use rdbsnap::reader::load_from_source;
use rdbsnap::value::{zipmap, HashValue, StringValue, Value};
use rdbsnap::writer::save_to_sink;

fn dump_of(ctx: &SnapshotContext, ks: &Keyspace) -> Vec<u8> {
    let mut sink = Sink::new(Vec::new(), ctx.config.checksum);
    save_to_sink(&mut sink, ctx, ks).unwrap();
    sink.into_inner()
}

fn load_bytes(bytes: &[u8], ctx: &SnapshotContext, ks: &mut Keyspace) -> rdbsnap::Result<()> {
    let mut src = Source::new(bytes, ctx.config.checksum);
    load_from_source(&mut src, ctx, ks, None, None).map(|_| ())
}

/// Wrap a body in magic, EOF opcode, and a correct checksum trailer.
fn build_dump(body: &[u8]) -> Vec<u8> {
    let mut dump = Vec::new();
    dump.extend_from_slice(b"REDIS0006");
    dump.extend_from_slice(body);
    dump.push(OPCODE_EOF);
    let checksum = crc64(&dump);
    dump.extend_from_slice(&checksum.to_le_bytes());
    dump
}

// ─────────────────────────────────────────────────────────────────────────────
// Exact byte layouts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn one_key_dump_has_fixed_size() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    ks.database_mut(0)
        .unwrap()
        .insert(b"k".to_vec(), Value::String(StringValue::from(&b"v"[..])));
    let bytes = dump_of(&ctx, &ks);

    // magic+version(9) SELECTDB(1) index(1) type(1) key(1+1) value(1+1)
    // EOF(1) checksum(8)
    assert_eq!(bytes.len(), 25);
}

#[test]
fn integer_valued_string_uses_the_int16_slot() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    ks.database_mut(0)
        .unwrap()
        .insert(b"n".to_vec(), Value::String(StringValue::from(&b"12345"[..])));
    let bytes = dump_of(&ctx, &ks);

    // ... SELECTDB 00, then: type 00, key "n", value C1 39 30
    let tail = &bytes[9..];
    assert_eq!(tail[0], OPCODE_SELECTDB);
    assert_eq!(tail[1], 0);
    assert_eq!(tail[2], TYPE_STRING);
    assert_eq!(&tail[3..5], &[0x01, b'n']);
    assert_eq!(&tail[5..8], &[0xC1, 0x39, 0x30]); // 12345 = 0x3039, LE

    // And it loads back as an integer-represented string.
    let mut loaded = Keyspace::new(1);
    load_bytes(&bytes, &ctx, &mut loaded).unwrap();
    assert_eq!(
        loaded.database(0).unwrap().get(b"n").unwrap(),
        &Value::String(StringValue::Int(12345))
    );
}

#[test]
fn compressible_value_is_stored_as_an_lzf_chunk() {
    let ctx = SnapshotContext::default();
    let payload = b"aaaaa".repeat(20); // 100 bytes of 'a'
    let mut ks = Keyspace::new(1);
    ks.database_mut(0).unwrap().insert(
        b"big".to_vec(),
        Value::String(StringValue::Bytes(payload.clone())),
    );
    let bytes = dump_of(&ctx, &ks);

    // Find the value slot: after type byte, key (1+3).
    let pos = bytes
        .windows(4)
        .position(|w| w == b"\x03big")
        .expect("key present")
        + 4;
    assert_eq!(bytes[pos], 0xC3, "LZF-encoded slot");
    // compressed length (one byte here), then original length 100
    let clen = bytes[pos + 1] as usize;
    assert!(clen < 100);
    assert_eq!(bytes[pos + 2], 0x40 | 0x00); // 100 in the 14-bit form
    assert_eq!(bytes[pos + 3], 100);

    let mut loaded = Keyspace::new(1);
    load_bytes(&bytes, &ctx, &mut loaded).unwrap();
    assert_eq!(
        loaded
            .database(0)
            .unwrap()
            .get(b"big")
            .unwrap()
            .as_string_bytes()
            .unwrap(),
        payload
    );
}

#[test]
fn zset_scores_use_ascii_and_reserved_lengths() {
    let mut body = Vec::new();
    body.push(OPCODE_SELECTDB);
    body.push(0);
    body.push(TYPE_ZSET);
    body.extend_from_slice(&[0x01, b'z']); // key "z"
    body.push(0x02); // two members
    body.extend_from_slice(&[0x01, b'a']);
    body.extend_from_slice(&[0x01, b'1']); // score "1"
    body.extend_from_slice(&[0x01, b'b']);
    body.push(253); // score NaN

    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    load_bytes(&build_dump(&body), &ctx, &mut ks).unwrap();

    let pairs = ks
        .database(0)
        .unwrap()
        .get(b"z")
        .unwrap()
        .zset_pairs()
        .unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0], (b"a".to_vec(), 1.0));
    assert_eq!(pairs[1].0, b"b");
    assert!(pairs[1].1.is_nan());

    // The writer emits the same shape back.
    let bytes = dump_of(&ctx, &ks);
    let mut reloaded = Keyspace::new(1);
    load_bytes(&bytes, &ctx, &mut reloaded).unwrap();
    let again = reloaded
        .database(0)
        .unwrap()
        .get(b"z")
        .unwrap()
        .zset_pairs()
        .unwrap();
    assert_eq!(again[0], (b"a".to_vec(), 1.0));
    assert!(again[1].1.is_nan());
}

#[test]
fn expiry_record_byte_sequence() {
    let mut ctx = SnapshotContext::default();
    ctx.clock_ms = || 0;
    let at: i64 = 0x0102_0304_0506;
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();
    db.insert(b"x".to_vec(), Value::String(StringValue::from(&b"v"[..])));
    db.set_expiry(b"x", at);
    let bytes = dump_of(&ctx, &ks);

    let tail = &bytes[9..];
    assert_eq!(tail[0], OPCODE_SELECTDB);
    assert_eq!(tail[1], 0);
    assert_eq!(tail[2], OPCODE_EXPIRETIME_MS);
    assert_eq!(&tail[3..11], &at.to_le_bytes());
    assert_eq!(tail[11], TYPE_STRING);
    assert_eq!(&tail[12..14], &[0x01, b'x']);
}

// ─────────────────────────────────────────────────────────────────────────────
// Hand-built dumps
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn reader_accepts_wide_length_forms_for_small_values() {
    // Key "k" written with a 14-bit length; the writer would use 6-bit.
    let mut body = Vec::new();
    body.push(OPCODE_SELECTDB);
    body.push(0);
    body.push(TYPE_STRING);
    body.extend_from_slice(&[0x40, 0x01, b'k']);
    body.extend_from_slice(&[0x01, b'v']);

    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    load_bytes(&build_dump(&body), &ctx, &mut ks).unwrap();
    assert_eq!(
        ks.database(0)
            .unwrap()
            .get(b"k")
            .unwrap()
            .as_string_bytes()
            .unwrap(),
        b"v"
    );
}

#[test]
fn legacy_field_map_loads_as_a_hash() {
    let blob = zipmap::build(&[
        (b"host".to_vec(), b"example".to_vec()),
        (b"port".to_vec(), b"6380".to_vec()),
    ]);
    let mut body = Vec::new();
    body.push(OPCODE_SELECTDB);
    body.push(0);
    body.push(TYPE_HASH_ZIPMAP);
    body.extend_from_slice(&[0x01, b'h']);
    body.push(blob.len() as u8); // raw string, 6-bit length
    body.extend_from_slice(&blob);

    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    load_bytes(&build_dump(&body), &ctx, &mut ks).unwrap();

    let value = ks.database(0).unwrap().get(b"h").unwrap();
    assert!(matches!(value, Value::Hash(HashValue::Packed(_))));
    assert_eq!(
        value.hash_pairs().unwrap(),
        vec![
            (b"host".to_vec(), b"example".to_vec()),
            (b"port".to_vec(), b"6380".to_vec()),
        ]
    );
}

#[test]
fn missing_database_section_defaults_to_db_zero() {
    // Records before any SELECTDB land in database 0.
    let mut body = Vec::new();
    body.push(TYPE_STRING);
    body.extend_from_slice(&[0x01, b'k']);
    body.extend_from_slice(&[0x01, b'v']);

    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    load_bytes(&build_dump(&body), &ctx, &mut ks).unwrap();
    assert_eq!(ks.database(0).unwrap().len(), 1);
}

#[test]
fn old_version_without_trailer_loads() {
    // Version 4 predates the checksum trailer; the stream simply ends
    // after EOF.
    let mut dump = Vec::new();
    dump.extend_from_slice(b"REDIS0004");
    dump.push(OPCODE_SELECTDB);
    dump.push(0);
    dump.push(TYPE_STRING);
    dump.extend_from_slice(&[0x03, b'o', b'l', b'd']);
    dump.extend_from_slice(&[0x03, b'v', b'a', b'l']);
    dump.push(OPCODE_EOF);

    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    load_bytes(&dump, &ctx, &mut ks).unwrap();
    assert_eq!(
        ks.database(0)
            .unwrap()
            .get(b"old")
            .unwrap()
            .as_string_bytes()
            .unwrap(),
        b"val"
    );
}

#[test]
fn checksum_covers_everything_but_the_trailer() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    ks.database_mut(0)
        .unwrap()
        .insert(b"k".to_vec(), Value::String(StringValue::from(&b"v"[..])));
    let bytes = dump_of(&ctx, &ks);

    let body = &bytes[..bytes.len() - 8];
    let trailer = u64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
    assert_eq!(trailer, crc64(body));
    assert_ne!(trailer, crc64(&bytes)); // trailer is outside its own coverage
}
