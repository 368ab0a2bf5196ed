//! E2E: whole-keyspace round trips through the dump codec.
//!
//! Saves populated keyspaces to real files and loads them back, checking
//! key/value/expiry fidelity across every value kind and both in-memory
//! representations, with compression and checksums both on and off.

use std::collections::{HashMap, HashSet};

use tempfile::TempDir;

use rdbsnap::config::{Config, SnapshotContext};
use rdbsnap::keyspace::Keyspace;
use rdbsnap::value::{intset, packed, HashValue, ListValue, SetValue, StringValue, Value, ZSetValue};
use rdbsnap::{load_file, save};

fn save_and_load(ctx: &SnapshotContext, ks: &Keyspace) -> Keyspace {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dump.rdb");
    save(ctx, ks, &path).expect("save must succeed");

    let mut loaded = Keyspace::new(ks.database_count());
    load_file(&path, ctx, &mut loaded, None).expect("load must succeed");
    loaded
}

// ─────────────────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn string_values_round_trip() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();
    db.insert(b"plain".to_vec(), Value::String(StringValue::from(&b"hello"[..])));
    db.insert(b"int".to_vec(), Value::String(StringValue::Int(-123456)));
    db.insert(b"numeric".to_vec(), Value::String(StringValue::from(&b"987"[..])));
    db.insert(b"empty".to_vec(), Value::String(StringValue::from(&b""[..])));
    db.insert(
        b"binary".to_vec(),
        Value::String(StringValue::Bytes(vec![0u8, 255, 1, 254, 2])),
    );
    db.insert(
        b"long".to_vec(),
        Value::String(StringValue::Bytes(b"abcdef".repeat(100))),
    );

    let loaded = save_and_load(&ctx, &ks);
    let db = loaded.database(0).unwrap();
    assert_eq!(db.len(), 6);
    assert_eq!(db.get(b"plain").unwrap().as_string_bytes().unwrap(), b"hello");
    assert_eq!(
        db.get(b"int").unwrap(),
        &Value::String(StringValue::Int(-123456))
    );
    // Numeric text comes back in the integer representation.
    assert_eq!(
        db.get(b"numeric").unwrap(),
        &Value::String(StringValue::Int(987))
    );
    assert_eq!(db.get(b"empty").unwrap().as_string_bytes().unwrap(), b"");
    assert_eq!(
        db.get(b"binary").unwrap().as_string_bytes().unwrap(),
        vec![0u8, 255, 1, 254, 2]
    );
    assert_eq!(
        db.get(b"long").unwrap().as_string_bytes().unwrap(),
        b"abcdef".repeat(100)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Collections, both representations
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn lists_round_trip_in_both_forms() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();

    db.insert(
        b"packed-list".to_vec(),
        Value::List(ListValue::Packed(packed::build([
            b"a".as_slice(),
            b"bb",
            b"ccc",
        ]))),
    );
    let big: Vec<StringValue> = (0..500)
        .map(|i| StringValue::Bytes(format!("element-{}", i).into_bytes()))
        .collect();
    db.insert(b"seq-list".to_vec(), Value::List(ListValue::Seq(big)));

    let loaded = save_and_load(&ctx, &ks);
    let db_in = ks.database(0).unwrap();
    let db_out = loaded.database(0).unwrap();

    assert_eq!(
        db_out.get(b"packed-list").unwrap().list_elements(),
        db_in.get(b"packed-list").unwrap().list_elements()
    );
    // 500 entries exceed the default packed threshold: stays expanded.
    assert!(matches!(
        db_out.get(b"seq-list").unwrap(),
        Value::List(ListValue::Seq(_))
    ));
    assert_eq!(
        db_out.get(b"seq-list").unwrap().list_elements(),
        db_in.get(b"seq-list").unwrap().list_elements()
    );
}

#[test]
fn sets_round_trip_in_both_forms() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();

    db.insert(
        b"ints".to_vec(),
        Value::Set(SetValue::PackedInt(intset::build(&[3, 1, 2, -9]))),
    );
    let mut members = HashSet::new();
    for word in ["alpha", "beta", "gamma"] {
        members.insert(word.as_bytes().to_vec());
    }
    db.insert(b"words".to_vec(), Value::Set(SetValue::Members(members)));

    let loaded = save_and_load(&ctx, &ks);
    let db_in = ks.database(0).unwrap();
    let db_out = loaded.database(0).unwrap();

    assert_eq!(
        db_out.get(b"ints").unwrap().set_members(),
        db_in.get(b"ints").unwrap().set_members()
    );
    assert!(matches!(
        db_out.get(b"ints").unwrap(),
        Value::Set(SetValue::PackedInt(_))
    ));
    assert_eq!(
        db_out.get(b"words").unwrap().set_members(),
        db_in.get(b"words").unwrap().set_members()
    );
}

#[test]
fn zsets_round_trip_with_special_scores() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();
    db.insert(
        b"scores".to_vec(),
        Value::ZSet(ZSetValue::Scored(vec![
            (b"low".to_vec(), -1.5),
            (b"mid".to_vec(), 0.0),
            (b"high".to_vec(), 1e12),
            (b"up".to_vec(), f64::INFINITY),
            (b"down".to_vec(), f64::NEG_INFINITY),
        ])),
    );

    let loaded = save_and_load(&ctx, &ks);
    let pairs = loaded
        .database(0)
        .unwrap()
        .get(b"scores")
        .unwrap()
        .zset_pairs()
        .unwrap();
    let expected = ks
        .database(0)
        .unwrap()
        .get(b"scores")
        .unwrap()
        .zset_pairs()
        .unwrap();
    assert_eq!(pairs, expected);
}

#[test]
fn hashes_round_trip_in_both_forms() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();

    let mut small = HashMap::new();
    small.insert(b"field".to_vec(), b"value".to_vec());
    db.insert(b"small".to_vec(), Value::Hash(HashValue::Map(small)));

    let mut big = HashMap::new();
    for i in 0..300 {
        big.insert(
            format!("f{}", i).into_bytes(),
            format!("v{}", i).into_bytes(),
        );
    }
    db.insert(b"big".to_vec(), Value::Hash(HashValue::Map(big)));

    let loaded = save_and_load(&ctx, &ks);
    let db_in = ks.database(0).unwrap();
    let db_out = loaded.database(0).unwrap();

    // Under threshold: loads packed. Over it: stays a map.
    assert!(matches!(
        db_out.get(b"small").unwrap(),
        Value::Hash(HashValue::Packed(_))
    ));
    assert!(matches!(
        db_out.get(b"big").unwrap(),
        Value::Hash(HashValue::Map(_))
    ));
    for key in [&b"small"[..], b"big"] {
        assert_eq!(
            db_out.get(key).unwrap().hash_pairs(),
            db_in.get(key).unwrap().hash_pairs()
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiple databases, expiry, config variants
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn multiple_databases_keep_their_sections() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(8);
    for i in [0u32, 3, 7] {
        ks.database_mut(i).unwrap().insert(
            format!("key-{}", i).into_bytes(),
            Value::String(StringValue::Int(i as i64)),
        );
    }

    let loaded = save_and_load(&ctx, &ks);
    for i in [0u32, 3, 7] {
        assert_eq!(
            loaded
                .database(i)
                .unwrap()
                .get(format!("key-{}", i).as_bytes())
                .unwrap(),
            &Value::String(StringValue::Int(i as i64))
        );
    }
    for i in [1u32, 2, 4, 5, 6] {
        assert!(loaded.database(i).unwrap().is_empty());
    }
}

#[test]
fn future_expiry_survives_the_trip() {
    let mut ctx = SnapshotContext::default();
    ctx.clock_ms = || 1_000;
    let mut ks = Keyspace::new(1);
    let db = ks.database_mut(0).unwrap();
    db.insert(b"session".to_vec(), Value::String(StringValue::from(&b"live"[..])));
    db.set_expiry(b"session", 999_999);
    db.insert(b"forever".to_vec(), Value::String(StringValue::from(&b"keep"[..])));

    let loaded = save_and_load(&ctx, &ks);
    let db = loaded.database(0).unwrap();
    assert_eq!(db.expiry_ms(b"session"), Some(999_999));
    assert_eq!(db.expiry_ms(b"forever"), None);
    assert_eq!(db.len(), 2);
}

#[test]
fn round_trip_without_compression_or_checksum() {
    let config = Config {
        compression: false,
        checksum: false,
        ..Config::default()
    };
    let ctx = SnapshotContext::new(config);
    let mut ks = Keyspace::new(1);
    ks.database_mut(0).unwrap().insert(
        b"blob".to_vec(),
        Value::String(StringValue::Bytes(b"x".repeat(500))),
    );

    let loaded = save_and_load(&ctx, &ks);
    assert_eq!(
        loaded
            .database(0)
            .unwrap()
            .get(b"blob")
            .unwrap()
            .as_string_bytes()
            .unwrap(),
        b"x".repeat(500)
    );
}

#[test]
fn a_larger_mixed_keyspace_round_trips() {
    let ctx = SnapshotContext::default();
    let mut ks = Keyspace::new(2);
    let db = ks.database_mut(0).unwrap();
    for i in 0..1000 {
        db.insert(
            format!("string:{}", i).into_bytes(),
            Value::String(StringValue::Bytes(format!("payload number {}", i).into_bytes())),
        );
    }
    let db1 = ks.database_mut(1).unwrap();
    db1.insert(
        b"list".to_vec(),
        Value::List(ListValue::Seq(
            (0..50).map(|i| StringValue::Int(i)).collect(),
        )),
    );
    db1.insert(
        b"zset".to_vec(),
        Value::ZSet(ZSetValue::Scored(
            (0..50)
                .map(|i| (format!("m{}", i).into_bytes(), i as f64 / 3.0))
                .collect(),
        )),
    );

    let loaded = save_and_load(&ctx, &ks);
    assert_eq!(loaded.database(0).unwrap().len(), 1000);
    assert_eq!(
        loaded.database(1).unwrap().get(b"list").unwrap().list_elements(),
        ks.database(1).unwrap().get(b"list").unwrap().list_elements()
    );
    assert_eq!(
        loaded.database(1).unwrap().get(b"zset").unwrap().zset_pairs(),
        ks.database(1).unwrap().get(b"zset").unwrap().zset_pairs()
    );
}

#[test]
fn empty_keyspace_round_trips_to_empty() {
    let ctx = SnapshotContext::default();
    let ks = Keyspace::new(4);
    let loaded = save_and_load(&ctx, &ks);
    assert_eq!(loaded.key_count(), 0);
}
