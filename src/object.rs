//! Per-kind value serialization and reconstruction.
//!
//! The save side dispatches on (kind, representation): packed blobs go out
//! verbatim as one opaque string, expanded collections as a length prefix
//! followed by their elements. The wire type byte pins the representation
//! exactly; the loader never guesses.
//!
//! The load side owns the re-encoding contract: each wire form is
//! materialized into whichever in-memory representation the configured
//! thresholds call for, upgrading mid-population when an element pushes a
//! collection over a limit, and downgrading sorted sets only after the whole
//! value is in (scores arrive unsorted, so the packed decision needs the
//! final shape). The legacy field-map form is rewritten into the packed hash
//! representation the moment it is loaded.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};

use log::debug;

use crate::channel::{ByteCounter, Sink, Source};
use crate::codec::{
    load_double, load_len, load_raw_string, load_string, save_double, save_len, save_raw_string,
    save_string, TYPE_HASH, TYPE_HASH_PACKED, TYPE_HASH_ZIPMAP, TYPE_LIST, TYPE_LIST_PACKED,
    TYPE_SET, TYPE_SET_INTSET, TYPE_STRING, TYPE_ZSET, TYPE_ZSET_PACKED,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::value::{
    canonical_int, intset, packed, zipmap, HashValue, ListValue, SetValue, StringValue, Value,
    ZSetValue,
};

// ─────────────────────────────────────────────────────────────────────────────
// Wire type selection
// ─────────────────────────────────────────────────────────────────────────────

/// Type byte for a value in its current representation.
pub fn wire_type(value: &Value) -> u8 {
    match value {
        Value::String(_) => TYPE_STRING,
        Value::List(ListValue::Packed(_)) => TYPE_LIST_PACKED,
        Value::List(ListValue::Seq(_)) => TYPE_LIST,
        Value::Set(SetValue::PackedInt(_)) => TYPE_SET_INTSET,
        Value::Set(SetValue::Members(_)) => TYPE_SET,
        Value::ZSet(ZSetValue::Packed(_)) => TYPE_ZSET_PACKED,
        Value::ZSet(ZSetValue::Scored(_)) => TYPE_ZSET,
        Value::Hash(HashValue::Packed(_)) => TYPE_HASH_PACKED,
        Value::Hash(HashValue::Map(_)) => TYPE_HASH,
    }
}

/// True when `byte` is a value kind rather than a stream opcode.
pub fn is_value_type(byte: u8) -> bool {
    matches!(byte, TYPE_STRING..=TYPE_HASH | TYPE_HASH_ZIPMAP..=TYPE_HASH_PACKED)
}

// ─────────────────────────────────────────────────────────────────────────────
// Save
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize a value's payload (the type byte is the caller's business, via
/// [`wire_type`]).
pub fn save_value<W: Write>(
    sink: &mut Sink<W>,
    value: &Value,
    compression: bool,
) -> io::Result<()> {
    match value {
        Value::String(s) => save_string(sink, s, compression),

        // Packed representations are contiguous already; one opaque string.
        Value::List(ListValue::Packed(blob))
        | Value::ZSet(ZSetValue::Packed(blob))
        | Value::Hash(HashValue::Packed(blob))
        | Value::Set(SetValue::PackedInt(blob)) => save_raw_string(sink, blob, compression),

        Value::List(ListValue::Seq(seq)) => {
            save_len(sink, seq.len() as u32)?;
            for element in seq {
                save_string(sink, element, compression)?;
            }
            Ok(())
        }

        Value::Set(SetValue::Members(members)) => {
            save_len(sink, members.len() as u32)?;
            for member in members {
                save_raw_string(sink, member, compression)?;
            }
            Ok(())
        }

        Value::ZSet(ZSetValue::Scored(pairs)) => {
            save_len(sink, pairs.len() as u32)?;
            for (member, score) in pairs {
                save_raw_string(sink, member, compression)?;
                save_double(sink, *score)?;
            }
            Ok(())
        }

        Value::Hash(HashValue::Map(map)) => {
            save_len(sink, map.len() as u32)?;
            for (field, val) in map {
                save_raw_string(sink, field, compression)?;
                save_raw_string(sink, val, compression)?;
            }
            Ok(())
        }
    }
}

/// On-disk size of a value's payload, computed by running the save path
/// against a counting sink.
pub fn saved_value_len(value: &Value, compression: bool) -> io::Result<u64> {
    let mut probe = Sink::new(ByteCounter::new(), false);
    save_value(&mut probe, value, compression)?;
    Ok(probe.get_ref().count())
}

// ─────────────────────────────────────────────────────────────────────────────
// Load
// ─────────────────────────────────────────────────────────────────────────────

/// Reconstruct a value of the given wire type, choosing the in-memory
/// representation per the configured thresholds.
pub fn load_value<R: Read>(src: &mut Source<R>, type_byte: u8, config: &Config) -> Result<Value> {
    match type_byte {
        TYPE_STRING => {
            let s = match load_string(src)? {
                StringValue::Bytes(b) => StringValue::encode(b),
                int => int,
            };
            Ok(Value::String(s))
        }
        TYPE_LIST => load_list(src, config),
        TYPE_SET => load_set(src, config),
        TYPE_ZSET => load_zset(src, config),
        TYPE_HASH => load_hash(src, config),
        TYPE_HASH_ZIPMAP | TYPE_LIST_PACKED | TYPE_SET_INTSET | TYPE_ZSET_PACKED
        | TYPE_HASH_PACKED => load_packed(src, type_byte, config),
        other => Err(Error::UnknownOpcode(other)),
    }
}

fn load_list<R: Read>(src: &mut Source<R>, config: &Config) -> Result<Value> {
    let len = load_len(src)? as usize;
    let mut list = if len > config.list_max_packed_entries {
        ListValue::Seq(Vec::with_capacity(len))
    } else {
        ListValue::Packed(packed::empty())
    };

    for _ in 0..len {
        let element = load_string(src)?;

        // A single oversized element expands the whole list.
        if let ListValue::Packed(blob) = &list {
            if element.byte_len() > config.list_max_packed_value {
                let seq = packed::entries(blob)?
                    .into_iter()
                    .map(StringValue::encode)
                    .collect();
                list = ListValue::Seq(seq);
            }
        }

        match &mut list {
            ListValue::Packed(blob) => packed::push(blob, &element.as_bytes()),
            ListValue::Seq(seq) => seq.push(match element {
                StringValue::Bytes(b) => StringValue::encode(b),
                int => int,
            }),
        }
    }
    Ok(Value::List(list))
}

fn load_set<R: Read>(src: &mut Source<R>, config: &Config) -> Result<Value> {
    let len = load_len(src)? as usize;
    let mut set = if len > config.set_max_packed_entries {
        SetValue::Members(HashSet::with_capacity(len))
    } else {
        SetValue::PackedInt(intset::empty())
    };

    for _ in 0..len {
        let element = load_string(src)?;
        let mut expand_with: Option<Vec<u8>> = None;

        match &mut set {
            SetValue::PackedInt(blob) => {
                let as_int = match &element {
                    StringValue::Int(i) => Some(*i),
                    StringValue::Bytes(b) => canonical_int(b),
                };
                match as_int {
                    Some(i) => intset::insert(blob, i),
                    // First non-integer member ends the packed-int phase.
                    None => expand_with = Some(element.as_bytes().into_owned()),
                }
            }
            SetValue::Members(members) => {
                members.insert(element.as_bytes().into_owned());
            }
        }

        if let Some(newcomer) = expand_with {
            let SetValue::PackedInt(blob) = &set else {
                unreachable!("expansion starts from the packed form")
            };
            let mut members: HashSet<Vec<u8>> = intset::values(blob)?
                .into_iter()
                .map(|i| i.to_string().into_bytes())
                .collect();
            members.insert(newcomer);
            set = SetValue::Members(members);
        }
    }
    Ok(Value::Set(set))
}

fn load_zset<R: Read>(src: &mut Source<R>, config: &Config) -> Result<Value> {
    let len = load_len(src)? as usize;
    let mut pairs = Vec::with_capacity(len);
    let mut max_element_len = 0usize;

    for _ in 0..len {
        let member = load_raw_string(src)?;
        let score = load_double(src)?;
        max_element_len = max_element_len.max(member.len());
        pairs.push((member, score));
    }

    // Scores arrive unsorted, so pack only once the full value is known.
    if pairs.len() <= config.zset_max_packed_entries
        && max_element_len <= config.zset_max_packed_value
    {
        let mut blob = packed::empty();
        for (member, score) in &pairs {
            packed::push(&mut blob, member);
            packed::push(&mut blob, &score.to_le_bytes());
        }
        Ok(Value::ZSet(ZSetValue::Packed(blob)))
    } else {
        Ok(Value::ZSet(ZSetValue::Scored(pairs)))
    }
}

fn load_hash<R: Read>(src: &mut Source<R>, config: &Config) -> Result<Value> {
    let mut remaining = load_len(src)? as usize;
    let mut hash = if remaining > config.hash_max_packed_entries {
        HashValue::Map(HashMap::with_capacity(remaining))
    } else {
        HashValue::Packed(packed::empty())
    };

    // Packed phase: stop the moment a field or value is oversized.
    while matches!(hash, HashValue::Packed(_)) && remaining > 0 {
        remaining -= 1;
        let field = load_raw_string(src)?;
        let val = load_raw_string(src)?;

        if field.len() > config.hash_max_packed_value || val.len() > config.hash_max_packed_value {
            let HashValue::Packed(blob) = &hash else {
                unreachable!("loop condition checked the packed form")
            };
            let entries = packed::entries(blob)?;
            let mut map: HashMap<Vec<u8>, Vec<u8>> = entries
                .chunks(2)
                .map(|pair| (pair[0].clone(), pair[1].clone()))
                .collect();
            map.insert(field, val);
            hash = HashValue::Map(map);
            break;
        }

        let HashValue::Packed(blob) = &mut hash else {
            unreachable!()
        };
        packed::push(blob, &field);
        packed::push(blob, &val);
    }

    // Expanded phase: whatever is left goes straight into the map.
    while remaining > 0 {
        remaining -= 1;
        let field = load_raw_string(src)?;
        let val = load_raw_string(src)?;
        let HashValue::Map(map) = &mut hash else {
            unreachable!("packed phase ended")
        };
        map.insert(field, val);
    }

    Ok(Value::Hash(hash))
}

/// Packed wire forms: one opaque string, then a representation decision.
/// Only the entry count is consulted here (an element-size scan over the
/// blob would be O(N); oversized elements get expanded by later mutations).
fn load_packed<R: Read>(src: &mut Source<R>, type_byte: u8, config: &Config) -> Result<Value> {
    let blob = load_raw_string(src)?;
    match type_byte {
        TYPE_HASH_ZIPMAP => {
            // Legacy form: rewrite into the current packed layout on sight.
            let pairs = zipmap::pairs(&blob)?;
            debug!("rewrote legacy field map with {} pairs", pairs.len());
            let max_item = pairs
                .iter()
                .map(|(f, v)| f.len().max(v.len()))
                .max()
                .unwrap_or(0);
            if pairs.len() > config.hash_max_packed_entries
                || max_item > config.hash_max_packed_value
            {
                Ok(Value::Hash(HashValue::Map(pairs.into_iter().collect())))
            } else {
                let mut rewritten = packed::empty();
                for (field, val) in &pairs {
                    packed::push(&mut rewritten, field);
                    packed::push(&mut rewritten, val);
                }
                Ok(Value::Hash(HashValue::Packed(rewritten)))
            }
        }
        TYPE_LIST_PACKED => {
            if packed::entry_count(&blob)? > config.list_max_packed_entries {
                let seq = packed::entries(&blob)?
                    .into_iter()
                    .map(StringValue::encode)
                    .collect();
                Ok(Value::List(ListValue::Seq(seq)))
            } else {
                Ok(Value::List(ListValue::Packed(blob)))
            }
        }
        TYPE_SET_INTSET => {
            if intset::len(&blob)? > config.set_max_packed_entries {
                let members = intset::values(&blob)?
                    .into_iter()
                    .map(|i| i.to_string().into_bytes())
                    .collect();
                Ok(Value::Set(SetValue::Members(members)))
            } else {
                Ok(Value::Set(SetValue::PackedInt(blob)))
            }
        }
        TYPE_ZSET_PACKED => {
            if packed::entry_count(&blob)? / 2 > config.zset_max_packed_entries {
                let entries = packed::entries(&blob)?;
                if entries.len() % 2 != 0 {
                    return Err(Error::Corrupt("scored entry stream with odd arity"));
                }
                let pairs = entries
                    .chunks(2)
                    .map(|pair| {
                        let bits: [u8; 8] = pair[1]
                            .as_slice()
                            .try_into()
                            .map_err(|_| Error::Corrupt("score entry is not eight bytes"))?;
                        Ok((pair[0].clone(), f64::from_le_bytes(bits)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::ZSet(ZSetValue::Scored(pairs)))
            } else {
                Ok(Value::ZSet(ZSetValue::Packed(blob)))
            }
        }
        TYPE_HASH_PACKED => {
            if packed::entry_count(&blob)? / 2 > config.hash_max_packed_entries {
                let entries = packed::entries(&blob)?;
                if entries.len() % 2 != 0 {
                    return Err(Error::Corrupt("field entry stream with odd arity"));
                }
                let map = entries
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect();
                Ok(Value::Hash(HashValue::Map(map)))
            } else {
                Ok(Value::Hash(HashValue::Packed(blob)))
            }
        }
        _ => Err(Error::UnknownOpcode(type_byte)),
    }
}
