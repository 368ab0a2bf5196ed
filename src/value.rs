//! In-memory value model seen by the codec.
//!
//! Five value kinds, each with two representations: an expanded form backed
//! by an ordinary collection, and a packed form backed by one contiguous
//! byte blob. Packed blobs travel through a dump verbatim, as opaque strings;
//! their internal layout belongs to this module, not to the wire format.
//! Ownership is single-writer: the save path borrows values from the
//! keyspace, the load path produces owned ones.
//!
//! The packed layouts here are deliberately simple and self-describing:
//!
//! - entry stream (`packed`): `u32 LE entry count`, then per entry a
//!   `u32 LE length` and the raw bytes. Lists store one entry per element;
//!   sorted sets and hashes store two entries per logical pair (the score
//!   entry holds the eight `f64` bits, little-endian).
//! - integer set (`intset`): `u32 LE count`, then ascending `i64 LE` values.
//! - legacy field map (`zipmap`): byte-length-prefixed field/value pairs
//!   closed by `0xFF`. Read-only; rewritten into the entry-stream form the
//!   first time it is loaded.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────────────────

/// A datastore string: opaque bytes, or an integer kept in numeric form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StringValue {
    Bytes(Vec<u8>),
    Int(i64),
}

impl StringValue {
    /// Textual form of the string (decimal digits for the integer variant).
    pub fn as_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            StringValue::Bytes(b) => Cow::Borrowed(b),
            StringValue::Int(i) => Cow::Owned(i.to_string().into_bytes()),
        }
    }

    /// Length of the textual form in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            StringValue::Bytes(b) => b.len(),
            StringValue::Int(i) => decimal_width(*i),
        }
    }

    /// Adopt raw bytes, switching to the integer form when they are the
    /// canonical decimal of an `i64` (no sign prefix on positives, no
    /// leading zeros, no surrounding noise).
    pub fn encode(bytes: Vec<u8>) -> StringValue {
        match canonical_int(&bytes) {
            Some(i) => StringValue::Int(i),
            None => StringValue::Bytes(bytes),
        }
    }
}

impl From<&[u8]> for StringValue {
    fn from(b: &[u8]) -> Self {
        StringValue::Bytes(b.to_vec())
    }
}

impl From<Vec<u8>> for StringValue {
    fn from(b: Vec<u8>) -> Self {
        StringValue::Bytes(b)
    }
}

fn decimal_width(i: i64) -> usize {
    // i64::MIN also round-trips through the string path.
    i.to_string().len()
}

/// Parse `bytes` as a canonical decimal integer, rejecting any input whose
/// re-rendering differs (leading zeros, `+`, whitespace).
pub fn canonical_int(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let v: i64 = s.parse().ok()?;
    if v.to_string().as_bytes() == bytes {
        Some(v)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Collections
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered sequence of strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ListValue {
    /// Contiguous entry-stream blob.
    Packed(Vec<u8>),
    /// Expanded element sequence.
    Seq(Vec<StringValue>),
}

/// Unordered unique strings.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// Sorted integer blob; only valid while every member is an integer.
    PackedInt(Vec<u8>),
    /// Expanded member set.
    Members(HashSet<Vec<u8>>),
}

/// Unique strings with floating-point scores.
#[derive(Debug, Clone, PartialEq)]
pub enum ZSetValue {
    /// Entry-stream blob of alternating member / score-bits entries.
    Packed(Vec<u8>),
    /// Expanded (member, score) pairs in insertion order.
    Scored(Vec<(Vec<u8>, f64)>),
}

/// Mapping from unique string fields to string values.
#[derive(Debug, Clone, PartialEq)]
pub enum HashValue {
    /// Entry-stream blob of alternating field / value entries.
    Packed(Vec<u8>),
    /// Expanded field map.
    Map(HashMap<Vec<u8>, Vec<u8>>),
}

/// A complete value as stored under one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(StringValue),
    List(ListValue),
    Set(SetValue),
    ZSet(ZSetValue),
    Hash(HashValue),
}

impl Value {
    /// True when the value is held in its packed representation.
    pub fn is_packed(&self) -> bool {
        matches!(
            self,
            Value::List(ListValue::Packed(_))
                | Value::Set(SetValue::PackedInt(_))
                | Value::ZSet(ZSetValue::Packed(_))
                | Value::Hash(HashValue::Packed(_))
        )
    }

    // Projection helpers used by tests and the dump checker. Each flattens
    // both representations of a kind into one comparable shape.

    pub fn as_string_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::String(s) => Some(s.as_bytes().into_owned()),
            _ => None,
        }
    }

    pub fn list_elements(&self) -> Option<Vec<Vec<u8>>> {
        match self {
            Value::List(ListValue::Seq(seq)) => {
                Some(seq.iter().map(|s| s.as_bytes().into_owned()).collect())
            }
            Value::List(ListValue::Packed(blob)) => packed::entries(blob).ok(),
            _ => None,
        }
    }

    pub fn set_members(&self) -> Option<Vec<Vec<u8>>> {
        let mut members = match self {
            Value::Set(SetValue::Members(m)) => m.iter().cloned().collect::<Vec<_>>(),
            Value::Set(SetValue::PackedInt(blob)) => intset::values(blob)
                .ok()?
                .into_iter()
                .map(|i| i.to_string().into_bytes())
                .collect(),
            _ => return None,
        };
        members.sort();
        Some(members)
    }

    pub fn zset_pairs(&self) -> Option<Vec<(Vec<u8>, f64)>> {
        let mut pairs = match self {
            Value::ZSet(ZSetValue::Scored(pairs)) => pairs.clone(),
            Value::ZSet(ZSetValue::Packed(blob)) => {
                let entries = packed::entries(blob).ok()?;
                if entries.len() % 2 != 0 {
                    return None;
                }
                entries
                    .chunks(2)
                    .map(|pair| {
                        let bits = <[u8; 8]>::try_from(pair[1].as_slice()).ok()?;
                        Some((pair[0].clone(), f64::from_le_bytes(bits)))
                    })
                    .collect::<Option<Vec<_>>>()?
            }
            _ => return None,
        };
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Some(pairs)
    }

    pub fn hash_pairs(&self) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut pairs = match self {
            Value::Hash(HashValue::Map(m)) => {
                m.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>()
            }
            Value::Hash(HashValue::Packed(blob)) => {
                let entries = packed::entries(blob).ok()?;
                if entries.len() % 2 != 0 {
                    return None;
                }
                entries
                    .chunks(2)
                    .map(|pair| (pair[0].clone(), pair[1].clone()))
                    .collect()
            }
            _ => return None,
        };
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Some(pairs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Packed entry stream
// ─────────────────────────────────────────────────────────────────────────────

pub mod packed {
    use super::{Error, Result};

    /// Empty blob: a zero entry count.
    pub fn empty() -> Vec<u8> {
        0u32.to_le_bytes().to_vec()
    }

    pub fn build<'a, I: IntoIterator<Item = &'a [u8]>>(entries: I) -> Vec<u8> {
        let mut blob = empty();
        for entry in entries {
            push(&mut blob, entry);
        }
        blob
    }

    /// Append one entry and bump the count header.
    pub fn push(blob: &mut Vec<u8>, entry: &[u8]) {
        let count = u32::from_le_bytes(blob[..4].try_into().unwrap());
        blob[..4].copy_from_slice(&(count + 1).to_le_bytes());
        blob.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        blob.extend_from_slice(entry);
    }

    pub fn entry_count(blob: &[u8]) -> Result<usize> {
        if blob.len() < 4 {
            return Err(Error::Corrupt("entry stream shorter than its header"));
        }
        Ok(u32::from_le_bytes(blob[..4].try_into().unwrap()) as usize)
    }

    pub fn entries(blob: &[u8]) -> Result<Vec<Vec<u8>>> {
        let count = entry_count(blob)?;
        let mut out = Vec::with_capacity(count);
        let mut pos = 4usize;
        for _ in 0..count {
            if pos + 4 > blob.len() {
                return Err(Error::Corrupt("entry stream truncated at length"));
            }
            let len = u32::from_le_bytes(blob[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > blob.len() {
                return Err(Error::Corrupt("entry stream truncated at payload"));
            }
            out.push(blob[pos..pos + len].to_vec());
            pos += len;
        }
        if pos != blob.len() {
            return Err(Error::Corrupt("entry stream has trailing bytes"));
        }
        Ok(out)
    }

    /// Longest entry in the blob; 0 for an empty one.
    pub fn max_entry_len(blob: &[u8]) -> Result<usize> {
        Ok(entries(blob)?.iter().map(Vec::len).max().unwrap_or(0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Packed integer set
// ─────────────────────────────────────────────────────────────────────────────

pub mod intset {
    use super::{Error, Result};

    pub fn empty() -> Vec<u8> {
        0u32.to_le_bytes().to_vec()
    }

    pub fn build(values: &[i64]) -> Vec<u8> {
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut blob = Vec::with_capacity(4 + sorted.len() * 8);
        blob.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
        for v in sorted {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        blob
    }

    pub fn len(blob: &[u8]) -> Result<usize> {
        if blob.len() < 4 {
            return Err(Error::Corrupt("integer set shorter than its header"));
        }
        Ok(u32::from_le_bytes(blob[..4].try_into().unwrap()) as usize)
    }

    pub fn values(blob: &[u8]) -> Result<Vec<i64>> {
        let count = len(blob)?;
        if blob.len() != 4 + count * 8 {
            return Err(Error::Corrupt("integer set size mismatch"));
        }
        let mut out = Vec::with_capacity(count);
        for chunk in blob[4..].chunks_exact(8) {
            out.push(i64::from_le_bytes(chunk.try_into().unwrap()));
        }
        Ok(out)
    }

    /// Sorted insert; duplicates are ignored (members are unique).
    pub fn insert(blob: &mut Vec<u8>, v: i64) {
        let existing = values(blob).unwrap_or_default();
        match existing.binary_search(&v) {
            Ok(_) => {}
            Err(idx) => {
                let count = existing.len() as u32 + 1;
                blob[..4].copy_from_slice(&count.to_le_bytes());
                blob.splice(4 + idx * 8..4 + idx * 8, v.to_le_bytes());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Legacy field map (read-only)
// ─────────────────────────────────────────────────────────────────────────────

pub mod zipmap {
    use super::{Error, Result};

    pub const TERMINATOR: u8 = 0xFF;

    /// Longest field or value a single-byte length can carry.
    pub const MAX_ITEM: usize = 0xFE;

    /// Decode all (field, value) pairs from a legacy field-map blob.
    pub fn pairs(blob: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        loop {
            let flen = *blob
                .get(pos)
                .ok_or(Error::Corrupt("field map missing terminator"))?;
            if flen == TERMINATOR {
                return Ok(out);
            }
            pos += 1;
            let field = take(blob, &mut pos, flen as usize)?;
            let vlen = *blob
                .get(pos)
                .ok_or(Error::Corrupt("field map truncated before value"))?;
            if vlen == TERMINATOR {
                return Err(Error::Corrupt("field map value missing"));
            }
            pos += 1;
            let value = take(blob, &mut pos, vlen as usize)?;
            out.push((field, value));
        }
    }

    /// Encode pairs in the legacy layout. Only tests and migration tooling
    /// build these; the writer never emits this form.
    pub fn build(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        let mut blob = Vec::new();
        for (field, value) in pairs {
            assert!(field.len() <= MAX_ITEM && value.len() <= MAX_ITEM);
            blob.push(field.len() as u8);
            blob.extend_from_slice(field);
            blob.push(value.len() as u8);
            blob.extend_from_slice(value);
        }
        blob.push(TERMINATOR);
        blob
    }

    fn take(blob: &[u8], pos: &mut usize, len: usize) -> Result<Vec<u8>> {
        if *pos + len > blob.len() {
            return Err(Error::Corrupt("field map item overruns blob"));
        }
        let item = blob[*pos..*pos + len].to_vec();
        *pos += len;
        Ok(item)
    }
}
