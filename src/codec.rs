//! Wire primitives of the dump format.
//!
//! Everything in a dump reduces to five primitive shapes:
//!
//! - **length prefix** — variable width, selected by the top two bits of the
//!   first byte: `00` six-bit length, `01` fourteen-bit length, `10` 32-bit
//!   big-endian length, `11` an *encoded value* whose low six bits name a
//!   sub-type (8/16/32-bit integer, or an LZF chunk).
//! - **string** — an integer in disguise, an LZF chunk, or a raw
//!   length-prefixed byte run. The writer picks the cheapest form; the
//!   reader accepts them all.
//! - **double** — one length byte then ASCII decimal, with the three
//!   reserved lengths 253/254/255 standing for NaN, +inf, -inf.
//! - **millisecond time** — raw 8-byte little-endian signed integer.
//! - **seconds time** — legacy 4-byte little-endian integer; read only.
//!
//! Byte order is explicit at every site: length payloads are big-endian,
//! integer encodings and times are little-endian.

use std::io::{self, Read, Write};

use crate::channel::{Sink, Source};
use crate::error::{Error, Result};
use crate::lzf;
use crate::value::{canonical_int, StringValue};

// ─────────────────────────────────────────────────────────────────────────────
// Format constants
// ─────────────────────────────────────────────────────────────────────────────

/// Leading magic of every dump.
pub const MAGIC: &[u8; 5] = b"REDIS";

/// Version the writer emits (rendered as four ASCII digits after the magic).
pub const FORMAT_VERSION: u32 = 6;

/// Oldest version the reader accepts.
pub const MIN_FORMAT_VERSION: u32 = 1;

/// Versions from here on carry the trailing CRC-64.
pub const FIRST_CHECKSUM_VERSION: u32 = 5;

// Stream opcodes (single bytes that are not value kinds).
pub const OPCODE_EXPIRETIME: u8 = 0xFD;
pub const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub const OPCODE_SELECTDB: u8 = 0xFE;
pub const OPCODE_EOF: u8 = 0xFF;

// Value-kind bytes.
pub const TYPE_STRING: u8 = 0;
pub const TYPE_LIST: u8 = 1;
pub const TYPE_SET: u8 = 2;
pub const TYPE_ZSET: u8 = 3;
pub const TYPE_HASH: u8 = 4;
pub const TYPE_HASH_ZIPMAP: u8 = 9;
pub const TYPE_LIST_PACKED: u8 = 10;
pub const TYPE_SET_INTSET: u8 = 11;
pub const TYPE_ZSET_PACKED: u8 = 12;
pub const TYPE_HASH_PACKED: u8 = 13;

// Length-prefix forms (top two bits of the first byte).
const LEN_6BIT: u8 = 0;
const LEN_14BIT: u8 = 1;
const LEN_32BIT: u8 = 2;
const LEN_ENCVAL: u8 = 3;

// Encoded-value sub-types.
pub const ENC_INT8: u8 = 0;
pub const ENC_INT16: u8 = 1;
pub const ENC_INT32: u8 = 2;
pub const ENC_LZF: u8 = 3;

// Reserved double lengths.
pub const DOUBLE_NAN: u8 = 253;
pub const DOUBLE_POS_INF: u8 = 254;
pub const DOUBLE_NEG_INF: u8 = 255;

// ─────────────────────────────────────────────────────────────────────────────
// Length prefix
// ─────────────────────────────────────────────────────────────────────────────

/// Write `len` in the shortest form that fits.
pub fn save_len<W: Write>(sink: &mut Sink<W>, len: u32) -> io::Result<()> {
    if len < (1 << 6) {
        sink.write_u8((LEN_6BIT << 6) | len as u8)
    } else if len < (1 << 14) {
        sink.write_all(&[(LEN_14BIT << 6) | (len >> 8) as u8, (len & 0xFF) as u8])
    } else {
        sink.write_u8(LEN_32BIT << 6)?;
        sink.write_all(&len.to_be_bytes())
    }
}

/// A decoded length slot: a plain length, or an encoded-value sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenOrEnc {
    Len(u32),
    Enc(u8),
}

pub fn load_len_or_enc<R: Read>(src: &mut Source<R>) -> Result<LenOrEnc> {
    let first = src.read_u8()?;
    match first >> 6 {
        LEN_6BIT => Ok(LenOrEnc::Len((first & 0x3F) as u32)),
        LEN_14BIT => {
            let second = src.read_u8()?;
            Ok(LenOrEnc::Len((((first & 0x3F) as u32) << 8) | second as u32))
        }
        LEN_32BIT => {
            let mut buf = [0u8; 4];
            src.read_exact(&mut buf)?;
            Ok(LenOrEnc::Len(u32::from_be_bytes(buf)))
        }
        _ => Ok(LenOrEnc::Enc(first & 0x3F)),
    }
}

/// Load a plain length; an encoded-value slot here is a format violation.
pub fn load_len<R: Read>(src: &mut Source<R>) -> Result<u32> {
    match load_len_or_enc(src)? {
        LenOrEnc::Len(len) => Ok(len),
        LenOrEnc::Enc(_) => Err(Error::BadLengthEncoding),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Integer encodings
// ─────────────────────────────────────────────────────────────────────────────

/// Encode `value` as an ENCVAL integer slot when it fits 8, 16, or 32 bits.
/// Returns the bytes and their count, or `None` for wider values.
pub fn encode_integer(value: i64) -> Option<([u8; 5], usize)> {
    let mut buf = [0u8; 5];
    if (-(1 << 7)..1 << 7).contains(&value) {
        buf[0] = (LEN_ENCVAL << 6) | ENC_INT8;
        buf[1] = value as u8;
        Some((buf, 2))
    } else if (-(1 << 15)..1 << 15).contains(&value) {
        buf[0] = (LEN_ENCVAL << 6) | ENC_INT16;
        buf[1..3].copy_from_slice(&(value as i16).to_le_bytes());
        Some((buf, 3))
    } else if (-(1i64 << 31)..1i64 << 31).contains(&value) {
        buf[0] = (LEN_ENCVAL << 6) | ENC_INT32;
        buf[1..5].copy_from_slice(&(value as i32).to_le_bytes());
        Some((buf, 5))
    } else {
        None
    }
}

/// Read the payload of an integer ENCVAL slot, sign-extending to `i64`.
pub fn load_integer<R: Read>(src: &mut Source<R>, enc: u8) -> Result<i64> {
    match enc {
        ENC_INT8 => {
            let mut b = [0u8; 1];
            src.read_exact(&mut b)?;
            Ok(b[0] as i8 as i64)
        }
        ENC_INT16 => {
            let mut b = [0u8; 2];
            src.read_exact(&mut b)?;
            Ok(i16::from_le_bytes(b) as i64)
        }
        ENC_INT32 => {
            let mut b = [0u8; 4];
            src.read_exact(&mut b)?;
            Ok(i32::from_le_bytes(b) as i64)
        }
        other => Err(Error::UnknownOpcode(other)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strings
// ─────────────────────────────────────────────────────────────────────────────

/// Write raw bytes as a string slot, picking the cheapest form:
/// the integer encoding when the bytes are a canonical 32-bit decimal, an
/// LZF chunk when compression is on, the payload exceeds 20 bytes and the
/// compressor wins, and a plain length-prefixed run otherwise.
pub fn save_raw_string<W: Write>(
    sink: &mut Sink<W>,
    s: &[u8],
    compression: bool,
) -> io::Result<()> {
    // The longest candidate is "-2147483648" (11 bytes).
    if s.len() <= 11 {
        if let Some(v) = canonical_int(s) {
            if let Some((buf, n)) = encode_integer(v) {
                return sink.write_all(&buf[..n]);
            }
        }
    }

    // 20 bytes or less cannot recoup the chunk overhead.
    if compression && s.len() > 20 {
        if let Some(chunk) = lzf::compress(s, s.len() - 4) {
            sink.write_u8((LEN_ENCVAL << 6) | ENC_LZF)?;
            save_len(sink, chunk.len() as u32)?;
            save_len(sink, s.len() as u32)?;
            return sink.write_all(&chunk);
        }
    }

    save_len(sink, s.len() as u32)?;
    if !s.is_empty() {
        sink.write_all(s)?;
    }
    Ok(())
}

/// Write an integer held in numeric form, without re-rendering it first
/// unless it is too wide for the integer encodings.
pub fn save_integer_string<W: Write>(sink: &mut Sink<W>, value: i64) -> io::Result<()> {
    if let Some((buf, n)) = encode_integer(value) {
        sink.write_all(&buf[..n])
    } else {
        let s = value.to_string();
        save_len(sink, s.len() as u32)?;
        sink.write_all(s.as_bytes())
    }
}

/// Write a [`StringValue`] in whichever representation it already has.
pub fn save_string<W: Write>(
    sink: &mut Sink<W>,
    s: &StringValue,
    compression: bool,
) -> io::Result<()> {
    match s {
        StringValue::Int(v) => save_integer_string(sink, *v),
        StringValue::Bytes(b) => save_raw_string(sink, b, compression),
    }
}

/// Read a string slot, preserving the integer representation when the wire
/// form was an integer encoding.
pub fn load_string<R: Read>(src: &mut Source<R>) -> Result<StringValue> {
    match load_len_or_enc(src)? {
        LenOrEnc::Len(len) => {
            let mut buf = vec![0u8; len as usize];
            src.read_exact(&mut buf)?;
            Ok(StringValue::Bytes(buf))
        }
        LenOrEnc::Enc(enc @ (ENC_INT8 | ENC_INT16 | ENC_INT32)) => {
            Ok(StringValue::Int(load_integer(src, enc)?))
        }
        LenOrEnc::Enc(ENC_LZF) => {
            let clen = load_len(src)? as usize;
            let ulen = load_len(src)? as usize;
            let mut chunk = vec![0u8; clen];
            src.read_exact(&mut chunk)?;
            Ok(StringValue::Bytes(lzf::decompress(&chunk, ulen)?))
        }
        LenOrEnc::Enc(_) => Err(Error::BadLengthEncoding),
    }
}

/// Read a string slot flattened to raw bytes (integers become their decimal
/// form). Used for keys and for packed collection blobs.
pub fn load_raw_string<R: Read>(src: &mut Source<R>) -> Result<Vec<u8>> {
    Ok(load_string(src)?.as_bytes().into_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Doubles
// ─────────────────────────────────────────────────────────────────────────────

/// Write a double as length-prefixed ASCII decimal; NaN and the infinities
/// collapse into their reserved one-byte lengths.
pub fn save_double<W: Write>(sink: &mut Sink<W>, val: f64) -> io::Result<()> {
    if val.is_nan() {
        sink.write_u8(DOUBLE_NAN)
    } else if val.is_infinite() {
        sink.write_u8(if val < 0.0 { DOUBLE_NEG_INF } else { DOUBLE_POS_INF })
    } else {
        // Shortest round-trip rendering; integral doubles print without a
        // fractional part. Plain notation expands extreme magnitudes into
        // hundreds of digits, so those switch to exponent form.
        let mut s = val.to_string();
        if s.len() > 32 {
            s = format!("{:e}", val);
        }
        debug_assert!(s.len() < DOUBLE_NAN as usize);
        sink.write_u8(s.len() as u8)?;
        sink.write_all(s.as_bytes())
    }
}

pub fn load_double<R: Read>(src: &mut Source<R>) -> Result<f64> {
    match src.read_u8()? {
        DOUBLE_NEG_INF => Ok(f64::NEG_INFINITY),
        DOUBLE_POS_INF => Ok(f64::INFINITY),
        DOUBLE_NAN => Ok(f64::NAN),
        len => {
            let mut buf = vec![0u8; len as usize];
            src.read_exact(&mut buf)?;
            std::str::from_utf8(&buf)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or(Error::Corrupt("unparsable double"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Times
// ─────────────────────────────────────────────────────────────────────────────

pub fn save_millisecond_time<W: Write>(sink: &mut Sink<W>, t: i64) -> io::Result<()> {
    sink.write_all(&t.to_le_bytes())
}

pub fn load_millisecond_time<R: Read>(src: &mut Source<R>) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    src.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Legacy seconds-resolution expiry; only very old producers wrote these.
pub fn load_seconds_time<R: Read>(src: &mut Source<R>) -> io::Result<i64> {
    let mut buf = [0u8; 4];
    src.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf) as i64)
}
