//! Binary packing and unpacking of [`RpcValue`] trees.
//!
//! Every packed value is a metadata block (possibly empty) followed by the
//! value itself. Single-byte encodings cover the common small integers:
//!
//! ```text
//! 0x00..=0x3F   tiny UInt, the byte is the value
//! 0x40..=0x7F   tiny Int, the byte minus 64 is the value
//! 0x80          TERM, closes the innermost open container
//! 0x81..=0x91   metadata markers and type bytes
//! base | 0x40   homogeneous array of `base` elements
//! ```
//!
//! Containers carry no length prefix. A list, map, or imap is its elements
//! back to back, closed by one `TERM` byte. The scheme stays unambiguous
//! because no packed value begins with `0x80`: tiny integers occupy
//! `0x00..=0x7F` and every other value starts with a marker or type byte at
//! `0x81` or above. Map and imap keys are packed as plain string and
//! unsigned-integer values (tiny bytes included) so the same rule holds for
//! them.
//!
//! Unpacking distinguishes two failure modes. [`UnpackError::Incomplete`]
//! means the input ended mid-value and more bytes may repair it;
//! [`UnpackError::Malformed`] means the bytes can never decode and the
//! stream they came from is unusable.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::datetime::DateTime;
use crate::error::UnpackError;
use crate::meta::{MetaData, TAG_META_TYPE_ID, TAG_META_TYPE_NAMESPACE_ID};
use crate::value::{Array, RpcValue, Value, ValueType};
use crate::varint;

const TERM: u8 = 0x80;
const META_TYPE_ID: u8 = 0x81;
const META_TYPE_NS_ID: u8 = 0x82;
const FALSE: u8 = 0x83;
const TRUE: u8 = 0x84;
const NULL: u8 = 0x86;
const UINT: u8 = 0x87;
const INT: u8 = 0x88;
const DOUBLE: u8 = 0x89;
const BOOL: u8 = 0x8A;
const BLOB: u8 = 0x8B;
const STRING: u8 = 0x8C;
const DATETIME: u8 = 0x8D;
const LIST: u8 = 0x8E;
const MAP: u8 = 0x8F;
const IMAP: u8 = 0x90;
const META_IMAP: u8 = 0x91;

/// Bit 6 on a type byte marks a homogeneous array of the base type.
const ARRAY_FLAG: u8 = 0x40;

/// Deepest container nesting the unpacker accepts before declaring the
/// input malformed. Bounds recursion on hostile input.
const MAX_NEST_DEPTH: usize = 256;

/// Packs a value into a fresh buffer.
pub fn pack(value: &RpcValue) -> Bytes {
    let mut buf = BytesMut::new();
    pack_into(value, &mut buf);
    buf.freeze()
}

/// Packs a value, appending its bytes to `buf`.
pub fn pack_into(value: &RpcValue, buf: &mut BytesMut) {
    write_meta(value.meta(), buf);
    write_value(value.value(), buf);
}

/// Unpacks one value from the front of `input`, consuming exactly its bytes.
///
/// On success `input` is left at the first byte after the value, including
/// after the closing `TERM` of a top-level container. On error the position
/// of `input` is unspecified and the slice should be discarded.
pub fn unpack(input: &mut &[u8]) -> Result<RpcValue, UnpackError> {
    read_rpc_value(input, 0)
}

/// Unpacks one value that must span `bytes` exactly.
///
/// The caller asserts it holds the complete encoding, so "need more bytes"
/// cannot be satisfied here: truncation and trailing garbage both come back
/// as [`UnpackError::Malformed`].
pub fn unpack_exact(bytes: &[u8]) -> Result<RpcValue, UnpackError> {
    let mut input = bytes;
    let value = match read_rpc_value(&mut input, 0) {
        Ok(value) => value,
        Err(UnpackError::Incomplete) => {
            return Err(UnpackError::Malformed("value truncated"));
        }
        Err(err) => return Err(err),
    };
    if !input.is_empty() {
        return Err(UnpackError::Malformed("trailing bytes after value"));
    }
    Ok(value)
}

fn write_meta(meta: &MetaData, buf: &mut BytesMut) {
    if meta.is_empty() {
        return;
    }
    let mut rest: BTreeMap<u64, RpcValue> = BTreeMap::new();
    for (tag, value) in meta {
        match (*tag, value.value()) {
            (TAG_META_TYPE_ID, Value::UInt(id)) => {
                buf.put_u8(META_TYPE_ID);
                varint::put_uint(buf, *id);
            }
            (TAG_META_TYPE_NAMESPACE_ID, Value::UInt(id)) => {
                buf.put_u8(META_TYPE_NS_ID);
                varint::put_uint(buf, *id);
            }
            _ => {
                rest.insert(*tag, value.clone());
            }
        }
    }
    if !rest.is_empty() {
        buf.put_u8(META_IMAP);
        write_imap_body(&rest, buf);
    }
}

fn write_value(value: &Value, buf: &mut BytesMut) {
    match value {
        Value::Null => buf.put_u8(NULL),
        Value::Bool(true) => buf.put_u8(TRUE),
        Value::Bool(false) => buf.put_u8(FALSE),
        Value::Int(n) if (0..64).contains(n) => buf.put_u8(*n as u8 + 64),
        Value::Int(n) => {
            buf.put_u8(INT);
            varint::put_int(buf, *n);
        }
        Value::UInt(n) if *n < 64 => buf.put_u8(*n as u8),
        Value::UInt(n) => {
            buf.put_u8(UINT);
            varint::put_uint(buf, *n);
        }
        Value::Double(d) => {
            buf.put_u8(DOUBLE);
            buf.put_f64(*d);
        }
        Value::DateTime(dt) => {
            buf.put_u8(DATETIME);
            varint::put_int(buf, dt.epoch_msecs());
        }
        Value::Blob(bytes) => {
            buf.put_u8(BLOB);
            varint::put_uint(buf, bytes.len() as u64);
            buf.put_slice(bytes);
        }
        Value::String(s) => {
            buf.put_u8(STRING);
            varint::put_uint(buf, s.len() as u64);
            buf.put_slice(s.as_bytes());
        }
        Value::List(elems) => {
            buf.put_u8(LIST);
            for elem in elems {
                pack_into(elem, buf);
            }
            buf.put_u8(TERM);
        }
        Value::Array(arr) => {
            buf.put_u8(type_byte(arr.elem_type()) | ARRAY_FLAG);
            for elem in arr {
                write_value(elem, buf);
            }
            buf.put_u8(TERM);
        }
        Value::Map(entries) => {
            buf.put_u8(MAP);
            for (key, value) in entries {
                buf.put_u8(STRING);
                varint::put_uint(buf, key.len() as u64);
                buf.put_slice(key.as_bytes());
                pack_into(value, buf);
            }
            buf.put_u8(TERM);
        }
        Value::IMap(entries) => {
            buf.put_u8(IMAP);
            write_imap_body(entries, buf);
        }
    }
}

fn write_imap_body(entries: &BTreeMap<u64, RpcValue>, buf: &mut BytesMut) {
    for (key, value) in entries {
        if *key < 64 {
            buf.put_u8(*key as u8);
        } else {
            buf.put_u8(UINT);
            varint::put_uint(buf, *key);
        }
        pack_into(value, buf);
    }
    buf.put_u8(TERM);
}

fn type_byte(elem_type: ValueType) -> u8 {
    match elem_type {
        ValueType::Null => NULL,
        ValueType::Bool => BOOL,
        ValueType::Int => INT,
        ValueType::UInt => UINT,
        ValueType::Double => DOUBLE,
        ValueType::DateTime => DATETIME,
        ValueType::Blob => BLOB,
        ValueType::String => STRING,
        ValueType::List => LIST,
        ValueType::Map => MAP,
        ValueType::IMap => IMAP,
        // Array construction rejects array element types.
        ValueType::Array => unreachable!("array elements cannot be arrays"),
    }
}

fn read_rpc_value(input: &mut &[u8], depth: usize) -> Result<RpcValue, UnpackError> {
    if depth > MAX_NEST_DEPTH {
        return Err(UnpackError::Malformed("nesting too deep"));
    }
    let meta = read_meta(input, depth)?;
    let value = read_value(input, depth)?;
    Ok(RpcValue::new(value).with_meta(meta))
}

fn read_meta(input: &mut &[u8], depth: usize) -> Result<MetaData, UnpackError> {
    let mut meta = MetaData::new();
    loop {
        match input.first() {
            Some(&META_TYPE_ID) => {
                advance(input, 1);
                let id = varint::get_uint(input)?;
                meta.insert(TAG_META_TYPE_ID, id);
            }
            Some(&META_TYPE_NS_ID) => {
                advance(input, 1);
                let id = varint::get_uint(input)?;
                meta.insert(TAG_META_TYPE_NAMESPACE_ID, id);
            }
            Some(&META_IMAP) => {
                advance(input, 1);
                let entries = read_imap_body(input, depth)?;
                for (tag, value) in entries {
                    meta.insert(tag, value);
                }
            }
            _ => return Ok(meta),
        }
    }
}

fn read_value(input: &mut &[u8], depth: usize) -> Result<Value, UnpackError> {
    let head = take_byte(input)?;
    if head < TERM {
        // Tiny integer byte; bit 6 selects signed.
        if head & 0x40 != 0 {
            return Ok(Value::Int((head & 0x3F) as i64));
        }
        return Ok(Value::UInt(head as u64));
    }
    match head {
        TERM => return Err(UnpackError::Malformed("unexpected container termination")),
        TRUE => return Ok(Value::Bool(true)),
        FALSE => return Ok(Value::Bool(false)),
        META_TYPE_ID | META_TYPE_NS_ID | META_IMAP => {
            return Err(UnpackError::Malformed("metadata marker in value position"));
        }
        _ => {}
    }
    if head & ARRAY_FLAG != 0 {
        return read_array(head & !ARRAY_FLAG, input, depth).map(Value::Array);
    }
    match head {
        NULL => Ok(Value::Null),
        UINT => Ok(Value::UInt(varint::get_uint(input)?)),
        INT => Ok(Value::Int(varint::get_int(input)?)),
        DOUBLE => {
            if input.len() < 8 {
                return Err(UnpackError::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&input[..8]);
            advance(input, 8);
            Ok(Value::Double(f64::from_be_bytes(raw)))
        }
        DATETIME => {
            let msecs = varint::get_int(input)?;
            Ok(Value::DateTime(DateTime::from_epoch_msecs(msecs)))
        }
        BLOB => Ok(Value::Blob(read_len_prefixed(input)?)),
        STRING => {
            let bytes = read_len_prefixed(input)?;
            String::from_utf8(bytes)
                .map(Value::String)
                .map_err(|_| UnpackError::Malformed("string is not valid utf-8"))
        }
        LIST => Ok(Value::List(read_list(input, depth)?)),
        MAP => Ok(Value::Map(read_map(input, depth)?)),
        IMAP => Ok(Value::IMap(read_imap_body(input, depth)?)),
        // Booleans travel as TRUE/FALSE sentinels; the BOOL byte only ever
        // appears as an array base.
        BOOL => Err(UnpackError::Malformed("bool carried as typed payload")),
        _ => Err(UnpackError::Malformed("unrecognized type byte")),
    }
}

fn read_list(input: &mut &[u8], depth: usize) -> Result<Vec<RpcValue>, UnpackError> {
    let mut elems = Vec::new();
    loop {
        match input.first() {
            None => return Err(UnpackError::Incomplete),
            Some(&TERM) => {
                advance(input, 1);
                return Ok(elems);
            }
            Some(_) => elems.push(read_rpc_value(input, depth + 1)?),
        }
    }
}

fn read_array(base: u8, input: &mut &[u8], depth: usize) -> Result<Array, UnpackError> {
    let elem_type = match base {
        NULL => ValueType::Null,
        BOOL => ValueType::Bool,
        INT => ValueType::Int,
        UINT => ValueType::UInt,
        DOUBLE => ValueType::Double,
        DATETIME => ValueType::DateTime,
        BLOB => ValueType::Blob,
        STRING => ValueType::String,
        LIST => ValueType::List,
        MAP => ValueType::Map,
        IMAP => ValueType::IMap,
        _ => return Err(UnpackError::Malformed("invalid array element type")),
    };
    let mut arr =
        Array::new(elem_type).map_err(|_| UnpackError::Malformed("invalid array element type"))?;
    loop {
        match input.first() {
            None => return Err(UnpackError::Incomplete),
            Some(&TERM) => {
                advance(input, 1);
                return Ok(arr);
            }
            Some(&META_TYPE_ID) | Some(&META_TYPE_NS_ID) | Some(&META_IMAP) => {
                return Err(UnpackError::Malformed("metadata on array element"));
            }
            Some(_) => {
                let elem = read_value(input, depth + 1)?;
                arr.push(elem)
                    .map_err(|_| UnpackError::Malformed("array element type mismatch"))?;
            }
        }
    }
}

fn read_map(input: &mut &[u8], depth: usize) -> Result<BTreeMap<String, RpcValue>, UnpackError> {
    let mut entries = BTreeMap::new();
    loop {
        match input.first() {
            None => return Err(UnpackError::Incomplete),
            Some(&TERM) => {
                advance(input, 1);
                return Ok(entries);
            }
            Some(_) => {
                // Keys are bare string values and never carry metadata.
                let key = match read_value(input, depth + 1)? {
                    Value::String(s) => s,
                    _ => return Err(UnpackError::Malformed("map key is not a string")),
                };
                let value = read_rpc_value(input, depth + 1)?;
                if entries.insert(key, value).is_some() {
                    return Err(UnpackError::Malformed("duplicate map key"));
                }
            }
        }
    }
}

fn read_imap_body(
    input: &mut &[u8],
    depth: usize,
) -> Result<BTreeMap<u64, RpcValue>, UnpackError> {
    let mut entries = BTreeMap::new();
    loop {
        match input.first() {
            None => return Err(UnpackError::Incomplete),
            Some(&TERM) => {
                advance(input, 1);
                return Ok(entries);
            }
            Some(_) => {
                let key = match read_value(input, depth + 1)? {
                    Value::UInt(n) => n,
                    _ => return Err(UnpackError::Malformed("imap key is not unsigned")),
                };
                let value = read_rpc_value(input, depth + 1)?;
                if entries.insert(key, value).is_some() {
                    return Err(UnpackError::Malformed("duplicate imap key"));
                }
            }
        }
    }
}

/// Reads a length-prefixed byte run, checking the advertised length against
/// the remaining input before allocating for it.
fn read_len_prefixed(input: &mut &[u8]) -> Result<Vec<u8>, UnpackError> {
    let len = varint::get_uint(input)?;
    let len = usize::try_from(len).map_err(|_| UnpackError::Malformed("length overflows usize"))?;
    if input.len() < len {
        return Err(UnpackError::Incomplete);
    }
    let (bytes, rest) = input.split_at(len);
    let bytes = bytes.to_vec();
    *input = rest;
    Ok(bytes)
}

fn take_byte(input: &mut &[u8]) -> Result<u8, UnpackError> {
    match input.split_first() {
        Some((&byte, rest)) => {
            *input = rest;
            Ok(byte)
        }
        None => Err(UnpackError::Incomplete),
    }
}

fn advance(input: &mut &[u8], n: usize) {
    *input = &input[n..];
}
