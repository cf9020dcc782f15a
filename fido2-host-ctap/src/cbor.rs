//! CBOR encoding and decoding for CTAP using cbor4ii
//!
//! CTAP2 requires canonical CBOR on the wire:
//!
//! - integer map keys ascend by encoded form, so every non-negative key
//!   precedes every negative one
//! - text map keys ascend by encoded length first, then bytewise
//!
//! [`MapBuilder`] and [`TextMapBuilder`] write the map header and keys by hand
//! in that order and splice in values that were serialized independently.
//! Responses are decoded into a dynamic [`Value`] and walked with [`MapParser`]
//! and the `as_*` helpers, which turn every shape mismatch into a
//! [`CodecError`] instead of panicking.

use crate::error::{CodecError, Result};

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

pub type Value = cbor4ii::core::Value;

/// Maximum CTAPHID message payload (one init + 128 continuation packets)
pub const MAX_CTAP_MESSAGE_SIZE: usize = 7609;

/// Nesting limit when scanning untrusted CBOR
const MAX_NESTING: usize = 16;

/// Fixed-size buffer implementing `Write`, sized to the largest CTAP message
pub struct StackBuffer {
    buf: [u8; MAX_CTAP_MESSAGE_SIZE],
    pos: usize,
}

impl StackBuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; MAX_CTAP_MESSAGE_SIZE],
            pos: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn clear(&mut self) {
        self.pos = 0;
    }
}

impl Write for StackBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let available = self.buf.len() - self.pos;
        if data.len() > available {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "CBOR message exceeds 7609 bytes",
            ));
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for StackBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StackBuffer {{ len: {}, cap: {} }}",
            self.pos,
            self.buf.len()
        )
    }
}

impl Default for StackBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn overflow(_: io::Error) -> CodecError {
    CodecError::Malformed("encoded message exceeds maximum CTAP size".into())
}

/// Encode a serializable value
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buffer = StackBuffer::new();
    cbor4ii::serde::to_writer(&mut buffer, value)
        .map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(buffer.to_vec())
}

/// Decode into a typed value
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    if data.is_empty() {
        return Err(CodecError::Truncated);
    }
    cbor4ii::serde::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Decode exactly one CBOR item into a dynamic [`Value`]
///
/// The item is length-checked first so that truncated input is reported as
/// [`CodecError::Truncated`] rather than a generic decode failure.
pub fn decode_value(data: &[u8]) -> Result<Value> {
    let len = item_len(data)?;
    if len != data.len() {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after CBOR item",
            data.len() - len
        )));
    }
    decode(data)
}

/// Write a CBOR head (major type + argument) in its shortest form
fn write_head<W: Write>(w: &mut W, major: u8, arg: u64) -> io::Result<()> {
    let mt = major << 5;
    if arg < 24 {
        w.write_all(&[mt | arg as u8])
    } else if arg <= u8::MAX as u64 {
        w.write_all(&[mt | 24, arg as u8])
    } else if arg <= u16::MAX as u64 {
        w.write_all(&[mt | 25])?;
        w.write_all(&(arg as u16).to_be_bytes())
    } else if arg <= u32::MAX as u64 {
        w.write_all(&[mt | 26])?;
        w.write_all(&(arg as u32).to_be_bytes())
    } else {
        w.write_all(&[mt | 27])?;
        w.write_all(&arg.to_be_bytes())
    }
}

/// Append an array header; the caller appends `len` encoded items
pub fn write_array_head(out: &mut Vec<u8>, len: usize) {
    // Writes into a Vec cannot fail
    let _ = write_head(out, 4, len as u64);
}

fn write_int<W: Write>(w: &mut W, k: i64) -> io::Result<()> {
    if k >= 0 {
        write_head(w, 0, k as u64)
    } else {
        // -1 - n
        write_head(w, 1, (-1 - k) as u64)
    }
}

/// Integer map key ordered the way its CBOR encoding sorts
///
/// Major type 0 (unsigned) sorts before major type 1 (negative), and within
/// the negatives `-1` (0x20) sorts before `-2` (0x21).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CanonicalIntKey(i64);

impl PartialOrd for CanonicalIntKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalIntKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;

        let (a, b) = (self.0, other.0);
        match (a >= 0, b >= 0) {
            (true, true) => a.cmp(&b),
            (false, false) => b.cmp(&a),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
        }
    }
}

/// Text map key ordered by encoded length, then bytewise
#[derive(Debug, Clone, PartialEq, Eq)]
struct CanonicalTextKey(String);

impl PartialOrd for CanonicalTextKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalTextKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

/// Build a canonical CBOR map with integer keys
///
/// ```
/// use fido2_host_ctap::cbor::MapBuilder;
///
/// let cbor = MapBuilder::new()
///     .insert(-1, 1)?
///     .insert(3, -25)?
///     .insert(1, 2)?
///     .build()?;
/// assert_eq!(cbor, [0xa3, 0x01, 0x02, 0x03, 0x38, 0x18, 0x20, 0x01]);
/// # Ok::<(), fido2_host_ctap::CodecError>(())
/// ```
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: BTreeMap<CanonicalIntKey, Vec<u8>>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a serializable value; a repeated key replaces the earlier value
    pub fn insert<T: Serialize>(self, key: i64, value: T) -> Result<Self> {
        let encoded = encode(&value)?;
        Ok(self.insert_raw(key, encoded))
    }

    pub fn insert_opt<T: Serialize>(self, key: i64, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    /// Insert a CBOR byte string
    pub fn insert_bytes(self, key: i64, bytes: &[u8]) -> Result<Self> {
        self.insert(key, serde_bytes::Bytes::new(bytes))
    }

    /// Insert a value that is already CBOR-encoded (a nested canonical map)
    pub fn insert_raw(mut self, key: i64, encoded: Vec<u8>) -> Self {
        self.entries.insert(CanonicalIntKey(key), encoded);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let mut buffer = StackBuffer::new();
        write_head(&mut buffer, 5, self.entries.len() as u64).map_err(overflow)?;
        for (key, value) in self.entries {
            write_int(&mut buffer, key.0).map_err(overflow)?;
            buffer.write_all(&value).map_err(overflow)?;
        }
        Ok(buffer.to_vec())
    }
}

/// Build a canonical CBOR map with text keys (rp, user, options, extensions)
#[derive(Debug, Default)]
pub struct TextMapBuilder {
    entries: BTreeMap<CanonicalTextKey, Vec<u8>>,
}

impl TextMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(self, key: &str, value: T) -> Result<Self> {
        let encoded = encode(&value)?;
        Ok(self.insert_raw(key, encoded))
    }

    pub fn insert_opt<T: Serialize>(self, key: &str, value: Option<T>) -> Result<Self> {
        match value {
            Some(v) => self.insert(key, v),
            None => Ok(self),
        }
    }

    pub fn insert_bytes(self, key: &str, bytes: &[u8]) -> Result<Self> {
        self.insert(key, serde_bytes::Bytes::new(bytes))
    }

    pub fn insert_raw(mut self, key: &str, encoded: Vec<u8>) -> Self {
        self.entries.insert(CanonicalTextKey(key.to_owned()), encoded);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Result<Vec<u8>> {
        let mut buffer = StackBuffer::new();
        write_head(&mut buffer, 5, self.entries.len() as u64).map_err(overflow)?;
        for (key, value) in self.entries {
            write_head(&mut buffer, 3, key.0.len() as u64).map_err(overflow)?;
            buffer.write_all(key.0.as_bytes()).map_err(overflow)?;
            buffer.write_all(&value).map_err(overflow)?;
        }
        Ok(buffer.to_vec())
    }
}

/// Parsed CBOR map with integer keys (CTAP response bodies, COSE keys)
#[derive(Debug, Clone)]
pub struct MapParser {
    map: BTreeMap<i64, Value>,
}

impl MapParser {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_value(decode_value(data)?)
    }

    /// Non-integer keys are ignored, as CTAP reserves them for extensions
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Map(entries) = value else {
            return Err(CodecError::UnexpectedType("response map"));
        };
        let mut map = BTreeMap::new();
        for (k, v) in entries {
            if let Value::Integer(i) = k
                && let Ok(key) = i64::try_from(i)
            {
                map.insert(key, v);
            }
        }
        Ok(Self { map })
    }

    pub fn contains_key(&self, key: i64) -> bool {
        self.map.contains_key(&key)
    }

    pub fn get(&self, key: i64) -> Option<&Value> {
        self.map.get(&key)
    }

    /// Required entry
    pub fn require(&self, key: i64, field: &'static str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| CodecError::Malformed(format!("missing {field} (key {key})")))
    }

    /// Remove an entry, taking ownership of its value
    pub fn take(&mut self, key: i64) -> Option<Value> {
        self.map.remove(&key)
    }

    pub fn get_bytes(&self, key: i64, field: &'static str) -> Result<Vec<u8>> {
        as_bytes(self.require(key, field)?, field).map(<[u8]>::to_vec)
    }

    pub fn get_bytes_opt(&self, key: i64, field: &'static str) -> Result<Option<Vec<u8>>> {
        self.get(key)
            .map(|v| as_bytes(v, field).map(<[u8]>::to_vec))
            .transpose()
    }

    pub fn get_int(&self, key: i64, field: &'static str) -> Result<i64> {
        as_int(self.require(key, field)?, field)
    }

    pub fn get_int_opt(&self, key: i64, field: &'static str) -> Result<Option<i64>> {
        self.get(key).map(|v| as_int(v, field)).transpose()
    }

    pub fn get_text_opt(&self, key: i64, field: &'static str) -> Result<Option<String>> {
        self.get(key)
            .map(|v| as_text(v, field).map(str::to_owned))
            .transpose()
    }

    pub fn get_bool_opt(&self, key: i64, field: &'static str) -> Result<Option<bool>> {
        self.get(key).map(|v| as_bool(v, field)).transpose()
    }
}

pub fn as_bytes<'a>(value: &'a Value, field: &'static str) -> Result<&'a [u8]> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

pub fn as_text<'a>(value: &'a Value, field: &'static str) -> Result<&'a str> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

pub fn as_int(value: &Value, field: &'static str) -> Result<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).map_err(|_| CodecError::UnexpectedType(field)),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

pub fn as_bool(value: &Value, field: &'static str) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

pub fn as_array<'a>(value: &'a Value, field: &'static str) -> Result<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

/// Entries of a text-keyed map; non-text keys are skipped
pub fn text_map_entries<'a>(
    value: &'a Value,
    field: &'static str,
) -> Result<impl Iterator<Item = (&'a str, &'a Value)>> {
    match value {
        Value::Map(entries) => Ok(entries.iter().filter_map(|(k, v)| match k {
            Value::Text(key) => Some((key.as_str(), v)),
            _ => None,
        })),
        _ => Err(CodecError::UnexpectedType(field)),
    }
}

/// Byte length of the first complete CBOR item in `data`
///
/// Used to find where an embedded item (the credential public key inside
/// authenticator data) ends without trusting any length the peer reports.
pub fn item_len(data: &[u8]) -> Result<usize> {
    item_end(data, 0, 0)
}

struct Head {
    major: u8,
    arg: u64,
    indefinite: bool,
    next: usize,
}

fn read_head(data: &[u8], pos: usize) -> Result<Head> {
    let initial = *data.get(pos).ok_or(CodecError::Truncated)?;
    let major = initial >> 5;
    let info = initial & 0x1f;
    let pos = pos + 1;

    let (arg, width) = match info {
        0..=23 => (info as u64, 0),
        24..=27 => {
            let width = 1usize << (info - 24);
            let end = pos.checked_add(width).ok_or(CodecError::Truncated)?;
            let bytes = data.get(pos..end).ok_or(CodecError::Truncated)?;
            let arg = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
            (arg, width)
        }
        31 => {
            return match major {
                2..=5 => Ok(Head {
                    major,
                    arg: 0,
                    indefinite: true,
                    next: pos,
                }),
                _ => Err(CodecError::Malformed(format!(
                    "indefinite length on major type {major}"
                ))),
            };
        }
        _ => {
            return Err(CodecError::Malformed(format!(
                "reserved additional info {info}"
            )));
        }
    };

    Ok(Head {
        major,
        arg,
        indefinite: false,
        next: pos + width,
    })
}

fn skip_bytes(data: &[u8], pos: usize, len: u64) -> Result<usize> {
    let len = usize::try_from(len).map_err(|_| CodecError::Truncated)?;
    let end = pos.checked_add(len).ok_or(CodecError::Truncated)?;
    if end > data.len() {
        return Err(CodecError::Truncated);
    }
    Ok(end)
}

fn is_break(data: &[u8], pos: usize) -> Result<bool> {
    Ok(*data.get(pos).ok_or(CodecError::Truncated)? == 0xff)
}

fn item_end(data: &[u8], pos: usize, depth: usize) -> Result<usize> {
    if depth > MAX_NESTING {
        return Err(CodecError::Malformed("CBOR nesting too deep".into()));
    }
    let head = read_head(data, pos)?;
    let mut pos = head.next;

    match (head.major, head.indefinite) {
        (0 | 1 | 7, false) => Ok(pos),
        (2 | 3, false) => skip_bytes(data, pos, head.arg),
        (2 | 3, true) => {
            while !is_break(data, pos)? {
                let chunk = read_head(data, pos)?;
                if chunk.major != head.major || chunk.indefinite {
                    return Err(CodecError::Malformed("bad string chunk".into()));
                }
                pos = skip_bytes(data, chunk.next, chunk.arg)?;
            }
            Ok(pos + 1)
        }
        (4 | 5, false) => {
            let per_entry = if head.major == 5 { 2 } else { 1 };
            let count = head.arg.saturating_mul(per_entry);
            let mut i = 0u64;
            while i < count {
                pos = item_end(data, pos, depth + 1)?;
                i += 1;
            }
            Ok(pos)
        }
        (4 | 5, true) => {
            while !is_break(data, pos)? {
                pos = item_end(data, pos, depth + 1)?;
                if head.major == 5 {
                    pos = item_end(data, pos, depth + 1)?;
                }
            }
            Ok(pos + 1)
        }
        (6, _) => item_end(data, pos, depth + 1),
        _ => Err(CodecError::Malformed("unexpected break".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_buffer_overflow() {
        let mut buf = StackBuffer::new();
        assert!(buf.write_all(&vec![0u8; MAX_CTAP_MESSAGE_SIZE]).is_ok());
        assert!(buf.write_all(&[0]).is_err());
        buf.clear();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_int_keys_canonical_order() {
        // COSE key inserted in scrambled order
        let cbor = MapBuilder::new()
            .insert(-3, "y")
            .unwrap()
            .insert(3, "alg")
            .unwrap()
            .insert(-1, "crv")
            .unwrap()
            .insert(1, "kty")
            .unwrap()
            .insert(-2, "x")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(cbor[0], 0xa5);
        let mut pos = 1;
        let mut keys = Vec::new();
        while pos < cbor.len() {
            keys.push(cbor[pos]);
            pos += 1;
            pos += item_len(&cbor[pos..]).unwrap();
        }
        assert_eq!(keys, vec![0x01, 0x03, 0x20, 0x21, 0x22]);
    }

    #[test]
    fn test_large_int_keys_sort_after_small() {
        let cbor = MapBuilder::new()
            .insert(0x14, 1)
            .unwrap()
            .insert(0x0a, 2)
            .unwrap()
            .insert(-25, 3)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cbor, vec![0xa3, 0x0a, 0x02, 0x14, 0x01, 0x38, 0x18, 0x03]);
    }

    #[test]
    fn test_text_keys_length_then_lexical() {
        let cbor = TextMapBuilder::new()
            .insert("name", "Example")
            .unwrap()
            .insert("id", "example.com")
            .unwrap()
            .insert("displayName", "Ex")
            .unwrap()
            .insert("up", true)
            .unwrap()
            .build()
            .unwrap();

        let value = decode_value(&cbor).unwrap();
        let keys: Vec<&str> = text_map_entries(&value, "map")
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["id", "up", "name", "displayName"]);
    }

    #[test]
    fn test_nested_raw_map() {
        let inner = TextMapBuilder::new().insert("rk", true).unwrap().build().unwrap();
        let cbor = MapBuilder::new()
            .insert_raw(7, inner)
            .insert_bytes(1, &[0xAA; 4])
            .unwrap()
            .build()
            .unwrap();

        let parser = MapParser::from_bytes(&cbor).unwrap();
        assert_eq!(parser.get_bytes(1, "hash").unwrap(), vec![0xAA; 4]);
        let options: Vec<_> = text_map_entries(parser.get(7).unwrap(), "options")
            .unwrap()
            .collect();
        assert_eq!(options.len(), 1);
        assert!(as_bool(options[0].1, "rk").unwrap());
    }

    #[test]
    fn test_parser_typed_accessors() {
        let cbor = MapBuilder::new()
            .insert(1, "fido-u2f")
            .unwrap()
            .insert(2, 8)
            .unwrap()
            .insert(3, false)
            .unwrap()
            .build()
            .unwrap();
        let parser = MapParser::from_bytes(&cbor).unwrap();

        assert_eq!(parser.get_text_opt(1, "fmt").unwrap().as_deref(), Some("fido-u2f"));
        assert_eq!(parser.get_int(2, "retries").unwrap(), 8);
        assert_eq!(parser.get_bool_opt(3, "flag").unwrap(), Some(false));
        assert_eq!(parser.get_int_opt(9, "absent").unwrap(), None);

        assert_eq!(
            parser.get_bytes(1, "fmt").unwrap_err(),
            CodecError::UnexpectedType("fmt")
        );
        assert!(matches!(
            parser.get_bytes(9, "missing").unwrap_err(),
            CodecError::Malformed(_)
        ));
    }

    #[test]
    fn test_parser_rejects_non_map() {
        let cbor = encode(&[1u8, 2, 3]).unwrap();
        assert_eq!(
            MapParser::from_bytes(&cbor).unwrap_err(),
            CodecError::UnexpectedType("response map")
        );
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&"up").unwrap(), vec![0x62, b'u', b'p']);
        assert_eq!(encode(&-25i64).unwrap(), vec![0x38, 0x18]);
        assert_eq!(
            encode(&serde_bytes::Bytes::new(&[0xAB])).unwrap(),
            vec![0x41, 0xAB]
        );
    }

    #[test]
    fn test_item_len() {
        // {1: h'0102', 2: [1, -1]}
        let data = [0xa2, 0x01, 0x42, 0x01, 0x02, 0x02, 0x82, 0x01, 0x20, 0xFF, 0xFF];
        assert_eq!(item_len(&data).unwrap(), 9);

        // indefinite array [1, 2]
        assert_eq!(item_len(&[0x9f, 0x01, 0x02, 0xff]).unwrap(), 4);

        // tagged uint 1(1000)
        assert_eq!(item_len(&[0xc1, 0x19, 0x03, 0xe8]).unwrap(), 4);
    }

    #[test]
    fn test_truncated_input() {
        assert_eq!(item_len(&[]).unwrap_err(), CodecError::Truncated);
        assert_eq!(item_len(&[0x58]).unwrap_err(), CodecError::Truncated);
        assert_eq!(item_len(&[0x45, 1, 2]).unwrap_err(), CodecError::Truncated);
        assert_eq!(item_len(&[0xa2, 0x01, 0x02]).unwrap_err(), CodecError::Truncated);
        assert_eq!(
            item_len(&[0x5b, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]).unwrap_err(),
            CodecError::Truncated
        );
        assert_eq!(decode_value(&[0xa1, 0x01]).unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(item_len(&[0x1c]), Err(CodecError::Malformed(_))));
        assert!(matches!(item_len(&[0xff]), Err(CodecError::Malformed(_))));
        assert!(matches!(
            decode_value(&[0x01, 0x02]),
            Err(CodecError::Malformed(_))
        ));

        let deep = vec![0x81u8; MAX_NESTING + 2];
        assert!(matches!(item_len(&deep), Err(CodecError::Malformed(_))));
    }
}
