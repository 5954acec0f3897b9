//! Schema-driven parsing layer
//!
//! Maps a target shape onto the token stream: aggregate shapes read msgpack
//! maps with duplicate/unknown/missing key detection, ordered sequences read
//! arrays with length checks, scalars are range-checked, optionals treat
//! `nil` as absence, and enumerations match a string against known names.

use crate::reader::{Reader, Token};
use crate::{MsgpackError, Result};

// ================================================================================================
// Scalar helpers
// ================================================================================================

/// Read a UTF-8 string from a `str` or `bin` token.
pub fn read_str<'a>(r: &mut Reader<'a>) -> Result<&'a str> {
    let bytes = match r.next()? {
        Token::Str(b) | Token::Bin(b) => b,
        other => return Err(type_mismatch("string", &other)),
    };
    std::str::from_utf8(bytes).map_err(|_| MsgpackError::InvalidFormat("string is not valid UTF-8".into()))
}

pub fn read_bool(r: &mut Reader<'_>) -> Result<bool> {
    match r.next()? {
        Token::Bool(v) => Ok(v),
        other => Err(type_mismatch("bool", &other)),
    }
}

pub fn read_u64(r: &mut Reader<'_>) -> Result<u64> {
    match r.next()? {
        Token::Uint(v) => Ok(v),
        Token::Int(v) if v >= 0 => Ok(v as u64),
        Token::Int(v) => Err(MsgpackError::Overflow { value: v as i128 }),
        other => Err(type_mismatch("integer", &other)),
    }
}

pub fn read_u32(r: &mut Reader<'_>) -> Result<u32> {
    let v = read_u64(r)?;
    u32::try_from(v).map_err(|_| MsgpackError::Overflow { value: v as i128 })
}

pub fn read_i64(r: &mut Reader<'_>) -> Result<i64> {
    match r.next()? {
        Token::Int(v) => Ok(v),
        Token::Uint(v) => i64::try_from(v).map_err(|_| MsgpackError::Overflow { value: v as i128 }),
        other => Err(type_mismatch("integer", &other)),
    }
}

/// Read an `f64`, widening an `f32` token.
pub fn read_f64(r: &mut Reader<'_>) -> Result<f64> {
    match r.next()? {
        Token::F64(v) => Ok(v),
        Token::F32(v) => Ok(v as f64),
        other => Err(type_mismatch("float", &other)),
    }
}

/// Read an optional value: `nil` yields `None`, anything else is parsed by
/// `parse` against the token stream.
pub fn read_opt<'a, T>(r: &mut Reader<'a>, parse: impl FnOnce(&mut Reader<'a>) -> Result<T>) -> Result<Option<T>> {
    // Peek by cloning position state: Reader is a plain cursor, so probing
    // the marker byte means re-reading on the non-nil path. Cheapest correct
    // form: decode nil tentatively via a scratch reader.
    let mut probe = Reader::new_at(r.source(), r.position());
    if matches!(probe.next()?, Token::Nil) {
        r.skip_value()?;
        return Ok(None);
    }
    parse(r).map(Some)
}

/// Match a string token against the known names of an enumeration.
pub fn read_enum<'a, T: Copy>(r: &mut Reader<'a>, variants: &[(&str, T)]) -> Result<T> {
    let name = read_str(r)?;
    variants
        .iter()
        .find(|(key, _)| *key == name)
        .map(|&(_, v)| v)
        .ok_or_else(|| MsgpackError::InvalidEnumKey(name.to_string()))
}

// ================================================================================================
// Aggregate helpers
// ================================================================================================

/// Read an array header of any length.
pub fn read_array_header(r: &mut Reader<'_>) -> Result<u32> {
    match r.next()? {
        Token::Array(n) => Ok(n),
        other => Err(type_mismatch("array", &other)),
    }
}

/// Read an array header and require an exact element count.
pub fn read_array_header_exact(r: &mut Reader<'_>, expected: u32) -> Result<()> {
    let actual = read_array_header(r)?;
    if actual != expected {
        return Err(MsgpackError::MismatchedArrayLength { expected, actual });
    }
    Ok(())
}

fn type_mismatch(expected: &str, got: &Token<'_>) -> MsgpackError {
    MsgpackError::InvalidFormat(format!("expected {expected}, got {got:?}"))
}

/// Tracks which fields of an aggregate shape have been seen.
///
/// Built over the shape's known field names; duplicate sightings and missing
/// required fields surface as their distinct error kinds.
pub struct FieldTracker {
    known: &'static [&'static str],
    seen: Vec<bool>,
}

impl FieldTracker {
    pub fn new(known: &'static [&'static str]) -> Self {
        FieldTracker {
            known,
            seen: vec![false; known.len()],
        }
    }

    /// Record a sighting of `key`. Unknown and duplicate keys are errors.
    pub fn mark(&mut self, key: &str) -> Result<()> {
        let idx = self
            .known
            .iter()
            .position(|&k| k == key)
            .ok_or_else(|| MsgpackError::UnknownField(key.to_string()))?;
        if self.seen[idx] {
            return Err(MsgpackError::DuplicateField(key.to_string()));
        }
        self.seen[idx] = true;
        Ok(())
    }

    pub fn saw(&self, key: &str) -> bool {
        self.known.iter().position(|&k| k == key).is_some_and(|i| self.seen[i])
    }

    /// Require that every field in `required` was seen.
    pub fn require(&self, required: &[&str]) -> Result<()> {
        for &key in required {
            if !self.saw(key) {
                return Err(MsgpackError::MissingField(key.to_string()));
            }
        }
        Ok(())
    }
}

/// Iterates the entries of a msgpack map, handing each key to the caller.
///
/// ```
/// use zhc_msgpack::{schema, MapReader, Reader, Writer};
///
/// let mut w = Writer::new();
/// w.map(1);
/// w.str("size");
/// w.uint(16);
/// let bytes = w.into_bytes();
///
/// let mut r = Reader::new(&bytes);
/// let mut size = 0u64;
/// let mut map = MapReader::begin(&mut r, &["size"]).unwrap();
/// while let Some(key) = map.next_key().unwrap() {
///     match key.as_str() {
///         "size" => size = schema::read_u64(map.reader()).unwrap(),
///         _ => unreachable!(),
///     }
/// }
/// map.finish(&["size"]).unwrap();
/// assert_eq!(size, 16);
/// ```
pub struct MapReader<'r, 'a> {
    reader: &'r mut Reader<'a>,
    remaining: u32,
    tracker: FieldTracker,
}

impl<'r, 'a> MapReader<'r, 'a> {
    /// Read a map header and prepare field tracking over `known` field names.
    pub fn begin(reader: &'r mut Reader<'a>, known: &'static [&'static str]) -> Result<Self> {
        let remaining = match reader.next()? {
            Token::Map(n) => n,
            other => return Err(type_mismatch("map", &other)),
        };
        Ok(MapReader {
            reader,
            remaining,
            tracker: FieldTracker::new(known),
        })
    }

    /// Advance to the next entry, returning its key. The caller must consume
    /// exactly the entry's value from [`MapReader::reader`] before the next
    /// call.
    pub fn next_key(&mut self) -> Result<Option<String>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let key = read_str(self.reader)?.to_string();
        self.tracker.mark(&key)?;
        Ok(Some(key))
    }

    pub fn reader(&mut self) -> &mut Reader<'a> {
        self.reader
    }

    /// Check required fields after the map is exhausted.
    pub fn finish(self, required: &[&str]) -> Result<()> {
        self.tracker.require(required)
    }
}

// ================================================================================================
// Tests
// ================================================================================================
