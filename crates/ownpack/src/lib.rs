//! # Ownpack
//!
//! A small, fixed-layout binary codec for the values that player instances
//! exchange over the wire.
//!
//! ## Philosophy
//!
//! - **No Tags**: Both sides know the schema. A value is just its bytes, in order.
//! - **Sentinels, not wrappers**: Nullable strings, byte runs and arrays use a
//!   length of `-1` for null. Other nullables carry a single presence byte.
//! - **Bounded**: Decoders are zero-copy, bounds-checked views and never panic
//!   on malformed input.
//!
//! ## Format
//!
//! - **Scalars**: fixed width, Little-Endian. `bool` is one byte (`0`/`1`).
//! - **Strings / Bytes**: `[Len: i32][Data: Len]`, `Len == -1` is null.
//! - **Arrays**: `[Count: i32][Item]*`, `Count == -1` is null.
//! - **Nullable<T>**: `[Present: bool][T?]`.
//! - **Guid**: 16 bytes, mixed-endian layout of `System.Guid`.
//! - **TimeSpan / DateTime**: `i64` ticks of 100ns. DateTime ticks count from
//!   `0001-01-01T00:00:00Z`.
//!
//! No framing is done here; see `ownrpc` for the message envelope.

mod pack;

#[cfg(test)]
mod tests;

pub use pack::Pack;
pub use pack::Unpack;
pub use pack::from_bytes;
pub use pack::pack_opt_array;
pub use pack::to_bytes;
pub use pack::unpack_opt_array;

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use uuid::Uuid;

/// Length prefix value used for null strings, byte runs and arrays.
pub const NULL_LEN: i32 = -1;

/// Ticks per second for TimeSpan/DateTime values.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks between `0001-01-01T00:00:00Z` and the Unix epoch.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ownpack serialization and deserialization errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A bool byte was neither `0` nor `1`.
    InvalidBool(u8),
    /// A length or count prefix was negative (and not the null sentinel).
    InvalidLength(i32),
    /// Read a null sentinel where a value was required.
    UnexpectedNull,
    /// A complete value was decoded but bytes were left over.
    TrailingBytes(usize),
    /// Blob or array length exceeds `i32::MAX`.
    TooLarge(usize),
    /// A tick count does not map onto a representable time value.
    OutOfRange,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidBool(b) => write!(f, "Invalid bool byte: {:#04x}", b),
            Error::InvalidLength(n) => write!(f, "Invalid length prefix: {}", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing bytes after value", n),
            Error::TooLarge(n) => write!(f, "Length {} exceeds i32::MAX", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Ownpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Appends values to a growable byte buffer.
///
/// Writes are infallible except for lengths that do not fit an `i32` prefix.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with default capacity.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(64) }
    }

    /// Consumes the encoder and returns the final byte vector.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns a view of the current buffer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn len_prefix(&mut self, len: usize) -> Result<()> {
        if len > i32::MAX as usize { return Err(Error::TooLarge(len)); }
        self.i32(len as i32);
        Ok(())
    }

    /// Encodes a boolean as one byte.
    pub fn bool(&mut self, v: bool) { self.buf.push(v as u8); }
    /// Encodes an unsigned 8-bit integer.
    pub fn u8(&mut self, v: u8) { self.buf.push(v); }
    /// Encodes an unsigned 16-bit integer (LE).
    pub fn u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes an unsigned 32-bit integer (LE).
    pub fn u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a signed 32-bit integer (LE).
    pub fn i32(&mut self, v: i32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a signed 64-bit integer (LE).
    pub fn i64(&mut self, v: i64) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a 32-bit float (LE).
    pub fn f32(&mut self, v: f32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Encodes a 64-bit float (LE).
    pub fn f64(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Appends bytes verbatim, without a length prefix.
    pub fn raw(&mut self, v: &[u8]) { self.buf.extend_from_slice(v); }

    /// Encodes a non-null UTF-8 string.
    pub fn str(&mut self, v: &str) -> Result<()> {
        self.len_prefix(v.len())?;
        self.buf.extend_from_slice(v.as_bytes());
        Ok(())
    }

    /// Encodes a nullable UTF-8 string; `None` writes the `-1` sentinel.
    pub fn opt_str(&mut self, v: Option<&str>) -> Result<()> {
        match v {
            Some(s) => self.str(s),
            None => { self.i32(NULL_LEN); Ok(()) }
        }
    }

    /// Encodes a nullable byte run; `None` writes the `-1` sentinel.
    pub fn bytes(&mut self, v: Option<&[u8]>) -> Result<()> {
        match v {
            Some(b) => {
                self.len_prefix(b.len())?;
                self.buf.extend_from_slice(b);
                Ok(())
            }
            None => { self.i32(NULL_LEN); Ok(()) }
        }
    }

    /// Encodes an array count. Items are written by the caller.
    pub fn count(&mut self, n: usize) -> Result<()> { self.len_prefix(n) }
    /// Encodes the null array sentinel.
    pub fn null_count(&mut self) { self.i32(NULL_LEN); }

    /// Encodes a GUID in the mixed-endian layout used by `System.Guid`.
    pub fn guid(&mut self, v: &Uuid) { self.buf.extend_from_slice(&v.to_bytes_le()); }

    /// Encodes a signed duration as 100ns ticks.
    pub fn time_span(&mut self, v: &TimeDelta) -> Result<()> {
        let ticks = v.num_seconds()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(v.subsec_nanos() / 100)))
            .ok_or(Error::OutOfRange)?;
        self.i64(ticks);
        Ok(())
    }

    /// Encodes a UTC timestamp as 100ns ticks since `0001-01-01`.
    pub fn date_time(&mut self, v: &DateTime<Utc>) -> Result<()> {
        let ticks = v.timestamp()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(v.timestamp_subsec_nanos() / 100)))
            .and_then(|t| t.checked_add(UNIX_EPOCH_TICKS))
            .ok_or(Error::OutOfRange)?;
        self.i64(ticks);
        Ok(())
    }
}

/// A zero-copy, bounds-checked cursor over a byte slice.
///
/// Reading advances the internal cursor.
///
/// # Errors
/// All read operations return `Error::UnexpectedEnd` if the buffer is exhausted.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over the slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Returns the remaining bytes in the view.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Fails with `TrailingBytes` unless the view is exhausted.
    pub fn finish(&self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let head = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buf.len() { return Err(Error::UnexpectedEnd); }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a length prefix; `None` for the null sentinel.
    fn read_len(&mut self) -> Result<Option<usize>> {
        match self.i32()? {
            NULL_LEN => Ok(None),
            n if n < 0 => Err(Error::InvalidLength(n)),
            n => Ok(Some(n as usize)),
        }
    }

    /// Decodes a bool.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::InvalidBool(b)),
        }
    }

    /// Decodes u8.
    pub fn u8(&mut self) -> Result<u8> { Ok(self.read_array::<1>()?[0]) }
    /// Decodes u16 (LE).
    pub fn u16(&mut self) -> Result<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }
    /// Decodes u32 (LE).
    pub fn u32(&mut self) -> Result<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }
    /// Decodes i32 (LE).
    pub fn i32(&mut self) -> Result<i32> { Ok(i32::from_le_bytes(self.read_array()?)) }
    /// Decodes i64 (LE).
    pub fn i64(&mut self) -> Result<i64> { Ok(i64::from_le_bytes(self.read_array()?)) }
    /// Decodes f32 (LE).
    pub fn f32(&mut self) -> Result<f32> { Ok(f32::from_le_bytes(self.read_array()?)) }
    /// Decodes f64 (LE).
    pub fn f64(&mut self) -> Result<f64> { Ok(f64::from_le_bytes(self.read_array()?)) }

    /// Reads `n` bytes verbatim.
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8]> { self.read_bytes(n) }

    /// Decodes a nullable string slice (UTF-8).
    pub fn opt_str(&mut self) -> Result<Option<&'a str>> {
        let Some(len) = self.read_len()? else { return Ok(None) };
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map(Some).map_err(|_| Error::InvalidUtf8)
    }

    /// Decodes a string slice; the null sentinel is an error.
    pub fn str(&mut self) -> Result<&'a str> {
        self.opt_str()?.ok_or(Error::UnexpectedNull)
    }

    /// Decodes a nullable byte run.
    pub fn bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.read_len()? {
            Some(len) => self.read_bytes(len).map(Some),
            None => Ok(None),
        }
    }

    /// Decodes an array count; `None` for a null array.
    pub fn count(&mut self) -> Result<Option<usize>> { self.read_len() }

    /// Decodes a GUID (mixed-endian layout).
    pub fn guid(&mut self) -> Result<Uuid> { Ok(Uuid::from_bytes_le(self.read_array()?)) }

    /// Decodes a signed duration from 100ns ticks.
    pub fn time_span(&mut self) -> Result<TimeDelta> {
        let ticks = self.i64()?;
        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        TimeDelta::new(secs, nanos).ok_or(Error::OutOfRange)
    }

    /// Decodes a UTC timestamp from 100ns ticks since `0001-01-01`.
    pub fn date_time(&mut self) -> Result<DateTime<Utc>> {
        let ticks = self.i64()?.checked_sub(UNIX_EPOCH_TICKS).ok_or(Error::OutOfRange)?;
        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos).ok_or(Error::OutOfRange)
    }
}
