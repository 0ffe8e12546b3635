//! # Typed encode/decode pairs
//!
//! `Pack` and `Unpack` let composite records be built by sequencing the
//! primitive writes of [`Encoder`] and reads of [`Decoder`].
//!
//! `Option<T>` is a presence byte followed by the value. Nullable strings,
//! byte runs and arrays use the `-1` length sentinel instead; reach for
//! [`Encoder::opt_str`] and friends for those.

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use uuid::Uuid;

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;

/// A value that can be written to an [`Encoder`].
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// A value that can be read from a [`Decoder`].
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;
}

/// Encodes a single value into a fresh buffer.
pub fn to_bytes<T: Pack + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    value.pack(&mut enc)?;
    Ok(enc.into_bytes())
}

/// Decodes a single value, rejecting trailing bytes.
pub fn from_bytes<T: Unpack>(bytes: &[u8]) -> Result<T> {
    let mut dec = Decoder::new(bytes);
    let value = T::unpack(&mut dec)?;
    dec.finish()?;
    Ok(value)
}

macro_rules! scalar {
    ($ty:ty, $method:ident) => {
        impl Pack for $ty {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                enc.$method(*self);
                Ok(())
            }
        }

        impl Unpack for $ty {
            fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                dec.$method()
            }
        }
    };
}

scalar!(bool, bool);
scalar!(u8, u8);
scalar!(u16, u16);
scalar!(u32, u32);
scalar!(i32, i32);
scalar!(i64, i64);
scalar!(f32, f32);
scalar!(f64, f64);

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.str(self) }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.str().map(str::to_owned) }
}

impl Pack for Uuid {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.guid(self);
        Ok(())
    }
}

impl Unpack for Uuid {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.guid() }
}

impl Pack for TimeDelta {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.time_span(self) }
}

impl Unpack for TimeDelta {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.time_span() }
}

impl Pack for DateTime<Utc> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { enc.date_time(self) }
}

impl Unpack for DateTime<Utc> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> { dec.date_time() }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Some(v) => {
                enc.bool(true);
                v.pack(enc)
            }
            None => {
                enc.bool(false);
                Ok(())
            }
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        match dec.bool()? {
            true => T::unpack(dec).map(Some),
            false => Ok(None),
        }
    }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.count(self.len())?;
        for item in self {
            item.pack(enc)?;
        }
        Ok(())
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> { self.as_slice().pack(enc) }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let len = dec.count()?.ok_or(Error::UnexpectedNull)?;
        // Each item occupies at least one byte; cap the reservation by what is left.
        let mut out = Vec::with_capacity(len.min(dec.remaining()));
        for _ in 0..len {
            out.push(T::unpack(dec)?);
        }
        Ok(out)
    }
}

/// Nullable array: `None` is written as the `-1` count sentinel.
pub fn pack_opt_array<T: Pack>(enc: &mut Encoder, items: Option<&[T]>) -> Result<()> {
    match items {
        Some(items) => items.pack(enc),
        None => {
            enc.null_count();
            Ok(())
        }
    }
}

/// Reads a nullable array written by [`pack_opt_array`].
pub fn unpack_opt_array<T: Unpack>(dec: &mut Decoder<'_>) -> Result<Option<Vec<T>>> {
    let Some(len) = dec.count()? else { return Ok(None) };
    let mut out = Vec::with_capacity(len.min(dec.remaining()));
    for _ in 0..len {
        out.push(T::unpack(dec)?);
    }
    Ok(Some(out))
}
