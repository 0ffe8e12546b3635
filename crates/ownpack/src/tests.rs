use crate::*;

use chrono::TimeZone;

// ============================================================================
//  SCALARS
// ============================================================================

#[test]
fn test_bool_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true);
    enc.bool(false);

    let bytes = enc.into_bytes();
    assert_eq!(bytes, vec![1, 0]);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.bool()?, true);
    assert_eq!(dec.bool()?, false);
    assert_eq!(dec.remaining(), 0);
    Ok(())
}

#[test]
fn test_invalid_bool_byte() {
    let mut dec = Decoder::new(&[2]);
    assert_eq!(dec.bool().unwrap_err(), Error::InvalidBool(2));
}

#[test]
fn test_integer_extremes() -> Result<()> {
    let mut enc = Encoder::new();
    enc.u16(u16::MAX);
    enc.i32(i32::MIN);
    enc.i32(i32::MAX);
    enc.i64(i64::MIN);
    enc.i64(i64::MAX);

    let bytes = enc.into_bytes();
    assert_eq!(bytes.len(), 2 + 4 + 4 + 8 + 8);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.u16()?, u16::MAX);
    assert_eq!(dec.i32()?, i32::MIN);
    assert_eq!(dec.i32()?, i32::MAX);
    assert_eq!(dec.i64()?, i64::MIN);
    assert_eq!(dec.i64()?, i64::MAX);
    dec.finish()
}

#[test]
fn test_little_endian_layout() {
    let mut enc = Encoder::new();
    enc.i32(1);
    enc.u16(0x0102);
    assert_eq!(enc.as_bytes(), &[1, 0, 0, 0, 0x02, 0x01]);
}

#[test]
fn test_float_roundtrip() -> Result<()> {
    let values32 = [0.0f32, -0.0, 0.5, f32::MAX, f32::MIN_POSITIVE, f32::INFINITY];
    let values64 = [std::f64::consts::PI, -1e300, f64::NEG_INFINITY];

    let mut enc = Encoder::new();
    for v in values32 { enc.f32(v); }
    for v in values64 { enc.f64(v); }

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    for v in values32 { assert_eq!(dec.f32()?.to_bits(), v.to_bits()); }
    for v in values64 { assert_eq!(dec.f64()?.to_bits(), v.to_bits()); }
    dec.finish()
}

#[test]
fn test_nan_keeps_bits() -> Result<()> {
    let bytes = to_bytes(&f64::NAN)?;
    let back: f64 = from_bytes(&bytes)?;
    assert!(back.is_nan());
    Ok(())
}

// ============================================================================
//  STRINGS & BYTES
// ============================================================================

#[test]
fn test_string_layout() -> Result<()> {
    let mut enc = Encoder::new();
    enc.str("hé")?;
    assert_eq!(enc.as_bytes(), &[3, 0, 0, 0, b'h', 0xC3, 0xA9]);
    Ok(())
}

#[test]
fn test_null_string_uses_sentinel() -> Result<()> {
    let mut enc = Encoder::new();
    enc.opt_str(None)?;
    enc.opt_str(Some(""))?;
    enc.opt_str(Some("song.mp3"))?;

    let bytes = enc.into_bytes();
    assert_eq!(&bytes[..4], &(-1i32).to_le_bytes());

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.opt_str()?, None);
    assert_eq!(dec.opt_str()?, Some(""));
    assert_eq!(dec.opt_str()?, Some("song.mp3"));
    dec.finish()
}

#[test]
fn test_required_string_rejects_null() {
    let bytes = (-1i32).to_le_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str().unwrap_err(), Error::UnexpectedNull);
}

#[test]
fn test_negative_length_rejected() {
    let bytes = (-7i32).to_le_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.opt_str().unwrap_err(), Error::InvalidLength(-7));
}

#[test]
fn test_invalid_utf8() {
    let mut bytes = 2i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str().unwrap_err(), Error::InvalidUtf8);
}

#[test]
fn test_truncated_string() {
    let mut bytes = 10i32.to_le_bytes().to_vec();
    bytes.extend_from_slice(b"abc");
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str().unwrap_err(), Error::UnexpectedEnd);
}

#[test]
fn test_bytes_null_vs_empty() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bytes(None)?;
    enc.bytes(Some(&[]))?;
    enc.bytes(Some(&[9, 8, 7]))?;

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.bytes()?, None);
    assert_eq!(dec.bytes()?, Some(&[][..]));
    assert_eq!(dec.bytes()?, Some(&[9u8, 8, 7][..]));
    dec.finish()
}

// ============================================================================
//  GUID & TIME
// ============================================================================

#[test]
fn test_guid_mixed_endian_layout() -> Result<()> {
    let id = uuid::Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
    let bytes = to_bytes(&id)?;
    assert_eq!(
        bytes,
        vec![0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
    );
    assert_eq!(from_bytes::<uuid::Uuid>(&bytes)?, id);
    Ok(())
}

#[test]
fn test_time_span_ticks() -> Result<()> {
    let span = chrono::TimeDelta::milliseconds(1500);
    let bytes = to_bytes(&span)?;
    assert_eq!(bytes, 15_000_000i64.to_le_bytes().to_vec());
    assert_eq!(from_bytes::<chrono::TimeDelta>(&bytes)?, span);
    Ok(())
}

#[test]
fn test_negative_time_span() -> Result<()> {
    let span = chrono::TimeDelta::milliseconds(-1500);
    let bytes = to_bytes(&span)?;
    assert_eq!(bytes, (-15_000_000i64).to_le_bytes().to_vec());
    assert_eq!(from_bytes::<chrono::TimeDelta>(&bytes)?, span);
    Ok(())
}

#[test]
fn test_date_time_epoch_offset() -> Result<()> {
    let unix_epoch = chrono::Utc.timestamp_opt(0, 0).unwrap();
    let bytes = to_bytes(&unix_epoch)?;
    assert_eq!(bytes, UNIX_EPOCH_TICKS.to_le_bytes().to_vec());

    let when = chrono::Utc.with_ymd_and_hms(2024, 2, 29, 13, 37, 1).unwrap()
        + chrono::TimeDelta::microseconds(250);
    assert_eq!(from_bytes::<chrono::DateTime<chrono::Utc>>(&to_bytes(&when)?)?, when);
    Ok(())
}

#[test]
fn test_date_time_before_unix_epoch() -> Result<()> {
    let when = chrono::Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 40).unwrap();
    assert_eq!(from_bytes::<chrono::DateTime<chrono::Utc>>(&to_bytes(&when)?)?, when);
    Ok(())
}

// ============================================================================
//  NULLABLES & ARRAYS
// ============================================================================

#[test]
fn test_nullable_presence_byte() -> Result<()> {
    assert_eq!(to_bytes(&None::<i32>)?, vec![0]);
    assert_eq!(to_bytes(&Some(5i32))?, vec![1, 5, 0, 0, 0]);

    assert_eq!(from_bytes::<Option<i32>>(&[0])?, None);
    assert_eq!(from_bytes::<Option<i32>>(&[1, 5, 0, 0, 0])?, Some(5));
    Ok(())
}

#[test]
fn test_nullable_of_string() -> Result<()> {
    let some: Option<String> = Some("artist".into());
    assert_eq!(from_bytes::<Option<String>>(&to_bytes(&some)?)?, some);
    assert_eq!(from_bytes::<Option<String>>(&to_bytes(&None::<String>)?)?, None);
    Ok(())
}

#[test]
fn test_array_roundtrip() -> Result<()> {
    let songs = vec!["a".to_string(), "".to_string(), "c".to_string()];
    let bytes = to_bytes(&songs)?;
    assert_eq!(&bytes[..4], &3i32.to_le_bytes());
    assert_eq!(from_bytes::<Vec<String>>(&bytes)?, songs);

    let empty: Vec<u16> = Vec::new();
    assert_eq!(from_bytes::<Vec<u16>>(&to_bytes(&empty)?)?, empty);
    Ok(())
}

#[test]
fn test_null_array() -> Result<()> {
    let mut enc = Encoder::new();
    pack_opt_array::<i64>(&mut enc, None)?;
    pack_opt_array(&mut enc, Some(&[1i64, -2][..]))?;

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(unpack_opt_array::<i64>(&mut dec)?, None);
    assert_eq!(unpack_opt_array::<i64>(&mut dec)?, Some(vec![1, -2]));
    dec.finish()?;

    assert_eq!(from_bytes::<Vec<i64>>(&(-1i32).to_le_bytes()).unwrap_err(), Error::UnexpectedNull);
    Ok(())
}

#[test]
fn test_huge_count_does_not_preallocate() {
    let bytes = i32::MAX.to_le_bytes();
    assert_eq!(from_bytes::<Vec<i64>>(&bytes).unwrap_err(), Error::UnexpectedEnd);
}

#[test]
fn test_trailing_bytes() {
    assert_eq!(from_bytes::<u16>(&[1, 0, 0]).unwrap_err(), Error::TrailingBytes(1));
}

// ============================================================================
//  COMPOSITE RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Track {
    id: uuid::Uuid,
    title: String,
    artist: Option<String>,
    length: chrono::TimeDelta,
    rating: Option<f32>,
}

impl Pack for Track {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.id.pack(enc)?;
        enc.str(&self.title)?;
        enc.opt_str(self.artist.as_deref())?;
        self.length.pack(enc)?;
        self.rating.pack(enc)
    }
}

impl Unpack for Track {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Track {
            id: dec.guid()?,
            title: dec.str()?.to_owned(),
            artist: dec.opt_str()?.map(str::to_owned),
            length: dec.time_span()?,
            rating: Option::unpack(dec)?,
        })
    }
}

#[test]
fn test_record_sequence() -> Result<()> {
    let tracks = vec![
        Track {
            id: uuid::Uuid::from_u128(1),
            title: "Intro".into(),
            artist: None,
            length: chrono::TimeDelta::seconds(61),
            rating: Some(4.5),
        },
        Track {
            id: uuid::Uuid::from_u128(u128::MAX),
            title: "Outro".into(),
            artist: Some("Band".into()),
            length: chrono::TimeDelta::zero(),
            rating: None,
        },
    ];

    let bytes = to_bytes(&tracks)?;
    assert_eq!(from_bytes::<Vec<Track>>(&bytes)?, tracks);
    Ok(())
}

#[test]
fn test_record_truncated_midway() -> Result<()> {
    let track = Track {
        id: uuid::Uuid::nil(),
        title: "x".into(),
        artist: Some("y".into()),
        length: chrono::TimeDelta::seconds(1),
        rating: Some(1.0),
    };
    let bytes = to_bytes(&track)?;
    for cut in 0..bytes.len() {
        assert!(from_bytes::<Track>(&bytes[..cut]).is_err(), "cut at {} decoded", cut);
    }
    Ok(())
}
