//! # Answers
//!
//! The payload of an `-ans` frame. The frame's id echoes the id of the message
//! being answered; the payload carries a status code and optional data.
//!
//! ## Wire Format
//! `[code: i32][dataLen: i32][data: dataLen]`, `dataLen == -1` for no data.

use bytes::Bytes;
use ownpack::Decoder;
use ownpack::Encoder;

use crate::error::Result;
use crate::error::RpcError;

/// Status of an answered message.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnswerCode {
    /// The message was accepted.
    Ok = 0,
    /// The topic is not handled on the answering side.
    Unsupported = 1,
    /// The answering side failed while handling the message.
    Failed = 2,
}

impl AnswerCode {
    pub fn from_i32(code: i32) -> Result<Self> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Unsupported),
            2 => Ok(Self::Failed),
            other => Err(RpcError::UnknownAnswerCode(other)),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// A decoded answer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub code: AnswerCode,
    pub data: Option<Bytes>,
}

impl Answer {
    pub fn ok() -> Self {
        Self { code: AnswerCode::Ok, data: None }
    }

    pub fn ok_with(data: Bytes) -> Self {
        Self { code: AnswerCode::Ok, data: Some(data) }
    }

    pub fn failed(code: AnswerCode) -> Self {
        Self { code, data: None }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.i32(self.code as i32);
        enc.bytes(self.data.as_deref())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(Bytes::from(enc.into_bytes()))
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let code = AnswerCode::from_i32(dec.i32()?)?;
        let data = dec.bytes()?.map(Bytes::copy_from_slice);
        Ok(Self { code, data })
    }

    /// Decodes an answer from a frame payload. A missing payload is a bare `Ok`.
    pub fn from_payload(payload: Option<&[u8]>) -> Result<Self> {
        let Some(bytes) = payload else { return Ok(Self::ok()) };
        let mut dec = Decoder::new(bytes);
        let answer = Self::decode(&mut dec)?;
        dec.finish()?;
        Ok(answer)
    }
}
