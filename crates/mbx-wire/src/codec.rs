use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{WireError, WireResult};
use crate::message::{Reply, Request, MAX_FRAME};

/// Codec for registration and reply records.
///
/// Framing: `[4 bytes BE length][1 byte opcode][payload]`, where the
/// length covers the opcode byte and the payload. The opcode duplicates
/// the payload's variant tag so that a transport peer can route a frame
/// without decoding it; the two are checked against each other on decode.
pub struct Codec;

impl Codec {
    /// Encode a registration request.
    pub fn encode_request(request: &Request) -> WireResult<Vec<u8>> {
        request.validate()?;
        encode_frame(request.opcode(), request)
    }

    /// Decode a framed registration request. Returns `(request,
    /// bytes_consumed)`.
    pub fn decode_request(data: &[u8]) -> WireResult<(Request, usize)> {
        let (opcode, request, consumed): (u8, Request, usize) = decode_frame(data)?;
        if request.opcode() != opcode {
            return Err(WireError::UnexpectedOpcode(opcode));
        }
        request.validate()?;
        Ok((request, consumed))
    }

    /// Encode a reply record.
    pub fn encode_reply(reply: &Reply) -> WireResult<Vec<u8>> {
        reply.validate()?;
        encode_frame(reply.opcode(), reply)
    }

    /// Decode a framed reply record. Returns `(reply, bytes_consumed)`.
    pub fn decode_reply(data: &[u8]) -> WireResult<(Reply, usize)> {
        let (opcode, reply, consumed): (u8, Reply, usize) = decode_frame(data)?;
        if reply.opcode() != opcode {
            return Err(WireError::UnexpectedOpcode(opcode));
        }
        reply.validate()?;
        Ok((reply, consumed))
    }
}

fn encode_frame<T: Serialize>(opcode: u8, record: &T) -> WireResult<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| WireError::Serialization(e.to_string()))?;
    if payload.len() > MAX_FRAME {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME,
        });
    }
    let len = (payload.len() + 1) as u32;
    let mut buf = Vec::with_capacity(4 + 1 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(opcode);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> WireResult<(u8, T, usize)> {
    if data.len() < 5 {
        return Err(WireError::FramingError("too short".into()));
    }
    let len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    if len < 1 {
        return Err(WireError::FramingError("zero-length frame".into()));
    }
    if len - 1 > MAX_FRAME {
        return Err(WireError::FrameTooLarge {
            size: len - 1,
            max: MAX_FRAME,
        });
    }
    let total = 4 + len;
    if data.len() < total {
        return Err(WireError::FramingError(format!(
            "incomplete: have {}, need {}",
            data.len(),
            total
        )));
    }
    let opcode = data[4];
    let record: T = bincode::deserialize(&data[5..total])
        .map_err(|e| WireError::Deserialization(e.to_string()))?;
    Ok((opcode, record, total))
}
