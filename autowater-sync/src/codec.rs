//! Wire codec for controller frames.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a JSON body
//! with a `type` tag. Encoding is deterministic: the same frame value always
//! produces the same bytes, which is what makes resends idempotent.
//!
//! The app side uses [`encode_command`] and [`decode_frame`]; the controller
//! side (see [`crate::sim`]) uses [`decode_command`] and [`encode_frame`].

use crate::error::{DecodeError, SyncResult};
use crate::protocol::{InboundFrame, OutboundFrame, COMMAND_TYPES, FRAME_TYPES, MAX_FRAME_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

const PREFIX_LEN: usize = 4;

/// Encodes a command frame for the controller.
pub fn encode_command(frame: &OutboundFrame) -> SyncResult<Vec<u8>> {
    encode(frame)
}

/// Decodes a command frame (controller side).
pub fn decode_command(bytes: &[u8]) -> Result<OutboundFrame, DecodeError> {
    decode(bytes, COMMAND_TYPES)
}

/// Encodes a controller frame (controller side).
pub fn encode_frame(frame: &InboundFrame) -> SyncResult<Vec<u8>> {
    encode(frame)
}

/// Decodes a frame received from the controller.
pub fn decode_frame(bytes: &[u8]) -> Result<InboundFrame, DecodeError> {
    decode(bytes, FRAME_TYPES)
}

fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(DecodeError::TooLarge(body.len()).into());
    }

    let mut buf = Vec::with_capacity(PREFIX_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8], known_types: &[&str]) -> Result<T, DecodeError> {
    let body = unframe(bytes)?;

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| DecodeError::Malformed(format!("JSON decode error: {e}")))?;

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::Malformed("missing type tag".to_string()))?
        .to_string();
    if !known_types.contains(&tag.as_str()) {
        return Err(DecodeError::UnknownType(tag));
    }

    serde_json::from_value(value)
        .map_err(|e| DecodeError::Malformed(format!("invalid {tag} frame: {e}")))
}

fn unframe(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    let Some((prefix, body)) = bytes.split_first_chunk::<PREFIX_LEN>() else {
        return Err(DecodeError::Malformed(format!(
            "truncated length prefix: {} bytes",
            bytes.len()
        )));
    };

    let len = u32::from_be_bytes(*prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(DecodeError::TooLarge(len));
    }
    if body.len() != len {
        return Err(DecodeError::Malformed(format!(
            "length prefix says {len} bytes, body has {}",
            body.len()
        )));
    }
    Ok(body)
}
