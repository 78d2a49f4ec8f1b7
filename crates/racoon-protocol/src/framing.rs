//! Length-prefixed frames.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```
//!
//! Readers never consume more than one frame. The forwarding channel relies
//! on this: a descriptor-carrying byte may directly follow a frame and must
//! be left in the socket for `recvmsg`.

use std::io::{ErrorKind, Read, Write};

use serde::{Serialize, de::DeserializeOwned};

use crate::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

fn check_len(len: usize) -> ProtocolResult<u32> {
    match u32::try_from(len) {
        Ok(len) if len <= MAX_FRAME_SIZE => Ok(len),
        _ => Err(ProtocolError::FrameTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        }),
    }
}

/// Serializes `message` into a complete frame.
pub fn encode_frame<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    let len = check_len(json.len())?;

    let mut frame = Vec::with_capacity(4 + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Parses one complete frame from `data`. Trailing bytes are ignored.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    let Some((prefix, rest)) = data.split_first_chunk::<4>() else {
        return Err(ProtocolError::Truncated {
            expected: 4,
            received: data.len(),
        });
    };

    let len = check_len(u32::from_be_bytes(*prefix) as usize)? as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if rest.len() < len {
        return Err(ProtocolError::Truncated {
            expected: 4 + len,
            received: data.len(),
        });
    }

    Ok(serde_json::from_slice(&rest[..len])?)
}

/// Reads exactly one frame from `reader`.
///
/// Returns `Ok(None)` on a clean end of stream before the length prefix.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> ProtocolResult<Option<T>> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = check_len(u32::from_be_bytes(prefix) as usize)? as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Writes one frame and flushes.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> ProtocolResult<()> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}
