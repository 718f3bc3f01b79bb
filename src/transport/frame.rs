//! Wire frames: one JSON object per line.

use bytes::{Buf, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use tokio_util::codec::Decoder;

use crate::contract::{Kind, Method};
use crate::error::{CallError, CallResult, TransportError};

/// Upper bound for a single frame, newline excluded.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Assigned by the transport; callers leave it at zero.
    #[serde(default)]
    pub id: u64,
    pub kind: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(kind: Kind, method: Method, params: Value) -> Self {
        Self {
            id: 0,
            kind: kind.as_str().to_string(),
            method: method.rpc_name().to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl RpcResponse {
    pub fn from_result(id: u64, result: CallResult<Value>) -> Self {
        match result {
            Ok(value) => Self {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                id,
                result: None,
                error: Some(err),
            },
        }
    }

    pub fn into_result(self) -> CallResult<Value> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, Some(value)) => Ok(value),
            (None, None) => Err(TransportError::Codec(format!(
                "response {} carries neither result nor error",
                self.id
            ))
            .into()),
        }
    }
}

/// Encodes a frame including its trailing newline.
pub fn encode_frame<T: Serialize>(frame: &T) -> CallResult<Bytes> {
    let mut buf = serde_json::to_vec(frame)?;
    if buf.len() > MAX_FRAME_BYTES {
        return Err(TransportError::Codec(format!(
            "frame of {} bytes exceeds the {MAX_FRAME_BYTES} byte limit",
            buf.len()
        ))
        .into());
    }
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

pub fn decode_frame<T: DeserializeOwned>(line: &[u8]) -> CallResult<T> {
    Ok(serde_json::from_slice(line)?)
}

/// Best-effort id recovery from a frame that failed to decode, so the
/// caller waiting on it can still be answered.
pub fn recover_id(line: &[u8]) -> Option<u64> {
    serde_json::from_slice::<Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

/// One line read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Raw frame bytes without the newline. Not yet checked for UTF-8 or JSON.
    Frame(Bytes),
    /// A line longer than [`MAX_FRAME_BYTES`], already thrown away.
    Oversized,
}

/// Splits a byte stream on `\n`.
///
/// Unlike `LinesCodec` it never fails on content: invalid UTF-8 and
/// oversized lines come out as items, so one bad frame cannot end the stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
    next_index: usize,
    discarding: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        match buf[self.next_index..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                if self.discarding {
                    buf.advance(end + 1);
                    self.discarding = false;
                    return Ok(Some(Line::Oversized));
                }
                let mut line = buf.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                if line.len() > MAX_FRAME_BYTES {
                    return Ok(Some(Line::Oversized));
                }
                Ok(Some(Line::Frame(line.freeze())))
            }
            None if buf.len() > MAX_FRAME_BYTES => {
                buf.clear();
                self.next_index = 0;
                self.discarding = true;
                Ok(None)
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if std::mem::take(&mut self.discarding) {
            buf.clear();
            return Ok(Some(Line::Oversized));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Line::Frame(buf.split().freeze())))
    }
}
