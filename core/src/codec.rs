//! Event codec: the self-describing payload `Value` plus length-delimited
//! framing over a `TcpStream` (spec §2 "Event Codec", §6 wire protocol).
//!
//! Wire shape: a 4-byte big-endian length prefix followed by a `bincode`
//! encoding of the frame. `Value` is the payload's key/value map type;
//! `Frame` is the full `[client_id, event_kind, payload]` envelope.

use std::collections::BTreeMap;
use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Hard ceiling on a single frame's encoded size, guarding against a
/// corrupt or malicious length prefix causing an unbounded allocation.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(u32),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A self-describing value for event payloads. Empty payload is
/// represented as `Value::Nil` (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn map_get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// One `[client_id, event_kind, payload]` envelope (spec §6, Client->Server
/// frame). `client_id` is empty for frames with no originating connection
/// (not used on the wire in that direction, but kept uniform for the
/// in-process Server->Observer frame which also carries it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub client_id: String,
    pub event_kind: String,
    pub payload: Value,
}

impl Frame {
    pub fn new(client_id: impl Into<String>, event_kind: impl Into<String>, payload: Value) -> Self {
        Self {
            client_id: client_id.into(),
            event_kind: event_kind.into(),
            payload,
        }
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Carry a structured payload (a `RunContext`, a `CampaignSpec`, ...) inside
/// a `Value::Bytes` as JSON. `Value` stays the uniform wire envelope (spec
/// §6) without needing a variant per domain struct.
pub fn to_json_value<T: Serialize>(value: &T) -> CodecResult<Value> {
    let bytes = serde_json::to_vec(value).map_err(|e| CodecError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    Ok(Value::Bytes(bytes))
}

pub fn from_json_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    match value {
        Value::Bytes(bytes) => {
            serde_json::from_slice(bytes).map_err(|e| CodecError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
        }
        _ => Err(CodecError::Io(io::Error::new(io::ErrorKind::InvalidData, "expected Value::Bytes for a JSON payload"))),
    }
}

/// Write one length-delimited frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(w: &mut W, frame: &Frame) -> CodecResult<()> {
    let bytes = frame.encode()?;
    let len = bytes.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(len));
    }
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(&bytes).await?;
    w.flush().await?;
    Ok(())
}

/// Read one length-delimited frame from an async reader. Returns `Ok(None)`
/// on a clean EOF before any bytes of the next frame arrive (the worker's
/// "empty reply => server dead" case, spec §4.4).
pub async fn read_frame<R: AsyncReadExt + Unpin>(r: &mut R) -> CodecResult<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(Some(Frame::decode(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrips_every_value_variant() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("b".to_string(), Value::Array(vec![Value::Bool(true), Value::Nil]));
        let frame = Frame::new("client-1", "run:start", Value::Map(map));

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded.client_id, "client-1");
        assert_eq!(decoded.event_kind, "run:start");
        assert_eq!(decoded.payload, frame.payload);
    }

    #[tokio::test]
    async fn read_frame_eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[test]
    fn json_value_roundtrips_a_struct() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Example {
            name: String,
            count: u32,
        }
        let original = Example { name: "g".to_string(), count: 3 };
        let value = to_json_value(&original).unwrap();
        let decoded: Example = from_json_value(&value).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn nil_represents_empty_payload() {
        let frame = Frame::new("", "server:ping", Value::Nil);
        let bytes = frame.encode().unwrap();
        let back = Frame::decode(&bytes).unwrap();
        assert_eq!(back.payload, Value::Nil);
    }
}
