//! # Transport Wire Protocol
//!
//! Decoding of the two message kinds a transport adapter delivers:
//!
//! - **Binary frames**: a fixed 12-byte header followed by the media payload.
//!
//!   | Offset | Size | Field                                  |
//!   |--------|------|----------------------------------------|
//!   | 0      | 1    | track index                            |
//!   | 1      | 1    | keyframe flag (non-zero = keyframe)    |
//!   | 2      | 8    | timestamp, big-endian milliseconds     |
//!   | 10     | 2    | output offset, big-endian milliseconds |
//!
//! - **Control messages**: JSON objects `{ "type": ..., "data": ... }`.
//!
//! Outbound commands are serialised by [`ControlCommand::to_value`].

use crate::error::{PlaybackError, Result};
use bytes::Bytes;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Size of the binary frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 12;

// ============================================================================
// Binary frames
// ============================================================================

/// One decoded media frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub track_index: u8,
    pub is_keyframe: bool,
    pub timestamp_ms: u64,
    pub output_offset_ms: u16,
    /// Encoded media payload (header stripped).
    pub data: Bytes,
}

impl MediaChunk {
    /// Decode a binary frame. The payload is sliced out without copying.
    pub fn decode(frame: Bytes) -> Result<Self> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(PlaybackError::InvalidFrame(format!(
                "frame is {} bytes, header needs {}",
                frame.len(),
                FRAME_HEADER_LEN
            )));
        }

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&frame[2..10]);

        Ok(Self {
            track_index: frame[0],
            is_keyframe: frame[1] != 0,
            timestamp_ms: u64::from_be_bytes(timestamp),
            output_offset_ms: u16::from_be_bytes([frame[10], frame[11]]),
            data: frame.slice(FRAME_HEADER_LEN..),
        })
    }
}

// ============================================================================
// Playback rate
// ============================================================================

/// Delivery rate requested from, or reported by, the server.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PlayRate {
    /// Server paces delivery itself.
    #[default]
    Auto,
    Fixed(f64),
}

impl fmt::Display for PlayRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayRate::Auto => f.write_str("auto"),
            PlayRate::Fixed(rate) => write!(f, "{}", rate),
        }
    }
}

impl Serialize for PlayRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            PlayRate::Auto => serializer.serialize_str("auto"),
            PlayRate::Fixed(rate) => serializer.serialize_f64(*rate),
        }
    }
}

impl<'de> Deserialize<'de> for PlayRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) if s == "auto" => Ok(PlayRate::Auto),
            Value::Number(n) => n
                .as_f64()
                .map(PlayRate::Fixed)
                .ok_or_else(|| de::Error::custom("play rate is not a finite number")),
            other => Err(de::Error::custom(format!("invalid play rate: {}", other))),
        }
    }
}

// ============================================================================
// Inbound control messages
// ============================================================================

/// Periodic server report of its buffer window, in milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OnTime {
    /// Server's current playback position.
    pub current: f64,
    /// First timestamp the server can still deliver.
    #[serde(default)]
    pub begin: f64,
    /// Last timestamp the server has available.
    #[serde(default)]
    pub end: f64,
    /// Estimated delivery jitter.
    #[serde(default)]
    pub jitter: f64,
    /// Track indices currently being sent.
    #[serde(default)]
    pub tracks: Vec<u32>,
    #[serde(default)]
    pub play_rate_curr: Option<PlayRate>,
}

/// Server announcement of the active track set.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TrackChange {
    #[serde(default)]
    pub codecs: Vec<String>,
    #[serde(default)]
    pub tracks: Vec<u32>,
    /// Media time, in milliseconds, at which the new tracks start.
    #[serde(default)]
    pub current: f64,
}

/// Reply to `request_codec_data`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CodecData {
    #[serde(default)]
    pub codecs: Vec<String>,
    #[serde(default)]
    pub tracks: Vec<u32>,
}

/// Acknowledgement of a `set_speed` command.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SpeedChange {
    #[serde(default)]
    pub play_rate: PlayRate,
    #[serde(default)]
    pub play_rate_prev: Option<PlayRate>,
}

/// Reply to `seek`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SeekAck {
    #[serde(default)]
    pub live_point: bool,
}

/// A parsed control message from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    OnTime(OnTime),
    Seek(SeekAck),
    Tracks(TrackChange),
    CodecData(CodecData),
    SetSpeed(SpeedChange),
    Pause { paused: bool },
    OnStop,
    Error(String),
    /// A message type this client does not interpret.
    Unknown { kind: String, data: Value },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct PauseData {
    #[serde(default = "paused_default")]
    paused: bool,
}

fn paused_default() -> bool {
    true
}

impl ControlMessage {
    /// Parse a message from its JSON text form.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::parse(value)
    }

    /// Interpret an already-parsed JSON value.
    pub fn parse(value: Value) -> Result<Self> {
        let raw: RawMessage = serde_json::from_value(value)
            .map_err(|e| PlaybackError::InvalidControlMessage(e.to_string()))?;

        let data = match raw.data {
            Value::Null => Value::Object(Default::default()),
            data => data,
        };

        let message = match raw.kind.as_str() {
            "on_time" => ControlMessage::OnTime(decode_data(&raw.kind, data)?),
            "seek" => ControlMessage::Seek(decode_data(&raw.kind, data)?),
            "tracks" => ControlMessage::Tracks(decode_data(&raw.kind, data)?),
            "codec_data" => ControlMessage::CodecData(decode_data(&raw.kind, data)?),
            "set_speed" => ControlMessage::SetSpeed(decode_data(&raw.kind, data)?),
            "pause" => {
                let pause: PauseData = decode_data(&raw.kind, data)?;
                ControlMessage::Pause {
                    paused: pause.paused,
                }
            }
            "on_stop" => ControlMessage::OnStop,
            "error" => ControlMessage::Error(error_text(data)),
            _ => ControlMessage::Unknown {
                kind: raw.kind,
                data,
            },
        };

        Ok(message)
    }

    /// The `type` discriminator this message arrived with.
    pub fn kind(&self) -> &str {
        match self {
            ControlMessage::OnTime(_) => "on_time",
            ControlMessage::Seek(_) => "seek",
            ControlMessage::Tracks(_) => "tracks",
            ControlMessage::CodecData(_) => "codec_data",
            ControlMessage::SetSpeed(_) => "set_speed",
            ControlMessage::Pause { .. } => "pause",
            ControlMessage::OnStop => "on_stop",
            ControlMessage::Error(_) => "error",
            ControlMessage::Unknown { kind, .. } => kind,
        }
    }
}

fn error_text(data: Value) -> String {
    match data {
        Value::String(message) => message,
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => Value::Object(map).to_string(),
        },
        other => other.to_string(),
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| PlaybackError::InvalidControlMessage(format!("{}: {}", kind, e)))
}

// ============================================================================
// Outbound commands
// ============================================================================

/// A command sent to the server over the transport's control channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Play,
    Hold,
    Seek {
        /// Target position in milliseconds.
        seek_time: u64,
    },
    SetSpeed {
        play_rate: PlayRate,
    },
    RequestCodecData {
        /// Codec combinations the host can decode, one list per combination.
        supported_combinations: Vec<Vec<Vec<String>>>,
    },
}

impl ControlCommand {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Message type of the server reply this command waits for, if any.
    pub fn reply_kind(&self) -> Option<&'static str> {
        match self {
            ControlCommand::Play => Some("on_time"),
            ControlCommand::Hold => None,
            ControlCommand::Seek { .. } => Some("seek"),
            ControlCommand::SetSpeed { .. } => Some("set_speed"),
            ControlCommand::RequestCodecData { .. } => Some("codec_data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(track: u8, key: u8, ts: u64, offset: u16, payload: &[u8]) -> Bytes {
        let mut buf = vec![track, key];
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn test_decode_frame_header() {
        let chunk = MediaChunk::decode(frame(2, 1, 90_061_001, 40, b"moof")).unwrap();
        assert_eq!(chunk.track_index, 2);
        assert!(chunk.is_keyframe);
        assert_eq!(chunk.timestamp_ms, 90_061_001);
        assert_eq!(chunk.output_offset_ms, 40);
        assert_eq!(&chunk.data[..], b"moof");
    }

    #[test]
    fn test_decode_header_only_frame() {
        let chunk = MediaChunk::decode(frame(0, 0, 0, 0, b"")).unwrap();
        assert!(!chunk.is_keyframe);
        assert!(chunk.data.is_empty());
    }

    #[test]
    fn test_decode_short_frame_fails() {
        let err = MediaChunk::decode(Bytes::from_static(&[0, 1, 2])).unwrap_err();
        assert!(matches!(err, PlaybackError::InvalidFrame(_)));
    }

    #[test]
    fn test_parse_on_time() {
        let msg = ControlMessage::parse(json!({
            "type": "on_time",
            "data": {
                "current": 12000, "begin": 2000, "end": 12500, "jitter": 40,
                "tracks": [1, 2], "play_rate_curr": "auto"
            }
        }))
        .unwrap();

        match msg {
            ControlMessage::OnTime(on_time) => {
                assert_eq!(on_time.current, 12000.0);
                assert_eq!(on_time.end, 12500.0);
                assert_eq!(on_time.jitter, 40.0);
                assert_eq!(on_time.tracks, vec![1, 2]);
                assert_eq!(on_time.play_rate_curr, Some(PlayRate::Auto));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_parse_tracks_and_speed() {
        let msg = ControlMessage::from_json(
            r#"{"type":"tracks","data":{"codecs":["avc1.64001f","mp4a.40.2"],"current":5000}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Tracks(TrackChange {
                codecs: vec!["avc1.64001f".into(), "mp4a.40.2".into()],
                tracks: vec![],
                current: 5000.0,
            })
        );

        let msg = ControlMessage::parse(json!({"type": "set_speed", "data": {"play_rate": 0.5}})).unwrap();
        assert_eq!(
            msg,
            ControlMessage::SetSpeed(SpeedChange {
                play_rate: PlayRate::Fixed(0.5),
                play_rate_prev: None,
            })
        );
    }

    #[test]
    fn test_parse_messages_without_data() {
        assert_eq!(
            ControlMessage::parse(json!({"type": "on_stop"})).unwrap(),
            ControlMessage::OnStop
        );
        assert_eq!(
            ControlMessage::parse(json!({"type": "pause"})).unwrap(),
            ControlMessage::Pause { paused: true }
        );
        assert_eq!(
            ControlMessage::parse(json!({"type": "error", "data": "Stream is offline"})).unwrap(),
            ControlMessage::Error("Stream is offline".into())
        );
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let msg = ControlMessage::parse(json!({"type": "info", "data": {"x": 1}})).unwrap();
        assert_eq!(msg.kind(), "info");
        assert!(matches!(msg, ControlMessage::Unknown { .. }));
    }

    #[test]
    fn test_malformed_messages_rejected() {
        assert!(matches!(
            ControlMessage::parse(json!({"data": {}})),
            Err(PlaybackError::InvalidControlMessage(_))
        ));
        assert!(matches!(
            ControlMessage::parse(json!({"type": "on_time", "data": {"current": "soon"}})),
            Err(PlaybackError::InvalidControlMessage(_))
        ));
        assert!(matches!(
            ControlMessage::from_json("{not json"),
            Err(PlaybackError::Json(_))
        ));
    }

    #[test]
    fn test_command_serialization() {
        assert_eq!(ControlCommand::Play.to_value().unwrap(), json!({"type": "play"}));
        assert_eq!(
            ControlCommand::Seek { seek_time: 4200 }.to_value().unwrap(),
            json!({"type": "seek", "seek_time": 4200})
        );
        assert_eq!(
            ControlCommand::SetSpeed { play_rate: PlayRate::Auto }.to_value().unwrap(),
            json!({"type": "set_speed", "play_rate": "auto"})
        );
        assert_eq!(
            ControlCommand::SetSpeed { play_rate: PlayRate::Fixed(0.5) }.to_value().unwrap(),
            json!({"type": "set_speed", "play_rate": 0.5})
        );
        assert_eq!(ControlCommand::Hold.reply_kind(), None);
        assert_eq!(ControlCommand::Play.reply_kind(), Some("on_time"));
    }
}
