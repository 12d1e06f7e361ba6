//! RTMP message types
//!
//! [`RtmpMessage`] is the typed view of a reassembled [`RawMessage`].
//! Protocol control messages (types 1-6) are parsed into fields, commands
//! and data messages are AMF0-decoded, audio and video stay opaque: their
//! payload is an FLV tag body and is handed to the media layer as-is.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{amf0, Amf0Decoder, AmfValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::chunk::RawMessage;
use crate::protocol::constants::*;

/// Typed RTMP message
#[derive(Debug, Clone, PartialEq)]
pub enum RtmpMessage {
    SetChunkSize(u32),
    Abort { csid: u32 },
    Acknowledgement { sequence: u32 },
    UserControl(UserControlEvent),
    WindowAckSize(u32),
    SetPeerBandwidth { size: u32, limit_type: u8 },
    Audio { timestamp: u32, data: Bytes },
    Video { timestamp: u32, data: Bytes },
    /// Data message (`@setDataFrame`, `onMetaData`, ...)
    Data { stream_id: u32, values: Vec<AmfValue> },
    Command(Command),
    /// Anything else, kept for logging
    Other { type_id: u8, payload: Bytes },
}

/// User control event (message type 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown(u16),
}

/// AMF0 command message (type 20)
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    /// Command object, `Null` for most stream commands
    pub command_object: AmfValue,
    pub arguments: Vec<AmfValue>,
    /// Message stream the command was sent on
    pub stream_id: u32,
}

/// Parameters of the `connect` command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectParams {
    pub app: String,
    pub tc_url: String,
    pub flash_ver: String,
    /// Only set by players
    pub audio_codecs: Option<f64>,
    pub video_codecs: Option<f64>,
}

impl ConnectParams {
    fn to_amf(&self) -> AmfValue {
        let mut props = vec![
            ("app".to_string(), AmfValue::from(self.app.as_str())),
            ("type".to_string(), AmfValue::from("nonprivate")),
            ("flashVer".to_string(), AmfValue::from(self.flash_ver.as_str())),
            ("tcUrl".to_string(), AmfValue::from(self.tc_url.as_str())),
        ];
        if let Some(audio) = self.audio_codecs {
            props.push(("fpad".to_string(), AmfValue::Boolean(false)));
            props.push(("capabilities".to_string(), AmfValue::Number(15.0)));
            props.push(("audioCodecs".to_string(), AmfValue::Number(audio)));
        }
        if let Some(video) = self.video_codecs {
            props.push(("videoCodecs".to_string(), AmfValue::Number(video)));
            props.push(("videoFunction".to_string(), AmfValue::Number(1.0)));
        }
        AmfValue::Object(props)
    }

    /// Read connect parameters from a command object
    pub fn from_amf(obj: &AmfValue) -> Self {
        Self {
            app: obj.get_string("app").unwrap_or_default().to_string(),
            tc_url: obj.get_string("tcUrl").unwrap_or_default().to_string(),
            flash_ver: obj.get_string("flashVer").unwrap_or_default().to_string(),
            audio_codecs: obj.get_number("audioCodecs"),
            video_codecs: obj.get_number("videoCodecs"),
        }
    }
}

impl Command {
    pub fn new(name: &str, transaction_id: f64, command_object: AmfValue) -> Self {
        Self {
            name: name.to_string(),
            transaction_id,
            command_object,
            arguments: Vec::new(),
            stream_id: 0,
        }
    }

    pub fn arg(mut self, value: impl Into<AmfValue>) -> Self {
        self.arguments.push(value.into());
        self
    }

    pub fn on_stream(mut self, stream_id: u32) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn connect(transaction_id: f64, params: &ConnectParams) -> Self {
        Self::new(CMD_CONNECT, transaction_id, params.to_amf())
    }

    pub fn create_stream(transaction_id: f64) -> Self {
        Self::new(CMD_CREATE_STREAM, transaction_id, AmfValue::Null)
    }

    pub fn release_stream(transaction_id: f64, stream_key: &str) -> Self {
        Self::new(CMD_RELEASE_STREAM, transaction_id, AmfValue::Null).arg(stream_key)
    }

    pub fn fc_publish(transaction_id: f64, stream_key: &str) -> Self {
        Self::new(CMD_FC_PUBLISH, transaction_id, AmfValue::Null).arg(stream_key)
    }

    pub fn fc_unpublish(transaction_id: f64, stream_key: &str) -> Self {
        Self::new(CMD_FC_UNPUBLISH, transaction_id, AmfValue::Null).arg(stream_key)
    }

    pub fn publish(stream_id: u32, stream_key: &str, publish_type: &str) -> Self {
        Self::new(CMD_PUBLISH, 0.0, AmfValue::Null)
            .arg(stream_key)
            .arg(publish_type)
            .on_stream(stream_id)
    }

    /// `play(name, start = -2)`: live if available, else recorded
    pub fn play(stream_id: u32, stream_key: &str) -> Self {
        Self::new(CMD_PLAY, 0.0, AmfValue::Null)
            .arg(stream_key)
            .arg(-2.0)
            .on_stream(stream_id)
    }

    pub fn delete_stream(transaction_id: f64, stream_id: u32) -> Self {
        Self::new(CMD_DELETE_STREAM, transaction_id, AmfValue::Null).arg(stream_id)
    }

    /// `_result` reply
    pub fn result(transaction_id: f64, properties: AmfValue, info: AmfValue) -> Self {
        Self::new(CMD_RESULT, transaction_id, properties).arg(info)
    }

    /// `_error` reply
    pub fn error(transaction_id: f64, code: &str, description: &str) -> Self {
        Self::new(CMD_ERROR, transaction_id, AmfValue::Null)
            .arg(status_info("error", code, description))
    }

    /// `onStatus` on a message stream
    pub fn on_status(stream_id: u32, level: &str, code: &str, description: &str) -> Self {
        Self::new(CMD_ON_STATUS, 0.0, AmfValue::Null)
            .arg(status_info(level, code, description))
            .on_stream(stream_id)
    }

    /// Info object of `_result`, `_error` and `onStatus`
    pub fn info(&self) -> Option<&AmfValue> {
        self.arguments.first()
    }

    pub fn status_code(&self) -> Option<&str> {
        self.info()?.get_string("code")
    }

    pub fn status_level(&self) -> Option<&str> {
        self.info()?.get_string("level")
    }

    pub fn description(&self) -> String {
        self.info()
            .and_then(|i| i.get_string("description"))
            .or_else(|| self.status_code())
            .unwrap_or("no description")
            .to_string()
    }

    /// Whether this reply reports failure
    pub fn is_failure(&self) -> bool {
        self.name == CMD_ERROR || self.status_level() == Some("error")
    }

    fn encode(&self) -> Bytes {
        let mut values = vec![
            AmfValue::from(self.name.as_str()),
            AmfValue::Number(self.transaction_id),
            self.command_object.clone(),
        ];
        values.extend(self.arguments.iter().cloned());
        amf0::encode_all(&values)
    }

    fn decode(mut payload: Bytes, stream_id: u32) -> Result<Self> {
        let mut decoder = Amf0Decoder::new();
        let name = match decoder.decode(&mut payload)? {
            AmfValue::String(s) => s,
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "command name is not a string: {:?}",
                    other
                ))
                .into())
            }
        };
        let transaction_id = if payload.has_remaining() {
            decoder.decode(&mut payload)?.as_number().unwrap_or(0.0)
        } else {
            0.0
        };
        let command_object = if payload.has_remaining() {
            decoder.decode(&mut payload)?
        } else {
            AmfValue::Null
        };
        let arguments = decoder.decode_all(&mut payload)?;

        Ok(Self {
            name,
            transaction_id,
            command_object,
            arguments,
            stream_id,
        })
    }
}

fn status_info(level: &str, code: &str, description: &str) -> AmfValue {
    AmfValue::object([
        ("level", AmfValue::from(level)),
        ("code", AmfValue::from(code)),
        ("description", AmfValue::from(description)),
    ])
}

impl RtmpMessage {
    /// Parse a reassembled message
    pub fn decode(raw: RawMessage) -> Result<Self> {
        let mut p = raw.payload.clone();
        let msg = match raw.type_id {
            MSG_SET_CHUNK_SIZE => {
                need(&p, 4, "Set Chunk Size")?;
                RtmpMessage::SetChunkSize(p.get_u32() & 0x7FFF_FFFF)
            }
            MSG_ABORT => {
                need(&p, 4, "Abort")?;
                RtmpMessage::Abort { csid: p.get_u32() }
            }
            MSG_ACKNOWLEDGEMENT => {
                need(&p, 4, "Acknowledgement")?;
                RtmpMessage::Acknowledgement {
                    sequence: p.get_u32(),
                }
            }
            MSG_USER_CONTROL => RtmpMessage::UserControl(UserControlEvent::decode(&mut p)?),
            MSG_WINDOW_ACK_SIZE => {
                need(&p, 4, "Window Acknowledgement Size")?;
                RtmpMessage::WindowAckSize(p.get_u32())
            }
            MSG_SET_PEER_BANDWIDTH => {
                need(&p, 5, "Set Peer Bandwidth")?;
                RtmpMessage::SetPeerBandwidth {
                    size: p.get_u32(),
                    limit_type: p.get_u8(),
                }
            }
            MSG_AUDIO => RtmpMessage::Audio {
                timestamp: raw.timestamp,
                data: raw.payload,
            },
            MSG_VIDEO => RtmpMessage::Video {
                timestamp: raw.timestamp,
                data: raw.payload,
            },
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => {
                if raw.type_id == MSG_DATA_AMF3 && p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Data {
                    stream_id: raw.stream_id,
                    values: Amf0Decoder::new().decode_all(&mut p)?,
                }
            }
            MSG_COMMAND_AMF0 | MSG_COMMAND_AMF3 => {
                if raw.type_id == MSG_COMMAND_AMF3 && p.has_remaining() {
                    p.advance(1);
                }
                RtmpMessage::Command(Command::decode(p, raw.stream_id)?)
            }
            type_id => RtmpMessage::Other {
                type_id,
                payload: raw.payload,
            },
        };
        Ok(msg)
    }

    /// Wire form on the conventional chunk stream for the message kind.
    ///
    /// `stream_id` applies to media and data messages; commands carry their
    /// own, control messages always use stream 0.
    pub fn encode(&self, stream_id: u32) -> RawMessage {
        let mut buf = BytesMut::new();
        let (csid, type_id, msg_stream, timestamp, payload) = match self {
            RtmpMessage::SetChunkSize(size) => {
                buf.put_u32(size & 0x7FFF_FFFF);
                (CSID_PROTOCOL_CONTROL, MSG_SET_CHUNK_SIZE, 0, 0, buf.freeze())
            }
            RtmpMessage::Abort { csid } => {
                buf.put_u32(*csid);
                (CSID_PROTOCOL_CONTROL, MSG_ABORT, 0, 0, buf.freeze())
            }
            RtmpMessage::Acknowledgement { sequence } => {
                buf.put_u32(*sequence);
                (CSID_PROTOCOL_CONTROL, MSG_ACKNOWLEDGEMENT, 0, 0, buf.freeze())
            }
            RtmpMessage::UserControl(event) => {
                event.encode(&mut buf);
                (CSID_PROTOCOL_CONTROL, MSG_USER_CONTROL, 0, 0, buf.freeze())
            }
            RtmpMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                (CSID_PROTOCOL_CONTROL, MSG_WINDOW_ACK_SIZE, 0, 0, buf.freeze())
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                buf.put_u8(*limit_type);
                (CSID_PROTOCOL_CONTROL, MSG_SET_PEER_BANDWIDTH, 0, 0, buf.freeze())
            }
            RtmpMessage::Audio { timestamp, data } => {
                (CSID_AUDIO, MSG_AUDIO, stream_id, *timestamp, data.clone())
            }
            RtmpMessage::Video { timestamp, data } => {
                (CSID_VIDEO, MSG_VIDEO, stream_id, *timestamp, data.clone())
            }
            RtmpMessage::Data { values, .. } => (
                CSID_DATA,
                MSG_DATA_AMF0,
                stream_id,
                0,
                amf0::encode_all(values),
            ),
            RtmpMessage::Command(cmd) => {
                (CSID_COMMAND, MSG_COMMAND_AMF0, cmd.stream_id, 0, cmd.encode())
            }
            RtmpMessage::Other { type_id, payload } => {
                (CSID_COMMAND, *type_id, stream_id, 0, payload.clone())
            }
        };
        RawMessage::new(csid, type_id, msg_stream, timestamp, payload)
    }

    /// `@setDataFrame("onMetaData", metadata)` as sent by publishers
    pub fn set_data_frame(metadata: AmfValue) -> Self {
        RtmpMessage::Data {
            stream_id: 0,
            values: vec![
                AmfValue::from(CMD_SET_DATA_FRAME),
                AmfValue::from(CMD_ON_METADATA),
                metadata,
            ],
        }
    }

    /// Metadata object if this is an `onMetaData` data message, with or
    /// without the `@setDataFrame` wrapper
    pub fn metadata(&self) -> Option<&AmfValue> {
        let RtmpMessage::Data { values, .. } = self else {
            return None;
        };
        let mut iter = values.iter();
        let mut first = iter.next()?.as_str()?;
        if first == CMD_SET_DATA_FRAME {
            first = iter.next()?.as_str()?;
        }
        if first != CMD_ON_METADATA {
            return None;
        }
        iter.next()
    }
}

impl UserControlEvent {
    fn decode(p: &mut Bytes) -> Result<Self> {
        need(p, 2, "User Control")?;
        let event_type = p.get_u16();
        let mut value = || -> Result<u32> {
            need(p, 4, "User Control")?;
            Ok(p.get_u32())
        };
        Ok(match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(value()?),
            UC_STREAM_EOF => UserControlEvent::StreamEof(value()?),
            UC_STREAM_DRY => UserControlEvent::StreamDry(value()?),
            UC_SET_BUFFER_LENGTH => {
                let stream_id = value()?;
                let buffer_ms = value()?;
                UserControlEvent::SetBufferLength {
                    stream_id,
                    buffer_ms,
                }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(value()?),
            UC_PING_REQUEST => UserControlEvent::PingRequest(value()?),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(value()?),
            other => UserControlEvent::Unknown(other),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        match *self {
            UserControlEvent::StreamBegin(id) => put_event(buf, UC_STREAM_BEGIN, id),
            UserControlEvent::StreamEof(id) => put_event(buf, UC_STREAM_EOF, id),
            UserControlEvent::StreamDry(id) => put_event(buf, UC_STREAM_DRY, id),
            UserControlEvent::SetBufferLength {
                stream_id,
                buffer_ms,
            } => {
                put_event(buf, UC_SET_BUFFER_LENGTH, stream_id);
                buf.put_u32(buffer_ms);
            }
            UserControlEvent::StreamIsRecorded(id) => put_event(buf, UC_STREAM_IS_RECORDED, id),
            UserControlEvent::PingRequest(t) => put_event(buf, UC_PING_REQUEST, t),
            UserControlEvent::PingResponse(t) => put_event(buf, UC_PING_RESPONSE, t),
            UserControlEvent::Unknown(kind) => buf.put_u16(kind),
        }
    }
}

fn put_event(buf: &mut BytesMut, kind: u16, value: u32) {
    buf.put_u16(kind);
    buf.put_u32(value);
}

fn need(p: &Bytes, n: usize, what: &str) -> Result<()> {
    if p.remaining() < n {
        return Err(ProtocolError::InvalidChunk(format!("{} message too short", what)).into());
    }
    Ok(())
}
