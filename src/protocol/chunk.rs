//! RTMP chunk stream layer
//!
//! Messages are split into chunks of at most `chunk_size` payload bytes.
//! Every chunk starts with a basic header (format + chunk stream id),
//! followed by a message header whose size depends on the format:
//!
//! ```text
//! fmt 0: timestamp(3) length(3) type(1) stream_id(4 LE)   absolute time
//! fmt 1: delta(3)     length(3) type(1)                   same stream
//! fmt 2: delta(3)                                         same length/type
//! fmt 3: (none)                                           continuation, or
//!                                                         repeat of last delta
//! ```
//!
//! A 24-bit time field of `0xFFFFFF` means a 4-byte extended timestamp
//! follows; it is repeated on fmt 3 chunks of the same message.
//!
//! The encoder picks the smallest header that describes the message given
//! what it last sent on that chunk stream; the decoder mirrors the same
//! per-chunk-stream cache to reassemble messages.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::{
    DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE,
};

/// Chunk streams tracked at once before the decoder refuses new ones
const MAX_CHUNK_STREAMS: usize = 256;

/// A complete RTMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Chunk stream the message travels on
    pub csid: u32,
    pub type_id: u8,
    /// Message stream id (0 for connection-level messages)
    pub stream_id: u32,
    /// Milliseconds
    pub timestamp: u32,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(csid: u32, type_id: u8, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
        Self {
            csid,
            type_id,
            stream_id,
            timestamp,
            payload,
        }
    }
}

/// Last header seen or sent on one chunk stream
#[derive(Debug, Clone, Default)]
struct HeaderState {
    timestamp: u32,
    delta: u32,
    length: u32,
    type_id: u8,
    stream_id: u32,
    /// Last fmt 0-2 header used the extended timestamp field
    extended: bool,
}

/// Splits messages into chunks
#[derive(Debug)]
pub struct ChunkEncoder {
    chunk_size: u32,
    streams: HashMap<u32, HeaderState>,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Change the outbound chunk size. Call right after queueing the
    /// Set Chunk Size message that announces it.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Append the chunks of `msg` to `out`
    pub fn encode(&mut self, msg: &RawMessage, out: &mut BytesMut) {
        let length = msg.payload.len() as u32;
        let prev = self.streams.get(&msg.csid);

        let (fmt, time_field) = match prev {
            Some(p) if p.stream_id == msg.stream_id && msg.timestamp >= p.timestamp => {
                let delta = msg.timestamp - p.timestamp;
                if p.length != length || p.type_id != msg.type_id {
                    (1, delta)
                } else if p.delta != delta || p.extended || delta >= EXTENDED_TIMESTAMP {
                    (2, delta)
                } else {
                    (3, delta)
                }
            }
            _ => (0, msg.timestamp),
        };

        let extended = if fmt == 3 {
            false
        } else {
            time_field >= EXTENDED_TIMESTAMP
        };

        write_basic_header(out, fmt, msg.csid);
        if fmt < 3 {
            out.put_uint(time_field.min(EXTENDED_TIMESTAMP) as u64, 3);
        }
        if fmt < 2 {
            out.put_uint(length as u64, 3);
            out.put_u8(msg.type_id);
        }
        if fmt == 0 {
            out.put_u32_le(msg.stream_id);
        }
        if extended {
            out.put_u32(time_field);
        }

        let chunk_size = self.chunk_size as usize;
        let mut offset = 0;
        loop {
            let end = (offset + chunk_size).min(msg.payload.len());
            out.put_slice(&msg.payload[offset..end]);
            offset = end;
            if offset >= msg.payload.len() {
                break;
            }
            write_basic_header(out, 3, msg.csid);
            if extended {
                out.put_u32(time_field);
            }
        }

        let delta = match fmt {
            0 => 0,
            _ => time_field,
        };
        self.streams.insert(
            msg.csid,
            HeaderState {
                timestamp: msg.timestamp,
                delta,
                length,
                type_id: msg.type_id,
                stream_id: msg.stream_id,
                extended,
            },
        );
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(out: &mut BytesMut, fmt: u8, csid: u32) {
    let fmt = fmt << 6;
    match csid {
        2..=63 => out.put_u8(fmt | csid as u8),
        64..=319 => {
            out.put_u8(fmt);
            out.put_u8((csid - 64) as u8);
        }
        _ => {
            let id = csid - 64;
            out.put_u8(fmt | 1);
            out.put_u8((id & 0xFF) as u8);
            out.put_u8((id >> 8) as u8);
        }
    }
}

#[derive(Debug, Default)]
struct InboundStream {
    header: HeaderState,
    /// Partial payload of the message in flight
    payload: BytesMut,
    /// A message is being reassembled
    in_progress: bool,
}

/// Reassembles messages from chunks
#[derive(Debug)]
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, InboundStream>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Apply a peer's Set Chunk Size
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    /// Drop the partial message on `csid` (Abort message)
    pub fn abort(&mut self, csid: u32) {
        if let Some(stream) = self.streams.get_mut(&csid) {
            stream.payload.clear();
            stream.in_progress = false;
        }
    }

    /// Consume complete chunks from `buf` until one message completes.
    ///
    /// Returns `Ok(None)` when `buf` holds no further complete chunk; the
    /// partial chunk stays in `buf` untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        loop {
            match self.decode_chunk(buf)? {
                ChunkOutcome::Incomplete => return Ok(None),
                ChunkOutcome::Message(msg) => return Ok(Some(msg)),
                ChunkOutcome::Partial => continue,
            }
        }
    }

    fn decode_chunk(&mut self, buf: &mut BytesMut) -> Result<ChunkOutcome> {
        let data = &buf[..];
        if data.is_empty() {
            return Ok(ChunkOutcome::Incomplete);
        }

        let fmt = data[0] >> 6;
        let (csid, basic_len) = match data[0] & 0x3F {
            0 if data.len() >= 2 => (64 + data[1] as u32, 2),
            1 if data.len() >= 3 => (64 + data[1] as u32 + ((data[2] as u32) << 8), 3),
            0 | 1 => return Ok(ChunkOutcome::Incomplete),
            id => (id as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if data.len() < basic_len + header_len {
            return Ok(ChunkOutcome::Incomplete);
        }

        if !self.streams.contains_key(&csid) {
            if fmt != 0 {
                return Err(ProtocolError::InvalidChunk(format!(
                    "fmt {} chunk on unknown chunk stream {}",
                    fmt, csid
                ))
                .into());
            }
            if self.streams.len() >= MAX_CHUNK_STREAMS {
                return Err(ProtocolError::InvalidChunk("too many chunk streams".into()).into());
            }
        }

        let mut header = &data[basic_len..basic_len + header_len];
        let time_field = if fmt < 3 { header.get_uint(3) as u32 } else { 0 };
        let (length, type_id) = if fmt < 2 {
            (header.get_uint(3) as u32, header.get_u8())
        } else {
            (0, 0)
        };
        let stream_id = if fmt == 0 { header.get_u32_le() } else { 0 };

        let stream = self.streams.entry(csid).or_default();
        let extended = if fmt < 3 {
            time_field == EXTENDED_TIMESTAMP
        } else {
            stream.header.extended
        };
        let ext_len = if extended { 4 } else { 0 };
        let mut pos = basic_len + header_len;
        if data.len() < pos + ext_len {
            return Ok(ChunkOutcome::Incomplete);
        }
        let time_value = if extended {
            let mut ext = &data[pos..pos + 4];
            pos += 4;
            ext.get_u32()
        } else {
            time_field
        };

        // A fmt 0-2 header mid-message starts over
        if fmt < 3 && stream.in_progress {
            tracing::warn!(csid, fmt, "New message header before previous message completed");
            stream.payload.clear();
            stream.in_progress = false;
        }

        let msg_length = if fmt < 2 { length } else { stream.header.length };
        if msg_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(msg_length).into());
        }
        let already = if stream.in_progress {
            stream.payload.len()
        } else {
            0
        };
        let take = (msg_length as usize - already).min(self.chunk_size as usize);
        if data.len() < pos + take {
            return Ok(ChunkOutcome::Incomplete);
        }

        // The whole chunk is present; commit header state
        if !stream.in_progress {
            let h = &mut stream.header;
            match fmt {
                0 => {
                    h.timestamp = time_value;
                    h.delta = 0;
                    h.length = length;
                    h.type_id = type_id;
                    h.stream_id = stream_id;
                }
                1 => {
                    h.delta = time_value;
                    h.timestamp = h.timestamp.wrapping_add(time_value);
                    h.length = length;
                    h.type_id = type_id;
                }
                2 => {
                    h.delta = time_value;
                    h.timestamp = h.timestamp.wrapping_add(time_value);
                }
                _ => {
                    h.timestamp = h.timestamp.wrapping_add(h.delta);
                }
            }
            if fmt < 3 {
                h.extended = extended;
            }
            stream.in_progress = true;
            stream.payload.reserve(msg_length as usize);
        }

        buf.advance(pos);
        let chunk = buf.split_to(take);
        stream.payload.extend_from_slice(&chunk);

        if stream.payload.len() < stream.header.length as usize {
            return Ok(ChunkOutcome::Partial);
        }

        stream.in_progress = false;
        let h = &stream.header;
        Ok(ChunkOutcome::Message(RawMessage {
            csid,
            type_id: h.type_id,
            stream_id: h.stream_id,
            timestamp: h.timestamp,
            payload: stream.payload.split().freeze(),
        }))
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

enum ChunkOutcome {
    Incomplete,
    Partial,
    Message(RawMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize, seed: u8) -> Bytes {
        Bytes::from((0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect::<Vec<_>>())
    }

    fn decode_all(decoder: &mut ChunkDecoder, buf: &mut BytesMut) -> Vec<RawMessage> {
        let mut out = Vec::new();
        while let Some(msg) = decoder.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_reassembly_for_every_chunk_size() {
        let msg = RawMessage::new(6, 9, 1, 40, payload(700, 3));
        for size in (1..=300).chain([511, 699, 700, 701, 4096]) {
            let mut encoder = ChunkEncoder::new();
            let mut decoder = ChunkDecoder::new();
            encoder.set_chunk_size(size);
            decoder.set_chunk_size(size);

            let mut wire = BytesMut::new();
            encoder.encode(&msg, &mut wire);
            let decoded = decode_all(&mut decoder, &mut wire);
            assert_eq!(decoded, vec![msg.clone()], "chunk size {}", size);
            assert!(wire.is_empty());
        }
    }

    #[test]
    fn test_header_compression_sequence() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();

        let msgs = vec![
            RawMessage::new(4, 8, 1, 0, payload(10, 1)),
            RawMessage::new(4, 8, 1, 23, payload(10, 2)),
            RawMessage::new(4, 8, 1, 46, payload(10, 3)),
            RawMessage::new(4, 8, 1, 70, payload(12, 4)),
            RawMessage::new(4, 8, 1, 70, payload(12, 5)),
        ];
        let mut fmts = Vec::new();
        for msg in &msgs {
            let start = wire.len();
            encoder.encode(msg, &mut wire);
            fmts.push(wire[start] >> 6);
        }
        // fmt0 first, fmt2 for new delta, fmt3 repeats it, fmt1 for length change
        assert_eq!(fmts, vec![0, 2, 3, 1, 2]);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decode_all(&mut decoder, &mut wire), msgs);
    }

    #[test]
    fn test_interleaved_chunk_streams() {
        let mut encoder = ChunkEncoder::new();
        let audio = RawMessage::new(4, 8, 1, 0, payload(300, 7));
        let video = RawMessage::new(6, 9, 1, 0, payload(300, 9));

        let mut a = BytesMut::new();
        let mut v = BytesMut::new();
        encoder.encode(&audio, &mut a);
        encoder.encode(&video, &mut v);

        // Splice first chunk of each stream ahead of their remainders
        let first = 1 + 11 + 128;
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&a[..first]);
        wire.extend_from_slice(&v[..first]);
        wire.extend_from_slice(&a[first..]);
        wire.extend_from_slice(&v[first..]);

        let mut decoder = ChunkDecoder::new();
        let decoded = decode_all(&mut decoder, &mut wire);
        assert_eq!(decoded, vec![audio, video]);
    }

    #[test]
    fn test_extended_timestamp_on_every_chunk() {
        let mut encoder = ChunkEncoder::new();
        let msg = RawMessage::new(6, 9, 1, 0x0100_0000, payload(300, 1));
        let mut wire = BytesMut::new();
        encoder.encode(&msg, &mut wire);

        // basic + header + ext + 128, then 3 bytes basic+ext per continuation
        assert_eq!(&wire[1..4], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(wire.len(), 1 + 11 + 4 + 300 + 2 * (1 + 4));

        let next = RawMessage::new(6, 9, 1, 0x0100_0028, payload(300, 2));
        encoder.encode(&next, &mut wire);

        let mut decoder = ChunkDecoder::new();
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![msg, next]);
    }

    #[test]
    fn test_byte_by_byte_feed() {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(64);
        let msgs = vec![
            RawMessage::new(3, 20, 0, 0, payload(150, 1)),
            RawMessage::new(3, 20, 0, 0, payload(20, 2)),
            RawMessage::new(400, 18, 1, 5, payload(70, 3)),
        ];
        let mut wire = BytesMut::new();
        for msg in &msgs {
            encoder.encode(msg, &mut wire);
        }

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(64);
        let mut input = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in wire.iter() {
            input.put_u8(*byte);
            decoded.extend(decode_all(&mut decoder, &mut input));
        }
        assert_eq!(decoded, msgs);
    }

    #[test]
    fn test_timestamp_going_backwards_uses_full_header() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&RawMessage::new(4, 8, 1, 100, payload(4, 0)), &mut wire);
        let start = wire.len();
        encoder.encode(&RawMessage::new(4, 8, 1, 50, payload(4, 0)), &mut wire);
        assert_eq!(wire[start] >> 6, 0);
    }

    #[test]
    fn test_zero_length_message() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        let msg = RawMessage::new(3, 20, 0, 0, Bytes::new());
        encoder.encode(&msg, &mut wire);
        let mut decoder = ChunkDecoder::new();
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![msg]);
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&RawMessage::new(6, 9, 1, 0, payload(300, 1)), &mut wire);
        let mut partial = wire.split_to(1 + 11 + 128);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        decoder.abort(6);

        let fresh = RawMessage::new(6, 9, 1, 10, payload(20, 5));
        let mut encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(&fresh, &mut wire);
        assert_eq!(decode_all(&mut decoder, &mut wire), vec![fresh]);
    }

    #[test]
    fn test_unknown_stream_continuation_rejected() {
        let mut decoder = ChunkDecoder::new();
        let mut wire = BytesMut::from(&[0xC3u8, 0x00][..]);
        assert!(decoder.decode(&mut wire).is_err());
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x03);
        wire.put_uint(0, 3);
        wire.put_uint((MAX_MESSAGE_SIZE + 1) as u64, 3);
        wire.put_u8(20);
        wire.put_u32_le(0);
        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut wire).is_err());
    }
}
