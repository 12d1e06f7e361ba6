//! G.711 A-law and µ-law (FLV sound formats 7 and 8), always 8 kHz

use crate::codec::{Decoder, FrameOutput};
use crate::error::{Error, Result};
use crate::media::flv::{AudioFormat, SoundInfo};
use crate::media::{AudioFrame, Codec, Frame, Packet, StreamInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Law {
    A,
    Mu,
}

pub struct G711Decoder {
    stream: usize,
    law: Law,
    table: [i16; 256],
    output: FrameOutput,
}

impl G711Decoder {
    pub fn new(stream: &StreamInfo) -> Self {
        let law = match stream.codec {
            Codec::Audio(AudioFormat::G711ALaw) => Law::A,
            _ => Law::Mu,
        };
        let mut table = [0i16; 256];
        for (code, slot) in table.iter_mut().enumerate() {
            *slot = match law {
                Law::A => alaw_to_linear(code as u8),
                Law::Mu => ulaw_to_linear(code as u8),
            };
        }
        Self {
            stream: stream.index,
            law,
            table,
            output: FrameOutput::new(),
        }
    }
}

impl Decoder for G711Decoder {
    fn name(&self) -> &'static str {
        match self.law {
            Law::A => "pcm_alaw",
            Law::Mu => "pcm_mulaw",
        }
    }

    fn submit(&mut self, packet: &Packet) -> Result<()> {
        let Some((&header, payload)) = packet.data.split_first() else {
            return Ok(());
        };
        let sound = SoundInfo::from_byte(header);
        let expected = match self.law {
            Law::A => AudioFormat::G711ALaw,
            Law::Mu => AudioFormat::G711MuLaw,
        };
        if sound.format != Some(expected) {
            return Err(Error::decode(
                self.stream,
                format!("sound format {} in a {} stream", sound.format_id, self.name()),
            ));
        }
        if packet.discontinuity {
            self.output.discontinuity();
        }

        let channels = sound.channels as usize;
        let usable = payload.len() / channels * channels;
        if usable == 0 {
            return Ok(());
        }
        let samples = payload[..usable]
            .iter()
            .map(|&code| self.table[code as usize])
            .collect();

        self.output.emit(Frame::Audio(AudioFrame {
            sample_rate: sound.sample_rate,
            channels: sound.channels as u16,
            pts_ms: packet.pts_ms,
            discontinuity: false,
            samples,
        }));
        Ok(())
    }

    fn retrieve(&mut self) -> Option<Frame> {
        self.output.next()
    }

    fn reset(&mut self) {
        self.output.clear();
        self.output.discontinuity();
    }
}

/// ITU-T G.711 A-law expansion
pub fn alaw_to_linear(code: u8) -> i16 {
    let a = code ^ 0x55;
    let segment = (a >> 4) & 0x07;
    let mut magnitude = ((a & 0x0F) as i32) << 4;
    magnitude += match segment {
        0 => 8,
        _ => 0x108,
    };
    if segment > 1 {
        magnitude <<= segment - 1;
    }
    if a & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// ITU-T G.711 µ-law expansion
pub fn ulaw_to_linear(code: u8) -> i16 {
    const BIAS: i32 = 0x84;
    let u = !code;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FlvTag, MediaKind};
    use bytes::Bytes;

    #[test]
    fn test_ulaw_reference_values() {
        assert_eq!(ulaw_to_linear(0xFF), 0);
        assert_eq!(ulaw_to_linear(0x7F), 0);
        assert_eq!(ulaw_to_linear(0x00), -32124);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0xF0), 120);
    }

    #[test]
    fn test_alaw_reference_values() {
        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0x55), -8);
        assert_eq!(alaw_to_linear(0xAA), 32256);
        assert_eq!(alaw_to_linear(0x2A), -32256);
    }

    #[test]
    fn test_expansion_is_odd_symmetric() {
        for code in 0..=0x7Fu8 {
            assert_eq!(ulaw_to_linear(code), -ulaw_to_linear(code | 0x80));
            assert_eq!(alaw_to_linear(code), -alaw_to_linear(code | 0x80));
        }
    }

    #[test]
    fn test_decode_packet() {
        let info = StreamInfo::from_tag(0, &FlvTag::audio(0, Bytes::from_static(&[0x72]))).unwrap();
        let mut dec = G711Decoder::new(&info);
        assert_eq!(dec.name(), "pcm_alaw");

        let packet = Packet {
            stream_index: 0,
            kind: MediaKind::Audio,
            dts_ms: 20,
            pts_ms: 20,
            keyframe: true,
            discontinuity: false,
            data: Bytes::from_static(&[0x72, 0xD5, 0x55]),
        };
        dec.submit(&packet).unwrap();
        let Some(Frame::Audio(frame)) = dec.retrieve() else {
            panic!("expected audio frame");
        };
        assert_eq!(frame.samples, vec![8, -8]);
        assert_eq!(frame.sample_rate, 8000);
        assert_eq!(frame.channels, 1);
    }

    #[test]
    fn test_law_mismatch() {
        let info = StreamInfo::from_tag(0, &FlvTag::audio(0, Bytes::from_static(&[0x82]))).unwrap();
        let mut dec = G711Decoder::new(&info);
        let packet = Packet {
            stream_index: 0,
            kind: MediaKind::Audio,
            dts_ms: 0,
            pts_ms: 0,
            keyframe: true,
            discontinuity: false,
            data: Bytes::from_static(&[0x72, 0xD5]),
        };
        assert!(matches!(dec.submit(&packet), Err(Error::Decode { .. })));
    }
}
