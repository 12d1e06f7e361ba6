//! Linear PCM (FLV sound formats 0 and 3)
//!
//! 16-bit samples are little endian; 8-bit samples are unsigned. Format 0
//! ("platform endian") is treated as little endian, which is what every
//! producer in practice writes.

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{Decoder, FrameOutput};
use crate::error::{Error, Result};
use crate::media::flv::{AudioFormat, SoundInfo};
use crate::media::{AudioFrame, Frame, Packet, StreamInfo};

pub struct PcmDecoder {
    stream: usize,
    sample_bits: u8,
    output: FrameOutput,
}

impl PcmDecoder {
    pub fn new(stream: &StreamInfo) -> Self {
        Self {
            stream: stream.index,
            sample_bits: stream.sample_bits,
            output: FrameOutput::new(),
        }
    }
}

impl Decoder for PcmDecoder {
    fn name(&self) -> &'static str {
        if self.sample_bits == 8 {
            "pcm_u8"
        } else {
            "pcm_s16le"
        }
    }

    fn submit(&mut self, packet: &Packet) -> Result<()> {
        let Some((&header, payload)) = packet.data.split_first() else {
            tracing::trace!(stream = self.stream, "Empty PCM packet");
            return Ok(());
        };
        let sound = SoundInfo::from_byte(header);
        if !matches!(
            sound.format,
            Some(AudioFormat::LinearPcmPlatform) | Some(AudioFormat::LinearPcmLe)
        ) {
            return Err(Error::decode(
                self.stream,
                format!("sound format {} in a PCM stream", sound.format_id),
            ));
        }
        if packet.discontinuity {
            self.output.discontinuity();
        }

        let channels = sound.channels as usize;
        let mut samples: Vec<i16> = if sound.sample_bits == 16 {
            let usable = payload.len() / 2 * 2;
            let mut samples = vec![0i16; usable / 2];
            LittleEndian::read_i16_into(&payload[..usable], &mut samples);
            samples
        } else {
            payload.iter().map(|&b| ((b as i16) - 128) << 8).collect()
        };
        // Whole sample frames only
        samples.truncate(samples.len() / channels * channels);
        if samples.is_empty() {
            return Ok(());
        }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{FlvTag, MediaKind};
    use bytes::Bytes;

    fn packet(pts: i64, data: &'static [u8]) -> Packet {
        Packet {
            stream_index: 0,
            kind: MediaKind::Audio,
            dts_ms: pts,
            pts_ms: pts,
            keyframe: true,
            discontinuity: false,
            data: Bytes::from_static(data),
        }
    }

    fn decoder(header: u8) -> PcmDecoder {
        let info = StreamInfo::from_tag(0, &FlvTag::audio(0, Bytes::copy_from_slice(&[header]))).unwrap();
        PcmDecoder::new(&info)
    }

    #[test]
    fn test_s16le_stereo() {
        // PCM LE, 44.1 kHz, 16-bit, stereo
        let mut dec = decoder(0x3F);
        dec.submit(&packet(40, &[0x3F, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80, 0xFF, 0x7F]))
            .unwrap();
        let Some(Frame::Audio(frame)) = dec.retrieve() else {
            panic!("expected audio frame");
        };
        assert_eq!(frame.samples, vec![1, -1, i16::MIN, i16::MAX]);
        assert_eq!(frame.channels, 2);
        assert_eq!(frame.sample_rate, 44100);
        assert_eq!(frame.pts_ms, 40);
        assert!(dec.retrieve().is_none());
    }

    #[test]
    fn test_u8_mono() {
        // PCM platform, 5.5 kHz, 8-bit, mono
        let mut dec = decoder(0x00);
        assert_eq!(dec.name(), "pcm_u8");
        dec.submit(&packet(0, &[0x00, 0x80, 0x00, 0xFF])).unwrap();
        let Some(Frame::Audio(frame)) = dec.retrieve() else {
            panic!("expected audio frame");
        };
        assert_eq!(frame.samples, vec![0, -32768, 127 << 8]);
        assert_eq!(frame.sample_rate, 5512);
    }

    #[test]
    fn test_partial_sample_frame_dropped() {
        let mut dec = decoder(0x3F);
        // three 16-bit samples in a stereo stream
        dec.submit(&packet(0, &[0x3F, 1, 0, 2, 0, 3, 0])).unwrap();
        let Some(Frame::Audio(frame)) = dec.retrieve() else {
            panic!("expected audio frame");
        };
        assert_eq!(frame.samples, vec![1, 2]);
    }

    #[test]
    fn test_header_only_packet_yields_nothing() {
        let mut dec = decoder(0x3E);
        dec.submit(&packet(0, &[0x3E])).unwrap();
        dec.submit(&packet(0, &[])).unwrap();
        assert!(dec.retrieve().is_none());
    }

    #[test]
    fn test_foreign_format_is_decode_error() {
        let mut dec = decoder(0x3E);
        let err = dec.submit(&packet(0, &[0xAF, 0x01, 0x00])).unwrap_err();
        assert!(matches!(err, Error::Decode { stream: 0, .. }));
    }

    #[test]
    fn test_discontinuity_marks_frame() {
        let mut dec = decoder(0x3E);
        let mut p = packet(1000, &[0x3E, 1, 0]);
        p.discontinuity = true;
        dec.submit(&p).unwrap();
        assert!(dec.retrieve().unwrap().discontinuity());
    }
}
