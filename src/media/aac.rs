//! AAC configuration parsing
//!
//! AAC is carried raw (no ADTS). The first AAC tag of a stream is the
//! sequence header holding the AudioSpecificConfig, which is the only place
//! the real sample rate and channel count are stated; the FLV sound header
//! always claims 44.1 kHz stereo.
//!
//! ```text
//! +-----------+---------+----------+----------+---------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AACType | AACData
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  | (1 byte)|
//! +-----------+---------+----------+----------+---------+
//! ```

use bytes::Bytes;

use crate::error::{MediaError, Result};
use crate::media::flv::FlvTag;

/// AudioSpecificConfig from a sequence header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = LC, 5 = SBR)
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    /// Hz
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    /// 960-sample frames instead of 1024
    pub frame_length_flag: bool,
    /// Raw config bytes, handed to decoders as extradata
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// Parse the bit-packed config: object type (5), frequency index (4),
    /// optional explicit frequency (24), channel configuration (4)
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }
        let b0 = data[0];
        let b1 = data[1];

        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        let (sampling_frequency, tail) = if sampling_frequency_index == 0x0F {
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            ((f0 << 17) | (f1 << 9) | (f2 << 1) | f3, (data[4] << 1) as u16)
        } else {
            let freq = Self::SAMPLING_FREQUENCIES
                .get(sampling_frequency_index as usize)
                .copied()
                .ok_or(MediaError::InvalidAacPacket)?;
            (freq, ((b1 as u16) << 1) & 0xFF)
        };

        // Channel configuration follows the frequency field
        let channel_configuration = ((tail >> 4) & 0x0F) as u8;
        let frame_length_flag = tail & 0x08 != 0;

        Ok(Self {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
            raw: data,
        })
    }

    /// Config carried by an AAC sequence-header tag
    pub fn from_tag(tag: &FlvTag) -> Option<Self> {
        if !tag.is_aac_sequence_header() {
            return None;
        }
        match Self::parse(tag.data.slice(2..)) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::debug!(error = %e, "Malformed AAC sequence header");
                None
            }
        }
    }

    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            7 => 8,
            n @ 1..=6 => n,
            // 0: defined in the stream itself
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_specific_config_parse() {
        // AAC-LC, 44100 Hz, stereo
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x12, 0x10])).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channels(), 2);
        assert!(!config.frame_length_flag);
    }

    #[test]
    fn test_audio_specific_config_48k_mono() {
        // object type 2, index 3, channel config 1
        let config = AudioSpecificConfig::parse(Bytes::from_static(&[0x11, 0x88])).unwrap();
        assert_eq!(config.sampling_frequency, 48000);
        assert_eq!(config.channels(), 1);
    }

    #[test]
    fn test_explicit_frequency() {
        // object type 2, index 15, frequency 44100 (0x00AC44), channel config 2
        let freq: u32 = 44100;
        let bits: u64 = (2u64 << 35) | (0xFu64 << 31) | ((freq as u64) << 7) | (2u64 << 3);
        let bytes = bits.to_be_bytes();
        let config = AudioSpecificConfig::parse(Bytes::copy_from_slice(&bytes[3..8])).unwrap();
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channels(), 2);
    }

    #[test]
    fn test_invalid_config() {
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x12])).is_err());
        // frequency index 13 is reserved
        assert!(AudioSpecificConfig::parse(Bytes::from_static(&[0x16, 0x90])).is_err());
    }

    #[test]
    fn test_from_tag() {
        let header = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        let config = AudioSpecificConfig::from_tag(&header).unwrap();
        assert_eq!(config.sampling_frequency, 44100);

        let raw = FlvTag::audio(0, Bytes::from_static(&[0xAF, 0x01, 0x21]));
        assert!(AudioSpecificConfig::from_tag(&raw).is_none());
    }
}
