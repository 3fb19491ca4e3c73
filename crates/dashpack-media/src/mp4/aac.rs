//! AAC AudioSpecificConfig parsing (ISO/IEC 14496-3 1.6.2.1).

use crate::error::{Error, Result};

// Sampling frequencies addressed by the 4-bit frequency index.
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

// Channel counts addressed by the 4-bit channel configuration.
const CHANNEL_COUNTS: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 8];

// MSB-first bit reader over the config bytes.
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    fn read_bits(&mut self, num_bits: usize) -> Result<u32> {
        debug_assert!(num_bits <= 32);
        if self.bit_pos + num_bits > self.data.len() * 8 {
            return Err(Error::parser("AudioSpecificConfig too short"));
        }
        let mut v: u32 = 0;
        for _ in 0..num_bits {
            let byte = self.data[self.bit_pos / 8];
            let bit = (byte >> (7 - self.bit_pos % 8)) & 1;
            v = (v << 1) | u32::from(bit);
            self.bit_pos += 1;
        }
        Ok(v)
    }

    fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }
}

/// Parsed AudioSpecificConfig.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AacAudioSpecificConfig {
    audio_object_type: u8,
    frequency: u32,
    extension_frequency: u32,
    channel_config: u8,
}

fn read_audio_object_type(reader: &mut BitReader<'_>) -> Result<u8> {
    let object_type = reader.read_bits(5)? as u8;
    if object_type == 31 {
        return Ok(32 + reader.read_bits(6)? as u8);
    }
    Ok(object_type)
}

fn read_sampling_frequency(reader: &mut BitReader<'_>) -> Result<u32> {
    let index = reader.read_bits(4)? as usize;
    if index == 0x0F {
        return reader.read_bits(24);
    }
    SAMPLE_RATES
        .get(index)
        .copied()
        .ok_or_else(|| Error::parser(format!("invalid sampling frequency index {index}")))
}

impl AacAudioSpecificConfig {
    pub fn parse(&mut self, data: &[u8]) -> Result<()> {
        let mut reader = BitReader::new(data);

        self.audio_object_type = read_audio_object_type(&mut reader)?;
        self.frequency = read_sampling_frequency(&mut reader)?;
        self.channel_config = reader.read_bits(4)? as u8;
        self.extension_frequency = 0;

        // Explicit SBR/PS signaling carries an extension sampling frequency
        // and re-reads the underlying object type.
        if self.audio_object_type == 5 || self.audio_object_type == 29 {
            self.extension_frequency = read_sampling_frequency(&mut reader)?;
            self.audio_object_type = read_audio_object_type(&mut reader)?;
        } else if reader.bits_left() >= 16 {
            // Backward-compatible explicit signaling at the end of the
            // config: syncExtensionType 0x2B7 followed by object type 5.
            let sync = reader.read_bits(11)?;
            if sync == 0x2B7 {
                let ext_type = reader.read_bits(5)? as u8;
                if ext_type == 5 && reader.read_bits(1)? == 1 {
                    self.extension_frequency = read_sampling_frequency(&mut reader)?;
                }
            }
        }

        if self.channel_config as usize >= CHANNEL_COUNTS.len() {
            return Err(Error::parser(format!(
                "invalid channel configuration {}",
                self.channel_config
            )));
        }
        Ok(())
    }

    pub fn audio_object_type(&self) -> u8 {
        self.audio_object_type
    }

    /// Output sampling frequency: the extension frequency when SBR is
    /// signaled, otherwise the base frequency.
    pub fn frequency(&self) -> u32 {
        if self.extension_frequency != 0 {
            self.extension_frequency
        } else {
            self.frequency
        }
    }

    pub fn num_channels(&self) -> u8 {
        CHANNEL_COUNTS[self.channel_config as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aac_lc_stereo_44100() {
        // object type 2 (LC), frequency index 4 (44100), channel config 2.
        let mut config = AacAudioSpecificConfig::default();
        config.parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.audio_object_type(), 2);
        assert_eq!(config.frequency(), 44100);
        assert_eq!(config.num_channels(), 2);
    }

    #[test]
    fn parses_explicit_frequency() {
        // object type 2, frequency index 15 -> explicit 24-bit 12345 Hz,
        // channel config 1.
        // Bits: 00010 1111 000000000011000000111001 0001, padded.
        let data = [0b0001_0111, 0b1000_0000, 0b0001_1000, 0b0001_1100, 0b1000_1000];
        let mut config = AacAudioSpecificConfig::default();
        config.parse(&data).unwrap();
        assert_eq!(config.frequency(), 12345);
        assert_eq!(config.num_channels(), 1);
    }

    #[test]
    fn parses_sbr_extension() {
        // object type 5 (SBR), base 24000 (index 6), channel 2,
        // extension frequency 48000 (index 3), underlying object type 2.
        // Bits: 00101 0110 0010 0011 00010, padded to 3 bytes.
        let data = [0b0010_1011, 0b0001_0001, 0b1000_1000];
        let mut config = AacAudioSpecificConfig::default();
        config.parse(&data).unwrap();
        assert_eq!(config.audio_object_type(), 2);
        assert_eq!(config.frequency(), 48000);
        assert_eq!(config.num_channels(), 2);
    }

    #[test]
    fn rejects_truncated_config() {
        let mut config = AacAudioSpecificConfig::default();
        assert!(config.parse(&[0x12]).is_err());
    }
}
