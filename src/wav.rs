use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use crate::error::VoiceError;

/// Sample rate assumed for headerless PCM uploads.
pub const SAMPLE_RATE: u32 = 16_000;

/// Full-scale value of signed 16-bit PCM, used for normalization.
const I16_FULL_SCALE: f32 = 32_768.0;

/// Normalized mono audio decoded from one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSequence {
    /// Samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SampleSequence {
    pub fn duration_seconds(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode a complete audio buffer into normalized mono samples.
///
/// Buffers carrying a RIFF/WAVE header are decoded as-is; anything else is
/// treated as raw 16-bit signed little-endian mono PCM at 16 kHz and gets a
/// synthesized header, so downstream code never special-cases headerless
/// input. Multi-channel audio keeps channel 0.
pub fn decode_audio(bytes: &[u8]) -> Result<SampleSequence, VoiceError> {
    if bytes.is_empty() {
        return Err(VoiceError::Decode("empty audio buffer".into()));
    }

    let owned;
    let wav_bytes = if bytes.len() >= 4 && &bytes[..4] == b"RIFF" {
        bytes
    } else {
        owned = synthesize_wav_header(bytes)?;
        owned.as_slice()
    };

    let mut reader = WavReader::new(Cursor::new(wav_bytes))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(VoiceError::Decode("audio declares zero channels".into()));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample > 16 {
        return Err(VoiceError::Decode(format!(
            "unsupported sample format: {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let interleaved: Vec<i16> = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
    let samples: Vec<f32> = interleaved
        .iter()
        .step_by(spec.channels as usize)
        .map(|&s| s as f32 / I16_FULL_SCALE)
        .collect();

    if samples.is_empty() {
        return Err(VoiceError::Decode("audio contains no samples".into()));
    }

    Ok(SampleSequence {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Prepend a 44-byte PCM WAV header (16-bit signed LE, mono, 16 kHz) to a raw
/// sample buffer.
fn synthesize_wav_header(pcm: &[u8]) -> Result<Vec<u8>, VoiceError> {
    if pcm.len() % 2 != 0 {
        return Err(VoiceError::Decode(
            "raw PCM buffer truncated mid-sample".into(),
        ));
    }

    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_raw_pcm_with_synthesized_header() {
        let bytes = pcm_bytes(&[0, 16_384, -16_384, 32_767]);
        let seq = decode_audio(&bytes).unwrap();
        assert_eq!(seq.sample_rate, SAMPLE_RATE);
        assert_eq!(seq.samples.len(), 4);
        assert_eq!(seq.samples[0], 0.0);
        assert_eq!(seq.samples[1], 0.5);
        assert_eq!(seq.samples[2], -0.5);
        assert!(seq.samples[3] < 1.0);
    }

    #[test]
    fn rejects_empty_buffer() {
        assert!(matches!(decode_audio(&[]), Err(VoiceError::Decode(_))));
    }

    #[test]
    fn rejects_odd_length_raw_pcm() {
        let bytes = vec![0u8, 1, 2];
        assert!(matches!(decode_audio(&bytes), Err(VoiceError::Decode(_))));
    }

    #[test]
    fn decodes_wav_container() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [100i16, -100, 200] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        let seq = decode_audio(&cursor.into_inner()).unwrap();
        assert_eq!(seq.samples.len(), 3);
        assert!((seq.samples[0] - 100.0 / 32_768.0).abs() < 1e-7);
    }

    #[test]
    fn keeps_first_channel_of_stereo() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for (left, right) in [(1000i16, -1000i16), (2000, -2000)] {
                writer.write_sample(left).unwrap();
                writer.write_sample(right).unwrap();
            }
            writer.finalize().unwrap();
        }
        let seq = decode_audio(&cursor.into_inner()).unwrap();
        assert_eq!(seq.samples.len(), 2);
        assert!(seq.samples.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn samples_stay_in_unit_range() {
        let bytes = pcm_bytes(&[i16::MIN, i16::MAX, 0]);
        let seq = decode_audio(&bytes).unwrap();
        assert!(seq.samples.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn duration_reflects_sample_count() {
        let bytes = pcm_bytes(&vec![0i16; SAMPLE_RATE as usize]);
        let seq = decode_audio(&bytes).unwrap();
        assert!((seq.duration_seconds() - 1.0).abs() < 1e-6);
    }
}
