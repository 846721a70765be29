//! PCM and stream format types.
//!
//! Everything in the pipeline agrees on one [`PcmFormat`] (sample format,
//! rate, channel layout) chosen at startup. Encoders declare what they
//! produce with a [`StreamFormat`], which is either raw PCM or an encoded
//! codec tag.

use std::time::Duration;

use serde::Deserialize;

/// Sample representation of a single PCM value.
///
/// All multi-byte formats use native endianness. `S24` is stored in a
/// 32-bit container and is internal-only (not accepted from config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SampleFormat {
    /// Signed 8-bit.
    #[serde(rename = "s8")]
    S8,
    /// Unsigned 8-bit.
    #[serde(rename = "u8")]
    U8,
    /// Signed 16-bit.
    #[serde(rename = "s16")]
    S16,
    /// Signed 24-bit in a 32-bit container.
    #[serde(skip)]
    S24,
    /// 32-bit float, nominal range [-1, +1].
    #[serde(rename = "f32")]
    F32,
}

impl SampleFormat {
    /// Width of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S8 | Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 | Self::F32 => 4,
        }
    }

    /// Number of meaningful bits in one sample.
    pub fn effective_bits(self) -> u32 {
        match self {
            Self::S8 | Self::U8 => 8,
            Self::S16 => 16,
            Self::S24 => 24,
            Self::F32 => 32,
        }
    }
}

/// Largest sample width any format uses.
pub const MAX_BYTES_PER_SAMPLE: usize = 4;

/// Channel arrangement. Only mono and stereo are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// One channel.
    Mono,
    /// Two interleaved channels, left then right.
    Stereo,
}

impl ChannelLayout {
    /// Number of channels in this layout.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// Largest channel count any layout uses.
pub const MAX_CHANNELS: usize = 2;

/// Upper bound on `bytes_per_frame` across all formats.
pub const MAX_BYTES_PER_FRAME: usize = MAX_BYTES_PER_SAMPLE * MAX_CHANNELS;

/// Full description of raw PCM: sample format, rate and channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    /// Per-sample representation.
    pub sample: SampleFormat,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel arrangement.
    pub channels: ChannelLayout,
}

impl PcmFormat {
    /// Bytes in a single sample.
    pub fn bytes_per_sample(&self) -> usize {
        self.sample.bytes_per_sample()
    }

    /// Bytes in a single frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels.channel_count()
    }

    /// Number of whole frames covering `duration` seconds.
    pub fn duration_to_frames(&self, duration: f64) -> usize {
        (duration * f64::from(self.rate)) as usize
    }

    /// Playback time of `bytes` bytes of PCM in this format.
    pub fn estimate_duration(&self, bytes: usize) -> Duration {
        let frames = bytes / self.bytes_per_frame();
        Duration::from_secs_f64(frames as f64 / f64::from(self.rate))
    }
}

/// Codec tag for encoded output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// MPEG-1 Layer III.
    Mp3,
    /// Vorbis in an Ogg container.
    OggVorbis,
    /// Opus in an Ogg container.
    OggOpus,
    /// FLAC in an Ogg container.
    OggFlac,
}

/// What an encoder hands to its brocas: raw PCM or an encoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    /// Uncompressed PCM in the given format.
    Pcm(PcmFormat),
    /// An encoded stream identified by codec.
    Encoded(Codec),
}

/// Appends one sample with nominal value `value` in [-1, +1] to `out`.
///
/// Values outside the nominal range are clamped for the integer formats.
pub fn write_sample(out: &mut Vec<u8>, format: SampleFormat, value: f64) {
    match format {
        SampleFormat::S8 => {
            let v = (value * 127.0).clamp(-128.0, 127.0) as i8;
            out.push(v as u8);
        }
        SampleFormat::U8 => {
            let v = ((value * 127.0) + 128.0).clamp(0.0, 255.0) as u8;
            out.push(v);
        }
        SampleFormat::S16 => {
            let v = (value * 32767.0).clamp(-32768.0, 32767.0) as i16;
            out.extend_from_slice(&v.to_ne_bytes());
        }
        SampleFormat::S24 => {
            let v = (value * 8_388_607.0).clamp(-8_388_608.0, 8_388_607.0) as i32;
            out.extend_from_slice(&v.to_ne_bytes());
        }
        SampleFormat::F32 => {
            out.extend_from_slice(&(value as f32).to_ne_bytes());
        }
    }
}

/// Reads interleaved samples from `data` into f32 values in [-1, +1].
///
/// `data` must be a whole number of samples in `format`.
pub fn samples_to_f32(data: &[u8], format: SampleFormat) -> Vec<f32> {
    let width = format.bytes_per_sample();
    let mut out = Vec::with_capacity(data.len() / width);
    for raw in data.chunks_exact(width) {
        let v = match format {
            SampleFormat::S8 => f32::from(raw[0] as i8) / 127.0,
            SampleFormat::U8 => (f32::from(raw[0]) - 128.0) / 127.0,
            SampleFormat::S16 => {
                f32::from(i16::from_ne_bytes([raw[0], raw[1]])) / 32767.0
            }
            SampleFormat::S24 => {
                i32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]) as f32 / 8_388_607.0
            }
            SampleFormat::F32 => f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
        };
        out.push(v);
    }
    out
}

/// Writes f32 samples in [-1, +1] back out as interleaved `format` bytes.
pub fn f32_to_samples(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    for &s in samples {
        write_sample(&mut out, format, f64::from(s));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s16_stereo() -> PcmFormat {
        PcmFormat {
            sample: SampleFormat::S16,
            rate: 44100,
            channels: ChannelLayout::Stereo,
        }
    }

    #[test]
    fn test_bytes_per_frame() {
        assert_eq!(s16_stereo().bytes_per_frame(), 4);

        let f32_mono = PcmFormat {
            sample: SampleFormat::F32,
            rate: 48000,
            channels: ChannelLayout::Mono,
        };
        assert_eq!(f32_mono.bytes_per_frame(), 4);
    }

    #[test]
    fn test_duration_to_frames() {
        assert_eq!(s16_stereo().duration_to_frames(2.0), 88200);
        assert_eq!(s16_stereo().duration_to_frames(0.0), 0);
    }

    #[test]
    fn test_estimate_duration() {
        // 1 second of s16 stereo at 44100 Hz
        let d = s16_stereo().estimate_duration(44100 * 4);
        assert_eq!(d, Duration::from_secs(1));
    }

    #[test]
    fn test_write_sample_widths() {
        for (format, width) in [
            (SampleFormat::S8, 1),
            (SampleFormat::U8, 1),
            (SampleFormat::S16, 2),
            (SampleFormat::S24, 4),
            (SampleFormat::F32, 4),
        ] {
            let mut out = Vec::new();
            write_sample(&mut out, format, 0.0);
            assert_eq!(out.len(), width, "{format:?}");
        }
    }

    #[test]
    fn test_write_sample_silence_s16() {
        let mut out = Vec::new();
        write_sample(&mut out, SampleFormat::S16, 0.0);
        assert_eq!(out, vec![0, 0]);
    }

    #[test]
    fn test_write_sample_silence_u8_is_midpoint() {
        let mut out = Vec::new();
        write_sample(&mut out, SampleFormat::U8, 0.0);
        assert_eq!(out, vec![128]);
    }

    #[test]
    fn test_write_sample_clamps() {
        let mut out = Vec::new();
        write_sample(&mut out, SampleFormat::S16, 2.0);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), 32767);

        out.clear();
        write_sample(&mut out, SampleFormat::S16, -2.0);
        assert_eq!(i16::from_ne_bytes([out[0], out[1]]), -32768);
    }

    #[test]
    fn test_sample_f32_round_trip() {
        let values = [-1.0f32, -0.5, 0.0, 0.25, 1.0];
        let bytes = f32_to_samples(&values, SampleFormat::S16);
        let back = samples_to_f32(&bytes, SampleFormat::S16);
        assert_eq!(back.len(), values.len());
        for (a, b) in values.iter().zip(&back) {
            assert!((a - b).abs() < 1.0 / 32000.0, "{a} vs {b}");
        }
    }

    #[test]
    fn test_parse_sample_format_from_config() {
        let f: SampleFormat = serde_json::from_str("\"s16\"").unwrap();
        assert_eq!(f, SampleFormat::S16);
        // s24 is internal-only
        assert!(serde_json::from_str::<SampleFormat>("\"s24\"").is_err());
    }

    #[test]
    fn test_parse_channel_layout() {
        let c: ChannelLayout = serde_json::from_str("\"stereo\"").unwrap();
        assert_eq!(c.channel_count(), 2);
    }
}
