//! Linear-interpolation resampler.
//!
//! Fast and artifact-prone for large ratio changes, which is acceptable
//! for the passthrough re-rate paths this crate needs. Keeps the last
//! input frame between calls so interpolation is continuous across block
//! boundaries.

use crate::resampler::{ResampleReturn, Resampler};

/// Linear interpolation over interleaved frames.
pub struct LinearResampler {
    channels: usize,
    source_rate: u32,
    target_rate: u32,
    /// Last input frame of the previous call, for cross-block continuity.
    carry: Vec<f32>,
    has_carry: bool,
    /// Position of the next output sample in source-frame units,
    /// relative to the carry frame.
    position: f64,
    passthrough: bool,
}

impl LinearResampler {
    /// Creates a resampler for `channels`-channel interleaved audio.
    pub fn new(channels: usize, source_rate: u32, target_rate: u32) -> Self {
        Self {
            channels: channels.max(1),
            source_rate,
            target_rate,
            carry: vec![0.0; channels.max(1)],
            has_carry: false,
            position: 0.0,
            passthrough: source_rate == target_rate || source_rate == 0 || target_rate == 0,
        }
    }

    fn step(&self) -> f64 {
        f64::from(self.source_rate) / f64::from(self.target_rate)
    }

    fn frame_at<'a>(&'a self, src: &'a [f32], index: isize) -> &'a [f32] {
        if index < 0 {
            &self.carry
        } else {
            let start = index as usize * self.channels;
            &src[start..start + self.channels]
        }
    }
}

impl Resampler for LinearResampler {
    fn resample_interleaved(&mut self, dst: &mut [f32], src: &[f32]) -> ResampleReturn {
        let in_frames = src.len() / self.channels;
        let out_space = dst.len() / self.channels;

        if self.passthrough {
            let frames = in_frames.min(out_space);
            let samples = frames * self.channels;
            dst[..samples].copy_from_slice(&src[..samples]);
            return ResampleReturn {
                read: frames,
                wrote: frames,
            };
        }

        if in_frames == 0 || out_space == 0 {
            return ResampleReturn::default();
        }

        // without a carry frame the first input frame seeds it, so the
        // interpolation base index is src[-1] = carry
        if !self.has_carry {
            self.carry.copy_from_slice(&src[..self.channels]);
            self.has_carry = true;
            self.position = 0.0;
        }

        let step = self.step();
        let mut wrote = 0;
        let mut input_exhausted = false;
        while wrote < out_space {
            let base = self.position.floor();
            let index = base as isize - 1;
            // need src[index] and src[index + 1]
            if index + 1 >= in_frames as isize {
                input_exhausted = true;
                break;
            }
            let frac = (self.position - base) as f32;
            let from = self.frame_at(src, index);
            let to = self.frame_at(src, index + 1);
            for channel in 0..self.channels {
                dst[wrote * self.channels + channel] =
                    from[channel] + (to[channel] - from[channel]) * frac;
            }
            wrote += 1;
            self.position += step;
        }

        // consume what the interpolation point has moved past; the frame
        // just behind it becomes the next call's carry, the rest stays
        // with the caller
        let consumed = if input_exhausted {
            in_frames
        } else {
            (self.position.floor().max(0.0) as usize).min(in_frames)
        };
        if consumed > 0 {
            let last = (consumed - 1) * self.channels;
            self.carry.copy_from_slice(&src[last..last + self.channels]);
            self.position -= consumed as f64;
        }

        ResampleReturn {
            read: consumed,
            wrote,
        }
    }

    fn flush_interleaved(&mut self, dst: &mut [f32]) -> usize {
        if self.passthrough || !self.has_carry {
            return 0;
        }

        let out_space = dst.len() / self.channels;
        let step = self.step();
        let mut wrote = 0;
        // remaining positions interpolate toward silence
        while wrote < out_space && self.position < 1.0 {
            let frac = self.position.max(0.0) as f32;
            for channel in 0..self.channels {
                dst[wrote * self.channels + channel] = self.carry[channel] * (1.0 - frac);
            }
            wrote += 1;
            self.position += step;
        }
        if self.position >= 1.0 {
            self.has_carry = false;
        }
        wrote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_copies() {
        let mut resampler = LinearResampler::new(1, 44100, 44100);
        let src = [0.1f32, 0.2, 0.3];
        let mut dst = [0.0f32; 3];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert_eq!(result, ResampleReturn { read: 3, wrote: 3 });
        assert_eq!(dst, src);
        assert_eq!(resampler.flush_interleaved(&mut dst), 0);
    }

    #[test]
    fn test_downsample_halves_output() {
        let mut resampler = LinearResampler::new(1, 48000, 24000);
        let src: Vec<f32> = (0..480).map(|i| i as f32 / 480.0).collect();
        let mut dst = vec![0.0f32; 480];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert_eq!(result.read, 480);
        assert!((result.wrote as i64 - 240).abs() <= 1, "{}", result.wrote);
    }

    #[test]
    fn test_upsample_doubles_output() {
        let mut resampler = LinearResampler::new(1, 24000, 48000);
        let src: Vec<f32> = (0..240).map(|i| i as f32 / 240.0).collect();
        let mut dst = vec![0.0f32; 960];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert_eq!(result.read, 240);
        assert!((result.wrote as i64 - 480).abs() <= 2, "{}", result.wrote);
    }

    #[test]
    fn test_interpolated_values_between_inputs() {
        let mut resampler = LinearResampler::new(1, 1, 2);
        let src = [0.0f32, 1.0];
        let mut dst = [0.0f32; 8];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert!(result.wrote >= 2);
        // outputs are monotone between the two inputs
        for window in dst[..result.wrote].windows(2) {
            assert!(window[1] >= window[0] - 1e-6);
        }
        for &value in &dst[..result.wrote] {
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_stereo_keeps_channels_separate() {
        let mut resampler = LinearResampler::new(2, 44100, 22050);
        // left channel constant 0.5, right channel constant -0.25
        let src: Vec<f32> = (0..100).flat_map(|_| [0.5f32, -0.25]).collect();
        let mut dst = vec![0.0f32; 200];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert!(result.wrote > 0);
        for frame in dst[..result.wrote * 2].chunks(2) {
            assert!((frame[0] - 0.5).abs() < 1e-5);
            assert!((frame[1] + 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn test_continuity_across_calls() {
        // feeding one block or two halves must produce nearly the same
        // stream, proving the carry frame works
        let src: Vec<f32> = (0..64).map(|i| (i as f32 / 7.0).sin()).collect();

        let mut whole = LinearResampler::new(1, 48000, 44100);
        let mut dst_whole = vec![0.0f32; 128];
        let whole_n = whole.resample_interleaved(&mut dst_whole, &src).wrote;

        let mut split = LinearResampler::new(1, 48000, 44100);
        let mut dst_split = vec![0.0f32; 128];
        let first = split.resample_interleaved(&mut dst_split, &src[..32]).wrote;
        let second = split
            .resample_interleaved(&mut dst_split[first..], &src[32..])
            .wrote;

        assert!((whole_n as i64 - (first + second) as i64).abs() <= 1);
        let shared = whole_n.min(first + second);
        for i in 0..shared {
            assert!(
                (dst_whole[i] - dst_split[i]).abs() < 1e-4,
                "sample {i}: {} vs {}",
                dst_whole[i],
                dst_split[i]
            );
        }
    }

    #[test]
    fn test_small_output_buffer_limits_wrote() {
        let mut resampler = LinearResampler::new(1, 48000, 48001);
        let src = [0.5f32; 100];
        let mut dst = [0.0f32; 10];
        let result = resampler.resample_interleaved(&mut dst, &src);
        assert_eq!(result.wrote, 10);
        // unconverted input stays with the caller
        assert!(result.read <= 11, "{}", result.read);
    }

    #[test]
    fn test_flush_drains_tail() {
        let mut resampler = LinearResampler::new(1, 48000, 24000);
        let src = [1.0f32; 16];
        let mut dst = [0.0f32; 32];
        resampler.resample_interleaved(&mut dst, &src);

        let mut tail = [0.0f32; 8];
        let flushed = resampler.flush_interleaved(&mut tail);
        // at most one frame of tail at a 2:1 ratio
        assert!(flushed <= 2);
        // flushing twice yields nothing more
        assert_eq!(resampler.flush_interleaved(&mut tail), 0);
    }

    #[test]
    fn test_empty_input() {
        let mut resampler = LinearResampler::new(1, 48000, 44100);
        let mut dst = [0.0f32; 8];
        let result = resampler.resample_interleaved(&mut dst, &[]);
        assert_eq!(result, ResampleReturn::default());
    }
}
