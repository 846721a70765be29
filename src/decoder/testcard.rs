//! Test tone generator.
//!
//! Produces a fixed-frequency sine across all channels for a given
//! duration. The phase is carried between blocks so the tone is
//! continuous no matter how the splitter chops it.

use std::f64::consts::TAU;
use std::sync::Arc;

use serde_json::Value;

use crate::decoder::{duration_param, Decoder, DecoderContext};
use crate::format::write_sample;
use crate::lifecycle::Phase;
use crate::metadata::Metadata;
use crate::pipeline::job_queue::{DecodeJob, QueuedJob};

/// Generation block size in bytes.
const BLOCK_BYTES: usize = 8192;

/// Decoder producing a sine test tone.
pub struct TestcardDecoder {
    context: DecoderContext,
    /// Phase increment per frame, radians.
    step: f64,
    /// Signed amplitude; the frequency's sign folds in here.
    amplitude: f64,
}

impl TestcardDecoder {
    /// Creates the decoder from its config object:
    /// `{amplitude (default 0.5), frequency (default 1000)}`.
    pub fn new(config: &Value, context: DecoderContext) -> Self {
        let amplitude = config
            .get("amplitude")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        let frequency = config
            .get("frequency")
            .and_then(Value::as_f64)
            .unwrap_or(1000.0);

        let step = TAU * frequency.abs() / f64::from(context.format.rate);
        let amplitude = frequency.signum() * amplitude.clamp(0.0, 1.0);
        Self {
            context,
            step,
            amplitude,
        }
    }
}

impl Decoder for TestcardDecoder {
    fn create_job(&self, param: &Value, command: Arc<Value>) -> Option<QueuedJob> {
        let duration = duration_param("testcard", param)?;
        let frames = self.context.format.duration_to_frames(duration);
        Some(Box::new(TestcardJob {
            context: self.context.clone(),
            command,
            frames,
            step: self.step,
            amplitude: self.amplitude,
        }))
    }
}

struct TestcardJob {
    context: DecoderContext,
    command: Arc<Value>,
    frames: usize,
    step: f64,
    amplitude: f64,
}

impl DecodeJob for TestcardJob {
    fn run(&mut self) {
        let format = self.context.format;
        let frames_per_block = BLOCK_BYTES / format.bytes_per_frame();
        let channels = format.channels.channel_count();

        let mut phase = 0.0f64;
        let mut block = Vec::with_capacity(BLOCK_BYTES);

        self.context.sink.metadata(Arc::clone(&self.command), Metadata::new());
        while self.context.lifecycle.should_run(Phase::NoMoreJobs) && self.frames > 0 {
            let frames_this_block = self.frames.min(frames_per_block);
            block.clear();
            for i in 0..frames_this_block {
                let value = (phase + self.step * i as f64).sin() * self.amplitude;
                for _ in 0..channels {
                    write_sample(&mut block, format.sample, value);
                }
            }
            phase = (phase + self.step * frames_this_block as f64) % TAU;

            self.frames -= frames_this_block;
            self.context.sink.pcm(&block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::test_context;
    use crate::format::samples_to_f32;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let decoder = TestcardDecoder::new(&json!({}), test_context());
        assert!((decoder.amplitude - 0.5).abs() < 1e-12);
        assert!((decoder.step - TAU * 1000.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_frequency_inverts_amplitude() {
        let decoder =
            TestcardDecoder::new(&json!({"frequency": -440.0, "amplitude": 0.8}), test_context());
        assert!(decoder.amplitude < 0.0);
        assert!(decoder.step > 0.0);
    }

    #[test]
    fn test_tone_is_bounded_and_nonzero() {
        let context = test_context();
        let buffer = context.sink.add_buffer(crate::pipeline::pcm_buffer::DropPolicy {
            enabled: false,
            margin: std::time::Duration::ZERO,
            factor: 0.0,
        });

        let decoder = TestcardDecoder::new(&json!({"amplitude": 0.5}), context);
        let command = Arc::new(json!({"cmd": "tone", "param": 0.1}));
        let mut job = decoder.create_job(&json!(0.1), command).unwrap();

        let producer = std::thread::spawn(move || job.run());
        producer.join().unwrap();
        buffer.close();

        buffer.read_metadata().unwrap();
        let mut bytes = Vec::new();
        let mut out = vec![0u8; 65536];
        loop {
            let n = buffer.read_pcm(&mut out);
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&out[..n]);
        }
        assert_eq!(bytes.len(), 4410 * 4);

        let samples = samples_to_f32(&bytes, crate::format::SampleFormat::S16);
        assert!(samples.iter().any(|&s| s > 0.1));
        assert!(samples.iter().any(|&s| s < -0.1));
        assert!(samples.iter().all(|&s| s.abs() <= 0.51));
    }

    #[test]
    fn test_stereo_channels_carry_same_tone() {
        let context = test_context();
        let buffer = context.sink.add_buffer(crate::pipeline::pcm_buffer::DropPolicy {
            enabled: false,
            margin: std::time::Duration::ZERO,
            factor: 0.0,
        });

        let decoder = TestcardDecoder::new(&json!({}), context);
        let mut job = decoder
            .create_job(&json!(0.01), Arc::new(json!({"cmd": "tone"})))
            .unwrap();
        job.run();
        buffer.close();

        buffer.read_metadata().unwrap();
        let mut bytes = Vec::new();
        let mut out = vec![0u8; 65536];
        loop {
            let n = buffer.read_pcm(&mut out);
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&out[..n]);
        }
        let samples = samples_to_f32(&bytes, crate::format::SampleFormat::S16);
        for frame in samples.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }
}
