//! Raw PCM passthrough encoder.
//!
//! Emits PCM frames as-is, one packet per block. Optionally re-rates the
//! output through the configured resampler (`samplerate` in the encoder
//! config), converting through f32 and back. With `metadata` set, track
//! metadata is dumped to the log at each track start.

use serde_json::Value;

use crate::encoder::{Encoder, PacketWriter};
use crate::format::{f32_to_samples, samples_to_f32, PcmFormat, StreamFormat};
use crate::metadata::Metadata;
use crate::resampler::{Resampler, ResamplerFactory};

/// Output scratch size in frames for the re-rate path.
const RESAMPLE_BLOCK_FRAMES: usize = 4096;

/// Passthrough encoder, with optional re-rate.
pub struct PcmEncoder {
    format: PcmFormat,
    dump_metadata: bool,
    resampler: Option<Box<dyn Resampler>>,
    output_rate: Option<u32>,
}

impl PcmEncoder {
    /// Creates the encoder from its config:
    /// `{metadata: bool, samplerate: uint}` (both optional).
    pub fn new(config: &Value, format: PcmFormat, resamplers: &ResamplerFactory) -> Self {
        let dump_metadata = config
            .get("metadata")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let output_rate = config
            .get("samplerate")
            .and_then(Value::as_u64)
            .map(|rate| rate as u32)
            .filter(|&rate| rate != 0 && rate != format.rate);
        let resampler = output_rate.map(|rate| resamplers.create(rate));

        Self {
            format,
            dump_metadata,
            resampler,
            output_rate,
        }
    }
}

impl Encoder for PcmEncoder {
    fn stream_format(&self) -> StreamFormat {
        let mut format = self.format;
        if let Some(rate) = self.output_rate {
            format.rate = rate;
        }
        StreamFormat::Pcm(format)
    }

    fn output_frame_rate(&self) -> Option<u32> {
        self.output_rate
    }

    fn start_track(&mut self, _out: &mut PacketWriter, metadata: &Metadata) {
        if self.dump_metadata {
            tracing::info!("pcm metadata dump");
            for (key, value) in metadata.iter() {
                tracing::info!("pcm metadata : {key}={value}");
            }
        }
    }

    fn pcm_block(&mut self, out: &mut PacketWriter, frames: usize, data: &[u8]) {
        let Some(resampler) = self.resampler.as_mut() else {
            out.packet(frames, data);
            return;
        };

        let channels = self.format.channels.channel_count();
        let samples = samples_to_f32(data, self.format.sample);
        let mut scratch = vec![0.0f32; RESAMPLE_BLOCK_FRAMES * channels];
        let mut offset = 0;
        while offset < samples.len() {
            let result = resampler.resample_interleaved(&mut scratch, &samples[offset..]);
            if result.read == 0 && result.wrote == 0 {
                break;
            }
            offset += result.read * channels;
            if result.wrote > 0 {
                let bytes =
                    f32_to_samples(&scratch[..result.wrote * channels], self.format.sample);
                out.packet(result.wrote, &bytes);
            }
        }
    }

    fn end_track(&mut self, out: &mut PacketWriter) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        let channels = self.format.channels.channel_count();
        let mut scratch = vec![0.0f32; RESAMPLE_BLOCK_FRAMES * channels];
        loop {
            let frames = resampler.flush_interleaved(&mut scratch);
            if frames == 0 {
                break;
            }
            let bytes = f32_to_samples(&scratch[..frames * channels], self.format.sample);
            out.packet(frames, &bytes);
        }
    }
}
