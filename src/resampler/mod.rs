//! Sample-rate conversion plugins.
//!
//! Encoders whose output rate differs from the shared PCM rate pull
//! frames through a [`Resampler`]. The contract works on interleaved f32
//! frames: a call may consume less input than offered (internal buffer
//! full) and produce less output than there is room for (needs more
//! input); whole frames only, never partial ones. `flush` drains the
//! tail once input has ended.

mod linear;

pub use linear::LinearResampler;

use serde_json::Value;

use crate::error::StartupError;

/// Result of one resample call: whole frames consumed and produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResampleReturn {
    /// Frames read from the input.
    pub read: usize,
    /// Frames written to the output.
    pub wrote: usize,
}

/// Converts interleaved f32 PCM from one rate to another.
pub trait Resampler: Send {
    /// Resamples from `src` into `dst`, both interleaved with the
    /// constructed channel count. Buffer lengths must be whole frames.
    fn resample_interleaved(&mut self, dst: &mut [f32], src: &[f32]) -> ResampleReturn;

    /// Yields remaining partial output, assuming silence follows the
    /// final input. Returns frames written.
    fn flush_interleaved(&mut self, dst: &mut [f32]) -> usize;
}

/// Builds resamplers of one configured type for arbitrary target rates.
pub struct ResamplerFactory {
    name: String,
    config: Value,
    channels: usize,
    source_rate: u32,
}

impl ResamplerFactory {
    /// Creates a factory; `name` must be a registered resampler type,
    /// the empty string meaning the default (`linear`).
    pub fn new(
        name: &str,
        config: Value,
        channels: usize,
        source_rate: u32,
    ) -> Result<Self, StartupError> {
        let name = if name.is_empty() { "linear" } else { name };
        match name {
            "linear" => Ok(Self {
                name: name.to_string(),
                config,
                channels,
                source_rate,
            }),
            _ => Err(StartupError::UnknownResampler {
                name: name.to_string(),
            }),
        }
    }

    /// Instantiates a resampler to the given target rate.
    pub fn create(&self, target_rate: u32) -> Box<dyn Resampler> {
        // only "linear" is registered; config has no knobs for it yet
        debug_assert_eq!(self.name, "linear");
        let _ = &self.config;
        Box::new(LinearResampler::new(
            self.channels,
            self.source_rate,
            target_rate,
        ))
    }
}
