//! Server configuration.
//!
//! One JSON object wires the whole relay: the shell command queue, the
//! publish queues, the command-name → decoder map, the shared PCM buffer
//! format, the resampler, and the outputs (encoder + broca fan-out each).
//! Unknown keys are ignored so configs can carry operator annotations.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::StartupError;
use crate::format::{ChannelLayout, PcmFormat, SampleFormat};
use crate::pipeline::pcm_buffer::DropPolicy;

fn default_config() -> Value {
    Value::Null
}

/// A queue transport reference: type name plus opaque plugin config.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Registered transport name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque transport config.
    #[serde(default = "default_config")]
    pub config: Value,
}

/// A decoder reference: type name plus opaque plugin config.
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Registered decoder name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque decoder config.
    #[serde(default = "default_config")]
    pub config: Value,
}

/// Shared PCM buffer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PcmBufferConfig {
    /// Sample format.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub samplerate: u32,
    /// Channel layout.
    pub channels: ChannelLayout,
    /// Buffered seconds of PCM per output.
    pub duration: f64,
    /// Enables the sample-rate drop policy.
    pub skip: bool,
    /// Admission deadline slack in seconds.
    pub skipmargin: f64,
    /// Forward-compatible drop scaling knob.
    pub skipfactor: f64,
}

impl Default for PcmBufferConfig {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16,
            samplerate: 44100,
            channels: ChannelLayout::Stereo,
            duration: 1.0,
            skip: true,
            skipmargin: 0.1,
            skipfactor: 2.0,
        }
    }
}

impl PcmBufferConfig {
    /// The PCM format every stage shares.
    pub fn pcm_format(&self) -> PcmFormat {
        PcmFormat {
            sample: self.format,
            rate: self.samplerate,
            channels: self.channels,
        }
    }

    /// Byte capacity of one output's PCM ring.
    pub fn byte_size(&self) -> usize {
        (self.duration * f64::from(self.samplerate)) as usize
            * self.pcm_format().bytes_per_frame()
    }

    /// The drop policy handed to each PCM buffer.
    pub fn drop_policy(&self) -> DropPolicy {
        DropPolicy {
            enabled: self.skip,
            margin: Duration::from_secs_f64(self.skipmargin),
            factor: self.skipfactor,
        }
    }

    fn validate(&self) -> Result<(), StartupError> {
        if self.samplerate == 0 {
            return Err(StartupError::invalid_config("samplerate cannot be zero"));
        }
        for (value, name) in [
            (self.duration, "duration"),
            (self.skipmargin, "skipmargin"),
            (self.skipfactor, "skipfactor"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(StartupError::invalid_config(format!(
                    "{name} cannot be negative"
                )));
            }
        }
        Ok(())
    }
}

/// Resampler selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResamplerConfig {
    /// Registered resampler name; empty selects the default.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque resampler config.
    pub config: Value,
}

/// One broca attached to an output.
#[derive(Debug, Clone, Deserialize)]
pub struct BrocaConfig {
    /// Registered broca name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque broca config.
    #[serde(default = "default_config")]
    pub config: Value,
}

fn default_packet_buffer() -> usize {
    65536
}

/// One output: an encoder and its brocas.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Registered encoder name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Packet ring capacity in bytes, per broca.
    #[serde(default = "default_packet_buffer")]
    pub buffer: usize,
    /// Opaque encoder config.
    #[serde(default = "default_config")]
    pub config: Value,
    /// Sinks fed by this encoder.
    pub broca: Vec<BrocaConfig>,
    /// Barrier group name; outputs sharing a name sync track changes.
    #[serde(default)]
    pub barrier: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// The command source.
    pub shell: QueueConfig,
    /// Acknowledgement destinations.
    #[serde(default)]
    pub publish: Vec<QueueConfig>,
    /// Command name → decoder.
    pub commands: HashMap<String, DecoderConfig>,
    /// Shared PCM buffer settings.
    #[serde(default)]
    pub pcmbuffer: PcmBufferConfig,
    /// Resampler selection.
    #[serde(default)]
    pub resampler: ResamplerConfig,
    /// Encoder/broca outputs.
    pub outputs: Vec<OutputConfig>,
}

impl ServerConfig {
    /// Parses and validates a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, StartupError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self, StartupError> {
        let text = fs::read_to_string(path).map_err(|source| StartupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), StartupError> {
        if self.outputs.is_empty() {
            return Err(StartupError::NoOutputs);
        }
        self.pcmbuffer.validate()?;
        for output in &self.outputs {
            if output.broca.is_empty() {
                return Err(StartupError::invalid_config(format!(
                    "output '{}' has no brocas",
                    output.kind
                )));
            }
        }
        Ok(())
    }
}
