//! Encoder plugins and the driver that runs them.
//!
//! An [`Encoder`] is a codec callback set: track start/end plus PCM
//! blocks in, packets out. The [`EncoderDriver`] owns the plugin, its PCM
//! buffer (reader side), its packet ring buffers (writer side) and an
//! optional barrier slot, and runs the pull-encode-emit loop on its own
//! thread.

mod pcm;

pub use pcm::PcmEncoder;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::error::StartupError;
use crate::format::{PcmFormat, StreamFormat};
use crate::lifecycle::Lifecycle;
use crate::metadata::{encode_oob_command, encode_oob_metadata, Metadata};
use crate::pipeline::barrier::{BarrierHolder, TrackBarrier};
use crate::pipeline::packet::{flags, PacketRingBuffer};
use crate::pipeline::pcm_buffer::PcmBuffer;
use crate::resampler::ResamplerFactory;

/// Driver scratch buffer size in bytes.
const ENCODER_BUFFER: usize = 4096;

/// Wait long enough on an empty PCM buffer and it gets logged.
const UNDERRUN_LOG_MS: u128 = 500;

/// Where plugins emit their packets; fans out to all attached ring
/// buffers and folds the start-of-track flag into the first packet after
/// a track change.
pub struct PacketWriter {
    sinks: Vec<Arc<PacketRingBuffer>>,
    start_of_track: bool,
}

impl PacketWriter {
    fn new() -> Self {
        Self {
            sinks: Vec::new(),
            start_of_track: false,
        }
    }

    /// Emits an audio packet covering `frames` frames.
    pub fn packet(&mut self, frames: usize, data: &[u8]) {
        self.packet_with_flags(0, frames, data);
    }

    /// Emits an audio packet with extra flags.
    pub fn packet_with_flags(&mut self, mut packet_flags: u32, frames: usize, data: &[u8]) {
        if self.start_of_track {
            packet_flags |= flags::START_OF_TRACK;
            self.start_of_track = false;
        }
        for sink in &self.sinks {
            sink.write_packet(packet_flags, frames, data);
        }
    }

    /// Emits an out-of-band packet. These never consume the start-of-track
    /// flag; that belongs to the audio stream.
    pub fn packet_oob(&mut self, packet_flags: u32, data: &[u8]) {
        for sink in &self.sinks {
            sink.write_packet(flags::OUT_OF_BAND | packet_flags, 0, data);
        }
    }

    fn close(&self) {
        for sink in &self.sinks {
            sink.close();
        }
    }
}

/// A codec plugin.
pub trait Encoder: Send {
    /// The format this encoder hands to its brocas.
    fn stream_format(&self) -> StreamFormat;

    /// The output frame rate, when the codec changes it.
    fn output_frame_rate(&self) -> Option<u32> {
        None
    }

    /// Begins a track. Container headers emitted here carry the
    /// start-of-track flag.
    fn start_track(&mut self, out: &mut PacketWriter, metadata: &Metadata);

    /// Encodes one frame-aligned block of PCM.
    fn pcm_block(&mut self, out: &mut PacketWriter, frames: usize, data: &[u8]);

    /// Ends a track. Called exactly once per `start_track`, before the
    /// next one and before shutdown.
    fn end_track(&mut self, _out: &mut PacketWriter) {}
}

/// Runs one encoder: PCM in, packets out, barrier-synced track changes.
pub struct EncoderDriver {
    plugin: Box<dyn Encoder>,
    source: Arc<PcmBuffer>,
    writer: PacketWriter,
    barrier: Option<BarrierHolder>,
    lifecycle: Arc<Lifecycle>,
    format: PcmFormat,
}

impl EncoderDriver {
    /// Wires a driver around a plugin.
    pub fn new(
        plugin: Box<dyn Encoder>,
        source: Arc<PcmBuffer>,
        barrier: Option<Arc<TrackBarrier>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        let format = *source.format();
        Self {
            plugin,
            source,
            writer: PacketWriter::new(),
            barrier: barrier.map(BarrierHolder::new),
            lifecycle,
            format,
        }
    }

    /// Attaches one packet ring buffer (one per broca).
    pub fn add_sink(&mut self, sink: Arc<PacketRingBuffer>) {
        self.writer.sinks.push(sink);
    }

    /// The stream format brocas will receive.
    pub fn stream_format(&self) -> StreamFormat {
        self.plugin.stream_format()
    }

    /// The frame rate brocas should pace against.
    pub fn frame_rate(&self) -> u32 {
        self.plugin.output_frame_rate().unwrap_or(self.format.rate)
    }

    /// The encoder loop; runs until the PCM buffer closes.
    pub fn run(&mut self) {
        let mut scratch = vec![0u8; ENCODER_BUFFER.max(self.format.bytes_per_frame())];
        let mut track_open = false;

        while self.lifecycle.running() {
            if let Some(change) = self.source.read_metadata() {
                if track_open {
                    self.plugin.end_track(&mut self.writer);
                }
                if let Some(holder) = &self.barrier {
                    holder.barrier().sync(change.serial);
                }
                self.writer.start_of_track = true;
                self.plugin.start_track(&mut self.writer, &change.metadata);
                self.writer
                    .packet_oob(flags::METADATA, &encode_oob_metadata(&change.metadata));
                self.writer
                    .packet_oob(flags::ORIGINAL_COMMAND, &encode_oob_command(&change.command));
                track_open = true;
            }

            let waited = Instant::now();
            let n = self.source.read_pcm(&mut scratch);
            let waited = waited.elapsed();
            if n > 0 {
                if waited.as_millis() >= UNDERRUN_LOG_MS {
                    tracing::warn!(
                        index = self.source.index(),
                        waited_ms = waited.as_millis() as u64,
                        "buffer underrun"
                    );
                }
                self.plugin.pcm_block(
                    &mut self.writer,
                    n / self.format.bytes_per_frame(),
                    &scratch[..n],
                );
            } else if self.source.closed() {
                break;
            }
        }

        if track_open {
            self.plugin.end_track(&mut self.writer);
        }
        self.close();
    }

    /// Closes every attached packet ring buffer.
    pub fn close(&self) {
        self.writer.close();
    }
}

/// Instantiates an encoder plugin by registered name.
pub fn create_encoder(
    name: &str,
    config: &Value,
    format: PcmFormat,
    resamplers: &ResamplerFactory,
) -> Result<Box<dyn Encoder>, StartupError> {
    match name {
        "pcm" => Ok(Box::new(PcmEncoder::new(config, format, resamplers))),
        _ => Err(StartupError::UnknownEncoder {
            name: name.to_string(),
        }),
    }
}
