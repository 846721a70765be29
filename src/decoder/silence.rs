//! Silence generator.
//!
//! Decodes a duration parameter into that many frames of digital silence.
//! Useful for gap insertion and as the simplest possible end-to-end test
//! source.

use std::sync::Arc;

use serde_json::Value;

use crate::decoder::{duration_param, Decoder, DecoderContext};
use crate::format::write_sample;
use crate::lifecycle::Phase;
use crate::metadata::Metadata;
use crate::pipeline::job_queue::{DecodeJob, QueuedJob};

/// Generation block size in bytes.
const BLOCK_BYTES: usize = 8192;

/// Decoder producing silent PCM for a given number of seconds.
pub struct SilenceDecoder {
    context: DecoderContext,
}

impl SilenceDecoder {
    /// Creates the decoder; it has no configuration.
    pub fn new(context: DecoderContext) -> Self {
        Self { context }
    }
}

impl Decoder for SilenceDecoder {
    fn create_job(&self, param: &Value, command: Arc<Value>) -> Option<QueuedJob> {
        let duration = duration_param("silence", param)?;
        let frames = self.context.format.duration_to_frames(duration);
        Some(Box::new(SilenceJob {
            context: self.context.clone(),
            command,
            frames,
        }))
    }
}

struct SilenceJob {
    context: DecoderContext,
    command: Arc<Value>,
    frames: usize,
}

impl DecodeJob for SilenceJob {
    fn run(&mut self) {
        let format = &self.context.format;
        let frames_per_block = BLOCK_BYTES / format.bytes_per_frame();

        let mut block = Vec::with_capacity(frames_per_block * format.bytes_per_frame());
        for _ in 0..frames_per_block * format.channels.channel_count() {
            write_sample(&mut block, format.sample, 0.0);
        }

        self.context.sink.metadata(Arc::clone(&self.command), Metadata::new());
        while self.context.lifecycle.should_run(Phase::NoMoreJobs) && self.frames > 0 {
            let frames_this_block = self.frames.min(frames_per_block);
            self.frames -= frames_this_block;
            self.context
                .sink
                .pcm(&block[..frames_this_block * format.bytes_per_frame()]);
        }
    }
}
