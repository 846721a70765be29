//! Brocas: terminal sinks for encoded packet streams.
//!
//! Each broca consumes one encoder's packet ring buffer and delivers the
//! bytes somewhere external: a file, an Icecast mount, or nowhere at all
//! (discard, for testing and load generation). A broca runs on its own
//! thread and releases one token on the brocas-alive semaphore when its
//! loop exits, which is how shutdown knows all sinks have wound down.

mod discard;
mod file;
mod icecast;

pub use discard::DiscardBroca;
pub use file::FileBroca;
pub use icecast::IcecastBroca;

use std::sync::Arc;

use serde_json::Value;

use crate::error::StartupError;
use crate::format::StreamFormat;
use crate::lifecycle::{Lifecycle, Semaphore};
use crate::metadata::decode_oob_command;
use crate::pipeline::packet::{PacketRead, PacketRingBuffer};
use crate::publisher::Publisher;

/// Chunk buffer size for packet payload streaming.
pub const BROCA_BUFFER: usize = 4096;

/// Everything a broca needs besides its own config.
#[derive(Clone)]
pub struct BrocaContext {
    /// The encoder's packet stream.
    pub source: Arc<PacketRingBuffer>,
    /// Output frame rate, for pacing clocks.
    pub frame_rate: u32,
    /// Acknowledgement sink.
    pub publisher: Arc<Publisher>,
    /// Cooperative cancellation handle.
    pub lifecycle: Arc<Lifecycle>,
    /// This broca's global index, echoed in acknowledgements.
    pub index: usize,
}

impl BrocaContext {
    /// Consumes an original-command packet and publishes the broca-stage
    /// acknowledgement for it.
    pub fn acknowledge_command(&self, packet: &mut PacketRead<'_>) {
        let payload = packet.read_to_vec();
        match decode_oob_command(&payload) {
            Some(command) => self.publisher.acknowledge_broca_command(self.index, command),
            None => tracing::warn!(index = self.index, "malformed command packet, not acknowledging"),
        }
    }
}

/// A packet sink plugin.
pub trait Broca: Send {
    /// The delivery loop. Returns when the packet stream ends, the
    /// process shuts down, or a fatal sink error occurs.
    fn run(&mut self);
}

/// Runs a broca and releases the alive-token however the loop exits.
pub fn run_broca(mut broca: Box<dyn Broca>, alive: Arc<Semaphore>) {
    struct AliveToken(Arc<Semaphore>);
    impl Drop for AliveToken {
        fn drop(&mut self) {
            self.0.release();
        }
    }
    let _token = AliveToken(alive);
    broca.run();
}

/// Instantiates a broca by registered name.
pub fn create_broca(
    name: &str,
    config: &Value,
    context: BrocaContext,
    stream_format: StreamFormat,
) -> Result<Box<dyn Broca>, StartupError> {
    match name {
        "discard" => Ok(Box::new(DiscardBroca::new(config, context))),
        "file" => Ok(Box::new(FileBroca::new(config, context)?)),
        "icecast" => Ok(Box::new(IcecastBroca::new(config, context, stream_format)?)),
        _ => Err(StartupError::UnknownBroca {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::{ChannelLayout, PcmFormat, SampleFormat};
    use serde_json::json;

    pub(crate) fn test_context(source: Arc<PacketRingBuffer>) -> BrocaContext {
        BrocaContext {
            source,
            frame_rate: 44100,
            publisher: Arc::new(Publisher::new()),
            lifecycle: Arc::new(Lifecycle::new()),
            index: 0,
        }
    }

    fn pcm_format() -> StreamFormat {
        StreamFormat::Pcm(PcmFormat {
            sample: SampleFormat::S16,
            rate: 44100,
            channels: ChannelLayout::Stereo,
        })
    }

    #[test]
    fn test_unknown_broca_errors() {
        let context = test_context(Arc::new(PacketRingBuffer::new(64)));
        assert!(matches!(
            create_broca("portaudio", &json!({}), context, pcm_format()),
            Err(StartupError::UnknownBroca { .. })
        ));
    }

    #[test]
    fn test_run_broca_releases_token_even_on_panic_free_exit() {
        struct NoopBroca;
        impl Broca for NoopBroca {
            fn run(&mut self) {}
        }

        let alive = Arc::new(Semaphore::new());
        run_broca(Box::new(NoopBroca), Arc::clone(&alive));
        assert_eq!(alive.tokens(), 1);
    }
}
