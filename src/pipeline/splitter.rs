//! PCM fan-out.
//!
//! One decoder's output goes to every configured output's PCM buffer.
//! PCM is chopped into quarter-second blocks before fan-out so the
//! worst-case blocking on any single buffer is bounded and slow buffers
//! get a chance to catch up between blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::format::PcmFormat;
use crate::lifecycle::Lifecycle;
use crate::metadata::Metadata;
use crate::pipeline::pcm_buffer::{DropPolicy, PcmBuffer};
use crate::publisher::Publisher;

/// Fan-out of decoded PCM and track changes to all per-output buffers.
pub struct PcmSplitter {
    buffers: parking_lot::RwLock<Vec<Arc<PcmBuffer>>>,
    format: PcmFormat,
    byte_size: usize,
    next_index: AtomicU64,
    serial: AtomicU64,
    publisher: Arc<Publisher>,
    lifecycle: Arc<Lifecycle>,
    /// Fan-out block size in bytes: a quarter second of PCM.
    chop: usize,
}

impl PcmSplitter {
    /// Creates a splitter; buffers are added per output during wiring.
    pub fn new(
        format: PcmFormat,
        byte_size: usize,
        publisher: Arc<Publisher>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            buffers: parking_lot::RwLock::new(Vec::new()),
            format,
            byte_size,
            next_index: AtomicU64::new(0),
            serial: AtomicU64::new(0),
            publisher,
            lifecycle,
            chop: self::chop_bytes(&format),
        }
    }

    /// The shared PCM format.
    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Adds a PCM buffer for the next output index and returns it.
    pub fn add_buffer(&self, policy: DropPolicy) -> Arc<PcmBuffer> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) as usize;
        let buffer = Arc::new(PcmBuffer::new(
            index,
            self.format,
            self.byte_size,
            policy,
            Arc::clone(&self.publisher),
            Arc::clone(&self.lifecycle),
        ));
        self.buffers.write().push(Arc::clone(&buffer));
        buffer
    }

    /// Consumes an output index without attaching a buffer, so encoder
    /// indices stay stable when an output is skipped.
    pub fn skip_index(&self) {
        self.next_index.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes a track change: acknowledges the command at the decoder
    /// stage and enqueues the change on every buffer. The shared metadata
    /// pointer and a fresh serial are handed to all buffers alike.
    pub fn metadata(&self, command: Arc<Value>, metadata: Metadata) {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let metadata = Arc::new(metadata);
        self.publisher.acknowledge_decoder_command(Arc::clone(&command));
        for buffer in self.buffers.read().iter() {
            buffer.write_metadata(serial, Arc::clone(&command), Arc::clone(&metadata));
        }
    }

    /// Fans PCM bytes out to every buffer in bounded blocks.
    pub fn pcm(&self, data: &[u8]) {
        let buffers = self.buffers.read();
        for block in data.chunks(self.chop.max(1)) {
            for buffer in buffers.iter() {
                buffer.write_pcm(block);
            }
        }
    }

    /// Closes every buffer; encoders see end of stream once drained.
    pub fn close(&self) {
        let mut buffers = self.buffers.write();
        for buffer in buffers.iter() {
            buffer.close();
        }
        buffers.clear();
    }
}

fn chop_bytes(format: &PcmFormat) -> usize {
    format.bytes_per_frame() * (format.rate as usize / 4)
}
