//! Per-output PCM buffer.
//!
//! The channel between the splitter and exactly one encoder. Raw PCM
//! bytes travel through a byte ring; track changes travel through a small
//! circular row queue beside it. `pcm_left` counts the bytes still
//! belonging to the track the consumer is currently playing, so the
//! consumer can never read into the next track before it has taken that
//! track's row.
//!
//! With the drop policy enabled the producer admits bytes against a
//! wall-clock deadline derived from the frame clock and sheds whatever
//! does not fit (logged as an overrun); with it disabled the producer
//! blocks until the encoder drains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::clock::FrameClock;
use crate::format::PcmFormat;
use crate::lifecycle::Lifecycle;
use crate::metadata::Metadata;
use crate::pipeline::ring_buffer::RingBuffer;
use crate::publisher::Publisher;

/// Capacity of the track-change row queue.
///
/// Large enough to absorb normal track-change bursts, small enough that a
/// producer stalled on it is visible.
pub const ROW_QUEUE_SIZE: usize = 8;

/// How long the producer yields when the row queue is saturated before
/// dropping the track change.
const ROW_STALL: Duration = Duration::from_secs(1);

/// Knobs for the sample-rate drop policy.
#[derive(Debug, Clone, Copy)]
pub struct DropPolicy {
    /// Whether short timed writes (dropping) are allowed at all.
    pub enabled: bool,
    /// Extra slack added to the admission deadline.
    pub margin: Duration,
    /// Forward-compatible scaling knob; parsed and carried, no runtime
    /// effect beyond `enabled`.
    pub factor: f64,
}

impl Default for DropPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: Duration::from_millis(100),
            factor: 2.0,
        }
    }
}

/// A track change handed to the consumer.
#[derive(Debug, Clone)]
pub struct TrackChange {
    /// Splitter-assigned serial, used as the barrier token.
    pub serial: u64,
    /// The command that produced this track.
    pub command: Arc<Value>,
    /// The track's metadata.
    pub metadata: Arc<Metadata>,
}

struct Row {
    serial: u64,
    command: Arc<Value>,
    metadata: Arc<Metadata>,
    pcm_bytes: usize,
}

struct RowState {
    rows: std::collections::VecDeque<Row>,
    pcm_left: usize,
    closed: bool,
}

impl RowState {
    fn rows_full(&self) -> bool {
        self.rows.len() >= ROW_QUEUE_SIZE
    }
}

struct ProducerState {
    clock: FrameClock,
    first_pcm: bool,
}

/// PCM bytes interleaved with track-change markers, for one output.
pub struct PcmBuffer {
    pcm: RingBuffer<u8>,
    state: Mutex<RowState>,
    has_pcm: Condvar,
    producer: Mutex<ProducerState>,
    format: PcmFormat,
    index: usize,
    publisher: Arc<Publisher>,
    lifecycle: Arc<Lifecycle>,
    policy: DropPolicy,
}

impl PcmBuffer {
    /// Creates a buffer for the output at `index` holding `byte_size`
    /// bytes of PCM.
    pub fn new(
        index: usize,
        format: PcmFormat,
        byte_size: usize,
        policy: DropPolicy,
        publisher: Arc<Publisher>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            pcm: RingBuffer::new(byte_size),
            state: Mutex::new(RowState {
                rows: std::collections::VecDeque::with_capacity(ROW_QUEUE_SIZE),
                pcm_left: 0,
                closed: false,
            }),
            has_pcm: Condvar::new(),
            producer: Mutex::new(ProducerState {
                clock: FrameClock::new(format.rate),
                first_pcm: true,
            }),
            format,
            index,
            publisher,
            lifecycle,
            policy,
        }
    }

    /// The PCM format flowing through this buffer.
    pub fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Output index this buffer feeds.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Enqueues a track change. If the row queue is saturated the call
    /// yields for about a second and then silently drops the change.
    pub fn write_metadata(&self, serial: u64, command: Arc<Value>, metadata: Arc<Metadata>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if state.rows_full() {
            drop(state);
            std::thread::sleep(ROW_STALL);
            let Some(reacquired) = self.state.try_lock_for(ROW_STALL) else {
                return;
            };
            state = reacquired;
            if state.rows_full() {
                tracing::warn!(index = self.index, "row queue still full, dropping track change");
                return;
            }
        }
        state.rows.push_back(Row {
            serial,
            command,
            metadata,
            pcm_bytes: 0,
        });
        drop(state);
        self.has_pcm.notify_all();
    }

    /// Appends PCM bytes, crediting them to the most recently queued track
    /// change, or to the current track when none is queued.
    pub fn write_pcm(&self, data: &[u8]) {
        if data.is_empty() || self.closed() {
            return;
        }

        let frames = data.len() / self.format.bytes_per_frame();
        let mut producer = self.producer.lock();
        if producer.first_pcm {
            producer.first_pcm = false;
            producer.clock.reset();
        }

        let written = if self.policy.enabled {
            let until = producer.clock.would_sleep_until(frames) + self.policy.margin;
            let before = Instant::now();
            let written = self.pcm.write_timed(data, until);
            if written < data.len() && self.lifecycle.running() {
                let waited = before.elapsed();
                tracing::warn!(
                    index = self.index,
                    written,
                    requested = data.len(),
                    waited_ms = format_args!("{:.3}", waited.as_secs_f64() * 1e3),
                    "buffer overrun"
                );
            }
            written
        } else {
            self.pcm.write_full(data)
        };

        if written != data.len() {
            // dropped bytes still advance the clock: the track keeps time
            producer.clock.update(frames);
        } else {
            producer.clock.update(written / self.format.bytes_per_frame());
        }
        drop(producer);

        if written > 0 {
            let mut state = self.state.lock();
            if let Some(last) = state.rows.back_mut() {
                last.pcm_bytes += written;
            } else {
                state.pcm_left += written;
            }
            drop(state);
            self.has_pcm.notify_all();
        }
    }

    /// Returns the next track change iff the current track is fully
    /// drained. Publishes the encoder-side acknowledgement on success.
    pub fn read_metadata(&self) -> Option<TrackChange> {
        let mut state = self.state.lock();
        if state.pcm_left > 0 || state.rows.is_empty() {
            return None;
        }
        let row = state.rows.pop_front()?;
        state.pcm_left = row.pcm_bytes;
        drop(state);
        self.has_pcm.notify_all();

        self.publisher
            .acknowledge_encoder_command(self.index, Arc::clone(&row.command));
        Some(TrackChange {
            serial: row.serial,
            command: row.command,
            metadata: row.metadata,
        })
    }

    /// Reads PCM belonging to the current track, whole frames only.
    ///
    /// Blocks until PCM arrives, a track boundary is crossed (returns 0
    /// with the buffer still open), or the buffer is closed and drained
    /// (returns 0, end of stream).
    pub fn read_pcm(&self, dst: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        if state.pcm_left == 0 {
            self.has_pcm.wait_while(&mut state, |s| {
                s.pcm_left == 0 && s.rows.is_empty() && !s.closed
            });
            if state.pcm_left == 0 && state.rows.is_empty() && state.closed {
                return 0;
            }
        }
        let mut can_read = state.pcm_left.min(dst.len());
        can_read -= can_read % self.format.bytes_per_frame();
        if can_read == 0 {
            return 0;
        }
        state.pcm_left -= can_read;
        drop(state);

        self.pcm.read_full(&mut dst[..can_read]);
        can_read
    }

    /// Closes the buffer; the consumer drains what remains and then sees
    /// end of stream.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.pcm.close();
        self.has_pcm.notify_all();
    }

    /// True once the producer side has closed this buffer.
    pub fn closed(&self) -> bool {
        self.state.lock().closed
    }

    #[cfg(test)]
    fn accounted_bytes(&self) -> usize {
        let state = self.state.lock();
        state.pcm_left + state.rows.iter().map(|r| r.pcm_bytes).sum::<usize>()
    }

    #[cfg(test)]
    fn ring_occupancy(&self) -> usize {
        self.pcm.to_read()
    }
}
