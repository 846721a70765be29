//! Concurrent pipeline components.
//!
//! Everything that moves data between stages: the blocking ring buffer,
//! the framed packet buffer, the metadata-interleaved PCM buffer and its
//! fan-out splitter, the two-phase decoder job queue, and the track-change
//! barrier.

pub mod barrier;
pub mod job_queue;
pub mod packet;
pub mod pcm_buffer;
pub mod ring_buffer;
pub mod splitter;
