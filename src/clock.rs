//! Frame-pacing clock.
//!
//! Tracks how many output frames a stage is ahead of real time, so
//! real-time sinks (playback, network push with self-sync, paced discard)
//! and the PCM buffer's drop policy can reconcile frame counts against the
//! wall clock. Frame duration is kept as integer nanoseconds and the
//! sub-frame remainder is carried separately; floating point only appears
//! in logs.

use std::time::{Duration, Instant};

/// Monotonic counter of frames ahead of real time.
#[derive(Debug)]
pub struct FrameClock {
    last: Instant,
    /// Duration of one frame in nanoseconds.
    frame_nanos: u64,
    /// Elapsed time not yet accounted as a whole frame.
    remainder_nanos: u64,
    /// Frames ahead (negative: behind) of real time.
    frames: i64,
}

impl FrameClock {
    /// Creates a clock for the given output frame rate.
    ///
    /// A zero rate is clamped to one frame per second so the arithmetic
    /// stays defined; callers with no real rate should not pace at all.
    pub fn new(frame_rate: u32) -> Self {
        let rate = u64::from(frame_rate.max(1));
        Self {
            last: Instant::now(),
            frame_nanos: 1_000_000_000 / rate,
            remainder_nanos: 0,
            frames: 0,
        }
    }

    fn elapsed_nanos(&mut self) -> u64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed.as_nanos() as u64
    }

    /// Resets to zero frames ahead as of now.
    pub fn reset(&mut self) {
        self.remainder_nanos = 0;
        self.frames = 0;
        self.last = Instant::now();
    }

    /// Advances by `produced` frames and subtracts the real time elapsed
    /// since the previous call, keeping the sub-frame remainder.
    pub fn update(&mut self, produced: usize) {
        let elapsed = self.elapsed_nanos() + self.remainder_nanos;
        let elapsed_frames = elapsed / self.frame_nanos;
        self.remainder_nanos = elapsed % self.frame_nanos;
        self.frames = self.frames + produced as i64 - elapsed_frames as i64;
    }

    /// Number of frames currently ahead of real time (may be negative).
    pub fn frames_ahead(&self) -> i64 {
        self.frames
    }

    /// The wall-clock instant this clock would be in sync at, assuming the
    /// frame counter were advanced by `produced` frames first.
    pub fn would_sleep_until(&self, produced: usize) -> Instant {
        let frames = self.frames + produced as i64;
        let mut until = Instant::now();
        if frames > 0 {
            until += Duration::from_nanos(self.frame_nanos * frames as u64);
        }
        until
    }

    /// Sleeps while ahead of real time by at least `threshold` frames.
    ///
    /// Each pass sleeps `ahead - threshold/2` frames of wall time and then
    /// re-measures, so a paced consumer settles around the threshold
    /// instead of oscillating against it.
    pub fn sleep_if(&mut self, threshold: usize) {
        while self.frames >= threshold as i64 {
            let sleep_frames = (self.frames - threshold as i64 / 2) as u64;
            std::thread::sleep(Duration::from_nanos(self.frame_nanos * sleep_frames));
            self.update(0);
        }
    }
}
