//! Process lifecycle handles.
//!
//! One [`Lifecycle`] is created by the server and passed down to every
//! stage. It carries the monotonic shutdown phase, the cooperative
//! should-run checks that long-running plugins poll, and the counting
//! semaphore the shutdown sequence uses to wait for live brocas.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

/// Shutdown phases, in monotonic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Normal operation.
    Running = 0,
    /// The command source is exhausted or `quit` was received.
    NoMoreCommands = 1,
    /// The decoder job queue has drained.
    NoMoreJobs = 2,
    /// The publisher is no longer accepting events.
    NoMoreEvents = 3,
    /// Final teardown.
    Quitting = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::NoMoreCommands,
            2 => Self::NoMoreJobs,
            3 => Self::NoMoreEvents,
            _ => Self::Quitting,
        }
    }
}

/// Shared lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    phase: AtomicU8,
    terminating: AtomicBool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Creates a lifecycle in the running phase.
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Running as u8),
            terminating: AtomicBool::new(false),
        }
    }

    /// Current shutdown phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Advances the phase. Phases only move forward; a request to move
    /// backwards is ignored.
    pub fn advance(&self, phase: Phase) {
        self.phase.fetch_max(phase as u8, Ordering::AcqRel);
    }

    /// True while stages before `until` should keep working.
    ///
    /// A decoder checks `should_run(Phase::NoMoreJobs)`: it keeps decoding
    /// through `NoMoreCommands` (queued work still drains) but stops once
    /// jobs are cut off.
    pub fn should_run(&self, until: Phase) -> bool {
        self.phase() < until
    }

    /// True while the process as a whole is not being torn down. This is
    /// the check every blocking pipeline loop polls.
    pub fn running(&self) -> bool {
        self.should_run(Phase::Quitting)
    }

    /// True once commands are no longer accepted.
    pub fn out_of_commands(&self) -> bool {
        self.phase() >= Phase::NoMoreCommands
    }

    /// Marks the command source exhausted.
    pub fn no_more_commands(&self) {
        self.advance(Phase::NoMoreCommands);
    }

    /// Flags termination (signal received or shutdown begun).
    pub fn terminate(&self) {
        self.terminating.store(true, Ordering::Release);
        self.advance(Phase::NoMoreCommands);
    }

    /// True once termination has been flagged.
    pub fn terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }
}

/// Counting semaphore used to track live brocas.
///
/// Every broca releases one token when its run loop exits; the shutdown
/// sequence acquires one token per broca before joining their threads.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with zero tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one token, waking one waiter.
    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        self.available.notify_one();
    }

    /// Blocks until a token is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        self.available.wait_while(&mut count, |c| *c == 0);
        *count -= 1;
    }

    /// Current token count.
    pub fn tokens(&self) -> usize {
        *self.count.lock()
    }
}
