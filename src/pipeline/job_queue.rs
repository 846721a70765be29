//! Decoder job queue.
//!
//! A bounded FIFO of decode jobs and a small worker pool with a strict
//! two-phase contract: `init` opens inputs and publishes metadata, `run`
//! streams PCM. Three locks (waiting, init, running) pipeline the phases:
//! only one job initializes at a time and only one runs at a time, but a
//! job may initialize while its predecessor is still running. Metadata
//! for track k is therefore published no earlier than track k-1's start,
//! which is exactly what makes the splitter's metadata call a correct
//! track boundary.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::lifecycle::Lifecycle;
use crate::pipeline::ring_buffer::RingBuffer;

/// A unit of decode work created by a decoder plugin from one command.
pub trait DecodeJob: Send {
    /// Cheap, serialized phase: open inputs, read tags, publish the track
    /// boundary to the PCM sink.
    fn init(&mut self) {}

    /// Streaming phase: produce PCM until done or cancelled. Expected to
    /// poll the process lifecycle at block boundaries.
    fn run(&mut self);
}

/// Boxed job as it travels through the queue.
pub type QueuedJob = Box<dyn DecodeJob>;

/// Ordered two-phase worker pool over a bounded job FIFO.
pub struct JobQueue {
    jobs: Arc<RingBuffer<QueuedJob>>,
    phases: Arc<Phases>,
    lifecycle: Arc<Lifecycle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct Phases {
    waiting: Mutex<()>,
    init: Mutex<()>,
    running: Mutex<()>,
}

impl JobQueue {
    /// Creates a queue admitting up to `depth` not-yet-started jobs.
    pub fn new(depth: usize, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            jobs: Arc::new(RingBuffer::new(depth)),
            phases: Arc::new(Phases::default()),
            lifecycle,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Enqueues a job, blocking while the queue is at capacity.
    pub fn add_job(&self, job: QueuedJob) {
        self.jobs.put(job);
    }

    /// Spawns `count` worker threads.
    pub fn start(&self, count: usize) {
        let mut threads = self.threads.lock();
        for worker in 0..count {
            let jobs = Arc::clone(&self.jobs);
            let phases = Arc::clone(&self.phases);
            let lifecycle = Arc::clone(&self.lifecycle);
            threads.push(
                std::thread::Builder::new()
                    .name(format!("decode-{worker}"))
                    .spawn(move || run_jobs(&jobs, &phases, &lifecycle))
                    .expect("spawn decode worker"),
            );
        }
    }

    /// Stops accepting jobs; queued jobs still run.
    pub fn close(&self) {
        self.jobs.close();
    }

    /// Closes the queue and joins the workers.
    pub fn stop(&self) {
        self.close();
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("decode worker panicked");
            }
        }
    }
}

fn run_jobs(jobs: &RingBuffer<QueuedJob>, phases: &Phases, lifecycle: &Lifecycle) {
    while lifecycle.running() {
        let waiting = phases.waiting.lock();
        let Some(mut job) = jobs.get() else {
            drop(waiting);
            if jobs.closed_to_reads() {
                return;
            }
            continue;
        };

        let init = phases.init.lock();
        drop(waiting);
        job.init();

        let running = phases.running.lock();
        drop(init);
        job.run();
        drop(running);
    }
}
