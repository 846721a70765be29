//! Acknowledgement event publisher.
//!
//! A write-only fan-out: each configured publish queue runs on its own
//! thread, draining a small ring of events into its transport as
//! newline-delimited JSON. Publishing is best-effort; when a queue's ring
//! is full the event is dropped rather than back-pressuring the pipeline.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::pipeline::ring_buffer::RingBuffer;
use crate::queue::WriteQueue;

/// Per-queue event ring depth.
const EVENT_BUFFER_SIZE: usize = 8;

/// Which stage acknowledged the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStage {
    /// The decoder published the track's metadata marker.
    Decoder,
    /// Encoder at this output index picked the track up.
    Encoder(usize),
    /// Broca at this index delivered the track's command packet.
    Broca(usize),
}

/// An event pushed to all publish queues.
#[derive(Debug, Clone)]
pub enum PublishedEvent {
    /// A command progressed past a pipeline stage.
    CommandAcknowledge {
        /// The acknowledging stage.
        stage: AckStage,
        /// The original command object, echoed verbatim.
        command: Arc<Value>,
    },
}

fn serialize_event(event: &PublishedEvent) -> String {
    match event {
        PublishedEvent::CommandAcknowledge { stage, command } => {
            let mut message = serde_json::Map::new();
            message.insert("type".into(), json!("acknowledge"));
            match stage {
                AckStage::Decoder => {
                    message.insert("source".into(), json!("decoder"));
                }
                AckStage::Encoder(index) => {
                    message.insert("source".into(), json!("encoder"));
                    message.insert("index".into(), json!(index));
                }
                AckStage::Broca(index) => {
                    message.insert("source".into(), json!("broca"));
                    message.insert("index".into(), json!(index));
                }
            }
            message.insert("command".into(), command.as_ref().clone());
            Value::Object(message).to_string()
        }
    }
}

/// One publish queue: an event ring plus the transport it drains into.
pub struct PublishQueue {
    queue: Mutex<Box<dyn WriteQueue>>,
    events: RingBuffer<PublishedEvent>,
}

impl PublishQueue {
    fn new(queue: Box<dyn WriteQueue>) -> Self {
        Self {
            queue: Mutex::new(queue),
            events: RingBuffer::new(EVENT_BUFFER_SIZE),
        }
    }

    fn push(&self, event: PublishedEvent) {
        if !self.events.put_nowait(event) {
            tracing::debug!("publish queue full, dropping event");
        }
    }

    fn run(&self) {
        while let Some(event) = self.events.get() {
            let line = serialize_event(&event);
            if let Err(error) = self.queue.lock().write_line(&line) {
                tracing::warn!(%error, "publish write failed");
            }
        }
    }

    fn close(&self) {
        self.events.close();
    }
}

/// Distributor of acknowledgement events to every publish queue.
#[derive(Default)]
pub struct Publisher {
    queues: Vec<Arc<PublishQueue>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Publisher {
    /// Creates a publisher with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a write queue. Call before [`start`](Self::start).
    pub fn add_queue(&mut self, queue: Box<dyn WriteQueue>) {
        self.queues.push(Arc::new(PublishQueue::new(queue)));
    }

    fn push(&self, event: PublishedEvent) {
        for queue in &self.queues {
            queue.push(event.clone());
        }
    }

    /// Acknowledges that the decoder reached the track boundary for this
    /// command.
    pub fn acknowledge_decoder_command(&self, command: Arc<Value>) {
        self.push(PublishedEvent::CommandAcknowledge {
            stage: AckStage::Decoder,
            command,
        });
    }

    /// Acknowledges that the encoder at `index` started consuming the
    /// track for this command.
    pub fn acknowledge_encoder_command(&self, index: usize, command: Arc<Value>) {
        self.push(PublishedEvent::CommandAcknowledge {
            stage: AckStage::Encoder(index),
            command,
        });
    }

    /// Acknowledges that the broca at `index` delivered the track's
    /// command packet.
    pub fn acknowledge_broca_command(&self, index: usize, command: Arc<Value>) {
        self.push(PublishedEvent::CommandAcknowledge {
            stage: AckStage::Broca(index),
            command,
        });
    }

    /// Spawns one drain thread per queue.
    pub fn start(&self) {
        let mut threads = self.threads.lock();
        for queue in &self.queues {
            let queue = Arc::clone(queue);
            threads.push(
                std::thread::Builder::new()
                    .name("publish".into())
                    .spawn(move || queue.run())
                    .expect("spawn publish thread"),
            );
        }
    }

    /// Stops accepting events; queued events still drain.
    pub fn close(&self) {
        for queue in &self.queues {
            queue.close();
        }
    }

    /// Joins the drain threads. Call after [`close`](Self::close).
    pub fn stop(&self) {
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("publish thread panicked");
            }
        }
    }
}
