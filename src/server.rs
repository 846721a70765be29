//! Server wiring and lifecycle.
//!
//! Builds the whole pipeline from a [`ServerConfig`], runs it, and tears
//! it down in dependency order: commands stop first, then the decoder
//! jobs drain, then the PCM buffers close so encoders see end of stream,
//! then the packet buffers close so brocas wind down, and the publisher
//! drains last. A watchdog force-exits the process if any step hangs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broca::{create_broca, run_broca, Broca, BrocaContext};
use crate::command::Command;
use crate::config::ServerConfig;
use crate::decoder::{create_decoder, Decoder, DecoderContext};
use crate::encoder::{create_encoder, EncoderDriver};
use crate::error::StartupError;
use crate::lifecycle::{Lifecycle, Phase, Semaphore};
use crate::pipeline::barrier::TrackBarrier;
use crate::pipeline::job_queue::JobQueue;
use crate::pipeline::packet::PacketRingBuffer;
use crate::pipeline::splitter::PcmSplitter;
use crate::publisher::Publisher;
use crate::queue::{create_read_queue, create_write_queue, CommandQueue};
use crate::resampler::ResamplerFactory;

/// Bounded in-flight decode jobs.
const JOB_QUEUE_SIZE: usize = 8;
/// Decoder worker thread count.
const JOB_WORKER_COUNT: usize = 2;
/// Main loop poll interval while waiting for commands to end.
const COMMAND_POLL: Duration = Duration::from_millis(100);
/// Shutdown watchdog fuse.
const WATCHDOG_FUSE: Duration = Duration::from_secs(5);

/// A fully wired relay, ready to run.
pub struct Server {
    lifecycle: Arc<Lifecycle>,
    publisher: Arc<Publisher>,
    splitter: Arc<PcmSplitter>,
    jobs: Arc<JobQueue>,
    decoders: Arc<HashMap<String, Box<dyn Decoder>>>,
    encoders: Vec<EncoderDriver>,
    brocas: Vec<Box<dyn Broca>>,
    packet_buffers: Vec<Arc<PacketRingBuffer>>,
    barriers: Vec<Arc<TrackBarrier>>,
    command_queue: Option<CommandQueue>,
    brocas_alive: Arc<Semaphore>,
}

impl Server {
    /// Wires every stage from the configuration. Any unknown plugin name
    /// or failed plugin constructor aborts here.
    pub fn new(config: ServerConfig) -> Result<Self, StartupError> {
        let lifecycle = Arc::new(Lifecycle::new());

        let mut publisher = Publisher::new();
        for queue in &config.publish {
            publisher.add_queue(create_write_queue(&queue.kind, &queue.config)?);
        }
        let publisher = Arc::new(publisher);

        let format = config.pcmbuffer.pcm_format();
        let splitter = Arc::new(PcmSplitter::new(
            format,
            config.pcmbuffer.byte_size(),
            Arc::clone(&publisher),
            Arc::clone(&lifecycle),
        ));
        let jobs = Arc::new(JobQueue::new(JOB_QUEUE_SIZE, Arc::clone(&lifecycle)));

        let mut decoders: HashMap<String, Box<dyn Decoder>> = HashMap::new();
        for (name, decoder) in &config.commands {
            let context = DecoderContext {
                format,
                sink: Arc::clone(&splitter),
                lifecycle: Arc::clone(&lifecycle),
            };
            decoders.insert(
                name.clone(),
                create_decoder(&decoder.kind, &decoder.config, context)?,
            );
        }

        let resamplers = ResamplerFactory::new(
            &config.resampler.kind,
            config.resampler.config.clone(),
            format.channels.channel_count(),
            format.rate,
        )?;

        let mut barrier_groups: HashMap<String, Arc<TrackBarrier>> = HashMap::new();
        let mut encoders = Vec::new();
        let mut brocas: Vec<Box<dyn Broca>> = Vec::new();
        let mut packet_buffers = Vec::new();
        let mut broca_index = 0usize;

        for output in &config.outputs {
            let plugin = create_encoder(&output.kind, &output.config, format, &resamplers)?;
            let barrier = output.barrier.as_ref().map(|name| {
                Arc::clone(
                    barrier_groups
                        .entry(name.clone())
                        .or_insert_with(|| Arc::new(TrackBarrier::new())),
                )
            });

            let source = splitter.add_buffer(config.pcmbuffer.drop_policy());
            let mut driver =
                EncoderDriver::new(plugin, source, barrier, Arc::clone(&lifecycle));

            for broca in &output.broca {
                let packets = Arc::new(PacketRingBuffer::new(output.buffer));
                driver.add_sink(Arc::clone(&packets));
                let context = BrocaContext {
                    source: Arc::clone(&packets),
                    frame_rate: driver.frame_rate(),
                    publisher: Arc::clone(&publisher),
                    lifecycle: Arc::clone(&lifecycle),
                    index: broca_index,
                };
                brocas.push(create_broca(
                    &broca.kind,
                    &broca.config,
                    context,
                    driver.stream_format(),
                )?);
                packet_buffers.push(packets);
                broca_index += 1;
            }
            encoders.push(driver);
        }

        let command_queue = CommandQueue::new(create_read_queue(
            &config.shell.kind,
            &config.shell.config,
        )?);

        Ok(Self {
            lifecycle,
            publisher,
            splitter,
            jobs,
            decoders: Arc::new(decoders),
            encoders,
            brocas,
            packet_buffers,
            barriers: barrier_groups.into_values().collect(),
            command_queue: Some(command_queue),
            brocas_alive: Arc::new(Semaphore::new()),
        })
    }

    /// The lifecycle handle, for signal handlers.
    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.lifecycle)
    }

    /// Runs the relay until the command stream ends or termination is
    /// flagged, then shuts everything down in order.
    pub fn run(mut self) {
        tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay");

        let encoder_threads: Vec<JoinHandle<()>> = self
            .encoders
            .drain(..)
            .map(|mut encoder| {
                std::thread::Builder::new()
                    .name("encode".into())
                    .spawn(move || encoder.run())
                    .expect("spawn encoder thread")
            })
            .collect();

        let broca_count = self.brocas.len();
        let broca_threads: Vec<JoinHandle<()>> = self
            .brocas
            .drain(..)
            .map(|broca| {
                let alive = Arc::clone(&self.brocas_alive);
                std::thread::Builder::new()
                    .name("broca".into())
                    .spawn(move || run_broca(broca, alive))
                    .expect("spawn broca thread")
            })
            .collect();

        self.jobs.start(JOB_WORKER_COUNT);
        self.publisher.start();

        let reader_thread = self.command_queue.take().map(|queue| {
            let decoders = Arc::clone(&self.decoders);
            let jobs = Arc::clone(&self.jobs);
            let lifecycle = Arc::clone(&self.lifecycle);
            std::thread::Builder::new()
                .name("commands".into())
                .spawn(move || read_commands(queue, &decoders, &jobs, &lifecycle))
                .expect("spawn command reader")
        });

        while !self.lifecycle.out_of_commands() {
            std::thread::sleep(COMMAND_POLL);
        }

        let finished = self.start_watchdog();

        if self.lifecycle.terminating() {
            // a signal cut us short: close the taps first, then drain
            self.splitter.close();
            self.jobs.stop();
        } else {
            // graceful quit: let queued jobs finish before closing
            self.jobs.stop();
            self.splitter.close();
        }
        self.lifecycle.advance(Phase::NoMoreJobs);

        for barrier in &self.barriers {
            barrier.free();
        }
        for thread in encoder_threads {
            if thread.join().is_err() {
                tracing::warn!("encoder thread panicked");
            }
        }
        // belt and braces: encoders close their sinks on exit, but a
        // panicked encoder must not leave its brocas blocked
        for packets in &self.packet_buffers {
            packets.close();
        }

        for _ in 0..broca_count {
            self.brocas_alive.acquire();
        }
        for thread in broca_threads {
            if thread.join().is_err() {
                tracing::warn!("broca thread panicked");
            }
        }

        self.lifecycle.advance(Phase::NoMoreEvents);
        self.publisher.close();
        self.publisher.stop();
        self.lifecycle.advance(Phase::Quitting);

        finished.store(true, Ordering::Release);
        // the command reader may still be blocked on its transport; it is
        // deliberately left detached
        drop(reader_thread);
        tracing::info!("relay stopped");
    }
}

fn read_commands(
    mut queue: CommandQueue,
    decoders: &HashMap<String, Box<dyn Decoder>>,
    jobs: &JobQueue,
    lifecycle: &Lifecycle,
) {
    tracing::info!("now accepting commands");

    while !lifecycle.out_of_commands() {
        let Some(command) = queue.next_command() else {
            break;
        };
        if lifecycle.out_of_commands() {
            break;
        }
        if command.is_quit() || !lifecycle.running() {
            queue.close();
            break;
        }
        dispatch(command, decoders, jobs);
    }
    lifecycle.no_more_commands();
}

fn dispatch(command: Command, decoders: &HashMap<String, Box<dyn Decoder>>, jobs: &JobQueue) {
    let Some(decoder) = decoders.get(&command.cmd) else {
        tracing::warn!(cmd = %command.cmd, "unknown command, ignoring");
        return;
    };
    if let Some(job) = decoder.create_job(&command.param, Arc::clone(&command.raw)) {
        jobs.add_job(job);
    }
}

impl Server {
    /// Spawns the shutdown watchdog. A graceful drain may take as long as
    /// the queued work; only once termination is flagged does the
    /// watchdog force-close every tap and arm the 5-second fuse that
    /// terminates the process if the drain still hangs.
    fn start_watchdog(&self) -> Arc<AtomicBool> {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let lifecycle = Arc::clone(&self.lifecycle);
        let splitter = Arc::clone(&self.splitter);
        let jobs = Arc::clone(&self.jobs);
        let packet_buffers = self.packet_buffers.clone();
        let barriers = self.barriers.clone();
        let _ = std::thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || {
                while !lifecycle.terminating() {
                    if flag.load(Ordering::Acquire) {
                        return;
                    }
                    std::thread::sleep(COMMAND_POLL);
                }

                // termination during the drain: unblock every stage
                splitter.close();
                jobs.close();
                for barrier in &barriers {
                    barrier.free();
                }
                for packets in &packet_buffers {
                    packets.close();
                }

                std::thread::sleep(WATCHDOG_FUSE);
                if !flag.load(Ordering::Acquire) {
                    tracing::error!("exit watchdog: hung up on exit, terminating");
                    std::process::exit(70);
                }
            });
        finished
    }
}
