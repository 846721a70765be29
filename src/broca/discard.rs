//! Discard broca.
//!
//! Swallows the packet stream. With `log` it reports what it drops; with
//! `wait` it paces the discard against the frame clock so the stream is
//! consumed at real-time speed, which makes it a stand-in for a live sink
//! in tests and load experiments.

use serde_json::Value;

use crate::broca::{Broca, BrocaContext};
use crate::clock::FrameClock;
use crate::pipeline::packet::flags;

/// Frames-ahead threshold for the paced discard.
const PACE_THRESHOLD: usize = 10;

/// Broca that throws every packet away.
pub struct DiscardBroca {
    context: BrocaContext,
    log: bool,
    wait: bool,
    clock: FrameClock,
}

impl DiscardBroca {
    /// Creates the broca from its config: `{log: bool, wait: bool}`.
    pub fn new(config: &Value, context: BrocaContext) -> Self {
        let log = config.get("log").and_then(Value::as_bool).unwrap_or(false);
        let wait = config.get("wait").and_then(Value::as_bool).unwrap_or(false);
        let clock = FrameClock::new(context.frame_rate);
        Self {
            context,
            log,
            wait,
            clock,
        }
    }
}

impl Broca for DiscardBroca {
    fn run(&mut self) {
        self.clock.reset();
        while self.context.lifecycle.running() {
            let Some(mut packet) = self.context.source.read_packet() else {
                break;
            };
            if packet.header.flags & flags::ORIGINAL_COMMAND != 0 {
                self.context.acknowledge_command(&mut packet);
                continue;
            }

            let wait = self.wait && packet.header.flags & flags::OUT_OF_BAND == 0;
            if self.log {
                if wait {
                    tracing::info!(
                        bytes = packet.header.data_size,
                        frames = packet.header.frame_count,
                        seconds = format_args!(
                            "{:.4}",
                            packet.header.frame_count as f64
                                / f64::from(self.context.frame_rate)
                        ),
                        "discarding (paced)"
                    );
                } else {
                    tracing::info!(
                        bytes = packet.header.data_size,
                        frames = packet.header.frame_count,
                        "discarding"
                    );
                }
            }

            packet.skip_full();
            if self.context.source.closed_to_reads() {
                return;
            }

            if wait {
                self.clock.update(packet.header.frame_count);
                self.clock.sleep_if(PACE_THRESHOLD);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broca::tests::test_context;
    use crate::metadata::encode_oob_command;
    use crate::pipeline::packet::PacketRingBuffer;
    use crate::publisher::Publisher;
    use crate::queue::WriteQueue;
    use serde_json::json;
    use std::sync::{mpsc, Arc};
    use std::time::Instant;

    #[test]
    fn test_consumes_stream_until_close() {
        let source = Arc::new(PacketRingBuffer::new(4096));
        for _ in 0..4 {
            source.write_packet(0, 16, &[0u8; 64]);
        }
        source.close();

        let mut broca = DiscardBroca::new(&json!({}), test_context(Arc::clone(&source)));
        broca.run();
        assert!(source.closed_to_reads());
    }

    #[test]
    fn test_acknowledges_command_packets() {
        struct ChannelQueue(mpsc::Sender<String>);
        impl WriteQueue for ChannelQueue {
            fn write_line(&mut self, line: &str) -> std::io::Result<()> {
                let _ = self.0.send(line.to_string());
                Ok(())
            }
        }

        let (sender, receiver) = mpsc::channel();
        let mut publisher = Publisher::new();
        publisher.add_queue(Box::new(ChannelQueue(sender)));
        let publisher = Arc::new(publisher);
        publisher.start();

        let source = Arc::new(PacketRingBuffer::new(4096));
        let command = json!({"cmd": "sil", "param": 1.0});
        source.write_packet(
            flags::OUT_OF_BAND | flags::ORIGINAL_COMMAND,
            0,
            &encode_oob_command(&command),
        );
        source.write_packet(0, 4, &[0u8; 16]);
        source.close();

        let mut context = test_context(Arc::clone(&source));
        context.publisher = Arc::clone(&publisher);
        context.index = 7;
        let mut broca = DiscardBroca::new(&json!({}), context);
        broca.run();

        publisher.close();
        publisher.stop();

        let event: Value = serde_json::from_str(&receiver.recv().unwrap()).unwrap();
        assert_eq!(event["source"], "broca");
        assert_eq!(event["index"], 7);
        assert_eq!(event["command"], command);
    }

    #[test]
    fn test_wait_paces_against_real_time() {
        let source = Arc::new(PacketRingBuffer::new(1 << 16));
        // 0.2 s of audio at 1000 fps in 4 packets
        for _ in 0..4 {
            source.write_packet(0, 50, &[0u8; 100]);
        }
        source.close();

        let mut context = test_context(Arc::clone(&source));
        context.frame_rate = 1000;
        let mut broca = DiscardBroca::new(&json!({"wait": true}), context);

        let start = Instant::now();
        broca.run();
        // 200 frames at 1 kHz minus the 10-frame threshold
        assert!(start.elapsed().as_millis() >= 150, "{:?}", start.elapsed());
    }

    #[test]
    fn test_unpaced_runs_fast() {
        let source = Arc::new(PacketRingBuffer::new(1 << 16));
        for _ in 0..16 {
            source.write_packet(0, 44100, &[0u8; 128]);
        }
        source.close();

        let mut broca = DiscardBroca::new(&json!({}), test_context(source));
        let start = Instant::now();
        broca.run();
        assert!(start.elapsed().as_millis() < 200);
    }
}
