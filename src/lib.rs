//! # relaycast
//!
//! Multi-output audio streaming relay: decode source audio once, encode
//! and broadcast it many ways, continuously.
//!
//! `relaycast` reads JSON commands naming source audio off a shell
//! queue, decodes each into one shared PCM format,
//! fans the PCM out to any number of parallel encoding outputs, and hands
//! every encoded stream to one or more brocas (Icecast-style network
//! push, local file, discard). Output is gapless across track changes;
//! commands are acknowledged back to the caller as they progress through
//! the decoder, each encoder, and each broca.
//!
//! ## Architecture
//!
//! Every stage runs on its own OS thread; every edge between stages is a
//! bounded blocking queue:
//!
//! - **Command reader**: parses the shell queue, dispatches decode jobs
//! - **Decoder pool**: two-phase workers (serialized `init`, pipelined
//!   `run`) streaming PCM into the splitter
//! - **PCM splitter**: fan-out to one metadata-interleaved PCM buffer per
//!   output, with an optional real-time drop policy for slow outputs
//! - **Encoders**: one per output; pull PCM, push framed packets, and
//!   synchronize track changes across outputs through a token barrier
//! - **Brocas**: one per sink; deliver packets with retry/reconnect and
//!   frame-accurate pacing
//! - **Publisher**: best-effort acknowledgement events to write queues
//!
//! Back pressure is explicit: a stalled sink either blocks its own
//! pipeline branch or, with the drop policy enabled, sheds PCM at the
//! splitter while the rest of the relay keeps real time.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

pub mod broca;
pub mod clock;
pub mod command;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod metadata;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod resampler;
pub mod server;

pub use command::Command;
pub use config::ServerConfig;
pub use error::{BrocaError, StartupError};
pub use format::{ChannelLayout, Codec, PcmFormat, SampleFormat, StreamFormat};
pub use lifecycle::{Lifecycle, Phase};
pub use metadata::Metadata;
pub use server::Server;
