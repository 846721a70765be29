//! Decoder plugins.
//!
//! A decoder turns a command into a [`DecodeJob`] that streams PCM into
//! the splitter. One decoder instance exists per configured command name;
//! jobs are created per command and executed by the job queue's two-phase
//! workers.

mod silence;
mod testcard;

pub use silence::SilenceDecoder;
pub use testcard::TestcardDecoder;

use std::sync::Arc;

use serde_json::Value;

use crate::error::StartupError;
use crate::format::PcmFormat;
use crate::lifecycle::Lifecycle;
use crate::pipeline::job_queue::QueuedJob;
use crate::pipeline::splitter::PcmSplitter;

/// Shared context handed to every decoder at construction.
#[derive(Clone)]
pub struct DecoderContext {
    /// The pipeline's PCM format; jobs must produce exactly this.
    pub format: PcmFormat,
    /// Where jobs publish metadata and PCM.
    pub sink: Arc<PcmSplitter>,
    /// Cooperative cancellation handle jobs poll between blocks.
    pub lifecycle: Arc<Lifecycle>,
}

/// A named source-audio plugin.
pub trait Decoder: Send + Sync {
    /// Creates a job for one command.
    ///
    /// Returns `None` (after logging) when the parameter is unusable; the
    /// command is then skipped without acknowledgement.
    fn create_job(&self, param: &Value, command: Arc<Value>) -> Option<QueuedJob>;
}

/// Instantiates a decoder by registered name.
pub fn create_decoder(
    name: &str,
    config: &Value,
    context: DecoderContext,
) -> Result<Box<dyn Decoder>, StartupError> {
    match name {
        "silence" => Ok(Box::new(SilenceDecoder::new(context))),
        "testcard" => Ok(Box::new(TestcardDecoder::new(config, context))),
        _ => Err(StartupError::UnknownDecoder {
            name: name.to_string(),
        }),
    }
}

/// Reads a positive duration-in-seconds parameter, logging rejects.
fn duration_param(plugin: &str, param: &Value) -> Option<f64> {
    let Some(duration) = param.as_f64() else {
        tracing::warn!(plugin, "parameter is not a number, ignoring command");
        return None;
    };
    if duration <= 0.0 || !duration.is_finite() {
        tracing::warn!(plugin, duration, "parameter is not a positive duration, ignoring command");
        return None;
    }
    Some(duration)
}
