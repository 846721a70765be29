//! Queue transports and the command queue reader.
//!
//! A [`ReadQueue`] delivers one line-oriented message per call; a
//! [`WriteQueue`] accepts one serialized record per call. The shell read
//! queue feeds commands in; publish write queues carry acknowledgement
//! events out. Transports are plugins resolved by name at startup.

mod command;
mod file;

pub use command::CommandQueue;
pub use file::{FileReadQueue, FileWriteQueue};

use serde_json::Value;

use crate::error::StartupError;

/// A source of line-oriented messages.
pub trait ReadQueue: Send {
    /// Blocks for the next message. Returns `None` when the transport is
    /// exhausted or closed; the caller treats that as "no more commands".
    fn read_line(&mut self) -> Option<String>;

    /// Releases the transport. Called during shutdown; a reader blocked
    /// in `read_line` may only notice on its next message boundary.
    fn close(&mut self) {}
}

/// A destination for line-oriented records.
pub trait WriteQueue: Send {
    /// Writes one record plus the line terminator and flushes.
    fn write_line(&mut self, line: &str) -> std::io::Result<()>;
}

/// Instantiates a read queue by registered name.
pub fn create_read_queue(
    name: &str,
    config: &Value,
) -> Result<Box<dyn ReadQueue>, StartupError> {
    match name {
        "file" => Ok(Box::new(FileReadQueue::new(config)?)),
        _ => Err(StartupError::UnknownQueue {
            name: name.to_string(),
        }),
    }
}

/// Instantiates a write queue by registered name.
pub fn create_write_queue(
    name: &str,
    config: &Value,
) -> Result<Box<dyn WriteQueue>, StartupError> {
    match name {
        "file" => Ok(Box::new(FileWriteQueue::new(config)?)),
        _ => Err(StartupError::UnknownQueue {
            name: name.to_string(),
        }),
    }
}
