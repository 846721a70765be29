//! File broca.
//!
//! Streams packet payloads into a local file, skipping out-of-band
//! metadata and acknowledging command packets. Config is a path string or
//! `{file, append}`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde_json::Value;

use crate::broca::{Broca, BrocaContext, BROCA_BUFFER};
use crate::error::{BrocaError, StartupError};
use crate::pipeline::packet::flags;

/// Broca that appends the packet stream to a file.
pub struct FileBroca {
    context: BrocaContext,
    writer: BufWriter<File>,
    path: PathBuf,
}

impl FileBroca {
    /// Opens the configured file. Truncates unless `append` is set.
    pub fn new(config: &Value, context: BrocaContext) -> Result<Self, StartupError> {
        let (path, append) = match config {
            Value::String(path) => (PathBuf::from(path), false),
            Value::Object(object) => {
                let path = object
                    .get("file")
                    .and_then(Value::as_str)
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        StartupError::invalid_config("'file' broca config needs 'file'")
                    })?;
                let append = object
                    .get("append")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                (path, append)
            }
            _ => {
                return Err(StartupError::invalid_config(
                    "'file' broca needs a string or an object as config",
                ))
            }
        };

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options.open(&path).map_err(|source| StartupError::FileOpen {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            context,
            writer: BufWriter::new(file),
            path,
        })
    }
}

impl Broca for FileBroca {
    fn run(&mut self) {
        let mut buffer = [0u8; BROCA_BUFFER];
        while self.context.lifecycle.running() {
            let Some(mut packet) = self.context.source.read_packet() else {
                break;
            };
            if packet.header.flags & flags::METADATA != 0 {
                packet.skip_full();
                continue;
            }
            if packet.header.flags & flags::ORIGINAL_COMMAND != 0 {
                self.context.acknowledge_command(&mut packet);
                continue;
            }

            while packet.has_data() && self.context.lifecycle.running() {
                let n = packet.read_some(&mut buffer);
                if n == 0 {
                    if self.context.source.closed_to_reads() {
                        break;
                    }
                    continue;
                }
                if let Err(error) = self.writer.write_all(&buffer[..n]) {
                    let error = BrocaError::file(&self.path, error);
                    tracing::error!(%error, "failed to write to file");
                    return;
                }
            }
        }
        if let Err(error) = self.writer.flush() {
            let error = BrocaError::file(&self.path, error);
            tracing::error!(%error, "failed to flush file");
        }
    }
}
