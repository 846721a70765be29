//! File-backed queue transports.
//!
//! The read side works on regular files and FIFOs alike; a FIFO gives the
//! usual "tail -f"-style shell. Config is either a path string or an
//! object with a `file` key (plus `append` for the write side).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use serde_json::Value;

use crate::error::StartupError;
use crate::queue::{ReadQueue, WriteQueue};

fn config_path(config: &Value, what: &str) -> Result<PathBuf, StartupError> {
    if let Some(path) = config.as_str() {
        return Ok(PathBuf::from(path));
    }
    config
        .get("file")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .ok_or_else(|| {
            StartupError::invalid_config(format!(
                "'{what}' queue needs a path string or an object with 'file'"
            ))
        })
}

/// Reads newline-delimited messages from a file or FIFO.
pub struct FileReadQueue {
    reader: BufReader<File>,
    path: PathBuf,
}

impl FileReadQueue {
    /// Opens the configured path for reading.
    pub fn new(config: &Value) -> Result<Self, StartupError> {
        let path = config_path(config, "file")?;
        let file = File::open(&path).map_err(|source| StartupError::FileOpen {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
        })
    }
}

impl ReadQueue for FileReadQueue {
    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => {
                tracing::info!(path = %self.path.display(), "command file exhausted");
                None
            }
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "command file read error");
                None
            }
        }
    }
}

/// Writes newline-delimited records to a file, truncating or appending.
pub struct FileWriteQueue {
    writer: BufWriter<File>,
}

impl FileWriteQueue {
    /// Opens (or creates) the configured path for writing.
    pub fn new(config: &Value) -> Result<Self, StartupError> {
        let path = config_path(config, "file")?;
        let append = config
            .get("append")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options
            .open(&path)
            .map_err(|source| StartupError::FileOpen { path, source })?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl WriteQueue for FileWriteQueue {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
