//! Icecast-style network push broca.
//!
//! Connects to an Icecast server as a source client with the legacy
//! `SOURCE` handshake over a plain TCP socket and streams packet payloads
//! to the mount. The outer loop reconnects with exponential backoff
//! (1 s doubling to 60 s); inside, each chunk gets a few retries before
//! the connection is declared dead. Out-of-band metadata packets become
//! `admin/metadata` title updates on a side connection. Delivery is paced
//! against the encoder's frame rate so the server is never flooded.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde_json::Value;

use crate::broca::{Broca, BrocaContext, BROCA_BUFFER};
use crate::clock::FrameClock;
use crate::error::{BrocaError, StartupError};
use crate::format::{Codec, StreamFormat};
use crate::metadata::{decode_oob_metadata, Metadata};
use crate::pipeline::packet::flags;

/// Initial reconnect delay.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Reconnect delay cap.
const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// Transient send retries per chunk.
const SEND_TRIES: u32 = 3;
/// Socket write timeout.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Broca pushing the stream to an Icecast mount.
pub struct IcecastBroca {
    context: BrocaContext,
    host: String,
    port: u16,
    mount: String,
    user: String,
    password: String,
    headers: Vec<(String, String)>,
    content_type: &'static str,
    clock: FrameClock,
    sync_threshold: usize,
}

fn required_str(config: &Value, key: &str) -> Result<String, StartupError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StartupError::invalid_config(format!("'icecast' broca config needs string '{key}'"))
        })
}

fn content_type(format: &StreamFormat) -> &'static str {
    match format {
        StreamFormat::Pcm(_) => "application/octet-stream",
        StreamFormat::Encoded(Codec::Mp3) => "audio/mpeg",
        StreamFormat::Encoded(_) => "application/ogg",
    }
}

impl IcecastBroca {
    /// Creates the broca from its config:
    /// `{host, port, mount, password, user?, name?, genre?, description?,
    /// public?, syncthreshold?}`.
    pub fn new(
        config: &Value,
        context: BrocaContext,
        stream_format: StreamFormat,
    ) -> Result<Self, StartupError> {
        if !config.is_object() {
            return Err(StartupError::invalid_config(
                "'icecast' broca needs a config object",
            ));
        }

        let host = required_str(config, "host")?;
        let port = config
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
            .ok_or_else(|| StartupError::invalid_config("'icecast' broca config needs 'port'"))?;
        let mut mount = required_str(config, "mount")?;
        if !mount.starts_with('/') {
            mount.insert(0, '/');
        }
        let password = required_str(config, "password")?;
        let user = config
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or("source")
            .to_string();

        let mut headers = Vec::new();
        for (key, header) in [
            ("name", "Ice-Name"),
            ("genre", "Ice-Genre"),
            ("description", "Ice-Description"),
        ] {
            if let Some(value) = config.get(key).and_then(Value::as_str) {
                headers.push((header.to_string(), value.to_string()));
            }
        }
        if let Some(public) = config.get("public").and_then(Value::as_bool) {
            headers.push(("Ice-Public".to_string(), u8::from(public).to_string()));
        }

        let threshold_seconds = config
            .get("syncthreshold")
            .and_then(Value::as_f64)
            .unwrap_or(0.1)
            .max(0.0);
        let sync_threshold = (threshold_seconds * f64::from(context.frame_rate)) as usize;

        let clock = FrameClock::new(context.frame_rate);
        Ok(Self {
            context,
            host,
            port,
            mount,
            user,
            password,
            headers,
            content_type: content_type(&stream_format),
            clock,
            sync_threshold,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn authorization(&self) -> String {
        format!(
            "Basic {}",
            base64(format!("{}:{}", self.user, self.password).as_bytes())
        )
    }

    fn connect(&self) -> Result<TcpStream, BrocaError> {
        let stream = TcpStream::connect(self.endpoint()).map_err(|error| BrocaError::Connect {
            endpoint: self.endpoint(),
            reason: error.to_string(),
        })?;
        stream
            .set_write_timeout(Some(WRITE_TIMEOUT))
            .map_err(|error| BrocaError::Connect {
                endpoint: self.endpoint(),
                reason: error.to_string(),
            })?;

        let mut request = format!(
            "SOURCE {} HTTP/1.0\r\nHost: {}\r\nAuthorization: {}\r\nUser-Agent: relaycast/{}\r\nContent-Type: {}\r\n",
            self.mount,
            self.endpoint(),
            self.authorization(),
            env!("CARGO_PKG_VERSION"),
            self.content_type,
        );
        for (header, value) in &self.headers {
            request.push_str(&format!("{header}: {value}\r\n"));
        }
        request.push_str("\r\n");

        stream
            .try_clone()
            .and_then(|mut writable| writable.write_all(request.as_bytes()))
            .map_err(|error| BrocaError::write_failed(error.to_string()))?;

        let mut reader = BufReader::new(&stream);
        let mut status = String::new();
        reader
            .read_line(&mut status)
            .map_err(|error| BrocaError::write_failed(error.to_string()))?;
        if !status.contains(" 200 ") {
            return Err(BrocaError::HandshakeRejected {
                status: status.trim().to_string(),
            });
        }
        // drain the response headers; the body channel is ours afterwards
        loop {
            let mut line = String::new();
            let n = reader
                .read_line(&mut line)
                .map_err(|error| BrocaError::write_failed(error.to_string()))?;
            if n == 0 || line == "\r\n" || line == "\n" {
                break;
            }
        }
        Ok(stream)
    }

    fn send_chunk(&self, stream: &mut TcpStream, chunk: &[u8]) -> bool {
        for attempt in 0..SEND_TRIES {
            match stream.write_all(chunk) {
                Ok(()) => return true,
                Err(error)
                    if error.kind() == std::io::ErrorKind::Interrupted
                        || error.kind() == std::io::ErrorKind::WouldBlock
                        || error.kind() == std::io::ErrorKind::TimedOut =>
                {
                    tracing::debug!(index = self.context.index, attempt, %error, "send retry");
                }
                Err(error) => {
                    tracing::warn!(index = self.context.index, %error, "send failed");
                    return false;
                }
            }
        }
        tracing::warn!(index = self.context.index, "send retries exhausted");
        false
    }

    /// Pushes an ICY title update through the admin endpoint, best-effort.
    fn update_metadata(&self, metadata: &Metadata) {
        let artist = metadata.get("artist").unwrap_or("");
        let title = metadata.get("title").unwrap_or("");
        let song = format!("{artist} - {title}");

        let request = format!(
            "GET /admin/metadata?mode=updinfo&mount={}&song={} HTTP/1.0\r\nHost: {}\r\nAuthorization: {}\r\nUser-Agent: relaycast/{}\r\n\r\n",
            percent_encode(&self.mount),
            percent_encode(&song),
            self.endpoint(),
            self.authorization(),
            env!("CARGO_PKG_VERSION"),
        );

        let result = TcpStream::connect(self.endpoint()).and_then(|mut stream| {
            stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
            stream.write_all(request.as_bytes())?;
            let mut response = Vec::new();
            let _ = stream.take(512).read_to_end(&mut response);
            Ok(())
        });
        if let Err(error) = result {
            tracing::warn!(index = self.context.index, %error, "metadata update failed");
        }
    }
}

impl Broca for IcecastBroca {
    fn run(&mut self) {
        let mut buffer = [0u8; BROCA_BUFFER];
        let mut backoff = BACKOFF_START;
        let mut quitting = false;

        while self.context.lifecycle.running() && !quitting {
            let mut stream = match self.connect() {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::warn!(index = self.context.index, %error, "connect failed");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            };
            tracing::info!(index = self.context.index, mount = %self.mount, "source connected");
            backoff = BACKOFF_START;
            self.clock.reset();

            'stream: while self.context.lifecycle.running() {
                let Some(mut packet) = self.context.source.read_packet() else {
                    quitting = true;
                    break;
                };

                if packet.header.flags & flags::METADATA != 0 {
                    let metadata = decode_oob_metadata(&packet.read_to_vec());
                    self.update_metadata(&metadata);
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
                            quitting = true;
                            break;
                        }
                        continue;
                    }
                    if !self.send_chunk(&mut stream, &buffer[..n]) {
                        std::thread::sleep(Duration::from_secs(1));
                        break 'stream;
                    }
                }

                self.clock.update(packet.header.frame_count);
                self.clock.sleep_if(self.sync_threshold);
            }
        }
    }
}

/// Standard Base64 (RFC 4648, with padding), enough for Basic auth.
fn base64(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let word = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
        out.push(TABLE[(word >> 18) as usize & 63] as char);
        out.push(TABLE[(word >> 12) as usize & 63] as char);
        out.push(if chunk.len() > 1 {
            TABLE[(word >> 6) as usize & 63] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            TABLE[word as usize & 63] as char
        } else {
            '='
        });
    }
    out
}

/// Percent-encodes everything outside the URL-safe set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
