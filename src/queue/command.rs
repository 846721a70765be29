//! Command queue reader.
//!
//! Wraps the shell read queue and turns each line into a [`Command`].
//! Lines that are not JSON, or JSON without a string `cmd` field, are
//! logged and skipped; they never stall the reader.

use serde_json::Value;

use crate::command::Command;
use crate::queue::ReadQueue;

/// Parses commands off a line-oriented read queue.
pub struct CommandQueue {
    below: Box<dyn ReadQueue>,
}

impl CommandQueue {
    /// Wraps a read queue transport.
    pub fn new(below: Box<dyn ReadQueue>) -> Self {
        Self { below }
    }

    /// Blocks for the next well-formed command. Returns `None` when the
    /// transport is exhausted.
    pub fn next_command(&mut self) -> Option<Command> {
        loop {
            let line = self.below.read_line()?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!(%error, "could not parse incoming line as JSON, ignoring");
                    continue;
                }
            };
            match Command::from_value(value) {
                Some(command) => return Some(command),
                None => {
                    tracing::warn!("command object has no string 'cmd' field, ignoring");
                }
            }
        }
    }

    /// Closes the underlying transport.
    pub fn close(&mut self) {
        self.below.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StaticQueue {
        lines: Vec<String>,
    }

    impl StaticQueue {
        fn new(lines: &[&str]) -> Self {
            Self {
                lines: lines.iter().rev().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl ReadQueue for StaticQueue {
        fn read_line(&mut self) -> Option<String> {
            self.lines.pop()
        }
    }

    #[test]
    fn test_parses_commands_in_order() {
        let mut queue = CommandQueue::new(Box::new(StaticQueue::new(&[
            r#"{"cmd":"sil","param":2.0}"#,
            r#"{"cmd":"quit"}"#,
        ])));

        let first = queue.next_command().unwrap();
        assert_eq!(first.cmd, "sil");
        assert_eq!(first.param, json!(2.0));

        let second = queue.next_command().unwrap();
        assert!(second.is_quit());

        assert!(queue.next_command().is_none());
    }

    #[test]
    fn test_skips_garbage_lines() {
        let mut queue = CommandQueue::new(Box::new(StaticQueue::new(&[
            "not json at all",
            "",
            r#"{"param": "no cmd"}"#,
            r#"42"#,
            r#"{"cmd":"ok"}"#,
        ])));

        let command = queue.next_command().unwrap();
        assert_eq!(command.cmd, "ok");
    }

    #[test]
    fn test_exhausted_transport_ends_commands() {
        let mut queue = CommandQueue::new(Box::new(StaticQueue::new(&[])));
        assert!(queue.next_command().is_none());
    }
}
