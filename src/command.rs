//! Externally submitted commands.

use std::sync::Arc;

use serde_json::Value;

/// The command name that triggers graceful shutdown.
pub const QUIT_COMMAND: &str = "quit";

/// One command read from the shell queue.
///
/// The raw JSON object is retained by reference so acknowledgement events
/// can echo the exact object the caller submitted.
#[derive(Debug, Clone)]
pub struct Command {
    /// The decoder name (`cmd` field).
    pub cmd: String,
    /// Free-form decoder argument (`param` field, null if absent).
    pub param: Value,
    /// The full original command object.
    pub raw: Arc<Value>,
}

impl Command {
    /// Builds a command from a parsed JSON object.
    ///
    /// Returns `None` when the object has no string `cmd` field.
    pub fn from_value(value: Value) -> Option<Self> {
        let cmd = value.get("cmd")?.as_str()?.to_string();
        let param = value.get("param").cloned().unwrap_or(Value::Null);
        Some(Self {
            cmd,
            param,
            raw: Arc::new(value),
        })
    }

    /// True for the reserved shutdown command.
    pub fn is_quit(&self) -> bool {
        self.cmd == QUIT_COMMAND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value() {
        let cmd = Command::from_value(json!({"cmd": "sil", "param": 2.0})).unwrap();
        assert_eq!(cmd.cmd, "sil");
        assert_eq!(cmd.param, json!(2.0));
        assert_eq!(*cmd.raw, json!({"cmd": "sil", "param": 2.0}));
    }

    #[test]
    fn test_param_defaults_to_null() {
        let cmd = Command::from_value(json!({"cmd": "next"})).unwrap();
        assert_eq!(cmd.param, Value::Null);
    }

    #[test]
    fn test_missing_or_non_string_cmd() {
        assert!(Command::from_value(json!({"param": 1})).is_none());
        assert!(Command::from_value(json!({"cmd": 5})).is_none());
        assert!(Command::from_value(json!("just a string")).is_none());
    }

    #[test]
    fn test_quit_detection() {
        let quit = Command::from_value(json!({"cmd": "quit"})).unwrap();
        assert!(quit.is_quit());
        let other = Command::from_value(json!({"cmd": "sil"})).unwrap();
        assert!(!other.is_quit());
    }
}
