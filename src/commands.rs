//! Commands the application can post to the worker

use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundCommand {
  /// Drain the offline queue now
  FlushQueue,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
  pub command: ForegroundCommand,
  /// Value of the message's `type` field
  pub wire_name: &'static str,
}

/// All recognised commands
pub const COMMANDS: &[CommandSpec] = &[CommandSpec {
  command: ForegroundCommand::FlushQueue,
  wire_name: "FLUSH_QUEUE",
}];

impl ForegroundCommand {
  pub fn wire_name(&self) -> &'static str {
    COMMANDS
      .iter()
      .find(|entry| entry.command == *self)
      .map(|entry| entry.wire_name)
      .unwrap_or("UNKNOWN")
  }

  /// Message the application posts, e.g. `{"type": "FLUSH_QUEUE"}`.
  pub fn to_message(&self) -> Value {
    json!({ "type": self.wire_name() })
  }
}

/// Parse a posted message. Anything without a known `type` is ignored.
pub fn parse_message(message: &Value) -> Option<ForegroundCommand> {
  let name = message.get("type")?.as_str()?;
  COMMANDS
    .iter()
    .find(|entry| entry.wire_name == name)
    .map(|entry| entry.command)
}
