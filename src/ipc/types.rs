//! Types describing command files dropped by containers

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Subdirectory name holding rejected files; never treated as a group
pub const ERRORS_DIR: &str = "errors";

/// Which per-group drop directory a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpcChannel {
    Messages,
    Tasks,
}

impl IpcChannel {
    pub const ALL: [IpcChannel; 2] = [IpcChannel::Messages, IpcChannel::Tasks];

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Tasks => "tasks",
        }
    }
}

impl fmt::Display for IpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A `.json` file found in a group's drop directory
///
/// The group is derived from the directory the file sits in, never from its
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcCommandFile {
    pub source_group: String,
    pub channel: IpcChannel,
    pub file_name: String,
    pub path: PathBuf,
}

/// Lifecycle of one command file
///
/// `Discovered` files came out of the listing, `Validated` ones were read and
/// parsed. Every discovered file ends either consumed or quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Discovered,
    Validated,
    Consumed,
    Quarantined,
}

/// A validated command handed to the consumer
#[derive(Debug, Clone, Serialize)]
pub struct IpcCommand {
    pub source_group: String,
    pub channel: IpcChannel,
    pub file_name: String,
    /// Privilege hint: the group is the configured main group
    pub is_main: bool,
    pub payload: Value,
}

impl IpcCommand {
    /// The `type` field most commands carry, if present
    pub fn command_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// Per-pass summary of what the watcher did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub groups: usize,
    pub discovered: usize,
    pub validated: usize,
    pub consumed: usize,
    pub quarantined: usize,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.discovered == 0
    }

    pub(crate) fn record(&mut self, state: FileState) {
        match state {
            FileState::Discovered => self.discovered += 1,
            FileState::Validated => self.validated += 1,
            FileState::Consumed => self.consumed += 1,
            FileState::Quarantined => self.quarantined += 1,
        }
    }
}
