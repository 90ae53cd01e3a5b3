//! Filesystem command channel from containers to the host
//!
//! Each container writes JSON command files into its own group directory.
//! [`file_io`] holds the guarded read/list/quarantine primitives and
//! [`watcher`] the polling loop that dispatches commands to a handler.

pub mod error;
pub mod file_io;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use error::{IngressError, QuarantineError};
pub use file_io::{
    consume_file, list_ipc_json_files, quarantine_file, read_ipc_json_file,
    try_read_ipc_json_file, IPC_MAX_FILE_SIZE,
};
pub use types::{FileState, IpcChannel, IpcCommand, IpcCommandFile, ScanReport, ERRORS_DIR};
pub use watcher::{CommandHandler, IpcWatcher, WatcherConfig};
