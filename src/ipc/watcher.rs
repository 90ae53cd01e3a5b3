//! Polling ingestion loop over the per-group drop directories
//!
//! Layout: `<base>/<group>/messages/*.json` and `<base>/<group>/tasks/*.json`.
//! The source group of a command is the directory it was found in. Files that
//! cannot be read or that the handler rejects are quarantined; handled files
//! are deleted. Only one watcher may own a base directory at a time.

use super::error::QuarantineError;
use super::file_io::{consume_file, list_ipc_json_files, quarantine_file, read_ipc_json_file};
use super::types::{FileState, IpcChannel, IpcCommand, IpcCommandFile, ScanReport, ERRORS_DIR};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Consumer of validated commands; decides what a command means
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one command. An error quarantines the file.
    async fn handle(&self, command: &IpcCommand) -> Result<()>;
}

/// Where and how often to scan
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub base_dir: PathBuf,
    pub poll_interval: Duration,
    /// Group folder whose commands are flagged `is_main`
    pub main_group: String,
}

pub struct IpcWatcher {
    config: WatcherConfig,
    handler: Arc<dyn CommandHandler>,
}

impl IpcWatcher {
    pub fn new(config: WatcherConfig, handler: Arc<dyn CommandHandler>) -> Self {
        Self { config, handler }
    }

    /// Scan every group once
    ///
    /// A quarantine failure stops the pass and is returned, since the file
    /// would otherwise be retried on every poll.
    pub async fn process_once(&self) -> Result<ScanReport, QuarantineError> {
        let mut report = ScanReport::default();
        let groups = match self.group_folders().await {
            Ok(groups) => groups,
            Err(err) => {
                error!(dir = %self.config.base_dir.display(), "Error reading IPC base directory: {}", err);
                return Ok(report);
            }
        };
        report.groups = groups.len();

        for group in &groups {
            for channel in IpcChannel::ALL {
                let dir = self.config.base_dir.join(group).join(channel.dir_name());
                for file_name in list_ipc_json_files(&dir).await {
                    let file = IpcCommandFile {
                        source_group: group.clone(),
                        channel,
                        path: dir.join(&file_name),
                        file_name,
                    };
                    report.record(FileState::Discovered);
                    let state = self.process_file(&file, &mut report).await?;
                    report.record(state);
                }
            }
        }

        if !report.is_empty() {
            debug!(
                discovered = report.discovered,
                consumed = report.consumed,
                quarantined = report.quarantined,
                "IPC scan complete"
            );
        }
        Ok(report)
    }

    /// Poll until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), QuarantineError> {
        std::fs::create_dir_all(&self.config.base_dir).map_err(|source| {
            QuarantineError::CreateDir {
                path: self.config.base_dir.clone(),
                source,
            }
        })?;
        info!(
            dir = %self.config.base_dir.display(),
            interval = ?self.config.poll_interval,
            "IPC watcher started (per-group namespaces)"
        );

        tokio::pin!(shutdown);
        loop {
            self.process_once().await?;

            tokio::select! {
                _ = &mut shutdown => {
                    info!("IPC watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn group_folders(&self) -> std::io::Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.config.base_dir).await?;
        let mut groups = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if name != ERRORS_DIR => groups.push(name),
                Ok(_) => {}
                Err(name) => warn!(?name, "Skipping IPC group folder with non UTF-8 name"),
            }
        }

        groups.sort();
        Ok(groups)
    }

    /// Move one discovered file to its terminal state
    async fn process_file(
        &self,
        file: &IpcCommandFile,
        report: &mut ScanReport,
    ) -> Result<FileState, QuarantineError> {
        let Some(payload) = read_ipc_json_file(&file.path, &file.source_group).await else {
            self.quarantine(file)?;
            return Ok(FileState::Quarantined);
        };
        report.record(FileState::Validated);

        let command = IpcCommand {
            source_group: file.source_group.clone(),
            channel: file.channel,
            file_name: file.file_name.clone(),
            is_main: file.source_group == self.config.main_group,
            payload,
        };

        match self.handler.handle(&command).await {
            Ok(()) => {
                consume_file(&file.path)?;
                debug!(
                    source_group = %file.source_group,
                    channel = %file.channel,
                    file = %file.file_name,
                    "IPC command consumed"
                );
                Ok(FileState::Consumed)
            }
            Err(err) => {
                error!(
                    source_group = %file.source_group,
                    channel = %file.channel,
                    file = %file.file_name,
                    "Error processing IPC command: {:#}",
                    err
                );
                self.quarantine(file)?;
                Ok(FileState::Quarantined)
            }
        }
    }

    fn quarantine(&self, file: &IpcCommandFile) -> Result<(), QuarantineError> {
        quarantine_file(
            &file.path,
            &file.source_group,
            &file.file_name,
            &self.config.base_dir,
        )
        .map(|_| ())
    }
}
