//! Session runner: drives one container process through the demultiplexer
//!
//! Stdout is read in raw chunks and fed to a [`StreamOutputDemux`]; stderr is
//! logged line by line. Both are retained up to a size limit for diagnostics.
//! The kill timeout is reset every time a payload is recovered, but not by
//! stderr, which agents write to continuously. Input is written to stdin from
//! its own task while stdout is read, so a child that logs before reading its
//! input cannot wedge the session past the timeout.

use super::demux::StreamOutputDemux;
use super::error::{DeliveryError, DeliveryFailure, ParseError};
use super::handler::OutputHandler;
use super::markers::SentinelMarkers;
use super::types::{ContainerOutputEvent, OutputStatus, SessionLimits};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

const READ_CHUNK_SIZE: usize = 8192;
const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(5);
const STDERR_TAIL_CHARS: usize = 200;

/// Raw process output kept for diagnostics, capped at a byte limit
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    pub fn push(&mut self, chunk: &[u8], limit: usize) {
        if self.truncated {
            return;
        }
        let remaining = limit.saturating_sub(self.bytes.len());
        if chunk.len() > remaining {
            self.bytes.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Result of one container session
#[derive(Debug)]
pub struct SessionOutcome {
    pub status: OutputStatus,
    pub error: Option<String>,
    pub new_session_id: Option<String>,
    pub had_output: bool,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub events: u64,
    pub parse_errors: u64,
    pub discarded_bytes: u64,
    pub delivery_failures: Vec<DeliveryFailure>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutputStatus::Success
    }
}

/// Forwards to the consumer's handler and signals the timeout watchdog
struct ActivityTap {
    inner: Arc<dyn OutputHandler>,
    activity: Arc<Notify>,
}

#[async_trait]
impl OutputHandler for ActivityTap {
    async fn on_output(&self, event: ContainerOutputEvent) -> Result<()> {
        self.inner.on_output(event).await
    }

    fn on_session_id(&self, session_id: &str) {
        self.inner.on_session_id(session_id);
    }

    fn on_activity(&self) {
        self.activity.notify_one();
        self.inner.on_activity();
    }

    fn on_parse_error(&self, raw: &str, error: &ParseError) {
        self.inner.on_parse_error(raw, error);
    }
}

/// Runs container processes and recovers their structured output
#[derive(Debug, Clone, Default)]
pub struct SessionRunner {
    limits: SessionLimits,
    markers: SentinelMarkers,
    label: String,
}

impl SessionRunner {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            markers: SentinelMarkers::default(),
            label: "container".to_string(),
        }
    }

    pub fn with_markers(mut self, markers: SentinelMarkers) -> Self {
        self.markers = markers;
        self
    }

    /// Name used in log lines for this session (typically the group folder)
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Spawn `command`, write `input` to its stdin, and demultiplex its stdout
    /// until the process exits or the timeout fires
    pub async fn run(
        &self,
        mut command: Command,
        input: Option<String>,
        handler: Arc<dyn OutputHandler>,
    ) -> Result<SessionOutcome> {
        let started_at = Utc::now();
        let start = Instant::now();

        let timeout = self.limits.effective_timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        command
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().context("Failed to spawn container process")?;
        info!(container = %self.label, pid = ?child.id(), "Container session started");

        let stdin_task = match (input, child.stdin.take()) {
            (Some(input), Some(stdin)) => {
                Some(tokio::spawn(write_stdin(stdin, input, self.label.clone())))
            }
            _ => None,
        };

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr"))?;

        let stderr_task = tokio::spawn(drain_stderr(
            stderr,
            self.label.clone(),
            self.limits.max_output_size,
        ));

        let activity = Arc::new(Notify::new());
        let tap = Arc::new(ActivityTap {
            inner: handler,
            activity: Arc::clone(&activity),
        });
        let mut demux = StreamOutputDemux::with_markers(tap, self.markers.clone());

        let mut captured_stdout = CapturedOutput::default();
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let mut stdout_open = true;
        let mut timed_out = false;

        let status = loop {
            tokio::select! {
                read = stdout.read(&mut buf), if stdout_open => match read {
                    Ok(0) => {
                        stdout_open = false;
                        demux.finish();
                    }
                    Ok(n) => {
                        captured_stdout.push(&buf[..n], self.limits.max_output_size);
                        demux.feed_bytes(&buf[..n]);
                    }
                    Err(e) => {
                        warn!(container = %self.label, "Error reading container stdout: {}", e);
                        stdout_open = false;
                        demux.finish();
                    }
                },
                _ = activity.notified() => {
                    deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + timeout);
                }
                status = child.wait(), if !stdout_open => {
                    break status.context("Failed to wait for container process")?;
                }
                _ = &mut deadline => {
                    timed_out = true;
                    error!(container = %self.label, ?timeout, "Container timeout, killing process");
                    if let Err(e) = child.kill().await {
                        // Already exited between the deadline and the kill
                        warn!(container = %self.label, "Failed to kill timed out process: {}", e);
                    }
                    break child.wait().await.context("Failed to reap killed process")?;
                }
            }
        };

        if let Some(task) = stdin_task {
            // The child is gone, so an unfinished write can never complete
            task.abort();
        }

        if captured_stdout.is_truncated() {
            warn!(container = %self.label, size = captured_stdout.len(), "Container stdout truncated due to size limit");
        }

        let captured_stderr = match tokio::time::timeout(STDERR_DRAIN_GRACE, stderr_task).await {
            Ok(Ok(captured)) => captured,
            Ok(Err(e)) => {
                warn!(container = %self.label, "Stderr reader task failed: {}", e);
                CapturedOutput::default()
            }
            Err(_) => {
                warn!(container = %self.label, "Stderr still open after process exit; giving up on it");
                CapturedOutput::default()
            }
        };

        let delivery_failures = match demux.settled().await {
            Ok(()) => Vec::new(),
            Err(DeliveryError::Failed { failures }) => failures,
            Err(e @ DeliveryError::WorkerGone) => {
                return Err(anyhow::Error::new(e).context("Output delivery did not settle"));
            }
        };

        let duration = start.elapsed();
        let exit_code = status.code();
        let had_output = demux.had_output();

        let (status, error) = if timed_out {
            if had_output {
                // The agent already answered; this is idle cleanup
                info!(container = %self.label, ?duration, "Container timed out after output (idle cleanup)");
                (OutputStatus::Success, None)
            } else {
                error!(container = %self.label, ?duration, "Container timed out with no output");
                (
                    OutputStatus::Error,
                    Some(format!("Container timed out after {timeout:?}")),
                )
            }
        } else if !status.success() {
            let stderr_text = captured_stderr.text();
            error!(container = %self.label, ?exit_code, ?duration, "Container exited with error");
            (
                OutputStatus::Error,
                Some(format!(
                    "Container exited with code {}: {}",
                    exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                    tail_chars(&stderr_text, STDERR_TAIL_CHARS)
                )),
            )
        } else {
            info!(
                container = %self.label,
                ?duration,
                new_session_id = ?demux.new_session_id(),
                "Container completed (streaming mode)"
            );
            (OutputStatus::Success, None)
        };

        Ok(SessionOutcome {
            status,
            error,
            new_session_id: demux.new_session_id().map(str::to_string),
            had_output,
            timed_out,
            exit_code,
            started_at,
            duration,
            events: demux.events_extracted(),
            parse_errors: demux.parse_errors(),
            discarded_bytes: demux.discarded_bytes(),
            delivery_failures,
            stdout: captured_stdout,
            stderr: captured_stderr,
        })
    }
}

/// Write the whole input, then close stdin so the container sees EOF
///
/// A child may exit without reading its input; that is not a session failure.
async fn write_stdin(mut stdin: ChildStdin, input: String, label: String) {
    if let Err(e) = stdin.write_all(input.as_bytes()).await {
        warn!(container = %label, "Failed to write to container stdin: {}", e);
        return;
    }
    if let Err(e) = stdin.flush().await {
        warn!(container = %label, "Failed to flush container stdin: {}", e);
    }
}

/// Log stderr line by line while keeping a bounded copy
async fn drain_stderr(
    stderr: impl AsyncRead + Unpin,
    label: String,
    limit: usize,
) -> CapturedOutput {
    let mut captured = CapturedOutput::default();
    let mut segments = BufReader::new(stderr).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(line)) => {
                let text = String::from_utf8_lossy(&line);
                if !text.trim().is_empty() {
                    debug!(container = %label, "{}", text.trim_end());
                }
                captured.push(&line, limit);
                captured.push(b"\n", limit);
            }
            Ok(None) => break,
            Err(e) => {
                warn!(container = %label, "Error reading container stderr: {}", e);
                break;
            }
        }
    }

    if captured.is_truncated() {
        warn!(container = %label, size = captured.len(), "Container stderr truncated due to size limit");
    }
    captured
}

fn tail_chars(text: &str, count: usize) -> &str {
    let total = text.chars().count();
    if total <= count {
        return text;
    }
    let skip = total - count;
    text.char_indices()
        .nth(skip)
        .map_or(text, |(idx, _)| &text[idx..])
}
