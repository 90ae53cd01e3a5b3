//! Consumer-side handler for events recovered from the output stream

use super::error::ParseError;
use super::types::ContainerOutputEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

/// Handler for demultiplexed container output
///
/// `on_output` runs on the delivery queue, strictly one event at a time in
/// extraction order, and may take as long as it needs. The remaining callbacks
/// are invoked synchronously from `feed` and must not block.
#[async_trait]
pub trait OutputHandler: Send + Sync {
    /// Deliver one recovered event
    async fn on_output(&self, event: ContainerOutputEvent) -> Result<()>;

    /// A payload announced a new session id; called before its delivery is queued
    fn on_session_id(&self, _session_id: &str) {}

    /// A payload was recovered; liveness signal independent of delivery latency
    fn on_activity(&self) {}

    /// A payload between valid markers could not be parsed
    fn on_parse_error(&self, _raw: &str, _error: &ParseError) {}
}

type DeliverFn =
    dyn Fn(ContainerOutputEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync;

/// Closure-backed handler, convenient for session drivers and tests
pub struct FnOutputHandler {
    deliver: Box<DeliverFn>,
    session_id: Option<Box<dyn Fn(&str) + Send + Sync>>,
    activity: Option<Box<dyn Fn() + Send + Sync>>,
    parse_error: Option<Box<dyn Fn(&str, &ParseError) + Send + Sync>>,
}

impl FnOutputHandler {
    pub fn new<F, Fut>(deliver: F) -> Self
    where
        F: Fn(ContainerOutputEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            deliver: Box::new(move |event| Box::pin(deliver(event))),
            session_id: None,
            activity: None,
            parse_error: None,
        }
    }

    pub fn with_session_id(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.session_id = Some(Box::new(f));
        self
    }

    pub fn with_activity(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.activity = Some(Box::new(f));
        self
    }

    pub fn with_parse_error(mut self, f: impl Fn(&str, &ParseError) + Send + Sync + 'static) -> Self {
        self.parse_error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl OutputHandler for FnOutputHandler {
    async fn on_output(&self, event: ContainerOutputEvent) -> Result<()> {
        (self.deliver)(event).await
    }

    fn on_session_id(&self, session_id: &str) {
        if let Some(f) = &self.session_id {
            f(session_id);
        }
    }

    fn on_activity(&self) {
        if let Some(f) = &self.activity {
            f();
        }
    }

    fn on_parse_error(&self, raw: &str, error: &ParseError) {
        if let Some(f) = &self.parse_error {
            f(raw, error);
        }
    }
}

/// Forwards every event into a channel
pub struct ChannelOutputHandler {
    sender: mpsc::Sender<ContainerOutputEvent>,
}

impl ChannelOutputHandler {
    pub fn new(sender: mpsc::Sender<ContainerOutputEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl OutputHandler for ChannelOutputHandler {
    async fn on_output(&self, event: ContainerOutputEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to forward output event: {}", e))
    }

    fn on_parse_error(&self, raw: &str, error: &ParseError) {
        tracing::warn!(raw_len = raw.len(), "Failed to parse streamed output chunk: {}", error);
    }
}
