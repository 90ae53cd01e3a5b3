//! Sentinel-delimited demultiplexer for live container output
//!
//! Container stdout interleaves free-form log noise with JSON payloads wrapped
//! in a start/end marker pair. Chunks arrive with no framing, so a marker or a
//! payload may be split across any number of `feed` calls. After every call
//! each byte seen so far is in exactly one of three places: discarded noise
//! that preceded a start marker, a completed segment that has been parsed, or
//! the retained tail of an incomplete segment.

use super::decoder::Utf8ChunkDecoder;
use super::delivery::DeliveryQueue;
use super::error::{DeliveryError, ParseError};
use super::handler::OutputHandler;
use super::markers::SentinelMarkers;
use super::types::ContainerOutputEvent;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Incremental extractor of structured events from one container session
///
/// `feed` takes `&mut self`, so calls can never overlap. Deliveries run on a
/// dedicated task and do not hold up further feeding.
pub struct StreamOutputDemux {
    markers: SentinelMarkers,
    handler: Arc<dyn OutputHandler>,
    queue: DeliveryQueue,
    decoder: Utf8ChunkDecoder,
    buffer: String,
    new_session_id: Option<String>,
    had_output: bool,
    events_extracted: u64,
    parse_errors: u64,
    discarded_bytes: u64,
}

impl StreamOutputDemux {
    /// Demultiplexer using the default markers; requires a tokio runtime
    pub fn new(handler: Arc<dyn OutputHandler>) -> Self {
        Self::with_markers(handler, SentinelMarkers::default())
    }

    pub fn with_markers(handler: Arc<dyn OutputHandler>, markers: SentinelMarkers) -> Self {
        let queue = DeliveryQueue::spawn(Arc::clone(&handler));
        Self {
            markers,
            handler,
            queue,
            decoder: Utf8ChunkDecoder::new(),
            buffer: String::new(),
            new_session_id: None,
            had_output: false,
            events_extracted: 0,
            parse_errors: 0,
            discarded_bytes: 0,
        }
    }

    /// Append a chunk of text and process every complete marker pair in the buffer
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);

        for raw in self.extract_segments() {
            self.handle_payload(&raw);
        }
    }

    /// Feed raw bytes, holding back a multi-byte character split across reads
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        let text = self.decoder.decode(bytes);
        if !text.is_empty() {
            self.feed(&text);
        }
    }

    /// Flush bytes held back by the decoder once the stream has closed
    pub fn finish(&mut self) {
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            self.feed(&rest);
        }
        if !self.buffer.is_empty() {
            debug!(
                retained = self.buffer.len(),
                "Output stream ended with an incomplete segment"
            );
        }
    }

    /// Resolves after every delivery queued so far has completed
    pub fn settled(&self) -> impl Future<Output = Result<(), DeliveryError>> + Send + 'static {
        self.queue.settled()
    }

    /// True once at least one payload has been parsed successfully
    pub fn had_output(&self) -> bool {
        self.had_output
    }

    /// Most recently announced session id
    pub fn new_session_id(&self) -> Option<&str> {
        self.new_session_id.as_deref()
    }

    pub fn markers(&self) -> &SentinelMarkers {
        &self.markers
    }

    /// Bytes currently retained waiting for more input
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped as noise outside any marker pair
    ///
    /// A corrupted or truncated start marker upstream makes its payload land
    /// here, so a growing value with no matching events is worth alerting on.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    pub fn events_extracted(&self) -> u64 {
        self.events_extracted
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    /// Deliveries queued but not yet completed
    pub fn pending_deliveries(&self) -> usize {
        self.queue.pending()
    }

    /// Remove every complete segment from the buffer, returning the trimmed payloads
    fn extract_segments(&mut self) -> Vec<String> {
        let start = self.markers.start();
        let end = self.markers.end();
        let mut segments = Vec::new();

        loop {
            let Some(start_idx) = self.buffer.find(start) else {
                self.discarded_bytes += discard_noise(&mut self.buffer, start) as u64;
                break;
            };

            if start_idx > 0 {
                self.buffer.drain(..start_idx);
                self.discarded_bytes += start_idx as u64;
                trace!(bytes = start_idx, "Discarded output preceding start marker");
            }

            // Incomplete pair: keep everything from the start marker on
            let Some(relative_end) = self.buffer[start.len()..].find(end) else {
                break;
            };
            let end_idx = start.len() + relative_end;

            segments.push(self.buffer[start.len()..end_idx].trim().to_string());
            self.buffer.drain(..end_idx + end.len());
        }

        segments
    }

    fn handle_payload(&mut self, raw: &str) {
        let payload = match parse_payload(raw) {
            Ok(payload) => payload,
            Err(err) => {
                self.parse_errors += 1;
                debug!(raw_len = raw.len(), "Unparseable output payload: {}", err);
                self.handler.on_parse_error(raw, &err);
                return;
            }
        };

        let event = ContainerOutputEvent::new(self.events_extracted, payload);
        self.events_extracted += 1;

        if let Some(session_id) = event.new_session_id() {
            self.new_session_id = Some(session_id.to_string());
            self.handler.on_session_id(session_id);
        }

        self.had_output = true;
        self.handler.on_activity();
        self.queue.enqueue(event);
    }
}

pub(super) fn parse_payload(raw: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        Value::Null => Err(ParseError::NotAnObject("null")),
        Value::Bool(_) => Err(ParseError::NotAnObject("boolean")),
        Value::Number(_) => Err(ParseError::NotAnObject("number")),
        Value::String(_) => Err(ParseError::NotAnObject("string")),
        Value::Array(_) => Err(ParseError::NotAnObject("array")),
    }
}

/// Drop buffered noise when no start marker is present
///
/// Only a suffix that is itself a prefix of the start marker can still become
/// part of a marker, so everything before it is gone for good. Returns the
/// number of bytes removed.
fn discard_noise(buffer: &mut String, start: &str) -> usize {
    let keep = (1..start.len())
        .rev()
        .filter(|&len| start.is_char_boundary(len))
        .find(|&len| buffer.ends_with(&start[..len]))
        .unwrap_or(0);

    let discard = buffer.len() - keep;
    if discard > 0 {
        buffer.drain(..discard);
    }
    discard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_noise_keeps_partial_marker() {
        let mut buffer = String::from("log line\n---NANOCLAW_OUT");
        let dropped = discard_noise(&mut buffer, "---NANOCLAW_OUTPUT_START---");
        assert_eq!(buffer, "---NANOCLAW_OUT");
        assert_eq!(dropped, "log line\n".len());
    }

    #[test]
    fn test_discard_noise_without_partial_marker() {
        let mut buffer = String::from("plain noise");
        let dropped = discard_noise(&mut buffer, "---NANOCLAW_OUTPUT_START---");
        assert!(buffer.is_empty());
        assert_eq!(dropped, 11);
    }

    #[test]
    fn test_discard_noise_single_dash() {
        let mut buffer = String::from("progress 50% -");
        discard_noise(&mut buffer, "---NANOCLAW_OUTPUT_START---");
        assert_eq!(buffer, "-");
    }

    #[test]
    fn test_parse_payload_kinds() {
        assert!(parse_payload(r#"{"a":1}"#).is_ok());
        assert!(matches!(parse_payload("null"), Err(ParseError::NotAnObject("null"))));
        assert!(matches!(parse_payload("[1]"), Err(ParseError::NotAnObject("array"))));
        assert!(matches!(parse_payload("{not json}"), Err(ParseError::Syntax(_))));
        assert!(matches!(parse_payload(""), Err(ParseError::Syntax(_))));
    }
}
