//! Sentinel markers that delimit structured payloads in container output

use std::fmt;

/// Default start marker emitted by the agent runner inside the container
pub const OUTPUT_START_MARKER: &str = "---NANOCLAW_OUTPUT_START---";

/// Default end marker emitted by the agent runner inside the container
pub const OUTPUT_END_MARKER: &str = "---NANOCLAW_OUTPUT_END---";

/// A pair of literal strings wrapping one JSON payload in the output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelMarkers {
    start: String,
    end: String,
}

impl SentinelMarkers {
    /// Create a marker pair from explicit strings
    ///
    /// Returns `None` when either marker is empty or both are identical, since
    /// neither can delimit a payload.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Option<Self> {
        let start = start.into();
        let end = end.into();
        if start.is_empty() || end.is_empty() || start == end {
            return None;
        }
        Some(Self { start, end })
    }

    /// Per-run markers derived from a nonce
    ///
    /// A container that does not know the nonce cannot forge a payload boundary,
    /// so text echoed from untrusted tool output cannot be mistaken for a result.
    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            start: format!("---NANOCLAW_OUTPUT_{nonce}_START---"),
            end: format!("---NANOCLAW_OUTPUT_{nonce}_END---"),
        }
    }

    /// Per-run markers with a freshly generated nonce
    pub fn random() -> (String, Self) {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let markers = Self::with_nonce(&nonce);
        (nonce, markers)
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Wrap a payload the way the agent runner does
    pub fn wrap(&self, payload: &str) -> String {
        format!("{}\n{}\n{}\n", self.start, payload, self.end)
    }
}

impl Default for SentinelMarkers {
    fn default() -> Self {
        Self {
            start: OUTPUT_START_MARKER.to_string(),
            end: OUTPUT_END_MARKER.to_string(),
        }
    }
}

impl fmt::Display for SentinelMarkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_markers() {
        let markers = SentinelMarkers::default();
        assert_eq!(markers.start(), "---NANOCLAW_OUTPUT_START---");
        assert_eq!(markers.end(), "---NANOCLAW_OUTPUT_END---");
    }

    #[test]
    fn test_nonce_markers() {
        let markers = SentinelMarkers::with_nonce("abc123");
        assert_eq!(markers.start(), "---NANOCLAW_OUTPUT_abc123_START---");
        assert_eq!(markers.end(), "---NANOCLAW_OUTPUT_abc123_END---");
    }

    #[test]
    fn test_random_markers_are_unique() {
        let (nonce_a, a) = SentinelMarkers::random();
        let (nonce_b, b) = SentinelMarkers::random();
        assert_ne!(nonce_a, nonce_b);
        assert_ne!(a, b);
        assert!(a.start().contains(&nonce_a));
    }

    #[test]
    fn test_rejects_degenerate_markers() {
        assert!(SentinelMarkers::new("", "END").is_none());
        assert!(SentinelMarkers::new("START", "").is_none());
        assert!(SentinelMarkers::new("SAME", "SAME").is_none());
        assert!(SentinelMarkers::new("<<", ">>").is_some());
    }
}
