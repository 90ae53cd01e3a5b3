//! Result extraction from fully buffered output
//!
//! Agent runners that predate streaming print a single result after all of
//! their log output. The first ordered marker pair wins; without one, the last
//! non-empty line is taken as the payload.

use super::demux::parse_payload;
use super::error::ParseError;
use super::markers::SentinelMarkers;
use super::types::ContainerOutputEvent;

pub fn parse_buffered_output(
    stdout: &str,
    markers: &SentinelMarkers,
) -> Result<ContainerOutputEvent, ParseError> {
    let start = stdout.find(markers.start());
    let end = stdout.find(markers.end());

    let payload = match (start, end) {
        (Some(s), Some(e)) if e >= s + markers.start().len() => {
            stdout[s + markers.start().len()..e].trim()
        }
        _ => stdout.trim().lines().last().unwrap_or_default(),
    };

    parse_payload(payload).map(|map| ContainerOutputEvent::new(0, map))
}
