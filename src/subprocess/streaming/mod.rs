//! Real-time structured output recovery for container sessions
//!
//! A container's stdout mixes free-form log text with JSON result payloads
//! wrapped in sentinel markers. This module extracts those payloads as the
//! bytes arrive, delivers them to a consumer strictly in order, and drives a
//! container process end to end.

pub mod decoder;
pub mod delivery;
pub mod demux;
pub mod error;
pub mod handler;
pub mod legacy;
pub mod markers;
pub mod runner;
pub mod types;


pub use decoder::Utf8ChunkDecoder;
pub use delivery::DeliveryQueue;
pub use demux::StreamOutputDemux;
pub use error::{DeliveryError, DeliveryFailure, ParseError};
pub use handler::{ChannelOutputHandler, FnOutputHandler, OutputHandler};
pub use legacy::parse_buffered_output;
pub use markers::{SentinelMarkers, OUTPUT_END_MARKER, OUTPUT_START_MARKER};
pub use runner::{CapturedOutput, SessionOutcome, SessionRunner};
pub use types::{ContainerOutputEvent, OutputStatus, SessionLimits, NEW_SESSION_ID_FIELD};
