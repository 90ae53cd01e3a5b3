//! Child process plumbing for container sessions

pub mod streaming;

pub use streaming::{SessionOutcome, SessionRunner, StreamOutputDemux};
