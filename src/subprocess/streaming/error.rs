use std::fmt;

/// A payload between a valid marker pair that could not be turned into an event
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid JSON payload: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
}

/// One delivery callback that did not complete successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub sequence: u64,
    pub message: String,
    pub panicked: bool,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.panicked {
            write!(f, "event #{} delivery panicked: {}", self.sequence, self.message)
        } else {
            write!(f, "event #{} delivery failed: {}", self.sequence, self.message)
        }
    }
}

/// Failures observed by the delivery queue, reported through `settled()`
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{} delivery callback(s) failed; first: {}", .failures.len(), first_failure(.failures))]
    Failed { failures: Vec<DeliveryFailure> },

    #[error("delivery worker stopped before the queue settled")]
    WorkerGone,
}

fn first_failure(failures: &[DeliveryFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl DeliveryError {
    pub fn failures(&self) -> &[DeliveryFailure] {
        match self {
            Self::Failed { failures } => failures,
            Self::WorkerGone => &[],
        }
    }
}
