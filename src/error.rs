use thiserror::Error;

/// Failures of a single acquisition cycle.
#[derive(Debug, Error)]
pub enum MeterError {
    /// Request failed, timed out, answered with an error status or without a body.
    #[error("meter connectivity error: {0}")]
    Connectivity(String),
    /// A body arrived but is not a usable JSON object.
    #[error("meter data format error: {0}")]
    Format(String),
    /// The payload decoded, but a field the detected topology needs is missing.
    #[error("malformed meter reading: missing `{0}`")]
    MalformedReading(&'static str),
}

impl MeterError {
    /// Only transport and decoding problems may be masked by the cached reading.
    pub fn is_recoverable_from_cache(&self) -> bool {
        matches!(self, MeterError::Connectivity(_) | MeterError::Format(_))
    }
}
