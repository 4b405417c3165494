//! Caller-facing error kinds for queue mutation operations.
//!
//! Internal IO/serialization failures use `anyhow::Result`; anything a
//! caller is expected to match on is one of these documented kinds instead
//! of an opaque `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is shutting down")]
    ShuttingDown,
    #[error("item is missing an id or vector")]
    InvalidItem,
    #[error("vector must be a non-empty sequence of numbers")]
    InvalidVectorFormat,
    #[error("vector contains a non-finite value")]
    InvalidVectorValues,
    #[error("queue is at capacity")]
    QueueOverflow,
}

impl QueueError {
    /// Stable machine-readable reason string for the `{success:false,
    /// reason:"..."}` wire shape.
    pub fn reason(&self) -> &'static str {
        match self {
            QueueError::ShuttingDown => "shutting_down",
            QueueError::InvalidItem => "invalid_item",
            QueueError::InvalidVectorFormat => "invalid_vector_format",
            QueueError::InvalidVectorValues => "invalid_vector_values",
            QueueError::QueueOverflow => "queue_overflow",
        }
    }
}
