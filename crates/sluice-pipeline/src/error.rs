use sluice_core::{CoreError, Direction};
use thiserror::Error;

/// Errors that can surface from chain processing.
///
/// Note that a batch handler refusing an append is *not* an error — see
/// [`AppendOutcome`](crate::coalesce::AppendOutcome). The coalescer recovers
/// from that locally and the caller never observes it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Chain built for {built:?} traffic cannot process {requested:?} traffic")]
    DirectionMismatch {
        built: Direction,
        requested: Direction,
    },

    /// The terminal sink rejected a delivery. Propagated to the caller of
    /// `handle`; retry policy belongs to the transport/sink collaborator.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Config(reason) => PipelineError::Config(reason),
            CoreError::MissingField { field } => PipelineError::MissingField { field },
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
