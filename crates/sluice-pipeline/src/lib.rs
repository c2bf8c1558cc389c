//! Ordered-stage message pipeline sitting between a chat transport and the
//! message-handling agent.
//!
//! A [`Connector`] assembles an immutable [`Chain`] of [`Stage`]s on first
//! use and runs every message through it, ending at a terminal [`Sink`].
//! The one stateful stage shipped here is [`CoalesceStage`], which batches
//! rapid-fire messages per sender within a rolling quiet window and forwards
//! a single merged message per batch.

pub mod chain;
pub mod coalesce;
pub mod connector;
pub mod error;
pub mod stage;
pub mod timer;

pub use chain::{Chain, Next, Sink};
pub use coalesce::{AppendOutcome, CoalesceStage};
pub use connector::{CanonicalFactory, Connector, MessageFactory};
pub use error::PipelineError;
pub use stage::Stage;
pub use timer::Timer;
