pub mod config;
pub mod error;
pub mod message;

pub use config::{PipelineConfig, SluiceConfig};
pub use error::CoreError;
pub use message::{Button, Direction, Message, OutboundMessage, RawEvent};
