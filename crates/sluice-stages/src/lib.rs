//! Pure transformation stages that plug into a sluice chain.
//!
//! Unlike the coalescer these carry no timers and no per-sender state
//! machine — they rewrite a message and forward it.

pub mod engine;
pub mod normalize;
pub mod translate;

pub use engine::{ApertiumEngine, TranslationEngine};
pub use normalize::NormalizeStage;
pub use translate::{LanguageMap, TranslateStage};
