//! Perceptual-hash deduplication for image corpora collected from social
//! media posts.
//!
//! Files follow `<prefix><groupId>_<postId>_<imageIndex>.<ext>`. A run removes
//! near-duplicates inside each post, removes known advertisement images, then
//! clusters posts that share near-duplicate images and moves every post but
//! one per cluster into a quarantine directory. All state needed to resume an
//! interrupted run lives in a state directory next to the corpus.

pub mod config;
pub mod core;
pub mod error;
pub mod services;

pub use config::PipelineConfig;
pub use error::DedupError;
pub use services::{Checkpoints, DedupEngine, InterruptCoordinator, RunStage, RunSummary};
