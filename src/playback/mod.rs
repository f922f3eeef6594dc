//! Gapless playback scheduling

pub mod driver;
pub mod scheduler;
pub mod stats;

pub use driver::PlaybackDriver;
pub use scheduler::{CompletionOutcome, PlaybackScheduler};
pub use stats::{PlaybackSnapshot, PlaybackStats, SchedulerState};
