//! Presentation clock, frame scheduling and publish pacing

pub mod clock;
pub mod synchronizer;

pub use clock::{ClockSource, MediaClock, PresentationClock};
pub use synchronizer::{Pacer, SyncDecision, Synchronizer, Thresholds, Verdict};
