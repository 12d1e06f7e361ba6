//! Statistics and metrics

pub mod metrics;

pub use metrics::{ConnectionStats, PlaybackCounters, PlaybackStats, PublishStats};
