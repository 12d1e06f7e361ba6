//! Playback sessions
//!
//! A [`PlaybackSession`] binds one source to the stage threads that play
//! it. See [`pipeline`] for how the stages are wired.

pub(crate) mod pipeline;
pub mod session;

pub use pipeline::{PlaybackEvent, ResourceCounter, SessionOutcome};
pub use session::PlaybackSession;
