//! Locating frames in raw log bytes.
//!
//! [`FrameScanner`] builds a [`FrameIndex`](crate::FrameIndex) for one log and
//! one format. [`ConfigurationMatcher`] tries an ordered list of formats
//! against a stream's log until one of them yields a usable index.

pub mod limit;
pub mod matcher;
pub mod scanner;

pub use limit::ParseLimit;
pub use matcher::{ConfigurationMatcher, MatchOutcome};
pub use scanner::{DEFAULT_CHUNK_SIZE, FrameScanner};
