//! Matching logs against candidate message formats.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{FrameScanner, ParseLimit};
use crate::ReplayError;
use crate::format::MessageFormat;
use crate::stream::StreamState;

/// Notification for a stream registered without a file.
pub const NO_FILE_SELECTED: &str = "No file selected";

/// Notification for a log no candidate format matched.
pub const NO_MATCHING_FORMAT: &str = "No matching configuration found within the parse limit";

/// What [`ConfigurationMatcher::match_stream`] did to a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// A format matched and its index is now bound to the stream.
    Matched { format: String, frames: usize },
    /// The stream was already matched; nothing was scanned.
    AlreadyMatched,
    /// No candidate format produced a usable index.
    NotFound,
    /// The stream has no file.
    Skipped,
}

impl MatchOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. } | MatchOutcome::AlreadyMatched)
    }
}

/// Tries candidate formats in order until one indexes the stream's log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigurationMatcher {
    scanner: FrameScanner,
}

impl ConfigurationMatcher {
    pub fn new(limit: ParseLimit) -> Self {
        Self { scanner: FrameScanner::new(limit) }
    }

    pub fn with_scanner(scanner: FrameScanner) -> Self {
        Self { scanner }
    }

    /// Bind the first matching format to `stream`.
    ///
    /// Parse failures never escape: they end up as the stream's status and
    /// notification.
    pub fn match_stream(&self, stream: &mut StreamState, candidates: &[Arc<MessageFormat>]) -> MatchOutcome {
        if stream.is_matched() {
            debug!("Stream {} already matched, skipping scan", stream.id());
            return MatchOutcome::AlreadyMatched;
        }

        stream.begin_parsing();

        let Some(path) = stream.path().map(|p| p.to_path_buf()) else {
            debug!("Stream {} has no file", stream.id());
            stream.mark_skipped(NO_FILE_SELECTED);
            return MatchOutcome::Skipped;
        };

        let mut io_failure = None;
        for format in candidates {
            match self.scanner.scan_file(&path, format) {
                Ok(index) => {
                    let frames = index.len();
                    info!(
                        "Stream {} matched '{}' with {} frames ({})",
                        stream.id(),
                        format.name(),
                        frames,
                        path.display()
                    );
                    stream.bind(Arc::clone(format), Arc::new(index));
                    return MatchOutcome::Matched { format: format.name().to_string(), frames };
                }
                Err(e) if e.is_non_match() => {
                    debug!("Stream {}: {}", stream.id(), e);
                }
                Err(e) => {
                    warn!("Stream {}: failed to scan {} with '{}': {}", stream.id(), path.display(), format.name(), e);
                    io_failure = Some(e);
                }
            }
        }

        let notification = match io_failure {
            Some(ReplayError::File { source, .. }) => source.to_string(),
            Some(other) => other.to_string(),
            None => NO_MATCHING_FORMAT.to_string(),
        };
        stream.mark_not_found(notification);
        MatchOutcome::NotFound
    }
}
