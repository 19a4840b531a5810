//! Error types for scanning and replay.
//!
//! All fallible operations in the crate return [`ReplayError`]. Errors carry
//! structured context (paths, format names, byte budgets) so that the UI
//! collaborator can turn them into per-log notifications.
//!
//! ## Error Categories
//!
//! - **File Errors**: a log file could not be opened, read or copied
//! - **Format Errors**: a message format record violates its invariants
//! - **Scan Errors**: no frame (or too few frames) found for a format
//! - **Session Errors**: control calls in the wrong state, empty loads
//! - **Transport Errors**: the datagram socket could not be acquired
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use framecast::ReplayError;
//!
//! let error = ReplayError::transport_failed("address in use");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionStatus;
use crate::stream::StreamId;

/// Result type alias for replay operations.
pub type Result<T, E = ReplayError> = std::result::Result<T, E>;

/// Main error type for replay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReplayError {
    #[error("Log file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid message format '{name}': {reason}")]
    InvalidFormat { name: String, reason: String },

    #[error("Duplicate message format '{name}'")]
    DuplicateFormat { name: String },

    #[error("No '{format}' frame found within the first {budget} bytes")]
    NoFrameFound { format: String, budget: u64 },

    #[error("Format '{format}' matched only {found} frame(s); at least 2 are required")]
    InsufficientFrames { format: String, found: usize },

    #[error("No registered log matched any message format")]
    NoStreamsLoaded,

    #[error("Stream limit of {limit} reached")]
    StreamLimit { limit: usize },

    #[error("Unknown stream {id}")]
    UnknownStream { id: StreamId },

    #[error("Invalid destination address '{value}'")]
    InvalidAddress { value: String },

    #[error("Cannot {operation} while session is {status}")]
    InvalidState { operation: &'static str, status: SessionStatus },

    #[error("Invalid playback speed {speed}")]
    InvalidSpeed { speed: f64 },

    #[error("Transport unavailable: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Replay task failed: {reason}")]
    Task { reason: String },
}

impl ReplayError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplayError::Transport { .. } => true,
            ReplayError::File { .. } => true,
            ReplayError::InvalidState { .. } => true,
            ReplayError::Task { .. } => true,
            ReplayError::InvalidFormat { .. } => false,
            ReplayError::DuplicateFormat { .. } => false,
            ReplayError::NoFrameFound { .. } => false,
            ReplayError::InsufficientFrames { .. } => false,
            ReplayError::NoStreamsLoaded => false,
            ReplayError::StreamLimit { .. } => false,
            ReplayError::UnknownStream { .. } => false,
            ReplayError::InvalidAddress { .. } => false,
            ReplayError::InvalidSpeed { .. } => false,
            ReplayError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ReplayError::File { .. } => vec![
                "Check the log file exists and is readable",
                "Make sure no other process holds an exclusive lock",
                "Enable private working copies in the replay settings",
            ],
            ReplayError::InvalidFormat { .. } => vec![
                "Sync bytes 1 and 2 and end byte 1 must be non-zero",
                "Message size must exceed timestamp offset plus timestamp size",
                "Timestamp scaling must be a finite, non-zero number",
            ],
            ReplayError::DuplicateFormat { .. } => {
                vec!["Remove or rename the repeated message format"]
            }
            ReplayError::NoFrameFound { .. } => vec![
                "Raise or disable the parse limit",
                "Verify the sync and end bytes of the message format",
            ],
            ReplayError::InsufficientFrames { .. } => vec![
                "Verify the message size of the format",
                "Check the log contains more than one frame",
            ],
            ReplayError::NoStreamsLoaded => vec![
                "Select a file for at least one log",
                "Add a message format that matches the logs",
                "Raise or disable the parse limit",
            ],
            ReplayError::StreamLimit { .. } => vec![
                "Remove an existing log before adding another",
                "Raise the stream limit in the replay settings",
            ],
            ReplayError::UnknownStream { .. } => vec!["Use an id returned by register"],
            ReplayError::InvalidAddress { .. } => vec![
                "Use a dotted IPv4 or bracketed IPv6 address",
                "Ports must be in 1..=65535",
            ],
            ReplayError::InvalidState { .. } => vec![
                "Load the session before playing",
                "Stop the session before resetting or editing logs",
            ],
            ReplayError::InvalidSpeed { .. } => vec!["Use a finite speed greater than zero"],
            ReplayError::Transport { .. } => vec![
                "Check the local bind address is free",
                "Verify network permissions for broadcast sockets",
            ],
            ReplayError::Config { .. } => vec![
                "Check the YAML syntax of the configuration",
                "Compare field names against the documented schema",
            ],
            ReplayError::Task { .. } => vec!["Restart the replay session"],
        }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReplayError::File { path: path.into(), source }
    }

    /// Helper constructor for invalid message formats.
    pub fn invalid_format(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ReplayError::InvalidFormat { name: name.into(), reason: reason.into() }
    }

    /// Helper constructor for transport failures without an I/O source.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        ReplayError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport failures caused by an I/O error.
    pub fn transport_io(reason: impl Into<String>, source: std::io::Error) -> Self {
        ReplayError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        ReplayError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for state machine violations.
    pub fn invalid_state(operation: &'static str, status: SessionStatus) -> Self {
        ReplayError::InvalidState { operation, status }
    }

    /// Whether this error only means "this format does not fit this log".
    ///
    /// The configuration matcher moves on to the next candidate for these.
    pub fn is_non_match(&self) -> bool {
        matches!(self, ReplayError::NoFrameFound { .. } | ReplayError::InsufficientFrames { .. })
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        ReplayError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_yaml_ng::Error> for ReplayError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        let context = match err.location() {
            Some(location) => format!("YAML line {} column {}", location.line(), location.column()),
            None => "YAML document".to_string(),
        };
        ReplayError::Config { context, details: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_carry_their_context(
                name in "\\w+",
                reason in "[a-z ]{1,40}",
                budget in 0u64..1_000_000u64,
                found in 0usize..2usize,
            ) {
                let invalid = ReplayError::invalid_format(name.clone(), reason.clone());
                let no_frame = ReplayError::NoFrameFound { format: name.clone(), budget };
                let too_few = ReplayError::InsufficientFrames { format: name.clone(), found };

                let invalid_msg = invalid.to_string();
                prop_assert!(invalid_msg.contains(&name));
                prop_assert!(invalid_msg.contains(&reason));

                let no_frame_msg = no_frame.to_string();
                prop_assert!(no_frame_msg.contains(&budget.to_string()));

                let too_few_msg = too_few.to_string();
                prop_assert!(too_few_msg.contains(&found.to_string()));

                prop_assert!(no_frame.is_non_match());
                prop_assert!(too_few.is_non_match());
                prop_assert!(!invalid.is_non_match());
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<ReplayError>();

        let error = ReplayError::transport_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn recovery_methods_work() {
        let transport = ReplayError::transport_failed("bind failed");
        let format = ReplayError::invalid_format("nav", "sync byte 1 is zero");
        let empty = ReplayError::NoStreamsLoaded;

        assert!(transport.is_retryable());
        assert!(!format.is_retryable());
        assert!(!empty.is_retryable());

        for error in [&transport, &format, &empty] {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn io_errors_keep_their_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing log");
        let error: ReplayError = io_err.into();

        match &error {
            ReplayError::File { source, .. } => assert_eq!(source.to_string(), "missing log"),
            other => panic!("Expected File error, got {other:?}"),
        }
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn yaml_errors_become_config_errors() {
        let err = serde_yaml_ng::from_str::<Vec<u32>>("[1, two]").unwrap_err();
        let error: ReplayError = err.into();
        assert!(matches!(error, ReplayError::Config { .. }));
    }
}
