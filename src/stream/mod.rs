//! Per-log playback state.
//!
//! Each registered log becomes a [`StreamState`] that moves through the
//! following status machine:
//!
//! ```text
//! Unparsed -> Parsing -> Found -> Playing -> Finished
//!                     \-> NotFound
//!                     \-> Skipped
//! (any) -> Unparsed on reset
//! ```

mod state;

pub use state::{StreamSnapshot, StreamState};

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ReplayError, Result};

/// Default destination of a new registration.
pub const DEFAULT_DESTINATION_IP: &str = "127.0.0.1";
pub const DEFAULT_DESTINATION_PORT: u16 = 5000;

/// Opaque handle for a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub usize);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a stream is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Unparsed,
    Parsing,
    Found,
    NotFound,
    Skipped,
    Playing,
    Finished,
}

impl StreamStatus {
    /// Whether a format and frame index are bound.
    pub fn is_matched(self) -> bool {
        matches!(self, StreamStatus::Found | StreamStatus::Playing | StreamStatus::Finished)
    }

    /// Short text for a status column.
    pub fn label(self) -> &'static str {
        match self {
            StreamStatus::Unparsed => "Not Parsed",
            StreamStatus::Parsing => "Parsing",
            StreamStatus::Found => "Parsed",
            StreamStatus::NotFound => "Not Found",
            StreamStatus::Skipped => "Skipped",
            StreamStatus::Playing => "Playing",
            StreamStatus::Finished => "Finished",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A log to replay and where to send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistration {
    /// Log file; `None` registers a placeholder that is skipped on load.
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_ip")]
    pub destination_ip: String,
    #[serde(default = "default_port")]
    pub destination_port: u16,
}

fn default_ip() -> String {
    DEFAULT_DESTINATION_IP.to_string()
}

fn default_port() -> u16 {
    DEFAULT_DESTINATION_PORT
}

impl Default for StreamRegistration {
    fn default() -> Self {
        Self { file_path: None, destination_ip: default_ip(), destination_port: default_port() }
    }
}

impl StreamRegistration {
    pub fn new(file_path: impl Into<PathBuf>, destination_ip: impl Into<String>, destination_port: u16) -> Self {
        Self {
            file_path: Some(file_path.into()),
            destination_ip: destination_ip.into(),
            destination_port,
        }
    }

    /// Registration sending to `destination`.
    pub fn to_addr(file_path: impl Into<PathBuf>, destination: SocketAddr) -> Self {
        Self::new(file_path, destination.ip().to_string(), destination.port())
    }

    /// Parse and validate the destination.
    ///
    /// # Errors
    ///
    /// [`ReplayError::InvalidAddress`] for an unparsable IP or port 0.
    pub fn destination(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .destination_ip
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| ReplayError::InvalidAddress { value: self.destination_ip.clone() })?;
        if self.destination_port == 0 {
            return Err(ReplayError::InvalidAddress {
                value: format!("{}:{}", self.destination_ip, self.destination_port),
            });
        }
        Ok(SocketAddr::new(ip, self.destination_port))
    }
}
