//! Time-accurate UDP replay of fixed-size binary telemetry logs.
//!
//! Framecast takes raw logs recorded from a telemetry link, finds which
//! message format each log was written in, indexes every frame with its
//! embedded timestamp and sends the frames back out as UDP datagrams with
//! their original timing, scaled by a playback speed.
//!
//! # Features
//!
//! - **Format detection**: each log is matched against a catalog of message
//!   formats within a configurable scan budget
//! - **Synchronized or concurrent playback**: one shared timeline across all
//!   logs, or every log from its own first frame
//! - **Live control**: pause, resume, seek and speed changes while running
//! - **Progress stream**: sampled snapshots for a UI to render
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use framecast::{FormatCatalog, ReplaySession, ReplaySettings, StreamRegistration};
//!
//! #[tokio::main]
//! async fn main() -> framecast::Result<()> {
//!     let catalog = FormatCatalog::from_yaml_str(
//!         r#"
//! formats:
//!   - name: nav
//!     sync_bytes: ["0xAA", "0x55"]
//!     end_bytes: ["0x0D", "0x0A"]
//!     message_size: 64
//!     timestamp_byte_offset: 4
//!     timestamp_size: 8
//!     timestamp_scaling: "10^6"
//! "#,
//!     )?;
//!
//!     let mut session = ReplaySession::new(ReplaySettings::default(), catalog)?;
//!     session.register(StreamRegistration::new("flight.bin", "127.0.0.1", 5000))?;
//!     session.load()?;
//!     session.play().await?;
//!     session.wait().await
//! }
//! ```

pub mod clock;
mod error;
pub mod format;
pub mod index;
pub mod progress;
pub mod scan;
pub mod session;
pub mod settings;
pub mod stream;
pub mod transport;

#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

pub use error::*;

pub use format::{ByteOrder, FormatCatalog, MessageFormat, MessageFormatRecord};
pub use index::{FrameIndex, FrameIndexEntry};
pub use progress::{ReplayProgress, SampleExt};
pub use scan::{ConfigurationMatcher, FrameScanner, MatchOutcome, ParseLimit};
pub use session::{LoadReport, ReplaySession, SessionStatus};
pub use settings::{PlaybackSpeed, ReplaySettings};
pub use stream::{StreamId, StreamRegistration, StreamSnapshot, StreamState, StreamStatus};
pub use transport::{Connector, Transport, UdpConnector, UdpTransport};
