//! Session settings.
//!
//! Settings are plain data handed to [`ReplaySession`](crate::ReplaySession)
//! at construction. They can be built in code or loaded from YAML:
//!
//! ```yaml
//! parse_limit:
//!   kind: messages
//!   count: 10
//! speed: 1.5x
//! concurrent: false
//! max_streams: 5
//! tick_interval_micros: 1000
//! private_copies: true
//! bind_address: 0.0.0.0:0
//! broadcast: true
//! ```

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::scan::ParseLimit;
use crate::transport::UdpConnector;
use crate::{ReplayError, Result};

/// Upper bound (exclusive) on the scheduler tick.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Replay speed multiplier, `1.0` being real time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PlaybackSpeed(f64);

impl PlaybackSpeed {
    pub const REAL_TIME: PlaybackSpeed = PlaybackSpeed(1.0);

    /// Speeds offered by the desktop front end.
    pub const PRESETS: [PlaybackSpeed; 7] = [
        PlaybackSpeed(0.25),
        PlaybackSpeed(0.5),
        PlaybackSpeed(1.0),
        PlaybackSpeed(1.5),
        PlaybackSpeed(2.0),
        PlaybackSpeed(3.0),
        PlaybackSpeed(5.0),
    ];

    /// # Errors
    ///
    /// [`ReplayError::InvalidSpeed`] unless `multiplier` is finite and positive.
    pub fn new(multiplier: f64) -> Result<Self> {
        if multiplier.is_finite() && multiplier > 0.0 {
            Ok(Self(multiplier))
        } else {
            Err(ReplayError::InvalidSpeed { speed: multiplier })
        }
    }

    pub fn multiplier(self) -> f64 {
        self.0
    }
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        Self::REAL_TIME
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

impl FromStr for PlaybackSpeed {
    type Err = ReplayError;

    /// Accepts `"2"`, `"2x"` and `"0.25X"`.
    fn from_str(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let number = trimmed.strip_suffix(['x', 'X']).unwrap_or(trimmed).trim();
        let multiplier: f64 = number
            .parse()
            .map_err(|_| ReplayError::config("playback speed", format!("cannot parse '{}'", text)))?;
        Self::new(multiplier)
    }
}

impl Serialize for PlaybackSpeed {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlaybackSpeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(multiplier) => PlaybackSpeed::new(multiplier),
            Repr::Text(text) => text.parse(),
        }
        .map_err(serde::de::Error::custom)
    }
}

/// Everything a session needs besides its formats and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Budget for finding the first frame of each candidate format.
    pub parse_limit: ParseLimit,
    pub speed: PlaybackSpeed,
    /// Replay every stream on its own timeline instead of a shared one.
    pub concurrent: bool,
    /// Maximum number of registered streams.
    pub max_streams: usize,
    /// Scheduler tick, in microseconds. Must be below 10 ms.
    pub tick_interval_micros: u64,
    /// Replay from copies in a temporary directory instead of the originals,
    /// leaving the originals free to be moved or deleted during playback.
    /// Copies are made when a replay starts; turn this off for very large
    /// logs that stay put.
    pub private_copies: bool,
    pub bind_address: SocketAddr,
    pub broadcast: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            parse_limit: ParseLimit::default(),
            speed: PlaybackSpeed::default(),
            concurrent: false,
            max_streams: 5,
            tick_interval_micros: 1_000,
            private_copies: true,
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            broadcast: true,
        }
    }
}

impl ReplaySettings {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml_ng::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ReplayError::file_error(path, e))?;
        Self::from_yaml_str(&text)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.max_streams == 0 {
            return Err(ReplayError::config("max_streams", "must be at least 1"));
        }
        let tick = self.tick_interval();
        if tick.is_zero() || tick >= MAX_TICK_INTERVAL {
            return Err(ReplayError::config(
                "tick_interval_micros",
                format!("{} is outside 1..{}", self.tick_interval_micros, MAX_TICK_INTERVAL.as_micros()),
            ));
        }
        if let ParseLimit::Percent { percent } = self.parse_limit {
            if !(percent.is_finite() && percent > 0.0) {
                return Err(ReplayError::config("parse_limit", format!("invalid percentage {}", percent)));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_micros)
    }

    /// UDP connector configured from these settings.
    pub fn udp_connector(&self) -> UdpConnector {
        UdpConnector::new(self.bind_address).with_broadcast(self.broadcast)
    }
}
