//! How far into a log the scanner may read before giving up on a format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte budget for the search of a log's first frame.
///
/// The budget only applies until the first frame is found; a format that
/// matches early is indexed to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseLimit {
    /// Search the whole file.
    None,
    /// Search the first `percent` % of the file.
    Percent { percent: f64 },
    /// Search the first `count × message_size` bytes.
    Messages { count: u32 },
}

impl Default for ParseLimit {
    fn default() -> Self {
        ParseLimit::Percent { percent: 10.0 }
    }
}

impl ParseLimit {
    /// The limits offered by the desktop front end, in display order.
    pub const PRESETS: [ParseLimit; 6] = [
        ParseLimit::None,
        ParseLimit::Percent { percent: 10.0 },
        ParseLimit::Percent { percent: 25.0 },
        ParseLimit::Messages { count: 1 },
        ParseLimit::Messages { count: 5 },
        ParseLimit::Messages { count: 10 },
    ];

    /// Bytes that may be read while no frame has been found.
    ///
    /// `None` means unlimited: either the limit is [`ParseLimit::None`] or a
    /// percentage was requested for a source of unknown length. The budget is
    /// never smaller than one frame.
    pub fn budget(&self, source_len: Option<u64>, message_size: usize) -> Option<u64> {
        let frame = message_size as u64;
        let bytes = match *self {
            ParseLimit::None => return None,
            ParseLimit::Percent { percent } => {
                let len = source_len?;
                if percent >= 100.0 {
                    return None;
                }
                (len as f64 * percent.max(0.0) / 100.0).ceil() as u64
            }
            ParseLimit::Messages { count } => u64::from(count).saturating_mul(frame),
        };
        Some(bytes.max(frame))
    }
}

impl fmt::Display for ParseLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseLimit::None => write!(f, "None"),
            ParseLimit::Percent { percent } => write!(f, "{}%", percent),
            ParseLimit::Messages { count: 1 } => write!(f, "1 Message"),
            ParseLimit::Messages { count } => write!(f, "{} Messages", count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_budget_rounds_up() {
        let limit = ParseLimit::Percent { percent: 10.0 };
        assert_eq!(limit.budget(Some(1000), 16), Some(100));
        assert_eq!(limit.budget(Some(1001), 16), Some(101));
        assert_eq!(limit.budget(Some(50), 16), Some(16));
        assert_eq!(limit.budget(None, 16), None);
        assert_eq!(ParseLimit::Percent { percent: 100.0 }.budget(Some(10), 4), None);
    }

    #[test]
    fn message_budget_is_whole_frames() {
        assert_eq!(ParseLimit::Messages { count: 5 }.budget(Some(1 << 20), 64), Some(320));
        assert_eq!(ParseLimit::Messages { count: 0 }.budget(None, 64), Some(64));
        assert_eq!(ParseLimit::None.budget(Some(10), 64), None);
    }

    #[test]
    fn presets_display_like_the_front_end() {
        let labels: Vec<String> = ParseLimit::PRESETS.iter().map(|l| l.to_string()).collect();
        assert_eq!(labels, ["None", "10%", "25%", "1 Message", "5 Messages", "10 Messages"]);
    }

    #[test]
    fn deserializes_tagged_yaml() {
        let limit: ParseLimit = serde_yaml_ng::from_str("kind: messages\ncount: 5\n").unwrap();
        assert_eq!(limit, ParseLimit::Messages { count: 5 });
        let limit: ParseLimit = serde_yaml_ng::from_str("kind: none\n").unwrap();
        assert_eq!(limit, ParseLimit::None);
    }
}
