//! Serializable identifiers shared across the scheduler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable identity of an allocation consumer (validator hotkey or similar).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(pub String);

impl ConsumerId {
    /// Create an identity from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConsumerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Window identifier: the block height at which the window starts.
pub type WindowKey = u64;

/// Lookup key for persisted schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKey {
    /// Whatever schedule the current pointer references.
    Current,
    /// The schedule computed for the window starting at this height.
    Window(WindowKey),
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Window(start) => write!(f, "{start}"),
        }
    }
}

impl FromStr for ScheduleKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("current") {
            return Ok(Self::Current);
        }
        trimmed
            .parse::<WindowKey>()
            .map(Self::Window)
            .map_err(|e| format!("invalid schedule key `{trimmed}`: {e}"))
    }
}
