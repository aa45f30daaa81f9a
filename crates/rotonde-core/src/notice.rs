//! Who hears about definition changes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audience for `def` / `undef` notices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeScope {
    /// Every open connection except the sender.
    #[default]
    All,
    /// Only connections subscribed to the identifier, except the sender.
    Subscribers,
}

impl NoticeScope {
    /// Lowercase name used in settings and env vars.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Subscribers => "subscribers",
        }
    }
}

impl fmt::Display for NoticeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no [`NoticeScope`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown notice scope {0:?}, expected \"all\" or \"subscribers\"")]
pub struct ParseNoticeScopeError(pub String);

impl FromStr for NoticeScope {
    type Err = ParseNoticeScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "subscribers" => Ok(Self::Subscribers),
            other => Err(ParseNoticeScopeError(other.to_owned())),
        }
    }
}
