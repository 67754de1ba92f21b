//! Runtime identifier type.
//!
//! A RuntimeId names a language/execution environment such as `node20`,
//! `python311` or `go121`. Unlike the TypeID-based identifiers, runtime IDs
//! are chosen by operators, so they are validated plain strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a runtime identifier.
const MAX_LEN: usize = 32;

/// A validated runtime identifier.
///
/// Must be 1-32 characters of lowercase ASCII letters, digits, `.`, `-` or
/// `_`, starting with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeId(String);

/// Error returned when a runtime identifier is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidRuntimeId {
    /// The identifier was empty
    Empty,
    /// The identifier exceeded the maximum length
    TooLong {
        /// The length that was provided
        len: usize,
    },
    /// The identifier contained a disallowed character
    InvalidCharacter {
        /// The offending character
        character: char,
    },
    /// The identifier did not start with a letter
    MustStartWithLetter,
}

impl fmt::Display for InvalidRuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "runtime ID cannot be empty"),
            Self::TooLong { len } => {
                write!(f, "runtime ID is {len} characters; at most {MAX_LEN} allowed")
            }
            Self::InvalidCharacter { character } => write!(
                f,
                "runtime ID contains '{character}'; use lowercase letters, digits, '.', '-' or '_'"
            ),
            Self::MustStartWithLetter => write!(f, "runtime ID must start with a letter"),
        }
    }
}

impl std::error::Error for InvalidRuntimeId {}

impl RuntimeId {
    /// Parses and validates a runtime identifier.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidRuntimeId` describing the first violation found.
    pub fn parse(s: &str) -> Result<Self, InvalidRuntimeId> {
        if s.is_empty() {
            return Err(InvalidRuntimeId::Empty);
        }
        if s.len() > MAX_LEN {
            return Err(InvalidRuntimeId::TooLong { len: s.len() });
        }
        let allowed = |c: &char| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(*c);
        if let Some(character) = s.chars().find(|c| !allowed(c)) {
            return Err(InvalidRuntimeId::InvalidCharacter { character });
        }
        if !s.starts_with(|c: char| c.is_ascii_lowercase()) {
            return Err(InvalidRuntimeId::MustStartWithLetter);
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RuntimeId {
    type Err = InvalidRuntimeId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RuntimeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RuntimeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RuntimeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
