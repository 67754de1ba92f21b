//! Invocation identifier type using TypeID format.
//!
//! Format: `inv_01h455vb4pex5vsknk084sn02q`

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A validated invocation identifier.
///
/// Async callers receive this immediately and use it to re-fetch the
/// invocation record from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InvocationId(MagicTypeId);

/// Error returned when attempting to parse an invalid invocation ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidInvocationId {
    /// TypeID parsing failed
    Parse(String),
    /// Wrong prefix (expected "inv")
    WrongPrefix {
        /// The expected prefix
        expected: &'static str,
        /// The actual prefix found
        actual: String,
    },
}

impl fmt::Display for InvalidInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid invocation ID: {e}"),
            Self::WrongPrefix { expected, actual } => {
                write!(f, "expected prefix '{expected}', got '{actual}'")
            }
        }
    }
}

impl std::error::Error for InvalidInvocationId {}

impl InvocationId {
    /// The TypeID prefix for invocation identifiers.
    pub const PREFIX: &'static str = "inv";

    /// Creates a new invocation ID with a fresh UUIDv7.
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Parses an invocation ID from a string, validating the prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInvocationId::Parse` if the string is not a valid TypeID.
    /// Returns `InvalidInvocationId::WrongPrefix` if the TypeID has a different prefix.
    pub fn parse(s: &str) -> Result<Self, InvalidInvocationId> {
        let id =
            MagicTypeId::from_str(s).map_err(|e| InvalidInvocationId::Parse(e.to_string()))?;

        let prefix = id.prefix().as_str();
        if prefix != Self::PREFIX {
            return Err(InvalidInvocationId::WrongPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Returns a reference to the underlying MagicTypeId.
    #[must_use]
    pub fn inner(&self) -> &MagicTypeId {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InvocationId {
    type Err = InvalidInvocationId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for InvocationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InvocationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionId;

    #[test]
    fn new_creates_prefixed_id() {
        assert!(InvocationId::new().to_string().starts_with("inv_"));
    }

    #[test]
    fn parse_rejects_function_id() {
        let result = InvocationId::parse(&FunctionId::new().to_string());
        assert!(matches!(
            result,
            Err(InvalidInvocationId::WrongPrefix { expected: "inv", .. })
        ));
    }

    #[test]
    fn ids_sort_by_creation() {
        let first = InvocationId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = InvocationId::new();
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn from_str_matches_parse() {
        let id = InvocationId::new();
        let parsed: InvocationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
