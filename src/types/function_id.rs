//! Function identifier type using TypeID format.
//!
//! FunctionId is a time-sortable, globally unique identifier for a deployed
//! function. Format: `fn_01h455vb4pex5vsknk084sn02q`

use mti::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A validated function identifier.
///
/// Uses TypeID format so identifiers sort by creation time.
/// Example: `fn_01h455vb4pex5vsknk084sn02q`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(MagicTypeId);

/// Error returned when attempting to parse an invalid function ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidFunctionId {
    /// TypeID parsing failed
    Parse(String),
    /// Wrong prefix (expected "fn")
    WrongPrefix {
        /// The expected prefix
        expected: &'static str,
        /// The actual prefix found
        actual: String,
    },
}

impl fmt::Display for InvalidFunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "invalid function ID: {e}"),
            Self::WrongPrefix { expected, actual } => {
                write!(f, "expected prefix '{expected}', got '{actual}'")
            }
        }
    }
}

impl std::error::Error for InvalidFunctionId {}

impl FunctionId {
    /// The TypeID prefix for function identifiers.
    pub const PREFIX: &'static str = "fn";

    /// Creates a new function ID with a fresh UUIDv7.
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Parses a function ID from a string, validating the prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFunctionId::Parse` if the string is not a valid TypeID.
    /// Returns `InvalidFunctionId::WrongPrefix` if the TypeID has a different prefix.
    pub fn parse(s: &str) -> Result<Self, InvalidFunctionId> {
        let id =
            MagicTypeId::from_str(s).map_err(|e| InvalidFunctionId::Parse(e.to_string()))?;

        let prefix = id.prefix().as_str();
        if prefix != Self::PREFIX {
            return Err(InvalidFunctionId::WrongPrefix {
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

impl Default for FunctionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FunctionId {
    type Err = InvalidFunctionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FunctionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FunctionId {
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

    #[test]
    fn new_creates_prefixed_id() {
        let id = FunctionId::new();
        assert!(id.to_string().starts_with("fn_"));
    }

    #[test]
    fn parse_roundtrips_display() {
        let id = FunctionId::new();
        let parsed = FunctionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_wrong_prefix_fails() {
        let other = InvocationLike::make();
        let result = FunctionId::parse(&other);
        assert!(matches!(
            result,
            Err(InvalidFunctionId::WrongPrefix { expected: "fn", .. })
        ));
    }

    #[test]
    fn parse_invalid_format_fails() {
        let result = FunctionId::parse("not-a-valid-typeid");
        assert!(matches!(result, Err(InvalidFunctionId::Parse(_))));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(FunctionId::new(), FunctionId::new());
    }

    #[test]
    fn serializes_as_string() {
        let id = FunctionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: FunctionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    struct InvocationLike;

    impl InvocationLike {
        fn make() -> String {
            "inv".create_type_id::<V7>().to_string()
        }
    }
}
