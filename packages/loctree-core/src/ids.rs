use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::Error;

/// Unique identifier for a location.
///
/// Rendered as a lowercase hyphenated UUID. Every rendered id has the same width and never
/// contains the path delimiter, so lexicographic order over joined paths is a pre-order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Fresh random (v4) id.
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4().as_u128())
    }

    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_u128(self.0)
    }
}

impl From<Uuid> for NodeId {
    fn from(value: Uuid) -> Self {
        NodeId(value.as_u128())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_uuid().hyphenated())
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(NodeId::from)
            .map_err(|e| Error::InvalidOperation(format!("malformed location id {s:?}: {e}")))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        let id = NodeId::generate();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
        assert!(!rendered.contains('.'));
        assert_eq!(rendered.parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn rejects_malformed_ids() {
        let err = "not-a-uuid".parse::<NodeId>().unwrap_err();
        assert!(err.is_invalid_operation());
    }

    #[test]
    fn renders_small_values_zero_padded() {
        assert_eq!(NodeId(1).to_string(), "00000000-0000-0000-0000-000000000001");
    }
}
