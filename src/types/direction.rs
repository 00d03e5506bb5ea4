//! Bridge transfer direction
//!
//! This module defines the `BridgeDirection` enum describing which way value
//! moves across the bridge, and which lock/mint or burn/release pairing
//! therefore applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Direction of a bridge transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeDirection {
    /// Value is locked on the source chain and minted on the destination chain
    SourceToDest,
    /// Wrapped value is burned on the destination chain and released on the source chain
    DestToSource,
}

impl BridgeDirection {
    /// Get string representation of the direction
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeDirection::SourceToDest => "source_to_dest",
            BridgeDirection::DestToSource => "dest_to_source",
        }
    }

    /// The chain role that initiates this transfer (lock or burn side)
    pub fn origin_role(&self) -> ChainRole {
        match self {
            BridgeDirection::SourceToDest => ChainRole::Source,
            BridgeDirection::DestToSource => ChainRole::Destination,
        }
    }

    /// The chain role that settles this transfer (mint or release side)
    pub fn settlement_role(&self) -> ChainRole {
        match self {
            BridgeDirection::SourceToDest => ChainRole::Destination,
            BridgeDirection::DestToSource => ChainRole::Source,
        }
    }
}

impl fmt::Display for BridgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BridgeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source_to_dest" => Ok(Self::SourceToDest),
            "dest_to_source" => Ok(Self::DestToSource),
            _ => Err(format!("Unknown bridge direction: {}", s)),
        }
    }
}

/// Which side of the bridge a chain client plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRole {
    /// The chain where value originates (lock/release side)
    Source,
    /// The chain where wrapped value lives (mint/burn side)
    Destination,
}

impl ChainRole {
    /// Get string representation of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainRole::Source => "source",
            ChainRole::Destination => "destination",
        }
    }
}

impl fmt::Display for ChainRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_roundtrip() {
        assert_eq!(
            "source_to_dest".parse::<BridgeDirection>(),
            Ok(BridgeDirection::SourceToDest)
        );
        assert_eq!(
            "dest_to_source".parse::<BridgeDirection>(),
            Ok(BridgeDirection::DestToSource)
        );
        assert!("sideways".parse::<BridgeDirection>().is_err());

        assert_eq!(BridgeDirection::SourceToDest.to_string(), "source_to_dest");
    }

    #[test]
    fn test_direction_roles() {
        assert_eq!(
            BridgeDirection::SourceToDest.origin_role(),
            ChainRole::Source
        );
        assert_eq!(
            BridgeDirection::SourceToDest.settlement_role(),
            ChainRole::Destination
        );
        assert_eq!(
            BridgeDirection::DestToSource.origin_role(),
            ChainRole::Destination
        );
        assert_eq!(
            BridgeDirection::DestToSource.settlement_role(),
            ChainRole::Source
        );
    }
}
