use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Three-component numeric tool version (major.minor.patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for ToolVersion {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(ToolError::InvalidArgument(format!(
                "version must be major.minor.patch: {s}"
            )));
        }
        let parse = |p: &str| {
            p.parse::<u32>().map_err(|_| {
                ToolError::InvalidArgument(format!("non-numeric version component in: {s}"))
            })
        };
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

/// Lifecycle status of a registered tool version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Active,
    Deprecated,
    Experimental,
    Stable,
    Legacy,
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VersionStatus::Active => "active",
            VersionStatus::Deprecated => "deprecated",
            VersionStatus::Experimental => "experimental",
            VersionStatus::Stable => "stable",
            VersionStatus::Legacy => "legacy",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for VersionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(VersionStatus::Active),
            "deprecated" => Ok(VersionStatus::Deprecated),
            "experimental" => Ok(VersionStatus::Experimental),
            "stable" => Ok(VersionStatus::Stable),
            "legacy" => Ok(VersionStatus::Legacy),
            other => Err(format!("unknown version status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_and_display_roundtrip() {
        let v = ToolVersion::from_str("2.10.3").unwrap();
        assert_eq!(v, ToolVersion::new(2, 10, 3));
        assert_eq!(v.to_string(), "2.10.3");
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let a = ToolVersion::from_str("1.9.0").unwrap();
        let b = ToolVersion::from_str("1.10.0").unwrap();
        assert!(a < b);
    }

    #[test]
    fn malformed_versions_are_rejected() {
        assert!(ToolVersion::from_str("1.0").is_err());
        assert!(ToolVersion::from_str("1.0.x").is_err());
        assert!(ToolVersion::from_str("").is_err());
    }
}
