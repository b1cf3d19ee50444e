//! ONTAP cluster version model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OntapError;

/// Version triple reported by the cluster, e.g. `9.10.1` → `(9, 10, 1)`.
///
/// Ordering is lexicographic on `(generation, major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OntapVersion {
    pub generation: u32,
    pub major: u32,
    pub minor: u32,
}

impl OntapVersion {
    /// Create a version triple
    pub const fn new(generation: u32, major: u32, minor: u32) -> Self {
        Self {
            generation,
            major,
            minor,
        }
    }

    /// `true` iff this version is at least `(generation, major, minor)`.
    pub fn meets_minimum(&self, generation: u32, major: u32, minor: u32) -> bool {
        *self >= OntapVersion::new(generation, major, minor)
    }

    /// Parse an override such as `force_ontap_version="9.10"` or `"9.10.1"`.
    ///
    /// Exactly two or three numeric components are accepted; a missing minor
    /// defaults to 0.
    pub fn parse_forced(value: &str) -> Result<Self, OntapError> {
        let invalid = || {
            OntapError::InvalidConfig(format!(
                "expecting 'G.M' or 'G.M.m' for force_ontap_version, got: {value}"
            ))
        };
        let parts = value
            .trim()
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [generation, major] => Ok(Self::new(*generation, *major, 0)),
            [generation, major, minor] => Ok(Self::new(*generation, *major, *minor)),
            _ => Err(invalid()),
        }
    }

    /// Tuple form used in user-facing messages: `(9, 11, 1)`.
    pub fn as_tuple(&self) -> String {
        format!("({}, {}, {})", self.generation, self.major, self.minor)
    }
}

impl fmt::Display for OntapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.generation, self.major, self.minor)
    }
}

/// Version as observed (or forced) for one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClusterVersion {
    pub version: Option<OntapVersion>,
    /// `false` when the cluster version could not be read and was not forced
    pub valid: bool,
}

impl ClusterVersion {
    /// A version read from the cluster (or forced)
    pub fn known(version: OntapVersion) -> Self {
        Self {
            version: Some(version),
            valid: true,
        }
    }

    /// The cluster version could not be determined
    pub fn unknown() -> Self {
        Self {
            version: None,
            valid: false,
        }
    }

    /// Unknown versions never meet a minimum.
    pub fn meets_minimum(&self, generation: u32, major: u32, minor: u32) -> bool {
        self.valid
            && self
                .version
                .is_some_and(|v| v.meets_minimum(generation, major, minor))
    }
}

/// REST `version` object as returned by `GET cluster?fields=version`
#[derive(Debug, Clone, Deserialize)]
pub struct RestVersion {
    pub generation: u32,
    pub major: u32,
    pub minor: u32,
    #[serde(default)]
    pub full: Option<String>,
}

impl From<RestVersion> for OntapVersion {
    fn from(v: RestVersion) -> Self {
        OntapVersion::new(v.generation, v.major, v.minor)
    }
}
