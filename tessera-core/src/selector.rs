//! Composite keys that identify and locate manifests.

use crate::error::{Error, Result};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A five-segment composite key in the form
/// `kind/group/version/namespace/name`.
///
/// A name of `*` is a wildcard that references every manifest sharing the
/// selector's kind/group/version/namespace. Selectors are immutable and
/// compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    kind: String,
    group: String,
    version: String,
    namespace: String,
    name: String,
}

impl Selector {
    /// Parse a selector from its five-slash string form. Empty segments and
    /// any other segment count are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split('/').collect();
        if parts.len() != 5 || parts.iter().any(|part| part.is_empty()) {
            return Err(Error::BadSelector(input.to_string()));
        }
        Ok(Selector {
            kind: parts[0].to_string(),
            group: parts[1].to_string(),
            version: parts[2].to_string(),
            namespace: parts[3].to_string(),
            name: parts[4].to_string(),
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The "kind group version" projection.
    pub fn kgv(&self) -> String {
        format!("{}/{}/{}", self.kind, self.group, self.version)
    }

    /// The "kind group version namespace" projection, used as the shard key
    /// in the index.
    pub fn kgvn(&self) -> String {
        format!("{}/{}", self.kgv(), self.namespace)
    }

    /// The full string representation of the selector.
    pub fn id(&self) -> String {
        format!("{}/{}", self.kgvn(), self.name)
    }

    /// Whether the selector references every manifest in its KGVN.
    pub fn is_wildcard(&self) -> bool {
        self.name == "*"
    }

    /// Two selectors match when their KGVN is equal and either the names are
    /// equal or at least one side is a wildcard.
    pub fn matches(&self, other: &Selector) -> bool {
        self.kind == other.kind
            && self.group == other.group
            && self.version == other.version
            && self.namespace == other.namespace
            && (self.name == other.name || self.is_wildcard() || other.is_wildcard())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Selector::parse(input)
    }
}

impl PartialOrd for Selector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Selector {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let entry = String::deserialize(deserializer)?;
        Selector::parse(&entry).map_err(de::Error::custom)
    }
}
