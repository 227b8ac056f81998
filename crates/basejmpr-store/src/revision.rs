//! Revision identifiers and records

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Revision identifier: the name of a revision directory.
///
/// Always a positive decimal integer. Ordered by numeric value, never
/// lexically, so `"10"` sorts after `"9"`. Non-canonical spellings such as
/// `"01"` stay distinct identifiers (they are distinct directories) but
/// sort right after their canonical twin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionId {
    number: u64,
    name: String,
}

impl RevisionId {
    /// Parse a directory name. Returns `None` unless it is all ASCII digits
    /// with a positive value that fits in a u64.
    pub fn parse(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u64 = name.parse().ok()?;
        (number > 0).then(|| Self {
            number,
            name: name.to_string(),
        })
    }

    /// Canonical identifier for `number` (must be positive).
    pub fn from_number(number: u64) -> Self {
        debug_assert!(number > 0, "revision ids start at 1");
        Self {
            number,
            name: number.to_string(),
        }
    }

    /// The first revision ever created in an empty store.
    pub fn first() -> Self {
        Self::from_number(1)
    }

    /// Canonical successor, or `None` past `u64::MAX`.
    pub fn next(&self) -> Option<Self> {
        self.number.checked_add(1).map(Self::from_number)
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether a path component (the directory above a backing file) names
    /// this revision. Compared numerically, so `01` and `1` both match.
    pub fn matches_component(&self, component: &str) -> bool {
        Self::parse(component).is_some_and(|other| other.number == self.number)
    }
}

impl Ord for RevisionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .cmp(&other.number)
            .then_with(|| self.name.len().cmp(&other.name.len()))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for RevisionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::str::FromStr for RevisionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid revision '{s}': expected a positive integer"))
    }
}

impl Serialize for RevisionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// One base-image revision as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    pub id: RevisionId,
    /// Symbolic links directly inside the revision directory.
    pub files: BTreeSet<String>,
    /// Raw downloaded artifacts inside `targets/`.
    pub targets: BTreeSet<String>,
}

/// All known revisions, in numeric order.
pub type RevisionSet = BTreeMap<RevisionId, Revision>;

/// One artifact to download into a new revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    pub url: String,
    /// File name inside `meta/` or `targets/`.
    pub local_name: String,
    /// Metadata (`meta/`) rather than a disk image target (`targets/`).
    pub is_manifest: bool,
}

impl ArtifactSpec {
    pub fn target(url: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_name: local_name.into(),
            is_manifest: false,
        }
    }

    pub fn manifest(url: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_name: local_name.into(),
            is_manifest: true,
        }
    }
}

/// Provenance record written to `meta/revision.json` once a revision is
/// complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMeta {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub artifacts: Vec<ArtifactSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    #[test]
    fn parse_rejects_non_numeric() {
        assert!(RevisionId::parse("").is_none());
        assert!(RevisionId::parse("abc").is_none());
        assert!(RevisionId::parse("1a").is_none());
        assert!(RevisionId::parse("-1").is_none());
        assert!(RevisionId::parse("+1").is_none());
        assert!(RevisionId::parse(".lock").is_none());
    }

    #[test]
    fn parse_rejects_zero() {
        assert!(RevisionId::parse("0").is_none());
        assert!(RevisionId::parse("000").is_none());
    }

    #[test]
    fn numeric_not_lexical_order() {
        let mut ids = vec![id("2"), id("10"), id("1")];
        ids.sort();
        let names: Vec<_> = ids.iter().map(RevisionId::as_str).collect();
        assert_eq!(names, ["1", "2", "10"]);
    }

    #[test]
    fn aliases_are_distinct_but_adjacent() {
        let mut ids = vec![id("01"), id("2"), id("1")];
        ids.sort();
        let names: Vec<_> = ids.iter().map(RevisionId::as_str).collect();
        assert_eq!(names, ["1", "01", "2"]);
        assert_ne!(id("1"), id("01"));
    }

    #[test]
    fn next_is_canonical() {
        assert_eq!(id("09").next().unwrap().as_str(), "10");
        assert_eq!(RevisionId::first().as_str(), "1");
    }

    #[test]
    fn largest_id_has_no_successor() {
        let max = id(&u64::MAX.to_string());
        assert_eq!(max.next(), None);
    }

    #[test]
    fn component_match_is_numeric() {
        assert!(id("1").matches_component("1"));
        assert!(id("1").matches_component("01"));
        assert!(!id("1").matches_component("10"));
        assert!(!id("1").matches_component("targets"));
    }

    #[test]
    fn serializes_as_string() {
        assert_eq!(serde_json::to_string(&id("7")).unwrap(), "\"7\"");
    }
}
