//! Core domain types
//!
//! Identifiers for both sides of the link, the correspondence records read
//! from the gazetteer, and the append-only sets used for deduplication.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Remote knowledge-base item identifier (e.g. `Q42`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse a bare item id (`Q123`) or a concept URI ending in one
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let tail = raw.rsplit('/').next().unwrap_or(raw);
        let digits = tail.strip_prefix('Q').or_else(|| tail.strip_prefix('q'))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0') {
            return None;
        }
        Some(Self(format!("Q{}", digits)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("not an item id: {}", s))
    }
}

impl TryFrom<String> for EntityId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// External identifier namespace a gazetteer record cross-references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForeignSource {
    /// `wd:id` - the foreign id already is a remote item id
    #[serde(rename = "wd")]
    Wikidata,
    /// `gn:id` - numeric GeoNames id, held remotely by a secondary property
    #[serde(rename = "gn")]
    GeoNames,
}

impl ForeignSource {
    /// Concordance key used by the gazetteer dataset
    pub fn concordance_key(&self) -> &'static str {
        match self {
            ForeignSource::Wikidata => "wd:id",
            ForeignSource::GeoNames => "gn:id",
        }
    }

    /// Remote property holding this identifier, when resolution needs search
    pub fn secondary_property(&self) -> Option<&'static str> {
        match self {
            ForeignSource::Wikidata => None,
            ForeignSource::GeoNames => Some("P1566"),
        }
    }

    /// Parse a raw foreign id as stored in the dataset
    pub fn parse_id(&self, raw: &str) -> Option<ForeignId> {
        match self {
            ForeignSource::Wikidata => EntityId::parse(raw).map(ForeignId::Entity),
            ForeignSource::GeoNames => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .map(ForeignId::Numeric),
        }
    }
}

impl fmt::Display for ForeignSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignSource::Wikidata => f.write_str("wd"),
            ForeignSource::GeoNames => f.write_str("gn"),
        }
    }
}

impl FromStr for ForeignSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wd" | "wd:id" | "wikidata" => Ok(ForeignSource::Wikidata),
            "gn" | "gn:id" | "geonames" => Ok(ForeignSource::GeoNames),
            other => Err(format!("unknown foreign source: {}", other)),
        }
    }
}

/// Foreign identifier value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ForeignId {
    Entity(EntityId),
    Numeric(i64),
}

impl fmt::Display for ForeignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForeignId::Entity(id) => write!(f, "{}", id),
            ForeignId::Numeric(n) => write!(f, "{}", n),
        }
    }
}

/// One gazetteer record carrying a foreign cross-reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceRecord {
    pub local_id: i64,
    pub local_place_type: Option<String>,
    pub foreign_id: ForeignId,
    pub foreign_source: ForeignSource,
}

/// Remote entities already known to carry the target back-reference
///
/// Insert-only: there is deliberately no way to remove an entry.
#[derive(Debug, Clone, Default)]
pub struct DedupUniverse {
    entities: HashSet<EntityId>,
}

impl DedupUniverse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union another source of evidence into the universe
    pub fn extend<I: IntoIterator<Item = EntityId>>(&mut self, ids: I) {
        self.entities.extend(ids);
    }

    /// Returns true if the entity was not present before
    pub fn insert(&mut self, id: EntityId) -> bool {
        self.entities.insert(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Foreign ids confirmed to have no remote counterpart
///
/// Insert-only, mirrored by the `negative` table.
#[derive(Debug, Clone, Default)]
pub struct NegativeCache {
    ids: HashSet<i64>,
}

impl NegativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i64) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    /// True when the foreign id is numeric and cached as dead
    pub fn covers(&self, foreign_id: &ForeignId) -> bool {
        match foreign_id {
            ForeignId::Numeric(n) => self.contains(*n),
            ForeignId::Entity(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<i64> for NegativeCache {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Persisted (entity, local_id) link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkRecord {
    pub entity: EntityId,
    pub local_id: i64,
}
