use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Bumped whenever the persisted artifact layout changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Module,
    Class,
    Function,
    Method,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Module => "module",
            EntityKind::Class => "class",
            EntityKind::Function => "function",
            EntityKind::Method => "method",
        }
    }
}

/// Defining span of an entity: checkout-relative path, 1-based inclusive lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl Location {
    pub fn new(file_path: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            file_path: file_path.into(),
            start_line,
            end_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    pub has_default: bool,
}

/// A class base after resolution against the scanned FQN table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BaseRef {
    Resolved { fqn: String },
    Unresolved { name: String },
}

impl BaseRef {
    pub fn name(&self) -> &str {
        match self {
            BaseRef::Resolved { fqn } => fqn,
            BaseRef::Unresolved { name } => name,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, BaseRef::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InheritanceEdge {
    pub subtype: String,
    pub base: BaseRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntity {
    pub fqn: String,
    pub name: String,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    /// FQN of the enclosing module or class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bases: Vec<BaseRef>,
}

impl SourceEntity {
    /// First non-empty docstring line.
    pub fn doc_summary(&self) -> Option<String> {
        self.docstring.as_deref().and_then(first_line)
    }

    pub fn is_public(&self) -> bool {
        !self.name.starts_with('_')
    }
}

pub(crate) fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.to_string())
}

/// Lightweight integrity signal for a checkout file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub size: u64,
    pub hash: String,
}

impl FileFingerprint {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            size: bytes.len() as u64,
            hash: format!("{:016x}", xxh3_64(bytes)),
        }
    }

    pub fn describe(&self) -> String {
        format!("{} bytes, xxh3 {}", self.size, self.hash)
    }
}

/// Structural scan output for one checkout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuralMap {
    pub entities: BTreeMap<String, SourceEntity>,
    pub inheritance: Vec<InheritanceEdge>,
    /// Re-exported names (`pkg.Name`) mapped to the name they import
    pub aliases: BTreeMap<String, String>,
    pub files: BTreeMap<String, FileFingerprint>,
    pub parse_failures: usize,
}

impl StructuralMap {
    pub fn contains(&self, fqn: &str) -> bool {
        self.entities.contains_key(fqn)
    }

    pub fn get(&self, fqn: &str) -> Option<&SourceEntity> {
        self.entities.get(fqn)
    }

    /// Follows re-export aliases until a defined entity (or a dead end) is reached.
    pub fn canonical(&self, fqn: &str) -> String {
        let mut current = fqn.to_string();
        for _ in 0..8 {
            if self.entities.contains_key(&current) {
                return current;
            }
            match self.aliases.get(&current) {
                Some(next) if *next != current => current = next.clone(),
                _ => break,
            }
        }
        current
    }

    /// Direct members of a class or module, in source order.
    pub fn members_of(&self, owner: &str) -> Vec<&SourceEntity> {
        let mut members: Vec<&SourceEntity> = self
            .entities
            .values()
            .filter(|e| e.owner.as_deref() == Some(owner))
            .collect();
        members.sort_by(|a, b| {
            a.location
                .start_line
                .cmp(&b.location.start_line)
                .then_with(|| a.fqn.cmp(&b.fqn))
        });
        members
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooccurrenceAssociation {
    pub related: String,
    pub support: usize,
    /// P(related | key) = support / count(key)
    pub probability: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CooccurrenceGraph {
    pub edges: BTreeMap<String, Vec<CooccurrenceAssociation>>,
    /// Distinct files referencing each entity across all checkouts
    pub occurrences: BTreeMap<String, usize>,
    /// Distinct files referencing each entity within the target checkout only
    pub target_occurrences: BTreeMap<String, usize>,
    pub files_mined: usize,
}

impl CooccurrenceGraph {
    pub fn related(&self, fqn: &str) -> &[CooccurrenceAssociation] {
        self.edges.get(fqn).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub name: String,
    pub fqn: String,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub location: Location,
}

impl MemberSummary {
    pub fn from_entity(entity: &SourceEntity) -> Self {
        Self {
            name: entity.name.clone(),
            fqn: entity.fqn.clone(),
            kind: entity.kind,
            signature: entity.signature.clone(),
            summary: entity.doc_summary(),
            location: entity.location.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTarget {
    pub fqn: String,
    pub score: f64,
    pub popularity: f64,
    pub cooccurrence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub entity: SourceEntity,
    #[serde(default)]
    pub members: Vec<MemberSummary>,
}

/// The persisted, immutable artifact for one (repository, version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub format_version: u32,
    pub repository: String,
    pub version: String,
    /// Seconds since the Unix epoch
    pub generated_at: u64,
    pub targets: Vec<RankedTarget>,
    #[serde(default)]
    pub files: BTreeMap<String, FileFingerprint>,
}

impl Index {
    pub fn new(
        repository: impl Into<String>,
        version: impl Into<String>,
        targets: Vec<RankedTarget>,
        files: BTreeMap<String, FileFingerprint>,
    ) -> Self {
        let generated_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Self {
            format_version: INDEX_FORMAT_VERSION,
            repository: repository.into(),
            version: version.into(),
            generated_at,
            targets,
            files,
        }
    }

    pub fn matches(&self, repository: &str, version: &str) -> bool {
        self.repository == repository && self.version == version
    }
}
