//! Knowledge Entry - The unit of indexing
//!
//! Each entry carries its text content plus a fixed metadata struct. Truly
//! open-ended annotations live in a serialized string field that is indexed
//! as part of the content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ENTRY TYPES
// ============================================================================

/// Classification of a knowledge entry
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// General knowledge article
    #[default]
    Knowledge,
    /// Session or agent memory
    Memory,
    /// Architecture decision record
    Adr,
    /// A known pitfall and its workaround
    Gotcha,
    /// Code snippet or example
    Code,
}

impl EntryType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Knowledge => "knowledge",
            EntryType::Memory => "memory",
            EntryType::Adr => "adr",
            EntryType::Gotcha => "gotcha",
            EntryType::Code => "code",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => EntryType::Memory,
            "adr" => EntryType::Adr,
            "gotcha" => EntryType::Gotcha,
            "code" => EntryType::Code,
            _ => EntryType::Knowledge,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visibility scope of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Project,
    Global,
}

/// Difficulty classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    #[default]
    Medium,
    High,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Low => "low",
            Difficulty::Medium => "medium",
            Difficulty::High => "high",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Difficulty::Low,
            "high" => Difficulty::High,
            _ => Difficulty::Medium,
        }
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Entry metadata - semantic values, preserved verbatim on output
#[non_exhaustive]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryMetadata {
    /// Unordered tag set
    pub tags: Vec<String>,
    /// Agent roles this entry is relevant to
    pub agent_types: Vec<String>,
    /// Owning project
    pub project_id: Option<String>,
    /// Programming language, if applicable
    pub language: Option<String>,
    /// Visibility scope
    pub scope: Option<Scope>,
    /// Difficulty classification
    pub difficulty: Option<Difficulty>,
    /// Severity label (for gotchas)
    pub severity: Option<String>,
    /// Status label
    pub status: Option<String>,
    /// How often the entry has been used
    pub usage_count: u64,
    /// Size of the origin file in bytes
    pub file_size: u64,
    /// Observed effectiveness in [0,1]
    pub effectiveness: Option<f64>,
    /// Observed success rate in [0,1]
    pub success_rate: Option<f64>,
    /// Last time the entry was used
    pub last_used: Option<DateTime<Utc>>,
    /// Related entry ids
    pub related_ids: Vec<String>,
    /// Parent entry id
    pub parent_id: Option<String>,
    /// Child entry ids
    pub child_ids: Vec<String>,
    /// Open-ended serialized annotations, indexed as part of content
    pub annotations: Option<String>,
}

// ============================================================================
// ENTRY
// ============================================================================

/// A knowledge entry - the unit of indexing
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Stable opaque identifier
    pub id: String,
    /// Entry classification
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Short human-readable title
    pub title: String,
    /// Full text content
    pub content: String,
    /// Optional category
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Origin path
    pub path: String,
    /// Content fingerprint
    pub hash: String,
    /// Wall-clock modification time
    pub last_modified: DateTime<Utc>,
    /// Metadata, preserved verbatim
    pub metadata: EntryMetadata,
}

impl Entry {
    /// Build a minimal entry; metadata defaults to empty
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entry_type: EntryType::Knowledge,
            title: title.into(),
            content: content.into(),
            category: None,
            path: String::new(),
            hash: String::new(),
            last_modified: Utc::now(),
            metadata: EntryMetadata::default(),
        }
    }

    /// The text actually fed to the inverted index: content plus any
    /// open-ended annotations
    pub fn indexed_content(&self) -> String {
        match &self.metadata.annotations {
            Some(a) if !a.is_empty() => format!("{}\n{}", self.content, a),
            _ => self.content.clone(),
        }
    }

    /// Days elapsed since the entry was last modified
    pub fn days_since_modified(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_modified).num_seconds().max(0) as f64 / 86_400.0
    }
}

// ============================================================================
// CONTENT CHANGES
// ============================================================================

/// Kind of content change arriving from a producer or file watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

/// A content change to be debounced and indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Origin path, also the coalescing key for debouncing
    pub path: String,
    /// Producer-declared content type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}
