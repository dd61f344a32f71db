//! Core data types: versioned documents, typed edges, and the open
//! metadata payload attached to both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// The open JSON payload attached to a node or edge.
///
/// Recognized keys are surfaced as typed accessors; everything else is
/// preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichMetadata(pub serde_json::Map<String, Json>);

impl RichMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Option<Json>) -> Self {
        match value {
            Some(Json::Object(map)) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn into_json(self) -> Json {
        Json::Object(self.0)
    }

    pub fn tags(&self) -> Vec<String> {
        self.string_list("tags")
    }

    pub fn set_tags(&mut self, tags: Vec<String>) {
        self.0.insert(
            "tags".to_string(),
            Json::Array(tags.into_iter().map(Json::String).collect()),
        );
    }

    pub fn keywords(&self) -> Vec<String> {
        self.string_list("keywords")
    }

    pub fn path(&self) -> Vec<String> {
        self.string_list("path")
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Shallow-merge `other` over `self`: keys in `other` overwrite keys in
    /// `self`, keys only in `self` are preserved.
    pub fn merge_over(&mut self, other: RichMetadata) {
        for (k, v) in other.0 {
            self.0.insert(k, v);
        }
    }
}

/// A single `(id, version)` row — the state of a document over one
/// contiguous validity interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub version: u64,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    pub content: String,
    pub metadata: RichMetadata,
    pub created_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub supersedes: Option<String>,
}

fn default_node_type() -> String {
    "content".to_string()
}

impl Node {
    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn was_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.is_none_or(|t| t > at)
    }

    /// `type` folded into `metadata["type"]` on read when it is not the
    /// default, so filters over `metadata.type` see it without special-casing
    /// the struct field.
    pub fn metadata_with_type_folded(&self) -> RichMetadata {
        let mut meta = self.metadata.clone();
        if self.node_type != "content" {
            meta.0
                .insert("type".to_string(), Json::String(self.node_type.clone()));
        }
        meta
    }
}

/// A typed directed relationship between two node ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: String,
    pub to_node: String,
    #[serde(default = "default_relation")]
    pub relation: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub metadata: RichMetadata,
    pub created_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default = "default_weight")]
    pub temporal_weight: f64,
}

fn default_relation() -> String {
    "related".to_string()
}

fn default_weight() -> f64 {
    1.0
}

impl Edge {
    pub fn is_current(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn was_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_from <= at && self.valid_until.is_none_or(|t| t > at)
    }
}

/// One entry in a document's `timeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub event: TimelineEvent,
    pub version: u64,
    pub content_preview: String,
    pub changes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineEvent {
    Created,
    Updated,
    Deleted,
}

/// Structural delta between two versions of the same document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDiff {
    pub v1: Node,
    pub v2: Node,
    pub content_changed: bool,
    pub length_change: i64,
    pub v1_length: usize,
    pub v2_length: usize,
    pub changed_metadata_keys: Vec<String>,
}

/// Graph neighbor query result item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborResult {
    pub id: String,
    pub relation: String,
    pub direction: Direction,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A found (or absent) shortest path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPath {
    pub path: Vec<String>,
    pub length: usize,
}

/// Aggregate tag/keyword/emoji/type/path statistics over current documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataStats {
    pub tag_counts: BTreeMap<String, usize>,
    pub keyword_counts: BTreeMap<String, usize>,
    pub emoji_counts: BTreeMap<String, usize>,
    pub type_counts: BTreeMap<String, usize>,
    pub paths: Vec<String>,
}

/// Filter used by smart search, `explore`, `map(scope=filtered)`, and tag
/// bulk operations' `document_filter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub tags: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
    pub path_prefix: Option<Vec<String>>,
    pub content: Option<String>,
    #[serde(flatten)]
    pub exact: BTreeMap<String, Json>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.tags.is_none()
            && self.keywords.is_none()
            && self.path_prefix.is_none()
            && self.content.is_none()
            && self.exact.is_empty()
    }

    /// ALL-semantics match against a node's folded metadata, per spec §4.4.
    pub fn matches(&self, meta: &RichMetadata) -> bool {
        if let Some(wanted) = &self.tags {
            let have = meta.tags();
            if !wanted.iter().all(|t| have.contains(t)) {
                return false;
            }
        }
        if let Some(wanted) = &self.keywords {
            let have = meta.keywords();
            if !wanted.iter().all(|k| have.contains(k)) {
                return false;
            }
        }
        if let Some(wanted) = &self.path_prefix {
            let have = meta.path();
            if !wanted.iter().all(|p| have.contains(p)) {
                return false;
            }
        }
        for (key, wanted) in &self.exact {
            match key.as_str() {
                "emoji" | "type" | "author" => {
                    if meta.0.get(key) != Some(wanted) {
                        return false;
                    }
                }
                _ => {
                    if meta.0.get(key) != Some(wanted) {
                        return false;
                    }
                }
            }
        }
        true
    }
}
