//! Stable operation surface over the Palimpsest temporal document-graph
//! store.
//!
//! This is the layer an external dispatcher (an MCP server, an HTTP
//! handler, a CLI) sits on top of: each public method here corresponds
//! 1:1 to a named tool/RPC operation, takes plain arguments, and returns
//! a plain result or an `Error`. It owns no protocol framing of its own.
//!
//! ```rust,no_run
//! use palimpsest_api::Store;
//!
//! let store = Store::open("./my-graph.palimpsest").unwrap();
//! store.add_document("doc1", "hello world".to_string(), None, None).unwrap();
//! let doc = store.get_document("doc1", None).unwrap();
//! assert!(doc.is_some());
//! ```

use chrono::{DateTime, Utc};
use palimpsest::{
    mermaid,
    search::{SortBy, SortOrder},
    tags::TagTarget,
    traversal::{ExploreFilters, ExploreParams, ExploreResult, MapParams, MapScope, MapResult, NeighborsQuery},
    Edge, Engine, GraphPath, MetadataStats, Node, TimelineEntry, VersionDiff,
};
pub use palimpsest::{Direction, MetadataFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashSet;

pub use palimpsest::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Aggregate counts returned by `stats()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub avg_degree: f64,
}

/// `{orphanedNodes, missingDocuments, inconsistentEdges}` from `check_integrity()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub orphaned_nodes: usize,
    pub missing_documents: usize,
    pub inconsistent_edges: usize,
}

/// Either a structured `map_graph` record or a rendered Mermaid diagram,
/// mirroring §6's "JSON or Mermaid" output contract.
pub enum GraphView {
    Json(MapResult),
    Mermaid(String),
}

/// The primary entry point for applications built on Palimpsest. Wraps
/// [`Engine`] with the operation surface named by the tool/RPC table.
pub struct Store {
    engine: Engine,
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            engine: Engine::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            engine: Engine::open_in_memory()?,
        })
    }

    pub fn with_embedder(mut self, embedder: std::sync::Arc<dyn palimpsest::EmbeddingProvider>) -> Self {
        self.engine = self.engine.with_embedder(embedder);
        self
    }

    // -- documents ----------------------------------------------------

    pub fn add_document(
        &self,
        id: &str,
        content: String,
        metadata: Option<Json>,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<Node> {
        self.engine.put(
            id,
            content,
            palimpsest::RichMetadata::from_json(metadata),
            None,
            valid_from,
        )
    }

    pub fn get_document(&self, id: &str, at_time: Option<DateTime<Utc>>) -> Result<Option<Node>> {
        match at_time {
            Some(t) => self.engine.get_at(id, t),
            None => self.engine.get(id),
        }
    }

    /// `update_document` — new version; when `merge_metadata` is set, the
    /// supplied metadata is shallow-merged over the current row's metadata
    /// instead of replacing it outright.
    pub fn update_document(
        &self,
        id: &str,
        content: Option<String>,
        metadata: Option<Json>,
        merge_metadata: bool,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<Node> {
        let current = self
            .engine
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let new_content = content.unwrap_or_else(|| current.content.clone());
        let new_metadata = match (metadata, merge_metadata) {
            (Some(m), true) => {
                let mut merged = current.metadata.clone();
                merged.merge_over(palimpsest::RichMetadata::from_json(Some(m)));
                merged
            }
            (Some(m), false) => palimpsest::RichMetadata::from_json(Some(m)),
            (None, _) => current.metadata.clone(),
        };

        self.engine.put(id, new_content, new_metadata, None, valid_from)
    }

    pub fn delete_document(&self, id: &str) -> Result<()> {
        self.engine.delete_hard(id)
    }

    pub fn list_documents(&self, limit: Option<usize>) -> Result<Vec<Node>> {
        self.engine.list_documents(limit)
    }

    pub fn get_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        self.engine.created_between(start, end)
    }

    pub fn get_modified_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        self.engine.modified_between(start, end)
    }

    pub fn get_deleted_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        self.engine.deleted_between(start, end)
    }

    pub fn get_document_timeline(&self, id: &str) -> Result<Vec<TimelineEntry>> {
        self.engine.timeline(id)
    }

    pub fn compare_versions(&self, id: &str, v1: u64, v2: u64) -> Result<VersionDiff> {
        self.engine.diff(id, v1, v2)
    }

    // -- search ---------------------------------------------------------

    pub fn search(
        &self,
        query: Option<&str>,
        filters: Option<MetadataFilter>,
        limit: Option<usize>,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> Result<Vec<Node>> {
        self.engine.search(
            query,
            filters.unwrap_or_default(),
            limit.unwrap_or(10),
            sort_by,
            sort_order,
        )
    }

    pub fn find_similar(&self, id: &str, limit: Option<usize>) -> Result<Vec<(Node, f32)>> {
        self.engine.find_similar(id, limit.unwrap_or(10))
    }

    // -- relationships & traversal -----------------------------------

    pub fn add_relationship(
        &self,
        from: &str,
        to: &str,
        relation: Option<String>,
        metadata: Option<Json>,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<Edge> {
        self.engine.put_edge(
            from,
            to,
            relation,
            None,
            palimpsest::RichMetadata::from_json(metadata),
            None,
            valid_from,
        )
    }

    pub fn get_neighbors(
        &self,
        id: &str,
        direction: Option<Direction>,
        depth: Option<u32>,
        relation_filter: Option<HashSet<String>>,
        at_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<palimpsest::NeighborResult>> {
        let query = NeighborsQuery {
            depth: depth.unwrap_or(1),
            max_results: 0,
            relation_filter,
            at_time,
        };
        self.engine.neighbors(id, direction.unwrap_or(Direction::Both), &query)
    }

    pub fn find_path(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<usize>,
        at_time: Option<DateTime<Utc>>,
    ) -> Result<Option<GraphPath>> {
        self.engine.find_path(from, to, max_depth.unwrap_or(10), at_time)
    }

    pub fn explore_graph(&self, params: ExploreParams) -> Result<ExploreResult> {
        self.engine.explore(&params)
    }

    /// `map_graph` — returns either a structured record (`as_mermaid =
    /// false`) or a rendered Mermaid diagram string.
    pub fn map_graph(&self, params: MapParams, as_mermaid: bool) -> Result<GraphView> {
        let result = self.engine.map(&params)?;
        if as_mermaid {
            Ok(GraphView::Mermaid(mermaid::render(&result.nodes, &result.edges)))
        } else {
            Ok(GraphView::Json(result))
        }
    }

    // -- tags -------------------------------------------------------------

    pub fn tag_add(&self, target: TagTarget, tags: &[String]) -> Result<usize> {
        self.engine.tag_add(target, tags)
    }

    pub fn tag_remove(&self, target: TagTarget, tags: &[String]) -> Result<usize> {
        self.engine.tag_remove(target, tags)
    }

    pub fn tag_rename(&self, from: &str, to: &str) -> Result<usize> {
        self.engine.tag_rename(from, to)
    }

    pub fn tag_list(&self) -> Result<Vec<(String, usize)>> {
        self.engine.tag_list()
    }

    pub fn tag_get(&self, id: &str) -> Result<Vec<String>> {
        self.engine.tag_get(id)
    }

    pub fn metadata_stats(&self) -> Result<MetadataStats> {
        self.engine.metadata_stats()
    }

    // -- maintenance ------------------------------------------------------

    /// `stats()` — `{nodeCount, edgeCount, avgDegree}`, `avgDegree = 2E/N`
    /// rounded to 2 decimals, 0 when there are no nodes.
    pub fn stats(&self) -> Result<GraphStats> {
        let node_count = self.engine.list_documents(None)?.len();
        let edge_count = self.engine.map(&MapParams {
            scope: MapScope::All,
            max_nodes: 0,
            max_edges: 0,
            at_time: None,
            filters: None,
            foci: Vec::new(),
            radius: 0,
        })?.edges.len();

        let avg_degree = if node_count == 0 {
            0.0
        } else {
            let raw = 2.0 * edge_count as f64 / node_count as f64;
            (raw * 100.0).round() / 100.0
        };

        Ok(GraphStats {
            node_count,
            edge_count,
            avg_degree,
        })
    }

    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let (orphaned_nodes, missing_documents, inconsistent_edges) = self.engine.integrity_counts()?;
        Ok(IntegrityReport {
            orphaned_nodes,
            missing_documents,
            inconsistent_edges,
        })
    }

    pub fn rebuild_search_index(&self) -> Result<usize> {
        self.engine.rebuild_search_index()
    }
}

// Re-export traversal/explore helper types so downstream dispatchers don't
// need a direct `palimpsest` dependency for common construction.
pub use palimpsest::traversal;
pub use palimpsest::tags;
pub use palimpsest::search;
pub use palimpsest::{RichMetadata, EmbeddingProvider};

pub fn explore_filters(tags: Option<Vec<String>>, node_type: Option<String>) -> ExploreFilters {
    ExploreFilters { tags, node_type }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_a_versioning_through_facade() {
        let store = Store::open_in_memory().unwrap();
        let v1_time: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let v2_time: DateTime<Utc> = "2024-02-01T00:00:00Z".parse().unwrap();

        store
            .add_document("doc1", "V1".into(), Some(serde_json::json!({"tags": ["draft"]})), Some(v1_time))
            .unwrap();
        store
            .update_document(
                "doc1",
                Some("V2".into()),
                Some(serde_json::json!({"tags": ["draft", "reviewed"]})),
                false,
                Some(v2_time),
            )
            .unwrap();

        let current = store.get_document("doc1", None).unwrap().unwrap();
        assert_eq!(current.version, 2);

        let timeline = store.get_document_timeline("doc1").unwrap();
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn update_document_merges_metadata_when_requested() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_document("doc1", "v1".into(), Some(serde_json::json!({"author": "alice", "tags": ["a"]})), None)
            .unwrap();
        store
            .update_document("doc1", None, Some(serde_json::json!({"tags": ["b"]})), true, None)
            .unwrap();

        let current = store.get_document("doc1", None).unwrap().unwrap();
        assert_eq!(current.metadata.get_str("author"), Some("alice"));
        assert_eq!(current.metadata.tags(), vec!["b".to_string()]);
    }

    #[test]
    fn stats_report_avg_degree() {
        let store = Store::open_in_memory().unwrap();
        store.add_document("a", "a".into(), None, None).unwrap();
        store.add_document("b", "b".into(), None, None).unwrap();
        store.add_relationship("a", "b", None, None, None).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.avg_degree, 1.0);
    }

    #[test]
    fn check_integrity_is_clean_for_simple_graph() {
        let store = Store::open_in_memory().unwrap();
        store.add_document("a", "a".into(), None, None).unwrap();
        let report = store.check_integrity().unwrap();
        assert_eq!(report.inconsistent_edges, 0);
    }
}
