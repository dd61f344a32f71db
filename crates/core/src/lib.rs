//! Palimpsest — an embedded bitemporal document-graph database.
//!
//! A document (`Node`) is an append-only versioned row with an explicit
//! validity interval; a typed directed `Edge` connects two nodes and is
//! gated by a causality check against their validity. On top of that
//! temporal substrate the engine layers full-text search, k-NN similarity
//! search over caller-supplied embeddings, rich metadata filtering, graph
//! traversal, and tag bulk operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use palimpsest::Engine;
//!
//! let db = Engine::open("my-graph.palimpsest").unwrap();
//! db.put("doc1", "hello world".to_string(), Default::default(), None, None).unwrap();
//! let current = db.get("doc1").unwrap();
//! assert!(current.is_some());
//! ```

pub mod embedding;
pub mod error;
pub mod mermaid;
pub mod model;
pub mod search;
pub mod store;
pub mod tags;
pub mod temporal;
pub mod traversal;

mod fts;
#[cfg(feature = "vector")]
mod vector;

pub use embedding::EmbeddingProvider;
pub use error::{Error, Result};
pub use model::*;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use store::Store;

/// The engine: `Store` plus the optional embedding provider used by `put`
/// and `rebuild_search_index`. This is the single entry point applications
/// construct, the same role the teacher's `TemporalGraph` plays for its
/// domain.
pub struct Engine {
    store: Store,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Engine {
    pub fn open(path: &str) -> Result<Self> {
        Ok(Self {
            store: Store::open(path)?,
            embedder: None,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            embedder: None,
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn embedder_ref(&self) -> Option<&dyn EmbeddingProvider> {
        self.embedder.as_deref()
    }

    // -- temporal engine --------------------------------------------------

    pub fn put(
        &self,
        id: &str,
        content: String,
        metadata: RichMetadata,
        node_type: Option<String>,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<Node> {
        temporal::put(
            &self.store,
            self.embedder_ref(),
            id,
            content,
            metadata,
            node_type,
            valid_from,
        )
    }

    pub fn get(&self, id: &str) -> Result<Option<Node>> {
        temporal::get(&self.store, id)
    }

    pub fn get_at(&self, id: &str, at: DateTime<Utc>) -> Result<Option<Node>> {
        temporal::get_at(&self.store, id, at)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn put_edge(
        &self,
        from: &str,
        to: &str,
        relation: Option<String>,
        weight: Option<f64>,
        metadata: RichMetadata,
        temporal_weight: Option<f64>,
        valid_from: Option<DateTime<Utc>>,
    ) -> Result<Edge> {
        temporal::put_edge(
            &self.store,
            from,
            to,
            relation,
            weight,
            metadata,
            temporal_weight,
            valid_from,
        )
    }

    pub fn delete_hard(&self, id: &str) -> Result<()> {
        temporal::delete_hard(&self.store, id)
    }

    pub fn snapshot(&self, at: DateTime<Utc>) -> Result<(Vec<Node>, Vec<Edge>)> {
        temporal::snapshot(&self.store, at)
    }

    pub fn timeline(&self, id: &str) -> Result<Vec<TimelineEntry>> {
        temporal::timeline(&self.store, id)
    }

    pub fn diff(&self, id: &str, v1: u64, v2: u64) -> Result<VersionDiff> {
        temporal::diff(&self.store, id, v1, v2)
    }

    pub fn list_documents(&self, limit: Option<usize>) -> Result<Vec<Node>> {
        self.store.list_current_nodes(limit)
    }

    /// `get_created_between` — `version == 1` rows whose `valid_from` falls
    /// in `[start, end]`.
    pub fn created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        Ok(self
            .store
            .all_versions()?
            .into_iter()
            .filter(|n| n.version == 1 && n.valid_from >= start && n.valid_from <= end)
            .collect())
    }

    /// `get_modified_between` — `version > 1` rows whose `valid_from` falls
    /// in `[start, end]`.
    pub fn modified_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        Ok(self
            .store
            .all_versions()?
            .into_iter()
            .filter(|n| n.version > 1 && n.valid_from >= start && n.valid_from <= end)
            .collect())
    }

    /// `get_deleted_between` — terminal rows (no successor, per the
    /// timeline event-classification rule) whose `valid_until` falls in
    /// `[start, end]`.
    pub fn deleted_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Node>> {
        let all = self.store.all_versions()?;
        let mut max_version: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        for node in &all {
            let entry = max_version.entry(node.id.clone()).or_insert(0);
            *entry = (*entry).max(node.version);
        }
        Ok(all
            .into_iter()
            .filter(|n| {
                n.valid_until.is_some_and(|u| u >= start && u <= end)
                    && max_version.get(n.id.as_str()) == Some(&n.version)
            })
            .collect())
    }

    // -- traversal ----------------------------------------------------------

    pub fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        query: &traversal::NeighborsQuery,
    ) -> Result<Vec<NeighborResult>> {
        traversal::neighbors(&self.store, id, direction, query)
    }

    pub fn find_path(
        &self,
        from: &str,
        to: &str,
        max_depth: usize,
        at_time: Option<DateTime<Utc>>,
    ) -> Result<Option<GraphPath>> {
        traversal::path(&self.store, from, to, max_depth, at_time)
    }

    pub fn explore(&self, params: &traversal::ExploreParams) -> Result<traversal::ExploreResult> {
        traversal::explore(&self.store, params)
    }

    pub fn map(&self, params: &traversal::MapParams) -> Result<traversal::MapResult> {
        traversal::map(&self.store, params)
    }

    pub fn render_mermaid(&self, nodes: &[Node], edges: &[Edge]) -> String {
        mermaid::render(nodes, edges)
    }

    // -- search ---------------------------------------------------------

    pub fn search_content(&self, query: &str, limit: usize) -> Result<Vec<Node>> {
        search::search_content(&self.store, query, limit)
    }

    pub fn search(
        &self,
        query: Option<&str>,
        filters: MetadataFilter,
        limit: usize,
        sort_by: search::SortBy,
        sort_order: search::SortOrder,
    ) -> Result<Vec<Node>> {
        search::smart_search(&self.store, query, filters, limit, sort_by, sort_order)
    }

    #[cfg(feature = "vector")]
    pub fn find_similar(&self, id: &str, limit: usize) -> Result<Vec<(Node, f32)>> {
        search::find_similar(&self.store, id, limit)
    }

    #[cfg(not(feature = "vector"))]
    pub fn find_similar(&self, _id: &str, _limit: usize) -> Result<Vec<(Node, f32)>> {
        Err(Error::VectorUnavailable(
            "built without the \"vector\" feature".to_string(),
        ))
    }

    /// Re-derives every current document's embedding via the configured
    /// `EmbeddingProvider`, replacing both the redb table and the in-memory
    /// vector cache. No-op (returns 0) when no provider is configured.
    #[cfg(feature = "vector")]
    pub fn rebuild_search_index(&self) -> Result<usize> {
        match &self.embedder {
            Some(embedder) => {
                let embedder = embedder.clone();
                self.store.reindex_embeddings(move |text| embedder.embed(text))
            }
            None => Ok(0),
        }
    }

    #[cfg(not(feature = "vector"))]
    pub fn rebuild_search_index(&self) -> Result<usize> {
        Ok(0)
    }

    // -- tags -------------------------------------------------------------

    pub fn tag_add(&self, target: tags::TagTarget, new_tags: &[String]) -> Result<usize> {
        tags::add(&self.store, target, new_tags)
    }

    pub fn tag_remove(&self, target: tags::TagTarget, tags: &[String]) -> Result<usize> {
        tags::remove(&self.store, target, tags)
    }

    pub fn tag_rename(&self, from: &str, to: &str) -> Result<usize> {
        tags::rename(&self.store, from, to)
    }

    pub fn tag_list(&self) -> Result<Vec<(String, usize)>> {
        tags::list(&self.store)
    }

    pub fn tag_get(&self, id: &str) -> Result<Vec<String>> {
        tags::get(&self.store, id)
    }

    pub fn metadata_stats(&self) -> Result<MetadataStats> {
        tags::stats(&self.store)
    }

    // -- integrity --------------------------------------------------------

    /// Counts for the facade's `check_integrity`: edges referencing a
    /// missing endpoint, and nodes with a dangling `supersedes` id.
    pub fn integrity_counts(&self) -> Result<(usize, usize, usize)> {
        let nodes = self.store.all_current_nodes()?;
        let node_ids: std::collections::HashSet<&str> =
            nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = self.store.all_edges()?;

        let inconsistent_edges = edges
            .iter()
            .filter(|e| !node_ids.contains(e.from_node.as_str()) || !node_ids.contains(e.to_node.as_str()))
            .count();

        let orphaned_nodes = nodes
            .iter()
            .filter(|n| {
                !edges.iter().any(|e| e.from_node == n.id || e.to_node == n.id)
            })
            .count();

        let missing_documents = nodes
            .iter()
            .filter(|n| {
                n.supersedes
                    .as_ref()
                    .is_some_and(|s| !node_ids.contains(s.as_str()))
            })
            .count();

        Ok((orphaned_nodes, missing_documents, inconsistent_edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_metadata() {
        let engine = Engine::open_in_memory().unwrap();
        let mut meta = RichMetadata::new();
        meta.set_tags(vec!["a".into(), "b".into()]);
        engine.put("doc1", "content".into(), meta.clone(), None, None).unwrap();
        let got = engine.get("doc1").unwrap().unwrap();
        assert_eq!(got.metadata.tags(), meta.tags());
    }

    #[test]
    fn stats_report_zero_for_empty_graph() {
        let engine = Engine::open_in_memory().unwrap();
        let (orphaned, missing, inconsistent) = engine.integrity_counts().unwrap();
        assert_eq!((orphaned, missing, inconsistent), (0, 0, 0));
    }
}
