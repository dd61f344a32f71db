//! Versioning, as-of resolution, causality-gated edge creation, snapshots,
//! timelines, and version diffs (spec §4.2).
//!
//! Free functions over `&Store` rather than a stateful struct, the same
//! shape the teacher's `TemporalGraph` inherent methods take — there is no
//! separate "temporal engine" object in the teacher, versioning is just
//! more methods on the one storage type. Here the split exists only to keep
//! `store.rs` to row access while this module holds the versioning and
//! causality rules layered on top.

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result, MAX_CONTENT_BYTES};
use crate::model::{Node, RichMetadata, TimelineEntry, TimelineEvent, VersionDiff};
use crate::store::Store;
use chrono::{DateTime, Utc};

/// `put(id, content, metadata, valid_from?)` — spec §4.2.
pub fn put(
    store: &Store,
    embedder: Option<&dyn EmbeddingProvider>,
    id: &str,
    content: String,
    metadata: RichMetadata,
    node_type: Option<String>,
    valid_from: Option<DateTime<Utc>>,
) -> Result<Node> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(Error::ContentTooLarge(content.len()));
    }

    let t = valid_from.unwrap_or_else(Utc::now);
    let previous = store.get_current_node(id)?;
    let (version, supersedes) = match &previous {
        Some(prev) => (prev.version + 1, Some(id.to_string())),
        None => (1, None),
    };

    let node = Node {
        id: id.to_string(),
        version,
        node_type: node_type.unwrap_or_else(|| "content".to_string()),
        content,
        metadata,
        created_at: Utc::now(),
        valid_from: t,
        valid_until: None,
        supersedes,
    };

    store.put_node(&node)?;

    #[cfg(feature = "vector")]
    if let Some(embedder) = embedder {
        let embedding = embedder.embed(&node.content);
        if !embedding.is_empty() {
            // Outside the row transaction per spec §4.1/§9: a failed upsert
            // here leaves the node row intact, only similarity search for
            // this id is affected until `rebuild_search_index` runs.
            if let Err(e) = store.put_embedding(&node.id, &embedding) {
                tracing::warn!(id = %node.id, error = %e, "embedding upsert failed");
            }
        }
    }
    #[cfg(not(feature = "vector"))]
    let _ = embedder;

    Ok(node)
}

/// `getAt(id, t)` — highest version with `valid_from <= t` and
/// (`valid_until` is null or `valid_until > t`).
pub fn get_at(store: &Store, id: &str, t: DateTime<Utc>) -> Result<Option<Node>> {
    let versions = store.list_versions(id)?;
    Ok(versions
        .into_iter()
        .filter(|n| n.valid_from <= t && n.valid_until.is_none_or(|u| u > t))
        .max_by_key(|n| n.version))
}

/// `get(id)` — `getAt` with `t = +inf`, i.e. the current row.
pub fn get(store: &Store, id: &str) -> Result<Option<Node>> {
    store.get_current_node(id)
}

/// `putEdge(from, to, relation, weight, metadata, valid_from?)` — spec §4.2.
/// Edge history is not retained in this implementation (see DESIGN.md); this
/// is a strict upsert on `(from, to)`.
#[allow(clippy::too_many_arguments)]
pub fn put_edge(
    store: &Store,
    from: &str,
    to: &str,
    relation: Option<String>,
    weight: Option<f64>,
    metadata: RichMetadata,
    temporal_weight: Option<f64>,
    valid_from: Option<DateTime<Utc>>,
) -> Result<crate::model::Edge> {
    let t = valid_from.unwrap_or_else(Utc::now);

    let from_node = get_at(store, from, t)?
        .ok_or_else(|| Error::TemporalViolation(format!("source '{from}' does not exist at {t}")))?;
    let to_node = get_at(store, to, t)?
        .ok_or_else(|| Error::TemporalViolation(format!("target '{to}' does not exist at {t}")))?;

    if t < from_node.valid_from || t < to_node.valid_from {
        return Err(Error::CausalityViolation(format!(
            "edge valid_from {t} precedes an endpoint's valid_from"
        )));
    }

    let existing = store.get_edge(from, to)?;
    let edge = crate::model::Edge {
        from_node: from.to_string(),
        to_node: to.to_string(),
        relation: relation.unwrap_or_else(|| "related".to_string()),
        weight: weight.unwrap_or(1.0),
        metadata,
        created_at: existing.map(|e| e.created_at).unwrap_or_else(Utc::now),
        valid_from: t,
        valid_until: None,
        temporal_weight: temporal_weight.unwrap_or(1.0),
    };
    store.put_edge(&edge)?;
    Ok(edge)
}

/// `deleteHard(id)` — removes every version and every incident edge.
pub fn delete_hard(store: &Store, id: &str) -> Result<()> {
    store.delete_node_all(id)
}

/// `snapshot(t)` — nodes and edges whose validity interval contains `t`.
pub fn snapshot(store: &Store, t: DateTime<Utc>) -> Result<(Vec<Node>, Vec<crate::model::Edge>)> {
    use std::collections::HashMap;

    let mut by_id: HashMap<String, Node> = HashMap::new();
    for node in store.all_versions()? {
        if node.was_valid_at(t) {
            by_id
                .entry(node.id.clone())
                .and_modify(|existing| {
                    if node.version > existing.version {
                        *existing = node.clone();
                    }
                })
                .or_insert(node);
        }
    }
    let nodes: Vec<Node> = by_id.into_values().collect();
    let edges: Vec<crate::model::Edge> = store
        .all_edges()?
        .into_iter()
        .filter(|e| e.was_valid_at(t))
        .collect();
    Ok((nodes, edges))
}

/// `timeline(id)` — spec §4.2 plus the successor-lookup correction from §9
/// Design Notes: an entry is `deleted` only if no higher-versioned row
/// exists for the same id, never inferred from `valid_until` alone.
pub fn timeline(store: &Store, id: &str) -> Result<Vec<TimelineEntry>> {
    let mut versions = store.list_versions(id)?;
    versions.sort_by_key(|n| n.valid_from);

    let max_version = versions.iter().map(|n| n.version).max().unwrap_or(0);
    let mut entries = Vec::with_capacity(versions.len());

    for (i, node) in versions.iter().enumerate() {
        let event = if node.version == 1 {
            TimelineEvent::Created
        } else if node.valid_until.is_some() && node.version == max_version {
            TimelineEvent::Deleted
        } else {
            TimelineEvent::Updated
        };

        let changes = if node.version == 1 {
            vec!["Initial version".to_string()]
        } else {
            let prior = &versions[i - 1];
            diff_changes(prior, node)
        };

        entries.push(TimelineEntry {
            timestamp: node.valid_from,
            event,
            version: node.version,
            content_preview: preview(&node.content),
            changes,
        });
    }
    Ok(entries)
}

fn preview(content: &str) -> String {
    const MAX: usize = 120;
    if content.chars().count() <= MAX {
        content.to_string()
    } else {
        let truncated: String = content.chars().take(MAX).collect();
        format!("{truncated}...")
    }
}

fn diff_changes(prior: &Node, current: &Node) -> Vec<String> {
    let mut changes = Vec::new();
    if prior.content != current.content {
        changes.push("Content modified".to_string());
    }

    let prior_meta = prior.metadata_with_type_folded();
    let cur_meta = current.metadata_with_type_folded();

    if prior_meta.tags() != cur_meta.tags() {
        changes.push("Tags updated".to_string());
    }
    if let (Some(a), Some(b)) = (prior_meta.get_str("status"), cur_meta.get_str("status")) {
        if a != b {
            changes.push(format!("Status: {a} -> {b}"));
        }
    } else if prior_meta.get_str("status") != cur_meta.get_str("status") {
        changes.push("status changed".to_string());
    }
    if let (Some(a), Some(b)) = (prior_meta.get_str("type"), cur_meta.get_str("type")) {
        if a != b {
            changes.push(format!("Type: {a} -> {b}"));
        }
    } else if prior_meta.get_str("type") != cur_meta.get_str("type") {
        changes.push("type changed".to_string());
    }

    for key in ["keywords", "path", "emoji", "author", "date", "vocabulary", "map"] {
        if prior_meta.0.get(key) != cur_meta.0.get(key) {
            changes.push(format!("{key} changed"));
        }
    }

    if changes.is_empty() {
        vec!["Minor update".to_string()]
    } else {
        changes
    }
}

/// `diff(id, v1, v2)` — structural delta between two versions.
pub fn diff(store: &Store, id: &str, v1: u64, v2: u64) -> Result<VersionDiff> {
    let node1 = store
        .get_node(id, v1)?
        .ok_or_else(|| Error::NotFound(format!("{id}@v{v1}")))?;
    let node2 = store
        .get_node(id, v2)?
        .ok_or_else(|| Error::NotFound(format!("{id}@v{v2}")))?;

    let content_changed = node1.content != node2.content;
    let v1_length = node1.content.len();
    let v2_length = node2.content.len();
    let length_change = v2_length as i64 - v1_length as i64;

    let meta1 = node1.metadata_with_type_folded();
    let meta2 = node2.metadata_with_type_folded();
    let mut keys: std::collections::BTreeSet<String> =
        meta1.0.keys().cloned().collect();
    keys.extend(meta2.0.keys().cloned());
    let changed_metadata_keys: Vec<String> = keys
        .into_iter()
        .filter(|k| meta1.0.get(k) != meta2.0.get(k))
        .collect();

    Ok(VersionDiff {
        v1: node1,
        v2: node2,
        content_changed,
        length_change,
        v1_length,
        v2_length,
        changed_metadata_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn scenario_a_versioning() {
        let store = Store::open_in_memory().unwrap();
        put(
            &store,
            None,
            "doc1",
            "V1".into(),
            {
                let mut m = RichMetadata::new();
                m.set_tags(vec!["draft".into()]);
                m
            },
            None,
            Some(ts("2024-01-01T00:00:00Z")),
        )
        .unwrap();
        put(
            &store,
            None,
            "doc1",
            "V2".into(),
            {
                let mut m = RichMetadata::new();
                m.set_tags(vec!["draft".into(), "reviewed".into()]);
                m
            },
            None,
            Some(ts("2024-02-01T00:00:00Z")),
        )
        .unwrap();

        let current = get(&store, "doc1").unwrap().unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(
            get_at(&store, "doc1", ts("2024-01-15T00:00:00Z"))
                .unwrap()
                .unwrap()
                .content,
            "V1"
        );
        assert_eq!(
            get_at(&store, "doc1", ts("2024-02-15T00:00:00Z"))
                .unwrap()
                .unwrap()
                .content,
            "V2"
        );

        let tl = timeline(&store, "doc1").unwrap();
        assert_eq!(tl.len(), 2);
        assert_eq!(tl[0].event, TimelineEvent::Created);
        assert_eq!(tl[1].event, TimelineEvent::Updated);
        assert!(tl[1].changes.contains(&"Content modified".to_string()));
        assert!(tl[1].changes.contains(&"Tags updated".to_string()));
    }

    #[test]
    fn scenario_b_causality() {
        let store = Store::open_in_memory().unwrap();
        put(&store, None, "doc1", "a".into(), RichMetadata::new(), None, Some(ts("2024-01-15T00:00:00Z"))).unwrap();
        put(&store, None, "doc2", "b".into(), RichMetadata::new(), None, Some(ts("2024-02-01T00:00:00Z"))).unwrap();

        let early = put_edge(&store, "doc1", "doc2", None, None, RichMetadata::new(), None, Some(ts("2024-01-20T00:00:00Z")));
        assert!(matches!(early, Err(Error::TemporalViolation(_))));

        let ok = put_edge(&store, "doc1", "doc2", None, None, RichMetadata::new(), None, Some(ts("2024-02-15T00:00:00Z")));
        assert!(ok.is_ok());
    }

    #[test]
    fn put_is_not_idempotent() {
        let store = Store::open_in_memory().unwrap();
        put(&store, None, "doc1", "same".into(), RichMetadata::new(), None, None).unwrap();
        let second = put(&store, None, "doc1", "same".into(), RichMetadata::new(), None, None).unwrap();
        assert_eq!(second.version, 2);
    }

    #[test]
    fn duplicate_edge_updates_in_place() {
        let store = Store::open_in_memory().unwrap();
        put(&store, None, "a", "x".into(), RichMetadata::new(), None, None).unwrap();
        put(&store, None, "b", "y".into(), RichMetadata::new(), None, None).unwrap();
        put_edge(&store, "a", "b", Some("r1".into()), None, RichMetadata::new(), None, None).unwrap();
        put_edge(&store, "a", "b", Some("r2".into()), None, RichMetadata::new(), None, None).unwrap();
        let edge = store.get_edge("a", "b").unwrap().unwrap();
        assert_eq!(edge.relation, "r2");
        assert_eq!(store.edges_from("a").unwrap().len(), 1);
    }

    #[test]
    fn hard_delete_cascades_edges() {
        let store = Store::open_in_memory().unwrap();
        put(&store, None, "a", "x".into(), RichMetadata::new(), None, None).unwrap();
        put(&store, None, "b", "y".into(), RichMetadata::new(), None, None).unwrap();
        put_edge(&store, "a", "b", None, None, RichMetadata::new(), None, None).unwrap();
        delete_hard(&store, "a").unwrap();
        assert!(get(&store, "a").unwrap().is_none());
        assert!(store.edges_from("a").unwrap().is_empty());
        assert!(store.edges_to("b").unwrap().is_empty());
    }
}
