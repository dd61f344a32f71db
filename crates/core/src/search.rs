//! Full-text search, smart search (text + metadata filter composition), and
//! similarity search (spec §4.4).

#[cfg(feature = "vector")]
use crate::error::Error;
use crate::error::Result;
use crate::fts;
use crate::model::{MetadataFilter, Node};
use crate::store::Store;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortBy {
    #[default]
    CreatedAt,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// `searchContent(query, limit)` — FTS with a substring-scan fallback on
/// `MalformedQuery`.
pub fn search_content(store: &Store, query: &str, limit: usize) -> Result<Vec<Node>> {
    let nodes = store.all_current_nodes()?;
    let ids = match fts::search_ids(&nodes, query, limit) {
        Ok(ids) => ids,
        Err(_) => fts::substring_search(&nodes, query, limit),
    };
    Ok(hydrate(&nodes, &ids))
}

fn hydrate(nodes: &[Node], ids: &[String]) -> Vec<Node> {
    let by_id: std::collections::HashMap<&str, &Node> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    ids.iter()
        .filter_map(|id| by_id.get(id.as_str()).cloned().cloned())
        .collect()
}

/// `search({query?, filters?, limit?, sort_by?, sort_order?})`.
pub fn smart_search(
    store: &Store,
    query: Option<&str>,
    filters: MetadataFilter,
    limit: usize,
    sort_by: SortBy,
    sort_order: SortOrder,
) -> Result<Vec<Node>> {
    let all_current = store.all_current_nodes()?;

    let mut candidates: Vec<Node> = match query {
        Some(q) if !q.trim().is_empty() => {
            let ids = match fts::search_ids(&all_current, q, all_current.len().max(1)) {
                Ok(ids) => ids,
                Err(_) => fts::substring_search(&all_current, q, all_current.len().max(1)),
            };
            hydrate(&all_current, &ids)
        }
        _ => all_current,
    };

    candidates.retain(|n| filters.matches(&n.metadata_with_type_folded()));

    candidates.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::CreatedAt => a.created_at.cmp(&b.created_at),
            SortBy::Id => a.id.cmp(&b.id),
        };
        match sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    candidates.truncate(if limit == 0 { 10 } else { limit });
    Ok(candidates)
}

/// `findSimilar(id, limit)`.
#[cfg(feature = "vector")]
pub fn find_similar(store: &Store, id: &str, limit: usize) -> Result<Vec<(Node, f32)>> {
    if !store.has_embeddings() {
        return Err(Error::VectorUnavailable(
            "vector index has no entries".to_string(),
        ));
    }
    let query = store.embedding_for(id).ok_or_else(|| {
        Error::VectorUnavailable(format!("no embedding stored for '{id}'"))
    })?;

    let current = store.all_current_nodes()?;
    let allowed: HashSet<String> = current.iter().map(|n| n.id.clone()).collect();
    let hits = store
        .vector_index
        .lock()
        .unwrap()
        .search(&query, limit, &allowed, Some(id))?;

    let by_id: std::collections::HashMap<&str, &Node> =
        current.iter().map(|n| (n.id.as_str(), n)).collect();
    Ok(hits
        .into_iter()
        .filter_map(|(hit_id, score)| by_id.get(hit_id.as_str()).map(|n| ((*n).clone(), score)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(feature = "vector")]
    use crate::embedding::{EmbeddingProvider, HashedBagOfWords};
    use crate::model::RichMetadata;
    use crate::temporal;

    #[test]
    fn scenario_d_smart_search_tags() {
        let store = Store::open_in_memory().unwrap();
        let mut m1 = RichMetadata::new();
        m1.set_tags(vec!["legal".into(), "contract".into()]);
        temporal::put(&store, None, "d1", "one".into(), m1, None, None).unwrap();

        let mut m2 = RichMetadata::new();
        m2.set_tags(vec!["urgent".into(), "email".into()]);
        temporal::put(&store, None, "d2", "two".into(), m2, None, None).unwrap();

        let mut m3 = RichMetadata::new();
        m3.set_tags(vec!["legal".into(), "meeting".into()]);
        temporal::put(&store, None, "d3", "three".into(), m3, None, None).unwrap();

        let filter = MetadataFilter {
            tags: Some(vec!["legal".to_string()]),
            ..Default::default()
        };
        let results = smart_search(&store, None, filter, 10, SortBy::CreatedAt, SortOrder::Desc).unwrap();
        let ids: HashSet<String> = results.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, HashSet::from(["d1".to_string(), "d3".to_string()]));
    }

    #[test]
    #[cfg(feature = "vector")]
    fn find_similar_without_index_errors() {
        let store = Store::open_in_memory().unwrap();
        temporal::put(&store, None, "a", "hello".into(), RichMetadata::new(), None, None).unwrap();
        assert!(matches!(
            find_similar(&store, "a", 5),
            Err(Error::VectorUnavailable(_))
        ));
    }

    #[test]
    #[cfg(feature = "vector")]
    fn find_similar_excludes_query_and_is_deterministic() {
        let store = Store::open_in_memory().unwrap();
        let embedder = HashedBagOfWords::new(32);
        for (id, text) in [
            ("a", "cats and dogs"),
            ("b", "cats and birds"),
            ("c", "spacecraft engineering"),
        ] {
            let node = temporal::put(
                &store,
                Some(&embedder as &dyn EmbeddingProvider),
                id,
                text.into(),
                RichMetadata::new(),
                None,
                None,
            )
            .unwrap();
            let _ = node;
        }

        let first = find_similar(&store, "a", 2).unwrap();
        let second = find_similar(&store, "a", 2).unwrap();
        assert_eq!(
            first.iter().map(|(n, _)| n.id.clone()).collect::<Vec<_>>(),
            second.iter().map(|(n, _)| n.id.clone()).collect::<Vec<_>>()
        );
        assert!(first.iter().all(|(n, _)| n.id != "a"));
    }
}
