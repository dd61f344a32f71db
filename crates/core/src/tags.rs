//! Tag & metadata operations (spec §4.5). All act on current rows only and
//! mutate the JSON payload in place — the documented divergence from the
//! append-only versioning model (see DESIGN.md).

use crate::error::{Error, Result, MAX_BULK_DOCUMENTS};
use crate::model::{MetadataFilter, MetadataStats, Node};
use crate::store::Store;
use std::collections::BTreeSet;

/// `document_id | document_filter` — the two ways bulk tag operations select
/// their targets.
pub enum TagTarget {
    Id(String),
    Filter(MetadataFilter),
}

fn resolve_targets(store: &Store, target: &TagTarget) -> Result<Vec<Node>> {
    match target {
        TagTarget::Id(id) => Ok(store.get_current_node(id)?.into_iter().collect()),
        TagTarget::Filter(filter) => {
            let mut nodes = store.all_current_nodes()?;
            if let Some(content) = &filter.content {
                let needle = content.to_lowercase();
                nodes.retain(|n| n.content.to_lowercase().contains(&needle));
            }
            nodes.retain(|n| filter.matches(&n.metadata_with_type_folded()));
            if nodes.len() > MAX_BULK_DOCUMENTS {
                return Err(Error::BulkLimitExceeded(nodes.len()));
            }
            Ok(nodes)
        }
    }
}

/// `add(document_id | document_filter, tags[])` — union, order preserved,
/// duplicates dropped.
pub fn add(store: &Store, target: TagTarget, tags: &[String]) -> Result<usize> {
    let nodes = resolve_targets(store, &target)?;
    let mut updated = 0;
    for node in nodes {
        let mut meta = node.metadata.clone();
        let mut current = meta.tags();
        for tag in tags {
            if !current.contains(tag) {
                current.push(tag.clone());
            }
        }
        meta.set_tags(current);
        if store.update_current_metadata(&node.id, meta)? {
            updated += 1;
        }
    }
    Ok(updated)
}

/// `remove(document_id | document_filter, tags[])` — set difference.
pub fn remove(store: &Store, target: TagTarget, tags: &[String]) -> Result<usize> {
    let nodes = resolve_targets(store, &target)?;
    let mut updated = 0;
    for node in nodes {
        let mut meta = node.metadata.clone();
        let current: Vec<String> = meta
            .tags()
            .into_iter()
            .filter(|t| !tags.contains(t))
            .collect();
        meta.set_tags(current);
        if store.update_current_metadata(&node.id, meta)? {
            updated += 1;
        }
    }
    Ok(updated)
}

/// `rename({from, to})` — replaces `from` with `to` in every document's tag
/// list that contains it. Returns the number of documents updated.
pub fn rename(store: &Store, from: &str, to: &str) -> Result<usize> {
    let mut nodes = store.all_current_nodes()?;
    nodes.retain(|n| n.metadata.tags().iter().any(|t| t == from));
    let mut updated = 0;
    for node in nodes {
        let mut meta = node.metadata.clone();
        let renamed: Vec<String> = meta
            .tags()
            .into_iter()
            .map(|t| if t == from { to.to_string() } else { t })
            .collect();
        meta.set_tags(renamed);
        if store.update_current_metadata(&node.id, meta)? {
            updated += 1;
        }
    }
    Ok(updated)
}

/// `list` — `{tag, count}` over current documents, sorted by count
/// descending (ties broken alphabetically for a stable order).
pub fn list(store: &Store) -> Result<Vec<(String, usize)>> {
    let nodes = store.all_current_nodes()?;
    let mut counts = std::collections::BTreeMap::new();
    for node in &nodes {
        for tag in node.metadata.tags() {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(entries)
}

/// `get(document_id)` — the tags list or `[]`.
pub fn get(store: &Store, id: &str) -> Result<Vec<String>> {
    Ok(store
        .get_current_node(id)?
        .map(|n| n.metadata.tags())
        .unwrap_or_default())
}

/// `stats()` — aggregate tag/keyword/emoji/type counts and deduplicated
/// hierarchical paths joined by `/`.
pub fn stats(store: &Store) -> Result<MetadataStats> {
    let nodes = store.all_current_nodes()?;
    let mut stats = MetadataStats::default();
    let mut paths = BTreeSet::new();

    for node in &nodes {
        let meta = node.metadata_with_type_folded();
        for tag in meta.tags() {
            *stats.tag_counts.entry(tag).or_insert(0) += 1;
        }
        for keyword in meta.keywords() {
            *stats.keyword_counts.entry(keyword).or_insert(0) += 1;
        }
        if let Some(emoji) = meta.get_str("emoji") {
            *stats.emoji_counts.entry(emoji.to_string()).or_insert(0) += 1;
        }
        *stats.type_counts.entry(node.node_type.clone()).or_insert(0) += 1;
        let path = meta.path();
        if !path.is_empty() {
            paths.insert(path.join("/"));
        }
    }
    stats.paths = paths.into_iter().collect();
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RichMetadata;
    use crate::temporal;

    #[test]
    fn scenario_e_rename() {
        let store = Store::open_in_memory().unwrap();
        let mut m1 = RichMetadata::new();
        m1.set_tags(vec!["draft".into()]);
        temporal::put(&store, None, "d1", "one".into(), m1, None, None).unwrap();
        let mut m2 = RichMetadata::new();
        m2.set_tags(vec!["draft".into(), "legal".into()]);
        temporal::put(&store, None, "d2", "two".into(), m2, None, None).unwrap();

        let updated = rename(&store, "draft", "final").unwrap();
        assert_eq!(updated, 2);

        assert!(!get(&store, "d1").unwrap().contains(&"draft".to_string()));
        assert!(get(&store, "d1").unwrap().contains(&"final".to_string()));
        assert!(get(&store, "d2").unwrap().contains(&"final".to_string()));
        assert!(!get(&store, "d2").unwrap().contains(&"draft".to_string()));
    }

    #[test]
    fn add_is_idempotent_on_duplicates() {
        let store = Store::open_in_memory().unwrap();
        let mut meta = RichMetadata::new();
        meta.set_tags(vec!["a".into()]);
        temporal::put(&store, None, "d1", "x".into(), meta, None, None).unwrap();

        add(&store, TagTarget::Id("d1".into()), &["a".to_string(), "b".to_string()]).unwrap();
        let tags = get(&store, "d1").unwrap();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn tag_mutation_does_not_bump_version() {
        let store = Store::open_in_memory().unwrap();
        temporal::put(&store, None, "d1", "x".into(), RichMetadata::new(), None, None).unwrap();
        add(&store, TagTarget::Id("d1".into()), &["a".to_string()]).unwrap();
        let node = store.get_current_node("d1").unwrap().unwrap();
        assert_eq!(node.version, 1);
    }

    #[test]
    fn list_sorted_by_count_desc() {
        let store = Store::open_in_memory().unwrap();
        for (id, tags) in [("d1", vec!["a", "b"]), ("d2", vec!["a"]), ("d3", vec!["a", "b"])] {
            let mut meta = RichMetadata::new();
            meta.set_tags(tags.into_iter().map(str::to_string).collect());
            temporal::put(&store, None, id, "x".into(), meta, None, None).unwrap();
        }
        let counts = list(&store).unwrap();
        assert_eq!(counts[0], ("a".to_string(), 3));
        assert_eq!(counts[1], ("b".to_string(), 2));
    }
}
