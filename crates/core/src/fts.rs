//! Full-text search over current node content.
//!
//! Builds an in-memory tantivy index at query time from the current rows —
//! the same "Phase 0: self-contained, validate relevance behavior first"
//! approach the teacher's `search()` takes, rather than maintaining a
//! persistent index alongside the redb tables. A future phase would persist
//! the tantivy index next to the database file; this keeps the storage
//! format simple until the access pattern has stabilized.

#[cfg(not(feature = "fulltext"))]
use crate::error::Error;
use crate::error::Result;
use crate::model::Node;

#[cfg(feature = "fulltext")]
use std::collections::HashMap;
#[cfg(feature = "fulltext")]
use tantivy::collector::TopDocs;
#[cfg(feature = "fulltext")]
use tantivy::query::{FuzzyTermQuery, QueryParser};
#[cfg(feature = "fulltext")]
use tantivy::schema::{Schema, Value as TantivyValueTrait, STORED, TEXT};
#[cfg(feature = "fulltext")]
use tantivy::{doc, Index, Term};

/// Runs `query` against an index built from `nodes`' content, falling back
/// to fuzzy matching (edit distance 1) when the exact query returns zero
/// hits — mirroring the teacher's typo-tolerant search. Returns ids in
/// relevance order.
#[cfg(feature = "fulltext")]
pub fn search_ids(nodes: &[Node], query: &str, limit: usize) -> Result<Vec<String>> {
    if query.trim().is_empty() || limit == 0 || nodes.is_empty() {
        return Ok(Vec::new());
    }

    let mut schema_builder = Schema::builder();
    let id_field = schema_builder.add_text_field("id", STORED);
    let content_field = schema_builder.add_text_field("content", TEXT | STORED);
    let schema = schema_builder.build();

    let index = Index::create_in_ram(schema);
    let mut writer = index.writer(15_000_000)?;
    for node in nodes {
        writer.add_document(doc!(
            id_field => node.id.as_str(),
            content_field => node.content.as_str(),
        ))?;
    }
    writer.commit()?;

    let reader = index.reader()?;
    let searcher = reader.searcher();
    let parser = QueryParser::for_index(&index, vec![content_field]);
    let parsed = parser.parse_query(query)?;
    let mut top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

    if top_docs.is_empty() {
        let fuzzy = build_fuzzy_query(query, content_field);
        top_docs = searcher.search(&fuzzy, &TopDocs::with_limit(limit))?;
    }

    let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut results = Vec::new();
    for (_score, addr) in top_docs {
        let retrieved = searcher.doc::<tantivy::schema::TantivyDocument>(addr)?;
        if let Some(id_val) = retrieved.get_first(id_field).and_then(|v| v.as_str()) {
            if by_id.contains_key(id_val) {
                results.push(id_val.to_string());
            }
        }
    }
    Ok(results)
}

#[cfg(feature = "fulltext")]
fn build_fuzzy_query(
    query: &str,
    content_field: tantivy::schema::Field,
) -> Box<dyn tantivy::query::Query> {
    let first_term = query.split_whitespace().next().unwrap_or(query);
    let term = Term::from_field_text(content_field, first_term);
    Box::new(FuzzyTermQuery::new(term, 1, true))
}

#[cfg(not(feature = "fulltext"))]
pub fn search_ids(_nodes: &[Node], _query: &str, _limit: usize) -> Result<Vec<String>> {
    Err(Error::MalformedQuery(
        "fulltext feature is disabled for this build".to_string(),
    ))
}

/// Substring scan over current content, ordered by `created_at` descending.
/// The `MalformedQuery` fallback path for `searchContent` (spec §4.4).
pub fn substring_search(nodes: &[Node], query: &str, limit: usize) -> Vec<String> {
    let needle = query.to_lowercase();
    let mut matches: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.content.to_lowercase().contains(&needle))
        .collect();
    matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    matches.into_iter().take(limit).map(|n| n.id.clone()).collect()
}

#[cfg(all(test, feature = "fulltext"))]
mod tests {
    use super::*;
    use crate::model::RichMetadata;
    use chrono::Utc;

    fn node(id: &str, content: &str) -> Node {
        Node {
            id: id.to_string(),
            version: 1,
            node_type: "content".to_string(),
            content: content.to_string(),
            metadata: RichMetadata::new(),
            created_at: Utc::now(),
            valid_from: Utc::now(),
            valid_until: None,
            supersedes: None,
        }
    }

    #[test]
    fn exact_match_found() {
        let nodes = vec![node("a", "the quick brown fox"), node("b", "lorem ipsum")];
        let ids = search_ids(&nodes, "quick", 10).unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn fuzzy_fallback_on_typo() {
        let nodes = vec![node("a", "alice works at acme")];
        let ids = search_ids(&nodes, "alcie", 10).unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn empty_query_returns_empty() {
        let nodes = vec![node("a", "hello")];
        assert!(search_ids(&nodes, "", 10).unwrap().is_empty());
    }

    #[test]
    fn substring_fallback_matches_case_insensitively() {
        let nodes = vec![node("a", "Hello World")];
        let ids = substring_search(&nodes, "hello", 10);
        assert_eq!(ids, vec!["a".to_string()]);
    }
}
