//! In-memory vector index for semantic similarity search.
//!
//! Flat (brute-force) cosine similarity over pre-computed embeddings, the
//! same Phase 0 approach the teacher engine uses — no ANN structure, no
//! external dependencies beyond the raw math. Unlike a pure in-memory cache,
//! entries are also persisted as raw little-endian f32 bytes in a redb table
//! (see `store.rs`) so the index survives process restarts; this module
//! holds only the read-optimized view.
//!
//! Dimension mismatches and empty embeddings return `Error::VectorUnavailable`
//! instead of panicking, since a bad embedding from a caller must not take
//! down the node write that produced it.

use crate::error::{Error, Result};
use std::collections::HashSet;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    embedding: Vec<f32>,
}

/// Flat vector index keyed by node id.
#[derive(Debug, Default, Clone)]
pub struct VectorIndex {
    entries: Vec<Entry>,
    dim: Option<usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the embedding for `id`. Fails with
    /// `VectorUnavailable` if the embedding is empty or its dimension
    /// differs from the one established by the first insert.
    pub fn insert(&mut self, id: String, embedding: Vec<f32>) -> Result<()> {
        if embedding.is_empty() {
            return Err(Error::VectorUnavailable(
                "embedding must not be empty".into(),
            ));
        }
        match self.dim {
            None => self.dim = Some(embedding.len()),
            Some(d) if d != embedding.len() => {
                return Err(Error::VectorUnavailable(format!(
                    "embedding dimension mismatch: expected {d}, got {}",
                    embedding.len()
                )));
            }
            _ => {}
        }

        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.embedding = embedding;
        } else {
            self.entries.push(Entry { id, embedding });
        }
        Ok(())
    }

    /// Remove the entry for `id`, cascading on a hard delete. No-op if
    /// absent.
    pub fn remove(&mut self, id: &str) {
        if let Some(pos) = self.entries.iter().position(|e| e.id == id) {
            self.entries.swap_remove(pos);
        }
    }

    /// Top-`k` entries by cosine similarity to `query`, restricted to
    /// `allowed`. `exclude` is dropped from results (used by `find_similar`
    /// to exclude the query id itself).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        allowed: &HashSet<String>,
        exclude: Option<&str>,
    ) -> Result<Vec<(String, f32)>> {
        if let Some(d) = self.dim {
            if query.len() != d {
                return Err(Error::VectorUnavailable(format!(
                    "query dimension mismatch: index has dim {d}, query has {}",
                    query.len()
                )));
            }
        }

        if k == 0 || allowed.is_empty() || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query);
        if query_norm == 0.0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter(|e| allowed.contains(&e.id) && Some(e.id.as_str()) != exclude)
            .map(|e| (e.id.clone(), cosine_similarity(query, &e.embedding, query_norm)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn embedding_for(&self, id: &str) -> Option<Vec<f32>> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.embedding.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let b_norm = l2_norm(b);
    if b_norm == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (a_norm * b_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("doc{i}")).collect()
    }

    fn all(ids: &[String]) -> HashSet<String> {
        ids.iter().cloned().collect()
    }

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        let norm = l2_norm(&v);
        assert!((cosine_similarity(&v, &v, norm) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        let norm_a = l2_norm(&a);
        assert!((cosine_similarity(&a, &b, norm_a) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn insert_empty_embedding_errors() {
        let mut idx = VectorIndex::new();
        assert!(idx.insert("a".into(), vec![]).is_err());
    }

    #[test]
    fn insert_dimension_mismatch_errors() {
        let mut idx = VectorIndex::new();
        idx.insert("a".into(), vec![1.0, 0.0]).unwrap();
        assert!(idx.insert("b".into(), vec![1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn insert_replaces_existing_id() {
        let mut idx = VectorIndex::new();
        idx.insert("a".into(), vec![1.0, 0.0]).unwrap();
        idx.insert("a".into(), vec![0.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn search_returns_top_k_in_order() {
        let mut idx = VectorIndex::new();
        let id = ids(3);
        idx.insert(id[0].clone(), vec![1.0, 0.0, 0.0]).unwrap();
        idx.insert(id[1].clone(), vec![0.0, 1.0, 0.0]).unwrap();
        idx.insert(id[2].clone(), vec![-1.0, 0.0, 0.0]).unwrap();

        let valid = all(&id);
        let results = idx.search(&[1.0, 0.0, 0.0], 3, &valid, None).unwrap();
        assert_eq!(results[0].0, id[0]);
        assert_eq!(results[2].0, id[2]);
    }

    #[test]
    fn search_excludes_query_id() {
        let mut idx = VectorIndex::new();
        let id = ids(2);
        idx.insert(id[0].clone(), vec![1.0, 0.0]).unwrap();
        idx.insert(id[1].clone(), vec![1.0, 0.0]).unwrap();
        let valid = all(&id);
        let results = idx
            .search(&[1.0, 0.0], 5, &valid, Some(id[0].as_str()))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, id[1]);
    }

    #[test]
    fn search_respects_allowed_filter() {
        let mut idx = VectorIndex::new();
        let id = ids(3);
        for i in &id {
            idx.insert(i.clone(), vec![1.0, 0.0]).unwrap();
        }
        let valid: HashSet<String> = [id[0].clone(), id[2].clone()].into_iter().collect();
        let results = idx.search(&[1.0, 0.0], 10, &valid, None).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn search_zero_query_returns_empty() {
        let mut idx = VectorIndex::new();
        idx.insert("a".into(), vec![1.0, 0.0]).unwrap();
        let valid = all(&ids(1));
        let results = idx.search(&[0.0, 0.0], 5, &valid, None).unwrap();
        assert!(results.is_empty());
    }
}
