//! Row-level persistence: node versions, edges, the id→current-version
//! pointer, and the raw embedding bytes backing the vector index. Hides the
//! embedded engine (redb) from the rest of the crate.
//!
//! Table layout mirrors the spec's logical schema (§4.1), realized as redb
//! `TableDefinition`s plus the auxiliary ordering/secondary tables redb's
//! lack of native secondary indices requires:
//!
//! - `NODE_VERSIONS` — composite key `"{id}\0{version:020}"`, one row per
//!   `(id, version)`, primary key per spec.
//! - `NODE_CURRENT` — `id -> version`, an index over the common "get current
//!   row" access path (the teacher's own `fact_by_id` documents this exact
//!   index as its Phase 1 follow-up; this store takes that step).
//! - `NODES_BY_CREATED` — `"{created_at_nanos:020}\0{id}" -> id`, the
//!   `(created_at DESC)` index `list_documents` needs.
//! - `EDGES` / `EDGES_BY_TO` — the `(from_node)` / `(to_node)` indices.
//! - `NODE_EMBEDDINGS` — raw little-endian f32 bytes per id, the durable
//!   backing store for the in-memory `VectorIndex`.
//! - `META` — single-row schema version marker for `migrate`.
//!
//! Queries with no dedicated index (valid_from/valid_until range scans for
//! `get_created_between`/`get_modified_between`/`get_deleted_between`, and
//! `snapshot`) are linear scans over `NODE_VERSIONS`, matching the "Phase 0:
//! linear scan" idiom the teacher applies to every access path beyond the
//! primary key.

use crate::error::{Error, Result};
use crate::model::{Edge, Node};
#[cfg(feature = "vector")]
use crate::vector::VectorIndex;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
#[cfg(feature = "vector")]
use std::sync::Mutex;

const NODE_VERSIONS: TableDefinition<&str, &str> = TableDefinition::new("node_versions");
const NODE_CURRENT: TableDefinition<&str, u64> = TableDefinition::new("node_current");
const NODES_BY_CREATED: TableDefinition<&str, &str> = TableDefinition::new("nodes_by_created");
const EDGES: TableDefinition<&str, &str> = TableDefinition::new("edges");
const EDGES_BY_TO: TableDefinition<&str, &str> = TableDefinition::new("edges_by_to");
#[cfg(feature = "vector")]
const NODE_EMBEDDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_embeddings");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION: u64 = 1;

pub struct Store {
    db: Database,
    #[cfg(feature = "vector")]
    pub(crate) vector_index: Mutex<VectorIndex>,
}

fn version_key(id: &str, version: u64) -> String {
    format!("{id}\0{version:020}")
}

fn version_prefix(id: &str) -> String {
    format!("{id}\0")
}

fn created_key(created_at: DateTime<Utc>, id: &str) -> String {
    let nanos = created_at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
    format!("{nanos:020}\0{id}")
}

fn edge_key(from: &str, to: &str) -> String {
    format!("{from}\0{to}")
}

fn edge_by_to_key(to: &str, from: &str) -> String {
    format!("{to}\0{from}")
}

impl Store {
    pub fn open(path: &str) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(NODE_VERSIONS)?;
            write_txn.open_table(NODE_CURRENT)?;
            write_txn.open_table(NODES_BY_CREATED)?;
            write_txn.open_table(EDGES)?;
            write_txn.open_table(EDGES_BY_TO)?;
            #[cfg(feature = "vector")]
            {
                write_txn.open_table(NODE_EMBEDDINGS)?;
            }
            write_txn.open_table(META)?;
            write_txn.commit()?;
        }

        let mut store = Self {
            db,
            #[cfg(feature = "vector")]
            vector_index: Mutex::new(VectorIndex::new()),
        };
        store.migrate()?;
        #[cfg(feature = "vector")]
        store.rebuild_vector_index()?;
        Ok(store)
    }

    /// Backfills rows written before `version`/`valid_from` existed on the
    /// schema. No such file exists in this codebase's own history; exercised
    /// by tests that write a legacy-shaped row directly.
    fn migrate(&mut self) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let current_version: u64 = {
            let meta = write_txn.open_table(META)?;
            let v = meta.get("schema_version")?.map(|g| g.value()).unwrap_or(0);
            v
        };

        if current_version == 0 {
            let mut to_fix: Vec<(String, Node)> = Vec::new();
            {
                let table = write_txn.open_table(NODE_VERSIONS)?;
                for entry in table.iter()? {
                    let (k, v) = entry?;
                    let raw: serde_json::Value = serde_json::from_str(v.value())
                        .map_err(|e| Error::MigrationError(e.to_string()))?;
                    if raw.get("version").is_none() || raw.get("valid_from").is_none() {
                        let node: Node = serde_json::from_str(v.value())
                            .map_err(|e| Error::MigrationError(e.to_string()))?;
                        to_fix.push((k.value().to_string(), node));
                    }
                }
            }
            if !to_fix.is_empty() {
                let mut table = write_txn.open_table(NODE_VERSIONS)?;
                for (key, mut node) in to_fix {
                    node.version = 1;
                    node.valid_from = node.created_at;
                    let value = serde_json::to_string(&node)?;
                    table.insert(key.as_str(), value.as_str())?;
                }
            }
            let mut meta = write_txn.open_table(META)?;
            meta.insert("schema_version", SCHEMA_VERSION)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    #[cfg(feature = "vector")]
    fn rebuild_vector_index(&self) -> Result<()> {
        let mut idx = VectorIndex::new();
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NODE_EMBEDDINGS) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => {
                *self.vector_index.lock().unwrap() = idx;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        for entry in table.iter()? {
            let (key, value) = entry?;
            let id = key.value().to_string();
            let bytes = value.value();
            if bytes.len() % 4 != 0 {
                return Err(Error::Storage(format!(
                    "corrupt embedding for node {id}: byte length {} is not a multiple of 4",
                    bytes.len()
                )));
            }
            let embedding: Vec<f32> = bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            idx.insert(id, embedding)?;
        }
        *self.vector_index.lock().unwrap() = idx;
        Ok(())
    }

    // -- node reads -----------------------------------------------------

    pub fn current_version(&self, id: &str) -> Result<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODE_CURRENT)?;
        Ok(table.get(id)?.map(|g| g.value()))
    }

    pub fn get_node(&self, id: &str, version: u64) -> Result<Option<Node>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODE_VERSIONS)?;
        let key = version_key(id, version);
        match table.get(key.as_str())? {
            Some(g) => Ok(Some(serde_json::from_str(g.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_current_node(&self, id: &str) -> Result<Option<Node>> {
        match self.current_version(id)? {
            Some(v) => self.get_node(id, v),
            None => Ok(None),
        }
    }

    pub fn list_versions(&self, id: &str) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODE_VERSIONS)?;
        let prefix = version_prefix(id);
        let mut nodes = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (k, v) = entry?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            nodes.push(serde_json::from_str::<Node>(v.value())?);
        }
        nodes.sort_by_key(|n| n.version);
        Ok(nodes)
    }

    /// All current-version nodes, most-recently-created first, capped at
    /// `limit` when given.
    pub fn list_current_nodes(&self, limit: Option<usize>) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let by_created = read_txn.open_table(NODES_BY_CREATED)?;
        let node_versions = read_txn.open_table(NODE_VERSIONS)?;
        let current = read_txn.open_table(NODE_CURRENT)?;

        let mut nodes = Vec::new();
        for entry in by_created.iter()?.rev() {
            let (_key, id_val) = entry?;
            let id = id_val.value();
            let Some(version) = current.get(id)?.map(|g| g.value()) else {
                continue;
            };
            let key = version_key(id, version);
            if let Some(g) = node_versions.get(key.as_str())? {
                nodes.push(serde_json::from_str::<Node>(g.value())?);
            }
            if let Some(limit) = limit {
                if nodes.len() >= limit {
                    break;
                }
            }
        }
        Ok(nodes)
    }

    /// All current-version nodes in no particular order; used by search
    /// index construction and snapshots where order doesn't matter.
    pub fn all_current_nodes(&self) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let current = read_txn.open_table(NODE_CURRENT)?;
        let node_versions = read_txn.open_table(NODE_VERSIONS)?;
        let mut nodes = Vec::new();
        for entry in current.iter()? {
            let (id, version) = entry?;
            let key = version_key(id.value(), version.value());
            if let Some(g) = node_versions.get(key.as_str())? {
                nodes.push(serde_json::from_str::<Node>(g.value())?);
            }
        }
        Ok(nodes)
    }

    /// All node versions (every id, every version); used for snapshots and
    /// valid_from/valid_until range scans that have no dedicated index.
    pub fn all_versions(&self) -> Result<Vec<Node>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(NODE_VERSIONS)?;
        let mut nodes = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            nodes.push(serde_json::from_str::<Node>(v.value())?);
        }
        Ok(nodes)
    }

    // -- node writes ------------------------------------------------------

    /// Closes the current row for `id` at `t` (if one exists) and inserts
    /// `new_node` as the new current row, all in one transaction. Returns
    /// the previous current node, if any.
    pub fn put_node(&self, new_node: &Node) -> Result<Option<Node>> {
        let write_txn = self.db.begin_write()?;
        let mut previous = None;
        {
            let mut current = write_txn.open_table(NODE_CURRENT)?;
            let mut versions = write_txn.open_table(NODE_VERSIONS)?;
            let mut by_created = write_txn.open_table(NODES_BY_CREATED)?;

            if let Some(prev_version) = current.get(new_node.id.as_str())?.map(|g| g.value()) {
                let key = version_key(&new_node.id, prev_version);
                let existing = versions.get(key.as_str())?.map(|g| g.value().to_string());
                if let Some(raw) = existing {
                    let mut prev: Node = serde_json::from_str(&raw)?;
                    prev.valid_until = Some(new_node.valid_from);
                    let value = serde_json::to_string(&prev)?;
                    versions.insert(key.as_str(), value.as_str())?;
                    previous = Some(prev);
                }
            }

            let key = version_key(&new_node.id, new_node.version);
            let value = serde_json::to_string(new_node)?;
            versions.insert(key.as_str(), value.as_str())?;
            current.insert(new_node.id.as_str(), new_node.version)?;

            let created_key = created_key(new_node.created_at, &new_node.id);
            by_created.insert(created_key.as_str(), new_node.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(previous)
    }

    /// Removes all versions of `id`, its current pointer, its created-at
    /// index entries, its embedding, and every edge incident to it.
    pub fn delete_node_all(&self, id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut versions = write_txn.open_table(NODE_VERSIONS)?;
            let prefix = version_prefix(id);
            let keys: Vec<String> = versions
                .range(prefix.as_str()..)?
                .filter_map(|e| e.ok())
                .map(|(k, _)| k.value().to_string())
                .take_while(|k| k.starts_with(&prefix))
                .collect();
            for key in keys {
                versions.remove(key.as_str())?;
            }
        }
        {
            let mut current = write_txn.open_table(NODE_CURRENT)?;
            current.remove(id)?;
        }
        {
            let mut by_created = write_txn.open_table(NODES_BY_CREATED)?;
            let stale: Vec<String> = by_created
                .iter()?
                .filter_map(|e| e.ok())
                .filter(|(_, v)| v.value() == id)
                .map(|(k, _)| k.value().to_string())
                .collect();
            for key in stale {
                by_created.remove(key.as_str())?;
            }
        }
        #[cfg(feature = "vector")]
        {
            let mut embeddings = write_txn.open_table(NODE_EMBEDDINGS)?;
            embeddings.remove(id)?;
        }
        {
            let mut edges = write_txn.open_table(EDGES)?;
            let mut edges_by_to = write_txn.open_table(EDGES_BY_TO)?;
            let incident: Vec<(String, String)> = edges
                .iter()?
                .filter_map(|e| e.ok())
                .filter_map(|(k, v)| {
                    let edge: Edge = serde_json::from_str(v.value()).ok()?;
                    if edge.from_node == id || edge.to_node == id {
                        Some((k.value().to_string(), edge.to_node))
                    } else {
                        None
                    }
                })
                .collect();
            for (key, to) in &incident {
                edges.remove(key.as_str())?;
                if let Some((from, _)) = key.split_once('\0') {
                    let by_to_key = edge_by_to_key(to, from);
                    edges_by_to.remove(by_to_key.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        #[cfg(feature = "vector")]
        self.vector_index.lock().unwrap().remove(id);
        Ok(())
    }

    // -- embeddings ---------------------------------------------------------

    #[cfg(feature = "vector")]
    pub fn embedding_for(&self, id: &str) -> Option<Vec<f32>> {
        self.vector_index.lock().unwrap().embedding_for(id)
    }

    #[cfg(feature = "vector")]
    pub fn has_embeddings(&self) -> bool {
        !self.vector_index.lock().unwrap().is_empty()
    }

    #[cfg(feature = "vector")]
    pub fn put_embedding(&self, id: &str, embedding: &[f32]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let bytes: Vec<u8> = embedding.iter().flat_map(|x| x.to_le_bytes()).collect();
            let mut table = write_txn.open_table(NODE_EMBEDDINGS)?;
            table.insert(id, bytes.as_slice())?;
        }
        write_txn.commit()?;
        self.vector_index
            .lock()
            .unwrap()
            .insert(id.to_string(), embedding.to_vec())?;
        Ok(())
    }

    /// Re-derives every embedding from current rows via `embed_fn`,
    /// replacing both the redb table and the in-memory cache. Backs
    /// `rebuild_search_index`.
    #[cfg(feature = "vector")]
    pub fn reindex_embeddings(&self, embed_fn: impl Fn(&str) -> Vec<f32>) -> Result<usize> {
        let nodes = self.all_current_nodes()?;
        let mut idx = VectorIndex::new();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NODE_EMBEDDINGS)?;
            let stale: Vec<String> = table
                .iter()?
                .filter_map(|e| e.ok())
                .map(|(k, _)| k.value().to_string())
                .collect();
            for key in stale {
                table.remove(key.as_str())?;
            }
            for node in &nodes {
                let embedding = embed_fn(&node.content);
                if embedding.is_empty() {
                    continue;
                }
                let bytes: Vec<u8> = embedding.iter().flat_map(|x| x.to_le_bytes()).collect();
                table.insert(node.id.as_str(), bytes.as_slice())?;
                idx.insert(node.id.clone(), embedding)?;
            }
        }
        write_txn.commit()?;
        let count = idx.len();
        *self.vector_index.lock().unwrap() = idx;
        Ok(count)
    }

    // -- edges ------------------------------------------------------------

    pub fn get_edge(&self, from: &str, to: &str) -> Result<Option<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let key = edge_key(from, to);
        match table.get(key.as_str())? {
            Some(g) => Ok(Some(serde_json::from_str(g.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_edge(&self, edge: &Edge) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut edges = write_txn.open_table(EDGES)?;
            let mut edges_by_to = write_txn.open_table(EDGES_BY_TO)?;
            let key = edge_key(&edge.from_node, &edge.to_node);
            let value = serde_json::to_string(edge)?;
            edges.insert(key.as_str(), value.as_str())?;
            let by_to_key = edge_by_to_key(&edge.to_node, &edge.from_node);
            edges_by_to.insert(by_to_key.as_str(), edge.from_node.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn edges_from(&self, id: &str) -> Result<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let prefix = format!("{id}\0");
        let mut edges = Vec::new();
        for entry in table.range(prefix.as_str()..)? {
            let (k, v) = entry?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            edges.push(serde_json::from_str::<Edge>(v.value())?);
        }
        Ok(edges)
    }

    pub fn edges_to(&self, id: &str) -> Result<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let by_to = read_txn.open_table(EDGES_BY_TO)?;
        let edges_table = read_txn.open_table(EDGES)?;
        let prefix = format!("{id}\0");
        let mut edges = Vec::new();
        for entry in by_to.range(prefix.as_str()..)? {
            let (k, from_val) = entry?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            let key = edge_key(from_val.value(), id);
            if let Some(g) = edges_table.get(key.as_str())? {
                edges.push(serde_json::from_str::<Edge>(g.value())?);
            }
        }
        Ok(edges)
    }

    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EDGES)?;
        let mut edges = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            edges.push(serde_json::from_str::<Edge>(v.value())?);
        }
        Ok(edges)
    }

    // -- tag / metadata mutation (in-place, spec §4.5) ---------------------

    /// Overwrites the current row's metadata in place without creating a new
    /// version. The documented divergence from the append-only model (spec
    /// §9) — the row's identity and version number are unchanged.
    pub fn update_current_metadata(
        &self,
        id: &str,
        metadata: crate::model::RichMetadata,
    ) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let updated;
        {
            let current = write_txn.open_table(NODE_CURRENT)?;
            let Some(version) = current.get(id)?.map(|g| g.value()) else {
                return Ok(false);
            };
            let mut versions = write_txn.open_table(NODE_VERSIONS)?;
            let key = version_key(id, version);
            let Some(raw) = versions.get(key.as_str())?.map(|g| g.value().to_string()) else {
                return Ok(false);
            };
            let mut node: Node = serde_json::from_str(&raw)?;
            node.metadata = metadata;
            let value = serde_json::to_string(&node)?;
            versions.insert(key.as_str(), value.as_str())?;
            updated = true;
        }
        write_txn.commit()?;
        Ok(updated)
    }
}
