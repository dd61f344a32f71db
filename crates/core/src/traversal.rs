//! Graph traversal: neighbors, shortest path, bounded exploration, and
//! subgraph/map generation (spec §4.3).
//!
//! The teacher's domain (point facts) has no graph-shaped traversal module
//! to generalize from; these are designed directly from the spec using the
//! BFS-with-visited-set idiom common across the retrieval pack's
//! graph-shaped code.

use crate::error::{Error, Result};
use crate::model::{Direction, Edge, GraphPath, MetadataFilter, NeighborResult, Node};
use crate::search::{self, SortBy, SortOrder};
use crate::store::Store;
use crate::temporal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

fn edge_active(edge: &Edge, at_time: Option<DateTime<Utc>>) -> bool {
    match at_time {
        Some(t) => edge.was_valid_at(t),
        None => edge.is_current(),
    }
}

fn resolve(store: &Store, id: &str, at_time: Option<DateTime<Utc>>) -> Result<Option<Node>> {
    match at_time {
        Some(t) => temporal::get_at(store, id, t),
        None => temporal::get(store, id),
    }
}

/// `neighbors(id, direction, {depth, max_results, relation_filter, at_time})`.
#[derive(Debug, Clone, Default)]
pub struct NeighborsQuery {
    pub depth: u32,
    pub max_results: usize,
    pub relation_filter: Option<HashSet<String>>,
    pub at_time: Option<DateTime<Utc>>,
}

fn adjacent(store: &Store, id: &str, direction: Direction) -> Result<Vec<(String, String, Direction)>> {
    let mut out = Vec::new();
    if matches!(direction, Direction::Outgoing | Direction::Both) {
        for edge in store.edges_from(id)? {
            out.push((edge.to_node, edge.relation, Direction::Outgoing));
        }
    }
    if matches!(direction, Direction::Incoming | Direction::Both) {
        for edge in store.edges_to(id)? {
            out.push((edge.from_node, edge.relation, Direction::Incoming));
        }
    }
    Ok(out)
}

pub fn neighbors(
    store: &Store,
    id: &str,
    direction: Direction,
    query: &NeighborsQuery,
) -> Result<Vec<NeighborResult>> {
    let depth = query.depth.max(1);
    let max_results = if query.max_results == 0 {
        usize::MAX
    } else {
        query.max_results
    };

    let mut visited: HashSet<String> = HashSet::from([id.to_string()]);
    let mut frontier: VecDeque<(String, u32)> = VecDeque::from([(id.to_string(), 0)]);
    let mut results = Vec::new();

    while let Some((current, d)) = frontier.pop_front() {
        if d >= depth {
            continue;
        }
        for (neighbor_id, relation, dir) in adjacent(store, &current, direction)? {
            if visited.contains(&neighbor_id) {
                continue;
            }
            if let Some(filter) = &query.relation_filter {
                if !filter.contains(&relation) {
                    continue;
                }
            }
            let Some(edge) = (match dir {
                Direction::Outgoing => store.get_edge(&current, &neighbor_id)?,
                _ => store.get_edge(&neighbor_id, &current)?,
            }) else {
                continue;
            };
            if !edge_active(&edge, query.at_time) {
                continue;
            }

            visited.insert(neighbor_id.clone());
            results.push(NeighborResult {
                id: neighbor_id.clone(),
                relation,
                direction: dir,
                depth: d + 1,
            });
            if results.len() >= max_results {
                return Ok(results);
            }
            frontier.push_back((neighbor_id, d + 1));
        }
    }
    Ok(results)
}

/// `path(from, to, max_depth, at_time?)`. Directed BFS, first path found,
/// cycle avoidance via a global visited set (sound for shortest-path BFS).
pub fn path(
    store: &Store,
    from: &str,
    to: &str,
    max_depth: usize,
    at_time: Option<DateTime<Utc>>,
) -> Result<Option<GraphPath>> {
    if from == to {
        return Ok(Some(GraphPath {
            path: vec![from.to_string()],
            length: 0,
        }));
    }

    let mut visited: HashSet<String> = HashSet::from([from.to_string()]);
    let mut frontier: VecDeque<Vec<String>> = VecDeque::from([vec![from.to_string()]]);

    while let Some(current_path) = frontier.pop_front() {
        let hops = current_path.len() - 1;
        if hops >= max_depth {
            continue;
        }
        let current = current_path.last().unwrap().clone();
        for edge in store.edges_from(&current)? {
            if !edge_active(&edge, at_time) {
                continue;
            }
            let next = edge.to_node;
            if next == to {
                let mut full = current_path.clone();
                full.push(next);
                return Ok(Some(GraphPath {
                    length: full.len() - 1,
                    path: full,
                }));
            }
            if visited.contains(&next) {
                continue;
            }
            visited.insert(next.clone());
            let mut extended = current_path.clone();
            extended.push(next);
            frontier.push_back(extended);
        }
    }
    Ok(None)
}

/// `explore({start, strategy, max_depth, max_nodes, follow_relations?, filters?, at_time?})`.
#[derive(Debug, Clone, Default)]
pub struct ExploreFilters {
    pub tags: Option<Vec<String>>,
    pub node_type: Option<String>,
}

impl ExploreFilters {
    fn matches(&self, node: &Node) -> bool {
        if let Some(tags) = &self.tags {
            let have = node.metadata.tags();
            if !tags.iter().all(|t| have.contains(t)) {
                return false;
            }
        }
        if let Some(ty) = &self.node_type {
            if &node.node_type != ty {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct ExploreParams {
    pub start: String,
    pub strategy: String,
    pub max_depth: u32,
    pub max_nodes: usize,
    pub follow_relations: Option<HashSet<String>>,
    pub filters: Option<ExploreFilters>,
    pub at_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ExploreStats {
    pub total_nodes: usize,
    pub max_depth_reached: u32,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ExploreResult {
    pub root: String,
    pub strategy: String,
    pub nodes: Vec<(Node, u32)>,
    pub edges: Vec<Edge>,
    pub stats: ExploreStats,
    pub warnings: Vec<String>,
}

pub fn explore(store: &Store, params: &ExploreParams) -> Result<ExploreResult> {
    // Only "breadth" is implemented; any other requested strategy falls back
    // to breadth, and the fallback is recorded here so a caller can't read
    // `strategy: "breadth"` in the response and assume its request was honored.
    let mut warnings = Vec::new();
    let strategy = if params.strategy == "breadth" {
        params.strategy.clone()
    } else {
        warnings.push(format!(
            "strategy '{}' is not supported; falling back to 'breadth'",
            params.strategy
        ));
        "breadth".to_string()
    };

    let start_node = resolve(store, &params.start, params.at_time)?
        .ok_or_else(|| Error::NotFound(params.start.clone()))?;
    if let Some(filters) = &params.filters {
        if !filters.matches(&start_node) {
            return Err(Error::NotFound(format!(
                "start node '{}' does not match filters",
                params.start
            )));
        }
    }

    let max_nodes = if params.max_nodes == 0 {
        usize::MAX
    } else {
        params.max_nodes
    };

    let mut visited: HashSet<String> = HashSet::from([params.start.clone()]);
    let mut nodes_out: Vec<(Node, u32)> = vec![(start_node, 0)];
    let mut edges_out = Vec::new();
    let mut frontier: VecDeque<(String, u32)> = VecDeque::from([(params.start.clone(), 0)]);
    let mut max_depth_reached = 0u32;

    while let Some((current, d)) = frontier.pop_front() {
        if nodes_out.len() >= max_nodes {
            break;
        }
        if d >= params.max_depth {
            continue;
        }
        for edge in store.edges_from(&current)? {
            if !edge_active(&edge, params.at_time) {
                continue;
            }
            if let Some(follow) = &params.follow_relations {
                if !follow.contains(&edge.relation) {
                    continue;
                }
            }
            let next = edge.to_node.clone();
            if visited.contains(&next) {
                continue;
            }
            if nodes_out.len() >= max_nodes {
                continue;
            }
            let Some(candidate) = resolve(store, &next, params.at_time)? else {
                continue;
            };
            if let Some(filters) = &params.filters {
                if !filters.matches(&candidate) {
                    continue;
                }
            }
            visited.insert(next.clone());
            nodes_out.push((candidate, d + 1));
            edges_out.push(edge);
            max_depth_reached = max_depth_reached.max(d + 1);
            frontier.push_back((next, d + 1));
        }
    }

    let truncated = nodes_out.len() >= max_nodes;
    Ok(ExploreResult {
        root: params.start.clone(),
        strategy,
        stats: ExploreStats {
            total_nodes: nodes_out.len(),
            max_depth_reached,
            truncated,
        },
        nodes: nodes_out,
        edges: edges_out,
        warnings,
    })
}

/// `map({scope, ...})`.
#[derive(Debug, Clone)]
pub enum MapScope {
    All,
    Filtered,
    Subgraph,
    TemporalSlice,
}

#[derive(Debug, Clone)]
pub struct MapParams {
    pub scope: MapScope,
    pub max_nodes: usize,
    pub max_edges: usize,
    pub at_time: Option<DateTime<Utc>>,
    pub filters: Option<MetadataFilter>,
    pub foci: Vec<String>,
    pub radius: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MapStats {
    pub type_counts: BTreeMap<String, usize>,
    pub relation_counts: BTreeMap<String, usize>,
    pub tag_counts: BTreeMap<String, usize>,
    pub version_counts: BTreeMap<u64, usize>,
}

#[derive(Debug, Clone)]
pub struct MapResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub stats: MapStats,
}

pub fn map(store: &Store, params: &MapParams) -> Result<MapResult> {
    let max_nodes = if params.max_nodes == 0 {
        usize::MAX
    } else {
        params.max_nodes
    };
    let max_edges = if params.max_edges == 0 {
        usize::MAX
    } else {
        params.max_edges
    };

    let mut nodes: Vec<Node> = match params.scope {
        MapScope::All => {
            if let Some(t) = params.at_time {
                temporal::snapshot(store, t)?.0
            } else {
                store.list_current_nodes(None)?
            }
        }
        MapScope::Filtered => search::smart_search(
            store,
            None,
            params.filters.clone().unwrap_or_default(),
            max_nodes,
            SortBy::CreatedAt,
            SortOrder::Desc,
        )?,
        MapScope::Subgraph => {
            let mut set: HashMap<String, Node> = HashMap::new();
            for focus in &params.foci {
                let explore_params = ExploreParams {
                    start: focus.clone(),
                    strategy: "breadth".to_string(),
                    max_depth: params.radius,
                    max_nodes,
                    follow_relations: None,
                    filters: None,
                    at_time: params.at_time,
                };
                let result = explore(store, &explore_params)?;
                for (node, _depth) in result.nodes {
                    set.entry(node.id.clone()).or_insert(node);
                }
            }
            set.into_values().collect()
        }
        MapScope::TemporalSlice => {
            let t = params
                .at_time
                .ok_or_else(|| Error::MalformedQuery("temporal_slice requires at_time".into()))?;
            temporal::snapshot(store, t)?.0
        }
    };
    nodes.truncate(max_nodes);

    let node_ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut edges: Vec<Edge> = store
        .all_edges()?
        .into_iter()
        .filter(|e| node_ids.contains(&e.from_node) && node_ids.contains(&e.to_node))
        .filter(|e| edge_active(e, params.at_time))
        .collect();
    edges.truncate(max_edges);

    let stats = aggregate_stats(&nodes, &edges);
    Ok(MapResult { nodes, edges, stats })
}

fn aggregate_stats(nodes: &[Node], edges: &[Edge]) -> MapStats {
    let mut stats = MapStats::default();
    for node in nodes {
        *stats.type_counts.entry(node.node_type.clone()).or_insert(0) += 1;
        *stats.version_counts.entry(node.version).or_insert(0) += 1;
        for tag in node.metadata.tags() {
            *stats.tag_counts.entry(tag).or_insert(0) += 1;
        }
    }
    for edge in edges {
        *stats.relation_counts.entry(edge.relation.clone()).or_insert(0) += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RichMetadata;

    fn seed_chain(store: &Store) {
        temporal::put(store, None, "A", "a".into(), RichMetadata::new(), None, None).unwrap();
        temporal::put(store, None, "B", "b".into(), RichMetadata::new(), None, None).unwrap();
        temporal::put(store, None, "C", "c".into(), RichMetadata::new(), None, None).unwrap();
        temporal::put_edge(store, "A", "B", Some("next".into()), None, RichMetadata::new(), None, None).unwrap();
        temporal::put_edge(store, "B", "C", Some("next".into()), None, RichMetadata::new(), None, None).unwrap();
    }

    #[test]
    fn path_finds_shortest_chain() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        let result = path(&store, "A", "C", 5, None).unwrap().unwrap();
        assert_eq!(result.path, vec!["A", "B", "C"]);
        assert_eq!(result.length, 2);
    }

    #[test]
    fn path_same_node_is_zero_length() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        let result = path(&store, "A", "A", 5, None).unwrap().unwrap();
        assert_eq!(result.path, vec!["A"]);
        assert_eq!(result.length, 0);
    }

    #[test]
    fn neighbors_empty_returns_empty_vec() {
        let store = Store::open_in_memory().unwrap();
        temporal::put(&store, None, "lonely", "x".into(), RichMetadata::new(), None, None).unwrap();
        let result = neighbors(&store, "lonely", Direction::Both, &NeighborsQuery::default()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn neighbors_depth_two_reaches_second_hop() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        let query = NeighborsQuery {
            depth: 2,
            max_results: 0,
            relation_filter: None,
            at_time: None,
        };
        let result = neighbors(&store, "A", Direction::Outgoing, &query).unwrap();
        let ids: Vec<&str> = result.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"B"));
        assert!(ids.contains(&"C"));
    }

    #[test]
    fn explore_bounds_by_max_nodes() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        let params = ExploreParams {
            start: "A".to_string(),
            strategy: "breadth".to_string(),
            max_depth: 10,
            max_nodes: 2,
            follow_relations: None,
            filters: None,
            at_time: None,
        };
        let result = explore(&store, &params).unwrap();
        assert_eq!(result.nodes.len(), 2);
        assert!(result.stats.truncated);
    }

    #[test]
    fn explore_falls_back_to_breadth_with_warning() {
        let store = Store::open_in_memory().unwrap();
        seed_chain(&store);
        let params = ExploreParams {
            start: "A".to_string(),
            strategy: "dfs".to_string(),
            max_depth: 10,
            max_nodes: 100,
            follow_relations: None,
            filters: None,
            at_time: None,
        };
        let result = explore(&store, &params).unwrap();
        assert_eq!(result.strategy, "breadth");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("dfs"));
    }
}
