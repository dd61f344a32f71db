//! Palimpsest MCP server: a thin JSON-RPC 2.0 stdio dispatcher over
//! [`palimpsest_api::Store`]. It validates arguments and forwards to the
//! facade; it holds no domain logic of its own.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use palimpsest_api::search::{SortBy, SortOrder};
use palimpsest_api::tags::TagTarget;
use palimpsest_api::traversal::{ExploreParams, MapParams, MapScope, NeighborsQuery};
use palimpsest_api::{Direction, GraphView, MetadataFilter, Store};
use serde_json::{json, Value as JsonValue};
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

const MAX_MESSAGE_BYTES: usize = 1_048_576;
const MAX_CONTENT_BYTES: usize = 2 * 1024 * 1024;
const MAX_QUERY_BYTES: usize = 8 * 1024;

struct AppState {
    store: Store,
}

impl AppState {
    fn open() -> Result<Self> {
        let db_path =
            env::var("PALIMPSEST_DB_PATH").unwrap_or_else(|_| "./palimpsest-mcp.redb".to_string());
        let store = Store::open(&db_path)?;
        Ok(Self { store })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("palimpsest-mcp v{} starting", env!("CARGO_PKG_VERSION"));

    let mut state = AppState::open().context("failed to open palimpsest database")?;
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    loop {
        let maybe = match read_message(&mut reader) {
            Ok(m) => m,
            Err(e) => {
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": format!("Parse error: {e}") }
                });
                write_message(&mut writer, &err_resp)?;
                continue;
            }
        };
        let Some(request) = maybe else {
            break;
        };
        if let Some(response) = handle_request(&mut state, &request) {
            write_message(&mut writer, &response)?;
        }
    }

    Ok(())
}

fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<JsonValue>> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .context("invalid Content-Length")?,
                );
            }
        }
    }

    let len = content_length.context("missing Content-Length header")?;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!(
            "Content-Length {} exceeds max allowed {} bytes",
            len,
            MAX_MESSAGE_BYTES
        );
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    let value: JsonValue = serde_json::from_slice(&payload).context("invalid JSON payload")?;
    Ok(Some(value))
}

fn write_message<W: Write>(writer: &mut W, value: &JsonValue) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn handle_request(state: &mut AppState, req: &JsonValue) -> Option<JsonValue> {
    let id = req.get("id").cloned();
    let method = req.get("method").and_then(JsonValue::as_str)?;

    match method {
        "initialize" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "palimpsest-mcp", "version": env!("CARGO_PKG_VERSION") }
                }
            })
        }),
        "notifications/initialized" => None,
        "tools/list" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": { "tools": tools_schema() }
            })
        }),
        "tools/call" => id.map(|id_val| {
            let result = call_tool(state, req.get("params"));
            match result {
                Ok(tool_result) => json!({
                    "jsonrpc": "2.0",
                    "id": id_val,
                    "result": tool_result
                }),
                Err(err) => {
                    warn!("tool call failed: {err}");
                    json!({
                        "jsonrpc": "2.0",
                        "id": id_val,
                        "result": {
                            "content": [{ "type": "text", "text": format!("tool error: {err}") }],
                            "isError": true
                        }
                    })
                }
            }
        }),
        "ping" => id.map(|id_val| json!({ "jsonrpc": "2.0", "id": id_val, "result": {} })),
        _ => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "error": { "code": -32601, "message": format!("method not found: {method}") }
            })
        }),
    }
}

fn tools_schema() -> Vec<JsonValue> {
    vec![
        json!({
            "name": "add_document",
            "description": "Create or update a versioned document.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "content": {"type": "string"},
                    "metadata": {"type": "object"},
                    "valid_from": {"type": "string"}
                },
                "required": ["id", "content"]
            }
        }),
        json!({
            "name": "get_document",
            "description": "Fetch the current or as-of version of a document.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": {"type": "string"}, "at_time": {"type": "string"} },
                "required": ["id"]
            }
        }),
        json!({
            "name": "update_document",
            "description": "Create a new version of a document, optionally merging metadata.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "content": {"type": "string"},
                    "metadata": {"type": "object"},
                    "merge_metadata": {"type": "boolean"},
                    "valid_from": {"type": "string"}
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "delete_document",
            "description": "Hard delete a document: all versions and incident edges.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": {"type": "string"} },
                "required": ["id"]
            }
        }),
        json!({
            "name": "list_documents",
            "description": "List the most recent document versions.",
            "inputSchema": {
                "type": "object",
                "properties": { "limit": {"type": "integer"} }
            }
        }),
        json!({
            "name": "search",
            "description": "Full-text and/or metadata-filtered search over current documents.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "filters": {"type": "object"},
                    "limit": {"type": "integer"},
                    "sort_by": {"type": "string", "enum": ["created_at", "id"]},
                    "sort_order": {"type": "string", "enum": ["asc", "desc"]}
                }
            }
        }),
        json!({
            "name": "add_relationship",
            "description": "Create or upsert a causality-gated directed edge.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "from": {"type": "string"},
                    "to": {"type": "string"},
                    "relation": {"type": "string"},
                    "metadata": {"type": "object"},
                    "valid_from": {"type": "string"}
                },
                "required": ["from", "to"]
            }
        }),
        json!({
            "name": "get_neighbors",
            "description": "Fetch a node's neighbors, optionally multi-hop and time-sliced.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "direction": {"type": "string", "enum": ["outgoing", "incoming", "both"]},
                    "depth": {"type": "integer"},
                    "at_time": {"type": "string"}
                },
                "required": ["id"]
            }
        }),
        json!({
            "name": "find_path",
            "description": "Shortest directed path between two nodes.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "from": {"type": "string"},
                    "to": {"type": "string"},
                    "max_depth": {"type": "integer"},
                    "at_time": {"type": "string"}
                },
                "required": ["from", "to"]
            }
        }),
        json!({
            "name": "find_similar",
            "description": "k-NN similarity search over content embeddings.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": {"type": "string"}, "limit": {"type": "integer"} },
                "required": ["id"]
            }
        }),
        json!({
            "name": "explore_graph",
            "description": "Bounded breadth-first exploration from a start node. `strategy` other than \"breadth\" is accepted but falls back to breadth with a warning.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "start": {"type": "string"},
                    "strategy": {"type": "string"},
                    "max_depth": {"type": "integer"},
                    "max_nodes": {"type": "integer"},
                    "at_time": {"type": "string"}
                },
                "required": ["start"]
            }
        }),
        json!({
            "name": "map_graph",
            "description": "Produce a subgraph view (JSON or Mermaid) per a scope.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "scope": {"type": "string", "enum": ["all", "filtered", "subgraph", "temporal_slice"]},
                    "max_nodes": {"type": "integer"},
                    "max_edges": {"type": "integer"},
                    "at_time": {"type": "string"},
                    "foci": {"type": "array", "items": {"type": "string"}},
                    "radius": {"type": "integer"},
                    "as_mermaid": {"type": "boolean"}
                },
                "required": ["scope"]
            }
        }),
        json!({
            "name": "tags",
            "description": "Tag bulk operations: add, remove, rename, list, get.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["add", "remove", "rename", "list", "get"]},
                    "id": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "from": {"type": "string"},
                    "to": {"type": "string"}
                },
                "required": ["action"]
            }
        }),
        json!({
            "name": "get_document_timeline",
            "description": "Full version history of a document with change summaries.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": {"type": "string"} },
                "required": ["id"]
            }
        }),
        json!({
            "name": "compare_versions",
            "description": "Structural diff between two versions of a document.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "v1": {"type": "integer"},
                    "v2": {"type": "integer"}
                },
                "required": ["id", "v1", "v2"]
            }
        }),
        json!({
            "name": "get_created_between",
            "description": "Documents first created (version 1) with valid_from in [start, end].",
            "inputSchema": {
                "type": "object",
                "properties": { "start": {"type": "string"}, "end": {"type": "string"} },
                "required": ["start", "end"]
            }
        }),
        json!({
            "name": "get_modified_between",
            "description": "Documents updated (version > 1) with valid_from in [start, end].",
            "inputSchema": {
                "type": "object",
                "properties": { "start": {"type": "string"}, "end": {"type": "string"} },
                "required": ["start", "end"]
            }
        }),
        json!({
            "name": "get_deleted_between",
            "description": "Documents whose terminal version has valid_until in [start, end].",
            "inputSchema": {
                "type": "object",
                "properties": { "start": {"type": "string"}, "end": {"type": "string"} },
                "required": ["start", "end"]
            }
        }),
        json!({
            "name": "stats",
            "description": "Aggregate node/edge counts and average degree.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "check_integrity",
            "description": "Audit orphaned nodes, missing referents, and inconsistent edges.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "rebuild_search_index",
            "description": "Re-derive every current document's embedding.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

fn call_tool(state: &mut AppState, params: Option<&JsonValue>) -> Result<JsonValue> {
    let name = params
        .and_then(|v| v.get("name"))
        .and_then(JsonValue::as_str)
        .context("missing tool name")?;
    let args = params
        .and_then(|v| v.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    match name {
        "add_document" => {
            let id = require_str(&args, "id")?;
            let content = require_str(&args, "content")?.to_string();
            if content.len() > MAX_CONTENT_BYTES {
                anyhow::bail!("content exceeds max allowed size ({} bytes)", MAX_CONTENT_BYTES);
            }
            let metadata = args.get("metadata").cloned();
            let valid_from = parse_optional_time(args.get("valid_from"))?;
            let node = state.store.add_document(id, content, metadata, valid_from)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("stored {id} v{}", node.version) }],
                "structuredContent": node
            }))
        }
        "get_document" => {
            let id = require_str(&args, "id")?;
            let at_time = parse_optional_time(args.get("at_time"))?;
            let doc = state.store.get_document(id, at_time)?;
            Ok(json!({
                "content": [{ "type": "text", "text": match &doc {
                    Some(_) => format!("found {id}"),
                    None => format!("{id} not found"),
                }}],
                "structuredContent": doc
            }))
        }
        "update_document" => {
            let id = require_str(&args, "id")?;
            let content = args.get("content").and_then(JsonValue::as_str).map(str::to_string);
            let metadata = args.get("metadata").cloned();
            let merge_metadata = args.get("merge_metadata").and_then(JsonValue::as_bool).unwrap_or(false);
            let valid_from = parse_optional_time(args.get("valid_from"))?;
            let node = state
                .store
                .update_document(id, content, metadata, merge_metadata, valid_from)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("updated {id} -> v{}", node.version) }],
                "structuredContent": node
            }))
        }
        "delete_document" => {
            let id = require_str(&args, "id")?;
            state.store.delete_document(id)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("deleted {id}") }],
                "structuredContent": { "id": id }
            }))
        }
        "list_documents" => {
            let limit = args.get("limit").and_then(JsonValue::as_u64).map(|v| v as usize);
            let docs = state.store.list_documents(limit)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} document(s)", docs.len()) }],
                "structuredContent": { "documents": docs }
            }))
        }
        "search" => {
            let query = args.get("query").and_then(JsonValue::as_str);
            if let Some(q) = query {
                if q.len() > MAX_QUERY_BYTES {
                    anyhow::bail!("query exceeds max allowed size ({} bytes)", MAX_QUERY_BYTES);
                }
            }
            let filters = args
                .get("filters")
                .map(|v| serde_json::from_value::<MetadataFilter>(v.clone()))
                .transpose()?;
            let limit = args.get("limit").and_then(JsonValue::as_u64).map(|v| v as usize);
            let sort_by = match args.get("sort_by").and_then(JsonValue::as_str) {
                Some("id") => SortBy::Id,
                _ => SortBy::CreatedAt,
            };
            let sort_order = match args.get("sort_order").and_then(JsonValue::as_str) {
                Some("asc") => SortOrder::Asc,
                _ => SortOrder::Desc,
            };
            let results = state.store.search(query, filters, limit, sort_by, sort_order)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} result(s)", results.len()) }],
                "structuredContent": { "documents": results }
            }))
        }
        "add_relationship" => {
            let from = require_str(&args, "from")?;
            let to = require_str(&args, "to")?;
            let relation = args.get("relation").and_then(JsonValue::as_str).map(str::to_string);
            let metadata = args.get("metadata").cloned();
            let valid_from = parse_optional_time(args.get("valid_from"))?;
            let edge = state.store.add_relationship(from, to, relation, metadata, valid_from)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("linked {from} -> {to}") }],
                "structuredContent": edge
            }))
        }
        "get_neighbors" => {
            let id = require_str(&args, "id")?;
            let direction = match args.get("direction").and_then(JsonValue::as_str) {
                Some("outgoing") => Direction::Outgoing,
                Some("incoming") => Direction::Incoming,
                _ => Direction::Both,
            };
            let depth = args.get("depth").and_then(JsonValue::as_u64).map(|v| v as u32);
            let at_time = parse_optional_time(args.get("at_time"))?;
            let results = state.store.get_neighbors(id, Some(direction), depth, None, at_time)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} neighbor(s)", results.len()) }],
                "structuredContent": { "neighbors": results }
            }))
        }
        "find_path" => {
            let from = require_str(&args, "from")?;
            let to = require_str(&args, "to")?;
            let max_depth = args.get("max_depth").and_then(JsonValue::as_u64).map(|v| v as usize);
            let at_time = parse_optional_time(args.get("at_time"))?;
            let path = state.store.find_path(from, to, max_depth, at_time)?;
            Ok(json!({
                "content": [{ "type": "text", "text": match &path {
                    Some(p) => format!("path of length {}", p.length),
                    None => "no path found".to_string(),
                }}],
                "structuredContent": path
            }))
        }
        "find_similar" => {
            let id = require_str(&args, "id")?;
            let limit = args.get("limit").and_then(JsonValue::as_u64).map(|v| v as usize);
            let hits = state.store.find_similar(id, limit)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} similar document(s)", hits.len()) }],
                "structuredContent": { "results": hits.into_iter().map(|(node, score)| json!({"node": node, "similarity": score})).collect::<Vec<_>>() }
            }))
        }
        "explore_graph" => {
            let start = require_str(&args, "start")?.to_string();
            let strategy = args
                .get("strategy")
                .and_then(JsonValue::as_str)
                .unwrap_or("breadth")
                .to_string();
            let max_depth = args.get("max_depth").and_then(JsonValue::as_u64).unwrap_or(3) as u32;
            let max_nodes = args.get("max_nodes").and_then(JsonValue::as_u64).unwrap_or(100) as usize;
            let at_time = parse_optional_time(args.get("at_time"))?;
            let params = ExploreParams {
                start,
                strategy,
                max_depth,
                max_nodes,
                follow_relations: None,
                filters: None,
                at_time,
            };
            let result = state.store.explore_graph(params)?;
            for warning in &result.warnings {
                warn!("{warning}");
            }
            Ok(json!({
                "content": [{ "type": "text", "text": format!("explored {} node(s)", result.nodes.len()) }],
                "structuredContent": {
                    "root": result.root,
                    "strategy": result.strategy,
                    "nodes": result.nodes.iter().map(|(n, d)| json!({"node": n, "depth": d})).collect::<Vec<_>>(),
                    "edges": result.edges,
                    "truncated": result.stats.truncated,
                    "warnings": result.warnings,
                }
            }))
        }
        "map_graph" => {
            let scope = match require_str(&args, "scope")? {
                "all" => MapScope::All,
                "filtered" => MapScope::Filtered,
                "subgraph" => MapScope::Subgraph,
                "temporal_slice" => MapScope::TemporalSlice,
                other => anyhow::bail!("unknown scope: {other}"),
            };
            let max_nodes = args.get("max_nodes").and_then(JsonValue::as_u64).unwrap_or(100) as usize;
            let max_edges = args.get("max_edges").and_then(JsonValue::as_u64).unwrap_or(500) as usize;
            let at_time = parse_optional_time(args.get("at_time"))?;
            let foci = args
                .get("foci")
                .and_then(JsonValue::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            let radius = args.get("radius").and_then(JsonValue::as_u64).unwrap_or(1) as u32;
            let as_mermaid = args.get("as_mermaid").and_then(JsonValue::as_bool).unwrap_or(false);
            let params = MapParams {
                scope,
                max_nodes,
                max_edges,
                at_time,
                filters: None,
                foci,
                radius,
            };
            match state.store.map_graph(params, as_mermaid)? {
                GraphView::Mermaid(diagram) => Ok(json!({
                    "content": [{ "type": "text", "text": diagram }],
                })),
                GraphView::Json(result) => Ok(json!({
                    "content": [{ "type": "text", "text": format!("{} node(s), {} edge(s)", result.nodes.len(), result.edges.len()) }],
                    "structuredContent": { "nodes": result.nodes, "edges": result.edges }
                })),
            }
        }
        "tags" => {
            let action = require_str(&args, "action")?;
            let tags: Vec<String> = args
                .get("tags")
                .and_then(JsonValue::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            match action {
                "add" => {
                    let id = require_str(&args, "id")?;
                    let n = state.store.tag_add(TagTarget::Id(id.to_string()), &tags)?;
                    Ok(json!({ "content": [{ "type": "text", "text": format!("updated {n} document(s)") }], "structuredContent": { "updated": n } }))
                }
                "remove" => {
                    let id = require_str(&args, "id")?;
                    let n = state.store.tag_remove(TagTarget::Id(id.to_string()), &tags)?;
                    Ok(json!({ "content": [{ "type": "text", "text": format!("updated {n} document(s)") }], "structuredContent": { "updated": n } }))
                }
                "rename" => {
                    let from = require_str(&args, "from")?;
                    let to = require_str(&args, "to")?;
                    let n = state.store.tag_rename(from, to)?;
                    Ok(json!({ "content": [{ "type": "text", "text": format!("renamed in {n} document(s)") }], "structuredContent": { "updated": n } }))
                }
                "list" => {
                    let counts = state.store.tag_list()?;
                    Ok(json!({ "content": [{ "type": "text", "text": format!("{} distinct tag(s)", counts.len()) }], "structuredContent": { "tags": counts } }))
                }
                "get" => {
                    let id = require_str(&args, "id")?;
                    let tags = state.store.tag_get(id)?;
                    Ok(json!({ "content": [{ "type": "text", "text": format!("{} tag(s)", tags.len()) }], "structuredContent": { "tags": tags } }))
                }
                other => anyhow::bail!("unknown tag action: {other}"),
            }
        }
        "get_document_timeline" => {
            let id = require_str(&args, "id")?;
            let timeline = state.store.get_document_timeline(id)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} entr(ies)", timeline.len()) }],
                "structuredContent": { "timeline": timeline }
            }))
        }
        "compare_versions" => {
            let id = require_str(&args, "id")?;
            let v1 = args.get("v1").and_then(JsonValue::as_u64).context("v1 is required")?;
            let v2 = args.get("v2").and_then(JsonValue::as_u64).context("v2 is required")?;
            let diff = state.store.compare_versions(id, v1, v2)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("diff v{v1} -> v{v2}") }],
                "structuredContent": diff
            }))
        }
        "get_created_between" => {
            let start = require_time(&args, "start")?;
            let end = require_time(&args, "end")?;
            let documents = state.store.get_created_between(start, end)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} document(s)", documents.len()) }],
                "structuredContent": { "documents": documents }
            }))
        }
        "get_modified_between" => {
            let start = require_time(&args, "start")?;
            let end = require_time(&args, "end")?;
            let documents = state.store.get_modified_between(start, end)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} document(s)", documents.len()) }],
                "structuredContent": { "documents": documents }
            }))
        }
        "get_deleted_between" => {
            let start = require_time(&args, "start")?;
            let end = require_time(&args, "end")?;
            let documents = state.store.get_deleted_between(start, end)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} document(s)", documents.len()) }],
                "structuredContent": { "documents": documents }
            }))
        }
        "stats" => {
            let stats = state.store.stats()?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} node(s), {} edge(s)", stats.node_count, stats.edge_count) }],
                "structuredContent": stats
            }))
        }
        "check_integrity" => {
            let report = state.store.check_integrity()?;
            Ok(json!({
                "content": [{ "type": "text", "text": "integrity check complete" }],
                "structuredContent": report
            }))
        }
        "rebuild_search_index" => {
            let n = state.store.rebuild_search_index()?;
            info!("rebuilt {n} embedding(s)");
            Ok(json!({
                "content": [{ "type": "text", "text": format!("reindexed {n} document(s)") }],
                "structuredContent": { "reindexed": n }
            }))
        }
        _ => anyhow::bail!("unknown tool: {name}"),
    }
}

fn require_str<'a>(args: &'a JsonValue, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(JsonValue::as_str)
        .with_context(|| format!("{key} is required"))
}

fn parse_optional_time(v: Option<&JsonValue>) -> Result<Option<DateTime<Utc>>> {
    match v.and_then(JsonValue::as_str) {
        Some(s) => Ok(Some(s.parse::<DateTime<Utc>>().context("timestamp must be RFC3339")?)),
        None => Ok(None),
    }
}

fn require_time(args: &JsonValue, key: &str) -> Result<DateTime<Utc>> {
    let s = require_str(args, key)?;
    s.parse::<DateTime<Utc>>()
        .with_context(|| format!("{key} must be RFC3339"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn temp_state() -> AppState {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        AppState {
            store: Store::open(&path).unwrap(),
        }
    }

    #[test]
    fn add_then_get_document_round_trips() {
        let mut state = temp_state();
        call_tool(
            &mut state,
            Some(&json!({ "name": "add_document", "arguments": { "id": "doc1", "content": "hello" } })),
        )
        .unwrap();

        let out = call_tool(
            &mut state,
            Some(&json!({ "name": "get_document", "arguments": { "id": "doc1" } })),
        )
        .unwrap();

        let content = out
            .get("structuredContent")
            .and_then(|v| v.get("content"))
            .and_then(JsonValue::as_str)
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn read_message_rejects_oversized_frame() {
        let raw = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_BYTES + 1);
        let mut cursor = Cursor::new(raw.into_bytes());
        let err = read_message(&mut cursor).expect_err("oversized frame must fail");
        assert!(err.to_string().contains("exceeds max allowed"));
    }

    #[test]
    fn add_document_rejects_oversized_content() {
        let mut state = temp_state();
        let huge = "a".repeat(MAX_CONTENT_BYTES + 1);
        let err = call_tool(
            &mut state,
            Some(&json!({ "name": "add_document", "arguments": { "id": "doc1", "content": huge } })),
        )
        .expect_err("oversized content must fail");
        assert!(err.to_string().contains("exceeds max allowed"));
    }

    #[test]
    fn add_relationship_then_find_path() {
        let mut state = temp_state();
        for id in ["a", "b"] {
            call_tool(
                &mut state,
                Some(&json!({ "name": "add_document", "arguments": { "id": id, "content": id } })),
            )
            .unwrap();
        }
        call_tool(
            &mut state,
            Some(&json!({ "name": "add_relationship", "arguments": { "from": "a", "to": "b" } })),
        )
        .unwrap();

        let out = call_tool(
            &mut state,
            Some(&json!({ "name": "find_path", "arguments": { "from": "a", "to": "b" } })),
        )
        .unwrap();
        let length = out
            .get("structuredContent")
            .and_then(|v| v.get("length"))
            .and_then(JsonValue::as_u64)
            .unwrap();
        assert_eq!(length, 1);
    }

    #[test]
    fn get_created_between_finds_new_document() {
        let mut state = temp_state();
        call_tool(
            &mut state,
            Some(&json!({ "name": "add_document", "arguments": { "id": "doc1", "content": "hello" } })),
        )
        .unwrap();

        let out = call_tool(
            &mut state,
            Some(&json!({
                "name": "get_created_between",
                "arguments": { "start": "2000-01-01T00:00:00Z", "end": "2100-01-01T00:00:00Z" }
            })),
        )
        .unwrap();
        let documents = out["structuredContent"]["documents"].as_array().unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[test]
    fn explore_graph_warns_on_unsupported_strategy() {
        let mut state = temp_state();
        call_tool(
            &mut state,
            Some(&json!({ "name": "add_document", "arguments": { "id": "doc1", "content": "hello" } })),
        )
        .unwrap();

        let out = call_tool(
            &mut state,
            Some(&json!({
                "name": "explore_graph",
                "arguments": { "start": "doc1", "strategy": "dfs" }
            })),
        )
        .unwrap();
        assert_eq!(out["structuredContent"]["strategy"], "breadth");
        let warnings = out["structuredContent"]["warnings"].as_array().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].as_str().unwrap().contains("dfs"));
    }

    #[test]
    fn unknown_tool_errors() {
        let mut state = temp_state();
        let err = call_tool(&mut state, Some(&json!({ "name": "bogus", "arguments": {} })))
            .expect_err("unknown tool must fail");
        assert!(err.to_string().contains("unknown tool"));
    }
}
