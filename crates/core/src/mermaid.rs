//! Mermaid diagram rendering for `map_graph` (spec §6).

use crate::model::{Edge, Node};

/// Replaces every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn palette_color(key: &str) -> Option<&'static str> {
    match key {
        "contract" => Some("#90EE90"),
        "email" => Some("#87CEEB"),
        "note" => Some("#FFB6C1"),
        "draft" => Some("#FFDAB9"),
        "review" => Some("#F0E68C"),
        "final" => Some("#90EE90"),
        "urgent" => Some("#FF6347"),
        _ => None,
    }
}

pub fn render(nodes: &[Node], edges: &[Edge]) -> String {
    let mut out = String::from("graph TD\n");

    for node in nodes {
        let sanitized = sanitize_id(&node.id);
        let meta = node.metadata_with_type_folded();
        let emoji = meta.get_str("emoji").unwrap_or("");
        let label = match meta.get_str("status") {
            Some(status) => format!("{emoji} {}<br/>{status}", node.id),
            None => format!("{emoji} {}<br/>v{}", node.id, node.version),
        };
        out.push_str(&format!("  {sanitized}[\"{label}\"]\n"));

        let color_key = meta
            .get_str("status")
            .or(meta.get_str("type"))
            .unwrap_or(&node.node_type);
        if let Some(color) = palette_color(color_key) {
            out.push_str(&format!("  style {sanitized} fill:{color}\n"));
        }
        if meta.tags().iter().any(|t| t == "urgent") {
            out.push_str(&format!("  style {sanitized} stroke:#FF0000,stroke-width:3px\n"));
        }
    }

    for edge in edges {
        let from = sanitize_id(&edge.from_node);
        let to = sanitize_id(&edge.to_node);
        out.push_str(&format!("  {from} -->|{}| {to}\n", edge.relation));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RichMetadata;
    use chrono::Utc;

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            version: 1,
            node_type: "content".to_string(),
            content: String::new(),
            metadata: RichMetadata::new(),
            created_at: Utc::now(),
            valid_from: Utc::now(),
            valid_until: None,
            supersedes: None,
        }
    }

    #[test]
    fn sanitizes_non_word_characters() {
        assert_eq!(sanitize_id("doc-1.v2"), "doc_1_v2");
    }

    #[test]
    fn renders_node_and_edge_lines() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![Edge {
            from_node: "a".to_string(),
            to_node: "b".to_string(),
            relation: "related".to_string(),
            weight: 1.0,
            metadata: RichMetadata::new(),
            created_at: Utc::now(),
            valid_from: Utc::now(),
            valid_until: None,
            temporal_weight: 1.0,
        }];
        let mermaid = render(&nodes, &edges);
        assert!(mermaid.contains("a[\""));
        assert!(mermaid.contains("a -->|related| b"));
    }

    #[test]
    fn urgent_tag_gets_red_stroke() {
        let mut n = node("a");
        n.metadata.set_tags(vec!["urgent".into()]);
        let mermaid = render(&[n], &[]);
        assert!(mermaid.contains("stroke:#FF0000"));
    }
}
