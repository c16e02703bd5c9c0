//! Markdown serialization and parsing for document trees.
//!
//! The markdown string is the durable form of a document; the tree is an
//! ephemeral projection. The pair is intentionally asymmetric: serialization
//! covers every node shape, while parsing is a lossy single pass over lines
//! (one paragraph per non-blank line, no nested lists, no inline marks).
//! Storage round-trips depend on this exact pairing, so widening the parser
//! would change what existing documents reload as. The guaranteed property is
//! a fixed point: one extra serialize/parse/serialize cycle reproduces the
//! same text.

use crate::document::Node;
use serde_json::Value;

/// Render a tree to markdown.
///
/// Deterministic: equal trees yield byte-identical output. Unknown node
/// shapes fall back to concatenating their children.
pub fn serialize(node: &Node) -> String {
    serialize_node(node).trim().to_string()
}

fn serialize_node(node: &Node) -> String {
    match node {
        Node::Doc { content } | Node::Other { content, .. } => {
            content.iter().map(serialize_node).collect()
        }
        Node::Heading { level, content } => {
            let text: String = content.iter().map(serialize_node).collect();
            format!("{} {}\n\n", "#".repeat(*level as usize), text.trim())
        }
        Node::Paragraph { content } => {
            let text: String = content.iter().map(serialize_node).collect();
            format!("{text}\n\n")
        }
        Node::BulletList { items } => {
            let lines: Vec<String> = items
                .iter()
                .map(|item| {
                    let text: String = item.children().iter().map(serialize_node).collect();
                    format!("- {}", text.trim())
                })
                .collect();
            format!("{}\n\n", lines.join("\n"))
        }
        Node::ListItem { content } => {
            let text: String = content.iter().map(serialize_node).collect();
            text.trim().to_string()
        }
        Node::Text { text } => text.clone(),
        Node::HardBreak => "\n".to_string(),
    }
}

/// Parse stored text into a tree. Total: every string yields a document.
///
/// Text that parses as JSON with a top-level `"doc"` tag is taken as the
/// tree form directly and skips the markdown scan. Otherwise lines are
/// classified by prefix: `###`/`##`/`#` headings, `-`/`*` bullet runs
/// (greedy across consecutive bullet lines), blank lines skipped, and
/// anything else a single-line paragraph.
pub fn parse(text: &str) -> Node {
    if text.is_empty() {
        return Node::empty_doc();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.get("type").and_then(Value::as_str) == Some("doc") {
            return Node::from_json(&value);
        }
        // JSON that is not a document falls through to the line scan.
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();

        if line.is_empty() {
            i += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("### ") {
            blocks.push(Node::heading(3, rest));
        } else if let Some(rest) = line.strip_prefix("## ") {
            blocks.push(Node::heading(2, rest));
        } else if let Some(rest) = line.strip_prefix("# ") {
            blocks.push(Node::heading(1, rest));
        } else if is_bullet(line) {
            let mut items = Vec::new();
            while i < lines.len() {
                let item_line = lines[i].trim();
                if !is_bullet(item_line) {
                    break;
                }
                items.push(Node::list_item(item_line[2..].trim()));
                i += 1;
            }
            blocks.push(Node::BulletList { items });
            // The whole run has been consumed; skip the per-block advance.
            continue;
        } else {
            blocks.push(Node::paragraph(line));
        }

        i += 1;
    }

    Node::doc(blocks)
}

fn is_bullet(line: &str) -> bool {
    line.starts_with("- ") || line.starts_with("* ")
}
