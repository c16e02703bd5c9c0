//! Structured document tree for plan content.
//!
//! A document is a tree of typed nodes as produced by the rich-text editor:
//! a `Doc` root holding block nodes (headings, paragraphs, bullet lists),
//! which in turn hold inline nodes (text runs, hard breaks). The tree is a
//! plain value: edits replace whole subtrees rather than mutating in place,
//! and identity is structural equality.
//!
//! The tree also has a JSON form (`{"type": "doc", "content": [...]}`), which
//! is what the editor emits and what the store may hold for content saved in
//! tree shape. `from_json` is total: shapes outside the known set land in
//! [`Node::Other`] with their children preserved, never an error.

use serde_json::{Value, json};

/// One node of the structured document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Root node. Holds at least one block after any conversion.
    Doc { content: Vec<Node> },
    /// Section heading, level 1 through 3.
    Heading { level: u8, content: Vec<Node> },
    /// Paragraph of inline content; may be empty.
    Paragraph { content: Vec<Node> },
    /// Unordered list of `ListItem` children.
    BulletList { items: Vec<Node> },
    /// A single list entry; in practice one paragraph.
    ListItem { content: Vec<Node> },
    /// Leaf text run. Empty only as a parsing artifact.
    Text { text: String },
    /// Forced line break inside a paragraph.
    HardBreak,
    /// Unrecognized shape. Children are kept so serialization can fall back
    /// to concatenating them.
    Other { node_type: String, content: Vec<Node> },
}

impl Node {
    /// Build a root node, normalizing an empty block list to one empty
    /// paragraph.
    pub fn doc(content: Vec<Node>) -> Node {
        if content.is_empty() {
            Node::empty_doc()
        } else {
            Node::Doc { content }
        }
    }

    /// The empty document: a root with a single empty paragraph.
    pub fn empty_doc() -> Node {
        Node::Doc {
            content: vec![Node::Paragraph { content: vec![] }],
        }
    }

    /// Heading with a single text run. Level is clamped to [1, 3].
    pub fn heading(level: u8, text: impl Into<String>) -> Node {
        Node::Heading {
            level: level.clamp(1, 3),
            content: vec![Node::text(text)],
        }
    }

    /// Paragraph with a single text run.
    pub fn paragraph(text: impl Into<String>) -> Node {
        Node::Paragraph {
            content: vec![Node::text(text)],
        }
    }

    /// List item holding one paragraph with a single text run.
    pub fn list_item(text: impl Into<String>) -> Node {
        Node::ListItem {
            content: vec![Node::paragraph(text)],
        }
    }

    pub fn text(value: impl Into<String>) -> Node {
        Node::Text { text: value.into() }
    }

    /// Child nodes, regardless of variant. Leaves return an empty slice.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Doc { content }
            | Node::Heading { content, .. }
            | Node::Paragraph { content }
            | Node::ListItem { content }
            | Node::Other { content, .. } => content,
            Node::BulletList { items } => items,
            Node::Text { .. } | Node::HardBreak => &[],
        }
    }

    /// Convert from the editor's JSON shape.
    ///
    /// Total over arbitrary JSON: missing fields default (`level` to 1,
    /// `text` to the empty string), and unknown `type` tags become
    /// [`Node::Other`]. A `doc` with no content normalizes to the empty
    /// document.
    pub fn from_json(value: &Value) -> Node {
        let node_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        let content: Vec<Node> = value
            .get("content")
            .and_then(Value::as_array)
            .map(|nodes| nodes.iter().map(Node::from_json).collect())
            .unwrap_or_default();

        match node_type {
            "doc" => Node::doc(content),
            "heading" => {
                let level = value
                    .get("attrs")
                    .and_then(|attrs| attrs.get("level"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                Node::Heading {
                    level: level.clamp(1, 3) as u8,
                    content,
                }
            }
            "paragraph" => Node::Paragraph { content },
            "bulletList" => Node::BulletList { items: content },
            "listItem" => Node::ListItem { content },
            "text" => Node::Text {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "hardBreak" => Node::HardBreak,
            other => Node::Other {
                node_type: other.to_string(),
                content,
            },
        }
    }

    /// Convert to the editor's JSON shape. Containers with no children omit
    /// the `content` key, matching what the editor itself emits.
    pub fn to_json(&self) -> Value {
        fn with_content(mut value: Value, children: &[Node]) -> Value {
            if !children.is_empty() {
                value["content"] = Value::Array(children.iter().map(Node::to_json).collect());
            }
            value
        }

        match self {
            Node::Doc { content } => with_content(json!({ "type": "doc" }), content),
            Node::Heading { level, content } => with_content(
                json!({ "type": "heading", "attrs": { "level": level } }),
                content,
            ),
            Node::Paragraph { content } => with_content(json!({ "type": "paragraph" }), content),
            Node::BulletList { items } => with_content(json!({ "type": "bulletList" }), items),
            Node::ListItem { content } => with_content(json!({ "type": "listItem" }), content),
            Node::Text { text } => json!({ "type": "text", "text": text }),
            Node::HardBreak => json!({ "type": "hardBreak" }),
            Node::Other { node_type, content } => {
                with_content(json!({ "type": node_type }), content)
            }
        }
    }

    /// Flatten the tree to plain text for the secondary search field.
    ///
    /// Each top-level block contributes its concatenated text runs, blocks
    /// are joined with single newlines, and the result is trimmed. No
    /// structural punctuation is emitted.
    pub fn plain_text(&self) -> String {
        fn collect(node: &Node) -> String {
            match node {
                Node::Text { text } => text.clone(),
                other => other.children().iter().map(collect).collect(),
            }
        }

        match self {
            Node::Doc { content } => content
                .iter()
                .map(collect)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string(),
            other => collect(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Node::doc(vec![Node::heading(1, "Mission")]);
        let b = Node::doc(vec![Node::heading(1, "Mission")]);
        assert_eq!(a, b);
        assert_ne!(a, Node::doc(vec![Node::heading(2, "Mission")]));
    }

    #[test]
    fn test_empty_doc_normalizes() {
        assert_eq!(Node::doc(vec![]), Node::empty_doc());
        assert_eq!(
            Node::from_json(&json!({ "type": "doc" })),
            Node::empty_doc()
        );
    }

    #[test]
    fn test_heading_level_clamped() {
        assert_eq!(Node::heading(0, "x"), Node::heading(1, "x"));
        assert_eq!(Node::heading(7, "x"), Node::heading(3, "x"));

        let from_json = Node::from_json(&json!({
            "type": "heading",
            "attrs": { "level": 9 },
            "content": [{ "type": "text", "text": "x" }],
        }));
        assert_eq!(from_json, Node::heading(3, "x"));
    }

    #[test]
    fn test_heading_level_defaults_to_one() {
        let no_attrs = Node::from_json(&json!({
            "type": "heading",
            "content": [{ "type": "text", "text": "x" }],
        }));
        assert_eq!(no_attrs, Node::heading(1, "x"));
    }

    #[test]
    fn test_unknown_shape_keeps_children() {
        let node = Node::from_json(&json!({
            "type": "blockquote",
            "content": [{ "type": "text", "text": "quoted" }],
        }));
        assert_eq!(
            node,
            Node::Other {
                node_type: "blockquote".to_string(),
                content: vec![Node::text("quoted")],
            }
        );
    }

    #[test]
    fn test_json_round_trip() {
        let tree = Node::doc(vec![
            Node::heading(2, "Idea"),
            Node::paragraph("A tool for founders."),
            Node::BulletList {
                items: vec![Node::list_item("Fast"), Node::list_item("Simple")],
            },
        ]);
        assert_eq!(Node::from_json(&tree.to_json()), tree);
    }

    #[test]
    fn test_empty_paragraph_omits_content_key() {
        let value = Node::empty_doc().to_json();
        assert_eq!(value["content"][0], json!({ "type": "paragraph" }));
    }

    #[test]
    fn test_plain_text_joins_blocks_with_newlines() {
        let tree = Node::doc(vec![
            Node::heading(1, "Mission"),
            Node::paragraph("We build tools."),
            Node::BulletList {
                items: vec![Node::list_item("Fast"), Node::list_item("Simple")],
            },
        ]);
        assert_eq!(tree.plain_text(), "Mission\nWe build tools.\nFastSimple");
    }

    #[test]
    fn test_plain_text_has_no_markdown_punctuation() {
        let tree = Node::doc(vec![
            Node::heading(2, "Team"),
            Node::BulletList {
                items: vec![Node::list_item("Two founders")],
            },
        ]);
        let text = tree.plain_text();
        assert!(!text.contains('#'));
        assert!(!text.contains('-'));
    }
}
