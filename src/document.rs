use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Index of a node inside a [`DocumentTree`] arena.
///
/// Ids stay valid for the lifetime of the tree: splicing a node out of its
/// parent orphans it but never moves other nodes, so offset tables computed
/// before a mutation keep pointing at the right leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Annotation category. Re-annotating a category replaces only its own markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Grammar,
    Glossary,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Grammar => "grammar",
            Category::Glossary => "glossary",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Inline formatting carried by a text run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marks {
    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub code: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Marks {
    pub fn is_plain(&self) -> bool {
        *self == Marks::default()
    }
}

/// Metadata attached to a highlighted sub-range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub category: Category,
    pub message: String,
    pub short_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    Quote,
    ListItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Block(BlockKind),
    Text { text: String, marks: Marks },
    Marker(Marker),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

// ─── Serialized form ───────────────────────────────────────────────────────────

/// Block-level node as stored in `Note::content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Block {
    Paragraph {
        #[serde(default)]
        content: Vec<Inline>,
    },
    Heading {
        level: u8,
        #[serde(default)]
        content: Vec<Inline>,
    },
    Quote {
        #[serde(default)]
        content: Vec<Block>,
    },
    ListItem {
        #[serde(default)]
        content: Vec<Block>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inline {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Marks::is_plain")]
        marks: Marks,
    },
    Annotation {
        category: Category,
        message: String,
        #[serde(default, rename = "shortMessage", skip_serializing_if = "Option::is_none")]
        short_message: Option<String>,
        #[serde(default)]
        content: Vec<Inline>,
    },
}

// ─── Arena tree ────────────────────────────────────────────────────────────────

/// Structured, formatted note content stored as an arena of nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "Vec<Block>", into = "Vec<Block>")]
pub struct DocumentTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    /// One paragraph per line. Line breaks stay inside the text runs so the
    /// projection of the result is exactly `text`.
    pub fn from_plain_text(text: &str) -> Self {
        let mut tree = Self::new();
        for line in text.split_inclusive('\n') {
            let para = tree.push_block(tree.root, BlockKind::Paragraph);
            tree.push_text(para, line, Marks::default());
        }
        tree
    }

    /// Parse `Note::content`. The empty string is the empty document.
    pub fn from_content(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(content).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    /// Serialize for `Note::content`. Only the empty document becomes `""`.
    pub fn to_content(&self) -> Result<String> {
        if self.children(self.root).is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(&self.to_blocks()).map_err(|e| Error::InvalidDocument(e.to_string()))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn marks(&self, id: NodeId) -> Option<&Marks> {
        match &self.nodes[id.0].kind {
            NodeKind::Text { marks, .. } => Some(marks),
            _ => None,
        }
    }

    pub fn marker(&self, id: NodeId) -> Option<&Marker> {
        match &self.nodes[id.0].kind {
            NodeKind::Marker(m) => Some(m),
            _ => None,
        }
    }

    /// All attached nodes below `id` in depth-first pre-order (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Markers of `category` currently attached to the tree.
    pub fn markers(&self, category: Category) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|id| self.marker(*id).is_some_and(|m| m.category == category))
            .collect()
    }

    // ─── Construction ──────────────────────────────────────────────────────────

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.alloc(kind);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn push_block(&mut self, parent: NodeId, kind: BlockKind) -> NodeId {
        self.append(parent, NodeKind::Block(kind))
    }

    pub fn push_text(&mut self, parent: NodeId, text: &str, marks: Marks) -> NodeId {
        self.append(
            parent,
            NodeKind::Text {
                text: text.to_string(),
                marks,
            },
        )
    }

    pub fn push_marker(&mut self, parent: NodeId, marker: Marker) -> NodeId {
        self.append(parent, NodeKind::Marker(marker))
    }

    /// Allocate a detached text node, to be attached with [`Self::splice`].
    pub(crate) fn detached_text(&mut self, text: &str, marks: Marks) -> NodeId {
        self.alloc(NodeKind::Text {
            text: text.to_string(),
            marks,
        })
    }

    /// Allocate a detached marker wrapping a single text run.
    pub(crate) fn detached_marker(&mut self, marker: Marker, text: &str, marks: Marks) -> NodeId {
        let id = self.alloc(NodeKind::Marker(marker));
        let child = self.detached_text(text, marks);
        self.nodes[child.0].parent = Some(id);
        self.nodes[id.0].children.push(child);
        id
    }

    // ─── Mutation ──────────────────────────────────────────────────────────────

    /// Replace `old` in its parent's child list by `replacement`, in order.
    /// `old` becomes detached; its id stays valid.
    pub(crate) fn splice(&mut self, old: NodeId, replacement: Vec<NodeId>) {
        let Some(parent) = self.nodes[old.0].parent else {
            return;
        };
        let Some(pos) = self.nodes[parent.0].children.iter().position(|c| *c == old) else {
            return;
        };
        for id in &replacement {
            self.nodes[id.0].parent = Some(parent);
        }
        self.nodes[parent.0].children.splice(pos..=pos, replacement);
        self.nodes[old.0].parent = None;
    }

    /// Remove a wrapper node, re-splicing its children into its parent.
    pub(crate) fn unwrap_node(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        self.splice(id, children);
    }

    /// Merge adjacent text siblings with identical formatting, everywhere below `id`.
    pub(crate) fn merge_adjacent_text(&mut self, id: NodeId) {
        let children = self.nodes[id.0].children.clone();
        let mut merged: Vec<NodeId> = Vec::with_capacity(children.len());
        for child in children {
            if let Some(&prev) = merged.last() {
                if let (
                    NodeKind::Text { marks: a, .. },
                    NodeKind::Text { text: tail, marks: b },
                ) = (&self.nodes[prev.0].kind, &self.nodes[child.0].kind)
                {
                    if a == b {
                        let tail = tail.clone();
                        if let NodeKind::Text { text, .. } = &mut self.nodes[prev.0].kind {
                            text.push_str(&tail);
                        }
                        self.nodes[child.0].parent = None;
                        continue;
                    }
                }
            }
            merged.push(child);
        }
        self.nodes[id.0].children = merged.clone();
        for child in merged {
            self.merge_adjacent_text(child);
        }
    }

    // ─── Serialized form conversion ────────────────────────────────────────────

    pub fn to_blocks(&self) -> Vec<Block> {
        self.children(self.root)
            .iter()
            .filter_map(|id| self.block_of(*id))
            .collect()
    }

    fn block_of(&self, id: NodeId) -> Option<Block> {
        let NodeKind::Block(kind) = self.kind(id) else {
            return None;
        };
        let inlines = || -> Vec<Inline> {
            self.children(id).iter().filter_map(|c| self.inline_of(*c)).collect()
        };
        let blocks = || -> Vec<Block> {
            self.children(id).iter().filter_map(|c| self.block_of(*c)).collect()
        };
        Some(match kind {
            BlockKind::Paragraph => Block::Paragraph { content: inlines() },
            BlockKind::Heading(level) => Block::Heading {
                level: *level,
                content: inlines(),
            },
            BlockKind::Quote => Block::Quote { content: blocks() },
            BlockKind::ListItem => Block::ListItem { content: blocks() },
        })
    }

    fn inline_of(&self, id: NodeId) -> Option<Inline> {
        match self.kind(id) {
            NodeKind::Text { text, marks } => Some(Inline::Text {
                text: text.clone(),
                marks: marks.clone(),
            }),
            NodeKind::Marker(m) => Some(Inline::Annotation {
                category: m.category,
                message: m.message.clone(),
                short_message: m.short_message.clone(),
                content: self
                    .children(id)
                    .iter()
                    .filter_map(|c| self.inline_of(*c))
                    .collect(),
            }),
            _ => None,
        }
    }

    fn attach_block(&mut self, parent: NodeId, block: Block) {
        match block {
            Block::Paragraph { content } => {
                let id = self.push_block(parent, BlockKind::Paragraph);
                self.attach_inlines(id, content);
            }
            Block::Heading { level, content } => {
                let id = self.push_block(parent, BlockKind::Heading(level.clamp(1, 6)));
                self.attach_inlines(id, content);
            }
            Block::Quote { content } => {
                let id = self.push_block(parent, BlockKind::Quote);
                content.into_iter().for_each(|b| self.attach_block(id, b));
            }
            Block::ListItem { content } => {
                let id = self.push_block(parent, BlockKind::ListItem);
                content.into_iter().for_each(|b| self.attach_block(id, b));
            }
        }
    }

    fn attach_inlines(&mut self, parent: NodeId, inlines: Vec<Inline>) {
        for inline in inlines {
            match inline {
                Inline::Text { text, marks } => {
                    self.append(parent, NodeKind::Text { text, marks });
                }
                Inline::Annotation {
                    category,
                    message,
                    short_message,
                    content,
                } => {
                    let id = self.push_marker(
                        parent,
                        Marker {
                            category,
                            message,
                            short_message,
                        },
                    );
                    self.attach_inlines(id, content);
                }
            }
        }
    }

    // ─── Display ───────────────────────────────────────────────────────────────

    /// Render for display. All text and attribute values are escaped.
    pub fn render_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root) {
            self.render_node(*child, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, out: &mut String) {
        let render_children = |out: &mut String| {
            for child in self.children(id) {
                self.render_node(*child, out);
            }
        };
        match self.kind(id) {
            NodeKind::Root => render_children(out),
            NodeKind::Block(kind) => {
                let tag = match kind {
                    BlockKind::Paragraph => "p".to_string(),
                    BlockKind::Heading(level) => format!("h{level}"),
                    BlockKind::Quote => "blockquote".to_string(),
                    BlockKind::ListItem => "li".to_string(),
                };
                out.push_str(&format!("<{tag}>"));
                render_children(out);
                out.push_str(&format!("</{tag}>"));
            }
            NodeKind::Text { text, marks } => render_text(text, marks, out),
            NodeKind::Marker(m) => {
                out.push_str(&format!(
                    "<mark class=\"annotation annotation-{}\" data-message=\"{}\"",
                    m.category,
                    escape_html(&m.message)
                ));
                if let Some(short) = &m.short_message {
                    out.push_str(&format!(" data-short-message=\"{}\"", escape_html(short)));
                }
                out.push('>');
                render_children(out);
                out.push_str("</mark>");
            }
        }
    }
}

fn render_text(text: &str, marks: &Marks, out: &mut String) {
    let mut close = Vec::new();
    if let Some(href) = &marks.link {
        out.push_str(&format!("<a href=\"{}\">", escape_html(href)));
        close.push("a");
    }
    for (on, tag) in [
        (marks.bold, "strong"),
        (marks.italic, "em"),
        (marks.underline, "u"),
        (marks.code, "code"),
    ] {
        if on {
            out.push_str(&format!("<{tag}>"));
            close.push(tag);
        }
    }
    out.push_str(&escape_html(text));
    for tag in close.iter().rev() {
        out.push_str(&format!("</{tag}>"));
    }
}

/// Escape the five markup-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl From<Vec<Block>> for DocumentTree {
    fn from(blocks: Vec<Block>) -> Self {
        let mut tree = DocumentTree::new();
        let root = tree.root;
        for block in blocks {
            tree.attach_block(root, block);
        }
        tree
    }
}

impl From<DocumentTree> for Vec<Block> {
    fn from(tree: DocumentTree) -> Self {
        tree.to_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bold() -> Marks {
        Marks {
            bold: true,
            ..Marks::default()
        }
    }

    #[test]
    fn content_round_trips_through_json() {
        let mut tree = DocumentTree::new();
        let h = tree.push_block(tree.root(), BlockKind::Heading(2));
        tree.push_text(h, "Title", Marks::default());
        let p = tree.push_block(tree.root(), BlockKind::Paragraph);
        tree.push_text(p, "Some ", Marks::default());
        tree.push_text(p, "bold", bold());

        let content = tree.to_content().unwrap();
        let back = DocumentTree::from_content(&content).unwrap();
        assert_eq!(back.to_blocks(), tree.to_blocks());
        assert!(content.contains("\"type\":\"heading\""));
    }

    #[test]
    fn empty_content_is_empty_document() {
        let tree = DocumentTree::from_content("").unwrap();
        assert!(tree.children(tree.root()).is_empty());
        assert_eq!(tree.to_content().unwrap(), "");
    }

    #[test]
    fn blank_paragraph_is_not_stored_as_empty_document() {
        let mut tree = DocumentTree::new();
        tree.push_block(tree.root(), BlockKind::Paragraph);
        let content = tree.to_content().unwrap();
        assert!(!content.is_empty());
        let back = DocumentTree::from_content(&content).unwrap();
        assert_eq!(back.children(back.root()).len(), 1);
    }

    #[test]
    fn malformed_content_is_rejected() {
        let err = DocumentTree::from_content("{not json").unwrap_err();
        assert!(matches!(err, Error::InvalidDocument(_)));
    }

    #[test]
    fn splice_keeps_other_ids_valid() {
        let mut tree = DocumentTree::new();
        let p = tree.push_block(tree.root(), BlockKind::Paragraph);
        let a = tree.push_text(p, "a", Marks::default());
        let b = tree.push_text(p, "b", Marks::default());
        let x = tree.detached_text("x", Marks::default());
        let y = tree.detached_text("y", Marks::default());
        tree.splice(a, vec![x, y]);
        assert_eq!(tree.children(p), &[x, y, b]);
        assert_eq!(tree.parent(a), None);
        assert_eq!(tree.text(b), Some("b"));
    }

    #[test]
    fn merge_adjacent_text_respects_marks() {
        let mut tree = DocumentTree::new();
        let p = tree.push_block(tree.root(), BlockKind::Paragraph);
        tree.push_text(p, "a", Marks::default());
        tree.push_text(p, "b", Marks::default());
        tree.push_text(p, "c", bold());
        tree.merge_adjacent_text(tree.root());
        let texts: Vec<_> = tree.children(p).iter().map(|c| tree.text(*c).unwrap()).collect();
        assert_eq!(texts, vec!["ab", "c"]);
    }

    #[test]
    fn render_html_escapes_text_and_messages() {
        let mut tree = DocumentTree::new();
        let p = tree.push_block(tree.root(), BlockKind::Paragraph);
        let m = tree.push_marker(
            p,
            Marker {
                category: Category::Glossary,
                message: "x\" onmouseover=\"alert(1)".to_string(),
                short_message: None,
            },
        );
        tree.push_text(m, "<script>", bold());
        let html = tree.render_html();
        assert_eq!(
            html,
            "<p><mark class=\"annotation annotation-glossary\" \
             data-message=\"x&quot; onmouseover=&quot;alert(1)\">\
             <strong>&lt;script&gt;</strong></mark></p>"
        );
    }
}
