use crate::document::{DocumentTree, NodeId};

/// Offset range of one text leaf inside the projected text, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRange {
    pub leaf: NodeId,
    pub start: usize,
    pub end: usize,
}

/// Flattened view of a document: the text analyzers see, plus the table
/// mapping every text leaf back to its `[start, end)` range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlainTextProjection {
    pub text: String,
    pub leaves: Vec<LeafRange>,
}

impl PlainTextProjection {
    /// Length of the projected text in chars.
    pub fn len(&self) -> usize {
        self.leaves.last().map(|l| l.end).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Depth-first walk concatenating text leaves in document order.
/// Ranges are contiguous: each leaf starts where the previous one ended.
pub fn project(tree: &DocumentTree) -> PlainTextProjection {
    let mut projection = PlainTextProjection::default();
    let mut cursor = 0;
    for id in tree.descendants(tree.root()) {
        if let Some(text) = tree.text(id) {
            let len = text.chars().count();
            projection.text.push_str(text);
            projection.leaves.push(LeafRange {
                leaf: id,
                start: cursor,
                end: cursor + len,
            });
            cursor += len;
        }
    }
    projection
}

/// Byte index of the `char_idx`-th char of `s` (or `s.len()` past the end).
pub(crate) fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices().nth(char_idx).map(|(b, _)| b).unwrap_or(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{BlockKind, Category, Marker, Marks};

    #[test]
    fn ranges_are_contiguous_in_document_order() {
        let mut tree = DocumentTree::new();
        let p1 = tree.push_block(tree.root(), BlockKind::Paragraph);
        let a = tree.push_text(p1, "héllo ", Marks::default());
        let m = tree.push_marker(
            p1,
            Marker {
                category: Category::Grammar,
                message: "m".into(),
                short_message: None,
            },
        );
        let b = tree.push_text(m, "wörld", Marks::default());
        let p2 = tree.push_block(tree.root(), BlockKind::Quote);
        let p3 = tree.push_block(p2, BlockKind::Paragraph);
        let c = tree.push_text(p3, "!", Marks::default());

        let projection = project(&tree);
        assert_eq!(projection.text, "héllo wörld!");
        assert_eq!(
            projection.leaves,
            vec![
                LeafRange { leaf: a, start: 0, end: 6 },
                LeafRange { leaf: b, start: 6, end: 11 },
                LeafRange { leaf: c, start: 11, end: 12 },
            ]
        );
        assert_eq!(projection.len(), 12);
    }

    #[test]
    fn empty_tree_projects_to_empty_text() {
        let projection = project(&DocumentTree::new());
        assert!(projection.is_empty());
        assert!(projection.leaves.is_empty());
    }

    #[test]
    fn byte_offset_handles_multibyte() {
        assert_eq!(byte_offset("héllo", 2), 3);
        assert_eq!(byte_offset("héllo", 9), 6);
    }
}
