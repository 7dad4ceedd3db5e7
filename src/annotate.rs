use std::collections::BTreeSet;

use crate::document::{Category, DocumentTree, Marker, NodeId};
use crate::projection::{byte_offset, project, LeafRange};
use crate::types::AnnotationMatch;

/// A non-overlapping range ready to be rendered, in chars of the projected text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub message: String,
    pub short_message: Option<String>,
}

/// Resolve overlapping analyzer matches with leftmost priority.
///
/// Matches are stable-sorted by offset (equal offsets keep response order),
/// then each is clipped to start no earlier than the end of the previously
/// emitted span. Matches clipped to nothing are dropped.
// TODO: equal-offset ties follow analyzer response order; consider a
// severity or length tie-break once analyzers expose one.
pub fn merge_matches(matches: &[AnnotationMatch]) -> Vec<Span> {
    let mut sorted: Vec<&AnnotationMatch> = matches.iter().collect();
    sorted.sort_by_key(|m| m.offset);

    let mut cursor = 0;
    let mut spans = Vec::with_capacity(sorted.len());
    for m in sorted {
        let start = cursor.max(m.offset);
        let end = m.offset.saturating_add(m.length);
        if start >= end {
            continue;
        }
        spans.push(Span {
            start,
            end,
            message: m.message.clone(),
            short_message: m.short_message.clone(),
        });
        cursor = end;
    }
    spans
}

/// Unwrap every marker of `category`, then merge text runs that became adjacent.
/// Returns how many markers were removed.
pub fn strip_category(tree: &mut DocumentTree, category: Category) -> usize {
    let markers = tree.markers(category);
    let mut parents = BTreeSet::new();
    for id in &markers {
        // An outer marker of the same category may already have moved this one.
        if let Some(parent) = tree.parent(*id) {
            tree.unwrap_node(*id);
            parents.insert(parent);
        }
    }
    for parent in parents {
        // A parent that was itself an unwrapped marker is detached by now.
        if tree.parent(parent).is_some() || parent == tree.root() {
            tree.merge_adjacent_text(parent);
        }
    }
    markers.len()
}

/// Apply `matches` to `tree` as markers of `category`.
///
/// Existing markers of the same category are removed first, so applying the
/// same matches again gives the same tree. Leaves touched by a span are split
/// into plain and highlighted runs that keep the leaf's formatting; the
/// projected text is unchanged. Returns the number of spans applied.
pub fn annotate(tree: &mut DocumentTree, category: Category, matches: &[AnnotationMatch]) -> usize {
    let removed = strip_category(tree, category);
    let projection = project(tree);
    let len = projection.len();

    let spans: Vec<Span> = merge_matches(matches)
        .into_iter()
        .filter(|s| s.start < len)
        .map(|mut s| {
            s.end = s.end.min(len);
            s
        })
        .collect();

    let mut first = 0;
    for leaf in &projection.leaves {
        if leaf.start == leaf.end {
            continue;
        }
        while first < spans.len() && spans[first].end <= leaf.start {
            first += 1;
        }
        let hits: Vec<&Span> = spans[first..]
            .iter()
            .take_while(|s| s.start < leaf.end)
            .collect();
        if !hits.is_empty() {
            split_leaf(tree, leaf, &hits, category);
        }
    }

    tracing::debug!(
        category = %category,
        removed,
        spans = spans.len(),
        "annotated document"
    );
    spans.len()
}

fn split_leaf(tree: &mut DocumentTree, leaf: &LeafRange, hits: &[&Span], category: Category) {
    let (Some(text), Some(marks)) = (tree.text(leaf.leaf), tree.marks(leaf.leaf)) else {
        return;
    };
    let text = text.to_string();
    let marks = marks.clone();
    let slice = |from: usize, to: usize| -> String {
        let a = byte_offset(&text, from - leaf.start);
        let b = byte_offset(&text, to - leaf.start);
        text[a..b].to_string()
    };

    let mut pieces: Vec<NodeId> = Vec::new();
    let mut pos = leaf.start;
    for span in hits {
        let start = span.start.max(leaf.start);
        let end = span.end.min(leaf.end);
        if pos < start {
            pieces.push(tree.detached_text(&slice(pos, start), marks.clone()));
        }
        let marker = Marker {
            category,
            message: span.message.clone(),
            short_message: span.short_message.clone(),
        };
        pieces.push(tree.detached_marker(marker, &slice(start, end), marks.clone()));
        pos = end;
    }
    if pos < leaf.end {
        pieces.push(tree.detached_text(&slice(pos, leaf.end), marks.clone()));
    }
    tree.splice(leaf.leaf, pieces);
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    use super::*;
    use crate::document::{Block, BlockKind, Inline, Marks};

    fn m(offset: usize, length: usize, message: &str) -> AnnotationMatch {
        AnnotationMatch {
            offset,
            length,
            message: message.to_string(),
            short_message: None,
        }
    }

    fn ranges(spans: &[Span]) -> Vec<(usize, usize, &str)> {
        spans.iter().map(|s| (s.start, s.end, s.message.as_str())).collect()
    }

    #[rstest]
    #[case::disjoint(vec![m(5, 2, "b"), m(0, 3, "a")], vec![(0, 3, "a"), (5, 7, "b")])]
    #[case::overlap_clipped(vec![m(0, 5, "a"), m(3, 4, "b")], vec![(0, 5, "a"), (5, 7, "b")])]
    #[case::contained_dropped(vec![m(0, 10, "a"), m(2, 3, "b")], vec![(0, 10, "a")])]
    #[case::tie_keeps_response_order(vec![m(4, 2, "first"), m(4, 5, "second")], vec![(4, 6, "first"), (6, 9, "second")])]
    #[case::zero_length_dropped(vec![m(1, 0, "a")], vec![])]
    fn merger_uses_leftmost_priority(
        #[case] matches: Vec<AnnotationMatch>,
        #[case] expected: Vec<(usize, usize, &str)>,
    ) {
        assert_eq!(ranges(&merge_matches(&matches)), expected);
    }

    #[test]
    fn wraps_exactly_the_flagged_word() {
        let mut tree = DocumentTree::from_plain_text("Teh cat sat.");
        let applied = annotate(&mut tree, Category::Grammar, &[m(0, 3, "Spelling")]);
        assert_eq!(applied, 1);
        assert_eq!(
            tree.to_blocks(),
            vec![Block::Paragraph {
                content: vec![
                    Inline::Annotation {
                        category: Category::Grammar,
                        message: "Spelling".into(),
                        short_message: None,
                        content: vec![Inline::Text {
                            text: "Teh".into(),
                            marks: Marks::default(),
                        }],
                    },
                    Inline::Text {
                        text: " cat sat.".into(),
                        marks: Marks::default(),
                    },
                ],
            }]
        );
    }

    #[test]
    fn split_runs_inherit_formatting_and_untouched_leaves_stay() {
        let bold = Marks {
            bold: true,
            ..Marks::default()
        };
        let mut tree = DocumentTree::new();
        let p = tree.push_block(tree.root(), BlockKind::Paragraph);
        tree.push_text(p, "plain ", Marks::default());
        tree.push_text(p, "bold text", bold.clone());
        let p2 = tree.push_block(tree.root(), BlockKind::Paragraph);
        let untouched = tree.push_text(p2, " tail", Marks::default());

        // Spans the leaf boundary between "plain " and "bold text".
        annotate(&mut tree, Category::Grammar, &[m(3, 7, "x")]);

        assert_eq!(project(&tree).text, "plain bold text tail");
        assert_eq!(tree.children(p2), &[untouched]);
        let markers = tree.markers(Category::Grammar);
        assert_eq!(markers.len(), 2);
        let inner = tree.children(markers[1])[0];
        assert_eq!(tree.text(inner), Some("bold"));
        assert_eq!(tree.marks(inner), Some(&bold));
    }

    #[test]
    fn reapplying_is_idempotent() {
        let mut tree = DocumentTree::from_plain_text("Teh cat sat on teh mat.");
        let matches = [m(0, 3, "Spelling"), m(15, 3, "Spelling")];
        annotate(&mut tree, Category::Grammar, &matches);
        let once = tree.to_blocks();
        annotate(&mut tree, Category::Grammar, &matches);
        assert_eq!(tree.to_blocks(), once);
    }

    #[test]
    fn reannotating_replaces_only_its_own_category() {
        let mut tree = DocumentTree::from_plain_text("alpha beta gamma");
        annotate(&mut tree, Category::Glossary, &[m(6, 4, "second letter")]);
        annotate(&mut tree, Category::Grammar, &[m(0, 5, "a")]);
        annotate(&mut tree, Category::Grammar, &[m(11, 5, "g")]);

        assert_eq!(tree.markers(Category::Glossary).len(), 1);
        let grammar = tree.markers(Category::Grammar);
        assert_eq!(grammar.len(), 1);
        assert_eq!(tree.text(tree.children(grammar[0])[0]), Some("gamma"));
        assert_eq!(project(&tree).text, "alpha beta gamma");
    }

    #[test]
    fn out_of_bounds_matches_are_clipped() {
        let mut tree = DocumentTree::from_plain_text("short");
        let applied = annotate(&mut tree, Category::Grammar, &[m(3, 50, "x"), m(40, 2, "y")]);
        assert_eq!(applied, 1);
        assert_eq!(project(&tree).text, "short");
    }

    #[test]
    fn annotation_never_changes_projected_text() {
        let mut rng = StdRng::seed_from_u64(7);
        let source = "Ünïcode text, with\nseveral lines and some längere Wörter.\nEnd";
        for _ in 0..200 {
            let mut tree = DocumentTree::from_plain_text(source);
            let len = source.chars().count();
            let matches: Vec<_> = (0..rng.gen_range(0..8))
                .map(|i| m(rng.gen_range(0..len), rng.gen_range(0..12), &i.to_string()))
                .collect();
            annotate(&mut tree, Category::Grammar, &matches);
            annotate(&mut tree, Category::Glossary, &matches);
            assert_eq!(project(&tree).text, source);
            let content = tree.to_content().unwrap();
            let reloaded = DocumentTree::from_content(&content).unwrap();
            assert_eq!(project(&reloaded).text, source);
        }
    }
}
