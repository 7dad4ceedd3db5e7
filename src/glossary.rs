use regex::{Regex, RegexBuilder};

use crate::annotate::annotate;
use crate::document::{Category, DocumentTree};
use crate::projection::project;
use crate::types::{AnnotationMatch, GlossaryTerm};

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive pattern for `term` with every metacharacter escaped.
/// Word boundaries are asserted on the sides where the term starts or ends
/// with a word character, so terms like `C++` still match.
pub fn term_pattern(term: &str) -> Option<Regex> {
    let term = term.trim();
    let first = term.chars().next()?;
    let last = term.chars().last()?;
    let mut pattern = String::new();
    if is_word_char(first) {
        pattern.push_str(r"\b");
    }
    pattern.push_str(&regex::escape(term));
    if is_word_char(last) {
        pattern.push_str(r"\b");
    }
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

/// Occurrences of `terms` in `text`, as char-offset matches carrying the
/// definition. Terms are tried in order; an occurrence overlapping one
/// already claimed by an earlier term is skipped.
pub fn term_matches(text: &str, terms: &[GlossaryTerm]) -> Vec<AnnotationMatch> {
    let char_starts: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    let to_char = |byte: usize| char_starts.partition_point(|&b| b < byte);

    let mut claimed: Vec<(usize, usize)> = Vec::new();
    let mut matches = Vec::new();
    for term in terms {
        let Some(pattern) = term_pattern(&term.term) else {
            continue;
        };
        for found in pattern.find_iter(text) {
            let (start, end) = (to_char(found.start()), to_char(found.end()));
            if start == end || claimed.iter().any(|&(s, e)| start < e && s < end) {
                continue;
            }
            claimed.push((start, end));
            matches.push(AnnotationMatch {
                offset: start,
                length: end - start,
                message: term.definition.clone(),
                short_message: Some(term.term.clone()),
            });
        }
    }
    matches
}

/// Wrap glossary terms in `tree` with `glossary` markers carrying their
/// definitions. Previous glossary markers are replaced, never nested.
pub fn highlight_terms(tree: &mut DocumentTree, terms: &[GlossaryTerm]) -> usize {
    let text = project(tree).text;
    let matches = term_matches(&text, terms);
    annotate(tree, Category::Glossary, &matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(term: &str, definition: &str) -> GlossaryTerm {
        GlossaryTerm {
            term: term.into(),
            definition: definition.into(),
        }
    }

    fn found(text: &str, terms: &[GlossaryTerm]) -> Vec<String> {
        term_matches(text, terms)
            .iter()
            .map(|m| text.chars().skip(m.offset).take(m.length).collect())
            .collect()
    }

    #[test]
    fn matches_whole_words_case_insensitively() {
        let terms = [term("cat", "a small feline")];
        assert_eq!(
            found("Cat, concatenate, CAT and cats.", &terms),
            vec!["Cat", "CAT"]
        );
    }

    #[test]
    fn metacharacters_are_literal() {
        let terms = [term("a.b", "dotted"), term("C++", "a language")];
        assert_eq!(found("axb a.b c++ rocks", &terms), vec!["a.b", "c++"]);
    }

    #[test]
    fn later_terms_skip_claimed_regions() {
        let terms = [term("machine learning", "ML"), term("learning", "studying")];
        let matches = term_matches("Machine learning beats rote learning", &terms);
        assert_eq!(matches.len(), 2);
        assert_eq!((matches[0].offset, matches[0].length), (0, 16));
        assert_eq!((matches[1].offset, matches[1].message.as_str()), (28, "studying"));
    }

    #[test]
    fn offsets_are_in_chars() {
        let matches = term_matches("Ça va, naïve café", &[term("café", "coffee")]);
        assert_eq!((matches[0].offset, matches[0].length), (13, 4));
    }

    #[test]
    fn highlighting_twice_is_stable() {
        let terms = [term("rust", "a language"), term("borrow checker", "lifetimes")];
        let mut tree = DocumentTree::from_plain_text("Rust has a borrow checker.\nrust!");
        assert_eq!(highlight_terms(&mut tree, &terms), 3);
        let once = tree.to_blocks();
        let once_html = tree.render_html();
        assert_eq!(highlight_terms(&mut tree, &terms), 3);
        assert_eq!(tree.to_blocks(), once);
        assert_eq!(tree.render_html(), once_html);
        assert_eq!(project(&tree).text, "Rust has a borrow checker.\nrust!");
    }

    #[test]
    fn definitions_cannot_inject_markup() {
        let mut tree = DocumentTree::from_plain_text("an <b> tag");
        highlight_terms(&mut tree, &[term("<b>", "<img src=x onerror=alert(1)>")]);
        let html = tree.render_html();
        assert!(html.contains("data-message=\"&lt;img src=x onerror=alert(1)&gt;\""));
        assert!(html.contains("&lt;b&gt;</mark>"));
        assert!(!html.contains("<img"));
    }
}
