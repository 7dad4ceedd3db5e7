//! Local fallbacks used whenever the AI collaborator is unavailable.

use std::collections::HashMap;

use crate::types::GlossaryTerm;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as", "at",
    "be", "because", "been", "before", "being", "but", "by", "can", "could", "did", "do", "does",
    "doing", "for", "from", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my",
    "no", "not", "now", "of", "on", "once", "only", "or", "other", "our", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "would", "you", "your",
];

const MIN_TOKEN_CHARS: usize = 3;

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Lowercased alphanumeric tokens, stop words and short tokens removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| w.chars().count() >= MIN_TOKEN_CHARS && !is_stop_word(w))
        .filter(|w| !w.chars().all(|c| c.is_numeric()))
        .collect()
}

fn frequencies(tokens: &[String]) -> HashMap<&str, usize> {
    let mut freq = HashMap::new();
    for t in tokens {
        *freq.entry(t.as_str()).or_insert(0) += 1;
    }
    freq
}

/// The `limit` most frequent tokens. Ties go to the token seen first.
pub fn keywords(text: &str, limit: usize) -> Vec<String> {
    let tokens = tokenize(text);
    let freq = frequencies(&tokens);
    let mut first_seen: Vec<&str> = Vec::new();
    for t in &tokens {
        if !first_seen.contains(&t.as_str()) {
            first_seen.push(t);
        }
    }
    // Stable sort keeps first-seen order among equal counts.
    first_seen.sort_by(|a, b| freq[b].cmp(&freq[a]));
    first_seen.into_iter().take(limit).map(str::to_string).collect()
}

fn sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extractive summary: the `max_sentences` sentences whose tokens are most
/// frequent across the text, in their original order.
pub fn summarize(text: &str, max_sentences: usize) -> String {
    let all = sentences(text);
    if all.len() <= max_sentences {
        return all.join(" ");
    }
    let tokens = tokenize(text);
    let freq = frequencies(&tokens);
    let mut scored: Vec<(usize, f64)> = all
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let words = tokenize(s);
            let total: usize = words.iter().map(|w| freq.get(w.as_str()).copied().unwrap_or(0)).sum();
            (i, total as f64 / words.len().max(1) as f64)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut picked: Vec<usize> = scored.into_iter().take(max_sentences).map(|(i, _)| i).collect();
    picked.sort_unstable();
    picked.into_iter().map(|i| all[i]).collect::<Vec<_>>().join(" ")
}

/// Keywords paired with the first sentence mentioning them.
pub fn glossary(text: &str, limit: usize) -> Vec<GlossaryTerm> {
    let all = sentences(text);
    keywords(text, limit)
        .into_iter()
        .filter_map(|word| {
            let sentence = all.iter().find(|s| tokenize(s).contains(&word))?;
            Some(GlossaryTerm {
                term: word,
                definition: sentence.to_string(),
            })
        })
        .collect()
}
