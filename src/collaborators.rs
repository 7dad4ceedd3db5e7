//! External analyzers: AI completion and grammar checking.
//!
//! Both are optional. Every failure is turned into a fallback at this
//! boundary, so callers always get a usable result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::heuristics;
use crate::types::{AnnotationMatch, GlossaryTerm};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SUMMARY_SENTENCES: usize = 3;
const MAX_TAGS: usize = 5;
const MAX_TERMS: usize = 8;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Free-form prompt in, free text out.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait GrammarClient: Send + Sync {
    async fn check(&self, text: &str, language: &str) -> Result<Vec<AnnotationMatch>>;
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> Error {
    Error::CollaboratorUnavailable(format!("{context}: {e}"))
}

// ─── OpenAI-compatible completion client ───────────────────────────────────────

pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| unavailable("completion request failed", e))?;

        if !resp.status().is_success() {
            return Err(unavailable("completion HTTP", resp.status()));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| unavailable("parse completion response", e))?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::CollaboratorUnavailable("empty completion".to_string()))
    }
}

// ─── LanguageTool-compatible grammar client ────────────────────────────────────

pub struct LanguageToolClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    matches: Vec<CheckMatch>,
}

/// LanguageTool match. `offset` and `length` count UTF-16 code units.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckMatch {
    offset: usize,
    length: usize,
    message: String,
    #[serde(default)]
    short_message: Option<String>,
}

impl LanguageToolClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GrammarClient for LanguageToolClient {
    async fn check(&self, text: &str, language: &str) -> Result<Vec<AnnotationMatch>> {
        let resp = self
            .client
            .post(format!("{}/v2/check", self.base_url))
            .form(&[("text", text), ("language", language)])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| unavailable("grammar request failed", e))?;

        if !resp.status().is_success() {
            return Err(unavailable("grammar HTTP", resp.status()));
        }

        let parsed: CheckResponse = resp
            .json()
            .await
            .map_err(|e| unavailable("parse grammar response", e))?;
        Ok(to_char_matches(text, parsed.matches))
    }
}

fn to_char_matches(text: &str, matches: Vec<CheckMatch>) -> Vec<AnnotationMatch> {
    matches
        .into_iter()
        .map(|m| {
            let (offset, length) = utf16_span_to_chars(text, m.offset, m.length);
            AnnotationMatch {
                offset,
                length,
                message: m.message,
                short_message: m.short_message.filter(|s| !s.is_empty()),
            }
        })
        .collect()
}

/// Map a UTF-16 `(offset, length)` range onto chars of `text`. A boundary
/// inside a surrogate pair moves forward to the next char; ranges past the
/// end are clamped.
fn utf16_span_to_chars(text: &str, offset: usize, length: usize) -> (usize, usize) {
    let end = offset.saturating_add(length);
    let mut start_char = None;
    let mut end_char = None;
    let mut units = 0;
    let mut count = 0;
    for (i, c) in text.chars().enumerate() {
        if start_char.is_none() && units >= offset {
            start_char = Some(i);
        }
        if units >= end {
            end_char = Some(i);
            break;
        }
        units += c.len_utf16();
        count = i + 1;
    }
    let start = start_char.unwrap_or(count);
    let end = end_char.unwrap_or(count).max(start);
    (start, end - start)
}

/// Run a grammar check, returning no matches on any failure.
pub async fn check_grammar(
    client: &dyn GrammarClient,
    text: &str,
    language: &str,
) -> Vec<AnnotationMatch> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    match client.check(text, language).await {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!("Grammar check unavailable: {e}");
            Vec::new()
        }
    }
}

// ─── Assistant ─────────────────────────────────────────────────────────────────

/// AI-backed note helpers with local heuristic fallbacks.
#[derive(Clone, Default)]
pub struct Assistant {
    completion: Option<Arc<dyn CompletionClient>>,
}

impl Assistant {
    pub fn new(completion: Option<Arc<dyn CompletionClient>>) -> Self {
        Self { completion }
    }

    /// No credential means heuristics only; this is not an error.
    pub fn from_config(config: &Config, credential: Option<&str>) -> Self {
        let completion = credential.map(|key| {
            Arc::new(OpenAiClient::new(&config.ai_base_url, &config.ai_model, key))
                as Arc<dyn CompletionClient>
        });
        Self { completion }
    }

    pub fn is_configured(&self) -> bool {
        self.completion.is_some()
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        let client = self.completion.as_ref()?;
        match client.complete(prompt).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!("AI completion unavailable, using local fallback: {e}");
                None
            }
        }
    }

    pub async fn summarize(&self, text: &str) -> String {
        let prompt = format!(
            "Summarize the following note in at most {SUMMARY_SENTENCES} sentences. \
             Reply with the summary only.\n\n{text}"
        );
        match self.ask(&prompt).await {
            Some(summary) => summary.trim().to_string(),
            None => heuristics::summarize(text, SUMMARY_SENTENCES),
        }
    }

    pub async fn suggest_tags(&self, text: &str) -> Vec<String> {
        let prompt = format!(
            "Suggest up to {MAX_TAGS} short lowercase tags for this note. \
             Reply with a JSON array of strings only.\n\n{text}"
        );
        let parsed = self
            .ask(&prompt)
            .await
            .and_then(|reply| parse_json_array::<String>(&reply))
            .map(|tags| {
                tags.into_iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .take(MAX_TAGS)
                    .collect::<Vec<_>>()
            })
            .filter(|tags| !tags.is_empty());
        parsed.unwrap_or_else(|| heuristics::keywords(text, MAX_TAGS))
    }

    pub async fn extract_glossary(&self, text: &str) -> Vec<GlossaryTerm> {
        let prompt = format!(
            "Extract up to {MAX_TERMS} key terms from this note with a one-sentence \
             definition each. Reply with a JSON array of objects with \"term\" and \
             \"definition\" fields only.\n\n{text}"
        );
        let parsed = self
            .ask(&prompt)
            .await
            .and_then(|reply| parse_json_array::<GlossaryTerm>(&reply))
            .map(|terms| {
                terms
                    .into_iter()
                    .filter(|t| !t.term.trim().is_empty())
                    .take(MAX_TERMS)
                    .collect::<Vec<_>>()
            })
            .filter(|terms| !terms.is_empty());
        match parsed {
            Some(terms) => terms,
            None => heuristics::glossary(text, MAX_TERMS),
        }
    }
}

/// Models often wrap JSON in prose or code fences; take the outermost array.
fn parse_json_array<T: serde::de::DeserializeOwned>(reply: &str) -> Option<Vec<T>> {
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&reply[start..=end]) {
        Ok(items) => Some(items),
        Err(e) => {
            tracing::warn!("Unparseable AI reply, using local fallback: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String>);

    #[async_trait]
    impl CompletionClient for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(_) => Err(Error::CollaboratorUnavailable("offline".into())),
            }
        }
    }

    fn assistant(reply: Result<String>) -> Assistant {
        Assistant::new(Some(Arc::new(Canned(reply))))
    }

    const NOTE: &str = "Rust ownership rules. Rust borrowing rules. Cats nap.";

    #[tokio::test]
    async fn unconfigured_assistant_uses_heuristics() {
        let a = Assistant::default();
        assert!(!a.is_configured());
        assert_eq!(a.suggest_tags(NOTE).await, heuristics::keywords(NOTE, MAX_TAGS));
        assert_eq!(a.summarize(NOTE).await, heuristics::summarize(NOTE, SUMMARY_SENTENCES));
    }

    #[tokio::test]
    async fn failing_collaborator_falls_back() {
        let a = assistant(Err(Error::CollaboratorUnavailable("x".into())));
        assert_eq!(a.extract_glossary(NOTE).await, heuristics::glossary(NOTE, MAX_TERMS));
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back() {
        let a = assistant(Ok("Sure! Here are some tags: rust, notes".into()));
        assert_eq!(a.suggest_tags(NOTE).await, heuristics::keywords(NOTE, MAX_TAGS));
    }

    #[tokio::test]
    async fn json_inside_prose_is_accepted() {
        let reply = "```json\n[{\"term\":\"Ownership\",\"definition\":\"Who frees memory.\"}]\n```";
        let a = assistant(Ok(reply.into()));
        assert_eq!(
            a.extract_glossary(NOTE).await,
            vec![GlossaryTerm {
                term: "Ownership".into(),
                definition: "Who frees memory.".into()
            }]
        );
        let tags = assistant(Ok("[\" Rust \", \"\", \"Memory\"]".into()));
        assert_eq!(tags.suggest_tags(NOTE).await, vec!["rust", "memory"]);
    }

    struct FailingGrammar;

    #[async_trait]
    impl GrammarClient for FailingGrammar {
        async fn check(&self, _text: &str, _language: &str) -> Result<Vec<AnnotationMatch>> {
            Err(Error::CollaboratorUnavailable("timeout".into()))
        }
    }

    #[tokio::test]
    async fn grammar_failure_yields_no_matches() {
        assert!(check_grammar(&FailingGrammar, "Teh cat", "en-US").await.is_empty());
    }

    #[test]
    fn languagetool_response_shape_parses() {
        let body = r#"{"software":{"name":"LanguageTool"},"matches":[
            {"message":"Possible spelling mistake found.","shortMessage":"Spelling mistake",
             "offset":0,"length":3,"replacements":[{"value":"The"}]},
            {"message":"Add a comma.","shortMessage":"","offset":4,"length":3}]}"#;
        let parsed: CheckResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            to_char_matches("Teh cat sat.", parsed.matches),
            vec![
                AnnotationMatch {
                    offset: 0,
                    length: 3,
                    message: "Possible spelling mistake found.".into(),
                    short_message: Some("Spelling mistake".into()),
                },
                AnnotationMatch {
                    offset: 4,
                    length: 3,
                    message: "Add a comma.".into(),
                    short_message: None,
                },
            ]
        );
    }

    #[test]
    fn utf16_offsets_become_char_offsets() {
        // "🦀" is two UTF-16 units but one char.
        assert_eq!(utf16_span_to_chars("🦀 Teh cat", 3, 3), (2, 3));
        assert_eq!(utf16_span_to_chars("a🦀b", 1, 2), (1, 1));
        assert_eq!(utf16_span_to_chars("Teh cat", 4, 3), (4, 3));
        // Past the end is clamped to an empty range at the end.
        assert_eq!(utf16_span_to_chars("ab", 5, 2), (2, 0));
    }

    #[test]
    fn grammar_match_after_emoji_wraps_the_right_word() {
        use crate::annotate::annotate;
        use crate::document::{Category, DocumentTree};

        let text = "🦀 Teh cat";
        let matches = to_char_matches(
            text,
            vec![CheckMatch {
                offset: 3,
                length: 3,
                message: "Spelling".into(),
                short_message: None,
            }],
        );
        let mut tree = DocumentTree::from_plain_text(text);
        assert_eq!(annotate(&mut tree, Category::Grammar, &matches), 1);
        let marker = tree.markers(Category::Grammar)[0];
        let wrapped = tree.children(marker)[0];
        assert_eq!(tree.text(wrapped), Some("Teh"));
    }
}
