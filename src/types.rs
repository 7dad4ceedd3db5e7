use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::DocumentTree;
use crate::error::{Error, PersistenceError, Result};
use crate::projection::project;
use crate::vault::EncryptedPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionState {
    #[default]
    Plain,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String, // 32-char lowercase hex
    pub title: String,
    /// Serialized [`DocumentTree`]; empty while locked.
    pub content: String,
    #[serde(default)]
    pub plain_text_cache: String,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub encryption_state: EncryptionState,
    #[serde(default)]
    pub locked_payload: Option<EncryptedPayload>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl Note {
    /// A fresh, empty, unlocked note.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: String::new(),
            content: String::new(),
            plain_text_cache: String::new(),
            pinned: false,
            created_at: now,
            updated_at: now,
            encryption_state: EncryptionState::Plain,
            locked_payload: None,
            tags: Vec::new(),
            summary: String::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.encryption_state == EncryptionState::Locked
    }

    /// `Locked` iff content is empty and a payload is present.
    pub fn is_consistent(&self) -> bool {
        match self.encryption_state {
            EncryptionState::Locked => self.content.is_empty() && self.locked_payload.is_some(),
            EncryptionState::Plain => self.locked_payload.is_none(),
        }
    }

    pub fn document(&self) -> Result<DocumentTree> {
        if self.is_locked() {
            return Err(Error::NoteLocked(self.id.clone()));
        }
        DocumentTree::from_content(&self.content)
    }

    /// Replace the content with `tree`, recomputing the plain-text cache.
    pub fn set_document(&mut self, tree: &DocumentTree) -> Result<()> {
        if self.is_locked() {
            return Err(Error::NoteLocked(self.id.clone()));
        }
        self.content = tree.to_content()?;
        self.plain_text_cache = project(tree).text;
        self.touch();
        Ok(())
    }

    /// Recompute `plain_text_cache` from `content`.
    pub fn refresh_plain_text(&mut self) -> Result<()> {
        self.plain_text_cache = if self.is_locked() {
            String::new()
        } else {
            project(&DocumentTree::from_content(&self.content)?).text
        };
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn apply_lock(&mut self, payload: EncryptedPayload) {
        self.content.clear();
        self.plain_text_cache.clear();
        self.locked_payload = Some(payload);
        self.encryption_state = EncryptionState::Locked;
        self.touch();
    }

    pub(crate) fn apply_unlock(&mut self, content: String) -> Result<()> {
        let tree = DocumentTree::from_content(&content)?;
        self.plain_text_cache = project(&tree).text;
        self.content = content;
        self.locked_payload = None;
        self.encryption_state = EncryptionState::Plain;
        self.touch();
        Ok(())
    }
}

impl Default for Note {
    fn default() -> Self {
        Self::new()
    }
}

/// One range flagged by an analyzer, in chars of the projected text.
/// Clients whose service counts in other units convert before returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationMatch {
    pub offset: usize,
    pub length: usize,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub definition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

/// Status reported to the save indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error(PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_note_is_empty_and_plain() {
        let note = Note::new();
        assert_eq!(note.id.len(), 32);
        assert!(note.content.is_empty());
        assert_eq!(note.encryption_state, EncryptionState::Plain);
        assert!(note.is_consistent());
    }

    #[test]
    fn set_document_recomputes_cache() {
        let mut note = Note::new();
        note.set_document(&DocumentTree::from_plain_text("one\ntwo")).unwrap();
        assert_eq!(note.plain_text_cache, "one\ntwo");
        note.plain_text_cache = "stale".into();
        note.refresh_plain_text().unwrap();
        assert_eq!(note.plain_text_cache, "one\ntwo");
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(Note::new()).unwrap();
        assert!(json.get("plainTextCache").is_some());
        assert_eq!(json["encryptionState"], "plain");
        assert!(json["lockedPayload"].is_null());
    }
}
