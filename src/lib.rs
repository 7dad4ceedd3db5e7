pub mod annotate;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod glossary;
pub mod heuristics;
pub mod oplock;
pub mod persistence;
pub mod projection;
pub mod transfer;
pub mod types;
pub mod vault;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::collaborators::{Assistant, GrammarClient, LanguageToolClient};
use crate::config::Config;
use crate::db::{NoteStore, Session};
use crate::oplock::OperationLocks;
use crate::persistence::PersistenceCoordinator;
use crate::types::{Note, Theme};

pub use crate::error::{Error, PersistenceError, Result};

/// All runtime state shared across commands. Lives for the whole process.
pub struct AppState {
    pub config: Config,
    /// Note collection, newest `updated_at` first after load/import.
    pub notes: Vec<Note>,
    pub active_note_id: Option<String>,
    pub theme: Theme,
    /// Credential typed in by the user. Persisted by manual saves, unlike
    /// `config.ai_api_key`.
    pub user_credential: Option<String>,
    /// Per-note `Idle | Pending(kind)` guard for lock/unlock/annotation passes.
    pub operations: OperationLocks,
    pub persistence: Arc<PersistenceCoordinator>,
    pub assistant: Assistant,
    pub grammar: Arc<dyn GrammarClient>,
}

impl AppState {
    /// Build the context: persisted state first, then environment defaults
    /// for anything the store does not provide.
    pub fn load(config: Config, store: Arc<dyn NoteStore>) -> Result<Self> {
        let stored = store.load()?;
        let mut notes = stored.notes;
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let active_note_id = stored
            .session
            .active_note_id
            .filter(|id| notes.iter().any(|n| &n.id == id))
            .or_else(|| notes.first().map(|n| n.id.clone()));
        let theme = stored.session.theme.unwrap_or(config.theme);
        let user_credential = stored.session.credential;

        let persistence = Arc::new(PersistenceCoordinator::new(store, config.save_debounce));
        let grammar: Arc<dyn GrammarClient> =
            Arc::new(LanguageToolClient::new(&config.grammar_base_url));

        let mut state = Self {
            config,
            notes,
            active_note_id,
            theme,
            user_credential,
            operations: OperationLocks::default(),
            persistence,
            assistant: Assistant::default(),
            grammar,
        };
        state.rebuild_assistant();
        tracing::info!(
            notes = state.notes.len(),
            ai = state.assistant.is_configured(),
            "application state loaded"
        );
        Ok(state)
    }

    /// User credential wins over the environment default.
    pub fn effective_credential(&self) -> Option<&str> {
        self.user_credential
            .as_deref()
            .or(self.config.ai_api_key.as_deref())
    }

    pub(crate) fn rebuild_assistant(&mut self) {
        self.assistant = Assistant::from_config(&self.config, self.effective_credential());
    }

    pub fn note(&self, id: &str) -> Result<&Note> {
        self.notes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))
    }

    pub fn note_mut(&mut self, id: &str) -> Result<&mut Note> {
        self.notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| Error::NoteNotFound(id.to_string()))
    }

    /// Session settings as written by a manual save.
    pub fn session(&self) -> Session {
        Session {
            active_note_id: self.active_note_id.clone(),
            theme: Some(self.theme),
            credential: self.user_credential.clone(),
        }
    }

    /// Queue a debounced write of the current collection.
    pub fn schedule_save(&self) {
        self.persistence.schedule(self.notes.clone());
    }
}

/// Shared handle used by every command.
pub type AppMutex = Mutex<AppState>;
