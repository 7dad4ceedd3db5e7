use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::error::PersistenceError;
use crate::types::{Note, Theme};

/// UI context persisted alongside the collection by a manual save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub active_note_id: Option<String>,
    pub theme: Option<Theme>,
    /// User-supplied AI credential. Environment defaults never land here.
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StoredState {
    pub notes: Vec<Note>,
    pub session: Session,
}

/// Durable storage for the whole note collection.
pub trait NoteStore: Send + Sync {
    fn load(&self) -> std::result::Result<StoredState, PersistenceError>;
    /// Replace the stored collection with `notes`.
    fn save_notes(&self, notes: &[Note]) -> std::result::Result<(), PersistenceError>;
    fn save_session(&self, session: &Session) -> std::result::Result<(), PersistenceError>;
}

/// Map store errors onto the persistence taxonomy. A full disk is the
/// SQLite equivalent of an exhausted storage quota.
fn classify(e: anyhow::Error) -> PersistenceError {
    match e.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::DiskFull => {
            PersistenceError::QuotaExceeded
        }
        _ => PersistenceError::Storage(e.to_string()),
    }
}

// ─── SQLite ────────────────────────────────────────────────────────────────────

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        id           TEXT PRIMARY KEY,
        updated_time INTEGER NOT NULL,
        data         TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );";

impl SqliteStore {
    /// Open (creating if needed) the notes database at `path`.
    /// WAL is set before the schema so the first write already uses it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("connection lock poisoned: {e}"))
    }

    fn load_inner(&self) -> Result<StoredState> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM notes ORDER BY updated_time DESC")?;
        let notes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| {
                r.map_err(|e| tracing::warn!("Skipping unreadable row: {e}"))
                    .ok()
            })
            .filter_map(|data| {
                serde_json::from_str::<Note>(&data)
                    .map_err(|e| tracing::warn!("Skipping malformed note: {e}"))
                    .ok()
            })
            .collect();

        let setting = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?)
        };
        let session = Session {
            active_note_id: setting("active_note_id")?,
            theme: setting("theme")?.and_then(|t| Theme::parse(&t)),
            credential: setting("credential")?,
        };
        Ok(StoredState { notes, session })
    }

    fn save_notes_inner(&self, notes: &[Note]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM notes", [])?;
        {
            let mut insert =
                tx.prepare("INSERT INTO notes (id, updated_time, data) VALUES (?1, ?2, ?3)")?;
            for note in notes {
                let data = serde_json::to_string(note)?;
                insert.execute(params![note.id, note.updated_at.timestamp_millis(), data])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn save_session_inner(&self, session: &Session) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let entries = [
            ("active_note_id", session.active_note_id.clone()),
            ("theme", session.theme.map(|t| t.as_str().to_string())),
            ("credential", session.credential.clone()),
        ];
        for (key, value) in entries {
            match value {
                Some(v) => tx.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, v],
                )?,
                None => tx.execute("DELETE FROM settings WHERE key = ?1", [key])?,
            };
        }
        tx.commit()?;
        Ok(())
    }
}

impl NoteStore for SqliteStore {
    fn load(&self) -> std::result::Result<StoredState, PersistenceError> {
        self.load_inner().map_err(classify)
    }

    fn save_notes(&self, notes: &[Note]) -> std::result::Result<(), PersistenceError> {
        self.save_notes_inner(notes).map_err(classify)
    }

    fn save_session(&self, session: &Session) -> std::result::Result<(), PersistenceError> {
        self.save_session_inner(session).map_err(classify)
    }
}

// ─── In-memory ─────────────────────────────────────────────────────────────────

/// Volatile store that records when each collection write happened.
/// Writes can be made to fail to exercise the error path.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoredState>,
    writes: Mutex<Vec<tokio::time::Instant>>,
    fail_with: Mutex<Option<PersistenceError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoredState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail with `error` (or succeed with `None`).
    pub fn set_failure(&self, error: Option<PersistenceError>) {
        if let Ok(mut f) = self.fail_with.lock() {
            *f = error;
        }
    }

    /// Instants of successful collection writes, oldest first.
    pub fn writes(&self) -> Vec<tokio::time::Instant> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> StoredState {
        self.state.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn check_failure(&self) -> std::result::Result<(), PersistenceError> {
        match self.fail_with.lock() {
            Ok(f) => f.clone().map_or(Ok(()), Err),
            Err(e) => Err(PersistenceError::Storage(e.to_string())),
        }
    }

    fn with_state_mut(
        &self,
        f: impl FnOnce(&mut StoredState),
    ) -> std::result::Result<(), PersistenceError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;
        f(&mut state);
        Ok(())
    }
}

impl NoteStore for MemoryStore {
    fn load(&self) -> std::result::Result<StoredState, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save_notes(&self, notes: &[Note]) -> std::result::Result<(), PersistenceError> {
        self.check_failure()?;
        self.with_state_mut(|s| s.notes = notes.to_vec())?;
        if let Ok(mut w) = self.writes.lock() {
            w.push(tokio::time::Instant::now());
        }
        Ok(())
    }

    fn save_session(&self, session: &Session) -> std::result::Result<(), PersistenceError> {
        self.check_failure()?;
        self.with_state_mut(|s| s.session = session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentTree;

    fn note(title: &str) -> Note {
        let mut n = Note::new();
        n.title = title.to_string();
        n.set_document(&DocumentTree::from_plain_text(title)).unwrap();
        n
    }

    #[test]
    fn notes_round_trip_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut older = note("older");
        older.updated_at -= chrono::Duration::seconds(60);
        let newer = note("newer");
        store.save_notes(&[older.clone(), newer.clone()]).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.notes, vec![newer, older]);
    }

    #[test]
    fn save_replaces_whole_collection() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_notes(&[note("a"), note("b")]).unwrap();
        let c = note("c");
        store.save_notes(std::slice::from_ref(&c)).unwrap();
        assert_eq!(store.load().unwrap().notes, vec![c]);
    }

    #[test]
    fn session_settings_round_trip_and_clear() {
        let store = SqliteStore::open_in_memory().unwrap();
        let session = Session {
            active_note_id: Some("abc".into()),
            theme: Some(Theme::Dark),
            credential: Some("sk-user".into()),
        };
        store.save_session(&session).unwrap();
        assert_eq!(store.load().unwrap().session, session);

        store.save_session(&Session::default()).unwrap();
        assert_eq!(store.load().unwrap().session, Session::default());
    }

    #[test]
    fn opens_file_database_creating_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/notes.sqlite");
        let n = note("persisted");
        SqliteStore::open(&path).unwrap().save_notes(&[n.clone()]).unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap().notes, vec![n]);
    }

    #[test]
    fn disk_full_is_quota_exceeded() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            None,
        );
        assert_eq!(classify(err.into()), PersistenceError::QuotaExceeded);
        assert!(matches!(
            classify(anyhow!("boom")),
            PersistenceError::Storage(_)
        ));
    }
}
