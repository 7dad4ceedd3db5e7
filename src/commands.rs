use crate::annotate::annotate;
use crate::collaborators::check_grammar;
use crate::document::{Category, DocumentTree};
use crate::error::{Error, Result};
use crate::glossary::highlight_terms;
use crate::oplock::{OperationGuard, OperationKind};
use crate::projection::project;
use crate::transfer::{self, ImportReport};
use crate::types::{GlossaryTerm, Note, SaveStatus, Theme};
use crate::vault;
use crate::AppMutex;

// ─── Manual triggers ───────────────────────────────────────────────────────────

/// Create an empty note, make it active and queue a save.
pub async fn new_note(state: &AppMutex) -> Note {
    let mut s = state.lock().await;
    let note = Note::new();
    s.notes.insert(0, note.clone());
    s.active_note_id = Some(note.id.clone());
    s.schedule_save();
    tracing::info!(id = %note.id, "note created");
    note
}

/// Persist the collection and session settings immediately.
pub async fn save(state: &AppMutex) -> Result<()> {
    // Held across the write so no newer snapshot can be scheduled before
    // this one is numbered.
    let s = state.lock().await;
    s.persistence.save_now(s.notes.clone(), s.session()).await?;
    Ok(())
}

pub async fn save_status(state: &AppMutex) -> SaveStatus {
    state.lock().await.persistence.status()
}

// ─── Note editing ──────────────────────────────────────────────────────────────

pub async fn get_note(state: &AppMutex, id: &str) -> Result<Note> {
    state.lock().await.note(id).cloned()
}

pub async fn list_notes(state: &AppMutex) -> Vec<Note> {
    state.lock().await.notes.clone()
}

/// Replace a note's content. Rejected while an operation is pending on it.
pub async fn update_content(state: &AppMutex, id: &str, tree: &DocumentTree) -> Result<Note> {
    let mut s = state.lock().await;
    s.operations.ensure_idle(id)?;
    let note = s.note_mut(id)?;
    note.set_document(tree)?;
    let note = note.clone();
    s.schedule_save();
    Ok(note)
}

pub async fn update_plain_text(state: &AppMutex, id: &str, text: &str) -> Result<Note> {
    update_content(state, id, &DocumentTree::from_plain_text(text)).await
}

pub async fn rename_note(state: &AppMutex, id: &str, title: &str) -> Result<()> {
    let mut s = state.lock().await;
    let note = s.note_mut(id)?;
    note.title = title.to_string();
    note.touch();
    s.schedule_save();
    Ok(())
}

pub async fn set_pinned(state: &AppMutex, id: &str, pinned: bool) -> Result<()> {
    let mut s = state.lock().await;
    s.note_mut(id)?.pinned = pinned;
    s.schedule_save();
    Ok(())
}

pub async fn delete_note(state: &AppMutex, id: &str) -> Result<()> {
    let mut s = state.lock().await;
    s.operations.ensure_idle(id)?;
    s.note(id)?;
    s.notes.retain(|n| n.id != id);
    if s.active_note_id.as_deref() == Some(id) {
        s.active_note_id = s.notes.first().map(|n| n.id.clone());
    }
    s.schedule_save();
    tracing::info!(id, "note deleted");
    Ok(())
}

pub async fn set_active_note(state: &AppMutex, id: &str) -> Result<()> {
    let mut s = state.lock().await;
    s.note(id)?;
    s.active_note_id = Some(id.to_string());
    Ok(())
}

pub async fn set_theme(state: &AppMutex, theme: Theme) {
    state.lock().await.theme = theme;
}

/// Set (or clear) the user's AI credential. Takes effect immediately.
pub async fn set_user_credential(state: &AppMutex, credential: Option<String>) {
    let mut s = state.lock().await;
    s.user_credential = credential.filter(|c| !c.trim().is_empty());
    s.rebuild_assistant();
}

pub async fn render_note_html(state: &AppMutex, id: &str) -> Result<String> {
    Ok(state.lock().await.note(id)?.document()?.render_html())
}

// ─── Guarded operations ────────────────────────────────────────────────────────
//
// Each operation marks its note pending, then runs an `_inner` function that
// only holds the app mutex between awaits. The mark is cleared when the guard
// drops, so a cancelled caller does not leave the note pending. A second
// request on the same note while one is pending is rejected.

async fn begin(state: &AppMutex, id: &str, kind: OperationKind) -> Result<OperationGuard> {
    let s = state.lock().await;
    s.note(id)?;
    s.operations.try_acquire(id, kind)
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskFailed(e.to_string()))?
}

/// Snapshot of a note's projected text, for sending to a collaborator.
async fn projected_text(state: &AppMutex, id: &str) -> Result<String> {
    let s = state.lock().await;
    Ok(project(&s.note(id)?.document()?).text)
}

/// Encrypt a note's content behind `password`.
pub async fn lock_note(state: &AppMutex, id: &str, password: String) -> Result<()> {
    let _guard = begin(state, id, OperationKind::Lock).await?;
    lock_note_inner(state, id, password).await
}

async fn lock_note_inner(state: &AppMutex, id: &str, password: String) -> Result<()> {
    let content = {
        let s = state.lock().await;
        let note = s.note(id)?;
        if note.is_locked() {
            return Err(Error::NoteLocked(id.to_string()));
        }
        note.content.clone()
    };

    // Key derivation is CPU-bound; keep it off the async workers.
    let payload = run_blocking(move || vault::encrypt(&content, &password)).await?;

    let mut s = state.lock().await;
    s.note_mut(id)?.apply_lock(payload);
    s.schedule_save();
    tracing::info!(id, "note locked");
    Ok(())
}

/// Decrypt a locked note. On failure the note is left exactly as it was.
pub async fn unlock_note(state: &AppMutex, id: &str, password: String) -> Result<()> {
    let _guard = begin(state, id, OperationKind::Unlock).await?;
    unlock_note_inner(state, id, password).await
}

async fn unlock_note_inner(state: &AppMutex, id: &str, password: String) -> Result<()> {
    let payload = {
        let s = state.lock().await;
        s.note(id)?
            .locked_payload
            .clone()
            .ok_or_else(|| Error::NoteNotLocked(id.to_string()))?
    };

    let content = match run_blocking(move || vault::decrypt(&payload, &password)).await {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(id, "unlock failed: {e}");
            return Err(e);
        }
    };

    let mut s = state.lock().await;
    s.note_mut(id)?.apply_unlock(content)?;
    s.schedule_save();
    tracing::info!(id, "note unlocked");
    Ok(())
}

/// Send the note to the grammar collaborator and annotate the results.
/// Returns the number of spans applied; zero when the collaborator failed.
/// Fails with [`Error::NoteChanged`] if the text moved on while the request
/// was in flight; nothing is applied and the check can simply be re-run.
pub async fn check_note_grammar(state: &AppMutex, id: &str) -> Result<usize> {
    let _guard = begin(state, id, OperationKind::GrammarCheck).await?;
    check_note_grammar_inner(state, id).await
}

async fn check_note_grammar_inner(state: &AppMutex, id: &str) -> Result<usize> {
    let text = projected_text(state, id).await?;
    let (client, language) = {
        let s = state.lock().await;
        (s.grammar.clone(), s.config.grammar_language.clone())
    };

    let matches = check_grammar(client.as_ref(), &text, &language).await;

    let mut s = state.lock().await;
    let note = s.note_mut(id)?;
    let mut tree = note.document()?;
    if project(&tree).text != text {
        tracing::warn!(id, "note changed during grammar check; results discarded");
        return Err(Error::NoteChanged(id.to_string()));
    }
    let applied = annotate(&mut tree, Category::Grammar, &matches);
    note.set_document(&tree)?;
    s.schedule_save();
    Ok(applied)
}

/// Extract glossary terms (AI or heuristic) and highlight them in the note.
pub async fn apply_glossary(state: &AppMutex, id: &str) -> Result<Vec<GlossaryTerm>> {
    let _guard = begin(state, id, OperationKind::Glossary).await?;
    apply_glossary_inner(state, id).await
}

async fn apply_glossary_inner(state: &AppMutex, id: &str) -> Result<Vec<GlossaryTerm>> {
    let text = projected_text(state, id).await?;
    let assistant = state.lock().await.assistant.clone();

    let terms = assistant.extract_glossary(&text).await;

    let mut s = state.lock().await;
    let note = s.note_mut(id)?;
    let mut tree = note.document()?;
    if project(&tree).text != text {
        tracing::warn!(id, "note changed during glossary extraction; results discarded");
        return Err(Error::NoteChanged(id.to_string()));
    }
    let applied = highlight_terms(&mut tree, &terms);
    note.set_document(&tree)?;
    s.schedule_save();
    tracing::debug!(id, terms = terms.len(), applied, "glossary applied");
    Ok(terms)
}

/// Fill in a note's summary and tags.
pub async fn summarize_note(state: &AppMutex, id: &str) -> Result<String> {
    let _guard = begin(state, id, OperationKind::Summarize).await?;
    summarize_note_inner(state, id).await
}

async fn summarize_note_inner(state: &AppMutex, id: &str) -> Result<String> {
    let text = projected_text(state, id).await?;
    let assistant = state.lock().await.assistant.clone();

    let summary = assistant.summarize(&text).await;
    let tags = assistant.suggest_tags(&text).await;

    let mut s = state.lock().await;
    let note = s.note_mut(id)?;
    note.summary = summary.clone();
    note.tags = tags;
    note.touch();
    s.schedule_save();
    Ok(summary)
}

// ─── Import / export ───────────────────────────────────────────────────────────

pub async fn export_notes(state: &AppMutex) -> Result<String> {
    transfer::export_json(&state.lock().await.notes)
}

/// Merge an export file into the collection. Nothing changes on error.
pub async fn import_notes(state: &AppMutex, json: &str) -> Result<ImportReport> {
    let mut s = state.lock().await;
    let report = transfer::import_json(&mut s.notes, json)?;
    if report.imported > 0 {
        s.schedule_save();
    }
    tracing::info!(
        imported = report.imported,
        skipped = report.skipped.len(),
        "import finished"
    );
    Ok(report)
}
