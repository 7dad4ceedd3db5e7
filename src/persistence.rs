use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::{NoteStore, Session};
use crate::error::PersistenceError;
use crate::types::{Note, SaveStatus};

/// Debounces collection mutations into whole-collection writes.
///
/// Every [`schedule`](Self::schedule) cancels the pending write and restarts
/// the quiet period with the newest snapshot, so a burst of edits produces a
/// single write of the last state. [`save_now`](Self::save_now) skips the wait.
/// Failures only change the reported status; the next mutation or manual save
/// retries.
///
/// Snapshots are numbered when they are handed over. Writes run on the
/// blocking pool one at a time, and a snapshot older than the last one
/// written is dropped, so a debounced write already inside the store can
/// never land on top of a later manual save.
pub struct PersistenceCoordinator {
    writer: Writer,
    debounce: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
}

#[derive(Clone)]
struct Writer {
    store: Arc<dyn NoteStore>,
    status: Arc<watch::Sender<SaveStatus>>,
    /// Generation of the newest snapshot that reached the store.
    written: Arc<Mutex<u64>>,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn NoteStore>, debounce: Duration) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            writer: Writer {
                store,
                status: Arc::new(status),
                written: Arc::new(Mutex::new(0)),
            },
            debounce,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> SaveStatus {
        self.writer.status.borrow().clone()
    }

    /// Receiver for the save indicator.
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.writer.status.subscribe()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Restart the debounce window with `snapshot` as the state to write.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, snapshot: Vec<Note>) {
        let generation = self.next_generation();
        let writer = self.writer.clone();
        // Deadline is fixed now, not when the task is first polled.
        let quiet = tokio::time::sleep(self.debounce);
        let task = tokio::spawn(async move {
            quiet.await;
            let _ = writer.write(generation, snapshot, None).await;
        });
        if let Some(previous) = self.replace_pending(Some(task)) {
            previous.abort();
        }
    }

    /// Cancel any pending write and persist `snapshot` and `session` now.
    /// Waits for a write already in progress to finish first.
    pub async fn save_now(
        &self,
        snapshot: Vec<Note>,
        session: Session,
    ) -> Result<(), PersistenceError> {
        let generation = self.next_generation();
        if let Some(previous) = self.replace_pending(None) {
            previous.abort();
        }
        self.writer.write(generation, snapshot, Some(session)).await
    }

    fn replace_pending(&self, next: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        match self.pending.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}

impl Drop for PersistenceCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.replace_pending(None) {
            task.abort();
        }
    }
}

impl Writer {
    /// Run the write on the blocking pool. Aborting the caller does not stop
    /// a write that has already started there.
    async fn write(
        &self,
        generation: u64,
        notes: Vec<Note>,
        session: Option<Session>,
    ) -> Result<(), PersistenceError> {
        let writer = self.clone();
        tokio::task::spawn_blocking(move || {
            writer.write_blocking(generation, &notes, session.as_ref())
        })
        .await
        .map_err(|e| PersistenceError::Storage(format!("write task failed: {e}")))?
    }

    fn write_blocking(
        &self,
        generation: u64,
        notes: &[Note],
        session: Option<&Session>,
    ) -> Result<(), PersistenceError> {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if generation < *written {
            tracing::debug!(generation, written = *written, "skipping superseded snapshot");
            return Ok(());
        }

        self.status.send_replace(SaveStatus::Saving);
        let result = self
            .store
            .save_notes(notes)
            .and_then(|()| session.map_or(Ok(()), |s| self.store.save_session(s)));
        match &result {
            Ok(()) => {
                *written = generation;
                tracing::debug!(notes = notes.len(), generation, "collection saved");
                self.status.send_replace(SaveStatus::Saved);
            }
            Err(e) => {
                tracing::warn!("Saving notes failed: {e}");
                self.status.send_replace(SaveStatus::Error(e.clone()));
            }
        }
        result
    }
}
