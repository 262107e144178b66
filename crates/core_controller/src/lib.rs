use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use core_types::{Category, Note, NoteDraft, NoteValidationError};
use kv_store::{KeyValueStore, StorageKey, StoreError};
use note_query::{NoteQuery, NoteStatistics, derive_view, statistics};
use note_repository::{ImportError, NoteRepository, RepositoryError};
use parking_lot::Mutex;
use text_assist::{ImproveError, TextImprover};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] NoteValidationError),
    #[error("note `{0}` not found")]
    NotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Improve(#[from] ImproveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// The imported collection becomes the whole collection.
    #[default]
    Replace,
    /// Imported notes whose id is not present yet are appended.
    Merge,
}

/// Single owner of the note collection.
///
/// Every mutation updates the in-memory collection first and then rewrites
/// the stored collection. A failed write is returned to the caller while the
/// in-memory change stays applied.
pub struct NotesController {
    repository: NoteRepository,
    categories: Vec<Category>,
    notes: Vec<Note>,
}

impl NotesController {
    pub async fn open(repository: NoteRepository, categories: Vec<Category>) -> Self {
        let notes = repository.load().await;
        info!(key = %repository.key(), count = notes.len(), "notes controller opened");
        Self {
            repository,
            categories,
            notes,
        }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|note| note.id == id)
    }

    pub async fn add(&mut self, draft: NoteDraft) -> Result<Note, ControllerError> {
        draft.validate(&self.categories)?;
        let note = Note::from_draft(draft);
        self.notes.insert(0, note.clone());
        debug!(id = %note.id, category = %note.category, "note added");
        self.persist().await?;
        Ok(note)
    }

    pub async fn update(&mut self, id: &str, draft: NoteDraft) -> Result<Note, ControllerError> {
        draft.validate(&self.categories)?;
        let slot = self
            .notes
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        *slot = slot.replaced_with(draft);
        let note = slot.clone();
        debug!(id = %note.id, "note updated");
        self.persist().await?;
        Ok(note)
    }

    pub async fn delete(&mut self, id: &str) -> Result<Note, ControllerError> {
        let index = self
            .notes
            .iter()
            .position(|note| note.id == id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        let removed = self.notes.remove(index);
        debug!(id = %removed.id, "note deleted");
        self.persist().await?;
        Ok(removed)
    }

    pub async fn clear_all(&mut self) -> Result<(), ControllerError> {
        let count = self.notes.len();
        self.notes.clear();
        self.repository.clear().await?;
        info!(count, "all notes cleared");
        Ok(())
    }

    pub fn export(&self) -> Result<String, ControllerError> {
        Ok(self.repository.export(&self.notes)?)
    }

    /// Returns how many notes were taken from `text`.
    pub async fn import(&mut self, text: &str, mode: ImportMode) -> Result<usize, ControllerError> {
        let incoming = self.repository.import(text)?;
        self.absorb(incoming, mode).await
    }

    pub async fn import_legacy(
        &mut self,
        text: &str,
        mode: ImportMode,
    ) -> Result<usize, ControllerError> {
        let incoming = self.repository.import_legacy(text)?;
        self.absorb(incoming, mode).await
    }

    pub fn view(&self, query: &NoteQuery) -> Vec<&Note> {
        derive_view(&self.notes, query)
    }

    pub fn statistics(&self) -> NoteStatistics {
        statistics(&self.notes)
    }

    /// Asks `improver` for a rewrite of the note's content. The note itself is
    /// left untouched; apply the result with [`NotesController::update`].
    pub async fn improve(
        &self,
        id: &str,
        improver: &dyn TextImprover,
    ) -> Result<String, ControllerError> {
        let note = self
            .get(id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        let category = Some(note.category.as_str()).filter(|c| !c.is_empty());
        Ok(improver.improve(&note.content, category).await?)
    }

    async fn absorb(&mut self, incoming: Vec<Note>, mode: ImportMode) -> Result<usize, ControllerError> {
        let taken = match mode {
            ImportMode::Replace => {
                let count = incoming.len();
                self.notes = incoming;
                count
            }
            ImportMode::Merge => {
                let mut known: HashSet<String> =
                    self.notes.iter().map(|note| note.id.clone()).collect();
                let before = self.notes.len();
                self.notes
                    .extend(incoming.into_iter().filter(|note| known.insert(note.id.clone())));
                self.notes.len() - before
            }
        };
        info!(?mode, taken, total = self.notes.len(), "notes imported");
        self.persist().await?;
        Ok(taken)
    }

    async fn persist(&self) -> Result<(), ControllerError> {
        self.repository.save(&self.notes).await?;
        Ok(())
    }
}

/// Publishes a search query only after input has been quiet for `delay`.
pub struct SearchDebouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl SearchDebouncer {
    pub fn new(delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            delay,
            pending: None,
            tx,
            rx,
        }
    }

    pub fn submit(&mut self, query: impl Into<String>) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        let query = query.into();
        let delay = self.delay;
        let tx = self.tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(query);
        }));
    }

    /// Waits for the next query that survived the quiet period.
    pub async fn settled(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

#[derive(Default)]
struct DraftSlot {
    draft: Option<NoteDraft>,
    dirty: bool,
}

/// Periodically writes the latest unsaved draft of an editing session.
pub struct DraftAutosave {
    store: Arc<dyn KeyValueStore>,
    key: String,
    slot: Arc<Mutex<DraftSlot>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DraftAutosave {
    pub fn start(store: Arc<dyn KeyValueStore>, key: &StorageKey, interval: Duration) -> Self {
        let key = key.to_string();
        let slot = Arc::new(Mutex::new(DraftSlot::default()));
        let (shutdown, stop_rx) = oneshot::channel();
        let task = tokio::spawn(autosave_loop(
            Arc::clone(&store),
            key.clone(),
            Arc::clone(&slot),
            interval,
            stop_rx,
        ));
        debug!(key = %key, interval_ms = interval.as_millis() as u64, "draft autosave started");
        Self {
            store,
            key,
            slot,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn update(&self, draft: NoteDraft) {
        let mut slot = self.slot.lock();
        slot.draft = Some(draft);
        slot.dirty = true;
    }

    /// Stops autosaving and drops the stored draft once the note is committed.
    ///
    /// A draft write already in flight completes before the key is removed.
    pub async fn finish(mut self) -> Result<(), StoreError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.store.remove_item(&self.key).await?;
        debug!(key = %self.key, "draft autosave finished");
        Ok(())
    }

    /// Stops autosaving, leaving the last written draft in the store.
    pub fn cancel(mut self) {
        self.stop();
        debug!(key = %self.key, "draft autosave cancelled");
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for DraftAutosave {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn autosave_loop(
    store: Arc<dyn KeyValueStore>,
    key: String,
    slot: Arc<Mutex<DraftSlot>>,
    interval: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut stop_rx => break,
        }
        let pending = {
            let mut slot = slot.lock();
            if !slot.dirty {
                continue;
            }
            slot.dirty = false;
            slot.draft.clone()
        };
        let Some(draft) = pending else {
            continue;
        };

        let text = match serde_json::to_string(&draft) {
            Ok(text) => text,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to serialize draft");
                continue;
            }
        };
        if let Err(err) = store.set_item(&key, text).await {
            warn!(key = %key, error = %err, "failed to autosave draft");
            slot.lock().dirty = true;
        }
    }
}

/// Recovers a draft left by an interrupted editing session.
pub async fn load_draft(store: &dyn KeyValueStore, key: &StorageKey) -> Option<NoteDraft> {
    let key = key.to_string();
    let raw = match store.get_item(&key).await {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to read draft");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(draft) => Some(draft),
        Err(err) => {
            warn!(key = %key, error = %err, "stored draft is not decodable");
            None
        }
    }
}
