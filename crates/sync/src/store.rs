use rookery_api::Page;
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};

use crate::cursor::PageCursor;

struct CollectionState<T> {
    entries: Vec<T>,
    cursor: PageCursor,
    new_items_available: bool,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            cursor: PageCursor::start(),
            new_items_available: false,
        }
    }
}

/// Consistent read of one collection, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSnapshot<T> {
    pub entries: Vec<T>,
    pub new_items_available: bool,
}

/// Shared state machinery behind each per-family sync engine: the
/// entries, the page cursor, the new-items flag, and a revision counter
/// observers can watch instead of polling.
///
/// The revision only moves when something observable changed, so
/// replaying an already-applied mutation wakes nobody.
pub struct CollectionStore<T> {
    id_of: fn(&T) -> i64,
    order: Option<fn(&mut Vec<T>)>,
    state: RwLock<CollectionState<T>>,
    revision: watch::Sender<u64>,
    refresh_gate: Mutex<()>,
}

impl<T: Clone + PartialEq> CollectionStore<T> {
    pub fn new(id_of: fn(&T) -> i64) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            id_of,
            order: None,
            state: RwLock::new(CollectionState::default()),
            revision,
            refresh_gate: Mutex::new(()),
        }
    }

    /// A store that re-applies `order` after every insert or replace.
    pub fn with_order(id_of: fn(&T) -> i64, order: fn(&mut Vec<T>)) -> Self {
        Self {
            order: Some(order),
            ..Self::new(id_of)
        }
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<T> {
        let state = self.state.read().await;
        CollectionSnapshot {
            entries: state.entries.clone(),
            new_items_available: state.new_items_available,
        }
    }

    pub async fn entries(&self) -> Vec<T> {
        self.state.read().await.entries.clone()
    }

    pub async fn new_items_available(&self) -> bool {
        self.state.read().await.new_items_available
    }

    pub async fn cursor(&self) -> PageCursor {
        self.state.read().await.cursor
    }

    /// Counter that increments on every observable change.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Claim the right to run a refresh, or `None` while one is in
    /// flight.
    pub(crate) fn try_begin_refresh(&self) -> Option<MutexGuard<'_, ()>> {
        self.refresh_gate.try_lock().ok()
    }

    /// Page to request next, or `None` when the listing is complete.
    pub(crate) async fn next_page(&self, reset: bool) -> Option<u32> {
        if reset {
            return Some(1);
        }
        let state = self.state.read().await;
        state.cursor.has_more().then(|| state.cursor.next_page())
    }

    /// Fold one fetched page into the collection. A reset replaces the
    /// entries and retires the new-items flag; an append deduplicates
    /// against rows already present.
    pub(crate) async fn apply_page(&self, fetched: Page<T>, reset: bool) {
        let Page {
            items,
            page,
            total_pages,
            ..
        } = fetched;

        let mut state = self.state.write().await;
        if reset {
            state.entries.clear();
            state.new_items_available = false;
        }
        for entity in items {
            upsert_entry(&mut state.entries, entity, self.id_of);
        }
        if let Some(order) = self.order {
            order(&mut state.entries);
        }
        state.cursor.advance(page, total_pages);
        drop(state);

        self.bump();
    }

    /// Insert or replace by id. Returns whether anything changed.
    pub(crate) async fn upsert(&self, entity: T) -> bool {
        let mut state = self.state.write().await;
        let changed = upsert_entry(&mut state.entries, entity, self.id_of);
        if changed && let Some(order) = self.order {
            order(&mut state.entries);
        }
        drop(state);

        if changed {
            self.bump();
        }
        changed
    }

    /// Remove by id. Returns whether the entry was present.
    pub(crate) async fn remove(&self, id: i64) -> bool {
        let id_of = self.id_of;
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|entity| id_of(entity) != id);
        let removed = state.entries.len() != before;
        drop(state);

        if removed {
            self.bump();
        }
        removed
    }

    pub(crate) async fn flag_new_items(&self) {
        let mut state = self.state.write().await;
        if state.new_items_available {
            return;
        }
        state.new_items_available = true;
        drop(state);

        self.bump();
    }

    pub(crate) async fn clear(&self) {
        let mut state = self.state.write().await;
        let was_empty = state.entries.is_empty()
            && !state.new_items_available
            && state.cursor == PageCursor::start();
        state.entries.clear();
        state.new_items_available = false;
        state.cursor.reset();
        drop(state);

        if !was_empty {
            self.bump();
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

fn upsert_entry<T: PartialEq>(entries: &mut Vec<T>, entity: T, id_of: fn(&T) -> i64) -> bool {
    let id = id_of(&entity);
    if let Some(index) = entries.iter().position(|existing| id_of(existing) == id) {
        if entries[index] == entity {
            return false;
        }
        entries[index] = entity;
        true
    } else {
        entries.push(entity);
        true
    }
}
