//! Live bookmark list for one signed-in session.
//!
//! The synchronizer loads a snapshot of the caller's bookmarks and then keeps
//! it current from the change feed. Its own `create` and `delete` calls never
//! touch the list directly: the storage echo is the only thing that does, so a
//! failed write can not leave a phantom entry behind.
//!
//! All state lives in one `watch` channel. Feed events are applied by a single
//! listener task in delivery order, and every mutation goes through
//! `send_if_modified`, so views can subscribe and re-render on change.
//!
//! Reloading from storage holds the apply lock for the whole query. Events
//! published meanwhile stay buffered in the subscription and are replayed on
//! top of the fresh list, where dedup by id absorbs any overlap.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::feed::{BOOKMARKS_TABLE, ChangeEvent, ChangeFeed, Delivery, Subscription};
use crate::model::{Bookmark, BookmarkForm};
use crate::session::SessionGate;
use crate::store::BookmarkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Loading,
    Ready,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: Status,
    pub bookmarks: Vec<Bookmark>,
    /// Feed events of a kind this list does not act on.
    pub unrecognized: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            status: Status::Loading,
            bookmarks: vec![],
            unrecognized: 0,
        }
    }
}

/// What a single change event did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Inserted,
    Removed,
    /// Insert for an id already in the list.
    Duplicate,
    /// Delete for an id not in the list.
    Missing,
    ForeignOwner,
    SignedOut,
    Unrecognized,
    /// Arrived after teardown.
    Stale,
}

struct Inner {
    gate: SessionGate,
    store: Arc<dyn BookmarkStore>,
    feed: ChangeFeed,
    state: watch::Sender<Snapshot>,
    token: CancellationToken,
    applying: Mutex<()>,
}

pub struct BookmarkSynchronizer {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl BookmarkSynchronizer {
    pub fn new(gate: SessionGate, store: Arc<dyn BookmarkStore>, feed: ChangeFeed) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        Self {
            inner: Arc::new(Inner {
                gate,
                store,
                feed,
                state,
                token: CancellationToken::new(),
                applying: Mutex::new(()),
            }),
            listener: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.borrow().clone()
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.inner.state.borrow().bookmarks.clone()
    }

    pub fn status(&self) -> Status {
        self.inner.state.borrow().status
    }

    pub fn unrecognized_events(&self) -> u64 {
        self.inner.state.borrow().unrecognized
    }

    /// Receiver that is notified on every change to the snapshot.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_live(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Resolves once the synchronizer is torn down or its feed has closed.
    pub async fn closed(&self) {
        self.inner.token.cancelled().await
    }

    pub async fn is_subscribed(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Loads the caller's bookmarks and starts following the change feed.
    ///
    /// A signed-out caller gets an empty, ready list and no subscription. A
    /// failed query also yields an empty list; the subscription is still
    /// opened so later changes show up. Calling it again reloads the list and
    /// keeps the running listener.
    pub async fn initialize(&self) {
        if !self.is_live() {
            tracing::debug!("initialize called after teardown, ignoring");
            return;
        }

        self.inner.state.send_modify(|snap| snap.status = Status::Loading);

        let Some(user) = self.inner.gate.current_user().await else {
            self.inner.state.send_modify(|snap| {
                snap.bookmarks.clear();
                snap.status = Status::Ready;
            });
            return;
        };

        // Subscribe before querying so nothing committed during the query
        // is missed. A running listener is kept and waits on the apply lock.
        let mut listener = self.listener.lock().await;
        let subscription = match listener.as_ref() {
            Some(handle) if !handle.is_finished() => None,
            _ => Some(self.inner.feed.subscribe(BOOKMARKS_TABLE)),
        };

        let _applying = self.inner.applying.lock().await;
        let bookmarks = match self.inner.store.list_for_user(&user.id).await {
            Ok(bookmarks) => bookmarks,
            Err(e) => {
                let err = SyncError::QueryFailed(e);
                tracing::error!(user_id = %user.id, error = %err, "failed to load bookmarks");
                vec![]
            }
        };

        if !self.is_live() {
            tracing::debug!(user_id = %user.id, "snapshot arrived after teardown, discarding");
            return;
        }

        tracing::info!(user_id = %user.id, count = bookmarks.len(), "loaded bookmarks");
        self.inner.state.send_modify(|snap| {
            snap.bookmarks = bookmarks;
            snap.status = Status::Ready;
        });

        if let Some(subscription) = subscription {
            let inner = self.inner.clone();
            *listener = Some(tokio::spawn(listen(inner, subscription)));
        }
    }

    /// Applies one change event to the list.
    pub async fn handle_change_event(&self, event: ChangeEvent) -> EventOutcome {
        self.inner.apply(event).await
    }

    /// Stores a new bookmark for the caller. The list only changes when the
    /// insert is echoed back through the feed.
    pub async fn create(&self, title: impl Into<String>, url: impl Into<String>) -> Result<Bookmark, SyncError> {
        let form = BookmarkForm::new(title, url);
        form.validate()?;

        let user = self
            .inner
            .gate
            .current_user()
            .await
            .ok_or(SyncError::Unauthenticated)?;

        let saved = self
            .inner
            .store
            .insert(form.owned_by(&user))
            .await
            .map_err(SyncError::InsertFailed)
            .inspect_err(|e| tracing::error!(user_id = %user.id, error = %e, "failed to add bookmark"))?;

        if !self.is_live() {
            tracing::debug!(id = %saved.id, "insert completed after teardown");
        }
        Ok(saved)
    }

    /// Deletes by id. Ownership is enforced by storage, not checked here.
    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.inner
            .store
            .delete(id)
            .await
            .map_err(SyncError::DeleteFailed)
            .inspect_err(|e| tracing::error!(id, error = %e, "failed to delete bookmark"))?;

        if !self.is_live() {
            tracing::debug!(id, "delete completed after teardown");
        }
        Ok(())
    }

    /// Stops following the feed and releases the subscription. Safe to call
    /// more than once, and before `initialize`.
    pub async fn teardown(&self) {
        self.inner.token.cancel();
        let handle = self.listener.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "change listener ended abnormally");
            }
            tracing::debug!("bookmark synchronizer torn down");
        }
    }
}

impl Drop for BookmarkSynchronizer {
    fn drop(&mut self) {
        // The listener sees the cancellation and drops its subscription.
        self.inner.token.cancel();
    }
}

async fn listen(inner: Arc<Inner>, mut subscription: Subscription) {
    loop {
        tokio::select! {
            biased;
            _ = inner.token.cancelled() => break,
            delivery = subscription.recv() => match delivery {
                Some(Delivery::Change(event)) => {
                    inner.apply(event).await;
                }
                Some(Delivery::Lagged { missed }) => inner.resync(missed).await,
                None => {
                    tracing::info!(table = subscription.table(), "change feed closed");
                    // Nothing can keep the list current any more.
                    inner.token.cancel();
                    break;
                }
            },
        }
    }
}

impl Inner {
    async fn apply(&self, event: ChangeEvent) -> EventOutcome {
        if self.token.is_cancelled() {
            return EventOutcome::Stale;
        }
        let _applying = self.applying.lock().await;

        // Sessions can change while the feed is open, so never cache this.
        let user = self.gate.current_user().await;

        if self.token.is_cancelled() {
            return EventOutcome::Stale;
        }
        let Some(user) = user else {
            tracing::debug!(kind = event.kind(), "discarding change, no signed-in user");
            return EventOutcome::SignedOut;
        };

        let outcome = match event {
            ChangeEvent::Insert(record) if record.user_id == user.id => self.insert(record),
            ChangeEvent::Delete(record) if record.user_id == user.id => self.remove(&record.id),
            ChangeEvent::Insert(_) | ChangeEvent::Delete(_) => EventOutcome::ForeignOwner,
            ChangeEvent::Other { kind } => {
                tracing::debug!(kind, "ignoring unrecognized change");
                self.state.send_modify(|snap| snap.unrecognized += 1);
                EventOutcome::Unrecognized
            }
        };
        tracing::debug!(user_id = %user.id, ?outcome, "applied change");
        outcome
    }

    /// Replaces the list after the subscription dropped events. On a failed
    /// query the current list is kept; it is behind but not wrong for what
    /// it shows.
    async fn resync(&self, missed: u64) {
        let _applying = self.applying.lock().await;
        if self.token.is_cancelled() {
            return;
        }
        let Some(user) = self.gate.current_user().await else {
            tracing::debug!(missed, "skipping reload, no signed-in user");
            return;
        };

        let bookmarks = match self.store.list_for_user(&user.id).await {
            Ok(bookmarks) => bookmarks,
            Err(e) => {
                let err = SyncError::QueryFailed(e);
                tracing::error!(user_id = %user.id, missed, error = %err, "failed to reload bookmarks");
                return;
            }
        };
        if self.token.is_cancelled() {
            return;
        }

        tracing::info!(user_id = %user.id, missed, count = bookmarks.len(), "reloaded bookmarks after missed changes");
        self.state.send_modify(|snap| snap.bookmarks = bookmarks);
    }

    fn insert(&self, record: Bookmark) -> EventOutcome {
        let mut outcome = EventOutcome::Duplicate;
        self.state.send_if_modified(|snap| {
            if snap.bookmarks.iter().any(|b| b.id == record.id) {
                return false;
            }
            let at = insert_position(&snap.bookmarks, &record);
            snap.bookmarks.insert(at, record);
            outcome = EventOutcome::Inserted;
            true
        });
        outcome
    }

    fn remove(&self, id: &str) -> EventOutcome {
        let mut outcome = EventOutcome::Missing;
        self.state.send_if_modified(|snap| {
            let before = snap.bookmarks.len();
            snap.bookmarks.retain(|b| b.id != id);
            if snap.bookmarks.len() == before {
                return false;
            }
            outcome = EventOutcome::Removed;
            true
        });
        outcome
    }
}

/// Front of the list for the newest record; an echo older than some entries
/// goes after them so the list stays newest-first.
fn insert_position(bookmarks: &[Bookmark], record: &Bookmark) -> usize {
    bookmarks
        .iter()
        .position(|b| b.created_at <= record.created_at)
        .unwrap_or(bookmarks.len())
}
