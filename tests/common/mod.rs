//! Collaborators for driving a synchronizer without a server.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use smartmarks::feed::ChangeFeed;
use smartmarks::model::{Bookmark, NewBookmark, User};
use smartmarks::session::{IdentityProvider, SessionGate};
use smartmarks::store::BookmarkStore;
use smartmarks::synchronizer::{BookmarkSynchronizer, Snapshot};
use tokio::sync::watch;

/// Identity that tests can sign in and out while a synchronizer is running.
#[derive(Clone, Default)]
pub struct SwitchableIdentity {
    user: Arc<Mutex<Option<User>>>,
}

impl SwitchableIdentity {
    pub fn signed_in(id: &str) -> Self {
        let identity = Self::default();
        identity.set(Some(id));
        identity
    }

    pub fn set(&self, id: Option<&str>) {
        *self.user.lock().unwrap() = id.map(User::new);
    }
}

#[async_trait]
impl IdentityProvider for SwitchableIdentity {
    async fn get_user(&self) -> anyhow::Result<Option<User>> {
        Ok(self.user.lock().unwrap().clone())
    }
}

type ListHook = Box<dyn Fn(&MockStore) + Send + Sync>;

/// In-memory store that records calls and can be told to fail.
#[derive(Default)]
pub struct MockStore {
    /// Runs inside `list_for_user` before rows are read, simulating writes
    /// that land while the query is in flight.
    pub during_list: Mutex<Option<ListHook>>,
    pub rows: Mutex<Vec<Bookmark>>,
    pub list_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MockStore {
    pub fn with_rows(rows: Vec<Bookmark>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    pub fn on_list(&self, hook: impl Fn(&MockStore) + Send + Sync + 'static) {
        *self.during_list.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl BookmarkStore for MockStore {
    async fn list_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Bookmark>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        let hooked = match self.during_list.lock().unwrap().take() {
            Some(hook) => {
                hook(self);
                true
            }
            None => false,
        };
        if hooked {
            // Let a running listener see whatever the hook published.
            tokio::task::yield_now().await;
        }
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(&self, input: NewBookmark) -> anyhow::Result<Bookmark> {
        let n = self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            anyhow::bail!("insert rejected");
        }
        let saved = Bookmark {
            id: format!("mock-{n}"),
            user_id: input.user_id,
            title: input.title,
            url: input.url,
            created_at: Utc::now(),
        };
        self.rows.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            anyhow::bail!("delete rejected");
        }
        self.rows.lock().unwrap().retain(|b| b.id != id);
        Ok(())
    }
}

pub fn bookmark(id: &str, user_id: &str, secs: i64) -> Bookmark {
    Bookmark {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("title {id}"),
        url: format!("http://{id}.example"),
        created_at: Utc.timestamp_opt(secs, 0).unwrap(),
    }
}

pub fn ids(bookmarks: &[Bookmark]) -> Vec<&str> {
    bookmarks.iter().map(|b| b.id.as_str()).collect()
}

pub fn synchronizer(
    identity: &SwitchableIdentity,
    store: Arc<MockStore>,
    feed: &ChangeFeed,
) -> BookmarkSynchronizer {
    BookmarkSynchronizer::new(SessionGate::from_provider(identity.clone()), store, feed.clone())
}

/// Waits until the snapshot satisfies `done`, failing the test after a second.
pub async fn wait_for(rx: &mut watch::Receiver<Snapshot>, done: impl Fn(&Snapshot) -> bool) -> Snapshot {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            {
                let snap = rx.borrow_and_update();
                if done(&snap) {
                    return snap.clone();
                }
            }
            rx.changed().await.expect("synchronizer dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
