//! Storage as seen by the synchronizer: select by owner, insert, delete by
//! id. Successful writes are echoed onto the change feed.
//!
//! A [`LibsqlStore`] acts on behalf of one caller and applies row-level
//! rules the way a managed backend would: callers only see, create and
//! delete their own rows, whatever ids they pass in.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::Database;
use crate::feed::{BOOKMARKS_TABLE, ChangeEvent, ChangeFeed};
use crate::model::{Bookmark, NewBookmark};
use crate::session::SessionGate;

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Bookmarks owned by `user_id`, ordered by `created_at` descending.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bookmark>>;

    async fn insert(&self, input: NewBookmark) -> Result<Bookmark>;

    /// Deleting an id that does not exist, or is not visible to the caller,
    /// is not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Shared by every request: the database, the feed its writes are echoed
/// to, and the lock that keeps echo order equal to commit order.
pub struct LibsqlBackend {
    db: Arc<Database>,
    feed: ChangeFeed,
    write_lock: Mutex<()>,
}

impl LibsqlBackend {
    pub fn new(db: Arc<Database>, feed: ChangeFeed) -> Self {
        Self {
            db,
            feed,
            write_lock: Mutex::new(()),
        }
    }
}

pub struct LibsqlStore {
    backend: Arc<LibsqlBackend>,
    caller: SessionGate,
}

impl LibsqlStore {
    pub fn new(backend: Arc<LibsqlBackend>, caller: SessionGate) -> Self {
        Self { backend, caller }
    }

    async fn caller_id(&self) -> Option<String> {
        self.caller.current_user().await.map(|user| user.id)
    }
}

#[async_trait]
impl BookmarkStore for LibsqlStore {
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Bookmark>> {
        if self.caller_id().await.as_deref() != Some(user_id) {
            return Ok(vec![]);
        }
        self.backend
            .db
            .list_bookmarks(user_id)
            .await
            .with_context(|| format!("list bookmarks of {user_id}"))
    }

    async fn insert(&self, input: NewBookmark) -> Result<Bookmark> {
        if self.caller_id().await.as_deref() != Some(input.user_id.as_str()) {
            anyhow::bail!("new row violates row-level security policy for table \"{BOOKMARKS_TABLE}\"");
        }

        let _guard = self.backend.write_lock.lock().await;
        let saved = self
            .backend
            .db
            .insert_bookmark(&input)
            .await
            .context("insert bookmark")?;
        self.backend
            .feed
            .publish(BOOKMARKS_TABLE, ChangeEvent::Insert(saved.clone()));
        Ok(saved)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Some(owner) = self.caller_id().await else {
            tracing::debug!(id, "delete without a caller matched no rows");
            return Ok(());
        };

        let _guard = self.backend.write_lock.lock().await;
        let removed = self
            .backend
            .db
            .delete_bookmark(id, &owner)
            .await
            .with_context(|| format!("delete bookmark {id}"))?;
        match removed {
            Some(row) => {
                self.backend.feed.publish(BOOKMARKS_TABLE, ChangeEvent::Delete(row));
            }
            None => tracing::debug!(id, "delete matched no bookmark"),
        }
        Ok(())
    }
}
