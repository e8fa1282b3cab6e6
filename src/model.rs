use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Name shown in the page header.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// Title and url as submitted by the user, before an owner is attached.
#[derive(Debug, Clone, Deserialize)]
pub struct BookmarkForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

impl BookmarkForm {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.title.trim().is_empty() {
            return Err(SyncError::Validation("title must not be empty".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(SyncError::Validation("url must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn owned_by(self, user: &User) -> NewBookmark {
        NewBookmark {
            user_id: user.id.clone(),
            title: self.title.trim().to_string(),
            url: self.url.trim().to_string(),
        }
    }
}

/// Row to insert. `id` and `created_at` are assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    pub user_id: String,
    pub title: String,
    pub url: String,
}
