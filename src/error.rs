use thiserror::Error;

/// Failure kinds surfaced by the synchronizer. None of them is fatal: each
/// leaves the local collection as it was before the call.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("ValidationError: {0}")]
    Validation(String),

    #[error("QueryFailed: {}", chain(.0))]
    QueryFailed(#[source] anyhow::Error),

    #[error("InsertFailed: {}", chain(.0))]
    InsertFailed(#[source] anyhow::Error),

    #[error("DeleteFailed: {}", chain(.0))]
    DeleteFailed(#[source] anyhow::Error),
}

fn chain(err: &anyhow::Error) -> String {
    crate::unpack_error(&**err)
}

impl SyncError {
    /// Message meant for the person using the page, without internals.
    pub fn notice(&self) -> String {
        use SyncError::*;
        match self {
            Unauthenticated => "You must be logged in to add bookmarks".to_string(),
            Validation(msg) => msg.clone(),
            QueryFailed(_) => "Failed to load bookmarks".to_string(),
            InsertFailed(_) => "Failed to add bookmark".to_string(),
            DeleteFailed(_) => "Failed to delete bookmark".to_string(),
        }
    }
}
