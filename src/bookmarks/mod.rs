//! Bookmarks Module
//!
//! The user-facing surface of the service: a server-rendered page with a
//! create form and the caller's list, form actions for create and delete, a
//! server-sent event stream that keeps an open page current, and a small JSON
//! API over the same operations.
//!
//! Every handler works through a [`BookmarkSynchronizer`](crate::synchronizer::BookmarkSynchronizer)
//! bound to the caller of the request.
//!
//! # Usage
//!
//! ```rust,ignore
//! use smartmarks::bookmarks;
//!
//! let app = Router::new()
//!     .merge(bookmarks::routes())
//!     .with_state(app_state);
//! ```

mod handler;
mod routes;
pub mod view;

pub use routes::routes;
