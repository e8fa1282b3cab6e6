use axum::{
    Router,
    routing::{delete, get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::index))
        .route("/bookmarks", post(handler::create_from_form))
        .route("/bookmarks/:id/delete", post(handler::delete_from_form))
        .route("/events", get(handler::events))
        .route("/api/bookmarks", get(handler::list))
        .route("/api/bookmarks", post(handler::create))
        .route("/api/bookmarks/:id", delete(handler::delete))
}
