use axum::{Router, http::Method, routing::get};
use std::error::Error;
use tower_http::cors::{Any, CorsLayer};

use crate::handler::{AppState, healthcheck};

pub mod api;
pub mod bookmarks;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod handler;
pub mod model;
pub mod session;
pub mod store;
pub mod synchronizer;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(healthcheck))
        .merge(bookmarks::routes())
        .layer(cors)
        .with_state(state)
}

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}
