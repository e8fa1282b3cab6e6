use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde_json::json;

use crate::config::Auth;
use crate::db::Database;
use crate::feed::ChangeFeed;
use crate::session::{SessionGate, gate_for_request};
use crate::store::{LibsqlBackend, LibsqlStore};
use crate::synchronizer::BookmarkSynchronizer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub backend: Arc<LibsqlBackend>,
    pub feed: ChangeFeed,
    pub auth: Arc<Auth>,
}

impl AppState {
    pub fn new(db: Arc<Database>, feed: ChangeFeed, auth: Auth) -> Self {
        let backend = Arc::new(LibsqlBackend::new(db.clone(), feed.clone()));
        Self {
            db,
            backend,
            feed,
            auth: Arc::new(auth),
        }
    }

    pub fn gate(&self, headers: &HeaderMap) -> SessionGate {
        gate_for_request(headers, &self.auth)
    }

    /// A fresh synchronizer bound to the caller of this request. Storage acts
    /// as the same caller. No subscription is held until `initialize`.
    pub fn synchronizer(&self, headers: &HeaderMap) -> BookmarkSynchronizer {
        let gate = self.gate(headers);
        let store = Arc::new(LibsqlStore::new(self.backend.clone(), gate.clone()));
        BookmarkSynchronizer::new(gate, store, self.feed.clone())
    }
}

pub async fn healthcheck() -> impl IntoResponse {
    tracing::debug!("got healthcheck request");
    Json(json!({ "status": "ok" }))
}

fn authority(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    rest.split(['/', '?', '#']).next().filter(|a| !a.is_empty())
}

/// True when a browser says the request came from a page on another host.
///
/// `Origin` is checked first and `Referer` second, against `X-Forwarded-Host`
/// or `Host`. Requests carrying neither header (curl, scripts) pass, since a
/// browser always sends one of them on a cross-site form post.
pub fn is_cross_site(headers: &HeaderMap) -> bool {
    let source = headers
        .get(header::ORIGIN)
        .or_else(|| headers.get(header::REFERER))
        .map(|v| v.to_str().ok().and_then(authority));
    let Some(source) = source else {
        return false;
    };

    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok());

    match (source, host) {
        (Some(source), Some(host)) => !source.eq_ignore_ascii_case(host),
        _ => true,
    }
}
