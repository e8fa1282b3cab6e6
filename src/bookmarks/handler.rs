//! HTTP handlers for the bookmark page, its form actions, the live event
//! stream and the JSON API.

use std::convert::Infallible;

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        Html, IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;

use super::view;
use crate::api;
use crate::handler::{AppState, is_cross_site};
use crate::model::BookmarkForm;
use crate::synchronizer::{BookmarkSynchronizer, Snapshot, Status};

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub notice: Option<String>,
}

fn cross_site_rejected(headers: &HeaderMap) -> Option<Response> {
    if !is_cross_site(headers) {
        return None;
    }
    tracing::warn!(
        origin = ?headers.get(axum::http::header::ORIGIN),
        referer = ?headers.get(axum::http::header::REFERER),
        "rejected cross-site write"
    );
    Some(api::error(StatusCode::FORBIDDEN, "cross-site request rejected"))
}

fn redirect_home(notice: Option<&str>) -> Redirect {
    match notice {
        Some(msg) => Redirect::to(&format!("/?notice={}", urlencoding::encode(msg))),
        None => Redirect::to("/"),
    }
}

// ============================================================================
// Page Handlers
// ============================================================================

pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Html<String> {
    let Some(user) = state.gate(&headers).current_user().await else {
        return Html(view::landing());
    };

    let sync = state.synchronizer(&headers);
    sync.initialize().await;
    let bookmarks = sync.bookmarks();
    sync.teardown().await;

    Html(view::bookmarks_page(&user, &bookmarks, params.notice.as_deref()))
}

pub async fn create_from_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<BookmarkForm>,
) -> Response {
    if let Some(rejected) = cross_site_rejected(&headers) {
        return rejected;
    }

    let sync = state.synchronizer(&headers);
    let redirect = match sync.create(form.title, form.url).await {
        Ok(saved) => {
            tracing::info!(id = %saved.id, user_id = %saved.user_id, "bookmark added");
            redirect_home(None)
        }
        Err(e) => {
            tracing::warn!(error = %e, "bookmark not added");
            redirect_home(Some(&e.notice()))
        }
    };
    redirect.into_response()
}

pub async fn delete_from_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(rejected) = cross_site_rejected(&headers) {
        return rejected;
    }
    if state.gate(&headers).current_user().await.is_none() {
        return redirect_home(None).into_response();
    }

    let sync = state.synchronizer(&headers);
    let redirect = match sync.delete(&id).await {
        Ok(()) => redirect_home(None),
        Err(e) => redirect_home(Some(&e.notice())),
    };
    redirect.into_response()
}

// ============================================================================
// Live Updates
// ============================================================================

fn snapshot_event(snap: &Snapshot) -> Event {
    Event::default()
        .event("snapshot")
        .json_data(snap)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to encode snapshot");
            Event::default().event("error").data("snapshot unavailable")
        })
}

/// One snapshot per change, starting with the current one. The stream owns
/// the synchronizer, so the subscription goes away with the connection, and
/// the stream ends when the synchronizer can no longer follow the feed.
fn snapshot_stream(
    sync: BookmarkSynchronizer,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let rx = sync.watch();
    stream::unfold((sync, rx, true), |(sync, mut rx, first)| async move {
        if !first {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = sync.closed() => return None,
            }
        }
        let event = snapshot_event(&rx.borrow_and_update());
        Some((Ok(event), (sync, rx, false)))
    })
}

pub async fn events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let sync = state.synchronizer(&headers);
    sync.initialize().await;
    if !sync.is_subscribed().await {
        sync.teardown().await;
        return api::unauthorized();
    }

    Sse::new(snapshot_stream(sync))
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ============================================================================
// JSON API
// ============================================================================

pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.gate(&headers).current_user().await.is_none() {
        return api::unauthorized();
    }

    let sync = state.synchronizer(&headers);
    sync.initialize().await;
    let snap = sync.snapshot();
    sync.teardown().await;

    match snap.status {
        Status::Ready => api::success(snap.bookmarks),
        Status::Loading => api::error(StatusCode::SERVICE_UNAVAILABLE, "bookmarks not loaded"),
    }
}

pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BookmarkForm>,
) -> Response {
    if let Some(rejected) = cross_site_rejected(&headers) {
        return rejected;
    }

    let sync = state.synchronizer(&headers);
    match sync.create(payload.title, payload.url).await {
        Ok(saved) => api::created(saved),
        Err(e) => api::sync_error(&e),
    }
}

pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(rejected) = cross_site_rejected(&headers) {
        return rejected;
    }
    if state.gate(&headers).current_user().await.is_none() {
        return api::unauthorized();
    }

    let sync = state.synchronizer(&headers);
    match sync.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => api::sync_error(&e),
    }
}
