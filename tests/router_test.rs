//! End-to-end requests against the router with an in-memory database.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, BodyDataStream, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use smartmarks::config::Auth;
use smartmarks::db::Database;
use smartmarks::feed::ChangeFeed;
use smartmarks::handler::AppState;
use tower::ServiceExt;

const USER_HEADER: &str = "x-forwarded-user";

async fn app() -> Router {
    let db = Arc::new(Database::open_in_memory().await.unwrap());
    smartmarks::router(AppState::new(db, ChangeFeed::new(16), Auth::default()))
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_form(uri: &str, user: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn json_request(method: &str, uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_HEADER, user)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

async fn next_frame(frames: &mut BodyDataStream) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(1), frames.next())
        .await
        .expect("no frame in time")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app().await;
    let response = send(&app, get("/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn anonymous_visitor_sees_landing_page() {
    let app = app().await;
    let html = body_text(send(&app, get("/", None)).await).await;
    assert!(html.contains("Welcome to Smart Bookmark Manager"));
}

#[tokio::test]
async fn form_submission_adds_bookmark_to_page() {
    let app = app().await;

    let response = send(
        &app,
        post_form("/bookmarks", Some("u1"), "title=Rust&url=https%3A%2F%2Frust-lang.org"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    let html = body_text(send(&app, get("/", Some("u1"))).await).await;
    assert!(html.contains("<h3>Rust</h3>"));
    assert!(html.contains(r#"<span id="count">1</span>"#));

    let other = body_text(send(&app, get("/", Some("u2"))).await).await;
    assert!(other.contains(r#"<span id="count">0</span>"#));
}

#[tokio::test]
async fn empty_title_redirects_with_notice() {
    let app = app().await;
    let response = send(&app, post_form("/bookmarks", Some("u1"), "title=&url=http%3A%2F%2Fx")).await;
    assert_eq!(location(&response), "/?notice=title%20must%20not%20be%20empty");

    let html = body_text(send(&app, get(location(&response), Some("u1"))).await).await;
    assert!(html.contains("title must not be empty"));
}

#[tokio::test]
async fn anonymous_submission_redirects_with_login_notice() {
    let app = app().await;
    let response = send(&app, post_form("/bookmarks", None, "title=Rust&url=http%3A%2F%2Fx")).await;
    assert_eq!(
        location(&response),
        "/?notice=You%20must%20be%20logged%20in%20to%20add%20bookmarks"
    );
}

#[tokio::test]
async fn json_api_round_trip() {
    let app = app().await;

    let response = send(
        &app,
        json_request("POST", "/api/bookmarks", "u1", json!({"title": "Rust", "url": "https://rust-lang.org"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["data"]["user_id"], "u1");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let listed = body_json(send(&app, get("/api/bookmarks", Some("u1"))).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let foreign = body_json(send(&app, get("/api/bookmarks", Some("u2"))).await).await;
    assert!(foreign["data"].as_array().unwrap().is_empty());

    let response = send(&app, json_request("DELETE", &format!("/api/bookmarks/{id}"), "u1", json!({}))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listed = body_json(send(&app, get("/api/bookmarks", Some("u1"))).await).await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn json_api_rejects_blank_url() {
    let app = app().await;
    let response = send(
        &app,
        json_request("POST", "/api/bookmarks", "u1", json!({"title": "Rust", "url": ""})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "url must not be empty");
}

#[tokio::test]
async fn json_api_requires_a_session() {
    let app = app().await;
    let response = send(&app, get("/api/bookmarks", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn event_stream_requires_a_session() {
    let app = app().await;
    let response = send(&app, get("/events", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn event_stream_pushes_snapshots() {
    let app = app().await;

    let response = send(&app, get("/events", Some("u1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap(),
        "text/event-stream"
    );

    let mut frames = response.into_body().into_data_stream();

    let first = next_frame(&mut frames).await;
    assert!(first.contains("event: snapshot"));
    assert!(first.contains(r#""bookmarks":[]"#));

    send(
        &app,
        json_request("POST", "/api/bookmarks", "u1", json!({"title": "Live", "url": "http://live"})),
    )
    .await;

    let second = next_frame(&mut frames).await;
    assert!(second.contains(r#""title":"Live""#));
}

fn with_header(mut request: Request<Body>, name: &'static str, value: &'static str) -> Request<Body> {
    request
        .headers_mut()
        .insert(name, header::HeaderValue::from_static(value));
    request
}

#[tokio::test]
async fn cross_site_form_post_is_rejected() {
    let app = app().await;
    let request = post_form(
        "/bookmarks",
        Some("u1"),
        "title=Planted&url=javascript%3Aalert(document.domain)",
    );
    let request = with_header(with_header(request, "host", "marks.local"), "origin", "https://evil.example");

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let html = body_text(send(&app, get("/", Some("u1"))).await).await;
    assert!(html.contains(r#"<span id="count">0</span>"#));
}

#[tokio::test]
async fn same_origin_form_post_is_accepted() {
    let app = app().await;
    let request = post_form("/bookmarks", Some("u1"), "title=Rust&url=https%3A%2F%2Frust-lang.org");
    let request = with_header(with_header(request, "host", "marks.local"), "origin", "http://marks.local");

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn cross_site_api_delete_is_rejected() {
    let app = app().await;
    let created = body_json(
        send(
            &app,
            json_request("POST", "/api/bookmarks", "u1", json!({"title": "Keep", "url": "http://keep"})),
        )
        .await,
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let request = json_request("DELETE", &format!("/api/bookmarks/{id}"), "u1", json!({}));
    let request = with_header(with_header(request, "host", "marks.local"), "referer", "https://evil.example/x");
    assert_eq!(send(&app, request).await.status(), StatusCode::FORBIDDEN);

    let listed = body_json(send(&app, get("/api/bookmarks", Some("u1"))).await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn script_urls_are_stored_but_rendered_as_text() {
    let app = app().await;
    let response = send(
        &app,
        post_form("/bookmarks", Some("u1"), "title=Odd&url=javascript%3Aalert(document.domain)"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let html = body_text(send(&app, get("/", Some("u1"))).await).await;
    assert!(html.contains(r#"<span id="count">1</span>"#));
    assert!(!html.contains(r#"href="javascript:"#));
    assert!(html.contains(r#"<span class="url">javascript:alert(document.domain)</span>"#));
}
