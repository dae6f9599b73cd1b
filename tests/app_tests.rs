#![cfg(feature = "web")]

mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::Router;
use common::{USER, context_for, signed_in_backend};
use medlog::app::{AppState, build_router};
use medlog::backend::memory::{Failures, MemoryBackend};
use serde_json::Value;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tower::ServiceExt;

const COOKIE: &str = "session=token-u1";
const BOUNDARY: &str = "medlog-boundary";

async fn router_for(backend: &Arc<MemoryBackend>) -> Router {
    build_router(AppState::new(context_for(backend).await))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, COOKIE)
        .body(Body::empty())
        .unwrap()
}

fn multipart_body(label: &str, files: &[(&str, &[u8])]) -> Body {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"label\"\r\n\r\n{}\r\n",
            BOUNDARY, label
        )
        .as_bytes(),
    );
    for (name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                BOUNDARY, name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

#[tokio::test]
async fn protected_routes_need_the_session_cookie() {
    let backend = signed_in_backend();
    let app = router_for(&backend).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/entries").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/entries")
                .header(header::COOKIE, "session=stale")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_sets_the_session_cookie() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_session(USER);
    medlog::backend::AuthProvider::sign_out(backend.as_ref())
        .await
        .unwrap();
    let app = router_for(&backend).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"email":"u1@example.test","password":"password"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with(COOKIE));
    let json = body_json(response).await;
    assert_eq!(json["user_id"], USER);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/session")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["signed_in"], true);
}

#[tokio::test]
async fn bad_login_is_unauthorized() {
    let backend = Arc::new(MemoryBackend::new());
    let app = router_for(&backend).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"nobody@example.test","password":"x"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["status"], "error");
}

#[tokio::test]
async fn entries_are_listed_and_searched() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    backend.seed_entry(USER, "Aspirin", &[], 10);
    let app = router_for(&backend).await;

    let json = body_json(app.clone().oneshot(get("/api/entries")).await.unwrap()).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["entries"][0]["medicine_name"], "Aspirin");
    assert_eq!(json["entries"][1]["image_urls"][0], "memory://u1/a.png");

    let json = body_json(app.clone().oneshot(get("/api/entries?q=IBU")).await.unwrap()).await;
    assert_eq!(json["entries"].as_array().unwrap().len(), 1);
    assert_eq!(json["no_matches"], false);

    let json = body_json(app.oneshot(get("/api/entries?q=zzz")).await.unwrap()).await;
    assert!(json["entries"].as_array().unwrap().is_empty());
    assert_eq!(json["no_matches"], true);
}

#[tokio::test]
async fn multipart_submit_creates_an_entry() {
    let backend = signed_in_backend();
    let app = router_for(&backend).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/entries")
        .header(header::COOKIE, COOKIE)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart_body("Ibuprofen", &[("a.png", b"one"), ("b.png", b"two")]))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["entry"]["medicine_name"], "Ibuprofen");
    assert_eq!(json["entry"]["images"].as_array().unwrap().len(), 2);

    let notice = body_json(app.oneshot(get("/api/notice")).await.unwrap()).await;
    assert_eq!(notice["kind"], "success");
    assert_eq!(notice["message"], "Entry saved successfully!");
    assert_eq!(backend.rows().len(), 1);
}

#[tokio::test]
async fn delete_requires_confirmation() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &[], 20);
    let app = router_for(&backend).await;
    let uri = format!("/api/entries/{}", entry.id);

    let unconfirmed = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header(header::COOKIE, COOKIE)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(unconfirmed).await.unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(backend.rows().len(), 1);

    let confirmed = Request::builder()
        .method("DELETE")
        .uri(format!("{}?confirm=true", uri))
        .header(header::COOKIE, COOKIE)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(confirmed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(backend.rows().is_empty());
}

#[tokio::test]
async fn csv_download_has_attachment_headers() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    let app = router_for(&backend).await;

    let response = app.clone().oneshot(get("/api/export/csv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"entries.csv\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Medicine Name,Image Count\nIbuprofen,2\n");

    let response = app.oneshot(get("/api/export/pdf")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, COOKIE)
        .body(Body::empty())
        .unwrap()
}

fn save_request(id: &str, label: &str, files: &[(&str, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(format!("/api/entries/{}", id))
        .header(header::COOKIE, COOKIE)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart_body(label, files))
        .unwrap()
}

#[tokio::test]
async fn edit_save_retry_adds_each_file_once() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    let app = router_for(&backend).await;

    let response = app
        .clone()
        .oneshot(request("POST", &format!("/api/entries/{}/edit", entry.id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let draft = body_json(response).await;
    assert_eq!(draft["label"], "Ibuprofen");
    assert_eq!(draft["images"][0], "u1/a.png");

    backend.set_failures(Failures {
        update: true,
        ..Failures::default()
    });
    let response = app
        .clone()
        .oneshot(save_request(&entry.id, "Ibuprofen 400mg", &[("n.png", b"new")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    backend.set_failures(Failures::default());
    let response = app
        .oneshot(save_request(&entry.id, "Ibuprofen 400mg", &[("n.png", b"new")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["images"].as_array().unwrap().len(), 2);

    let rows = backend.rows();
    assert_eq!(rows[0].medicine_name, "Ibuprofen 400mg");
    assert_eq!(rows[0].images.len(), 2);
    assert_eq!(rows[0].images[0], "u1/a.png");
}

#[tokio::test]
async fn cancelled_edit_cannot_be_saved() {
    let backend = signed_in_backend();
    let entry = backend.seed_entry(USER, "Aspirin", &[], 20);
    let app = router_for(&backend).await;

    app.clone()
        .oneshot(request("POST", &format!("/api/entries/{}/edit", entry.id)))
        .await
        .unwrap();
    let response = app.clone().oneshot(request("DELETE", "/api/edit")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(save_request(&entry.id, "Changed", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(backend.rows()[0].medicine_name, "Aspirin");
}

#[tokio::test]
async fn zip_download_contains_entry_folders() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    backend.seed_blob("u1/a.png", b"first");
    let app = router_for(&backend).await;

    let response = app.oneshot(get("/api/export/zip")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"entries.zip\""
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut name = String::new();
    archive
        .by_name("Ibuprofen/medicine_name.txt")
        .unwrap()
        .read_to_string(&mut name)
        .unwrap();
    assert_eq!(name, "Ibuprofen");
    assert!(archive.by_name("Ibuprofen/image_1.png").is_ok());
}
