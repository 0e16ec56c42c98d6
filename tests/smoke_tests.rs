//! Smoke tests for the end-to-end task workflow over HTTP.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jats::config::Config;
use jats::db::Store;
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "jats-smoke-boundary";

async fn spawn_app(dir: &std::path::Path) -> Router {
    let mut config = Config::default();
    config.db_url = Some(format!(
        "sqlite:{}?mode=rwc",
        dir.join("smoke.db").display()
    ));
    config.attachments_dir = dir.join("files").display().to_string();
    config.secure_cookies = false;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.security.argon2_parallelism = 1;
    config.security.api_key_memory_cost_kib = 1024;
    config.security.api_key_time_cost = 1;
    config.security.api_key_parallelism = 1;

    let store = Store::new(&config.database_url())
        .await
        .expect("failed to open store");
    let state =
        jats::api::create_app_state(&config, store, None).expect("failed to create app state");
    jats::api::router(state)
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn json_request(method: &str, uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn parse(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn login(app: &Router) -> String {
    let register = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/register")
        .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
        .body(Body::from(
            json!({ "username": "smoke", "email": "smoke@example.com", "password": "pw" })
                .to_string(),
        ))
        .unwrap();
    let (status, _) = call(app, register).await;
    assert_eq!(status, StatusCode::CREATED);

    let login = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/login")
        .header(header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
        .body(Body::from(
            json!({ "username": "smoke", "password": "pw" }).to_string(),
        ))
        .unwrap();
    let (status, body) = call(app, login).await;
    assert_eq!(status, StatusCode::OK);
    parse(&body)["data"]["session_token"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn smoke_task_lifecycle_with_children() {
    let dir = tempfile::tempdir().unwrap();
    let app = spawn_app(dir.path()).await;
    let token = login(&app).await;

    // Create and update.
    let (status, body) = call(
        &app,
        json_request(
            "POST",
            "/api/v1/tasks",
            &token,
            &json!({ "name": "Fix login page", "priority": "high", "tags": ["web"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = parse(&body)["data"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        json_request(
            "PATCH",
            &format!("/api/v1/tasks/{id}"),
            &token,
            &json!({ "status": "resolved" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let task = parse(&body)["data"].clone();
    assert_eq!(task["status"], json!("resolved"));
    assert!(task["resolved_at"].is_string());
    assert_eq!(task["priority"], json!("high"));

    // Comment, subtask and toggle.
    let (status, _) = call(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/tasks/{id}/comments"),
            &token,
            &json!({ "content": "Reproduced on Firefox" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/tasks/{id}/subtasks"),
            &token,
            &json!({ "name": "Write regression test" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let subtask_id = parse(&body)["data"]["id"].as_i64().unwrap();

    let toggle = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/tasks/{id}/subtasks/{subtask_id}/toggle"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, toggle).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["data"]["completed"], json!(true));

    let (status, body) = call(&app, get(&format!("/api/v1/tasks/{id}"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    let detail = parse(&body)["data"].clone();
    assert_eq!(detail["comments"].as_array().unwrap().len(), 1);
    assert_eq!(detail["comments"][0]["is_private"], json!(true));
    assert_eq!(detail["subtasks"].as_array().unwrap().len(), 1);

    // Search is case-insensitive.
    let (status, body) = call(&app, get("/api/v1/search?q=LOGIN", &token)).await;
    assert_eq!(status, StatusCode::OK);
    let search = parse(&body)["data"].clone();
    assert_eq!(search["type"], json!("task"));
    assert_eq!(search["results"][0]["id"], json!(id));

    let (status, body) = call(&app, get("/api/v1/search?q=firefox&type=comment", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["data"]["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn smoke_attachment_upload_and_download() {
    let dir = tempfile::tempdir().unwrap();
    let app = spawn_app(dir.path()).await;
    let token = login(&app).await;

    let (_, body) = call(
        &app,
        json_request("POST", "/api/v1/tasks", &token, &json!({ "name": "Invoice" })),
    )
    .await;
    let id = parse(&body)["data"]["id"].as_i64().unwrap();

    let multipart = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         hello attachment\r\n\
         --{BOUNDARY}--\r\n"
    );
    let upload = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/tasks/{id}/attachments"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart))
        .unwrap();
    let (status, body) = call(&app, upload).await;
    assert_eq!(status, StatusCode::CREATED, "{}", String::from_utf8_lossy(&body));
    let attachment = parse(&body)["data"].clone();
    assert_eq!(attachment["original_name"], json!("notes.txt"));
    assert_eq!(attachment["size"], json!(16));
    assert!(
        attachment["filename"]
            .as_str()
            .unwrap()
            .ends_with(".txt")
    );
    let attachment_id = attachment["id"].as_i64().unwrap();

    let (status, body) = call(&app, get(&format!("/api/v1/tasks/{id}/attachments"), &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["data"].as_array().unwrap().len(), 1);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/attachments/{attachment_id}"), &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .starts_with("text/plain")
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello attachment");
}

#[tokio::test]
async fn smoke_logout_invalidates_session() {
    let dir = tempfile::tempdir().unwrap();
    let app = spawn_app(dir.path()).await;
    let token = login(&app).await;

    let (status, _) = call(&app, get("/api/v1/auth/profile", &token)).await;
    assert_eq!(status, StatusCode::OK);

    let logout = Request::builder()
        .method("POST")
        .uri("/api/v1/auth/logout")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, logout).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, get("/api/v1/auth/profile", &token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse(&body)["error"]["code"], json!("INVALID_SESSION"));
}
