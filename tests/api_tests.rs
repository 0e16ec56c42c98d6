use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jats::config::Config;
use jats::db::Store;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    _dir: TempDir,
}

async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.db_url = Some(format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("jats.db").display()
    ));
    config.attachments_dir = dir.path().join("attachments").display().to_string();
    config.secure_cookies = false;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.security.argon2_parallelism = 1;
    config.security.api_key_memory_cost_kib = 1024;
    config.security.api_key_time_cost = 1;
    config.security.api_key_parallelism = 1;

    let store = Store::new(&config.database_url()).await.unwrap();
    let state = jats::api::create_app_state(&config, store, None).unwrap();

    TestApp {
        router: jats::api::router(state),
        _dir: dir,
    }
}

impl TestApp {
    async fn request(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn register(&self, username: &str) {
        let (status, _) = self
            .request(
                "POST",
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "correct horse",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    /// Registers `username` and returns a session token.
    async fn login_as(&self, username: &str) -> String {
        self.register(username).await;
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": username, "password": "correct horse" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["session_token"].as_str().unwrap().to_string()
    }
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_register_conflict() {
    let app = spawn_app().await;
    app.register("alice").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({
                "username": "alice",
                "email": "other@example.com",
                "password": "pw",
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));
    assert_eq!(error_code(&body), "USER_EXISTS");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_register_validation_details() {
    let app = spawn_app().await;

    let (status, body) = app
        .request("POST", "/api/v1/auth/register", None, Some(json!({})))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert_eq!(fields, vec!["username", "email", "password"]);
}

#[tokio::test]
async fn test_login_cookie_authenticates() {
    let app = spawn_app().await;
    app.register("bob").await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "bob", "password": "correct horse" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("session_token="));
    assert!(set_cookie.contains("HttpOnly"));
    let cookie = set_cookie.split(';').next().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/profile")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["data"]["user"]["username"], json!("bob"));
    let permissions = body["data"]["permissions"].as_array().unwrap();
    assert!(permissions.contains(&json!("tasks:read")));
    assert!(!permissions.contains(&json!("tasks:delete")));
}

#[tokio::test]
async fn test_auth_failures_have_distinct_codes() {
    let app = spawn_app().await;

    let (status, body) = app.request("GET", "/api/v1/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHORIZED");

    let (status, body) = app
        .request("GET", "/api/v1/tasks", Some("not-a-session"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "INVALID_SESSION");

    let bogus_key = "f".repeat(64);
    let (status, body) = app
        .request("GET", "/api/v1/tasks", Some(&bogus_key), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "INVALID_API_KEY");
}

#[tokio::test]
async fn test_login_rate_limit() {
    let app = spawn_app().await;
    app.register("eve").await;

    for _ in 0..5 {
        let (status, body) = app
            .request(
                "POST",
                "/api/v1/auth/login",
                None,
                Some(json!({ "username": "eve", "password": "wrong" })),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&body), "INVALID_CREDENTIALS");
    }

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "eve", "password": "correct horse" })),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_time_entry_starts_task() {
    let app = spawn_app().await;
    let token = app.login_as("carol").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/tasks",
            Some(&token),
            Some(json!({ "name": "Write report", "tags": ["client1"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], json!("open"));
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .request(
            "POST",
            &format!("/api/v1/tasks/{id}/time"),
            Some(&token),
            Some(json!({ "duration": 30 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["duration_minutes"], json!(30));

    let (status, body) = app
        .request("GET", &format!("/api/v1/tasks/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("in-progress"));
    assert_eq!(body["data"]["total_minutes"], json!(30));
    assert_eq!(body["data"]["time_entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_duration_is_rejected() {
    let app = spawn_app().await;
    let token = app.login_as("dave").await;

    let (_, body) = app
        .request(
            "POST",
            "/api/v1/tasks",
            Some(&token),
            Some(json!({ "name": "T" })),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .request(
            "POST",
            &format!("/api/v1/tasks/{id}/time"),
            Some(&token),
            Some(json!({ "duration": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], json!("duration"));
}

#[tokio::test]
async fn test_delete_requires_permission() {
    let app = spawn_app().await;
    let token = app.login_as("frank").await;

    let (_, body) = app
        .request(
            "POST",
            "/api/v1/tasks",
            Some(&token),
            Some(json!({ "name": "Keep me" })),
        )
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .request("DELETE", &format!("/api/v1/tasks/{id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "INSUFFICIENT_PERMISSIONS");
    assert_eq!(body["error"]["details"]["required"], json!("tasks:delete"));
    assert!(
        body["error"]["details"]["permissions"]
            .as_array()
            .unwrap()
            .contains(&json!("tasks:write"))
    );
}

#[tokio::test]
async fn test_admin_can_delete_and_manage_users() {
    let app = spawn_app().await;
    let admin = app.login_as("jats-admin").await;
    let user = app.login_as("grace").await;

    let (_, body) = app
        .request("POST", "/api/v1/tasks", Some(&user), Some(json!({ "name": "Gone" })))
        .await;
    let id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = app
        .request("DELETE", &format!("/api/v1/tasks/{id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request("GET", &format!("/api/v1/tasks/{id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");

    let (status, _) = app.request("GET", "/api/v1/users", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.request("GET", "/api/v1/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = app.request("GET", "/api/v1/auth/profile", Some(&admin), None).await;
    let admin_id = body["data"]["user"]["id"].as_i64().unwrap();
    let (status, body) = app
        .request("DELETE", &format!("/api/v1/users/{admin_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "CANNOT_DELETE_SELF");
}

#[tokio::test]
async fn test_api_key_bearer_and_scopes() {
    let app = spawn_app().await;
    let token = app.login_as("heidi").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/api-keys",
            Some(&token),
            Some(json!({ "name": "ci", "permissions": ["tasks:read"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let key = body["data"]["api_key"].as_str().unwrap().to_string();
    assert_eq!(key.len(), 64);

    let (status, _) = app.request("GET", "/api/v1/tasks", Some(&key), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request("POST", "/api/v1/tasks", Some(&key), Some(json!({ "name": "x" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "INSUFFICIENT_PERMISSIONS");

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/auth/api-keys",
            Some(&token),
            Some(json!({ "name": "root", "permissions": ["admin:all"] })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["details"]["required"], json!("admin:all"));

    let (status, body) = app
        .request("GET", "/api/v1/auth/api-keys", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"][0].get("api_key").is_none());
}

#[tokio::test]
async fn test_list_filters_are_validated() {
    let app = spawn_app().await;
    let token = app.login_as("ivan").await;

    let (status, body) = app
        .request(
            "GET",
            "/api/v1/tasks?status=done&priority=urgent",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["details"][0]["field"], json!("status"));
    assert_eq!(body["error"]["details"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_kanban_and_tags() {
    let app = spawn_app().await;
    let token = app.login_as("judy").await;

    for (name, status) in [("a", "open"), ("b", "open"), ("c", "closed")] {
        let (code, _) = app
            .request(
                "POST",
                "/api/v1/tasks",
                Some(&token),
                Some(json!({ "name": name, "status": status, "tags": ["web"] })),
            )
            .await;
        assert_eq!(code, StatusCode::CREATED);
    }

    let (status, body) = app.request("GET", "/api/v1/kanban/web", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], json!(3));
    let columns = body["data"]["columns"].as_array().unwrap();
    assert_eq!(columns.len(), 4);
    assert_eq!(columns[0]["status"], json!("open"));
    assert_eq!(columns[0]["count"], json!(2));
    assert_eq!(columns[3]["count"], json!(1));

    let (status, body) = app.request("GET", "/api/v1/tags", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0], json!({ "tag": "web", "count": 3 }));
}

#[tokio::test]
async fn test_time_breakdown_report() {
    let app = spawn_app().await;
    let token = app.login_as("mallory").await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/saved-queries",
            Some(&token),
            Some(json!({ "name": "Client 1", "included_tags": ["client1"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let query_id = body["data"]["id"].as_i64().unwrap();

    for (name, tags, minutes) in [("billable", vec!["client1"], 60), ("misc", vec![], 30)] {
        let (_, body) = app
            .request(
                "POST",
                "/api/v1/tasks",
                Some(&token),
                Some(json!({ "name": name, "tags": tags })),
            )
            .await;
        let id = body["data"]["id"].as_i64().unwrap();
        let (status, _) = app
            .request(
                "POST",
                &format!("/api/v1/tasks/{id}/time"),
                Some(&token),
                Some(json!({ "duration": minutes })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let today = chrono::Utc::now().date_naive();
    let start = today - chrono::Days::new(1);
    let end = today + chrono::Days::new(1);
    let uri = format!(
        "/api/v1/reports/time-breakdown?start_date={}&end_date={}&saved_query_ids={query_id}",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d"),
    );

    let (status, body) = app.request("GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["grand_total"], json!(90));
    assert_eq!(body["data"]["other_total"], json!(30));
    assert_eq!(body["data"]["query_totals"][0]["total"], json!(60));
    assert_eq!(body["data"]["query_totals"][0]["name"], json!("Client 1"));

    let (status, body) = app
        .request(
            "GET",
            "/api/v1/reports/time-breakdown?start_date=2024-01-15&end_date=2024-01-16&saved_query_ids=999",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn test_health_is_public() {
    let app = spawn_app().await;

    let (status, body) = app.request("GET", "/api/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["database"], json!("ok"));
}
