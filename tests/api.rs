//! HTTP API tests driven through the router without a listening socket.

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::{PASSWORD, TestApp, TestSite, token_from_mail};
use kbasix::types::FileTag;
use serde_json::{Value, json};
use tower::ServiceExt;

const BOUNDARY: &str = "kbasix-test-boundary";

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.expect("router responds")
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn upload_request(token: &str, title: &str, file_name: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         {title}\r\n\
         --{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {content}\r\n\
         --{BOUNDARY}--\r\n"
    );
    Request::post("/api/v1/files")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Registers, confirms and logs in over HTTP, returning the session token.
async fn signed_in(app: &TestApp, name: &str) -> String {
    let response = send(
        &app.router,
        post_json(
            "/api/v1/register",
            json!({
                "user_name": name,
                "email": format!("{name}@example.com"),
                "credentials": {
                    "method": "internal",
                    "password": PASSWORD,
                    "password_confirmation": PASSWORD,
                },
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let token = token_from_mail(&app.mailer.last().expect("confirmation mail").body);
    let response = send(&app.router, post_json("/api/v1/confirm", json!({ "token": token }))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(
        &app.router,
        post_json("/api/v1/login", json!({ "user_name": name, "password": PASSWORD })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["data"]["token"]
        .as_str()
        .expect("token in login response")
        .to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestSite::new().into_app();
    let response = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_failures_look_alike() {
    let app = TestSite::new().into_app();
    signed_in(&app, "alice").await;

    let wrong_password = send(
        &app.router,
        post_json("/api/v1/login", json!({ "user_name": "alice", "password": "Nope12345" })),
    )
    .await;
    let unknown_user = send(
        &app.router,
        post_json("/api/v1/login", json!({ "user_name": "zed", "password": PASSWORD })),
    )
    .await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_user.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(wrong_password).await["error"],
        body_json(unknown_user).await["error"]
    );
}

#[tokio::test]
async fn test_registration_problems_are_unprocessable() {
    let app = TestSite::new().into_app();
    let response = send(
        &app.router,
        post_json(
            "/api/v1/register",
            json!({
                "user_name": "root",
                "email": "root@example.com",
                "credentials": {
                    "method": "internal",
                    "password": PASSWORD,
                    "password_confirmation": PASSWORD,
                },
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("already taken"));
}

#[tokio::test]
async fn test_session_required() {
    let app = TestSite::new().into_app();

    let response = send(&app.router, Request::get("/api/v1/files").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let response = send(&app.router, authed("GET", "/api/v1/files", "0-0-00-any-all-tk", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_insecure_transport_refused() {
    let app = TestSite::with_config(|config| config.server.require_secure_transport = true).into_app();

    let response = send(
        &app.router,
        post_json("/api/v1/login", json!({ "user_name": "alice", "password": PASSWORD })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = Request::post("/api/v1/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-proto", "https")
        .body(Body::from(
            json!({ "user_name": "alice", "password": PASSWORD }).to_string(),
        ))
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_download_and_world_share() {
    let app = TestSite::new().into_app();
    let token = signed_in(&app, "alice").await;

    let response = send(&app.router, upload_request(&token, "Greeting", "hello.txt", "hello world")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-session-token"));
    let uploaded = body_json(response).await;
    let tag = uploaded["data"]["file"]["file_tag"].as_str().unwrap().to_string();
    assert_eq!(uploaded["data"]["file"]["size"], 11);
    assert_eq!(uploaded["data"]["empty"], false);

    let response = send(&app.router, authed("GET", "/api/v1/files", &token, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listing = body_json(response).await;
    assert_eq!(listing["data"]["files"][0]["title"], "Greeting");
    assert_eq!(listing["data"]["files"][0]["visibility"], "owner");
    assert_eq!(listing["data"]["usage"], 11);

    let response = send(
        &app.router,
        authed("GET", &format!("/api/v1/files/{tag}/content"), &token, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"hello.txt\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello world");

    let world_uri = format!("/users/alice/{tag}");
    let response = send(&app.router, Request::get(&world_uri).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app.router,
        authed(
            "PATCH",
            &format!("/api/v1/files/{tag}"),
            &token,
            Some(json!({ "world_share": true, "uid_shares": "ghost" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let edited = body_json(response).await;
    assert_eq!(edited["data"]["shares"]["world"], true);
    assert_eq!(edited["data"]["notes"][0], "Ignoring unknown account \"ghost\"");

    let response = send(&app.router, Request::get(&world_uri).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello world");

    let response = send(
        &app.router,
        Request::get("/users/alice/not-a-tag").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shared_file_visible_to_recipient() {
    let app = TestSite::new().into_app();
    let alice = signed_in(&app, "alice").await;
    let bob = signed_in(&app, "bob").await;

    let response = send(&app.router, upload_request(&alice, "Minutes", "minutes.txt", "agreed")).await;
    let tag = body_json(response).await["data"]["file"]["file_tag"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(
        &app.router,
        authed(
            "PATCH",
            &format!("/api/v1/files/{tag}"),
            &alice,
            Some(json!({ "uid_shares": "bob" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app.router, authed("GET", "/api/v1/files", &bob, None)).await;
    let listing = body_json(response).await;
    let entry = &listing["data"]["files"][0];
    assert_eq!(entry["file_tag"], tag.as_str());
    assert_eq!(entry["shared_by"], "alice");
    assert_eq!(entry["visibility"], "shared_uid");

    let response = send(
        &app.router,
        authed("DELETE", &format!("/api/v1/files/{tag}"), &bob, None),
    )
    .await;
    assert!(response.status().is_success());

    let response = send(&app.router, authed("GET", "/api/v1/files", &alice, None)).await;
    let listing = body_json(response).await;
    assert_eq!(listing["data"]["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_profile_and_logout() {
    let app = TestSite::new().into_app();
    let token = signed_in(&app, "carol").await;

    let response = send(&app.router, authed("GET", "/api/v1/profile", &token, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let profile = body_json(response).await;
    assert_eq!(profile["data"]["user_name"], "carol");
    assert_eq!(profile["data"]["auth_method"], "internal");

    let response = send(&app.router, authed("POST", "/api/v1/logout", &token, None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app.router, authed("GET", "/api/v1/profile", &token, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rotated_token_survives_failed_request() {
    let app = TestSite::with_config(|config| config.session.per_request_token = true).into_app();
    let token = signed_in(&app, "alice").await;

    let missing = FileTag::generate();
    let response = send(
        &app.router,
        authed("DELETE", &format!("/api/v1/files/{missing}"), &token, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let next = response.headers()["x-session-token"]
        .to_str()
        .unwrap()
        .to_string();
    assert_ne!(next, token);

    let response = send(&app.router, authed("GET", "/api/v1/files/not-a-tag", &next, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let next = response.headers()["x-session-token"]
        .to_str()
        .unwrap()
        .to_string();

    let response = send(&app.router, authed("GET", "/api/v1/files", &next, None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app.router, authed("GET", "/api/v1/files", &token, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
