//! Router tests: tiers, user routes and deployment routes

use axum::http::StatusCode;
use serde_json::json;

use deployd::authn::Role;
use deployd::deploy::fake::FakeDeployer;

use crate::support::{body_json, body_text, error_kind, request, Harness};

async fn login(h: &Harness, username: &str, password: &str) -> String {
    let response = h
        .send(request(
            "POST",
            "/user/login",
            None,
            Some(json!({ "username": username, "password": password })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["token"].as_str().unwrap().to_string()
}

fn project() -> serde_json::Value {
    json!({
        "project": {
            "name": "shop",
            "remote": "git@github.com:acme/shop.git",
            "branch": "main",
            "profile": "compose"
        }
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let h = Harness::new(FakeDeployer::new()).await;
    let response = h.send(request("GET", "/", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
    h.cleanup().await;
}

#[tokio::test]
async fn test_login_and_user_tier() {
    let h = Harness::new(FakeDeployer::new()).await;
    h.users.add_user("bob", "hunter22", Role::User).await.unwrap();

    let kind = error_kind(
        h.send(request(
            "POST",
            "/user/login",
            None,
            Some(json!({ "username": "bob", "password": "nope!" })),
        ))
        .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(kind, "invalid_login");

    let token = login(&h, "bob", "hunter22").await;

    let response = h.send(request("GET", "/user/validate", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let identity = body_json(response).await;
    assert_eq!(identity["username"], "bob");
    assert_eq!(identity["admin"], false);

    // nothing deployed yet
    let kind = error_kind(
        h.send(request("GET", "/status", Some(&token), None)).await,
        StatusCode::PRECONDITION_FAILED,
    )
    .await;
    assert_eq!(kind, "no_deployment");

    let kind = error_kind(
        h.send(request("POST", "/up", Some(&token), Some(project()))).await,
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(kind, "forbidden");
    assert_eq!(h.deployer.deploy_count(), 0);

    h.cleanup().await;
}

#[tokio::test]
async fn test_credential_errors_are_distinct() {
    let h = Harness::new(FakeDeployer::new()).await;

    let missing = error_kind(
        h.send(request("GET", "/status", None, None)).await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(missing, "missing_credentials");

    let malformed = error_kind(
        h.send(request("GET", "/status", Some("not.a.token"), None)).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(malformed, "invalid_credentials");

    // unknown routes are admin only
    let unknown = error_kind(
        h.send(request("GET", "/no/such/route", None, None)).await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(unknown, "missing_credentials");

    let admin = h.admin_token().await;
    let not_found = error_kind(
        h.send(request("GET", "/no/such/route", Some(&admin), None)).await,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(not_found, "not_found");

    h.cleanup().await;
}

#[tokio::test]
async fn test_admin_deploy_status_down() {
    let h = Harness::new(FakeDeployer::new()).await;
    let admin = h.admin_token().await;

    let response = h.send(request("POST", "/up", Some(&admin), Some(project()))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["branch"], "main");
    assert_eq!(body["commit"], "fakecommit");
    assert_eq!(h.deployer.deploy_count(), 1);

    let response = h.send(request("GET", "/status", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["state"], "running");
    assert_eq!(status["project"], "shop");

    let response = h.send(request("POST", "/down", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = h.send(request("POST", "/reset", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let kind = error_kind(
        h.send(request("GET", "/status", Some(&admin), None)).await,
        StatusCode::PRECONDITION_FAILED,
    )
    .await;
    assert_eq!(kind, "no_deployment");

    h.cleanup().await;
}

#[tokio::test]
async fn test_streamed_deploy_output() {
    let h = Harness::new(FakeDeployer::new()).await;
    let admin = h.admin_token().await;

    let response = h
        .send(request("POST", "/up?stream=true", Some(&admin), Some(project())))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.first(), Some(&"deployed main"));
    assert_eq!(lines.last(), Some(&"project shop deployed"));

    h.cleanup().await;
}

#[tokio::test]
async fn test_busy_deployment_conflict() {
    let h = Harness::new(FakeDeployer::running("shop", "git@github.com:acme/shop.git", "main")).await;
    let admin = h.admin_token().await;
    h.deployer.set_busy(true);

    let kind = error_kind(
        h.send(request("POST", "/down", Some(&admin), None)).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(kind, "deployment_busy");

    // errors raised before any output are not streamed
    let kind = error_kind(
        h.send(request("POST", "/up?stream=true", Some(&admin), None)).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(kind, "deployment_busy");

    // reads are unaffected
    let response = h.send(request("GET", "/status", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    h.cleanup().await;
}

#[tokio::test]
async fn test_logs_stream() {
    let h = Harness::new(FakeDeployer::running("shop", "git@github.com:acme/shop.git", "main")).await;
    h.users.add_user("bob", "hunter22", Role::User).await.unwrap();
    let token = login(&h, "bob", "hunter22").await;

    let response = h.send(request("GET", "/logs?tail=10", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "fake log line\n");

    h.cleanup().await;
}

#[tokio::test]
async fn test_env_routes() {
    let h = Harness::new(FakeDeployer::running("shop", "git@github.com:acme/shop.git", "main")).await;
    let admin = h.admin_token().await;

    let response = h
        .send(request(
            "POST",
            "/env",
            Some(&admin),
            Some(json!({ "name": "PORT", "value": "8080" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h.send(request("GET", "/env", Some(&admin), None)).await;
    let body = body_json(response).await;
    assert_eq!(body["variables"][0]["name"], "PORT");
    assert_eq!(body["variables"][0]["value"], "8080");

    let kind = error_kind(
        h.send(request("POST", "/env", Some(&admin), Some(json!({ "name": "PORT" })))).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(kind, "bad_request");

    h.cleanup().await;
}

#[tokio::test]
async fn test_user_admin_routes() {
    let h = Harness::new(FakeDeployer::new()).await;
    let admin = h.admin_token().await;

    let response = h
        .send(request(
            "POST",
            "/user/adduser",
            Some(&admin),
            Some(json!({ "username": "carol", "password": "s3cret!", "admin": false })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let kind = error_kind(
        h.send(request(
            "POST",
            "/user/adduser",
            Some(&admin),
            Some(json!({ "username": "carol", "password": "s3cret!" })),
        ))
        .await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(kind, "user_exists");

    let token = login(&h, "carol", "s3cret!").await;
    let response = h
        .send(request(
            "POST",
            "/user/passwd",
            Some(&token),
            Some(json!({ "old_password": "s3cret!", "new_password": "n3w-secret" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    login(&h, "carol", "n3w-secret").await;

    let response = h
        .send(request(
            "POST",
            "/user/removeuser",
            Some(&admin),
            Some(json!({ "username": "carol" })),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h.send(request("GET", "/user/listusers", Some(&admin), None)).await;
    let body = body_json(response).await;
    assert_eq!(body["users"][0]["username"], "carol");
    assert_eq!(body["users"][0]["disabled"], true);

    let response = h.send(request("POST", "/user/resetusers", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    // API tokens outlive a user reset
    let response = h.send(request("GET", "/user/listusers", Some(&admin), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["users"], json!([]));

    h.cleanup().await;
}
