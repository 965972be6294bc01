//! Shared fixtures for the router-level tests

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use chrono::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

use deployd::authn::external_key::ExternalKey;
use deployd::authn::signing_key::SigningKey;
use deployd::authn::token::TokenService;
use deployd::authn::users::CredentialStore;
use deployd::deploy::fake::{FakeDeployer, FakeEngine};
use deployd::filesys::dir::Dir;
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use deployd::workers::redeploy::{RedeployJob, RedeployQueue};

pub const WEBHOOK_SECRET: &str = "hook-secret-for-tests-0123";

pub struct Harness {
    pub tmp: Dir,
    pub deployer: Arc<FakeDeployer>,
    pub engine: Arc<FakeEngine>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<CredentialStore>,
    pub jobs: Option<mpsc::Receiver<RedeployJob>>,
    pub app: Router,
}

impl Harness {
    pub async fn new(deployer: FakeDeployer) -> Self {
        let tmp = Dir::create_temp_dir("deployd-router").await.unwrap();
        let deployer = Arc::new(deployer);
        let engine = Arc::new(FakeEngine::new());
        let tokens = Arc::new(TokenService::new(SigningKey::generate(), Duration::minutes(120)));
        let users = Arc::new(CredentialStore::open(tmp.file("users.json")).await.unwrap());
        let webhook_key = ExternalKey::parse(WEBHOOK_SECRET).map(Arc::new);
        let (queue, jobs) = RedeployQueue::new(4);

        let state = Arc::new(ServerState::new(
            deployer.clone(),
            engine.clone(),
            tokens.clone(),
            users.clone(),
            webhook_key,
            queue,
        ));
        let app = router(state);

        Self {
            tmp,
            deployer,
            engine,
            tokens,
            users,
            jobs: Some(jobs),
            app,
        }
    }

    /// Registered admin API token
    pub async fn admin_token(&self) -> String {
        let issued = self.tokens.issue_api_token().unwrap();
        self.users.register_api_token(&issued.claims.jti).await.unwrap();
        issued.token
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn cleanup(self) {
        self.tmp.delete().await.unwrap();
    }
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Assert status and return the JSON error kind
pub async fn error_kind(response: Response<Body>, status: StatusCode) -> String {
    assert_eq!(response.status(), status);
    body_json(response).await["error"].as_str().unwrap().to_string()
}
