//! Webhook deliveries through the router and the redeploy worker

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use deployd::deploy::fake::FakeDeployer;
use deployd::workers::redeploy;

use crate::support::{body_json, error_kind, Harness, WEBHOOK_SECRET};

const REMOTE: &str = "git@github.com:acme/shop.git";

fn push_body(git_ref: &str, clone_url: &str) -> String {
    json!({
        "ref": git_ref,
        "after": "9f3c2a1b0e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b",
        "deleted": false,
        "repository": {
            "clone_url": clone_url,
            "ssh_url": clone_url
        }
    })
    .to_string()
}

fn sign(body: &str, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn github(event: &str, body: String, secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-hub-signature-256", sign(&body, secret))
        .body(Body::from(body))
        .unwrap()
}

fn gitlab(token: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .header("x-gitlab-event", "Push Hook")
        .header("x-gitlab-token", token)
        .body(Body::from(body))
        .unwrap()
}

struct Worker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn start(h: &mut Harness) -> Self {
        let options = redeploy::Options {
            log_file: h.tmp.file("deploy.log"),
        };
        let jobs = h.jobs.take().unwrap();
        let deployer = h.deployer.clone();
        let engine = h.engine.clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            redeploy::run(
                &options,
                deployer,
                engine,
                jobs,
                Box::pin(async move {
                    let _ = stopped.await;
                }),
            )
            .await;
        });
        Self { stop, handle }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_push_to_tracked_branch_redeploys() {
    let mut h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;
    let worker = Worker::start(&mut h);

    let response = h
        .send(github(
            "push",
            push_body("refs/heads/main", "https://github.com/acme/shop.git"),
            WEBHOOK_SECRET,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["queued"], true);
    assert!(body["job_id"].is_string());

    tokio::time::timeout(Duration::from_secs(5), h.deployer.deployed())
        .await
        .expect("redeploy never ran");
    assert_eq!(h.deployer.deploy_count(), 1);
    let options = h.deployer.last_options().unwrap();
    assert_eq!(options.branch.as_deref(), Some("main"));
    assert!(options.project.is_none());

    // the worker appends the deploy output to its log
    let log = h.tmp.file("deploy.log");
    let mut contents = String::new();
    for _ in 0..50 {
        contents = tokio::fs::read_to_string(log.path()).await.unwrap_or_default();
        if contents.contains("redeploy finished") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(contents.contains("deployed main"));
    assert!(contents.contains("redeploy finished at fakecommit"));

    worker.stop().await;
    h.cleanup().await;
}

#[tokio::test]
async fn test_push_to_other_branch_is_ignored() {
    let mut h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;
    let mut jobs = h.jobs.take().unwrap();

    let response = h
        .send(github(
            "push",
            push_body("refs/heads/dev", "https://github.com/acme/shop.git"),
            WEBHOOK_SECRET,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["queued"], false);

    // tags never redeploy
    let response = h
        .send(github(
            "push",
            push_body("refs/tags/v1.0.0", "https://github.com/acme/shop.git"),
            WEBHOOK_SECRET,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["queued"], false);

    assert!(jobs.try_recv().is_err());
    assert_eq!(h.deployer.deploy_count(), 0);
    h.cleanup().await;
}

#[tokio::test]
async fn test_bad_signature_rejected() {
    let mut h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;
    let mut jobs = h.jobs.take().unwrap();

    let kind = error_kind(
        h.send(github(
            "push",
            push_body("refs/heads/main", "https://github.com/acme/shop.git"),
            "some-other-secret",
        ))
        .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(kind, "invalid_signature");

    let kind = error_kind(
        h.send(gitlab(
            "wrong-token",
            push_body("refs/heads/main", "https://gitlab.com/acme/shop.git"),
        ))
        .await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(kind, "invalid_signature");

    assert!(jobs.try_recv().is_err());
    h.cleanup().await;
}

#[tokio::test]
async fn test_gitlab_push_queues_job() {
    let remote = "https://gitlab.com/acme/shop.git";
    let mut h = Harness::new(FakeDeployer::running("shop", remote, "main")).await;
    let mut jobs = h.jobs.take().unwrap();

    let body = json!({
        "ref": "refs/heads/main",
        "checkout_sha": "0a1b2c3d",
        "repository": {
            "git_http_url": remote,
            "git_ssh_url": "git@gitlab.com:acme/shop.git"
        }
    })
    .to_string();
    let response = h.send(gitlab(WEBHOOK_SECRET, body)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let job = jobs.try_recv().unwrap();
    assert_eq!(job.branch, "main");
    assert_eq!(job.commit.as_deref(), Some("0a1b2c3d"));
    h.cleanup().await;
}

#[tokio::test]
async fn test_push_from_other_repository() {
    let mut h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;
    let mut jobs = h.jobs.take().unwrap();

    let kind = error_kind(
        h.send(github(
            "push",
            push_body("refs/heads/main", "https://github.com/mallory/shop.git"),
            WEBHOOK_SECRET,
        ))
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(kind, "remote_mismatch");

    assert!(jobs.try_recv().is_err());
    h.cleanup().await;
}

#[tokio::test]
async fn test_ping_and_other_events() {
    let h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;

    let response = h
        .send(github("ping", json!({ "zen": "Keep it simple." }).to_string(), WEBHOOK_SECRET))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "pong");

    let response = h
        .send(github("issues", json!({ "action": "opened" }).to_string(), WEBHOOK_SECRET))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["queued"], false);

    h.cleanup().await;
}

#[tokio::test]
async fn test_full_queue_reports_busy() {
    let mut h = Harness::new(FakeDeployer::running("shop", REMOTE, "main")).await;
    // nobody drains the queue
    let _jobs = h.jobs.take().unwrap();

    for _ in 0..4 {
        let response = h
            .send(github(
                "push",
                push_body("refs/heads/main", "https://github.com/acme/shop.git"),
                WEBHOOK_SECRET,
            ))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let kind = error_kind(
        h.send(github(
            "push",
            push_body("refs/heads/main", "https://github.com/acme/shop.git"),
            WEBHOOK_SECRET,
        ))
        .await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(kind, "deployment_busy");
    h.cleanup().await;
}
