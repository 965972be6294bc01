//! Deployment lifecycle tests against the in-memory engine and git doubles

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_test::assert_ok;

use deployd::bootstrap::images::Warmup;
use deployd::deploy::deployer::{DeployError, DeployOptions, Deployer, EnvUpdate};
use deployd::deploy::deployment::Deployment;
use deployd::deploy::engine::LogOptions;
use deployd::deploy::fake::{FakeEngine, FakeSource};
use deployd::deploy::fsm::DeploymentState;
use deployd::deploy::record::DeploymentRecord;
use deployd::deploy::sink::OutputSink;
use deployd::filesys::dir::Dir;
use deployd_api::models::{BuildProfile, ProjectSpec};

const REMOTE: &str = "git@github.com:acme/shop.git";

struct Fixture {
    tmp: Dir,
    source: Arc<FakeSource>,
    deployment: Arc<Deployment>,
}

async fn fixture() -> Fixture {
    let tmp = Dir::create_temp_dir("deployd-deployment").await.unwrap();
    let source = Arc::new(FakeSource::new());
    let deployment = load(&tmp, source.clone(), Warmup::completed()).await;
    Fixture {
        tmp,
        source,
        deployment,
    }
}

async fn load(tmp: &Dir, source: Arc<FakeSource>, warmup: Warmup) -> Arc<Deployment> {
    Arc::new(
        Deployment::load(tmp.file("deployment.json"), tmp.subdir("project"), source, warmup)
            .await
            .unwrap(),
    )
}

fn first_deploy() -> DeployOptions {
    DeployOptions {
        project: Some(ProjectSpec {
            name: "shop".to_string(),
            remote: REMOTE.to_string(),
            branch: "main".to_string(),
            profile: BuildProfile::Compose,
            build_file: None,
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_deploy_runs_project() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    let (sink, mut rx) = OutputSink::channel();

    let outcome = f.deployment.deploy(first_deploy(), &engine, sink).await.unwrap();
    assert_eq!(outcome.project, "shop");
    assert_eq!(outcome.branch, "main");
    assert_eq!(f.deployment.state().await, DeploymentState::Running);
    assert_eq!(f.source.syncs(), vec![(REMOTE.to_string(), "main".to_string())]);
    assert_eq!(engine.count("build"), 1);
    assert_eq!(engine.count("start"), 1);

    // output was streamed line by line
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    assert!(lines.iter().any(|l| l == "built shop"));

    let status = f.deployment.status(&engine).await.unwrap();
    assert_eq!(status.state, DeploymentState::Running);
    assert_eq!(status.commit.as_deref(), Some(outcome.commit.as_str()));
    assert_eq!(status.containers.len(), 1);
    assert!(status.uptime.is_some());

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_deploy_is_busy() {
    let f = fixture().await;
    let (engine, gate) = FakeEngine::gated();
    let engine = Arc::new(engine);

    let first = {
        let deployment = f.deployment.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            deployment
                .deploy(first_deploy(), engine.as_ref(), OutputSink::discard())
                .await
        })
    };
    engine.build_started().await;

    // a second mutation is rejected immediately, not queued
    let second = f
        .deployment
        .deploy(DeployOptions::default(), engine.as_ref(), OutputSink::discard())
        .await;
    assert!(matches!(second, Err(DeployError::Busy)));
    assert!(matches!(
        f.deployment.down(engine.as_ref(), OutputSink::discard()).await,
        Err(DeployError::Busy)
    ));
    assert!(matches!(
        f.deployment
            .set_env(EnvUpdate::Set {
                name: "PORT".to_string(),
                value: "80".to_string()
            })
            .await,
        Err(DeployError::Busy)
    ));

    // reads are served while the build is in flight
    let status = f.deployment.status(engine.as_ref()).await.unwrap();
    assert_eq!(status.state, DeploymentState::Building);

    gate.add_permits(1);
    let outcome = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap();
    assert_ok!(outcome);
    assert_eq!(engine.count("build"), 1);

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_down_is_idempotent() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    assert_ok!(f.deployment.down(&engine, OutputSink::discard()).await);
    assert_eq!(f.deployment.state().await, DeploymentState::Stopped);
    assert_ok!(f.deployment.down(&engine, OutputSink::discard()).await);
    assert_eq!(engine.count("stop"), 1);

    // logs need running containers
    assert!(matches!(
        f.deployment.logs(LogOptions::default(), &engine).await,
        Err(DeployError::InvalidState(_))
    ));

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_down_without_deployment() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    assert!(matches!(
        f.deployment.down(&engine, OutputSink::discard()).await,
        Err(DeployError::NoDeployment)
    ));
    assert!(matches!(
        f.deployment.status(&engine).await,
        Err(DeployError::NoDeployment)
    ));
    assert!(matches!(
        f.deployment
            .deploy(DeployOptions::default(), &engine, OutputSink::discard())
            .await,
        Err(DeployError::NoDeployment)
    ));
    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_redeploy_passes_through_stop() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    f.source.set_commit("fedcba9876543210fedcba9876543210fedcba98");
    let options = DeployOptions {
        branch: Some("release".to_string()),
        ..Default::default()
    };
    let outcome = f
        .deployment
        .deploy(options, &engine, OutputSink::discard())
        .await
        .unwrap();

    assert_eq!(outcome.branch, "release");
    assert_eq!(outcome.commit, "fedcba9876543210fedcba9876543210fedcba98");
    assert_eq!(engine.count("stop"), 1);
    assert_eq!(engine.count("build"), 2);
    assert_eq!(f.deployment.branch().await.as_deref(), Some("release"));

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_build_failure_then_recovery() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    engine.fail("build");

    let err = f
        .deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Engine(_)));
    assert_eq!(f.deployment.state().await, DeploymentState::Failed);

    let status = f.deployment.status(&engine).await.unwrap();
    assert_eq!(status.state, DeploymentState::Failed);
    assert!(status.error.unwrap().contains("simulated failure"));

    // a failed deployment must be destroyed before it is deployed again
    assert!(matches!(
        f.deployment
            .deploy(first_deploy(), &engine, OutputSink::discard())
            .await,
        Err(DeployError::InvalidState(_))
    ));

    f.deployment.destroy(&engine, OutputSink::discard()).await.unwrap();
    assert_eq!(f.deployment.state().await, DeploymentState::Uninitialized);
    assert!(!f.tmp.file("deployment.json").exists().await);

    engine.recover("build");
    assert_ok!(
        f.deployment
            .deploy(first_deploy(), &engine, OutputSink::discard())
            .await
    );
    assert_eq!(f.deployment.state().await, DeploymentState::Running);

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_source_failure_marks_failed() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.source.set_failing(true);

    let err = f
        .deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Source(_)));
    assert_eq!(f.deployment.state().await, DeploymentState::Failed);
    assert_eq!(engine.count("build"), 0);

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_destroy_clears_everything() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();
    f.tmp.subdir("project").create().await.unwrap();

    f.deployment.destroy(&engine, OutputSink::discard()).await.unwrap();
    assert_eq!(f.deployment.state().await, DeploymentState::Uninitialized);
    assert!(f.deployment.branch().await.is_none());
    assert!(!f.tmp.subdir("project").exists().await);
    assert!(engine.calls().contains(&"remove shop".to_string()));

    assert!(matches!(
        f.deployment.destroy(&engine, OutputSink::discard()).await,
        Err(DeployError::NoDeployment)
    ));

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_remote_mismatch_rejected() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    assert_ok!(f.deployment.compare_remotes("https://github.com/acme/shop").await);
    assert!(matches!(
        f.deployment.compare_remotes("https://github.com/acme/other").await,
        Err(DeployError::RemoteMismatch(_))
    ));

    let mut options = first_deploy();
    if let Some(project) = options.project.as_mut() {
        project.remote = "git@github.com:someone/else.git".to_string();
    }
    assert!(matches!(
        f.deployment
            .deploy(options, &engine, OutputSink::discard())
            .await,
        Err(DeployError::RemoteMismatch(_))
    ));
    assert_eq!(f.deployment.state().await, DeploymentState::Running);

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_env_persists_into_next_deploy() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    f.deployment
        .set_env(EnvUpdate::Set {
            name: "DATABASE_URL".to_string(),
            value: "postgres://db/shop".to_string(),
        })
        .await
        .unwrap();
    let env = f.deployment.env().await.unwrap();
    assert_eq!(env.get("DATABASE_URL").map(String::as_str), Some("postgres://db/shop"));

    let record: DeploymentRecord = f.tmp.file("deployment.json").read_json().await.unwrap();
    assert_eq!(record.env.len(), 1);

    f.deployment
        .set_env(EnvUpdate::Remove {
            name: "DATABASE_URL".to_string(),
        })
        .await
        .unwrap();
    assert!(f.deployment.env().await.unwrap().is_empty());

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_reload_restores_running_deployment() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    let reloaded = load(&f.tmp, f.source.clone(), Warmup::completed()).await;
    assert_eq!(reloaded.state().await, DeploymentState::Stopped);
    assert_eq!(reloaded.branch().await.as_deref(), Some("main"));

    reloaded.recover(&engine).await;
    assert_eq!(reloaded.state().await, DeploymentState::Running);

    // nothing running: stays stopped
    let idle = FakeEngine::new();
    let stopped = load(&f.tmp, f.source.clone(), Warmup::completed()).await;
    stopped.recover(&idle).await;
    assert_eq!(stopped.state().await, DeploymentState::Stopped);

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_logs_from_project_container() {
    let f = fixture().await;
    let engine = FakeEngine::new();
    engine.set_log_lines(&["listening on :8080", "GET / 200", "GET /cart 200"]);
    f.deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap();

    let options = LogOptions {
        tail: Some(2),
        ..Default::default()
    };
    let lines: Vec<String> = f
        .deployment
        .logs(options, &engine)
        .await
        .unwrap()
        .map(|l| l.unwrap())
        .collect()
        .await;
    assert_eq!(lines, vec!["GET / 200".to_string(), "GET /cart 200".to_string()]);

    let foreign = LogOptions {
        container: Some("postgres".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        f.deployment.logs(foreign, &engine).await,
        Err(DeployError::InvalidRequest(_))
    ));

    f.tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_deploy_waits_for_warmup() {
    let tmp = Dir::create_temp_dir("deployd-deployment").await.unwrap();
    let (done_tx, warmup) = Warmup::pending();
    let deployment = load(&tmp, Arc::new(FakeSource::new()), warmup).await;
    let engine = Arc::new(FakeEngine::new());

    let task = {
        let deployment = deployment.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            deployment
                .deploy(first_deploy(), engine.as_ref(), OutputSink::discard())
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(engine.count("build"), 0);
    assert_eq!(deployment.state().await, DeploymentState::Building);

    done_tx.send_replace(true);
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_ok!(result);
    assert_eq!(engine.count("build"), 1);

    tmp.delete().await.unwrap();
}

#[tokio::test]
async fn test_unwritable_record_leaves_deployment_recoverable() {
    let f = fixture().await;
    let engine = FakeEngine::new();

    // a directory where the record file should go makes the write fail
    f.tmp.subdir("deployment.json").create().await.unwrap();

    let err = f
        .deployment
        .deploy(first_deploy(), &engine, OutputSink::discard())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Storage(_)), "{:?}", err);
    assert_eq!(f.deployment.state().await, DeploymentState::Uninitialized);
    assert!(f.source.syncs().is_empty());
    assert_eq!(engine.count("build"), 0);

    f.tmp.subdir("deployment.json").delete().await.unwrap();
    assert_ok!(f.deployment.deploy(first_deploy(), &engine, OutputSink::discard()).await);
    assert_eq!(f.deployment.state().await, DeploymentState::Running);

    f.tmp.delete().await.unwrap();
}
