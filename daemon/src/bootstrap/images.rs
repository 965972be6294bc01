//! Build-tool image pre-warming

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::deploy::engine::ContainerEngine;
use crate::deploy::sink::OutputSink;

/// Signals when pre-warming has finished, successfully or not
#[derive(Debug, Clone)]
pub struct Warmup {
    rx: watch::Receiver<bool>,
}

impl Warmup {
    /// Handle that flips once the sender is marked
    pub fn pending() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// Handle with nothing left to wait for
    pub fn completed() -> Self {
        let (_, rx) = watch::channel(true);
        Self { rx }
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for pre-warming. Returns early if the coordinator went away.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Outcome of one image pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    pub image: String,
    pub error: Option<String>,
}

/// Outcome of pre-warming
#[derive(Debug, Clone, Default)]
pub struct WarmupReport {
    pub results: Vec<PullResult>,
}

impl WarmupReport {
    pub fn failed(&self) -> impl Iterator<Item = &PullResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Pull every image on its own task and join them on a coordinator task.
///
/// A failed pull is logged and reported but does not affect the other
/// pulls. The returned [`Warmup`] flips once every pull has finished.
pub fn prewarm(
    engine: Arc<dyn ContainerEngine>,
    images: Vec<String>,
) -> (Warmup, JoinHandle<WarmupReport>) {
    let (done_tx, warmup) = Warmup::pending();

    let pulls: Vec<(String, JoinHandle<Result<(), String>>)> = images
        .into_iter()
        .map(|image| {
            let engine = engine.clone();
            let task_image = image.clone();
            let handle = tokio::spawn(async move {
                engine
                    .pull(&task_image, &OutputSink::discard())
                    .await
                    .map_err(|e| e.to_string())
            });
            (image, handle)
        })
        .collect();

    let coordinator = tokio::spawn(async move {
        let mut report = WarmupReport::default();
        for (image, handle) in pulls {
            let error = match handle.await {
                Ok(Ok(())) => {
                    info!(image = %image, "build tool image ready");
                    None
                }
                Ok(Err(e)) => {
                    warn!(image = %image, error = %e, "build tool image pull failed");
                    Some(e)
                }
                Err(e) => {
                    warn!(image = %image, error = %e, "build tool image pull aborted");
                    Some(e.to_string())
                }
            };
            report.results.push(PullResult { image, error });
        }
        done_tx.send_replace(true);
        report
    });

    (warmup, coordinator)
}
