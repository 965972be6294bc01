//! HTTP request handlers for deployment routes

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use deployd_api::models::{
    EnvRequest, EnvResponse, EnvVar, HealthResponse, OperationResponse, StatusResponse, UpRequest,
};

use crate::deploy::deployer::{DeployError, DeployOptions, EnvUpdate};
use crate::deploy::engine::LogOptions;
use crate::deploy::sink::OutputSink;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

type OperationFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, DeployError>> + Send>>;

/// `?stream=true` switches a mutating route to chunked plain-text output
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub container: Option<String>,
    #[serde(default)]
    pub follow: bool,
    pub tail: Option<usize>,
}

/// Liveness check
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: version_info().version,
    })
}

pub async fn status_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.deployer.status(state.engine.as_ref()).await?;
    Ok(Json(status.into()))
}

/// Logs of a project container, one line per chunk
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    let options = LogOptions {
        container: query.container,
        follow: query.follow,
        tail: query.tail,
    };
    let stream = state.deployer.logs(options, state.engine.as_ref()).await?;
    let body = stream.map(|line| match line {
        Ok(line) => Ok::<_, Infallible>(format!("{}\n", line)),
        Err(e) => Ok(format!("[error] {}\n", e)),
    });
    Ok(plain_text(Body::from_stream(body)))
}

pub async fn up_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StreamQuery>,
    body: Option<Json<UpRequest>>,
) -> Result<Response, ApiError> {
    let options = DeployOptions::from(body.map(|Json(b)| b).unwrap_or_default());
    run_operation(query.stream, move |sink| {
        Box::pin(async move {
            let outcome = state
                .deployer
                .deploy(options, state.engine.as_ref(), sink)
                .await?;
            info!(
                project = %outcome.project,
                branch = %outcome.branch,
                commit = %outcome.commit,
                "project deployed"
            );
            Ok(OperationResponse {
                message: format!("project {} deployed", outcome.project),
                branch: Some(outcome.branch),
                commit: Some(outcome.commit),
            })
        })
    })
    .await
}

pub async fn down_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    run_operation(query.stream, move |sink| {
        Box::pin(async move {
            state.deployer.down(state.engine.as_ref(), sink).await?;
            Ok(OperationResponse {
                message: "project stopped".to_string(),
                branch: None,
                commit: None,
            })
        })
    })
    .await
}

pub async fn reset_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    run_operation(query.stream, move |sink| {
        Box::pin(async move {
            state.deployer.destroy(state.engine.as_ref(), sink).await?;
            Ok(OperationResponse {
                message: "project removed".to_string(),
                branch: None,
                commit: None,
            })
        })
    })
    .await
}

pub async fn env_get_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<EnvResponse>, ApiError> {
    let variables = state
        .deployer
        .env()
        .await?
        .into_iter()
        .map(|(name, value)| EnvVar { name, value })
        .collect();
    Ok(Json(EnvResponse { variables }))
}

pub async fn env_set_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<EnvRequest>,
) -> Result<StatusCode, ApiError> {
    let update = match (request.remove, request.value) {
        (true, _) => EnvUpdate::Remove { name: request.name },
        (false, Some(value)) => EnvUpdate::Set {
            name: request.name,
            value,
        },
        (false, None) => return Err(ApiError::bad_request("value is required unless removing")),
    };
    state.deployer.set_env(update).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn not_found_handler() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", "no such route")
}

fn plain_text(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

fn final_line(result: Result<Result<OperationResponse, DeployError>, tokio::task::JoinError>) -> String {
    match result {
        Ok(Ok(response)) => format!("{}\n", response.message),
        Ok(Err(e)) => format!("[error] {}\n", e),
        Err(e) => format!("[error] operation aborted: {}\n", e),
    }
}

fn joined(
    result: Result<Result<OperationResponse, DeployError>, tokio::task::JoinError>,
) -> Result<Response, ApiError> {
    match result {
        Ok(Ok(response)) => Ok(Json(response).into_response()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(ApiError::internal(e)),
    }
}

/// Run a mutating operation on its own task.
///
/// The task is detached from the request, so a client that disconnects does
/// not cancel the operation. When streaming, the response starts with the
/// first output line; errors raised before any output (busy, bad state)
/// still come back as regular error responses.
async fn run_operation<F>(stream: bool, op: F) -> Result<Response, ApiError>
where
    F: FnOnce(OutputSink) -> OperationFuture,
{
    let (sink, mut rx) = OutputSink::channel();
    let mut task: JoinHandle<Result<OperationResponse, DeployError>> = tokio::spawn(op(sink));

    if !stream {
        drop(rx);
        return joined(task.await);
    }

    let first = tokio::select! {
        biased;
        result = &mut task => {
            // output written before the operation finished is still returned
            let mut text = String::new();
            while let Ok(line) = rx.try_recv() {
                text.push_str(&line);
                text.push('\n');
            }
            if text.is_empty() {
                return joined(result);
            }
            text.push_str(&final_line(result));
            return Ok(plain_text(Body::from(text)));
        }
        first = rx.recv() => match first {
            Some(line) => line,
            None => return joined(task.await),
        },
    };

    let head = futures::stream::once(async move { format!("{}\n", first) });
    let rest = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (format!("{}\n", line), rx))
    });
    let tail = futures::stream::once(async move {
        let result = task.await;
        if let Ok(Err(e)) = &result {
            warn!(error = %e, "streamed operation failed");
        }
        final_line(result)
    });
    let body = head.chain(rest).chain(tail).map(Ok::<_, Infallible>);
    Ok(plain_text(Body::from_stream(body)))
}
