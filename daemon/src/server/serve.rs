//! HTTPS server setup

use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::app::options::ServerOptions;
use crate::bootstrap::certs::CertPaths;
use crate::errors::DaemonError;
use crate::server::gateway::authorize;
use crate::server::handlers::{
    down_handler, env_get_handler, env_set_handler, health_handler, logs_handler,
    not_found_handler, reset_handler, status_handler, up_handler,
};
use crate::server::state::ServerState;
use crate::server::users::{
    add_user_handler, list_users_handler, login_handler, logout_handler, passwd_handler,
    remove_user_handler, reset_users_handler, validate_handler,
};
use crate::server::webhook::webhook_handler;

/// Every route behind the auth gateway
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Public
        .route("/", get(health_handler))
        .route("/webhook", post(webhook_handler))
        .route("/user/login", post(login_handler))
        // Deployment
        .route("/status", get(status_handler))
        .route("/logs", get(logs_handler))
        .route("/up", post(up_handler))
        .route("/down", post(down_handler))
        .route("/reset", post(reset_handler))
        .route("/env", get(env_get_handler).post(env_set_handler))
        // Users
        .route("/user/logout", post(logout_handler))
        .route("/user/validate", get(validate_handler))
        .route("/user/passwd", post(passwd_handler))
        .route("/user/adduser", post(add_user_handler))
        .route("/user/removeuser", post(remove_user_handler))
        .route("/user/listusers", get(list_users_handler))
        .route("/user/resetusers", post(reset_users_handler))
        .fallback(not_found_handler)
        // unknown paths reach the fallback through the gateway too
        .layer(from_fn_with_state(state.gateway.clone(), authorize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// rustls config from the PEM pair written at bootstrap
pub async fn load_tls_config(paths: &CertPaths) -> Result<ServerConfig, DaemonError> {
    let cert_pem = paths.cert.read_string().await?;
    let key_pem = paths.key.read_string().await?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_bytes()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DaemonError::ConfigError(format!("invalid certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(DaemonError::ConfigError(format!(
            "no certificate in {}",
            paths.cert.path().display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_bytes()))
        .map_err(|e| DaemonError::ConfigError(format!("invalid private key: {}", e)))?
        .ok_or_else(|| {
            DaemonError::ConfigError(format!("no private key in {}", paths.key.path().display()))
        })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| DaemonError::ConfigError(format!("TLS config error: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Start the HTTPS server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DaemonError>>, DaemonError> {
    let tls = load_tls_config(&options.tls).await?;
    let acceptor = TlsAcceptor::from(Arc::new(tls));
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTPS server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DaemonError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        let (close_tx, close_rx) = watch::channel(false);
        tokio::pin!(shutdown_signal);

        loop {
            let (stream, remote) = tokio::select! {
                _ = &mut shutdown_signal => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            let acceptor = acceptor.clone();
            let app = app.clone();
            let close_rx = close_rx.clone();
            tokio::spawn(async move {
                let tls = match acceptor.accept(stream).await {
                    Ok(tls) => tls,
                    Err(e) => {
                        debug!(remote = %remote, error = %e, "TLS handshake failed");
                        return;
                    }
                };
                serve_connection(TokioIo::new(tls), remote, app, close_rx).await;
            });
        }

        info!("HTTPS server shutting down");
        drop(close_rx);
        let _ = close_tx.send(true);
        // open connections hold a receiver until they finish
        close_tx.closed().await;
        Ok(())
    });

    Ok(handle)
}

async fn serve_connection<I>(
    io: TokioIo<I>,
    remote: SocketAddr,
    app: Router,
    mut close_rx: watch::Receiver<bool>,
) where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(remote));
        app.clone().oneshot(request)
    });

    let builder = Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(io, service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!(remote = %remote, error = %e, "connection closed with error");
            }
        }
        _ = close_rx.changed() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                error!(remote = %remote, error = %e, "connection failed during shutdown");
            }
        }
    }
}
