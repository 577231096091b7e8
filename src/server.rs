//! Health and Metrics Server
//!
//! Minimal HTTP/1 server exposing:
//!
//! - `/healthz`, `/livez` - process liveness
//! - `/readyz` - 200 only while the counter service is running
//! - `/metrics` - Prometheus text exposition
//! - `/status` - service state and per-task tick counters as JSON

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::adapters::PrometheusEventPublisher;
use crate::counter::{CounterService, ServiceState};
use crate::error::{Error, Result};
use crate::scheduler::TaskStats;

/// Shared state behind the HTTP endpoints.
pub struct HttpState {
    pub service: Arc<CounterService>,
    pub metrics: PrometheusEventPublisher,
}

#[derive(Serialize)]
struct StatusBody {
    state: ServiceState,
    tasks: Vec<TaskStats>,
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Route a request path to its response.
pub fn route(state: &HttpState, path: &str) -> Response<Full<Bytes>> {
    match path {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => match state.service.state() {
            ServiceState::Running => respond(StatusCode::OK, "text/plain", "ok"),
            other => respond(
                StatusCode::SERVICE_UNAVAILABLE,
                "text/plain",
                format!("not ready: {}", other),
            ),
        },
        "/metrics" => match state.metrics.render() {
            Ok(text) => respond(StatusCode::OK, prometheus::TEXT_FORMAT, text),
            Err(e) => {
                error!(error = %e, "Failed to render metrics");
                respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
            }
        },
        "/status" => {
            let body = StatusBody {
                state: state.service.state(),
                tasks: state.service.scheduler_stats(),
            };
            match serde_json::to_vec_pretty(&body) {
                Ok(json) => respond(StatusCode::OK, "application/json", json),
                Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    }
}

/// Bind the listener for [`serve`].
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address '{}': {}", addr, e)))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))
}

/// Accept connections until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics server listening on {}", addr);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
        };
        debug!(%peer, "Accepted connection");

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(&state, req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryStoreConfig, ReplicatedMemoryStore};
    use crate::config::AppConfig;
    use crate::domain::EventPublisher;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn state() -> Arc<HttpState> {
        let metrics = PrometheusEventPublisher::new().unwrap();
        let store = Arc::new(ReplicatedMemoryStore::three_member(MemoryStoreConfig::default()));
        let service = CounterService::new(
            AppConfig::default(),
            store,
            Arc::new(metrics.clone()) as Arc<dyn EventPublisher>,
        )
        .unwrap();
        Arc::new(HttpState {
            service: Arc::new(service),
            metrics,
        })
    }

    #[tokio::test]
    async fn test_routes() {
        let state = state();

        assert_eq!(route(&state, "/healthz").status(), StatusCode::OK);
        assert_eq!(route(&state, "/readyz").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(route(&state, "/metrics").status(), StatusCode::OK);
        assert_eq!(route(&state, "/status").status(), StatusCode::OK);
        assert_eq!(route(&state, "/nope").status(), StatusCode::NOT_FOUND);

        state.service.start().await.unwrap();
        assert_eq!(route(&state, "/readyz").status(), StatusCode::OK);
        state.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, state(), cancel.clone()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.ends_with("ok"));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(matches!(bind("not-an-address").await, Err(Error::Config(_))));
    }
}
