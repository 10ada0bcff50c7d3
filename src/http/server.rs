//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the bridging handler
//! - Wire up middleware (request ID, optional tracing, timeout)
//! - Bind server to listener and stop on the shutdown broadcast
//! - Turn each accepted `/data` request into an outbound call and await its
//!   response

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::bridge::{target_url, BridgeHandle, CallOutcome, CompletionDrainer, InboundRequest};
use crate::config::{GatewayConfig, TargetConfig};
use crate::http::request::match_data_request;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub bridge: BridgeHandle,
    pub target: Arc<TargetConfig>,
    /// Used only when the bridge cannot answer itself.
    pub fallback: CompletionDrainer,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server that bridges through `bridge`.
    pub fn new(config: &GatewayConfig, bridge: BridgeHandle) -> Self {
        let state = AppState {
            bridge,
            target: Arc::new(config.target.clone()),
            fallback: CompletionDrainer::new(&config.response.server_name),
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .fallback(data_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(config.listener.request_timeout()))
            .layer(PropagateRequestIdLayer::x_request_id());

        if config.observability.trace_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router.layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The configured router, for driving the handler without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain open connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// The single handler: match, submit, await the bridge's response.
async fn data_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();

    let date = match match_data_request(&method, &path, request.uri().query()) {
        Ok(date) => date,
        Err(rejection) => {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                reason = rejection.reason(),
                "Request rejected"
            );
            metrics::record_inbound_rejected(rejection.reason());
            return rejection.into_response();
        }
    };

    let url = target_url(&state.target, &date);
    let (inbound, response_rx) = InboundRequest::new(path.as_str(), query.as_str());
    let inbound = inbound.with_request_id(request_id.as_str());

    match state.bridge.submit(url, inbound) {
        Ok(call_id) => {
            tracing::debug!(request_id = %request_id, call_id = %call_id, "Request bridged");
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Bridge unavailable");
            return unavailable(&state, &path, &query, e.to_string());
        }
    }

    match response_rx.await {
        Ok(response) => response.into_response(),
        Err(_) => {
            tracing::error!(request_id = %request_id, "Bridge dropped request without answering");
            unavailable(&state, &path, &query, "no response".to_string())
        }
    }
}

fn unavailable(state: &AppState, path: &str, query: &str, reason: String) -> Response {
    state
        .fallback
        .synthesize(path, query, &CallOutcome::TransportFailed { reason })
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;
    use tower::ServiceExt;

    use crate::bridge::{spawn_curl_bridge, CurlGlobal, UNAVAILABLE_BODY};

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn rejections_never_reach_the_bridge() {
        let _curl = CurlGlobal::acquire().unwrap();
        LocalSet::new()
            .run_until(async {
                let config = GatewayConfig::default();
                let (_shutdown, shutdown_rx) = broadcast::channel(1);
                let (bridge, _task) =
                    spawn_curl_bridge(config.engine.clone(), "unit", shutdown_rx).unwrap();
                let server = HttpServer::new(&config, bridge.clone());

                let delete = Request::builder()
                    .method("DELETE")
                    .uri("/data?year=2024&month=01&day=02")
                    .body(Body::empty())
                    .unwrap();
                let response = server.router().oneshot(delete).await.unwrap();
                assert_eq!(response.status(), 501);
                assert!(response.headers().contains_key("x-request-id"));

                let response = server.router().oneshot(get("/data?year=2024")).await.unwrap();
                assert_eq!(response.status(), 400);

                assert_eq!(bridge.snapshot().await.unwrap().in_flight, 0);
            })
            .await;
    }

    #[tokio::test]
    async fn unreachable_target_answers_unavailable() {
        let _curl = CurlGlobal::acquire().unwrap();
        LocalSet::new()
            .run_until(async {
                let mut config = GatewayConfig::default();
                config.target.address = "127.0.0.1".to_string();
                config.target.port = {
                    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                    probe.local_addr().unwrap().port()
                };
                let (_shutdown, shutdown_rx) = broadcast::channel(1);
                let (bridge, _task) =
                    spawn_curl_bridge(config.engine.clone(), "unit", shutdown_rx).unwrap();
                let server = HttpServer::new(&config, bridge);

                let response = server
                    .router()
                    .oneshot(get("/data?year=2024&month=01&day=02"))
                    .await
                    .unwrap();
                assert_eq!(response.status(), 200);
                assert_eq!(response.headers()["server"], "unit");
                let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                    .await
                    .unwrap();
                assert_eq!(&body[..], UNAVAILABLE_BODY.as_bytes());
            })
            .await;
    }
}
