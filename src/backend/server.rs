//! Delay backend HTTP server.
//!
//! # Responsibilities
//! - Answer `GET /{yyyy}/{mm}/{dd}` after a random pause
//! - Answer everything else with `404 Not Found` and close the connection

use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::backend::pause::PauseGenerator;

const SERVER_NAME: &str = "bridge-gateway delay server";

/// Returns `true` for `/{4 digits}/{2 digits}/{2 digits}`.
pub fn is_date_path(path: &str) -> bool {
    let mut segments = path.strip_prefix('/').unwrap_or("").split('/');
    let widths = [4, 2, 2];
    for width in widths {
        match segments.next() {
            Some(segment) if segment.len() == width && segment.bytes().all(|b| b.is_ascii_digit()) => {}
            _ => return false,
        }
    }
    segments.next().is_none()
}

#[derive(Clone)]
struct DelayState {
    pauses: Arc<PauseGenerator>,
}

/// Build the delay backend router.
pub fn delay_router(pauses: PauseGenerator, trace_requests: bool) -> Router {
    let router = Router::new().fallback(delay_handler).with_state(DelayState {
        pauses: Arc::new(pauses),
    });
    if trace_requests {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Delay server starting");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    tracing::info!("Delay server stopped");
    Ok(())
}

async fn delay_handler(State(state): State<DelayState>, request: Request<Body>) -> Response {
    if request.method() != Method::GET || !is_date_path(request.uri().path()) {
        return not_found();
    }

    let pause = state.pauses.next();
    tracing::debug!(path = %request.uri().path(), pause_ms = pause.as_millis() as u64, "Delaying response");
    tokio::time::sleep(pause).await;

    let body = format!("Hello world!\nPause: {}ms.\n", pause.as_millis());
    (
        [
            (header::SERVER, HeaderValue::from_static(SERVER_NAME)),
            (header::DATE, http_date()),
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            ),
        ],
        body,
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [
            (header::DATE, http_date()),
            (header::CONNECTION, HeaderValue::from_static("close")),
        ],
        "Not found",
    )
        .into_response()
}

fn http_date() -> HeaderValue {
    HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now()))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}
