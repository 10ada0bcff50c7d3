//! Completion draining and inbound response synthesis.
//!
//! # Responsibilities
//! - Turn a [`CallOutcome`] into the plain-text body returned to the caller
//! - Attach the fixed response headers (server, date, content type)
//! - Hand the response to the inbound responder and retire the record
//!
//! # Bodies
//! - transport failure: `Target service unavailable\n`
//! - backend 200: path, query and the backend body between `===` lines
//! - any other backend status: path, query and the status code

use std::time::SystemTime;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};

use crate::bridge::call::{CallOutcome, CompletedCall, InboundRequest, InboundResponse};
use crate::observability::metrics;

pub const UNAVAILABLE_BODY: &str = "Target service unavailable\n";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Builds and emits inbound responses for finished calls.
#[derive(Debug, Clone)]
pub struct CompletionDrainer {
    server: HeaderValue,
}

impl CompletionDrainer {
    pub fn new(server_name: &str) -> Self {
        let server = HeaderValue::from_str(server_name).unwrap_or_else(|_| {
            tracing::warn!(server_name, "Server name is not a valid header value");
            HeaderValue::from_static("bridge-gateway")
        });
        Self { server }
    }

    /// Answer every completed call. Returns the number of responses emitted.
    pub fn drain(&self, completed: Vec<CompletedCall>) -> usize {
        let mut emitted = 0;
        for done in completed {
            let (call, outcome) = done.into_parts();
            let elapsed = call.elapsed();
            metrics::record_call_completed(outcome.label(), elapsed);

            tracing::debug!(
                call_id = %call.id(),
                outcome = outcome.label(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Outbound call completed"
            );
            if let CallOutcome::TransportFailed { reason } = &outcome {
                tracing::info!(call_id = %call.id(), url = %call.url(), reason = %reason, "Target unreachable");
            }

            let inbound = call.into_inbound();
            if self.respond(inbound, &outcome) {
                emitted += 1;
            }
        }
        emitted
    }

    /// Synthesize the response for `outcome` and emit it on `inbound`.
    pub fn respond(&self, inbound: InboundRequest, outcome: &CallOutcome) -> bool {
        let response = self.synthesize(inbound.path(), inbound.query(), outcome);
        let request_id = inbound.request_id().map(str::to_owned);
        let delivered = inbound.respond(response);
        if !delivered {
            tracing::debug!(request_id = ?request_id, "Inbound request gone before response");
        }
        delivered
    }

    pub fn synthesize(&self, path: &str, query: &str, outcome: &CallOutcome) -> InboundResponse {
        let mut headers = HeaderMap::new();
        headers.insert(header::SERVER, self.server.clone());
        if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
            headers.insert(header::DATE, date);
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));

        InboundResponse {
            status: StatusCode::OK,
            headers,
            body: response_body(path, query, outcome),
        }
    }
}

pub fn response_body(path: &str, query: &str, outcome: &CallOutcome) -> String {
    match outcome {
        CallOutcome::TransportFailed { .. } => UNAVAILABLE_BODY.to_string(),
        CallOutcome::Responded { status: 200, body } => format!(
            "Request processed.\nPath: {}\nQuery: {}\nResponse:\n===\n{}\n===\n",
            path,
            query,
            String::from_utf8_lossy(body)
        ),
        CallOutcome::Responded { status, .. } => format!(
            "Request failed.\nPath: {}\nQuery: {}\nResponse code: {}\n",
            path, query, status
        ),
    }
}
