//! Outbound call records and the inbound request handle they answer.
//!
//! # Lifecycle
//! ```text
//! submitted → registered-with-engine → (readiness / timer steps) → completed → response-emitted
//! ```
//!
//! An [`OutboundCall`] is the in-flight half of that state machine; once the
//! engine reports it finished it becomes a [`CompletedCall`], which carries the
//! write-once [`CallOutcome`]. Both own the [`InboundRequest`], so a record can
//! never outlive the request it has to answer.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;

use crate::config::TargetConfig;

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an outbound call, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u64);

impl CallId {
    fn next() -> Self {
        Self(CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Response synthesized for an inbound request.
#[derive(Debug)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// One-shot handle used to answer an inbound request.
///
/// `emit` consumes the responder, so a response can be sent at most once.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<InboundResponse>,
}

impl Responder {
    /// Send the response. Returns `false` when the inbound side has gone away.
    pub fn emit(self, response: InboundResponse) -> bool {
        self.tx.send(response).is_ok()
    }
}

/// Receiving end held by the inbound listener while the call is in flight.
pub type ResponseReceiver = oneshot::Receiver<InboundResponse>;

/// The parsed inbound request plus its responder.
#[derive(Debug)]
pub struct InboundRequest {
    path: String,
    query: String,
    request_id: Option<String>,
    responder: Responder,
}

impl InboundRequest {
    /// Create a request handle and the receiver its response will arrive on.
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            path: path.into(),
            query: query.into(),
            request_id: None,
            responder: Responder { tx },
        };
        (request, rx)
    }

    /// Attach the correlation id assigned by the listener.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Emit the response, consuming the handle.
    pub fn respond(self, response: InboundResponse) -> bool {
        self.responder.emit(response)
    }
}

/// Date components taken verbatim from the inbound query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQuery {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// Build `http://{address}:{port}/{year}/{month}/{day}`.
///
/// No validation is performed; a malformed component yields a URL the
/// transport fails to use.
pub fn target_url(target: &TargetConfig, date: &DataQuery) -> String {
    format!(
        "http://{}:{}/{}/{}/{}",
        target.address, target.port, date.year, date.month, date.day
    )
}

/// An outbound HTTP call awaiting completion.
#[derive(Debug)]
pub struct OutboundCall {
    id: CallId,
    url: String,
    inbound: InboundRequest,
    submitted_at: Instant,
}

impl OutboundCall {
    pub fn new(url: String, inbound: InboundRequest) -> Self {
        Self {
            id: CallId::next(),
            url,
            inbound,
            submitted_at: Instant::now(),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }

    /// Record the outcome. Consumes the in-flight record.
    pub fn complete(self, outcome: CallOutcome) -> CompletedCall {
        CompletedCall { call: self, outcome }
    }

    pub fn into_inbound(self) -> InboundRequest {
        self.inbound
    }
}

/// Final result of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// DNS, connect or I/O failure reported by the engine.
    TransportFailed { reason: String },
    /// The backend answered.
    Responded { status: u32, body: Vec<u8> },
}

impl CallOutcome {
    /// Label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            CallOutcome::TransportFailed { .. } => "transport_failed",
            CallOutcome::Responded { status: 200, .. } => "ok",
            CallOutcome::Responded { .. } => "backend_error",
        }
    }
}

/// A call the engine has finished with.
#[derive(Debug)]
pub struct CompletedCall {
    call: OutboundCall,
    outcome: CallOutcome,
}

impl CompletedCall {
    pub fn into_parts(self) -> (OutboundCall, CallOutcome) {
        (self.call, self.outcome)
    }
}
