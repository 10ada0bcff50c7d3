//! Capability seam between the bridge and a multiplexing HTTP client engine.
//!
//! # Data Flow
//! ```text
//! adapter ──add / socket_action / timeout_action──▶ MultiEngine
//!    ▲                                                   │
//!    └──── open_socket / close_socket / watch / set_timer ┘  (EngineHooks)
//! ```
//!
//! The engine never owns reactor objects. It asks for sockets, interest
//! changes and timers through [`EngineHooks`], which the adapter implements
//! and hands to the engine at construction time.

pub mod curl;
pub mod global;

use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Type};

use crate::bridge::call::{CompletedCall, OutboundCall};

pub use self::curl::CurlEngine;
pub use self::global::CurlGlobal;

/// Errors raised by an engine call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("multi handle error: {0}")]
    Multi(#[from] ::curl::MultiError),

    #[error("transfer setup error: {0}")]
    Transfer(#[from] ::curl::Error),

    #[error("libcurl global initialisation failed with code {0}")]
    GlobalInit(i32),
}

/// Direction a socket can be waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Read => 0,
            Direction::Write => 1,
        }
    }
}

/// Current readiness interest for a socket.
///
/// The engine always states the full desired interest, never a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interest {
    #[default]
    None,
    Read,
    Write,
    Both,
}

impl Interest {
    pub fn wants(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Interest::Read | Interest::Both, Direction::Read)
                | (Interest::Write | Interest::Both, Direction::Write)
        )
    }

    pub fn directions(self) -> impl Iterator<Item = Direction> {
        [Direction::Read, Direction::Write]
            .into_iter()
            .filter(move |direction| self.wants(*direction))
    }
}

/// Timer request issued by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRequest {
    /// Drop any pending timer.
    Cancel,
    /// Run the timeout check right away.
    Immediate,
    /// Replace the pending timer with one firing after the duration.
    After(Duration),
}

impl TimerRequest {
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => TimerRequest::Cancel,
            Some(d) if d.is_zero() => TimerRequest::Immediate,
            Some(d) => TimerRequest::After(d),
        }
    }
}

/// Event passed to [`MultiEngine::socket_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    Readable,
    Writable,
    /// The wait itself failed; the engine checks the connection.
    Error,
}

impl From<Direction> for SocketEvent {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Read => SocketEvent::Readable,
            Direction::Write => SocketEvent::Writable,
        }
    }
}

/// Engine-to-adapter requests. Implemented by the adapter.
pub trait EngineHooks: Send + Sync + 'static {
    /// Create a socket for a new connection, or `None` to refuse.
    fn open_socket(&self, domain: Domain, ty: Type, protocol: Protocol) -> Option<RawFd>;

    /// The engine is done with a socket it obtained from `open_socket`.
    fn close_socket(&self, fd: RawFd);

    /// Replace the readiness interest for a socket.
    fn watch(&self, fd: RawFd, interest: Interest);

    fn set_timer(&self, request: TimerRequest);
}

/// A call the engine refused to take on.
#[derive(Debug)]
pub struct Rejected {
    pub call: OutboundCall,
    pub error: EngineError,
}

/// Adapter-to-engine entry points.
///
/// Every method is called from the bridge's serialized context only.
pub trait MultiEngine {
    /// Register a new call with the engine.
    fn add(&mut self, call: OutboundCall) -> Result<(), Rejected>;

    /// Drive the engine for one socket. Returns the number of running transfers.
    fn socket_action(&mut self, fd: RawFd, event: SocketEvent) -> Result<u32, EngineError>;

    /// Drive the engine's timeout handling. Returns the number of running transfers.
    fn timeout_action(&mut self) -> Result<u32, EngineError>;

    /// Pull every finished call out of the engine.
    fn take_completed(&mut self) -> Vec<CompletedCall>;

    /// Calls registered and not yet drained.
    fn in_flight(&self) -> usize;

    /// Detach every in-flight call (shutdown).
    fn abandon(&mut self) -> Vec<OutboundCall>;
}

/// Shared hooks handed to an engine factory.
pub type SharedHooks = Arc<dyn EngineHooks>;
