//! Asynchronous outbound bridge.
//!
//! # Data Flow
//! ```text
//! axum handler
//!     → BridgeHandle::submit (dispatch.rs)
//!     → Bridge task (adapter.rs), pinned to a LocalSet
//!         → MultiEngine::add (engine/)
//!         ⇄ socket readiness waits / engine timer (registry.rs, timer.rs)
//!         → take_completed → CompletionDrainer (drainer.rs)
//!     → oneshot response back to the handler
//! ```
//!
//! # Design Decisions
//! - Every engine call, callback and registry mutation happens on one task,
//!   so the bridge needs no locks.
//! - The engine is reached only through [`engine::MultiEngine`] and reaches
//!   the reactor only through [`engine::EngineHooks`]; a scripted engine can
//!   stand in for libcurl in tests.

pub mod adapter;
pub mod call;
pub mod dispatch;
pub mod drainer;
pub mod engine;
pub mod registry;
pub mod timer;

pub use adapter::BridgeSnapshot;
pub use call::{target_url, CallId, CallOutcome, DataQuery, InboundRequest, InboundResponse};
pub use dispatch::{spawn_bridge, spawn_curl_bridge, BridgeHandle, DispatchError};
pub use drainer::{CompletionDrainer, UNAVAILABLE_BODY};
pub use engine::{CurlGlobal, EngineError};
