//! Submission side of the bridge.
//!
//! [`BridgeHandle`] is the only way other tasks reach the bridge. It is cheap
//! to clone and `Send`, so axum handlers on any worker thread can submit
//! calls; the calls themselves are registered with the engine on the
//! bridge's own task.

use tokio::sync::mpsc::error::SendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::adapter::{Bridge, BridgeSnapshot, Command};
use crate::bridge::call::{CallId, InboundRequest, OutboundCall};
use crate::bridge::drainer::CompletionDrainer;
use crate::bridge::engine::{CurlEngine, EngineError, MultiEngine, SharedHooks};
use crate::config::EngineConfig;

/// Errors returned by [`BridgeHandle`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The bridge task is gone; the request is handed back so the caller
    /// can still answer it.
    #[error("bridge is not running")]
    Closed(InboundRequest),

    #[error("bridge stopped before replying")]
    Stopped,
}

/// Handle for submitting outbound calls to a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl BridgeHandle {
    /// Queue an outbound GET to `url` whose outcome answers `inbound`.
    ///
    /// Returns immediately; the response arrives on the receiver created
    /// alongside `inbound`.
    pub fn submit(
        &self,
        url: impl Into<String>,
        inbound: InboundRequest,
    ) -> Result<CallId, DispatchError> {
        let call = OutboundCall::new(url.into(), inbound);
        let id = call.id();
        tracing::trace!(call_id = %id, url = %call.url(), "Submitting outbound call");

        if let Err(SendError(Command::Submit(call))) = self.tx.send(Command::Submit(call)) {
            return Err(DispatchError::Closed(call.into_inbound()));
        }
        Ok(id)
    }

    /// Current in-flight, socket and timer state of the bridge.
    pub async fn snapshot(&self) -> Result<BridgeSnapshot, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .map_err(|_| DispatchError::Stopped)?;
        rx.await.map_err(|_| DispatchError::Stopped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Build the engine through `factory` and start the bridge task.
///
/// The task runs until `shutdown` fires, then answers every call still in
/// flight as unavailable.
///
/// # Panics
///
/// Must be called from within a [`tokio::task::LocalSet`]; engine handles
/// are not `Send`.
pub fn spawn_bridge<E, F>(
    factory: F,
    server_name: &str,
    shutdown: broadcast::Receiver<()>,
) -> Result<(BridgeHandle, JoinHandle<()>), EngineError>
where
    E: MultiEngine + 'static,
    F: FnOnce(SharedHooks) -> Result<E, EngineError>,
{
    let (bridge, tx) = Bridge::new(factory, CompletionDrainer::new(server_name))?;
    let task = tokio::task::spawn_local(bridge.run(shutdown));
    Ok((BridgeHandle { tx }, task))
}

/// [`spawn_bridge`] with the libcurl engine.
pub fn spawn_curl_bridge(
    config: EngineConfig,
    server_name: &str,
    shutdown: broadcast::Receiver<()>,
) -> Result<(BridgeHandle, JoinHandle<()>), EngineError> {
    spawn_bridge::<CurlEngine, _>(
        crate::bridge::engine::curl::factory(config),
        server_name,
        shutdown,
    )
}
