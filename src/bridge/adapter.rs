//! Readiness adapter: the bridge's serialized task.
//!
//! # Responsibilities
//! - Implement [`EngineHooks`] on top of the tokio reactor
//! - Keep at most one one-shot readiness wait per socket and direction
//! - Keep the single engine timer and cancel it once nothing is in flight
//! - Drive the engine on readiness, timer expiry and new submissions
//!
//! # Data Flow
//! ```text
//! BridgeHandle ──Submit──┐
//! readiness wait ─Ready──┼──▶ inbox ──▶ Bridge::run ──▶ MultiEngine
//! PendingTimer ──fired───┘                   ▲              │
//!                                            │   EngineRequest queue
//!                                            └──── pump ◀───┘
//! ```
//!
//! # Design Decisions
//! - Hook calls arrive from inside an engine call, while the engine is
//!   mutably borrowed. They are queued and applied by [`Bridge::pump`] once
//!   the engine call returns, in the order the engine made them.
//! - A zero-delay timer request runs the timeout action from within the pump
//!   loop instead of re-entering the engine.
//! - Waits run as separate tasks holding a clone of the socket. They post a
//!   [`ReadinessEvent`] back to the inbox and never touch bridge state.
//! - Sockets join the reactor on their first wait, after the engine has
//!   started connecting them.

use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::bridge::call::{CallOutcome, OutboundCall};
use crate::bridge::drainer::CompletionDrainer;
use crate::bridge::engine::{
    Direction, EngineError, EngineHooks, Interest, MultiEngine, Rejected, SharedHooks,
    SocketEvent, TimerRequest,
};
use crate::bridge::registry::{SocketHandle, SocketRegistry, TrackedSocket};
use crate::bridge::timer::PendingTimer;
use crate::observability::metrics;

/// Message accepted by the bridge task.
#[derive(Debug)]
pub(crate) enum Command {
    Submit(OutboundCall),
    Ready(ReadinessEvent),
    Snapshot(oneshot::Sender<BridgeSnapshot>),
}

/// Outcome of one readiness wait.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadinessEvent {
    socket: SocketHandle,
    direction: Direction,
    wait_id: u64,
    error: bool,
}

/// Point-in-time view of the bridge, for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSnapshot {
    pub in_flight: usize,
    pub tracked_sockets: usize,
    pub timer_armed: bool,
}

/// Level polling period once the reactor can no longer report readiness.
const LEVEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A hook call recorded during an engine call.
#[derive(Debug)]
enum EngineRequest {
    Opened(Socket),
    Close(RawFd),
    Watch(RawFd, Interest),
    Timer(TimerRequest),
}

/// [`EngineHooks`] handed to the engine. Every call is queued for the bridge.
struct AdapterHooks {
    requests: mpsc::UnboundedSender<EngineRequest>,
}

impl AdapterHooks {
    fn native_socket(domain: Domain, ty: Type, protocol: Protocol) -> std::io::Result<Socket> {
        let socket = Socket::new(domain, ty, Some(protocol))?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

impl EngineHooks for AdapterHooks {
    fn open_socket(&self, domain: Domain, ty: Type, protocol: Protocol) -> Option<RawFd> {
        if domain != Domain::IPV4 {
            tracing::debug!(?domain, "Refusing non-IPv4 socket");
            return None;
        }

        let socket = match Self::native_socket(domain, ty, protocol) {
            Ok(socket) => socket,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open outbound socket");
                return None;
            }
        };
        let fd = socket.as_raw_fd();
        // If the bridge is gone the socket is dropped with the message.
        self.requests.send(EngineRequest::Opened(socket)).ok()?;
        Some(fd)
    }

    fn close_socket(&self, fd: RawFd) {
        let _ = self.requests.send(EngineRequest::Close(fd));
    }

    fn watch(&self, fd: RawFd, interest: Interest) {
        let _ = self.requests.send(EngineRequest::Watch(fd, interest));
    }

    fn set_timer(&self, request: TimerRequest) {
        let _ = self.requests.send(EngineRequest::Timer(request));
    }
}

/// The serialized bridge context. Owns the engine and everything it uses.
pub(crate) struct Bridge<E: MultiEngine> {
    // Dropped first so connection close requests still have a receiver.
    engine: E,
    registry: SocketRegistry,
    timer: PendingTimer,
    requests: mpsc::UnboundedReceiver<EngineRequest>,
    inbox: mpsc::UnboundedReceiver<Command>,
    inbox_tx: mpsc::UnboundedSender<Command>,
    drainer: CompletionDrainer,
    next_wait: u64,
}

impl<E: MultiEngine> Bridge<E> {
    pub(crate) fn new<F>(
        factory: F,
        drainer: CompletionDrainer,
    ) -> Result<(Self, mpsc::UnboundedSender<Command>), EngineError>
    where
        F: FnOnce(SharedHooks) -> Result<E, EngineError>,
    {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let hooks: SharedHooks = Arc::new(AdapterHooks {
            requests: requests_tx,
        });
        let engine = factory(hooks)?;

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let bridge = Self {
            engine,
            registry: SocketRegistry::new(),
            timer: PendingTimer::new(),
            requests,
            inbox,
            inbox_tx: inbox_tx.clone(),
            drainer,
            next_wait: 0,
        };
        Ok((bridge, inbox_tx))
    }

    /// Process commands until shutdown is signalled.
    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Bridge started");
        // Apply anything the engine requested while being constructed.
        self.pump();

        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                () = self.timer.fired() => self.on_timer(),
                _ = shutdown.recv() => {
                    tracing::info!("Bridge received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit(call) => self.on_submit(call),
            Command::Ready(event) => self.on_ready(event),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            in_flight: self.engine.in_flight(),
            tracked_sockets: self.registry.len(),
            timer_armed: self.timer.is_armed(),
        }
    }

    fn on_submit(&mut self, call: OutboundCall) {
        let call_id = call.id();
        metrics::record_call_submitted();

        match self.engine.add(call) {
            Ok(()) => tracing::trace!(%call_id, "Call registered with engine"),
            Err(Rejected { call, error }) => {
                tracing::warn!(%call_id, error = %error, "Engine rejected call");
                let failed = call.complete(CallOutcome::TransportFailed {
                    reason: error.to_string(),
                });
                self.drainer.drain(vec![failed]);
            }
        }
        self.settle();
    }

    fn on_ready(&mut self, event: ReadinessEvent) {
        let Some(socket) = self.registry.lookup_mut(event.socket) else {
            tracing::trace!(socket = %event.socket, "Readiness for retired socket dropped");
            return;
        };
        if !socket.wait_fired(event.direction, event.wait_id) {
            tracing::trace!(socket = %event.socket, "Readiness from superseded wait dropped");
            return;
        }

        let action = if event.error {
            SocketEvent::Error
        } else {
            SocketEvent::from(event.direction)
        };
        match self.engine.socket_action(event.socket.fd(), action) {
            Ok(running) => tracing::trace!(socket = %event.socket, ?action, running, "Socket action"),
            Err(e) => tracing::warn!(socket = %event.socket, error = %e, "Socket action failed"),
        }
        self.settle();

        if event.error {
            return;
        }
        // Re-arm only if the engine still wants this direction and did not
        // already schedule a wait through a watch request.
        if let Some(socket) = self.registry.lookup_mut(event.socket) {
            if socket.wants(event.direction) && !socket.is_waiting(event.direction) {
                self.next_wait += 1;
                schedule_wait(socket, event.direction, self.next_wait, &self.inbox_tx);
            }
        }
    }

    fn on_timer(&mut self) {
        match self.engine.timeout_action() {
            Ok(running) => tracing::trace!(running, "Timeout action"),
            Err(e) => tracing::warn!(error = %e, "Timeout action failed"),
        }
        self.settle();
    }

    /// Drain completions, apply queued hook requests, and drop the timer
    /// once nothing is in flight.
    fn settle(&mut self) {
        self.drain_completed();
        self.pump();

        if self.engine.in_flight() == 0 && self.timer.is_armed() {
            tracing::trace!("No calls in flight; cancelling engine timer");
            self.timer.cancel();
        }
    }

    fn drain_completed(&mut self) {
        let completed = self.engine.take_completed();
        if !completed.is_empty() {
            self.drainer.drain(completed);
        }
    }

    /// Apply hook requests in the order the engine made them.
    fn pump(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                EngineRequest::Opened(socket) => {
                    let handle = self.registry.register(socket);
                    tracing::debug!(socket = %handle, "Outbound socket opened");
                }
                EngineRequest::Close(fd) => {
                    if self.registry.unregister(fd) {
                        tracing::debug!(fd, "Outbound socket closed");
                    } else {
                        tracing::trace!(fd, "Close for untracked socket ignored");
                    }
                }
                EngineRequest::Watch(fd, interest) => self.on_watch(fd, interest),
                EngineRequest::Timer(TimerRequest::Cancel) => self.timer.cancel(),
                EngineRequest::Timer(TimerRequest::After(after)) => self.timer.arm(after),
                EngineRequest::Timer(TimerRequest::Immediate) => {
                    self.timer.cancel();
                    if let Err(e) = self.engine.timeout_action() {
                        tracing::warn!(error = %e, "Immediate timeout action failed");
                    }
                    self.drain_completed();
                }
            }
        }
        metrics::set_tracked_sockets(self.registry.len());
    }

    fn on_watch(&mut self, fd: RawFd, interest: Interest) {
        let Some(socket) = self.registry.by_fd_mut(fd) else {
            tracing::trace!(fd, ?interest, "Interest change for untracked socket ignored");
            return;
        };
        socket.set_interest(interest);
        for direction in interest.directions() {
            if !socket.is_waiting(direction) {
                self.next_wait += 1;
                schedule_wait(socket, direction, self.next_wait, &self.inbox_tx);
            }
        }
    }

    /// Answer everything still in flight as unavailable and release the engine.
    fn shutdown(mut self) {
        let snapshot = self.snapshot();
        tracing::info!(
            in_flight = snapshot.in_flight,
            tracked_sockets = snapshot.tracked_sockets,
            timer_armed = snapshot.timer_armed,
            "Bridge stopping"
        );
        self.timer.cancel();
        let abandoned = self.engine.abandon();
        if !abandoned.is_empty() {
            tracing::warn!(count = abandoned.len(), "Answering in-flight calls on shutdown");
        }
        let failed = abandoned
            .into_iter()
            .map(|call| {
                call.complete(CallOutcome::TransportFailed {
                    reason: "gateway shutting down".to_string(),
                })
            })
            .collect();
        self.drainer.drain(failed);
        self.pump();
        tracing::info!("Bridge stopped");
    }
}

/// Start a one-shot wait for `direction` on `socket`.
fn schedule_wait(
    socket: &mut TrackedSocket,
    direction: Direction,
    wait_id: u64,
    inbox: &mpsc::UnboundedSender<Command>,
) {
    let registration = socket.reactor_io();
    let handle = socket.handle();
    let inbox = inbox.clone();

    let task = tokio::spawn(async move {
        let result = match registration {
            Ok(io) => wait_ready(&io, direction).await,
            Err(e) => Err(e),
        };
        let error = match result {
            Ok(()) => false,
            Err(e) => {
                tracing::debug!(socket = %handle, ?direction, error = %e, "Readiness wait failed");
                true
            }
        };
        let _ = inbox.send(Command::Ready(ReadinessEvent {
            socket: handle,
            direction,
            wait_id,
            error,
        }));
    });
    socket.wait_scheduled(direction, wait_id, task.abort_handle());
}

/// Wait until the socket is ready in `direction` at this moment.
///
/// The reactor is edge-triggered; a zero-timeout `poll` confirms the level
/// before reporting, so readiness the engine already consumed is not
/// reported twice.
async fn wait_ready(io: &AsyncFd<Socket>, direction: Direction) -> std::io::Result<()> {
    let fd = io.as_raw_fd();
    loop {
        let mut guard = match direction {
            Direction::Read => io.readable().await?,
            Direction::Write => io.writable().await?,
        };
        if poll_level(fd, direction)? {
            return Ok(());
        }
        let ready = guard.ready();
        if ready.is_read_closed() || ready.is_write_closed() {
            // Closed readiness survives clear_ready and would resolve every
            // later await at once.
            tracing::debug!(fd, ?direction, "Reactor reports a closed socket; polling the level");
            return poll_level_until_ready(fd, direction).await;
        }
        guard.clear_ready();
    }
}

async fn poll_level_until_ready(fd: RawFd, direction: Direction) -> std::io::Result<()> {
    let mut interval = tokio::time::interval(LEVEL_POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if poll_level(fd, direction)? {
            return Ok(());
        }
    }
}

fn poll_level(fd: RawFd, direction: Direction) -> std::io::Result<bool> {
    let events = match direction {
        Direction::Read => libc::POLLIN,
        Direction::Write => libc::POLLOUT,
    };
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: one valid pollfd, zero timeout.
    let rc = unsafe { libc::poll(&mut pollfd, 1, 0) };
    if rc < 0 {
        let error = std::io::Error::last_os_error();
        if error.kind() == std::io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(error);
    }
    Ok(pollfd.revents & (events | libc::POLLERR | libc::POLLHUP) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::future::Future;
    use std::io::Write;
    use std::net::TcpListener;
    use std::os::fd::BorrowedFd;
    use std::sync::Mutex;

    use socket2::SockRef;

    use crate::bridge::call::{CompletedCall, InboundRequest};
    use crate::bridge::drainer::UNAVAILABLE_BODY;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        /// Completes every call on the first timeout and leaves a stale
        /// timer request behind.
        TimerCompletes,
        /// Like `TimerCompletes`, but asks for the timeout check right away.
        ImmediateCompletes,
        /// Opens a UDP socket per call and completes it once writable.
        WritableCompletes,
        /// Rejects every call.
        Rejects,
        /// Accepts calls and never progresses them.
        Stalls,
    }

    struct ScriptedEngine {
        hooks: SharedHooks,
        script: Script,
        calls: Vec<OutboundCall>,
        by_socket: HashMap<RawFd, OutboundCall>,
        completed: Vec<CompletedCall>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedEngine {
        fn record(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }

        fn complete(&mut self, call: OutboundCall, body: &[u8]) {
            self.completed.push(call.complete(CallOutcome::Responded {
                status: 200,
                body: body.to_vec(),
            }));
        }
    }

    impl MultiEngine for ScriptedEngine {
        fn add(&mut self, call: OutboundCall) -> Result<(), Rejected> {
            self.record("add");
            match self.script {
                Script::Rejects => {
                    return Err(Rejected {
                        call,
                        error: EngineError::GlobalInit(-1),
                    })
                }
                Script::TimerCompletes => {
                    self.hooks.set_timer(TimerRequest::After(Duration::from_millis(10)));
                }
                Script::ImmediateCompletes => self.hooks.set_timer(TimerRequest::Immediate),
                Script::WritableCompletes => {
                    let fd = self
                        .hooks
                        .open_socket(Domain::IPV4, Type::DGRAM, Protocol::UDP)
                        .expect("IPv4 socket");
                    self.hooks.watch(fd, Interest::Write);
                    self.hooks.set_timer(TimerRequest::After(Duration::from_secs(30)));
                    self.by_socket.insert(fd, call);
                    return Ok(());
                }
                Script::Stalls => {}
            }
            self.calls.push(call);
            Ok(())
        }

        fn socket_action(&mut self, fd: RawFd, event: SocketEvent) -> Result<u32, EngineError> {
            self.record(format!("action:{event:?}"));
            if event == SocketEvent::Error {
                return Ok(self.in_flight() as u32);
            }
            if let Some(call) = self.by_socket.remove(&fd) {
                self.complete(call, b"writable");
                self.hooks.watch(fd, Interest::None);
                self.hooks.close_socket(fd);
                // Closing twice must be harmless.
                self.hooks.close_socket(fd);
            }
            Ok(self.in_flight() as u32)
        }

        fn timeout_action(&mut self) -> Result<u32, EngineError> {
            self.record("timeout");
            let calls: Vec<_> = self.calls.drain(..).collect();
            for call in calls {
                self.complete(call, b"timer");
            }
            self.hooks.set_timer(TimerRequest::After(Duration::from_millis(10)));
            Ok(0)
        }

        fn take_completed(&mut self) -> Vec<CompletedCall> {
            std::mem::take(&mut self.completed)
        }

        fn in_flight(&self) -> usize {
            self.calls.len() + self.by_socket.len()
        }

        fn abandon(&mut self) -> Vec<OutboundCall> {
            let mut calls = std::mem::take(&mut self.calls);
            calls.extend(self.by_socket.drain().map(|(_, call)| call));
            calls
        }
    }

    struct Harness {
        inbox: mpsc::UnboundedSender<Command>,
        log: Arc<Mutex<Vec<String>>>,
        shutdown: broadcast::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    }

    fn scripted_bridge(
        script: Script,
    ) -> (
        Bridge<ScriptedEngine>,
        mpsc::UnboundedSender<Command>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine_log = Arc::clone(&log);
        let (bridge, inbox) = Bridge::new(
            move |hooks| {
                Ok(ScriptedEngine {
                    hooks,
                    script,
                    calls: Vec::new(),
                    by_socket: HashMap::new(),
                    completed: Vec::new(),
                    log: engine_log,
                })
            },
            CompletionDrainer::new("test-bridge"),
        )
        .unwrap();
        (bridge, inbox, log)
    }

    fn outbound_call(query: &str) -> (OutboundCall, oneshot::Receiver<crate::bridge::call::InboundResponse>) {
        let (inbound, rx) = InboundRequest::new("/data", query);
        (OutboundCall::new("http://127.0.0.1:1/x".into(), inbound), rx)
    }

    /// Poll `future` for at most `window`; returns the poll count and
    /// whether it finished.
    async fn poll_for(future: impl Future<Output = std::io::Result<()>>, window: Duration) -> (usize, bool) {
        let mut future = std::pin::pin!(future);
        let mut polls = 0;
        let counted = std::future::poll_fn(|cx| {
            polls += 1;
            future.as_mut().poll(cx)
        });
        let finished = tokio::time::timeout(window, counted).await.is_ok();
        (polls, finished)
    }

    fn tcp_socket() -> Socket {
        AdapterHooks::native_socket(Domain::IPV4, Type::STREAM, Protocol::TCP).unwrap()
    }

    impl Harness {
        fn start(script: Script) -> Self {
            let (bridge, inbox, log) = scripted_bridge(script);
            let (shutdown, shutdown_rx) = broadcast::channel(1);
            let task = tokio::task::spawn_local(bridge.run(shutdown_rx));
            Self {
                inbox,
                log,
                shutdown,
                task,
            }
        }

        fn submit(&self, query: &str) -> oneshot::Receiver<crate::bridge::call::InboundResponse> {
            let (call, rx) = outbound_call(query);
            self.inbox.send(Command::Submit(call)).unwrap();
            rx
        }

        async fn snapshot(&self) -> BridgeSnapshot {
            let (tx, rx) = oneshot::channel();
            self.inbox.send(Command::Snapshot(tx)).unwrap();
            rx.await.unwrap()
        }

        fn count(&self, entry: &str) -> usize {
            self.log.lock().unwrap().iter().filter(|e| *e == entry).count()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_cancelled_once_nothing_in_flight() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::TimerCompletes);
                let response = harness.submit("year=2024").await.unwrap();
                assert!(response.body.contains("===\ntimer\n==="));

                // The engine asked for another timeout; it must not run.
                let snapshot = harness.snapshot().await;
                assert_eq!(snapshot.in_flight, 0);
                assert!(!snapshot.timer_armed);
                tokio::time::sleep(Duration::from_secs(1)).await;
                assert_eq!(harness.count("timeout"), 1);

                // A new submission arms the timer again.
                harness.submit("year=2025").await.unwrap();
                assert_eq!(harness.count("timeout"), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_timer_runs_within_the_same_pump() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::ImmediateCompletes);
                let response = harness.submit("year=2024").await.unwrap();
                assert!(response.body.contains("===\ntimer\n==="));

                let snapshot = harness.snapshot().await;
                assert_eq!(snapshot.in_flight, 0);
                assert!(!snapshot.timer_armed);
                assert_eq!(*harness.log.lock().unwrap(), ["add", "timeout"]);
            })
            .await;
    }

    #[tokio::test]
    async fn reactor_error_reaches_engine_without_rearm() {
        let (mut bridge, _inbox, log) = scripted_bridge(Script::WritableCompletes);
        let (call, _rx) = outbound_call("year=2024");
        bridge.on_submit(call);

        let fd = *bridge.engine.by_socket.keys().next().unwrap();
        let socket = bridge.registry.by_fd_mut(fd).unwrap();
        assert!(socket.is_waiting(Direction::Write));
        let event = ReadinessEvent {
            socket: socket.handle(),
            direction: Direction::Write,
            wait_id: bridge.next_wait,
            error: true,
        };
        bridge.on_ready(event);

        assert_eq!(*log.lock().unwrap(), ["add", "action:Error"]);
        let socket = bridge.registry.by_fd_mut(fd).unwrap();
        assert!(socket.wants(Direction::Write));
        assert!(!socket.is_waiting(Direction::Write));
        assert_eq!(bridge.engine.in_flight(), 1);
    }

    #[tokio::test]
    async fn read_wait_on_fresh_connection_stays_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut registry = SocketRegistry::new();
        let handle = registry.register(tcp_socket());

        // The driver runs between opening and connecting, as it does while
        // the engine resolves the target.
        tokio::time::sleep(Duration::from_millis(20)).await;
        // SAFETY: the registry keeps the descriptor open for the whole test.
        let fd = unsafe { BorrowedFd::borrow_raw(handle.fd()) };
        let _ = SockRef::from(&fd).connect(&listener.local_addr().unwrap().into());
        let (mut peer, _) = listener.accept().unwrap();

        let io = registry.lookup_mut(handle).unwrap().reactor_io().unwrap();
        let (polls, finished) = poll_for(wait_ready(&io, Direction::Read), Duration::from_millis(200)).await;
        assert!(!finished, "nothing was sent yet");
        assert!(polls < 10, "idle wait polled {polls} times");

        peer.write_all(b"x").unwrap();
        tokio::time::timeout(Duration::from_secs(1), wait_ready(&io, Direction::Read))
            .await
            .expect("readable after the peer writes")
            .unwrap();
    }

    #[tokio::test]
    async fn closed_readiness_does_not_spin() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        // Registered before connecting: epoll reports the socket hung up.
        let io = AsyncFd::new(tcp_socket()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = io.get_ref().connect(&listener.local_addr().unwrap().into());
        let (mut peer, _) = listener.accept().unwrap();

        let (polls, finished) = poll_for(wait_ready(&io, Direction::Read), Duration::from_millis(100)).await;
        assert!(!finished, "nothing was sent yet");
        assert!(polls < 60, "idle wait polled {polls} times");

        peer.write_all(b"x").unwrap();
        tokio::time::timeout(Duration::from_secs(1), wait_ready(&io, Direction::Read))
            .await
            .expect("readable after the peer writes")
            .unwrap();
    }

    #[tokio::test]
    async fn readiness_drives_engine_and_retires_socket() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::WritableCompletes);
                let response = harness.submit("year=2024").await.unwrap();
                assert!(response.body.contains("===\nwritable\n==="));
                assert_eq!(harness.count("action:Writable"), 1);

                let snapshot = harness.snapshot().await;
                assert_eq!(snapshot.tracked_sockets, 0);
                assert_eq!(snapshot.in_flight, 0);
                assert!(!snapshot.timer_armed);
            })
            .await;
    }

    #[tokio::test]
    async fn concurrent_calls_complete_independently() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::WritableCompletes);
                let receivers: Vec<_> = (0..20)
                    .map(|i| harness.submit(&format!("day={i}")))
                    .collect();
                for (i, rx) in receivers.into_iter().enumerate() {
                    let response = rx.await.unwrap();
                    assert!(response.body.contains(&format!("Query: day={i}\n")));
                }
                assert_eq!(harness.snapshot().await.tracked_sockets, 0);
            })
            .await;
    }

    #[tokio::test]
    async fn rejected_call_answered_unavailable() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::Rejects);
                let response = harness.submit("year=2024").await.unwrap();
                assert_eq!(response.body, UNAVAILABLE_BODY);
                assert_eq!(harness.snapshot().await.in_flight, 0);
            })
            .await;
    }

    #[tokio::test]
    async fn shutdown_answers_in_flight_calls() {
        tokio::task::LocalSet::new()
            .run_until(async {
                let harness = Harness::start(Script::Stalls);
                let rx = harness.submit("year=2024");
                assert_eq!(harness.snapshot().await.in_flight, 1);

                harness.shutdown.send(()).unwrap();
                harness.task.await.unwrap();
                assert_eq!(rx.await.unwrap().body, UNAVAILABLE_BODY);
            })
            .await;
    }

    #[test]
    fn hooks_refuse_non_ipv4() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = AdapterHooks { requests: tx };
        assert!(hooks
            .open_socket(Domain::IPV6, Type::STREAM, Protocol::TCP)
            .is_none());
        assert!(rx.try_recv().is_err());
    }
}
