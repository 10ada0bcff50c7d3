//! Socket registry: descriptor → reactor-registered socket.
//!
//! # Responsibilities
//! - Own every socket the engine asked the adapter to open
//! - Track the current readiness interest and the outstanding waits
//! - Retire sockets on the engine's close request, cancelling their waits
//!
//! # Design Decisions
//! - Only the bridge's serialized context touches the registry, so it holds
//!   no locks.
//! - A [`SocketHandle`] pairs the descriptor with a registry serial. Events
//!   for a retired socket, including one whose descriptor number has since
//!   been reused, fail [`SocketRegistry::lookup_mut`] and are dropped.
//! - A socket joins the reactor on its first wait, not when it is opened.
//!   The engine connects between the two, and epoll reports an unconnected
//!   TCP socket as hung up, a state tokio never clears.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tokio::task::AbortHandle;

use crate::bridge::engine::{Direction, Interest};

/// Reactor-registered socket shared with pending waits.
pub type NativeSocket = Arc<AsyncFd<Socket>>;

/// Lightweight handle naming one tracked socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle {
    fd: RawFd,
    serial: u64,
}

impl SocketHandle {
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}#{}", self.fd, self.serial)
    }
}

#[derive(Debug)]
enum Registration {
    /// Opened by the engine, not yet handed to the reactor.
    Idle(Socket),
    Reactor(NativeSocket),
    /// Only while moving between the two.
    Vacant,
}

/// An outstanding one-shot readiness wait.
#[derive(Debug)]
struct PendingWait {
    id: u64,
    abort: AbortHandle,
}

/// A socket owned on behalf of the engine.
#[derive(Debug)]
pub struct TrackedSocket {
    handle: SocketHandle,
    registration: Registration,
    interest: Interest,
    waits: [Option<PendingWait>; 2],
}

impl TrackedSocket {
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// The reactor-registered socket, registering it on first use.
    pub fn reactor_io(&mut self) -> io::Result<NativeSocket> {
        self.registration = match std::mem::replace(&mut self.registration, Registration::Vacant) {
            Registration::Idle(socket) => match AsyncFd::try_new(socket) {
                Ok(io) => Registration::Reactor(Arc::new(io)),
                Err(e) => {
                    let (socket, error) = e.into_parts();
                    self.registration = Registration::Idle(socket);
                    return Err(error);
                }
            },
            registered => registered,
        };

        match &self.registration {
            Registration::Reactor(io) => Ok(Arc::clone(io)),
            _ => Err(io::Error::other("socket is not registrable")),
        }
    }

    #[cfg(test)]
    fn in_reactor(&self) -> bool {
        matches!(self.registration, Registration::Reactor(_))
    }

    #[cfg(test)]
    fn interest(&self) -> Interest {
        self.interest
    }

    /// Replace the interest, aborting waits for directions no longer wanted.
    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
        for direction in [Direction::Read, Direction::Write] {
            if !interest.wants(direction) {
                if let Some(wait) = self.waits[direction.index()].take() {
                    wait.abort.abort();
                }
            }
        }
    }

    pub fn wants(&self, direction: Direction) -> bool {
        self.interest.wants(direction)
    }

    pub fn is_waiting(&self, direction: Direction) -> bool {
        self.waits[direction.index()].is_some()
    }

    pub fn wait_scheduled(&mut self, direction: Direction, id: u64, abort: AbortHandle) {
        let wait = PendingWait { id, abort };
        if let Some(previous) = self.waits[direction.index()].replace(wait) {
            previous.abort.abort();
        }
    }

    /// Wait `id` for `direction` has resolved. Returns `false` if it is not
    /// the outstanding wait (it was replaced or aborted after posting).
    pub fn wait_fired(&mut self, direction: Direction, id: u64) -> bool {
        let slot = &mut self.waits[direction.index()];
        match slot {
            Some(wait) if wait.id == id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    fn cancel_waits(&mut self) {
        for wait in self.waits.iter_mut().filter_map(Option::take) {
            wait.abort.abort();
        }
    }
}

/// Registry of live sockets.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    sockets: HashMap<RawFd, TrackedSocket>,
    next_serial: u64,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a socket. It reaches the reactor on its first wait.
    pub fn register(&mut self, socket: Socket) -> SocketHandle {
        let fd = socket.as_raw_fd();
        if self.unregister(fd) {
            tracing::warn!(fd, "Descriptor registered twice; previous entry retired");
        }

        self.next_serial += 1;
        let handle = SocketHandle {
            fd,
            serial: self.next_serial,
        };
        self.sockets.insert(
            fd,
            TrackedSocket {
                handle,
                registration: Registration::Idle(socket),
                interest: Interest::None,
                waits: [None, None],
            },
        );
        tracing::trace!(socket = %handle, "Socket registered");
        handle
    }

    /// Stop tracking a socket. Returns `false` if it was not tracked.
    ///
    /// Outstanding waits are aborted; the descriptor closes once the last
    /// reference to the socket is released.
    pub fn unregister(&mut self, fd: RawFd) -> bool {
        match self.sockets.remove(&fd) {
            Some(mut socket) => {
                socket.cancel_waits();
                tracing::trace!(socket = %socket.handle, "Socket unregistered");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn lookup(&self, handle: SocketHandle) -> Option<&TrackedSocket> {
        self.sockets
            .get(&handle.fd)
            .filter(|socket| socket.handle == handle)
    }

    pub fn lookup_mut(&mut self, handle: SocketHandle) -> Option<&mut TrackedSocket> {
        self.sockets
            .get_mut(&handle.fd)
            .filter(|socket| socket.handle == handle)
    }

    /// Find the live socket for an engine descriptor.
    pub fn by_fd_mut(&mut self, fd: RawFd) -> Option<&mut TrackedSocket> {
        self.sockets.get_mut(&fd)
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl Drop for SocketRegistry {
    fn drop(&mut self) {
        for socket in self.sockets.values_mut() {
            socket.cancel_waits();
        }
    }
}
