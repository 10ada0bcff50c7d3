//! Engine backed by libcurl's multi-socket interface.
//!
//! # Responsibilities
//! - Build one easy transfer per [`OutboundCall`] and add it to the multi handle
//! - Forward libcurl's socket, timer, open-socket and close-socket callbacks
//!   to the [`EngineHooks`]
//! - Keep the token → transfer ownership table and drain finished transfers
//!
//! libcurl invokes every callback synchronously from inside
//! `curl_multi_socket_action` (or `curl_multi_add_handle`), which only ever
//! runs on the bridge's serialized context.

use std::collections::HashMap;
use std::ffi::{c_int, c_void};
use std::os::fd::RawFd;
use std::sync::Arc;

use curl::easy::{Easy2, Handler, WriteError};
use curl::multi::{Easy2Handle, Events, Multi, SocketEvents};
use socket2::{Domain, Protocol, Type};

use crate::bridge::call::{CallOutcome, CompletedCall, OutboundCall};
use crate::bridge::engine::{
    EngineError, Interest, MultiEngine, Rejected, SharedHooks, SocketEvent,
    TimerRequest,
};
use crate::config::EngineConfig;

// Not wrapped by the `curl` crate.
const CURLOPT_CLOSESOCKETFUNCTION: curl_sys::CURLoption = curl_sys::CURLOPTTYPE_FUNCTIONPOINT + 208;
const CURLOPT_CLOSESOCKETDATA: curl_sys::CURLoption = curl_sys::CURLOPTTYPE_OBJECTPOINT + 209;

type CloseSocketCallback = extern "C" fn(*mut c_void, curl_sys::curl_socket_t) -> c_int;

/// Per-transfer handler: accumulates the body and routes socket creation.
struct Collector {
    body: Vec<u8>,
    hooks: SharedHooks,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn open_socket(
        &mut self,
        family: c_int,
        socktype: c_int,
        protocol: c_int,
    ) -> Option<curl_sys::curl_socket_t> {
        self.hooks.open_socket(
            Domain::from(family),
            Type::from(socktype),
            Protocol::from(protocol),
        )
    }
}

extern "C" fn close_socket(clientp: *mut c_void, fd: curl_sys::curl_socket_t) -> c_int {
    // SAFETY: clientp points at the `SharedHooks` boxed inside `CurlEngine`,
    // which is dropped only after the multi handle and all its connections.
    let hooks = unsafe { &*(clientp as *const SharedHooks) };
    hooks.close_socket(fd);
    0
}

/// A refused close-socket option would leave libcurl closing descriptors
/// the registry still owns.
fn setopt_result(code: curl_sys::CURLcode) -> Result<(), EngineError> {
    if code == curl_sys::CURLE_OK {
        Ok(())
    } else {
        Err(EngineError::Transfer(curl::Error::new(code)))
    }
}

struct InFlight {
    handle: Easy2Handle<Collector>,
    call: OutboundCall,
}

/// [`MultiEngine`] implementation over `curl::multi::Multi`.
pub struct CurlEngine {
    // Field order matters: transfers detach from the multi handle first, then
    // the multi handle closes its cached connections through `close_hooks`.
    transfers: HashMap<usize, InFlight>,
    multi: Multi,
    close_hooks: Box<SharedHooks>,
    next_token: usize,
    config: EngineConfig,
}

impl CurlEngine {
    pub fn new(config: EngineConfig, hooks: SharedHooks) -> Result<Self, EngineError> {
        let mut multi = Multi::new();

        let socket_hooks = Arc::clone(&hooks);
        multi.socket_function(move |fd, events, _token| {
            socket_hooks.watch(fd, interest_from(&events));
        })?;

        let timer_hooks = Arc::clone(&hooks);
        multi.timer_function(move |timeout| {
            timer_hooks.set_timer(TimerRequest::from_timeout(timeout));
            true
        })?;

        Ok(Self {
            transfers: HashMap::new(),
            multi,
            close_hooks: Box::new(hooks),
            next_token: 0,
            config,
        })
    }

    fn prepare(&self, call: &OutboundCall) -> Result<Easy2<Collector>, EngineError> {
        let mut easy = Easy2::new(Collector {
            body: Vec::new(),
            hooks: Arc::clone(&*self.close_hooks),
        });
        easy.url(call.url())?;
        easy.get(true)?;
        easy.useragent(&self.config.user_agent)?;
        easy.connect_timeout(self.config.connect_timeout())?;
        easy.timeout(self.config.transfer_timeout())?;
        easy.signal(false)?;
        // The target is addressed directly; proxy environment variables do not apply.
        easy.proxy("")?;

        let data: *const SharedHooks = &*self.close_hooks;
        // SAFETY: the callback signature matches curl_closesocket_callback and
        // `data` outlives every connection created by this engine.
        unsafe {
            let raw = easy.raw();
            setopt_result(curl_sys::curl_easy_setopt(
                raw,
                CURLOPT_CLOSESOCKETFUNCTION,
                close_socket as CloseSocketCallback,
            ))?;
            setopt_result(curl_sys::curl_easy_setopt(
                raw,
                CURLOPT_CLOSESOCKETDATA,
                data as *mut c_void,
            ))?;
        }
        Ok(easy)
    }

    fn finish(&mut self, token: usize, result: Result<(), curl::Error>) -> Option<CompletedCall> {
        let InFlight { handle, call } = match self.transfers.remove(&token) {
            Some(in_flight) => in_flight,
            None => {
                tracing::warn!(token, "Completion for unknown transfer");
                return None;
            }
        };

        let mut easy = match self.multi.remove2(handle) {
            Ok(easy) => easy,
            Err(e) => {
                tracing::warn!(call_id = %call.id(), error = %e, "Failed to detach transfer");
                return Some(call.complete(CallOutcome::TransportFailed {
                    reason: e.to_string(),
                }));
            }
        };

        let outcome = match result {
            Ok(()) => CallOutcome::Responded {
                status: easy.response_code().unwrap_or(0),
                body: std::mem::take(&mut easy.get_mut().body),
            },
            Err(e) => CallOutcome::TransportFailed {
                reason: e.to_string(),
            },
        };
        Some(call.complete(outcome))
    }
}

fn interest_from(events: &SocketEvents) -> Interest {
    if events.remove() {
        return Interest::None;
    }
    match (events.input(), events.output()) {
        (true, true) => Interest::Both,
        (true, false) => Interest::Read,
        (false, true) => Interest::Write,
        (false, false) => Interest::None,
    }
}

impl MultiEngine for CurlEngine {
    fn add(&mut self, call: OutboundCall) -> Result<(), Rejected> {
        let easy = match self.prepare(&call) {
            Ok(easy) => easy,
            Err(error) => return Err(Rejected { call, error }),
        };
        let mut handle = match self.multi.add2(easy) {
            Ok(handle) => handle,
            Err(e) => return Err(Rejected { call, error: e.into() }),
        };

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        if let Err(e) = handle.set_token(token) {
            // Dropping the handle detaches it from the multi handle.
            drop(handle);
            return Err(Rejected { call, error: e.into() });
        }

        tracing::debug!(call_id = %call.id(), token, url = %call.url(), "Transfer added");
        self.transfers.insert(token, InFlight { handle, call });
        Ok(())
    }

    fn socket_action(&mut self, fd: RawFd, event: SocketEvent) -> Result<u32, EngineError> {
        let mut events = Events::new();
        match event {
            SocketEvent::Readable => events.input(true),
            SocketEvent::Writable => events.output(true),
            SocketEvent::Error => events.error(true),
        };
        Ok(self.multi.action(fd, &events)?)
    }

    fn timeout_action(&mut self) -> Result<u32, EngineError> {
        Ok(self.multi.timeout()?)
    }

    fn take_completed(&mut self) -> Vec<CompletedCall> {
        let mut finished = Vec::new();
        self.multi.messages(|message| {
            if let (Ok(token), Some(result)) = (message.token(), message.result()) {
                finished.push((token, result));
            }
        });

        finished
            .into_iter()
            .filter_map(|(token, result)| self.finish(token, result))
            .collect()
    }

    fn in_flight(&self) -> usize {
        self.transfers.len()
    }

    fn abandon(&mut self) -> Vec<OutboundCall> {
        let tokens: Vec<usize> = self.transfers.keys().copied().collect();
        let mut calls = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(InFlight { handle, call }) = self.transfers.remove(&token) {
                if let Err(e) = self.multi.remove2(handle) {
                    tracing::warn!(call_id = %call.id(), error = %e, "Failed to detach abandoned transfer");
                }
                calls.push(call);
            }
        }
        calls
    }
}

impl Drop for CurlEngine {
    fn drop(&mut self) {
        if !self.transfers.is_empty() {
            tracing::warn!(
                in_flight = self.transfers.len(),
                "Engine dropped with transfers in flight"
            );
        }
    }
}

/// Factory for [`crate::bridge::dispatch::spawn_bridge`].
pub fn factory(config: EngineConfig) -> impl FnOnce(SharedHooks) -> Result<CurlEngine, EngineError> {
    move |hooks| CurlEngine::new(config, hooks)
}
