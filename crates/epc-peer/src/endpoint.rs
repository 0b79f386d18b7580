use std::net::{Shutdown, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use epc_proto::{FrameConfig, FrameReader, FrameWriter, GrammarError, Message, MessageError, Uid};
use epc_sexp::Value;

use crate::call::{CallManager, ErrorFn, SuccessFn};
use crate::error::{PeerError, Result};
use crate::outbound::Outbound;
use crate::registry::{LookupError, Registry};

/// How incoming requests are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Run each handler on the receive thread. Replies keep request
    /// order; a slow handler stalls the connection.
    #[default]
    Serial,
    /// Run each handler on its own thread. Replies may arrive out of
    /// request order, which the uid protocol is built for.
    ThreadPerCall,
}

/// Per-connection tuning knobs.
#[derive(Clone, Default)]
pub struct EndpointConfig {
    pub dispatch: DispatchPolicy,
    /// Largest accepted or produced frame payload, in bytes.
    pub max_payload_size: Option<usize>,
    /// Observer for errors with no caller to deliver them to, such as a
    /// reply for an unknown uid. Errors are logged either way.
    pub on_unhandled_error: Option<Arc<dyn Fn(&PeerError) + Send + Sync>>,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("dispatch", &self.dispatch)
            .field("max_payload_size", &self.max_payload_size)
            .field("on_unhandled_error", &self.on_unhandled_error.is_some())
            .finish()
    }
}

impl EndpointConfig {
    fn frame_config(&self) -> FrameConfig {
        match self.max_payload_size {
            Some(max_payload_size) => FrameConfig { max_payload_size },
            None => FrameConfig::default(),
        }
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, receive loop not yet running.
    Idle,
    /// Receive loop running, requests and replies flowing.
    Active,
    /// Torn down. Terminal; an endpoint is never reused.
    Closed,
}

struct Shared {
    registry: Arc<Registry>,
    calls: CallManager,
    outbound: Outbound<TcpStream>,
    shutdown_stream: TcpStream,
    state: Mutex<State>,
    config: EndpointConfig,
    peer_addr: String,
}

/// One end of an EPC connection.
///
/// Both sides are symmetric: each endpoint serves its registry to the peer
/// and issues calls of its own over the same stream. Dropping the endpoint
/// does not close the connection; call [`close`](Endpoint::close).
pub struct Endpoint {
    shared: Arc<Shared>,
    reader: Mutex<Option<FrameReader<TcpStream>>>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Endpoint {
    /// Wrap a connected stream. The endpoint stays [`State::Idle`] until
    /// [`start`](Endpoint::start) spawns the receive loop.
    pub fn new(stream: TcpStream, registry: Arc<Registry>, config: EndpointConfig) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let frame_config = config.frame_config();
        let reader = FrameReader::with_config(stream.try_clone()?, frame_config.clone());
        let shutdown_stream = stream.try_clone()?;
        let outbound = Outbound::new(FrameWriter::with_config(stream, frame_config));

        Ok(Self {
            shared: Arc::new(Shared {
                registry,
                calls: CallManager::new(),
                outbound,
                shutdown_stream,
                state: Mutex::new(State::Idle),
                config,
                peer_addr,
            }),
            reader: Mutex::new(Some(reader)),
            recv_thread: Mutex::new(None),
        })
    }

    /// Spawn the receive loop. Calling on an already started or closed
    /// endpoint is a no-op.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state != State::Idle {
                return Ok(());
            }
            *state = State::Active;
        }
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let reader = match reader {
            Some(reader) => reader,
            None => return Ok(()),
        };
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("epc-recv-{}", self.shared.peer_addr))
            .spawn(move || shared.recv_loop(reader))?;
        *self
            .recv_thread
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    pub fn state(&self) -> State {
        *self.shared.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Address of the peer, for logs.
    pub fn peer_addr(&self) -> &str {
        &self.shared.peer_addr
    }

    /// Invoke `method` on the peer. The continuations fire at most once,
    /// from the receive thread, when the reply arrives.
    pub fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        on_success: Option<SuccessFn>,
        on_error: Option<ErrorFn>,
    ) -> Result<Uid> {
        self.shared
            .calls
            .call(&self.shared.outbound, method, args, on_success, on_error)
    }

    /// Ask the peer to enumerate its methods.
    pub fn methods(&self, on_success: Option<SuccessFn>, on_error: Option<ErrorFn>) -> Result<Uid> {
        self.shared
            .calls
            .methods(&self.shared.outbound, on_success, on_error)
    }

    /// Invoke `method` on the peer and block for the result.
    ///
    /// On timeout the call stays pending; a reply that arrives later is
    /// quietly dropped into the abandoned channel.
    pub fn call_sync(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.shared
            .calls
            .call_sync(&self.shared.outbound, method, args, timeout)
    }

    /// Blocking variant of [`methods`](Endpoint::methods).
    pub fn methods_sync(&self, timeout: Option<Duration>) -> Result<Value> {
        self.shared.calls.methods_sync(&self.shared.outbound, timeout)
    }

    /// Tear the connection down: further sends fail, pending calls fail
    /// with [`PeerError::Closed`], the receive loop stops. Idempotent.
    pub fn close(&self) {
        self.shared.shutdown();
    }

    /// Block until the receive loop exits.
    pub fn join(&self) -> Result<()> {
        let handle = self
            .recv_thread
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| PeerError::Io(std::io::Error::other("receive thread panicked")))?;
        }
        Ok(())
    }
}

impl Shared {
    fn recv_loop(self: Arc<Self>, mut reader: FrameReader<TcpStream>) {
        tracing::debug!(peer = %self.peer_addr, "receive loop started");
        loop {
            match reader.read_frame() {
                Ok(payload) => self.dispatch_frame(&payload),
                Err(err) if err.is_clean_eof() => {
                    tracing::debug!(peer = %self.peer_addr, "peer closed the connection");
                    break;
                }
                Err(err) => {
                    // BadHeader, Truncated, and I/O errors all mean frame
                    // boundaries can no longer be trusted.
                    if *self.state.lock().unwrap_or_else(|p| p.into_inner()) != State::Closed {
                        tracing::error!(peer = %self.peer_addr, error = %err, "fatal receive error");
                        self.report(&PeerError::Frame(err));
                    }
                    break;
                }
            }
        }
        self.shutdown();
        tracing::debug!(peer = %self.peer_addr, "receive loop finished");
    }

    fn dispatch_frame(self: &Arc<Self>, payload: &[u8]) {
        match Message::decode(payload) {
            Ok(Message::Call { uid, method, args }) => {
                self.dispatch_request(move |shared| shared.handle_call(uid, &method, args));
            }
            Ok(Message::Methods { uid }) => {
                self.dispatch_request(move |shared| shared.handle_methods(uid));
            }
            Ok(Message::Return { uid, value }) => {
                if let Err(err) = self.calls.handle_return(uid, value) {
                    self.report(&err);
                }
            }
            Ok(Message::ReturnError { uid, error }) => {
                if let Err(err) = self.calls.handle_return_error(uid, error) {
                    self.report(&err);
                }
            }
            Ok(Message::EpcError { uid, error }) => {
                if let Err(err) = self.calls.handle_epc_error(uid, error) {
                    self.report(&err);
                }
            }
            Err(err) => self.handle_malformed(err),
        }
    }

    /// Run one request handler under the configured dispatch policy.
    fn dispatch_request<F>(self: &Arc<Self>, handler: F)
    where
        F: FnOnce(&Shared) + Send + 'static,
    {
        match self.config.dispatch {
            DispatchPolicy::Serial => handler(self),
            DispatchPolicy::ThreadPerCall => {
                // The slot lets the handler survive a failed spawn so the
                // request still runs, inline, instead of being dropped.
                let slot = Arc::new(Mutex::new(Some(handler)));
                let spawned = {
                    let slot = Arc::clone(&slot);
                    let shared = Arc::clone(self);
                    thread::Builder::new()
                        .name(format!("epc-call-{}", self.peer_addr))
                        .spawn(move || {
                            let handler = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
                            if let Some(handler) = handler {
                                handler(&shared);
                            }
                        })
                };
                if let Err(err) = spawned {
                    tracing::warn!(error = %err, "spawn failed; handling request inline");
                    let handler = slot.lock().unwrap_or_else(|p| p.into_inner()).take();
                    if let Some(handler) = handler {
                        handler(self);
                    }
                }
            }
        }
    }

    /// Answer a frame that decoded into no message.
    ///
    /// Requests with a recoverable uid get their error back under that
    /// uid; anything else gets `epc-error` with a `nil` uid, except
    /// malformed replies, which have no reply channel and instead fail the
    /// local pending call.
    fn handle_malformed(&self, err: MessageError) {
        tracing::warn!(peer = %self.peer_addr, error = %err, "malformed message");
        match err {
            MessageError::Utf8(_) | MessageError::Sexp(_) => {
                self.send_epc_error(None, err.to_string());
            }
            MessageError::Grammar(grammar) => match grammar {
                GrammarError::ReturnArity { uid, .. } => {
                    let text = Value::string(grammar.to_string());
                    if let Err(err) = self.calls.handle_epc_error(Some(uid), text) {
                        self.report(&err);
                    }
                }
                GrammarError::UnknownKind { uid: Some(uid), ref kind } => {
                    self.send(&Message::ReturnError {
                        uid: Some(uid),
                        error: Value::string(format!("Unknown message kind: {kind}")),
                    });
                }
                _ => self.send_epc_error(grammar.reply_uid(), grammar.to_string()),
            },
        }
    }

    fn handle_call(&self, uid: Uid, method: &str, args: Value) {
        let args = match normalize_args(args) {
            Ok(args) => args,
            Err(text) => {
                self.send(&Message::ReturnError {
                    uid: Some(uid),
                    error: Value::string(text),
                });
                return;
            }
        };

        let func = match self.registry.lookup(method) {
            Ok(func) => func,
            Err(err) => {
                match &err {
                    LookupError::Private(name) => {
                        tracing::warn!(peer = %self.peer_addr, name, "call to private member denied")
                    }
                    LookupError::NotFound(name) => {
                        tracing::debug!(peer = %self.peer_addr, name, "call to unknown method")
                    }
                }
                // Both cases read the same on the wire.
                self.send_epc_error(Some(uid), format!("EPC-ERROR: No such method : {method}"));
                return;
            }
        };

        tracing::debug!(peer = %self.peer_addr, uid, method, "invoking method");
        match catch_unwind(AssertUnwindSafe(|| func(&args))) {
            Ok(Ok(value)) => self.send(&Message::Return { uid, value }),
            Ok(Err(err)) => self.send(&Message::ReturnError {
                uid: Some(uid),
                error: Value::string(err.to_string()),
            }),
            Err(panic) => {
                let text = panic_text(panic);
                tracing::error!(peer = %self.peer_addr, uid, method, panic = %text, "method panicked");
                self.send(&Message::ReturnError {
                    uid: Some(uid),
                    error: Value::string(format!("method panicked: {text}")),
                });
            }
        }
    }

    fn handle_methods(&self, uid: Uid) {
        let listing = self
            .registry
            .snapshot()
            .iter()
            .map(|info| info.to_value())
            .collect();
        self.send(&Message::Return {
            uid,
            value: Value::list(listing),
        });
    }

    fn send(&self, message: &Message) {
        if let Err(err) = self.outbound.send(message) {
            tracing::warn!(peer = %self.peer_addr, error = %err, "reply not sent");
            self.report(&err);
        }
    }

    fn send_epc_error(&self, uid: Option<Uid>, text: String) {
        self.send(&Message::EpcError {
            uid,
            error: Value::string(text),
        });
    }

    /// Surface an error that has no caller waiting on it.
    fn report(&self, err: &PeerError) {
        tracing::warn!(peer = %self.peer_addr, error = %err, "unhandled connection error");
        if let Some(hook) = &self.config.on_unhandled_error {
            hook(err);
        }
    }

    /// Idempotent teardown shared by `close`, EOF, and fatal errors.
    fn shutdown(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if *state == State::Closed {
                return;
            }
            *state = State::Closed;
        }
        tracing::debug!(peer = %self.peer_addr, "closing connection");
        self.outbound.mark_closed();
        // Unblocks the receive loop if it is parked in read().
        let _ = self.shutdown_stream.shutdown(Shutdown::Both);
        self.calls.abort_all();
    }
}

/// The args field of a `call` must be a list; `nil` is the empty list.
fn normalize_args(args: Value) -> std::result::Result<Vec<Value>, String> {
    if args.is_nil() {
        return Ok(Vec::new());
    }
    match args {
        Value::List(items) => Ok(items),
        other => Err(format!("arguments must be a list, got: {other}")),
    }
}

fn panic_text(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
