use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use epc_proto::{Message, Uid};
use epc_sexp::Value;

use crate::error::{PeerError, Result};
use crate::outbound::Outbound;

/// Continuation invoked with the peer's reply value.
pub type SuccessFn = Box<dyn FnOnce(Value) + Send>;

/// Continuation invoked when the call fails.
pub type ErrorFn = Box<dyn FnOnce(PeerError) + Send>;

struct PendingCall {
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
}

/// Tracks outgoing requests and routes replies back to their continuations.
///
/// Uids are assigned from a per-connection counter starting at 1, so 0
/// never appears on the wire. A pending entry is removed exactly when its
/// reply arrives or the connection tears down; a synchronous timeout leaves
/// the entry in place, so a late reply still completes instead of surfacing
/// as unknown.
pub(crate) struct CallManager {
    pending: Mutex<HashMap<Uid, PendingCall>>,
    next_uid: AtomicU64,
}

impl CallManager {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_uid: AtomicU64::new(1),
        }
    }

    fn fresh_uid(&self) -> Uid {
        self.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, uid: Uid, on_success: Option<SuccessFn>, on_error: Option<ErrorFn>) {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                uid,
                PendingCall {
                    on_success,
                    on_error,
                },
            );
    }

    fn take(&self, uid: Uid) -> Option<PendingCall> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&uid)
    }

    /// Send a `call` request. The continuations fire at most once, from
    /// the receive thread, when the reply arrives.
    pub(crate) fn call<W: Write>(
        &self,
        out: &Outbound<W>,
        method: &str,
        args: Vec<Value>,
        on_success: Option<SuccessFn>,
        on_error: Option<ErrorFn>,
    ) -> Result<Uid> {
        let uid = self.fresh_uid();
        self.insert(uid, on_success, on_error);
        let sent = out.send(&Message::Call {
            uid,
            method: method.to_string(),
            args: Value::list(args),
        });
        if let Err(err) = sent {
            // Never registered on the wire, so no reply can come.
            self.take(uid);
            return Err(err);
        }
        Ok(uid)
    }

    /// Send a `methods` introspection request.
    pub(crate) fn methods<W: Write>(
        &self,
        out: &Outbound<W>,
        on_success: Option<SuccessFn>,
        on_error: Option<ErrorFn>,
    ) -> Result<Uid> {
        let uid = self.fresh_uid();
        self.insert(uid, on_success, on_error);
        if let Err(err) = out.send(&Message::Methods { uid }) {
            self.take(uid);
            return Err(err);
        }
        Ok(uid)
    }

    /// Blocking variant of [`call`](Self::call).
    pub(crate) fn call_sync<W: Write>(
        &self,
        out: &Outbound<W>,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.wait(timeout, |on_success, on_error| {
            self.call(out, method, args, Some(on_success), Some(on_error))
        })
    }

    /// Blocking variant of [`methods`](Self::methods).
    pub(crate) fn methods_sync<W: Write>(
        &self,
        out: &Outbound<W>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.wait(timeout, |on_success, on_error| {
            self.methods(out, Some(on_success), Some(on_error))
        })
    }

    /// Issue a request with channel-backed continuations and block on the
    /// reply. The channel holds one slot; whichever continuation fires
    /// first fills it.
    fn wait<F>(&self, timeout: Option<Duration>, send: F) -> Result<Value>
    where
        F: FnOnce(SuccessFn, ErrorFn) -> Result<Uid>,
    {
        let (tx, rx) = mpsc::sync_channel::<Result<Value>>(1);
        let err_tx = tx.clone();
        send(
            Box::new(move |value| {
                let _ = tx.try_send(Ok(value));
            }),
            Box::new(move |err| {
                let _ = err_tx.try_send(Err(err));
            }),
        )?;
        match timeout {
            Some(limit) => match rx.recv_timeout(limit) {
                Ok(outcome) => outcome,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(PeerError::Timeout(limit)),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(PeerError::Closed),
            },
            None => match rx.recv() {
                Ok(outcome) => outcome,
                Err(_) => Err(PeerError::Closed),
            },
        }
    }

    /// Complete a pending call with the peer's `return` value.
    ///
    /// A uid with no pending entry (already completed, or never issued
    /// here) is reported to the caller and otherwise dropped.
    pub(crate) fn handle_return(&self, uid: Uid, value: Value) -> Result<()> {
        match self.take(uid) {
            Some(call) => {
                if let Some(on_success) = call.on_success {
                    on_success(value);
                }
                Ok(())
            }
            None => Err(PeerError::CallerUnknown {
                uid: Some(uid),
                reply: value,
            }),
        }
    }

    /// Fail a pending call with a `return-error` reply.
    pub(crate) fn handle_return_error(&self, uid: Option<Uid>, error: Value) -> Result<()> {
        self.fail(uid, |value| PeerError::Return {
            message: PeerError::reply_text(value),
        }, error)
    }

    /// Fail a pending call with an `epc-error` reply, or a locally
    /// synthesized protocol diagnosis for a malformed reply frame.
    pub(crate) fn handle_epc_error(&self, uid: Option<Uid>, error: Value) -> Result<()> {
        self.fail(uid, |value| PeerError::Epc {
            message: PeerError::reply_text(value),
        }, error)
    }

    fn fail(
        &self,
        uid: Option<Uid>,
        to_error: impl Fn(&Value) -> PeerError,
        error: Value,
    ) -> Result<()> {
        let call = uid.and_then(|uid| self.take(uid));
        match call {
            Some(PendingCall {
                on_error: Some(on_error),
                ..
            }) => {
                on_error(to_error(&error));
                Ok(())
            }
            // The caller supplied no error continuation; hand the failure
            // back so the endpoint surfaces it instead of dropping it.
            Some(_) => Err(to_error(&error)),
            None => Err(PeerError::CallerUnknown { uid, reply: error }),
        }
    }

    /// Tear down every pending call, firing [`PeerError::Closed`] into
    /// each error continuation. Runs when the connection dies so blocked
    /// synchronous callers wake up instead of hanging.
    pub(crate) fn abort_all(&self) {
        let drained: Vec<PendingCall> = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain()
            .map(|(_, call)| call)
            .collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "aborting pending calls");
        }
        for call in drained {
            if let Some(on_error) = call.on_error {
                on_error(PeerError::Closed);
            }
        }
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use epc_proto::FrameWriter;

    use super::*;

    fn outbound() -> Outbound<Vec<u8>> {
        Outbound::new(FrameWriter::new(Vec::new()))
    }

    #[test]
    fn uids_start_at_one_and_increment() {
        let calls = CallManager::new();
        let out = outbound();
        let first = calls.call(&out, "a", vec![], None, None).unwrap();
        let second = calls.call(&out, "b", vec![], None, None).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn return_fires_success_exactly_once() {
        let calls = CallManager::new();
        let out = outbound();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let uid = calls
            .call(
                &out,
                "echo",
                vec![Value::Int(55)],
                Some(Box::new(move |value| {
                    assert_eq!(value, Value::Int(55));
                    counter.fetch_add(1, Ordering::SeqCst);
                })),
                None,
            )
            .unwrap();

        calls.handle_return(uid, Value::Int(55)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(calls.pending_len(), 0);

        // The duplicate finds no pending entry.
        assert!(matches!(
            calls.handle_return(uid, Value::Int(55)),
            Err(PeerError::CallerUnknown { uid: Some(1), .. })
        ));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn return_error_fires_error_continuation() {
        let calls = CallManager::new();
        let out = outbound();
        let (tx, rx) = mpsc::channel();
        let uid = calls
            .call(
                &out,
                "bad",
                vec![],
                None,
                Some(Box::new(move |err| tx.send(err).unwrap())),
            )
            .unwrap();

        calls
            .handle_return_error(Some(uid), Value::string("ValueError: bad"))
            .unwrap();
        match rx.recv().unwrap() {
            PeerError::Return { message } => assert_eq!(message, "ValueError: bad"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn error_reply_without_error_continuation_surfaces() {
        let calls = CallManager::new();
        let out = outbound();
        let uid = calls.call(&out, "boom", vec![], None, None).unwrap();

        match calls.handle_return_error(Some(uid), Value::string("ValueError: bad")) {
            Err(PeerError::Return { message }) => assert_eq!(message, "ValueError: bad"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(calls.pending_len(), 0);

        let uid = calls.call(&out, "boom", vec![], None, None).unwrap();
        match calls.handle_epc_error(Some(uid), Value::string("parse error")) {
            Err(PeerError::Epc { message }) => assert_eq!(message, "parse error"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn error_with_nil_uid_is_caller_unknown() {
        let calls = CallManager::new();
        assert!(matches!(
            calls.handle_epc_error(None, Value::string("parse error")),
            Err(PeerError::CallerUnknown { uid: None, .. })
        ));
    }

    #[test]
    fn failed_send_leaves_no_pending_entry() {
        let calls = CallManager::new();
        let out = outbound();
        out.mark_closed();
        assert!(matches!(
            calls.call(&out, "echo", vec![], None, None),
            Err(PeerError::Closed)
        ));
        assert_eq!(calls.pending_len(), 0);
    }

    #[test]
    fn abort_all_fires_closed_into_continuations() {
        let calls = CallManager::new();
        let out = outbound();
        let (tx, rx) = mpsc::channel();
        calls
            .call(
                &out,
                "never-answered",
                vec![],
                None,
                Some(Box::new(move |err| tx.send(err).unwrap())),
            )
            .unwrap();

        calls.abort_all();
        assert!(matches!(rx.recv().unwrap(), PeerError::Closed));
        assert_eq!(calls.pending_len(), 0);
    }

    #[test]
    fn sync_timeout_keeps_entry_pending() {
        let calls = CallManager::new();
        let out = outbound();
        let result = calls.call_sync(&out, "slow", vec![], Some(Duration::from_millis(10)));
        assert!(matches!(result, Err(PeerError::Timeout(_))));
        // The late reply still completes through the channel continuation.
        assert_eq!(calls.pending_len(), 1);
        calls.handle_return(1, Value::Nil).unwrap();
        assert_eq!(calls.pending_len(), 0);
    }
}
