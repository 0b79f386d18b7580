use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use epc_proto::{FrameError, FrameWriter, Message};

use crate::error::{PeerError, Result};

/// The write half of a connection.
///
/// Frames must not interleave, so every send holds the writer lock for the
/// whole frame. Once the connection is marked closed, sends fail fast
/// without touching the socket.
pub(crate) struct Outbound<W: Write> {
    writer: Mutex<FrameWriter<W>>,
    closed: AtomicBool,
}

impl<W: Write> Outbound<W> {
    pub(crate) fn new(writer: FrameWriter<W>) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PeerError::Closed);
        }
        tracing::trace!(kind = message.kind(), "sending message");
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        match writer.send_message(message) {
            Ok(()) => Ok(()),
            Err(FrameError::Closed) => {
                self.mark_closed();
                Err(PeerError::Closed)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// After this, every send returns [`PeerError::Closed`].
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
