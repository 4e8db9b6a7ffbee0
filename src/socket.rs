//! Outbound half of a connection
//!
//! A `Socket` is the handle the core keeps for writing to one transport
//! session. Writes go into an unbounded channel drained by the session's
//! write task, so fan-out never blocks and per-connection order is FIFO.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::SessionId;

/// Queued outbound frame, shared between the recipients of one fan-out
pub type Outbound = Arc<ServerMessage>;

/// Cloneable sender for one transport session
#[derive(Debug, Clone)]
pub struct Socket {
    id: SessionId,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Socket {
    /// Wrap the sending end of a session's outbound channel
    pub fn new(id: SessionId, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, sender }
    }

    /// A socket plus the receiver its write task (or a test) drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(SessionId::new(), tx), rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a message for this session
    ///
    /// Returns an error if the session's write task is gone.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.send_shared(Arc::new(msg))
    }

    pub fn send_shared(&self, msg: Outbound) -> Result<(), SendError> {
        self.sender.send(msg).map_err(|_| SendError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Best-effort fan-out of one message to many sockets
///
/// A closed recipient is skipped; it does not fail the originating action.
pub fn broadcast<'a>(sockets: impl IntoIterator<Item = &'a Socket>, msg: ServerMessage) {
    let msg = Arc::new(msg);
    for socket in sockets {
        let _ = socket.send_shared(Arc::clone(&msg));
    }
}
