//! Server-wide hooks
//!
//! Implement `ServerCallbacks` and hand it to `ServerBuilder::callbacks`.
//! Every method has a no-op default. Hooks run inline on the caller's task,
//! so they must not block for long.

use serde_json::Value;
use tokio_tungstenite::tungstenite::handshake::server::Request;

use crate::room::Room;
use crate::user::User;

pub trait ServerCallbacks: Send + Sync {
    fn on_start(&self) {}

    fn on_pause(&self) {}

    fn on_resume(&self) {}

    fn on_shutdown(&self) {}

    /// Veto a WebSocket handshake; `false` answers 403
    fn on_client_connect(&self, _request: &Request) -> bool {
        true
    }

    /// Veto a login; `false` fails it with "Action was denied"
    fn on_login(&self, _name: &str, _database_id: i64) -> bool {
        true
    }

    fn on_logout(&self, _name: &str, _database_id: i64) {}

    /// Runs before a chat message is fanned out
    fn on_chat_message(&self, _author: &str, _room: &Room, _message: &Value) {}

    /// Runs before a server message is fanned out
    fn on_server_message(&self, _room: &Room, _sub_type: i64, _message: &Value) {}

    /// Runs before a private message is delivered
    fn on_private_message(&self, _from: &User, _to: &User, _message: &Value) {}
}

/// Callbacks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl ServerCallbacks for NoCallbacks {}
