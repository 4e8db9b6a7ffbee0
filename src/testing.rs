//! Helpers shared by the unit tests

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Settings;
use crate::server::{GameServer, ServerBuilder};
use crate::socket::{Outbound, Socket};
use crate::store::{Identity, MemoryStore};
use crate::types::ConnId;
use crate::user::{LoginRequest, SessionSlot, User};

/// Build and start a server after letting the caller configure the builder
pub(crate) fn server_with(
    settings: Settings,
    configure: impl FnOnce(ServerBuilder) -> ServerBuilder,
) -> GameServer {
    let server = configure(ServerBuilder::new(settings)).build();
    server.start().unwrap();
    server
}

pub(crate) fn server_with_store(settings: Settings, store: Arc<MemoryStore>) -> GameServer {
    server_with(settings, |builder| builder.persistence(store))
}

/// Log a fresh connection in without an account
pub(crate) fn login(server: &GameServer, name: &str) -> (Arc<User>, ConnId, UnboundedReceiver<Outbound>) {
    let (socket, rx) = Socket::channel();
    let (user, conn_id) = server
        .login(LoginRequest::new(name, socket, SessionSlot::new()))
        .unwrap();
    (user, conn_id, rx)
}

/// Log a fresh connection in as an account already signed up in `store`
pub(crate) fn login_account(
    server: &GameServer,
    store: &MemoryStore,
    name: &str,
) -> (Arc<User>, ConnId, UnboundedReceiver<Outbound>) {
    let id = store.get_user_database_index(name).unwrap();
    let (socket, rx) = Socket::channel();
    let (user, conn_id) = server
        .login(LoginRequest::new(name, socket, SessionSlot::new()).database_id(id))
        .unwrap();
    (user, conn_id, rx)
}

/// Everything queued on a receiver so far, as JSON
pub(crate) fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        frames.push(serde_json::to_value(&*msg).unwrap());
    }
    frames
}
