//! Users and their connections
//!
//! A `User` exists in the registry while it has at least one connection.
//! Each connection carries its socket, the session slot its dispatcher reads
//! to find the user, an optional pointer to the room it is in, and its own
//! variables. Status, friends and connections share one mutex.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{GameError, Param};
use crate::friends::Friend;
use crate::message::{action, ServerMessage};
use crate::room::Room;
use crate::server::Shared;
use crate::socket::{broadcast, Socket};
use crate::types::{ConnId, FriendStatus, UserStatus};

/// What a session is logged in as
#[derive(Debug, Clone)]
pub struct Attachment {
    pub user: Arc<User>,
    pub conn_id: ConnId,
}

/// A session's pointer to its user
///
/// Owned by the session and shared with the user's connection entry so
/// logout, kick and pause can clear it while the session is mid-frame.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot(Arc<Mutex<Option<Attachment>>>);

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Attachment> {
        self.0.lock().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.0.lock().is_some()
    }

    fn set(&self, user: Arc<User>, conn_id: ConnId) {
        *self.0.lock() = Some(Attachment { user, conn_id });
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }
}

/// Parameters of a login
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub name: String,
    /// -1 for users without an account
    pub database_id: i64,
    /// Autologin pass to hand back when remember-me is active
    pub autolog_pass: Option<String>,
    pub guest: bool,
    pub remember_me: bool,
    pub socket: Socket,
    pub session: SessionSlot,
}

impl LoginRequest {
    /// Login without an account
    pub fn new(name: impl Into<String>, socket: Socket, session: SessionSlot) -> Self {
        Self {
            name: name.into(),
            database_id: -1,
            autolog_pass: None,
            guest: false,
            remember_me: false,
            socket,
            session,
        }
    }

    pub fn guest(mut self) -> Self {
        self.guest = true;
        self
    }

    pub fn database_id(mut self, id: i64) -> Self {
        self.database_id = id;
        self
    }
}

pub(crate) struct UserConn {
    socket: Socket,
    session: SessionSlot,
    room: Option<Weak<Room>>,
    vars: HashMap<String, Value>,
}

impl UserConn {
    fn new(socket: Socket, session: SessionSlot) -> Self {
        Self {
            socket,
            session,
            room: None,
            vars: HashMap::new(),
        }
    }

    fn current_room(&self) -> Option<Arc<Room>> {
        self.room.as_ref().and_then(Weak::upgrade)
    }
}

pub(crate) struct UserState {
    pub(crate) status: UserStatus,
    pub(crate) friends: HashMap<String, Friend>,
    conns: HashMap<ConnId, UserConn>,
}

pub struct User {
    name: String,
    database_id: i64,
    guest: bool,
    shared: Weak<Shared>,
    pub(crate) state: Mutex<UserState>,
}

impl User {
    /// Log a connection in, creating the user or attaching to it
    ///
    /// Returns the user and the connection id assigned to this session.
    pub(crate) fn login(
        shared: &Arc<Shared>,
        req: LoginRequest,
    ) -> Result<(Arc<User>, ConnId), GameError> {
        if shared.is_paused() {
            return Err(GameError::ServerPaused);
        }
        if req.name.is_empty() {
            return Err(GameError::RequiredName);
        }
        if req.name == shared.settings.server_name {
            return Err(GameError::NameUnavail);
        }
        if req.database_id < -1 {
            return Err(GameError::RequiredId);
        }
        if !shared.callbacks.on_login(&req.name, req.database_id) {
            return Err(GameError::ActionDenied);
        }

        let database_id = if req.guest { -1 } else { req.database_id };
        let settings = &shared.settings;

        let stored_friends = match &shared.identity {
            Some(identity) if database_id >= 0 => match identity.get_friends(database_id) {
                Ok(friends) => friends,
                Err(e) => {
                    warn!(user = %req.name, error = %e, "Failed to load friends");
                    HashMap::new()
                }
            },
            _ => HashMap::new(),
        };

        let mut evicted = None;
        let (user, conn_id, friend_list) = {
            let mut users = shared.users.lock();
            // pause sets the flag before draining under this lock
            if shared.is_paused() {
                return Err(GameError::ServerPaused);
            }
            let (user, conn_id) = match users.get(&req.name).cloned() {
                Some(incumbent) if settings.kick_on_login => {
                    users.remove(&req.name);
                    evicted = Some((Arc::clone(&incumbent), incumbent.drain_connections()));
                    let created = User::create(shared, &req, database_id, stored_friends);
                    users.insert(req.name.clone(), Arc::clone(&created.0));
                    created
                }
                Some(incumbent) if settings.multi_connect => {
                    let conn_id = incumbent.attach_connection(&req);
                    (incumbent, conn_id)
                }
                Some(_) => return Err(GameError::AlreadyLoggedIn),
                None => {
                    let created = User::create(shared, &req, database_id, stored_friends);
                    users.insert(req.name.clone(), Arc::clone(&created.0));
                    created
                }
            };

            let friends: Vec<Friend> = user.state.lock().friends.values().cloned().collect();
            let friend_list: Vec<Value> = friends
                .iter()
                .map(|friend| {
                    let mut entry = json!({"n": friend.name, "rs": friend.status});
                    if friend.status == FriendStatus::Accepted {
                        let status = users
                            .get(&friend.name)
                            .map_or(UserStatus::Offline, |online| online.status());
                        entry["s"] = json!(status);
                    }
                    entry
                })
                .collect();
            (user, conn_id, friend_list)
        };

        if let Some((incumbent, conns)) = evicted {
            info!(user = %incumbent.name, "Kicking previous login");
            incumbent.evict(conns);
        }

        user.broadcast_to_friends(
            shared,
            ServerMessage::FriendStatus {
                n: user.name.clone(),
                s: user.status(),
            },
        );

        let mut body = json!({"n": user.name, "f": friend_list});
        if settings.remember_me && req.remember_me {
            if let Some(pass) = &req.autolog_pass {
                body["ai"] = json!(database_id);
                body["ap"] = json!(pass);
            }
        }
        let _ = req.socket.send(ServerMessage::ok(action::LOGIN, body));

        info!(user = %user.name, conn = %conn_id, guest = user.guest, "User logged in");
        Ok((user, conn_id))
    }

    /// New user holding the request's connection; the caller registers it
    fn create(
        shared: &Arc<Shared>,
        req: &LoginRequest,
        database_id: i64,
        friends: HashMap<String, Friend>,
    ) -> (Arc<User>, ConnId) {
        let conn_id = if shared.settings.multi_connect {
            ConnId::generate()
        } else {
            ConnId::single()
        };
        let mut conns = HashMap::new();
        conns.insert(
            conn_id.clone(),
            UserConn::new(req.socket.clone(), req.session.clone()),
        );
        let user = Arc::new(User {
            name: req.name.clone(),
            database_id,
            guest: req.guest,
            shared: Arc::downgrade(shared),
            state: Mutex::new(UserState {
                status: UserStatus::Available,
                friends,
                conns,
            }),
        });
        req.session.set(Arc::clone(&user), conn_id.clone());
        (user, conn_id)
    }

    /// Add another connection under a fresh, unique id
    fn attach_connection(self: &Arc<Self>, req: &LoginRequest) -> ConnId {
        let mut state = self.state.lock();
        let conn_id = loop {
            let candidate = ConnId::generate();
            if !state.conns.contains_key(&candidate) {
                break candidate;
            }
        };
        state.conns.insert(
            conn_id.clone(),
            UserConn::new(req.socket.clone(), req.session.clone()),
        );
        req.session.set(Arc::clone(self), conn_id.clone());
        conn_id
    }

    /// Detach every connection and clear their session slots
    pub(crate) fn drain_connections(&self) -> Vec<(ConnId, UserConn)> {
        let mut state = self.state.lock();
        let conns: Vec<(ConnId, UserConn)> = state.conns.drain().collect();
        for (_, conn) in &conns {
            conn.session.clear();
        }
        conns
    }

    /// Take drained connections out of their rooms and tell them they are logged out
    pub(crate) fn evict(self: &Arc<Self>, conns: Vec<(ConnId, UserConn)>) {
        for (conn_id, conn) in conns {
            if let Some(room) = conn.current_room() {
                let _ = room.remove_user(self, &conn_id);
            }
            let _ = conn.socket.send(ServerMessage::ok(action::LOGOUT, Value::Null));
        }
    }

    /// Log one connection out
    ///
    /// Leaves its room, clears its session slot and, if it was the last
    /// connection, removes the user and tells online friends it went offline.
    pub fn logout(self: &Arc<Self>, conn_id: &ConnId) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if let Some(room) = self.room(conn_id) {
            let _ = room.remove_user(self, conn_id);
        }

        let (conn, last) = {
            let mut users = shared.users.lock();
            let mut state = self.state.lock();
            let Some(conn) = state.conns.remove(conn_id) else {
                return;
            };
            conn.session.clear();
            let last = state.conns.is_empty();
            if last
                && users
                    .get(&self.name)
                    .is_some_and(|registered| Arc::ptr_eq(registered, self))
            {
                users.remove(&self.name);
            }
            (conn, last)
        };

        if last {
            self.broadcast_to_friends(
                &shared,
                ServerMessage::FriendStatus {
                    n: self.name.clone(),
                    s: UserStatus::Offline,
                },
            );
        }
        let _ = conn.socket.send(ServerMessage::ok(action::LOGOUT, Value::Null));
        shared.callbacks.on_logout(&self.name, self.database_id);
        info!(user = %self.name, conn = %conn_id, "User logged out");
    }

    /// Log out every connection and drop the user from the registry
    pub fn kick(self: &Arc<Self>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut users = shared.users.lock();
            if users
                .get(&self.name)
                .is_some_and(|registered| Arc::ptr_eq(registered, self))
            {
                users.remove(&self.name);
            }
        }
        let conns = self.drain_connections();
        self.evict(conns);
        self.broadcast_to_friends(
            &shared,
            ServerMessage::FriendStatus {
                n: self.name.clone(),
                s: UserStatus::Offline,
            },
        );
        shared.callbacks.on_logout(&self.name, self.database_id);
        info!(user = %self.name, "User kicked");
    }

    /// Move a connection into a room, leaving its current one first
    pub fn join(self: &Arc<Self>, room: &Arc<Room>, conn_id: &ConnId) -> Result<(), GameError> {
        let current = {
            let state = self.state.lock();
            let conn = state
                .conns
                .get(conn_id)
                .ok_or_else(|| GameError::Join("Invalid connection ID".to_string()))?;
            conn.current_room()
        };
        if let Some(current) = current {
            if Arc::ptr_eq(&current, room) {
                return Err(GameError::Join(format!(
                    "User '{}' is already in room '{}'",
                    self.name,
                    room.name()
                )));
            }
            current.remove_user(self, conn_id)?;
        }
        room.add_user(self, conn_id)
    }

    pub fn leave(self: &Arc<Self>, conn_id: &ConnId) -> Result<(), GameError> {
        let room = self
            .room(conn_id)
            .ok_or_else(|| GameError::Leave(format!("User '{}' is not in a room", self.name)))?;
        room.remove_user(self, conn_id)
    }

    pub fn set_status(&self, status: UserStatus) {
        self.state.lock().status = status;
        if let Some(shared) = self.shared.upgrade() {
            self.broadcast_to_friends(
                &shared,
                ServerMessage::FriendStatus {
                    n: self.name.clone(),
                    s: status,
                },
            );
        }
    }

    /// Invite a user into the private room this connection is in
    pub fn invite(&self, invited: &Arc<User>, conn_id: &ConnId) -> Result<(), GameError> {
        let room = self.controlled_room(conn_id, GameError::Invite)?;
        room.add_invite(invited.name())?;
        invited.send_all(ServerMessage::RoomInvite {
            u: self.name.clone(),
            r: room.name().to_string(),
        });
        debug!(room = %room.name(), user = %self.name, invited = %invited.name(), "Invite sent");
        Ok(())
    }

    pub fn revoke_invite(&self, name: &str, conn_id: &ConnId) -> Result<(), GameError> {
        let room = self.controlled_room(conn_id, GameError::RevokeInvite)?;
        room.remove_invite(name)
    }

    /// The room this connection is in, if this user may manage its invites
    fn controlled_room(
        &self,
        conn_id: &ConnId,
        kind: fn(String) -> GameError,
    ) -> Result<Arc<Room>, GameError> {
        let room = self
            .room(conn_id)
            .ok_or_else(|| kind(format!("The user '{}' is not in a room", self.name)))?;
        if !room.is_private() {
            return Err(kind("Room is not private".to_string()));
        }
        if room.owner() != self.name {
            return Err(GameError::NotOwner(format!(
                "The user '{}' is not the owner of the room '{}'",
                self.name,
                room.name()
            )));
        }
        if room.room_type().is_server_only() {
            return Err(GameError::ServerRoom);
        }
        Ok(room)
    }

    /// Set a connection variable and echo it back on that connection
    pub fn set_variable(&self, key: &str, value: Value, conn_id: &ConnId) -> Result<(), GameError> {
        if key.is_empty() {
            return Err(GameError::IncorrectFormat(Param::VarKey));
        }
        let socket = {
            let mut state = self.state.lock();
            let conn = state
                .conns
                .get_mut(conn_id)
                .ok_or_else(|| GameError::Unexpected("Invalid connection ID".to_string()))?;
            conn.vars.insert(key.to_string(), value.clone());
            conn.socket.clone()
        };
        let _ = socket.send(ServerMessage::ok(
            action::SET_VARIABLE,
            json!({"k": key, "v": value}),
        ));
        Ok(())
    }

    pub fn set_variables(
        &self,
        values: HashMap<String, Value>,
        conn_id: &ConnId,
    ) -> Result<(), GameError> {
        let body: serde_json::Map<String, Value> = values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let socket = {
            let mut state = self.state.lock();
            let conn = state
                .conns
                .get_mut(conn_id)
                .ok_or_else(|| GameError::Unexpected("Invalid connection ID".to_string()))?;
            conn.vars.extend(values);
            conn.socket.clone()
        };
        let _ = socket.send(ServerMessage::ok(action::SET_VARIABLES, Value::Object(body)));
        Ok(())
    }

    pub fn get_variable(&self, key: &str, conn_id: &ConnId) -> Option<Value> {
        self.state.lock().conns.get(conn_id)?.vars.get(key).cloned()
    }

    /// Read several connection variables; `None` or an empty list reads them all
    pub fn get_variables(&self, keys: Option<&[String]>, conn_id: &ConnId) -> HashMap<String, Value> {
        let state = self.state.lock();
        let Some(conn) = state.conns.get(conn_id) else {
            return HashMap::new();
        };
        match keys {
            Some(keys) if !keys.is_empty() => keys
                .iter()
                .filter_map(|key| conn.vars.get(key).map(|v| (key.clone(), v.clone())))
                .collect(),
            _ => conn.vars.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_id(&self) -> i64 {
        self.database_id
    }

    pub fn is_guest(&self) -> bool {
        self.guest
    }

    pub fn status(&self) -> UserStatus {
        self.state.lock().status
    }

    pub fn friends(&self) -> HashMap<String, Friend> {
        self.state.lock().friends.clone()
    }

    pub fn friend(&self, name: &str) -> Option<Friend> {
        self.state.lock().friends.get(name).cloned()
    }

    /// The room a connection is in
    pub fn room(&self, conn_id: &ConnId) -> Option<Arc<Room>> {
        self.state.lock().conns.get(conn_id)?.current_room()
    }

    pub fn socket(&self, conn_id: &ConnId) -> Option<Socket> {
        Some(self.state.lock().conns.get(conn_id)?.socket.clone())
    }

    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.state.lock().conns.keys().cloned().collect()
    }

    pub fn num_connections(&self) -> usize {
        self.state.lock().conns.len()
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }

    pub(crate) fn sockets(&self) -> Vec<Socket> {
        self.state.lock().conns.values().map(|c| c.socket.clone()).collect()
    }

    pub(crate) fn send_all(&self, msg: ServerMessage) {
        broadcast(&self.sockets(), msg);
    }

    /// Point a connection at a room; returns the connection's socket
    pub(crate) fn attach_room(&self, conn_id: &ConnId, room: &Arc<Room>) -> Result<Socket, GameError> {
        let mut state = self.state.lock();
        let conn = state
            .conns
            .get_mut(conn_id)
            .ok_or_else(|| GameError::Join("Invalid connection ID".to_string()))?;
        if let Some(current) = conn.current_room() {
            if !Arc::ptr_eq(&current, room) {
                return Err(GameError::Join(format!(
                    "User '{}' is already in room '{}'",
                    self.name,
                    current.name()
                )));
            }
        }
        conn.room = Some(Arc::downgrade(room));
        Ok(conn.socket.clone())
    }

    /// Clear a connection's room pointer if it still points at `room`
    pub(crate) fn detach_room(&self, conn_id: &ConnId, room: &Room) {
        let mut state = self.state.lock();
        if let Some(conn) = state.conns.get_mut(conn_id) {
            if conn
                .room
                .as_ref()
                .is_some_and(|current| std::ptr::eq(current.as_ptr(), room))
            {
                conn.room = None;
            }
        }
    }

    /// Send to every online user this user has an accepted friendship with
    pub(crate) fn broadcast_to_friends(&self, shared: &Shared, msg: ServerMessage) {
        let names: Vec<String> = self
            .state
            .lock()
            .friends
            .values()
            .filter(|friend| friend.status == FriendStatus::Accepted)
            .map(|friend| friend.name.clone())
            .collect();
        let sockets: Vec<Socket> = names
            .iter()
            .filter_map(|name| shared.online_user(name))
            .flat_map(|friend| friend.sockets())
            .collect();
        broadcast(&sockets, msg);
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("database_id", &self.database_id)
            .field("guest", &self.guest)
            .finish_non_exhaustive()
    }
}
