//! Rooms
//!
//! A room owns its member list, invite list and variables behind one mutex.
//! Deletion replaces the member map with `None`; every operation re-checks
//! that under the lock and fails with `RoomGone` afterwards.
//!
//! Lock order inside this module: rooms registry → `Room` → `RoomMember` →
//! `User`. Room-type callbacks run with no room lock held.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::GameError;
use crate::message::{action, ServerMessage};
use crate::recovery::RoomSnapshot;
use crate::room_type::RoomType;
use crate::server::Shared;
use crate::socket::{broadcast, Socket};
use crate::types::ConnId;
use crate::user::User;

/// Parameters for creating a room
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub name: String,
    pub room_type: String,
    pub private: bool,
    /// 0 = unbounded
    pub max_users: usize,
    /// Defaults to the reserved server name
    pub owner: Option<String>,
}

impl NewRoom {
    pub fn new(name: impl Into<String>, room_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_type: room_type.into(),
            ..Self::default()
        }
    }

    pub fn private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn max_users(mut self, max_users: usize) -> Self {
        self.max_users = max_users;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// A user's projection into one room: the connections they have inside it
pub struct RoomMember {
    user: Arc<User>,
    conns: Mutex<HashMap<ConnId, Socket>>,
}

impl RoomMember {
    fn new(user: Arc<User>, conn_id: ConnId, socket: Socket) -> Self {
        let mut conns = HashMap::new();
        conns.insert(conn_id, socket);
        Self {
            user,
            conns: Mutex::new(conns),
        }
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn name(&self) -> &str {
        self.user.name()
    }

    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.conns.lock().keys().cloned().collect()
    }

    pub(crate) fn sockets(&self) -> Vec<Socket> {
        self.conns.lock().values().cloned().collect()
    }
}

impl fmt::Debug for RoomMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomMember")
            .field("user", &self.user.name())
            .field("conns", &self.connection_ids())
            .finish()
    }
}

pub(crate) struct RoomState {
    invite_list: Vec<String>,
    /// `None` once the room has been deleted
    members: Option<HashMap<String, Arc<RoomMember>>>,
    vars: HashMap<String, Value>,
}

pub struct Room {
    name: String,
    type_name: String,
    room_type: Arc<RoomType>,
    private: bool,
    owner: String,
    max_users: usize,
    shared: Weak<Shared>,
    state: Mutex<RoomState>,
}

impl Room {
    /// Create a room and register it
    ///
    /// Fails on an empty name, an unknown room type or a name collision.
    /// `on_create` runs after the rooms registry lock is released.
    pub(crate) fn create(shared: &Arc<Shared>, req: NewRoom) -> Result<Arc<Room>, GameError> {
        Self::create_with(shared, req, Vec::new(), HashMap::new())
    }

    /// Recreate a room from a recovery snapshot
    pub(crate) fn restore(
        shared: &Arc<Shared>,
        name: &str,
        snapshot: RoomSnapshot,
    ) -> Result<Arc<Room>, GameError> {
        let req = NewRoom {
            name: name.to_string(),
            room_type: snapshot.t,
            private: snapshot.p,
            max_users: snapshot.m,
            owner: Some(snapshot.o),
        };
        Self::create_with(shared, req, snapshot.i, snapshot.v)
    }

    fn create_with(
        shared: &Arc<Shared>,
        req: NewRoom,
        invite_list: Vec<String>,
        vars: HashMap<String, Value>,
    ) -> Result<Arc<Room>, GameError> {
        if req.name.is_empty() {
            return Err(GameError::CreateRoom("A room requires a name".to_string()));
        }
        let room_type = shared
            .room_types
            .get(&req.room_type)
            .cloned()
            .ok_or_else(|| GameError::CreateRoom("Invalid room type".to_string()))?;
        let owner = req
            .owner
            .filter(|owner| !owner.is_empty())
            .unwrap_or_else(|| shared.settings.server_name.clone());

        let room = Arc::new(Room {
            name: req.name,
            type_name: req.room_type,
            room_type,
            private: req.private,
            owner,
            max_users: req.max_users,
            shared: Arc::downgrade(shared),
            state: Mutex::new(RoomState {
                invite_list,
                members: Some(HashMap::new()),
                vars,
            }),
        });

        {
            let mut rooms = shared.rooms.lock();
            if rooms.contains_key(&room.name) {
                return Err(GameError::CreateRoom(format!(
                    "A Room with the name '{}' already exists",
                    room.name
                )));
            }
            rooms.insert(room.name.clone(), Arc::clone(&room));
        }

        debug!(room = %room.name, room_type = %room.type_name, owner = %room.owner, "Room created");
        room.room_type.created(&room);
        Ok(room)
    }

    /// Delete the room
    ///
    /// Every in-room connection gets a leave response and loses its room
    /// pointer, the room leaves the registry, then `on_delete` runs.
    pub fn delete(self: &Arc<Self>) -> Result<(), GameError> {
        let leave = Arc::new(ServerMessage::ok(action::LEAVE_ROOM, Value::Null));
        {
            let mut state = self.state.lock();
            let members = state
                .members
                .take()
                .ok_or_else(|| GameError::room_gone(&self.name))?;
            for member in members.values() {
                let conns = member.conns.lock();
                for (conn_id, socket) in conns.iter() {
                    let _ = socket.send_shared(Arc::clone(&leave));
                    member.user.detach_room(conn_id, self);
                }
            }
        }

        if let Some(shared) = self.shared.upgrade() {
            let mut rooms = shared.rooms.lock();
            if rooms
                .get(&self.name)
                .is_some_and(|registered| Arc::ptr_eq(registered, self))
            {
                rooms.remove(&self.name);
            }
        }

        debug!(room = %self.name, "Room deleted");
        self.room_type.deleted(self);
        Ok(())
    }

    /// Put one of a user's connections into this room
    pub fn add_user(self: &Arc<Self>, user: &Arc<User>, conn_id: &ConnId) -> Result<(), GameError> {
        let name = user.name();
        let (socket, member, others) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let members = state
                .members
                .as_mut()
                .ok_or_else(|| GameError::room_gone(&self.name))?;

            if self.max_users != 0
                && members.len() >= self.max_users
                && !members.contains_key(name)
            {
                return Err(GameError::Join(format!("The room '{}' is full", self.name)));
            }
            if self.private && name != self.owner && !state.invite_list.iter().any(|n| n == name) {
                return Err(GameError::Join(format!(
                    "User '{}' is not on the invite list",
                    name
                )));
            }

            let (socket, member) = match members.get(name) {
                Some(member) => {
                    if !Arc::ptr_eq(&member.user, user) {
                        return Err(GameError::Join(format!(
                            "User '{}' is already in room '{}'",
                            name, self.name
                        )));
                    }
                    let mut conns = member.conns.lock();
                    if conns.contains_key(conn_id) {
                        return Err(GameError::Join(format!(
                            "User '{}' is already in room '{}'",
                            name, self.name
                        )));
                    }
                    let socket = user.attach_room(conn_id, self)?;
                    conns.insert(conn_id.clone(), socket.clone());
                    (socket, Arc::clone(member))
                }
                None => {
                    let socket = user.attach_room(conn_id, self)?;
                    let member = Arc::new(RoomMember::new(
                        Arc::clone(user),
                        conn_id.clone(),
                        socket.clone(),
                    ));
                    members.insert(name.to_string(), Arc::clone(&member));
                    (socket, member)
                }
            };

            let others: Vec<Socket> = if self.room_type.broadcasts_user_enter() {
                members
                    .iter()
                    .filter(|(member_name, _)| member_name.as_str() != name)
                    .flat_map(|(_, m)| m.sockets())
                    .collect()
            } else {
                Vec::new()
            };
            (socket, member, others)
        };

        broadcast(
            &others,
            ServerMessage::UserEnter {
                u: name.to_string(),
                g: user.is_guest(),
            },
        );
        self.room_type.user_entered(self, &member);
        let _ = socket.send(ServerMessage::ok(
            action::JOIN_ROOM,
            Value::String(self.name.clone()),
        ));
        debug!(room = %self.name, user = %name, conn = %conn_id, "User joined room");
        Ok(())
    }

    /// Take one of a user's connections out of this room
    ///
    /// When the owner's last in-room connection leaves and rooms are deleted
    /// on leave, the room is deleted instead of broadcasting the departure.
    pub fn remove_user(self: &Arc<Self>, user: &Arc<User>, conn_id: &ConnId) -> Result<(), GameError> {
        let name = user.name();
        let (socket, member, member_gone, remaining) = {
            let mut state = self.state.lock();
            let members = state
                .members
                .as_mut()
                .ok_or_else(|| GameError::room_gone(&self.name))?;
            let member = members
                .get(name)
                .filter(|member| Arc::ptr_eq(&member.user, user))
                .cloned()
                .ok_or_else(|| {
                    GameError::Leave(format!("User '{}' is not in room '{}'", name, self.name))
                })?;

            let (socket, member_gone) = {
                let mut conns = member.conns.lock();
                let socket = conns
                    .remove(conn_id)
                    .ok_or_else(|| GameError::Leave("Invalid connection ID".to_string()))?;
                (socket, conns.is_empty())
            };
            if member_gone {
                members.remove(name);
            }

            let remaining: Vec<Socket> = if self.room_type.broadcasts_user_leave() {
                members.values().flat_map(|m| m.sockets()).collect()
            } else {
                Vec::new()
            };
            (socket, member, member_gone, remaining)
        };

        user.detach_room(conn_id, self);

        let delete_on_leave = self
            .shared
            .upgrade()
            .is_some_and(|shared| shared.settings.delete_room_on_leave);
        if delete_on_leave && member_gone && name == self.owner {
            // Already-deleted is fine here: a concurrent delete won the race
            let _ = self.delete();
        } else {
            broadcast(&remaining, ServerMessage::UserLeave { u: name.to_string() });
        }

        self.room_type.user_left(self, &member);
        let _ = socket.send(ServerMessage::ok(action::LEAVE_ROOM, Value::Null));
        debug!(room = %self.name, user = %name, conn = %conn_id, "User left room");
        Ok(())
    }

    /// Allow a user into this private room
    pub fn add_invite(&self, name: &str) -> Result<(), GameError> {
        if !self.private {
            return Err(GameError::Invite("Room is not private".to_string()));
        }
        if name.is_empty() {
            return Err(GameError::RequiredName);
        }
        let mut state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        if state.invite_list.iter().any(|n| n == name) {
            return Err(GameError::Invite(format!(
                "User '{}' is already on the invite list",
                name
            )));
        }
        state.invite_list.push(name.to_string());
        Ok(())
    }

    pub fn remove_invite(&self, name: &str) -> Result<(), GameError> {
        if !self.private {
            return Err(GameError::RevokeInvite("Room is not private".to_string()));
        }
        let mut state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        let index = state
            .invite_list
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| {
                GameError::RevokeInvite(format!("User '{}' is not on the invite list", name))
            })?;
        state.invite_list.remove(index);
        Ok(())
    }

    pub fn invite_list(&self) -> Result<Vec<String>, GameError> {
        let state = self.state.lock();
        match state.members {
            Some(_) => Ok(state.invite_list.clone()),
            None => Err(GameError::room_gone(&self.name)),
        }
    }

    pub fn set_variable(&self, key: &str, value: Value) -> Result<(), GameError> {
        let mut state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        state.vars.insert(key.to_string(), value);
        Ok(())
    }

    pub fn set_variables(&self, values: HashMap<String, Value>) -> Result<(), GameError> {
        let mut state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        state.vars.extend(values);
        Ok(())
    }

    pub fn get_variable(&self, key: &str) -> Result<Option<Value>, GameError> {
        let state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        Ok(state.vars.get(key).cloned())
    }

    /// Read several variables; `None` or an empty list reads them all
    ///
    /// Keys that are not set come back as null.
    pub fn get_variables(&self, keys: Option<&[String]>) -> Result<HashMap<String, Value>, GameError> {
        let state = self.state.lock();
        if state.members.is_none() {
            return Err(GameError::room_gone(&self.name));
        }
        Ok(match keys {
            Some(keys) if !keys.is_empty() => keys
                .iter()
                .map(|key| (key.clone(), state.vars.get(key).cloned().unwrap_or(Value::Null)))
                .collect(),
            _ => state.vars.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room_type_name(&self) -> &str {
        &self.type_name
    }

    pub fn room_type(&self) -> &Arc<RoomType> {
        &self.room_type
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn max_users(&self) -> usize {
        self.max_users
    }

    pub fn is_deleted(&self) -> bool {
        self.state.lock().members.is_none()
    }

    /// Number of distinct users inside; 0 once deleted
    pub fn num_users(&self) -> usize {
        self.state.lock().members.as_ref().map_or(0, HashMap::len)
    }

    pub fn user_names(&self) -> Result<Vec<String>, GameError> {
        let state = self.state.lock();
        let members = state
            .members
            .as_ref()
            .ok_or_else(|| GameError::room_gone(&self.name))?;
        Ok(members.keys().cloned().collect())
    }

    pub fn member(&self, name: &str) -> Option<Arc<RoomMember>> {
        self.state.lock().members.as_ref()?.get(name).cloned()
    }

    /// Sockets of every in-room connection of the named members
    ///
    /// `None` or an empty list targets everyone; unknown names are skipped.
    pub(crate) fn recipient_sockets(
        &self,
        recipients: Option<&[String]>,
        exclude: Option<&str>,
    ) -> Result<Vec<Socket>, GameError> {
        let state = self.state.lock();
        let members = state
            .members
            .as_ref()
            .ok_or_else(|| GameError::room_gone(&self.name))?;
        let targets: Vec<&Arc<RoomMember>> = match recipients {
            Some(names) if !names.is_empty() => {
                names.iter().filter_map(|name| members.get(name)).collect()
            }
            _ => members.values().collect(),
        };
        Ok(targets
            .into_iter()
            .filter(|member| Some(member.name()) != exclude)
            .flat_map(|member| member.sockets())
            .collect())
    }

    pub(crate) fn shared(&self) -> Option<Arc<Shared>> {
        self.shared.upgrade()
    }

    pub(crate) fn snapshot(&self) -> Option<RoomSnapshot> {
        let state = self.state.lock();
        state.members.as_ref()?;
        Some(RoomSnapshot {
            t: self.type_name.clone(),
            p: self.private,
            o: self.owner.clone(),
            m: self.max_users,
            i: state.invite_list.clone(),
            v: state.vars.clone(),
        })
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("room_type", &self.type_name)
            .field("private", &self.private)
            .field("owner", &self.owner)
            .field("max_users", &self.max_users)
            .finish_non_exhaustive()
    }
}
