//! Per-connection client-action dispatch
//!
//! A `Session` owns everything one transport connection knows about itself:
//! its outbound socket, the slot pointing at its logged in user, and its
//! autologin device state. Each inbound frame is routed by tag to a handler.
//! A handler either answers with a `c` response or, when the operation
//! already sent its own response or event, stays silent. Errors always
//! answer.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::actions::ActionClient;
use crate::error::{GameError, Param};
use crate::message::{action, ClientFrame, ServerMessage};
use crate::room::NewRoom;
use crate::server::GameServer;
use crate::socket::Socket;
use crate::store::{Columns, Identity};
use crate::types::{secure_token, UserStatus};
use crate::user::{Attachment, LoginRequest, SessionSlot};

const DEVICE_TAG_LEN: usize = 32;

/// What a handler wants written back
enum Reply {
    Respond(Value),
    Silent,
}

/// Autologin state of the device on the other end
#[derive(Debug, Default)]
struct DeviceAuth {
    tag: String,
    /// Pass the client presented during negotiation
    old_pass: String,
    /// Pass issued by this server, current after login
    pass: String,
    user_id: i64,
}

impl DeviceAuth {
    fn reset_login(&mut self) {
        self.old_pass.clear();
        self.pass.clear();
        self.user_id = 0;
    }
}

/// Outcome of one autologin negotiation frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Negotiation {
    Continue,
    Done,
    Close,
}

pub(crate) struct Session {
    server: GameServer,
    socket: Socket,
    slot: SessionSlot,
    device: DeviceAuth,
}

impl Session {
    pub(crate) fn new(server: GameServer, socket: Socket) -> Self {
        Self {
            server,
            socket,
            slot: SessionSlot::new(),
            device: DeviceAuth::default(),
        }
    }

    /// Whether the autologin handshake runs before the main loop
    pub(crate) fn wants_negotiation(&self) -> bool {
        let settings = self.server.settings();
        settings.remember_me && settings.enable_sql_features
    }

    /// Ask the client for its device tag
    pub(crate) fn begin_negotiation(&self) {
        let _ = self.socket.send(ServerMessage::RequestDeviceTag(()));
    }

    /// Handle one frame of the autologin handshake
    pub(crate) fn negotiate(&mut self, frame: ClientFrame) -> Negotiation {
        match frame.action.as_str() {
            "0" => {
                self.device.tag = secure_token(DEVICE_TAG_LEN);
                let _ = self.socket.send(ServerMessage::SetDeviceTag(self.device.tag.clone()));
                Negotiation::Continue
            }
            "1" => {
                let Some(tag) = frame.params.as_str() else {
                    return Negotiation::Close;
                };
                if !self.device.tag.is_empty() && tag != self.device.tag {
                    return Negotiation::Close;
                }
                self.device.tag = tag.to_string();
                let _ = self.socket.send(ServerMessage::AutoLoginNotFiled(()));
                Negotiation::Done
            }
            "2" => {
                let Some((tag, pass, user_id)) = device_triple(&frame.params) else {
                    return Negotiation::Close;
                };
                self.device.tag = tag;
                self.device.old_pass = pass;
                self.device.user_id = user_id;
                self.device.pass = secure_token(DEVICE_TAG_LEN);
                let _ = self.socket.send(ServerMessage::SetAutoLoginPass(self.device.pass.clone()));
                Negotiation::Continue
            }
            "3" => {
                let device = &self.device;
                if device.tag.is_empty()
                    || device.old_pass.is_empty()
                    || device.pass.is_empty()
                    || device.user_id == 0
                {
                    return Negotiation::Close;
                }
                if let Err(e) = self.auto_login() {
                    debug!(id = e.id(), error = %e, "Autologin failed");
                    let tag = secure_token(DEVICE_TAG_LEN);
                    let _ = self.socket.send(ServerMessage::AutoLoginFailed {
                        dt: tag.clone(),
                        e: e.to_string(),
                    });
                    self.device.reset_login();
                    self.device.tag = tag;
                }
                Negotiation::Done
            }
            _ => Negotiation::Close,
        }
    }

    fn auto_login(&mut self) -> Result<(), GameError> {
        let identity = self.identity()?;
        let device = &self.device;
        let name = identity.auto_login(&device.tag, &device.old_pass, &device.pass, device.user_id)?;
        let req = LoginRequest {
            name,
            database_id: device.user_id,
            autolog_pass: Some(device.pass.clone()),
            guest: false,
            remember_me: true,
            socket: self.socket.clone(),
            session: self.slot.clone(),
        };
        self.server.login(req)?;
        self.device.old_pass.clear();
        Ok(())
    }

    /// Run one client action and write its response
    pub(crate) fn handle(&mut self, frame: ClientFrame) {
        let tag = frame.action;
        let params = frame.params;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(&tag, params)));
        let result = outcome.unwrap_or_else(|_| {
            error!(action = %tag, "Client action panicked");
            Err(GameError::Unexpected("Unexpected server error".to_string()))
        });
        match result {
            Ok(Reply::Respond(value)) => {
                let _ = self.socket.send(ServerMessage::ok(&tag, value));
            }
            Ok(Reply::Silent) => {}
            Err(e) => {
                debug!(action = %tag, id = e.id(), error = %e, "Client action failed");
                let _ = self.socket.send(ServerMessage::error(&tag, &e));
            }
        }
    }

    /// Socket-dropped cleanup: log the session's user out
    pub(crate) fn close(&mut self) {
        if let Some(Attachment { user, conn_id }) = self.slot.get() {
            info!(user = %user.name(), conn = %conn_id, "Session dropped while logged in");
            user.logout(&conn_id);
        }
    }

    pub(crate) fn is_logged_in(&self) -> bool {
        self.slot.is_logged_in()
    }

    pub(crate) fn slot(&self) -> SessionSlot {
        self.slot.clone()
    }

    /// Whether this frame may hash a password in the identity store
    pub(crate) fn hashes_password(&self, frame: &ClientFrame, negotiating: bool) -> bool {
        if negotiating {
            return frame.action == "3";
        }
        self.server.settings().enable_sql_features
            && matches!(
                frame.action.as_str(),
                action::LOGIN
                    | action::SIGN_UP
                    | action::DELETE_ACCOUNT
                    | action::CHANGE_PASSWORD
                    | action::CHANGE_ACCOUNT_INFO
            )
    }

    fn dispatch(&mut self, tag: &str, params: Value) -> Result<Reply, GameError> {
        match tag {
            action::CUSTOM_ACTION => self.custom_action(params),
            action::VOICE_STREAM => self.voice_stream(params),
            action::SET_VARIABLE => self.set_variable(params),
            action::SET_VARIABLES => self.set_variables(params),
            action::CHAT_MESSAGE => self.chat_message(params),
            action::PRIVATE_MESSAGE => self.private_message(params),
            action::CHANGE_STATUS => self.change_status(params),
            action::LOGIN => self.login(params),
            action::LOGOUT => self.logout(),
            action::JOIN_ROOM => self.join_room(params),
            action::LEAVE_ROOM => self.leave_room(),
            action::CREATE_ROOM => self.create_room(params),
            action::DELETE_ROOM => self.delete_room(params),
            action::ROOM_INVITE => self.room_invite(params),
            action::REVOKE_INVITE => self.revoke_invite(params),
            action::FRIEND_REQUEST => self.friend_action(params, "request a friend", |user, name| {
                user.friend_request(name)
            }),
            action::ACCEPT_FRIEND => self.friend_action(params, "accept a friend request", |user, name| {
                user.accept_friend_request(name)
            }),
            action::DECLINE_FRIEND => self.friend_action(params, "decline a friend request", |user, name| {
                user.decline_friend_request(name)
            }),
            action::REMOVE_FRIEND => self.friend_action(params, "remove a friend", |user, name| {
                user.remove_friend(name)
            }),
            action::SIGN_UP => self.sign_up(params),
            action::DELETE_ACCOUNT => self.delete_account(params),
            action::CHANGE_PASSWORD => self.change_password(params),
            action::CHANGE_ACCOUNT_INFO => self.change_account_info(params),
            _ => Err(GameError::InvalidAction),
        }
    }

    fn attachment(&self, doing: &'static str) -> Result<Attachment, GameError> {
        self.slot.get().ok_or(GameError::NotLoggedIn(doing))
    }

    fn room_control(&self, doing: &'static str) -> Result<Attachment, GameError> {
        let attachment = self.attachment(doing)?;
        if !self.server.settings().user_room_control {
            return Err(GameError::RoomControl);
        }
        Ok(attachment)
    }

    fn require_logged_out(&self, message: &str) -> Result<(), GameError> {
        if self.slot.is_logged_in() {
            return Err(GameError::LoggedIn(message.to_string()));
        }
        Ok(())
    }

    fn identity(&self) -> Result<Arc<dyn Identity>, GameError> {
        self.server
            .shared()
            .identity
            .clone()
            .ok_or(GameError::FeatureDisabled)
    }

    // Login and logout

    fn login(&mut self, params: Value) -> Result<Reply, GameError> {
        if let Some(current) = self.slot.get() {
            return Err(GameError::LoggedIn(format!(
                "Already logged in as '{}'",
                current.user.name()
            )));
        }
        let map = as_map(&params)?;
        let name = field_str(map, "n", Param::Name)?;
        let settings = self.server.settings();
        let guest = optional_bool(map, "g", Param::Guest)?;
        let columns = columns(map)?;

        let req = if settings.enable_sql_features {
            let password = field_str(map, "p", Param::Password)?;
            let remember = if settings.remember_me {
                field_bool(map, "r", Param::Remember)?
            } else {
                false
            };
            let account = self
                .identity()?
                .login(name, password, &self.device.tag, remember, columns)?;
            LoginRequest {
                name: account.name,
                database_id: account.database_id,
                autolog_pass: account.autolog_pass,
                guest,
                remember_me: remember,
                socket: self.socket.clone(),
                session: self.slot.clone(),
            }
        } else {
            let mut req = LoginRequest::new(name, self.socket.clone(), self.slot.clone());
            req.guest = guest;
            req
        };

        let database_id = req.database_id;
        let autolog_pass = req.autolog_pass.clone();
        self.server.login(req)?;
        self.device.user_id = database_id;
        self.device.pass = autolog_pass.unwrap_or_default();
        Ok(Reply::Silent)
    }

    fn logout(&mut self) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self
            .slot
            .get()
            .ok_or_else(|| GameError::LoggedIn("Already logged out".to_string()))?;
        user.logout(&conn_id);
        let settings = self.server.settings();
        if settings.enable_sql_features && settings.remember_me {
            if let Ok(identity) = self.identity() {
                identity.remove_auto_log(self.device.user_id, &self.device.tag);
            }
        }
        self.device.reset_login();
        Ok(Reply::Silent)
    }

    // Rooms

    fn join_room(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("join a room")?;
        let name = as_str(&params, Param::RoomName)?;
        let room = self.server.get_room(name)?;
        user.join(&room, &conn_id)?;
        Ok(Reply::Silent)
    }

    fn leave_room(&mut self) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("leave a room")?;
        user.leave(&conn_id)?;
        Ok(Reply::Silent)
    }

    fn create_room(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.room_control("create a room")?;
        let map = as_map(&params)?;
        let name = field_str(map, "n", Param::RoomName)?;
        let room_type = field_str(map, "t", Param::RoomType)?;
        let private = field_bool(map, "p", Param::Private)?;
        let max_users = map
            .get("m")
            .and_then(Value::as_f64)
            .filter(|m| *m >= 0.0)
            .ok_or(GameError::IncorrectFormat(Param::MaxUsers))? as usize;

        let kind = self
            .server
            .room_types()
            .get(room_type)
            .ok_or_else(|| GameError::CreateRoom("Invalid room type".to_string()))?;
        if kind.is_server_only() {
            return Err(GameError::ServerRoom);
        }

        let room = self.server.new_room(
            NewRoom::new(name, room_type)
                .private(private)
                .max_users(max_users)
                .owner(user.name()),
        )?;
        user.join(&room, &conn_id)?;
        Ok(Reply::Respond(Value::String(name.to_string())))
    }

    fn delete_room(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.room_control("delete a room")?;
        let name = as_str(&params, Param::RoomName)?;
        let room = self.server.get_room(name)?;
        if room.owner() != user.name() {
            return Err(GameError::NotOwner(
                "Only the owner of the room can delete it".to_string(),
            ));
        }
        if room.room_type().is_server_only() {
            return Err(GameError::ServerRoom);
        }
        room.delete()?;
        Ok(Reply::Respond(Value::Null))
    }

    fn room_invite(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.room_control("invite to a room")?;
        let name = as_str(&params, Param::Name)?;
        let invited = self
            .server
            .get_user(name)
            .map_err(|_| GameError::Invite(format!("The user '{}' is not online", name)))?;
        user.invite(&invited, &conn_id)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn revoke_invite(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.room_control("revoke an invite to a room")?;
        let name = as_str(&params, Param::Name)?;
        user.revoke_invite(name, &conn_id)?;
        Ok(Reply::Respond(Value::Null))
    }

    // Messaging

    fn chat_message(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("send a chat message")?;
        let room = user
            .room(&conn_id)
            .ok_or_else(|| GameError::Unexpected(format!("User '{}' is not in a room", user.name())))?;
        room.chat_message(user.name(), params, None)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn private_message(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.attachment("send a private message")?;
        let map = as_map(&params)?;
        let to = field_str(map, "u", Param::Name)?;
        let message = map.get("m").cloned().unwrap_or(Value::Null);
        user.private_message(to, message)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn voice_stream(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("use voice chat")?;
        let room = user
            .room(&conn_id)
            .ok_or_else(|| GameError::Unexpected(format!("User '{}' is not in a room", user.name())))?;
        if !room.room_type().voice_chat_enabled() {
            return Err(GameError::Unexpected(format!(
                "Voice chat is not enabled in room '{}'",
                room.name()
            )));
        }
        room.voice_stream(user.name(), &self.socket, params, None)?;
        Ok(Reply::Silent)
    }

    fn custom_action(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("use custom actions")?;
        let map = as_map(&params)?;
        let name = field_str(map, "A", Param::Action)?;
        let data = map.get("P").cloned().unwrap_or(Value::Null);
        let client = ActionClient::new(name, user, conn_id, self.socket.clone());
        self.server.shared().custom_actions.handle(name, data, client);
        Ok(Reply::Silent)
    }

    // Status and variables

    fn change_status(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.attachment("change your status")?;
        let raw = params
            .as_f64()
            .ok_or(GameError::IncorrectFormat(Param::Data))?;
        let status = UserStatus::try_from(raw as i64)?;
        user.set_status(status);
        Ok(Reply::Respond(serde_json::to_value(status)?))
    }

    fn set_variable(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("set a variable")?;
        let map = as_map(&params)?;
        let key = field_str(map, "k", Param::VarKey)?;
        let value = map.get("v").cloned().unwrap_or(Value::Null);
        user.set_variable(key, value, &conn_id)?;
        Ok(Reply::Silent)
    }

    fn set_variables(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, conn_id } = self.attachment("set variables")?;
        let Value::Object(map) = params else {
            return Err(GameError::IncorrectFormat(Param::Data));
        };
        let values: HashMap<String, Value> = map.into_iter().collect();
        user.set_variables(values, &conn_id)?;
        Ok(Reply::Silent)
    }

    // Friends

    fn friend_action(
        &mut self,
        params: Value,
        doing: &'static str,
        op: impl FnOnce(&crate::user::User, &str) -> Result<(), GameError>,
    ) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.attachment(doing)?;
        if !self.server.settings().enable_sql_features {
            return Err(GameError::FeatureDisabled);
        }
        let name = as_str(&params, Param::Name)?;
        op(&user, name)?;
        Ok(Reply::Silent)
    }

    // Accounts

    fn sign_up(&mut self, params: Value) -> Result<Reply, GameError> {
        self.require_logged_out("You must be logged out to sign up")?;
        let identity = self.identity()?;
        let map = as_map(&params)?;
        let columns = columns(map)?;
        let name = field_str(map, "n", Param::Name)?;
        let password = field_str(map, "p", Param::Password)?;
        identity.sign_up(name, password, columns)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn delete_account(&mut self, params: Value) -> Result<Reply, GameError> {
        self.require_logged_out("You must be logged out to delete your account")?;
        let identity = self.identity()?;
        let map = as_map(&params)?;
        let columns = columns(map)?;
        let name = field_str(map, "n", Param::Name)?;
        let password = field_str(map, "p", Param::Password)?;
        if self.server.shared().online_user(name).is_some() {
            return Err(GameError::LoggedIn(
                "The user must be logged off to delete their account".to_string(),
            ));
        }
        identity.delete_account(name, password, columns)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn change_password(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.attachment("change your password")?;
        let identity = self.identity()?;
        let map = as_map(&params)?;
        let columns = columns(map)?;
        let password = field_str(map, "p", Param::Password)?;
        let new_password = field_str(map, "n", Param::NewPassword)?;
        identity.change_password(user.name(), password, new_password, columns)?;
        Ok(Reply::Respond(Value::Null))
    }

    fn change_account_info(&mut self, params: Value) -> Result<Reply, GameError> {
        let Attachment { user, .. } = self.attachment("change your account info")?;
        let identity = self.identity()?;
        let map = as_map(&params)?;
        let columns = columns(map)?;
        let password = field_str(map, "p", Param::Password)?;
        identity.change_account_info(user.name(), password, columns)?;
        Ok(Reply::Respond(Value::Null))
    }
}

fn as_map(params: &Value) -> Result<&Map<String, Value>, GameError> {
    params.as_object().ok_or(GameError::IncorrectFormat(Param::Data))
}

fn as_str(params: &Value, param: Param) -> Result<&str, GameError> {
    params.as_str().ok_or(GameError::IncorrectFormat(param))
}

fn field_str<'a>(map: &'a Map<String, Value>, key: &str, param: Param) -> Result<&'a str, GameError> {
    map.get(key)
        .and_then(Value::as_str)
        .ok_or(GameError::IncorrectFormat(param))
}

fn field_bool(map: &Map<String, Value>, key: &str, param: Param) -> Result<bool, GameError> {
    map.get(key)
        .and_then(Value::as_bool)
        .ok_or(GameError::IncorrectFormat(param))
}

/// Missing or null reads as false
fn optional_bool(map: &Map<String, Value>, key: &str, param: Param) -> Result<bool, GameError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(value) => value.as_bool().ok_or(GameError::IncorrectFormat(param)),
    }
}

fn columns(map: &Map<String, Value>) -> Result<Option<&Columns>, GameError> {
    match map.get("c") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(columns)) => Ok(Some(columns)),
        Some(_) => Err(GameError::IncorrectFormat(Param::Columns)),
    }
}

/// `{dt, da, di}` of an autologin frame; `di` may be a string or a number
fn device_triple(params: &Value) -> Option<(String, String, i64)> {
    let map = params.as_object()?;
    let tag = map.get("dt")?.as_str()?.to_string();
    let pass = map.get("da")?.as_str()?.to_string();
    let user_id = match map.get("di")? {
        Value::String(id) => id.parse().ok()?,
        Value::Number(id) => id.as_i64()?,
        _ => return None,
    };
    Some((tag, pass, user_id))
}
