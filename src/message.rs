//! Message protocol definitions
//!
//! Every outbound frame is a JSON object with a single key naming the server
//! action, which is exactly what serde's externally tagged enums produce.
//! Inbound frames are `{"A": tag, "P": params}`.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::GameError;
use crate::types::UserStatus;

/// Client action tags (the `A` of an inbound frame, the `a` of a response)
pub mod action {
    pub const SIGN_UP: &str = "s";
    pub const DELETE_ACCOUNT: &str = "d";
    pub const CHANGE_PASSWORD: &str = "pc";
    pub const CHANGE_ACCOUNT_INFO: &str = "ic";
    pub const LOGIN: &str = "li";
    pub const LOGOUT: &str = "lo";
    pub const JOIN_ROOM: &str = "j";
    pub const LEAVE_ROOM: &str = "lr";
    pub const CREATE_ROOM: &str = "r";
    pub const DELETE_ROOM: &str = "rd";
    pub const ROOM_INVITE: &str = "i";
    pub const REVOKE_INVITE: &str = "ri";
    pub const CHAT_MESSAGE: &str = "c";
    pub const PRIVATE_MESSAGE: &str = "p";
    pub const VOICE_STREAM: &str = "v";
    pub const CHANGE_STATUS: &str = "sc";
    pub const CUSTOM_ACTION: &str = "a";
    pub const FRIEND_REQUEST: &str = "f";
    pub const ACCEPT_FRIEND: &str = "fa";
    pub const DECLINE_FRIEND: &str = "fd";
    pub const REMOVE_FRIEND: &str = "fr";
    pub const SET_VARIABLE: &str = "vs";
    pub const SET_VARIABLES: &str = "vx";
}

/// Inbound frame
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "A", default)]
    pub action: String,
    #[serde(rename = "P", default)]
    pub params: Value,
}

/// Body of a `c` (built-in) or `a` (custom) client-action response
///
/// Serializes as `{"a": tag, "r": result}` or `{"a": tag, "e": message}`.
/// `r` is always present on success, even when null.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub action: String,
    pub result: Result<Value, String>,
}

impl Serialize for ActionResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("a", &self.action)?;
        match &self.result {
            Ok(value) => map.serialize_entry("r", value)?,
            Err(message) => map.serialize_entry("e", message)?,
        }
        map.end()
    }
}

/// Room message body (`m`)
#[derive(Debug, Clone, Serialize)]
pub struct RoomMessage {
    /// Sub-type, server messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,
    /// Author, chat messages only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,
    pub m: Value,
}

/// Server → Client message
#[derive(Debug, Clone, Serialize)]
pub enum ServerMessage {
    /// Response to a built-in client action
    #[serde(rename = "c")]
    ClientAction(ActionResponse),
    /// Response to a custom client action
    #[serde(rename = "a")]
    CustomAction(ActionResponse),
    #[serde(rename = "m")]
    Room(RoomMessage),
    #[serde(rename = "e")]
    UserEnter { u: String, g: bool },
    #[serde(rename = "x")]
    UserLeave { u: String },
    #[serde(rename = "p")]
    Private { f: String, t: String, m: Value },
    #[serde(rename = "d")]
    Data(Value),
    #[serde(rename = "v")]
    Voice { u: String, d: Value },
    #[serde(rename = "vp")]
    VoicePing(()),
    #[serde(rename = "i")]
    RoomInvite { u: String, r: String },
    #[serde(rename = "f")]
    FriendRequest { n: String },
    #[serde(rename = "fa")]
    FriendAccept { n: String, s: UserStatus },
    #[serde(rename = "fr")]
    FriendRemove { n: String },
    #[serde(rename = "fs")]
    FriendStatus { n: String, s: UserStatus },
    #[serde(rename = "t")]
    RequestDeviceTag(()),
    #[serde(rename = "ts")]
    SetDeviceTag(String),
    #[serde(rename = "ap")]
    SetAutoLoginPass(String),
    #[serde(rename = "af")]
    AutoLoginFailed { dt: String, e: String },
    #[serde(rename = "ai")]
    AutoLoginNotFiled(()),
}

impl ServerMessage {
    /// Successful client-action response
    pub fn ok(action: &str, result: Value) -> Self {
        ServerMessage::ClientAction(ActionResponse {
            action: action.to_string(),
            result: Ok(result),
        })
    }

    /// Failed client-action response
    pub fn error(action: &str, err: &GameError) -> Self {
        ServerMessage::ClientAction(ActionResponse {
            action: action.to_string(),
            result: Err(err.to_string()),
        })
    }

    /// Encode for the wire
    pub fn encode(&self) -> Result<String, GameError> {
        Ok(serde_json::to_string(self)?)
    }
}
