//! Error types for the game session server
//!
//! `GameError` is everything a client can be told about: each variant has a
//! stable numeric id and a short message that goes out as the `e` field of a
//! client-action response. `AppError` covers fatal process and transport
//! failures, and `SendError` a closed outbound channel.

use thiserror::Error;

/// Which client-action parameter failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Data,
    Columns,
    Name,
    Password,
    Remember,
    Guest,
    NewPassword,
    RoomName,
    RoomType,
    Private,
    MaxUsers,
    Action,
    VarKey,
}

impl Param {
    fn message(self) -> &'static str {
        match self {
            Param::Data => "Incorrect data format",
            Param::Columns => "Incorrect data format for columns",
            Param::Name => "Incorrect data format for user name",
            Param::Password => "Incorrect data format for password",
            Param::Remember => "Incorrect data format for remember me",
            Param::Guest => "Incorrect data format for guest",
            Param::NewPassword => "Incorrect data format for new password",
            Param::RoomName => "Incorrect data format for room name",
            Param::RoomType => "Incorrect data format for room type",
            Param::Private => "Incorrect data format for private room",
            Param::MaxUsers => "Incorrect data format for max room users",
            Param::Action => "Incorrect data format for action",
            Param::VarKey => "Incorrect data format for variable key",
        }
    }

    fn id(self) -> u16 {
        match self {
            Param::Data | Param::VarKey => 1002,
            Param::Action => 1003,
            Param::Columns => 1008,
            Param::Name => 1009,
            Param::Password => 1010,
            Param::Remember => 1011,
            Param::Guest => 1012,
            Param::NewPassword => 1013,
            Param::RoomName => 1014,
            Param::RoomType => 1015,
            Param::Private => 1016,
            Param::MaxUsers => 1017,
        }
    }
}

/// Client-visible errors
///
/// Returned by every user, room, friend and account operation. The session
/// dispatcher wraps them into `{"c":{"a":tag,"e":message}}`.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("Unrecognized client action")]
    InvalidAction,

    #[error("{}", .0.message())]
    IncorrectFormat(Param),

    #[error("{0}")]
    IncorrectCustomAction(String),

    /// Action requires a logged in session ("You must be logged in to ...")
    #[error("You must be logged in to {0}")]
    NotLoggedIn(&'static str),

    /// Action requires a logged out session, or the session is already logged in
    #[error("{0}")]
    LoggedIn(String),

    #[error("Invalid status")]
    StatusChange,

    #[error("Required server features are not enabled")]
    FeatureDisabled,

    #[error("Clients do not have room control")]
    RoomControl,

    #[error("Only the server can manipulate that type of room")]
    ServerRoom,

    #[error("{0}")]
    NotOwner(String),

    #[error("{0}")]
    Join(String),

    #[error("{0}")]
    Leave(String),

    #[error("{0}")]
    CreateRoom(String),

    #[error("{0}")]
    DeleteRoom(String),

    #[error("{0}")]
    Invite(String),

    #[error("{0}")]
    RevokeInvite(String),

    #[error("{0}")]
    FriendRequest(String),

    #[error("{0}")]
    FriendAccept(String),

    #[error("{0}")]
    FriendDecline(String),

    #[error("{0}")]
    FriendRemove(String),

    #[error("Unexpected authorization error")]
    AuthUnexpected,

    #[error("User is already logged in")]
    AlreadyLoggedIn,

    #[error("A user name is required")]
    RequiredName,

    #[error("A password is required")]
    RequiredPass,

    #[error("A new password is required")]
    RequiredNewPass,

    #[error("An ID is required")]
    RequiredId,

    #[error("Username is unavailable")]
    NameUnavail,

    #[error("Incorrect custom column data")]
    IncorrectCols,

    #[error("Error while hashing password")]
    Encryption,

    #[error("Store query failed: {0}")]
    Query(String),

    #[error("Incorrect login or password")]
    IncorrectLogin,

    #[error("Invalid auto-login data")]
    InvalidAutolog,

    #[error("Action was denied")]
    ActionDenied,

    #[error("Server is paused")]
    ServerPaused,

    #[error("{0}")]
    RoomGone(String),

    #[error("Unexpected friend error")]
    UnexpectedFriend,

    #[error("{0}")]
    Unexpected(String),

    #[error("Unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GameError {
    /// Stable numeric id for this error kind
    pub fn id(&self) -> u16 {
        match self {
            GameError::InvalidAction => 1001,
            GameError::IncorrectFormat(param) => param.id(),
            GameError::IncorrectCustomAction(_) => 1003,
            GameError::NotLoggedIn(_) => 1004,
            GameError::LoggedIn(_) => 1005,
            GameError::StatusChange => 1006,
            GameError::FeatureDisabled => 1007,
            GameError::RoomControl => 1018,
            GameError::ServerRoom => 1019,
            GameError::NotOwner(_) => 1020,
            GameError::Join(_) => 1023,
            GameError::Leave(_) => 1024,
            GameError::CreateRoom(_) => 1025,
            GameError::DeleteRoom(_) => 1026,
            GameError::Invite(_) => 1027,
            GameError::RevokeInvite(_) => 1028,
            GameError::FriendRequest(_) => 1029,
            GameError::FriendAccept(_) => 1030,
            GameError::FriendDecline(_) => 1031,
            GameError::FriendRemove(_) => 1032,
            GameError::AuthUnexpected => 1033,
            GameError::AlreadyLoggedIn => 1034,
            GameError::RequiredName => 1035,
            GameError::RequiredPass => 1036,
            GameError::RequiredNewPass => 1037,
            GameError::RequiredId => 1038,
            GameError::NameUnavail => 1040,
            GameError::IncorrectCols => 1042,
            GameError::Encryption => 1044,
            GameError::Query(_) => 1045,
            GameError::IncorrectLogin => 1046,
            GameError::InvalidAutolog => 1047,
            GameError::ActionDenied => 1049,
            GameError::ServerPaused => 1050,
            GameError::RoomGone(_) => 1051,
            GameError::UnexpectedFriend => 1052,
            GameError::Unexpected(_) => 1053,
            GameError::Encode(_) => 1054,
        }
    }

    pub(crate) fn room_gone(room: &str) -> Self {
        GameError::RoomGone(format!("The room '{}' does not exist", room))
    }

    pub(crate) fn server_gone() -> Self {
        GameError::Unexpected("The server has been dropped".to_string())
    }
}

/// Application-level errors
///
/// Fatal for a connection or for the process; never sent to clients.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid settings
    #[error("Config error: {0}")]
    Config(String),

    /// A client action run on the blocking pool did not finish
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(GameError::InvalidAction.to_string(), "Unrecognized client action");
        assert_eq!(
            GameError::NotLoggedIn("join a room").to_string(),
            "You must be logged in to join a room"
        );
        assert_eq!(
            GameError::IncorrectFormat(Param::RoomName).to_string(),
            "Incorrect data format for room name"
        );
        assert_eq!(GameError::room_gone("den").to_string(), "The room 'den' does not exist");
    }

    #[test]
    fn test_error_ids() {
        assert_eq!(GameError::InvalidAction.id(), 1001);
        assert_eq!(GameError::IncorrectFormat(Param::Data).id(), 1002);
        assert_eq!(GameError::IncorrectFormat(Param::MaxUsers).id(), 1017);
        assert_eq!(GameError::Join(String::new()).id(), 1023);
        assert_eq!(GameError::ServerPaused.id(), 1050);
        assert_eq!(GameError::room_gone("x").id(), 1051);
    }
}
