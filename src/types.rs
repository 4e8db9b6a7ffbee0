//! Basic type definitions for the game session server
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier of one transport session
//! - `ConnId`: a user's connection identifier (`"1"` or a random token)
//! - `UserStatus` / `FriendStatus`: presence enums sent as integers

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Unique transport session identifier (newtype pattern)
///
/// Assigned on connect and used in logs; unrelated to the user's `ConnId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection identifier within one user
///
/// The literal `"1"` in single-connect mode, a random URL-safe 5-byte token
/// in multi-connect mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(String);

impl ConnId {
    /// The only connection id a single-connect user ever has
    pub fn single() -> Self {
        Self("1".to_string())
    }

    /// Generate a random URL-safe connection id
    pub fn generate() -> Self {
        Self(secure_token(5))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random bytes from the OS RNG, base64 URL-safe encoded
pub fn secure_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// Presence of an online user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UserStatus {
    #[default]
    Available = 0,
    InGame = 1,
    Idle = 2,
    Offline = 3,
}

impl TryFrom<i64> for UserStatus {
    type Error = crate::error::GameError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UserStatus::Available),
            1 => Ok(UserStatus::InGame),
            2 => Ok(UserStatus::Idle),
            3 => Ok(UserStatus::Offline),
            _ => Err(crate::error::GameError::StatusChange),
        }
    }
}

impl Serialize for UserStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// One side of a friendship edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendStatus {
    /// The other user asked this user
    Requested = 0,
    /// This user asked the other user
    Pending = 1,
    Accepted = 2,
}

impl Serialize for FriendStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}
