//! Server settings
//!
//! Loaded from a TOML file; every field has a default so an empty file (or no
//! file at all) gives a working plaintext server on `127.0.0.1:8080/ws`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Flags of a room type declared in the config file
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoomTypeConfig {
    pub server_only: bool,
    pub voice_chat: bool,
    pub broadcast_user_enter: bool,
    pub broadcast_user_leave: bool,
}

/// A room created when the server starts
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoomConfig {
    pub name: String,
    pub room_type: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub max_users: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub host_name: String,
    pub host_alias: String,
    pub ip: String,
    pub port: u16,

    pub tls: bool,
    pub cert_file: Option<PathBuf>,
    pub priv_key_file: Option<PathBuf>,

    /// Reject handshakes whose Origin is not this host (or its alias)
    pub origin_only: bool,
    /// 0 = unbounded
    pub max_connections: usize,

    /// Reserved name: owner of server rooms, never a valid user name
    pub server_name: String,
    pub kick_on_login: bool,
    pub multi_connect: bool,
    pub delete_room_on_leave: bool,
    pub user_room_control: bool,
    pub remember_me: bool,
    pub enable_sql_features: bool,

    pub enable_recovery: bool,
    pub recovery_location: PathBuf,

    pub room_types: BTreeMap<String, RoomTypeConfig>,
    pub rooms: Vec<RoomConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            host_alias: "localhost".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 8080,
            tls: false,
            cert_file: None,
            priv_key_file: None,
            origin_only: false,
            max_connections: 0,
            server_name: "server".to_string(),
            kick_on_login: false,
            multi_connect: false,
            delete_room_on_leave: true,
            user_room_control: true,
            remember_me: false,
            enable_sql_features: false,
            enable_recovery: false,
            recovery_location: PathBuf::from("."),
            room_types: BTreeMap::new(),
            rooms: Vec::new(),
        }
    }
}

impl Settings {
    /// Read settings from a TOML file
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.tls && (self.cert_file.is_none() || self.priv_key_file.is_none()) {
            return Err(AppError::Config(
                "tls requires both cert_file and priv_key_file".to_string(),
            ));
        }
        if self.server_name.is_empty() {
            return Err(AppError::Config("server_name must not be empty".to_string()));
        }
        if let Some(room) = self.rooms.iter().find(|room| room.name.is_empty()) {
            return Err(AppError::Config(format!(
                "a configured room of type '{}' has no name",
                room.room_type
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Upgrade path clients connect to
    pub fn endpoint_path(&self) -> &'static str {
        if self.tls {
            "/wss"
        } else {
            "/ws"
        }
    }

    /// Whether an `Origin` header value is allowed to connect
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if !self.origin_only {
            return true;
        }
        let Some(origin) = origin else {
            return false;
        };
        let host = origin
            .strip_prefix("https://")
            .or_else(|| origin.strip_prefix("http://"))
            .unwrap_or(origin);
        let host_port = format!("{}:{}", self.host_name, self.port);
        let alias_port = format!("{}:{}", self.host_alias, self.port);
        host == host_port || host == alias_port
    }

    pub fn recovery_file(&self) -> PathBuf {
        self.recovery_location.join("rooms.json")
    }
}
