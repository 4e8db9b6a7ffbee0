//! Room types
//!
//! A `RoomType` is a class of room: its broadcast flags, whether only the
//! server may manage it, whether it carries voice, and optional callbacks.
//! Types are configured on the `ServerBuilder` and frozen when the server is
//! built, so after that they are read without synchronization.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::RoomTypeConfig;
use crate::room::{Room, RoomMember};

pub type RoomCallback = Arc<dyn Fn(&Arc<Room>) + Send + Sync>;
pub type MemberCallback = Arc<dyn Fn(&Arc<Room>, &RoomMember) + Send + Sync>;

#[derive(Clone, Default)]
pub struct RoomType {
    server_only: bool,
    voice_chat: bool,
    broadcast_user_enter: bool,
    broadcast_user_leave: bool,
    on_create: Option<RoomCallback>,
    on_delete: Option<RoomCallback>,
    on_user_enter: Option<MemberCallback>,
    on_user_leave: Option<MemberCallback>,
}

impl RoomType {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the server may create, delete or invite to rooms of this type
    pub fn server_only(mut self) -> Self {
        self.server_only = true;
        self
    }

    pub fn voice_chat(mut self) -> Self {
        self.voice_chat = true;
        self
    }

    pub fn broadcast_user_enter(mut self) -> Self {
        self.broadcast_user_enter = true;
        self
    }

    pub fn broadcast_user_leave(mut self) -> Self {
        self.broadcast_user_leave = true;
        self
    }

    pub fn on_create(mut self, f: impl Fn(&Arc<Room>) + Send + Sync + 'static) -> Self {
        self.on_create = Some(Arc::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&Arc<Room>) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(f));
        self
    }

    pub fn on_user_enter(
        mut self,
        f: impl Fn(&Arc<Room>, &RoomMember) + Send + Sync + 'static,
    ) -> Self {
        self.on_user_enter = Some(Arc::new(f));
        self
    }

    pub fn on_user_leave(
        mut self,
        f: impl Fn(&Arc<Room>, &RoomMember) + Send + Sync + 'static,
    ) -> Self {
        self.on_user_leave = Some(Arc::new(f));
        self
    }

    pub fn is_server_only(&self) -> bool {
        self.server_only
    }

    pub fn voice_chat_enabled(&self) -> bool {
        self.voice_chat
    }

    pub fn broadcasts_user_enter(&self) -> bool {
        self.broadcast_user_enter
    }

    pub fn broadcasts_user_leave(&self) -> bool {
        self.broadcast_user_leave
    }

    pub(crate) fn created(&self, room: &Arc<Room>) {
        if let Some(f) = &self.on_create {
            f(room);
        }
    }

    pub(crate) fn deleted(&self, room: &Arc<Room>) {
        if let Some(f) = &self.on_delete {
            f(room);
        }
    }

    pub(crate) fn user_entered(&self, room: &Arc<Room>, member: &RoomMember) {
        if let Some(f) = &self.on_user_enter {
            f(room, member);
        }
    }

    pub(crate) fn user_left(&self, room: &Arc<Room>, member: &RoomMember) {
        if let Some(f) = &self.on_user_leave {
            f(room, member);
        }
    }
}

impl From<&RoomTypeConfig> for RoomType {
    fn from(config: &RoomTypeConfig) -> Self {
        Self {
            server_only: config.server_only,
            voice_chat: config.voice_chat,
            broadcast_user_enter: config.broadcast_user_enter,
            broadcast_user_leave: config.broadcast_user_leave,
            ..Self::default()
        }
    }
}

impl fmt::Debug for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomType")
            .field("server_only", &self.server_only)
            .field("voice_chat", &self.voice_chat)
            .field("broadcast_user_enter", &self.broadcast_user_enter)
            .field("broadcast_user_leave", &self.broadcast_user_leave)
            .finish_non_exhaustive()
    }
}

/// Catalog of room types by name
#[derive(Debug, Clone, Default)]
pub struct RoomTypes {
    types: HashMap<String, Arc<RoomType>>,
}

impl RoomTypes {
    /// Register a type; an empty name is ignored
    pub fn insert(&mut self, name: impl Into<String>, room_type: RoomType) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        self.types.insert(name, Arc::new(room_type));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RoomType>> {
        self.types.get(name)
    }

    pub(crate) fn len(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_flags() {
        let rt = RoomType::new().voice_chat().broadcast_user_enter();
        assert!(rt.voice_chat_enabled());
        assert!(rt.broadcasts_user_enter());
        assert!(!rt.broadcasts_user_leave());
        assert!(!rt.is_server_only());
    }

    #[test]
    fn test_registry_ignores_empty_name() {
        let mut types = RoomTypes::default();
        types.insert("", RoomType::new());
        types.insert("lobby", RoomType::new().server_only());
        assert_eq!(types.len(), 1);
        assert!(types.get("lobby").unwrap().is_server_only());
        assert!(types.get("arena").is_none());
    }

    #[test]
    fn test_from_config() {
        let config = RoomTypeConfig {
            server_only: true,
            broadcast_user_leave: true,
            ..RoomTypeConfig::default()
        };
        let rt = RoomType::from(&config);
        assert!(rt.is_server_only());
        assert!(rt.broadcasts_user_leave());
        assert!(!rt.voice_chat_enabled());
    }
}
