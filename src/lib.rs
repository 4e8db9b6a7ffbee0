//! Real-time Game Session Server Library
//!
//! A WebSocket server for multiplayer games built with tokio-tungstenite.
//! Clients log in, move between rooms, chat, exchange private messages,
//! keep friend lists and call host-defined custom actions.
//!
//! # Features
//! - Plain `/ws` or TLS `/wss` endpoint with origin and capacity checks
//! - Guest, account and remember-me autologin
//! - Room types with server-only rooms, private rooms and voice relay
//! - Friend requests backed by a pluggable store
//! - Custom actions with typed data
//! - Room recovery across restarts
//!
//! # Architecture
//! - `GameServer` holds the user and room registries behind `parking_lot`
//!   mutexes; there is no central actor
//! - Each connection runs a `handler` task with a write task fed by an
//!   unbounded queue, so fan-out never waits on a slow socket
//! - The per-connection dispatcher maps client action tags to user and room
//!   operations and answers with `c` responses
//!
//! # Example
//! ```ignore
//! use game_session_server::{RoomType, ServerBuilder, Settings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ServerBuilder::new(Settings::default())
//!         .room_type("lobby", RoomType::new().broadcast_user_enter())
//!         .build();
//!     server.run().await.unwrap();
//! }
//! ```

pub mod actions;
pub mod callbacks;
pub mod config;
mod dispatch;
pub mod error;
pub mod friends;
pub mod handler;
pub mod message;
pub mod messaging;
pub mod recovery;
pub mod room;
pub mod room_type;
pub mod server;
pub mod socket;
pub mod store;
pub mod tls;
pub mod types;
pub mod user;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use actions::{ActionClient, CustomActions, DataType};
pub use callbacks::{NoCallbacks, ServerCallbacks};
pub use config::{RoomConfig, RoomTypeConfig, Settings};
pub use error::{AppError, GameError, SendError};
pub use friends::Friend;
pub use handler::handle_connection;
pub use message::{ClientFrame, ServerMessage};
pub use room::{NewRoom, Room, RoomMember};
pub use room_type::{RoomType, RoomTypes};
pub use server::{GameServer, ServerBuilder};
pub use store::{Account, Columns, FriendsStore, Identity, MemoryStore};
pub use types::{ConnId, FriendStatus, SessionId, UserStatus};
pub use user::{LoginRequest, SessionSlot, User};
