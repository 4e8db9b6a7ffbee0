//! Message fan-out
//!
//! Room messages go to every in-room connection of the targeted members
//! (all members when no recipient list is given). Private and data messages
//! go straight to a user's connections. Delivery is best effort per socket.

use serde_json::Value;
use tracing::trace;

use crate::error::{GameError, Param};
use crate::message::{RoomMessage, ServerMessage};
use crate::room::Room;
use crate::socket::{broadcast, Socket};
use crate::types::ConnId;
use crate::user::User;

impl Room {
    /// Message from the server with a host-defined sub-type
    pub fn server_message(
        &self,
        message: Value,
        sub_type: i64,
        recipients: Option<&[String]>,
    ) -> Result<(), GameError> {
        let sockets = self.recipient_sockets(recipients, None)?;
        if let Some(shared) = self.shared() {
            shared.callbacks.on_server_message(self, sub_type, &message);
        }
        broadcast(
            &sockets,
            ServerMessage::Room(RoomMessage {
                s: Some(sub_type),
                a: None,
                m: message,
            }),
        );
        Ok(())
    }

    /// Chat message authored by a user
    pub fn chat_message(
        &self,
        author: &str,
        message: Value,
        recipients: Option<&[String]>,
    ) -> Result<(), GameError> {
        if author.is_empty() {
            return Err(GameError::IncorrectFormat(Param::Name));
        }
        let sockets = self.recipient_sockets(recipients, None)?;
        if let Some(shared) = self.shared() {
            shared.callbacks.on_chat_message(author, self, &message);
        }
        trace!(room = %self.name(), author = %author, recipients = sockets.len(), "Chat message");
        broadcast(
            &sockets,
            ServerMessage::Room(RoomMessage {
                s: None,
                a: Some(author.to_string()),
                m: message,
            }),
        );
        Ok(())
    }

    pub fn data_message(&self, data: Value, recipients: Option<&[String]>) -> Result<(), GameError> {
        let sockets = self.recipient_sockets(recipients, None)?;
        broadcast(&sockets, ServerMessage::Data(data));
        Ok(())
    }

    /// Relay a voice chunk to everyone but the speaker, and ping the speaker back
    pub fn voice_stream(
        &self,
        speaker: &str,
        speaker_socket: &Socket,
        stream: Value,
        recipients: Option<&[String]>,
    ) -> Result<(), GameError> {
        let sockets = self.recipient_sockets(recipients, Some(speaker))?;
        broadcast(
            &sockets,
            ServerMessage::Voice {
                u: speaker.to_string(),
                d: stream,
            },
        );
        let _ = speaker_socket.send(ServerMessage::VoicePing(()));
        Ok(())
    }
}

impl User {
    /// Send a private message to an online user
    ///
    /// Both the recipient's and the sender's connections get the `p` event.
    pub fn private_message(&self, to: &str, message: Value) -> Result<(), GameError> {
        let shared = self.shared().ok_or_else(GameError::server_gone)?;
        let recipient = shared
            .online_user(to)
            .ok_or_else(|| GameError::Unexpected(format!("User '{}' is not logged in", to)))?;
        shared.callbacks.on_private_message(self, &recipient, &message);

        let mut sockets = recipient.sockets();
        sockets.extend(self.sockets());
        broadcast(
            &sockets,
            ServerMessage::Private {
                f: self.name().to_string(),
                t: to.to_string(),
                m: message,
            },
        );
        Ok(())
    }

    /// Send data to one connection, or to all of them when `conn_id` is `None`
    pub fn data_message(&self, data: Value, conn_id: Option<&ConnId>) {
        match conn_id {
            Some(conn_id) => {
                if let Some(socket) = self.socket(conn_id) {
                    let _ = socket.send(ServerMessage::Data(data));
                }
            }
            None => self.send_all(ServerMessage::Data(data)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::room::NewRoom;
    use crate::room_type::RoomType;
    use crate::testing::{drain, login, server_with};
    use serde_json::json;

    fn setup() -> crate::server::GameServer {
        server_with(Settings::default(), |builder| {
            builder
                .room_type("lobby", RoomType::new())
                .room_type("voice", RoomType::new().voice_chat())
        })
    }

    #[test]
    fn test_chat_to_all_members() {
        let server = setup();
        let hall = server.new_room(NewRoom::new("hall", "lobby")).unwrap();
        let (alice, a_conn, mut a_rx) = login(&server, "alice");
        let (bob, b_conn, mut b_rx) = login(&server, "bob");
        let (_carol, _c_conn, mut c_rx) = login(&server, "carol");
        alice.join(&hall, &a_conn).unwrap();
        bob.join(&hall, &b_conn).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        hall.chat_message("alice", json!("hi"), None).unwrap();
        let expected = json!({"m": {"a": "alice", "m": "hi"}});
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut b_rx), vec![expected]);
        assert!(drain(&mut c_rx).is_empty());
    }

    #[test]
    fn test_server_message_to_recipients() {
        let server = setup();
        let hall = server.new_room(NewRoom::new("hall", "lobby")).unwrap();
        let (alice, a_conn, mut a_rx) = login(&server, "alice");
        let (bob, b_conn, mut b_rx) = login(&server, "bob");
        alice.join(&hall, &a_conn).unwrap();
        bob.join(&hall, &b_conn).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let only_bob = ["bob".to_string(), "ghost".to_string()];
        hall.server_message(json!("round 2"), 1, Some(&only_bob)).unwrap();
        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![json!({"m": {"s": 1, "m": "round 2"}})]);

        hall.data_message(json!({"hp": 10}), Some(&[])).unwrap();
        assert_eq!(drain(&mut a_rx), vec![json!({"d": {"hp": 10}})]);
        assert_eq!(drain(&mut b_rx), vec![json!({"d": {"hp": 10}})]);
    }

    #[test]
    fn test_voice_excludes_speaker() {
        let server = setup();
        let room = server.new_room(NewRoom::new("talk", "voice")).unwrap();
        let (alice, a_conn, mut a_rx) = login(&server, "alice");
        let (bob, b_conn, mut b_rx) = login(&server, "bob");
        alice.join(&room, &a_conn).unwrap();
        bob.join(&room, &b_conn).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        let socket = alice.socket(&a_conn).unwrap();
        room.voice_stream("alice", &socket, json!("chunk"), None).unwrap();
        assert_eq!(drain(&mut a_rx), vec![json!({"vp": null})]);
        assert_eq!(drain(&mut b_rx), vec![json!({"v": {"u": "alice", "d": "chunk"}})]);
    }

    #[test]
    fn test_private_message_both_sides() {
        let server = setup();
        let (alice, _, mut a_rx) = login(&server, "alice");
        let (_bob, _, mut b_rx) = login(&server, "bob");
        drain(&mut a_rx);
        drain(&mut b_rx);

        alice.private_message("bob", json!("psst")).unwrap();
        let expected = json!({"p": {"f": "alice", "t": "bob", "m": "psst"}});
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut b_rx), vec![expected]);

        assert!(alice.private_message("nobody", json!("?")).is_err());
    }

    #[test]
    fn test_user_data_message() {
        let server = setup();
        let (alice, conn, mut rx) = login(&server, "alice");
        drain(&mut rx);
        alice.data_message(json!(1), Some(&conn));
        alice.data_message(json!(2), None);
        assert_eq!(drain(&mut rx), vec![json!({"d": 1}), json!({"d": 2})]);
    }

    #[test]
    fn test_fan_out_on_deleted_room() {
        let server = setup();
        let hall = server.new_room(NewRoom::new("hall", "lobby")).unwrap();
        hall.delete().unwrap();
        assert!(hall.chat_message("alice", json!("hi"), None).is_err());
    }
}
