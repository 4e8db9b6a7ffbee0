//! Friend requests across online presence and the friends store
//!
//! A friendship is two half-edges. While a request is open the requester
//! holds `Pending` and the recipient `Requested`; accepting flips both to
//! `Accepted`, declining or removing deletes both. The online side of an edge
//! lives in each `User`'s friends cache; the durable side in `FriendsStore`.
//! If the store write fails the cache edits are undone.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::GameError;
use crate::message::{action, ServerMessage};
use crate::server::Shared;
use crate::store::FriendsStore;
use crate::types::{FriendStatus, UserStatus};
use crate::user::User;

/// One side of a friendship as seen by its holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    pub name: String,
    pub database_id: i64,
    pub status: FriendStatus,
}

impl Friend {
    pub fn new(name: impl Into<String>, database_id: i64, status: FriendStatus) -> Self {
        Self {
            name: name.into(),
            database_id,
            status,
        }
    }
}

/// The other end of a friend operation
struct Counterpart {
    online: Option<Arc<User>>,
    database_id: i64,
}

impl User {
    fn friend_context(&self) -> Result<(Arc<Shared>, Arc<dyn FriendsStore>), GameError> {
        let shared = self.shared().ok_or_else(GameError::server_gone)?;
        let store = shared
            .friends_store
            .clone()
            .ok_or(GameError::FeatureDisabled)?;
        Ok((shared, store))
    }

    /// Find the other user online, or their id in the identity store
    fn counterpart(&self, shared: &Shared, name: &str, cached_id: Option<i64>) -> Result<Counterpart, GameError> {
        if let Some(online) = shared.online_user(name) {
            let database_id = online.database_id();
            return Ok(Counterpart {
                online: Some(online),
                database_id,
            });
        }
        let database_id = match cached_id {
            Some(id) => id,
            None => shared
                .identity
                .as_ref()
                .ok_or(GameError::FeatureDisabled)?
                .get_user_database_index(name)
                .map_err(|_| GameError::FriendRequest(format!("The user '{}' does not exist", name)))?,
        };
        Ok(Counterpart {
            online: None,
            database_id,
        })
    }

    fn set_edge(&self, name: &str, edge: Option<Friend>) {
        let mut state = self.state.lock();
        match edge {
            Some(friend) => {
                state.friends.insert(name.to_string(), friend);
            }
            None => {
                state.friends.remove(name);
            }
        }
    }

    /// Insert an edge unless one to that user already exists
    fn try_insert_edge(&self, friend: Friend) -> bool {
        let mut state = self.state.lock();
        if state.friends.contains_key(&friend.name) {
            return false;
        }
        state.friends.insert(friend.name.clone(), friend);
        true
    }

    fn respond_all(&self, tag: &str, result: Value) {
        self.send_all(ServerMessage::ok(tag, result));
    }

    /// Ask another user to be friends
    pub fn friend_request(&self, name: &str) -> Result<(), GameError> {
        let refused = || {
            GameError::FriendRequest(format!(
                "The user '{}' cannot be requested as a friend",
                name
            ))
        };
        let (shared, store) = self.friend_context()?;
        if self.is_guest() || name == self.name() || self.friend(name).is_some() {
            return Err(refused());
        }
        let target = self.counterpart(&shared, name, None)?;
        if target.database_id < 0 || target.online.as_ref().is_some_and(|u| u.is_guest()) {
            return Err(refused());
        }

        // Both halves must be new; a crossed request loses here
        if !self.try_insert_edge(Friend::new(name, target.database_id, FriendStatus::Pending)) {
            return Err(refused());
        }
        if let Some(online) = &target.online {
            let requested = Friend::new(self.name(), self.database_id(), FriendStatus::Requested);
            if !online.try_insert_edge(requested) {
                self.set_edge(name, None);
                return Err(refused());
            }
        }

        if let Err(e) = store.friend_request(self.database_id(), target.database_id) {
            warn!(user = %self.name(), friend = %name, error = %e, "Friend request not stored");
            self.set_edge(name, None);
            if let Some(online) = &target.online {
                online.set_edge(self.name(), None);
            }
            return Err(GameError::UnexpectedFriend);
        }

        if let Some(online) = &target.online {
            online.send_all(ServerMessage::FriendRequest {
                n: self.name().to_string(),
            });
        }
        self.respond_all(action::FRIEND_REQUEST, json!(name));
        debug!(user = %self.name(), friend = %name, "Friend requested");
        Ok(())
    }

    /// Accept a request another user sent
    pub fn accept_friend_request(&self, name: &str) -> Result<(), GameError> {
        let (shared, store) = self.friend_context()?;
        let edge = self.friend(name).ok_or_else(|| {
            GameError::FriendAccept(format!("The user '{}' has not requested you as a friend", name))
        })?;
        if edge.status != FriendStatus::Requested {
            return Err(GameError::FriendAccept(format!(
                "The user '{}' cannot be accepted as a friend",
                name
            )));
        }
        let target = self.counterpart(&shared, name, Some(edge.database_id))?;
        let their_edge = target.online.as_ref().and_then(|u| u.friend(self.name()));

        self.set_edge(
            name,
            Some(Friend::new(name, target.database_id, FriendStatus::Accepted)),
        );
        if let (Some(online), Some(theirs)) = (&target.online, &their_edge) {
            online.set_edge(
                self.name(),
                Some(Friend::new(self.name(), theirs.database_id, FriendStatus::Accepted)),
            );
        }

        if let Err(e) = store.friend_request_accepted(self.database_id(), target.database_id) {
            warn!(user = %self.name(), friend = %name, error = %e, "Friend accept not stored");
            self.set_edge(name, Some(edge));
            if let Some(online) = &target.online {
                online.set_edge(self.name(), their_edge);
            }
            return Err(GameError::UnexpectedFriend);
        }

        let friend_status = match &target.online {
            Some(online) => {
                online.send_all(ServerMessage::FriendAccept {
                    n: self.name().to_string(),
                    s: self.status(),
                });
                online.status()
            }
            None => UserStatus::Offline,
        };
        self.respond_all(action::ACCEPT_FRIEND, json!({"n": name, "s": friend_status}));
        debug!(user = %self.name(), friend = %name, "Friend request accepted");
        Ok(())
    }

    /// Decline a request another user sent
    pub fn decline_friend_request(&self, name: &str) -> Result<(), GameError> {
        let edge = self.friend(name).ok_or_else(|| {
            GameError::FriendDecline(format!("The user '{}' has not requested you as a friend", name))
        })?;
        if edge.status != FriendStatus::Requested {
            return Err(GameError::FriendDecline(format!(
                "The user '{}' cannot be declined as a friend",
                name
            )));
        }
        self.drop_friendship(edge, action::DECLINE_FRIEND)
    }

    /// End an accepted friendship
    pub fn remove_friend(&self, name: &str) -> Result<(), GameError> {
        let edge = self.friend(name).ok_or_else(|| {
            GameError::FriendRemove(format!("The user '{}' is not your friend", name))
        })?;
        if edge.status != FriendStatus::Accepted {
            return Err(GameError::FriendRemove(format!(
                "The user '{}' cannot be removed as a friend",
                name
            )));
        }
        self.drop_friendship(edge, action::REMOVE_FRIEND)
    }

    fn drop_friendship(&self, edge: Friend, tag: &str) -> Result<(), GameError> {
        let (shared, store) = self.friend_context()?;
        let name = edge.name.clone();
        let target = self.counterpart(&shared, &name, Some(edge.database_id))?;
        let their_edge = target.online.as_ref().and_then(|u| u.friend(self.name()));

        self.set_edge(&name, None);
        if let Some(online) = &target.online {
            online.set_edge(self.name(), None);
        }

        if let Err(e) = store.remove_friend(self.database_id(), target.database_id) {
            warn!(user = %self.name(), friend = %name, error = %e, "Friend removal not stored");
            self.set_edge(&name, Some(edge));
            if let Some(online) = &target.online {
                online.set_edge(self.name(), their_edge);
            }
            return Err(GameError::UnexpectedFriend);
        }

        if let Some(online) = &target.online {
            online.send_all(ServerMessage::FriendRemove {
                n: self.name().to_string(),
            });
        }
        self.respond_all(tag, json!(name));
        debug!(user = %self.name(), friend = %name, action = tag, "Friendship dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::store::{Identity, MemoryStore};
    use crate::testing::{drain, login_account, server_with_store};

    fn store_with(names: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_cost(4));
        for name in names {
            store.sign_up(name, "pw", None).unwrap();
        }
        store
    }

    fn sql_settings() -> Settings {
        Settings {
            enable_sql_features: true,
            ..Settings::default()
        }
    }

    #[test]
    fn test_request_and_accept_online() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, _, mut alice_rx) = login_account(&server, &store, "alice");
        let (bob, _, mut bob_rx) = login_account(&server, &store, "bob");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.friend_request("bob").unwrap();
        assert_eq!(alice.friend("bob").unwrap().status, FriendStatus::Pending);
        assert_eq!(bob.friend("alice").unwrap().status, FriendStatus::Requested);
        assert_eq!(
            store.friend_edge(alice.database_id(), bob.database_id()),
            Some(FriendStatus::Pending)
        );
        assert_eq!(
            store.friend_edge(bob.database_id(), alice.database_id()),
            Some(FriendStatus::Requested)
        );
        assert_eq!(drain(&mut bob_rx), vec![json!({"f": {"n": "alice"}})]);
        assert_eq!(drain(&mut alice_rx), vec![json!({"c": {"a": "f", "r": "bob"}})]);

        bob.accept_friend_request("alice").unwrap();
        assert_eq!(alice.friend("bob").unwrap().status, FriendStatus::Accepted);
        assert_eq!(bob.friend("alice").unwrap().status, FriendStatus::Accepted);
        assert_eq!(drain(&mut alice_rx), vec![json!({"fa": {"n": "bob", "s": 0}})]);
        assert_eq!(
            drain(&mut bob_rx),
            vec![json!({"c": {"a": "fa", "r": {"n": "alice", "s": 0}}})]
        );
        assert_eq!(
            store.friend_edge(alice.database_id(), bob.database_id()),
            Some(FriendStatus::Accepted)
        );
    }

    #[test]
    fn test_request_rejections() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, _, _a) = login_account(&server, &store, "alice");

        assert!(alice.friend_request("alice").is_err());
        let err = alice.friend_request("nobody").unwrap_err();
        assert_eq!(err.to_string(), "The user 'nobody' does not exist");

        alice.friend_request("bob").unwrap();
        let err = alice.friend_request("bob").unwrap_err();
        assert_eq!(err.to_string(), "The user 'bob' cannot be requested as a friend");
        // the requester cannot accept their own request
        assert!(matches!(alice.accept_friend_request("bob"), Err(GameError::FriendAccept(_))));
    }

    #[test]
    fn test_crossed_request_does_not_leave_two_pending_edges() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, _, _a) = login_account(&server, &store, "alice");
        let (bob, _, mut bob_rx) = login_account(&server, &store, "bob");
        drain(&mut bob_rx);

        // bob's own request to alice has claimed his half but not hers yet
        bob.set_edge(
            "alice",
            Some(Friend::new("alice", alice.database_id(), FriendStatus::Pending)),
        );
        let err = alice.friend_request("bob").unwrap_err();
        assert_eq!(err.to_string(), "The user 'bob' cannot be requested as a friend");
        assert!(alice.friend("bob").is_none());
        assert_eq!(bob.friend("alice").unwrap().status, FriendStatus::Pending);
        assert_eq!(store.friend_edge(alice.database_id(), bob.database_id()), None);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[test]
    fn test_offline_request_then_login_sees_it() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, _, _a) = login_account(&server, &store, "alice");
        alice.friend_request("bob").unwrap();

        let (bob, _, mut bob_rx) = login_account(&server, &store, "bob");
        assert_eq!(bob.friend("alice").unwrap().status, FriendStatus::Requested);
        let login = &drain(&mut bob_rx)[0];
        assert_eq!(login["c"]["r"]["f"], json!([{"n": "alice", "rs": 0}]));
    }

    #[test]
    fn test_decline_and_remove() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, _, mut alice_rx) = login_account(&server, &store, "alice");
        let (bob, _, mut bob_rx) = login_account(&server, &store, "bob");

        alice.friend_request("bob").unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        bob.decline_friend_request("alice").unwrap();
        assert!(alice.friend("bob").is_none());
        assert!(bob.friend("alice").is_none());
        assert_eq!(drain(&mut alice_rx), vec![json!({"fr": {"n": "bob"}})]);
        assert_eq!(drain(&mut bob_rx), vec![json!({"c": {"a": "fd", "r": "alice"}})]);
        assert_eq!(store.friend_edge(alice.database_id(), bob.database_id()), None);

        alice.friend_request("bob").unwrap();
        bob.accept_friend_request("alice").unwrap();
        assert!(matches!(bob.decline_friend_request("alice"), Err(GameError::FriendDecline(_))));
        drain(&mut alice_rx);
        alice.remove_friend("bob").unwrap();
        assert!(bob.friend("alice").is_none());
        assert_eq!(drain(&mut alice_rx), vec![json!({"c": {"a": "fr", "r": "bob"}})]);
    }

    #[test]
    fn test_status_reaches_accepted_friends() {
        let store = store_with(&["alice", "bob"]);
        let server = server_with_store(sql_settings(), store.clone());
        let (alice, alice_conn, mut alice_rx) = login_account(&server, &store, "alice");
        let (bob, _, mut bob_rx) = login_account(&server, &store, "bob");
        alice.friend_request("bob").unwrap();
        bob.accept_friend_request("alice").unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        alice.set_status(UserStatus::InGame);
        assert_eq!(drain(&mut bob_rx), vec![json!({"fs": {"n": "alice", "s": 1}})]);

        alice.logout(&alice_conn);
        assert_eq!(drain(&mut bob_rx), vec![json!({"fs": {"n": "alice", "s": 3}})]);
    }

    #[test]
    fn test_friends_need_sql_features() {
        let server = crate::testing::server_with(Settings::default(), |b| b);
        let (alice, _, _rx) = crate::testing::login(&server, "alice");
        assert!(matches!(alice.friend_request("bob"), Err(GameError::FeatureDisabled)));
    }
}
