//! Account and friendship persistence
//!
//! The server talks to persistence through two traits: `Identity` for
//! accounts, credentials and autologin tokens, and `FriendsStore` for the
//! friendship edges. `MemoryStore` implements both in process with bcrypt
//! password hashes; a database-backed store plugs in the same way.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::GameError;
use crate::friends::Friend;
use crate::types::{secure_token, FriendStatus};

/// Custom account columns sent alongside a credential action
pub type Columns = Map<String, Value>;

/// Result of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub database_id: i64,
    /// Fresh autologin pass for the device, when remember-me was asked for
    pub autolog_pass: Option<String>,
}

pub trait Identity: Send + Sync {
    fn sign_up(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError>;

    fn login(
        &self,
        name: &str,
        password: &str,
        device_tag: &str,
        remember_me: bool,
        columns: Option<&Columns>,
    ) -> Result<Account, GameError>;

    /// Verify a device's autologin pass and rotate it to `new_pass`
    ///
    /// Returns the account name. A wrong pass deletes the device entry.
    fn auto_login(&self, device_tag: &str, pass: &str, new_pass: &str, database_id: i64) -> Result<String, GameError>;

    fn remove_auto_log(&self, database_id: i64, device_tag: &str);

    fn change_password(
        &self,
        name: &str,
        password: &str,
        new_password: &str,
        columns: Option<&Columns>,
    ) -> Result<(), GameError>;

    fn change_account_info(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError>;

    fn delete_account(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError>;

    fn get_user_database_index(&self, name: &str) -> Result<i64, GameError>;

    fn get_friends(&self, database_id: i64) -> Result<HashMap<String, Friend>, GameError>;
}

pub trait FriendsStore: Send + Sync {
    /// `user → friend: Pending` and `friend → user: Requested`
    fn friend_request(&self, user: i64, friend: i64) -> Result<(), GameError>;

    /// Both edges become `Accepted`
    fn friend_request_accepted(&self, user: i64, friend: i64) -> Result<(), GameError>;

    /// Both edges are deleted
    fn remove_friend(&self, user: i64, friend: i64) -> Result<(), GameError>;
}

struct AccountRecord {
    id: i64,
    password_hash: String,
    info: Columns,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    accounts: HashMap<String, AccountRecord>,
    names: HashMap<i64, String>,
    friends: HashMap<(i64, i64), FriendStatus>,
    autologs: HashMap<(i64, String), String>,
}

/// In-process accounts, friends and autologin tables
pub struct MemoryStore {
    cost: u32,
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_cost(bcrypt::DEFAULT_COST)
    }

    /// Store with a custom bcrypt cost (4 is the minimum)
    pub fn with_cost(cost: u32) -> Self {
        Self {
            cost,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Check a name and password; returns the account id
    fn verify(&self, name: &str, password: &str) -> Result<i64, GameError> {
        if name.is_empty() {
            return Err(GameError::RequiredName);
        }
        if password.is_empty() {
            return Err(GameError::RequiredPass);
        }
        let (id, password_hash) = {
            let tables = self.tables.lock();
            let record = tables.accounts.get(name).ok_or(GameError::IncorrectLogin)?;
            (record.id, record.password_hash.clone())
        };
        match bcrypt::verify(password, &password_hash) {
            Ok(true) => Ok(id),
            Ok(false) => Err(GameError::IncorrectLogin),
            Err(e) => {
                warn!(error = %e, "Stored password hash is unreadable");
                Err(GameError::Encryption)
            }
        }
    }

    fn hash(&self, secret: &str) -> Result<String, GameError> {
        bcrypt::hash(secret, self.cost).map_err(|e| {
            warn!(error = %e, "Password hashing failed");
            GameError::Encryption
        })
    }

    /// Stored status of the directed edge `user → friend`
    pub fn friend_edge(&self, user: i64, friend: i64) -> Option<FriendStatus> {
        self.tables.lock().friends.get(&(user, friend)).copied()
    }

    /// Custom columns stored for an account
    pub fn account_info(&self, name: &str) -> Option<Columns> {
        self.tables.lock().accounts.get(name).map(|record| record.info.clone())
    }

    pub fn has_auto_log(&self, database_id: i64, device_tag: &str) -> bool {
        self.tables
            .lock()
            .autologs
            .contains_key(&(database_id, device_tag.to_string()))
    }
}

impl Identity for MemoryStore {
    fn sign_up(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError> {
        if name.is_empty() {
            return Err(GameError::RequiredName);
        }
        if password.is_empty() {
            return Err(GameError::RequiredPass);
        }
        let password_hash = self.hash(password)?;
        let mut tables = self.tables.lock();
        if tables.accounts.contains_key(name) {
            return Err(GameError::NameUnavail);
        }
        tables.next_id += 1;
        let id = tables.next_id;
        tables.accounts.insert(
            name.to_string(),
            AccountRecord {
                id,
                password_hash,
                info: columns.cloned().unwrap_or_default(),
            },
        );
        tables.names.insert(id, name.to_string());
        debug!(user = %name, id, "Account created");
        Ok(())
    }

    fn login(
        &self,
        name: &str,
        password: &str,
        device_tag: &str,
        remember_me: bool,
        _columns: Option<&Columns>,
    ) -> Result<Account, GameError> {
        let id = self.verify(name, password)?;
        let autolog_pass = if remember_me && !device_tag.is_empty() {
            let pass = secure_token(32);
            let pass_hash = self.hash(&pass)?;
            self.tables
                .lock()
                .autologs
                .insert((id, device_tag.to_string()), pass_hash);
            Some(pass)
        } else {
            None
        };
        Ok(Account {
            name: name.to_string(),
            database_id: id,
            autolog_pass,
        })
    }

    fn auto_login(&self, device_tag: &str, pass: &str, new_pass: &str, database_id: i64) -> Result<String, GameError> {
        let key = (database_id, device_tag.to_string());
        let stored = self
            .tables
            .lock()
            .autologs
            .get(&key)
            .cloned()
            .ok_or(GameError::InvalidAutolog)?;
        if !bcrypt::verify(pass, &stored).unwrap_or(false) {
            warn!(id = database_id, "Autologin pass mismatch, removing device entry");
            self.tables.lock().autologs.remove(&key);
            return Err(GameError::InvalidAutolog);
        }
        let new_hash = self.hash(new_pass)?;
        let mut tables = self.tables.lock();
        let name = tables
            .names
            .get(&database_id)
            .cloned()
            .ok_or(GameError::InvalidAutolog)?;
        tables.autologs.insert(key, new_hash);
        Ok(name)
    }

    fn remove_auto_log(&self, database_id: i64, device_tag: &str) {
        self.tables
            .lock()
            .autologs
            .remove(&(database_id, device_tag.to_string()));
    }

    fn change_password(
        &self,
        name: &str,
        password: &str,
        new_password: &str,
        _columns: Option<&Columns>,
    ) -> Result<(), GameError> {
        if new_password.is_empty() {
            return Err(GameError::RequiredNewPass);
        }
        self.verify(name, password)?;
        let new_hash = self.hash(new_password)?;
        let mut tables = self.tables.lock();
        let record = tables.accounts.get_mut(name).ok_or(GameError::IncorrectLogin)?;
        record.password_hash = new_hash;
        Ok(())
    }

    fn change_account_info(&self, name: &str, password: &str, columns: Option<&Columns>) -> Result<(), GameError> {
        let columns = columns.filter(|c| !c.is_empty()).ok_or(GameError::IncorrectCols)?;
        self.verify(name, password)?;
        let mut tables = self.tables.lock();
        let record = tables.accounts.get_mut(name).ok_or(GameError::IncorrectLogin)?;
        for (key, value) in columns {
            record.info.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_account(&self, name: &str, password: &str, _columns: Option<&Columns>) -> Result<(), GameError> {
        let id = self.verify(name, password)?;
        let mut tables = self.tables.lock();
        tables.accounts.remove(name);
        tables.names.remove(&id);
        tables.friends.retain(|(a, b), _| *a != id && *b != id);
        tables.autologs.retain(|(user, _), _| *user != id);
        debug!(user = %name, id, "Account deleted");
        Ok(())
    }

    fn get_user_database_index(&self, name: &str) -> Result<i64, GameError> {
        self.tables
            .lock()
            .accounts
            .get(name)
            .map(|record| record.id)
            .ok_or_else(|| GameError::Query(format!("No account named '{}'", name)))
    }

    fn get_friends(&self, database_id: i64) -> Result<HashMap<String, Friend>, GameError> {
        let tables = self.tables.lock();
        let mut friends = HashMap::new();
        for ((user, other), status) in &tables.friends {
            if *user != database_id {
                continue;
            }
            let name = tables.names.get(other).ok_or(GameError::AuthUnexpected)?;
            friends.insert(name.clone(), Friend::new(name.clone(), *other, *status));
        }
        Ok(friends)
    }
}

impl FriendsStore for MemoryStore {
    fn friend_request(&self, user: i64, friend: i64) -> Result<(), GameError> {
        let mut tables = self.tables.lock();
        if !tables.names.contains_key(&user) || !tables.names.contains_key(&friend) {
            return Err(GameError::Query("Unknown account id".to_string()));
        }
        tables.friends.insert((user, friend), FriendStatus::Pending);
        tables.friends.insert((friend, user), FriendStatus::Requested);
        Ok(())
    }

    fn friend_request_accepted(&self, user: i64, friend: i64) -> Result<(), GameError> {
        let mut tables = self.tables.lock();
        if !tables.friends.contains_key(&(user, friend)) {
            return Err(GameError::Query("No pending friend request".to_string()));
        }
        tables.friends.insert((user, friend), FriendStatus::Accepted);
        tables.friends.insert((friend, user), FriendStatus::Accepted);
        Ok(())
    }

    fn remove_friend(&self, user: i64, friend: i64) -> Result<(), GameError> {
        let mut tables = self.tables.lock();
        tables.friends.remove(&(user, friend));
        tables.friends.remove(&(friend, user));
        Ok(())
    }
}
