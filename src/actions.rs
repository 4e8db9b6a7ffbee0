//! Custom client actions
//!
//! A host registers named actions before the server is built. A client calls
//! one with `{"A":"a","P":{"A":name,"P":data}}`; the data must match the
//! declared `DataType` or the client gets `"Mismatched data type"` back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::message::{ActionResponse, ServerMessage};
use crate::socket::Socket;
use crate::types::ConnId;
use crate::user::User;

/// Accepted shape of a custom action's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int,
    Float,
    String,
    Array,
    Map,
    Nil,
}

impl DataType {
    pub fn matches(self, data: &Value) -> bool {
        match (self, data) {
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (DataType::Float, Value::Number(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Array, Value::Array(_)) => true,
            (DataType::Map, Value::Object(_)) => true,
            (DataType::Nil, Value::Null) => true,
            _ => false,
        }
    }
}

pub type ActionHandler = Arc<dyn Fn(Value, &mut ActionClient) + Send + Sync>;

struct CustomAction {
    data_type: DataType,
    handler: ActionHandler,
}

/// Registry of custom actions, frozen when the server is built
#[derive(Default)]
pub struct CustomActions {
    actions: HashMap<String, CustomAction>,
}

impl CustomActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, data_type: DataType, handler: F)
    where
        F: Fn(Value, &mut ActionClient) + Send + Sync + 'static,
    {
        self.actions.insert(
            name.into(),
            CustomAction {
                data_type,
                handler: Arc::new(handler),
            },
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }

    /// Run the named action for a client
    pub(crate) fn handle(&self, name: &str, data: Value, mut client: ActionClient) {
        match self.actions.get(name) {
            Some(action) if action.data_type.matches(&data) => {
                debug!(action = %name, user = %client.user_name(), "Custom action");
                (action.handler)(data, &mut client);
                if !client.has_responded() {
                    debug!(action = %name, user = %client.user_name(), "Custom action finished without a response");
                }
            }
            Some(_) => client.respond(Err("Mismatched data type".to_string())),
            None => client.respond(Err("Unrecognized action".to_string())),
        }
    }
}

impl fmt::Debug for CustomActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.actions.keys()).finish()
    }
}

/// The caller of a custom action
pub struct ActionClient {
    action: String,
    user: Arc<User>,
    conn_id: ConnId,
    socket: Socket,
    responded: bool,
}

impl ActionClient {
    pub(crate) fn new(action: impl Into<String>, user: Arc<User>, conn_id: ConnId, socket: Socket) -> Self {
        Self {
            action: action.into(),
            user,
            conn_id,
            socket,
            responded: false,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    pub fn user_name(&self) -> &str {
        self.user.name()
    }

    pub fn connection_id(&self) -> &ConnId {
        &self.conn_id
    }

    /// Reply on the calling connection; only the first call is sent
    pub fn respond(&mut self, result: Result<Value, String>) {
        if self.responded {
            return;
        }
        self.responded = true;
        let _ = self.socket.send(ServerMessage::CustomAction(ActionResponse {
            action: self.action.clone(),
            result,
        }));
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }
}
